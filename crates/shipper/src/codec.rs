//! 보안 코덱 -- 배치를 와이어 봉투(헤더 + 본문)로 변환합니다.
//!
//! # 와이어 형식
//! - 평문: `Content-Type: application/json`, 본문 = 라인 본문의 JSON 문자열 배열
//! - 암호화: `Content-Type: application/octet-stream`, 헤더 `X-Encrypted: true`,
//!   `X-Key-ID: <키 ID>`, 본문 = 12바이트 nonce || AEAD 암호문 + 태그 (AAD = 키 ID 바이트)
//!
//! 같은 배치는 항상 같은 평문 JSON을 만듭니다. 암호문은 호출마다 새 nonce를
//! 뽑으므로 달라집니다. nonce는 카운터 없이 시스템 난수에만 의존합니다.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bytes::Bytes;
use logship_core::config::EncryptionConfig;
use reqwest::header::HeaderValue;
use ring::aead::{self, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::info;

use crate::batcher::Batch;
use crate::error::{DecryptionError, EncodingError, ShipperError};

/// 암호화 여부 헤더
pub const HEADER_ENCRYPTED: &str = "X-Encrypted";
/// 키 식별자 헤더
pub const HEADER_KEY_ID: &str = "X-Key-ID";
/// 평문 봉투 Content-Type
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// 암호화 봉투 Content-Type
pub const CONTENT_TYPE_ENCRYPTED: &str = "application/octet-stream";

/// 키 길이 (두 알고리즘 모두 256비트)
pub const KEY_LEN: usize = 32;

/// 와이어 전송 단위
///
/// 배치마다 한 번 생성되며 이후 변경되지 않습니다. 재시도는 같은 `body`를 재사용합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// 본문
    pub body: Bytes,
    /// Content-Type
    pub content_type: &'static str,
    /// 추가 헤더
    pub headers: BTreeMap<String, String>,
}

impl Envelope {
    /// 헤더 값을 대소문자 구분 없이 조회합니다.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 암호화 봉투인지 확인합니다 (`X-Encrypted`가 정확히 `"true"`).
    pub fn is_encrypted(&self) -> bool {
        self.header(HEADER_ENCRYPTED) == Some("true")
    }
}

/// AEAD 알고리즘
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// AES-256-GCM
    AesGcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl Algorithm {
    fn ring_algorithm(self) -> &'static aead::Algorithm {
        match self {
            Self::AesGcm => &aead::AES_256_GCM,
            Self::ChaCha20Poly1305 => &aead::CHACHA20_POLY1305,
        }
    }

    /// 설정 토큰
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AesGcm => "aes-gcm",
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

impl FromStr for Algorithm {
    type Err = ShipperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes-gcm" => Ok(Self::AesGcm),
            "chacha20-poly1305" => Ok(Self::ChaCha20Poly1305),
            other => Err(ShipperError::config(
                "encryption.algorithm",
                format!("unknown algorithm '{other}'"),
            )),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 페이로드 암호화 키
///
/// 시작 시 한 번 로드되어 `Arc`로 공유됩니다. 교체는 설정을 바꿔 재시작하는 방식입니다.
pub struct EncryptionKey {
    id: String,
    algorithm: Algorithm,
    key: LessSafeKey,
}

impl EncryptionKey {
    /// 32바이트 키 재료로 키를 생성합니다.
    pub fn new(
        id: impl Into<String>,
        algorithm: Algorithm,
        material: &[u8],
    ) -> Result<Self, ShipperError> {
        let id = id.into();
        // 키 ID는 X-Key-ID 헤더로 전송됨
        if HeaderValue::from_str(&id).is_err() {
            return Err(ShipperError::config(
                "encryption.key_id",
                format!("{id:?} is not a valid header value"),
            ));
        }
        if material.len() != KEY_LEN {
            return Err(ShipperError::config(
                "encryption.key_file",
                format!("key must be {KEY_LEN} bytes, got {}", material.len()),
            ));
        }
        let unbound = UnboundKey::new(algorithm.ring_algorithm(), material)
            .map_err(|_| ShipperError::config("encryption.key_file", "rejected key material"))?;
        Ok(Self {
            id,
            algorithm,
            key: LessSafeKey::new(unbound),
        })
    }

    /// hex 문자열(64자)로 키를 생성합니다.
    pub fn from_hex(
        id: impl Into<String>,
        algorithm: Algorithm,
        hex_str: &str,
    ) -> Result<Self, ShipperError> {
        let material = hex::decode(hex_str.trim()).map_err(|e| {
            ShipperError::config("encryption.key_file", format!("invalid hex key: {e}"))
        })?;
        Self::new(id, algorithm, &material)
    }

    /// hex 키 파일에서 키를 로드합니다.
    pub fn from_file(
        id: impl Into<String>,
        algorithm: Algorithm,
        path: impl AsRef<Path>,
    ) -> Result<Self, ShipperError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShipperError::config(
                "encryption.key_file",
                format!("cannot read '{}': {e}", path.display()),
            )
        })?;
        Self::from_hex(id, algorithm, &content)
    }

    /// 암호화 설정에서 키를 로드합니다. 비활성화 상태면 `None`.
    pub fn from_config(config: &EncryptionConfig) -> Result<Option<Self>, ShipperError> {
        if !config.enabled {
            return Ok(None);
        }
        if config.key_id.is_empty() {
            return Err(ShipperError::config("encryption.key_id", "must not be empty"));
        }
        let algorithm: Algorithm = config.algorithm.parse()?;
        let path = config
            .key_file
            .as_deref()
            .ok_or_else(|| ShipperError::config("encryption.key_file", "required when enabled"))?;
        let key = Self::from_file(config.key_id.clone(), algorithm, path)?;
        info!(key_id = %key.id, %algorithm, "payload encryption enabled");
        Ok(Some(key))
    }

    /// 키 식별자
    pub fn id(&self) -> &str {
        &self.id
    }

    /// AEAD 알고리즘
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// 배치를 봉투로 인코딩합니다.
///
/// 라인 본문만 직렬화하며 메타데이터 필드는 와이어에 포함되지 않습니다.
/// 봉인 실패는 배치 단위로 치명적이며 재시도하지 않습니다.
pub fn encode(batch: &Batch, key: Option<&EncryptionKey>) -> Result<Envelope, EncodingError> {
    let texts: Vec<&str> = batch.lines().iter().map(|l| l.text.as_str()).collect();
    let json = serde_json::to_vec(&texts)?;

    let Some(key) = key else {
        return Ok(Envelope {
            body: Bytes::from(json),
            content_type: CONTENT_TYPE_JSON,
            headers: BTreeMap::new(),
        });
    };

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| EncodingError::Random)?;

    let mut in_out = json;
    key.key
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(key.id.as_bytes()),
            &mut in_out,
        )
        .map_err(|_| EncodingError::Seal {
            key_id: key.id.clone(),
        })?;

    let mut body = Vec::with_capacity(NONCE_LEN + in_out.len());
    body.extend_from_slice(&nonce_bytes);
    body.extend_from_slice(&in_out);

    let mut headers = BTreeMap::new();
    headers.insert(HEADER_ENCRYPTED.to_owned(), "true".to_owned());
    headers.insert(HEADER_KEY_ID.to_owned(), key.id.clone());

    Ok(Envelope {
        body: Bytes::from(body),
        content_type: CONTENT_TYPE_ENCRYPTED,
        headers,
    })
}

/// 봉투를 라인 본문 목록으로 디코딩합니다 (수신 측).
///
/// `X-Encrypted`가 없거나 `"true"`가 아니면 평문 JSON으로 처리합니다.
/// 암호화 봉투의 인증이 실패하면 절대 평문으로 대체하지 않고 에러를 반환합니다.
pub fn decode(
    envelope: &Envelope,
    key: Option<&EncryptionKey>,
) -> Result<Vec<String>, DecryptionError> {
    if !envelope.is_encrypted() {
        return parse_lines(&envelope.body);
    }

    let key = key.ok_or(DecryptionError::MissingKey)?;
    let key_id = envelope.header(HEADER_KEY_ID).unwrap_or_default();
    if key_id != key.id {
        return Err(DecryptionError::UnknownKey(key_id.to_owned()));
    }

    let tag_len = key.algorithm.ring_algorithm().tag_len();
    if envelope.body.len() < NONCE_LEN + tag_len {
        return Err(DecryptionError::Truncated {
            len: envelope.body.len(),
        });
    }

    let (nonce_bytes, ciphertext) = envelope.body.split_at(NONCE_LEN);
    let nonce =
        Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| DecryptionError::Authentication)?;
    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .key
        .open_in_place(nonce, Aad::from(key_id.as_bytes()), &mut in_out)
        .map_err(|_| DecryptionError::Authentication)?;

    parse_lines(plaintext)
}

fn parse_lines(body: &[u8]) -> Result<Vec<String>, DecryptionError> {
    serde_json::from_slice(body).map_err(|e| DecryptionError::MalformedPayload(e.to_string()))
}
