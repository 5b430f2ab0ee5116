//! 전송 파이프라인 에러 타입
//!
//! [`ShipperError`]는 배처, 코덱, 인증, TLS, 전송 단계의 모든 에러를 표현합니다.
//! `From<ShipperError> for LogshipError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use std::fmt;

use logship_core::error::{ConfigError, LogshipError, PipelineError};

/// 전송 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    /// 설정 에러 (TLS, 인증, 암호화 키 포함, 모두 시작 시점에 치명적)
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 배치 인코딩 실패
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// 페이로드 복호화 실패 (수신 측)
    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    /// 배치 전송 최종 실패
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// 인증 헤더 생성 실패 (토큰 엔드포인트 장애 등)
    #[error("auth error: {0}")]
    Auth(String),

    /// 소스 리더 에러
    #[error("source error: {source_name}: {reason}")]
    Source {
        /// 소스 이름
        source_name: String,
        /// 에러 사유
        reason: String,
    },

    /// 수집기 헬스 체크 실패
    #[error("collector unavailable: {0}")]
    Collector(String),

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShipperError {
    /// 설정 에러를 생성합니다.
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<ShipperError> for LogshipError {
    fn from(err: ShipperError) -> Self {
        match err {
            ShipperError::Config { field, reason } => {
                LogshipError::Config(ConfigError::InvalidValue { field, reason })
            }
            other => LogshipError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

/// 배치를 봉투로 인코딩하는 중 발생한 에러
///
/// 인코딩 실패는 해당 배치에만 영향을 주며, 배치는 카운트 후 드롭됩니다.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// 라인 직렬화 실패
    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),

    /// AEAD 봉인 실패
    #[error("failed to seal payload with key '{key_id}'")]
    Seal {
        /// 사용한 키 식별자
        key_id: String,
    },

    /// nonce 생성 실패
    #[error("system random source unavailable")]
    Random,
}

/// 봉투 복호화 실패
///
/// 복호화가 실패하면 절대 평문으로 대체하지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecryptionError {
    /// 본문이 nonce + 태그보다 짧음
    #[error("payload too short: {len} bytes")]
    Truncated {
        /// 받은 본문 길이
        len: usize,
    },

    /// 암호화 표시가 있으나 키를 갖고 있지 않음
    #[error("encrypted payload but no key is configured")]
    MissingKey,

    /// 헤더의 키 ID가 보유한 키와 다름
    #[error("unknown key id '{0}'")]
    UnknownKey(String),

    /// 태그 검증 실패 (잘못된 키 또는 변조)
    #[error("authentication tag mismatch")]
    Authentication,

    /// 복호화된 본문이 라인 배열이 아님
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// 전송 실패 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// 재시도해도 성공할 수 없는 응답 (4xx 등)
    Permanent,
    /// 재시도 횟수 소진
    Exhausted,
    /// 종료 유예 시간 초과로 포기
    Abandoned,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent => write!(f, "permanent failure"),
            Self::Exhausted => write!(f, "retries exhausted"),
            Self::Abandoned => write!(f, "abandoned on shutdown"),
        }
    }
}

/// 배치 전송 최종 실패
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("delivery failed after {attempts} attempt(s): {kind}{}", describe_last(.last_status, .last_error))]
pub struct DeliveryError {
    /// 실패 분류
    pub kind: DeliveryFailure,
    /// 마지막 응답 상태 코드
    pub last_status: Option<u16>,
    /// 마지막 네트워크 에러
    pub last_error: Option<String>,
    /// 수행한 시도 횟수
    pub attempts: u32,
}

impl DeliveryError {
    /// 재시도가 의미 없는 실패인지 확인합니다.
    pub fn is_permanent(&self) -> bool {
        self.kind == DeliveryFailure::Permanent
    }
}

fn describe_last(status: &Option<u16>, error: &Option<String>) -> String {
    match (status, error) {
        (Some(status), _) => format!(" (last status {status})"),
        (None, Some(error)) => format!(" (last error: {error})"),
        (None, None) => String::new(),
    }
}
