//! 설정 관리 -- logship.toml 파싱 및 런타임 설정
//!
//! [`LogshipConfig`]는 에이전트의 모든 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LOGSHIP_SENDER_ENDPOINT=https://...` 형식)
//! 3. 설정 파일 (`logship.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logship_core::error::LogshipError> {
//! use logship_core::config::LogshipConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LogshipConfig::load("logship.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LogshipConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogshipError};

/// 지원하는 인증 방식
pub const AUTH_METHODS: &[&str] = &[
    "none",
    "basic",
    "bearer-token",
    "oauth2-client-credentials",
    "custom-header",
];

/// 지원하는 AEAD 알고리즘
pub const ENCRYPTION_ALGORITHMS: &[&str] = &["aes-gcm", "chacha20-poly1305"];

/// logship 통합 설정
///
/// `logship.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogshipConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 배치 설정
    #[serde(default)]
    pub batch: BatchConfig,
    /// HTTP 전송 설정
    #[serde(default)]
    pub sender: SenderConfig,
    /// TLS 설정
    #[serde(default)]
    pub tls: TlsConfig,
    /// 인증 설정
    #[serde(default)]
    pub auth: AuthConfig,
    /// 페이로드 암호화 설정
    #[serde(default)]
    pub encryption: EncryptionConfig,
    /// 소스 리더 설정
    #[serde(default)]
    pub sources: SourcesConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl LogshipConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogshipError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogshipError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogshipError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogshipError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LogshipError> {
        toml::from_str(toml_str).map_err(|e| {
            LogshipError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGSHIP_{SECTION}_{FIELD}`
    /// 예: `LOGSHIP_AUTH_PASSWORD=...`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LOGSHIP_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGSHIP_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "LOGSHIP_GENERAL_PID_FILE");

        // Batch
        override_i64(&mut self.batch.batch_size, "LOGSHIP_BATCH_BATCH_SIZE");
        override_u64(
            &mut self.batch.flush_interval_ms,
            "LOGSHIP_BATCH_FLUSH_INTERVAL_MS",
        );
        override_usize(
            &mut self.batch.queue_capacity,
            "LOGSHIP_BATCH_QUEUE_CAPACITY",
        );

        // Sender
        override_string(&mut self.sender.endpoint, "LOGSHIP_SENDER_ENDPOINT");
        override_u32(&mut self.sender.max_retries, "LOGSHIP_SENDER_MAX_RETRIES");
        override_u64(
            &mut self.sender.base_interval_ms,
            "LOGSHIP_SENDER_BASE_INTERVAL_MS",
        );
        override_u64(
            &mut self.sender.shutdown_grace_secs,
            "LOGSHIP_SENDER_SHUTDOWN_GRACE_SECS",
        );

        // TLS
        override_bool(&mut self.tls.enabled, "LOGSHIP_TLS_ENABLED");
        override_opt_string(&mut self.tls.ca_file, "LOGSHIP_TLS_CA_FILE");
        override_opt_string(&mut self.tls.cert_file, "LOGSHIP_TLS_CERT_FILE");
        override_opt_string(&mut self.tls.key_file, "LOGSHIP_TLS_KEY_FILE");
        override_opt_string(&mut self.tls.server_name, "LOGSHIP_TLS_SERVER_NAME");

        // Auth (시크릿은 파일보다 환경변수로 주입하는 것을 권장)
        override_string(&mut self.auth.method, "LOGSHIP_AUTH_METHOD");
        override_opt_string(&mut self.auth.username, "LOGSHIP_AUTH_USERNAME");
        override_opt_string(&mut self.auth.password, "LOGSHIP_AUTH_PASSWORD");
        override_opt_string(&mut self.auth.token_file, "LOGSHIP_AUTH_TOKEN_FILE");
        override_opt_string(&mut self.auth.client_id, "LOGSHIP_AUTH_CLIENT_ID");
        override_opt_string(&mut self.auth.client_secret, "LOGSHIP_AUTH_CLIENT_SECRET");
        override_opt_string(&mut self.auth.token_url, "LOGSHIP_AUTH_TOKEN_URL");

        // Encryption
        override_bool(&mut self.encryption.enabled, "LOGSHIP_ENCRYPTION_ENABLED");
        override_string(&mut self.encryption.key_id, "LOGSHIP_ENCRYPTION_KEY_ID");
        override_opt_string(&mut self.encryption.key_file, "LOGSHIP_ENCRYPTION_KEY_FILE");
        override_string(
            &mut self.encryption.algorithm,
            "LOGSHIP_ENCRYPTION_ALGORITHM",
        );

        // Sources
        override_csv(&mut self.sources.files, "LOGSHIP_SOURCES_FILES");
        override_bool(&mut self.sources.follow, "LOGSHIP_SOURCES_FOLLOW");

        // Metrics
        override_bool(&mut self.metrics.enabled, "LOGSHIP_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "LOGSHIP_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "LOGSHIP_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 문자열 선택지와 섹션 간 필수 조합만 확인합니다. TLS 버전 토큰,
    /// 인증서/키 파일 내용, 배치/재시도 수치는 `logship-shipper`가
    /// 컴포넌트 생성 시점에 검증합니다.
    pub fn validate(&self) -> Result<(), LogshipError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.sender.endpoint.trim().is_empty() {
            return Err(invalid("sender.endpoint", "must not be empty".to_owned()));
        }

        if !AUTH_METHODS.contains(&self.auth.method.as_str()) {
            return Err(invalid(
                "auth.method",
                format!(
                    "unknown method '{}', must be one of: {}",
                    self.auth.method,
                    AUTH_METHODS.join(", ")
                ),
            ));
        }

        if self.encryption.enabled {
            if !ENCRYPTION_ALGORITHMS.contains(&self.encryption.algorithm.as_str()) {
                return Err(invalid(
                    "encryption.algorithm",
                    format!("must be one of: {}", ENCRYPTION_ALGORITHMS.join(", ")),
                ));
            }
            if self.encryption.key_id.is_empty() {
                return Err(invalid(
                    "encryption.key_id",
                    "key id must not be empty when encryption is enabled".to_owned(),
                ));
            }
            if self.encryption.key_file.is_none() {
                return Err(invalid(
                    "encryption.key_file",
                    "key file is required when encryption is enabled".to_owned(),
                ));
            }
        }

        if self.metrics.enabled && self.metrics.endpoint != "/metrics" {
            return Err(invalid(
                "metrics.endpoint",
                "only '/metrics' is supported".to_owned(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> LogshipError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 사용 안 함)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// 배치 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// 배치 크기 (0 이하이면 크기 기반 플러시 비활성화)
    pub batch_size: i64,
    /// 배치 플러시 간격 (밀리초, 0보다 커야 함)
    pub flush_interval_ms: u64,
    /// 라인 큐 최대 용량
    pub queue_capacity: usize,
    /// 플러시된 배치 전달 채널 용량
    pub batch_channel_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_ms: 5_000,
            queue_capacity: 10_000,
            batch_channel_capacity: 16,
        }
    }
}

/// HTTP 전송 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// 수집기 엔드포인트 (`POST /logs` 대상)
    pub endpoint: String,
    /// 수집기 헬스 체크 경로
    pub health_path: String,
    /// 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// 최대 재시도 횟수 (총 시도 = max_retries + 1)
    pub max_retries: u32,
    /// 첫 재시도 대기 시간 (밀리초)
    pub base_interval_ms: u64,
    /// 재시도 대기 시간 상한 (밀리초)
    pub max_interval_ms: u64,
    /// 종료 시 진행 중인 전송을 기다리는 유예 시간 (초)
    pub shutdown_grace_secs: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/logs".to_owned(),
            health_path: "/health".to_owned(),
            request_timeout_secs: 30,
            max_retries: 3,
            base_interval_ms: 500,
            max_interval_ms: 30_000,
            shutdown_grace_secs: 10,
        }
    }
}

/// TLS 설정
///
/// 잘못된 TLS 설정은 모두 시작 시점에 치명적입니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 클라이언트 인증서 경로 (mTLS)
    pub cert_file: Option<String>,
    /// 클라이언트 개인키 경로 (mTLS)
    pub key_file: Option<String>,
    /// CA 번들 경로 (없으면 시스템 루트 인증서 사용)
    pub ca_file: Option<String>,
    /// 인증서 검증에 사용할 서버 이름
    pub server_name: Option<String>,
    /// 서버 인증서 검증 생략 (테스트 전용)
    pub insecure_skip_verify: bool,
    /// 최소 프로토콜 버전 (tls10, tls11, tls12, tls13)
    pub min_version: Option<String>,
    /// 최대 프로토콜 버전 (tls10, tls11, tls12, tls13)
    pub max_version: Option<String>,
}

/// 인증 설정
///
/// `method`에 따라 필요한 필드만 사용됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// 인증 방식 (none, basic, bearer-token, oauth2-client-credentials, custom-header)
    pub method: String,
    /// basic: 사용자 이름
    pub username: Option<String>,
    /// basic: 비밀번호
    pub password: Option<String>,
    /// bearer-token: 토큰 파일 경로
    pub token_file: Option<String>,
    /// oauth2: 클라이언트 ID
    pub client_id: Option<String>,
    /// oauth2: 클라이언트 시크릿
    pub client_secret: Option<String>,
    /// oauth2: 토큰 엔드포인트
    pub token_url: Option<String>,
    /// oauth2: 요청 스코프
    pub scopes: Vec<String>,
    /// custom-header: 고정 헤더 목록
    pub headers: BTreeMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: "none".to_owned(),
            username: None,
            password: None,
            token_file: None,
            client_id: None,
            client_secret: None,
            token_url: None,
            scopes: Vec::new(),
            headers: BTreeMap::new(),
        }
    }
}

/// 페이로드 암호화 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 키 식별자 (`X-Key-ID` 헤더 및 AAD로 사용)
    pub key_id: String,
    /// 키 파일 경로 (64자리 hex = 32바이트)
    pub key_file: Option<String>,
    /// AEAD 알고리즘 (aes-gcm, chacha20-poly1305)
    pub algorithm: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_id: String::new(),
            key_file: None,
            algorithm: "aes-gcm".to_owned(),
        }
    }
}

/// 소스 리더 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// 읽을 파일 경로 목록
    pub files: Vec<String>,
    /// EOF 이후 추가되는 라인을 계속 읽을지 여부
    pub follow: bool,
    /// follow 모드 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            follow: true,
            poll_interval_ms: 500,
        }
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 스크랩 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9464,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_opt_string(target: &mut Option<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = if val.is_empty() { None } else { Some(val) };
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_i64(target: &mut i64, env_key: &str) {
    override_parsed(target, env_key, "i64");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
