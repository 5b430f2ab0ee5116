//! 전송 파이프라인 설정
//!
//! [`ShipperConfig`]는 core의 [`LogshipConfig`](logship_core::config::LogshipConfig)
//! 섹션을 파이프라인 내부에서 사용하는 타입(`Duration`, `Url` 등)으로 변환합니다.
//!
//! # 사용 예시
//! ```ignore
//! use logship_core::config::LogshipConfig;
//! use logship_shipper::config::ShipperConfig;
//!
//! let core_config = LogshipConfig::default();
//! let config = ShipperConfig::from_core(&core_config);
//! config.validate()?;
//! ```

use std::time::Duration;

use logship_core::config::LogshipConfig;
use reqwest::Url;

use crate::error::ShipperError;
use crate::sender::RetryPolicy;

/// 전송 파이프라인 설정
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// 크기 기반 플러시 임계값 (`None`이면 시간 기반 플러시만 사용)
    pub batch_size: Option<usize>,
    /// 배치 플러시 간격
    pub flush_interval: Duration,
    /// 라인 큐 최대 용량
    pub queue_capacity: usize,
    /// 배처 → 전송 태스크 채널 용량
    pub batch_channel_capacity: usize,
    /// 수집기 엔드포인트 URL
    pub endpoint: String,
    /// 헬스 체크 경로
    pub health_path: String,
    /// 요청 타임아웃
    pub request_timeout: Duration,
    /// 재시도 정책
    pub retry: RetryPolicy,
    /// 종료 유예 시간
    pub shutdown_grace: Duration,
    /// follow 모드 파일 소스 폴링 주기
    pub source_poll_interval: Duration,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self::from_core(&LogshipConfig::default())
    }
}

impl ShipperConfig {
    /// core 설정에서 전송 파이프라인 설정을 생성합니다.
    ///
    /// `batch_size`가 0 이하이면 크기 기반 플러시가 비활성화됩니다.
    pub fn from_core(core: &LogshipConfig) -> Self {
        let batch_size = usize::try_from(core.batch.batch_size)
            .ok()
            .filter(|size| *size > 0);

        Self {
            batch_size,
            flush_interval: Duration::from_millis(core.batch.flush_interval_ms),
            queue_capacity: core.batch.queue_capacity,
            batch_channel_capacity: core.batch.batch_channel_capacity,
            endpoint: core.sender.endpoint.clone(),
            health_path: core.sender.health_path.clone(),
            request_timeout: Duration::from_secs(core.sender.request_timeout_secs),
            retry: RetryPolicy {
                max_retries: core.sender.max_retries,
                base_interval: Duration::from_millis(core.sender.base_interval_ms),
                max_interval: Duration::from_millis(core.sender.max_interval_ms),
            },
            shutdown_grace: Duration::from_secs(core.sender.shutdown_grace_secs),
            source_poll_interval: Duration::from_millis(core.sources.poll_interval_ms),
        }
    }

    /// 엔드포인트를 URL로 파싱합니다.
    pub fn endpoint_url(&self) -> Result<Url, ShipperError> {
        let url = Url::parse(&self.endpoint)
            .map_err(|e| ShipperError::config("sender.endpoint", e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ShipperError::config(
                "sender.endpoint",
                format!("unsupported scheme '{other}', expected http or https"),
            )),
        }
    }

    /// 헬스 체크 URL (엔드포인트와 같은 origin)
    pub fn health_url(&self) -> Result<Url, ShipperError> {
        let endpoint = self.endpoint_url()?;
        endpoint
            .join(&self.health_path)
            .map_err(|e| ShipperError::config("sender.health_path", e.to_string()))
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ShipperError> {
        const MAX_BATCH_SIZE: usize = 100_000;

        if let Some(size) = self.batch_size
            && size > MAX_BATCH_SIZE
        {
            return Err(ShipperError::config(
                "batch.batch_size",
                format!("must be at most {MAX_BATCH_SIZE}"),
            ));
        }

        if self.flush_interval.is_zero() {
            return Err(ShipperError::config(
                "batch.flush_interval_ms",
                "must be greater than 0",
            ));
        }

        if self.queue_capacity == 0 {
            return Err(ShipperError::config(
                "batch.queue_capacity",
                "must be greater than 0",
            ));
        }

        if self.batch_channel_capacity == 0 {
            return Err(ShipperError::config(
                "batch.batch_channel_capacity",
                "must be greater than 0",
            ));
        }

        self.health_url()?;

        if self.request_timeout.is_zero() {
            return Err(ShipperError::config(
                "sender.request_timeout_secs",
                "must be greater than 0",
            ));
        }

        self.retry.validate()?;

        if self.source_poll_interval.is_zero() {
            return Err(ShipperError::config(
                "sources.poll_interval_ms",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// 전송 파이프라인 설정 빌더
#[derive(Default)]
pub struct ShipperConfigBuilder {
    config: ShipperConfig,
}

impl ShipperConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 크기 기반 플러시 임계값을 설정합니다 (`None`이면 비활성화).
    pub fn batch_size(mut self, size: Option<usize>) -> Self {
        self.config.batch_size = size.filter(|s| *s > 0);
        self
    }

    /// 플러시 간격을 설정합니다.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    /// 라인 큐 용량을 설정합니다.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// 배치 채널 용량을 설정합니다.
    pub fn batch_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.batch_channel_capacity = capacity;
        self
    }

    /// 수집기 엔드포인트를 설정합니다.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// 요청 타임아웃을 설정합니다.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// 재시도 정책을 설정합니다.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// 종료 유예 시간을 설정합니다.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// 설정을 검증하고 `ShipperConfig`를 생성합니다.
    pub fn build(self) -> Result<ShipperConfig, ShipperError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
