//! 텔레메트리 훅 -- 배처 플러시와 전송 시도 지점의 관측 인터페이스
//!
//! 파이프라인은 전역 레지스트리 대신 명시적으로 생성된 `Arc<dyn TelemetryHooks>`
//! 핸들을 받아 호출합니다. 모든 메서드는 기본적으로 no-op 입니다.
//!
//! - [`MetricsTelemetry`]: `metrics` 파사드로 기록 (daemon이 Prometheus 레코더 설치)
//! - [`NoopTelemetry`]: 임베딩/테스트용

use std::fmt;
use std::time::Duration;

use logship_core::metrics as m;

/// 배치가 `ready`로 전이된 원인
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// 라인 수가 `batch_size`에 도달
    Size,
    /// 플러시 데드라인 만료
    Timer,
    /// `flush_now` 요청
    Manual,
    /// 종료 시 drain
    Shutdown,
}

impl FlushTrigger {
    /// 메트릭 레이블 값
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Timer => "timer",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 단일 전송 시도의 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 2xx 응답
    Success,
    /// 네트워크 에러, 타임아웃, 5xx, 408, 429 (재시도 대상)
    Transient,
    /// 그 외 응답 (즉시 실패)
    Permanent,
}

impl AttemptOutcome {
    /// 메트릭 레이블 값
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 파이프라인 관측 훅
pub trait TelemetryHooks: Send + Sync {
    /// 배처가 배치를 분리했을 때 호출됩니다.
    fn on_batch_ready(&self, _trigger: FlushTrigger, _lines: usize) {}

    /// 배치가 봉투로 인코딩되어 전송으로 넘어갈 때 호출됩니다.
    fn on_flush(&self, _batch_size: usize, _bytes_out: usize) {}

    /// 각 전송 시도 후 호출됩니다 (`attempt`는 1부터 시작).
    fn on_send_attempt(&self, _attempt: u32, _outcome: AttemptOutcome, _latency: Duration) {}

    /// 배치 전송이 최종 결과에 도달했을 때 호출됩니다.
    fn on_send_final(&self, _success: bool, _attempts: u32) {}

    /// 인코딩 실패로 배치가 드롭되었을 때 호출됩니다.
    fn on_encoding_failure(&self) {}

    /// 전송 실패로 배치가 드롭되었을 때 호출됩니다.
    fn on_batch_dropped(&self) {}
}

/// 아무것도 기록하지 않는 훅
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetryHooks for NoopTelemetry {}

/// `metrics` 파사드로 기록하는 훅
///
/// 레코더가 설치되지 않았으면 기록은 버려집니다.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsTelemetry;

impl TelemetryHooks for MetricsTelemetry {
    fn on_batch_ready(&self, trigger: FlushTrigger, lines: usize) {
        metrics::counter!(m::BATCHER_FLUSHES_TOTAL, m::LABEL_TRIGGER => trigger.as_str())
            .increment(1);
        metrics::histogram!(m::BATCHER_BATCH_LINES).record(lines as f64);
    }

    fn on_flush(&self, _batch_size: usize, bytes_out: usize) {
        metrics::counter!(m::BATCHER_BYTES_OUT_TOTAL).increment(bytes_out as u64);
    }

    fn on_send_attempt(&self, _attempt: u32, outcome: AttemptOutcome, latency: Duration) {
        metrics::counter!(m::SENDER_ATTEMPTS_TOTAL, m::LABEL_OUTCOME => outcome.as_str())
            .increment(1);
        metrics::histogram!(m::SENDER_ATTEMPT_DURATION_SECONDS).record(latency.as_secs_f64());
    }

    fn on_send_final(&self, success: bool, attempts: u32) {
        let result = if success { "success" } else { "failure" };
        metrics::counter!(m::SENDER_BATCHES_TOTAL, m::LABEL_RESULT => result).increment(1);
        metrics::histogram!(m::SENDER_BATCH_ATTEMPTS).record(f64::from(attempts));
    }

    fn on_encoding_failure(&self) {
        metrics::counter!(m::CODEC_ENCODING_FAILURES_TOTAL).increment(1);
    }

    fn on_batch_dropped(&self) {
        metrics::counter!(m::SENDER_BATCHES_DROPPED_TOTAL).increment(1);
    }
}
