//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! `logship-shipper`의 텔레메트리 훅은 이 상수로 `metrics::counter!()`,
//! `metrics::gauge!()`, `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logship_`
//! - 단계명: `queue_`, `batcher_`, `codec_`, `sender_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 전송 시도 결과 레이블 키 (success, transient, permanent)
pub const LABEL_OUTCOME: &str = "outcome";

/// 최종 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 플러시 트리거 레이블 키 (size, timer, manual, shutdown)
pub const LABEL_TRIGGER: &str = "trigger";

// ─── Line Queue 메트릭 ─────────────────────────────────────────────

/// Queue: 소스에서 유입된 전체 라인 수 (counter)
pub const QUEUE_LINES_RECEIVED_TOTAL: &str = "logship_queue_lines_received_total";

/// Queue: 현재 큐에 대기 중인 라인 수 (gauge)
pub const QUEUE_DEPTH: &str = "logship_queue_depth";

// ─── Batcher 메트릭 ────────────────────────────────────────────────

/// Batcher: 플러시된 배치 수 (counter, label: trigger)
pub const BATCHER_FLUSHES_TOTAL: &str = "logship_batcher_flushes_total";

/// Batcher: 배치당 라인 수 (histogram)
pub const BATCHER_BATCH_LINES: &str = "logship_batcher_batch_lines";

/// Batcher: 인코딩 후 전송 바이트 수 (counter)
pub const BATCHER_BYTES_OUT_TOTAL: &str = "logship_batcher_bytes_out_total";

// ─── Codec 메트릭 ──────────────────────────────────────────────────

/// Codec: 인코딩 실패로 드롭된 배치 수 (counter)
pub const CODEC_ENCODING_FAILURES_TOTAL: &str = "logship_codec_encoding_failures_total";

// ─── Sender 메트릭 ─────────────────────────────────────────────────

/// Sender: 전송 시도 수 (counter, label: outcome)
pub const SENDER_ATTEMPTS_TOTAL: &str = "logship_sender_attempts_total";

/// Sender: 전송 시도 지연 시간 (histogram, 초)
pub const SENDER_ATTEMPT_DURATION_SECONDS: &str = "logship_sender_attempt_duration_seconds";

/// Sender: 최종 결과별 배치 수 (counter, label: result)
pub const SENDER_BATCHES_TOTAL: &str = "logship_sender_batches_total";

/// Sender: 배치당 시도 횟수 (histogram)
pub const SENDER_BATCH_ATTEMPTS: &str = "logship_sender_batch_attempts";

/// Sender: 전송 실패로 드롭된 배치 수 (counter)
pub const SENDER_BATCHES_DROPPED_TOTAL: &str = "logship_sender_batches_dropped_total";

// ─── Auth 메트릭 ───────────────────────────────────────────────────

/// Auth: OAuth2 토큰 갱신 횟수 (counter, label: result)
pub const AUTH_TOKEN_REFRESHES_TOTAL: &str = "logship_auth_token_refreshes_total";

// ─── Daemon 메트릭 ─────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logship_daemon_uptime_seconds";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 전송 시도 지연 시간 히스토그램 버킷 (초)
///
/// 1ms ~ 60s 범위, 네트워크 왕복 + 수집기 처리 포함
pub const ATTEMPT_DURATION_BUCKETS: [f64; 10] =
    [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `logship-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Line Queue
    describe_counter!(
        QUEUE_LINES_RECEIVED_TOTAL,
        "Total number of log lines accepted from all source readers"
    );
    describe_gauge!(QUEUE_DEPTH, "Current number of lines waiting in the line queue");

    // Batcher
    describe_counter!(
        BATCHER_FLUSHES_TOTAL,
        "Total number of batches flushed, by trigger"
    );
    describe_histogram!(BATCHER_BATCH_LINES, "Number of lines per flushed batch");
    describe_counter!(
        BATCHER_BYTES_OUT_TOTAL,
        "Total envelope body bytes handed to the sender"
    );

    // Codec
    describe_counter!(
        CODEC_ENCODING_FAILURES_TOTAL,
        "Total number of batches dropped because encoding or sealing failed"
    );

    // Sender
    describe_counter!(
        SENDER_ATTEMPTS_TOTAL,
        "Total number of HTTP delivery attempts, by outcome"
    );
    describe_histogram!(
        SENDER_ATTEMPT_DURATION_SECONDS,
        "Latency of a single HTTP delivery attempt in seconds"
    );
    describe_counter!(
        SENDER_BATCHES_TOTAL,
        "Total number of batches with a terminal delivery outcome, by result"
    );
    describe_histogram!(
        SENDER_BATCH_ATTEMPTS,
        "Number of attempts needed to reach a terminal outcome"
    );
    describe_counter!(
        SENDER_BATCHES_DROPPED_TOTAL,
        "Total number of batches dropped after delivery failure"
    );

    // Auth
    describe_counter!(
        AUTH_TOKEN_REFRESHES_TOTAL,
        "Total number of OAuth2 token requests, by result"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "logship daemon uptime in seconds");
}
