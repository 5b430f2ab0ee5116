//! 파이프라인 오케스트레이션 -- 소스/큐/배처/코덱/전송의 전체 흐름을 관리합니다.
//!
//! [`ShipperPipeline`]은 core의 [`Pipeline`](logship_core::pipeline::Pipeline) trait을 구현하여
//! `logship-daemon`에서 시작/정지/헬스 체크 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! LineSource* -> LineQueue -> Batcher -> mpsc<Batch> -> encode -> HttpSender -> collector
//! ```
//!
//! 전송 태스크는 한 번에 하나의 배치만 전송하므로 배치는 생성 순서대로 전달됩니다.
//! 재시도 중인 배치는 뒤의 배치를 막습니다 (head-of-line blocking).
//!
//! # 정지 순서
//! 1. 소스 리더 취소 후 종료 대기
//! 2. 배처 취소 (큐 drain 후 남은 배치 플러시)
//! 3. 전송 태스크 유예 시간 시작. 유예 시간이 지나면 진행 중인 전송과 남은 배치는
//!    `DeliveryFailure::Abandoned`로 보고됩니다.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use logship_core::config::{AuthConfig, EncryptionConfig, LogshipConfig, TlsConfig};
use logship_core::error::{LogshipError, PipelineError};
use logship_core::pipeline::{HealthStatus, Pipeline};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::AuthProvider;
use crate::batcher::{Batch, Batcher};
use crate::codec::{self, EncryptionKey};
use crate::config::ShipperConfig;
use crate::error::{DeliveryError, DeliveryFailure, ShipperError};
use crate::queue::{LineReceiver, LineSender, QueueGauge, line_queue};
use crate::sender::HttpSender;
use crate::source::{LineSource, run_source};
use crate::telemetry::{MetricsTelemetry, TelemetryHooks};

/// 파이프라인 실행 상태
#[derive(Debug, Clone, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨 (재시작 불가)
    Stopped,
}

/// 전송 통계 (전송 태스크가 갱신)
#[derive(Debug, Default)]
pub struct DeliveryStats {
    batches_flushed: AtomicU64,
    batches_delivered: AtomicU64,
    batches_dropped: AtomicU64,
    lines_delivered: AtomicU64,
    last_failed: AtomicBool,
}

impl DeliveryStats {
    /// 현재 값을 읽습니다.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            lines_delivered: self.lines_delivered.load(Ordering::Relaxed),
        }
    }

    /// 마지막 배치 전송이 실패했는지 확인합니다.
    pub fn last_failed(&self) -> bool {
        self.last_failed.load(Ordering::Relaxed)
    }

    fn record_delivered(&self, lines: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.lines_delivered
            .fetch_add(lines as u64, Ordering::Relaxed);
        self.last_failed.store(false, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
        self.last_failed.store(true, Ordering::Relaxed);
    }
}

/// 전송 통계 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// 배처가 넘긴 배치 수
    pub batches_flushed: u64,
    /// 전송 성공한 배치 수
    pub batches_delivered: u64,
    /// 인코딩/전송 실패로 드롭된 배치 수
    pub batches_dropped: u64,
    /// 전송 성공한 라인 수
    pub lines_delivered: u64,
}

/// 로그 전송 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use logship_shipper::{ShipperPipeline, ShipperPipelineBuilder};
///
/// let mut pipeline = ShipperPipelineBuilder::from_core(&core_config).build()?;
/// pipeline.add_source(Box::new(FileSource::new("/var/log/app.log", true, poll)));
/// pipeline.start().await?;
/// ```
pub struct ShipperPipeline {
    config: ShipperConfig,
    state: PipelineState,
    line_tx: Option<LineSender>,
    line_rx: Option<LineReceiver>,
    queue_gauge: QueueGauge,
    key: Option<Arc<EncryptionKey>>,
    sender: Arc<HttpSender>,
    telemetry: Arc<dyn TelemetryHooks>,
    flush_now: Arc<Notify>,
    stats: Arc<DeliveryStats>,
    pending_sources: Vec<Box<dyn LineSource>>,
    source_cancel: CancellationToken,
    batcher_cancel: CancellationToken,
    sender_cancel: CancellationToken,
    source_tasks: Vec<JoinHandle<u64>>,
    batcher_task: Option<JoinHandle<Result<(), ShipperError>>>,
    delivery_task: Option<JoinHandle<()>>,
}

impl ShipperPipeline {
    /// 현재 상태 이름
    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    /// 외부 생산자용 라인 큐 송신측. 정지 후에는 `None`.
    pub fn line_sender(&self) -> Option<LineSender> {
        self.line_tx.clone()
    }

    /// 소스 리더를 추가합니다. 실행 중이면 즉시 구동합니다.
    pub fn add_source(&mut self, source: Box<dyn LineSource>) {
        match (&self.state, &self.line_tx) {
            (PipelineState::Running, Some(tx)) => {
                let handle = self.spawn_source(source, tx.clone());
                self.source_tasks.push(handle);
            }
            (PipelineState::Initialized, _) => self.pending_sources.push(source),
            _ => warn!(source = source.name(), "pipeline stopped, ignoring source"),
        }
    }

    /// 현재 모으고 있는 배치를 즉시 플러시하도록 요청합니다.
    pub fn flush_now(&self) {
        self.flush_now.notify_one();
    }

    /// 전송 통계
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 라인 큐 사용률 (0.0 ~ 1.0)
    pub fn queue_utilization(&self) -> f64 {
        self.queue_gauge.utilization()
    }

    /// 수집기 헬스 엔드포인트를 확인합니다.
    pub async fn check_collector(&self) -> Result<(), ShipperError> {
        self.sender.health_check().await
    }

    fn spawn_source(&self, source: Box<dyn LineSource>, tx: LineSender) -> JoinHandle<u64> {
        tokio::spawn(run_source(
            source,
            tx,
            self.source_cancel.clone(),
            self.config.source_poll_interval,
        ))
    }
}

impl Pipeline for ShipperPipeline {
    async fn start(&mut self) -> Result<(), LogshipError> {
        match self.state {
            PipelineState::Running => return Err(PipelineError::AlreadyRunning.into()),
            PipelineState::Stopped => {
                return Err(PipelineError::InitFailed(
                    "a stopped pipeline cannot be restarted".to_owned(),
                )
                .into());
            }
            PipelineState::Initialized => {}
        }

        let (Some(line_rx), Some(line_tx)) = (self.line_rx.take(), self.line_tx.clone()) else {
            return Err(PipelineError::InitFailed("line queue already consumed".to_owned()).into());
        };

        info!(endpoint = %self.sender.endpoint(), "starting shipper pipeline");

        // 1. 배처 -> 전송 채널
        let (batch_tx, batch_rx) = mpsc::channel(self.config.batch_channel_capacity);

        // 2. 전송 태스크
        self.delivery_task = Some(tokio::spawn(deliver_batches(
            batch_rx,
            Arc::clone(&self.sender),
            self.key.clone(),
            Arc::clone(&self.telemetry),
            Arc::clone(&self.stats),
            GracePeriod::new(self.sender_cancel.clone(), self.config.shutdown_grace),
        )));

        // 3. 배처 태스크
        let batcher = Batcher::new(self.config.batch_size, self.config.flush_interval);
        self.batcher_task = Some(tokio::spawn(batcher.run(
            line_rx,
            batch_tx,
            Arc::clone(&self.flush_now),
            self.batcher_cancel.clone(),
            Arc::clone(&self.telemetry),
        )));

        // 4. 소스 리더 태스크
        for source in std::mem::take(&mut self.pending_sources) {
            let handle = self.spawn_source(source, line_tx.clone());
            self.source_tasks.push(handle);
        }

        self.state = PipelineState::Running;
        info!(sources = self.source_tasks.len(), "shipper pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LogshipError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping shipper pipeline");

        // 1. 소스 리더
        self.source_cancel.cancel();
        for task in self.source_tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "source task panicked");
            }
        }
        self.line_tx = None;

        // 2. 배처 drain, 3. 전송 유예 시작
        self.batcher_cancel.cancel();
        self.sender_cancel.cancel();
        if let Some(task) = self.batcher_task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "batcher stopped with error"),
                Err(e) => warn!(error = %e, "batcher task panicked"),
            }
        }
        if let Some(task) = self.delivery_task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "delivery task panicked");
        }

        self.state = PipelineState::Stopped;
        let stats = self.stats.snapshot();
        info!(
            delivered = stats.batches_delivered,
            dropped = stats.batches_dropped,
            "shipper pipeline stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                let utilization = self.queue_gauge.utilization();
                if utilization > 0.9 {
                    HealthStatus::Degraded(format!(
                        "line queue utilization high: {:.1}%",
                        utilization * 100.0
                    ))
                } else if self.stats.last_failed() {
                    HealthStatus::Degraded("last batch delivery failed".to_owned())
                } else {
                    HealthStatus::Healthy
                }
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 종료 유예 타이머
///
/// `cancel`이 취소되면 타이머가 시작되고 `period` 뒤에 만료됩니다.
/// `expired()` future가 중간에 drop 되어도 타이머 상태는 유지됩니다.
struct GracePeriod {
    cancel: CancellationToken,
    period: Duration,
    deadline: Option<Pin<Box<Sleep>>>,
    expired: bool,
}

impl GracePeriod {
    fn new(cancel: CancellationToken, period: Duration) -> Self {
        Self {
            cancel,
            period,
            deadline: None,
            expired: false,
        }
    }

    fn is_expired(&self) -> bool {
        self.expired
    }

    async fn expired(&mut self) {
        loop {
            if self.expired {
                return;
            }
            match self.deadline.as_mut() {
                None => {
                    self.cancel.cancelled().await;
                    debug!(grace_ms = self.period.as_millis() as u64, "shutdown grace period started");
                    self.deadline = Some(Box::pin(tokio::time::sleep(self.period)));
                }
                Some(deadline) => {
                    deadline.as_mut().await;
                    self.expired = true;
                }
            }
        }
    }
}

async fn deliver_batches(
    mut batches: mpsc::Receiver<Batch>,
    sender: Arc<HttpSender>,
    key: Option<Arc<EncryptionKey>>,
    telemetry: Arc<dyn TelemetryHooks>,
    stats: Arc<DeliveryStats>,
    mut grace: GracePeriod,
) {
    debug!("delivery task started");

    while let Some(batch) = batches.recv().await {
        stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
        let batch_id = batch.id();
        let lines = batch.len();

        if grace.is_expired() {
            report_abandoned(&batch, 0, telemetry.as_ref(), &stats);
            continue;
        }

        let envelope = match codec::encode(&batch, key.as_deref()) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(%batch_id, lines, error = %e, "failed to encode batch, dropping");
                telemetry.on_encoding_failure();
                stats.record_dropped();
                continue;
            }
        };
        telemetry.on_flush(lines, envelope.body.len());

        let progress = AtomicU32::new(0);
        let result = tokio::select! {
            biased;
            result = sender.send_tracked(&envelope, &progress) => Some(result),
            _ = grace.expired() => None,
        };

        match result {
            Some(Ok(report)) => {
                debug!(%batch_id, lines, attempts = report.attempts, status = report.status, "batch delivered");
                stats.record_delivered(lines);
            }
            Some(Err(e)) => {
                error!(%batch_id, lines, error = %e, "batch delivery failed, dropping");
                telemetry.on_batch_dropped();
                stats.record_dropped();
            }
            None => report_abandoned(
                &batch,
                progress.load(Ordering::Relaxed),
                telemetry.as_ref(),
                &stats,
            ),
        }
    }

    debug!("delivery task stopped");
}

fn report_abandoned(
    batch: &Batch,
    attempts: u32,
    telemetry: &dyn TelemetryHooks,
    stats: &DeliveryStats,
) {
    let err = DeliveryError {
        kind: DeliveryFailure::Abandoned,
        last_status: None,
        last_error: Some("shutdown grace period elapsed".to_owned()),
        attempts,
    };
    error!(batch_id = %batch.id(), lines = batch.len(), error = %err, "batch abandoned");
    telemetry.on_send_final(false, attempts);
    telemetry.on_batch_dropped();
    stats.record_dropped();
}

/// 전송 파이프라인 빌더
///
/// TLS, 인증, 암호화 설정을 읽어 컴포넌트를 생성합니다. 잘못된 설정은 모두 `build()`에서 실패합니다.
pub struct ShipperPipelineBuilder {
    config: ShipperConfig,
    tls: TlsConfig,
    auth: AuthConfig,
    encryption: EncryptionConfig,
    key: Option<EncryptionKey>,
    telemetry: Arc<dyn TelemetryHooks>,
    sources: Vec<Box<dyn LineSource>>,
}

impl ShipperPipelineBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: ShipperConfig::default(),
            tls: TlsConfig::default(),
            auth: AuthConfig::default(),
            encryption: EncryptionConfig::default(),
            key: None,
            telemetry: Arc::new(MetricsTelemetry),
            sources: Vec::new(),
        }
    }

    /// core 설정의 모든 관련 섹션으로 빌더를 생성합니다.
    pub fn from_core(core: &LogshipConfig) -> Self {
        Self {
            config: ShipperConfig::from_core(core),
            tls: core.tls.clone(),
            auth: core.auth.clone(),
            encryption: core.encryption.clone(),
            ..Self::new()
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: ShipperConfig) -> Self {
        self.config = config;
        self
    }

    /// TLS 설정을 지정합니다.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// 인증 설정을 지정합니다.
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// 암호화 설정을 지정합니다 (키 파일에서 로드).
    pub fn encryption(mut self, encryption: EncryptionConfig) -> Self {
        self.encryption = encryption;
        self
    }

    /// 이미 로드된 암호화 키를 지정합니다. 암호화 설정보다 우선합니다.
    pub fn encryption_key(mut self, key: EncryptionKey) -> Self {
        self.key = Some(key);
        self
    }

    /// 텔레메트리 훅을 지정합니다 (기본값: [`MetricsTelemetry`]).
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetryHooks>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// 시작 시 구동할 소스 리더를 추가합니다.
    pub fn source(mut self, source: Box<dyn LineSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// 파이프라인을 생성합니다.
    pub fn build(self) -> Result<ShipperPipeline, ShipperError> {
        self.config.validate()?;

        let transport = crate::tls::TlsTransport::from_config(&self.tls)?;
        let client = transport
            .client_builder(self.config.request_timeout)
            .build()
            .map_err(|e| ShipperError::config("tls", format!("failed to build http client: {e}")))?;

        let auth = Arc::new(AuthProvider::from_config(&self.auth, &client)?);
        let key = match self.key {
            Some(key) => Some(key),
            None => EncryptionKey::from_config(&self.encryption)?,
        };
        let sender = HttpSender::new(client, &self.config, auth, Arc::clone(&self.telemetry))?;

        let (line_tx, line_rx) = line_queue(self.config.queue_capacity);
        let queue_gauge = line_rx.gauge();

        Ok(ShipperPipeline {
            config: self.config,
            state: PipelineState::Initialized,
            line_tx: Some(line_tx),
            line_rx: Some(line_rx),
            queue_gauge,
            key: key.map(Arc::new),
            sender: Arc::new(sender),
            telemetry: self.telemetry,
            flush_now: Arc::new(Notify::new()),
            stats: Arc::new(DeliveryStats::default()),
            pending_sources: self.sources,
            source_cancel: CancellationToken::new(),
            batcher_cancel: CancellationToken::new(),
            sender_cancel: CancellationToken::new(),
            source_tasks: Vec::new(),
            batcher_task: None,
            delivery_task: None,
        })
    }
}

impl Default for ShipperPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShipperConfigBuilder;
    use crate::sender::RetryPolicy;
    use crate::telemetry::NoopTelemetry;
    use crate::telemetry::testing::RecordingTelemetry;
    use logship_core::types::LogLine;

    fn config(endpoint: &str) -> ShipperConfig {
        ShipperConfigBuilder::new()
            .endpoint(endpoint)
            .batch_size(Some(2))
            .flush_interval(Duration::from_millis(50))
            .queue_capacity(10)
            .retry(RetryPolicy {
                max_retries: 0,
                base_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(1),
            })
            .shutdown_grace(Duration::from_millis(200))
            .build()
            .unwrap()
    }

    fn pipeline(endpoint: &str) -> ShipperPipeline {
        ShipperPipelineBuilder::new()
            .config(config(endpoint))
            .telemetry(Arc::new(NoopTelemetry))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_creates_pipeline() {
        let pipeline = pipeline("http://127.0.0.1:9/logs");
        assert_eq!(pipeline.state_name(), "initialized");
        assert!(pipeline.line_sender().is_some());
        assert_eq!(pipeline.stats(), StatsSnapshot::default());
    }

    #[test]
    fn builder_with_invalid_auth_fails() {
        let err = ShipperPipelineBuilder::new()
            .config(config("http://127.0.0.1:9/logs"))
            .auth(AuthConfig {
                method: "magic".to_owned(),
                ..AuthConfig::default()
            })
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ShipperError::Config { .. }));
    }

    #[test]
    fn builder_with_invalid_tls_fails() {
        let err = ShipperPipelineBuilder::new()
            .config(config("https://127.0.0.1:9/logs"))
            .tls(TlsConfig {
                enabled: true,
                ca_file: Some("/nonexistent/ca.pem".to_owned()),
                ..TlsConfig::default()
            })
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("tls.ca_file"));
    }

    #[tokio::test]
    async fn lifecycle_and_health() {
        let mut pipeline = pipeline("http://127.0.0.1:9/logs");
        assert!(pipeline.health_check().await.is_unhealthy());

        pipeline.start().await.unwrap();
        assert_eq!(pipeline.state_name(), "running");
        assert!(pipeline.health_check().await.is_healthy());
        assert!(matches!(
            pipeline.start().await,
            Err(LogshipError::Pipeline(PipelineError::AlreadyRunning))
        ));

        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state_name(), "stopped");
        assert!(pipeline.line_sender().is_none());
        assert!(pipeline.health_check().await.is_unhealthy());
        assert!(pipeline.start().await.is_err());
        assert!(matches!(
            pipeline.stop().await,
            Err(LogshipError::Pipeline(PipelineError::NotRunning))
        ));
    }

    #[tokio::test]
    async fn delivers_batches_in_order() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/logs")
            .match_body(r#"["a","b"]"#)
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/logs")
            .match_body(r#"["c"]"#)
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let mut pipeline = pipeline(&format!("{}/logs", server.url()));
        pipeline.start().await.unwrap();
        let tx = pipeline.line_sender().unwrap();
        for text in ["a", "b", "c"] {
            tx.put(LogLine::new(text)).await.unwrap();
        }
        drop(tx);
        pipeline.stop().await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        let stats = pipeline.stats();
        assert_eq!(stats.batches_delivered, 2);
        assert_eq!(stats.lines_delivered, 3);
    }

    #[tokio::test]
    async fn failed_delivery_degrades_health_but_pipeline_continues() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/logs")
            .match_body(r#"["bad","bad"]"#)
            .with_status(400)
            .create_async()
            .await;
        let good = server
            .mock("POST", "/logs")
            .match_body(r#"["good","good"]"#)
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let mut pipeline = pipeline(&format!("{}/logs", server.url()));
        pipeline.start().await.unwrap();
        let tx = pipeline.line_sender().unwrap();
        tx.put(LogLine::new("bad")).await.unwrap();
        tx.put(LogLine::new("bad")).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while pipeline.stats().batches_dropped == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(
            pipeline.health_check().await,
            HealthStatus::Degraded(_)
        ));

        tx.put(LogLine::new("good")).await.unwrap();
        tx.put(LogLine::new("good")).await.unwrap();
        drop(tx);
        pipeline.stop().await.unwrap();

        good.assert_async().await;
        let stats = pipeline.stats();
        assert_eq!(stats.batches_dropped, 1);
        assert_eq!(stats.batches_delivered, 1);
    }

    fn recorded(
        endpoint: &str,
        retry: RetryPolicy,
        grace: Duration,
    ) -> (ShipperPipeline, Arc<RecordingTelemetry>) {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let config = ShipperConfigBuilder::new()
            .endpoint(endpoint)
            .batch_size(Some(2))
            .flush_interval(Duration::from_secs(1))
            .retry(retry)
            .shutdown_grace(grace)
            .build()
            .unwrap();
        let pipeline = ShipperPipelineBuilder::new()
            .config(config)
            .telemetry(telemetry.clone())
            .build()
            .unwrap();
        (pipeline, telemetry)
    }

    #[tokio::test]
    async fn health_check_future_is_send() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ShipperPipeline>();

        let pipeline = Arc::new(pipeline("http://127.0.0.1:9/logs"));
        let status = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.health_check().await }
        })
        .await
        .unwrap();
        assert!(status.is_unhealthy());
    }

    #[tokio::test]
    async fn telemetry_sees_flush_sizes_and_drops() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/logs")
            .match_body(r#"["ok","ok"]"#)
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("POST", "/logs")
            .match_body(r#"["bad","bad"]"#)
            .with_status(400)
            .create_async()
            .await;
        server
            .mock("POST", "/logs")
            .match_body(r#"["busy","busy"]"#)
            .with_status(503)
            .create_async()
            .await;

        let retry = RetryPolicy {
            max_retries: 1,
            base_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(1),
        };
        let (mut pipeline, telemetry) = recorded(
            &format!("{}/logs", server.url()),
            retry,
            Duration::from_secs(2),
        );
        pipeline.start().await.unwrap();
        let tx = pipeline.line_sender().unwrap();
        for text in ["ok", "ok", "bad", "bad", "busy", "busy"] {
            tx.put(LogLine::new(text)).await.unwrap();
        }
        drop(tx);
        pipeline.stop().await.unwrap();

        let flushes = telemetry.flushes.lock().unwrap().clone();
        let expected: Vec<(usize, usize)> = [["ok", "ok"], ["bad", "bad"], ["busy", "busy"]]
            .iter()
            .map(|lines| (2, serde_json::to_vec(lines).unwrap().len()))
            .collect();
        assert_eq!(flushes, expected);

        // 400은 1회 시도 후 영구 실패, 503은 재시도 소진
        let finals = telemetry.finals.lock().unwrap().clone();
        assert_eq!(finals, vec![(true, 1), (false, 1), (false, 2)]);
        assert_eq!(*telemetry.dropped.lock().unwrap(), 2);

        let stats = pipeline.stats();
        assert_eq!(stats.batches_delivered, 1);
        assert_eq!(stats.batches_dropped, 2);
    }

    #[tokio::test]
    async fn abandoned_batch_reports_attempts_made() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/logs")
            .with_status(503)
            .create_async()
            .await;

        let retry = RetryPolicy {
            max_retries: 50,
            base_interval: Duration::from_millis(20),
            max_interval: Duration::from_millis(20),
        };
        let (mut pipeline, telemetry) = recorded(
            &format!("{}/logs", server.url()),
            retry,
            Duration::from_millis(100),
        );
        pipeline.start().await.unwrap();
        let tx = pipeline.line_sender().unwrap();
        tx.put(LogLine::new("stuck")).await.unwrap();
        tx.put(LogLine::new("stuck")).await.unwrap();
        drop(tx);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while telemetry.attempts.lock().unwrap().len() < 3 {
            assert!(tokio::time::Instant::now() < deadline, "no retries observed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        pipeline.stop().await.unwrap();

        let recorded_attempts = telemetry.attempts.lock().unwrap().len() as u32;
        let finals = telemetry.finals.lock().unwrap().clone();
        assert_eq!(finals.len(), 1);
        let (success, attempts) = finals[0];
        assert!(!success);
        assert!(attempts >= 3, "got {attempts}");
        // 진행 중이던 시도까지 포함
        assert!(attempts == recorded_attempts || attempts == recorded_attempts + 1);
        assert_eq!(*telemetry.dropped.lock().unwrap(), 1);
        assert_eq!(pipeline.stats().batches_dropped, 1);
    }
}
