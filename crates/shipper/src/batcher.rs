//! 배처 -- 라인 큐의 단일 소비자, 크기/시간 트리거로 배치를 만듭니다.
//!
//! # 상태 전이
//! ```text
//! collecting --(batch_size 도달 | 데드라인 만료)--> ready --> flushing --> collecting
//! ```
//!
//! - 빈 상태에서 첫 라인이 들어오면 `flush_interval` 데드라인이 설정됩니다.
//! - 크기 트리거는 매 `push`마다 동기적으로 검사되며 곧 만료될 타이머보다 우선합니다.
//! - `ready -> flushing` 에서 현재 배치를 분리하고 즉시 새 빈 배치로 교체합니다.
//!   [`Batcher`]는 `&mut self`로만 변경되므로 분리와 교체 사이에 라인이 끼어들 수 없습니다.
//! - 종료 시 비어있지 않은 배치는 강제로 플러시되고, 빈 배치는 버려집니다.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use logship_core::types::LogLine;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::error::ShipperError;
use crate::queue::LineReceiver;
use crate::telemetry::{FlushTrigger, TelemetryHooks};

/// 한 번의 네트워크 전송으로 플러시되는 라인 묶음
///
/// `collecting` 상태에서만 커지며, 플러시된 후에는 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    id: Uuid,
    lines: Vec<LogLine>,
    created_at: DateTime<Utc>,
    size_bytes: usize,
}

impl Batch {
    /// 빈 배치를 생성합니다.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            lines: Vec::new(),
            created_at: Utc::now(),
            size_bytes: 0,
        }
    }

    /// 라인 목록으로 배치를 생성합니다.
    pub fn from_lines(lines: Vec<LogLine>) -> Self {
        let mut batch = Self::new();
        for line in lines {
            batch.push(line);
        }
        batch
    }

    pub(crate) fn push(&mut self, line: LogLine) {
        self.size_bytes += line.len();
        self.lines.push(line);
    }

    /// 배치 식별자 (로그 상관관계용)
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 라인 목록 (추가된 순서)
    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    /// 라인 목록의 소유권을 가져옵니다.
    pub fn into_lines(self) -> Vec<LogLine> {
        self.lines
    }

    /// 라인 수
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// 라인 본문 바이트 합계
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// 배치 생성 시각
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

/// 배처 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// 라인을 모으는 중
    Collecting,
    /// 트리거 조건 충족, 분리 대기
    Ready,
    /// 분리된 배치를 하위 단계로 넘기는 중
    Flushing,
}

/// 플러시 상태 머신
///
/// 시각을 인자로 받는 동기 API이므로 타이머 없이도 결정적으로 테스트할 수 있습니다.
/// [`Batcher::run`]이 이 상태 머신을 라인 큐와 타이머에 연결합니다.
#[derive(Debug)]
pub struct Batcher {
    current: Batch,
    state: BatchState,
    batch_size: Option<usize>,
    flush_interval: Duration,
    deadline: Option<Instant>,
}

impl Batcher {
    /// 새 배처를 생성합니다.
    ///
    /// `batch_size`가 `None`이면 시간 기반 플러시만 사용합니다.
    pub fn new(batch_size: Option<usize>, flush_interval: Duration) -> Self {
        Self {
            current: Batch::new(),
            state: BatchState::Collecting,
            batch_size: batch_size.filter(|size| *size > 0),
            flush_interval,
            deadline: None,
        }
    }

    /// 현재 상태
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// 현재 모으고 있는 라인 수
    pub fn pending(&self) -> usize {
        self.current.len()
    }

    /// 설정된 플러시 데드라인 (배치가 비어있으면 `None`)
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 라인을 추가합니다. 크기 트리거가 충족되면 분리된 배치를 반환합니다.
    pub fn push(&mut self, line: LogLine, now: Instant) -> Option<Batch> {
        if self.current.is_empty() {
            self.deadline = Some(now + self.flush_interval);
        }
        self.current.push(line);

        match self.batch_size {
            Some(size) if self.current.len() >= size => Some(self.take()),
            _ => None,
        }
    }

    /// 데드라인이 지났고 배치가 비어있지 않으면 분리된 배치를 반환합니다.
    pub fn poll_deadline(&mut self, now: Instant) -> Option<Batch> {
        match self.deadline {
            Some(deadline) if now >= deadline && !self.current.is_empty() => Some(self.take()),
            _ => None,
        }
    }

    /// 비어있지 않은 배치를 즉시 분리합니다. 빈 배치는 버립니다.
    pub fn force_flush(&mut self) -> Option<Batch> {
        if self.current.is_empty() {
            self.deadline = None;
            return None;
        }
        Some(self.take())
    }

    fn take(&mut self) -> Batch {
        self.state = BatchState::Ready;
        self.deadline = None;
        self.state = BatchState::Flushing;
        let batch = std::mem::replace(&mut self.current, Batch::new());
        self.state = BatchState::Collecting;
        trace!(batch_id = %batch.id(), lines = batch.len(), "batch detached");
        batch
    }

    /// 라인 큐를 소비하며 플러시된 배치를 `batches` 채널로 보냅니다.
    ///
    /// `cancel`이 취소되거나 모든 송신측이 drop되면 큐에 남은 라인을 모두 꺼내
    /// 플러시한 뒤 종료합니다. 종료 시 `batches` 송신측이 drop되어 하위 단계가
    /// 입력 종료를 알 수 있습니다.
    pub async fn run(
        mut self,
        mut lines: LineReceiver,
        batches: mpsc::Sender<Batch>,
        flush_now: Arc<Notify>,
        cancel: CancellationToken,
        telemetry: Arc<dyn TelemetryHooks>,
    ) -> Result<(), ShipperError> {
        info!(
            batch_size = ?self.batch_size,
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            "batcher started"
        );

        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("batcher received shutdown signal");
                    break;
                }

                line = lines.recv() => {
                    let Some(line) = line else {
                        debug!("line queue closed by all producers");
                        break;
                    };
                    let now = Instant::now();
                    if let Some(batch) = self.push(line, now) {
                        emit(&batches, batch, FlushTrigger::Size, telemetry.as_ref()).await?;
                    } else if let Some(batch) = self.poll_deadline(now) {
                        // 라인이 계속 들어와도 타이머가 굶지 않도록 함
                        emit(&batches, batch, FlushTrigger::Timer, telemetry.as_ref()).await?;
                    }
                }

                _ = flush_now.notified() => {
                    if let Some(batch) = self.force_flush() {
                        emit(&batches, batch, FlushTrigger::Manual, telemetry.as_ref()).await?;
                    }
                }

                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    if let Some(batch) = self.poll_deadline(Instant::now()) {
                        emit(&batches, batch, FlushTrigger::Timer, telemetry.as_ref()).await?;
                    }
                }
            }
        }

        // drain-on-close
        lines.close();
        let mut drained = 0usize;
        while let Some(line) = lines.try_recv() {
            drained += 1;
            if let Some(batch) = self.push(line, Instant::now()) {
                emit(&batches, batch, FlushTrigger::Size, telemetry.as_ref()).await?;
            }
        }
        if let Some(batch) = self.force_flush() {
            emit(&batches, batch, FlushTrigger::Shutdown, telemetry.as_ref()).await?;
        }

        info!(drained, "batcher stopped");
        Ok(())
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

async fn emit(
    batches: &mpsc::Sender<Batch>,
    batch: Batch,
    trigger: FlushTrigger,
    telemetry: &dyn TelemetryHooks,
) -> Result<(), ShipperError> {
    debug!(
        batch_id = %batch.id(),
        lines = batch.len(),
        bytes = batch.size_bytes(),
        %trigger,
        "batch flushed"
    );
    telemetry.on_batch_ready(trigger, batch.len());
    batches
        .send(batch)
        .await
        .map_err(|_| ShipperError::Channel("batch channel closed".to_owned()))
}
