//! 라인 큐 -- 소스 리더(다수)에서 배처(단일)로 향하는 유한 FIFO
//!
//! 큐가 가득 차면 `put`이 대기합니다 (backpressure). 느린 전송은 라인을 버리거나
//! 메모리를 무한히 늘리는 대신 수집 속도를 늦춥니다.
//!
//! 단일 리더에서 보낸 라인은 보낸 순서대로 배처에 도착합니다.
//! 여러 리더 간의 인터리빙은 도착 순서를 따릅니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use logship_core::metrics as m;
use logship_core::types::LogLine;
use tokio::sync::mpsc;

use crate::error::ShipperError;

/// 용량 `capacity`의 라인 큐를 생성합니다.
///
/// `capacity`는 0보다 커야 합니다 (`ShipperConfig::validate`에서 검증).
pub fn line_queue(capacity: usize) -> (LineSender, LineReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let depth = Arc::new(AtomicUsize::new(0));
    (
        LineSender {
            tx,
            depth: Arc::clone(&depth),
        },
        LineReceiver {
            rx,
            depth,
            capacity: capacity.max(1),
        },
    )
}

/// 라인 큐 송신측 (소스 리더마다 clone)
#[derive(Debug, Clone)]
pub struct LineSender {
    tx: mpsc::Sender<LogLine>,
    depth: Arc<AtomicUsize>,
}

impl LineSender {
    /// 라인을 큐에 넣습니다. 큐가 가득 차면 공간이 생길 때까지 대기합니다.
    ///
    /// 수신측이 닫혔으면 `ShipperError::Channel`을 반환합니다.
    pub async fn put(&self, line: LogLine) -> Result<(), ShipperError> {
        // 대기 중인 라인은 permit 확보 후에만 depth에 포함됩니다
        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| ShipperError::Channel("line queue closed".to_owned()))?;
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        permit.send(line);

        metrics::counter!(m::QUEUE_LINES_RECEIVED_TOTAL).increment(1);
        metrics::gauge!(m::QUEUE_DEPTH).set(depth as f64);
        Ok(())
    }

    /// 큐의 수신측이 닫혔는지 확인합니다.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 라인 큐 수신측 (배처 전용)
#[derive(Debug)]
pub struct LineReceiver {
    rx: mpsc::Receiver<LogLine>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

impl LineReceiver {
    /// 다음 라인을 기다립니다. 모든 송신측이 drop되고 큐가 비면 `None`.
    pub async fn recv(&mut self) -> Option<LogLine> {
        let line = self.rx.recv().await?;
        self.mark_taken();
        Some(line)
    }

    /// 대기 없이 라인을 꺼냅니다 (종료 시 drain 용도).
    pub fn try_recv(&mut self) -> Option<LogLine> {
        let line = self.rx.try_recv().ok()?;
        self.mark_taken();
        Some(line)
    }

    /// 큐를 닫아 이후 `put`이 실패하도록 합니다. 이미 들어온 라인은 계속 꺼낼 수 있습니다.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// 현재 대기 중인 라인 수
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// 큐 최대 용량
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 큐 사용률을 외부에서 관찰하기 위한 핸들을 반환합니다.
    pub fn gauge(&self) -> QueueGauge {
        QueueGauge {
            depth: Arc::clone(&self.depth),
            capacity: self.capacity,
        }
    }

    fn mark_taken(&self) {
        let prev = self.depth.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!(m::QUEUE_DEPTH).set(prev.saturating_sub(1) as f64);
    }
}

/// 큐 깊이 관찰 핸들 (헬스 체크용)
#[derive(Debug, Clone)]
pub struct QueueGauge {
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

impl QueueGauge {
    /// 큐 사용률 (0.0 ~ 1.0)
    pub fn utilization(&self) -> f64 {
        self.depth.load(Ordering::Relaxed) as f64 / self.capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn preserves_order_from_single_sender() {
        let (tx, mut rx) = line_queue(8);
        for text in ["a", "b", "c"] {
            tx.put(LogLine::new(text)).await.unwrap();
        }
        drop(tx);

        let mut got = Vec::new();
        while let Some(line) = rx.recv().await {
            got.push(line.text);
        }
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn full_queue_blocks_producer() {
        let (tx, mut rx) = line_queue(1);
        tx.put(LogLine::new("first")).await.unwrap();

        // 두 번째 put은 공간이 생기기 전까지 완료되지 않아야 함
        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.put(LogLine::new("second")))
            .await;
        assert!(blocked.is_err());

        assert_eq!(rx.recv().await.unwrap().text, "first");
        tx.put(LogLine::new("third")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().text, "third");
    }

    #[tokio::test]
    async fn depth_tracks_queued_lines() {
        let (tx, mut rx) = line_queue(4);
        let gauge = rx.gauge();
        tx.put(LogLine::new("a")).await.unwrap();
        tx.put(LogLine::new("b")).await.unwrap();
        assert_eq!(rx.depth(), 2);
        assert!((gauge.utilization() - 0.5).abs() < f64::EPSILON);

        rx.try_recv().unwrap();
        assert_eq!(rx.depth(), 1);
        assert_eq!(rx.capacity(), 4);
    }

    #[tokio::test]
    async fn put_fails_after_receiver_closed() {
        let (tx, mut rx) = line_queue(4);
        rx.close();
        assert!(tx.is_closed());
        let err = tx.put(LogLine::new("late")).await.unwrap_err();
        assert!(matches!(err, ShipperError::Channel(_)));
    }

    #[tokio::test]
    async fn try_recv_on_empty_queue_returns_none() {
        let (_tx, mut rx) = line_queue(4);
        assert!(rx.try_recv().is_none());
    }
}
