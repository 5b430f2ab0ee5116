//! 소스 리더 인터페이스와 파일 소스
//!
//! 소스 리더는 라인 큐의 생산자입니다. 각 리더는 자기 태스크에서 [`run_source`]로 구동되며
//! 라인 큐가 가득 차면 대기합니다.
//!
//! 리더 계약:
//! - 같은 라인을 두 번 내보내지 않습니다.
//! - 스트림 종료(`Ok(None)`)와 일시적 읽기 에러(`Err`)를 구분합니다.

use std::path::{Path, PathBuf};
use std::time::Duration;

use logship_core::pipeline::BoxFuture;
use logship_core::types::LogLine;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ShipperError;
use crate::queue::LineSender;

/// 로그 라인 생산자
///
/// `Box<dyn LineSource>`로 다루기 위해 boxed future를 반환합니다.
pub trait LineSource: Send + Sync {
    /// 소스 이름 (로그/메타데이터용)
    fn name(&self) -> &str;

    /// 다음 라인을 읽습니다. `Ok(None)`은 스트림 종료, `Err`는 일시적 에러입니다.
    fn next(&mut self) -> BoxFuture<'_, Result<Option<LogLine>, ShipperError>>;

    /// 리소스를 정리합니다.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// 소스 하나를 라인 큐에 연결해 구동합니다.
///
/// 스트림 종료, 큐 닫힘, `cancel` 취소 중 하나가 일어나면 `close` 후 반환합니다.
/// 일시적 에러는 `retry_delay` 뒤에 다시 시도합니다. 반환값은 큐에 넣은 라인 수입니다.
pub async fn run_source(
    mut source: Box<dyn LineSource>,
    lines: LineSender,
    cancel: CancellationToken,
    retry_delay: Duration,
) -> u64 {
    let name = source.name().to_owned();
    let mut forwarded = 0u64;
    info!(source = %name, "source reader started");

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = source.next() => next,
        };

        match next {
            Ok(Some(line)) => {
                let put = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(source = %name, "shutdown while waiting for queue space, discarding line");
                        break;
                    }
                    put = lines.put(line) => put,
                };
                if put.is_err() {
                    debug!(source = %name, "line queue closed");
                    break;
                }
                forwarded += 1;
            }
            Ok(None) => {
                info!(source = %name, "source reached end of stream");
                break;
            }
            Err(e) => {
                warn!(source = %name, error = %e, "transient source error, retrying");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }

    source.close().await;
    info!(source = %name, forwarded, "source reader stopped");
    forwarded
}

/// 개행으로 구분된 라인을 파일에서 읽는 소스
///
/// `follow`가 켜져 있으면 EOF 이후 추가되는 데이터를 폴링으로 계속 읽습니다.
/// 로테이션은 처리하지 않습니다. 각 라인에는 `source`, `path` 필드가 붙습니다.
#[derive(Debug)]
pub struct FileSource {
    name: String,
    path: PathBuf,
    follow: bool,
    poll_interval: Duration,
    reader: Option<BufReader<File>>,
    partial: Vec<u8>,
}

impl FileSource {
    /// 새 파일 소스를 생성합니다. 파일은 첫 `next` 호출 시 열립니다.
    pub fn new(path: impl AsRef<Path>, follow: bool, poll_interval: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: format!("file:{}", path.display()),
            path,
            follow,
            poll_interval,
            reader: None,
            partial: Vec::new(),
        }
    }

    fn make_line(&self, mut bytes: Vec<u8>) -> LogLine {
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
        }
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        LogLine::new(String::from_utf8_lossy(&bytes).into_owned())
            .with_field("source", "file")
            .with_field("path", self.path.display().to_string())
    }

    async fn read_next(&mut self) -> Result<Option<LogLine>, ShipperError> {
        loop {
            let reader = match &mut self.reader {
                Some(reader) => reader,
                slot @ None => {
                    let file = File::open(&self.path).await.map_err(|e| ShipperError::Source {
                        source_name: self.name.clone(),
                        reason: format!("cannot open: {e}"),
                    })?;
                    debug!(path = %self.path.display(), "opened source file");
                    slot.insert(BufReader::new(file))
                }
            };

            let mut buf = Vec::new();
            let n = reader
                .read_until(b'\n', &mut buf)
                .await
                .map_err(|e| ShipperError::Source {
                    source_name: self.name.clone(),
                    reason: format!("read failed: {e}"),
                })?;

            if n == 0 {
                if self.follow {
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
                if self.partial.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.partial);
                return Ok(Some(self.make_line(rest)));
            }

            self.partial.extend_from_slice(&buf);
            if self.partial.last() == Some(&b'\n') {
                let complete = std::mem::take(&mut self.partial);
                return Ok(Some(self.make_line(complete)));
            }
            // 개행 없이 EOF에 닿은 불완전한 라인: 다음 읽기에서 이어 붙임
        }
    }
}

impl LineSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next(&mut self) -> BoxFuture<'_, Result<Option<LogLine>, ShipperError>> {
        Box::pin(self.read_next())
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.reader = None;
            if !self.partial.is_empty() {
                debug!(
                    source = %self.name,
                    bytes = self.partial.len(),
                    "discarding incomplete trailing line"
                );
                self.partial.clear();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::line_queue;
    use std::collections::VecDeque;
    use std::io::Write;

    /// 미리 정해진 결과를 순서대로 돌려주는 소스
    struct ScriptedSource {
        script: VecDeque<Result<Option<LogLine>, ShipperError>>,
        closed: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }

    impl LineSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        fn next(&mut self) -> BoxFuture<'_, Result<Option<LogLine>, ShipperError>> {
            let item = self.script.pop_front().unwrap_or(Ok(None));
            Box::pin(async move { item })
        }

        fn close(&mut self) -> BoxFuture<'_, ()> {
            self.closed
                .store(true, std::sync::atomic::Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn file_source_reads_lines_with_metadata() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "first\nsecond\r\nthird").unwrap();

        let mut source = FileSource::new(file.path(), false, Duration::from_millis(10));
        let first = source.next().await.unwrap().unwrap();
        assert_eq!(first.text, "first");
        assert_eq!(first.fields.get("source").map(String::as_str), Some("file"));
        assert_eq!(
            first.fields.get("path").map(String::as_str),
            Some(file.path().display().to_string().as_str())
        );
        assert_eq!(source.next().await.unwrap().unwrap().text, "second");
        // 개행 없는 마지막 라인도 EOF에서 내보냄
        assert_eq!(source.next().await.unwrap().unwrap().text, "third");
        assert!(source.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_source_follow_picks_up_appended_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "one").unwrap();

        let mut source = FileSource::new(file.path(), true, Duration::from_millis(5));
        assert_eq!(source.next().await.unwrap().unwrap().text, "one");

        let path = file.path().to_path_buf();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
            write!(f, "tw").unwrap();
            f.flush().unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            writeln!(f, "o").unwrap();
        });

        let line = tokio::time::timeout(Duration::from_secs(5), source.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(line.text, "two");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_transient_error() {
        let mut source = FileSource::new("/nonexistent/app.log", false, Duration::from_millis(5));
        let err = source.next().await.unwrap_err();
        assert!(matches!(err, ShipperError::Source { .. }));
    }

    #[tokio::test]
    async fn run_source_forwards_until_end_of_stream() {
        let (tx, mut rx) = line_queue(16);
        let closed = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let source = ScriptedSource {
            script: VecDeque::from(vec![
                Ok(Some(LogLine::new("a"))),
                Err(ShipperError::Source {
                    source_name: "scripted".to_owned(),
                    reason: "hiccup".to_owned(),
                }),
                Ok(Some(LogLine::new("b"))),
                Ok(None),
                Ok(Some(LogLine::new("never"))),
            ]),
            closed: closed.clone(),
        };

        let forwarded = run_source(
            Box::new(source),
            tx,
            CancellationToken::new(),
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(forwarded, 2);
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));

        assert_eq!(rx.recv().await.unwrap().text, "a");
        assert_eq!(rx.recv().await.unwrap().text, "b");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn run_source_stops_on_cancel() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "only").unwrap();

        let (tx, mut rx) = line_queue(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_source(
            Box::new(FileSource::new(file.path(), true, Duration::from_millis(5))),
            tx,
            cancel.clone(),
            Duration::from_millis(5),
        ));

        assert_eq!(rx.recv().await.unwrap().text, "only");
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), 1);
    }
}
