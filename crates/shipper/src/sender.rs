//! HTTP 전송 -- 봉투를 수집기로 POST 하고 재시도/백오프를 적용합니다.
//!
//! # 시도 결과 분류
//! - 2xx: 성공
//! - 네트워크 에러, 타임아웃, 5xx, 408, 429: 일시적 (재시도)
//! - 그 외 (3xx 포함, 리다이렉트는 따라가지 않음): 영구 실패 (즉시 종료)
//!
//! 재시도마다 인증 헤더를 다시 붙이고 (토큰이 바뀌었을 수 있음) 같은 본문 바이트를 재사용합니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::auth::AuthProvider;
use crate::codec::Envelope;
use crate::config::ShipperConfig;
use crate::error::{DeliveryError, DeliveryFailure, ShipperError};
use crate::telemetry::{AttemptOutcome, TelemetryHooks};

/// 지수 백오프 재시도 정책
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 최대 재시도 횟수 (총 시도 = max_retries + 1)
    pub max_retries: u32,
    /// 첫 재시도 전 대기 시간
    pub base_interval: Duration,
    /// 대기 시간 상한
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// 총 시도 횟수
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `retry`번째 재시도(1부터) 전 대기 시간: `min(base * 2^(retry-1), max)`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_interval
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }

    /// 정책 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ShipperError> {
        if self.base_interval.is_zero() {
            return Err(ShipperError::config(
                "sender.base_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.max_interval < self.base_interval {
            return Err(ShipperError::config(
                "sender.max_interval_ms",
                "must be greater than or equal to base_interval_ms",
            ));
        }
        Ok(())
    }
}

/// 성공한 전송의 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// 수행한 시도 횟수
    pub attempts: u32,
    /// 최종 응답 상태 코드
    pub status: u16,
}

/// 응답 상태 코드를 시도 결과로 분류합니다.
pub fn classify(status: StatusCode) -> AttemptOutcome {
    if status.is_success() {
        AttemptOutcome::Success
    } else if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        AttemptOutcome::Transient
    } else {
        AttemptOutcome::Permanent
    }
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
}

/// 수집기 HTTP 전송기
pub struct HttpSender {
    client: reqwest::Client,
    endpoint: Url,
    health_url: Url,
    auth: Arc<AuthProvider>,
    retry: RetryPolicy,
    telemetry: Arc<dyn TelemetryHooks>,
}

impl HttpSender {
    /// 새 전송기를 생성합니다.
    ///
    /// `client`는 [`TlsTransport::client_builder`](crate::tls::TlsTransport::client_builder)로 만든 클라이언트여야 합니다.
    pub fn new(
        client: reqwest::Client,
        config: &ShipperConfig,
        auth: Arc<AuthProvider>,
        telemetry: Arc<dyn TelemetryHooks>,
    ) -> Result<Self, ShipperError> {
        config.retry.validate()?;
        Ok(Self {
            client,
            endpoint: config.endpoint_url()?,
            health_url: config.health_url()?,
            auth,
            retry: config.retry.clone(),
            telemetry,
        })
    }

    /// 전송 대상 URL
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// 봉투를 전송합니다. 재시도가 소진되거나 영구 실패하면 `DeliveryError`를 반환합니다.
    pub async fn send(&self, envelope: &Envelope) -> Result<DeliveryReport, DeliveryError> {
        self.send_tracked(envelope, &AtomicU32::new(0)).await
    }

    /// [`send`](Self::send)와 같지만 시작한 시도 횟수를 `progress`에 기록합니다.
    ///
    /// 전송 future가 중간에 drop 되어도 호출자가 몇 번째 시도였는지 알 수 있습니다.
    pub async fn send_tracked(
        &self,
        envelope: &Envelope,
        progress: &AtomicU32,
    ) -> Result<DeliveryReport, DeliveryError> {
        let max_attempts = self.retry.max_attempts();
        let mut last_status = None;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_for(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
                tokio::time::sleep(delay).await;
            }

            progress.store(attempt, Ordering::Relaxed);
            let started = Instant::now();
            let result = self.attempt(envelope).await;
            let latency = started.elapsed();

            let outcome = match &result {
                Ok(status) => {
                    last_status = Some(status.as_u16());
                    last_error = None;
                    classify(*status)
                }
                Err(error) => {
                    last_status = None;
                    last_error = Some(error.clone());
                    AttemptOutcome::Transient
                }
            };
            self.telemetry.on_send_attempt(attempt, outcome, latency);

            match outcome {
                AttemptOutcome::Success => {
                    self.telemetry.on_send_final(true, attempt);
                    return Ok(DeliveryReport {
                        attempts: attempt,
                        status: last_status.unwrap_or_default(),
                    });
                }
                AttemptOutcome::Permanent => {
                    warn!(attempt, status = ?last_status, "collector rejected batch permanently");
                    self.telemetry.on_send_final(false, attempt);
                    return Err(DeliveryError {
                        kind: DeliveryFailure::Permanent,
                        last_status,
                        last_error,
                        attempts: attempt,
                    });
                }
                AttemptOutcome::Transient => {
                    warn!(
                        attempt,
                        max_attempts,
                        status = ?last_status,
                        error = last_error.as_deref().unwrap_or(""),
                        "transient delivery failure"
                    );
                }
            }
        }

        self.telemetry.on_send_final(false, max_attempts);
        Err(DeliveryError {
            kind: DeliveryFailure::Exhausted,
            last_status,
            last_error,
            attempts: max_attempts,
        })
    }

    async fn attempt(&self, envelope: &Envelope) -> Result<StatusCode, String> {
        let mut headers = HeaderMap::with_capacity(envelope.headers.len() + 2);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(envelope.content_type));
        for (name, value) in &envelope.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| e.to_string())?;
            let value = HeaderValue::from_str(value).map_err(|e| e.to_string())?;
            headers.insert(name, value);
        }
        self.auth
            .add_authentication(&mut headers)
            .await
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(headers)
            .body(envelope.body.clone())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(response.status())
    }

    /// 수집기 헬스 체크: `GET <health_path>`가 `200 {"status":"ok"}`를 반환해야 합니다.
    pub async fn health_check(&self) -> Result<(), ShipperError> {
        let response = self
            .client
            .get(self.health_url.clone())
            .send()
            .await
            .map_err(|e| ShipperError::Collector(format!("health check request failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ShipperError::Collector(format!(
                "health check returned {status}"
            )));
        }

        let body: HealthBody = response
            .json()
            .await
            .map_err(|e| ShipperError::Collector(format!("invalid health response: {e}")))?;
        if body.status != "ok" {
            return Err(ShipperError::Collector(format!(
                "collector reports status '{}'",
                body.status
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for HttpSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSender")
            .field("endpoint", &self.endpoint.as_str())
            .field("auth", &self.auth.method())
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::Batch;
    use crate::codec::{self, Algorithm, EncryptionKey};
    use crate::config::ShipperConfigBuilder;
    use crate::telemetry::testing::RecordingTelemetry;
    use logship_core::types::LogLine;

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
        }
    }

    fn sender(
        server: &mockito::Server,
        retry: RetryPolicy,
        auth: AuthProvider,
        telemetry: Arc<RecordingTelemetry>,
    ) -> HttpSender {
        let config = ShipperConfigBuilder::new()
            .endpoint(format!("{}/logs", server.url()))
            .retry(retry)
            .build()
            .unwrap();
        HttpSender::new(reqwest::Client::new(), &config, Arc::new(auth), telemetry).unwrap()
    }

    fn envelope(lines: &[&str]) -> Envelope {
        let batch = Batch::from_lines(lines.iter().map(|l| LogLine::new(*l)).collect());
        codec::encode(&batch, None).unwrap()
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify(StatusCode::OK), AttemptOutcome::Success);
        assert_eq!(classify(StatusCode::ACCEPTED), AttemptOutcome::Success);
        assert_eq!(classify(StatusCode::SERVICE_UNAVAILABLE), AttemptOutcome::Transient);
        assert_eq!(classify(StatusCode::REQUEST_TIMEOUT), AttemptOutcome::Transient);
        assert_eq!(classify(StatusCode::TOO_MANY_REQUESTS), AttemptOutcome::Transient);
        assert_eq!(classify(StatusCode::BAD_REQUEST), AttemptOutcome::Permanent);
        assert_eq!(classify(StatusCode::UNAUTHORIZED), AttemptOutcome::Permanent);
        assert_eq!(classify(StatusCode::MOVED_PERMANENTLY), AttemptOutcome::Permanent);
    }

    #[test]
    fn backoff_is_exponential_capped_and_non_decreasing() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(1000),
        };
        let delays: Vec<u64> = (1..=10)
            .map(|n| policy.delay_for(n).as_millis() as u64)
            .collect();
        assert_eq!(delays[..5], [100, 200, 400, 800, 1000]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= 1000));
        // 매우 큰 재시도 번호에서도 오버플로 없이 상한 유지
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn retry_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        let zero = RetryPolicy {
            base_interval: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert!(zero.validate().is_err());
    }

    #[tokio::test]
    async fn plaintext_post_carries_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .match_header("content-type", "application/json")
            .match_body(r#"["line1","line2"]"#)
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let telemetry = Arc::new(RecordingTelemetry::default());
        let s = sender(&server, fast_retry(3), AuthProvider::None, telemetry.clone());
        let report = s.send(&envelope(&["line1", "line2"])).await.unwrap();
        assert_eq!(report, DeliveryReport { attempts: 1, status: 200 });
        assert_eq!(*telemetry.finals.lock().unwrap(), vec![(true, 1)]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn encrypted_post_carries_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .match_header("content-type", "application/octet-stream")
            .match_header("x-encrypted", "true")
            .match_header("x-key-id", "k1")
            .match_header("authorization", "Basic dTpw")
            .with_status(202)
            .create_async()
            .await;

        let key = EncryptionKey::new("k1", Algorithm::AesGcm, &[1u8; 32]).unwrap();
        let batch = Batch::from_lines(vec![LogLine::new("x")]);
        let env = codec::encode(&batch, Some(&key)).unwrap();

        let auth = AuthProvider::Basic {
            username: "u".to_owned(),
            password: "p".to_owned(),
        };
        let s = sender(&server, fast_retry(0), auth, Arc::default());
        s.send(&env).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/logs")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;
        let succeeding = server
            .mock("POST", "/logs")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let telemetry = Arc::new(RecordingTelemetry::default());
        let s = sender(&server, fast_retry(5), AuthProvider::None, telemetry.clone());
        let started = Instant::now();
        let report = s.send(&envelope(&["a"])).await.unwrap();
        assert_eq!(report.attempts, 3);
        // 두 번의 백오프: 5ms + 10ms
        assert!(started.elapsed() >= Duration::from_millis(15));

        let attempts = telemetry.attempts.lock().unwrap().clone();
        assert_eq!(
            attempts,
            vec![
                (1, AttemptOutcome::Transient),
                (2, AttemptOutcome::Transient),
                (3, AttemptOutcome::Success),
            ]
        );
        failing.assert_async().await;
        succeeding.assert_async().await;
    }

    #[tokio::test]
    async fn persistent_failure_exhausts_after_max_retries_plus_one() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .with_status(503)
            .expect(4)
            .create_async()
            .await;

        let telemetry = Arc::new(RecordingTelemetry::default());
        let s = sender(&server, fast_retry(3), AuthProvider::None, telemetry.clone());
        let err = s.send(&envelope(&["a"])).await.unwrap_err();
        assert_eq!(err.kind, DeliveryFailure::Exhausted);
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last_status, Some(503));
        assert_eq!(*telemetry.finals.lock().unwrap(), vec![(false, 4)]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .with_status(400)
            .expect(1)
            .create_async()
            .await;

        let s = sender(&server, fast_retry(3), AuthProvider::None, Arc::default());
        let err = s.send(&envelope(&["a"])).await.unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(err.attempts, 1);
        assert_eq!(err.last_status, Some(400));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limited_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("POST", "/logs")
            .with_status(429)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("POST", "/logs")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let s = sender(&server, fast_retry(1), AuthProvider::None, Arc::default());
        assert_eq!(s.send(&envelope(&["a"])).await.unwrap().attempts, 2);
        limited.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn redirect_is_permanent_and_not_followed() {
        let mut server = mockito::Server::new_async().await;
        let redirect = server
            .mock("POST", "/logs")
            .with_status(307)
            .with_header("location", "/elsewhere")
            .expect(1)
            .create_async()
            .await;
        let elsewhere = server
            .mock("POST", "/elsewhere")
            .expect(0)
            .create_async()
            .await;

        let config = ShipperConfigBuilder::new()
            .endpoint(format!("{}/logs", server.url()))
            .retry(fast_retry(2))
            .build()
            .unwrap();
        let client = crate::tls::TlsTransport::Plaintext
            .client_builder(Duration::from_secs(5))
            .build()
            .unwrap();
        let s = HttpSender::new(
            client,
            &config,
            Arc::new(AuthProvider::None),
            Arc::new(crate::telemetry::NoopTelemetry),
        )
        .unwrap();

        let err = s.send(&envelope(&["a"])).await.unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(err.last_status, Some(307));
        redirect.assert_async().await;
        elsewhere.assert_async().await;
    }

    #[tokio::test]
    async fn connection_refused_is_transient_and_exhausts() {
        // 바인드 후 즉시 닫아 연결이 거부되는 포트 확보
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ShipperConfigBuilder::new()
            .endpoint(format!("http://{addr}/logs"))
            .retry(fast_retry(2))
            .build()
            .unwrap();
        let telemetry = Arc::new(RecordingTelemetry::default());
        let s = HttpSender::new(
            reqwest::Client::new(),
            &config,
            Arc::new(AuthProvider::None),
            telemetry.clone(),
        )
        .unwrap();

        let err = s.send(&envelope(&["a"])).await.unwrap_err();
        assert_eq!(err.kind, DeliveryFailure::Exhausted);
        assert_eq!(err.attempts, 3);
        assert!(err.last_status.is_none());
        assert!(err.last_error.is_some());
        assert!(
            telemetry
                .attempts
                .lock()
                .unwrap()
                .iter()
                .all(|(_, o)| *o == AttemptOutcome::Transient)
        );
    }

    #[tokio::test]
    async fn auth_is_reapplied_on_every_attempt() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"rotating","expires_in":1}"#)
            .expect(2)
            .create_async()
            .await;
        let failing = server
            .mock("POST", "/logs")
            .match_header("authorization", "Bearer rotating")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("POST", "/logs")
            .match_header("authorization", "Bearer rotating")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let oauth = crate::auth::OAuth2ClientCredentials::new(
            reqwest::Client::new(),
            &format!("{}/token", server.url()),
            "id",
            "secret",
            Vec::new(),
        )
        .unwrap();
        let s = sender(&server, fast_retry(1), AuthProvider::OAuth2(oauth), Arc::default());
        s.send(&envelope(&["a"])).await.unwrap();
        token.assert_async().await;
        failing.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn health_check_expects_ok_status_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"ok"}"#)
            .create_async()
            .await;
        let s = sender(&server, fast_retry(0), AuthProvider::None, Arc::default());
        s.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn health_check_rejects_degraded_collector() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status":"degraded"}"#)
            .create_async()
            .await;
        let s = sender(&server, fast_retry(0), AuthProvider::None, Arc::default());
        let err = s.health_check().await.unwrap_err();
        assert!(matches!(err, ShipperError::Collector(_)));
        assert!(err.to_string().contains("degraded"));
    }

    #[tokio::test]
    async fn health_check_rejects_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;
        let s = sender(&server, fast_retry(0), AuthProvider::None, Arc::default());
        let err = s.health_check().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
