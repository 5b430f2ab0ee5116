//! OAuth2 client-credentials 토큰 소스
//!
//! 토큰 캐시는 `tokio::sync::Mutex`로 보호되는 단일 writer 구조입니다.
//! 갱신 중에는 락을 유지하므로 동시 호출자가 여럿이어도 토큰 요청은 한 번만 나갑니다.

use std::fmt;
use std::time::Duration;

use logship_core::metrics as m;
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ShipperError;

/// 만료 이 시간 전이면 미리 갱신합니다.
const EXPIRY_DELTA: Duration = Duration::from_secs(10);

/// 토큰 엔드포인트 응답
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    /// `None`이면 만료되지 않는 토큰
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => now + EXPIRY_DELTA < expires_at,
            None => true,
        }
    }
}

/// client-credentials 흐름으로 액세스 토큰을 발급/캐시합니다.
pub struct OAuth2ClientCredentials {
    client: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    cache: Mutex<Option<CachedToken>>,
}

impl OAuth2ClientCredentials {
    /// 새 토큰 소스를 생성합니다. 토큰은 첫 요청 시점에 발급됩니다.
    pub fn new(
        client: reqwest::Client,
        token_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scopes: Vec<String>,
    ) -> Result<Self, ShipperError> {
        let token_url = Url::parse(token_url)
            .map_err(|e| ShipperError::config("auth.token_url", e.to_string()))?;
        Ok(Self {
            client,
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes,
            cache: Mutex::new(None),
        })
    }

    /// 유효한 액세스 토큰을 반환합니다. 만료가 가까우면 갱신합니다.
    pub async fn token(&self) -> Result<String, ShipperError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && cached.is_fresh(Instant::now())
        {
            return Ok(cached.access_token.clone());
        }

        let fetched = self.fetch().await;
        let result = if fetched.is_ok() { "success" } else { "failure" };
        metrics::counter!(m::AUTH_TOKEN_REFRESHES_TOTAL, m::LABEL_RESULT => result).increment(1);

        let token = fetched?;
        let access_token = token.access_token.clone();
        *cache = Some(token);
        Ok(access_token)
    }

    /// 캐시된 토큰이 주어진 값과 같은지 확인합니다 (대기하지 않음).
    pub(crate) fn cached_token_matches(&self, presented: &str) -> bool {
        match self.cache.try_lock() {
            Ok(cache) => cache
                .as_ref()
                .is_some_and(|t| super::constant_time_eq(t.access_token.as_bytes(), presented.as_bytes())),
            Err(_) => false,
        }
    }

    async fn fetch(&self) -> Result<CachedToken, ShipperError> {
        let mut form = vec![
            ("grant_type", "client_credentials".to_owned()),
            ("client_id", self.client_id.clone()),
            ("client_secret", self.client_secret.clone()),
        ];
        if !self.scopes.is_empty() {
            form.push(("scope", self.scopes.join(" ")));
        }

        let requested_at = Instant::now();
        let response = self
            .client
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| ShipperError::Auth(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "token endpoint rejected client credentials");
            return Err(ShipperError::Auth(format!(
                "token endpoint returned {status}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ShipperError::Auth(format!("invalid token response: {e}")))?;

        if let Some(token_type) = body.token_type.as_deref()
            && !token_type.eq_ignore_ascii_case("bearer")
        {
            return Err(ShipperError::Auth(format!(
                "unsupported token type '{token_type}'"
            )));
        }

        debug!(expires_in = ?body.expires_in, "obtained oauth2 access token");
        Ok(CachedToken {
            access_token: body.access_token,
            expires_at: body
                .expires_in
                .map(|secs| requested_at + Duration::from_secs(secs)),
        })
    }
}

impl fmt::Debug for OAuth2ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2ClientCredentials")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scopes", &self.scopes)
            .finish()
    }
}
