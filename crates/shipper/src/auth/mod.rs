//! 인증 제공자 -- 아웃바운드 요청에 자격 증명을 부착합니다.
//!
//! [`AuthProvider`]는 설정 시점에 선택되는 닫힌 enum이며 각 variant는 필요한 필드만 가집니다.
//!
//! - `add_authentication`: 전송 측에서 요청 헤더를 꾸밉니다. 재시도마다 다시 호출됩니다.
//! - `authenticate`: 수신 측 검증 (테스트/모의 수집기용). 전송 측은 사용하지 않습니다.

mod oauth2;

pub use oauth2::OAuth2ClientCredentials;

use std::fmt;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use logship_core::config::AuthConfig;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::error::ShipperError;

/// 인증 제공자
pub enum AuthProvider {
    /// 인증 없음
    None,
    /// `Authorization: Basic base64(user:pass)`
    Basic {
        /// 사용자 이름
        username: String,
        /// 비밀번호
        password: String,
    },
    /// `Authorization: Bearer <token>` (파일에서 로드한 고정 토큰)
    BearerToken {
        /// 토큰
        token: String,
    },
    /// client-credentials로 발급/갱신되는 Bearer 토큰
    OAuth2(OAuth2ClientCredentials),
    /// 고정 헤더 집합
    CustomHeader {
        /// 부착할 헤더
        headers: HeaderMap,
    },
}

impl AuthProvider {
    /// 설정에서 인증 제공자를 생성합니다.
    ///
    /// 알 수 없는 방식이나 누락된 필수 필드는 설정 에러입니다.
    /// `client`는 OAuth2 토큰 요청에 사용됩니다.
    pub fn from_config(config: &AuthConfig, client: &reqwest::Client) -> Result<Self, ShipperError> {
        let provider = match config.method.as_str() {
            "none" => Self::None,
            "basic" => Self::Basic {
                username: required(&config.username, "auth.username")?,
                password: required(&config.password, "auth.password")?,
            },
            "bearer-token" => {
                let path = required(&config.token_file, "auth.token_file")?;
                let token = std::fs::read_to_string(&path).map_err(|e| {
                    ShipperError::config("auth.token_file", format!("cannot read '{path}': {e}"))
                })?;
                let token = token.trim().to_owned();
                if token.is_empty() {
                    return Err(ShipperError::config("auth.token_file", "token file is empty"));
                }
                Self::BearerToken { token }
            }
            "oauth2-client-credentials" => Self::OAuth2(OAuth2ClientCredentials::new(
                client.clone(),
                &required(&config.token_url, "auth.token_url")?,
                required(&config.client_id, "auth.client_id")?,
                required(&config.client_secret, "auth.client_secret")?,
                config.scopes.clone(),
            )?),
            "custom-header" => {
                if config.headers.is_empty() {
                    return Err(ShipperError::config(
                        "auth.headers",
                        "at least one header is required",
                    ));
                }
                let mut headers = HeaderMap::with_capacity(config.headers.len());
                for (name, value) in &config.headers {
                    let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                        ShipperError::config("auth.headers", format!("invalid header name '{name}': {e}"))
                    })?;
                    let mut value = HeaderValue::from_str(value).map_err(|e| {
                        ShipperError::config("auth.headers", format!("invalid value for '{name}': {e}"))
                    })?;
                    value.set_sensitive(true);
                    headers.insert(name, value);
                }
                Self::CustomHeader { headers }
            }
            other => {
                return Err(ShipperError::config(
                    "auth.method",
                    format!("unknown method '{other}'"),
                ));
            }
        };

        info!(method = provider.method(), "auth provider configured");
        Ok(provider)
    }

    /// 설정 토큰 이름
    pub fn method(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::BearerToken { .. } => "bearer-token",
            Self::OAuth2(_) => "oauth2-client-credentials",
            Self::CustomHeader { .. } => "custom-header",
        }
    }

    /// 요청 헤더에 자격 증명을 부착합니다.
    ///
    /// OAuth2는 필요 시 토큰을 갱신하므로 토큰 엔드포인트 장애가 `ShipperError::Auth`로 나타날 수 있습니다.
    pub async fn add_authentication(&self, headers: &mut HeaderMap) -> Result<(), ShipperError> {
        match self {
            Self::None => {}
            Self::Basic { username, password } => {
                headers.insert(AUTHORIZATION, basic_value(username, password)?);
            }
            Self::BearerToken { token } => {
                headers.insert(AUTHORIZATION, bearer_value(token)?);
            }
            Self::OAuth2(source) => {
                let token = source.token().await?;
                headers.insert(AUTHORIZATION, bearer_value(&token)?);
            }
            Self::CustomHeader { headers: fixed } => {
                for (name, value) in fixed {
                    headers.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    /// 수신한 요청 헤더가 이 제공자의 자격 증명과 일치하는지 확인합니다.
    pub fn authenticate(&self, headers: &HeaderMap) -> bool {
        match self {
            Self::None => true,
            Self::Basic { username, password } => {
                let Some(encoded) = scheme_credentials(headers, "Basic") else {
                    return false;
                };
                let Ok(decoded) = BASE64_STANDARD.decode(encoded) else {
                    return false;
                };
                let expected = format!("{username}:{password}");
                constant_time_eq(&decoded, expected.as_bytes())
            }
            Self::BearerToken { token } => scheme_credentials(headers, "Bearer")
                .is_some_and(|presented| constant_time_eq(presented.as_bytes(), token.as_bytes())),
            Self::OAuth2(source) => scheme_credentials(headers, "Bearer")
                .is_some_and(|presented| source.cached_token_matches(presented)),
            Self::CustomHeader { headers: expected } => expected.iter().all(|(name, value)| {
                headers
                    .get(name)
                    .is_some_and(|got| constant_time_eq(got.as_bytes(), value.as_bytes()))
            }),
        }
    }
}

impl fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::BearerToken { .. } => f
                .debug_struct("BearerToken")
                .field("token", &"<redacted>")
                .finish(),
            Self::OAuth2(source) => f.debug_tuple("OAuth2").field(source).finish(),
            Self::CustomHeader { headers } => f
                .debug_struct("CustomHeader")
                .field("names", &headers.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

fn required(value: &Option<String>, field: &str) -> Result<String, ShipperError> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v.to_owned()),
        _ => Err(ShipperError::config(field, "required for the selected auth method")),
    }
}

fn basic_value(username: &str, password: &str) -> Result<HeaderValue, ShipperError> {
    let encoded = BASE64_STANDARD.encode(format!("{username}:{password}"));
    sensitive(format!("Basic {encoded}"))
}

fn bearer_value(token: &str) -> Result<HeaderValue, ShipperError> {
    sensitive(format!("Bearer {token}"))
}

fn sensitive(value: String) -> Result<HeaderValue, ShipperError> {
    let mut value = HeaderValue::try_from(value)
        .map_err(|e| ShipperError::Auth(format!("credential is not a valid header value: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

/// `Authorization: <scheme> <credentials>`에서 자격 증명 부분을 꺼냅니다.
fn scheme_credentials<'a>(headers: &'a HeaderMap, scheme: &str) -> Option<&'a str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (got_scheme, credentials) = value.split_once(' ')?;
    got_scheme
        .eq_ignore_ascii_case(scheme)
        .then(|| credentials.trim())
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}
