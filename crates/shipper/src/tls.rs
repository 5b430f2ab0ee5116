//! TLS 빌더 -- 선언적 설정에서 전송 계층 TLS 구성을 만듭니다.
//!
//! 잘못된 TLS 설정은 전부 시작 시점에 치명적입니다. 파싱할 수 없는 값을 무시하고
//! 더 약한 설정으로 진행하는 경우는 없습니다.
//!
//! rustls는 TLS 1.2와 1.3만 지원합니다. `min_version`이 `tls10`/`tls11`이면
//! 경고와 함께 1.2로 올리고, 범위에 지원 버전이 하나도 없으면 설정 에러입니다.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use logship_core::config::TlsConfig;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, info, warn};

use crate::error::ShipperError;

/// TLS 프로토콜 버전 토큰
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// `tls10`
    Tls10,
    /// `tls11`
    Tls11,
    /// `tls12`
    Tls12,
    /// `tls13`
    Tls13,
}

impl FromStr for TlsVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tls10" => Ok(Self::Tls10),
            "tls11" => Ok(Self::Tls11),
            "tls12" => Ok(Self::Tls12),
            "tls13" => Ok(Self::Tls13),
            other => Err(format!(
                "unknown TLS version '{other}', expected one of: tls10, tls11, tls12, tls13"
            )),
        }
    }
}

fn parse_version(token: Option<&str>, field: &str) -> Result<Option<TlsVersion>, ShipperError> {
    token
        .map(|t| t.parse().map_err(|reason: String| ShipperError::config(field, reason)))
        .transpose()
}

/// `[min, max]` 범위를 rustls가 지원하는 프로토콜 목록으로 변환합니다.
fn protocol_versions(
    min: Option<TlsVersion>,
    max: Option<TlsVersion>,
) -> Result<Vec<&'static rustls::SupportedProtocolVersion>, ShipperError> {
    let min = min.unwrap_or(TlsVersion::Tls12);
    let max = max.unwrap_or(TlsVersion::Tls13);

    if min > max {
        return Err(ShipperError::config(
            "tls.min_version",
            format!("min_version {min:?} is greater than max_version {max:?}"),
        ));
    }

    if min < TlsVersion::Tls12 {
        warn!(
            requested = ?min,
            "TLS 1.0/1.1 are not supported, raising minimum version to TLS 1.2"
        );
    }

    let mut versions = Vec::with_capacity(2);
    if min <= TlsVersion::Tls12 && max >= TlsVersion::Tls12 {
        versions.push(&rustls::version::TLS12);
    }
    if max >= TlsVersion::Tls13 {
        versions.push(&rustls::version::TLS13);
    }

    if versions.is_empty() {
        return Err(ShipperError::config(
            "tls.max_version",
            format!("no supported protocol version in range {min:?}..={max:?}"),
        ));
    }
    Ok(versions)
}

/// HTTP 전송에 사용할 전송 계층
#[derive(Clone)]
pub enum TlsTransport {
    /// TLS 설정 비활성화: 클라이언트 기본 동작 사용
    Plaintext,
    /// 구성된 rustls 클라이언트 설정
    Tls(Arc<ClientConfig>),
}

impl fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plaintext => f.write_str("Plaintext"),
            Self::Tls(_) => f.write_str("Tls(..)"),
        }
    }
}

impl TlsTransport {
    /// TLS 설정에서 전송 계층을 생성합니다.
    pub fn from_config(config: &TlsConfig) -> Result<Self, ShipperError> {
        if !config.enabled {
            debug!("tls section disabled, using default transport");
            return Ok(Self::Plaintext);
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let versions = protocol_versions(
            parse_version(config.min_version.as_deref(), "tls.min_version")?,
            parse_version(config.max_version.as_deref(), "tls.max_version")?,
        )?;

        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&versions)
            .map_err(|e| ShipperError::config("tls.min_version", e.to_string()))?;

        // 검증을 건너뛰더라도 CA 번들과 서버 이름은 항상 검증
        let ca_roots = config
            .ca_file
            .as_deref()
            .map(|path| load_ca_bundle(Path::new(path)))
            .transpose()?;
        let server_name = config
            .server_name
            .as_deref()
            .map(parse_server_name)
            .transpose()?;

        let builder = if config.insecure_skip_verify {
            warn!(
                ca_file_ignored = ca_roots.is_some(),
                server_name_ignored = server_name.is_some(),
                "tls.insecure_skip_verify is set, server certificates will NOT be verified"
            );
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerification {
                    provider: Arc::clone(&provider),
                }))
        } else {
            let roots = match ca_roots {
                Some(roots) => roots,
                None => load_native_roots()?,
            };
            match server_name {
                Some(name) => {
                    let verifier = ServerNameOverride::new(name, roots, Arc::clone(&provider))?;
                    builder
                        .dangerous()
                        .with_custom_certificate_verifier(Arc::new(verifier))
                }
                None => builder.with_root_certificates(roots),
            }
        };

        let client_config = match (config.cert_file.as_deref(), config.key_file.as_deref()) {
            (Some(cert), Some(key)) => {
                let certs = load_certificates(Path::new(cert), "tls.cert_file")?;
                let key = PrivateKeyDer::from_pem_file(key).map_err(|e| {
                    ShipperError::config("tls.key_file", format!("cannot load '{key}': {e}"))
                })?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| ShipperError::config("tls.cert_file", e.to_string()))?
            }
            (None, None) => builder.with_no_client_auth(),
            (Some(_), None) => {
                return Err(ShipperError::config(
                    "tls.key_file",
                    "cert_file is set but key_file is missing",
                ));
            }
            (None, Some(_)) => {
                return Err(ShipperError::config(
                    "tls.cert_file",
                    "key_file is set but cert_file is missing",
                ));
            }
        };

        info!(
            mtls = config.cert_file.is_some(),
            custom_ca = config.ca_file.is_some(),
            server_name = config.server_name.as_deref().unwrap_or(""),
            "tls transport configured"
        );
        Ok(Self::Tls(Arc::new(client_config)))
    }

    /// TLS가 구성되었는지 확인합니다.
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// 이 전송 계층을 사용하는 HTTP 클라이언트 빌더를 반환합니다.
    ///
    /// 리다이렉트는 따라가지 않습니다 (3xx는 영구 실패로 분류).
    pub fn client_builder(&self, timeout: Duration) -> reqwest::ClientBuilder {
        let builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout);
        match self {
            Self::Plaintext => builder,
            Self::Tls(config) => builder.use_preconfigured_tls(ClientConfig::clone(config)),
        }
    }
}

fn load_certificates(
    path: &Path,
    field: &str,
) -> Result<Vec<CertificateDer<'static>>, ShipperError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| {
            ShipperError::config(field, format!("cannot read '{}': {e}", path.display()))
        })?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            ShipperError::config(field, format!("cannot parse '{}': {e}", path.display()))
        })?;
    if certs.is_empty() {
        return Err(ShipperError::config(
            field,
            format!("no certificates found in '{}'", path.display()),
        ));
    }
    Ok(certs)
}

fn load_ca_bundle(path: &Path) -> Result<RootCertStore, ShipperError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(path, "tls.ca_file")? {
        roots
            .add(cert)
            .map_err(|e| ShipperError::config("tls.ca_file", e.to_string()))?;
    }
    debug!(path = %path.display(), count = roots.len(), "loaded CA bundle");
    Ok(roots)
}

fn parse_server_name(name: &str) -> Result<ServerName<'static>, ShipperError> {
    ServerName::try_from(name.to_owned())
        .map_err(|e| ShipperError::config("tls.server_name", format!("'{name}': {e}")))
}

fn load_native_roots() -> Result<RootCertStore, ShipperError> {
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        debug!(error = %err, "failed to load a native root certificate");
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    if added == 0 {
        return Err(ShipperError::config(
            "tls.ca_file",
            "no ca_file given and no usable system root certificates found",
        ));
    }
    debug!(added, ignored, "loaded native root certificates");
    Ok(roots)
}

/// 연결 대상 호스트 대신 설정된 이름으로 서버 인증서를 검증합니다.
#[derive(Debug)]
struct ServerNameOverride {
    name: ServerName<'static>,
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerNameOverride {
    fn new(
        name: ServerName<'static>,
        roots: RootCertStore,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, ShipperError> {
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| ShipperError::config("tls.ca_file", e.to_string()))?;
        Ok(Self { name, inner })
    }
}

impl ServerCertVerifier for ServerNameOverride {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.inner
            .verify_server_cert(end_entity, intermediates, &self.name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// 인증서 체인을 검증하지 않는 verifier (`insecure_skip_verify`)
///
/// 핸드셰이크 서명은 여전히 검증합니다.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
