//! TLS contexts and trust configuration
//!
//! One `rustls::ClientConfig` per pinnable protocol version, built once at
//! engine construction and shared read-only by every session. The
//! handshake itself never fails on an untrusted certificate: a
//! deferred-verification verifier accepts the chain so that the engine can
//! inspect it *after* the handshake and run the certificate gate
//! (trust-store verification, then the pinning file, then the prompt).
//! With the `certificates` option off the gate is skipped entirely.

use crate::error::{Error, Result};
use crate::options::EngineOptions;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::str::FromStr;
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// TLS protocol version requested for an implicit-TLS connection.
///
/// `Auto` negotiates the best version both sides support. The pre-TLS-1.2
/// variants exist so configurations naming them fail with a clear error
/// instead of silently negotiating something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "ssl3")]
    Ssl3,
    #[serde(rename = "tls1")]
    Tls1,
    #[serde(rename = "tls1.1")]
    Tls11,
    #[serde(rename = "tls1.2")]
    Tls12,
    #[serde(rename = "tls1.3")]
    Tls13,
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Ssl3 => "ssl3",
            Self::Tls1 => "tls1",
            Self::Tls11 => "tls1.1",
            Self::Tls12 => "tls1.2",
            Self::Tls13 => "tls1.3",
        })
    }
}

impl FromStr for TlsVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "ssl3" => Ok(Self::Ssl3),
            "tls1" => Ok(Self::Tls1),
            "tls1.1" => Ok(Self::Tls11),
            "tls1.2" => Ok(Self::Tls12),
            "tls1.3" => Ok(Self::Tls13),
            other => Err(Error::Config(format!("invalid TLS protocol: {other}"))),
        }
    }
}

/// Shared TLS state: client configs per version choice plus the real
/// verifier used by the certificate gate.
pub(crate) struct TlsSettings {
    auto: Arc<ClientConfig>,
    tls12: Arc<ClientConfig>,
    tls13: Arc<ClientConfig>,
    verifier: Option<Arc<WebPkiServerVerifier>>,
}

impl TlsSettings {
    pub(crate) fn new(options: &EngineOptions) -> Result<Self> {
        // Multiple engines may race to install the provider; losing the
        // race is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let roots = Arc::new(load_roots(options));
        let verifier = if roots.is_empty() {
            warn!("no TLS trust roots available; relying on pinned certificates");
            None
        } else {
            match WebPkiServerVerifier::builder(roots).build() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("trust store unusable: {e}");
                    None
                }
            }
        };

        let deferred: Arc<dyn ServerCertVerifier> = Arc::new(DeferredVerifier);
        let versions_auto = rustls::DEFAULT_VERSIONS;
        let versions_12 = &[&rustls::version::TLS12][..];
        let versions_13 = &[&rustls::version::TLS13][..];

        Ok(Self {
            auto: config_for(versions_auto, &deferred)?,
            tls12: config_for(versions_12, &deferred)?,
            tls13: config_for(versions_13, &deferred)?,
            verifier,
        })
    }

    /// A connector for the requested protocol version.
    pub(crate) fn connector(&self, version: Option<TlsVersion>) -> Result<TlsConnector> {
        let config = match version.unwrap_or(TlsVersion::Auto) {
            TlsVersion::Auto => &self.auto,
            TlsVersion::Tls12 => &self.tls12,
            TlsVersion::Tls13 => &self.tls13,
            old @ (TlsVersion::Ssl3 | TlsVersion::Tls1 | TlsVersion::Tls11) => {
                return Err(Error::Tls(format!(
                    "protocol version {old} not supported by current build"
                )));
            }
        };
        Ok(TlsConnector::from(Arc::clone(config)))
    }

    /// Verify a handshake's certificate chain against the trust roots,
    /// including hostname matching.
    pub(crate) fn verify_chain(
        &self,
        chain: &[CertificateDer<'static>],
        server: &str,
    ) -> Result<()> {
        let Some(verifier) = &self.verifier else {
            return Err(Error::Certificate("no trust roots available".into()));
        };
        let Some((end_entity, intermediates)) = chain.split_first() else {
            return Err(Error::Certificate(
                "server presented no certificate".into(),
            ));
        };
        let name = ServerName::try_from(server.to_string())
            .map_err(|e| Error::Tls(format!("invalid server name {server}: {e}")))?;
        verifier
            .verify_server_cert(end_entity, intermediates, &name, &[], UnixTime::now())
            .map(|_| ())
            .map_err(|e| Error::Certificate(e.to_string()))
    }
}

fn config_for(
    versions: &[&'static rustls::SupportedProtocolVersion],
    verifier: &Arc<dyn ServerCertVerifier>,
) -> Result<Arc<ClientConfig>> {
    let config = ClientConfig::builder_with_protocol_versions(versions)
        .dangerous()
        .with_custom_certificate_verifier(Arc::clone(verifier))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// System trust store plus the user's optional PEM bundle. Load failures
/// degrade to an empty store; the certificate gate then only accepts
/// pinned certificates.
fn load_roots(options: &EngineOptions) -> RootCertStore {
    let mut roots = RootCertStore::empty();

    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let (added, ignored) = roots.add_parsable_certificates(certs);
            debug!("loaded {added} trust roots ({ignored} ignored)");
        }
        Err(e) => warn!("failed loading system trust store: {e}"),
    }

    if let Some(path) = &options.ca_bundle {
        match File::open(path) {
            Ok(file) => {
                let mut reader = BufReader::new(file);
                let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
                    .filter_map(std::result::Result::ok)
                    .collect();
                let (added, ignored) = roots.add_parsable_certificates(certs);
                debug!(
                    "loaded {added} trust roots from {} ({ignored} ignored)",
                    path.display()
                );
            }
            Err(e) => warn!("failed reading CA bundle {}: {e}", path.display()),
        }
    }

    roots
}

/// Certificate verifier that accepts every handshake.
///
/// Verification is not skipped -- it is deferred: the engine re-checks
/// the captured chain with the webpki verifier after the handshake and
/// runs the pinning gate when that fails. Failing inside the handshake
/// would make pinned self-signed certificates unusable.
#[derive(Debug)]
struct DeferredVerifier;

impl ServerCertVerifier for DeferredVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
