//! TLS settings for probe clients and certificate inspection.
//!
//! # Design Decisions
//! - The rustls client config is built here and handed to reqwest as a
//!   preconfigured backend, so the verifier sees the full peer chain
//! - Every handshake records the presented chain; the probe reports the
//!   earliest `notAfter` across leaf and intermediates

use std::fs;
use std::sync::{Arc, Mutex};

use reqwest::ClientBuilder;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::config::schema::{TlsConfig, TlsVersion};

#[derive(Debug, thiserror::Error)]
pub enum TlsSetupError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("loading {what}: {reason}")]
    Load { what: &'static str, reason: String },

    #[error("cert_file and key_file must be configured together")]
    IncompleteIdentity,

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

fn read(path: &std::path::Path) -> Result<Vec<u8>, TlsSetupError> {
    fs::read(path).map_err(|source| TlsSetupError::Read {
        path: path.display().to_string(),
        source,
    })
}

fn pem_certs(pem: &[u8], what: &'static str) -> Result<Vec<CertificateDer<'static>>, TlsSetupError> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsSetupError::Load {
            what,
            reason: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TlsSetupError::Load {
            what,
            reason: "no certificates found".to_string(),
        });
    }
    Ok(certs)
}

/// Certificates presented by the peer in the most recent handshake.
#[derive(Debug, Clone, Default)]
pub struct PeerChain(Arc<Mutex<Vec<CertificateDer<'static>>>>);

impl PeerChain {
    fn record(&self, end_entity: &CertificateDer<'_>, intermediates: &[CertificateDer<'_>]) {
        let chain = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|cert| cert.clone().into_owned())
            .collect();
        if let Ok(mut slot) = self.0.lock() {
            *slot = chain;
        }
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|chain| chain.len()).unwrap_or(0)
    }

    /// Earliest expiry over the whole chain as a Unix timestamp.
    pub fn earliest_expiry(&self) -> Option<f64> {
        let chain = self.0.lock().ok()?;
        chain
            .iter()
            .filter_map(|cert| certificate_expiry(cert))
            .min_by(|a, b| a.total_cmp(b))
    }
}

/// Delegates verification and keeps a copy of what the peer sent.
#[derive(Debug)]
struct RecordingVerifier {
    inner: Arc<dyn ServerCertVerifier>,
    chain: PeerChain,
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.chain.record(end_entity, intermediates);
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
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

/// `insecure_skip_verify`: any chain is accepted, signatures are still checked.
#[derive(Debug)]
struct SkipChainVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipChainVerification {
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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn root_store(config: &TlsConfig) -> Result<RootCertStore, TlsSetupError> {
    let mut roots = RootCertStore::empty();
    match &config.ca_file {
        Some(ca_file) => {
            for cert in pem_certs(&read(ca_file)?, "CA bundle")? {
                roots.add(cert)?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(roots)
}

fn server_verifier(
    config: &TlsConfig,
    provider: &Arc<CryptoProvider>,
) -> Result<Arc<dyn ServerCertVerifier>, TlsSetupError> {
    if config.insecure_skip_verify {
        return Ok(Arc::new(SkipChainVerification(provider.clone())));
    }
    let verifier =
        WebPkiServerVerifier::builder_with_provider(Arc::new(root_store(config)?), provider.clone())
            .build()
            .map_err(|e| TlsSetupError::Load {
                what: "certificate verifier",
                reason: e.to_string(),
            })?;
    Ok(verifier)
}

fn client_identity(
    config: &TlsConfig,
) -> Result<Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>, TlsSetupError> {
    match (&config.cert_file, &config.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let certs = pem_certs(&read(cert_file)?, "client certificate")?;
            let key = rustls_pemfile::private_key(&mut &read(key_file)?[..])
                .map_err(|e| TlsSetupError::Load {
                    what: "client key",
                    reason: e.to_string(),
                })?
                .ok_or_else(|| TlsSetupError::Load {
                    what: "client key",
                    reason: "no private key found".to_string(),
                })?;
            Ok(Some((certs, key)))
        }
        (None, None) => Ok(None),
        _ => Err(TlsSetupError::IncompleteIdentity),
    }
}

/// Build the rustls client config for `config`, recording peer chains into `chain`.
pub fn client_tls_config(
    config: &TlsConfig,
    chain: PeerChain,
) -> Result<ClientConfig, TlsSetupError> {
    let provider = Arc::new(ring::default_provider());
    let versions: &[&'static rustls::SupportedProtocolVersion] = match config.min_version {
        Some(TlsVersion::Tls13) => &[&rustls::version::TLS13],
        Some(TlsVersion::Tls12) | None => &[&rustls::version::TLS13, &rustls::version::TLS12],
    };

    let verifier = RecordingVerifier {
        inner: server_verifier(config, &provider)?,
        chain,
    };
    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(versions)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier));

    let mut tls = match client_identity(config)? {
        Some((certs, key)) => builder.with_client_auth_cert(certs, key)?,
        None => builder.with_no_client_auth(),
    };
    tls.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(tls)
}

/// Apply `config` to a client builder. The returned chain fills in as
/// handshakes complete.
pub fn apply_tls_config(
    builder: ClientBuilder,
    config: &TlsConfig,
) -> Result<(ClientBuilder, PeerChain), TlsSetupError> {
    let chain = PeerChain::default();
    let tls = client_tls_config(config, chain.clone())?;
    Ok((builder.use_preconfigured_tls(tls), chain))
}

/// Expiry (`notAfter`) of a DER certificate as a Unix timestamp.
pub fn certificate_expiry(der: &[u8]) -> Option<f64> {
    match x509_parser::parse_x509_certificate(der) {
        Ok((_, cert)) => Some(cert.validity().not_after.timestamp() as f64),
        Err(e) => {
            tracing::debug!(error = %e, "Could not parse peer certificate");
            None
        }
    }
}
