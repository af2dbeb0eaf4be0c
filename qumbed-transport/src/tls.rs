//! TLS identity and verification policy.
//!
//! Listeners present a certificate; dialers either verify it against a root
//! store (production) or skip verification entirely (development, where
//! certificates are self-signed).

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::endpoint::KEEP_ALIVE_INTERVAL;
use crate::error::TransportError;

/// ALPN identifier spoken by every Qumbed endpoint.
pub const ALPN: &[u8] = b"qumbed/1";

/// Client-side trust policy when dialing.
#[derive(Clone, Debug)]
pub enum TlsMode {
    /// Development: accept any server certificate. Only safe on networks you
    /// control.
    Dev,
    /// Production: the server certificate must chain to one of these roots.
    Production(Arc<RootCertStore>),
}

/// Supplies the certificate identity for a listener and the trust policy for
/// dialing out.
pub trait TlsIdentityProvider: Send + Sync {
    /// Certificate chain and private key the listener presents.
    fn server_identity(
        &self,
    ) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TransportError>;

    /// Trust policy used when this endpoint dials.
    fn mode(&self) -> TlsMode;
}

/// Development identity: a fresh self-signed certificate per listener, and
/// no certificate verification when dialing.
#[derive(Debug, Default)]
pub struct DevIdentity;

impl TlsIdentityProvider for DevIdentity {
    fn server_identity(
        &self,
    ) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TransportError> {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
                .map_err(|e| TransportError::Tls(e.to_string()))?;
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        Ok((vec![cert.der().clone()], key))
    }

    fn mode(&self) -> TlsMode {
        TlsMode::Dev
    }
}

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

pub(crate) fn server_config(
    identity: &dyn TlsIdentityProvider,
    idle_timeout: Duration,
) -> Result<quinn::ServerConfig, TransportError> {
    let (certs, key) = identity.server_identity()?;
    let mut tls = rustls::ServerConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let quic_tls = quinn::crypto::rustls::QuicServerConfig::try_from(tls)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    let mut config = quinn::ServerConfig::with_crypto(Arc::new(quic_tls));
    config.transport_config(Arc::new(transport_config(idle_timeout)?));
    Ok(config)
}

pub(crate) fn client_config(
    mode: &TlsMode,
    idle_timeout: Duration,
) -> Result<quinn::ClientConfig, TransportError> {
    let builder = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    let mut tls = match mode {
        TlsMode::Dev => builder
            .dangerous()
            .with_custom_certificate_verifier(SkipServerVerification::new())
            .with_no_client_auth(),
        TlsMode::Production(roots) => builder
            .with_root_certificates(roots.as_ref().clone())
            .with_no_client_auth(),
    };
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(tls)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    let mut config = quinn::ClientConfig::new(Arc::new(quic_tls));
    config.transport_config(Arc::new(transport_config(idle_timeout)?));
    Ok(config)
}

fn transport_config(idle_timeout: Duration) -> Result<quinn::TransportConfig, TransportError> {
    let idle = quinn::IdleTimeout::try_from(idle_timeout)
        .map_err(|e| TransportError::Tls(format!("invalid idle timeout: {e}")))?;
    let mut config = quinn::TransportConfig::default();
    config.max_idle_timeout(Some(idle));
    config.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL));
    Ok(config)
}

/// Certificate verifier that accepts anything. Development only; signatures
/// are still checked so a broken handshake fails loudly.
#[derive(Debug)]
struct SkipServerVerification(Arc<rustls::crypto::CryptoProvider>);

impl SkipServerVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self(crypto_provider()))
    }
}

impl ServerCertVerifier for SkipServerVerification {
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
