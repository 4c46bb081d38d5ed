//! TLS bootstrap: load the endpoint's PEM identity, and build acceptors
//! and connectors that pin the peer to a single trusted certificate
//! (§6: "the same key/cert pair is the endpoint identity and the sole
//! trust anchor on both sides... identity is proved by certificate-
//! equality against the pinned pair").
//!
//! Cert/key loading follows the teacher's `proxy/tls.rs`
//! (`rustls_pemfile` over a `BufReader`, PEM errors folded into one
//! `TlsConfigError`); the pinned-equality verifiers below are new, since
//! the teacher terminates plain server-only TLS and never does mutual
//! auth.

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::TlsConfigError;

/// A loaded PEM identity: the endpoint's own certificate chain and
/// private key, plus the single peer certificate it trusts.
pub struct TlsIdentity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
    pub trusted_peer: CertificateDer<'static>,
}

impl TlsIdentity {
    pub fn load(
        cert_path: &Path,
        key_path: &Path,
        trusted_peer_path: &Path,
    ) -> Result<Self, TlsConfigError> {
        let cert_chain = read_certs(cert_path)?;
        let key = read_private_key(key_path)?;
        let trusted_peer = read_certs(trusted_peer_path)?
            .into_iter()
            .next()
            .ok_or_else(|| TlsConfigError::NoCertificate(trusted_peer_path.display().to_string()))?;
        Ok(Self {
            cert_chain,
            key,
            trusted_peer,
        })
    }

    /// Build a `TlsAcceptor` requiring the client to present exactly the
    /// pinned certificate. Used by `ServerTunnel`'s tunnel listener.
    pub fn acceptor(&self) -> Result<TlsAcceptor, TlsConfigError> {
        let verifier = Arc::new(PinnedClientVerifier::new(self.trusted_peer.clone()));
        let config = rustls::ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }

    /// Build a `TlsConnector` that pins the server to the trusted peer
    /// certificate and disables server-name verification (§6). Used by
    /// `ClientTunnel` to dial the tunnel.
    pub fn connector(&self) -> Result<TlsConnector, TlsConfigError> {
        let verifier = Arc::new(PinnedServerVerifier::new(self.trusted_peer.clone()));
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_client_auth_cert(self.cert_chain.clone(), self.key.clone_key())
            .map_err(TlsConfigError::Rustls)?;
        Ok(TlsConnector::from(Arc::new(config)))
    }
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let file = fs::File::open(path).map_err(|source| TlsConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|source| TlsConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsConfigError::NoCertificate(path.display().to_string()));
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsConfigError> {
    let file = fs::File::open(path).map_err(|source| TlsConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| TlsConfigError::Read {
            path: path.display().to_string(),
            source,
        })?
        .ok_or_else(|| TlsConfigError::NoPrivateKey(path.display().to_string()))
}

/// Verifies the server's certificate is byte-for-byte the pinned peer
/// certificate. Server name indication is not checked (§6).
#[derive(Debug)]
struct PinnedServerVerifier {
    trusted: CertificateDer<'static>,
    provider: CryptoProvider,
}

impl PinnedServerVerifier {
    fn new(trusted: CertificateDer<'static>) -> Self {
        Self {
            trusted,
            provider: rustls::crypto::ring::default_provider(),
        }
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.trusted.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "peer certificate does not match the pinned tunnel certificate".into(),
            ))
        }
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

/// Verifies the client's certificate is byte-for-byte the pinned peer
/// certificate, without delegating to a root store or name checks.
#[derive(Debug)]
struct PinnedClientVerifier {
    trusted: CertificateDer<'static>,
    provider: CryptoProvider,
}

impl PinnedClientVerifier {
    fn new(trusted: CertificateDer<'static>) -> Self {
        Self {
            trusted,
            provider: rustls::crypto::ring::default_provider(),
        }
    }
}

impl ClientCertVerifier for PinnedClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.trusted.as_ref() {
            Ok(ClientCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "peer certificate does not match the pinned tunnel certificate".into(),
            ))
        }
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

/// Compute the SHA-256 fingerprint of a PEM-encoded certificate (used by
/// `--print-fingerprint` tooling, not by the handshake itself).
pub fn cert_sha256_fingerprint(cert_path: &Path) -> Result<String, TlsConfigError> {
    use sha2::{Digest, Sha256};
    let certs = read_certs(cert_path)?;
    let digest = Sha256::digest(certs[0].as_ref());
    Ok(hex::encode(digest))
}

#[cfg(feature = "self-signed")]
/// Generate a throwaway self-signed certificate/key pair if the files do
/// not already exist. Mirrors the teacher's
/// `proxy/tls.rs::ensure_self_signed_cert`; gated behind the
/// `self-signed` feature so it never ships in a default build and never
/// silently replaces a production identity.
pub fn ensure_self_signed_cert(cert_path: &Path, key_path: &Path) -> anyhow::Result<()> {
    if cert_path.exists() && key_path.exists() {
        return Ok(());
    }

    let key_pair = rcgen::KeyPair::generate()?;
    let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()])?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "h2tunnel");
    let cert = params.self_signed(&key_pair)?;

    fs::write(cert_path, cert.pem())?;
    fs::write(key_path, key_pair.serialize_pem())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throwaway_cert(common_name: &str) -> CertificateDer<'static> {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec![common_name.to_string()]).unwrap();
        params.distinguished_name = rcgen::DistinguishedName::new();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, common_name);
        let cert = params.self_signed(&key_pair).unwrap();
        cert.der().clone()
    }

    #[test]
    fn server_verifier_accepts_only_the_pinned_cert() {
        let trusted = throwaway_cert("h2tunnel");
        let other = throwaway_cert("not-h2tunnel");
        let verifier = PinnedServerVerifier::new(trusted.clone());

        let server_name = ServerName::try_from("ignored.example").unwrap();
        let now = UnixTime::now();

        assert!(verifier
            .verify_server_cert(&trusted, &[], &server_name, &[], now)
            .is_ok());
        assert!(verifier
            .verify_server_cert(&other, &[], &server_name, &[], now)
            .is_err());
    }

    #[test]
    fn client_verifier_accepts_only_the_pinned_cert() {
        let trusted = throwaway_cert("h2tunnel");
        let other = throwaway_cert("not-h2tunnel");
        let verifier = PinnedClientVerifier::new(trusted.clone());

        let now = UnixTime::now();

        assert!(verifier.verify_client_cert(&trusted, &[], now).is_ok());
        assert!(verifier.verify_client_cert(&other, &[], now).is_err());
        assert!(verifier.client_auth_mandatory());
    }
}
