//! Shared black-box test support: a throwaway mutual-TLS identity pair and
//! a loopback echo service standing in for the "origin" service the
//! tunnel client forwards to. Kept in the crate's own `lib.rs` rather than
//! duplicated per test file, since `tests/*.rs` binaries cannot share code
//! except through a crate they all depend on.

use std::net::SocketAddr;
use std::time::Duration;

use rustls_pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tunnel_core::TlsIdentity;

/// A throwaway self-signed cert/key pair, wrapped into two `TlsIdentity`
/// values (one per endpoint) that both present the same certificate and
/// both trust it — mirroring §6's "single shared self-signed certificate"
/// wire contract.
pub fn identity_pair() -> (TlsIdentity, TlsIdentity) {
    let key_pair = rcgen::KeyPair::generate().expect("keypair");
    let mut params =
        rcgen::CertificateParams::new(vec!["h2tunnel-e2e".to_string()]).expect("params");
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "h2tunnel-e2e");
    let cert = params.self_signed(&key_pair).expect("self-signed cert");
    let cert_der = cert.der().clone();
    let key_der: PrivateKeyDer<'static> =
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let server = TlsIdentity {
        cert_chain: vec![cert_der.clone()],
        key: key_der.clone_key(),
        trusted_peer: cert_der.clone(),
    };
    let client = TlsIdentity {
        cert_chain: vec![cert_der.clone()],
        key: key_der,
        trusted_peer: cert_der,
    };
    (server, client)
}

/// Spawn a loopback TCP echo server standing in for the origin service:
/// every byte read is written back, and a clean FIN from the peer is
/// answered with a clean FIN rather than an RST, so half-close scenarios
/// round-trip correctly.
pub async fn spawn_echo_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind origin");
    let addr = listener.local_addr().expect("origin addr");
    tokio::spawn(async move {
        loop {
            let (mut conn, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match conn.read(&mut buf).await {
                        Ok(0) => {
                            let _ = conn.shutdown().await;
                            return;
                        }
                        Ok(n) => {
                            if conn.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                        Err(_) => return,
                    }
                }
            });
        }
    });
    addr
}

/// Bound on how long a test is willing to wait for a state transition or
/// a read/write before concluding the scenario under test is broken.
pub const WAIT: Duration = Duration::from_secs(5);
