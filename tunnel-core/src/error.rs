//! Error taxonomy for the tunnel runtime.
//!
//! Mirrors the split the teacher uses between typed, local errors
//! (`ProtocolError` in `tunnel/protocol.rs`) and the `anyhow` boundary at
//! the process entry point: everything that can be handled locally (a
//! stream reset, a bad cert) gets a variant here; `main.rs` flattens
//! whatever is left into `anyhow::Error`.

use std::net::SocketAddr;

/// Fatal, start-up-time failures. The CLI maps these to a non-zero exit.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TLS identity: {0}")]
    Tls(#[source] TlsConfigError),
}

/// Errors loading or constructing TLS material.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificate found in {0}")]
    NoCertificate(String),
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}
