//! Shared runtime for both tunnel endpoints: the resource supervisor,
//! the observable state machine, mutual-TLS bootstrap, and the per-stream
//! TCP↔HTTP/2 bridge. `tunnel-server` and `tunnel-client` each build their
//! own accept/dial loop on top of this crate.

pub mod bridge;
pub mod error;
pub mod h2setup;
pub mod state;
pub mod supervisor;
pub mod tls;

pub use bridge::Role;
pub use error::{StartupError, TlsConfigError};
pub use state::EndpointState;
pub use supervisor::{Metrics, Supervisor};
pub use tls::TlsIdentity;
