//! Public-facing side of the tunnel: the mutual-TLS tunnel listener
//! (hosting the HTTP/2 client role) and the proxy listener that bridges
//! public TCP connections onto it. Split out as a library so integration
//! tests can drive both endpoints of a tunnel in one process.

pub mod proxy;
pub mod tunnel;
