//! Behind-NAT side of the tunnel: dials the mutual-TLS tunnel, hosts the
//! HTTP/2 server role, and forwards inbound streams to the loopback
//! origin. Split out as a library so integration tests can drive both
//! endpoints of a tunnel in one process.

pub mod tunnel;
