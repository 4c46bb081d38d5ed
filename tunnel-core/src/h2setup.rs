//! HTTP/2 session builders shared by both roles.
//!
//! The keepalive PING described in §4.2/§4.3 ("start a keepalive PING
//! timer at interval `timeout/2`; each PING re-arms only after successful
//! ack") is `h2`'s own built-in `keep_alive_interval`/`keep_alive_timeout`
//! machinery rather than a hand-rolled `PingPong` loop: the library already
//! arms a PING on the configured interval, and fails the connection if no
//! ack lands within the timeout, which is exactly the "idle wait" /
//! reconnect trigger §4.3 point 3 describes.

use std::time::Duration;

/// A client-role (§4.2 ServerTunnel) H2 session builder with keepalive
/// armed at `idle_timeout / 2`.
pub fn client_builder(idle_timeout: Duration) -> h2::client::Builder {
    let mut builder = h2::client::Builder::new();
    builder
        .keep_alive_interval(idle_timeout / 2)
        .keep_alive_timeout(idle_timeout)
        .keep_alive_while_idle(true);
    builder
}

/// A server-role (§4.3 ClientTunnel) H2 session builder with keepalive
/// armed at `idle_timeout / 2`.
pub fn server_builder(idle_timeout: Duration) -> h2::server::Builder {
    let mut builder = h2::server::Builder::new();
    builder
        .keep_alive_interval(idle_timeout / 2)
        .keep_alive_timeout(idle_timeout)
        .keep_alive_while_idle(true);
    builder
}
