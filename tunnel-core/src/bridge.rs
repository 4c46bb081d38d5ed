//! Per-stream TCP↔HTTP/2 bridge (§4.4): preserves the FIN/RST distinction
//! across HTTP/2's END_STREAM/RST_STREAM, including half-close.
//!
//! One bridge owns exactly one `(TcpStream, h2 stream)` pair for its
//! whole lifetime. It never buffers independently (§5 backpressure):
//! each direction is a plain read-then-write loop, so a full H2 send
//! window or a full TCP send buffer simply pauses the opposite read.

use std::sync::Arc;

use bytes::Bytes;
use h2::{Reason, RecvStream, SendStream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::supervisor::Supervisor;

const READ_CHUNK: usize = 16 * 1024;

/// Which side of the tunnel this bridge runs on; only affects nothing in
/// the bridging logic itself (the state table in §4.4 is symmetric) but
/// is threaded through for the `stream<N> forwarded/forwarding` log line
/// each side emits on stream creation.
#[derive(Clone, Copy, Debug)]
pub enum Role {
    Server,
    Client,
}

/// Run one bridge to completion. `stream_id` is the purely observational
/// counter from §3 (`streamCounter`), used only for log correlation.
///
/// Returns once both directions have reached a terminal state (clean end
/// or error) and the paired resources have been told to release.
pub async fn run(
    supervisor: Arc<Supervisor>,
    tcp: TcpStream,
    send_stream: SendStream<Bytes>,
    recv_stream: RecvStream,
    stream_id: u64,
    role: Role,
) {
    supervisor.track_stream(stream_id);
    bridge_loop(&supervisor, tcp, send_stream, recv_stream, stream_id, role).await;
    supervisor.untrack_stream(stream_id);
    info!(stream_id, role = ?role, "stream{stream_id} closed");
}

async fn bridge_loop(
    supervisor: &Arc<Supervisor>,
    tcp: TcpStream,
    mut send_stream: SendStream<Bytes>,
    mut recv_stream: RecvStream,
    stream_id: u64,
    _role: Role,
) {
    let (mut tcp_read, mut tcp_write) = tcp.into_split();

    // `None` once that half has reached a terminal state and must not be
    // touched again (§4.4 state table: "close — noop").
    let mut tcp_read_open = true;
    let mut h2_read_open = true;
    let mut tcp_write_open = true; // FIN not yet sent on the TCP side
    let mut h2_write_open = true; // END_STREAM not yet sent on the H2 side
    // Set once the TCP side itself produced the error, so a resulting H2
    // reset (the local consequence, §4.4 "error source disambiguation")
    // is not logged as an inbound RST.
    let mut tcp_caused_error = false;
    // Set when the H2 side reported an error while the TCP side was
    // still alive; handled after the select block so the move out of
    // `tcp_read`/`tcp_write` (via `reunite`) doesn't fight their mutable
    // borrows held by the still-pending sibling branch's future.
    let mut pending_reset = false;

    let mut buf = vec![0u8; READ_CHUNK];

    while tcp_read_open || h2_read_open {
        tokio::select! {
            res = tcp_read.read(&mut buf), if tcp_read_open => {
                match res {
                    Ok(0) => {
                        tcp_read_open = false;
                        if h2_write_open {
                            let _ = send_stream.send_data(Bytes::new(), true);
                            h2_write_open = false;
                        }
                        info_send(stream_id, "FIN");
                    }
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        info_send(stream_id, &n.to_string());
                        supervisor.record_sent(n as u64);
                        if h2_write_open {
                            if let Err(e) = send_stream.send_data(chunk, false) {
                                warn!(stream_id, error = %e, "stream{stream_id} error {e}");
                                tcp_read_open = false;
                                h2_write_open = false;
                            }
                        }
                    }
                    Err(e) => {
                        tcp_read_open = false;
                        tcp_caused_error = true;
                        if h2_write_open {
                            send_stream.send_reset(Reason::CANCEL);
                            h2_write_open = false;
                        }
                        info_send(stream_id, "RST");
                        let _ = e;
                    }
                }
            }
            data = recv_stream.data(), if h2_read_open => {
                match data {
                    Some(Ok(chunk)) => {
                        let _ = recv_stream.flow_control().release_capacity(chunk.len());
                        info_recv(stream_id, &chunk.len().to_string());
                        supervisor.record_received(chunk.len() as u64);
                        if tcp_write_open {
                            if tcp_write.write_all(&chunk).await.is_err() {
                                tcp_write_open = false;
                                h2_read_open = false;
                                if h2_write_open {
                                    send_stream.send_reset(Reason::CANCEL);
                                    h2_write_open = false;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        h2_read_open = false;
                        if tcp_write_open {
                            if !tcp_caused_error {
                                info_recv(stream_id, "RST");
                            }
                            pending_reset = true;
                            tcp_write_open = false;
                            tcp_read_open = false;
                        }
                        let _ = e;
                    }
                    None => {
                        h2_read_open = false;
                        if tcp_write_open {
                            let _ = tcp_write.shutdown().await;
                            tcp_write_open = false;
                        }
                        info_recv(stream_id, "FIN");
                    }
                }
            }
        }

        if pending_reset {
            break;
        }
    }

    if pending_reset {
        reset_and_destroy(tcp_read.reunite(tcp_write).ok()).await;
    }
}

/// Send a TCP RST rather than a clean FIN, by forcing `SO_LINGER(0)`
/// before the socket drops (§4.4 "if the alive side is the TCP socket,
/// apply `resetAndDestroy`").
async fn reset_and_destroy(tcp: Option<TcpStream>) {
    if let Some(tcp) = tcp {
        if let Err(e) = tcp.set_linger(Some(std::time::Duration::ZERO)) {
            warn!(error = %e, "failed to set SO_LINGER=0 before reset");
        }
        drop(tcp);
    }
}

fn info_send(stream_id: u64, what: &str) {
    tracing::info!("stream{stream_id} send {what}");
}

fn info_recv(stream_id: u64, what: &str) {
    tracing::info!("stream{stream_id} recv {what}");
}
