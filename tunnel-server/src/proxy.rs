//! Public proxy listener (§4.2 point 2): opens one HTTP/2 stream per
//! inbound TCP connection on the active session, or resets it if none
//! exists yet (I2, I5 boundary: "proxy connection before server ready").

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

use tunnel_core::{Role, Supervisor};

use crate::tunnel::SharedSession;

pub async fn run(
    supervisor: Arc<Supervisor>,
    listener: TcpListener,
    session: SharedSession,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((tcp, peer_addr)) => {
                        let supervisor = Arc::clone(&supervisor);
                        let session = Arc::clone(&session);
                        tokio::spawn(async move {
                            if let Err(e) = accept_one(supervisor, session, tcp, peer_addr).await {
                                warn!(peer = %peer_addr, error = %e, "stream error {e}");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "proxy error {e}");
                        let supervisor = Arc::clone(&supervisor);
                        tokio::spawn(async move { supervisor.stop().await; });
                        break;
                    }
                }
            }
        }
    }
}

async fn accept_one(
    supervisor: Arc<Supervisor>,
    session: SharedSession,
    tcp: tokio::net::TcpStream,
    peer_addr: SocketAddr,
) -> anyhow::Result<()> {
    let mut guard = session.lock().await;
    let active = match guard.as_mut() {
        Some(active) => active,
        None => {
            drop(guard);
            info!(peer = %peer_addr, "rejecting connection from {peer_addr}");
            reset_and_destroy(tcp).await;
            return Ok(());
        }
    };

    let request = http::Request::builder()
        .method(http::Method::POST)
        .body(())?;

    let (response_fut, send_stream) = active.send_request.send_request(request, false)?;
    drop(guard);

    let stream_id = supervisor.next_stream_id();
    info!(stream_id, peer = %peer_addr, "stream{stream_id} forwarded from {peer_addr}");

    let response = response_fut.await?;
    let recv_stream = response.into_body();

    tunnel_core::bridge::run(supervisor, tcp, send_stream, recv_stream, stream_id, Role::Server).await;
    Ok(())
}

async fn reset_and_destroy(tcp: tokio::net::TcpStream) {
    if let Err(e) = tcp.set_linger(Some(std::time::Duration::ZERO)) {
        warn!(error = %e, "failed to set SO_LINGER=0 before reset");
    }
    drop(tcp);
}
