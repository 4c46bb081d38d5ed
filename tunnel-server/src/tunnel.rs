//! Tunnel TLS listener (§4.2 point 1): accepts the mutual-TLS tunnel,
//! hosts the HTTP/2 *client* role over it, and applies latest-wins
//! preemption when a second tunnel connects.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use tunnel_core::{EndpointState, Supervisor};

/// The one live tunnel's HTTP/2 client handle, shared with the proxy
/// listener so it can open new streams on it.
pub struct ActiveSession {
    pub send_request: h2::client::SendRequest<Bytes>,
    pub generation: u64,
    kill: oneshot::Sender<()>,
}

pub type SharedSession = Arc<Mutex<Option<ActiveSession>>>;

pub async fn run(
    supervisor: Arc<Supervisor>,
    listener: TcpListener,
    acceptor: TlsAcceptor,
    session: SharedSession,
    idle_timeout: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    supervisor.set_state(EndpointState::Listening);
    info!("listening");

    loop {
        tokio::select! {
            _ = &mut stop => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((tcp, peer_addr)) => {
                        let supervisor = Arc::clone(&supervisor);
                        let acceptor = acceptor.clone();
                        let session = Arc::clone(&session);
                        tokio::spawn(async move {
                            if let Err(e) =
                                accept_one(supervisor, acceptor, session, tcp, peer_addr, idle_timeout).await
                            {
                                warn!(peer = %peer_addr, error = %e, "tunnel error {e}");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "tunnel error {e}");
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
    acceptor: TlsAcceptor,
    session: SharedSession,
    tcp: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    idle_timeout: Duration,
) -> anyhow::Result<()> {
    let local_addr = tcp.local_addr()?;
    let tls_stream = acceptor.accept(tcp).await?;

    let (send_request, connection) = tunnel_core::h2setup::client_builder(idle_timeout)
        .handshake(tls_stream)
        .await?;

    let (kill_tx, kill_rx) = oneshot::channel();
    let generation = supervisor.begin_session();

    let sup = Arc::clone(&supervisor);
    supervisor.spawn_destroyable(move |stop_rx| async move {
        let mut stop_rx = stop_rx;
        let mut kill_rx = kill_rx;
        tokio::pin!(connection);
        tokio::select! {
            res = &mut connection => {
                if let Err(e) = res {
                    debug!(error = %e, "h2 error {e}");
                }
            }
            _ = &mut stop_rx => {}
            _ = &mut kill_rx => {}
        }
        sup.end_session(generation);
    });

    let mut send_request = send_request;
    send_request.ready().await?;

    // Latest wins (§4.5): preempt whatever tunnel was previously active
    // before installing the new one. The close cascade (dropping the old
    // connection task via its kill switch) tears down its H2 session and
    // every live stream before this new session is observable.
    let previous = session.lock().await.take();
    if let Some(prev) = previous {
        let _ = prev.kill.send(());
        info!("disconnected");
        supervisor.set_state(EndpointState::Disconnected);
    }

    *session.lock().await = Some(ActiveSession {
        send_request,
        generation,
        kill: kill_tx,
    });

    supervisor.set_state(EndpointState::Connected);
    info!(local = %local_addr, remote = %peer_addr, "connected to {local_addr} from {peer_addr}");

    Ok(())
}
