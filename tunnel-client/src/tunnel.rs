//! Tunnel dialer (§4.3): dials the mutual-TLS tunnel, hosts the HTTP/2
//! *server* role over it, dials the origin on every inbound stream, and
//! reconnects after `restart_timeout` while not aborted (I7).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use h2::Reason;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_rustls::TlsConnector;
use tracing::{info, warn};

use tunnel_core::{EndpointState, Role, Supervisor};

pub struct Params {
    pub tunnel_host: String,
    pub tunnel_port: u16,
    pub origin_host: String,
    pub origin_port: u16,
    pub idle_timeout: Duration,
    pub restart_timeout: Duration,
}

pub async fn run(
    supervisor: Arc<Supervisor>,
    connector: TlsConnector,
    params: Params,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        info!("connecting");

        let outcome = tokio::select! {
            _ = &mut stop => return,
            res = dial_and_serve(&supervisor, &connector, &params, &mut stop) => res,
        };

        if let Err(e) = outcome {
            warn!(error = %e, "tunnel error {e}");
        }

        if supervisor.state() == EndpointState::Connected {
            info!("disconnected");
        }
        supervisor.set_state(EndpointState::Disconnected);

        if supervisor.is_aborted() {
            return;
        }

        info!("restarting");
        let (fire_tx, fire_rx) = oneshot::channel();
        let timer_id = supervisor.schedule(params.restart_timeout, move || async move {
            let _ = fire_tx.send(());
        });
        tokio::select! {
            _ = &mut stop => {
                supervisor.cancel_timer(timer_id);
                return;
            }
            _ = fire_rx => {}
        }
    }
}

async fn dial_and_serve(
    supervisor: &Arc<Supervisor>,
    connector: &TlsConnector,
    params: &Params,
    stop: &mut oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let tcp = TcpStream::connect((params.tunnel_host.as_str(), params.tunnel_port)).await?;
    tcp.set_nodelay(true)?;
    let local_addr = tcp.local_addr()?;
    let remote_addr = tcp.peer_addr()?;

    let server_name = ServerName::try_from(params.tunnel_host.clone())
        .map_err(|_| anyhow::anyhow!("invalid tunnel host name"))?;
    let tls_stream = connector.connect(server_name, tcp).await?;

    let mut connection = tunnel_core::h2setup::server_builder(params.idle_timeout)
        .handshake(tls_stream)
        .await?;

    supervisor.set_state(EndpointState::Connected);
    info!(remote = %remote_addr, local = %local_addr, "connected to {remote_addr} from {local_addr}");

    loop {
        tokio::select! {
            _ = &mut *stop => return Ok(()),
            next = connection.accept() => {
                match next {
                    Some(Ok((request, mut send_response))) => {
                        let (_, recv_stream) = request.into_parts();
                        let response = http::Response::builder()
                            .status(http::StatusCode::OK)
                            .body(())?;
                        let send_stream = send_response.send_response(response, false)?;
                        spawn_origin_bridge(Arc::clone(supervisor), params, send_stream, recv_stream);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                }
            }
        }
    }
}

fn spawn_origin_bridge(
    supervisor: Arc<Supervisor>,
    params: &Params,
    mut send_stream: h2::SendStream<Bytes>,
    recv_stream: h2::RecvStream,
) {
    let stream_id = supervisor.next_stream_id();
    let origin_host = params.origin_host.clone();
    let origin_port = params.origin_port;

    tokio::spawn(async move {
        info!(stream_id, host = %origin_host, port = origin_port, "stream{stream_id} forwarding to {origin_host}:{origin_port}");
        match TcpStream::connect((origin_host.as_str(), origin_port)).await {
            Ok(tcp) => {
                let _ = tcp.set_nodelay(true);
                tunnel_core::bridge::run(supervisor, tcp, send_stream, recv_stream, stream_id, Role::Client).await;
            }
            Err(e) => {
                warn!(stream_id, error = %e, "stream{stream_id} error {e}");
                send_stream.send_reset(Reason::CANCEL);
            }
        }
    });
}
