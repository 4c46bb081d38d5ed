mod cli;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tunnel_core::{EndpointState, StartupError, Supervisor, TlsIdentity};
use tunnel_server::{proxy, tunnel};

use cli::ServerArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    init_tracing(&args.log_level);

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls CryptoProvider"))?;

    #[cfg(feature = "self-signed")]
    if args.generate_self_signed {
        tunnel_core::tls::ensure_self_signed_cert(&args.crt, &args.key)?;
    }

    let identity = TlsIdentity::load(&args.crt, &args.key, &args.crt).map_err(StartupError::Tls)?;
    let acceptor = identity.acceptor().map_err(StartupError::Tls)?;

    let tunnel_addr = SocketAddr::new(args.tunnel_listen_ip, args.tunnel_listen_port);
    let tunnel_listener =
        TcpListener::bind(tunnel_addr)
            .await
            .map_err(|source| StartupError::Bind {
                addr: tunnel_addr,
                source,
            })?;

    let proxy_addr = SocketAddr::new(args.proxy_listen_ip, args.proxy_listen_port);
    let proxy_listener =
        TcpListener::bind(proxy_addr)
            .await
            .map_err(|source| StartupError::Bind {
                addr: proxy_addr,
                source,
            })?;

    let (supervisor, _state_rx) = Supervisor::new();
    let session: tunnel::SharedSession = Arc::new(tokio::sync::Mutex::new(None));

    {
        let supervisor = Arc::clone(&supervisor);
        let session = Arc::clone(&session);
        let idle_timeout = args.idle_timeout;
        supervisor.spawn_closeable(move |stop| {
            tunnel::run(supervisor, tunnel_listener, acceptor, session, idle_timeout, stop)
        });
    }

    {
        let supervisor = Arc::clone(&supervisor);
        let session = Arc::clone(&session);
        supervisor.spawn_closeable(move |stop| proxy::run(supervisor, proxy_listener, session, stop));
    }

    tokio::select! {
        _ = wait_for_shutdown() => {}
        // A fatal listener error drives the supervisor to `Stopped` on its
        // own (§4.2); don't wait on a signal that will never arrive.
        _ = supervisor.wait_until(EndpointState::Stopped) => {}
    }

    info!("stopping");
    supervisor.stop().await;
    let metrics = supervisor.metrics();
    info!(
        bytes_sent = metrics.bytes_sent,
        bytes_received = metrics.bytes_received,
        streams_opened = metrics.streams_opened,
        streams_closed = metrics.streams_closed,
        "stopped"
    );

    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
