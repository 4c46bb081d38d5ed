mod cli;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tunnel_core::{StartupError, Supervisor, TlsIdentity};
use tunnel_client::tunnel;

use cli::ClientArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ClientArgs::parse();
    init_tracing(&args.log_level);

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls CryptoProvider"))?;

    #[cfg(feature = "self-signed")]
    if args.generate_self_signed {
        tunnel_core::tls::ensure_self_signed_cert(&args.crt, &args.key)?;
    }

    let identity = TlsIdentity::load(&args.crt, &args.key, &args.crt)
        .map_err(StartupError::Tls)?;
    let connector = identity.connector().map_err(StartupError::Tls)?;

    let (supervisor, _state_rx) = Supervisor::new();

    let params = tunnel::Params {
        tunnel_host: args.tunnel_host.clone(),
        tunnel_port: args.tunnel_port,
        origin_host: args.origin_host.clone(),
        origin_port: args.origin_port,
        idle_timeout: args.idle_timeout,
        restart_timeout: args.restart_timeout,
    };

    {
        let supervisor = std::sync::Arc::clone(&supervisor);
        supervisor.spawn_closeable(move |stop| tunnel::run(supervisor, connector, params, stop));
    }

    wait_for_shutdown().await;

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
