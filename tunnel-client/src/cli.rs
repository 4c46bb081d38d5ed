use std::path::PathBuf;

use clap::Parser;

/// Behind-NAT side of the tunnel: dials the mutual-TLS tunnel and
/// forwards each inbound HTTP/2 stream to the loopback origin service.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct ClientArgs {
    /// This endpoint's certificate (PEM), also used as the sole trust
    /// anchor for the peer's certificate.
    #[arg(long)]
    pub crt: PathBuf,

    /// This endpoint's private key (PEM).
    #[arg(long)]
    pub key: PathBuf,

    /// Host of the tunnel server to dial.
    #[arg(long)]
    pub tunnel_host: String,

    /// Port of the tunnel server to dial.
    #[arg(long, default_value_t = 15900)]
    pub tunnel_port: u16,

    /// Host of the loopback origin service to forward to.
    #[arg(long, default_value = "localhost")]
    pub origin_host: String,

    /// Port of the loopback origin service to forward to.
    #[arg(long)]
    pub origin_port: u16,

    /// Idle timeout driving both the H2 keepalive interval (half of this
    /// value) and the point at which a silent tunnel is declared dead.
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub idle_timeout: std::time::Duration,

    /// Delay before redialing after the tunnel is lost.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub restart_timeout: std::time::Duration,

    /// Generate a throwaway self-signed certificate at `--crt`/`--key` if
    /// neither file exists yet. Local testing only.
    #[cfg(feature = "self-signed")]
    #[arg(long)]
    pub generate_self_signed: bool,

    /// Log filter, e.g. `info`, `tunnel_client=debug`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

fn parse_duration(s: &str) -> Result<std::time::Duration, String> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix("ms") {
        return secs
            .parse::<u64>()
            .map(std::time::Duration::from_millis)
            .map_err(|e| e.to_string());
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs
            .parse::<u64>()
            .map(std::time::Duration::from_secs)
            .map_err(|e| e.to_string());
    }
    s.parse::<u64>()
        .map(std::time::Duration::from_secs)
        .map_err(|e| e.to_string())
}
