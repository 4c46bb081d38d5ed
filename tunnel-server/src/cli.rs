use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

/// Public-facing side of the tunnel: terminates the mutual-TLS tunnel and
/// exposes its HTTP/2 streams as a plain TCP proxy listener.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct ServerArgs {
    /// This endpoint's certificate (PEM), also used as the sole trust
    /// anchor for the peer's certificate.
    #[arg(long)]
    pub crt: PathBuf,

    /// This endpoint's private key (PEM).
    #[arg(long)]
    pub key: PathBuf,

    /// Address the mutual-TLS tunnel listener binds to.
    #[arg(long, default_value = "::0")]
    pub tunnel_listen_ip: IpAddr,

    /// Port the mutual-TLS tunnel listener binds to.
    #[arg(long, default_value_t = 15900)]
    pub tunnel_listen_port: u16,

    /// Address the public proxy listener binds to.
    #[arg(long, default_value = "::0")]
    pub proxy_listen_ip: IpAddr,

    /// Port the public proxy listener binds to.
    #[arg(long)]
    pub proxy_listen_port: u16,

    /// Idle timeout driving both the H2 keepalive interval (half of this
    /// value) and the point at which a silent tunnel is declared dead.
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub idle_timeout: std::time::Duration,

    /// Generate a throwaway self-signed certificate at `--crt`/`--key` if
    /// neither file exists yet. Local testing only.
    #[cfg(feature = "self-signed")]
    #[arg(long)]
    pub generate_self_signed: bool,

    /// Log filter, e.g. `info`, `tunnel_server=debug`.
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
