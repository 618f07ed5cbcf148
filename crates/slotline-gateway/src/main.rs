mod config;
mod http;
mod metrics;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use slotline_cluster::ClusterClient;
use tracing::info;

use crate::config::{parse_seed_list, GatewayConfig};
use crate::http::Gateway;

#[derive(Parser)]
#[command(name = "slotline-gateway", about = "HTTP gateway for a slotline cluster")]
struct Args {
    /// path to TOML configuration file
    #[arg(short = 'c', long, env = "SLOTLINE_CONFIG")]
    config: Option<PathBuf>,

    /// print default configuration as TOML and exit
    #[arg(long)]
    config_template: bool,

    /// address to bind the HTTP listener to
    #[arg(long, env = "SLOTLINE_HOST")]
    host: Option<String>,

    /// HTTP port to listen on
    #[arg(short, long, env = "SLOTLINE_PORT")]
    port: Option<u16>,

    /// comma-separated cluster seed nodes, e.g. "10.0.0.1:7000,10.0.0.2:7000"
    #[arg(long, env = "SLOTLINE_SEEDS")]
    seeds: Option<String>,

    /// maximum open connections per cluster node
    #[arg(long, env = "SLOTLINE_POOL_SIZE")]
    pool_size: Option<usize>,

    /// background topology refresh period in milliseconds (0 = disabled)
    #[arg(long, env = "SLOTLINE_REFRESH_INTERVAL_MS")]
    refresh_interval_ms: Option<u64>,

    /// retries after the first attempt before a request fails
    #[arg(long, env = "SLOTLINE_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// overall per-request deadline in milliseconds, retries included
    #[arg(long, env = "SLOTLINE_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,

    /// serve prometheus metrics on /metrics (true or false)
    #[arg(long, env = "SLOTLINE_METRICS")]
    metrics: Option<bool>,
}

/// Applies CLI/env overrides on top of the file config. Only flags that
/// were actually given replace a value.
fn apply_args(cfg: &mut GatewayConfig, args: &Args) {
    if let Some(ref host) = args.host {
        cfg.bind = host.clone();
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(ref seeds) = args.seeds {
        cfg.cluster.seed_nodes = parse_seed_list(seeds);
    }
    if let Some(size) = args.pool_size {
        cfg.cluster.pool_size_per_node = size;
    }
    if let Some(ms) = args.refresh_interval_ms {
        cfg.cluster.refresh_interval_ms = ms;
    }
    if let Some(n) = args.max_retries {
        cfg.cluster.max_retries = n;
    }
    if let Some(ms) = args.request_timeout_ms {
        cfg.cluster.request_timeout_ms = ms;
    }
    if let Some(enabled) = args.metrics {
        cfg.metrics = enabled;
    }
}

fn exit_err(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

fn parse_bind_addr(host: &str, port: u16) -> SocketAddr {
    match format!("{host}:{port}").parse() {
        Ok(a) => a,
        Err(e) => exit_err(format!("invalid bind address '{host}:{port}': {e}")),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slotline=info".into()),
        )
        .init();

    let args = Args::parse();

    // --config-template: dump defaults and exit
    if args.config_template {
        match GatewayConfig::default().to_toml() {
            Ok(toml) => {
                println!("{toml}");
                std::process::exit(0);
            }
            Err(e) => exit_err(format!("failed to generate config template: {e}")),
        }
    }

    // defaults → TOML file → CLI/env overrides
    let mut cfg = match &args.config {
        Some(path) => GatewayConfig::from_file(path).unwrap_or_else(|e| exit_err(e)),
        None => GatewayConfig::default(),
    };
    apply_args(&mut cfg, &args);
    cfg.validate()
        .unwrap_or_else(|e| exit_err(format!("invalid configuration: {e}")));

    let addr = parse_bind_addr(&cfg.bind, cfg.port);

    let prometheus = if cfg.metrics {
        let handle = metrics::install_recorder()
            .unwrap_or_else(|e| exit_err(format!("failed to start metrics: {e}")));
        metrics::spawn_upkeep(handle.clone());
        Some(handle)
    } else {
        None
    };

    info!(
        seeds = ?cfg.cluster.seed_nodes,
        pool_size = cfg.cluster.pool_size_per_node,
        "slotline gateway starting..."
    );

    let client = ClusterClient::connect(cfg.cluster.clone())
        .await
        .unwrap_or_else(|e| exit_err(format!("failed to connect to cluster: {e}")));

    let gateway = Arc::new(Gateway::new(
        client.clone(),
        prometheus,
        cfg.max_value_bytes,
    ));

    let result = server::run(addr, gateway, cfg.max_connections).await;
    client.shutdown();
    if let Err(e) = result {
        exit_err(format!("server error: {e}"));
    }
}
