use anyhow::Result;
use sentinel_storage::AlertStore;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use sentinel_server::app;
use sentinel_server::config::ServerConfig;
use sentinel_server::rule_seed;
use sentinel_server::state::AppState;

const DEFAULT_CONFIG_PATH: &str = "config/server.toml";

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  sentinel-server [config.toml]                          Start the server");
    eprintln!("  sentinel-server init-rules <config.toml> <seed.json>   Initialize alert rules and channels from seed file");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sentinel=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-rules") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-rules requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-rules requires <seed.json> argument")
            })?;
            run_init_rules(config_path, seed_path)
        }
        Some("-h") | Some("--help") => {
            print_usage();
            Ok(())
        }
        Some(config_path) => run_server(config_path).await,
        None => run_server(DEFAULT_CONFIG_PATH).await,
    }
}

fn run_init_rules(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    sentinel_common::id::init(config.worker_id, 1);
    let store = AlertStore::new(Path::new(&config.data_dir))?;
    let seed = rule_seed::load_seed_file(seed_path)?;
    rule_seed::seed_rules(&store, &seed)?;
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    sentinel_common::id::init(config.worker_id, 1);

    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.data_dir,
        monitoring = config.monitoring.enabled,
        "sentinel-server starting"
    );

    let store = Arc::new(AlertStore::new(Path::new(&config.data_dir))?);
    let http_port = config.http_port;
    let state = AppState::new(config, store)?;

    let http_addr: SocketAddr = format!("0.0.0.0:{http_port}").parse()?;
    let app = app::build_http_app(state.clone());
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let http_server = axum::serve(http_listener, app);

    // Anomaly polling loops
    let (monitor_handle, critical_handle) = if state.config.monitoring.enabled {
        let scheduler = state.scheduler.clone();
        let monitor = tokio::spawn(async move {
            scheduler.run().await;
        });
        let scheduler = state.scheduler.clone();
        let critical = tokio::spawn(async move {
            scheduler.run_critical().await;
        });
        (Some(monitor), Some(critical))
    } else {
        tracing::info!("Anomaly monitoring disabled");
        (None, None)
    };

    // Undelivered alerts are retried even with polling off.
    let scheduler = state.scheduler.clone();
    let retry_handle = tokio::spawn(async move {
        scheduler.run_retry().await;
    });

    tracing::info!(http = %http_addr, "Server started");

    tokio::select! {
        result = http_server.with_graceful_shutdown(async { signal::ctrl_c().await.ok(); }) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    retry_handle.abort();
    if let Some(h) = monitor_handle {
        h.abort();
    }
    if let Some(h) = critical_handle {
        h.abort();
    }
    tracing::info!("Server stopped");

    Ok(())
}
