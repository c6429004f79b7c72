use std::process::ExitCode;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use waypoint::config::Config;
use waypoint::proxy;
use waypoint::server::{self, Server};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cfg = Config::load()?;
    let pool = proxy::build_pool(&cfg)?;

    tracing::info!(
        backends = pool.balancer.backends().len(),
        health = ?cfg.health.mode,
        "Backend pool ready"
    );

    let server = Server::bind(&cfg.server.listen_addr, pool.balancer, cfg.shutdown_grace()).await?;

    let (monitor_tx, monitor_rx) = watch::channel(false);
    let monitor = pool.monitor.map(|monitor| monitor.spawn(monitor_rx));

    let report = server.run_until(server::wait_for_signal()).await?;

    let _ = monitor_tx.send(true);
    if let Some(handle) = monitor {
        let _ = handle.await;
    }

    tracing::info!(
        drained = report.drained,
        aborted = report.aborted,
        "Server gracefully stopped"
    );
    Ok(())
}
