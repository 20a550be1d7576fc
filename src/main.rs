//! harvestd: runs the configured civic event sources on a schedule and
//! serves `/health` and `/metrics` for operators.

use std::time::Duration;

use anyhow::Context;
use civic_events_harvester::{config, metrics::Metrics, ops, scheduler, HarvestContext};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON lines when `HARVEST_LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("harvestd=info,runner=info,registry=info,scheduler=info,warn"));

    let json = std::env::var("HARVEST_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default().context("loading harvest config")?;
    let metrics = match Metrics::init() {
        Ok(m) => Some(m.handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let ctx = HarvestContext::from_config(&cfg)?;
    let sched = scheduler::spawn_health_check_scheduler(
        ctx.registry.clone(),
        Duration::from_secs(cfg.scheduler.interval_secs),
    );

    let app = ops::router(ctx.registry.clone(), metrics);
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind))?;
    tracing::info!(bind = %cfg.server.bind, sources = ctx.registry.len(), "harvestd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("ops server")?;

    tracing::info!("shutting down");
    sched.shutdown().await;
    ctx.shutdown().await;
    Ok(())
}
