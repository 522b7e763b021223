//! boiler-api - HTTP service with managed lifecycle and composite health
//!
//! This is the composition root: configuration, logging, boot, serve.

use boiler_api::bootstrap;
use boiler_api::config::{load_config, Config};
use boiler_api::infrastructure::{termination_signal, LifecycleOrchestrator};
use tracing::Instrument;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    init_tracing(&cfg);

    let root = tracing::info_span!(
        "service",
        service = %cfg.service_name,
        environment = %cfg.environment,
        version = env!("CARGO_PKG_VERSION"),
    );
    let exit_code = run(cfg).instrument(root).await?;

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Human-readable logs in development, JSON lines in production.
/// `RUST_LOG` overrides the configured level.
fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.effective_log_level()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.is_production() {
        builder.json().with_current_span(true).init();
    } else {
        builder.with_span_events(FmtSpan::CLOSE).init();
    }
}

async fn run(cfg: Config) -> anyhow::Result<i32> {
    tracing::info!(
        addr = %cfg.bind_addr(),
        db_path = %cfg.db_path,
        "starting boiler-api"
    );

    let mut orchestrator = LifecycleOrchestrator::new(cfg.shutdown_timeout);

    // ===== BOOT =====
    let service = bootstrap::boot(&cfg).await?;
    let listener = bootstrap::bind(&cfg.bind_addr()).await?;

    let handle = service.handle.clone();
    orchestrator.on_shutdown(move || {
        if handle.close() {
            tracing::info!("database connection closed");
        }
    });

    // ===== SERVE / DRAIN =====
    let outcome = orchestrator
        .serve(listener, service.router, termination_signal())
        .await;

    Ok(outcome.exit_code())
}
