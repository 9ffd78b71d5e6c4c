//! exprmesh orchestrator — HTTP server entry point.

use exprmesh::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exprmesh=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    if let Some(timeout_ms) = config.lease_visibility_timeout_ms {
        tracing::warn!(
            timeout_ms,
            "LEASE_VISIBILITY_TIMEOUT_MS is set but not yet enforced: a worker that crashes \
             mid-lease still leaves its task stuck until manually requeued (see DESIGN.md)"
        );
    }

    info!(db = %config.db_conn_str, "loaded configuration");

    api::serve(config).await?;

    Ok(())
}
