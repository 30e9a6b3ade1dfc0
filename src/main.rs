//! Sluice pipeline daemon main entry point.
//!
//! Loads an optional JSON config (first argument), builds a pipeline from
//! it, and runs until signalled. Plugins are registered by the embedding
//! build; a bare daemon runs an empty pipeline.

use sluice_core::pipeline::Pipeline;
use sluice_core::types::LoggingConfig;
use sluice_core::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| format!("cannot read config {path}: {e}"))?;
            serde_json::from_str::<Config>(&text)
                .map_err(|e| format!("cannot parse config {path}: {e}"))?
        }
        None => Config::default(),
    };
    init_tracing(&config.logging)?;

    tracing::info!(
        pool_size = config.global.pool_size,
        plugin_chan_size = config.global.plugin_chan_size,
        max_message_loops = config.global.max_message_loops,
        "sluiced starting"
    );

    let pipeline = Pipeline::new(config);
    let running = pipeline.start().await?;
    running.run_with_signals().await?;

    Ok(())
}

/// Install the tracing subscriber for the daemon. The configured level is
/// the fallback filter; a `RUST_LOG` directive takes precedence.
fn init_tracing(
    logging: &LoggingConfig,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if logging.json {
        builder.json().try_init()?;
    } else {
        builder.compact().try_init()?;
    }
    Ok(())
}
