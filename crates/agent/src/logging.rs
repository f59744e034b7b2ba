use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` wins if set; otherwise falls back to the configured
/// `log_level`, applied to this crate and the engine crate only.
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("transcode_agent={log_level},transcode_agent_engine={log_level}")));

    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}
