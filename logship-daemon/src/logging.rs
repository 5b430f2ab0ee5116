//! Logging initialization for logship-daemon.
//!
//! Configures `tracing-subscriber` from the `[general]` section of
//! `LogshipConfig`. The configured level applies to the agent itself; the
//! HTTP and TLS stack underneath the sender is capped at `warn` so that a
//! `debug` agent log is not buried under per-connection handshake noise.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use logship_core::config::GeneralConfig;

/// Crates whose output is capped at `warn` unless `RUST_LOG` says otherwise.
const TRANSPORT_CRATES: &[&str] = &["hyper", "hyper_util", "h2", "reqwest", "rustls"];

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
///
/// # Formats
///
/// * `"json"` - Machine-parseable JSON lines (default for production)
/// * `"pretty"` - Human-readable colored output (for development)
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let env_filter = build_filter(&config.log_level, std::env::var("RUST_LOG").ok())?;

    match config.log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("failed to initialize JSON tracing subscriber")?,
        "pretty" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("failed to initialize pretty tracing subscriber")?,
        other => {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                other
            ));
        }
    }

    Ok(())
}

/// Build the event filter.
///
/// A non-empty `rust_log` replaces the derived directives entirely. An
/// unparsable level is an error rather than a silent fallback.
fn build_filter(log_level: &str, rust_log: Option<String>) -> Result<EnvFilter> {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return EnvFilter::try_new(&directives)
            .with_context(|| format!("invalid RUST_LOG directives '{directives}'"));
    }

    let level: tracing::Level = log_level
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid log level '{}'", log_level))?;

    let mut directives = vec![level.to_string().to_lowercase()];
    if level > tracing::Level::WARN {
        directives.extend(TRANSPORT_CRATES.iter().map(|name| format!("{name}=warn")));
    }
    EnvFilter::try_new(directives.join(",")).context("failed to build log filter")
}
