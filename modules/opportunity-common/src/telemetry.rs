//! Tracing subscriber setup for the batch job embedding this library.

use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber. `RUST_LOG` overrides `default_directive`;
/// `LOG_FORMAT=json` switches to JSON lines. Safe to call more than once:
/// returns `Ok(false)` and keeps the existing subscriber when one is already
/// installed.
pub fn init_tracing(default_directive: &str) -> anyhow::Result<bool> {
    let filter = EnvFilter::from_default_env().add_directive(default_directive.parse()?);
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) => {
            tracing::debug!(error = %e, "Tracing subscriber already installed, keeping it");
            Ok(false)
        }
    }
}
