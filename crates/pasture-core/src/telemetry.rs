//! Tracing initialisation for the `pasture` binary.
//!
//! Call [`init_tracing`] once at program start. `RUST_LOG` takes precedence
//! over the supplied level; subsequent calls are ignored.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON instead of human-readable lines.
/// * `level`: default verbosity when `RUST_LOG` is not set.
///
/// Progress output goes to stdout; errors are reported separately on stderr
/// by the binary.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stdout).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .without_time()
                    .with_writer(std::io::stdout),
            )
            .try_init()
            .ok();
    }
}

/// `level` for our crates; HTTP plumbing stays at warn unless asked for.
fn default_directives(level: Level) -> String {
    format!("{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn", level.as_str().to_lowercase())
}
