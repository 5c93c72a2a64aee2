//! Centralised tracing initialisation for snipbox binaries.
//!
//! Two setups are offered:
//!
//! - [`init_tracing`]: one console layer with an `EnvFilter`.
//! - [`init_dual_sink`]: a full-verbosity log file under the logs folder
//!   plus a quieter console layer, each with its own level.
//!
//! Both write console lines to stderr, as JSON when asked to. Both are safe
//! to call more than once; only the first call in a process installs a
//! subscriber.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Console layer, plain or newline-delimited JSON.
fn console_layer<S, W>(json: bool, writer: W) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_target(false).with_writer(writer);
    if json {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

/// Initialise the global tracing subscriber.
///
/// `level` is the default verbosity when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer(json, std::io::stderr))
        .try_init()
        .ok();
}

/// Parse a level name, accepting the usual aliases (`WARNING`, `CRITICAL`).
///
/// Unknown names fall back to `default`.
pub fn parse_level(name: &str, default: Level) -> Level {
    match name.trim().to_ascii_lowercase().as_str() {
        "warning" => Level::WARN,
        "critical" | "fatal" => Level::ERROR,
        other => other.parse().unwrap_or(default),
    }
}

/// Path of the log file written by [`init_dual_sink`].
pub fn log_file_path(logs_folder: &Path, agent_name: &str) -> PathBuf {
    logs_folder.join(format!("{agent_name}.log"))
}

/// Install a file sink at `file_level` and a console sink at `console_level`.
///
/// The file is `<logs_folder>/<agent_name>.log`, opened in append mode; the
/// folder is created if missing. `json` applies to the console sink only.
/// Returns the file path.
pub fn init_dual_sink(
    logs_folder: &Path,
    agent_name: &str,
    file_level: Level,
    console_level: Level,
    json: bool,
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(logs_folder)?;
    let path = log_file_path(logs_folder, agent_name);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(LevelFilter::from_level(file_level)),
        )
        .with(
            console_layer(json, std::io::stderr)
                .with_filter(LevelFilter::from_level(console_level)),
        )
        .try_init()
        .ok();

    Ok(path)
}
