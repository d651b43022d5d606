mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// HTTP plumbing under the backend client. Held at warn unless `RUST_LOG`
/// asks for more, so `--log-level debug` shows the rater's own events.
const HTTP_INTERNALS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Level for the rater crates. `RUST_LOG` replaces the whole filter.
    pub log_level: Level,
    /// JSON lines instead of compact text on stderr.
    pub json: bool,
    /// Keep warn+ events in `log_db_path` for `rater logs`.
    pub persist_warnings: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::WARN,
            json: false,
            persist_warnings: true,
            log_db_path: rater_dir().join("logs.db"),
        }
    }
}

impl TelemetryConfig {
    fn filter_directives(&self) -> String {
        let level = self.log_level.to_string().to_ascii_lowercase();
        let mut directives = vec![level];
        if self.log_level > Level::WARN {
            directives.extend(HTTP_INTERNALS.iter().map(|krate| format!("{krate}=warn")));
        }
        directives.join(",")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.filter_directives()))
    }
}

/// Holds the warning database open for the life of the process.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    /// The warning database, when it could be opened.
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

fn open_warning_db(config: &TelemetryConfig) -> Option<Arc<SqliteLogSink>> {
    if !config.persist_warnings {
        return None;
    }
    match SqliteLogSink::new(&config.log_db_path) {
        Ok(sink) => Some(Arc::new(sink)),
        Err(e) => {
            // no subscriber yet
            eprintln!(
                "rater: not recording warnings, cannot open {}: {e}",
                config.log_db_path.display()
            );
            None
        }
    }
}

/// Install the global subscriber. Call once at startup.
///
/// Output goes to stderr so it never interleaves with the interactive
/// prompt on stdout.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    let fmt_layer = if config.json {
        fmt_layer.json().with_span_list(true).with_filter(config.filter()).boxed()
    } else {
        fmt_layer.compact().with_filter(config.filter()).boxed()
    };

    let log_sink = open_warning_db(&config);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(log_sink.clone().map(SqliteLogLayer::new))
        .init();

    TelemetryGuard { log_sink }
}

/// `~/.rater`, or `/tmp/.rater` without a home directory.
pub fn rater_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".rater")
}
