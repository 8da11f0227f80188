//! Structured logging, shared by every crate in the workspace.
//!
//! Consumers write `logging::debug!(log, "message"; "key" => value)` the same
//! way the rest of the stack does; this module just owns constructing the
//! root `Logger` from a small TOML-driven config.

use serde_derive::{Deserialize, Serialize};
use sloggers::types::Severity;
use sloggers::{Build, Config};

pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

/// Where log lines go and how noisy they are. Mirrors the shape the rest of
/// the project's services already configure themselves with.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Stderr,
    Stdout,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LoggerSettings {
    pub level: String,
    pub destination: Destination,
}

impl Default for LoggerSettings {
    fn default() -> LoggerSettings {
        LoggerSettings {
            level: "info".into(),
            destination: Destination::Stderr,
        }
    }
}

/// Builds a root `Logger` from the supplied settings. Falls back to a
/// `Discard` logger if the terminal sink can't be built (e.g. no tty).
pub fn init(settings: &LoggerSettings) -> Logger {
    let toml = format!(
        r#"
type = "terminal"
level = "{level}"
destination = "{destination}"
"#,
        level = settings.level,
        destination = match settings.destination {
            Destination::Stderr => "stderr",
            Destination::Stdout => "stdout",
        }
    );

    let config: sloggers::LoggerConfig = match serdeconv::from_toml_str(&toml) {
        Ok(config) => config,
        Err(_) => return Logger::root(Discard, o!()),
    };

    match config.build_logger() {
        Ok(logger) => logger,
        Err(_) => Logger::root(Discard, o!()),
    }
}

/// A logger that silently drops everything, for tests and library defaults.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}

/// Parses a textual severity the same way the config file would, used by
/// callers that need to validate a level string before passing it through.
pub fn parse_severity(level: &str) -> Option<Severity> {
    level.parse().ok()
}
