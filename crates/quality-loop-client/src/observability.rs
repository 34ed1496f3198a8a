use std::io;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::{Layer, SubscriberExt as _};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "info";
const DEFAULT_JSON_LOG_NAME: &str = "quality-loop.logs.jsonl";

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// `EnvFilter` directive; falls back to `RUST_LOG`, then `info`.
    pub filter: Option<String>,
    /// JSONL destination. Console output on stderr when unset.
    pub json_path: Option<PathBuf>,
}

impl LogSettings {
    /// Reads:
    /// - `QUALITY_LOOP_OBSERVABILITY`: enable/disable flag (default enabled).
    /// - `QUALITY_LOOP_LOG_LEVEL`: level or filter override (`info`, `quality_loop_client=debug`).
    /// - `QUALITY_LOOP_JSON_LOG_PATH`: write JSON lines to this file instead of the console.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("QUALITY_LOOP_OBSERVABILITY")
            .map(|value| parse_bool_env(&value).unwrap_or(true))
            .unwrap_or(true);
        Self {
            enabled,
            filter: lookup("QUALITY_LOOP_LOG_LEVEL").filter(|v| !v.trim().is_empty()),
            json_path: lookup("QUALITY_LOOP_JSON_LOG_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.filter
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER))
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn split_log_path(path: &Path) -> (&Path, &str) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_JSON_LOG_NAME);
    (dir, file_name)
}

/// Installs the global subscriber once per process using [`LogSettings::from_env`].
pub fn init_observability() {
    init_with(LogSettings::from_env());
}

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builds the sink: JSON lines when a log path is set, compact stderr otherwise.
fn output_layer(settings: &LogSettings) -> io::Result<OutputLayer> {
    let Some(path) = &settings.json_path else {
        return Ok(console_layer());
    };
    let (dir, file_name) = split_log_path(path);
    std::fs::create_dir_all(dir)?;
    let writer = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(false)
        .with_writer(writer)
        .boxed())
}

fn console_layer() -> OutputLayer {
    tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .boxed()
}

/// Installs the global subscriber once per process. Later calls are no-ops.
///
/// An unusable JSON log directory falls back to console output.
pub fn init_with(settings: LogSettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }
        let (output, fallback) = match output_layer(&settings) {
            Ok(layer) => (layer, None),
            Err(err) => (console_layer(), Some(err)),
        };
        let installed = tracing_subscriber::registry()
            .with(output)
            .with(settings.env_filter())
            .try_init()
            .is_ok();
        if installed && let Some(err) = fallback {
            tracing::warn!(error = %err, "json log path unusable, logging to stderr");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> LogSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_enabled_console_logging() {
        let s = settings(&[]);
        assert!(s.enabled);
        assert!(s.filter.is_none());
        assert!(s.json_path.is_none());
    }

    #[test]
    fn reads_flag_level_and_json_path() {
        let s = settings(&[
            ("QUALITY_LOOP_OBSERVABILITY", "off"),
            ("QUALITY_LOOP_LOG_LEVEL", "debug"),
            ("QUALITY_LOOP_JSON_LOG_PATH", "logs/run.jsonl"),
        ]);
        assert!(!s.enabled);
        assert_eq!(s.filter.as_deref(), Some("debug"));
        assert_eq!(s.json_path, Some(PathBuf::from("logs/run.jsonl")));
    }

    #[test]
    fn unrecognized_flag_keeps_logging_on() {
        assert!(settings(&[("QUALITY_LOOP_OBSERVABILITY", "maybe")]).enabled);
        assert_eq!(parse_bool_env(" Disabled "), Some(false));
    }

    #[test]
    fn bare_file_name_logs_to_current_dir() {
        assert_eq!(
            split_log_path(Path::new("run.jsonl")),
            (Path::new("."), "run.jsonl")
        );
        assert_eq!(
            split_log_path(Path::new("/var/log/ql/run.jsonl")),
            (Path::new("/var/log/ql"), "run.jsonl")
        );
    }

    #[test]
    fn json_output_creates_missing_log_dirs() {
        let root = tempfile::tempdir().expect("tempdir");
        let path = root.path().join("logs").join("nested").join("run.jsonl");
        let settings = LogSettings {
            enabled: true,
            filter: None,
            json_path: Some(path.clone()),
        };
        output_layer(&settings).expect("json layer");
        assert!(path.parent().expect("parent").is_dir());
    }

    #[test]
    fn json_output_under_a_file_is_an_error() {
        let root = tempfile::tempdir().expect("tempdir");
        let blocker = root.path().join("blocker");
        std::fs::write(&blocker, "").expect("write");
        let settings = LogSettings {
            enabled: true,
            filter: None,
            json_path: Some(blocker.join("run.jsonl")),
        };
        assert!(output_layer(&settings).is_err());
    }
}
