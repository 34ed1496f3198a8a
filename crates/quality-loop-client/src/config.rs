use std::time::Duration;

use crate::errors::ClientError;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Configuration for the analysis service client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the analysis service.
    pub base_url: String,
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,
    /// Whole-request timeout for non-streaming JSON calls.
    ///
    /// Streams are not subject to it; they use `stall_timeout` instead.
    pub request_timeout: Duration,
    /// Longest allowed silence between two chunks of an open stream.
    pub stall_timeout: Duration,
    /// Upper bound for a single line (and the carry-over buffer) in a stream.
    pub max_line_bytes: usize,
    /// Bounded buffer between the stream pump and its consumer.
    pub event_buffer_capacity: usize,
    /// Readiness threshold used when the caller does not supply one.
    pub default_threshold: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl ClientConfig {
    /// Creates a config with defaults for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            stall_timeout: Duration::from_secs(300),
            max_line_bytes: 4 * 1024 * 1024,
            event_buffer_capacity: 128,
            default_threshold: 80.0,
        }
    }

    /// Builds a config from `QUALITY_LOOP_*` environment variables.
    ///
    /// - `QUALITY_LOOP_BASE_URL`: service base URL.
    /// - `QUALITY_LOOP_STALL_TIMEOUT_SECS`: stall timeout in seconds.
    /// - `QUALITY_LOOP_THRESHOLD`: default readiness threshold.
    pub fn from_env() -> Result<Self, ClientError> {
        let mut config = match std::env::var("QUALITY_LOOP_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        };
        if let Ok(raw) = std::env::var("QUALITY_LOOP_STALL_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|e| {
                ClientError::Config(format!("invalid QUALITY_LOOP_STALL_TIMEOUT_SECS: {e}"))
            })?;
            config.stall_timeout = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var("QUALITY_LOOP_THRESHOLD") {
            config.default_threshold = raw.trim().parse::<f64>().map_err(|e| {
                ClientError::Config(format!("invalid QUALITY_LOOP_THRESHOLD: {e}"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the stall timeout.
    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Overrides the per-line bound.
    pub fn max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit;
        self
    }

    /// Overrides the event buffer capacity.
    pub fn event_buffer_capacity(mut self, capacity: usize) -> Self {
        self.event_buffer_capacity = capacity;
        self
    }

    /// Overrides the default readiness threshold.
    pub fn default_threshold(mut self, threshold: f64) -> Self {
        self.default_threshold = threshold;
        self
    }

    /// Checks the bounds a client relies on.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::Config("base_url must not be empty".into()));
        }
        if self.event_buffer_capacity == 0 {
            return Err(ClientError::Config(
                "event_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(ClientError::Config(
                "max_line_bytes must be greater than 0".into(),
            ));
        }
        if !threshold_in_range(self.default_threshold) {
            return Err(ClientError::Config(format!(
                "default_threshold must be within 0..=100, got {}",
                self.default_threshold
            )));
        }
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub(crate) fn analyse_url(&self) -> String {
        self.url("/api/analyse")
    }

    pub(crate) fn sessions_url(&self) -> String {
        self.url("/api/sessions")
    }

    pub(crate) fn session_url(&self, session_id: &str) -> String {
        self.url(&format!("/api/sessions/{session_id}"))
    }

    pub(crate) fn session_round_url(&self, session_id: &str) -> String {
        self.url(&format!("/api/sessions/{session_id}/analyse"))
    }

    pub(crate) fn suggestions_url(&self, session_id: &str) -> String {
        self.url(&format!("/api/sessions/{session_id}/suggestions"))
    }

    pub(crate) fn apply_suggestions_url(&self, session_id: &str) -> String {
        self.url(&format!("/api/sessions/{session_id}/apply-suggestions"))
    }

    pub(crate) fn artifact_url(&self, session_id: &str) -> String {
        self.url(&format!("/api/sessions/{session_id}/artifact"))
    }

    pub(crate) fn detect_type_url(&self) -> String {
        self.url("/api/detect-type")
    }

    pub(crate) fn compare_url(&self) -> String {
        self.url("/api/compare")
    }

    pub(crate) fn stories_url(&self) -> String {
        self.url("/api/stories/generate")
    }

    pub(crate) fn session_stories_url(&self, session_id: &str) -> String {
        self.url(&format!("/api/stories/generate-and-store/{session_id}"))
    }
}

fn threshold_in_range(threshold: f64) -> bool {
    (0.0..=100.0).contains(&threshold)
}

/// Checks a threshold supplied by the caller of a request.
pub(crate) fn validate_threshold(threshold: f64) -> Result<(), ClientError> {
    if !threshold_in_range(threshold) {
        return Err(ClientError::Validation(format!(
            "threshold must be within 0..=100, got {threshold}"
        )));
    }
    Ok(())
}
