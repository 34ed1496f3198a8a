/// Failure of one streamed transfer, produced by the stream pump.
///
/// Cancellation is never represented here: a cancelled stream simply stops.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The server answered with a non-success status; the body is surfaced verbatim.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// Connect, read, or stall failure.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// A single line grew past the configured bound.
    #[error("stream line exceeded {limit} bytes")]
    FrameTooLarge { limit: usize },
}

impl StreamError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a status error from a non-success response.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Returns the HTTP status for `Status` errors.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the human-readable message carried by this error.
    pub fn message(&self) -> String {
        match self {
            Self::Status { body, .. } => body.clone(),
            Self::Transport { message } => message.clone(),
            Self::FrameTooLarge { .. } => self.to_string(),
        }
    }
}

/// Terminal failure recorded for a round that did not commit history.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum RoundFailure {
    /// Network failure, non-success status, stall, or bound violation.
    #[error("transport failure: {message}")]
    Transport { message: String },
    /// The terminal result was out of sequence with local history.
    #[error("protocol failure: {message}")]
    Protocol { message: String },
    /// The `complete` payload could not be decoded into the expected result shape.
    #[error("malformed result: {message}")]
    MalformedResult { message: String },
    /// The stream closed before a `complete` event arrived.
    #[error("stream ended before completion")]
    EndedWithoutResult,
}

impl From<&StreamError> for RoundFailure {
    fn from(err: &StreamError) -> Self {
        RoundFailure::Transport {
            message: err.to_string(),
        }
    }
}

/// Top-level error type for the public client API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
    /// Operation not permitted in the controller's current phase.
    #[error("{operation} is not allowed while {phase}")]
    InvalidState {
        operation: &'static str,
        phase: String,
    },
    /// Non-success status from a non-streaming endpoint.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// Network failure on a non-streaming endpoint.
    #[error("transport error: {0}")]
    Transport(String),
    /// Response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// A terminal result declared an iteration index other than the next one.
    #[error("protocol sequence error: expected iteration {expected}, got {actual}")]
    ProtocolSequence { expected: u32, actual: u32 },
    /// A round ended without committing a result.
    #[error(transparent)]
    RoundFailed(RoundFailure),
}

impl ClientError {
    pub(crate) fn invalid_state(operation: &'static str, phase: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation,
            phase: phase.to_string(),
        }
    }
}

impl From<RoundFailure> for ClientError {
    fn from(value: RoundFailure) -> Self {
        ClientError::RoundFailed(value)
    }
}

impl From<StreamError> for ClientError {
    fn from(value: StreamError) -> Self {
        match value {
            StreamError::Status { status, body } => ClientError::Http { status, body },
            other => ClientError::Transport(other.message()),
        }
    }
}
