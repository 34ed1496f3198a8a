//! Streaming client for an analyse, suggest, revise document-quality loop.
//!
//! The remote service scores an artifact, proposes suggestions and streams
//! its progress as server-sent events. This crate parses that stream,
//! folds it into an observable round state and drives the iteration session
//! on top of it.
//!
//! # Iterating a session
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use quality_loop_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let service = Arc::new(HttpAnalysisService::from_env()?);
//! let mut controller = SessionController::new(service);
//!
//! controller
//!     .create_session("The system shall export reports.", 80.0)
//!     .await?;
//! controller.start_round()?;
//! let round = controller.finish_round().await?;
//! println!("round {} scored {}", round.index, round.score);
//!
//! let accepted: Vec<String> = controller.suggestions().iter().map(|s| s.id.clone()).collect();
//! if !accepted.is_empty() {
//!     controller.apply_suggestions(&accepted).await?;
//!     controller.finish_round().await?;
//! }
//! # Ok(())
//! # }
//! ```

/// Local comparison of two rounds and reconciliation of service reports.
pub mod comparison;
/// Client configuration and endpoint layout.
pub mod config;
/// Stream state projection and event dispatch.
pub mod dispatch;
/// Public error types.
pub mod errors;
/// Parsed stream events.
pub mod event;
/// Analysis results and request/response bodies.
pub mod model;
/// Tracing subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Remote analysis service contract and its HTTP implementation.
pub mod service;
/// Iteration session controller.
pub mod session;
/// Incremental server-sent event frame parser.
pub mod sse;
/// Cancellable stream handles.
pub mod transport;

#[cfg(test)]
mod test_support;

pub use comparison::ComparisonReport;
pub use config::ClientConfig;
pub use dispatch::{Dispatcher, ProgressObserver, StreamState};
pub use errors::{ClientError, RoundFailure, StreamError};
pub use event::{EventKind, ParsedEvent};
pub use model::{
    AnalyseRequest, AnalysisResult, ArtifactType, CompareOutcome, CoverageReport, DetectedType,
    DimensionScore, Issue, RemoteSession, SessionListing, SessionRoundPayload, SessionSummary,
    Severity, StoryGeneration, Suggestion, UserStory,
};
pub use observability::{LogSettings, init_observability};
pub use service::{AnalysisService, HttpAnalysisService};
pub use session::{
    IterationRound, RoundState, RoundToken, Session, SessionController, SessionPhase,
    SessionUpdate,
};
pub use sse::FrameParser;
pub use transport::{CancelHandle, StreamClient, StreamHandle, StreamMessage, StreamOptions};
