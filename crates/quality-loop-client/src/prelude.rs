//! Common imports for driving a session or a single analysis.
pub use crate::{
    AnalyseRequest, AnalysisResult, AnalysisService, ClientConfig, ClientError, Dispatcher,
    HttpAnalysisService, IterationRound, SessionController, SessionPhase, SessionUpdate,
    StreamState, Suggestion,
};
