//! Iteration session controller.
//!
//! Drives the analyse, revise, re-analyse loop for one session. At most one
//! round is in flight: every new round cancels its predecessor and mints a
//! fresh [`RoundToken`]. Messages from all rounds flow through one channel
//! tagged with their token, and only messages carrying the current token are
//! applied.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::comparison::{self, ComparisonReport};
use crate::config::validate_threshold;
use crate::dispatch::{Dispatcher, ProgressObserver, StreamState};
use crate::errors::{ClientError, RoundFailure};
use crate::event::{EventKind, ParsedEvent};
use crate::model::{AnalysisResult, SessionRoundPayload, Suggestion};
use crate::service::AnalysisService;
use crate::transport::{CancelHandle, StreamMessage};

const ROUND_EVENT_BUFFER: usize = 128;

/// Observable state of the current round.
pub type RoundState = StreamState<SessionRoundPayload>;

/// Identity of one started round. Monotonic per controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoundToken(u64);

impl RoundToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session created yet.
    Idle,
    RoundInFlight,
    AwaitingUserAction,
    /// Latest score meets the threshold; further rounds are still allowed.
    Ready,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::RoundInFlight => "a round is in flight",
            Self::AwaitingUserAction => "awaiting user action",
            Self::Ready => "ready",
        })
    }
}

/// One completed round. Never mutated after it is appended to history.
#[derive(Clone, Debug, PartialEq)]
pub struct IterationRound {
    /// 1-based, equal to the round's position in history.
    pub index: u32,
    pub score: f64,
    pub comparison_to_previous: Option<ComparisonReport>,
    pub result: AnalysisResult,
    /// Working copy the round analysed.
    pub artifact_text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    id: String,
    artifact_text: String,
    threshold: f64,
    history: Vec<IterationRound>,
    is_ready: bool,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current working copy.
    pub fn artifact_text(&self) -> &str {
        &self.artifact_text
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Completed rounds in order. Append-only.
    pub fn history(&self) -> &[IterationRound] {
        &self.history
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    pub fn latest_round(&self) -> Option<&IterationRound> {
        self.history.last()
    }

    pub fn latest_result(&self) -> Option<&AnalysisResult> {
        self.latest_round().map(|round| &round.result)
    }

    pub fn latest_score(&self) -> Option<f64> {
        self.latest_round().map(|round| round.score)
    }

    fn next_index(&self) -> u32 {
        self.history.len() as u32 + 1
    }

    fn commit(&mut self, round: IterationRound) {
        self.is_ready = round.score >= self.threshold;
        self.history.push(round);
    }
}

/// What a call to [`SessionController::next_update`] observed.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    /// The round's progress projection changed.
    Progress(RoundState),
    /// The round committed a new history entry.
    RoundCompleted(IterationRound),
    /// The round ended without a result; history is unchanged.
    RoundFailed(RoundFailure),
    /// The result's iteration index was not the next one; history is unchanged.
    RoundRejected { expected: u32, actual: u32 },
}

impl SessionUpdate {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(_))
    }
}

struct TaggedMessage {
    token: RoundToken,
    message: StreamMessage,
}

struct ActiveRound {
    token: RoundToken,
    cancel: CancelHandle,
    artifact_text: String,
}

pub struct SessionController<S> {
    service: Arc<S>,
    session: Option<Session>,
    phase: SessionPhase,
    active: Option<ActiveRound>,
    last_token: u64,
    last_payload: Option<SessionRoundPayload>,
    round_state: RoundState,
    dispatcher: Dispatcher<SessionRoundPayload>,
    state_tx: watch::Sender<RoundState>,
    events_tx: mpsc::Sender<TaggedMessage>,
    events_rx: mpsc::Receiver<TaggedMessage>,
}

impl<S: AnalysisService + 'static> SessionController<S> {
    pub fn new(service: Arc<S>) -> Self {
        let (state_tx, _) = watch::channel(RoundState::default());
        let (events_tx, events_rx) = mpsc::channel(ROUND_EVENT_BUFFER);
        Self {
            service,
            session: None,
            phase: SessionPhase::Idle,
            active: None,
            last_token: 0,
            last_payload: None,
            round_state: RoundState::default(),
            dispatcher: Dispatcher::new(),
            state_tx,
            events_tx,
            events_rx,
        }
    }

    /// Forwards step events (`dimension_complete` and friends) to `observer`.
    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.dispatcher = self.dispatcher.observer(observer);
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn round_state(&self) -> &RoundState {
        &self.round_state
    }

    /// Receives every new round state, starting with the current one.
    pub fn subscribe_state(&self) -> watch::Receiver<RoundState> {
        self.state_tx.subscribe()
    }

    /// Suggestions offered by the latest completed round.
    pub fn suggestions(&self) -> &[Suggestion] {
        self.session
            .as_ref()
            .and_then(Session::latest_result)
            .map(|result| result.suggestions.as_slice())
            .unwrap_or_default()
    }

    /// Compares two completed rounds locally, by 1-based index.
    pub fn compare(&self, previous: u32, current: u32) -> Option<ComparisonReport> {
        let history = self.session.as_ref()?.history();
        let find = |index: u32| history.iter().find(|round| round.index == index);
        Some(ComparisonReport::derive(
            &find(previous)?.result,
            &find(current)?.result,
        ))
    }

    /// Registers a session with the service. History starts empty.
    pub async fn create_session(
        &mut self,
        artifact_text: impl Into<String>,
        threshold: f64,
    ) -> Result<&Session, ClientError> {
        if self.phase != SessionPhase::Idle {
            return Err(ClientError::invalid_state("create_session", self.phase));
        }
        let artifact_text = artifact_text.into();
        if artifact_text.trim().is_empty() {
            return Err(ClientError::Validation("artifact text must not be empty".into()));
        }
        validate_threshold(threshold)?;

        let remote = self.service.create_session(&artifact_text, threshold).await?;
        info!(session_id = %remote.id, threshold, "session created");
        self.phase = SessionPhase::AwaitingUserAction;
        Ok(&*self.session.insert(Session {
            id: remote.id,
            artifact_text,
            threshold,
            history: Vec::new(),
            is_ready: false,
        }))
    }

    /// Opens a new round against the current working copy, cancelling any
    /// round still in flight.
    pub fn start_round(&mut self) -> Result<RoundToken, ClientError> {
        let Some(session) = self.session.as_ref() else {
            return Err(ClientError::invalid_state("start_round", self.phase));
        };

        if let Some(previous) = self.active.take() {
            previous.cancel.cancel();
            debug!(token = previous.token.value(), "superseded in-flight round");
        }

        self.last_token += 1;
        let token = RoundToken(self.last_token);
        let mut handle = self.service.open_round(&session.id);
        let cancel = handle.cancel_handle();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = handle.next_message().await {
                if tx.send(TaggedMessage { token, message }).await.is_err() {
                    break;
                }
            }
        });

        info!(
            session_id = %session.id,
            token = token.value(),
            iteration = session.next_index(),
            "round started"
        );
        self.active = Some(ActiveRound {
            token,
            cancel,
            artifact_text: session.artifact_text.clone(),
        });
        self.phase = SessionPhase::RoundInFlight;
        self.publish(RoundState::starting());
        Ok(token)
    }

    /// Waits for the next change of the in-flight round.
    ///
    /// Returns `None` when no round is in flight.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let current = self.active.as_ref()?.token;
            let tagged = self.events_rx.recv().await?;
            if tagged.token != current {
                debug!(token = tagged.token.value(), "dropping message from superseded round");
                continue;
            }
            if let Some(update) = self.apply(tagged.message) {
                return Some(update);
            }
        }
    }

    /// Drives the in-flight round to its end and returns the committed round.
    pub async fn finish_round(&mut self) -> Result<IterationRound, ClientError> {
        while let Some(update) = self.next_update().await {
            match update {
                SessionUpdate::Progress(_) => {}
                SessionUpdate::RoundCompleted(round) => return Ok(round),
                SessionUpdate::RoundFailed(failure) => return Err(failure.into()),
                SessionUpdate::RoundRejected { expected, actual } => {
                    return Err(ClientError::ProtocolSequence { expected, actual });
                }
            }
        }
        Err(ClientError::invalid_state("finish_round", self.phase))
    }

    /// Applies accepted suggestions through the service, then starts a round.
    pub async fn apply_suggestions(
        &mut self,
        accepted_suggestion_ids: &[String],
    ) -> Result<RoundToken, ClientError> {
        let session_id = self.require_between_rounds("apply_suggestions")?;
        if accepted_suggestion_ids.is_empty() {
            return Err(ClientError::Validation(
                "at least one suggestion must be accepted".into(),
            ));
        }
        let revised = self
            .service
            .apply_suggestions(&session_id, accepted_suggestion_ids)
            .await?;
        debug!(accepted = accepted_suggestion_ids.len(), "suggestions applied");
        self.replace_working_copy(revised);
        self.start_round()
    }

    /// Replaces the working copy with a manual edit, then starts a round.
    pub async fn edit_artifact(
        &mut self,
        artifact_text: impl Into<String>,
    ) -> Result<RoundToken, ClientError> {
        let session_id = self.require_between_rounds("edit_artifact")?;
        let artifact_text = artifact_text.into();
        if artifact_text.trim().is_empty() {
            return Err(ClientError::Validation("artifact text must not be empty".into()));
        }
        let stored = self
            .service
            .update_artifact(&session_id, &artifact_text)
            .await?;
        self.replace_working_copy(stored);
        self.start_round()
    }

    /// Cancels the in-flight round. History is left untouched.
    pub fn cancel(&mut self) -> Result<(), ClientError> {
        if self.phase != SessionPhase::RoundInFlight {
            return Err(ClientError::invalid_state("cancel", self.phase));
        }
        if let Some(active) = self.release_active() {
            info!(token = active.token.value(), "round cancelled");
        }
        self.phase = self.settled_phase();
        self.publish(RoundState::settled(self.last_payload.clone()));
        Ok(())
    }

    fn require_between_rounds(&self, operation: &'static str) -> Result<String, ClientError> {
        match (&self.session, self.phase) {
            (Some(session), SessionPhase::AwaitingUserAction | SessionPhase::Ready) => {
                Ok(session.id.clone())
            }
            _ => Err(ClientError::invalid_state(operation, self.phase)),
        }
    }

    fn replace_working_copy(&mut self, artifact_text: String) {
        if let Some(session) = self.session.as_mut() {
            session.artifact_text = artifact_text;
        }
    }

    fn settled_phase(&self) -> SessionPhase {
        match &self.session {
            None => SessionPhase::Idle,
            Some(session) if session.is_ready => SessionPhase::Ready,
            Some(_) => SessionPhase::AwaitingUserAction,
        }
    }

    fn publish(&mut self, state: RoundState) {
        self.round_state = state.clone();
        self.state_tx.send_replace(state);
    }

    fn apply(&mut self, message: StreamMessage) -> Option<SessionUpdate> {
        match message {
            StreamMessage::Event(event) if event.kind() == EventKind::Complete => {
                Some(self.complete_round(&event))
            }
            StreamMessage::Event(event) => {
                let next = self.dispatcher.reduce(&self.round_state, &event);
                if next == self.round_state {
                    return None;
                }
                self.publish(next.clone());
                Some(SessionUpdate::Progress(next))
            }
            StreamMessage::Failed(err) => {
                warn!(error = %err, "round failed");
                Some(self.fail_round(RoundFailure::from(&err)))
            }
            StreamMessage::Finished => Some(self.fail_round(RoundFailure::EndedWithoutResult)),
        }
    }

    /// Takes the in-flight round and stops its transfer.
    fn release_active(&mut self) -> Option<ActiveRound> {
        let active = self.active.take()?;
        active.cancel.cancel();
        Some(active)
    }

    fn fail_round(&mut self, failure: RoundFailure) -> SessionUpdate {
        self.release_active();
        self.phase = self.settled_phase();
        self.publish(RoundState::failed(failure.to_string()));
        SessionUpdate::RoundFailed(failure)
    }

    fn complete_round(&mut self, event: &ParsedEvent) -> SessionUpdate {
        let payload = match self.dispatcher.extract(&event.to_value()) {
            Ok(payload) => payload,
            Err(message) => return self.fail_round(RoundFailure::MalformedResult { message }),
        };
        let Some(active) = self.release_active() else {
            return self.fail_round(RoundFailure::Protocol {
                message: "completion without an active round".into(),
            });
        };
        let Some(session) = self.session.as_mut() else {
            return self.fail_round(RoundFailure::Protocol {
                message: "completion without a session".into(),
            });
        };

        let expected = session.next_index();
        let actual = payload.result.iteration_number;
        if actual != expected {
            warn!(expected, actual, "rejecting out-of-sequence round result");
            self.phase = self.settled_phase();
            self.publish(RoundState::failed(
                ClientError::ProtocolSequence { expected, actual }.to_string(),
            ));
            return SessionUpdate::RoundRejected { expected, actual };
        }

        let score = payload.result.overall_score;
        let round = IterationRound {
            index: expected,
            score,
            comparison_to_previous: comparison::reconcile(payload.comparison.clone(), expected),
            result: payload.result.clone(),
            artifact_text: active.artifact_text,
        };
        session.commit(round.clone());
        if let Some(reported) = payload.is_ready
            && reported != session.is_ready
        {
            warn!(
                reported,
                local = session.is_ready,
                score,
                threshold = session.threshold,
                "service readiness disagrees with local threshold check"
            );
        }
        info!(
            session_id = %session.id,
            iteration = expected,
            score,
            ready = session.is_ready,
            "round completed"
        );

        self.phase = self.settled_phase();
        self.last_payload = Some(payload.clone());
        self.publish(RoundState::settled(Some(payload)));
        SessionUpdate::RoundCompleted(round)
    }
}
