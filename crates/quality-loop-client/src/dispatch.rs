//! Event dispatcher: folds stream messages into a [`StreamState`] projection.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::RoundFailure;
use crate::event::{EventKind, ParsedEvent};
use crate::transport::{StreamHandle, StreamMessage};

pub const STARTING_MESSAGE: &str = "Starting...";

/// Receives `dimension_complete`, `step_complete`, `artifact_complete` and
/// `type_detected` events verbatim.
pub type ProgressObserver = Arc<dyn Fn(&ParsedEvent) + Send + Sync>;

/// Pulls the terminal result out of a `complete` payload.
pub type ResultExtractor<T> = Arc<dyn Fn(&Value) -> Result<T, String> + Send + Sync>;

/// Observable state of one in-flight round.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamState<T> {
    pub loading: bool,
    pub progress_message: String,
    pub progress_detail: Option<Map<String, Value>>,
    pub result: Option<T>,
    pub error: Option<String>,
}

impl<T> Default for StreamState<T> {
    fn default() -> Self {
        Self {
            loading: false,
            progress_message: String::new(),
            progress_detail: None,
            result: None,
            error: None,
        }
    }
}

impl<T> StreamState<T> {
    /// State published before the first byte of a new round arrives.
    pub fn starting() -> Self {
        Self {
            loading: true,
            progress_message: STARTING_MESSAGE.to_string(),
            ..Self::default()
        }
    }

    /// Settled state carrying a previously completed result.
    pub fn settled(result: Option<T>) -> Self {
        Self {
            result,
            ..Self::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// Settled state after a failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            loading: false,
            progress_message: String::new(),
            progress_detail: None,
            result: None,
            error: Some(message.into()),
        }
    }
}

pub struct Dispatcher<T> {
    extract: ResultExtractor<T>,
    observer: Option<ProgressObserver>,
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            extract: self.extract.clone(),
            observer: self.observer.clone(),
        }
    }
}

impl<T: DeserializeOwned + Clone + 'static> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + Clone + 'static> Dispatcher<T> {
    /// Dispatcher whose result is the whole `complete` payload.
    pub fn new() -> Self {
        Self::with_extractor(|payload| {
            serde_json::from_value(payload.clone()).map_err(|e| e.to_string())
        })
    }

    /// Dispatcher whose result is one member of the `complete` payload.
    pub fn field(name: &'static str) -> Self {
        Self::with_extractor(move |payload| {
            let value = payload
                .get(name)
                .ok_or_else(|| format!("missing field `{name}`"))?;
            serde_json::from_value(value.clone()).map_err(|e| e.to_string())
        })
    }
}

impl<T: Clone> Dispatcher<T> {
    /// Dispatcher for payloads that nest the real result.
    pub fn with_extractor<F>(extract: F) -> Self
    where
        F: Fn(&Value) -> Result<T, String> + Send + Sync + 'static,
    {
        Self {
            extract: Arc::new(extract),
            observer: None,
        }
    }

    pub fn observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Runs the result extractor over a `complete` payload.
    pub fn extract(&self, payload: &Value) -> Result<T, String> {
        (self.extract)(payload)
    }

    /// Applies one event. Terminal states are never changed by later events.
    pub fn reduce(&self, state: &StreamState<T>, event: &ParsedEvent) -> StreamState<T> {
        if state.is_terminal() {
            return state.clone();
        }
        match event.kind() {
            EventKind::Progress => {
                let mut next = state.clone();
                if let Some(message) = event.str_field("message") {
                    next.progress_message = message.to_string();
                }
                next.progress_detail = Some(event.data().clone());
                next
            }
            kind if kind.is_observed() => {
                if let Some(observer) = &self.observer {
                    observer(event);
                }
                state.clone()
            }
            EventKind::Complete => match self.extract(&event.to_value()) {
                Ok(result) => StreamState {
                    loading: false,
                    progress_message: String::new(),
                    progress_detail: None,
                    result: Some(result),
                    error: None,
                },
                Err(message) => {
                    StreamState::failed(RoundFailure::MalformedResult { message }.to_string())
                }
            },
            _ => state.clone(),
        }
    }

    /// Applies one stream message, including transport failure and end of stream.
    pub fn reduce_message(&self, state: &StreamState<T>, message: &StreamMessage) -> StreamState<T> {
        match message {
            StreamMessage::Event(event) => self.reduce(state, event),
            _ if state.is_terminal() => state.clone(),
            StreamMessage::Failed(err) => StreamState::failed(RoundFailure::from(err).to_string()),
            StreamMessage::Finished => {
                StreamState::failed(RoundFailure::EndedWithoutResult.to_string())
            }
        }
    }

    /// Consumes `handle` until a terminal state or the stream closes.
    ///
    /// `on_change` sees every intermediate state. A cancelled stream returns
    /// the last state with `loading` cleared and no error.
    pub async fn run<F>(&self, handle: &mut StreamHandle, mut on_change: F) -> StreamState<T>
    where
        F: FnMut(&StreamState<T>),
    {
        let mut state = StreamState::starting();
        on_change(&state);
        while let Some(message) = handle.next_message().await {
            state = self.reduce_message(&state, &message);
            on_change(&state);
            if state.is_terminal() {
                return state;
            }
        }
        state.loading = false;
        state
    }
}
