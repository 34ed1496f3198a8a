use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::{ClientConfig, validate_threshold};
use crate::dispatch::{Dispatcher, StreamState};
use crate::errors::ClientError;
use crate::model::{
    AnalyseRequest, AnalysisResult, ApplySuggestionsRequest, ArtifactBody, ArtifactResponse,
    CompareOutcome, CompareRequest, CreateSessionRequest, DetectedType, RemoteSession,
    SessionListing, SessionSummary, StoryGeneration, Suggestion,
};
use crate::transport::{StreamClient, StreamHandle, StreamOptions};

/// Remote collaborator used by the session controller.
///
/// `open_round` returns immediately; connection and status failures arrive
/// through the returned handle.
#[async_trait::async_trait]
pub trait AnalysisService: Send + Sync {
    /// Registers a new server-side session for `artifact_text`.
    async fn create_session(
        &self,
        artifact_text: &str,
        threshold: f64,
    ) -> Result<RemoteSession, ClientError>;

    /// Opens the streamed analysis round for a session.
    fn open_round(&self, session_id: &str) -> StreamHandle;

    /// Applies accepted suggestions and returns the revised artifact text.
    async fn apply_suggestions(
        &self,
        session_id: &str,
        accepted_suggestion_ids: &[String],
    ) -> Result<String, ClientError>;

    /// Replaces the session's artifact text and returns what the server stored.
    async fn update_artifact(
        &self,
        session_id: &str,
        artifact_text: &str,
    ) -> Result<String, ClientError>;
}

/// [`AnalysisService`] over HTTP.
#[derive(Clone)]
pub struct HttpAnalysisService {
    http: reqwest::Client,
    streams: StreamClient,
    config: ClientConfig,
}

impl HttpAnalysisService {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build http client: {e}")))?;
        Self::with_http(config, http)
    }

    /// Uses a caller-built reqwest client (proxies, TLS roots, default headers).
    pub fn with_http(config: ClientConfig, http: reqwest::Client) -> Result<Self, ClientError> {
        config.validate()?;
        let streams = StreamClient::with_http(http.clone(), StreamOptions::from(&config));
        Ok(Self {
            http,
            streams,
            config,
        })
    }

    /// Creates a service from `QUALITY_LOOP_*` environment variables.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Opens a single-shot analysis stream whose `complete` payload is a bare result.
    pub fn analyse(&self, request: &AnalyseRequest) -> Result<StreamHandle, ClientError> {
        require_text("artifact text", &request.artifact_text)?;
        if let Some(threshold) = request.threshold {
            validate_threshold(threshold)?;
        }
        let body = encode(request)?;
        Ok(self.streams.open(self.config.analyse_url(), Some(body)))
    }

    /// Runs a single-shot analysis to its terminal state.
    pub async fn collect_analysis<F>(
        &self,
        request: &AnalyseRequest,
        dispatcher: &Dispatcher<AnalysisResult>,
        on_change: F,
    ) -> Result<StreamState<AnalysisResult>, ClientError>
    where
        F: FnMut(&StreamState<AnalysisResult>),
    {
        let mut handle = self.analyse(request)?;
        Ok(dispatcher.run(&mut handle, on_change).await)
    }

    /// Opens a side-by-side analysis of two artifacts.
    ///
    /// Emits `artifact_complete` once per artifact; the `complete` payload is
    /// a [`CompareOutcome`].
    pub fn compare(&self, first: &str, second: &str) -> Result<StreamHandle, ClientError> {
        require_text("first artifact text", first)?;
        require_text("second artifact text", second)?;
        let body = encode(&CompareRequest {
            artifact_text_1: first,
            artifact_text_2: second,
        })?;
        Ok(self.streams.open(self.config.compare_url(), Some(body)))
    }

    /// Runs a comparison to its terminal state.
    pub async fn collect_compare<F>(
        &self,
        first: &str,
        second: &str,
        dispatcher: &Dispatcher<CompareOutcome>,
        on_change: F,
    ) -> Result<StreamState<CompareOutcome>, ClientError>
    where
        F: FnMut(&StreamState<CompareOutcome>),
    {
        let mut handle = self.compare(first, second)?;
        Ok(dispatcher.run(&mut handle, on_change).await)
    }

    /// Opens user-story generation for free text.
    ///
    /// Emits `step_complete` per generation step; the `complete` payload is a
    /// [`StoryGeneration`].
    pub fn generate_stories(&self, artifact_text: &str) -> Result<StreamHandle, ClientError> {
        require_text("artifact text", artifact_text)?;
        let body = encode(&ArtifactBody { artifact_text })?;
        Ok(self.streams.open(self.config.stories_url(), Some(body)))
    }

    /// Opens user-story generation for a session's working copy; the server keeps the stories.
    pub fn generate_session_stories(&self, session_id: &str) -> StreamHandle {
        self.streams
            .open(self.config.session_stories_url(session_id), None)
    }

    /// Runs free-text story generation to its terminal state.
    pub async fn collect_stories<F>(
        &self,
        artifact_text: &str,
        dispatcher: &Dispatcher<StoryGeneration>,
        on_change: F,
    ) -> Result<StreamState<StoryGeneration>, ClientError>
    where
        F: FnMut(&StreamState<StoryGeneration>),
    {
        let mut handle = self.generate_stories(artifact_text)?;
        Ok(dispatcher.run(&mut handle, on_change).await)
    }

    /// Classifies an artifact without analysing it.
    pub async fn detect_type(&self, artifact_text: &str) -> Result<DetectedType, ClientError> {
        require_text("artifact text", artifact_text)?;
        self.send_json(
            self.http
                .post(self.config.detect_type_url())
                .json(&ArtifactBody { artifact_text }),
        )
        .await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionListing>, ClientError> {
        self.send_json(self.http.get(self.config.sessions_url()))
            .await
    }

    pub async fn fetch_session(&self, session_id: &str) -> Result<SessionSummary, ClientError> {
        self.send_json(self.http.get(self.config.session_url(session_id)))
            .await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), ClientError> {
        let _: serde_json::Value = self
            .send_json(self.http.delete(self.config.session_url(session_id)))
            .await?;
        Ok(())
    }

    pub async fn fetch_suggestions(&self, session_id: &str) -> Result<Vec<Suggestion>, ClientError> {
        self.send_json(self.http.get(self.config.suggestions_url(session_id)))
            .await
    }

    async fn send_json<R: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<R, ClientError> {
        let response = request
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("request failed: {e}")))?;
        let status = response.status();
        let url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Transport(format!("failed to read response body: {e}")))?;
        debug!(%url, status = status.as_u16(), "json response");
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| ClientError::Decode(format!("unexpected response from {url}: {e}")))
    }
}

fn require_text(label: &str, text: &str) -> Result<(), ClientError> {
    if text.trim().is_empty() {
        return Err(ClientError::Validation(format!("{label} must not be empty")));
    }
    Ok(())
}

fn encode<B: serde::Serialize>(body: &B) -> Result<serde_json::Value, ClientError> {
    serde_json::to_value(body)
        .map_err(|e| ClientError::Decode(format!("failed to encode request body: {e}")))
}

#[async_trait::async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn create_session(
        &self,
        artifact_text: &str,
        threshold: f64,
    ) -> Result<RemoteSession, ClientError> {
        let body = CreateSessionRequest {
            artifact_text,
            threshold,
        };
        self.send_json(self.http.post(self.config.sessions_url()).json(&body))
            .await
    }

    fn open_round(&self, session_id: &str) -> StreamHandle {
        self.streams
            .open(self.config.session_round_url(session_id), None)
    }

    async fn apply_suggestions(
        &self,
        session_id: &str,
        accepted_suggestion_ids: &[String],
    ) -> Result<String, ClientError> {
        let body = ApplySuggestionsRequest {
            accepted_suggestion_ids,
        };
        let response: ArtifactResponse = self
            .send_json(
                self.http
                    .post(self.config.apply_suggestions_url(session_id))
                    .json(&body),
            )
            .await?;
        Ok(response.artifact_text)
    }

    async fn update_artifact(
        &self,
        session_id: &str,
        artifact_text: &str,
    ) -> Result<String, ClientError> {
        let body = ArtifactBody { artifact_text };
        let response: ArtifactResponse = self
            .send_json(self.http.put(self.config.artifact_url(session_id)).json(&body))
            .await?;
        Ok(response.artifact_text)
    }
}
