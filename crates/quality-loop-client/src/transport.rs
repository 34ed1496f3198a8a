//! Stream client: owns one transfer, feeds its bytes through a
//! [`FrameParser`] and hands decoded events to the consumer over a bounded
//! channel.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::{ClientError, StreamError};
use crate::event::ParsedEvent;
use crate::sse::FrameParser;

/// Raw response body as a stream of byte chunks.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

/// Message delivered to the consumer of a [`StreamHandle`].
#[derive(Clone, Debug, PartialEq)]
pub enum StreamMessage {
    /// One decoded event, in arrival order.
    Event(ParsedEvent),
    /// Terminal failure. Sent at most once, never after cancellation.
    Failed(StreamError),
    /// The body ended normally.
    Finished,
}

/// Bounds applied to one stream.
#[derive(Clone, Debug)]
pub struct StreamOptions {
    pub max_line_bytes: usize,
    pub stall_timeout: Option<Duration>,
    pub buffer_capacity: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for StreamOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_line_bytes: config.max_line_bytes,
            stall_timeout: Some(config.stall_timeout).filter(|d| !d.is_zero()),
            buffer_capacity: config.event_buffer_capacity.max(1),
        }
    }
}

/// Handle used to cancel a stream.
///
/// Idempotent, and safe to call after the stream has already finished.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Consumer side of one open stream.
pub struct StreamHandle {
    rx: mpsc::Receiver<StreamMessage>,
    cancel: CancelHandle,
}

impl StreamHandle {
    /// Spawns a pump that first awaits `connect`, then streams its body.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(connect: F, options: StreamOptions) -> Self
    where
        F: Future<Output = Result<ByteStream, StreamError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(options.buffer_capacity.max(1));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        tokio::spawn(pump(connect, options, tx, cancel_rx));
        Self {
            rx,
            cancel: CancelHandle { tx: cancel_tx },
        }
    }

    /// Streams an already-open body.
    pub fn from_byte_stream(bytes: ByteStream, options: StreamOptions) -> Self {
        Self::spawn(async move { Ok(bytes) }, options)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancels the transfer; anything buffered but not yet received is discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns the next message, or `None` once the stream is closed or cancelled.
    pub async fn next_message(&mut self) -> Option<StreamMessage> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let message = self.rx.recv().await;
        if self.cancel.is_cancelled() {
            return None;
        }
        message
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// HTTP side of the stream client.
#[derive(Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    options: StreamOptions,
}

impl StreamClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        // No whole-request timeout here: streams are bounded by the stall timeout.
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self::with_http(http, StreamOptions::from(config)))
    }

    pub fn with_http(http: reqwest::Client, options: StreamOptions) -> Self {
        Self { http, options }
    }

    /// Opens a `POST` stream. Errors arrive through the handle, never here.
    pub fn open(&self, url: impl Into<String>, body: Option<serde_json::Value>) -> StreamHandle {
        let url = url.into();
        let mut request = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(body) = body {
            request = request.json(&body);
        }
        StreamHandle::spawn(connect(request, url), self.options.clone())
    }
}

async fn connect(request: reqwest::RequestBuilder, url: String) -> Result<ByteStream, StreamError> {
    debug!(%url, "opening event stream");
    let response = request
        .send()
        .await
        .map_err(|e| StreamError::transport(format!("request to {url} failed: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(StreamError::status(status.as_u16(), body));
    }
    Ok(Box::pin(response.bytes_stream().map(|chunk| {
        chunk.map_err(|e| StreamError::transport(format!("stream read failed: {e}")))
    })))
}

async fn pump<F>(
    connect: F,
    options: StreamOptions,
    tx: mpsc::Sender<StreamMessage>,
    mut cancel_rx: watch::Receiver<bool>,
) where
    F: Future<Output = Result<ByteStream, StreamError>> + Send,
{
    let connected = tokio::select! {
        biased;
        _ = cancelled(&mut cancel_rx) => {
            debug!("stream cancelled before response");
            return;
        }
        result = connect => result,
    };
    let mut bytes = match connected {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(error = %err, "stream failed to open");
            send(&tx, StreamMessage::Failed(err), &mut cancel_rx).await;
            return;
        }
    };

    let mut parser = FrameParser::new(options.max_line_bytes);
    loop {
        let next = tokio::select! {
            biased;
            _ = cancelled(&mut cancel_rx) => {
                debug!(partial = parser.has_partial(), "stream cancelled");
                return;
            }
            next = next_chunk(&mut bytes, options.stall_timeout) => next,
        };
        match next {
            Ok(Some(chunk)) => {
                let events = match parser.push_chunk(&chunk) {
                    Ok(events) => events,
                    Err(err) => {
                        send(&tx, StreamMessage::Failed(err), &mut cancel_rx).await;
                        return;
                    }
                };
                for event in events {
                    debug!(event = event.name(), "stream event");
                    if !send(&tx, StreamMessage::Event(event), &mut cancel_rx).await {
                        return;
                    }
                }
            }
            Ok(None) => {
                if parser.has_partial() {
                    debug!("discarding unterminated frame at end of stream");
                }
                send(&tx, StreamMessage::Finished, &mut cancel_rx).await;
                return;
            }
            Err(err) => {
                send(&tx, StreamMessage::Failed(err), &mut cancel_rx).await;
                return;
            }
        }
    }
}

async fn next_chunk(
    bytes: &mut ByteStream,
    stall_timeout: Option<Duration>,
) -> Result<Option<bytes::Bytes>, StreamError> {
    let next = match stall_timeout {
        Some(limit) => tokio::time::timeout(limit, bytes.next()).await.map_err(|_| {
            StreamError::transport(format!("stream stalled for {limit:?} without data"))
        })?,
        None => bytes.next().await,
    };
    next.transpose()
}

/// Delivers one message unless the stream is cancelled or the consumer is gone.
async fn send(
    tx: &mpsc::Sender<StreamMessage>,
    message: StreamMessage,
    cancel_rx: &mut watch::Receiver<bool>,
) -> bool {
    if *cancel_rx.borrow() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancelled(cancel_rx) => false,
        sent = tx.send(message) => sent.is_ok(),
    }
}

async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    if cancel_rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // Every cancel handle is gone; nobody can cancel any more.
        std::future::pending::<()>().await;
    }
}
