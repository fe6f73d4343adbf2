// crates/flag-harness-mock/src/stream.rs
// ============================================================================
// Module: Streaming Service
// Description: Server-sent-event endpoint speaking the flag stream protocol.
// Purpose: Serve initial transfers and broadcast scripted pushes to streams.
// Dependencies: axum, tokio, tokio-stream, flag-harness-core
// ============================================================================

//! ## Overview
//! A [`StreamingService`] answers each connection with the transfer its
//! `basis` calls for, then keeps the response open and forwards every push to
//! all open streams. In versioned mode pushed updates and deletes are staged
//! in the [`DataSource`] and only become part of later transfers once a
//! `payload-transferred` push commits them. In legacy mode a connect sends one
//! `put` with the full data and pushes are applied immediately as `patch` or
//! `delete`.
//!
//! Security posture: frame payloads are test-controlled and forwarded as-is;
//! carriage returns and newlines in event names are stripped because the
//! event-stream framing cannot carry them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::response::sse::Event;
use axum::response::sse::Sse;
use flag_harness_core::DataSet;
use flag_harness_core::EntityKind;
use flag_harness_core::Goodbye;
use flag_harness_core::HarnessLogEvent;
use flag_harness_core::Intent;
use flag_harness_core::ItemChange;
use flag_harness_core::NoopLogSink;
use flag_harness_core::Selector;
use flag_harness_core::SharedLogSink;
use flag_harness_core::StreamFrame;
use flag_harness_core::StreamProtocol;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::endpoint::CancelSignal;
use crate::endpoint::RequestRecord;
use crate::error::MockError;
use crate::handler::EndpointHandler;
use crate::source::DataSource;
use crate::source::StaleBasisPolicy;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Buffered SSE events per open response.
const RESPONSE_BUFFER: usize = 64;

// ============================================================================
// SECTION: Options
// ============================================================================

/// Streaming service behavior knobs.
#[derive(Clone)]
pub struct StreamingOptions {
    /// Framing spoken on the stream.
    pub protocol: StreamProtocol,
    /// Answer for a known but outdated basis.
    pub stale_basis: StaleBasisPolicy,
    /// Log sink for connects and pushes.
    pub log: SharedLogSink,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            protocol: StreamProtocol::Versioned,
            stale_basis: StaleBasisPolicy::FullTransfer,
            log: Arc::new(NoopLogSink),
        }
    }
}

// ============================================================================
// SECTION: Stream Registry
// ============================================================================

/// Message delivered to one open stream.
#[derive(Debug)]
enum StreamMessage {
    /// Frame to write.
    Frame(StreamFrame),
    /// End the response.
    Close,
}

/// Shared service state.
struct StreamingInner {
    /// Committed data and staged changes.
    source: DataSource,
    /// Behavior knobs.
    options: StreamingOptions,
    /// Senders for every open stream. Held while building a connect transfer
    /// so a concurrent push cannot fall between the transfer and registration.
    streams: Mutex<Vec<mpsc::UnboundedSender<StreamMessage>>>,
}

/// Streaming endpoint handler with push controls.
#[derive(Clone)]
pub struct StreamingService {
    /// Shared state.
    inner: Arc<StreamingInner>,
}

impl StreamingService {
    /// Creates a versioned service over a fresh data source.
    #[must_use]
    pub fn new(data: impl Into<DataSet>) -> Self {
        Self::with_source(DataSource::new(data), StreamingOptions::default())
    }

    /// Creates a service over an existing (possibly shared) data source.
    #[must_use]
    pub fn with_source(source: DataSource, options: StreamingOptions) -> Self {
        Self {
            inner: Arc::new(StreamingInner {
                source,
                options,
                streams: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Backing data source.
    #[must_use]
    pub fn source(&self) -> &DataSource {
        &self.inner.source
    }

    /// Framing spoken on the stream.
    #[must_use]
    pub fn protocol(&self) -> StreamProtocol {
        self.inner.options.protocol
    }

    /// Number of streams currently open.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.inner
            .streams
            .lock()
            .map(|mut streams| {
                streams.retain(|stream| !stream.is_closed());
                streams.len()
            })
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Pushes
    // ------------------------------------------------------------------------

    /// Pushes an upsert of one object.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the service state is poisoned.
    pub fn push_update(
        &self,
        kind: EntityKind,
        key: &str,
        version: u64,
        object: Value,
    ) -> Result<(), MockError> {
        self.push_change(ItemChange::put(kind, key, version, object))
    }

    /// Pushes a delete of one object.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the service state is poisoned.
    pub fn push_delete(&self, kind: EntityKind, key: &str, version: u64) -> Result<(), MockError> {
        self.push_change(ItemChange::delete(kind, key, version))
    }

    /// Pushes a change: staged in versioned mode, applied at once in legacy mode.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the service state is poisoned.
    pub fn push_change(&self, change: ItemChange) -> Result<(), MockError> {
        let mut streams = self.lock_streams()?;
        let frame = match self.inner.options.protocol {
            StreamProtocol::Versioned => {
                let frame = StreamFrame::from_change(&change);
                self.inner.source.stage(change)?;
                frame
            }
            StreamProtocol::Legacy => {
                let shape = self.inner.source.shape()?;
                let frame = StreamFrame::legacy_from_change(shape, &change);
                self.inner.source.apply_now(change)?;
                frame
            }
        };
        self.broadcast(&mut streams, frame);
        Ok(())
    }

    /// Commits staged changes and pushes the `payload-transferred` frame.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the service is in legacy mode or its
    /// state is poisoned.
    pub fn push_payload_transferred(&self) -> Result<Selector, MockError> {
        self.require_versioned("payload-transferred")?;
        let mut streams = self.lock_streams()?;
        let selector = self.inner.source.commit()?;
        self.broadcast(&mut streams, StreamFrame::payload_transferred(&selector));
        Ok(selector)
    }

    /// Pushes a `server-intent` frame targeting the current payload version.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the service is in legacy mode or its
    /// state is poisoned.
    pub fn push_intent(&self, intent: &Intent) -> Result<(), MockError> {
        self.require_versioned("server-intent")?;
        let mut streams = self.lock_streams()?;
        let target = self.inner.source.selector()?.version;
        self.broadcast(&mut streams, StreamFrame::server_intent(intent, target));
        Ok(())
    }

    /// Pushes a `heartbeat` frame.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the service state is poisoned.
    pub fn push_heartbeat(&self) -> Result<(), MockError> {
        self.push_raw(StreamFrame::heartbeat())
    }

    /// Pushes a `goodbye` frame, dropping staged changes, then closes every
    /// stream unless the goodbye is silent.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the service state is poisoned.
    pub fn push_goodbye(&self, goodbye: &Goodbye) -> Result<(), MockError> {
        let mut streams = self.lock_streams()?;
        self.inner.source.discard_pending()?;
        self.broadcast(&mut streams, StreamFrame::goodbye(goodbye));
        if goodbye.closes_connection() {
            close_streams(&mut streams);
        }
        Ok(())
    }

    /// Pushes an `error` frame, dropping staged changes.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the service state is poisoned.
    pub fn push_error(&self, payload_id: &str, reason: &str) -> Result<(), MockError> {
        let mut streams = self.lock_streams()?;
        self.inner.source.discard_pending()?;
        self.broadcast(&mut streams, StreamFrame::error(payload_id, reason));
        Ok(())
    }

    /// Pushes an arbitrary frame without touching the data source.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the service state is poisoned.
    pub fn push_raw(&self, frame: StreamFrame) -> Result<(), MockError> {
        let mut streams = self.lock_streams()?;
        self.broadcast(&mut streams, frame);
        Ok(())
    }

    /// Replaces the served data and pushes a full transfer of it to every
    /// open stream (legacy mode sends a new `put`).
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the service state is poisoned.
    pub fn push_full_transfer(&self, data: impl Into<DataSet>) -> Result<(), MockError> {
        let mut streams = self.lock_streams()?;
        self.inner.source.set_data(data)?;
        for frame in self.connect_frames(None)? {
            self.broadcast(&mut streams, frame);
        }
        Ok(())
    }

    /// Replaces the served data for later connections without pushing.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the service state is poisoned.
    pub fn set_data(&self, data: impl Into<DataSet>) -> Result<Selector, MockError> {
        let _streams = self.lock_streams()?;
        self.inner.source.set_data(data)
    }

    /// Ends every open stream.
    ///
    /// # Errors
    ///
    /// Returns [`MockError::Wiring`] when the service state is poisoned.
    pub fn close_all(&self) -> Result<(), MockError> {
        let mut streams = self.lock_streams()?;
        close_streams(&mut streams);
        self.log("stream_close", "closed all streams".to_string());
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Frames sent to a new connection, staged changes included.
    fn connect_frames(&self, basis: Option<&str>) -> Result<Vec<StreamFrame>, MockError> {
        match self.inner.options.protocol {
            StreamProtocol::Versioned => {
                self.inner.source.stream_transfer(basis, self.inner.options.stale_basis)
            }
            StreamProtocol::Legacy => {
                Ok(vec![StreamFrame::legacy_put(&self.inner.source.legacy_data()?)])
            }
        }
    }

    /// Sends a frame to every open stream and prunes closed ones.
    fn broadcast(&self, streams: &mut Vec<mpsc::UnboundedSender<StreamMessage>>, frame: StreamFrame) {
        self.log("stream_push", format!("{} ({} bytes)", frame.name, frame.data.len()));
        streams.retain(|stream| stream.send(StreamMessage::Frame(frame.clone())).is_ok());
    }

    /// Fails for operations that only exist in versioned framing.
    fn require_versioned(&self, operation: &str) -> Result<(), MockError> {
        match self.inner.options.protocol {
            StreamProtocol::Versioned => Ok(()),
            StreamProtocol::Legacy => Err(MockError::Wiring(format!(
                "{operation} push requires the versioned stream protocol"
            ))),
        }
    }

    /// Locks the stream registry.
    fn lock_streams(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<StreamMessage>>>, MockError>
    {
        self.inner
            .streams
            .lock()
            .map_err(|_| MockError::Wiring("stream registry lock poisoned".to_string()))
    }

    /// Records a log event.
    fn log(&self, event: &'static str, message: String) {
        self.inner.options.log.record(&HarnessLogEvent::new(event, "stream", message));
    }
}

/// Tells every stream to end and forgets them.
fn close_streams(streams: &mut Vec<mpsc::UnboundedSender<StreamMessage>>) {
    for stream in streams.drain(..) {
        let _ = stream.send(StreamMessage::Close);
    }
}

/// Converts a frame into an SSE event.
fn to_event(frame: &StreamFrame) -> Event {
    let name: String = frame.name.chars().filter(|ch| *ch != '\r' && *ch != '\n').collect();
    let data = frame.data.replace("\r\n", "\n").replace('\r', "\n");
    Event::default().event(name).data(data)
}

// ============================================================================
// SECTION: Handler
// ============================================================================

#[async_trait]
impl EndpointHandler for StreamingService {
    async fn serve(&self, request: RequestRecord, mut cancel: CancelSignal) -> Response {
        let basis = request.query_param("basis");
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let Ok(mut streams) = self.lock_streams() else {
                return axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response();
            };
            let frames = match self.connect_frames(basis.as_deref()) {
                Ok(frames) => frames,
                Err(_) => return axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            };
            for frame in frames {
                let _ = tx.send(StreamMessage::Frame(frame));
            }
            streams.push(tx);
        }
        self.log(
            "stream_connect",
            format!("{} basis={}", request.describe(), basis.as_deref().unwrap_or("")),
        );

        let (out_tx, out_rx) = mpsc::channel::<Result<Event, Infallible>>(RESPONSE_BUFFER);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    message = rx.recv() => match message {
                        Some(StreamMessage::Frame(frame)) => {
                            if out_tx.send(Ok(to_event(&frame))).await.is_err() {
                                break;
                            }
                        }
                        Some(StreamMessage::Close) | None => break,
                    },
                }
            }
        });
        Sse::new(ReceiverStream::new(out_rx)).into_response()
    }
}
