//! Session protocol state machine.
//!
//! Owns the WebSocket channel for one session: the spawned connection task is
//! the only place wire messages are read or written. Outbound traffic funnels
//! through a single mpsc queue (so exchange ordering is FIFO by construction)
//! and is recorded at write time; inbound messages are recorded at read time
//! and dispatched by key presence to the transcript, usage meter and playback
//! queue.
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Connecting → Connected(device auth) → Closing → Idle
//! ```
//!
//! Channel-level failures never panic and never propagate as errors to the
//! caller mid-session; they surface as [`SessionNotice`] alerts and the
//! machine returns to `Idle`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::ExchangeConfig;
use crate::core::audio::codec::decode_audio;
use crate::core::audio::playback::PlaybackHandle;
use crate::core::events::{AuthMessage, DeviceCredentials, Envelope, Role, ServerMessage};
use crate::core::recorder::{Direction, EventLogEntry, EventRecorder};
use crate::core::transcript::{ChatMessage, Transcript};
use crate::core::usage::{UsageMeter, UsageTotals};

/// Outbound queue capacity. Capture drops frames instead of blocking when the
/// queue is full.
const OUTBOUND_CAPACITY: usize = 256;

/// Session operation failure. Channel-level trouble after connect surfaces as
/// notices instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The channel could not be opened
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The operation is not valid in the current state
    #[error("invalid state for {0}")]
    InvalidState(&'static str),
    /// The operation needs an open channel
    #[error("not connected")]
    NotConnected,
    /// The outbound queue is gone; the connection task has ended
    #[error("outbound channel closed")]
    ChannelClosed,
    /// Another test exchange is still being sent
    #[error("an exchange is already in flight")]
    ExchangeInFlight,
    /// The previous prompt's audio stream is still open
    #[error("previous audio stream not closed; call end_audio_input first")]
    AudioStreamOpen,
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Device authentication progress within a connected session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceAuthState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    /// Rejected by the server; retryable via [`S2sSession::authenticate`]
    Failed,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected(DeviceAuthState),
    Closing,
}

/// User-visible updates emitted by the session engine.
#[derive(Debug, Clone)]
pub enum SessionNotice {
    /// Non-fatal problem the operator should see
    Alert(String),
    /// Device authentication accepted
    AuthSucceeded,
    /// Device authentication rejected, with the server's reason
    AuthFailed(String),
    /// A transcript entry changed
    TranscriptUpdated { content_id: String },
    /// Usage totals changed
    UsageUpdated(UsageTotals),
    /// The channel closed and the machine returned to idle
    Disconnected,
}

/// The open AUDIO content stream capture frames are addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTarget {
    pub prompt_name: String,
    pub content_name: String,
}

/// Messages accepted by the connection task's outbound queue.
#[derive(Debug)]
pub enum OutboundMessage {
    /// A protocol event to serialize, record and send
    Event(Value),
    /// Flush a close frame and end the task
    Close,
}

/// Everything the capture worker needs to gate and emit frames.
#[derive(Clone)]
pub struct CaptureFeed {
    /// Fast connected check, shared with the connection task
    pub connected: Arc<AtomicBool>,
    /// Currently open AUDIO stream, if any
    pub target: watch::Receiver<Option<CaptureTarget>>,
    /// The session's outbound queue
    pub outbound: mpsc::Sender<OutboundMessage>,
}

/// Prompt-scoped identifiers alive between exchange start and audio close.
#[derive(Debug, Clone)]
struct ActivePrompt {
    prompt_name: String,
    audio_content_name: String,
}

/// Generate a correlation identifier with a monotonically increasing
/// time-based suffix, unique across the process even under rapid calls.
fn correlation_id(prefix: &str) -> String {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let mut prev = LAST.load(Ordering::Relaxed);
    loop {
        let next = now_ms.max(prev + 1);
        match LAST.compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return format!("{prefix}_{next}"),
            Err(actual) => prev = actual,
        }
    }
}

/// Shared pieces the connection task dispatches inbound messages through.
struct InboundContext {
    state: Arc<RwLock<ConnectionState>>,
    transcript: Arc<parking_lot::Mutex<Transcript>>,
    usage: Arc<parking_lot::Mutex<UsageMeter>>,
    recorder: Arc<parking_lot::Mutex<EventRecorder>>,
    playback: PlaybackHandle,
    notices: mpsc::UnboundedSender<SessionNotice>,
}

impl InboundContext {
    fn notify(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }

    /// Route one inbound text frame. Malformed JSON is dropped with an alert;
    /// everything that parses is recorded, then each recognized signal is
    /// processed independently.
    async fn dispatch(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!("malformed inbound message: {e}");
                self.notify(SessionNotice::Alert("received a malformed message".into()));
                return;
            }
        };
        self.recorder.lock().record(Direction::In, value.clone());

        let message: ServerMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                debug!("unrecognized inbound shape: {e}");
                return;
            }
        };

        match message.message_type.as_deref() {
            Some("auth_success") => {
                info!("device authentication succeeded");
                *self.state.write().await = ConnectionState::Connected(DeviceAuthState::Authenticated);
                self.notify(SessionNotice::AuthSucceeded);
            }
            Some("auth_failed") => {
                let reason = message
                    .error
                    .unwrap_or_else(|| "authentication rejected".to_string());
                warn!("device authentication failed: {reason}");
                *self.state.write().await = ConnectionState::Connected(DeviceAuthState::Failed);
                self.notify(SessionNotice::AuthFailed(reason));
            }
            _ => {}
        }

        let Some(event) = message.event else { return };

        if let Some(usage) = event.usage_event {
            let totals = {
                let mut meter = self.usage.lock();
                meter.on_usage_event(&usage);
                meter.totals()
            };
            self.notify(SessionNotice::UsageUpdated(totals));
        }

        if let Some(start) = event.content_start {
            // Non-TEXT streams (AUDIO, tool-use relays) are not transcribed.
            if start.is_text() {
                self.transcript
                    .lock()
                    .on_content_start(&start.content_id, start.known_role());
            }
        }

        if let Some(text_output) = event.text_output {
            let applied = self.transcript.lock().on_text_output(
                &text_output.content_id,
                text_output.known_role(),
                &text_output.content,
            );
            if applied {
                self.notify(SessionNotice::TranscriptUpdated {
                    content_id: text_output.content_id,
                });
            } else {
                debug!(
                    content_id = %text_output.content_id,
                    "textOutput for unknown content stream dropped"
                );
            }
        }

        if let Some(audio) = event.audio_output {
            match decode_audio(&audio.content) {
                Ok(samples) => self.playback.play_audio(&samples),
                // Frame dropped, playback continues
                Err(e) => warn!("audio payload decode failed: {e}"),
            }
        }
    }
}

/// One live session against the S2S backend.
///
/// All mutable state is behind `Arc` so it can be shared with the spawned
/// connection task; the struct itself only needs `&self` for every operation.
pub struct S2sSession {
    config: ExchangeConfig,
    state: Arc<RwLock<ConnectionState>>,
    connected: Arc<AtomicBool>,
    outbound: Arc<Mutex<Option<mpsc::Sender<OutboundMessage>>>>,
    target_tx: watch::Sender<Option<CaptureTarget>>,
    target_rx: watch::Receiver<Option<CaptureTarget>>,
    transcript: Arc<parking_lot::Mutex<Transcript>>,
    usage: Arc<parking_lot::Mutex<UsageMeter>>,
    recorder: Arc<parking_lot::Mutex<EventRecorder>>,
    playback: PlaybackHandle,
    notices: mpsc::UnboundedSender<SessionNotice>,
    connection_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    active_prompt: Arc<parking_lot::Mutex<Option<ActivePrompt>>>,
    exchange_in_flight: Arc<AtomicBool>,
}

impl S2sSession {
    /// Build a session engine. Returns the engine and the notice stream the
    /// caller should drain for alerts and transcript/usage updates.
    pub fn new(
        config: ExchangeConfig,
        playback: PlaybackHandle,
    ) -> (Self, mpsc::UnboundedReceiver<SessionNotice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let (target_tx, target_rx) = watch::channel(None);
        let usage = UsageMeter::new(config.rates);
        let session = Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Idle)),
            connected: Arc::new(AtomicBool::new(false)),
            outbound: Arc::new(Mutex::new(None)),
            target_tx,
            target_rx,
            transcript: Arc::new(parking_lot::Mutex::new(Transcript::default())),
            usage: Arc::new(parking_lot::Mutex::new(usage)),
            recorder: Arc::new(parking_lot::Mutex::new(EventRecorder::default())),
            playback,
            notices,
            connection_handle: Arc::new(Mutex::new(None)),
            active_prompt: Arc::new(parking_lot::Mutex::new(None)),
            exchange_in_flight: Arc::new(AtomicBool::new(false)),
        };
        (session, notice_rx)
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Lock-free connected check.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Transcript entries in stream-open order.
    pub fn transcript_snapshot(&self) -> Vec<(String, ChatMessage)> {
        self.transcript.lock().snapshot()
    }

    /// Running usage totals.
    pub fn usage_totals(&self) -> UsageTotals {
        self.usage.lock().totals()
    }

    /// Zero the usage meter (console "Reset Meter").
    pub fn reset_meter(&self) {
        self.usage.lock().reset();
    }

    /// Recorded wire traffic, newest first.
    pub fn event_log(&self) -> Vec<EventLogEntry> {
        self.recorder.lock().entries().cloned().collect()
    }

    /// Drop the recorded wire traffic (console "Clear Events").
    pub fn clear_event_log(&self) {
        self.recorder.lock().clear();
    }

    /// Gate and queue handles for a capture pipeline. Errors if no channel is
    /// open.
    pub async fn capture_feed(&self) -> Result<CaptureFeed, SessionError> {
        let outbound = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or(SessionError::NotConnected)?;
        Ok(CaptureFeed {
            connected: Arc::clone(&self.connected),
            target: self.target_rx.clone(),
            outbound,
        })
    }

    /// Open the channel. Valid from `Idle`; a session still `Closing` waits
    /// for its teardown to settle first. With credentials supplied, the device
    /// auth handshake is sent immediately and the session lands in
    /// `Connected(Authenticating)`.
    pub async fn connect(
        &self,
        url: &str,
        credentials: Option<DeviceCredentials>,
    ) -> Result<(), SessionError> {
        loop {
            {
                let mut state = self.state.write().await;
                match *state {
                    ConnectionState::Idle => {
                        *state = ConnectionState::Connecting;
                        break;
                    }
                    // A disconnect is still tearing down; wait it out below.
                    ConnectionState::Closing => {}
                    _ => return Err(SessionError::InvalidState("connect")),
                }
            }
            let handle = self.connection_handle.lock().await.take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stream = match tokio_tungstenite::connect_async(url).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Idle;
                let _ = self
                    .notices
                    .send(SessionNotice::Alert(format!("connection failed: {e}")));
                return Err(SessionError::ConnectionFailed(e.to_string()));
            }
        };
        info!(url, "session channel open");

        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_CAPACITY);
        *self.outbound.lock().await = Some(tx.clone());

        let context = InboundContext {
            state: Arc::clone(&self.state),
            transcript: Arc::clone(&self.transcript),
            usage: Arc::clone(&self.usage),
            recorder: Arc::clone(&self.recorder),
            playback: self.playback.clone(),
            notices: self.notices.clone(),
        };
        let connected = Arc::clone(&self.connected);
        let outbound = Arc::clone(&self.outbound);
        let target_tx = self.target_tx.clone();
        let active_prompt = Arc::clone(&self.active_prompt);

        connected.store(true, Ordering::SeqCst);
        *self.state.write().await = ConnectionState::Connected(DeviceAuthState::default());

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = rx.recv() => match outgoing {
                        Some(OutboundMessage::Event(value)) => {
                            let text = value.to_string();
                            context.recorder.lock().record(Direction::Out, value);
                            if let Err(e) = sink.send(Message::Text(text.into())).await {
                                warn!("send failed: {e}");
                                context.notify(SessionNotice::Alert(format!("send failed: {e}")));
                                break;
                            }
                        }
                        Some(OutboundMessage::Close) => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                        None => break,
                    },
                    incoming = source.next() => match incoming {
                        Some(Ok(Message::Text(text))) => context.dispatch(&text).await,
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = sink.send(Message::Pong(data)).await {
                                warn!("pong failed: {e}");
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("channel closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("channel error: {e}");
                            context.notify(SessionNotice::Alert(format!("channel error: {e}")));
                            break;
                        }
                        None => break,
                    },
                }
            }

            // Teardown: gate capture first so late blocks go nowhere, then
            // clear session-scoped state and settle back to idle.
            connected.store(false, Ordering::SeqCst);
            let _ = target_tx.send(None);
            active_prompt.lock().take();
            *outbound.lock().await = None;
            {
                let mut state = context.state.write().await;
                if !matches!(*state, ConnectionState::Closing) {
                    context.notify(SessionNotice::Alert("channel closed unexpectedly".into()));
                }
                *state = ConnectionState::Idle;
            }
            context.transcript.lock().clear();
            context.notify(SessionNotice::Disconnected);
            debug!("connection task ended");
        });
        *self.connection_handle.lock().await = Some(handle);

        if let Some(credentials) = credentials {
            self.authenticate(credentials).await?;
        }
        Ok(())
    }

    /// Send the device auth handshake. Valid whenever the channel is open;
    /// re-invoking after `auth_failed` retries.
    pub async fn authenticate(&self, credentials: DeviceCredentials) -> Result<(), SessionError> {
        {
            let mut state = self.state.write().await;
            match *state {
                ConnectionState::Connected(_) => {
                    *state = ConnectionState::Connected(DeviceAuthState::Authenticating);
                }
                _ => return Err(SessionError::NotConnected),
            }
        }
        let value = serde_json::to_value(AuthMessage { auth: credentials })?;
        self.send_event(value).await
    }

    /// Run the fixed opening sequence of a test exchange:
    /// `sessionStart, promptStart, contentStart(TEXT), textInput(system
    /// prompt), contentEnd, contentStart(AUDIO)`. Any chat-history turns and
    /// the optional user message follow, each as its own start/input/end
    /// triple. The AUDIO stream stays open and becomes the capture target.
    ///
    /// Only one exchange may be in flight, and a new prompt is refused until
    /// the previous audio stream was closed via [`Self::end_audio_input`].
    pub async fn start_test_exchange(
        &self,
        user_message: Option<&str>,
    ) -> Result<(), SessionError> {
        if !matches!(self.state().await, ConnectionState::Connected(_)) {
            return Err(SessionError::InvalidState("start_test_exchange"));
        }
        if self.active_prompt.lock().is_some() {
            return Err(SessionError::AudioStreamOpen);
        }
        if self
            .exchange_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::ExchangeInFlight);
        }
        let guard = InFlightGuard(&self.exchange_in_flight);

        self.usage.lock().reset();

        let prompt_name = correlation_id("prompt");
        let system_content = correlation_id("content");
        let audio_content = correlation_id("audio");

        self.send_paced(Envelope::session_start(self.config.inference))
            .await?;
        self.send_paced(Envelope::prompt_start(
            &prompt_name,
            &self.config.voice_id,
            self.config.tool_configuration.clone(),
        ))
        .await?;
        self.send_paced(Envelope::content_start_text(
            &prompt_name,
            &system_content,
            Role::System,
        ))
        .await?;
        self.send_paced(Envelope::text_input(
            &prompt_name,
            &system_content,
            &self.config.system_prompt,
        ))
        .await?;
        self.send_paced(Envelope::content_end(&prompt_name, &system_content))
            .await?;
        self.send_paced(Envelope::content_start_audio(&prompt_name, &audio_content))
            .await?;

        for turn in &self.config.chat_history {
            let content_name = correlation_id("content");
            self.send_history_paced(Envelope::content_start_text(
                &prompt_name,
                &content_name,
                turn.role,
            ))
            .await?;
            self.send_history_paced(Envelope::text_input(
                &prompt_name,
                &content_name,
                &turn.content,
            ))
            .await?;
            self.send_history_paced(Envelope::content_end(&prompt_name, &content_name))
                .await?;
        }

        if let Some(message) = user_message {
            let content_name = correlation_id("content");
            self.send_paced(Envelope::content_start_text(
                &prompt_name,
                &content_name,
                Role::User,
            ))
            .await?;
            self.send_paced(Envelope::text_input(&prompt_name, &content_name, message))
                .await?;
            self.send_paced(Envelope::content_end(&prompt_name, &content_name))
                .await?;
        }

        *self.active_prompt.lock() = Some(ActivePrompt {
            prompt_name: prompt_name.clone(),
            audio_content_name: audio_content.clone(),
        });
        let _ = self.target_tx.send(Some(CaptureTarget {
            prompt_name,
            content_name: audio_content,
        }));
        drop(guard);
        Ok(())
    }

    /// Close the open AUDIO stream of the current prompt and clear the
    /// capture target. No-op when no prompt is active.
    pub async fn end_audio_input(&self) -> Result<(), SessionError> {
        let Some(prompt) = self.active_prompt.lock().take() else {
            return Ok(());
        };
        let _ = self.target_tx.send(None);
        self.send_event(
            Envelope::content_end(prompt.prompt_name, prompt.audio_content_name).into_value()?,
        )
        .await
    }

    /// Close the channel and clear session-scoped state. Idempotent; safe to
    /// call from any state.
    pub async fn disconnect(&self) {
        {
            let mut state = self.state.write().await;
            if matches!(*state, ConnectionState::Idle) {
                return;
            }
            *state = ConnectionState::Closing;
        }
        // Claim the task handle before anything else so a concurrent
        // reconnect waiting out the Closing state cannot race us for it.
        let handle = self.connection_handle.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.target_tx.send(None);
        self.active_prompt.lock().take();

        let sender = self.outbound.lock().await.take();
        if let Some(sender) = sender {
            // Best effort close frame; the task also exits when the queue drops.
            let _ = sender.send(OutboundMessage::Close).await;
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.transcript.lock().clear();
        {
            // A reconnect may already have advanced past Closing.
            let mut state = self.state.write().await;
            if matches!(*state, ConnectionState::Closing) {
                *state = ConnectionState::Idle;
            }
        }
        info!("session disconnected");
    }

    async fn send_event(&self, value: Value) -> Result<(), SessionError> {
        let sender = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or(SessionError::NotConnected)?;
        sender
            .send(OutboundMessage::Event(value))
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }

    /// Send one exchange event, then hold for the inter-send pacing delay the
    /// backend's ingestion expects.
    async fn send_paced(&self, event: Envelope) -> Result<(), SessionError> {
        self.send_event(event.into_value()?).await?;
        tokio::time::sleep(self.config.send_pacing).await;
        Ok(())
    }

    /// History replay runs at a tighter pacing than the live exchange.
    async fn send_history_paced(&self, event: Envelope) -> Result<(), SessionError> {
        self.send_event(event.into_value()?).await?;
        tokio::time::sleep(self.config.history_pacing).await;
        Ok(())
    }
}

/// Clears the in-flight flag when an exchange ends, on success or error.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_strictly_increasing() {
        let suffix = |id: String| -> u64 {
            id.rsplit('_')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default()
        };
        let mut previous = 0;
        for _ in 0..1000 {
            let next = suffix(correlation_id("content"));
            assert!(next > previous, "{next} did not advance past {previous}");
            previous = next;
        }
    }

    #[test]
    fn correlation_id_carries_prefix() {
        assert!(correlation_id("prompt").starts_with("prompt_"));
    }

    #[test]
    fn default_state_is_idle_and_unauthenticated() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
        assert_eq!(DeviceAuthState::default(), DeviceAuthState::Unauthenticated);
    }
}
