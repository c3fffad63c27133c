//! One virtual charge point's WebSocket connection to the CSMS.
//!
//! The session owns the outbound sink behind a mutex and a single reader
//! task; all per-session state is mutated from that task or behind locks
//! with short critical sections. `VcpSession` is a cheap cloneable handle.

use crate::dispatch::Dispatcher;
use crate::error::{SessionError, SessionResult};
use crate::pending::PendingCalls;
use vcp_messages::OcppPayload;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;
use vcp_messages::{OcppRequest, ValidationError};
use vcp_types::{Call, CallError, CallErrorCode, CallResult, ChargerConfig, Frame, OcppVersion};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Default eviction timeout for outstanding calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

pub type CloseCallback = Arc<dyn Fn(u16, String) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&SessionError) + Send + Sync>;

/// Construction parameters for a [`VcpSession`].
pub struct SessionOptions {
    /// CSMS endpoint, ws:// or wss://. The charge point id is appended to
    /// the path at connect time.
    pub endpoint: String,
    pub version: OcppVersion,
    pub config: ChargerConfig,
    /// Boundary hint for the enclosing process: when true, whoever installed
    /// `on_close` is expected to terminate the process. The session itself
    /// never exits; it only reports the close.
    pub exit_on_close: bool,
    pub call_timeout: Duration,
    pub on_close: Option<CloseCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl SessionOptions {
    pub fn new(endpoint: impl Into<String>, config: ChargerConfig) -> Self {
        SessionOptions {
            endpoint: endpoint.into(),
            version: OcppVersion::V16,
            config,
            exit_on_close: false,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            on_close: None,
            on_error: None,
        }
    }
}

struct SessionInner {
    options: SessionOptions,
    dispatcher: Dispatcher,
    state: RwLock<SessionState>,
    sink: Mutex<Option<WsSink>>,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    pending: PendingCalls,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

#[derive(Clone)]
pub struct VcpSession {
    inner: Arc<SessionInner>,
}

impl VcpSession {
    pub fn new(options: SessionOptions, dispatcher: Dispatcher) -> Self {
        let pending = PendingCalls::new(options.call_timeout);
        VcpSession {
            inner: Arc::new(SessionInner {
                options,
                dispatcher,
                state: RwLock::new(SessionState::Closed),
                sink: Mutex::new(None),
                reader: Mutex::new(None),
                pending,
                messages_sent: AtomicU64::new(0),
                messages_received: AtomicU64::new(0),
            }),
        }
    }

    pub fn cp_id(&self) -> &str {
        &self.inner.options.config.cp_id
    }

    pub fn config(&self) -> &ChargerConfig {
        &self.inner.options.config
    }

    pub fn version(&self) -> OcppVersion {
        self.inner.options.version
    }

    pub fn exit_on_close(&self) -> bool {
        self.inner.options.exit_on_close
    }

    pub async fn state(&self) -> SessionState {
        *self.inner.state.read().await
    }

    pub async fn is_open(&self) -> bool {
        self.state().await == SessionState::Open
    }

    pub fn messages_sent(&self) -> u64 {
        self.inner.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.inner.messages_received.load(Ordering::Relaxed)
    }

    pub(crate) fn pending(&self) -> &PendingCalls {
        &self.inner.pending
    }

    /// The endpoint with the charge point id appended, e.g.
    /// `ws://csms.example/v1` -> `ws://csms.example/v1/CP-A`.
    fn session_url(&self) -> SessionResult<Url> {
        let mut url = Url::parse(&self.inner.options.endpoint)
            .map_err(|e| SessionError::InvalidEndpoint(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(SessionError::InvalidEndpoint(format!(
                    "unsupported scheme {other}, expected ws or wss"
                )))
            }
        }
        url.path_segments_mut()
            .map_err(|_| SessionError::InvalidEndpoint("endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .push(self.cp_id());
        Ok(url)
    }

    /// Open the WebSocket, advertising the OCPP subprotocol, and start the
    /// reader task. Completes once the handshake is done; from that point
    /// the session can receive even before the caller's first send. The
    /// session does not send BootNotification on its own.
    pub async fn connect(&self) -> SessionResult<()> {
        let url = self.session_url()?;
        *self.inner.state.write().await = SessionState::Connecting;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::ConnectFailure(e.to_string()))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_str(self.inner.options.version.subprotocol())
                .map_err(|e| SessionError::ConnectFailure(e.to_string()))?,
        );

        let (stream, response) = connect_async(request).await.map_err(|e| {
            SessionError::ConnectFailure(format!("handshake with {url} failed: {e}"))
        })?;
        debug!(cp_id = %self.cp_id(), status = %response.status(), "websocket handshake complete");

        let (sink, stream) = stream.split();
        *self.inner.sink.lock().await = Some(sink);
        *self.inner.state.write().await = SessionState::Open;

        let session = self.clone();
        let handle = tokio::spawn(async move {
            session.run_reader(stream).await;
        });
        *self.inner.reader.lock().await = Some(handle);

        info!(cp_id = %self.cp_id(), %url, "session open");
        Ok(())
    }

    /// Send a typed request and await the correlated, schema-checked
    /// response.
    pub async fn call<T: OcppRequest>(&self, request: &T) -> SessionResult<T::Response> {
        request.validate()?;
        let call = vcp_messages::to_call(request)?;
        let payload = self.call_raw(call).await?;
        let response: T::Response =
            serde_json::from_value(payload).map_err(ValidationError::from_decode)?;
        response.validate()?;
        Ok(response)
    }

    /// Send a pre-built Call and await the raw response payload.
    pub async fn call_raw(&self, call: Call) -> SessionResult<Value> {
        if !self.is_open().await {
            return Err(SessionError::TransportClosed);
        }
        let message_id = call.message_id.clone();
        let rx = self.inner.pending.register(&call).await;
        if let Err(e) = self.send_frame(Frame::Call(call)).await {
            let _ = self.inner.pending.take(&message_id).await;
            return Err(e);
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::TransportClosed),
        }
    }

    /// Send a typed request without awaiting the response. The call is
    /// still registered for correlation so the action's response hook fires
    /// when the CSMS replies; nobody waits on the outcome.
    pub async fn send<T: OcppRequest>(&self, request: &T) -> SessionResult<()> {
        request.validate()?;
        let call = vcp_messages::to_call(request)?;
        let message_id = call.message_id.clone();
        let _rx = self.inner.pending.register(&call).await;
        if let Err(e) = self.send_frame(Frame::Call(call)).await {
            let _ = self.inner.pending.take(&message_id).await;
            return Err(e);
        }
        Ok(())
    }

    /// Fire-and-forget a CallResult for a request we received.
    pub async fn respond(&self, result: CallResult) {
        if let Err(e) = self.send_frame(Frame::CallResult(result)).await {
            warn!(cp_id = %self.cp_id(), "failed to send call result: {e}");
        }
    }

    /// Fire-and-forget a CallError for a request we received.
    pub async fn respond_error(&self, error: CallError) {
        if let Err(e) = self.send_frame(Frame::CallError(error)).await {
            warn!(cp_id = %self.cp_id(), "failed to send call error: {e}");
        }
    }

    async fn send_frame(&self, frame: Frame) -> SessionResult<()> {
        let text = frame.encode()?;
        let mut guard = self.inner.sink.lock().await;
        let sink = guard.as_mut().ok_or(SessionError::TransportClosed)?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| SessionError::Send(e.to_string()))?;
        self.inner.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Close the session. Idempotent; fails all outstanding calls with
    /// `TransportClosed` and invokes `on_close` exactly once.
    pub async fn close(&self) {
        {
            let mut state = self.inner.state.write().await;
            if matches!(*state, SessionState::Closing | SessionState::Closed) {
                return;
            }
            *state = SessionState::Closing;
        }

        if let Some(sink) = self.inner.sink.lock().await.as_mut() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        if let Some(handle) = self.inner.reader.lock().await.take() {
            handle.abort();
        }
        self.finish_close(1000, "closed by client".to_string()).await;
    }

    /// Terminal close path, shared by `close()` and the reader task. Only
    /// the first caller runs the teardown.
    async fn finish_close(&self, code: u16, reason: String) {
        {
            let mut state = self.inner.state.write().await;
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }

        *self.inner.sink.lock().await = None;
        self.inner.pending.fail_all().await;

        info!(cp_id = %self.cp_id(), code, reason = %reason, "session closed");
        if let Some(on_close) = &self.inner.options.on_close {
            on_close(code, reason);
        }
    }

    async fn run_reader(self, mut stream: SplitStream<WsStream>) {
        let (close_code, close_reason) = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.inner.messages_received.fetch_add(1, Ordering::Relaxed);
                    match Frame::decode(&text) {
                        Ok(frame) => {
                            self.inner
                                .dispatcher
                                .dispatch(self.clone(), frame)
                                .await;
                        }
                        Err(e) => {
                            warn!(cp_id = %self.cp_id(), "unparseable frame: {e}");
                            self.report_error(&SessionError::Protocol(e));
                            // Answer with ProtocolError when the frame is
                            // broken but its message id is recoverable.
                            if let Some(message_id) = recover_message_id(&text) {
                                self.respond_error(CallError::new(
                                    message_id,
                                    CallErrorCode::ProtocolError,
                                    "malformed OCPP-J frame",
                                ))
                                .await;
                            }
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let mut guard = self.inner.sink.lock().await;
                    if let Some(sink) = guard.as_mut() {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    break (code, reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(cp_id = %self.cp_id(), "websocket read error: {e}");
                    self.report_error(&SessionError::Send(e.to_string()));
                    break (1006, e.to_string());
                }
                None => break (1006, "stream ended".to_string()),
            }
        };
        self.finish_close(close_code, close_reason).await;
    }

    fn report_error(&self, error: &SessionError) {
        if let Some(on_error) = &self.inner.options.on_error {
            on_error(error);
        }
    }
}

/// Best-effort extraction of the message id out of a frame that failed to
/// decode, so the peer still gets a correlated ProtocolError.
fn recover_message_id(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    match value.get(1)? {
        Value::String(id) => Some(id.clone()),
        _ => None,
    }
}
