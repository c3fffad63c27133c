//! Routing of inbound frames to per-action handlers.
//!
//! Two registries, both keyed by action name: request handlers for
//! CSMS-initiated Calls, and response handlers that fire when the CSMS
//! answers one of our own Calls (e.g. StartTransaction assigning the
//! transaction id). Payloads are schema-checked in both directions before a
//! handler sees them.

use crate::session::VcpSession;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};
use vcp_messages::{MessageRegistry, OcppRequest, ValidationError};
use vcp_types::{Call, CallError, CallErrorCode, CallResult, Frame};

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, ValidationError>> + Send>>;
type NotifyFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handles one CSMS-initiated request; returns the response payload or the
/// error to put in a CallError.
pub type RequestHandler = Arc<dyn Fn(VcpSession, Call) -> HandlerFuture + Send + Sync>;

/// Fires when a CallResult arrives for one of our Calls, before the awaiter
/// wakes. Receives the original Call and the raw response payload.
pub type ResponseHandler = Arc<dyn Fn(VcpSession, Call, Value) -> NotifyFuture + Send + Sync>;

/// Wrap a typed async function as a [`RequestHandler`].
pub fn request_handler<T, F, Fut>(f: F) -> RequestHandler
where
    T: OcppRequest + 'static,
    F: Fn(VcpSession, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T::Response, ValidationError>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |session: VcpSession, call: Call| {
        let f = Arc::clone(&f);
        Box::pin(async move {
            let request: T = vcp_messages::from_call(&call)?;
            let response = f(session, request).await?;
            serde_json::to_value(response).map_err(|e| {
                ValidationError::new(CallErrorCode::InternalError, e.to_string())
            })
        })
    })
}

/// Wrap a typed async function as a [`ResponseHandler`].
pub fn response_handler<T, F, Fut>(f: F) -> ResponseHandler
where
    T: OcppRequest + 'static,
    F: Fn(VcpSession, T, T::Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |session: VcpSession, call: Call, payload: Value| {
        let f = Arc::clone(&f);
        Box::pin(async move {
            let request: T = match vcp_messages::from_call(&call) {
                Ok(request) => request,
                Err(e) => {
                    warn!(action = %call.action, "response handler: original call no longer decodes: {e}");
                    return;
                }
            };
            let response: T::Response = match serde_json::from_value(payload) {
                Ok(response) => response,
                Err(e) => {
                    warn!(action = %call.action, "response handler: bad response payload: {e}");
                    return;
                }
            };
            f(session, request, response).await;
        })
    })
}

pub struct Dispatcher {
    registry: MessageRegistry,
    request_handlers: HashMap<&'static str, RequestHandler>,
    response_handlers: HashMap<&'static str, ResponseHandler>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder {
            registry: MessageRegistry::v16(),
            request_handlers: HashMap::new(),
            response_handlers: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    /// Route one inbound frame.
    pub async fn dispatch(&self, session: VcpSession, frame: Frame) {
        match frame {
            Frame::Call(call) => self.dispatch_call(session, call).await,
            Frame::CallResult(result) => self.dispatch_result(session, result).await,
            Frame::CallError(error) => self.dispatch_error(session, error).await,
        }
    }

    async fn dispatch_call(&self, session: VcpSession, call: Call) {
        debug!(action = %call.action, message_id = %call.message_id, "inbound call");

        let handler = match self.request_handlers.get(call.action.as_str()) {
            Some(handler) => Arc::clone(handler),
            None => {
                session
                    .respond_error(CallError::new(
                        &call.message_id,
                        CallErrorCode::NotImplemented,
                        format!("action {} is not implemented", call.action),
                    ))
                    .await;
                return;
            }
        };

        if let Ok(descriptor) = self.registry.require(&call.action) {
            if let Err(e) = descriptor.check_request(&call.payload) {
                session
                    .respond_error(CallError::new(&call.message_id, e.code, e.detail))
                    .await;
                return;
            }
        }

        let message_id = call.message_id.clone();
        match handler(session.clone(), call).await {
            Ok(payload) => {
                session
                    .respond(CallResult {
                        message_id,
                        payload,
                    })
                    .await;
            }
            Err(e) => {
                session
                    .respond_error(CallError::new(&message_id, e.code, e.detail))
                    .await;
            }
        }
    }

    async fn dispatch_result(&self, session: VcpSession, result: CallResult) {
        let entry = match session.pending().take(&result.message_id).await {
            Some(entry) => entry,
            None => {
                warn!(message_id = %result.message_id, "call result with no pending call");
                return;
            }
        };

        if let Some(descriptor) = self.registry.lookup(&entry.action) {
            if let Err(e) = descriptor.check_response(&result.payload) {
                warn!(action = %entry.action, "response failed schema check: {e}");
                entry.complete(Err(e.into()));
                return;
            }
        }

        // The response hook runs before the awaiter wakes, so anything it
        // sends is ordered ahead of the caller's next frame.
        if let Some(handler) = self.response_handlers.get(entry.action.as_str()) {
            let original = Call {
                message_id: result.message_id.clone(),
                action: entry.action.clone(),
                payload: entry.request.clone(),
            };
            handler(session.clone(), original, result.payload.clone()).await;
        }

        entry.complete(Ok(result.payload));
    }

    async fn dispatch_error(&self, session: VcpSession, error: CallError) {
        match session.pending().take(&error.message_id).await {
            Some(entry) => {
                warn!(
                    action = %entry.action,
                    code = %error.code,
                    "call failed: {}",
                    error.description
                );
                entry.complete(Err(crate::error::SessionError::CallError(error)));
            }
            None => {
                warn!(message_id = %error.message_id, "call error with no pending call");
            }
        }
    }
}

pub struct DispatcherBuilder {
    registry: MessageRegistry,
    request_handlers: HashMap<&'static str, RequestHandler>,
    response_handlers: HashMap<&'static str, ResponseHandler>,
}

impl DispatcherBuilder {
    /// Register the handler for an incoming request action.
    pub fn on_request<T, F, Fut>(mut self, f: F) -> Self
    where
        T: OcppRequest + 'static,
        F: Fn(VcpSession, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T::Response, ValidationError>> + Send + 'static,
    {
        self.request_handlers.insert(T::ACTION, request_handler(f));
        self
    }

    /// Register the hook that fires when the CSMS answers one of our calls.
    pub fn on_response<T, F, Fut>(mut self, f: F) -> Self
    where
        T: OcppRequest + 'static,
        F: Fn(VcpSession, T, T::Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.response_handlers
            .insert(T::ACTION, response_handler(f));
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            registry: self.registry,
            request_handlers: self.request_handlers,
            response_handlers: self.response_handlers,
        }
    }
}
