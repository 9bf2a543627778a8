//! The Dispatcher (spec.md §4.3): routes inbound messages to handlers,
//! enforces LSP lifecycle rules, and manages per-request cancellation and
//! result-stream folding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use futures::StreamExt;
use log::warn;
use serde_json::{json, Value};
use tokio::io::AsyncWrite;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

use crate::cancel::{self, CancelSource};
use crate::codec::{self, FramedWriter};
use crate::concurrency::CancelHandle;
use crate::emitter::Event;
use crate::error::HandlerError;
use crate::handler::HandlerTable;
use crate::lifecycle::ConnectionState;
use crate::message::{self, error_code, ErrorObject, Message, RawNotification, RawRequest, RequestId};
use crate::patch;
use crate::tracing::{LoggingTracer, Span, Tracer};

const CANCEL_REQUEST_METHOD: &str = "$/cancelRequest";
const PARTIAL_RESULT_METHOD: &str = "$/partialResult";

struct PendingEntry {
    cancel_source: CancelSource,
    abort: CancelHandle,
}

/// Per-connection dispatch core. Cheap to clone: every field is `Arc`-backed,
/// so the same `Dispatcher` can be handed to every per-request task spawned
/// to drive a handler's result stream (spec.md §5: the dispatcher itself is
/// single-threaded relative to one connection, but handler futures run
/// concurrently).
pub struct Dispatcher<T> {
    handlers: Arc<HandlerTable>,
    state: Arc<ConnectionState>,
    pending: Arc<StdMutex<HashMap<RequestId, PendingEntry>>>,
    writer: Arc<AsyncMutex<FramedWriter<T>>>,
    tracer: Arc<dyn Tracer>,
    default_streaming: bool,
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Dispatcher {
            handlers: self.handlers.clone(),
            state: self.state.clone(),
            pending: self.pending.clone(),
            writer: self.writer.clone(),
            tracer: self.tracer.clone(),
            default_streaming: self.default_streaming,
        }
    }
}

impl<T> Dispatcher<T>
where
    T: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(handlers: HandlerTable, writer: FramedWriter<T>) -> Self {
        Dispatcher {
            handlers: Arc::new(handlers),
            state: Arc::new(ConnectionState::new()),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            writer: Arc::new(AsyncMutex::new(writer)),
            tracer: Arc::new(LoggingTracer),
            default_streaming: false,
        }
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Sets the `streamingCapable` default used by `initialize` when the
    /// client's `capabilities.streaming` is absent, per
    /// `Config::default_streaming`.
    pub fn with_default_streaming(mut self, default_streaming: bool) -> Self {
        self.default_streaming = default_streaming;
        self
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Drives the dispatch loop until the inbound emitter closes. Each
    /// message is handled to completion before the next is pulled off the
    /// channel; request handling itself is spawned onto its own task so a
    /// slow handler never blocks dispatch of the next message (spec.md §5).
    pub async fn run(&self, mut events: broadcast::Receiver<Event>) {
        loop {
            match events.recv().await {
                Ok(Event::Message(msg)) => self.handle_message(msg).await,
                Ok(Event::Error(err)) => {
                    warn!("protocol error from inbound stream: {:?}", err);
                }
                Ok(Event::Close) => {
                    self.handle_close().await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("dispatcher lagged {} events behind the message emitter", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn handle_message(&self, msg: Message) {
        match msg {
            // Step 1: this endpoint never issues its own requests over this
            // connection (only the Master Router's back-end connections do,
            // and those run their own `Connection` response handling), so a
            // `Response` here is always discarded.
            Message::Response(_) => {}
            Message::Request(req) => self.handle_request(req).await,
            Message::Notification(note) => self.handle_notification(note).await,
        }
    }

    async fn handle_request(&self, req: RawRequest) {
        match req.method.as_str() {
            "initialize" => {
                let streaming = req
                    .params
                    .get("capabilities")
                    .and_then(|c| c.get("streaming"))
                    .and_then(Value::as_bool)
                    .unwrap_or(self.default_streaming);
                self.state.on_initialize(streaming);
            }
            "shutdown" => self.state.on_shutdown(),
            _ => {}
        }

        let handler = match self.handlers.resolve(&req.method) {
            Some(handler) => handler,
            None => {
                self.write_response(&req.id, Err(ErrorObject::method_not_found(&req.method))).await;
                return;
            }
        };

        let span = self.tracer.start_span(&format!("Handle {}", req.method), req.meta.as_ref());
        span.tag("params", &req.params.to_string());

        let (cancel_source, cancel_token) = cancel::pair();
        let stream = handler.call(req.params, req.meta, cancel_token);
        let (abort, stream) = CancelHandle::wrap_stream(stream);

        {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(req.id.clone(), PendingEntry { cancel_source, abort });
        }

        let dispatcher = self.clone();
        let id = req.id;
        let method = req.method;
        tokio::spawn(async move {
            dispatcher.drive_request(id, method, stream, span).await;
        });
    }

    async fn drive_request(
        &self,
        id: RequestId,
        method: String,
        mut stream: futures::stream::Abortable<crate::handler::ResultStream>,
        span: Arc<dyn Span>,
    ) {
        let streaming = self.state.streaming_capable();
        let mut acc = Value::Null;
        let mut failure: Option<HandlerError> = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(op) => {
                    if streaming {
                        self.write_notification(
                            PARTIAL_RESULT_METHOD,
                            json!({"id": id.to_json(), "patch": [&op]}),
                        )
                        .await;
                    }
                    if let Err(err) = patch::apply(&mut acc, &op) {
                        warn!("handler for {} produced an unfoldable patch: {}", method, err);
                    }
                }
                Err(err) => {
                    span.mark_error(&err.message);
                    failure = Some(err);
                    break;
                }
            }
        }

        // spec.md §4.3 step 6: schedule pending-table removal on the next
        // turn of the event loop so a synchronous stream cannot race its own
        // registration.
        tokio::task::yield_now().await;

        let entry = self.pending.lock().unwrap().remove(&id);
        let was_cancelled = entry.is_none();
        if was_cancelled {
            // The cancel path already removed this entry and wrote the
            // `RequestCancelled` response; results produced after
            // cancellation are discarded without writing to the wire.
            span.finish();
            return;
        }

        match failure {
            Some(err) => self.write_response(&id, Err(err.into_error_object())).await,
            None => self.write_response(&id, Ok(acc)).await,
        }
        span.finish();
    }

    async fn handle_notification(&self, note: RawNotification) {
        match note.method.as_str() {
            "exit" => self.handle_exit().await,
            m if m == CANCEL_REQUEST_METHOD => self.handle_cancel(note.params).await,
            _ => {
                let handler = match self.handlers.resolve(&note.method) {
                    Some(handler) => handler,
                    None => {
                        warn!("no handler registered for notification method {}", note.method);
                        return;
                    }
                };
                let span = self.tracer.start_span(&format!("Handle {}", note.method), note.meta.as_ref());
                let (_source, token) = cancel::pair();
                let mut stream = handler.call(note.params, note.meta, token);
                while let Some(item) = stream.next().await {
                    if let Err(err) = item {
                        span.mark_error(&err.message);
                        warn!("notification handler for {} failed: {}", note.method, err.message);
                    }
                }
                span.finish();
            }
        }
    }

    /// `$/cancelRequest` (spec.md §4.3 step 2, §6): look up `params.id`,
    /// invoke its Cancel Handle, remove the entry, and respond to the
    /// cancelled request id with `RequestCancelled`. Unknown ids are logged
    /// and otherwise ignored; no response is ever sent for the cancel
    /// notification itself.
    async fn handle_cancel(&self, params: Value) {
        let id = match params.get("id") {
            Some(raw) => match message::parse_request_id_value(raw) {
                Some(id) => id,
                None => {
                    warn!("$/cancelRequest with unparseable id: {:?}", raw);
                    return;
                }
            },
            None => {
                warn!("$/cancelRequest without an id");
                return;
            }
        };

        let entry = self.pending.lock().unwrap().remove(&id);
        match entry {
            Some(entry) => {
                entry.cancel_source.cancel();
                entry.abort.cancel();
                self.write_response(&id, Err(ErrorObject::request_cancelled())).await;
            }
            None => warn!("$/cancelRequest for unknown or already-settled id {}", id),
        }
    }

    /// `exit` (spec.md §4.3 step 2, §5): cancel every pending request and go
    /// terminal. Never produces a response, and must not be forwarded to the
    /// backend handler — it is purely this transport's concern.
    async fn handle_exit(&self) {
        let mut pending = self.pending.lock().unwrap();
        for (_, entry) in pending.drain() {
            entry.cancel_source.cancel();
            entry.abort.cancel();
        }
        drop(pending);
        self.state.on_exit();
    }

    /// Transport error/close handling (spec.md §7): cancel all pending
    /// requests; if still `initialized`, synthesize a `shutdown()` call to
    /// the backend handler before going terminal.
    async fn handle_close(&self) {
        let still_initialized = self.state.is_initialized();
        {
            let mut pending = self.pending.lock().unwrap();
            for (_, entry) in pending.drain() {
                entry.cancel_source.cancel();
                entry.abort.cancel();
            }
        }

        if still_initialized {
            if let Some(handler) = self.handlers.resolve("shutdown") {
                warn!("connection closed while initialized; synthesizing shutdown()");
                let (_source, token) = cancel::pair();
                let mut stream = handler.call(Value::Null, None, token);
                while stream.next().await.is_some() {}
            }
        }
        self.state.on_exit();
    }

    async fn write_response(&self, id: &RequestId, result: Result<Value, ErrorObject>) {
        let wire = message::wire_response(id.clone(), result);
        let value = match serde_json::to_value(&wire) {
            Ok(v) => v,
            Err(err) => {
                warn!("failed to serialize response for {}: {}", id, err);
                return;
            }
        };
        let mut writer = self.writer.lock().await;
        if let Err(err) = codec::write_frame(&mut writer, value).await {
            warn!("failed to write response for {}: {}", id, err);
        }
    }

    async fn write_notification(&self, method: &str, params: Value) {
        let wire = message::wire_notification(method, params);
        let value = match serde_json::to_value(&wire) {
            Ok(v) => v,
            Err(err) => {
                warn!("failed to serialize notification {}: {}", method, err);
                return;
            }
        };
        let mut writer = self.writer.lock().await;
        if let Err(err) = codec::write_frame(&mut writer, value).await {
            warn!("failed to write notification {}: {}", method, err);
        }
    }
}
