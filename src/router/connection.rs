//! A `Connection` is the Master Router's view of one endpoint it talks to as
//! a client: it issues requests/notifications and correlates responses, and
//! answers reverse requests the endpoint sends back (spec.md §4.4's
//! `workspace/xfiles`/`textDocument/xcontent` row).
//!
//! Per spec.md §9's design note, this is deliberately *not* a shared object
//! graph between the front and back-end sides — each side is an independent
//! reader of the same `MessageEmitter` broadcast, disjoint in the methods it
//! answers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::StreamExt;
use log::warn;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot, Mutex as AsyncMutex};
use tokio_stream::wrappers::BroadcastStream;

use crate::cancel;
use crate::codec::{self, FramedWriter};
use crate::emitter::Event;
use crate::handler::HandlerTable;
use crate::message::{self, error_code, ErrorObject, Message, RawResponse, RequestId};
use crate::transport::Duplex;

type SharedWriter = Arc<AsyncMutex<FramedWriter<Box<dyn Duplex>>>>;

#[derive(Clone)]
pub struct Connection {
    writer: SharedWriter,
    pending: Arc<StdMutex<HashMap<RequestId, oneshot::Sender<RawResponse>>>>,
    next_id: Arc<AtomicU64>,
}

impl Connection {
    pub fn new(writer: SharedWriter) -> Self {
        Connection { writer, pending: Arc::new(StdMutex::new(HashMap::new())), next_id: Arc::new(AtomicU64::new(1)) }
    }

    /// Spawns the task that reads this connection's inbound events: resolves
    /// responses against the pending table, and answers reverse requests
    /// using `reverse_handlers` (spec.md §4.4: `workspace/xfiles`,
    /// `textDocument/xcontent`).
    ///
    /// `BroadcastStream` (the `tokio-stream` adapter over
    /// `broadcast::Receiver`) turns the lag/close bookkeeping into an
    /// ordinary `StreamExt` loop instead of a hand-rolled `match` on
    /// `RecvError`.
    pub fn spawn_reader(&self, events: broadcast::Receiver<Event>, reverse_handlers: Arc<HandlerTable>) {
        let connection = self.clone();
        let mut events = BroadcastStream::new(events);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Ok(Event::Message(Message::Response(resp))) => connection.complete(resp),
                    Ok(Event::Message(Message::Request(req))) => {
                        connection.answer_reverse_request(req, &reverse_handlers).await;
                    }
                    Ok(Event::Message(Message::Notification(note))) => {
                        warn!("unexpected notification from back-end connection: {}", note.method);
                    }
                    Ok(Event::Error(err)) => warn!("protocol error on back-end connection: {:?}", err),
                    Ok(Event::Close) => {
                        connection.fail_all_pending();
                        break;
                    }
                    Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                        warn!("back-end connection reader lagged {} events", n);
                    }
                }
            }
            connection.fail_all_pending();
        });
    }

    fn complete(&self, resp: RawResponse) {
        if let Some(sender) = self.pending.lock().unwrap().remove(&resp.id) {
            let _ = sender.send(resp);
        }
    }

    fn fail_all_pending(&self) {
        for (_, sender) in self.pending.lock().unwrap().drain() {
            drop(sender); // dropped sender -> receiver observes a closed channel
        }
    }

    async fn answer_reverse_request(&self, req: crate::message::RawRequest, reverse_handlers: &HandlerTable) {
        let result = match reverse_handlers.resolve(&req.method) {
            Some(handler) => {
                let (_source, token) = cancel::pair();
                let mut stream = handler.call(req.params, req.meta, token);
                let mut acc = Value::Null;
                let mut failure = None;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(op) => {
                            if let Err(e) = crate::patch::apply(&mut acc, &op) {
                                warn!("reverse handler for {} produced an unfoldable patch: {}", req.method, e);
                            }
                        }
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
                match failure {
                    Some(err) => Err(err.into_error_object()),
                    None => Ok(acc),
                }
            }
            None => Err(ErrorObject::method_not_found(&req.method)),
        };

        let wire = message::wire_response(req.id, result);
        match serde_json::to_value(&wire) {
            Ok(value) => {
                let mut writer = self.writer.lock().await;
                if let Err(err) = codec::write_frame(&mut writer, value).await {
                    warn!("failed to write reverse-request response: {}", err);
                }
            }
            Err(err) => warn!("failed to serialize reverse-request response: {}", err),
        }
    }

    /// Sends `method` as a request and awaits its correlated response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ErrorObject> {
        let id = RequestId::Num(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.clone(), tx);

        let wire = message::wire_request(id.clone(), method, params);
        let value = serde_json::to_value(&wire)
            .map_err(|e| ErrorObject::new(error_code::INTERNAL_ERROR, e.to_string()))?;
        {
            let mut writer = self.writer.lock().await;
            codec::write_frame(&mut writer, value)
                .await
                .map_err(|e| ErrorObject::new(error_code::INTERNAL_ERROR, e.to_string()))?;
        }

        match rx.await {
            Ok(resp) => match resp.error {
                Some(err) => Err(err),
                None => Ok(resp.result.unwrap_or(Value::Null)),
            },
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(ErrorObject::new(error_code::INTERNAL_ERROR, "connection closed before a response arrived"))
            }
        }
    }

    /// Sends `method` as a fire-and-forget notification.
    pub async fn notify(&self, method: &str, params: Value) {
        let wire = message::wire_notification(method, params);
        match serde_json::to_value(&wire) {
            Ok(value) => {
                let mut writer = self.writer.lock().await;
                if let Err(err) = codec::write_frame(&mut writer, value).await {
                    warn!("failed to write notification {}: {}", method, err);
                }
            }
            Err(err) => warn!("failed to serialize notification {}: {}", method, err),
        }
    }
}
