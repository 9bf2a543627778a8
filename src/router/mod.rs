//! Master Router (spec.md §4.4): installs a façade `HandlerTable` on the
//! front connection that fans requests out across two back-end connections,
//! `light` and `heavy`, per the routing table in spec.md §4.4.

pub mod combinators;
mod connection;

pub use connection::Connection;

use std::sync::Arc;

use futures::FutureExt;
use log::warn;
use serde_json::Value;

use crate::error::HandlerError;
use crate::handler::{self, HandlerTable};

use lsp_types::notification::{DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument, Notification};
use lsp_types::request::{Completion, DocumentSymbolRequest, GotoDefinition, HoverRequest, References, Request, WorkspaceSymbol};

/// Methods broadcast to both back-ends (spec.md §4.4: "All text-document
/// notifications"). Standard LSP methods come from `lsp-types`' own
/// `Notification::METHOD` constants rather than hand-typed literals, as the
/// teacher's `rls/src/lsp_data.rs` does throughout.
const BROADCAST_NOTIFICATIONS: &[&str] = &[
    DidOpenTextDocument::METHOD,
    DidChangeTextDocument::METHOD,
    DidSaveTextDocument::METHOD,
    DidCloseTextDocument::METHOD,
];

/// Methods raced across both back-ends, first success wins (spec.md §4.4:
/// latency-hiding for queries where one worker may be blocked on a long
/// compile).
const FIRST_SUCCESS_METHODS: &[&str] = &[GotoDefinition::METHOD, HoverRequest::METHOD];

/// Methods forwarded only to the `heavy` back-end (spec.md §4.4: "canonical
/// worker for long-running work"). The `x`-prefixed and `global-refs`
/// methods are RLS-specific LSP extensions with no `lsp-types` constant, so
/// those stay as literals.
const HEAVY_ONLY_METHODS: &[&str] = &[
    WorkspaceSymbol::METHOD,
    DocumentSymbolRequest::METHOD,
    "workspace/xreferences",
    References::METHOD,
    Completion::METHOD,
    "workspace/xdependencies",
    "textDocument/xdefinition",
    "textDocument/global-refs",
];

/// Methods a back-end sends back toward the front connection (spec.md §4.4:
/// "the worker requests the front connection for file content"), answered on
/// both back-ends by proxying through to the front `Connection`.
pub const REVERSE_METHODS: &[&str] = &["workspace/xfiles", "textDocument/xcontent"];

/// Builds the reverse-request handler table registered on each back-end
/// connection, proxying `workspace/xfiles`/`textDocument/xcontent` through
/// to `front`.
pub fn reverse_handlers(front: Connection) -> Arc<HandlerTable> {
    let mut table = HandlerTable::new();
    for method in REVERSE_METHODS {
        let front = front.clone();
        let method = *method;
        table.register(
            method,
            handler::from_async(move |params, _meta, _cancel| {
                let front = front.clone();
                async move { front.request(method, params).await.map_err(HandlerError::from) }.boxed()
            }),
        );
    }
    Arc::new(table)
}

/// The Master Router itself: owns the two back-end `Connection`s and builds
/// the façade `HandlerTable` a front `Dispatcher` registers these routing
/// rules under.
pub struct MasterRouter {
    light: Connection,
    heavy: Connection,
}

impl MasterRouter {
    pub fn new(light: Connection, heavy: Connection) -> Self {
        MasterRouter { light, heavy }
    }

    /// Builds the façade `HandlerTable` implementing spec.md §4.4's routing
    /// table. Register this on the front `Dispatcher` alongside (or instead
    /// of) a direct `LanguageHandler` table.
    pub fn handlers(&self) -> HandlerTable {
        let mut table = HandlerTable::new();

        self.register_initialize(&mut table);
        self.register_shutdown(&mut table);
        self.register_broadcast_notifications(&mut table);
        self.register_first_success(&mut table);
        self.register_heavy_only(&mut table);

        table
    }

    fn register_initialize(&self, table: &mut HandlerTable) {
        let light = self.light.clone();
        let heavy = self.heavy.clone();
        table.register(
            "initialize",
            handler::from_async(move |params, _meta, _cancel| {
                let light = light.clone();
                let heavy = heavy.clone();
                let heavy_params = params.clone();
                async move {
                    let (light_result, heavy_result) =
                        tokio::join!(light.request("initialize", params), heavy.request("initialize", heavy_params));
                    if let Err(err) = heavy_result {
                        warn!("heavy back-end failed to initialize: {:?}", err);
                    }
                    light_result.map_err(HandlerError::from)
                }
                .boxed()
            }),
        );
    }

    fn register_shutdown(&self, table: &mut HandlerTable) {
        let light = self.light.clone();
        let heavy = self.heavy.clone();
        table.register(
            "shutdown",
            handler::from_async(move |params, _meta, _cancel| {
                let light = light.clone();
                let heavy = heavy.clone();
                let heavy_params = params.clone();
                async move {
                    let (light_result, heavy_result) =
                        tokio::join!(light.request("shutdown", params), heavy.request("shutdown", heavy_params));
                    tokio::join!(light.notify("exit", Value::Null), heavy.notify("exit", Value::Null));
                    light_result.and(heavy_result).map(|_| Value::Null).map_err(HandlerError::from)
                }
                .boxed()
            }),
        );
    }

    fn register_broadcast_notifications(&self, table: &mut HandlerTable) {
        for method in BROADCAST_NOTIFICATIONS {
            let light = self.light.clone();
            let heavy = self.heavy.clone();
            let method = *method;
            table.register(
                method,
                handler::from_async(move |params, _meta, _cancel| {
                    let light = light.clone();
                    let heavy = heavy.clone();
                    let heavy_params = params.clone();
                    async move {
                        tokio::join!(light.notify(method, params), heavy.notify(method, heavy_params));
                        Ok(Value::Null)
                    }
                    .boxed()
                }),
            );
        }
    }

    fn register_first_success(&self, table: &mut HandlerTable) {
        for method in FIRST_SUCCESS_METHODS {
            let light = self.light.clone();
            let heavy = self.heavy.clone();
            let method = *method;
            table.register(
                method,
                handler::from_async(move |params, _meta, _cancel| {
                    let light = light.clone();
                    let heavy = heavy.clone();
                    let heavy_params = params.clone();
                    async move {
                        let futures = vec![
                            light.request(method, params).boxed(),
                            heavy.request(method, heavy_params).boxed(),
                        ];
                        combinators::first_success(futures).await.map_err(HandlerError::from)
                    }
                    .boxed()
                }),
            );
        }
    }

    fn register_heavy_only(&self, table: &mut HandlerTable) {
        for method in HEAVY_ONLY_METHODS {
            let heavy = self.heavy.clone();
            let method = *method;
            table.register(
                method,
                handler::from_async(move |params, _meta, _cancel| {
                    let heavy = heavy.clone();
                    async move { heavy.request(method, params).await.map_err(HandlerError::from) }.boxed()
                }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::emitter::MessageEmitter;
    use crate::handler::HandlerTable as BackendTable;
    use serde_json::json;
    use tokio::io::duplex;
    use tokio::sync::Mutex as AsyncMutex;

    /// Wires up an in-process `Connection` talking to a fake back-end, which
    /// answers with `respond` for every request it receives.
    fn fake_backend_pair() -> (Connection, tokio::task::JoinHandle<()>) {
        let (router_side, backend_side) = duplex(8192);

        let router_transport = codec::frame(Box::new(router_side) as Box<dyn crate::transport::Duplex>);
        let (router_writer, router_reader) = codec::split(router_transport);
        let router_writer = Arc::new(AsyncMutex::new(router_writer));
        let connection = Connection::new(router_writer);

        let router_emitter = MessageEmitter::spawn(router_reader);
        connection.spawn_reader(router_emitter.subscribe(), Arc::new(BackendTable::new()));

        let backend_task = tokio::spawn(async move {
            let backend_transport = codec::frame(Box::new(backend_side) as Box<dyn crate::transport::Duplex>);
            let (mut backend_writer, mut backend_reader) = codec::split(backend_transport);
            use futures::{SinkExt, StreamExt};
            while let Some(Ok(value)) = backend_reader.next().await {
                if let Some(id) = value.get("id") {
                    let _ = backend_writer
                        .send(json!({"jsonrpc": "2.0", "id": id, "result": {"echo": value["method"]}}))
                        .await;
                }
            }
        });

        (connection, backend_task)
    }

    #[tokio::test]
    async fn connection_request_round_trips_through_a_fake_backend() {
        let (connection, _task) = fake_backend_pair();
        let result = connection.request("textDocument/hover", json!({})).await.unwrap();
        assert_eq!(result, json!({"echo": "textDocument/hover"}));
    }

    #[tokio::test]
    async fn first_success_methods_return_the_faster_backend() {
        let (light, _light_task) = fake_backend_pair();
        let (heavy, _heavy_task) = fake_backend_pair();
        let router = MasterRouter::new(light, heavy);
        let table = router.handlers();

        let handler = table.resolve("textDocument/definition").unwrap();
        let (_source, token) = crate::cancel::pair();
        let mut stream = handler.call(json!({}), None, token);
        use futures::StreamExt;
        let op = stream.next().await.unwrap().unwrap();
        let mut acc = Value::Null;
        crate::patch::apply(&mut acc, &op).unwrap();
        assert_eq!(acc, json!({"echo": "textDocument/definition"}));
    }
}
