//! Handler Table (spec.md §3, §4.3 step 3) and the result-stream coercion
//! discipline (spec.md §4.3 step 5).
//!
//! The teacher dispatches through `define_dispatch_request_enum!`, a macro
//! that generates one concrete Rust type per LSP method known at compile
//! time. That doesn't fit this core: the Master Router (§4.4) needs to
//! register façade handlers under method names it only learns at startup
//! (from the routing table), so handlers here are erased behind a trait
//! object and looked up dynamically by method name. This is a deliberate
//! generalization of the teacher's dispatch pattern, not an arbitrary
//! deviation — see DESIGN.md.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use heck::MixedCase;
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::error::HandlerError;
use crate::message::Meta;
use crate::patch::JsonPatchOp;

/// The lazy, finite, non-restartable sequence of patch operations a handler
/// produces, per spec.md §3's Handler Table definition.
pub type ResultStream = BoxStream<'static, Result<JsonPatchOp, HandlerError>>;

/// One resolved handler. `call` always returns a `ResultStream`; the four
/// return shapes spec.md §4.3 step 5 lists (already-a-stream, awaitable
/// single value, synchronous value, synchronous exception) are coerced into
/// one by the helpers below before a handler is registered.
pub trait DynHandler: Send + Sync {
    fn call(&self, params: Value, meta: Option<Meta>, cancel: CancelToken) -> ResultStream;
}

/// Coerces a single value into a one-item result stream: folding it against
/// the `Value::Null` accumulator (spec.md §4.3 step 6) reproduces the value
/// verbatim, since `JsonPatchOp::Add` with an empty path replaces the whole
/// accumulator (see `patch::apply_add`).
pub fn single(value: Value) -> ResultStream {
    stream::once(async move { Ok(JsonPatchOp::Add { path: String::new(), value }) }).boxed()
}

/// Coerces a synchronous or asynchronous failure into a one-item erroring
/// stream (spec.md §4.3 step 5: "Synchronous exception → stream that
/// immediately errors").
pub fn failed(err: HandlerError) -> ResultStream {
    stream::once(async move { Err(err) }).boxed()
}

/// Wraps an already-a-stream handler, the common case for genuinely
/// streaming operations (e.g. `workspace/symbol`).
pub fn from_stream<F>(f: F) -> Arc<dyn DynHandler>
where
    F: Fn(Value, Option<Meta>, CancelToken) -> ResultStream + Send + Sync + 'static,
{
    struct StreamHandler<F>(F);
    impl<F> DynHandler for StreamHandler<F>
    where
        F: Fn(Value, Option<Meta>, CancelToken) -> ResultStream + Send + Sync + 'static,
    {
        fn call(&self, params: Value, meta: Option<Meta>, cancel: CancelToken) -> ResultStream {
            (self.0)(params, meta, cancel)
        }
    }
    Arc::new(StreamHandler(f))
}

/// Wraps an awaitable single-value handler (spec.md §4.3 step 5: "Awaitable
/// single value → stream of one"). A handler that rejects surfaces as a
/// one-item erroring stream rather than panicking the dispatch loop.
pub fn from_async<F>(f: F) -> Arc<dyn DynHandler>
where
    F: Fn(Value, Option<Meta>, CancelToken) -> BoxFuture<'static, Result<Value, HandlerError>>
        + Send
        + Sync
        + 'static,
{
    struct AsyncHandler<F>(F);
    impl<F> DynHandler for AsyncHandler<F>
    where
        F: Fn(Value, Option<Meta>, CancelToken) -> BoxFuture<'static, Result<Value, HandlerError>>
            + Send
            + Sync
            + 'static,
    {
        fn call(&self, params: Value, meta: Option<Meta>, cancel: CancelToken) -> ResultStream {
            let fut = (self.0)(params, meta, cancel);
            stream::once(async move {
                match fut.await {
                    Ok(value) => Ok(JsonPatchOp::Add { path: String::new(), value }),
                    Err(err) => Err(err),
                }
            })
            .boxed()
        }
    }
    Arc::new(AsyncHandler(f))
}

/// Converts an LSP method name into its Handler Table key, per spec.md
/// §4.3 step 3: `workspace/xreferences` → `workspaceXreferences`, produced by
/// lower-camelizing path segments. `heck::MixedCase` (the teacher's `heck`
/// dependency, previously reached for only in its `SnakeCase` direction for
/// config keys) does this in one pass, also folding `-`-separated segments
/// (`textDocument/global-refs` → `textDocumentGlobalRefs`).
pub fn handler_key(method: &str) -> String {
    method.to_mixed_case()
}

/// Maps handler-table keys to registered handlers. Populated dynamically —
/// both the Dispatcher's own LSP method set and the Master Router's façade
/// handlers share one table shape.
#[derive(Default, Clone)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under the camelized key for `method`.
    pub fn register(&mut self, method: &str, handler: Arc<dyn DynHandler>) {
        self.handlers.insert(handler_key(method), handler);
    }

    /// Resolves `method` to a registered handler, or `None` if absent
    /// (spec.md §4.3 step 3: request → `MethodNotFound`, notification →
    /// warn-log and drop).
    pub fn resolve(&self, method: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(&handler_key(method)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;

    #[test]
    fn camelizes_slash_and_dash_separated_methods() {
        assert_eq!(handler_key("workspace/xreferences"), "workspaceXreferences");
        assert_eq!(handler_key("textDocument/global-refs"), "textDocumentGlobalRefs");
        assert_eq!(handler_key("textDocument/hover"), "textDocumentHover");
    }

    #[test]
    fn single_value_folds_back_to_itself() {
        let mut stream = single(json!({"line": 0}));
        let op = block_on(stream.next()).unwrap().unwrap();
        let mut acc = Value::Null;
        crate::patch::apply(&mut acc, &op).unwrap();
        assert_eq!(acc, json!({"line": 0}));
    }

    #[test]
    fn resolves_registered_handler_by_camelized_key() {
        let mut table = HandlerTable::new();
        table.register("textDocument/hover", from_stream(|_, _, _| single(json!("hover result"))));

        assert!(table.resolve("textDocument/hover").is_some());
        assert!(table.resolve("textDocument/unknownMethod").is_none());
    }
}
