//! `lspmux`: the JSON-RPC dispatch and master/worker multiplexing core of an
//! LSP server, independent of any particular language analysis backend.
//!
//! See `README`-equivalent module docs below for the five core components
//! (spec.md §2): `codec` (Framed Codec), `emitter` (Message Emitter),
//! `dispatcher` (Dispatcher), `router` (Master Router), `memo` (Cancellable
//! Memoization).

pub mod backend;
pub mod cancel;
pub mod codec;
pub mod concurrency;
pub mod config;
pub mod dispatcher;
pub mod emitter;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod memo;
pub mod message;
pub mod patch;
pub mod router;
pub mod tracing;
pub mod transport;
pub mod work_pool;

/// Builds the `HandlerTable` wiring `textDocument`/`workspace` method names
/// (spec.md §6's "LSP methods consumed") to a `LanguageHandler` backend,
/// coercing each of its awaitable single-value methods into a `ResultStream`
/// via `handler::from_async`.
///
/// Method names come from `lsp-types`' own `Request`/`Notification` trait
/// constants rather than hand-typed string literals, the same indirection
/// the teacher takes in `rls/src/lsp_data.rs` (`pub use lsp_types::request::Request
/// as LSPRequest`) — a typo in a literal method name here would silently
/// make a handler unreachable instead of failing to compile.
pub fn handler_table_for(backend: std::sync::Arc<dyn backend::LanguageHandler>) -> handler::HandlerTable {
    use futures::FutureExt;
    use lsp_types::request::{
        Completion, DocumentSymbolRequest, GotoDefinition, HoverRequest, Initialize, References, Request, Shutdown,
        WorkspaceSymbol,
    };

    let mut table = handler::HandlerTable::new();

    macro_rules! register {
        ($method:expr, $call:ident) => {{
            let backend = backend.clone();
            table.register(
                $method,
                handler::from_async(move |params, _meta, _cancel| {
                    let backend = backend.clone();
                    async move { backend.$call(params).await }.boxed()
                }),
            );
        }};
    }

    register!(Initialize::METHOD, initialize);
    register!(Shutdown::METHOD, shutdown);
    register!(HoverRequest::METHOD, hover);
    register!(GotoDefinition::METHOD, definition);
    register!(References::METHOD, references);
    register!(DocumentSymbolRequest::METHOD, document_symbol);
    register!(Completion::METHOD, completion);
    register!(WorkspaceSymbol::METHOD, workspace_symbol);

    table
}
