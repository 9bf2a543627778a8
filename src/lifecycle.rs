//! Connection State (spec.md §3): `{initialized, streamingCapable}` and its
//! transitions. Owned by one `Dispatcher` instance — never a process global
//! (spec.md §9 design note).

use std::sync::atomic::{AtomicBool, Ordering};

/// Per-connection lifecycle flags. `Arc`-free: the Dispatcher owns this
/// directly since it already runs single-threaded relative to its own
/// connection (spec.md §5).
#[derive(Debug, Default)]
pub struct ConnectionState {
    initialized: AtomicBool,
    streaming_capable: AtomicBool,
    terminal: AtomicBool,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }

    pub fn streaming_capable(&self) -> bool {
        self.streaming_capable.load(Ordering::SeqCst)
    }

    /// `initialize` received: `initialized=true`, capture the client's
    /// streaming capability.
    pub fn on_initialize(&self, client_supports_streaming: bool) {
        self.initialized.store(true, Ordering::SeqCst);
        self.streaming_capable.store(client_supports_streaming, Ordering::SeqCst);
    }

    /// `shutdown` received: `initialized=false`.
    pub fn on_shutdown(&self) {
        self.initialized.store(false, Ordering::SeqCst);
    }

    /// `exit` notification or stream close: terminal.
    pub fn on_exit(&self) {
        self.terminal.store(true, Ordering::SeqCst);
    }
}
