//! Cooperative cancellation tokens (spec.md §4.3 "Cancellation semantics":
//! "cancelling a subscription must propagate to the handler via a token
//! observed by the handler").
//!
//! Built on `tokio_util::sync::CancellationToken` rather than a hand-rolled
//! flag: `tokio-util` is already a dependency here for `Framed`, and the
//! corpus reaches for `CancellationToken` for exactly this per-request
//! cooperative-cancellation shape (e.g. the retrieval pack's LSP dispatch
//! example and `Alb-O-xeno/crates/editor/src/lsp`).
//!
//! This is deliberately separate from `concurrency::CancelHandle`, which
//! hard-stops polling of a handler's result stream at the Dispatcher level
//! regardless of whether the handler itself checks anything. A cancelled
//! request fires both: the `CancelToken` so a well-behaved handler notices
//! and unwinds promptly, and the `CancelHandle` so the Dispatcher stops
//! forwarding results even from a handler that ignores the token.

use tokio_util::sync::CancellationToken;

/// Read side: polled cooperatively by handler bodies that can check it
/// between steps of a long-running computation. A plain alias over
/// `CancellationToken` — any clone observes cancellation fired through any
/// other clone of the same token.
pub type CancelToken = CancellationToken;

/// Write side: held by whoever owns the cancellation decision (the
/// Dispatcher's pending table, or a `Memoized` entry's composite source).
/// The same underlying type as `CancelToken`; kept as a distinct alias so
/// call sites read as "the thing that decides" vs. "the thing that's told".
pub type CancelSource = CancellationToken;

/// Creates a fresh, un-cancelled token/source pair: two clones of one
/// underlying `CancellationToken`, so cancelling the source is observed by
/// the token (and vice versa).
pub fn pair() -> (CancelSource, CancelToken) {
    let token = CancellationToken::new();
    (token.clone(), token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_observes_cancellation_from_its_source() {
        let (source, token) = pair();
        assert!(!token.is_cancelled());
        source.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancelling_twice_is_a_no_op() {
        let (source, token) = pair();
        source.cancel();
        source.cancel();
        assert!(token.is_cancelled());
    }
}
