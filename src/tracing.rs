//! Tracing collaborators (spec.md §1: "Logging and tracing sinks — abstract
//! `Logger` and `Tracer` collaborators"). Out of scope as a concrete
//! implementation; this module defines the interface the Dispatcher drives
//! (spec.md §4.3 step 4) plus a `log`-backed default so the crate runs
//! standalone without a real tracing sink wired in.

use std::sync::Arc;

use log::{debug, warn};

use crate::message::Meta;

/// One request's tracing span. Tagged with `params`, finished when the
/// result stream terminates.
pub trait Span: Send + Sync {
    fn tag(&self, key: &str, value: &str);
    fn mark_error(&self, message: &str);
    fn finish(&self);
}

/// Starts spans, optionally as children of a textmap-encoded parent context
/// carried in a message's `meta` (spec.md §4.3 step 4: "extract a span
/// context from it (textmap format) and start a child span... Otherwise
/// start an orphan span").
pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, parent_context: Option<&Meta>) -> Arc<dyn Span>;
}

/// Default `log`-backed tracer, in the spirit of the teacher's own use of
/// `log::debug!`/`log::trace!` for request lifecycle events — not a real
/// distributed tracer, just enough for this crate to be runnable and
/// testable without an external collaborator wired in.
pub struct LoggingTracer;

impl Tracer for LoggingTracer {
    fn start_span(&self, name: &str, parent_context: Option<&Meta>) -> Arc<dyn Span> {
        match parent_context {
            Some(ctx) if !ctx.is_empty() => {
                debug!("span `{}` started as child of context {:?}", name, ctx)
            }
            _ => debug!("span `{}` started (orphan)", name),
        }
        Arc::new(LoggingSpan { name: name.to_owned() })
    }
}

struct LoggingSpan {
    name: String,
}

impl Span for LoggingSpan {
    fn tag(&self, key: &str, value: &str) {
        debug!("span `{}` tag {}={}", self.name, key, value);
    }

    fn mark_error(&self, message: &str) {
        warn!("span `{}` errored: {}", self.name, message);
    }

    fn finish(&self) {
        debug!("span `{}` finished", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_tracer_starts_and_finishes_without_panicking() {
        let tracer = LoggingTracer;
        let span = tracer.start_span("Handle textDocument/hover", None);
        span.tag("params", "{}");
        span.finish();
    }

    #[test]
    fn logging_tracer_accepts_a_parent_context() {
        let tracer = LoggingTracer;
        let mut meta = Meta::new();
        meta.insert("traceparent".into(), "00-abc-def-01".into());
        let span = tracer.start_span("Handle initialize", Some(&meta));
        span.mark_error("boom");
    }
}
