//! Concurrency primitives backing the pending-request table (spec.md §3,
//! §4.3) and cooperative cancellation (spec.md §4.3 "Cancellation
//! semantics").
//!
//! `ConcurrentJob`/`Jobs` are adapted near-verbatim from the teacher's
//! `rls/src/concurrency.rs`: a lightweight completion-tracking handle useful
//! for waiting on in-flight work (e.g. draining requests before shutdown).
//! They do not by themselves cancel anything — for that, `CancelHandle` wraps
//! `futures::future::AbortHandle`, grounded on the `AbortRegistration`
//! pattern used by the `tarpc` server's in-flight-request table found in the
//! retrieval pack.

use std::thread;

use crossbeam_channel::{bounded, select, Receiver, Select, Sender};
use futures::future::{abortable, AbortHandle, Abortable};
use futures::stream::Stream;

/// A handle for some long-running computation off the main task. Used,
/// indirectly, to wait for its completion. All `ConcurrentJob`s must
/// eventually be stored in a `Jobs` table, which gives a complete inventory of
/// in-flight concurrency for a connection and lets tests wait deterministically
/// for everything in flight to settle.
#[must_use]
pub struct ConcurrentJob {
    chan: Receiver<Never>,
}

pub struct JobToken {
    _chan: Sender<Never>,
}

#[derive(Default)]
pub struct Jobs {
    jobs: Vec<ConcurrentJob>,
}

impl Jobs {
    pub fn add(&mut self, job: ConcurrentJob) {
        self.gc();
        self.jobs.push(job);
    }

    /// Blocks the current thread until all pending jobs are finished.
    pub fn wait_for_all(&mut self) {
        while !self.jobs.is_empty() {
            let done: usize = {
                let mut select = Select::new();
                for job in &self.jobs {
                    select.recv(&job.chan);
                }
                let oper = select.select();
                let oper_index = oper.index();
                let chan = &self.jobs[oper_index].chan;
                assert!(oper.recv(chan).is_err());
                oper_index
            };
            drop(self.jobs.swap_remove(done));
        }
    }

    fn gc(&mut self) {
        self.jobs.retain(|job| !job.is_completed())
    }
}

impl ConcurrentJob {
    pub fn new() -> (ConcurrentJob, JobToken) {
        let (tx, rx) = bounded(0);
        (ConcurrentJob { chan: rx }, JobToken { _chan: tx })
    }

    fn is_completed(&self) -> bool {
        is_closed(&self.chan)
    }
}

impl Drop for ConcurrentJob {
    fn drop(&mut self) {
        if self.is_completed() || thread::panicking() {
            return;
        }
        panic!("orphaned concurrent job");
    }
}

enum Never {}

fn is_closed(chan: &Receiver<Never>) -> bool {
    select! {
        recv(chan) -> msg => match msg {
            Err(_) => true,
            Ok(never) => match never {}
        },
        default => false,
    }
}

/// A cancel handle for one in-flight request's result stream subscription.
/// Invoking it is idempotent (spec.md: "A second cancellation of the same id
/// is a no-op").
#[derive(Clone)]
pub struct CancelHandle {
    abort: AbortHandle,
}

impl CancelHandle {
    /// Wraps `future` so it can be cancelled; returns the handle plus the
    /// wrapped future, which resolves to `Err(Cancelled)` if `cancel()` is
    /// called before it completes.
    pub fn wrap<F: std::future::Future>(future: F) -> (CancelHandle, Abortable<F>) {
        let (fut, abort) = abortable(future);
        (CancelHandle { abort }, fut)
    }

    /// Same as `wrap`, for a result stream (the Dispatcher's §4.3 pending
    /// table entry hard-stops a handler's stream this way, independent of
    /// whether the handler itself observes a `cancel::CancelToken`).
    pub fn wrap_stream<S: Stream>(stream: S) -> (CancelHandle, futures::stream::Abortable<S>) {
        let (handle, registration) = AbortHandle::new_pair();
        (CancelHandle { abort: handle }, futures::stream::Abortable::new(stream, registration))
    }

    /// Cancels the wrapped future/stream. Safe to call more than once; only
    /// the first call has an effect.
    pub fn cancel(&self) {
        self.abort.abort();
    }
}
