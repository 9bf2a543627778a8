//! CPU-bound handler work pool (spec.md §5: "A language-level thread pool may
//! be used for CPU-bound handler work"). Adapted from the teacher's
//! `rls/src/actions/work_pool.rs`; generalized from a `&'static str` work
//! description (the teacher's methods are a closed, compile-time-known set)
//! to an owned `String`, since this core's Handler Table is populated with
//! dynamically-registered method names.

use std::fmt;
use std::sync::{mpsc, Mutex};
use std::time::{Duration, Instant};
use std::{panic, thread};

use lazy_static::lazy_static;
use log::{info, warn};

/// Identifies a unit of work for logging and the max-similar-concurrent-work
/// check. Two pieces of work with equal `WorkDescription` are considered the
/// same kind of thing (typically, the same LSP method name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkDescription(pub String);

impl fmt::Display for WorkDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Duration of work after which we warn it is taking a long time. There is no
/// server-imposed timeout (spec.md §5); this is purely diagnostic.
const WARN_TASK_DURATION: Duration = Duration::from_secs(5);

/// Maximum concurrent working tasks of the same description. `2` allows a
/// single task to run immediately after a similar task has timed out; once
/// multiple similar tasks remain running past that we start refusing new
/// ones of that kind.
const MAX_SIMILAR_CONCURRENT_WORK: usize = 2;

lazy_static! {
    static ref NUM_THREADS: usize = num_cpus::get();
    static ref WORK: Mutex<Vec<WorkDescription>> = Mutex::new(vec![]);
    static ref WORK_POOL: rayon::ThreadPool = rayon::ThreadPoolBuilder::new()
        .num_threads(*NUM_THREADS)
        .thread_name(|num| format!("handler-worker-{}", num))
        .build()
        .expect("failed to build handler work pool");
}

/// Runs `work_fn` on the pool, returning a `Receiver` for its result.
/// Panicking work yields `Err` on the receiver rather than propagating the
/// panic to the caller. If the pool is already at capacity for this kind of
/// work, the receiver returns `Err` immediately without running `work_fn`.
pub fn receive_from_thread<T, F>(work_fn: F, description: WorkDescription) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + panic::UnwindSafe + 'static,
{
    let (sender, receiver) = mpsc::channel();

    {
        let mut work = WORK.lock().unwrap();
        if work.len() >= *NUM_THREADS {
            warn!("could not start `{}`, work pool at capacity ({:?} in progress)", description, *work);
            return receiver;
        }
        if work.iter().filter(|desc| *desc == &description).count() >= MAX_SIMILAR_CONCURRENT_WORK {
            info!(
                "could not start `{}`, too many similar tasks already in progress ({:?})",
                description, *work
            );
            return receiver;
        }
        work.push(description.clone());
    }

    WORK_POOL.spawn(move || {
        let start = Instant::now();
        let result = panic::catch_unwind(work_fn);

        {
            let mut work = WORK.lock().unwrap();
            if let Some(pos) = work.iter().position(|desc| desc == &description) {
                work.remove(pos);
            }
        }

        let elapsed = start.elapsed();
        if elapsed > WARN_TASK_DURATION {
            warn!("`{}` took {:?}, longer than expected", description, elapsed);
        }

        match result {
            Ok(value) => {
                let _ = sender.send(value);
            }
            Err(panic) => {
                warn!("`{}` panicked on the work pool: {:?}", description, panic_message(&panic));
            }
        }
    });

    receiver
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn runs_work_and_returns_its_result() {
        let receiver = receive_from_thread(|| 1 + 1, WorkDescription("test/add".into()));
        assert_eq!(receiver.recv_timeout(StdDuration::from_secs(2)).unwrap(), 2);
    }

    #[test]
    fn panicking_work_yields_an_error_not_a_propagated_panic() {
        let receiver: mpsc::Receiver<()> =
            receive_from_thread(|| panic!("boom"), WorkDescription("test/panics".into()));
        assert!(receiver.recv_timeout(StdDuration::from_secs(2)).is_err());
    }

    #[test]
    fn runs_on_a_dedicated_thread_not_the_caller() {
        let caller = thread::current().id();
        let receiver = receive_from_thread(move || thread::current().id() != caller, WorkDescription("test/thread".into()));
        assert!(receiver.recv_timeout(StdDuration::from_secs(2)).unwrap());
    }
}
