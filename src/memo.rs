//! Cancellable Memoization (spec.md §4.5): coalesces concurrent calls keyed
//! by their first argument into one underlying computation, whose
//! cancellation is reference-counted across subscribers.
//!
//! Built on `futures::future::{Shared, abortable}`, the same family of
//! primitives `concurrency::CancelHandle` wraps for the Dispatcher's pending
//! table — here the composite cancel token is derived from a subscriber
//! refcount rather than a single client cancellation.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{abortable, AbortHandle, BoxFuture, FutureExt, Shared};

/// One in-flight (or just-settled) shared computation for a given key.
struct MemoEntry<V> {
    shared: Shared<BoxFuture<'static, Result<V, MemoError>>>,
    refcount: Arc<AtomicUsize>,
    cancel: AbortHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoError {
    #[error("cancelled")]
    Cancelled,
}

/// Coalesces concurrent calls to `f` keyed by `K`. `f` is invoked at most
/// once per in-flight key cluster (spec.md §8 invariant 5); the entry is
/// removed on settle, per the Open Question resolution in DESIGN.md
/// ("removed on settle, no persistent cache").
pub struct Memoized<K, V> {
    entries: Mutex<HashMap<K, MemoEntry<V>>>,
}

impl<K, V> Default for Memoized<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Memoized { entries: Mutex::new(HashMap::new()) }
    }
}

impl<K, V> Memoized<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `f(key)` if no computation for `key` is currently in flight,
    /// otherwise joins the existing one. Each caller is a "subscriber": the
    /// composite cancellation token passed to `f` only fires once every
    /// subscriber currently attached has released its interest, via
    /// `Subscription::cancel` or by dropping the `Subscription`, per
    /// spec.md §4.5's contract.
    pub fn call<F, Fut>(&self, key: K, f: F) -> Subscription<V>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V, MemoError>> + Send + 'static,
    {
        let mut entries = self.entries.lock().unwrap();

        // A settled entry is evicted on sight rather than joined, so the next
        // call with the same key re-invokes `f` (spec.md §9: "removed on
        // settle, no persistent cache").
        if entries.get(&key).map_or(false, |entry| entry.shared.peek().is_some()) {
            entries.remove(&key);
        }

        if let Some(entry) = entries.get(&key) {
            entry.refcount.fetch_add(1, Ordering::SeqCst);
            return Subscription {
                shared: entry.shared.clone(),
                refcount: entry.refcount.clone(),
                cancel: entry.cancel.clone(),
                released: Arc::new(AtomicBool::new(false)),
            };
        }

        let (abortable_fut, cancel) = abortable(f(key.clone()));
        let upstream: BoxFuture<'static, Result<V, MemoError>> = async move {
            match abortable_fut.await {
                Ok(result) => result,
                Err(_aborted) => Err(MemoError::Cancelled),
            }
        }
        .boxed();

        let refcount = Arc::new(AtomicUsize::new(1));
        let shared = upstream.shared();

        entries.insert(key, MemoEntry { shared: shared.clone(), refcount: refcount.clone(), cancel: cancel.clone() });

        Subscription { shared, refcount, cancel, released: Arc::new(AtomicBool::new(false)) }
    }
}

/// One subscriber's handle to a (possibly shared) in-flight computation.
///
/// `cancel` and `join` are deliberately decoupled: per spec.md §4.5, each
/// subscriber owns its own cancellation token, distinct from awaiting the
/// shared result. Calling `cancel` releases this subscriber's interest (and,
/// if it was the last one attached, fires the composite token so the
/// upstream computation observes cancellation) without consuming the
/// `Subscription` — the caller can still `join` afterwards to observe
/// whatever the shared future ultimately settles with, including
/// `Err(MemoError::Cancelled)` once every subscriber has released (spec.md
/// §8 S6: "both callers' promises reject").
pub struct Subscription<V> {
    shared: Shared<BoxFuture<'static, Result<V, MemoError>>>,
    refcount: Arc<AtomicUsize>,
    cancel: AbortHandle,
    released: Arc<AtomicBool>,
}

impl<V: Clone> Subscription<V> {
    /// Awaits the shared result. If this subscriber had not already
    /// released its interest via `cancel`, this also releases it (spec.md
    /// §4.5: "decremented... when the shared future settles for that
    /// subscriber"), so a subscriber that stays attached until the value is
    /// ready does not need to separately cancel.
    pub async fn join(&self) -> Result<V, MemoError> {
        let result = self.shared.clone().await;
        self.release();
        result
    }

    /// Releases this subscriber's interest without waiting for the result.
    /// If it was the last one attached, the underlying computation is
    /// cancelled (its composite token fires). Idempotent, and does not
    /// consume `self`: `join` can still be called afterwards.
    pub fn cancel(&self) {
        self.release();
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.cancel.abort();
        }
    }
}

impl<V> Drop for Subscription<V> {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.cancel.abort();
        }
    }
}

impl<K, V> Memoized<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    /// Garbage-collects any entry whose shared future has already resolved.
    /// Call this opportunistically (e.g. once per dispatch loop tick) so a
    /// settled key re-invokes `f` on its next call rather than replaying a
    /// stale cached value, per the eviction-on-settle policy.
    pub fn gc_settled(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| entry.shared.peek().is_none());
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    #[cfg(test)]
    fn contains(&self, key: &K) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn two_concurrent_callers_share_one_invocation() {
        let memo: Memoized<u32, u32> = Memoized::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_a = calls.clone();
        let sub_a = memo.call(123, move |_key| {
            let calls = calls_a.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(99)
            }
        });
        let sub_b = memo.call(123, |_key| async move {
            unreachable!("second caller must join the first's computation, not invoke f again")
        });

        let (a, b) = tokio::join!(sub_a.join(), sub_b.join());
        assert_eq!(a.unwrap(), 99);
        assert_eq!(b.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelling_one_of_two_subscribers_leaves_the_call_live() {
        let memo: Memoized<u32, u32> = Memoized::new();
        let ready = Arc::new(Notify::new());
        let ready_clone = ready.clone();

        let sub_a = memo.call(123, move |_key| async move {
            ready_clone.notified().await;
            Ok(99)
        });
        let sub_b = memo.call(123, |_key| async move { unreachable!() });

        sub_a.cancel();
        ready.notify_one();
        assert_eq!(sub_b.join().await.unwrap(), 99);
    }

    /// S6: cancelling every subscriber attached to a call cancels the
    /// upstream computation, and both subscribers can still await the
    /// resulting rejection rather than being left with no way to observe it.
    #[tokio::test]
    async fn cancelling_every_subscriber_cancels_the_upstream() {
        let memo: Memoized<u32, u32> = Memoized::new();
        let sub_a = memo.call(123, |_key| futures::future::pending());
        let sub_b = memo.call(123, |_key| async move { unreachable!() });

        sub_a.cancel();
        sub_b.cancel();

        let (a, b) = tokio::join!(sub_a.join(), sub_b.join());
        assert_eq!(a, Err(MemoError::Cancelled));
        assert_eq!(b, Err(MemoError::Cancelled));
    }

    #[tokio::test]
    async fn a_settled_key_is_evicted_and_reinvokes_f() {
        let memo: Memoized<u32, u32> = Memoized::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_a = calls.clone();
        memo.call(123, move |_key| {
            let calls = calls_a.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }
        })
        .join()
        .await
        .unwrap();

        memo.gc_settled();
        assert!(!memo.contains(&123));

        let calls_b = calls.clone();
        memo.call(123, move |_key| {
            let calls = calls_b.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            }
        })
        .join()
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.len(), 1);
        memo.gc_settled();
    }
}
