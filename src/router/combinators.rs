//! First-success combinator (spec.md §4.4): resolve as soon as any one
//! future succeeds; reject only once every future has failed, with the last
//! error observed.
//!
//! spec.md §9's open design question: the losing futures' results are
//! swallowed but their work is **not** cancelled — this is a routing policy
//! choice (latency-hiding: a worker blocked on a long compile loses the race
//! but keeps running), not a resource-bounded one. An improved
//! implementation might cancel the losers; this one faithfully preserves the
//! source behavior instead of silently "fixing" it, per DESIGN.md.

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;

use crate::message::{error_code, ErrorObject};

/// Polls every future in `futures` concurrently via `FuturesUnordered`,
/// returning the first `Ok`. If every future rejects, returns the last
/// `Err` observed. Dropping the remaining, still-pending futures (once this
/// function returns) does not signal cancellation to whatever produced
/// them — `Connection::request`'s oneshot completes independently of
/// whether anyone is still awaiting it.
pub async fn first_success(futures: Vec<BoxFuture<'static, Result<serde_json::Value, ErrorObject>>>) -> Result<serde_json::Value, ErrorObject> {
    let mut pending: FuturesUnordered<_> = futures.into_iter().collect();
    let mut last_err = None;
    while let Some(result) = pending.next().await {
        match result {
            Ok(value) => return Ok(value),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| ErrorObject::new(error_code::UNKNOWN_ERROR, "no back-end available")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn slow_ok(value: serde_json::Value, millis: u64) -> BoxFuture<'static, Result<serde_json::Value, ErrorObject>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(value)
        })
    }

    fn slow_err(millis: u64) -> BoxFuture<'static, Result<serde_json::Value, ErrorObject>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Err(ErrorObject::new(error_code::INTERNAL_ERROR, "boom"))
        })
    }

    #[tokio::test]
    async fn returns_the_faster_successful_future() {
        let result = first_success(vec![slow_ok(json!("L1"), 50), slow_ok(json!("L2"), 5)]).await;
        assert_eq!(result.unwrap(), json!("L2"));
    }

    #[tokio::test]
    async fn rejects_only_once_every_future_has_failed() {
        let result = first_success(vec![slow_err(5), slow_err(10)]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn a_single_success_wins_even_against_failures() {
        let result = first_success(vec![slow_err(5), slow_ok(json!("L2"), 20)]).await;
        assert_eq!(result.unwrap(), json!("L2"));
    }
}
