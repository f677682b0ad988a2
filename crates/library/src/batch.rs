//! Bounded fan-out of per-item operations.

use crate::error::Result;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use std::future::Future;
use tracing::{debug, warn};

/// What happened to one item of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    /// Item name as the caller knows it: a filename for uploads, an
    /// identifier for everything else.
    pub name: String,
    pub success: bool,
    /// Status (`"uploaded"`, `"trashed"`, ...) on success, error message on
    /// failure.
    pub message: String,
}

impl Outcome {
    pub fn success(name: impl Into<String>, status: impl Into<String>) -> Self {
        Self { name: name.into(), success: true, message: status.into() }
    }

    pub fn failure(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), success: false, message: message.into() }
    }
}

/// Runs `worker` over every item with at most `concurrency` items in flight
/// and reports one [`Outcome`] per item, in completion order.
///
/// A failing item never stops its siblings. No task is spawned per item:
/// all in-flight futures are polled from the caller's task.
pub async fn run_batch<T, F, Fut>(items: Vec<(String, T)>, concurrency: usize, worker: F) -> Vec<Outcome>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<&'static str>>,
{
    let total = items.len();
    let run = |(name, item): (String, T)| {
        let work = worker(item);
        async move {
            match work.await {
                Ok(status) => Outcome::success(name, status),
                Err(err) => {
                    warn!(name = %name, error = ?err, "batch item failed");
                    Outcome::failure(name, (*err).to_string())
                },
            }
        }
    };

    let mut pending = items.into_iter();
    let mut processing: FuturesUnordered<_> = pending.by_ref().take(concurrency.max(1)).map(&run).collect();
    let mut outcomes = Vec::with_capacity(total);
    while let Some(outcome) = processing.next().await {
        outcomes.push(outcome);
        // Pop-n-push, FIFO.
        if let Some(item) = pending.next() {
            processing.push(run(item));
        }
    }
    let failed = outcomes.iter().filter(|o| !o.success).count();
    debug!(total, failed, "batch complete");
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn items(n: usize) -> Vec<(String, usize)> {
        (0..n).map(|i| (format!("item-{i}"), i)).collect()
    }

    #[tokio::test]
    async fn test_every_item_reports_once() {
        let outcomes = run_batch(items(10), 3, |i| async move { Ok(if i % 2 == 0 { "even" } else { "odd" }) }).await;
        assert_eq!(outcomes.len(), 10);
        let mut names: Vec<_> = outcomes.iter().map(|o| o.name.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 10);
        assert!(outcomes.contains(&Outcome::success("item-3", "odd")));
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_siblings() {
        let outcomes = run_batch(items(5), 2, |i| async move {
            if i == 1 {
                return Err(exn::Exn::from(ErrorKind::Validation("no thanks".to_string())));
            }
            Ok("done")
        })
        .await;
        assert_eq!(outcomes.iter().filter(|o| o.success).count(), 4);
        assert!(outcomes.contains(&Outcome::failure("item-1", "no thanks")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let (in_flight, peak) = (&AtomicUsize::new(0), &AtomicUsize::new(0));
        let outcomes = run_batch(items(20), 4, move |_| async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("ok")
        })
        .await;
        assert_eq!(outcomes.len(), 20);
        assert_eq!(peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_empty_batch_and_zero_concurrency() {
        assert!(run_batch(Vec::<(String, ())>::new(), 4, |_| async { Ok("ok") }).await.is_empty());
        let outcomes = run_batch(items(3), 0, |_| async { Ok("ok") }).await;
        assert_eq!(outcomes.len(), 3);
    }
}
