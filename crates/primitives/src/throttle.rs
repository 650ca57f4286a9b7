use std::{future::Future, time::Duration};

use futures::future::try_join_all;
use tracing::debug;

/// Cooperative client-side throttle for calls to a rate-limited service.
///
/// Items are split into batches of `batch_size`. The calls of one batch run concurrently,
/// batches run strictly one after another, and the throttle sleeps for `delay` between two
/// batches (never after the last one). It does not react to failures: the first error
/// aborts the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    batch_size: usize,
    delay: Duration,
}

impl Throttle {
    /// Create a new [`Throttle`]. A zero `batch_size` is treated as one.
    pub fn new(batch_size: usize, delay: Duration) -> Self {
        Self { batch_size: batch_size.max(1), delay }
    }

    /// Apply `f` to every item, returning the results in input order.
    pub async fn run<'a, T, R, E, F, Fut>(&self, items: &'a [T], mut f: F) -> Result<Vec<R>, E>
    where
        F: FnMut(&'a T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let mut results = Vec::with_capacity(items.len());
        let batches = items.len().div_ceil(self.batch_size);

        for (index, batch) in items.chunks(self.batch_size).enumerate() {
            if index > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            debug!(batch = index + 1, batches, size = batch.len(), "Processing throttled batch");
            results.extend(try_join_all(batch.iter().map(&mut f)).await?);
        }

        Ok(results)
    }
}
