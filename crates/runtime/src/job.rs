//! One-shot or periodic job execution with graceful shutdown.
use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tracing::{error, info};

use crate::shutdown::ShutdownSignal;

/// Run `job` once, or every `interval` until SIGINT or SIGTERM arrives.
///
/// In one-shot mode the job's result is returned as is. In periodic mode a failed run is logged
/// and the next run happens on schedule. A signal received while a run is in flight lets that run
/// finish before the loop exits.
pub async fn run_job<F, Fut, T>(name: &str, interval: Option<Duration>, job: F) -> eyre::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = eyre::Result<T>>,
    T: std::fmt::Debug,
{
    let shutdown = ShutdownSignal::new()?;
    run_job_until(name, interval, job, shutdown).await
}

async fn run_job_until<F, Fut, T, S>(
    name: &str,
    interval: Option<Duration>,
    mut job: F,
    shutdown: S,
) -> eyre::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = eyre::Result<T>>,
    T: std::fmt::Debug,
    S: Future<Output = ()>,
{
    let Some(interval) = interval else {
        let started = Instant::now();
        let report = job().await?;
        info!(job = name, elapsed_ms = started.elapsed().as_millis(), ?report, "Job completed");
        return Ok(());
    };

    info!(job = name, interval_secs = interval.as_secs(), "Starting periodic job");
    let mut shutdown = std::pin::pin!(shutdown);
    let mut stop = false;

    loop {
        let started = Instant::now();
        let run = job();
        let mut run = std::pin::pin!(run);
        let result = loop {
            tokio::select! {
                result = run.as_mut() => break result,
                _ = shutdown.as_mut(), if !stop => {
                    info!(job = name, "Shutdown requested, finishing current run");
                    stop = true;
                }
            }
        };

        match result {
            Ok(report) => {
                info!(job = name, elapsed_ms = started.elapsed().as_millis(), ?report, "Job completed")
            }
            Err(err) => error!(job = name, error = ?err, "Job failed"),
        }

        if stop {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.as_mut() => break,
        }
    }

    info!(job = name, "Job stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use eyre::eyre;

    use super::*;

    fn counting_job(
        runs: &Arc<AtomicUsize>,
        duration: Duration,
        fail: bool,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = eyre::Result<usize>> + Send>> {
        let runs = Arc::clone(runs);
        move || {
            let runs = Arc::clone(&runs);
            Box::pin(async move {
                tokio::time::sleep(duration).await;
                let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
                if fail { Err(eyre!("run {n} failed")) } else { Ok(n) }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_runs_once_and_returns_the_error() {
        let runs = Arc::new(AtomicUsize::new(0));
        run_job_until(
            "test",
            None,
            counting_job(&runs, Duration::ZERO, false),
            std::future::pending(),
        )
        .await
        .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let result = run_job_until(
            "test",
            None,
            counting_job(&runs, Duration::ZERO, true),
            std::future::pending(),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_job_stops_at_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = tokio::time::sleep(Duration::from_secs(25));

        run_job_until(
            "test",
            Some(Duration::from_secs(10)),
            counting_job(&runs, Duration::ZERO, false),
            shutdown,
        )
        .await
        .unwrap();

        // runs at 0s, 10s and 20s
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_a_run_lets_it_finish() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = tokio::time::sleep(Duration::from_secs(1));

        run_job_until(
            "test",
            Some(Duration::from_secs(10)),
            counting_job(&runs, Duration::from_secs(5), false),
            shutdown,
        )
        .await
        .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_runs_do_not_stop_the_loop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = tokio::time::sleep(Duration::from_secs(35));

        run_job_until(
            "test",
            Some(Duration::from_secs(10)),
            counting_job(&runs, Duration::ZERO, true),
            shutdown,
        )
        .await
        .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }
}
