use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use futures::FutureExt;
use tokio::signal::unix::{Signal, SignalKind};
use tracing::debug;

/// Resolves once the process is asked to stop, by SIGINT or SIGTERM.
///
/// [`run_job`](crate::run_job) waits on it between runs of a periodic job; a run already in
/// progress is left to finish.
pub struct ShutdownSignal {
    interrupt: Pin<Box<dyn Future<Output = io::Result<()>> + Send>>,
    terminate: Signal,
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal").finish_non_exhaustive()
    }
}

impl ShutdownSignal {
    /// Register for SIGTERM now; the SIGINT handler is installed on first poll.
    pub fn new() -> io::Result<Self> {
        let interrupt = Box::pin(tokio::signal::ctrl_c());
        let terminate = tokio::signal::unix::signal(SignalKind::terminate())?;

        Ok(Self { interrupt, terminate })
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.interrupt.poll_unpin(cx).is_ready() {
            debug!("Interrupted, stopping after the current run");
            return Poll::Ready(());
        }

        if this.terminate.poll_recv(cx).is_ready() {
            debug!("Terminated, stopping after the current run");
            return Poll::Ready(());
        }

        Poll::Pending
    }
}
