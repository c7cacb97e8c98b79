//! Randomized delays between requests, and the stop signal they honour.

use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;

/// Sending half of the operator stop signal.
#[derive(Debug)]
pub(crate) struct ShutdownTrigger(watch::Sender<bool>);

/// Receiving half; cheap to clone into every worker.
#[derive(Debug, Clone)]
pub(crate) struct Shutdown(watch::Receiver<bool>);

pub(crate) fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), Shutdown(rx))
}

impl ShutdownTrigger {
    pub(crate) fn trigger(&self) {
        self.0.send_replace(true);
    }
}

impl Shutdown {
    pub(crate) fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once a stop is requested. Never resolves if the trigger is
    /// dropped without firing.
    pub(crate) async fn triggered(&self) {
        let mut rx = self.0.clone();
        if rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn seconds(value: f32) -> Duration {
    Duration::try_from_secs_f32(value).unwrap_or(Duration::ZERO)
}

/// A uniformly random duration in `[min, max]` seconds. A degenerate range
/// yields `min`. Values that are not finite or overflow a `Duration` yield no
/// pause rather than a panic.
pub(crate) fn sample_delay(min: f32, max: f32) -> Duration {
    let min = min.max(0.0);
    if min >= max || !max.is_finite() {
        return seconds(min);
    }
    seconds(rand::thread_rng().gen_range(min..=max))
}

/// Sleeps for a random delay in `[min, max]` seconds, cutting the sleep short
/// on a stop request. Returns `false` when interrupted.
pub(crate) async fn delay(min: f32, max: f32, shutdown: &Shutdown) -> bool {
    let pause = sample_delay(min, max);
    if pause.is_zero() {
        return !shutdown.is_triggered();
    }
    tracing::debug!(target: "pacing", "Sleeping {:?}", pause);
    tokio::select! {
        _ = tokio::time::sleep(pause) => !shutdown.is_triggered(),
        _ = shutdown.triggered() => {
            tracing::debug!(target: "pacing", "Delay interrupted by shutdown");
            false
        }
    }
}
