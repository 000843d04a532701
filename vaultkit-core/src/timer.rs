//! Host-provided timer abstraction (spec.md §5). Everywhere the original
//! would hand work to `setTimeout`/`setInterval`, this crate schedules
//! through a `Timer` instead, so observer fan-out and the sync watchdog
//! never reenter the caller's stack and hosts embedding the core in a
//! non-tokio runtime can supply their own scheduler.
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub trait Timer: Send + Sync {
    /// Run `fut` after `delay`, off the caller's stack.
    fn spawn_deferred(&self, delay: Duration, fut: BoxFuture);

    /// Produce a receiver that yields every `period`, for the sync watchdog
    /// and local-hydration batch yielding.
    fn interval(&self, period: Duration) -> mpsc::Receiver<()>;
}

/// The default `Timer` impl, backed directly by the tokio runtime this crate
/// already depends on.
#[derive(Debug, Clone, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn spawn_deferred(&self, delay: Duration, fut: BoxFuture) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        });
    }

    fn interval(&self, period: Duration) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick fires immediately; skip it so intervals behave like
            // `setInterval` (first fire after one full period).
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

/// Schedule `fut` to run on the next timer tick with zero delay -- the
/// "defer to next turn" idiom used by the Model Manager's observer fan-out
/// so mapping never reenters through an observer callback.
pub fn defer(timer: &Arc<dyn Timer>, fut: BoxFuture) {
    timer.spawn_deferred(Duration::ZERO, fut);
}
