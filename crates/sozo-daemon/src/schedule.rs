//! Interval timers that feed ticks into the coordinator's event channel.
//!
//! A `PollTimer` owns a single ticker task.  Dropping or cancelling it stops
//! the task, so a timer can never outlive the field that holds it.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct PollTimer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollTimer {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Send `make_event()` into `tx` every `interval`.  With `run_immediately`
/// the first tick fires at once, otherwise after one interval.
///
/// The ticker stops when cancelled or when the receiver is gone.
pub fn schedule<T, F>(
    interval: Duration,
    run_immediately: bool,
    tx: mpsc::Sender<T>,
    make_event: F,
) -> PollTimer
where
    T: Send + 'static,
    F: Fn() -> T + Send + 'static,
{
    let token = CancellationToken::new();
    let cancelled = token.clone();

    let handle = tokio::spawn(async move {
        let start = if run_immediately {
            Instant::now()
        } else {
            Instant::now() + interval
        };
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => break,
                _ = ticker.tick() => {
                    if tx.send(make_event()).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("poll timer ({:?}) stopped", interval);
    });

    PollTimer { token, handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<u32>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[tokio::test(start_paused = true)]
    async fn fires_immediately_then_on_interval() {
        let (tx, mut rx) = mpsc::channel(16);
        let timer = schedule(Duration::from_secs(5), true, tx, || 1u32);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(drain(&mut rx), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(drain(&mut rx), 2);
        assert!(timer.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_start_skips_first_tick() {
        let (tx, mut rx) = mpsc::channel(16);
        let _timer = schedule(Duration::from_secs(5), false, tx, || 1u32);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(drain(&mut rx), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(drain(&mut rx), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_ticks() {
        let (tx, mut rx) = mpsc::channel(16);
        let timer = schedule(Duration::from_secs(5), true, tx, || 1u32);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(drain(&mut rx), 1);

        drop(timer);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(drain(&mut rx), 0);
        // The ticker task held the only sender; it is gone now.
        assert!(rx.recv().await.is_none());
    }
}
