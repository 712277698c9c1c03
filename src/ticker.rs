/// Periodic poll timer.
///
/// Fires every `period`, first one `period` after arming, and stops by
/// itself after `max_ticks`. The shared counter holds the number of ticks
/// handed to the caller, so it never exceeds `max_ticks` and cannot move
/// once the caller stops asking.
/// `disarm` stops it for good; dropping the timer aborts the tick task too.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub struct PollTimer {
    ticks: mpsc::Receiver<u32>,
    handle: Option<JoinHandle<()>>,
    counter: Arc<AtomicU32>,
}

impl PollTimer {
    /// Arm a timer that counts into `counter` (reset to zero first).
    pub fn arm(period: Duration, max_ticks: u32, counter: Arc<AtomicU32>) -> Self {
        counter.store(0, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut n = 0;
            while n < max_ticks {
                interval.tick().await;
                n += 1;
                if tx.send(n).await.is_err() {
                    break;
                }
            }
            tracing::trace!("poll timer finished");
        });

        Self {
            ticks: rx,
            handle: Some(handle),
            counter,
        }
    }

    /// Next tick number, or `None` once the timer has run out or been disarmed.
    pub async fn tick(&mut self) -> Option<u32> {
        let n = self.ticks.recv().await?;
        self.counter.store(n, Ordering::SeqCst);
        Some(n)
    }

    pub fn count(&self) -> u32 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Stop the timer and wait for the tick task to be gone. Idempotent.
    pub async fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            // Cancelled or already finished; either way it won't tick again.
            let _ = handle.await;
            self.close();
            tracing::debug!(ticks = self.count(), "poll timer disarmed");
        }
    }

    fn close(&mut self) {
        self.ticks.close();
        while self.ticks.try_recv().is_ok() {}
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
