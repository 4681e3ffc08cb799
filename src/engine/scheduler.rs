// Chatbridge Engine — Cancelable Scheduled Tasks
//
// One-shot delays and fixed-period tickers backed by tokio tasks. Dropping a
// `ScheduledTask` aborts it, so replacing a timer slot cancels the old timer.

use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub struct ScheduledTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `fut` once after `delay`. Must be called inside a tokio runtime.
    pub fn after<F>(name: &'static str, delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        });
        ScheduledTask { name, handle }
    }

    /// Call `tick` every `period`, first call one period from now.
    pub fn every<F>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick();
            }
        });
        ScheduledTask { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {
        // Drop does the abort.
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            debug!("[scheduler] Cancelling '{}'", self.name);
            self.handle.abort();
        }
    }
}
