//! Bounded, paced dispatch of archive submissions
//!
//! At most `capacity` submissions run at once, and successive dispatches are
//! spaced at least `min_spacing` apart regardless of which slot they use.
//! The input stream is only polled when a slot is free, so discovery never
//! runs far ahead of archiving.

use crate::config::ArchiverConfig;
use futures::stream::{Stream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Global minimum spacing between dispatches
///
/// Waiters queue on the mutex in arrival order; whoever holds it sleeps until
/// the spacing has elapsed, then stamps the new dispatch time.
pub struct PacingGate {
    last_dispatch: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl PacingGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_dispatch: Mutex::new(None),
            min_interval,
        }
    }

    /// Even spacing for `rate` dispatches per minute
    pub fn per_minute(rate: u32) -> Self {
        Self::new(Duration::from_secs(60) / rate.max(1))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next dispatch is allowed
    pub async fn wait(&self) {
        let mut last = self.last_dispatch.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Pacing: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Worker pool over a lazily consumed input stream
pub struct Coordinator {
    capacity: usize,
    gate: PacingGate,
}

impl Coordinator {
    pub fn new(capacity: usize, min_spacing: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            gate: PacingGate::new(min_spacing),
        }
    }

    /// Capacity and spacing from the configured concurrency and rate
    pub fn from_config(config: &ArchiverConfig) -> Self {
        Self::new(config.concurrency, config.min_dispatch_spacing())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_spacing(&self) -> Duration {
        self.gate.min_interval()
    }

    /// Drive `input` to completion
    ///
    /// `admit` filters and transforms each item before it takes a slot;
    /// `None` drops the item without touching the gate. Returns once the
    /// input is exhausted and every admitted submission has finished.
    pub async fn run<S, A, AF, U, F, Fut>(&self, input: S, admit: A, submit: F)
    where
        S: Stream,
        A: FnMut(S::Item) -> AF,
        AF: Future<Output = Option<U>>,
        F: Fn(U) -> Fut,
        Fut: Future<Output = ()>,
    {
        let gate = &self.gate;
        let submit = &submit;

        input
            .filter_map(admit)
            .map(|item| async move {
                gate.wait().await;
                submit(item).await;
            })
            .buffer_unordered(self.capacity)
            .for_each(|()| futures::future::ready(()))
            .await;
    }
}
