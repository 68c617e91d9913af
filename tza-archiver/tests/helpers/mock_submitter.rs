//! Scripted archive service

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tza_archiver::archive::ArchiveError;
use tza_archiver::{ArchiveSubmitter, ArchiveTarget, ContentId, SubmitOutcome};

/// Answers `Accepted` unless told otherwise, and records every call
pub struct MockSubmitter {
    outcomes: HashMap<ContentId, SubmitOutcome>,
    indexed: HashSet<ContentId>,
    failing_lookups: bool,
    delay: Duration,

    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    lookups: AtomicUsize,
    submitted: Mutex<Vec<ContentId>>,
    dispatch_times: Mutex<Vec<Instant>>,
}

impl MockSubmitter {
    pub fn accepting() -> Self {
        Self {
            outcomes: HashMap::new(),
            indexed: HashSet::new(),
            failing_lookups: false,
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
            dispatch_times: Mutex::new(Vec::new()),
        }
    }

    pub fn with_outcome(mut self, cid: &ContentId, outcome: SubmitOutcome) -> Self {
        self.outcomes.insert(cid.clone(), outcome);
        self
    }

    /// Report `cid` as present in the availability API
    pub fn with_indexed(mut self, cid: &ContentId) -> Self {
        self.indexed.insert(cid.clone());
        self
    }

    pub fn with_failing_lookups(mut self) -> Self {
        self.failing_lookups = true;
        self
    }

    /// Hold every submission for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn submitted(&self) -> Vec<ContentId> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Submission start times, sorted
    pub fn dispatch_times(&self) -> Vec<Instant> {
        let mut times = self.dispatch_times.lock().unwrap().clone();
        times.sort();
        times
    }
}

#[async_trait]
impl ArchiveSubmitter for MockSubmitter {
    async fn submit(&self, target: &ArchiveTarget) -> SubmitOutcome {
        self.dispatch_times.lock().unwrap().push(Instant::now());
        self.submitted.lock().unwrap().push(target.cid().clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.outcomes
            .get(target.cid())
            .cloned()
            .unwrap_or(SubmitOutcome::Accepted {
                job_id: Some(format!("spn2-{}", target.cid())),
            })
    }

    async fn is_indexed(&self, target: &ArchiveTarget) -> Result<bool, ArchiveError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing_lookups {
            return Err(ArchiveError::NetworkError("connection refused".to_string()));
        }
        Ok(self.indexed.contains(target.cid()))
    }
}
