//! Processing pipeline: dedup, resolve, submit, record
//!
//! Per identifier:
//! 1. Skip if already processed or errored, or already pending in this run
//! 2. Resolve to an archive target; unresolvable identifiers are skipped and
//!    never persisted
//! 3. Optionally ask the availability API first (no pacing, no slot)
//! 4. Submit through the coordinator
//! 5. Route the outcome: success → processed, failure → errored,
//!    rate limited → nothing (eligible again next run)
//!
//! Nothing that happens to one identifier stops the run.

use crate::archive::{ArchiveSubmitter, SubmitOutcome};
use crate::cid::{ArchiveTarget, ContentId, GatewayResolver, ResolveError};
use crate::config::ArchiverConfig;
use crate::coordinator::Coordinator;
use crate::state::{StateError, StateStore};
use futures::stream::Stream;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Counts for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Submissions sent to the archive service
    pub dispatched: usize,
    /// Accepted submissions
    pub processed: usize,
    /// Found already archived (submission or availability lookup)
    pub already_archived: usize,
    pub errored: usize,
    pub rate_limited: usize,
    pub skipped_duplicate: usize,
    pub skipped_malformed: usize,
    /// Outcomes that could not be written to disk
    pub persist_failures: usize,
}

impl RunReport {
    /// Identifiers added to the processed record by this run
    pub fn newly_processed(&self) -> usize {
        self.processed + self.already_archived
    }

    pub fn skipped(&self) -> usize {
        self.skipped_duplicate + self.skipped_malformed
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dispatched={} processed={} already_archived={} errored={} rate_limited={} \
             skipped_duplicate={} skipped_malformed={} persist_failures={}",
            self.dispatched,
            self.processed,
            self.already_archived,
            self.errored,
            self.rate_limited,
            self.skipped_duplicate,
            self.skipped_malformed,
            self.persist_failures
        )
    }
}

/// Live state of one run
///
/// Owned by the caller, so the counts can still be read after the run future
/// is dropped (spider mode only ends on a signal). Use a fresh one per run.
#[derive(Debug, Default)]
pub struct RunProgress {
    dispatched: AtomicUsize,
    processed: AtomicUsize,
    already_archived: AtomicUsize,
    errored: AtomicUsize,
    rate_limited: AtomicUsize,
    skipped_duplicate: AtomicUsize,
    skipped_malformed: AtomicUsize,
    persist_failures: AtomicUsize,
    /// Admitted but not yet settled in the store: in flight or rate limited
    pending: Mutex<HashSet<ContentId>>,
}

impl RunProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts so far
    pub fn report(&self) -> RunReport {
        RunReport {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            already_archived: self.already_archived.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            skipped_duplicate: self.skipped_duplicate.load(Ordering::Relaxed),
            skipped_malformed: self.skipped_malformed.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }

    /// Identifiers this run still tracks itself
    pub fn unsettled(&self) -> usize {
        self.pending().len()
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<ContentId>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// False if `id` is already pending
    fn hold(&self, id: &ContentId) -> bool {
        self.pending().insert(id.clone())
    }

    /// The store knows `id` from here on
    fn settle(&self, id: &ContentId) {
        self.pending().remove(id);
    }
}

/// Archiving pipeline over any [`ArchiveSubmitter`]
pub struct Pipeline<C: ArchiveSubmitter> {
    store: Arc<StateStore>,
    client: Arc<C>,
    resolver: GatewayResolver,
    coordinator: Coordinator,
    check_availability_first: bool,
}

impl<C: ArchiveSubmitter> Pipeline<C> {
    pub fn new(
        store: Arc<StateStore>,
        client: Arc<C>,
        resolver: GatewayResolver,
        coordinator: Coordinator,
    ) -> Self {
        Self {
            store,
            client,
            resolver,
            coordinator,
            check_availability_first: false,
        }
    }

    /// Build from resolved configuration
    pub fn from_config(
        config: &ArchiverConfig,
        store: Arc<StateStore>,
        client: Arc<C>,
    ) -> Result<Self, ResolveError> {
        let resolver = GatewayResolver::new(&config.gateway)?;
        Ok(Self::new(store, client, resolver, Coordinator::from_config(config))
            .with_availability_check(config.check_availability_first))
    }

    /// Look up existing captures before spending a submission
    pub fn with_availability_check(mut self, enabled: bool) -> Self {
        self.check_availability_first = enabled;
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Process every identifier from `ids`
    ///
    /// Returns when the stream ends and all submissions have completed.
    pub async fn run<S>(&self, ids: S) -> RunReport
    where
        S: Stream<Item = ContentId>,
    {
        self.run_with(ids, &RunProgress::new()).await
    }

    /// Like [`Pipeline::run`], counting into caller-owned `progress`
    pub async fn run_with<S>(&self, ids: S, progress: &RunProgress) -> RunReport
    where
        S: Stream<Item = ContentId>,
    {
        info!(
            concurrency = self.coordinator.capacity(),
            spacing = ?self.coordinator.min_spacing(),
            gateway = self.resolver.gateway(),
            "Starting archive run"
        );

        self.coordinator
            .run(
                ids,
                move |id| {
                    let admitted = self.admit(id, progress);
                    async move {
                        let target = admitted?;
                        if self.check_availability_first
                            && self.found_in_archive(&target, progress).await
                        {
                            return None;
                        }
                        Some(target)
                    }
                },
                move |target| async move {
                    RunProgress::bump(&progress.dispatched);
                    let outcome = self.client.submit(&target).await;
                    self.route(&target, outcome, progress).await;
                },
            )
            .await;

        let report = progress.report();
        info!("Archive run complete: {}", report);
        report
    }

    /// Dedup and resolve; `None` means skip
    fn admit(&self, id: ContentId, progress: &RunProgress) -> Option<ArchiveTarget> {
        if self.store.is_known(&id) || !progress.hold(&id) {
            debug!(cid = %id, "Skipping known CID");
            RunProgress::bump(&progress.skipped_duplicate);
            return None;
        }

        match self.resolver.resolve(&id) {
            Ok(target) => Some(target),
            Err(e) => {
                warn!(cid = %id, error = %e, "Skipping malformed CID");
                RunProgress::bump(&progress.skipped_malformed);
                progress.settle(&id);
                None
            }
        }
    }

    /// Availability pre-check; true when the target is already captured
    async fn found_in_archive(&self, target: &ArchiveTarget, progress: &RunProgress) -> bool {
        match self.client.is_indexed(target).await {
            Ok(true) => {
                info!(cid = %target.cid(), "Already archived");
                RunProgress::bump(&progress.already_archived);
                self.record(target, true, progress).await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!(cid = %target.cid(), error = %e, "Availability lookup failed, submitting");
                false
            }
        }
    }

    async fn route(&self, target: &ArchiveTarget, outcome: SubmitOutcome, progress: &RunProgress) {
        match outcome {
            SubmitOutcome::Accepted { job_id } => {
                info!(
                    cid = %target.cid(),
                    job_id = job_id.as_deref().unwrap_or("pending"),
                    "Archived: {}",
                    target
                );
                RunProgress::bump(&progress.processed);
                self.record(target, true, progress).await;
            }
            SubmitOutcome::AlreadyArchived { message } => {
                info!(cid = %target.cid(), "Already archived: {}", message);
                RunProgress::bump(&progress.already_archived);
                self.record(target, true, progress).await;
            }
            SubmitOutcome::Failed { reason } => {
                warn!(cid = %target.cid(), "Failed to archive {}: {}", target, reason);
                RunProgress::bump(&progress.errored);
                self.record(target, false, progress).await;
            }
            SubmitOutcome::RateLimited { reason } => {
                warn!(
                    cid = %target.cid(),
                    "Rate limited, leaving for the next run: {}",
                    reason
                );
                RunProgress::bump(&progress.rate_limited);
            }
        }
    }

    /// Mark and persist off the async workers, then drop the run's own hold
    async fn record(&self, target: &ArchiveTarget, success: bool, progress: &RunProgress) {
        let store = Arc::clone(&self.store);
        let cid = target.cid().clone();
        let result = tokio::task::spawn_blocking(move || {
            if success {
                store.mark_processed(&cid)
            } else {
                store.mark_errored(&cid)
            }
        })
        .await;

        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e @ StateError::Conflict { .. })) => {
                warn!(cid = %target.cid(), "Outcome not recorded: {}", e);
            }
            Ok(Err(e)) => {
                error!(cid = %target.cid(), "Outcome not persisted: {}", e);
                RunProgress::bump(&progress.persist_failures);
            }
            Err(e) => {
                error!(cid = %target.cid(), "State write task failed: {}", e);
                RunProgress::bump(&progress.persist_failures);
                // The store may not have the identifier; keep holding it
                return;
            }
        }

        // Mark leaves the identifier in memory even when the write fails
        progress.settle(target.cid());
    }
}
