//! Client side of the asynchronous conversion-job lifecycle.
//!
//! One [`ConversionSessionController`] drives the conversion of one pack:
//! `Idle -> Submitting -> Polling -> Resolved`. Every state write is tagged
//! with the session generation it belongs to; `cancel` and every new start
//! bump the generation, so a response that arrives for an older session is
//! dropped instead of being applied.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use shared::{
    domain::{ConversionStatus, JobId, PackId, VersionString},
    protocol::{ConversionJob, ResourcePackRecord},
};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    api::ResourcePackApi,
    error::ConversionError,
    timer::{PollTimer, TokioTimer},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MAX_CONSECUTIVE_POLL_FAILURES: u32 = 3;

const MISSING_FAILURE_MESSAGE: &str = "conversion failed without an error message";
const UNKNOWN_STATUS_MESSAGE: &str = "server reported an unrecognized job status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionPolicy {
    /// Fixed delay between two status requests.
    pub poll_interval: Duration,
    /// Upper bound on the time spent polling one job.
    pub max_wait: Duration,
    /// Poll transport failures tolerated in a row before the job is abandoned.
    pub max_consecutive_poll_failures: u32,
}

impl Default for ConversionPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            max_consecutive_poll_failures: DEFAULT_MAX_CONSECUTIVE_POLL_FAILURES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// `converted_pack` is `None` when no converted record matched the job's
    /// target version.
    Completed {
        converted_pack: Option<ResourcePackRecord>,
    },
    Failed {
        error_message: String,
    },
    TimedOut {
        elapsed: Duration,
        polls: u32,
    },
    /// Polling lost contact with the server; the job's real state is unknown.
    Abandoned {
        last_error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Submitting,
    Polling,
    Resolved(ConversionOutcome),
}

impl SessionPhase {
    /// `true` while a submission or the poll loop is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Submitting | Self::Polling)
    }

    pub fn outcome(&self) -> Option<&ConversionOutcome> {
        match self {
            Self::Resolved(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Observable state of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSnapshot {
    pub pack_id: PackId,
    pub phase: SessionPhase,
    pub target_version: Option<VersionString>,
    pub job: Option<ConversionJob>,
    /// Most recent transport problem (submission, poll or reconciliation).
    pub last_error: Option<String>,
    pub polls: u32,
}

impl ConversionSnapshot {
    fn idle(pack_id: PackId) -> Self {
        Self {
            pack_id,
            phase: SessionPhase::Idle,
            target_version: None,
            job: None,
            last_error: None,
            polls: 0,
        }
    }

    pub fn converted_pack(&self) -> Option<&ResourcePackRecord> {
        match self.phase.outcome() {
            Some(ConversionOutcome::Completed { converted_pack }) => converted_pack.as_ref(),
            _ => None,
        }
    }

    pub fn failure_message(&self) -> Option<&str> {
        match self.phase.outcome() {
            Some(ConversionOutcome::Failed { error_message }) => Some(error_message),
            _ => None,
        }
    }

    /// Completed on the server, but no converted record could be matched.
    pub fn reconciliation_gap(&self) -> bool {
        matches!(
            self.phase.outcome(),
            Some(ConversionOutcome::Completed {
                converted_pack: None
            })
        )
    }
}

#[derive(Debug, Clone)]
pub enum ConversionEvent {
    Submitted {
        pack_id: PackId,
        job: ConversionJob,
    },
    SubmissionFailed {
        pack_id: PackId,
        error: String,
    },
    JobUpdated {
        pack_id: PackId,
        job: ConversionJob,
    },
    PollFailed {
        pack_id: PackId,
        job_id: JobId,
        consecutive_failures: u32,
        error: String,
    },
    Resolved {
        pack_id: PackId,
        outcome: ConversionOutcome,
    },
    Cancelled {
        pack_id: PackId,
    },
}

/// Result of the advisory duplicate check done before a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preflight {
    Ready,
    /// A conversion to this version already exists and may be overwritten.
    WouldOverwrite(ResourcePackRecord),
}

/// Picks the converted record produced for `target_version`.
///
/// Matching is exact string equality. When several records match, the most
/// recently uploaded one wins (ties broken by the higher id).
pub fn select_converted<'a>(
    conversions: &'a [ResourcePackRecord],
    target_version: &str,
) -> Option<&'a ResourcePackRecord> {
    conversions
        .iter()
        .filter(|record| record.target_version.as_deref() == Some(target_version))
        .max_by_key(|record| (record.upload_date, record.id))
}

struct SessionInner {
    generation: u64,
    poll_task: Option<JoinHandle<()>>,
}

struct SessionShared {
    pack_id: PackId,
    api: Arc<dyn ResourcePackApi>,
    timer: Arc<dyn PollTimer>,
    policy: ConversionPolicy,
    inner: Mutex<SessionInner>,
    state: watch::Sender<ConversionSnapshot>,
    events: broadcast::Sender<ConversionEvent>,
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Applies `update` only while `generation` is still the live session.
    fn apply(&self, generation: u64, update: impl FnOnce(&mut ConversionSnapshot)) -> bool {
        let guard = self.lock();
        if guard.generation != generation {
            return false;
        }
        self.state.send_modify(update);
        true
    }

    /// Time left of `max_wait` for a session that started polling at `started`.
    fn remaining(&self, started: Instant) -> Duration {
        let elapsed = self.timer.now().saturating_duration_since(started);
        self.policy.max_wait.saturating_sub(elapsed)
    }

    fn emit(&self, event: ConversionEvent) {
        let _ = self.events.send(event);
    }

    async fn reconcile(
        &self,
        target_version: &str,
    ) -> Result<Option<ResourcePackRecord>, ConversionError> {
        let conversions = self
            .api
            .list_conversions(self.pack_id)
            .await
            .map_err(ConversionError::Listing)?;
        Ok(select_converted(&conversions, target_version).cloned())
    }

    fn resolve(&self, generation: u64, outcome: ConversionOutcome) {
        let applied = self.apply(generation, |snapshot| {
            snapshot.phase = SessionPhase::Resolved(outcome.clone());
        });
        if !applied {
            debug!(pack_id = self.pack_id.0, "conversion: dropping outcome of stale session");
            return;
        }
        info!(pack_id = self.pack_id.0, ?outcome, "conversion: resolved");
        self.emit(ConversionEvent::Resolved {
            pack_id: self.pack_id,
            outcome,
        });
    }

    async fn drive(self: Arc<Self>, generation: u64, submitted: ConversionJob) {
        let started = self.timer.now();
        let mut job = submitted;
        let mut polls = 0u32;
        let mut consecutive_failures = 0u32;

        while job.status.is_active() {
            let elapsed = self.timer.now().saturating_duration_since(started);
            if elapsed >= self.policy.max_wait {
                warn!(
                    pack_id = self.pack_id.0,
                    job_id = job.id.0,
                    polls,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "conversion: polling budget exhausted"
                );
                self.resolve(generation, ConversionOutcome::TimedOut { elapsed, polls });
                return;
            }

            self.timer.sleep(self.policy.poll_interval).await;
            if !self.is_current(generation) {
                return;
            }

            let remaining = self.remaining(started);
            let polled = tokio::time::timeout(remaining, self.api.conversion_job(job.id)).await;
            let Ok(polled) = polled else {
                let elapsed = self.timer.now().saturating_duration_since(started);
                warn!(
                    pack_id = self.pack_id.0,
                    job_id = job.id.0,
                    polls,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "conversion: status request outlived the polling budget"
                );
                self.resolve(generation, ConversionOutcome::TimedOut { elapsed, polls });
                return;
            };

            match polled {
                Ok(updated) => {
                    polls += 1;
                    consecutive_failures = 0;
                    let applied = self.apply(generation, |snapshot| {
                        snapshot.job = Some(updated.clone());
                        snapshot.polls = polls;
                        snapshot.last_error = None;
                    });
                    if !applied {
                        debug!(job_id = job.id.0, "conversion: dropping stale poll response");
                        return;
                    }
                    debug!(
                        pack_id = self.pack_id.0,
                        job_id = updated.id.0,
                        status = %updated.status,
                        "conversion: job polled"
                    );
                    self.emit(ConversionEvent::JobUpdated {
                        pack_id: self.pack_id,
                        job: updated.clone(),
                    });
                    job = updated;
                }
                Err(err) => {
                    consecutive_failures += 1;
                    let message = err.to_string();
                    let applied = self.apply(generation, |snapshot| {
                        snapshot.last_error = Some(message.clone());
                    });
                    if !applied {
                        return;
                    }
                    warn!(
                        pack_id = self.pack_id.0,
                        job_id = job.id.0,
                        consecutive_failures,
                        error = %message,
                        "conversion: poll request failed"
                    );
                    self.emit(ConversionEvent::PollFailed {
                        pack_id: self.pack_id,
                        job_id: job.id,
                        consecutive_failures,
                        error: message.clone(),
                    });
                    if consecutive_failures >= self.policy.max_consecutive_poll_failures {
                        self.resolve(
                            generation,
                            ConversionOutcome::Abandoned {
                                last_error: message,
                            },
                        );
                        return;
                    }
                }
            }
        }

        let outcome = match job.status {
            ConversionStatus::Completed => {
                if !self.is_current(generation) {
                    return;
                }
                let budget = self.remaining(started).max(self.policy.poll_interval);
                let reconciled =
                    match tokio::time::timeout(budget, self.reconcile(&job.target_version)).await {
                        Ok(result) => result.map_err(|err| err.to_string()),
                        Err(_) => Err(format!(
                            "listing conversions timed out after {} ms",
                            budget.as_millis()
                        )),
                    };
                let converted_pack = match reconciled {
                    Ok(found) => found,
                    Err(message) => {
                        warn!(
                            pack_id = self.pack_id.0,
                            job_id = job.id.0,
                            error = %message,
                            "conversion: reconciliation fetch failed"
                        );
                        self.apply(generation, |snapshot| {
                            snapshot.last_error = Some(message);
                        });
                        None
                    }
                };
                if converted_pack.is_none() {
                    warn!(
                        pack_id = self.pack_id.0,
                        job_id = job.id.0,
                        target_version = %job.target_version,
                        "conversion: completed but no converted pack matched"
                    );
                }
                ConversionOutcome::Completed { converted_pack }
            }
            ConversionStatus::Failed => ConversionOutcome::Failed {
                error_message: job
                    .error_message
                    .clone()
                    .unwrap_or_else(|| MISSING_FAILURE_MESSAGE.to_string()),
            },
            ConversionStatus::Unknown | ConversionStatus::Pending | ConversionStatus::InProgress => {
                ConversionOutcome::Failed {
                    error_message: UNKNOWN_STATUS_MESSAGE.to_string(),
                }
            }
        };
        self.resolve(generation, outcome);
    }
}

/// Drives one pack's conversion from user input to a displayable result.
///
/// Dropping the controller cancels the session.
pub struct ConversionSessionController {
    shared: Arc<SessionShared>,
}

impl ConversionSessionController {
    pub fn new(api: Arc<dyn ResourcePackApi>, pack_id: PackId) -> Self {
        Self::new_with_dependencies(
            api,
            Arc::new(TokioTimer),
            ConversionPolicy::default(),
            pack_id,
        )
    }

    pub fn new_with_dependencies(
        api: Arc<dyn ResourcePackApi>,
        timer: Arc<dyn PollTimer>,
        policy: ConversionPolicy,
        pack_id: PackId,
    ) -> Self {
        let (state, _) = watch::channel(ConversionSnapshot::idle(pack_id));
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(SessionShared {
                pack_id,
                api,
                timer,
                policy,
                inner: Mutex::new(SessionInner {
                    generation: 0,
                    poll_task: None,
                }),
                state,
                events,
            }),
        }
    }

    pub fn validate_version(input: &str) -> bool {
        shared::domain::validate_version(input)
    }

    pub fn pack_id(&self) -> PackId {
        self.shared.pack_id
    }

    pub fn policy(&self) -> ConversionPolicy {
        self.shared.policy
    }

    pub fn snapshot(&self) -> ConversionSnapshot {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversionSnapshot> {
        self.shared.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<ConversionEvent> {
        self.shared.events.subscribe()
    }

    /// Warns when a conversion to `target_version` already exists for this
    /// pack. Advisory only; it never blocks [`Self::start_conversion`].
    pub async fn preflight(&self, target_version: &str) -> Result<Preflight, ConversionError> {
        let version = VersionString::parse(target_version)?;
        let conversions = self
            .shared
            .api
            .list_conversions(self.shared.pack_id)
            .await
            .map_err(ConversionError::Listing)?;
        match select_converted(&conversions, version.as_str()) {
            Some(existing) => {
                warn!(
                    pack_id = self.shared.pack_id.0,
                    existing_pack_id = existing.id.0,
                    target_version = %version,
                    "conversion: target version already converted"
                );
                Ok(Preflight::WouldOverwrite(existing.clone()))
            }
            None => Ok(Preflight::Ready),
        }
    }

    /// Submits a conversion of this pack to `target_version` and starts
    /// polling it.
    ///
    /// Invalid versions and starts while a submission or poll loop is
    /// outstanding are rejected before any request is sent.
    pub async fn start_conversion(
        &self,
        target_version: &str,
    ) -> Result<ConversionJob, ConversionError> {
        let version = VersionString::parse(target_version)?;
        let pack_id = self.shared.pack_id;

        let generation = {
            let mut guard = self.shared.lock();
            if self.shared.state.borrow().phase.is_busy() {
                warn!(pack_id = pack_id.0, "conversion: start rejected, session busy");
                return Err(ConversionError::Busy(pack_id));
            }
            guard.generation += 1;
            if let Some(task) = guard.poll_task.take() {
                task.abort();
            }
            let fresh = ConversionSnapshot {
                phase: SessionPhase::Submitting,
                target_version: Some(version.clone()),
                ..ConversionSnapshot::idle(pack_id)
            };
            self.shared.state.send_replace(fresh);
            guard.generation
        };

        info!(pack_id = pack_id.0, target_version = %version, "conversion: submitting");
        let submitted = self.shared.api.start_conversion(pack_id, &version).await;

        let job = match submitted {
            Ok(job) => job,
            Err(err) => {
                let message = err.to_string();
                let applied = self.shared.apply(generation, |snapshot| {
                    snapshot.phase = SessionPhase::Idle;
                    snapshot.last_error = Some(message.clone());
                });
                if !applied {
                    return Err(ConversionError::Cancelled);
                }
                warn!(pack_id = pack_id.0, error = %message, "conversion: submission failed");
                self.shared.emit(ConversionEvent::SubmissionFailed {
                    pack_id,
                    error: message,
                });
                return Err(ConversionError::Submission(err));
            }
        };

        let mut guard = self.shared.lock();
        if guard.generation != generation {
            debug!(pack_id = pack_id.0, job_id = job.id.0, "conversion: submission outlived its session");
            return Err(ConversionError::Cancelled);
        }
        self.shared.state.send_modify(|snapshot| {
            snapshot.phase = SessionPhase::Polling;
            snapshot.job = Some(job.clone());
        });
        info!(
            pack_id = pack_id.0,
            job_id = job.id.0,
            status = %job.status,
            "conversion: job accepted"
        );
        self.shared.emit(ConversionEvent::Submitted {
            pack_id,
            job: job.clone(),
        });
        let shared = Arc::clone(&self.shared);
        let first = job.clone();
        guard.poll_task = Some(tokio::spawn(shared.drive(generation, first)));

        Ok(job)
    }

    /// One status request for `job_id`. Does not touch session state.
    pub async fn poll(&self, job_id: JobId) -> Result<ConversionJob, ConversionError> {
        self.shared
            .api
            .conversion_job(job_id)
            .await
            .map_err(ConversionError::Poll)
    }

    /// Re-lists this pack's conversions and picks the one for `target_version`.
    pub async fn reconcile(
        &self,
        target_version: &str,
    ) -> Result<Option<ResourcePackRecord>, ConversionError> {
        self.shared.reconcile(target_version).await
    }

    /// Stops the poll loop and discards every response still in flight.
    pub fn cancel(&self) {
        let mut guard = self.shared.lock();
        guard.generation += 1;
        if let Some(task) = guard.poll_task.take() {
            task.abort();
        }

        let was_busy = self.shared.state.borrow().phase.is_busy();
        if was_busy {
            self.shared.state.send_modify(|snapshot| {
                snapshot.phase = SessionPhase::Idle;
            });
            info!(pack_id = self.shared.pack_id.0, "conversion: session cancelled");
            self.shared.emit(ConversionEvent::Cancelled {
                pack_id: self.shared.pack_id,
            });
        }
    }

    /// Consumes a resolved outcome and returns the session to `Idle`.
    pub fn acknowledge(&self) -> Option<ConversionOutcome> {
        let guard = self.shared.lock();
        let outcome = self.shared.state.borrow().phase.outcome().cloned();
        if outcome.is_some() {
            self.shared
                .state
                .send_replace(ConversionSnapshot::idle(self.shared.pack_id));
        }
        drop(guard);
        outcome
    }

    /// Waits until no submission or poll loop is outstanding.
    pub async fn wait_until_settled(&self) -> ConversionSnapshot {
        let mut state = self.shared.state.subscribe();
        let settled = state
            .wait_for(|snapshot| !snapshot.phase.is_busy())
            .await
            .map(|snapshot| snapshot.clone());
        settled.unwrap_or_else(|_| self.snapshot())
    }
}

impl Drop for ConversionSessionController {
    fn drop(&mut self) {
        let mut guard = self.shared.lock();
        guard.generation += 1;
        if let Some(task) = guard.poll_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/conversion_session_tests.rs"]
mod tests;
