use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::{
    clock::Clock,
    events::{panic_message, EventChannel},
    store::JobStore,
    trigger::IntervalTrigger,
    types::{ExecutionOutcome, Job, SchedulerState},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Longest single sleep; the loop re-reads the wall clock at least this often
/// so a suspended host or a clock step is noticed.
const MAX_SLEEP: std::time::Duration = std::time::Duration::from_secs(60);

/// Smallest accepted misfire grace. A timer never wakes exactly on time, so a
/// shorter window would treat every ordinary fire as missed.
pub const MIN_MISFIRE_GRACE: std::time::Duration = std::time::Duration::from_secs(1);

/// The network side effect the job exists to perform.
#[async_trait]
pub trait UpdateCallable: Send + Sync {
    async fn update(&self, credential: &str, hostname: &str) -> Result<(), BoxError>;
}

/// Cooperative timer loop for a single job.
///
/// The callable is awaited inline, so a second invocation cannot start while
/// one is outstanding. Shutdown is only observed while idle; an in-flight
/// invocation always runs to completion.
pub struct SchedulerCore {
    updater: Arc<dyn UpdateCallable>,
    clock: Arc<dyn Clock>,
    misfire_grace: chrono::Duration,
    state: SchedulerState,
    /// In-memory fire time not yet written to the store.
    unsaved: bool,
}

impl SchedulerCore {
    pub fn new(updater: Arc<dyn UpdateCallable>, clock: Arc<dyn Clock>) -> Self {
        Self {
            updater,
            clock,
            misfire_grace: chrono::Duration::seconds(1),
            state: SchedulerState::Idle,
            unsaved: false,
        }
    }

    /// Fires later than this past their time are skipped rather than run.
    ///
    /// Clamped to at least [`MIN_MISFIRE_GRACE`].
    pub fn with_misfire_grace(mut self, grace: std::time::Duration) -> Self {
        let grace = grace.max(MIN_MISFIRE_GRACE);
        self.misfire_grace = chrono::Duration::from_std(grace).unwrap_or(self.misfire_grace);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Main event loop. Runs until `shutdown` broadcasts `true` or its sender is dropped.
    pub async fn run(
        &mut self,
        job: &mut Job,
        store: &mut JobStore,
        events: &EventChannel,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(job_id = %job.id, interval_minutes = job.interval_minutes, "scheduler engine started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.persist(job, store);

            let now = self.clock.now();
            let due = match job.next_fire_time {
                Some(due) => due,
                None => {
                    let due = IntervalTrigger::new(job.interval_minutes).next_fire_time(None, now);
                    job.next_fire_time = Some(due);
                    self.unsaved = true;
                    self.persist(job, store);
                    due
                }
            };

            self.transition(SchedulerState::Idle);
            if due > now {
                let wait = (due - now).to_std().unwrap_or_default().min(MAX_SLEEP);
                debug!(next_fire = %due, wait_ms = wait.as_millis() as u64, "waiting");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => continue,
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            info!("shutdown channel closed");
                            break;
                        }
                        continue;
                    }
                }
            }

            self.fire(job, store, events).await;
        }

        self.transition(SchedulerState::Stopped);
        info!(job_id = %job.id, "scheduler engine stopped");
    }

    /// One pass through Firing → Invoking → Rescheduling for a due job.
    ///
    /// Returns the published outcome, or `None` when the fire was skipped as
    /// missed. Never fails: invocation errors become failed outcomes and
    /// persistence errors are retried on the next pass.
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn fire(
        &mut self,
        job: &mut Job,
        store: &mut JobStore,
        events: &EventChannel,
    ) -> Option<ExecutionOutcome> {
        let scheduled = job.next_fire_time?;
        let trigger = IntervalTrigger::new(job.interval_minutes);
        self.transition(SchedulerState::Firing);

        let now = self.clock.now();
        if now - scheduled > self.misfire_grace {
            let catch_up = trigger.catch_up(scheduled, now);
            warn!(
                scheduled = %scheduled,
                missed = catch_up.missed,
                next_fire = %catch_up.next,
                "run time was missed, skipping to the next fire time"
            );
            self.transition(SchedulerState::Rescheduling);
            self.reschedule(job, store, catch_up.next);
            return None;
        }

        self.transition(SchedulerState::Invoking);
        let outcome = self.invoke(job, scheduled).await;
        events.publish(&outcome);

        self.transition(SchedulerState::Rescheduling);
        self.reschedule(job, store, trigger.next_fire_time(Some(scheduled), now));
        Some(outcome)
    }

    async fn invoke(&self, job: &Job, scheduled: DateTime<Utc>) -> ExecutionOutcome {
        info!(scheduled = %scheduled, hostname = job.arguments.hostname(), "running update");
        let call = self
            .updater
            .update(job.arguments.credential(), job.arguments.hostname());
        let result = AssertUnwindSafe(call).catch_unwind().await;
        let finished = self.clock.now();

        match result {
            Ok(Ok(())) => ExecutionOutcome::succeeded(&job.id, scheduled, finished),
            Ok(Err(e)) => ExecutionOutcome::failed(&job.id, scheduled, finished, e.to_string()),
            Err(panic) => ExecutionOutcome::failed(
                &job.id,
                scheduled,
                finished,
                panic_message(panic.as_ref()),
            ),
        }
    }

    fn reschedule(&mut self, job: &mut Job, store: &mut JobStore, next: DateTime<Utc>) {
        job.next_fire_time = Some(next);
        self.unsaved = true;
        self.persist(job, store);
    }

    /// Write the in-memory job through to the store if it has unsaved changes.
    pub(crate) fn persist(&mut self, job: &Job, store: &mut JobStore) {
        if !self.unsaved {
            return;
        }
        match store.upsert(job, true) {
            Ok(_) => {
                self.unsaved = false;
                debug!(job_id = %job.id, next_fire = ?job.next_fire_time, "next fire time persisted");
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "could not persist next fire time, will retry");
            }
        }
    }

    pub(crate) fn stop(&mut self) {
        self.transition(SchedulerState::Stopped);
    }

    fn transition(&mut self, to: SchedulerState) {
        if self.state != to {
            debug!(from = %self.state, %to, "scheduler state");
            self.state = to;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use rusqlite::Connection;

    use super::*;
    use crate::clock::TokioClock;
    use crate::testing::{FakeUpdater, OutcomeLog};
    use crate::types::{JobSpec, UpdateArgs, UPDATE_JOB_ID};

    const MINUTE: Duration = Duration::from_secs(60);

    struct Harness {
        core: SchedulerCore,
        job: Job,
        store: JobStore,
        events: EventChannel,
        updater: Arc<FakeUpdater>,
        log: OutcomeLog,
        base: DateTime<Utc>,
    }

    fn harness(interval: u32, updater: FakeUpdater) -> Harness {
        let base = Utc::now();
        let clock = Arc::new(TokioClock::new(base));
        let updater = Arc::new(updater);
        let mut job = Job::new(JobSpec {
            id: UPDATE_JOB_ID.to_string(),
            interval_minutes: interval,
            arguments: UpdateArgs::new("Y3JlZA==", "home.ddns.net"),
        });
        job.next_fire_time = Some(base + chrono::Duration::minutes(interval as i64));

        let mut store = JobStore::new(Connection::open_in_memory().unwrap()).unwrap();
        store.upsert(&job, false).unwrap();

        let log = OutcomeLog::default();
        let mut events = EventChannel::new();
        events.subscribe(Box::new(log.clone()));

        Harness {
            core: SchedulerCore::new(updater.clone(), clock),
            job,
            store,
            events,
            updater,
            log,
            base,
        }
    }

    fn minutes(n: i64) -> chrono::Duration {
        chrono::Duration::minutes(n)
    }

    #[tokio::test(start_paused = true)]
    async fn zero_grace_still_runs_a_slightly_late_fire() {
        let mut h = harness(5, FakeUpdater::ok());
        h.core = SchedulerCore::new(h.updater.clone(), Arc::new(TokioClock::new(h.base)))
            .with_misfire_grace(Duration::ZERO);
        h.job.next_fire_time = Some(h.base);
        tokio::time::advance(Duration::from_millis(2)).await;

        let outcome = h.core.fire(&mut h.job, &mut h.store, &h.events).await;

        assert!(outcome.is_some_and(|o| o.success));
        assert_eq!(h.updater.calls().len(), 1);
        assert_eq!(h.job.next_fire_time, Some(h.base + minutes(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn fire_invokes_with_arguments_and_reschedules() {
        let mut h = harness(5, FakeUpdater::ok());
        tokio::time::advance(5 * MINUTE).await;

        let outcome = h
            .core
            .fire(&mut h.job, &mut h.store, &h.events)
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.scheduled_for, h.base + minutes(5));
        assert_eq!(
            h.updater.calls(),
            vec![("Y3JlZA==".to_string(), "home.ddns.net".to_string())]
        );
        assert_eq!(h.job.next_fire_time, Some(h.base + minutes(10)));
        let stored = h.store.load(UPDATE_JOB_ID).unwrap().unwrap();
        assert_eq!(
            stored.next_fire_time.map(|t| t.timestamp_micros()),
            Some((h.base + minutes(10)).timestamp_micros())
        );
        assert_eq!(h.core.state(), SchedulerState::Rescheduling);
        assert!(!h.core.has_unsaved_changes());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_captured_and_next_run_still_happens() {
        let mut h = harness(5, FakeUpdater::failing_on(&[1]));
        let (tx, rx) = watch::channel(false);

        let stop = async {
            tokio::time::sleep(11 * MINUTE).await;
            tx.send(true).unwrap();
        };
        tokio::join!(h.core.run(&mut h.job, &mut h.store, &h.events, rx), stop);

        let outcomes = h.log.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].success);
        assert!(outcomes[0].failure_cause.as_deref().unwrap().contains("nohost"));
        assert!(outcomes[1].success);
        assert_eq!(outcomes[1].scheduled_for, h.base + minutes(10));
        assert_eq!(h.job.next_fire_time, Some(h.base + minutes(15)));
        assert_eq!(h.core.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_update_becomes_failed_outcome() {
        let mut h = harness(5, FakeUpdater::panicking());
        tokio::time::advance(5 * MINUTE).await;

        let outcome = h
            .core
            .fire(&mut h.job, &mut h.store, &h.events)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.failure_cause.unwrap().contains("panicked"));
        assert_eq!(h.job.next_fire_time, Some(h.base + minutes(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn invocations_never_overlap() {
        // Each update takes 90 s against a 1 minute interval.
        let mut h = harness(1, FakeUpdater::ok().with_delay(Duration::from_secs(90)));
        let (tx, rx) = watch::channel(false);

        let stop = async {
            tokio::time::sleep(20 * MINUTE).await;
            tx.send(true).unwrap();
        };
        tokio::join!(h.core.run(&mut h.job, &mut h.store, &h.events, rx), stop);

        let spans = h.updater.spans();
        assert!(spans.len() >= 5);
        for pair in spans.windows(2) {
            assert!(pair[1].0 >= pair[0].1, "invocations overlapped: {pair:?}");
        }
        assert_eq!(h.log.outcomes().len(), spans.len());
    }

    #[tokio::test(start_paused = true)]
    async fn missed_fire_is_skipped_along_the_grid() {
        let mut h = harness(5, FakeUpdater::ok());
        h.job.next_fire_time = Some(h.base - minutes(12));

        let outcome = h.core.fire(&mut h.job, &mut h.store, &h.events).await;

        assert!(outcome.is_none());
        assert!(h.updater.calls().is_empty());
        assert!(h.log.outcomes().is_empty());
        assert_eq!(h.job.next_fire_time, Some(h.base + minutes(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_idle_stops_without_firing() {
        let mut h = harness(5, FakeUpdater::ok());
        let (tx, rx) = watch::channel(false);

        let stop = async {
            tokio::time::sleep(MINUTE).await;
            tx.send(true).unwrap();
        };
        tokio::join!(h.core.run(&mut h.job, &mut h.store, &h.events, rx), stop);

        assert!(h.updater.calls().is_empty());
        assert_eq!(h.core.state(), SchedulerState::Stopped);
        assert_eq!(h.job.next_fire_time, Some(h.base + minutes(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_in_flight_update() {
        let mut h = harness(5, FakeUpdater::ok().with_delay(MINUTE));
        let (tx, rx) = watch::channel(false);

        // Arrives 10 s into the 60 s update.
        let stop = async {
            tokio::time::sleep(5 * MINUTE + Duration::from_secs(10)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(h.core.run(&mut h.job, &mut h.store, &h.events, rx), stop);

        assert_eq!(h.updater.spans().len(), 1);
        assert_eq!(h.log.outcomes().len(), 1);
        assert!(h.log.outcomes()[0].success);
        assert_eq!(h.job.next_fire_time, Some(h.base + minutes(10)));
        assert_eq!(h.core.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_persist_is_retried() {
        let mut h = harness(5, FakeUpdater::ok());
        tokio::time::advance(5 * MINUTE).await;
        h.store
            .conn()
            .execute_batch("ALTER TABLE jobs RENAME TO jobs_offline")
            .unwrap();

        h.core.fire(&mut h.job, &mut h.store, &h.events).await.unwrap();
        assert!(h.core.has_unsaved_changes());
        assert_eq!(h.job.next_fire_time, Some(h.base + minutes(10)));

        h.store
            .conn()
            .execute_batch("ALTER TABLE jobs_offline RENAME TO jobs")
            .unwrap();
        h.core.persist(&h.job, &mut h.store);

        assert!(!h.core.has_unsaved_changes());
        let stored = h.store.load(UPDATE_JOB_ID).unwrap().unwrap();
        assert_eq!(
            stored.next_fire_time.map(|t| t.timestamp_micros()),
            Some((h.base + minutes(10)).timestamp_micros())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_shutdown_sender_stops_loop() {
        let mut h = harness(5, FakeUpdater::ok());
        let (tx, rx) = watch::channel(false);
        drop(tx);

        h.core.run(&mut h.job, &mut h.store, &h.events, rx).await;

        assert_eq!(h.core.state(), SchedulerState::Stopped);
        assert!(h.updater.calls().is_empty());
    }
}
