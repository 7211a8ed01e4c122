//! Startup and shutdown ordering around the engine loop.
//!
//! A [`LifecycleManager`] owns the store, the event channel and the engine.
//! Construct it with [`LifecycleManager::start`], drive it with
//! [`LifecycleManager::run`], and let [`LifecycleManager::shutdown`] (or
//! `Drop`, on any other exit path) stop and flush everything exactly once.

use std::any::Any;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    engine::SchedulerCore,
    error::Result,
    events::{EventChannel, LogSubscriber, OutcomeSubscriber},
    store::{JobStore, UpsertOutcome},
    trigger::IntervalTrigger,
    types::{Job, JobSpec, SchedulerState},
};

pub struct LifecycleManager {
    store: JobStore,
    events: EventChannel,
    core: SchedulerCore,
    job: Job,
    /// Released last during shutdown, in registration order.
    resources: Vec<Box<dyn Any + Send>>,
    shut_down: bool,
}

impl LifecycleManager {
    /// Load the job registered under `spec.id`, or register a new one.
    ///
    /// With `replace_existing = false` a stored job wins over `spec`, so a
    /// restart keeps its persisted fire time. With `true` the stored job is
    /// overwritten and rescheduled one interval from now.
    pub fn start(
        spec: JobSpec,
        mut store: JobStore,
        core: SchedulerCore,
        replace_existing: bool,
    ) -> Result<Self> {
        let job = match store.load(&spec.id)? {
            Some(existing) if !replace_existing => {
                if existing.differs_from(&spec) {
                    warn!(
                        job_id = %existing.id,
                        stored_interval = existing.interval_minutes,
                        configured_interval = spec.interval_minutes,
                        "configuration differs from the registered job; keeping it (run with --replace to re-register)"
                    );
                }
                let outcome = store.upsert(&existing, false)?;
                debug_assert_eq!(outcome, UpsertOutcome::Kept);
                info!(
                    job_id = %existing.id,
                    next_fire = ?existing.next_fire_time,
                    "reusing registered job"
                );
                existing
            }
            _ => {
                let now = core.clock().now();
                let mut job = Job::new(spec);
                job.next_fire_time =
                    Some(IntervalTrigger::new(job.interval_minutes).next_fire_time(None, now));
                let outcome = store.upsert(&job, replace_existing)?;
                info!(
                    job_id = %job.id,
                    ?outcome,
                    next_fire = ?job.next_fire_time,
                    "registered job"
                );
                job
            }
        };

        let mut events = EventChannel::new();
        events.subscribe(Box::new(LogSubscriber));

        Ok(Self {
            store,
            events,
            core,
            job,
            resources: Vec::new(),
            shut_down: false,
        })
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn state(&self) -> SchedulerState {
        self.core.state()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Add another outcome observer next to the logging one.
    pub fn subscribe(&mut self, subscriber: Box<dyn OutcomeSubscriber>) {
        self.events.subscribe(subscriber);
    }

    /// Keep `resource` alive until shutdown, then drop it after the store is flushed.
    pub fn release_on_shutdown<R: Send + 'static>(&mut self, resource: R) {
        self.resources.push(Box::new(resource));
    }

    /// Run the engine until `shutdown` broadcasts `true`.
    ///
    /// Occupies the caller for the life of the agent.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) {
        if self.shut_down {
            warn!("run called after shutdown; ignoring");
            return;
        }
        info!("starting scheduler");
        self.core
            .run(&mut self.job, &mut self.store, &self.events, shutdown)
            .await;
    }

    /// Stop the engine, flush the store and release held resources.
    ///
    /// Returns `Ok(true)` when this call did the work and `Ok(false)` when the
    /// manager was already shut down.
    pub fn shutdown(&mut self) -> Result<bool> {
        if self.shut_down {
            debug!("shutdown already done");
            return Ok(false);
        }
        self.shut_down = true;
        info!(job_id = %self.job.id, "quitting scheduler");

        self.core.stop();
        self.core.persist(&self.job, &mut self.store);
        let flushed = self.store.flush();
        match &flushed {
            Ok(()) => info!("job store flushed"),
            Err(e) => error!(error = %e, "job store flush failed"),
        }

        for resource in self.resources.drain(..) {
            drop(resource);
        }
        flushed.map(|()| true)
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "shutdown on drop failed");
        }
    }
}
