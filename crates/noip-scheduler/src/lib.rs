//! `noip-scheduler`: restart-safe periodic scheduler with SQLite persistence.
//!
//! # Overview
//!
//! A single job is persisted to a SQLite `jobs` table by the
//! [`store::JobStore`]. The [`engine::SchedulerCore`] sleeps until the job's
//! `next_fire_time`, awaits the update callable inline, publishes an
//! [`ExecutionOutcome`] on the [`events::EventChannel`] and writes the next
//! fire time back. The [`lifecycle::LifecycleManager`] owns all three and
//! orders startup and shutdown.
//!
//! | Concern        | Behaviour                                                  |
//! |----------------|------------------------------------------------------------|
//! | Registration   | Stored job wins unless `replace_existing` is set           |
//! | Cadence        | `last_fire + interval`; first fire one interval after now  |
//! | Missed fires   | Skipped beyond the grace window, realigned to the interval |
//! | Failures       | Captured as failed outcomes; the loop keeps going          |
//! | Concurrency    | At most one in-flight invocation                           |

pub mod clock;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod store;
pub mod trigger;
pub mod types;

#[cfg(test)]
mod testing;

pub use clock::{Clock, SystemClock, TokioClock};
pub use engine::{BoxError, SchedulerCore, UpdateCallable, MIN_MISFIRE_GRACE};
pub use error::{Result, SchedulerError};
pub use events::{EventChannel, LogSubscriber, OutcomeSubscriber};
pub use lifecycle::LifecycleManager;
pub use store::{JobStore, UpsertOutcome};
pub use trigger::IntervalTrigger;
pub use types::{ExecutionOutcome, Job, JobSpec, SchedulerState, UpdateArgs, UPDATE_JOB_ID};
