//! Outcome fan-out: every [`ExecutionOutcome`] is handed to each subscriber in
//! registration order. A subscriber that errors or panics is logged and
//! skipped; the others still see the outcome and the engine never notices.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    types::ExecutionOutcome,
};

/// Receives the outcome of every invocation.
pub trait OutcomeSubscriber: Send + Sync {
    fn name(&self) -> &str;

    fn on_outcome(&self, outcome: &ExecutionOutcome) -> Result<()>;
}

#[derive(Default)]
pub struct EventChannel {
    subscribers: Vec<Box<dyn OutcomeSubscriber>>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn OutcomeSubscriber>) {
        info!(subscriber = subscriber.name(), "outcome subscriber registered");
        self.subscribers.push(subscriber);
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver `outcome` to every subscriber. Returns the failures, already logged.
    pub fn publish(&self, outcome: &ExecutionOutcome) -> Vec<SchedulerError> {
        let mut failures = Vec::new();
        for sub in &self.subscribers {
            let result = catch_unwind(AssertUnwindSafe(|| sub.on_outcome(outcome)));
            let err = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => SchedulerError::Subscriber {
                    name: sub.name().to_string(),
                    reason: e.to_string(),
                },
                Err(panic) => SchedulerError::Subscriber {
                    name: sub.name().to_string(),
                    reason: panic_message(panic.as_ref()),
                },
            };
            warn!(run_id = %outcome.run_id, "{err}");
            failures.push(err);
        }
        failures
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Writes each outcome to the log stream.
pub struct LogSubscriber;

impl OutcomeSubscriber for LogSubscriber {
    fn name(&self) -> &str {
        "log"
    }

    fn on_outcome(&self, outcome: &ExecutionOutcome) -> Result<()> {
        if outcome.success {
            info!(
                job_id = %outcome.job_id,
                run_id = %outcome.run_id,
                "No-IP host updated"
            );
        } else {
            error!(
                job_id = %outcome.job_id,
                run_id = %outcome.run_id,
                cause = outcome.failure_cause.as_deref().unwrap_or("unknown"),
                "update task did not work as expected"
            );
        }
        Ok(())
    }
}
