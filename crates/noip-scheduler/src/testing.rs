//! Test doubles shared by the unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{
    engine::{BoxError, UpdateCallable},
    error::Result,
    events::OutcomeSubscriber,
    types::ExecutionOutcome,
};

#[derive(Default)]
pub struct FakeUpdater {
    delay: Option<Duration>,
    /// 1-based call numbers that fail.
    fail_on: Vec<usize>,
    panics: bool,
    calls: Mutex<Vec<(String, String)>>,
    spans: Mutex<Vec<(Instant, Instant)>>,
}

impl FakeUpdater {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            fail_on: calls.to_vec(),
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn spans(&self) -> Vec<(Instant, Instant)> {
        self.spans.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpdateCallable for FakeUpdater {
    async fn update(&self, credential: &str, hostname: &str) -> std::result::Result<(), BoxError> {
        let start = Instant::now();
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((credential.to_string(), hostname.to_string()));
            calls.len()
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.spans.lock().unwrap().push((start, Instant::now()));
        if self.panics {
            panic!("update exploded");
        }
        if self.fail_on.contains(&n) {
            return Err("nohost".into());
        }
        Ok(())
    }
}

/// Subscriber that keeps every outcome it sees.
#[derive(Clone, Default)]
pub struct OutcomeLog(Arc<Mutex<Vec<ExecutionOutcome>>>);

impl OutcomeLog {
    pub fn outcomes(&self) -> Vec<ExecutionOutcome> {
        self.0.lock().unwrap().clone()
    }
}

impl OutcomeSubscriber for OutcomeLog {
    fn name(&self) -> &str {
        "outcome-log"
    }

    fn on_outcome(&self, outcome: &ExecutionOutcome) -> Result<()> {
        self.0.lock().unwrap().push(outcome.clone());
        Ok(())
    }
}
