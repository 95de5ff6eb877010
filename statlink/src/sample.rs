//! Sample statistics for the demo agent

use serde_json::{json, Value};
use statlink_core::{ErrorType, Result, StatsSource};
use std::time::Instant;

/// Every `ALERT_EVERY`th sample is an alert instead of a stats object.
const ALERT_EVERY: u64 = 3;

/// Produces request counters, interleaved with alerts of alternating severity.
pub struct SampleStats {
    started: Instant,
    samples: u64,
    alerts: u64,
}

impl SampleStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            samples: 0,
            alerts: 0,
        }
    }

    fn next_sample(&mut self) -> Value {
        self.samples += 1;

        if self.samples % ALERT_EVERY == 0 {
            self.alerts += 1;
            let kind = if self.alerts % 2 == 1 {
                ErrorType::Warning
            } else {
                ErrorType::Error
            };
            return json!({
                "error": format!("sample alert #{}", self.alerts),
                "type": kind,
            });
        }

        json!({
            "requestsCount": self.samples * 10,
            "loginsCount": self.samples * 5,
            "uptimeSecs": self.started.elapsed().as_secs(),
        })
    }
}

impl Default for SampleStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSource for SampleStats {
    fn collect(&mut self) -> Result<Option<Value>> {
        Ok(Some(self.next_sample()))
    }
}
