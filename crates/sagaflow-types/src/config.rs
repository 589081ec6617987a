//! Saga configuration types.
//!
//! `SagaOptions` controls compensation behaviour, the three timeout scopes,
//! inter-step delay and state persistence. Every field has a default so an
//! empty TOML document yields the defaults. Durations are written as integer
//! milliseconds under `*_ms` keys.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options recognised by the saga orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaOptions {
    /// Whether a step failure triggers the rollback phase at all.
    #[serde(default = "default_true")]
    pub auto_compensate_on_failure: bool,

    /// Bound on the whole saga (forward pass and rollback).
    #[serde(
        default,
        rename = "saga_timeout_ms",
        with = "duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub saga_timeout: Option<Duration>,

    /// Bound on each forward step, including its retries.
    #[serde(
        default,
        rename = "step_timeout_ms",
        with = "duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub step_timeout: Option<Duration>,

    /// Bound on each individual compensation call.
    #[serde(
        default,
        rename = "compensation_timeout_ms",
        with = "duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub compensation_timeout: Option<Duration>,

    /// Keep unwinding the stack after a compensation fails.
    #[serde(default = "default_true")]
    pub continue_compensation_on_error: bool,

    /// Gates every call into the state store.
    #[serde(default)]
    pub enable_state_persistence: bool,

    /// Pause inserted between successful steps (never before the first or
    /// after the last).
    #[serde(
        default,
        rename = "step_delay_ms",
        with = "duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub step_delay: Option<Duration>,
}

fn default_true() -> bool {
    true
}

impl Default for SagaOptions {
    fn default() -> Self {
        Self {
            auto_compensate_on_failure: true,
            saga_timeout: None,
            step_timeout: None,
            compensation_timeout: None,
            continue_compensation_on_error: true,
            enable_state_persistence: false,
            step_delay: None,
        }
    }
}

impl SagaOptions {
    pub fn with_auto_compensate(mut self, enabled: bool) -> Self {
        self.auto_compensate_on_failure = enabled;
        self
    }

    pub fn with_saga_timeout(mut self, timeout: Duration) -> Self {
        self.saga_timeout = Some(timeout);
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    pub fn with_compensation_timeout(mut self, timeout: Duration) -> Self {
        self.compensation_timeout = Some(timeout);
        self
    }

    pub fn with_continue_compensation_on_error(mut self, enabled: bool) -> Self {
        self.continue_compensation_on_error = enabled;
        self
    }

    pub fn with_state_persistence(mut self, enabled: bool) -> Self {
        self.enable_state_persistence = enabled;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }
}

/// Serde adapter for `Option<Duration>` stored as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
