//! Per-session limits and timeouts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Durations are stored in milliseconds so the TOML form stays flat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// Maximum outstanding (dispatched, not yet completed) commands.
    pub command_limit: u32,
    /// Maximum buffered body bytes awaiting completion.
    pub byte_limit: usize,

    pub sync_operation_timeout_ms: u64,
    pub flow_control_wait_failure_timeout_ms: u64,
    pub flow_control_wait_notify_period_ms: u64,

    pub auto_sync: bool,
    /// Never buffer commands for replay.
    pub no_replay: bool,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            command_limit: 64 * 1024,
            byte_limit: 1024 * 1024,

            sync_operation_timeout_ms: 60_000,
            flow_control_wait_failure_timeout_ms: 60_000,
            flow_control_wait_notify_period_ms: 5_000,

            auto_sync: false,
            no_replay: false,
        }
    }
}

impl SessionLimits {
    pub fn sync_operation_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_operation_timeout_ms)
    }

    pub fn flow_control_wait_failure_timeout(&self) -> Duration {
        Duration::from_millis(self.flow_control_wait_failure_timeout_ms)
    }

    pub fn flow_control_wait_notify_period(&self) -> Duration {
        Duration::from_millis(self.flow_control_wait_notify_period_ms)
    }

    pub fn with_command_limit(mut self, command_limit: u32) -> Self {
        self.command_limit = command_limit.max(1);
        self
    }

    pub fn with_byte_limit(mut self, byte_limit: usize) -> Self {
        self.byte_limit = byte_limit;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_operation_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_flow_wait(mut self, failure: Duration, notify_period: Duration) -> Self {
        self.flow_control_wait_failure_timeout_ms = duration_ms(failure);
        self.flow_control_wait_notify_period_ms = duration_ms(notify_period);
        self
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
