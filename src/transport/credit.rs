//! Producer flow-control gate.
//!
//! The peer grants message and byte credit; a payload-bearing command is only
//! transmitted once both counters can absorb it. Admission itself never
//! blocks. [`CreditManager::acquire`] is the blocking form used by the
//! session when the peer has switched flow control on.

use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::core::{CreditUnit, SessionError, SessionLimits, SessionResult, UNLIMITED_CREDIT};
use crate::metrics;

use super::waiter::FailoverFlag;

/// Floor on each flow-control wait, so a zero notify period cannot spin.
const MIN_WAIT_SLICE: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Credit {
    Finite(u64),
    Unlimited,
}

impl Credit {
    /// Maps a peer grant; the all-ones value means unlimited.
    pub fn from_grant(value: u32) -> Self {
        if value == UNLIMITED_CREDIT {
            Credit::Unlimited
        } else {
            Credit::Finite(u64::from(value))
        }
    }

    pub fn is_exhausted(self) -> bool {
        self == Credit::Finite(0)
    }

    fn add(self, amount: u64) -> Self {
        match self {
            Credit::Finite(current) => Credit::Finite(current.saturating_add(amount)),
            Credit::Unlimited => Credit::Unlimited,
        }
    }
}

impl fmt::Display for Credit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credit::Finite(value) => write!(f, "{value}"),
            Credit::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Reports whether the underlying transport currently refuses writes.
pub type WriteCheck = Box<dyn Fn() -> bool + Send + Sync>;

#[derive(Debug)]
struct CreditState {
    messages: Credit,
    bytes: Credit,
    /// Set when an admission was refused; cleared once credit returns.
    suspended: bool,
    flow_control: bool,
}

pub struct CreditManager {
    state: Mutex<CreditState>,
    available: Condvar,
    write_blocked: WriteCheck,
    failure_timeout: Duration,
    notify_period: Duration,
}

impl fmt::Debug for CreditManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreditManager")
            .field("state", &self.state)
            .field("failure_timeout", &self.failure_timeout)
            .field("notify_period", &self.notify_period)
            .finish_non_exhaustive()
    }
}

impl CreditManager {
    /// Starts with unlimited credit and flow control off.
    pub fn new(limits: &SessionLimits) -> Self {
        Self::with_write_check(limits, Box::new(|| false))
    }

    pub fn with_write_check(limits: &SessionLimits, write_blocked: WriteCheck) -> Self {
        Self {
            state: Mutex::new(CreditState {
                messages: Credit::Unlimited,
                bytes: Credit::Unlimited,
                suspended: false,
                flow_control: false,
            }),
            available: Condvar::new(),
            write_blocked,
            failure_timeout: limits.flow_control_wait_failure_timeout(),
            notify_period: limits.flow_control_wait_notify_period(),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CreditState> {
        self.state.lock().expect("credit lock poisoned")
    }

    pub fn add_credit(&self, messages: u64, bytes: u64) {
        let mut state = self.lock_state();
        state.messages = state.messages.add(messages);
        state.bytes = state.bytes.add(bytes);
        self.refresh(&mut state);
    }

    /// Returns credit consumed by a command that was admitted but not sent.
    pub fn restore_credit(&self, messages: u64, bytes: u64) {
        self.add_credit(messages, bytes);
    }

    /// Replaces both counters, as when the peer grants an absolute window.
    pub fn set_credit(&self, messages: Credit, bytes: Credit) {
        let mut state = self.lock_state();
        state.messages = messages;
        state.bytes = bytes;
        self.refresh(&mut state);
    }

    /// Applies a single-unit grant from the peer.
    pub fn grant(&self, unit: CreditUnit, value: u32) {
        let mut state = self.lock_state();
        let grant = Credit::from_grant(value);
        let target = match unit {
            CreditUnit::Message => &mut state.messages,
            CreditUnit::Byte => &mut state.bytes,
        };
        *target = match grant {
            Credit::Unlimited => Credit::Unlimited,
            Credit::Finite(amount) => target.add(amount),
        };
        self.refresh(&mut state);
    }

    pub fn clear_credit(&self) {
        let mut state = self.lock_state();
        state.messages = Credit::Finite(0);
        state.bytes = Credit::Finite(0);
        state.suspended = true;
    }

    /// Turning flow control on zeroes credit until the peer grants some.
    pub fn set_flow_control(&self, enabled: bool) {
        let mut state = self.lock_state();
        state.flow_control = enabled;
        if enabled {
            state.messages = Credit::Finite(0);
            state.bytes = Credit::Finite(0);
            state.suspended = true;
        } else {
            state.messages = Credit::Unlimited;
            state.bytes = Credit::Unlimited;
            state.suspended = false;
            self.available.notify_all();
        }
    }

    pub fn is_flow_control(&self) -> bool {
        self.lock_state().flow_control
    }

    pub fn credit(&self) -> (Credit, Credit) {
        let state = self.lock_state();
        (state.messages, state.bytes)
    }

    pub fn has_credit(&self) -> bool {
        let state = self.lock_state();
        self.has_credit_locked(&state)
    }

    pub fn is_suspended(&self) -> bool {
        self.lock_state().suspended
    }

    pub fn is_flow_blocked(&self) -> bool {
        let state = self.lock_state();
        state.flow_control && !self.has_credit_locked(&state)
    }

    /// Consumes credit for one message of `size` body bytes if available.
    pub fn try_admit(&self, size: usize) -> bool {
        let mut state = self.lock_state();
        self.try_admit_locked(&mut state, size as u64)
    }

    /// Blocks until `size` bytes are admitted when flow control is on.
    pub fn acquire(&self, size: usize, failover: &FailoverFlag) -> SessionResult<()> {
        let mut state = self.lock_state();
        if !state.flow_control {
            return Ok(());
        }
        let started = Instant::now();
        let slice = self
            .notify_period
            .min(self.failure_timeout)
            .max(MIN_WAIT_SLICE);
        loop {
            if self.try_admit_locked(&mut state, size as u64) {
                let waited = started.elapsed();
                if !waited.is_zero() {
                    metrics::credit_wait(waited);
                }
                return Ok(());
            }
            if failover.is_raised() {
                return Err(SessionError::Cancelled {
                    operation: "credit acquire",
                });
            }
            let waited = started.elapsed();
            if waited >= self.failure_timeout {
                tracing::error!(
                    waited_ms = waited.as_millis() as u64,
                    "message send failed waiting on peer flow control"
                );
                return Err(SessionError::Timeout {
                    operation: "credit acquire",
                    waited,
                });
            }
            let budget = slice.min(self.failure_timeout - waited);
            let (next, result) = self
                .available
                .wait_timeout(state, budget)
                .expect("credit lock poisoned");
            state = next;
            if result.timed_out() {
                tracing::warn!(
                    delayed_s = started.elapsed().as_secs(),
                    "message send delayed by peer flow control"
                );
            }
        }
    }

    /// Wakes blocked acquirers so they observe failover or transport state.
    pub fn wake_all(&self) {
        let _state = self.lock_state();
        self.available.notify_all();
    }

    fn has_credit_locked(&self, state: &CreditState) -> bool {
        !state.messages.is_exhausted() && !state.bytes.is_exhausted() && !(self.write_blocked)()
    }

    fn refresh(&self, state: &mut CreditState) {
        let has_credit = self.has_credit_locked(state);
        state.suspended = !has_credit;
        if has_credit {
            self.available.notify_all();
        }
    }

    fn try_admit_locked(&self, state: &mut CreditState, size: u64) -> bool {
        if (self.write_blocked)() {
            state.suspended = true;
            return false;
        }
        let admitted = match (state.messages, state.bytes) {
            (Credit::Unlimited, Credit::Unlimited) => true,
            (Credit::Unlimited, Credit::Finite(bytes)) => {
                if size <= bytes {
                    state.bytes = Credit::Finite(bytes - size);
                    true
                } else {
                    false
                }
            }
            (Credit::Finite(0), _) => false,
            (Credit::Finite(messages), Credit::Unlimited) => {
                state.messages = Credit::Finite(messages - 1);
                true
            }
            (Credit::Finite(messages), Credit::Finite(bytes)) => {
                if size <= bytes {
                    state.messages = Credit::Finite(messages - 1);
                    state.bytes = Credit::Finite(bytes - size);
                    true
                } else {
                    false
                }
            }
        };
        if !admitted {
            state.suspended = true;
        }
        admitted
    }
}
