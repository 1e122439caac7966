//! Deadline-bounded, failover-cancellable condition waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::core::{SessionError, SessionResult};

/// Raised when the transport fails over; every blocked operation on the
/// session observes it on its next wake.
#[derive(Debug, Default)]
pub struct FailoverFlag(AtomicBool);

impl FailoverFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One bounded wait. Callers loop on their own predicate:
///
/// ```ignore
/// let waiter = Waiter::new("sync", timeout, &failover);
/// while waiter.has_time() && !done(&guard) {
///     guard = waiter.wait(&condvar, guard)?;
/// }
/// ```
#[derive(Debug)]
pub struct Waiter<'a> {
    operation: &'static str,
    started: Instant,
    timeout: Duration,
    failover: &'a FailoverFlag,
}

impl<'a> Waiter<'a> {
    pub fn new(operation: &'static str, timeout: Duration, failover: &'a FailoverFlag) -> Self {
        Self {
            operation,
            started: Instant::now(),
            timeout,
            failover,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.started.elapsed())
    }

    pub fn has_time(&self) -> bool {
        !self.remaining().is_zero()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fails with `Cancelled` if failover was requested, otherwise parks on
    /// `condvar` for at most the remaining time.
    pub fn wait<'g, T>(
        &self,
        condvar: &Condvar,
        guard: MutexGuard<'g, T>,
    ) -> SessionResult<MutexGuard<'g, T>> {
        self.check_failover()?;
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Ok(guard);
        }
        let (guard, _) = condvar
            .wait_timeout(guard, remaining)
            .unwrap_or_else(PoisonError::into_inner);
        Ok(guard)
    }

    pub fn check_failover(&self) -> SessionResult<()> {
        if self.failover.is_raised() {
            return Err(SessionError::Cancelled {
                operation: self.operation,
            });
        }
        Ok(())
    }

    pub fn timed_out(&self) -> SessionError {
        SessionError::Timeout {
            operation: self.operation,
            waited: self.elapsed(),
        }
    }
}
