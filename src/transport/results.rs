//! One-shot result slots for commands that expect a reply.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::core::{CommandId, ResultValue, SessionError, SessionResult};
use crate::metrics;

use super::waiter::{FailoverFlag, Waiter};

#[derive(Debug)]
enum SlotState {
    Pending,
    Ready(ResultValue),
    Broken(SessionError),
}

#[derive(Debug)]
pub struct ResultSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl ResultSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().expect("result slot lock poisoned")
    }

    /// First settlement wins; later ones are ignored.
    fn settle(&self, outcome: SlotState) -> bool {
        let mut state = self.lock_state();
        if !matches!(*state, SlotState::Pending) {
            return false;
        }
        *state = outcome;
        self.ready.notify_all();
        true
    }

    fn wake(&self) {
        let _state = self.lock_state();
        self.ready.notify_all();
    }
}

/// Handle on the reply to one outgoing command.
#[derive(Debug, Clone)]
pub struct ResultFuture {
    id: CommandId,
    slot: Arc<ResultSlot>,
    failover: Arc<FailoverFlag>,
    timeout: Duration,
}

impl ResultFuture {
    pub(crate) fn new(
        id: CommandId,
        slot: Arc<ResultSlot>,
        failover: Arc<FailoverFlag>,
        timeout: Duration,
    ) -> Self {
        Self {
            id,
            slot,
            failover,
            timeout,
        }
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn is_done(&self) -> bool {
        matches!(*self.slot.lock_state(), SlotState::Ready(_))
    }

    pub fn get(&self) -> SessionResult<ResultValue> {
        self.get_timeout(self.timeout)
    }

    pub fn get_timeout(&self, timeout: Duration) -> SessionResult<ResultValue> {
        let waiter = Waiter::new("result", timeout, &self.failover);
        let mut state = self.slot.lock_state();
        while waiter.has_time() && matches!(*state, SlotState::Pending) {
            state = waiter.wait(&self.slot.ready, state)?;
        }
        match &*state {
            SlotState::Ready(value) => Ok(value.clone()),
            SlotState::Broken(err) => Err(err.clone()),
            SlotState::Pending => Err(waiter.timed_out()),
        }
    }
}

/// Pending result slots keyed by outgoing id.
#[derive(Debug, Default)]
pub struct ResultRegistry {
    slots: Mutex<HashMap<CommandId, Arc<ResultSlot>>>,
}

impl ResultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CommandId, Arc<ResultSlot>>> {
        self.slots.lock().expect("results lock poisoned")
    }

    pub fn register(&self, registrations: impl IntoIterator<Item = (CommandId, Arc<ResultSlot>)>) {
        let mut slots = self.lock();
        for (id, slot) in registrations {
            slots.insert(id, slot);
        }
    }

    /// Resolves the slot for `id`; unknown ids are logged and dropped.
    pub fn resolve(&self, id: CommandId, value: ResultValue) -> bool {
        let slot = self.lock().remove(&id);
        match slot {
            Some(slot) => slot.settle(SlotState::Ready(value)),
            None => {
                tracing::warn!(
                    command_id = %id,
                    struct_code = value.struct_code,
                    "result for a command that is no longer awaited"
                );
                metrics::results_dropped(1);
                false
            }
        }
    }

    /// Breaks every pending slot with `err`.
    pub fn break_all(&self, err: &SessionError) -> usize {
        let slots: Vec<_> = self.lock().drain().map(|(_, slot)| slot).collect();
        let broken = slots.len();
        for slot in slots {
            slot.settle(SlotState::Broken(err.clone()));
        }
        broken
    }

    /// Wakes every waiter so it can observe the failover flag.
    pub fn wake_all(&self) {
        let slots: Vec<_> = self.lock().values().cloned().collect();
        for slot in slots {
            slot.wake();
        }
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }
}
