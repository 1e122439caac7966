//! Session state machine.
//!
//! A session numbers outgoing commands, keeps replayable ones until the peer
//! completes them, tracks which inbound commands the application has
//! processed, and replays after the transport is re-established.
//!
//! Shared state is split across three locks: `outgoing` (state, outbox,
//! counters), `incoming` (inbound numbering and the processed set) and the
//! result registry. They are never held together. Result slots created
//! while dispatching are parked in `Outgoing::registrations` and moved into
//! the registry by whichever thread next needs them, after it has released
//! the outgoing lock. Listener and completion callbacks run with no lock
//! held.

use std::fmt;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::core::{
    ChannelId, Command, CommandId, CommandKind, Control, DetachCode, ExecutionException, Method,
    Range, RangeSet, ResultValue, SenderError, SessionError, SessionLimits, SessionName,
    SessionResult, serial,
};
use crate::metrics;

use super::credit::{Credit, CreditManager};
use super::listener::{LoggingListener, SessionListener};
use super::outbox::Outbox;
use super::results::{ResultFuture, ResultRegistry, ResultSlot};
use super::sender::ChannelSender;
use super::waiter::{FailoverFlag, Waiter};

/// Outgoing ids at which a completion flush is requested so the peer's
/// view never spans an ambiguous wraparound window.
const FLUSH_INTERVAL: u32 = 65_536;
/// Every this many inbound commands, processed ranges are pushed unasked.
const IDENTIFY_FLUSH_MASK: u32 = 0xff;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    New,
    Detached,
    Resuming,
    Open,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::New => "new",
            SessionState::Detached => "detached",
            SessionState::Resuming => "resuming",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }

    fn admits_dispatch(self) -> bool {
        matches!(
            self,
            SessionState::Open | SessionState::Closing | SessionState::Closed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Removes a closed session from whatever owns it.
pub type Deregister = Box<dyn Fn(ChannelId) + Send + Sync>;

type Registrations = Vec<(CommandId, Arc<ResultSlot>)>;

#[derive(Debug)]
struct Outgoing {
    state: SessionState,
    outbox: Outbox,
    commands_out: CommandId,
    need_sync: bool,
    closing: bool,
    transacted: bool,
    auto_sync: bool,
    resumer: Option<ThreadId>,
    detach_code: Option<DetachCode>,
    exception: Option<ExecutionException>,
    registrations: Registrations,
}

impl Outgoing {
    fn closed_error(&self) -> SessionError {
        match &self.exception {
            Some(exception) => SessionError::PeerExecution(exception.clone()),
            None => SessionError::Closed,
        }
    }

    fn is_resumer(&self) -> bool {
        self.resumer == Some(thread::current().id())
    }
}

#[derive(Debug)]
struct Incoming {
    initialised: bool,
    commands_in: CommandId,
    processed: RangeSet,
    max_processed: CommandId,
    sync_point: CommandId,
}

pub struct Session {
    name: SessionName,
    sender: ChannelSender,
    limits: SessionLimits,
    outgoing: Mutex<Outgoing>,
    outgoing_changed: Condvar,
    incoming: Mutex<Incoming>,
    results: ResultRegistry,
    credit: CreditManager,
    failover: Arc<FailoverFlag>,
    listener: RwLock<Arc<dyn SessionListener>>,
    deregister: Mutex<Option<Deregister>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("channel", &self.sender.channel())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ssn:{}", self.name)
    }
}

impl Session {
    pub fn new(name: SessionName, sender: ChannelSender, limits: SessionLimits) -> Self {
        let blocked_check = sender.clone();
        let credit = CreditManager::with_write_check(
            &limits,
            Box::new(move || blocked_check.is_blocked_for_writing()),
        );
        Self {
            name,
            outgoing: Mutex::new(Outgoing {
                state: SessionState::New,
                outbox: Outbox::new(&limits),
                commands_out: CommandId::ZERO,
                need_sync: false,
                closing: false,
                transacted: false,
                auto_sync: limits.auto_sync,
                resumer: None,
                detach_code: None,
                exception: None,
                registrations: Vec::new(),
            }),
            outgoing_changed: Condvar::new(),
            incoming: Mutex::new(Incoming {
                initialised: false,
                commands_in: CommandId::ZERO,
                processed: RangeSet::new(),
                max_processed: CommandId::ZERO.prev(),
                sync_point: CommandId::ZERO.prev(),
            }),
            results: ResultRegistry::new(),
            credit,
            failover: Arc::new(FailoverFlag::new()),
            listener: RwLock::new(Arc::new(LoggingListener)),
            deregister: Mutex::new(None),
            sender,
            limits,
        }
    }

    fn lock_outgoing(&self) -> MutexGuard<'_, Outgoing> {
        self.outgoing.lock().expect("outgoing lock poisoned")
    }

    fn lock_incoming(&self) -> MutexGuard<'_, Incoming> {
        self.incoming.lock().expect("incoming lock poisoned")
    }

    fn timeout(&self) -> Duration {
        self.limits.sync_operation_timeout()
    }

    pub fn name(&self) -> &SessionName {
        &self.name
    }

    pub fn channel(&self) -> ChannelId {
        self.sender.channel()
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    pub fn state(&self) -> SessionState {
        self.lock_outgoing().state
    }

    pub fn commands_out(&self) -> CommandId {
        self.lock_outgoing().commands_out
    }

    pub fn max_complete(&self) -> CommandId {
        self.lock_outgoing().outbox.max_complete()
    }

    /// Buffered, not yet completed commands.
    pub fn outbox_len(&self) -> usize {
        self.lock_outgoing().outbox.len()
    }

    pub fn commands_in(&self) -> CommandId {
        self.lock_incoming().commands_in
    }

    /// Snapshot of the inbound ids processed and not yet known complete.
    pub fn processed_ranges(&self) -> RangeSet {
        self.lock_incoming().processed.copy()
    }

    pub fn is_closing(&self) -> bool {
        matches!(
            self.lock_outgoing().state,
            SessionState::Closing | SessionState::Closed
        )
    }

    pub fn set_auto_sync(&self, auto_sync: bool) {
        self.lock_outgoing().auto_sync = auto_sync;
    }

    pub fn set_transacted(&self, transacted: bool) {
        self.lock_outgoing().transacted = transacted;
    }

    pub fn is_transacted(&self) -> bool {
        self.lock_outgoing().transacted
    }

    pub fn detach_code(&self) -> Option<DetachCode> {
        self.lock_outgoing().detach_code
    }

    pub(crate) fn set_detach_code(&self, code: DetachCode) {
        self.lock_outgoing().detach_code = Some(code);
    }

    pub fn execution_exception(&self) -> Option<ExecutionException> {
        self.lock_outgoing().exception.clone()
    }

    pub fn set_listener(&self, listener: Arc<dyn SessionListener>) {
        *self.listener.write().expect("listener lock poisoned") = listener;
    }

    pub(crate) fn listener(&self) -> Arc<dyn SessionListener> {
        self.listener.read().expect("listener lock poisoned").clone()
    }

    pub(crate) fn set_deregister(&self, deregister: Deregister) {
        *self.deregister.lock().expect("deregister lock poisoned") = Some(deregister);
    }

    pub fn credit(&self) -> &CreditManager {
        &self.credit
    }

    pub fn set_flow_control(&self, enabled: bool) {
        self.credit.set_flow_control(enabled);
    }

    pub fn add_credit(&self, messages: u64, bytes: u64) {
        self.credit.add_credit(messages, bytes);
    }

    pub fn set_credit(&self, messages: Credit, bytes: Credit) {
        self.credit.set_credit(messages, bytes);
    }

    pub fn clear_credit(&self) {
        self.credit.clear_credit();
    }

    pub fn is_flow_blocked(&self) -> bool {
        self.credit.is_flow_blocked()
    }

    pub fn pending_results(&self) -> usize {
        self.results.pending() + self.lock_outgoing().registrations.len()
    }

    fn transmit(&self, method: &Method, batch: bool) -> Result<(), SenderError> {
        tracing::trace!(
            session = %self.name,
            channel = %self.channel(),
            method = method.name(),
            "send"
        );
        self.sender.send(method)?;
        if !batch {
            self.sender.flush()?;
        }
        Ok(())
    }

    fn send_control(&self, control: Control) -> Result<(), SenderError> {
        self.transmit(&Method::Control(control), false)
    }

    /// Send failures are recoverable by resume unless the session is
    /// closing, in which case they propagate.
    fn tolerate(
        &self,
        closing: bool,
        context: &'static str,
        result: Result<(), SenderError>,
    ) -> SessionResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if closing => Err(err.into()),
            Err(err) => {
                tracing::error!(session = %self.name, error = %err, "{context}");
                Ok(())
            }
        }
    }

    fn reset_incoming(&self) {
        let mut incoming = self.lock_incoming();
        incoming.initialised = false;
        incoming.processed.clear();
    }

    /// Moves result slots parked during dispatch into the registry, so they
    /// can be resolved, broken or woken.
    fn register_parked(&self) {
        let registrations = mem::take(&mut self.lock_outgoing().registrations);
        self.results.register(registrations);
    }

    fn send_attach(&self) -> Result<(), SenderError> {
        self.send_control(Control::SessionAttach {
            name: self.name.clone(),
            force: false,
        })?;
        self.send_control(Control::SessionRequestTimeout { timeout: 0 })
    }

    /// Sends the attach request. The peer's `session.attached` opens the
    /// session.
    pub fn attach(&self) -> SessionResult<()> {
        self.reset_incoming();
        if let Err(err) = self.send_attach() {
            let mut out = self.lock_outgoing();
            if out.state == SessionState::New {
                out.state = SessionState::Detached;
                self.outgoing_changed.notify_all();
            }
            return Err(err.into());
        }
        Ok(())
    }

    pub fn await_open(&self) -> SessionResult<()> {
        let mut out = self.lock_outgoing();
        match out.state {
            SessionState::New => {
                let waiter = Waiter::new("await open", self.timeout(), &self.failover);
                while waiter.has_time() && out.state == SessionState::New {
                    out = waiter.wait(&self.outgoing_changed, out)?;
                }
                match out.state {
                    SessionState::Open | SessionState::Resuming => Ok(()),
                    SessionState::New => Err(waiter.timed_out()),
                    _ => Err(out.closed_error()),
                }
            }
            SessionState::Detached | SessionState::Closing | SessionState::Closed => {
                Err(SessionError::Closed)
            }
            SessionState::Open | SessionState::Resuming => Ok(()),
        }
    }

    /// The peer confirmed our attach.
    pub(crate) fn attached(&self) {
        let first_open = {
            let mut out = self.lock_outgoing();
            let first_open = out.state == SessionState::New;
            if matches!(out.state, SessionState::New | SessionState::Resuming) {
                out.state = SessionState::Open;
                self.outgoing_changed.notify_all();
            }
            first_open
        };
        if first_open {
            tracing::debug!(session = %self.name, "session opened");
            metrics::session_state(&self.name.to_string(), SessionState::Open.as_str());
            self.listener().opened(self);
        }
    }

    pub fn invoke(&self, method: Method) -> SessionResult<()> {
        match method {
            Method::Control(control) => Ok(self.send_control(control)?),
            Method::Command(command) => self.invoke_command(command, None).map(|_| ()),
        }
    }

    /// Dispatches `command` and returns a future for the peer's
    /// `execution.result`.
    pub fn invoke_with_result(&self, command: Command) -> SessionResult<ResultFuture> {
        let slot = ResultSlot::new();
        match self.invoke_command(command, Some(Arc::clone(&slot)))? {
            Some(id) => Ok(ResultFuture::new(
                id,
                slot,
                Arc::clone(&self.failover),
                self.timeout(),
            )),
            None => Err(SessionError::InvalidState {
                operation: "invoke_with_result",
                state: SessionState::Detached.as_str(),
            }),
        }
    }

    /// Returns the id assigned, or `None` when an unreliable command was
    /// dropped because the session is detached.
    fn invoke_command(
        &self,
        command: Command,
        slot: Option<Arc<ResultSlot>>,
    ) -> SessionResult<Option<CommandId>> {
        if command.has_payload() {
            self.credit.acquire(command.body_size(), &self.failover)?;
        }
        let out = self.lock_outgoing();
        let (_out, id) = self.dispatch_locked(out, command, slot)?;
        Ok(id)
    }

    fn dispatch_locked<'a>(
        &'a self,
        mut out: MutexGuard<'a, Outgoing>,
        mut command: Command,
        slot: Option<Arc<ResultSlot>>,
    ) -> SessionResult<(MutexGuard<'a, Outgoing>, Option<CommandId>)> {
        let is_resumer = out.is_resumer();
        if out.state == SessionState::Detached && command.unreliable && !is_resumer {
            tracing::debug!(
                session = %self.name,
                command = command.kind.name(),
                "dropping unreliable command while detached"
            );
            return Ok((out, None));
        }

        let waiter = Waiter::new("invoke", self.timeout(), &self.failover);
        if !is_resumer {
            while waiter.has_time() && !out.state.admits_dispatch() {
                out = waiter.wait(&self.outgoing_changed, out)?;
            }
        }
        match out.state {
            SessionState::Open => {}
            SessionState::Resuming if is_resumer => {}
            SessionState::Closing | SessionState::Closed => return Err(out.closed_error()),
            _ => return Err(waiter.timed_out()),
        }

        let waiter = Waiter::new("invoke (replay buffer full)", self.timeout(), &self.failover);
        while out.outbox.is_full(out.commands_out)
            && waiter.has_time()
            && out.state != SessionState::Closed
        {
            if matches!(out.state, SessionState::Open | SessionState::Resuming) {
                let closing = out.closing;
                self.tolerate(
                    closing,
                    "error sending flush (full replay buffer)",
                    self.send_control(Control::flush_completed()),
                )?;
            }
            out = waiter.wait(&self.outgoing_changed, out)?;
        }
        if out.state == SessionState::Closed {
            return Err(out.closed_error());
        }
        if out.outbox.is_full(out.commands_out) {
            return Err(waiter.timed_out());
        }

        let id = out.commands_out;
        out.commands_out = id.next();
        command.id = Some(id);
        if let Some(slot) = slot {
            out.registrations.push((id, slot));
        }
        let closing = out.closing;

        if id == CommandId::ZERO {
            self.tolerate(
                closing,
                "error sending command point",
                self.send_control(Control::SessionCommandPoint {
                    command_id: CommandId::ZERO,
                    offset: 0,
                }),
            )?;
        }

        let replayable = !self.limits.no_replay
            && !closing
            && !out.transacted
            && command.is_message_transfer()
            && !command.unreliable;
        if out.auto_sync {
            command.sync = true;
        }
        out.need_sync = !command.sync;
        if replayable || command.completion.is_some() {
            out.outbox.buffer(id, command.clone());
        }

        let batch = command.batch;
        tracing::debug!(
            session = %self.name,
            command_id = %id,
            command = command.kind.name(),
            "invoke"
        );
        let sent = self.transmit(&Method::Command(command), batch);
        self.tolerate(closing, "error sending command", sent)?;
        metrics::commands_sent(1);
        metrics::outbox_depth(out.outbox.len(), out.outbox.command_bytes());

        if out.auto_sync {
            out = self.sync_locked(out, self.timeout())?;
        }

        if id.get() % FLUSH_INTERVAL == 0 {
            self.tolerate(
                closing,
                "error sending flush (periodic)",
                self.send_control(Control::flush_completed()),
            )?;
        }
        Ok((out, Some(id)))
    }

    pub fn sync(&self) -> SessionResult<()> {
        self.sync_timeout(self.timeout())
    }

    /// Blocks until every command dispatched so far is complete.
    pub fn sync_timeout(&self, timeout: Duration) -> SessionResult<()> {
        let out = self.lock_outgoing();
        self.sync_locked(out, timeout).map(drop)
    }

    fn sync_locked<'a>(
        &'a self,
        mut out: MutexGuard<'a, Outgoing>,
        timeout: Duration,
    ) -> SessionResult<MutexGuard<'a, Outgoing>> {
        let point = out.commands_out.prev();
        if out.need_sync && serial::lt(out.outbox.max_complete(), point) {
            let sync = Command::sync().with_sync(true);
            out = self.dispatch_locked(out, sync, None)?.0;
        }

        let waiter = Waiter::new("sync", timeout, &self.failover);
        while waiter.has_time()
            && out.state != SessionState::Closed
            && serial::lt(out.outbox.max_complete(), point)
        {
            tracing::trace!(
                session = %self.name,
                point = %point,
                max_complete = %out.outbox.max_complete(),
                "waiting for sync"
            );
            out = waiter.wait(&self.outgoing_changed, out)?;
        }

        if serial::lt(out.outbox.max_complete(), point) {
            if out.state == SessionState::Closed {
                return Err(out.closed_error());
            }
            return Err(waiter.timed_out());
        }
        Ok(out)
    }

    /// The peer completed `[lower, upper]`. Returns whether the watermark
    /// advanced.
    pub fn complete(&self, lower: CommandId, upper: CommandId) -> bool {
        let completion = {
            let mut out = self.lock_outgoing();
            let last_sent = out.commands_out.prev();
            let upper = if serial::gt(upper, last_sent) {
                tracing::warn!(
                    session = %self.name,
                    %lower,
                    %upper,
                    %last_sent,
                    "peer completed commands that were never sent"
                );
                if serial::gt(lower, last_sent) {
                    return false;
                }
                last_sent
            } else {
                upper
            };
            let completion = out.outbox.complete(lower, upper);
            tracing::debug!(
                session = %self.name,
                %lower,
                %upper,
                remaining = out.commands_out.offset_from(out.outbox.max_complete()).saturating_sub(1),
                "complete"
            );
            metrics::outbox_depth(out.outbox.len(), out.outbox.command_bytes());
            self.outgoing_changed.notify_all();
            completion
        };
        for command in &completion.finished {
            if let Some(listener) = &command.completion {
                listener.on_complete(command);
            }
        }
        completion.advanced
    }

    /// Re-attaches a detached session and retransmits everything the peer
    /// has not completed, in id order.
    pub fn resume(&self) -> SessionResult<()> {
        self.failover.clear();
        if self.state() == SessionState::Detached {
            self.reset_incoming();
        }
        let mut out = self.lock_outgoing();
        match out.state {
            SessionState::Detached => {}
            SessionState::Closing | SessionState::Closed => return Err(out.closed_error()),
            state => {
                return Err(SessionError::InvalidState {
                    operation: "resume",
                    state: state.as_str(),
                });
            }
        }
        out.state = SessionState::Resuming;
        out.resumer = Some(thread::current().id());
        self.outgoing_changed.notify_all();

        match self.replay_locked(out) {
            Ok(out) => {
                drop(out);
                metrics::session_state(&self.name.to_string(), "resumed");
                self.listener().resumed(self);
                Ok(())
            }
            Err(err) => {
                let mut out = self.lock_outgoing();
                if out.state == SessionState::Resuming {
                    out.state = SessionState::Detached;
                }
                out.resumer = None;
                self.outgoing_changed.notify_all();
                Err(err)
            }
        }
    }

    fn replay_locked<'a>(
        &'a self,
        mut out: MutexGuard<'a, Outgoing>,
    ) -> SessionResult<MutexGuard<'a, Outgoing>> {
        self.send_attach()?;

        let window: Vec<CommandId> = out.outbox.replay_window(out.commands_out).collect();
        for &id in &window {
            let command = match out.outbox.get_mut(id) {
                Some(command) => {
                    if let Some(transfer) = command.as_transfer_mut() {
                        transfer.mark_redelivered();
                    }
                    command.clone()
                }
                None => {
                    let mut placeholder = Command::sync();
                    placeholder.id = Some(id);
                    placeholder
                }
            };
            self.send_control(Control::SessionCommandPoint {
                command_id: id,
                offset: 0,
            })?;
            let batch = command.batch;
            self.transmit(&Method::Command(command), batch)?;
        }
        if !window.is_empty() {
            metrics::commands_replayed(window.len());
        }
        tracing::info!(
            session = %self.name,
            replayed = window.len(),
            commands_out = %out.commands_out,
            "session resumed"
        );

        let commands_out = out.commands_out;
        self.send_control(Control::SessionCommandPoint {
            command_id: commands_out,
            offset: 0,
        })?;
        self.send_control(Control::flush_completed())?;

        if out.transacted {
            out = self
                .dispatch_locked(out, Command::new(CommandKind::TxSelect), None)?
                .0;
        }

        out.state = SessionState::Open;
        out.resumer = None;
        self.outgoing_changed.notify_all();
        Ok(out)
    }

    pub fn close(&self) -> SessionResult<()> {
        self.close_timeout(self.timeout())
    }

    pub fn close_timeout(&self, timeout: Duration) -> SessionResult<()> {
        tracing::debug!(session = %self.name, "closing");
        let mut out = self.lock_outgoing();
        match out.state {
            SessionState::Detached => {
                out.state = SessionState::Closed;
                out.closing = true;
                self.outgoing_changed.notify_all();
                let registrations = mem::take(&mut out.registrations);
                let err = out.closed_error();
                drop(out);
                self.results.register(registrations);
                self.finish_close(&err);
                Ok(())
            }
            SessionState::Closed => Ok(()),
            _ => {
                out.state = SessionState::Closing;
                out.closing = true;
                self.outgoing_changed.notify_all();
                self.send_control(Control::SessionRequestTimeout { timeout: 0 })?;
                self.send_control(Control::SessionDetach {
                    name: self.name.clone(),
                })?;

                let waiter = Waiter::new("close", timeout, &self.failover);
                while waiter.has_time() && out.state != SessionState::Closed {
                    out = waiter.wait(&self.outgoing_changed, out)?;
                }
                if out.state != SessionState::Closed {
                    return Err(waiter.timed_out());
                }
                Ok(())
            }
        }
    }

    /// The transport under this session went away, or the peer finished
    /// detaching. Ends CLOSED when closing was requested or the peer raised
    /// an exception, otherwise DETACHED and resumable.
    pub fn closed(&self) {
        let (state, registrations, err) = {
            let mut out = self.lock_outgoing();
            if out.state == SessionState::Closed {
                return;
            }
            out.state = if out.closing || out.exception.is_some() {
                SessionState::Closed
            } else {
                SessionState::Detached
            };
            self.outgoing_changed.notify_all();
            (
                out.state,
                mem::take(&mut out.registrations),
                out.closed_error(),
            )
        };
        tracing::debug!(session = %self.name, %state, "transport closed");
        metrics::session_state(&self.name.to_string(), state.as_str());
        self.results.register(registrations);
        self.credit.wake_all();
        self.results.wake_all();
        if state == SessionState::Closed {
            self.finish_close(&err);
        }
    }

    /// Parked registrations must already be in the registry.
    fn finish_close(&self, err: &SessionError) {
        let broken = self.results.break_all(err);
        if broken > 0 {
            tracing::debug!(session = %self.name, broken, "pending results broken by close");
        }
        let deregister = self
            .deregister
            .lock()
            .expect("deregister lock poisoned")
            .take();
        if let Some(deregister) = deregister {
            deregister(self.channel());
        }
        self.listener().closed(self);
    }

    /// The transport reported an error; it is followed by `closed`.
    pub fn exception(&self, cause: &dyn fmt::Display) {
        tracing::error!(session = %self.name, %cause, "transport exception");
    }

    /// Records the peer's execution exception. Only the first is kept.
    pub fn set_exception(&self, exception: ExecutionException) -> bool {
        let mut out = self.lock_outgoing();
        if let Some(existing) = &out.exception {
            tracing::error!(
                session = %self.name,
                %existing,
                ignored = %exception,
                "second execution exception while one is pending"
            );
            return false;
        }
        out.exception = Some(exception);
        true
    }

    /// Aborts every blocked operation with `Cancelled`. Cleared by `resume`.
    pub fn notify_failover_required(&self) {
        self.failover.raise();
        let registrations = {
            let mut out = self.lock_outgoing();
            self.outgoing_changed.notify_all();
            mem::take(&mut out.registrations)
        };
        self.results.register(registrations);
        self.credit.wake_all();
        self.results.wake_all();
    }

    pub fn is_failover_required(&self) -> bool {
        self.failover.is_raised()
    }

    /// Resolves the future registered for `id`.
    pub fn result(&self, id: CommandId, value: ResultValue) -> bool {
        self.register_parked();
        self.results.resolve(id, value)
    }

    /// The peer announced the id of the next command it sends.
    pub fn command_point(&self, id: CommandId) {
        let mut incoming = self.lock_incoming();
        incoming.commands_in = id;
        if !incoming.initialised {
            incoming.initialised = true;
            incoming.max_processed = id.prev();
            incoming.sync_point = incoming.max_processed;
        }
    }

    /// Assigns the next inbound id to `command`.
    pub fn identify(&self, command: &mut Command) -> SessionResult<CommandId> {
        let id = {
            let mut incoming = self.lock_incoming();
            if !incoming.initialised {
                return Err(SessionError::protocol_violation(
                    "command received before session.command-point",
                ));
            }
            let id = incoming.commands_in;
            incoming.commands_in = id.next();
            id
        };
        command.id = Some(id);
        tracing::trace!(session = %self.name, command_id = %id, "identify");
        if id.get() & IDENTIFY_FLUSH_MASK == 0 {
            self.flush_processed(true)?;
        }
        Ok(id)
    }

    pub fn processed_id(&self, id: CommandId) -> SessionResult<()> {
        self.processed(id, id)
    }

    pub fn processed_range(&self, range: Range) -> SessionResult<()> {
        self.processed(range.lower(), range.upper())
    }

    pub fn processed_command(&self, command: &Command) -> SessionResult<()> {
        match command.id {
            Some(id) => self.processed_id(id),
            None => Err(SessionError::protocol_violation(
                "processed command was never identified",
            )),
        }
    }

    /// Marks inbound `[lower, upper]` processed by the application.
    pub fn processed(&self, lower: CommandId, upper: CommandId) -> SessionResult<()> {
        let Some(range) = Range::new(lower, upper) else {
            return Err(SessionError::protocol_violation(format!(
                "reversed processed range [{lower}, {upper}]"
            )));
        };
        let flush = {
            let mut incoming = self.lock_incoming();
            if serial::ge(upper, incoming.commands_in) {
                return Err(SessionError::protocol_violation(format!(
                    "range {range} exceeds max received command-id {}",
                    incoming.commands_in.prev()
                )));
            }
            incoming.processed.add_range(range);
            let old = incoming.max_processed;
            if let Some(first) = incoming.processed.first()
                && serial::le(first.lower(), incoming.max_processed.next())
            {
                incoming.max_processed = serial::max(incoming.max_processed, first.upper());
            }
            let synced = serial::ge(incoming.max_processed, incoming.sync_point);
            let flush = serial::lt(old, incoming.sync_point) && synced;
            if synced {
                incoming.sync_point = incoming.max_processed;
            }
            flush
        };
        if flush {
            self.flush_processed(false)?;
        }
        Ok(())
    }

    /// The peer asked to be told when everything received so far is
    /// processed.
    pub fn sync_point(&self) -> SessionResult<()> {
        let flush = {
            let mut incoming = self.lock_incoming();
            let id = incoming.commands_in.prev();
            incoming.sync_point = id;
            tracing::debug!(session = %self.name, sync_point = %id, "synced");
            serial::ge(incoming.max_processed, incoming.sync_point)
        };
        if flush {
            self.flush_processed(false)?;
        }
        Ok(())
    }

    /// Sends the processed set as `session.completed`.
    pub fn flush_processed(&self, timely_reply: bool) -> SessionResult<()> {
        let processed = self.lock_incoming().processed.copy();
        let out = self.lock_outgoing();
        if matches!(
            out.state,
            SessionState::Detached | SessionState::Closing | SessionState::Closed
        ) || processed.is_empty()
        {
            return Ok(());
        }
        let closing = out.closing;
        self.tolerate(
            closing,
            "error sending session.completed",
            self.send_control(Control::SessionCompleted {
                commands: processed,
                timely_reply,
            }),
        )
    }

    pub fn flush_expected(&self) -> SessionResult<()> {
        let mut expected = RangeSet::new();
        {
            let incoming = self.lock_incoming();
            if incoming.initialised {
                expected.add_id(incoming.commands_in);
            }
        }
        let closing = self.lock_outgoing().closing;
        self.tolerate(
            closing,
            "error sending session.expected",
            self.send_control(Control::SessionExpected { commands: expected }),
        )
    }

    /// The peer no longer needs to hear about `known`.
    pub fn known_complete(&self, known: &RangeSet) {
        if !known.is_empty() {
            self.lock_incoming().processed.subtract(known);
        }
    }

    /// Entry point for every inbound method on this session's channel.
    pub fn received(&self, method: Method) -> SessionResult<()> {
        super::delegate::dispatch(self, method)
    }
}
