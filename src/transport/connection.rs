//! Channel-multiplexing owner of sessions.
//!
//! A connection hands each session a channel-scoped sender and routes
//! inbound frames to the session on that channel. Sessions deregister
//! themselves through a weak back-reference when they close, so the
//! connection's table lock is never held while calling into a session.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;

use crate::core::{ChannelId, Method, SessionError, SessionLimits, SessionName, SessionResult};

use super::sender::{ChannelSender, Sender};
use super::session::Session;

/// What the transport delivers for one channel.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    Method(Method),
    /// The transport under the channel is gone.
    Closed,
    /// The transport failed; `Closed` follows.
    Exception(String),
}

#[derive(Clone, Debug)]
pub struct InboundFrame {
    pub channel: ChannelId,
    pub event: InboundEvent,
}

impl InboundFrame {
    pub fn method(channel: ChannelId, method: impl Into<Method>) -> Self {
        Self {
            channel,
            event: InboundEvent::Method(method.into()),
        }
    }
}

type SessionTable = BTreeMap<ChannelId, Arc<Session>>;

pub struct Connection {
    sender: Arc<dyn Sender>,
    limits: SessionLimits,
    sessions: Mutex<SessionTable>,
    this: Weak<Connection>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("sessions", &self.lock_sessions().len())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(sender: Arc<dyn Sender>, limits: SessionLimits) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            sender,
            limits,
            sessions: Mutex::new(BTreeMap::new()),
            this: this.clone(),
        })
    }

    fn lock_sessions(&self) -> MutexGuard<'_, SessionTable> {
        self.sessions.lock().expect("session table lock poisoned")
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    /// Creates a session on the lowest free channel. The session is not
    /// attached yet.
    pub fn create_session(&self, name: SessionName) -> SessionResult<Arc<Session>> {
        let mut sessions = self.lock_sessions();
        let channel = (0..=u16::MAX)
            .map(ChannelId::new)
            .find(|channel| !sessions.contains_key(channel))
            .ok_or(SessionError::InvalidState {
                operation: "create_session",
                state: "no free channel",
            })?;

        let session = Arc::new(Session::new(
            name,
            ChannelSender::new(channel, Arc::clone(&self.sender)),
            self.limits.clone(),
        ));
        let connection = self.this.clone();
        session.set_deregister(Box::new(move |channel| {
            if let Some(connection) = connection.upgrade() {
                connection.remove_session(channel);
            }
        }));
        sessions.insert(channel, Arc::clone(&session));
        tracing::debug!(session = %session.name(), %channel, "session created");
        Ok(session)
    }

    /// Creates, attaches and waits for the session to open.
    pub fn open_session(&self, name: SessionName) -> SessionResult<Arc<Session>> {
        let session = self.create_session(name)?;
        let opened = session.attach().and_then(|()| session.await_open());
        if let Err(err) = opened {
            self.remove_session(session.channel());
            return Err(err);
        }
        Ok(session)
    }

    pub fn session(&self, channel: ChannelId) -> Option<Arc<Session>> {
        self.lock_sessions().get(&channel).cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.lock_sessions().values().cloned().collect()
    }

    pub fn remove_session(&self, channel: ChannelId) -> Option<Arc<Session>> {
        let removed = self.lock_sessions().remove(&channel);
        if removed.is_some() {
            tracing::debug!(%channel, "session removed");
        }
        removed
    }

    /// Routes one inbound frame to its session.
    pub fn dispatch(&self, frame: InboundFrame) {
        let Some(session) = self.session(frame.channel) else {
            tracing::warn!(channel = %frame.channel, "frame for unknown channel dropped");
            return;
        };
        match frame.event {
            InboundEvent::Method(method) => {
                let name = method.name();
                if let Err(err) = session.received(method) {
                    tracing::error!(
                        session = %session.name(),
                        channel = %frame.channel,
                        method = name,
                        error = %err,
                        "inbound method failed"
                    );
                }
            }
            InboundEvent::Closed => session.closed(),
            InboundEvent::Exception(cause) => session.exception(&cause),
        }
    }

    /// The physical transport dropped: every session detaches or closes.
    pub fn closed(&self) {
        for session in self.sessions() {
            session.closed();
        }
    }

    pub fn exception(&self, cause: &dyn fmt::Display) {
        for session in self.sessions() {
            session.exception(cause);
        }
    }

    /// Cancels every blocked operation on every session.
    pub fn notify_failover_required(&self) {
        for session in self.sessions() {
            session.notify_failover_required();
        }
    }

    /// Resumes every detached session over the (re-established) sender.
    /// Returns the first failure after attempting them all.
    pub fn resume_all(&self) -> SessionResult<()> {
        let mut first_err = None;
        for session in self.sessions() {
            if let Err(err) = session.resume() {
                tracing::warn!(session = %session.name(), error = %err, "resume failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Drains `rx` on a dedicated thread until every sender hangs up.
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        rx: Receiver<InboundFrame>,
    ) -> io::Result<JoinHandle<()>> {
        let connection = Arc::clone(self);
        thread::Builder::new()
            .name("amqp-session-dispatch".to_string())
            .spawn(move || {
                while let Ok(frame) = rx.recv() {
                    connection.dispatch(frame);
                }
                tracing::debug!("inbound channel closed; dispatcher exiting");
            })
    }
}
