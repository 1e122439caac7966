//! Session lifecycle and delivery callbacks.
//!
//! Callbacks run on the thread that drove the event (usually the inbound
//! dispatcher) with no session lock held, so they may call back into the
//! session.

use crate::core::{Command, ExecutionException};

use super::session::Session;

pub trait SessionListener: Send + Sync {
    fn opened(&self, _session: &Session) {}

    fn resumed(&self, _session: &Session) {}

    /// An identified inbound message transfer. The application marks it
    /// processed once handled.
    fn message(&self, session: &Session, transfer: &Command) {
        tracing::info!(
            session = %session.name(),
            command_id = ?transfer.id,
            "message delivered without a listener"
        );
    }

    /// Any other identified inbound command the session does not handle
    /// itself.
    fn command(&self, _session: &Session, _command: &Command) {}

    fn exception(&self, session: &Session, exception: &ExecutionException) {
        tracing::error!(session = %session.name(), %exception, "session exception");
    }

    fn closed(&self, _session: &Session) {}
}

/// Listener used until the application installs its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl SessionListener for LoggingListener {}
