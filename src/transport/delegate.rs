//! Inbound method handling for one session.

use crate::core::{Command, CommandKind, Control, DetachCode, Method, RangeSet, SessionResult};

use super::session::Session;

pub(crate) fn dispatch(session: &Session, method: Method) -> SessionResult<()> {
    match method {
        Method::Control(control) => control_received(session, control),
        Method::Command(command) => command_received(session, command),
    }
}

fn command_received(session: &Session, mut command: Command) -> SessionResult<()> {
    let id = session.identify(&mut command)?;
    tracing::trace!(
        session = %session.name(),
        command_id = %id,
        command = command.kind.name(),
        "received"
    );
    let listener = session.listener();
    match &command.kind {
        CommandKind::ExecutionSync => session.sync_point()?,
        CommandKind::ExecutionResult { command_id, value } => {
            session.result(*command_id, value.clone());
        }
        CommandKind::ExecutionException(exception) => {
            session.set_exception(exception.clone());
            listener.exception(session, exception);
            session.closed();
        }
        CommandKind::MessageTransfer(_) => listener.message(session, &command),
        CommandKind::MessageSetFlowMode { destination } => {
            tracing::debug!(session = %session.name(), %destination, "flow control enabled");
            session.set_flow_control(true);
        }
        CommandKind::MessageFlow { unit, value, .. } => session.credit().grant(*unit, *value),
        CommandKind::MessageStop { destination } => {
            tracing::debug!(session = %session.name(), %destination, "credit revoked");
            session.clear_credit();
        }
        CommandKind::TxSelect | CommandKind::Invocation { .. } => {
            listener.command(session, &command);
        }
    }

    // Transfers stay outstanding until the application marks them processed.
    if !command.has_payload() {
        session.processed_id(id)?;
    }
    if command.sync && !session.is_closing() {
        session.sync_point()?;
    }
    Ok(())
}

fn control_received(session: &Session, control: Control) -> SessionResult<()> {
    tracing::trace!(session = %session.name(), control = control.name(), "received");
    match control {
        Control::SessionAttached { .. } => session.attached(),
        Control::SessionCompleted {
            commands,
            timely_reply,
        } => {
            let mut known = RangeSet::new();
            for range in &commands {
                if session.complete(range.lower(), range.upper()) {
                    known.add_range(*range);
                }
            }
            if timely_reply {
                session.invoke(Method::Control(Control::SessionKnownCompleted {
                    commands: known,
                }))?;
            }
        }
        Control::SessionKnownCompleted { commands } => session.known_complete(&commands),
        Control::SessionFlush {
            expected,
            confirmed,
            completed,
        } => {
            if expected {
                session.flush_expected()?;
            }
            if confirmed || completed {
                session.flush_processed(false)?;
            }
        }
        Control::SessionCommandPoint { command_id, .. } => session.command_point(command_id),
        Control::SessionDetach { name } => {
            session.invoke(Method::Control(Control::SessionDetached {
                name,
                code: DetachCode::Normal,
            }))?;
            session.closed();
        }
        Control::SessionDetached { code, .. } => {
            if code != DetachCode::Normal {
                tracing::warn!(session = %session.name(), ?code, "session detached by peer");
            }
            session.set_detach_code(code);
            session.closed();
        }
        Control::SessionRequestTimeout { timeout } => {
            session.invoke(Method::Control(Control::SessionTimeout { timeout }))?;
        }
        Control::SessionTimeout { timeout } => {
            tracing::debug!(session = %session.name(), timeout, "peer timeout");
        }
        Control::SessionExpected { commands } => {
            tracing::debug!(session = %session.name(), ?commands, "peer expected");
        }
        Control::SessionAttach { name, .. } => {
            tracing::warn!(session = %session.name(), peer = %name, "unexpected session.attach");
        }
    }
    Ok(())
}
