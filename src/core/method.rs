//! Typed session methods.
//!
//! A [`Method`] is either a [`Control`] (session housekeeping, never
//! numbered) or a [`Command`] (numbered, buffered for replay, subject to
//! flow control). Frame encoding lives outside this crate; methods cross the
//! [`Sender`](crate::transport::Sender) boundary as values.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::ExecutionException;
use super::identity::SessionName;
use super::range_set::RangeSet;
use super::serial::CommandId;

#[derive(Clone, Debug)]
pub enum Method {
    Control(Control),
    Command(Command),
}

impl Method {
    pub fn is_command(&self) -> bool {
        matches!(self, Method::Command(_))
    }

    pub fn as_command(&self) -> Option<&Command> {
        match self {
            Method::Command(command) => Some(command),
            Method::Control(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::Control(control) => control.name(),
            Method::Command(command) => command.kind.name(),
        }
    }
}

impl From<Control> for Method {
    fn from(value: Control) -> Self {
        Method::Control(value)
    }
}

impl From<Command> for Method {
    fn from(value: Command) -> Self {
        Method::Command(value)
    }
}

/// Reason a peer gave for detaching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetachCode {
    Normal,
    SessionBusy,
    TransportBusy,
    NotAttached,
    UnknownIds,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Control {
    SessionAttach {
        name: SessionName,
        force: bool,
    },
    SessionAttached {
        name: SessionName,
    },
    SessionDetach {
        name: SessionName,
    },
    SessionDetached {
        name: SessionName,
        code: DetachCode,
    },
    SessionRequestTimeout {
        timeout: u32,
    },
    SessionTimeout {
        timeout: u32,
    },
    SessionCommandPoint {
        command_id: CommandId,
        offset: u64,
    },
    SessionExpected {
        commands: RangeSet,
    },
    SessionCompleted {
        commands: RangeSet,
        timely_reply: bool,
    },
    SessionKnownCompleted {
        commands: RangeSet,
    },
    SessionFlush {
        expected: bool,
        confirmed: bool,
        completed: bool,
    },
}

impl Control {
    pub fn flush_completed() -> Self {
        Control::SessionFlush {
            expected: false,
            confirmed: false,
            completed: true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Control::SessionAttach { .. } => "session.attach",
            Control::SessionAttached { .. } => "session.attached",
            Control::SessionDetach { .. } => "session.detach",
            Control::SessionDetached { .. } => "session.detached",
            Control::SessionRequestTimeout { .. } => "session.request-timeout",
            Control::SessionTimeout { .. } => "session.timeout",
            Control::SessionCommandPoint { .. } => "session.command-point",
            Control::SessionExpected { .. } => "session.expected",
            Control::SessionCompleted { .. } => "session.completed",
            Control::SessionKnownCompleted { .. } => "session.known-completed",
            Control::SessionFlush { .. } => "session.flush",
        }
    }
}

/// Callback fired once the peer reports a command complete.
#[derive(Clone)]
pub struct CompletionListener(Arc<dyn Fn(&Command) + Send + Sync>);

impl CompletionListener {
    pub fn new(callback: impl Fn(&Command) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub fn on_complete(&self, command: &Command) {
        (self.0)(command)
    }
}

impl fmt::Debug for CompletionListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompletionListener(..)")
    }
}

/// A numbered session command.
#[derive(Clone, Debug)]
pub struct Command {
    /// Unset until the session dispatches (outgoing) or identifies (incoming) it.
    pub id: Option<CommandId>,
    pub kind: CommandKind,
    pub sync: bool,
    pub batch: bool,
    pub unreliable: bool,
    pub completion: Option<CompletionListener>,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            id: None,
            kind,
            sync: false,
            batch: false,
            unreliable: false,
            completion: None,
        }
    }

    pub fn transfer(transfer: MessageTransfer) -> Self {
        Self::new(CommandKind::MessageTransfer(transfer))
    }

    pub fn sync() -> Self {
        Self::new(CommandKind::ExecutionSync)
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_batch(mut self, batch: bool) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_unreliable(mut self, unreliable: bool) -> Self {
        self.unreliable = unreliable;
        self
    }

    pub fn with_completion(mut self, listener: CompletionListener) -> Self {
        self.completion = Some(listener);
        self
    }

    /// Commands with content are admitted through the credit gate and
    /// marked processed by the application rather than by the session.
    pub fn has_payload(&self) -> bool {
        matches!(self.kind, CommandKind::MessageTransfer(_))
    }

    pub fn body_size(&self) -> usize {
        match &self.kind {
            CommandKind::MessageTransfer(transfer) => transfer.body.len(),
            _ => 0,
        }
    }

    pub fn is_message_transfer(&self) -> bool {
        matches!(self.kind, CommandKind::MessageTransfer(_))
    }

    pub fn as_transfer(&self) -> Option<&MessageTransfer> {
        match &self.kind {
            CommandKind::MessageTransfer(transfer) => Some(transfer),
            _ => None,
        }
    }

    pub fn as_transfer_mut(&mut self) -> Option<&mut MessageTransfer> {
        match &mut self.kind {
            CommandKind::MessageTransfer(transfer) => Some(transfer),
            _ => None,
        }
    }
}

/// Flow-control unit a credit grant applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditUnit {
    Message,
    Byte,
}

/// Grant value meaning "no limit".
pub const UNLIMITED_CREDIT: u32 = u32::MAX;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultValue {
    pub struct_code: u16,
    pub body: Bytes,
}

#[derive(Clone, Debug)]
pub enum CommandKind {
    MessageTransfer(MessageTransfer),
    /// Producer credit grant.
    MessageFlow {
        destination: String,
        unit: CreditUnit,
        value: u32,
    },
    /// Peer switches producer flow control on for this session.
    MessageSetFlowMode {
        destination: String,
    },
    /// Peer revokes all producer credit.
    MessageStop {
        destination: String,
    },
    ExecutionSync,
    ExecutionResult {
        command_id: CommandId,
        value: ResultValue,
    },
    ExecutionException(ExecutionException),
    TxSelect,
    /// Any other command, opaque to the session layer.
    Invocation {
        name: String,
        args: Bytes,
        expects_result: bool,
    },
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::MessageTransfer(_) => "message.transfer",
            CommandKind::MessageFlow { .. } => "message.flow",
            CommandKind::MessageSetFlowMode { .. } => "message.set-flow-mode",
            CommandKind::MessageStop { .. } => "message.stop",
            CommandKind::ExecutionSync => "execution.sync",
            CommandKind::ExecutionResult { .. } => "execution.result",
            CommandKind::ExecutionException(_) => "execution.exception",
            CommandKind::TxSelect => "tx.select",
            CommandKind::Invocation { .. } => "invocation",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptMode {
    Explicit,
    #[default]
    None,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireMode {
    #[default]
    PreAcquired,
    NotAcquired,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryProperties {
    pub redelivered: bool,
    pub routing_key: Option<String>,
    pub priority: Option<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub message_id: Option<[u8; 16]>,
    pub application_headers: Vec<(String, String)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub delivery: Option<DeliveryProperties>,
    pub message: Option<MessageProperties>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageTransfer {
    pub destination: String,
    pub accept_mode: AcceptMode,
    pub acquire_mode: AcquireMode,
    pub header: Option<Header>,
    pub body: Bytes,
}

impl MessageTransfer {
    pub fn new(destination: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            destination: destination.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn is_redelivered(&self) -> bool {
        self.header
            .as_ref()
            .and_then(|header| header.delivery.as_ref())
            .is_some_and(|delivery| delivery.redelivered)
    }

    /// Sets the redelivered flag, creating header and delivery properties
    /// when absent.
    pub fn mark_redelivered(&mut self) {
        let header = self.header.get_or_insert_with(Header::default);
        header
            .delivery
            .get_or_insert_with(DeliveryProperties::default)
            .redelivered = true;
    }
}
