//! Core session types.
//!
//! Module hierarchy follows type dependency order:
//! - serial: CommandId and wraparound comparison
//! - range_set: Range, RangeSet
//! - identity: SessionName, ChannelId
//! - error: SessionError, ExecutionException
//! - method: Method, Control, Command
//! - limits: SessionLimits

pub mod error;
pub mod identity;
pub mod limits;
pub mod method;
pub mod range_set;
pub mod serial;

pub use error::{
    ExecutionErrorCode, ExecutionException, SenderError, SessionError, SessionResult,
};
pub use identity::{ChannelId, SessionName};
pub use limits::SessionLimits;
pub use method::{
    AcceptMode, AcquireMode, Command, CommandKind, CompletionListener, Control, CreditUnit,
    DeliveryProperties, DetachCode, Header, MessageProperties, MessageTransfer, Method,
    ResultValue, UNLIMITED_CREDIT,
};
pub use range_set::{Range, RangeSet};
pub use serial::CommandId;
