#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod metrics;
mod paths;
pub mod telemetry;
pub mod transport;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

pub use crate::core::{
    ChannelId, Command, CommandId, CommandKind, Control, ExecutionErrorCode, ExecutionException,
    MessageTransfer, Method, Range, RangeSet, SessionError, SessionLimits, SessionName,
    SessionResult,
};
pub use crate::transport::{
    Connection, InboundFrame, ResultFuture, Sender, Session, SessionListener, SessionState,
};
