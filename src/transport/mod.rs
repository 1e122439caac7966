//! Session layer over an abstract frame transport.
//!
//! - sender: outbound boundary (`Sender`, `ChannelSender`, `QueueSender`)
//! - waiter: bounded, failover-aware condition waits
//! - outbox: replay buffer and completion watermark
//! - credit: producer flow control
//! - results: futures for `execution.result`
//! - session: the state machine
//! - delegate: inbound method handling
//! - connection: channel multiplexing

pub mod connection;
mod delegate;
pub mod credit;
pub mod listener;
pub mod outbox;
pub mod results;
pub mod sender;
pub mod session;
pub mod waiter;

pub use connection::{Connection, InboundEvent, InboundFrame};
pub use credit::{Credit, CreditManager};
pub use listener::{LoggingListener, SessionListener};
pub use outbox::{Completion, Outbox};
pub use results::{ResultFuture, ResultRegistry, ResultSlot};
pub use sender::{ChannelSender, OutboundFrame, QueueSender, Sender};
pub use session::{Session, SessionState};
pub use waiter::{FailoverFlag, Waiter};
