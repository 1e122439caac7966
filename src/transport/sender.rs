//! Outbound transport boundary.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::{self, Receiver};

use crate::core::{ChannelId, Method, SenderError};

/// Ordered, best-effort transmission of methods on behalf of sessions.
/// Implementations frame and write; they must not call back into a session.
pub trait Sender: Send + Sync {
    fn send(&self, channel: ChannelId, method: &Method) -> Result<(), SenderError>;

    fn flush(&self) -> Result<(), SenderError>;

    fn is_blocked_for_writing(&self) -> bool {
        false
    }
}

/// Send capability scoped to one channel; what a session holds instead of
/// its connection.
#[derive(Clone)]
pub struct ChannelSender {
    channel: ChannelId,
    sender: Arc<dyn Sender>,
}

impl ChannelSender {
    pub fn new(channel: ChannelId, sender: Arc<dyn Sender>) -> Self {
        Self { channel, sender }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn send(&self, method: &Method) -> Result<(), SenderError> {
        self.sender.send(self.channel, method)
    }

    pub fn flush(&self) -> Result<(), SenderError> {
        self.sender.flush()
    }

    pub fn is_blocked_for_writing(&self) -> bool {
        self.sender.is_blocked_for_writing()
    }
}

impl fmt::Debug for ChannelSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSender")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// A method leaving a session, tagged with its channel.
#[derive(Clone, Debug)]
pub struct OutboundFrame {
    pub channel: ChannelId,
    pub method: Method,
}

/// [`Sender`] over an unbounded crossbeam channel, for in-process peers.
///
/// Disconnecting makes every send fail with [`SenderError::Closed`] until
/// reconnected, which is how loss of the physical transport is simulated.
#[derive(Debug)]
pub struct QueueSender {
    tx: channel::Sender<OutboundFrame>,
    connected: AtomicBool,
    blocked: AtomicBool,
}

impl QueueSender {
    pub fn new() -> (Arc<Self>, Receiver<OutboundFrame>) {
        let (tx, rx) = channel::unbounded();
        let sender = Arc::new(Self {
            tx,
            connected: AtomicBool::new(true),
            blocked: AtomicBool::new(false),
        });
        (sender, rx)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }
}

impl Sender for QueueSender {
    fn send(&self, channel: ChannelId, method: &Method) -> Result<(), SenderError> {
        if !self.is_connected() {
            return Err(SenderError::Closed);
        }
        self.tx
            .send(OutboundFrame {
                channel,
                method: method.clone(),
            })
            .map_err(|_| SenderError::Closed)
    }

    fn flush(&self) -> Result<(), SenderError> {
        if !self.is_connected() {
            return Err(SenderError::Closed);
        }
        Ok(())
    }

    fn is_blocked_for_writing(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }
}
