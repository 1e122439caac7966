#![allow(dead_code)]

//! In-process broker wired to a [`Connection`] through crossbeam channels.
//!
//! The peer answers attach, detach and timeout requests, and completes
//! commands on flush or sync while auto-completion is on. Every method it
//! receives is kept in a log the tests inspect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use amqp_session::core::DetachCode;
use amqp_session::transport::{InboundEvent, OutboundFrame, QueueSender};
use amqp_session::{
    ChannelId, Command, CommandId, Connection, Control, InboundFrame, Method, RangeSet, Session,
    SessionLimits, SessionName, SessionState,
};

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct PeerLog {
    methods: Vec<Method>,
    max_seen: Option<CommandId>,
}

struct Shared {
    log: Mutex<PeerLog>,
    changed: Condvar,
    auto_complete: AtomicBool,
    stop: AtomicBool,
}

pub struct Loopback {
    pub queue: Arc<QueueSender>,
    pub connection: Arc<Connection>,
    inbound: Option<Sender<InboundFrame>>,
    shared: Arc<Shared>,
    peer: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Loopback {
    pub fn new(limits: SessionLimits) -> Self {
        let (queue, outbound) = QueueSender::new();
        let (inbound_tx, inbound_rx) = channel::unbounded();
        let connection = Connection::new(queue.clone(), limits);
        let dispatcher = connection
            .spawn_dispatcher(inbound_rx)
            .expect("spawn dispatcher");
        let shared = Arc::new(Shared {
            log: Mutex::new(PeerLog::default()),
            changed: Condvar::new(),
            auto_complete: AtomicBool::new(true),
            stop: AtomicBool::new(false),
        });
        let peer = spawn_peer(outbound, inbound_tx.clone(), Arc::clone(&shared));
        Self {
            queue,
            connection,
            inbound: Some(inbound_tx),
            shared,
            peer: Some(peer),
            dispatcher: Some(dispatcher),
        }
    }

    pub fn open(&self, name: &str) -> Arc<Session> {
        self.connection
            .open_session(SessionName::from(name))
            .expect("open session")
    }

    pub fn set_auto_complete(&self, enabled: bool) {
        self.shared.auto_complete.store(enabled, Ordering::SeqCst);
    }

    /// Delivers `method` to the session on `channel` as if the peer sent it.
    pub fn inject(&self, channel: ChannelId, method: impl Into<Method>) {
        self.send_inbound(InboundFrame::method(channel, method));
    }

    /// Completes every outgoing id up to and including `upper`.
    pub fn complete_through(&self, channel: ChannelId, upper: CommandId) {
        self.inject(channel, completed_through(Some(upper)));
    }

    /// Loses the transport under `session` and waits for it to detach. The
    /// sender is reconnected afterwards so `resume` can proceed.
    pub fn drop_transport(&self, session: &Session) {
        self.queue.set_connected(false);
        self.send_inbound(InboundFrame {
            channel: session.channel(),
            event: InboundEvent::Closed,
        });
        assert!(
            await_state(session, SessionState::Detached, WAIT),
            "session never detached, state {}",
            session.state()
        );
        self.queue.set_connected(true);
    }

    pub fn clear_log(&self) {
        self.shared.log.lock().expect("peer log").methods.clear();
    }

    pub fn methods(&self) -> Vec<Method> {
        self.shared.log.lock().expect("peer log").methods.clone()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.methods()
            .into_iter()
            .filter_map(|method| match method {
                Method::Command(command) => Some(command),
                Method::Control(_) => None,
            })
            .collect()
    }

    pub fn controls(&self) -> Vec<Control> {
        self.methods()
            .into_iter()
            .filter_map(|method| match method {
                Method::Control(control) => Some(control),
                Method::Command(_) => None,
            })
            .collect()
    }

    /// Blocks until the peer log satisfies `predicate`.
    pub fn wait_for(&self, predicate: impl Fn(&[Method]) -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut log = self.shared.log.lock().expect("peer log");
        while !predicate(&log.methods) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            log = self
                .shared
                .changed
                .wait_timeout(log, deadline - now)
                .expect("peer log")
                .0;
        }
        true
    }

    fn send_inbound(&self, frame: InboundFrame) {
        if let Some(inbound) = &self.inbound {
            inbound.send(frame).expect("dispatcher gone");
        }
    }
}

impl Drop for Loopback {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(peer) = self.peer.take() {
            let _ = peer.join();
        }
        self.inbound.take();
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
    }
}

/// Polls until `condition` holds or `timeout` passes.
pub fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}

pub fn await_state(session: &Session, wanted: SessionState, timeout: Duration) -> bool {
    eventually(timeout, || session.state() == wanted)
}

pub fn completed_through(upper: Option<CommandId>) -> Control {
    let mut commands = RangeSet::new();
    if let Some(upper) = upper {
        commands.add(CommandId::ZERO, upper);
    }
    Control::SessionCompleted {
        commands,
        timely_reply: false,
    }
}

pub fn is_flush(method: &Method) -> bool {
    matches!(
        method,
        Method::Control(Control::SessionFlush {
            completed: true,
            ..
        })
    )
}

fn spawn_peer(
    outbound: Receiver<OutboundFrame>,
    inbound: Sender<InboundFrame>,
    shared: Arc<Shared>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("loopback-peer".to_string())
        .spawn(move || {
            let reply = |channel: ChannelId, control: Control| {
                let _ = inbound.send(InboundFrame::method(channel, control));
            };
            while !shared.stop.load(Ordering::SeqCst) {
                let OutboundFrame { channel, method } =
                    match outbound.recv_timeout(Duration::from_millis(10)) {
                        Ok(frame) => frame,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };
                let auto_complete = shared.auto_complete.load(Ordering::SeqCst);
                let mut complete = false;
                let max_seen = {
                    let mut log = shared.log.lock().expect("peer log");
                    if let Method::Command(command) = &method {
                        if let Some(id) = command.id {
                            log.max_seen = Some(id);
                        }
                        complete = command.sync;
                    }
                    log.methods.push(method.clone());
                    shared.changed.notify_all();
                    log.max_seen
                };
                match method {
                    Method::Control(Control::SessionAttach { name, .. }) => {
                        reply(channel, Control::SessionAttached { name });
                        reply(
                            channel,
                            Control::SessionCommandPoint {
                                command_id: CommandId::ZERO,
                                offset: 0,
                            },
                        );
                    }
                    Method::Control(Control::SessionFlush {
                        completed: true, ..
                    }) => complete = true,
                    Method::Control(Control::SessionRequestTimeout { timeout }) => {
                        reply(channel, Control::SessionTimeout { timeout });
                    }
                    Method::Control(Control::SessionDetach { name }) => {
                        reply(
                            channel,
                            Control::SessionDetached {
                                name,
                                code: DetachCode::Normal,
                            },
                        );
                    }
                    _ => {}
                }
                if complete && auto_complete {
                    reply(channel, completed_through(max_seen));
                }
            }
        })
        .expect("spawn loopback peer")
}
