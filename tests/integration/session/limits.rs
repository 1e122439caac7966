use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;

use amqp_session::{Command, CommandId, CommandKind, MessageTransfer, Method, SessionLimits};

use crate::fixtures::loopback::{Loopback, WAIT, is_flush};

fn transfer(size: usize) -> Method {
    Method::from(Command::transfer(MessageTransfer::new(
        "amq.direct",
        vec![7u8; size],
    )))
}

fn declare() -> Method {
    Method::from(Command::new(CommandKind::Invocation {
        name: "queue.declare".to_string(),
        args: Bytes::new(),
        expects_result: false,
    }))
}

#[test]
fn auto_sync_blocks_until_completed() {
    let limits = SessionLimits::default().with_sync_timeout(Duration::from_millis(150));
    let rig = Loopback::new(limits);
    let session = rig.open("auto-sync");
    session.set_auto_sync(true);
    rig.set_auto_complete(false);

    let err = session
        .invoke(transfer(8))
        .expect_err("no completion arrives");
    assert!(err.is_timeout());

    rig.set_auto_complete(true);
    session.invoke(transfer(8)).expect("completed on sync");
    assert_eq!(session.max_complete(), CommandId::new(1));
    assert_eq!(session.outbox_len(), 0);

    let sent = rig.commands();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|command| command.sync));
}

#[test]
fn byte_limit_blocks_dispatch_until_completion() {
    let rig = Loopback::new(SessionLimits::default().with_byte_limit(64));
    let session = rig.open("bytes");
    rig.set_auto_complete(false);

    session.invoke(transfer(64)).expect("fits");
    assert_eq!(session.outbox_len(), 1);

    let (done_tx, done_rx) = mpsc::channel();
    thread::scope(|scope| {
        scope.spawn(|| {
            done_tx.send(session.invoke(transfer(16))).expect("report");
        });

        assert!(done_rx.recv_timeout(Duration::from_millis(150)).is_err());
        assert_eq!(session.commands_out(), CommandId::new(1));

        rig.complete_through(session.channel(), CommandId::ZERO);
        let result = done_rx.recv_timeout(WAIT).expect("unblocked");
        assert!(result.is_ok());
    });
    assert_eq!(session.commands_out(), CommandId::new(2));
    assert_eq!(session.outbox_len(), 1);
}

#[test]
fn flush_requested_every_65536_commands() {
    let rig = Loopback::new(SessionLimits::default().with_command_limit(256));
    let session = rig.open("flush-interval");

    for _ in 0..=65_536u32 {
        session.invoke(declare()).expect("send");
    }
    assert_eq!(session.commands_out(), CommandId::new(65_537));

    let methods = rig.methods();
    let boundary = CommandId::new(65_536);
    let at = methods
        .iter()
        .position(|m| matches!(m, Method::Command(c) if c.id == Some(boundary)))
        .expect("boundary command sent");
    assert!(is_flush(&methods[at + 1]), "{:?}", methods[at + 1]);
}
