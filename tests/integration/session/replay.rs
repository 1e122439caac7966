use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use amqp_session::core::serial;
use amqp_session::{
    Command, CommandId, Control, MessageTransfer, Method, SessionError, SessionLimits,
    SessionState,
};

use crate::fixtures::loopback::{Loopback, WAIT, eventually, is_flush};

fn transfer(body: &str) -> Method {
    Method::from(Command::transfer(MessageTransfer::new(
        "amq.topic",
        body.as_bytes().to_vec(),
    )))
}

#[test]
fn resume_replays_uncompleted_in_order_marked_redelivered() {
    let rig = Loopback::new(SessionLimits::default());
    let session = rig.open("replay");
    rig.set_auto_complete(false);

    for n in 0..5 {
        session.invoke(transfer(&format!("m{n}"))).expect("send");
    }
    rig.complete_through(session.channel(), CommandId::new(1));
    assert!(eventually(WAIT, || session.max_complete() == CommandId::new(1)));
    assert_eq!(session.outbox_len(), 3);

    rig.drop_transport(&session);
    rig.clear_log();
    session.resume().expect("resume");
    assert!(rig.wait_for(|log| log.iter().any(is_flush)));

    let replayed = rig.commands();
    let ids: Vec<_> = replayed.iter().filter_map(|c| c.id).collect();
    assert_eq!(
        ids,
        vec![CommandId::new(2), CommandId::new(3), CommandId::new(4)]
    );
    assert!(replayed.iter().all(|command| {
        command
            .as_transfer()
            .is_some_and(MessageTransfer::is_redelivered)
    }));
    let bodies: Vec<_> = replayed
        .iter()
        .filter_map(Command::as_transfer)
        .map(|t| String::from_utf8_lossy(&t.body).into_owned())
        .collect();
    assert_eq!(bodies, ["m2", "m3", "m4"]);

    // Each replayed command is preceded by a command point naming its id,
    // and the replay ends with the next fresh id.
    let methods = rig.methods();
    for id in &ids {
        let at = methods
            .iter()
            .position(|m| matches!(m, Method::Command(c) if c.id == Some(*id)))
            .expect("replayed");
        assert!(matches!(
            &methods[at - 1],
            Method::Control(Control::SessionCommandPoint { command_id, .. }) if command_id == id
        ));
    }
    assert!(methods.iter().any(|m| matches!(
        m,
        Method::Control(Control::SessionCommandPoint { command_id, .. })
            if *command_id == CommandId::new(5)
    )));

    rig.set_auto_complete(true);
    session.sync().expect("sync");
    assert_eq!(session.outbox_len(), 0);
}

#[test]
fn unreliable_commands_are_not_replayed() {
    let rig = Loopback::new(SessionLimits::default());
    let session = rig.open("unreliable");
    rig.set_auto_complete(false);

    session.invoke(transfer("kept")).expect("send");
    let dropped = Command::transfer(MessageTransfer::new("amq.topic", b"gone".to_vec()))
        .with_unreliable(true);
    session.invoke(Method::from(dropped)).expect("send");
    assert_eq!(session.outbox_len(), 1);

    rig.drop_transport(&session);
    let while_detached = Command::transfer(MessageTransfer::new("amq.topic", b"lost".to_vec()))
        .with_unreliable(true);
    session
        .invoke(Method::from(while_detached))
        .expect("unreliable send while detached is dropped");
    assert_eq!(session.commands_out(), CommandId::new(2));

    rig.clear_log();
    session.resume().expect("resume");
    assert!(rig.wait_for(|log| log.iter().any(is_flush)));
    let replayed = rig.commands();
    assert_eq!(replayed.len(), 2);
    assert!(replayed[0].is_message_transfer());
    // Id 1 was never buffered, so a placeholder keeps the numbering intact.
    assert!(!replayed[1].is_message_transfer());
    assert_eq!(replayed[1].id, Some(CommandId::new(1)));
}

#[test]
fn dispatch_blocks_at_command_limit_until_completion() {
    let limits = SessionLimits::default().with_command_limit(3);
    let rig = Loopback::new(limits);
    let session = rig.open("backpressure");
    rig.set_auto_complete(false);

    for n in 0..3 {
        session.invoke(transfer(&format!("b{n}"))).expect("send");
    }

    let (done_tx, done_rx) = mpsc::channel();
    thread::scope(|scope| {
        scope.spawn(|| {
            let result = session.invoke(transfer("b3"));
            done_tx.send(result).expect("report");
        });

        assert!(done_rx.recv_timeout(Duration::from_millis(150)).is_err());
        assert_eq!(session.commands_out(), CommandId::new(3));
        assert!(rig.wait_for(|log| log.iter().any(is_flush)));

        rig.complete_through(session.channel(), CommandId::ZERO);
        let result = done_rx.recv_timeout(WAIT).expect("unblocked");
        assert!(result.is_ok());
    });
    assert_eq!(session.commands_out(), CommandId::new(4));
    assert!(serial::ge(session.max_complete(), CommandId::ZERO));
}

#[test]
fn sync_times_out_without_completion_and_failover_cancels() {
    let limits = SessionLimits::default().with_sync_timeout(Duration::from_millis(100));
    let rig = Loopback::new(limits);
    let session = rig.open("sync");
    rig.set_auto_complete(false);
    session.invoke(transfer("s0")).expect("send");

    let err = session.sync().expect_err("no completion arrives");
    assert!(err.is_timeout());

    let (done_tx, done_rx) = mpsc::channel();
    thread::scope(|scope| {
        scope.spawn(|| {
            let result = session.sync_timeout(WAIT);
            done_tx.send(result).expect("report");
        });
        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());
        rig.connection.notify_failover_required();
        let result = done_rx.recv_timeout(WAIT).expect("woken");
        assert!(matches!(result, Err(SessionError::Cancelled { .. })));
    });

    rig.drop_transport(&session);
    rig.set_auto_complete(true);
    rig.connection.resume_all().expect("resume");
    assert_eq!(session.state(), SessionState::Open);
    session.sync().expect("sync after resume");
}
