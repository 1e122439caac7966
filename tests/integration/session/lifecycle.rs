use bytes::Bytes;

use amqp_session::core::{CommandKind, ResultValue, serial};
use amqp_session::{
    Command, CommandId, Control, ExecutionErrorCode, ExecutionException, MessageTransfer, Method,
    SessionError, SessionLimits, SessionState,
};

use crate::fixtures::loopback::{Loopback, WAIT, await_state, eventually, is_flush};

fn transfer(n: u8) -> Command {
    Command::transfer(MessageTransfer::new("amq.direct", vec![n; 16]))
}

fn query(name: &str) -> Command {
    Command::new(CommandKind::Invocation {
        name: name.to_string(),
        args: Bytes::new(),
        expects_result: true,
    })
}

#[test]
fn open_send_process_detach_resume() {
    let rig = Loopback::new(SessionLimits::default());
    let session = rig.open("e2e");
    assert_eq!(session.state(), SessionState::Open);

    for n in 0..10 {
        session.invoke(Method::from(transfer(n))).expect("send");
    }
    session.sync().expect("sync");
    assert!(serial::ge(session.max_complete(), CommandId::new(9)));
    assert_eq!(session.outbox_len(), 0);

    let sent: Vec<_> = rig
        .commands()
        .into_iter()
        .filter(Command::is_message_transfer)
        .filter_map(|c| c.id)
        .collect();
    assert_eq!(sent, (0..10).map(CommandId::new).collect::<Vec<_>>());

    // Peer-to-session direction: ten transfers, the last asking for sync.
    let channel = session.channel();
    for n in 0..10 {
        rig.inject(channel, transfer(n).with_sync(n == 9));
    }
    assert!(eventually(WAIT, || session.commands_in() == CommandId::new(10)));
    session
        .processed(CommandId::ZERO, CommandId::new(9))
        .expect("processed");
    assert!(rig.wait_for(|log| {
        log.iter().any(|method| {
            matches!(
                method,
                Method::Control(Control::SessionCompleted { commands, .. })
                    if commands.includes(CommandId::ZERO) && commands.includes(CommandId::new(9))
            )
        })
    }));

    let commands_out = session.commands_out();
    rig.drop_transport(&session);
    assert_eq!(session.state(), SessionState::Detached);
    rig.clear_log();

    session.resume().expect("resume");
    assert_eq!(session.state(), SessionState::Open);
    assert!(rig.wait_for(|log| log.iter().any(is_flush)));
    assert!(rig.commands().is_empty(), "nothing left to replay");
    let controls = rig.controls();
    assert!(matches!(controls.first(), Some(Control::SessionAttach { .. })));
    assert!(controls.iter().any(|control| matches!(
        control,
        Control::SessionCommandPoint { command_id, .. } if *command_id == commands_out
    )));

    session.invoke(Method::from(transfer(10))).expect("send after resume");
    session.sync().expect("sync after resume");
}

#[test]
fn close_breaks_results_still_pending() {
    let rig = Loopback::new(SessionLimits::default());
    let session = rig.open("results");
    let channel = session.channel();

    let answered = session.invoke_with_result(query("queue.query")).expect("invoke");
    let pending = session
        .invoke_with_result(query("exchange.query"))
        .expect("invoke");
    rig.inject(
        channel,
        Command::new(CommandKind::ExecutionResult {
            command_id: answered.id(),
            value: ResultValue {
                struct_code: 7,
                body: Bytes::from_static(b"queue-info"),
            },
        }),
    );
    let value = answered.get_timeout(WAIT).expect("result");
    assert_eq!(value.struct_code, 7);
    assert_eq!(value.body, Bytes::from_static(b"queue-info"));
    assert!(!pending.is_done());

    session.close().expect("close");
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(
        pending.get_timeout(WAIT),
        Err(SessionError::Closed)
    ));
    assert!(rig.connection.session(channel).is_none());
    assert!(matches!(
        session.invoke(Method::from(transfer(0))),
        Err(SessionError::Closed)
    ));
}

#[test]
fn peer_exception_closes_and_fails_waiters() {
    let rig = Loopback::new(SessionLimits::default());
    let session = rig.open("exception");
    let pending = session.invoke_with_result(query("queue.query")).expect("invoke");

    let exception = ExecutionException::new(ExecutionErrorCode::NotFound, "no such queue")
        .with_command(pending.id());
    rig.inject(
        session.channel(),
        Command::new(CommandKind::ExecutionException(exception.clone())),
    );

    assert!(await_state(&session, SessionState::Closed, WAIT));
    match pending.get_timeout(WAIT) {
        Err(SessionError::PeerExecution(got)) => assert_eq!(got, exception),
        other => panic!("expected peer execution error, got {other:?}"),
    }
    assert_eq!(session.execution_exception(), Some(exception));
    assert!(matches!(
        session.invoke(Method::from(transfer(1))),
        Err(SessionError::PeerExecution(_))
    ));
}

#[test]
fn resume_requires_detach_and_failed_open_is_forgotten() {
    let rig = Loopback::new(SessionLimits::default());
    let session = rig.open("resume-open");
    assert!(matches!(
        session.resume(),
        Err(SessionError::InvalidState {
            operation: "resume",
            ..
        })
    ));
    rig.queue.set_connected(false);
    let second = rig
        .connection
        .open_session(amqp_session::SessionName::from("refused"));
    assert!(second.is_err());
    assert_eq!(rig.connection.sessions().len(), 1);
}
