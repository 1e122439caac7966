use std::time::{Duration, Instant};

use amqp_session::core::{CreditUnit, UNLIMITED_CREDIT};
use amqp_session::transport::Credit;
use amqp_session::{Command, CommandKind, MessageTransfer, Method, SessionLimits};

use crate::fixtures::loopback::{Loopback, WAIT, eventually};

fn twenty_bytes() -> Method {
    Method::from(Command::transfer(MessageTransfer::new(
        "amq.fanout",
        vec![0u8; 20],
    )))
}

fn flow(unit: CreditUnit, value: u32) -> Command {
    Command::new(CommandKind::MessageFlow {
        destination: "amq.fanout".to_string(),
        unit,
        value,
    })
}

fn limits() -> SessionLimits {
    SessionLimits::default().with_flow_wait(Duration::from_millis(200), Duration::from_millis(50))
}

#[test]
fn five_messages_exhaust_five_by_hundred_credit() {
    let rig = Loopback::new(limits());
    let session = rig.open("credit");
    session.set_flow_control(true);
    session.add_credit(5, 100);

    for _ in 0..5 {
        session.invoke(twenty_bytes()).expect("admitted");
    }
    assert_eq!(session.credit().credit(), (Credit::Finite(0), Credit::Finite(0)));
    assert!(session.is_flow_blocked());

    let started = Instant::now();
    let err = session.invoke(twenty_bytes()).expect_err("no credit left");
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(rig.commands().iter().filter(|c| c.is_message_transfer()).count(), 5);
}

#[test]
fn peer_flow_commands_gate_transfers() {
    let rig = Loopback::new(limits());
    let session = rig.open("peer-flow");
    let channel = session.channel();

    rig.inject(
        channel,
        Command::new(CommandKind::MessageSetFlowMode {
            destination: "amq.fanout".to_string(),
        }),
    );
    assert!(eventually(WAIT, || session.is_flow_blocked()));

    rig.inject(channel, flow(CreditUnit::Message, 1));
    rig.inject(channel, flow(CreditUnit::Byte, UNLIMITED_CREDIT));
    assert!(eventually(WAIT, || !session.is_flow_blocked()));
    session.invoke(twenty_bytes()).expect("one message granted");
    assert!(session.is_flow_blocked());

    rig.inject(channel, flow(CreditUnit::Message, 10));
    assert!(eventually(WAIT, || !session.is_flow_blocked()));
    rig.inject(
        channel,
        Command::new(CommandKind::MessageStop {
            destination: "amq.fanout".to_string(),
        }),
    );
    assert!(eventually(WAIT, || session.is_flow_blocked()));
    assert!(session.invoke(twenty_bytes()).expect_err("stopped").is_timeout());

    session.set_flow_control(false);
    session.invoke(twenty_bytes()).expect("flow control off");
}
