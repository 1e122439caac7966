//! Soak driver: pushes transfers through a session while randomly dropping
//! the transport, then checks the peer saw every id exactly once, in order.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use amqp_session::config::{self, Config};
use amqp_session::core::{DetachCode, RangeSet, serial};
use amqp_session::transport::{InboundEvent, OutboundFrame, QueueSender};
use amqp_session::{
    ChannelId, Command, CommandId, Connection, Control, InboundFrame, MessageTransfer, Method,
    SessionError, SessionName, SessionState, telemetry,
};
use clap::{ArgAction, Parser};
use crossbeam::channel::{self, Receiver, Sender};
use rand::{Rng, SeedableRng, rngs::StdRng};

#[derive(Parser, Debug)]
#[command(
    name = "session_soak",
    version,
    about = "Drive a session through random transport drops and verify delivery order."
)]
struct Args {
    /// Message transfers to send.
    #[arg(long, default_value_t = 2_000)]
    commands: u32,

    /// Probability of dropping the transport before each transfer.
    #[arg(long, default_value_t = 0.01)]
    detach_rate: f64,

    /// Seed for the drop schedule and payload sizes.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Outstanding command limit (overrides config).
    #[arg(long)]
    command_limit: Option<u32>,

    /// Extra config file layered over the user config.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Default)]
struct PeerReport {
    accepted: u32,
    duplicates: u32,
    violations: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.detach_rate) {
        eprintln!("--detach-rate must be within [0, 1]");
        return ExitCode::from(2);
    }

    let mut cfg = config::load_or_default(args.config.as_deref());
    if let Some(limit) = args.command_limit {
        cfg.session.command_limit = limit.max(1);
    }
    let _telemetry = telemetry::init(telemetry::TelemetryConfig::new(
        args.verbose,
        cfg.logging.clone(),
    ));

    match run(&args, cfg) {
        Ok((report, drops)) => {
            println!(
                "sent={} accepted={} duplicates={} drops={} violations={}",
                args.commands,
                report.accepted,
                report.duplicates,
                drops,
                report.violations.len()
            );
            for violation in &report.violations {
                eprintln!("violation: {violation}");
            }
            if report.violations.is_empty() && report.accepted >= args.commands {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "soak aborted");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, cfg: Config) -> Result<(PeerReport, u32), SessionError> {
    let (queue, outbound) = QueueSender::new();
    let (inbound_tx, inbound_rx) = channel::unbounded();
    let connection = Connection::new(queue.clone(), cfg.session);
    let dispatcher = connection
        .spawn_dispatcher(inbound_rx)
        .map_err(|err| SessionError::protocol_violation(format!("spawn dispatcher: {err}")))?;
    let peer = spawn_peer(outbound, inbound_tx.clone());

    let session = connection.open_session(SessionName::random())?;
    let channel = session.channel();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut drops = 0;
    let started = Instant::now();

    for n in 0..args.commands {
        if rng.random_bool(args.detach_rate) {
            drops += 1;
            tracing::info!(sent = n, "dropping transport");
            queue.set_connected(false);
            inbound_tx
                .send(InboundFrame {
                    channel,
                    event: InboundEvent::Closed,
                })
                .map_err(|_| SessionError::protocol_violation("dispatcher stopped"))?;
            await_state(&session, SessionState::Detached)?;
            queue.set_connected(true);
            session.resume()?;
        }
        let size = rng.random_range(1..=256usize);
        let body = vec![(n % 251) as u8; size];
        let transfer = MessageTransfer::new("soak", body);
        session.invoke(Method::from(Command::transfer(transfer)))?;
    }
    session.sync()?;
    tracing::info!(
        commands = args.commands,
        drops,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "all transfers completed"
    );
    session.close()?;

    let report = peer
        .join()
        .map_err(|_| SessionError::protocol_violation("peer thread panicked"))?;
    drop(inbound_tx);
    drop(session);
    drop(connection);
    if dispatcher.join().is_err() {
        tracing::warn!("dispatcher thread panicked");
    }
    Ok((report, drops))
}

fn await_state(
    session: &amqp_session::Session,
    wanted: SessionState,
) -> Result<(), SessionError> {
    let deadline = Instant::now() + session.limits().sync_operation_timeout();
    while session.state() != wanted {
        if Instant::now() >= deadline {
            return Err(SessionError::Timeout {
                operation: "await state",
                waited: session.limits().sync_operation_timeout(),
            });
        }
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

/// In-process broker: numbers commands from command points, completes
/// everything it accepts, and records ordering violations.
fn spawn_peer(
    outbound: Receiver<OutboundFrame>,
    inbound: Sender<InboundFrame>,
) -> JoinHandle<PeerReport> {
    thread::spawn(move || {
        let mut report = PeerReport::default();
        let mut next = CommandId::ZERO;
        let mut max_accepted: Option<CommandId> = None;
        let reply = |channel: ChannelId, control: Control| {
            if let Err(err) = inbound.send(InboundFrame::method(channel, control)) {
                tracing::warn!(channel = %channel, error = %err, "peer reply dropped");
            }
        };
        let completed = |max: Option<CommandId>| {
            let mut commands = RangeSet::new();
            if let Some(max) = max {
                commands.add(CommandId::ZERO, max);
            }
            Control::SessionCompleted {
                commands,
                timely_reply: false,
            }
        };

        while let Ok(OutboundFrame { channel, method }) = outbound.recv() {
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
                Method::Control(Control::SessionCommandPoint { command_id, .. }) => {
                    next = command_id;
                }
                Method::Control(Control::SessionFlush { completed: true, .. }) => {
                    reply(channel, completed(max_accepted));
                }
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
                    break;
                }
                Method::Control(_) => {}
                Method::Command(command) => {
                    let id = next;
                    next = id.next();
                    if command.id != Some(id) {
                        report.violations.push(format!(
                            "command numbered {:?} arrived at position {id}",
                            command.id
                        ));
                    }
                    match max_accepted {
                        Some(max) if serial::le(id, max) => report.duplicates += 1,
                        Some(max) if id != max.next() => {
                            report.violations.push(format!("gap: {id} after {max}"));
                        }
                        None if id != CommandId::ZERO => {
                            report.violations.push(format!("first command was {id}"));
                        }
                        _ => {
                            max_accepted = Some(id);
                            report.accepted += 1;
                        }
                    }
                    if command.sync || id.get() % 8 == 0 {
                        reply(channel, completed(max_accepted));
                    }
                }
            }
        }
        report
    })
}
