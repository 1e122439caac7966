use std::fs;

use amqp_session::config::{self, LogFormat, LogRotation, merge_layers};
use amqp_session::{CommandId, Connection, SessionName};
use amqp_session::transport::QueueSender;

#[test]
fn layers_merge_in_order_and_feed_session_limits() {
    let dir = tempfile::tempdir().expect("tempdir");
    let user = dir.path().join("user.toml");
    let explicit = dir.path().join("explicit.toml");
    fs::write(
        &user,
        r#"
[logging]
stdout_format = "tree"

[logging.file]
enabled = true
rotation = "hourly"

[session]
command_limit = 16
auto_sync = true
"#,
    )
    .expect("write user layer");
    fs::write(
        &explicit,
        r#"
[session]
command_limit = 2
sync_operation_timeout_ms = 1500
"#,
    )
    .expect("write explicit layer");

    let layers = [&user, &explicit]
        .into_iter()
        .map(|path| config::load_layer(path).expect("load").expect("present"));
    let merged = merge_layers(layers);

    assert_eq!(merged.logging.stdout_format, LogFormat::Tree);
    assert!(merged.logging.file.enabled);
    assert_eq!(merged.logging.file.rotation, LogRotation::Hourly);
    assert_eq!(merged.logging.file.retention_max_files, Some(10));
    assert_eq!(merged.session.command_limit, 2);
    assert!(merged.session.auto_sync);
    assert_eq!(merged.session.sync_operation_timeout_ms, 1500);

    let (queue, _outbound) = QueueSender::new();
    let connection = Connection::new(queue, merged.session.clone());
    let session = connection
        .create_session(SessionName::from("configured"))
        .expect("create");
    assert_eq!(session.limits(), &merged.session);
    assert_eq!(session.commands_out(), CommandId::ZERO);
}

#[test]
fn written_config_loads_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("amqp-session").join("config.toml");
    let mut cfg = config::Config::default();
    cfg.session.byte_limit = 4096;
    cfg.session.no_replay = true;
    cfg.logging.stdout = false;

    config::write_config(&path, &cfg).expect("write");
    let loaded = config::load(Some(path.as_path())).expect("load");
    assert_eq!(loaded.session.byte_limit, 4096);
    assert!(loaded.session.no_replay);
    assert!(!loaded.logging.stdout);
}

#[test]
fn unreadable_layer_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.toml");
    fs::write(&path, "session = 12").expect("write");

    let err = config::load(Some(path.as_path())).expect_err("type mismatch");
    assert!(err.to_string().contains("broken.toml"));
    let cfg = config::load_or_default(Some(path.as_path()));
    assert_eq!(cfg.logging.stdout_format, LogFormat::Compact);
}
