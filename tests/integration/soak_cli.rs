use std::fs;

use predicates::prelude::*;

fn soak() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("session_soak");
    let config_dir = std::env::temp_dir().join("amqp-session-soak-tests");
    cmd.env("AMQP_SESSION_CONFIG_DIR", config_dir);
    cmd.env_remove("AMQP_SESSION_COMMAND_LIMIT");
    cmd
}

#[test]
fn soak_delivers_every_command_through_drops() {
    soak()
        .args(["--commands", "200", "--detach-rate", "0.05", "--seed", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("violations=0"))
        .stdout(predicate::str::contains("sent=200"));
}

#[test]
fn soak_honours_config_file_limits() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("soak.toml");
    fs::write(&path, "[session]\ncommand_limit = 4\n").expect("write");

    soak()
        .args(["--commands", "50", "--detach-rate", "0.1", "--seed", "3"])
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("violations=0"));
}

#[test]
fn soak_rejects_out_of_range_rate() {
    soak()
        .args(["--detach-rate", "1.5"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--detach-rate"));
}
