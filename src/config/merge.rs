use std::str::FromStr;

use super::{Config, ConfigLayer};

pub const ENV_COMMAND_LIMIT: &str = "AMQP_SESSION_COMMAND_LIMIT";
pub const ENV_BYTE_LIMIT: &str = "AMQP_SESSION_BYTE_LIMIT";
pub const ENV_SYNC_TIMEOUT_MS: &str = "AMQP_SESSION_SYNC_TIMEOUT_MS";
pub const ENV_FLOW_WAIT_FAILURE_MS: &str = "AMQP_SESSION_FLOW_WAIT_FAILURE_MS";
pub const ENV_FLOW_WAIT_NOTIFY_MS: &str = "AMQP_SESSION_FLOW_WAIT_NOTIFY_MS";
pub const ENV_AUTO_SYNC: &str = "AMQP_SESSION_AUTO_SYNC";
pub const ENV_NO_REPLAY: &str = "AMQP_SESSION_NO_REPLAY";

/// Applies layers over the defaults, later layers winning.
pub fn merge_layers(layers: impl IntoIterator<Item = ConfigLayer>) -> Config {
    let mut config = Config::default();
    for layer in layers {
        layer.apply_to(&mut config);
    }
    config
}

pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Applies overrides read through `lookup`, which maps a variable name to
/// its raw value.
pub fn apply_overrides_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let source = Source { lookup };
    let limits = &mut config.session;
    if let Some(value) = source.parse::<u32>(ENV_COMMAND_LIMIT) {
        limits.command_limit = value.max(1);
    }
    if let Some(value) = source.parse(ENV_BYTE_LIMIT) {
        limits.byte_limit = value;
    }
    if let Some(value) = source.parse(ENV_SYNC_TIMEOUT_MS) {
        limits.sync_operation_timeout_ms = value;
    }
    if let Some(value) = source.parse(ENV_FLOW_WAIT_FAILURE_MS) {
        limits.flow_control_wait_failure_timeout_ms = value;
    }
    if let Some(value) = source.parse::<u64>(ENV_FLOW_WAIT_NOTIFY_MS) {
        limits.flow_control_wait_notify_period_ms = value.max(1);
    }
    if let Some(value) = source.flag(ENV_AUTO_SYNC) {
        limits.auto_sync = value;
    }
    if let Some(value) = source.flag(ENV_NO_REPLAY) {
        limits.no_replay = value;
    }
}

struct Source<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Source<F> {
    fn value(&self, key: &str) -> Option<String> {
        let raw = (self.lookup)(key)?;
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn parse<T>(&self, key: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.value(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!("invalid {key}, ignoring: {err}");
                None
            }
        }
    }

    fn flag(&self, key: &str) -> Option<bool> {
        let raw = self.value(key)?;
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                tracing::warn!("invalid {key}, ignoring: {raw}");
                None
            }
        }
    }
}
