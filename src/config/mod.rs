//! Config loading and persistence.

mod load;
mod merge;
mod schema;

pub use load::{
    ConfigError, config_path, load, load_layer, load_or_default, load_user_config, write_config,
};
pub use merge::{
    ENV_AUTO_SYNC, ENV_BYTE_LIMIT, ENV_COMMAND_LIMIT, ENV_FLOW_WAIT_FAILURE_MS,
    ENV_FLOW_WAIT_NOTIFY_MS, ENV_NO_REPLAY, ENV_SYNC_TIMEOUT_MS, apply_env_overrides,
    apply_overrides_from, merge_layers,
};
pub use schema::{
    Config, ConfigLayer, FileLoggingConfig, FileLoggingConfigOverride, LimitsOverride, LogFormat,
    LogRotation, LoggingConfig, LoggingConfigOverride,
};
