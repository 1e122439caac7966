use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::{Effect, Transience};

use super::merge::{apply_env_overrides, merge_layers};
use super::{Config, ConfigLayer};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConfigError {
    pub fn transience(&self) -> Transience {
        match self {
            ConfigError::Read { .. } | ConfigError::Write { .. } => Transience::Unknown,
            ConfigError::Parse { .. } | ConfigError::Render(_) => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            ConfigError::Write { .. } => Effect::Unknown,
            _ => Effect::None,
        }
    }
}

pub fn config_path() -> PathBuf {
    crate::paths::config_dir().join("config.toml")
}

/// Reads one layer; a missing file is not an error.
pub fn load_layer(path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

pub fn load_user_config() -> Result<Option<ConfigLayer>, ConfigError> {
    load_layer(&config_path())
}

/// User config, then `explicit` (e.g. a `--config` flag), then the
/// environment.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let user = load_user_config()?;
    let explicit = match explicit {
        Some(path) => load_layer(path)?,
        None => None,
    };
    let mut config = merge_layers([user, explicit].into_iter().flatten());
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Like [`load`], but falls back to defaults (plus environment) on error.
pub fn load_or_default(explicit: Option<&Path>) -> Config {
    load(explicit).unwrap_or_else(|err| {
        tracing::warn!("config load failed, using defaults: {err}");
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        config
    })
}

pub fn write_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(write_err)?;
    let contents = toml::to_string_pretty(config)?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    fs::write(temp.path(), contents).map_err(write_err)?;
    temp.persist(path).map_err(|err| write_err(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogFormat, LogRotation};

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.session.command_limit = 8;
        config.session.no_replay = true;
        config.logging.stdout_format = LogFormat::Json;
        config.logging.file.rotation = LogRotation::Never;

        write_config(&path, &config).expect("write config");
        let loaded = load_layer(&path).expect("load").expect("present");
        let mut merged = Config::default();
        loaded.apply_to(&mut merged);

        assert_eq!(merged.session, config.session);
        assert_eq!(merged.logging.stdout_format, LogFormat::Json);
        assert_eq!(merged.logging.file.rotation, LogRotation::Never);
    }

    #[test]
    fn missing_layer_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(
            load_layer(&dir.path().join("absent.toml"))
                .expect("load")
                .is_none()
        );
    }

    #[test]
    fn malformed_layer_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[session]\ncommand_limit = \"lots\"\n").expect("write");
        let err = load_layer(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
        assert_eq!(err.transience(), Transience::Permanent);
    }
}
