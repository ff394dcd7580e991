use serde::{Deserialize, Deserializer};
use tracing::debug;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod general;
mod log;
mod source;

pub use general::General;
use log::Log;
use source::Source as SourceConfig;

/// The shortest sampling interval that is accepted.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

fn enabled() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to open config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid sampling interval: {0}")]
    Interval(String),
    #[error("unable to create output directory {path:?}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    general: General,
    #[serde(default)]
    log: Log,
    #[serde(default)]
    defaults: SourceConfig,
    #[serde(default)]
    sources: HashMap<String, SourceConfig>,
}

impl Config {
    pub fn load(path: &dyn AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        debug!("loading config: {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        self.general.check()
    }

    pub fn general(&self) -> &General {
        &self.general
    }

    pub fn general_mut(&mut self) -> &mut General {
        &mut self.general
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn enabled(&self, name: &str) -> bool {
        let enabled = self
            .sources
            .get(name)
            .and_then(|v| v.enabled())
            .unwrap_or(self.defaults.enabled().unwrap_or(enabled()));

        if enabled {
            debug!("'{name}' source is enabled");
        } else {
            debug!("'{name}' source is not enabled");
        }

        enabled
    }
}

/// Deserializes a human readable duration such as `100ms` or `1s`.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;

    value
        .parse::<humantime::Duration>()
        .map(Into::into)
        .map_err(serde::de::Error::custom)
}
