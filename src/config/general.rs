use crate::config::*;

fn directory() -> PathBuf {
    PathBuf::from("tmp")
}

fn interval() -> Duration {
    Duration::from_millis(100)
}

#[derive(Deserialize)]
pub struct General {
    #[serde(default = "directory")]
    directory: PathBuf,
    #[serde(default)]
    prefix: String,
    #[serde(default = "interval")]
    #[serde(deserialize_with = "deserialize_duration")]
    interval: Duration,
}

impl Default for General {
    fn default() -> Self {
        Self {
            directory: directory(),
            prefix: String::new(),
            interval: interval(),
        }
    }
}

impl General {
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.interval < MIN_INTERVAL {
            return Err(ConfigError::Interval(format!(
                "{} is too short. Minimum interval is: 1ms",
                humantime::format_duration(self.interval)
            )));
        }

        Ok(())
    }

    /// Replaces settings with the ones given explicitly on the command line.
    pub fn apply(
        &mut self,
        directory: Option<PathBuf>,
        prefix: Option<String>,
        interval: Option<Duration>,
    ) {
        if let Some(directory) = directory {
            self.directory = directory;
        }

        if let Some(prefix) = prefix {
            self.prefix = prefix;
        }

        if let Some(interval) = interval {
            self.interval = interval;
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
