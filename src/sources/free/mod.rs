const NAME: &str = "free";

use crate::config::Config;
use crate::distributed_slice;
use crate::sources::*;

use std::process::Command;

#[distributed_slice(SOURCES)]
fn init(config: &Config) -> SourceResult {
    if !config.enabled(NAME) {
        return Ok(None);
    }

    Ok(Some(Box::new(FreeMemory::new(FreeCommand))))
}

/// Memory statistics as reported by the `free` utility, in KiB.
pub struct FreeMemory<R = FreeCommand> {
    raw: R,
}

/// Runs `free` and returns its standard output.
pub struct FreeCommand;

impl<R: RawSource> FreeMemory<R> {
    pub fn new(raw: R) -> Self {
        Self { raw }
    }

    /// Converts the output of `free` into a comma separated record:
    ///
    /// ```text
    ///               total        used        free      shared  buff/cache   available
    /// Mem:       32789156     3483060    24676784       38796     4629312    28879052
    /// Swap:       2097148           0     2097148
    /// ```
    ///
    /// becomes `32789156,3483060,24676784,38796,4629312,28879052`.
    pub fn normalize(output: &str) -> Result<String, SourceError> {
        // skip the header line
        let line = output
            .lines()
            .nth(1)
            .ok_or_else(|| SourceError::Parse("expected a header and a data line".into()))?;

        let mut parts = line.split_whitespace();

        // drop the row label, normally `Mem:`
        match parts.next() {
            Some(label) if label.parse::<u64>().is_err() => {}
            _ => {
                return Err(SourceError::Parse(format!(
                    "missing row label in: {line:?}"
                )))
            }
        }

        join_fields(parts, 6)
    }
}

impl<R: RawSource> MetricSource for FreeMemory<R> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn header(&self) -> &'static str {
        "total[KiB],used[KiB],free[KiB],shared[KiB],buff/cache[KiB],available[KiB]"
    }

    fn filename(&self) -> &'static str {
        "free.csv"
    }

    fn sample(&mut self) -> Result<String, SourceError> {
        let output = self.raw.read()?;
        Self::normalize(&output)
    }
}

impl RawSource for FreeCommand {
    fn read(&mut self) -> std::io::Result<String> {
        // pin the locale so the layout of the report doesn't change
        let output = Command::new("free").env("LC_ALL", "C").output()?;

        if !output.status.success() {
            return Err(std::io::Error::other(format!(
                "free exited with {}",
                output.status
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
