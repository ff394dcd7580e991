use crate::config::Config;
use crate::distributed_slice;

use std::io;

mod free;
mod proc_stat;

#[cfg(test)]
pub use free::FreeMemory;
#[cfg(test)]
pub use proc_stat::ProcStat;

#[distributed_slice]
pub static SOURCES: [fn(config: &Config) -> SourceResult] = [..];

pub type SourceResult = anyhow::Result<Option<Box<dyn MetricSource>>>;

/// Error types for reading a single metric record
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read raw record: {0}")]
    Io(#[from] io::Error),
    #[error("malformed record: {0}")]
    Parse(String),
}

/// A producer of one normalized metric record per invocation.
///
/// The record is a comma separated list of the metric's fields, in the same
/// order as the columns declared by [`MetricSource::header`], without a
/// timestamp.
pub trait MetricSource: Send + 'static {
    /// Stable name used for configuration and logging.
    fn name(&self) -> &'static str;

    /// Comma separated csv column names of the record fields.
    fn header(&self) -> &'static str;

    /// Name of the csv file the records are dumped to.
    fn filename(&self) -> &'static str;

    /// Reads the current value of the metric.
    fn sample(&mut self) -> Result<String, SourceError>;
}

impl MetricSource for Box<dyn MetricSource> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn header(&self) -> &'static str {
        (**self).header()
    }

    fn filename(&self) -> &'static str {
        (**self).filename()
    }

    fn sample(&mut self) -> Result<String, SourceError> {
        (**self).sample()
    }
}

/// A provider of one raw text record, such as the output of a command or a
/// line of a pseudo-file.
pub trait RawSource: Send + 'static {
    fn read(&mut self) -> io::Result<String>;
}

impl<F> RawSource for F
where
    F: FnMut() -> io::Result<String> + Send + 'static,
{
    fn read(&mut self) -> io::Result<String> {
        self()
    }
}

/// Parses whitespace separated unsigned integers following a row label and
/// joins them with commas.
fn join_fields<'a>(
    fields: impl Iterator<Item = &'a str>,
    expected: usize,
) -> Result<String, SourceError> {
    let fields: Vec<&str> = fields.collect();

    if fields.len() != expected {
        return Err(SourceError::Parse(format!(
            "expected {expected} fields, found {}",
            fields.len()
        )));
    }

    if let Some(bad) = fields.iter().find(|f| f.parse::<u64>().is_err()) {
        return Err(SourceError::Parse(format!("not an unsigned integer: {bad:?}")));
    }

    Ok(fields.join(","))
}
