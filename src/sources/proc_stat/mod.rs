const NAME: &str = "proc_stat";

use crate::config::Config;
use crate::distributed_slice;
use crate::sources::*;

use std::fs::File;
use std::io::{BufRead, BufReader, Seek};

#[distributed_slice(SOURCES)]
fn init(config: &Config) -> SourceResult {
    if !config.enabled(NAME) {
        return Ok(None);
    }

    Ok(Some(Box::new(ProcStat::new(ProcStatFile::default()))))
}

/// Aggregate cpu time from the first line of `/proc/stat`, in kernel clock
/// ticks (USER_HZ).
///
/// See `man 5 proc` for the meaning of each field.
pub struct ProcStat<R = ProcStatFile> {
    raw: R,
}

/// Reads the first line of `/proc/stat`.
///
/// The file is opened on first use and rewound for every later read.
#[derive(Default)]
pub struct ProcStatFile {
    file: Option<BufReader<File>>,
}

impl<R: RawSource> ProcStat<R> {
    pub fn new(raw: R) -> Self {
        Self { raw }
    }

    /// Converts the aggregate cpu line into a comma separated record:
    ///
    /// `cpu  228602 66 124305 99146269 4121 0 1163 0 0 0` becomes
    /// `228602,66,124305,99146269,4121,0,1163,0,0,0`.
    pub fn normalize(line: &str) -> Result<String, SourceError> {
        let mut parts = line.split_whitespace();

        if parts.next() != Some("cpu") {
            return Err(SourceError::Parse(format!(
                "expected the aggregate cpu line, found: {line:?}"
            )));
        }

        join_fields(parts, 10)
    }
}

impl<R: RawSource> MetricSource for ProcStat<R> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn header(&self) -> &'static str {
        "user,nice,system,idle,iowait,irq,softirq,steal,guest,guest_nice"
    }

    fn filename(&self) -> &'static str {
        "proc_stat.csv"
    }

    fn sample(&mut self) -> Result<String, SourceError> {
        let line = self.raw.read()?;
        Self::normalize(&line)
    }
}

impl ProcStatFile {
    const STAT: &'static str = "/proc/stat";
}

impl RawSource for ProcStatFile {
    fn read(&mut self) -> std::io::Result<String> {
        // a file that failed to rewind is dropped and reopened on the next read
        let file = match self.file.take() {
            Some(mut file) => {
                file.rewind()?;
                file
            }
            None => File::open(Self::STAT).map(BufReader::new)?,
        };
        let file = self.file.insert(file);

        let mut line = String::new();
        file.read_line(&mut line)?;

        Ok(line)
    }
}
