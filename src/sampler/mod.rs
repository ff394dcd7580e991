use crate::config::ConfigError;
use crate::sources::MetricSource;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

mod csv;
mod interval;

use interval::Interval;

const THREAD_PREFIX: &str = "sampler-";

/// Whether a thread with this name is a sampling thread. A panic there is
/// contained to its sampler and surfaces from [`Sampler::stop`].
pub fn is_sampling_thread(name: Option<&str>) -> bool {
    name.is_some_and(|name| name.starts_with(THREAD_PREFIX))
}

/// One timestamped metric record.
#[derive(Clone, Debug)]
pub struct Sample {
    captured_at: DateTime<Utc>,
    payload: String,
}

impl Sample {
    pub fn new(captured_at: DateTime<Utc>, payload: String) -> Self {
        Self {
            captured_at,
            payload,
        }
    }

    /// When the raw value was read from the source.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// The metric fields, comma separated.
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("failed to write {path:?}: {source}")]
    Dump { path: PathBuf, source: io::Error },
    #[error("the sampling thread for '{0}' panicked")]
    Panicked(&'static str),
}

/// Periodically samples one [`MetricSource`] on a dedicated thread while
/// started, and writes the collected samples to a csv file when stopped.
///
/// The sampling thread owns the source and the samples it collects. Both are
/// handed back when the thread is joined, so the buffer is only ever touched
/// by one thread at a time.
pub struct Sampler<S: MetricSource = Box<dyn MetricSource>> {
    name: &'static str,
    header: &'static str,
    path: PathBuf,
    interval: Duration,
    /// Written only by the controlling thread, polled by the sampling thread.
    running: Arc<AtomicBool>,
    state: State<S>,
}

enum State<S> {
    Idle(S),
    Running(JoinHandle<(S, Vec<Sample>)>),
    /// The sampling thread panicked and took the source with it.
    Failed,
}

impl<S: MetricSource> Sampler<S> {
    /// Creates a stopped sampler. The output directory is created if it does
    /// not exist.
    pub fn new(
        directory: &Path,
        prefix: &str,
        interval: Duration,
        source: S,
    ) -> Result<Self, ConfigError> {
        std::fs::create_dir_all(directory).map_err(|e| ConfigError::Directory {
            path: directory.to_path_buf(),
            source: e,
        })?;

        Ok(Self {
            name: source.name(),
            header: source.header(),
            path: csv::path(directory, prefix, source.filename()),
            interval,
            running: Arc::new(AtomicBool::new(false)),
            state: State::Idle(source),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The csv file this sampler dumps to.
    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running(_))
    }

    /// Launches the sampling thread and returns immediately. Does nothing if
    /// the sampler is already running.
    pub fn start(&mut self) {
        let source = match std::mem::replace(&mut self.state, State::Failed) {
            State::Idle(source) => source,
            State::Running(handle) => {
                self.state = State::Running(handle);
                debug!("'{}' sampler is already running", self.name);
                return;
            }
            State::Failed => {
                error!("'{}' sampler cannot be restarted after a failure", self.name);
                return;
            }
        };

        self.running.store(true, Ordering::Release);

        let running = self.running.clone();
        let interval = self.interval;

        let handle = std::thread::Builder::new()
            .name(format!("{THREAD_PREFIX}{}", self.name))
            .spawn(move || sample(source, interval, &running))
            .expect("failed to spawn sampling thread");

        self.state = State::Running(handle);

        debug!("'{}' sampler started", self.name);
    }

    /// Stops the sampling thread, waits for it to exit, then dumps every
    /// buffered sample to the csv file and clears the buffer. Does nothing if
    /// the sampler is not running.
    pub fn stop(&mut self) -> Result<(), SamplerError> {
        let handle = match std::mem::replace(&mut self.state, State::Failed) {
            State::Running(handle) => handle,
            other => {
                self.state = other;
                debug!("'{}' sampler is not running", self.name);
                return Ok(());
            }
        };

        self.running.store(false, Ordering::Release);

        // wake the thread if it is waiting for the next tick
        handle.thread().unpark();

        let samples = match handle.join() {
            Ok((source, samples)) => {
                self.state = State::Idle(source);
                samples
            }
            Err(_) => {
                return Err(SamplerError::Panicked(self.name));
            }
        };

        debug!("'{}' sampler stopped", self.name);

        self.dump(samples)
    }

    /// Writes the samples to the csv file, replacing its contents. The
    /// samples are consumed even if writing fails.
    fn dump(&self, samples: Vec<Sample>) -> Result<(), SamplerError> {
        csv::write(&self.path, self.header, &samples).map_err(|source| SamplerError::Dump {
            path: self.path.clone(),
            source,
        })?;

        info!("wrote {} samples to {:?}", samples.len(), self.path);

        Ok(())
    }
}

impl<S: MetricSource> Drop for Sampler<S> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("{e}");
        }
    }
}

/// The body of the sampling thread.
fn sample<S: MetricSource>(
    mut source: S,
    period: Duration,
    running: &AtomicBool,
) -> (S, Vec<Sample>) {
    let mut samples = Vec::new();
    let mut interval = Interval::new(Instant::now(), period);

    while running.load(Ordering::Acquire) {
        measure(&mut source, &mut samples);

        let deadline = interval.advance(Instant::now());

        if !Interval::wait_until(deadline, || !running.load(Ordering::Acquire)) {
            break;
        }
    }

    (source, samples)
}

/// Takes one sample. A source error skips this tick.
fn measure<S: MetricSource>(source: &mut S, samples: &mut Vec<Sample>) {
    match source.sample() {
        Ok(payload) => {
            let captured_at = Utc::now();
            trace!("'{}' sampled: {payload}", source.name());
            samples.push(Sample::new(captured_at, payload));
        }
        Err(e) => {
            warn!("'{}' skipped a sample: {e}", source.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::sources::SourceError;

    const INTERVAL: Duration = Duration::from_millis(10);

    /// Returns 0, 1, 2, ... and fails for the values `fail` selects.
    struct Counter {
        next: u64,
        fail: fn(u64) -> bool,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                next: 0,
                fail: |_| false,
            }
        }
    }

    impl MetricSource for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn header(&self) -> &'static str {
            "value"
        }

        fn filename(&self) -> &'static str {
            "counter.csv"
        }

        fn sample(&mut self) -> Result<String, SourceError> {
            let value = self.next;
            self.next += 1;

            if (self.fail)(value) {
                Err(SourceError::Parse(format!("refusing {value}")))
            } else {
                Ok(value.to_string())
            }
        }
    }

    struct Panics;

    impl MetricSource for Panics {
        fn name(&self) -> &'static str {
            "panics"
        }

        fn header(&self) -> &'static str {
            "value"
        }

        fn filename(&self) -> &'static str {
            "panics.csv"
        }

        fn sample(&mut self) -> Result<String, SourceError> {
            panic!("source exploded");
        }
    }

    /// Parses a dumped file into (timestamp, value) rows, checking the header.
    fn rows(path: &Path) -> Vec<(i64, u64)> {
        let content = std::fs::read_to_string(path).unwrap();
        let mut lines = content.lines();

        assert_eq!(lines.next(), Some("time[ms],value,"));

        lines
            .map(|line| {
                let (time, value) = line.split_once(',').unwrap();
                (time.parse().unwrap(), value.parse().unwrap())
            })
            .collect()
    }

    fn sampler(dir: &Path) -> Sampler<Counter> {
        Sampler::new(dir, "", INTERVAL, Counter::new()).unwrap()
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        let sampler = Sampler::new(&nested, "run", INTERVAL, Counter::new()).unwrap();

        assert!(nested.is_dir());
        assert_eq!(sampler.path(), nested.join("run_counter.csv"));
    }

    #[test]
    fn directory_creation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-directory");
        std::fs::write(&file, "").unwrap();

        let result = Sampler::new(&file.join("sub"), "", INTERVAL, Counter::new());

        assert!(matches!(result, Err(ConfigError::Directory { .. })));
    }

    #[test]
    fn start_stop_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let interval = Duration::from_millis(50);
        let ticks = 4;
        let mut sampler = Sampler::new(dir.path(), "", interval, Counter::new()).unwrap();

        sampler.start();
        assert!(sampler.is_running());
        std::thread::sleep(interval * ticks);
        sampler.stop().unwrap();

        assert!(!sampler.is_running());

        // one row per elapsed interval, plus the one taken at start
        let rows = rows(sampler.path());
        let ticks = ticks as usize;
        assert!(
            (ticks..=ticks + 2).contains(&rows.len()),
            "{} rows after {ticks} intervals",
            rows.len()
        );

        // capture ordered, nothing dropped
        for (i, (_, value)) in rows.iter().enumerate() {
            assert_eq!(*value, i as u64);
        }
        assert!(rows.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut sampler = sampler(dir.path());

        sampler.start();
        sampler.start();
        std::thread::sleep(Duration::from_millis(50));
        sampler.stop().unwrap();

        let rows = rows(sampler.path());
        let values: Vec<u64> = rows.iter().map(|(_, v)| *v).collect();
        let expected: Vec<u64> = (0..values.len() as u64).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut sampler = sampler(dir.path());

        sampler.stop().unwrap();
        sampler.stop().unwrap();

        assert!(!sampler.path().exists());
    }

    #[test]
    fn second_stop_keeps_the_dump() {
        let dir = tempfile::tempdir().unwrap();
        let mut sampler = sampler(dir.path());

        sampler.start();
        std::thread::sleep(Duration::from_millis(30));
        sampler.stop().unwrap();

        let first = std::fs::read_to_string(sampler.path()).unwrap();

        sampler.stop().unwrap();

        assert_eq!(std::fs::read_to_string(sampler.path()).unwrap(), first);
    }

    #[test]
    fn immediate_stop_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut sampler = sampler(dir.path());

        sampler.start();
        sampler.stop().unwrap();

        // whatever was captured before the thread saw the flag is kept
        let rows = rows(sampler.path());
        assert!(rows.len() <= 1);
    }

    #[test]
    fn restart_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut sampler = sampler(dir.path());

        sampler.start();
        std::thread::sleep(Duration::from_millis(50));
        sampler.stop().unwrap();
        let first = rows(sampler.path());
        assert!(!first.is_empty());

        sampler.start();
        std::thread::sleep(Duration::from_millis(50));
        sampler.stop().unwrap();
        let second = rows(sampler.path());
        assert!(!second.is_empty());

        // only the second cycle's samples, which continue the source's count
        let last_of_first = first.last().unwrap().1;
        assert!(second.iter().all(|(_, v)| *v > last_of_first));
        assert_eq!(second[0].1, last_of_first + 1);
    }

    #[test]
    fn source_errors_skip_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let source = Counter {
            next: 0,
            fail: |v| v % 2 == 1,
        };
        let mut sampler = Sampler::new(dir.path(), "", INTERVAL, source).unwrap();

        sampler.start();
        std::thread::sleep(Duration::from_millis(100));
        sampler.stop().unwrap();

        let rows = rows(sampler.path());
        assert!(rows.len() >= 2, "only {} rows", rows.len());
        assert!(rows.iter().all(|(_, v)| v % 2 == 0));
    }

    #[test]
    fn dump_failure_drains_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let mut sampler = sampler(dir.path());

        // a directory where the csv file should go makes the dump fail
        std::fs::create_dir(sampler.path()).unwrap();

        sampler.start();
        std::thread::sleep(Duration::from_millis(30));

        assert!(matches!(sampler.stop(), Err(SamplerError::Dump { .. })));
        assert!(!sampler.is_running());

        // the sampler is still usable once the path is writable again, and
        // the lost samples are not written by the next dump
        std::fs::remove_dir(sampler.path()).unwrap();
        sampler.start();
        std::thread::sleep(Duration::from_millis(30));
        sampler.stop().unwrap();
        let rows = rows(sampler.path());
        assert!(!rows.is_empty());
        assert_ne!(rows[0].1, 0);
    }

    #[test]
    fn panicking_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut sampler = Sampler::new(dir.path(), "", INTERVAL, Panics).unwrap();

        sampler.start();
        std::thread::sleep(Duration::from_millis(30));

        assert!(matches!(
            sampler.stop(),
            Err(SamplerError::Panicked("panics"))
        ));

        // a failed sampler stays stopped
        sampler.start();
        assert!(!sampler.is_running());
        sampler.stop().unwrap();
    }

    #[test]
    fn panic_is_contained_to_its_sampler() {
        let dir = tempfile::tempdir().unwrap();
        let mut broken = Sampler::new(dir.path(), "", INTERVAL, Panics).unwrap();
        let mut healthy = sampler(dir.path());

        broken.start();
        healthy.start();
        std::thread::sleep(Duration::from_millis(50));

        assert!(broken.stop().is_err());
        healthy.stop().unwrap();

        assert!(!rows(healthy.path()).is_empty());
        assert!(!dir.path().join("panics.csv").exists());
    }

    #[test]
    fn sampling_thread_names() {
        assert!(is_sampling_thread(Some("sampler-free")));
        assert!(is_sampling_thread(Some("sampler-proc_stat")));
        assert!(!is_sampling_thread(Some("main")));
        assert!(!is_sampling_thread(Some("measurer")));
        assert!(!is_sampling_thread(None));
    }

    #[test]
    fn spawned_threads_are_sampling_threads() {
        struct ThreadName(std::sync::mpsc::Sender<Option<String>>);

        impl MetricSource for ThreadName {
            fn name(&self) -> &'static str {
                "thread"
            }

            fn header(&self) -> &'static str {
                "value"
            }

            fn filename(&self) -> &'static str {
                "thread.csv"
            }

            fn sample(&mut self) -> Result<String, SourceError> {
                let name = std::thread::current().name().map(str::to_string);
                let _ = self.0.send(name);
                Ok("0".to_string())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let mut sampler = Sampler::new(dir.path(), "", INTERVAL, ThreadName(tx)).unwrap();

        sampler.start();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        sampler.stop().unwrap();

        assert!(is_sampling_thread(name.as_deref()));
    }

    #[test]
    fn drop_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut sampler = sampler(dir.path());
            sampler.start();
            std::thread::sleep(Duration::from_millis(30));
            sampler.path().to_path_buf()
        };

        assert!(!rows(&path).is_empty());
    }

    #[test]
    fn independent_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Sampler::new(dir.path(), "a", INTERVAL, Counter::new()).unwrap();
        let mut b = Sampler::new(dir.path(), "b", INTERVAL, Counter::new()).unwrap();

        a.start();
        b.start();
        std::thread::sleep(Duration::from_millis(50));
        a.stop().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        b.stop().unwrap();

        let a = rows(&dir.path().join("a_counter.csv"));
        let b = rows(&dir.path().join("b_counter.csv"));

        assert_eq!(a[0].1, 0);
        assert_eq!(b[0].1, 0);
        assert!(b.last().unwrap().0 >= a.last().unwrap().0);
    }

    #[test]
    fn stop_does_not_wait_for_a_full_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut sampler =
            Sampler::new(dir.path(), "", Duration::from_secs(60), Counter::new()).unwrap();

        sampler.start();
        std::thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        sampler.stop().unwrap();

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(rows(sampler.path()).len(), 1);
    }
}
