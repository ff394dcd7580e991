use crate::sampler::Sampler;
use crate::sources::MetricSource;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info};

/// Commands accepted on the control input
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Unknown(String),
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        match s {
            "start" => Command::Start,
            "stop" => Command::Stop,
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// Relays control commands to every sampler.
pub struct Controller<S: MetricSource = Box<dyn MetricSource>> {
    samplers: Vec<Sampler<S>>,
}

impl<S: MetricSource> Controller<S> {
    pub fn new(samplers: Vec<Sampler<S>>) -> Self {
        Self { samplers }
    }

    pub fn start(&mut self) {
        for sampler in &mut self.samplers {
            sampler.start();
        }
    }

    /// Stops every sampler. A sampler that fails to stop cleanly doesn't
    /// prevent the others from being stopped.
    pub fn stop(&mut self) {
        for sampler in &mut self.samplers {
            if let Err(e) = sampler.stop() {
                error!("failed to stop '{}' sampler: {e}", sampler.name());
            }
        }
    }

    pub fn handle(&mut self, command: Command) {
        debug!("received command: {command:?}");

        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Unknown(token) => {
                debug!("ignoring unknown command: {token}");
            }
        }
    }

    /// Reads whitespace separated commands from `input` until it is exhausted,
    /// fails, or a shutdown is requested, then stops every sampler so that
    /// nothing collected is lost.
    ///
    /// Stopping joins threads and writes files, so commands are handled with
    /// [`tokio::task::block_in_place`]. This requires the multi-thread runtime.
    pub async fn run<R>(mut self, input: R, mut shutdown: UnboundedReceiver<()>)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();

        info!("ready, waiting for commands...");

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        tokio::task::block_in_place(|| {
                            for token in line.split_whitespace() {
                                self.handle(Command::from(token));
                            }
                        });
                    }
                    Ok(None) => {
                        info!("end of input");
                        break;
                    }
                    Err(e) => {
                        error!("failed to read command: {e}");
                        break;
                    }
                },
                Some(()) = shutdown.recv() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        tokio::task::block_in_place(|| self.stop());

        info!("finished");
    }
}
