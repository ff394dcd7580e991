use backtrace::Backtrace;
use clap::{value_parser, ArgMatches, Command};
use linkme::distributed_slice;
use tracing::{debug, error, info, warn, Level};

use std::path::PathBuf;
use std::time::Duration;

mod config;
mod control;
mod sampler;
mod sources;

use config::{Config, ConfigError};
use control::Controller;
use sampler::Sampler;
use sources::SOURCES;

fn main() {
    // custom panic hook to terminate whole process after unwinding. A panic
    // in a sampling thread only takes down that sampler.
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{s}");
        eprintln!("{:?}", Backtrace::new());
        if !sampler::is_sampling_thread(std::thread::current().name()) {
            std::process::exit(101);
        }
    }));

    let matches = command().get_matches();

    let config = match resolve_config(&matches) {
        Ok(c) => c,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    // configure debug log
    let level = match matches.get_count("VERBOSE") {
        0 => config.log().level(),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();

    debug!(
        "directory: {:?} prefix: {:?} interval: {:?}",
        config.general().directory(),
        config.general().prefix(),
        config.general().interval()
    );

    let samplers = match build_samplers(&config) {
        Ok(s) => s,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    if samplers.is_empty() {
        warn!("no metric sources are enabled");
    }

    // initialize async runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(1)
        .thread_name("measurer")
        .build()
        .expect("failed to launch async runtime");

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::unbounded_channel();

    ctrlc::set_handler(move || {
        info!("received termination signal");
        let _ = shutdown_tx.send(());
    })
    .expect("failed to set ctrl-c handler");

    let controller = Controller::new(samplers);

    rt.block_on(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        controller.run(stdin, shutdown_rx).await;
    });

    // the blocking read of stdin may still be pending after a signal
    rt.shutdown_timeout(Duration::from_millis(100));
}

pub fn command() -> Command {
    Command::new(env!("CARGO_BIN_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_about(
            "Samples host cpu and memory counters while started and writes them to csv files \
            when stopped. Reads `start` and `stop` commands from standard input and exits on \
            end of input.",
        )
        .arg(
            clap::Arg::new("DIRECTORY")
                .long("directory")
                .short('d')
                .help("Directory the csv files are written to")
                .action(clap::ArgAction::Set)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            clap::Arg::new("PREFIX")
                .long("prefix")
                .short('f')
                .help("Prefix prepended to each csv file name")
                .action(clap::ArgAction::Set),
        )
        .arg(
            clap::Arg::new("INTERVAL")
                .long("interval")
                .short('i')
                .help("Sampling interval in milliseconds")
                .action(clap::ArgAction::Set)
                .value_parser(value_parser!(u64)),
        )
        .arg(
            clap::Arg::new("CONFIG")
                .long("config")
                .short('c')
                .help("Path to a TOML configuration file")
                .action(clap::ArgAction::Set)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            clap::Arg::new("VERBOSE")
                .long("verbose")
                .short('v')
                .help("Increase the verbosity")
                .action(clap::ArgAction::Count),
        )
}

/// Loads the config file, if any, and applies command line overrides on top.
fn resolve_config(matches: &ArgMatches) -> Result<Config, ConfigError> {
    let mut config = match matches.get_one::<PathBuf>("CONFIG") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    config.general_mut().apply(
        matches.get_one::<PathBuf>("DIRECTORY").cloned(),
        matches.get_one::<String>("PREFIX").cloned(),
        matches
            .get_one::<u64>("INTERVAL")
            .map(|ms| Duration::from_millis(*ms)),
    );

    config.check()?;

    Ok(config)
}

/// Initializes every enabled metric source and wraps each in a sampler.
fn build_samplers(config: &Config) -> Result<Vec<Sampler>, ConfigError> {
    let general = config.general();
    let mut samplers = Vec::new();

    for init in SOURCES {
        match init(config) {
            Ok(Some(source)) => {
                let sampler = Sampler::new(
                    general.directory(),
                    general.prefix(),
                    general.interval(),
                    source,
                )?;
                samplers.push(sampler);
            }
            Ok(None) => {}
            Err(e) => {
                error!("failed to initialize metric source: {e}");
            }
        }
    }

    Ok(samplers)
}
