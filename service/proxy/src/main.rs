use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fwdproxy::acceptor;
use fwdproxy::blocklist::BlockList;
use fwdproxy::cache::Cache;
use fwdproxy::config::Config;
use fwdproxy::dialer::{Dial, Dialer};
use fwdproxy::engine::Engine;
use fwdproxy::logging::{ChannelLogSink, LogEvent, LogSink, TracingLogSink};

/// A forwarding HTTP/HTTPS proxy with request caching.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to a YAML config file. Missing file falls back to defaults.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Overrides the config file's listen port.
    #[arg(long)]
    port: Option<u16>,
}

fn init_logging() {
    let filter = {
        use tracing_subscriber::filter::LevelFilter;
        match std::env::var("RUST_LOG") {
            Ok(v) => match v.as_str() {
                "trace" => LevelFilter::TRACE,
                "debug" => LevelFilter::DEBUG,
                "info" => LevelFilter::INFO,
                "warn" => LevelFilter::WARN,
                "error" => LevelFilter::ERROR,
                "off" => LevelFilter::OFF,
                _ => LevelFilter::INFO,
            },
            Err(_) => LevelFilter::INFO,
        }
    };

    // Under systemd, journald already timestamps and indexes by unit, so
    // prefer it when reachable; fall back to plain fmt-to-stderr otherwise
    // (e.g. running from a terminal, or in a container with no journal).
    match tracing_journald::layer() {
        Ok(journald) => tracing_subscriber::registry().with(journald).with(filter).init(),
        Err(_) => tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter)
            .init(),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(&cli.config)?;
    config.apply_env_overrides();
    if let Some(port) = cli.port {
        config.listen_port = port;
    }
    let config = Arc::new(config);

    let blocklist = Arc::new(BlockList::new(config.blocklist.clone()));
    let cache = Arc::new(Cache::new(config.cache_capacity));
    let dialer: Arc<dyn Dial> = Arc::new(Dialer::from_system_config()?);
    let log: Arc<dyn LogSink> = Arc::new(ChannelLogSink::spawn(1024, TracingLogSink));

    let listener = acceptor::bind(config.listen_port).await?;
    log.publish(LogEvent::Startup { port: config.listen_port });

    let engine = Arc::new(Engine {
        blocklist,
        cache,
        dialer,
        log,
        config,
    });

    acceptor::serve(listener, engine).await;
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to create tokio runtime: {e:?}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("error: {e:?}");
            ExitCode::FAILURE
        }
    }
}
