mod config;
mod error;
mod label;
mod lambda;
mod metrics;
mod scheduler;
mod server;
mod version;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::*;
use prometheus::Registry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use config::{Config, Overrides};
use lambda::LambdaTags;
use metrics::TagMetrics;
use scheduler::TagPoller;
use server::MetricsServer;
use version::VERSION;

#[derive(Parser)]
#[clap(name = "lambda-tags-exporter", about = "A Prometheus exporter for AWS Tags")]
struct CliArgs {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export AWS resource tags as metrics
    Export(ExportArgs),

    /// Print the version info
    Version,
}

#[derive(clap::Args)]
struct ExportArgs {
    /// interval of metric updates (seconds)
    #[clap(long = "interval", default_value = config::DEFAULT_INTERVAL)]
    interval: String,

    /// Lambda function name or ARN
    #[clap(long = "function-name")]
    function_name: Option<String>,

    /// Address to serve metrics on
    #[clap(long = "listen")]
    listen: Option<String>,

    #[clap(long = "config", default_value = config::CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    match args.command {
        Command::Version => println!("Version {VERSION}"),
        Command::Export(args) => {
            if let Err(err) = export(args).await {
                eprintln!("err: {err:#}");
                std::process::exit(1);
            }
        }
    }
}

async fn export(args: ExportArgs) -> Result<()> {
    let config = Config::load(
        &args.config,
        Overrides {
            function_name: args.function_name,
            listen_addr: args.listen,
            interval: Some(args.interval),
        },
    )?;

    _ = pretty_env_logger::formatted_timed_builder()
        .parse_filters(&config.log_level())
        .try_init();

    info!("Lambda tags exporter v{VERSION}");

    let resource = config.function_name().to_string();
    info!(
        "Polling tags of {resource} every {}s",
        config.interval().as_secs()
    );

    let registry = Registry::new();
    let metrics = Arc::new(TagMetrics::register(&registry, &resource)?);
    info!("Exporting {}", metrics.name());

    let source = Arc::new(LambdaTags::connect(config.endpoint_url()).await);

    let server = MetricsServer::bind(config.listen_addr(), registry)?;

    let shutdown = CancellationToken::new();
    tokio::task::spawn(shutdown_on_ctrl_c(shutdown.clone()));

    let poller = TagPoller::new(resource, source, metrics, config.interval());
    let poller_task = tokio::task::spawn(watch_poller(
        poller.start(shutdown.clone()),
        shutdown.clone(),
    ));

    let served = server.serve(shutdown.clone()).await;

    shutdown.cancel();
    let polled = poller_task.await?;

    served?;
    polled?;
    info!("Exporter stopped");
    Ok(())
}

// Stops the server once the poller task is gone, for whatever reason.
async fn watch_poller(task: JoinHandle<()>, shutdown: CancellationToken) -> Result<()> {
    let res = task.await;
    if let Err(ref err) = res {
        error!("Tag poller failed: {err}");
    }

    shutdown.cancel();
    res.map_err(|err| anyhow!("tag poller failed: {err}"))
}

async fn shutdown_on_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutting down");
            shutdown.cancel();
        }
        Err(err) => error!("Listening for ctrl-c: {err}"),
    }
}
