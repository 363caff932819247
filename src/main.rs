use ackbench::config::{Config, MetricsConfig};
use ackbench::metrics::{JsonFileSink, MetricsReporter};
use ackbench::server::Server;
use ackbench::{client, shutdown};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ackbench={},warn", cli.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(path) = &cli.config {
        info!("Loading config from {}", path.display());
    }
    let mut config = Config::load(cli.config.as_deref()).context("failed to load config")?;
    cli.apply(&mut config);
    config.validate()?;

    let reporter = reporter(&config.metrics);
    let mut stop = shutdown::listen_for_ctrl_c();

    match cli.command {
        Command::Server(_) => {
            let server = Server::bind(config.server.clone())?;
            info!("Server started on {}, waiting for connections", server.local_addr());

            let snapshot = server
                .run(async move { shutdown::stop_requested(&mut stop).await })
                .await;
            reporter.report(&snapshot)?;
        }
        Command::Client(_) => {
            let snapshot = client::run(&config.client, stop).await?;
            reporter.report(&snapshot)?;
        }
    }

    Ok(())
}

fn reporter(config: &MetricsConfig) -> MetricsReporter {
    if config.persist {
        MetricsReporter::new(JsonFileSink::new(config.output_dir.clone()))
    } else {
        MetricsReporter::without_sink()
    }
}
