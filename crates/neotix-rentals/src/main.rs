use anyhow::Result;
use clap::Parser;
use neotix_rentals::config::RentalsConfig;
use neotix_rentals::server::RentalsServer;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "neotix-rentals", version)]
#[command(about = "GPU rental lifecycle and billing service")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a sample configuration and exit
    #[arg(long)]
    gen_config: bool,

    /// Validate configuration and component wiring without serving
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "neotix_rentals=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.gen_config {
        println!("{}", toml::to_string_pretty(&RentalsConfig::default())?);
        return Ok(());
    }

    let config = RentalsConfig::load(cli.config)?;
    info!(
        listen = %config.listen_address,
        region = %config.provisioner.region,
        "starting Neotix rentals service"
    );

    let server = RentalsServer::new(config).await?;

    if cli.dry_run {
        info!("configuration validated, exiting (dry run)");
        return Ok(());
    }

    server.run_migrations().await?;
    info!("database migrations applied");

    server.serve(shutdown_signal()).await?;
    info!("rentals service stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        result = signal::ctrl_c() => {
            result.expect("failed to install SIGINT handler");
        }
        _ = sigterm.recv() => {}
    }
}
