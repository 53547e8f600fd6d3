use anyhow::{Context, Result};
use booking_config::ConfigLoader;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod implementations;

#[derive(Parser)]
#[command(name = "lensbook")]
#[command(about = "Photography booking service", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/local.toml")]
	config: PathBuf,

	#[arg(long, env = "LENSBOOK_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the booking service
	Start,
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	match cli.command {
		Some(Commands::Start) | None => start_service(cli).await,
		Some(Commands::Validate) => validate_config(cli).await,
	}
}

async fn start_service(cli: Cli) -> Result<()> {
	info!("Starting booking service");
	info!("Loading configuration from: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration loaded successfully");
	info!("Service name: {}", config.service.name);
	info!("HTTP port: {}", config.api.port);

	let engine = implementations::engine_builder(config)
		.build()
		.context("Failed to build booking engine")?;
	let engine = Arc::new(engine);

	// HTTP API runs alongside the engine loop.
	let api_handle = tokio::spawn(api::serve(engine.clone()));

	info!("Booking service started successfully");

	// The engine loop owns shutdown: it returns after ctrl-c.
	let result = engine.run().await;

	api_handle.abort();
	info!("Booking service stopped");
	result.context("Engine terminated with an error")
}

async fn validate_config(cli: Cli) -> Result<()> {
	info!("Validating configuration file: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration is valid");
	info!("Service name: {}", config.service.name);
	info!("Storage backend: {}", config.storage.backend);
	match &config.geo.provider {
		Some(provider) => info!("Geo provider: {}", provider),
		None => info!("Geo provider: none, distances fall back to great-circle"),
	}
	info!("Directory providers:");
	for provider in &config.directory.providers {
		info!("  {} ({})", provider.id, provider.display_name);
	}

	Ok(())
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}
