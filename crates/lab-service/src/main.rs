//! Main entry point for the lab dashboard service.
//!
//! Serves the dashboard and lab request endpoints when the `[api]` section is
//! enabled. Otherwise runs a single reconciliation pass and prints the
//! dashboard as JSON on stdout.

use clap::Parser;
use lab_config::Config;
use std::path::PathBuf;

mod apis;
mod factory_registry;
mod server;

use apis::dashboard::{get_dashboard, DashboardQuery};
use factory_registry::build_lab_from_config;

/// Command-line arguments for the lab dashboard service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	/// Patient name filter for the one-shot dashboard pass
	#[arg(short, long)]
	search: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	// Logs go to stderr so the one-shot pass keeps stdout clean.
	fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let config_path = args
		.config
		.to_str()
		.ok_or("Configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let services = build_lab_from_config(config.clone())?;

	match config.api.filter(|api| api.enabled) {
		Some(api_config) => {
			server::start_server(api_config, services).await?;
			tracing::info!("API server finished");
		},
		None => {
			tracing::info!("API disabled, running a single dashboard pass");
			let response = get_dashboard(
				&services.dashboard,
				DashboardQuery {
					search: args.search,
				},
			)
			.await?;
			println!("{}", serde_json::to_string_pretty(&response)?);
		},
	}

	Ok(())
}
