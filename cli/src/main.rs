#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[clap(name = "heatcam", version, about)]
/// Explain image classifications with class activation heatmaps
struct Cli {
	#[command(subcommand)]
	command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_target(false)
		.init();

	commands::exec(cli.command).await
}
