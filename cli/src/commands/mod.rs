use anyhow::Result;
use clap::Subcommand;
use heatcam::{Config, ModelConfig};
use std::path::PathBuf;

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Start the HTTP server
	Serve {
		#[clap(flatten)]
		config: Config,
	},

	/// Render the heatmap of a single image to a PNG file
	Render {
		/// Image to explain
		input: PathBuf,

		/// Where to write the heatmap (defaults to `<input>_heatmap.png`)
		#[clap(short, long)]
		output: Option<PathBuf>,

		#[clap(flatten)]
		model: ModelConfig,
	},
}

mod render;
mod serve;

pub async fn exec(command: Command) -> Result<()> {
	match command {
		Command::Serve { config } => serve::handle(config).await,
		Command::Render { input, output, model } => {
			tokio::task::spawn_blocking(move || render::handle(&model, &input, output)).await?
		},
	}
}
