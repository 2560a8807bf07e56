use anyhow::Result;
use heatcam::Config;

pub async fn handle(config: Config) -> Result<()> {
	tracing::info!(
		"Serving {} with weights from {}",
		config.model.model_path.display(),
		config.model.weights_path.display()
	);

	heatcam::start(config).await
}
