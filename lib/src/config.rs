use anyhow::{Context, Result};
use heatcam_core::{ActivationModel, ClassifierHead, ExplainOptions, Explainer, PeakOptions, RenderOptions};
use std::{net::IpAddr, path::PathBuf};

use crate::{model::TractModel, DynExplainer};

/// Server settings.
#[derive(Debug, Clone, clap::Args)]
pub struct Config {
	/// Address to listen on
	#[clap(long, env = "HEATCAM_HOST", default_value = "0.0.0.0")]
	pub host: IpAddr,

	/// Port to listen on
	#[clap(short, long, env = "PORT", default_value_t = 5000)]
	pub port: u16,

	/// Maximum number of uploads waiting for the model
	#[clap(long, env = "QUEUE_SIZE", default_value_t = 8)]
	pub queue_size: usize,

	/// Maximum accepted request body size, in bytes
	#[clap(long, env = "MAX_UPLOAD_BYTES", default_value_t = 10 * 1024 * 1024)]
	pub max_upload_bytes: usize,

	#[clap(flatten)]
	pub model: ModelConfig,
}

/// Where the model lives and how its output is turned into a heatmap.
#[derive(Debug, Clone, clap::Args)]
pub struct ModelConfig {
	/// ONNX classifier exported with NHWC inputs
	#[clap(long, env = "MODEL_PATH", default_value = "model.onnx")]
	pub model_path: PathBuf,

	/// Safetensors file with the classifier's final dense kernel
	#[clap(long, env = "WEIGHTS_PATH", default_value = "weights/classifier.safetensors")]
	pub weights_path: PathBuf,

	/// Name of the kernel tensor inside the weights file
	#[clap(long, env = "WEIGHTS_TENSOR", default_value = "kernel")]
	pub weights_tensor: String,

	/// Output or node name of the last convolutional layer
	#[clap(long, env = "CONV_OUTPUT", default_value = "block5_conv3")]
	pub conv_output: String,

	/// Output or node name of the class scores (defaults to the model's first output)
	#[clap(long, env = "LOGITS_OUTPUT")]
	pub logits_output: Option<String>,

	/// Side of the square images are resized to
	#[clap(long, env = "IMAGE_SIZE", default_value_t = 224)]
	pub image_size: u32,

	/// Keep heat on pixels whose red channel is zero
	#[clap(long, env = "NO_DARK_MASK")]
	pub no_dark_mask: bool,

	/// Maximum number of highlighted peaks
	#[clap(long, default_value_t = 5)]
	pub num_peaks: usize,

	/// Minimum distance between peaks, in pixels
	#[clap(long, default_value_t = 10)]
	pub min_distance: usize,

	/// Peaks must exceed this fraction of the heatmap's maximum
	#[clap(long, default_value_t = 0.5)]
	pub threshold_rel: f32,

	/// Peaks must also exceed this absolute value (defaults to the heatmap's minimum)
	#[clap(long)]
	pub threshold_abs: Option<f32>,

	/// Side of the box drawn around each peak, in pixels
	#[clap(long, default_value_t = 50)]
	pub box_size: u32,

	/// Opacity of the heatmap overlay
	#[clap(long, default_value_t = 0.3)]
	pub overlay_alpha: f32,

	/// Output pixels per input pixel
	#[clap(long, default_value_t = 2)]
	pub scale: u32,
}

impl ModelConfig {
	pub fn explain_options(&self) -> ExplainOptions {
		ExplainOptions {
			image_size: self.image_size,
			mask_dark_pixels: !self.no_dark_mask,
			peaks: PeakOptions {
				num_peaks: self.num_peaks,
				min_distance: self.min_distance,
				threshold_rel: self.threshold_rel,
				threshold_abs: self.threshold_abs,
				..PeakOptions::default()
			},
			render: RenderOptions {
				alpha: self.overlay_alpha.clamp(0.0, 1.0),
				scale: self.scale,
				box_size: self.box_size,
				..RenderOptions::default()
			},
		}
	}

	/// Load the model and its classifier weights.
	///
	/// # Errors
	///
	/// Returns an error if either file is missing or malformed.
	pub fn load(&self) -> Result<DynExplainer> {
		let model = TractModel::load(
			&self.model_path,
			self.image_size,
			self.logits_output.as_deref(),
			&self.conv_output,
		)?;

		let weights = std::fs::read(&self.weights_path)
			.with_context(|| format!("Failed to read classifier weights at {}", self.weights_path.display()))?;
		let head = ClassifierHead::from_safetensors(&weights, &self.weights_tensor)?;
		tracing::info!(
			"Loaded classifier head with {} channels and {} classes",
			head.channels(),
			head.classes()
		);

		Ok(Explainer::new(
			Box::new(model) as Box<dyn ActivationModel>,
			head,
			self.explain_options(),
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::{CommandFactory, Parser};

	#[derive(Parser)]
	struct Cli {
		#[clap(flatten)]
		config: Config,
	}

	/// Parse `args` as if none of the configuration variables were exported.
	fn parse(args: &[&str]) -> Config {
		for arg in Cli::command().get_arguments() {
			if let Some(name) = arg.get_env() {
				std::env::remove_var(name);
			}
		}

		Cli::parse_from(std::iter::once("heatcam").chain(args.iter().copied())).config
	}

	#[test]
	fn defaults_match_reference_pipeline() {
		let config = parse(&[]);

		assert_eq!(config.model.conv_output, "block5_conv3");
		assert_eq!(config.model.explain_options(), ExplainOptions::default());
	}

	#[test]
	fn flags_override_pipeline_options() {
		let config = parse(&[
			"--image-size",
			"256",
			"--no-dark-mask",
			"--num-peaks",
			"3",
			"--threshold-abs",
			"0.25",
			"--overlay-alpha",
			"2.0",
		]);

		let options = config.model.explain_options();
		assert_eq!(options.image_size, 256);
		assert!(!options.mask_dark_pixels);
		assert_eq!(options.peaks.num_peaks, 3);
		assert_eq!(options.peaks.threshold_abs, Some(0.25));
		assert!((options.render.alpha - 1.0).abs() < f32::EPSILON);
	}

	#[test]
	fn load_reports_missing_model() {
		let mut config = parse(&[]).model;
		config.model_path = PathBuf::from("/nonexistent/model.onnx");

		let err = config.load().err().unwrap();

		assert!(format!("{err:#}").contains("/nonexistent/model.onnx"));
	}
}
