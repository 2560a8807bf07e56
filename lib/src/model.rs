use anyhow::{bail, ensure, Context, Result};
use heatcam_core::{ActivationModel, Activations};
use ndarray::{Array1, Array3, ArrayView3};
use std::path::Path;
use tract_onnx::prelude::*;

/// An ONNX classifier exported from Keras, evaluated with tract.
///
/// The model takes a single `[1, size, size, 3]` NHWC input scaled to `[0, 1]`.
/// It is rewired to expose two outputs: the class scores and the activations of the last convolutional layer.
pub struct TractModel {
	plan: TypedRunnableModel<TypedModel>,
	image_size: usize,
}

impl TractModel {
	/// Load, rewire and optimize an ONNX model.
	///
	/// `logits_output` defaults to the model's first output.
	///
	/// # Errors
	///
	/// Returns an error if the file cannot be read, an output cannot be found, or the model cannot be optimized.
	pub fn load(path: &Path, image_size: u32, logits_output: Option<&str>, conv_output: &str) -> Result<Self> {
		tracing::info!("Loading ONNX model from {}", path.display());
		let size = image_size as usize;

		let mut model = tract_onnx::onnx()
			.model_for_path(path)
			.with_context(|| format!("Failed to read ONNX model at {}", path.display()))?
			.with_input_fact(0, f32::fact([1, size, size, 3]).into())?;

		let logits = match logits_output {
			Some(name) => name.to_string(),
			None => {
				let outlet = *model.output_outlets()?.first().context("Model has no outputs")?;
				model.node(outlet.node).name.clone()
			},
		};

		tracing::debug!("Using {logits} for class scores and {conv_output} for activations");
		model
			.set_output_names([logits.as_str(), conv_output])
			.with_context(|| format!("Model has no output or node named {logits} / {conv_output}"))?;

		let plan = model.into_optimized()?.into_runnable()?;
		tracing::info!("Model optimized for {size}x{size} inputs");

		Ok(Self {
			plan,
			image_size: size,
		})
	}
}

impl ActivationModel for TractModel {
	fn forward(&self, input: ArrayView3<'_, f32>) -> Result<Activations> {
		let (height, width, channels) = input.dim();
		ensure!(
			height == self.image_size && width == self.image_size && channels == 3,
			"Expected a {size}x{size}x3 input, got {height}x{width}x{channels}",
			size = self.image_size
		);

		let tensor: Tensor =
			tract_ndarray::Array4::from_shape_fn((1, height, width, 3), |(_, y, x, c)| input[[y, x, c]]).into();
		let outputs = self.plan.run(tvec!(tensor.into()))?;

		let scores = outputs[0].to_array_view::<f32>()?;
		let scores = Array1::from_iter(scores.iter().copied());

		let features = outputs[1].to_array_view::<f32>()?;
		let (rows, cols, depth) = match *features.shape() {
			[1, rows, cols, depth] | [rows, cols, depth] => (rows, cols, depth),
			ref shape => bail!("Expected NHWC activations from the convolutional layer, got shape {shape:?}"),
		};
		let features = Array3::from_shape_vec((rows, cols, depth), features.iter().copied().collect())?;

		Ok(Activations { scores, features })
	}
}
