#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Could not decode image: {0}")]
	Decode(#[source] image::ImageError),

	#[error("Failed to encode heatmap: {0}")]
	Encode(#[source] image::ImageError),

	#[error("Shape mismatch: {0}")]
	Shape(String),

	#[error("Model returned no usable class scores")]
	EmptyScores,

	#[error("Class {class} is out of range for a classifier with {classes} classes")]
	ClassOutOfRange { class: usize, classes: usize },

	#[error("Failed to load classifier weights: {0}")]
	Weights(String),

	#[error("Model forward pass failed: {0}")]
	Model(#[from] anyhow::Error),
}

impl From<safetensors::SafeTensorError> for Error {
	fn from(e: safetensors::SafeTensorError) -> Self {
		Self::Weights(e.to_string())
	}
}

impl From<ndarray::ShapeError> for Error {
	fn from(e: ndarray::ShapeError) -> Self {
		Self::Shape(e.to_string())
	}
}
