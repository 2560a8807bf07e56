use aide::{
	axum::{routing::post, ApiRouter},
	OperationOutput,
};
use axum::{
	http::header::{HeaderName, CONTENT_TYPE},
	response::{IntoResponse, Response},
	Extension,
};
use axum_jsonschema::Json;
use heatcam_core::Peak;
use schemars::JsonSchema;

use crate::{
	errors::HTTPError,
	helpers::{png_data_url, upload::ImageUpload},
	runner::{Output, Runner},
};

lazy_static::lazy_static! {
	static ref PREDICTED_CLASS: HeaderName = HeaderName::from_static("x-predicted-class");
	static ref CLASS_SCORE: HeaderName = HeaderName::from_static("x-class-score");
	static ref PREDICT_TIME: HeaderName = HeaderName::from_static("x-predict-time");
}

pub fn handler() -> ApiRouter {
	ApiRouter::new()
		.api_route("/generate-heatmap/", post(generate_heatmap))
		.api_route("/generate-heatmap", post(generate_heatmap))
		.api_route("/explanations", post(explain))
}

/// A PNG overlay of the class activation map on the uploaded image.
#[derive(Debug)]
pub struct HeatmapImage(Output);

impl IntoResponse for HeatmapImage {
	fn into_response(self) -> Response {
		let Self(output) = self;

		(
			[
				(CONTENT_TYPE, "image/png".to_string()),
				(PREDICTED_CLASS.clone(), output.explanation.class.to_string()),
				(CLASS_SCORE.clone(), output.explanation.score.to_string()),
				(PREDICT_TIME.clone(), output.predict_time.as_secs_f64().to_string()),
			],
			output.png,
		)
			.into_response()
	}
}

impl OperationOutput for HeatmapImage {
	type Inner = Self;
}

pub async fn generate_heatmap(
	Extension(runner): Extension<Runner>,
	upload: ImageUpload,
) -> Result<HeatmapImage, HTTPError> {
	tracing::info!(
		"Generating heatmap for {}",
		upload.file_name.as_deref().unwrap_or("unnamed upload")
	);

	let output = runner.run(upload.bytes).await?;

	Ok(HeatmapImage(output))
}

#[derive(Debug, serde::Serialize, JsonSchema)]
pub struct ExplanationResponse {
	/// Index of the predicted class
	pub class: usize,
	/// Score the model gave the predicted class
	pub score: f32,
	/// Most activated locations, in input image pixels
	pub peaks: Vec<Peak>,
	/// PNG overlay as a data URL
	pub image: String,
	/// Seconds spent running the model and rendering
	pub predict_time: f64,
}

pub async fn explain(
	Extension(runner): Extension<Runner>,
	upload: ImageUpload,
) -> Result<Json<ExplanationResponse>, HTTPError> {
	let output = runner.run(upload.bytes).await?;

	Ok(Json(ExplanationResponse {
		class: output.explanation.class,
		score: output.explanation.score,
		peaks: output.explanation.peaks,
		image: png_data_url(&output.png),
		predict_time: output.predict_time.as_secs_f64(),
	}))
}
