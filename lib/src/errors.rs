use aide::OperationOutput;
use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use serde_json::{json, Value};

use crate::runner::Error as RunnerError;

#[derive(Debug)]
pub struct HTTPError {
	detail: Value,
	status_code: StatusCode,
}

impl HTTPError {
	pub fn new(detail: &str) -> Self {
		Self {
			detail: detail.into(),
			status_code: StatusCode::UNPROCESSABLE_ENTITY,
		}
	}

	pub const fn with_status(mut self, status_code: StatusCode) -> Self {
		self.status_code = status_code;
		self
	}

	pub const fn status_code(&self) -> StatusCode {
		self.status_code
	}
}

impl IntoResponse for HTTPError {
	fn into_response(self) -> Response {
		(self.status_code, Json(json!({ "detail": self.detail }))).into_response()
	}
}

impl OperationOutput for HTTPError {
	type Inner = Self;
}

impl From<RunnerError> for HTTPError {
	fn from(e: RunnerError) -> Self {
		match e {
			RunnerError::NotReady(_) | RunnerError::Stopped => {
				Self::new(&e.to_string()).with_status(StatusCode::SERVICE_UNAVAILABLE)
			},
			RunnerError::QueueFull => Self::new(&e.to_string()).with_status(StatusCode::TOO_MANY_REQUESTS),
			RunnerError::Explain(heatcam_core::Error::Decode(_)) => {
				Self::new("Could not decode image").with_status(StatusCode::BAD_REQUEST)
			},
			RunnerError::Explain(_) | RunnerError::Panicked(_) => {
				tracing::error!("Failed to generate heatmap: {e}");

				Self::new(&format!("Error processing image: {e}")).with_status(StatusCode::INTERNAL_SERVER_ERROR)
			},
		}
	}
}
