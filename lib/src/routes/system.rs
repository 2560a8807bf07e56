use aide::{
	axum::{
		routing::{get, post},
		ApiRouter,
	},
	openapi::OpenApi,
};
use axum::{
	response::{IntoResponse, Response},
	Extension,
};
use axum_jsonschema::Json;
use schemars::JsonSchema;
use std::sync::Arc;

use crate::{
	runner::{Health, Runner, SetupStatus},
	shutdown::Agent as Shutdown,
};

pub fn handler() -> ApiRouter {
	ApiRouter::new()
		.api_route("/", get(root))
		.api_route("/health-check", get(health_check))
		.api_route("/shutdown", post(shutdown))
		.route("/openapi.json", axum::routing::get(openapi))
}

#[derive(Debug, serde::Serialize, JsonSchema)]
pub struct RootResponse {
	/// Relative URL to the OpenAPI specification
	pub openapi_url: String,
	/// Relative URL of the endpoint returning a PNG heatmap
	pub heatmap_url: String,
	/// Relative URL of the endpoint returning a JSON explanation
	pub explanations_url: String,
}

#[allow(clippy::unused_async)]
pub async fn root() -> Json<RootResponse> {
	Json(RootResponse {
		openapi_url: "/openapi.json".to_string(),
		heatmap_url: "/generate-heatmap/".to_string(),
		explanations_url: "/explanations".to_string(),
	})
}

#[derive(Debug, serde::Serialize, JsonSchema)]
pub struct HealthCheckSetup {
	/// Setup logs
	pub logs: String,
	/// Setup status
	pub status: SetupStatus,
	/// Setup started time
	pub started_at: String,
	/// Setup completed time
	pub completed_at: Option<String>,
}

#[derive(Debug, serde::Serialize, JsonSchema)]
pub struct HealthCheck {
	/// Current health status
	pub status: Health,
	/// Setup information
	pub setup: HealthCheckSetup,
}

pub async fn health_check(Extension(runner): Extension<Runner>) -> Json<HealthCheck> {
	let setup = runner.setup_info().await;

	Json(HealthCheck {
		status: runner.health(),
		setup: HealthCheckSetup {
			logs: setup.logs,
			status: setup.status,
			started_at: setup.started_at.to_rfc3339(),
			completed_at: setup.completed_at.map(|at| at.to_rfc3339()),
		},
	})
}

#[allow(clippy::unused_async)]
pub async fn shutdown(Extension(shutdown): Extension<Shutdown>) -> Json<String> {
	shutdown.start();

	Json(String::new())
}

#[allow(clippy::unused_async)]
async fn openapi(Extension(api): Extension<Arc<OpenApi>>) -> Response {
	axum::Json(api.as_ref()).into_response()
}
