use aide::openapi::{self, OpenApi};
use anyhow::Result;
use axum::{extract::DefaultBodyLimit, Extension, Router, Server};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{config::Config, routes, runner::Runner, shutdown::Shutdown};

/// Load the model in the background and serve heatmaps until a shutdown is requested.
///
/// # Errors
///
/// Returns an error if the server cannot bind to the configured address.
pub async fn start(config: Config) -> Result<()> {
	let shutdown = Shutdown::new();
	shutdown.listen_for_signals();

	let model = config.model.clone();
	let runner = Runner::new(move || model.load(), config.queue_size, shutdown.clone());

	let app = router(runner, shutdown.clone(), config.max_upload_bytes);
	let addr = SocketAddr::from((config.host, config.port));

	tracing::info!("Starting server on {addr}...");
	Server::try_bind(&addr)?
		.serve(app.into_make_service())
		.with_graceful_shutdown(shutdown.handle())
		.await?;

	tracing::info!("Server stopped");
	Ok(())
}

/// Build the HTTP application around an already started runner.
pub fn router(runner: Runner, shutdown: Shutdown, max_upload_bytes: usize) -> Router {
	let mut api = OpenApi {
		info: openapi::Info {
			title: "Heatcam".to_string(),
			description: Some("Class activation heatmaps for uploaded images".to_string()),
			version: env!("CARGO_PKG_VERSION").to_string(),
			..openapi::Info::default()
		},
		..OpenApi::default()
	};

	routes::handler()
		.finish_api(&mut api)
		.layer(Extension(Arc::new(api)))
		.layer(runner.extension())
		.layer(shutdown.extension())
		.layer(DefaultBodyLimit::max(max_upload_bytes))
		.layer(CorsLayer::permissive())
		.layer(TraceLayer::new_for_http())
}
