use aide::axum::ApiRouter;

pub mod heatmap;
pub mod system;

pub fn handler() -> ApiRouter {
	ApiRouter::new()
		.merge(system::handler())
		.merge(heatmap::handler())
}
