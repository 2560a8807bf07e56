#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
//! HTTP service that explains image classifications with class activation heatmaps.

pub use config::{Config, ModelConfig};
pub use model::TractModel;
pub use runner::{Health, Runner};
pub use server::{router, start};
pub use shutdown::Shutdown;

mod config;
mod errors;
mod helpers;
mod model;
mod routes;
mod runner;
mod server;
mod shutdown;

/// An explainer backed by whichever model was loaded at runtime.
pub type DynExplainer = heatcam_core::Explainer<Box<dyn heatcam_core::ActivationModel>>;
