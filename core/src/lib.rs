#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::cast_precision_loss)]

//! Class activation heatmaps for convolutional image classifiers.
//!
//! The pipeline is: decode and normalize an image, run it through an [`ActivationModel`],
//! project the last convolutional layer onto the predicted class's output weights,
//! upsample the result to image resolution, locate its peaks and render everything on top of the input.

pub mod cam;
pub mod error;
pub mod model;
pub mod peaks;
pub mod preprocess;
pub mod render;

pub use cam::{ExplainOptions, Explainer, Explanation};
pub use error::Error;
pub use model::{ActivationModel, Activations, ClassifierHead};
pub use peaks::{Peak, PeakOptions};
pub use render::RenderOptions;
