use image::RgbImage;
use ndarray::{s, Array2, ArrayView1, ArrayView2, ArrayView3, Zip};

use crate::{
	model::{ActivationModel, ClassifierHead},
	peaks::{peak_local_max, Peak, PeakOptions},
	preprocess, render,
	render::RenderOptions,
	Error,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExplainOptions {
	/// Side of the square the input is resized to before inference.
	pub image_size: u32,
	/// Zero the heatmap wherever the input's red channel is exactly zero.
	pub mask_dark_pixels: bool,
	pub peaks: PeakOptions,
	pub render: RenderOptions,
}

impl Default for ExplainOptions {
	fn default() -> Self {
		Self {
			image_size: 224,
			mask_dark_pixels: true,
			peaks: PeakOptions::default(),
			render: RenderOptions::default(),
		}
	}
}

/// Result of explaining a single image.
#[derive(Debug, Clone)]
pub struct Explanation {
	/// Index of the predicted class
	pub class: usize,
	/// Classifier output for the predicted class
	pub score: f32,
	/// The resized image the model saw
	pub image: RgbImage,
	/// Class activation map at image resolution
	pub heatmap: Array2<f32>,
	/// Strongest local maxima of the heatmap, strongest first
	pub peaks: Vec<Peak>,
}

/// Runs the whole explanation pipeline on top of an [`ActivationModel`].
pub struct Explainer<M> {
	model: M,
	head: ClassifierHead,
	options: ExplainOptions,
}

impl<M: ActivationModel> Explainer<M> {
	pub const fn new(model: M, head: ClassifierHead, options: ExplainOptions) -> Self {
		Self {
			model,
			head,
			options,
		}
	}

	pub const fn options(&self) -> &ExplainOptions {
		&self.options
	}

	/// Decode an uploaded file and explain it.
	///
	/// # Errors
	///
	/// Returns [`Error::Decode`] for unreadable files, or any error from [`Self::explain`].
	pub fn explain_bytes(&self, bytes: &[u8]) -> Result<Explanation, Error> {
		self.explain(&preprocess::decode(bytes)?)
	}

	/// Classify `image` and compute the activation map of the predicted class.
	///
	/// # Errors
	///
	/// Returns an error if the forward pass fails or its outputs don't fit the classifier head.
	pub fn explain(&self, image: &RgbImage) -> Result<Explanation, Error> {
		let image = preprocess::resize(image, self.options.image_size);
		let input = preprocess::normalize(&image);

		let activations = self.model.forward(input.view())?;
		let (_, _, channels) = activations.features.dim();

		if channels != self.head.channels() {
			return Err(Error::Shape(format!(
				"last convolutional layer has {channels} channels, classifier expects {}",
				self.head.channels()
			)));
		}

		if activations.scores.len() != self.head.classes() {
			return Err(Error::Shape(format!(
				"model returned {} scores, classifier has {} classes",
				activations.scores.len(),
				self.head.classes()
			)));
		}

		let (class, score) = predicted_class(activations.scores.view())?;
		tracing::debug!("Predicted class {class} with score {score}");

		let cam = class_activation_map(activations.features.view(), self.head.class_weights(class)?)?;
		let (height, width, _) = input.dim();
		let mut heatmap = upsample_bilinear(cam.view(), height, width)?;

		if self.options.mask_dark_pixels {
			Zip::from(&mut heatmap)
				.and(input.slice(s![.., .., 0]))
				.for_each(|value, &red| {
					if red == 0.0 {
						*value = 0.0;
					}
				});
		}

		let peaks = peak_local_max(heatmap.view(), &self.options.peaks);

		Ok(Explanation {
			class,
			score,
			image,
			heatmap,
			peaks,
		})
	}

	/// Render an explanation as a PNG.
	///
	/// # Errors
	///
	/// Returns an error if the image cannot be drawn or encoded.
	pub fn render(&self, explanation: &Explanation) -> Result<Vec<u8>, Error> {
		let canvas = render::overlay(
			&explanation.image,
			explanation.heatmap.view(),
			&explanation.peaks,
			&self.options.render,
		)?;

		render::encode_png(&canvas)
	}
}

/// Index and value of the highest score. Ties resolve to the lowest index.
///
/// # Errors
///
/// Returns [`Error::EmptyScores`] if there are no scores, or they are all NaN.
pub fn predicted_class(scores: ArrayView1<'_, f32>) -> Result<(usize, f32), Error> {
	scores
		.iter()
		.copied()
		.enumerate()
		.filter(|(_, score)| !score.is_nan())
		.min_by(|(_, a), (_, b)| b.total_cmp(a))
		.ok_or(Error::EmptyScores)
}

/// Weighted sum of the feature channels at every location.
///
/// # Errors
///
/// Returns [`Error::Shape`] if the number of weights doesn't match the number of channels.
pub fn class_activation_map(features: ArrayView3<'_, f32>, weights: ArrayView1<'_, f32>) -> Result<Array2<f32>, Error> {
	let (height, width, channels) = features.dim();
	if weights.len() != channels {
		return Err(Error::Shape(format!(
			"{} class weights for {channels} channels",
			weights.len()
		)));
	}

	let features = features.as_standard_layout();
	let flat = features.view().into_shape((height * width, channels))?;

	Ok(flat.dot(&weights).into_shape((height, width))?)
}

/// Order-1 zoom of `map` to `(out_height, out_width)`, aligning the corner samples.
///
/// # Errors
///
/// Returns [`Error::Shape`] if `map` is empty.
pub fn upsample_bilinear(map: ArrayView2<'_, f32>, out_height: usize, out_width: usize) -> Result<Array2<f32>, Error> {
	let (in_height, in_width) = map.dim();
	if in_height == 0 || in_width == 0 {
		return Err(Error::Shape("cannot upsample an empty activation map".to_string()));
	}

	let rows = sample_positions(in_height, out_height);
	let cols = sample_positions(in_width, out_width);

	Ok(Array2::from_shape_fn((out_height, out_width), |(y, x)| {
		let (y0, y1, fy) = rows[y];
		let (x0, x1, fx) = cols[x];

		let top = (map[[y0, x1]] - map[[y0, x0]]).mul_add(fx, map[[y0, x0]]);
		let bottom = (map[[y1, x1]] - map[[y1, x0]]).mul_add(fx, map[[y1, x0]]);

		(bottom - top).mul_add(fy, top)
	}))
}

/// For every output index, the two input neighbours and the weight of the second one.
fn sample_positions(input: usize, output: usize) -> Vec<(usize, usize, f32)> {
	(0..output)
		.map(|o| {
			let position = if output > 1 {
				o as f64 * (input - 1) as f64 / (output - 1) as f64
			} else {
				0.0
			};

			#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
			let lower = (position.floor() as usize).min(input - 1);
			let upper = (lower + 1).min(input - 1);

			#[allow(clippy::cast_possible_truncation)]
			let fraction = (position - lower as f64) as f32;

			(lower, upper, fraction)
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::Activations;
	use anyhow::Result;
	use image::Rgb;
	use ndarray::{array, Array1, Array3};

	#[test]
	fn predicted_class_picks_first_maximum() {
		assert_eq!(predicted_class(array![0.1, 0.7, 0.7, 0.2].view()).unwrap(), (1, 0.7));
		assert_eq!(predicted_class(array![f32::NAN, 0.3].view()).unwrap(), (1, 0.3));
	}

	#[test]
	fn predicted_class_rejects_empty_scores() {
		assert!(matches!(predicted_class(Array1::<f32>::zeros(0).view()), Err(Error::EmptyScores)));
		assert!(matches!(predicted_class(array![f32::NAN].view()), Err(Error::EmptyScores)));
	}

	#[test]
	fn activation_map_is_weighted_channel_sum() {
		let features = Array3::from_shape_fn((2, 2, 3), |(y, x, c)| (y * 10 + x + c) as f32);
		let weights = array![1.0, 0.0, -1.0];

		let cam = class_activation_map(features.view(), weights.view()).unwrap();

		// Channels 0 and 2 differ by exactly 2 everywhere.
		assert_eq!(cam, Array2::from_elem((2, 2), -2.0_f32));
	}

	#[test]
	fn activation_map_handles_non_contiguous_features() {
		let features = Array3::from_shape_fn((3, 2, 2), |(y, x, c)| (y + x * 3 + c) as f32);
		let transposed = features.view().permuted_axes([1, 0, 2]);
		let weights = array![1.0, 1.0];

		let cam = class_activation_map(transposed, weights.view()).unwrap();

		assert_eq!(cam.dim(), (2, 3));
		assert!((cam[[1, 2]] - 11.0).abs() < f32::EPSILON);
	}

	#[test]
	fn upsampling_aligns_corners() {
		let map = array![[0.0, 1.0], [2.0, 3.0]];

		let zoomed = upsample_bilinear(map.view(), 3, 5).unwrap();

		assert_eq!(zoomed.dim(), (3, 5));
		assert!((zoomed[[0, 0]] - 0.0).abs() < 1e-6);
		assert!((zoomed[[0, 4]] - 1.0).abs() < 1e-6);
		assert!((zoomed[[2, 0]] - 2.0).abs() < 1e-6);
		assert!((zoomed[[2, 4]] - 3.0).abs() < 1e-6);
		assert!((zoomed[[1, 2]] - 1.5).abs() < 1e-6);
		assert!((zoomed[[0, 1]] - 0.25).abs() < 1e-6);
	}

	#[test]
	fn upsampling_single_cell_is_constant() {
		let zoomed = upsample_bilinear(array![[4.0]].view(), 4, 4).unwrap();

		assert_eq!(zoomed, Array2::from_elem((4, 4), 4.0_f32));
	}

	#[test]
	fn upsampling_rejects_empty_maps() {
		let empty = Array2::<f32>::zeros((0, 3));

		assert!(upsample_bilinear(empty.view(), 4, 4).is_err());
	}

	/// Two classes over a 2x2 grid of 2 channels: channel 0 lights up the top-left cell.
	struct FixedModel {
		scores: Array1<f32>,
	}

	impl ActivationModel for FixedModel {
		fn forward(&self, input: ArrayView3<'_, f32>) -> Result<Activations> {
			assert_eq!(input.dim(), (32, 32, 3));

			let mut features = Array3::zeros((2, 2, 2));
			features[[0, 0, 0]] = 1.0;
			features[[1, 1, 1]] = 1.0;

			Ok(Activations {
				scores: self.scores.clone(),
				features,
			})
		}
	}

	fn explainer(scores: Array1<f32>, mask_dark_pixels: bool) -> Explainer<FixedModel> {
		Explainer::new(
			FixedModel { scores },
			ClassifierHead::new(array![[1.0, 0.0], [0.0, 1.0]]),
			ExplainOptions {
				image_size: 32,
				mask_dark_pixels,
				peaks: PeakOptions {
					min_distance: 2,
					..PeakOptions::default()
				},
				..ExplainOptions::default()
			},
		)
	}

	#[test]
	fn explains_predicted_class() {
		let image = RgbImage::from_pixel(64, 48, Rgb([200, 120, 40]));

		let explanation = explainer(array![0.9, 0.1], true).explain(&image).unwrap();

		assert_eq!(explanation.class, 0);
		assert_eq!(explanation.heatmap.dim(), (32, 32));
		assert!((explanation.heatmap[[0, 0]] - 1.0).abs() < 1e-6);
		assert!(explanation.heatmap[[31, 31]].abs() < 1e-6);
		assert_eq!(explanation.image.dimensions(), (32, 32));

		let explanation = explainer(array![0.1, 0.9], true).explain(&image).unwrap();

		assert_eq!(explanation.class, 1);
		assert!((explanation.heatmap[[31, 31]] - 1.0).abs() < 1e-6);
	}

	#[test]
	fn masks_pixels_without_red() {
		let image = RgbImage::from_pixel(32, 32, Rgb([0, 255, 255]));

		let masked = explainer(array![0.9, 0.1], true).explain(&image).unwrap();
		assert!(masked.heatmap.iter().all(|&v| v == 0.0));
		assert!(masked.peaks.is_empty());

		let unmasked = explainer(array![0.9, 0.1], false).explain(&image).unwrap();
		assert!((unmasked.heatmap[[0, 0]] - 1.0).abs() < 1e-6);
	}

	#[test]
	fn rejects_head_mismatch() {
		let image = RgbImage::from_pixel(32, 32, Rgb([255, 255, 255]));

		let err = explainer(array![0.2, 0.3, 0.5], true).explain(&image).unwrap_err();

		assert!(matches!(err, Error::Shape(_)));
	}

	#[test]
	fn renders_png() {
		let image = RgbImage::from_pixel(32, 32, Rgb([255, 255, 255]));
		let explainer = explainer(array![0.9, 0.1], true);

		let explanation = explainer.explain(&image).unwrap();
		let png = explainer.render(&explanation).unwrap();

		let decoded = preprocess::decode(&png).unwrap();
		assert_eq!(decoded.dimensions(), (64, 64));
	}
}
