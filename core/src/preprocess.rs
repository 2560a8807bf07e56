use image::{imageops::FilterType, RgbImage};
use ndarray::Array3;

use crate::Error;

/// Decode an uploaded file into an 8-bit RGB image.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the bytes are not in a supported image format.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, Error> {
	let image = image::load_from_memory(bytes).map_err(Error::Decode)?;
	tracing::debug!("Decoded {}x{} image", image.width(), image.height());

	Ok(image.to_rgb8())
}

/// Resize to a `size`x`size` square with a bicubic filter, ignoring the aspect ratio.
#[must_use]
pub fn resize(image: &RgbImage, size: u32) -> RgbImage {
	if image.dimensions() == (size, size) {
		return image.clone();
	}

	image::imageops::resize(image, size, size, FilterType::CatmullRom)
}

/// Scale pixel values into `[0, 1]`, keeping the `(height, width, channel)` layout.
#[must_use]
pub fn normalize(image: &RgbImage) -> Array3<f32> {
	let (width, height) = image.dimensions();

	Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
		#[allow(clippy::cast_possible_truncation)]
		let pixel = image.get_pixel(x as u32, y as u32);

		f32::from(pixel[c]) / 255.0
	})
}
