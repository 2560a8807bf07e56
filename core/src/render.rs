use image::{codecs::png::PngEncoder, imageops::FilterType, ColorType, ImageEncoder, Rgb, RgbImage};
use itertools::Itertools;
use ndarray::ArrayView2;

use crate::{peaks::Peak, Error};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
	/// Opacity of the heatmap layer.
	pub alpha: f32,
	/// Output pixels per input pixel.
	pub scale: u32,
	/// Side of the square drawn around every peak, in input pixels.
	pub box_size: u32,
	pub box_color: Rgb<u8>,
}

impl Default for RenderOptions {
	fn default() -> Self {
		Self {
			alpha: 0.3,
			scale: 2,
			box_size: 50,
			box_color: Rgb([255, 0, 0]),
		}
	}
}

// Segment data of matplotlib's `jet` colormap: (position, value) pairs per channel.
const JET_RED: &[(f32, f32)] = &[(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)];
const JET_GREEN: &[(f32, f32)] = &[
	(0.0, 0.0),
	(0.125, 0.0),
	(0.375, 1.0),
	(0.64, 1.0),
	(0.91, 0.0),
	(1.0, 0.0),
];
const JET_BLUE: &[(f32, f32)] = &[(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)];

/// Map `t` in `[0, 1]` to an RGB colour in `[0, 1]`.
#[must_use]
pub fn jet(t: f32) -> [f32; 3] {
	let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };

	[JET_RED, JET_GREEN, JET_BLUE].map(|segments| interpolate(segments, t))
}

fn interpolate(segments: &[(f32, f32)], t: f32) -> f32 {
	for pair in segments.windows(2) {
		let [(x0, y0), (x1, y1)] = [pair[0], pair[1]];

		if t <= x1 {
			return y0 + (y1 - y0) * (t - x0) / (x1 - x0);
		}
	}

	segments.last().map_or(0.0, |&(_, y)| y)
}

/// Draw `heatmap` over `base` and outline every peak.
///
/// `heatmap` must have the same dimensions as `base`; its values are rescaled to the colormap range.
///
/// # Errors
///
/// Returns [`Error::Shape`] if the heatmap and the image sizes differ.
pub fn overlay(
	base: &RgbImage,
	heatmap: ArrayView2<'_, f32>,
	peaks: &[Peak],
	options: &RenderOptions,
) -> Result<RgbImage, Error> {
	let (width, height) = base.dimensions();
	if heatmap.dim() != (height as usize, width as usize) {
		return Err(Error::Shape(format!(
			"heatmap is {:?} but the image is {height}x{width}",
			heatmap.dim()
		)));
	}

	let scale = options.scale.max(1);
	let mut canvas = image::imageops::resize(base, width * scale, height * scale, FilterType::Triangle);

	let (min, max) = heatmap
		.iter()
		.copied()
		.filter(|v| !v.is_nan())
		.minmax()
		.into_option()
		.unwrap_or_default();
	let range = max - min;

	for (x, y, pixel) in canvas.enumerate_pixels_mut() {
		let value = heatmap[[(y / scale) as usize, (x / scale) as usize]];
		let t = if range > 0.0 { (value - min) / range } else { 0.0 };
		let colour = jet(t);

		for c in 0..3 {
			let blended = (1.0 - options.alpha).mul_add(f32::from(pixel[c]), options.alpha * colour[c] * 255.0);

			#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
			let blended = blended.round().clamp(0.0, 255.0) as u8;
			pixel[c] = blended;
		}
	}

	let half = i64::from(options.box_size * scale / 2);
	for peak in peaks {
		let cx = peak.col as i64 * i64::from(scale) + i64::from(scale / 2);
		let cy = peak.row as i64 * i64::from(scale) + i64::from(scale / 2);

		draw_hollow_rect(&mut canvas, (cx - half, cy - half), (cx + half, cy + half), options.box_color);
	}

	Ok(canvas)
}

/// Outline the rectangle between two inclusive corners, clipped to the canvas.
fn draw_hollow_rect(canvas: &mut RgbImage, (left, top): (i64, i64), (right, bottom): (i64, i64), color: Rgb<u8>) {
	let (width, height) = canvas.dimensions();
	let mut put = |x: i64, y: i64| {
		if let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) {
			if x < width && y < height {
				canvas.put_pixel(x, y, color);
			}
		}
	};

	for x in left..=right {
		put(x, top);
		put(x, bottom);
	}

	for y in top..=bottom {
		put(left, y);
		put(right, y);
	}
}

/// Encode an RGB image as PNG.
///
/// # Errors
///
/// Returns [`Error::Encode`] if the encoder fails.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, Error> {
	let mut bytes = Vec::new();

	PngEncoder::new(&mut bytes)
		.write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
		.map_err(Error::Encode)?;

	Ok(bytes)
}
