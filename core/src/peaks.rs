use itertools::Itertools;
use ndarray::{Array2, ArrayView2, Axis};
use schemars::JsonSchema;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, JsonSchema)]
pub struct Peak {
	/// Row (y coordinate) of the peak
	pub row: usize,
	/// Column (x coordinate) of the peak
	pub col: usize,
	/// Heatmap value at the peak
	pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakOptions {
	/// Maximum number of peaks to return.
	pub num_peaks: usize,
	/// Minimum separation between peaks, also the half-size of the local maximum window.
	pub min_distance: usize,
	/// Peaks must exceed this fraction of the map's maximum.
	pub threshold_rel: f32,
	/// Peaks must exceed this absolute value. Defaults to the map's minimum.
	pub threshold_abs: Option<f32>,
	/// Width of the border in which peaks are ignored. Defaults to `min_distance`.
	pub exclude_border: Option<usize>,
}

impl Default for PeakOptions {
	fn default() -> Self {
		Self {
			num_peaks: 5,
			min_distance: 10,
			threshold_rel: 0.5,
			threshold_abs: None,
			exclude_border: None,
		}
	}
}

/// Find the strongest local maxima of `map`, strongest first.
#[must_use]
pub fn peak_local_max(map: ArrayView2<'_, f32>, options: &PeakOptions) -> Vec<Peak> {
	let Some((min, max)) = min_max(map) else {
		return Vec::new();
	};

	if min >= max {
		return Vec::new();
	}

	let threshold = options.threshold_abs.unwrap_or(min).max(options.threshold_rel * max);
	let border = options.exclude_border.unwrap_or(options.min_distance);
	let (rows, cols) = map.dim();
	let window_max = maximum_filter(map, options.min_distance);

	let mut candidates = Vec::new();
	for row in border..rows.saturating_sub(border) {
		for col in border..cols.saturating_sub(border) {
			let value = map[[row, col]];

			// The window always contains the pixel itself, so this is an equality test.
			if value >= window_max[[row, col]] && value > threshold {
				candidates.push(Peak { row, col, value });
			}
		}
	}

	// Stable sort keeps row-major order between equal values.
	candidates.sort_by(|a, b| b.value.total_cmp(&a.value));

	let peaks = ensure_spacing(candidates, options.min_distance);
	tracing::trace!("Found {} peaks above {threshold}", peaks.len());

	peaks.into_iter().take(options.num_peaks).collect()
}

fn min_max(map: ArrayView2<'_, f32>) -> Option<(f32, f32)> {
	map.iter().copied().filter(|v| !v.is_nan()).minmax().into_option()
}

/// Maximum over a `(2 * radius + 1)` square window, with the window clamped at the edges.
fn maximum_filter(map: ArrayView2<'_, f32>, radius: usize) -> Array2<f32> {
	let rows = maximum_along(map, Axis(0), radius);

	maximum_along(rows.view(), Axis(1), radius)
}

fn maximum_along(input: ArrayView2<'_, f32>, axis: Axis, radius: usize) -> Array2<f32> {
	let len = input.len_of(axis);
	let mut output = input.to_owned();

	for (mut out_lane, in_lane) in output.lanes_mut(axis).into_iter().zip(input.lanes(axis)) {
		for i in 0..len {
			let window = i.saturating_sub(radius)..=(i + radius).min(len - 1);
			out_lane[i] = window.map(|j| in_lane[j]).fold(f32::NEG_INFINITY, f32::max);
		}
	}

	output
}

/// Greedily drop peaks that sit closer than `min_distance` (Chebyshev) to a stronger accepted peak.
fn ensure_spacing(candidates: Vec<Peak>, min_distance: usize) -> Vec<Peak> {
	if min_distance <= 1 {
		return candidates;
	}

	let mut accepted: Vec<Peak> = Vec::new();
	for candidate in candidates {
		let too_close = accepted.iter().any(|peak| {
			peak.row.abs_diff(candidate.row).max(peak.col.abs_diff(candidate.col)) < min_distance
		});

		if !too_close {
			accepted.push(candidate);
		}
	}

	accepted
}
