use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use std::time::{Duration, Instant};

pub mod upload;

pub fn with_timing<T>(cb: impl FnOnce() -> T) -> (T, Duration) {
	let start = Instant::now();
	let result = cb();

	(result, start.elapsed())
}

pub fn base64_encode<T: AsRef<[u8]>>(bytes: T) -> String {
	Base64.encode(bytes)
}

/// Inline PNG bytes as a `data:` URL.
pub fn png_data_url(png: &[u8]) -> String {
	format!("data:image/png;base64,{}", base64_encode(png))
}
