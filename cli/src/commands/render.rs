use anyhow::{Context, Result};
use heatcam::ModelConfig;
use heatcam_core::Explanation;
use std::{
	fs,
	path::{Path, PathBuf},
};

pub fn handle(model: &ModelConfig, input: &Path, output: Option<PathBuf>) -> Result<()> {
	let bytes = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;

	let explainer = model.load()?;
	let explanation = explainer.explain_bytes(&bytes)?;
	let png = explainer.render(&explanation)?;

	let output = output.unwrap_or_else(|| default_output(input));
	fs::write(&output, png).with_context(|| format!("Failed to write {}", output.display()))?;

	println!("{}", summarize(&explanation));
	println!("Written heatmap to {}", output.display());

	Ok(())
}

fn default_output(input: &Path) -> PathBuf {
	let stem = input
		.file_stem()
		.map_or_else(|| "image".into(), |stem| stem.to_string_lossy());

	input.with_file_name(format!("{stem}_heatmap.png"))
}

fn summarize(explanation: &Explanation) -> String {
	let mut summary = format!("Predicted class {} (score {:.4})", explanation.class, explanation.score);

	for peak in &explanation.peaks {
		summary.push_str(&format!("\n  peak at ({}, {}) = {:.4}", peak.col, peak.row, peak.value));
	}

	summary
}
