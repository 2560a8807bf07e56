use anyhow::Result;
use atomic_enum::atomic_enum;
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use heatcam_core::Explanation;
use schemars::JsonSchema;
use std::{
	sync::{atomic::Ordering, Arc},
	time::Duration,
};
use tokio::sync::{
	mpsc::{self, error::TrySendError},
	oneshot, RwLock,
};

use crate::{helpers::with_timing, shutdown::Shutdown, DynExplainer};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Model is not ready ({0:?})")]
	NotReady(Health),

	#[error("Too many images are waiting to be processed")]
	QueueFull,

	#[error("Runner stopped before the image was processed")]
	Stopped,

	#[error(transparent)]
	Explain(#[from] heatcam_core::Error),

	#[error("Heatmap task panicked: {0}")]
	Panicked(String),
}

#[atomic_enum]
#[derive(serde::Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
	Unknown,
	Starting,
	Ready,
	Busy,
	SetupFailed,
}

#[derive(Debug, Clone, Copy, serde::Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SetupStatus {
	Starting,
	Succeeded,
	Failed,
}

#[derive(Debug, Clone)]
pub struct SetupInfo {
	pub logs: String,
	pub status: SetupStatus,
	pub started_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
}

/// A rendered explanation, along with how long the model took to produce it.
#[derive(Debug)]
pub struct Output {
	pub explanation: Explanation,
	pub png: Vec<u8>,
	pub predict_time: Duration,
}

type ResponseSender = oneshot::Sender<Result<Output, Error>>;

/// Owns the model and feeds it uploaded images one at a time.
#[derive(Clone)]
pub struct Runner {
	health: Arc<AtomicHealth>,
	setup: Arc<RwLock<SetupInfo>>,
	sender: mpsc::Sender<(ResponseSender, Bytes)>,
}

impl Runner {
	/// Load the model in the background and start accepting images.
	///
	/// If `setup` fails the runner is marked as failed and a shutdown is requested.
	pub fn new<F>(setup: F, queue_size: usize, shutdown: Shutdown) -> Self
	where
		F: FnOnce() -> Result<DynExplainer> + Send + 'static,
	{
		let health = Arc::new(AtomicHealth::new(Health::Starting));
		let setup_info = Arc::new(RwLock::new(SetupInfo {
			logs: String::new(),
			status: SetupStatus::Starting,
			started_at: Utc::now(),
			completed_at: None,
		}));

		let (sender, mut rx) = mpsc::channel::<(ResponseSender, Bytes)>(queue_size.max(1));

		let task_health = health.clone();
		let task_setup = setup_info.clone();
		let handle_shutdown = shutdown.clone();
		let handle = tokio::spawn(async move {
			let explainer = match tokio::task::spawn_blocking(setup).await {
				Ok(Ok(explainer)) => Arc::new(explainer),
				Ok(Err(error)) => {
					Self::fail_setup(&task_health, &task_setup, format!("{error:#}")).await;
					handle_shutdown.start();
					return;
				},
				Err(error) => {
					Self::fail_setup(&task_health, &task_setup, error.to_string()).await;
					handle_shutdown.start();
					return;
				},
			};

			{
				let mut setup = task_setup.write().await;
				setup.status = SetupStatus::Succeeded;
				setup.completed_at = Some(Utc::now());
			}
			task_health.store(Health::Ready, Ordering::SeqCst);
			tracing::info!("Model loaded, ready to generate heatmaps");

			while let Some((tx, image)) = rx.recv().await {
				task_health.store(Health::Busy, Ordering::SeqCst);

				let explainer = explainer.clone();
				let result = tokio::task::spawn_blocking(move || {
					with_timing(|| {
						let explanation = explainer.explain_bytes(&image)?;
						let png = explainer.render(&explanation)?;

						Ok::<_, heatcam_core::Error>((explanation, png))
					})
				})
				.await;

				let response = match result {
					Ok((Ok((explanation, png)), predict_time)) => {
						tracing::debug!(
							"Generated heatmap for class {} in {predict_time:?}",
							explanation.class
						);

						Ok(Output {
							explanation,
							png,
							predict_time,
						})
					},
					Ok((Err(error), _)) => Err(Error::Explain(error)),
					Err(error) => Err(Error::Panicked(error.to_string())),
				};

				if tx.send(response).is_err() {
					tracing::debug!("Client went away before its heatmap was ready");
				}

				task_health.store(Health::Ready, Ordering::SeqCst);
			}
		});

		tokio::spawn(async move {
			shutdown.handle().await;
			handle.abort();
		});

		Self {
			health,
			sender,
			setup: setup_info,
		}
	}

	async fn fail_setup(health: &AtomicHealth, setup: &RwLock<SetupInfo>, logs: String) {
		tracing::error!("Failed to load model: {logs}");

		let mut setup = setup.write().await;
		setup.logs = logs;
		setup.status = SetupStatus::Failed;
		setup.completed_at = Some(Utc::now());

		health.store(Health::SetupFailed, Ordering::SeqCst);
	}

	pub fn health(&self) -> Health {
		self.health.load(Ordering::SeqCst)
	}

	pub async fn setup_info(&self) -> SetupInfo {
		self.setup.read().await.clone()
	}

	/// Queue an uploaded image and wait for its heatmap.
	///
	/// # Errors
	///
	/// Returns an error if the model isn't loaded, the queue is full, or the image cannot be explained.
	pub async fn run(&self, image: Bytes) -> Result<Output, Error> {
		let health = self.health();
		if !matches!(health, Health::Ready | Health::Busy) {
			return Err(Error::NotReady(health));
		}

		let (tx, rx) = oneshot::channel();

		self.sender.try_send((tx, image)).map_err(|e| match e {
			TrySendError::Full(_) => Error::QueueFull,
			TrySendError::Closed(_) => Error::Stopped,
		})?;

		rx.await.map_err(|_| Error::Stopped)?
	}

	pub fn extension(&self) -> axum::Extension<Self> {
		axum::Extension(self.clone())
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use anyhow::bail;
	use heatcam_core::{
		preprocess, render, ActivationModel, Activations, ClassifierHead, ExplainOptions, Explainer,
		PeakOptions,
	};
	use image::{Rgb, RgbImage};
	use ndarray::{array, Array3, ArrayView3};

	/// Lights up a single feature cell in the middle of an 8x8 grid.
	pub struct StubModel;

	impl ActivationModel for StubModel {
		fn forward(&self, _input: ArrayView3<'_, f32>) -> Result<Activations> {
			let mut features = Array3::zeros((8, 8, 2));
			features[[4, 4, 0]] = 1.0;

			Ok(Activations {
				scores: array![0.8, 0.2],
				features,
			})
		}
	}

	/// Waits for a message on `gate` before every forward pass.
	struct GatedModel {
		gate: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
	}

	impl ActivationModel for GatedModel {
		fn forward(&self, input: ArrayView3<'_, f32>) -> Result<Activations> {
			self.gate.lock().unwrap().recv().ok();

			StubModel.forward(input)
		}
	}

	pub fn stub_explainer() -> DynExplainer {
		explainer_for(Box::new(StubModel))
	}

	fn explainer_for(model: Box<dyn ActivationModel>) -> DynExplainer {
		Explainer::new(
			model,
			ClassifierHead::new(array![[1.0, 0.0], [0.0, 1.0]]),
			ExplainOptions {
				image_size: 64,
				peaks: PeakOptions {
					min_distance: 4,
					..PeakOptions::default()
				},
				..ExplainOptions::default()
			},
		)
	}

	pub fn png_upload() -> Vec<u8> {
		render::encode_png(&RgbImage::from_pixel(40, 30, Rgb([200, 180, 160]))).unwrap()
	}

	pub async fn wait_until_settled(runner: &Runner) {
		while matches!(runner.health(), Health::Starting | Health::Unknown) {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	}

	#[tokio::test]
	async fn explains_uploaded_image() {
		let runner = Runner::new(|| Ok(stub_explainer()), 2, Shutdown::new());
		wait_until_settled(&runner).await;

		let output = runner.run(Bytes::from(png_upload())).await.unwrap();

		assert_eq!(output.explanation.class, 0);
		assert_eq!(output.explanation.heatmap.dim(), (64, 64));
		assert!(!output.explanation.peaks.is_empty());
		assert_eq!(preprocess::decode(&output.png).unwrap().dimensions(), (128, 128));
		assert!(matches!(runner.health(), Health::Ready));
	}

	#[tokio::test]
	async fn reports_decode_errors() {
		let runner = Runner::new(|| Ok(stub_explainer()), 2, Shutdown::new());
		wait_until_settled(&runner).await;

		let err = runner.run(Bytes::from_static(b"not an image")).await.unwrap_err();

		assert!(matches!(err, Error::Explain(heatcam_core::Error::Decode(_))));
	}

	#[tokio::test]
	async fn rejects_images_when_queue_is_full() {
		let (release, gate) = std::sync::mpsc::channel::<()>();
		let runner = Runner::new(
			move || {
				Ok(explainer_for(Box::new(GatedModel {
					gate: std::sync::Mutex::new(gate),
				})))
			},
			1,
			Shutdown::new(),
		);
		wait_until_settled(&runner).await;

		let first = tokio::spawn({
			let runner = runner.clone();
			async move { runner.run(Bytes::from(png_upload())).await }
		});
		while !matches!(runner.health(), Health::Busy) {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}

		// The model is blocked on the first image, so the second one fills the queue.
		let second = runner.run(Bytes::from(png_upload()));
		tokio::pin!(second);
		tokio::select! {
			biased;
			_ = &mut second => panic!("queued image finished while the model was blocked"),
			() = tokio::task::yield_now() => {},
		}

		let err = runner.run(Bytes::from(png_upload())).await.unwrap_err();
		assert!(matches!(err, Error::QueueFull));

		release.send(()).unwrap();
		release.send(()).unwrap();
		assert!(first.await.unwrap().is_ok());
		assert!(second.await.is_ok());
	}

	#[tokio::test]
	async fn failed_setup_requests_shutdown() {
		let shutdown = Shutdown::new();
		let runner = Runner::new(|| bail!("model.onnx not found"), 2, shutdown.clone());
		wait_until_settled(&runner).await;

		assert!(matches!(runner.health(), Health::SetupFailed));
		assert!(shutdown.is_requested());

		let setup = runner.setup_info().await;
		assert!(matches!(setup.status, SetupStatus::Failed));
		assert!(setup.logs.contains("model.onnx not found"));

		let err = runner.run(Bytes::from(png_upload())).await.unwrap_err();
		assert!(matches!(err, Error::NotReady(Health::SetupFailed)));
	}

	#[tokio::test]
	async fn rejects_images_while_loading() {
		let (release, wait) = std::sync::mpsc::channel::<()>();
		let runner = Runner::new(
			move || {
				wait.recv().ok();
				Ok(stub_explainer())
			},
			2,
			Shutdown::new(),
		);

		let err = runner.run(Bytes::from(png_upload())).await.unwrap_err();
		assert!(matches!(err, Error::NotReady(Health::Starting)));

		release.send(()).unwrap();
		wait_until_settled(&runner).await;
		assert!(runner.run(Bytes::from(png_upload())).await.is_ok());
	}
}
