use axum::Extension;
use std::{future::Future, sync::Arc};
use tokio::{signal, sync::watch};

/// Broadcasts a single shutdown request to every part of the server.
#[derive(Debug, Clone)]
pub struct Shutdown {
	sender: Arc<watch::Sender<bool>>,
	receiver: watch::Receiver<bool>,
}

/// Handle given to route handlers so they can request a shutdown.
#[derive(Debug, Clone)]
pub struct Agent {
	sender: Arc<watch::Sender<bool>>,
}

impl Agent {
	pub fn start(&self) {
		tracing::info!("Shutdown requested");
		self.sender.send_replace(true);
	}
}

impl Default for Shutdown {
	fn default() -> Self {
		Self::new()
	}
}

impl Shutdown {
	pub fn new() -> Self {
		let (sender, receiver) = watch::channel(false);

		Self {
			sender: Arc::new(sender),
			receiver,
		}
	}

	/// Trigger a shutdown once the process receives Ctrl+C or SIGTERM.
	pub fn listen_for_signals(&self) {
		let shutdown = self.clone();

		tokio::spawn(async move {
			wait_for_signal().await;
			shutdown.start();
		});
	}

	pub fn start(&self) {
		self.sender.send_replace(true);
	}

	pub fn is_requested(&self) -> bool {
		*self.receiver.borrow()
	}

	/// Resolves once a shutdown has been requested.
	pub fn handle(&self) -> impl Future<Output = ()> + Send + 'static {
		let mut receiver = self.receiver.clone();

		async move {
			while !*receiver.borrow_and_update() {
				if receiver.changed().await.is_err() {
					return;
				}
			}
		}
	}

	pub fn extension(&self) -> Extension<Agent> {
		Extension(Agent {
			sender: self.sender.clone(),
		})
	}
}

async fn wait_for_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			tracing::error!("Failed to install Ctrl+C handler: {e}");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			},
			Err(e) => {
				tracing::error!("Failed to install SIGTERM handler: {e}");
				std::future::pending::<()>().await;
			},
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {},
		() = terminate => {},
	}

	tracing::info!("Received shutdown signal");
}
