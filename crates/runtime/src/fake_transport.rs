//! In-memory transport for testing request correlation without a device.
//!
//! ```ignore
//! let (parts, controller) = FakeTransportBuilder::new().build();
//! let connection = Arc::new(Connection::new(parts));
//! connection.spawn();
//!
//! let fut = connection.send_message("dev@1", "pressHome", json!({}));
//! controller.inject_response(0, json!(true));
//! let result = fut.await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

#[derive(Default)]
pub struct FakeTransportBuilder {
	fail_writes: bool,
}

impl FakeTransportBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every send fail as if the socket had been reset.
	pub fn fail_writes(mut self) -> Self {
		self.fail_writes = true;
		self
	}

	/// Returns [`TransportParts`] for a [`Connection`](crate::Connection)
	/// plus a controller for injecting responses and inspecting requests.
	pub fn build(self) -> (TransportParts, FakeTransportController) {
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let sent = Arc::new(Mutex::new(Vec::new()));

		let sender = FakeTransportSender {
			sent: Arc::clone(&sent),
			fail_writes: self.fail_writes,
		};
		let receiver = FakeTransportReceiver {
			inbound_rx,
			message_tx,
		};
		let controller = FakeTransportController {
			inbound_tx: Some(inbound_tx),
			sent,
		};

		(
			TransportParts {
				sender: Box::new(sender),
				receiver: Box::new(receiver),
				message_rx,
			},
			controller,
		)
	}
}

/// Test-side handle of a fake transport.
pub struct FakeTransportController {
	inbound_tx: Option<mpsc::UnboundedSender<Value>>,
	sent: Arc<Mutex<Vec<Value>>>,
}

impl FakeTransportController {
	/// Injects a raw frame as if the dispatcher had sent it.
	pub fn inject(&self, message: Value) {
		if let Some(tx) = &self.inbound_tx {
			let _ = tx.send(message);
		}
	}

	pub fn inject_response(&self, id: u32, result: Value) {
		self.inject(serde_json::json!({
			"id": id,
			"result": result
		}));
	}

	pub fn inject_error(&self, id: u32, name: &str, message: &str) {
		self.inject(serde_json::json!({
			"id": id,
			"error": {
				"error": {
					"message": message,
					"name": name
				}
			}
		}));
	}

	/// Simulates the tunnel dropping: the receiver sees EOF.
	pub fn disconnect(&mut self) {
		self.inbound_tx = None;
	}

	/// Takes all sent requests, clearing the buffer.
	pub async fn take_sent(&self) -> Vec<Value> {
		std::mem::take(&mut *self.sent.lock().await)
	}

	/// Waits until at least `count` requests were sent, then takes them.
	pub async fn wait_for_sent(&self, count: usize) -> Vec<Value> {
		loop {
			{
				let mut sent = self.sent.lock().await;
				if sent.len() >= count {
					return std::mem::take(&mut *sent);
				}
			}
			tokio::time::sleep(std::time::Duration::from_millis(2)).await;
		}
	}
}

struct FakeTransportSender {
	sent: Arc<Mutex<Vec<Value>>>,
	fail_writes: bool,
}

impl Transport for FakeTransportSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		let sent = Arc::clone(&self.sent);
		let fail = self.fail_writes;
		Box::pin(async move {
			if fail {
				return Err(Error::TransportError("connection reset by peer".into()));
			}
			sent.lock().await.push(message);
			Ok(())
		})
	}
}

struct FakeTransportReceiver {
	inbound_rx: mpsc::UnboundedReceiver<Value>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for FakeTransportReceiver {
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move {
			while let Some(message) = self.inbound_rx.recv().await {
				if self.message_tx.send(message).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}
