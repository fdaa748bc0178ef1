//! JSON-RPC connection to the on-device dispatcher.
//!
//! This module implements the request/response correlation layer on top of the transport.
//! It handles:
//! - Generating unique request IDs
//! - Correlating responses with pending requests
//! - Failing every pending request when the tunnel goes away
//!
//! # Message Flow
//!
//! 1. A proxy calls `send_message()` with guid, method, and params
//! 2. Connection generates a unique ID and parks a oneshot sender under it
//! 3. Request is queued for the writer task and framed onto the socket
//! 4. The reader task decodes the dispatcher's response
//! 5. The run loop correlates it by ID and completes the oneshot
//!
//! Loss of the tunnel is fatal: once the reader sees EOF or a framing error,
//! the connection is marked closed and every pending and future call fails
//! with [`Error::ChannelClosed`]. There is no reconnect.


use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use uia_protocol::{Interface, LOOKUP_METHOD, LookupParams, LookupResult};

use crate::error::{Error, Result};
use crate::transport::{StreamTransport, Transport, TransportParts, TransportReceiver};

/// What a [`Channel`](crate::Channel) needs from a connection.
///
/// Lets proxies stay independent of the concrete transport.
pub trait ConnectionLike: Send + Sync {
	/// Send a message to the dispatcher and await the response.
	fn send_message(
		&self,
		guid: &str,
		method: &str,
		params: Value,
	) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>>;
}

/// Request frame sent to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	pub id: u32,
	/// Target object; empty for the dispatcher root.
	#[serde(
		serialize_with = "serialize_arc_str",
		deserialize_with = "deserialize_arc_str"
	)]
	pub guid: Arc<str>,
	pub method: String,
	pub params: Value,
}

pub fn serialize_arc_str<S>(arc: &Arc<str>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
	S: serde::Serializer,
{
	serializer.serialize_str(arc)
}

pub fn deserialize_arc_str<'de, D>(deserializer: D) -> std::result::Result<Arc<str>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let s: String = serde::Deserialize::deserialize(deserializer)?;
	Ok(Arc::from(s.as_str()))
}

/// Response frame from the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub id: u32,
	/// Success result (mutually exclusive with error)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error result (mutually exclusive with result)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorWrapper>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorWrapper {
	pub error: ErrorPayload,
}

/// Exception raised on the device while executing a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub message: String,
	/// Exception class name (e.g., "UiObjectNotFoundException")
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

/// Discriminated union of inbound frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Response message (has `id` field)
	Response(Response),
	/// Anything else; logged and ignored
	Unknown(Value),
}

/// Pending request callbacks keyed by request ID.
type CallbackMap = Arc<DashMap<u32, oneshot::Sender<Result<Value>>>>;

/// RAII guard ensuring callback cleanup when a request future is dropped.
struct CancelGuard {
	id: u32,
	callbacks: CallbackMap,
	completed: bool,
}

impl CancelGuard {
	fn new(id: u32, callbacks: CallbackMap) -> Self {
		Self {
			id,
			callbacks,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if self.callbacks.remove(&self.id).is_some() {
			tracing::debug!(target = "uia::connection", id = self.id, "removed orphaned callback");
		}
	}
}

/// Future returned by [`Connection::send_message`] with automatic cancellation cleanup.
struct ResponseFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// JSON-RPC connection to the dispatcher.
///
/// Uses sequential request IDs and oneshot channels for correlation.
pub struct Connection {
	last_id: AtomicU32,
	callbacks: CallbackMap,
	outbound_tx: mpsc::UnboundedSender<Value>,
	transport_sender: Mutex<Option<Box<dyn Transport>>>,
	transport_receiver: Mutex<Option<Box<dyn TransportReceiver>>>,
	message_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
	outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
	closed: AtomicBool,
	shutdown: Notify,
	io_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("closed", &self.is_closed())
			.field("pending", &self.pending())
			.finish_non_exhaustive()
	}
}

impl Connection {
	/// Create a new Connection with the given transport
	pub fn new(parts: TransportParts) -> Self {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

		Self {
			last_id: AtomicU32::new(0),
			callbacks: Arc::new(DashMap::new()),
			outbound_tx,
			transport_sender: Mutex::new(Some(sender)),
			transport_receiver: Mutex::new(Some(receiver)),
			message_rx: Mutex::new(Some(message_rx)),
			outbound_rx: Mutex::new(Some(outbound_rx)),
			closed: AtomicBool::new(false),
			shutdown: Notify::new(),
			io_tasks: Mutex::new(Vec::new()),
		}
	}

	/// Opens a TCP connection to `addr` and starts the dispatch loop.
	pub async fn connect(addr: SocketAddr) -> Result<Arc<Self>> {
		let stream = TcpStream::connect(addr)
			.await
			.map_err(|e| Error::ConnectionFailed(format!("{addr}: {e}")))?;
		let (transport, message_rx) = StreamTransport::from_tcp(stream);
		let connection = Arc::new(Self::new(transport.into_transport_parts(message_rx)));
		connection.spawn();
		tracing::debug!(target = "uia::connection", %addr, "connected");
		Ok(connection)
	}

	/// Spawns [`run`](Self::run) on the current runtime.
	pub fn spawn(self: &Arc<Self>) {
		let connection = Arc::clone(self);
		tokio::spawn(async move { connection.run().await });
	}

	/// Sends a request to the dispatcher and awaits the response.
	pub async fn send_message(&self, guid: &str, method: &str, params: Value) -> Result<Value> {
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		tracing::debug!(target = "uia::connection", id, guid, method, "sending request");

		let (tx, rx) = oneshot::channel();
		self.callbacks.insert(id, tx);
		let guard = CancelGuard::new(id, Arc::clone(&self.callbacks));

		// close() drains callbacks after setting the flag, so a request
		// registered after the drain has to notice the flag here
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		let request = Request {
			id,
			guid: Arc::from(guid),
			method: method.to_string(),
			params,
		};
		let request_value = serde_json::to_value(&request)?;

		if self.outbound_tx.send(request_value).is_err() {
			tracing::error!(target = "uia::connection", "outbound channel closed");
			return Err(Error::ChannelClosed);
		}

		ResponseFuture { rx, guard }.await
	}

	/// Resolves a remote interface to the guid its calls are addressed to.
	pub async fn resolve(&self, interface: Interface) -> Result<Arc<str>> {
		let params = serde_json::to_value(LookupParams { interface })?;
		let value = self.send_message("", LOOKUP_METHOD, params).await?;
		let LookupResult { guid } = serde_json::from_value(value)
			.map_err(|e| Error::ProtocolError(format!("bad lookup reply for {interface}: {e}")))?;
		if guid.is_empty() {
			return Err(Error::ProtocolError(format!(
				"dispatcher returned empty guid for {interface}"
			)));
		}
		Ok(Arc::from(guid))
	}

	/// Returns true once the connection was closed or the tunnel was lost.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Number of requests still waiting for a response.
	pub fn pending(&self) -> usize {
		self.callbacks.len()
	}

	/// Closes the connection. Idempotent; pending calls fail with
	/// [`Error::ChannelClosed`].
	pub fn close(&self) {
		if self.mark_closed("closed locally") {
			self.shutdown.notify_one();
			for task in self.io_tasks.lock().drain(..) {
				task.abort();
			}
		}
	}

	/// Sets the closed flag and fails pending calls. Returns false if the
	/// connection was already closed.
	fn mark_closed(&self, reason: &str) -> bool {
		if self.closed.swap(true, Ordering::SeqCst) {
			return false;
		}
		tracing::debug!(target = "uia::connection", reason, "connection closed");
		let ids: Vec<u32> = self.callbacks.iter().map(|entry| *entry.key()).collect();
		for id in ids {
			if let Some((_, callback)) = self.callbacks.remove(&id) {
				let _ = callback.send(Err(Error::ChannelClosed));
			}
		}
		true
	}

	/// Run the message dispatch loop until the tunnel closes.
	pub async fn run(self: &Arc<Self>) {
		let (Some(transport_receiver), Some(mut transport_sender), Some(mut outbound_rx), Some(mut message_rx)) = (
			self.transport_receiver.lock().take(),
			self.transport_sender.lock().take(),
			self.outbound_rx.lock().take(),
			self.message_rx.lock().take(),
		) else {
			tracing::warn!(target = "uia::connection", "run() called more than once");
			return;
		};

		let reader_handle = tokio::spawn(async move {
			if let Err(e) = transport_receiver.run().await {
				tracing::warn!(target = "uia::connection", error = %e, "transport read error");
			}
		});

		let writer_conn = Arc::clone(self);
		let writer_handle = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if let Err(e) = transport_sender.send(message).await {
					tracing::warn!(target = "uia::connection", error = %e, "transport write error");
					writer_conn.mark_closed("write failed");
					writer_conn.shutdown.notify_one();
					break;
				}
			}
		});

		{
			let mut tasks = self.io_tasks.lock();
			tasks.push(reader_handle);
			tasks.push(writer_handle);
		}
		if self.is_closed() {
			for task in self.io_tasks.lock().drain(..) {
				task.abort();
			}
			return;
		}

		loop {
			tokio::select! {
				message = message_rx.recv() => {
					let Some(message_value) = message else { break };
					match serde_json::from_value::<Message>(message_value) {
						Ok(message) => {
							if let Err(e) = self.dispatch_internal(message) {
								tracing::warn!(target = "uia::connection", error = %e, "dispatch failed");
							}
						}
						Err(e) => {
							tracing::warn!(target = "uia::connection", error = %e, "failed to parse message");
						}
					}
				}
				_ = self.shutdown.notified() => break,
			}
		}

		self.mark_closed("tunnel closed");
		for task in self.io_tasks.lock().drain(..) {
			task.abort();
		}
	}

	/// Dispatch an incoming message (test-only public version)
	#[cfg(test)]
	pub fn dispatch(&self, message: Message) -> Result<()> {
		self.dispatch_internal(message)
	}

	fn dispatch_internal(&self, message: Message) -> Result<()> {
		match message {
			Message::Response(response) => {
				let (_, callback) = self.callbacks.remove(&response.id).ok_or_else(|| {
					Error::ProtocolError(format!(
						"Cannot find request to respond: id={}",
						response.id
					))
				})?;

				let result = if let Some(error_wrapper) = response.error {
					Err(parse_protocol_error(error_wrapper.error))
				} else {
					Ok(response.result.unwrap_or(Value::Null))
				};

				let _ = callback.send(result);
				Ok(())
			}
			Message::Unknown(value) => {
				tracing::debug!(target = "uia::connection", frame = %value, "ignoring unknown message");
				Ok(())
			}
		}
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		for task in self.io_tasks.get_mut().drain(..) {
			task.abort();
		}
	}
}

/// Converts [`ErrorPayload`] from the dispatcher into [`Error::Remote`].
fn parse_protocol_error(error: ErrorPayload) -> Error {
	Error::Remote {
		name: error.name.unwrap_or_else(|| "Exception".to_string()),
		message: error.message,
		stack: error.stack,
	}
}

impl ConnectionLike for Connection {
	fn send_message(
		&self,
		guid: &str,
		method: &str,
		params: Value,
	) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
		let guid = guid.to_string();
		let method = method.to_string();
		Box::pin(async move { Connection::send_message(self, &guid, &method, params).await })
	}
}
