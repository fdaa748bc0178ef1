//! Framed JSON transport over the forwarded tunnel socket.
//!
//! Every message is a 4-byte little-endian length prefix followed by that
//! many bytes of UTF-8 JSON. The transport is split into a sending half and a
//! receiving half so the connection can own the writer task and the reader
//! task independently.


use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Frames larger than this are treated as a protocol violation.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Sending half of a transport.
pub trait Transport: Send {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Receiving half of a transport; forwards decoded messages until EOF.
pub trait TransportReceiver: Send {
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// Both halves plus the channel decoded messages are delivered on.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Length-prefixed JSON transport over any async byte stream.
pub struct StreamTransport<W, R> {
	writer: W,
	reader: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl StreamTransport<OwnedWriteHalf, OwnedReadHalf> {
	/// Splits a connected TCP stream into a transport.
	pub fn from_tcp(stream: TcpStream) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let _ = stream.set_nodelay(true);
		let (reader, writer) = stream.into_split();
		Self::new(writer, reader)
	}
}

impl<W, R> StreamTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		(
			Self {
				writer,
				reader,
				message_tx,
			},
			message_rx,
		)
	}

	/// Splits into sender and receiver halves.
	pub fn into_parts(self) -> (StreamTransportSender<W>, StreamTransportReceiver<R>) {
		(
			StreamTransportSender {
				writer: self.writer,
			},
			StreamTransportReceiver {
				reader: self.reader,
				message_tx: self.message_tx,
			},
		)
	}

	/// Boxes both halves for handing to a [`Connection`](crate::Connection).
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		let (sender, receiver) = self.into_parts();
		TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		}
	}

	/// Reads frames until EOF, forwarding them on the message channel.
	pub async fn run(&mut self) -> Result<()> {
		read_frames(&mut self.reader, &self.message_tx).await
	}

	pub async fn send(&mut self, message: Value) -> Result<()> {
		write_frame(&mut self.writer, &message).await
	}
}

pub struct StreamTransportSender<W> {
	writer: W,
}

impl<W> Transport for StreamTransportSender<W>
where
	W: AsyncWrite + Unpin + Send + 'static,
{
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move { write_frame(&mut self.writer, &message).await })
	}
}

pub struct StreamTransportReceiver<R> {
	reader: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<R> TransportReceiver for StreamTransportReceiver<R>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move { read_frames(&mut self.reader, &self.message_tx).await })
	}
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let bytes = serde_json::to_vec(message)?;
	let length = u32::try_from(bytes.len())
		.map_err(|_| Error::ProtocolError(format!("frame too large: {} bytes", bytes.len())))?;

	writer
		.write_all(&length.to_le_bytes())
		.await
		.map_err(|e| Error::TransportError(format!("Failed to write length prefix: {e}")))?;
	writer
		.write_all(&bytes)
		.await
		.map_err(|e| Error::TransportError(format!("Failed to write frame body: {e}")))?;
	writer
		.flush()
		.await
		.map_err(|e| Error::TransportError(format!("Failed to flush frame: {e}")))?;
	Ok(())
}

/// Reads one frame. Returns `Ok(None)` on a clean EOF at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>>
where
	R: AsyncRead + Unpin,
{
	let mut len_buf = [0u8; 4];
	let mut filled = 0;
	while filled < len_buf.len() {
		let n = reader
			.read(&mut len_buf[filled..])
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read length prefix: {e}")))?;
		if n == 0 {
			if filled == 0 {
				return Ok(None);
			}
			return Err(Error::TransportError(format!(
				"Failed to read length prefix: EOF after {filled} bytes"
			)));
		}
		filled += n;
	}

	let length = u32::from_le_bytes(len_buf) as usize;
	if length > MAX_FRAME_LEN {
		return Err(Error::ProtocolError(format!(
			"frame length {length} exceeds limit of {MAX_FRAME_LEN}"
		)));
	}

	let mut body = vec![0u8; length];
	reader
		.read_exact(&mut body)
		.await
		.map_err(|e| Error::TransportError(format!("Failed to read frame body: {e}")))?;

	serde_json::from_slice(&body)
		.map(Some)
		.map_err(|e| Error::ProtocolError(format!("invalid JSON frame: {e}")))
}

async fn read_frames<R>(reader: &mut R, message_tx: &mpsc::UnboundedSender<Value>) -> Result<()>
where
	R: AsyncRead + Unpin,
{
	while let Some(message) = read_frame(reader).await? {
		if message_tx.send(message).is_err() {
			tracing::debug!(target = "uia::transport", "message receiver dropped, stopping reader");
			break;
		}
	}
	Ok(())
}
