//! Error types for the UI automation runtime.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use uia_protocol::Interface;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Deployment stage at which a session failed to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStage {
	/// Pushing the payload files onto the device.
	Push,
	/// Launching the dispatcher under the device test runner.
	Launch,
	/// Reserving a local port and installing the forward.
	Forward,
	/// Waiting for the dispatcher to answer through the tunnel.
	Connect,
}

impl fmt::Display for DeployStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			DeployStage::Push => "push",
			DeployStage::Launch => "launch",
			DeployStage::Forward => "forward",
			DeployStage::Connect => "connect",
		})
	}
}

/// Why a remote call did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCause {
	/// Socket-level failure while writing or reading.
	Transport(String),
	/// The dispatcher sent something that does not fit the protocol.
	Protocol(String),
	/// The connection is gone, either closed locally or lost mid-call.
	ChannelClosed,
	/// The dispatcher raised an exception while executing the method.
	Remote { name: String, message: String },
}

impl fmt::Display for RemoteCause {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RemoteCause::Transport(msg) => write!(f, "transport error: {msg}"),
			RemoteCause::Protocol(msg) => write!(f, "protocol error: {msg}"),
			RemoteCause::ChannelClosed => f.write_str("connection closed"),
			RemoteCause::Remote { name, message } => write!(f, "{name}: {message}"),
		}
	}
}

/// Errors that can occur while driving a device.
#[derive(Debug, Error)]
pub enum Error {
	/// The control-channel executable could not be found or spawned.
	#[error("adb executable not found: {0}. Set UIA_ADB or add adb to PATH")]
	AdbNotFound(String),

	/// A control-channel command exited with a non-zero status.
	#[error("command `{command}` failed with exit code {code:?}: {stderr}")]
	CommandFailed {
		command: String,
		code: Option<i32>,
		stderr: String,
	},

	/// Device enumeration returned nothing.
	#[error("no devices attached")]
	NoDevices,

	/// No device lease became free within the wait budget.
	#[error("no device lease available after {0:?}")]
	LeaseTimeout(Duration),

	/// Bringing up the tunnel failed; partial resources were cleaned up.
	#[error("deployment failed at {stage} stage: {source}")]
	DeployFailed {
		stage: DeployStage,
		#[source]
		source: Box<Error>,
	},

	/// No free local port left in the forward range.
	#[error("no free local port at or above {0}")]
	PortsExhausted(u16),

	/// Failed to establish a connection with the dispatcher.
	#[error("failed to connect to dispatcher: {0}")]
	ConnectionFailed(String),

	/// Transport-level error on the framed socket.
	#[error("transport error: {0}")]
	TransportError(String),

	/// Protocol-level error (framing or JSON shape).
	#[error("protocol error: {0}")]
	ProtocolError(String),

	/// Exception raised by the dispatcher while executing a call.
	#[error("{name}: {message}")]
	Remote {
		name: String,
		message: String,
		stack: Option<String>,
	},

	/// Connection closed before a response arrived.
	#[error("channel closed unexpectedly")]
	ChannelClosed,

	/// A proxy call failed for any reason other than a negative result.
	#[error("remote call {interface}.{method} failed: {cause}")]
	RemoteCallFailed {
		interface: Interface,
		method: String,
		cause: RemoteCause,
	},

	/// The hierarchy dump could not be produced, usually because the device
	/// automation service pre-empted the dispatcher. Retrying may succeed.
	#[error("hierarchy dump unavailable: {0}")]
	HierarchyUnavailable(String),

	/// Malformed hierarchy snapshot.
	#[error("hierarchy parse error: {0}")]
	HierarchyParse(String),

	/// Live action requested on a hierarchy with no bound session.
	#[error("hierarchy is not bound to a session")]
	NotBound,

	/// Operation requires a connected session.
	#[error("session is not connected (state: {0})")]
	SessionNotConnected(String),

	/// Invalid argument provided to method.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// Timeout waiting for an operation.
	#[error("timeout: {0}")]
	Timeout(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Wraps a connection-level failure as a failed call on `interface.method`.
	pub fn into_remote_call(self, interface: Interface, method: &str) -> Error {
		let cause = match self {
			Error::RemoteCallFailed { .. } => return self,
			Error::Remote { name, message, .. } => RemoteCause::Remote { name, message },
			Error::ChannelClosed => RemoteCause::ChannelClosed,
			Error::ProtocolError(msg) => RemoteCause::Protocol(msg),
			Error::Json(e) => RemoteCause::Protocol(e.to_string()),
			Error::TransportError(msg) | Error::ConnectionFailed(msg) => RemoteCause::Transport(msg),
			Error::Io(e) => RemoteCause::Transport(e.to_string()),
			other => RemoteCause::Transport(other.to_string()),
		};
		Error::RemoteCallFailed {
			interface,
			method: method.to_string(),
			cause,
		}
	}

	/// Returns true for failures of the bridge itself, as opposed to
	/// negative results returned by remote operations.
	pub fn is_remote_call_failure(&self) -> bool {
		matches!(self, Error::RemoteCallFailed { .. })
	}

	/// Returns true when retrying the same operation may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Error::LeaseTimeout(_) | Error::HierarchyUnavailable(_) | Error::DeployFailed { .. }
		)
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		match self {
			Error::Timeout(_) | Error::LeaseTimeout(_) => true,
			Error::RemoteCallFailed {
				cause: RemoteCause::Remote { name, .. },
				..
			} => name.contains("Timeout"),
			_ => false,
		}
	}

	/// Deployment stage, if this error came out of tunnel bring-up.
	pub fn deploy_stage(&self) -> Option<DeployStage> {
		match self {
			Error::DeployFailed { stage, .. } => Some(*stage),
			_ => None,
		}
	}

	pub(crate) fn deploy(stage: DeployStage, source: Error) -> Error {
		Error::DeployFailed {
			stage,
			source: Box::new(source),
		}
	}
}
