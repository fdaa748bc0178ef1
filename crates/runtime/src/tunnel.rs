//! Tunnel bring-up and teardown for one leased device.
//!
//! Opening a tunnel runs four stages in order:
//!
//! 1. push the dispatcher payloads to the device tmp dir
//! 2. launch the dispatcher under the device test runner, in the background
//! 3. reserve a local port and forward it to the dispatcher port
//! 4. connect and wait until the dispatcher answers a `lookup`
//!
//! A failure at any stage undoes what the earlier stages built before the
//! error is returned, so the caller can simply try again.
//!
//! The launch watchdog only tracks the local `adb shell` invocation. The
//! dispatcher itself is stopped by scanning the device process list for its
//! name and killing each match by PID. Anything else on the device whose name
//! contains the dispatcher name is killed along with it; the tunnel has no
//! other handle on the remote process.

#[cfg(test)]
mod tests;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use uia_protocol::{DEVICE_TMP_DIR, DISPATCHER_PORT, Interface, LOCAL_PORT_OFFSET};

use crate::adb::Adb;
use crate::command::Watchdog;
use crate::config::default_payload_dir;
use crate::connection::Connection;
use crate::error::{DeployStage, Error, Result};
use crate::ports::{PortAllocator, PortReservation};

/// Payload holding the dispatcher test class.
pub const SERVER_JAR: &str = "uia-server.jar";
/// Payload holding the dispatcher's dependencies.
pub const BUNDLE_JAR: &str = "bundle.jar";
/// Test class the device runner starts.
pub const DISPATCHER_CLASS: &str = "uia.server.Dispatcher";
/// Name the dispatcher runs under in the device process list.
pub const DISPATCHER_PROCESS: &str = "uiautomator";

/// How to deploy and reach the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
	/// Local directory containing both payload files.
	pub payload_dir: PathBuf,
	pub server_jar: String,
	pub bundle_jar: String,
	/// On-device directory the payloads are pushed to.
	pub remote_dir: String,
	pub dispatcher_class: String,
	/// Port the dispatcher listens on, on the device.
	pub remote_port: u16,
	/// Local ports are tried from `remote_port + local_port_offset` upward.
	pub local_port_offset: u16,
	pub process_name: String,
	/// Total time the dispatcher gets to start answering after launch.
	pub ready_timeout: Duration,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
}

impl Default for TunnelConfig {
	fn default() -> Self {
		Self {
			payload_dir: PathBuf::from("payload"),
			server_jar: SERVER_JAR.to_string(),
			bundle_jar: BUNDLE_JAR.to_string(),
			remote_dir: DEVICE_TMP_DIR.to_string(),
			dispatcher_class: DISPATCHER_CLASS.to_string(),
			remote_port: DISPATCHER_PORT,
			local_port_offset: LOCAL_PORT_OFFSET,
			process_name: DISPATCHER_PROCESS.to_string(),
			ready_timeout: Duration::from_secs(5),
			initial_backoff: Duration::from_millis(100),
			max_backoff: Duration::from_secs(1),
		}
	}
}

impl TunnelConfig {
	/// Defaults with the payload dir taken from `UIA_PAYLOAD_DIR`.
	pub fn from_env() -> Self {
		Self {
			payload_dir: default_payload_dir(),
			..Self::default()
		}
	}

	pub fn with_payload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.payload_dir = dir.into();
		self
	}

	pub fn with_dispatcher_class(mut self, class: impl Into<String>) -> Self {
		self.dispatcher_class = class.into();
		self
	}

	pub fn with_remote_port(mut self, port: u16) -> Self {
		self.remote_port = port;
		self
	}

	pub fn with_local_port_offset(mut self, offset: u16) -> Self {
		self.local_port_offset = offset;
		self
	}

	pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
		self.ready_timeout = timeout;
		self
	}

	pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
		self.initial_backoff = initial;
		self.max_backoff = max;
		self
	}

	/// First local port tried for the forward.
	pub fn local_port_base(&self) -> u16 {
		self.remote_port.saturating_add(self.local_port_offset)
	}

	fn payloads(&self) -> [&str; 2] {
		[self.server_jar.as_str(), self.bundle_jar.as_str()]
	}
}

/// A local port forwarded to the dispatcher port on the device.
#[derive(Debug)]
pub struct ForwardBinding {
	reservation: PortReservation,
	remote_port: u16,
}

impl ForwardBinding {
	pub fn local_port(&self) -> u16 {
		self.reservation.port()
	}

	pub fn remote_port(&self) -> u16 {
		self.remote_port
	}
}

/// A fully established tunnel: running dispatcher, forward and connection.
pub struct Tunnel {
	serial: Option<String>,
	dispatcher: Watchdog,
	forward: Option<ForwardBinding>,
	connection: Arc<Connection>,
}

impl std::fmt::Debug for Tunnel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Tunnel")
			.field("serial", &self.serial)
			.field("forward", &self.forward)
			.finish_non_exhaustive()
	}
}

impl Tunnel {
	pub fn connection(&self) -> &Arc<Connection> {
		&self.connection
	}

	pub fn local_port(&self) -> Option<u16> {
		self.forward.as_ref().map(ForwardBinding::local_port)
	}

	pub fn serial(&self) -> Option<&str> {
		self.serial.as_deref()
	}

	/// Watchdog of the local launch command.
	pub fn dispatcher(&self) -> &Watchdog {
		&self.dispatcher
	}
}

impl Drop for Tunnel {
	fn drop(&mut self) {
		// Only reached without teardown; the port goes back with the
		// reservation but the remote dispatcher and forward stay behind.
		if let Some(forward) = &self.forward {
			tracing::warn!(
				target = "uia::tunnel",
				serial = ?self.serial,
				port = forward.local_port(),
				"tunnel dropped without teardown",
			);
			self.connection.close();
			self.dispatcher.stop();
		}
	}
}

/// Deploys the dispatcher onto one device and tears it down again.
#[derive(Debug, Clone)]
pub struct TunnelManager {
	adb: Adb,
	config: TunnelConfig,
	ports: Arc<PortAllocator>,
}

impl TunnelManager {
	/// Manager drawing ports from the process-wide allocator.
	pub fn new(adb: Adb, config: TunnelConfig) -> Self {
		Self::with_ports(adb, config, PortAllocator::global())
	}

	pub fn with_ports(adb: Adb, config: TunnelConfig, ports: Arc<PortAllocator>) -> Self {
		Self { adb, config, ports }
	}

	pub fn adb(&self) -> &Adb {
		&self.adb
	}

	pub fn config(&self) -> &TunnelConfig {
		&self.config
	}

	/// Pushes the payloads and launches the dispatcher.
	pub async fn deploy(&self) -> Result<Watchdog> {
		self.push_payloads().await?;
		self.launch().await
	}

	async fn push_payloads(&self) -> Result<()> {
		for name in self.config.payloads() {
			let local = self.config.payload_dir.join(name);
			tracing::debug!(target = "uia::tunnel", local = %local.display(), "pushing payload");
			self.adb
				.push(&local, &self.config.remote_dir)
				.await
				.map_err(|e| Error::deploy(DeployStage::Push, e))?;
		}
		Ok(())
	}

	async fn launch(&self) -> Result<Watchdog> {
		let [server, bundle] = self.config.payloads();
		let command = ["uiautomator", "runtest", server, bundle, "-c", self.config.dispatcher_class.as_str()];
		let watchdog = self
			.adb
			.shell_async(&command, None)
			.await
			.map_err(|e| Error::deploy(DeployStage::Launch, e))?;
		tracing::info!(target = "uia::tunnel", serial = ?self.adb.serial(), "dispatcher launched");
		Ok(watchdog)
	}

	/// Reserves a local port and forwards it to the dispatcher port. The
	/// reservation is released again if the forward cannot be installed.
	pub async fn bind_port(&self) -> Result<ForwardBinding> {
		let reservation = self
			.ports
			.reserve(self.config.local_port_base())
			.map_err(|e| Error::deploy(DeployStage::Forward, e))?;
		let local = reservation.port();

		if let Err(e) = self.adb.forward(local, self.config.remote_port).await {
			reservation.release();
			return Err(Error::deploy(DeployStage::Forward, e));
		}
		tracing::info!(target = "uia::tunnel", local, remote = self.config.remote_port, "port forwarded");
		Ok(ForwardBinding {
			reservation,
			remote_port: self.config.remote_port,
		})
	}

	/// Connects to `local_port`, retrying with backoff until the dispatcher
	/// resolves the device interface or the readiness budget runs out.
	///
	/// A forward accepts connections even when nothing listens on the device,
	/// so an accepted socket alone does not mean the dispatcher is up.
	pub async fn connect(&self, local_port: u16) -> Result<Arc<Connection>> {
		let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, local_port));
		let deadline = tokio::time::Instant::now() + self.config.ready_timeout;
		let mut backoff = self.config.initial_backoff;
		let mut attempts = 0u32;

		loop {
			attempts += 1;
			let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
			let last_error = match tokio::time::timeout(remaining, handshake(addr)).await {
				Ok(Ok(connection)) => {
					tracing::debug!(target = "uia::tunnel", %addr, attempts, "dispatcher ready");
					return Ok(connection);
				}
				Ok(Err(e)) => e,
				Err(_) => Error::Timeout(format!("dispatcher did not answer within {:?}", self.config.ready_timeout)),
			};
			tracing::debug!(target = "uia::tunnel", %addr, attempts, error = %last_error, "dispatcher not ready");

			let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
			if remaining.is_zero() {
				return Err(Error::deploy(DeployStage::Connect, last_error));
			}
			tokio::time::sleep(backoff.min(remaining)).await;
			backoff = (backoff * 2).min(self.config.max_backoff);
		}
	}

	/// Runs every stage, reporting each to `observer` as it starts.
	pub async fn open(&self, mut observer: impl FnMut(DeployStage)) -> Result<Tunnel> {
		observer(DeployStage::Push);
		self.push_payloads().await?;

		observer(DeployStage::Launch);
		let dispatcher = self.launch().await?;

		observer(DeployStage::Forward);
		let forward = match self.bind_port().await {
			Ok(forward) => forward,
			Err(e) => {
				self.stop_dispatcher(&dispatcher).await;
				return Err(e);
			}
		};

		observer(DeployStage::Connect);
		let connection = match self.connect(forward.local_port()).await {
			Ok(connection) => connection,
			Err(e) => {
				self.remove_forward(forward).await;
				self.stop_dispatcher(&dispatcher).await;
				return Err(e);
			}
		};

		Ok(Tunnel {
			serial: self.adb.serial().map(str::to_string),
			dispatcher,
			forward: Some(forward),
			connection,
		})
	}

	/// Closes the connection, stops the dispatcher and frees the port.
	///
	/// Every step is attempted even when an earlier one fails.
	pub async fn teardown(&self, mut tunnel: Tunnel) {
		tunnel.connection.close();
		self.stop_dispatcher(&tunnel.dispatcher).await;
		if let Some(forward) = tunnel.forward.take() {
			self.remove_forward(forward).await;
		}
		tracing::info!(target = "uia::tunnel", serial = ?tunnel.serial, "tunnel torn down");
	}

	/// Kills every device process whose name contains the dispatcher name.
	/// Returns how many were killed.
	pub async fn kill_remote_dispatcher(&self) -> Result<usize> {
		let processes = self.adb.processes().await?;
		let mut killed = 0;
		for process in processes.iter().filter(|p| p.name.contains(&self.config.process_name)) {
			match self.adb.kill(process.pid).await {
				Ok(()) => {
					tracing::debug!(target = "uia::tunnel", pid = process.pid, name = %process.name, "killed dispatcher");
					killed += 1;
				}
				Err(e) => {
					tracing::warn!(target = "uia::tunnel", pid = process.pid, error = %e, "failed to kill dispatcher");
				}
			}
		}
		Ok(killed)
	}

	async fn stop_dispatcher(&self, watchdog: &Watchdog) {
		if watchdog.is_running() {
			watchdog.stop();
		}
		if let Err(e) = self.kill_remote_dispatcher().await {
			tracing::warn!(target = "uia::tunnel", error = %e, "dispatcher process scan failed");
		}
	}

	async fn remove_forward(&self, forward: ForwardBinding) {
		let local = forward.local_port();
		if let Err(e) = self.adb.forward_remove(local).await {
			tracing::warn!(target = "uia::tunnel", local, error = %e, "failed to remove forward");
		}
		forward.reservation.release();
	}
}

/// One readiness attempt: connect and resolve the device interface.
///
/// The connection is closed unless the attempt succeeds, including when the
/// caller's timeout drops this future mid-lookup.
async fn handshake(addr: SocketAddr) -> Result<Arc<Connection>> {
	let connection = Connection::connect(addr).await?;
	let guard = CloseOnDrop(Some(Arc::clone(&connection)));
	connection.resolve(Interface::Device).await?;
	guard.disarm();
	Ok(connection)
}

struct CloseOnDrop(Option<Arc<Connection>>);

impl CloseOnDrop {
	fn disarm(mut self) {
		self.0 = None;
	}
}

impl Drop for CloseOnDrop {
	fn drop(&mut self) {
		if let Some(connection) = self.0.take() {
			connection.close();
		}
	}
}
