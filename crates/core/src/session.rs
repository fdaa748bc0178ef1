//! Session lifecycle and convenience helpers.
//!
//! A [`DeviceSession`] owns everything one test needs on one device: the
//! lease, the tunnel and the bound proxies. It walks
//! `Unstarted -> Deploying -> PortForwarding -> Connected -> Stopped`; a
//! failure before `Connected` lands straight in `Stopped` with partial
//! resources already cleaned up and the lease returned.
//!
//! Calls on one session are strictly sequential. The remote cursor is a
//! single mutable "current element", so callers must not drive the same
//! session from several tasks at once; `&mut self` on the lifecycle
//! methods only covers part of that.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use uia_protocol::{DEVICE_TMP_DIR, UiSelector};
use uia_runtime::config::default_artifacts_dir;
use uia_runtime::adb::{MAX_RECORD_TIME, RECORD_GRACE};
use uia_runtime::{
	Adb, AppVersion, DeployStage, DeviceLease, DeviceRegistry, Error, Result, Tunnel, TunnelConfig, TunnelManager, Watchdog,
};

use crate::device::UiDevice;
use crate::hierarchy::{self, Hierarchy};
use crate::object::UiObject;
use crate::remote::RemoteSession;

/// Default time to wait for a device lease.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default budget for the `wait_for_*` helpers.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(uia_protocol::DEFAULT_WAIT_MS);
/// Back presses [`DeviceSession::back_to_home`] issues by default.
pub const DEFAULT_BACK_PRESSES: u32 = 5;

const SCREENSHOT_NAME: &str = "uia-screenshot.png";
const SCREENSHOT_QUALITY: u8 = 90;

pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(60);
const INSTALL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Packages that show the "install / replace this app?" prompt.
const INSTALLER_PACKAGES: [&str; 2] = ["com.android.packageinstaller", "com.google.android.packageinstaller"];

/// Confirm buttons of the installer prompt, tried in order.
const INSTALL_PROMPT_BUTTONS: [&str; 2] = ["android:id/button1", "com.android.packageinstaller:id/ok_button"];

pub const DEFAULT_RECORD_BIT_RATE: u32 = 4_000_000;

static RECORDINGS: AtomicU32 = AtomicU32::new(0);

/// A `screenrecord` running on the device, see [`DeviceSession::record_screen`].
pub struct ScreenRecording {
	remote: String,
	watchdog: Watchdog,
	time_limit: Duration,
}

impl ScreenRecording {
	/// Where the recording lands on the device.
	pub fn remote_path(&self) -> &str {
		&self.remote
	}

	pub fn is_recording(&self) -> bool {
		self.watchdog.is_running()
	}
}

impl fmt::Debug for ScreenRecording {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ScreenRecording")
			.field("remote", &self.remote)
			.field("time_limit", &self.time_limit)
			.field("recording", &self.is_recording())
			.finish()
	}
}

/// Lifecycle position of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Unstarted,
	/// Pushing payloads and launching the dispatcher.
	Deploying,
	/// Installing the forward and waiting for the dispatcher to answer.
	PortForwarding,
	Connected,
	Stopped,
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			SessionState::Unstarted => "unstarted",
			SessionState::Deploying => "deploying",
			SessionState::PortForwarding => "port-forwarding",
			SessionState::Connected => "connected",
			SessionState::Stopped => "stopped",
		})
	}
}

impl From<DeployStage> for SessionState {
	fn from(stage: DeployStage) -> Self {
		match stage {
			DeployStage::Push | DeployStage::Launch => SessionState::Deploying,
			DeployStage::Forward | DeployStage::Connect => SessionState::PortForwarding,
		}
	}
}

/// Knobs for a [`DeviceSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
	pub tunnel: TunnelConfig,
	pub lease_timeout: Duration,
	pub wait_timeout: Duration,
	/// Local directory for pulled dumps and screenshots.
	pub artifacts_dir: PathBuf,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			tunnel: TunnelConfig::default(),
			lease_timeout: DEFAULT_LEASE_TIMEOUT,
			wait_timeout: DEFAULT_WAIT_TIMEOUT,
			artifacts_dir: std::env::temp_dir().join("uia"),
		}
	}
}

impl SessionConfig {
	pub fn from_env() -> Self {
		Self {
			tunnel: TunnelConfig::from_env(),
			artifacts_dir: default_artifacts_dir(),
			..Self::default()
		}
	}

	pub fn with_tunnel(mut self, tunnel: TunnelConfig) -> Self {
		self.tunnel = tunnel;
		self
	}

	pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
		self.lease_timeout = timeout;
		self
	}

	pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
		self.wait_timeout = timeout;
		self
	}

	pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.artifacts_dir = dir.into();
		self
	}
}

/// One leased device with a live dispatcher connection.
pub struct DeviceSession {
	config: SessionConfig,
	manager: TunnelManager,
	lease: Option<DeviceLease>,
	tunnel: Option<Tunnel>,
	remote: Option<RemoteSession>,
	history: Vec<SessionState>,
}

impl fmt::Debug for DeviceSession {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DeviceSession")
			.field("serial", &self.serial())
			.field("state", &self.state())
			.field("local_port", &self.local_port())
			.finish()
	}
}

impl DeviceSession {
	/// Wraps `lease` in an unstarted session. `adb` is narrowed to the leased serial.
	pub fn new(adb: &Adb, lease: DeviceLease, config: SessionConfig) -> Self {
		let adb = adb.for_serial(lease.serial());
		let manager = TunnelManager::new(adb, config.tunnel.clone());
		Self {
			config,
			manager,
			lease: Some(lease),
			tunnel: None,
			remote: None,
			history: vec![SessionState::Unstarted],
		}
	}

	/// Leases a device from `registry` and brings a session up on it.
	pub async fn open(registry: &DeviceRegistry, config: SessionConfig) -> Result<Self> {
		let lease = registry.acquire(config.lease_timeout).await?;
		let mut session = Self::new(registry.adb(), lease, config);
		session.start().await?;
		Ok(session)
	}

	/// Deploys, forwards, connects and binds the proxies.
	///
	/// On failure the session is `Stopped`, its lease is back in the pool and
	/// nothing is left running on the device.
	pub async fn start(&mut self) -> Result<()> {
		if self.state() != SessionState::Unstarted {
			return Err(Error::InvalidArgument(format!("cannot start a {} session", self.state())));
		}

		let mut reached = Vec::new();
		let opened = self
			.manager
			.open(|stage| {
				let state = SessionState::from(stage);
				if reached.last() != Some(&state) {
					reached.push(state);
				}
			})
			.await;
		for state in reached {
			self.transition(state);
		}

		let tunnel = match opened {
			Ok(tunnel) => tunnel,
			Err(e) => {
				tracing::warn!(target = "uia::session", serial = ?self.serial(), error = %e, "session failed to start");
				self.finish();
				return Err(e);
			}
		};

		match RemoteSession::bind(Arc::clone(tunnel.connection())).await {
			Ok(remote) => {
				self.tunnel = Some(tunnel);
				self.remote = Some(remote);
				self.transition(SessionState::Connected);
				tracing::info!(target = "uia::session", serial = ?self.serial(), port = ?self.local_port(), "session connected");
				Ok(())
			}
			Err(e) => {
				tracing::warn!(target = "uia::session", serial = ?self.serial(), error = %e, "binding proxies failed");
				self.manager.teardown(tunnel).await;
				self.finish();
				Err(e)
			}
		}
	}

	/// Tears the tunnel down and returns the lease. Idempotent.
	pub async fn stop(&mut self) {
		if self.state() == SessionState::Stopped {
			return;
		}
		if let Some(remote) = self.remote.take() {
			remote.close();
		}
		if let Some(tunnel) = self.tunnel.take() {
			self.manager.teardown(tunnel).await;
		}
		self.finish();
		tracing::info!(target = "uia::session", serial = ?self.serial(), "session stopped");
	}

	fn transition(&mut self, state: SessionState) {
		tracing::debug!(target = "uia::session", from = %self.state(), to = %state, "session state");
		self.history.push(state);
	}

	fn finish(&mut self) {
		if let Some(lease) = self.lease.take() {
			lease.release();
		}
		self.transition(SessionState::Stopped);
	}

	pub fn state(&self) -> SessionState {
		self.history.last().copied().unwrap_or(SessionState::Unstarted)
	}

	/// Every state this session has been in, oldest first.
	pub fn history(&self) -> &[SessionState] {
		&self.history
	}

	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	/// Serial of the leased device.
	pub fn serial(&self) -> Option<&str> {
		self.manager.adb().serial()
	}

	pub fn local_port(&self) -> Option<u16> {
		self.tunnel.as_ref().and_then(Tunnel::local_port)
	}

	pub fn adb(&self) -> &Adb {
		self.manager.adb()
	}

	/// The bound proxies, if connected.
	pub fn remote(&self) -> Result<&RemoteSession> {
		match (&self.remote, self.state()) {
			(Some(remote), SessionState::Connected) => Ok(remote),
			(_, state) => Err(Error::SessionNotConnected(state.to_string())),
		}
	}

	pub fn device(&self) -> Result<&UiDevice> {
		self.remote().map(RemoteSession::device)
	}

	pub fn object(&self) -> Result<&UiObject> {
		self.remote().map(RemoteSession::object)
	}

	async fn select(&self, selector: UiSelector) -> Result<&UiObject> {
		let object = self.object()?;
		object.use_selector(&selector).await?;
		Ok(object)
	}

	pub async fn resource_id_exists(&self, resource_id: &str) -> Result<bool> {
		tracing::debug!(target = "uia::session", resource_id, "look for resource id");
		self.select(UiSelector::new().resource_id(resource_id)).await?.exists().await
	}

	pub async fn text_exists(&self, text: &str) -> Result<bool> {
		tracing::debug!(target = "uia::session", text, "look for text");
		self.select(UiSelector::new().text(text)).await?.exists().await
	}

	/// Waits up to `timeout` (or the configured default) for the element.
	pub async fn wait_for_resource_id(&self, resource_id: &str, timeout: Option<Duration>) -> Result<bool> {
		self.wait_for(UiSelector::new().resource_id(resource_id), timeout).await
	}

	pub async fn wait_for_text(&self, text: &str, timeout: Option<Duration>) -> Result<bool> {
		self.wait_for(UiSelector::new().text(text), timeout).await
	}

	pub async fn wait_for_text_contains(&self, fragment: &str, timeout: Option<Duration>) -> Result<bool> {
		self.wait_for(UiSelector::new().text_contains(fragment), timeout).await
	}

	async fn wait_for(&self, selector: UiSelector, timeout: Option<Duration>) -> Result<bool> {
		let timeout = timeout.unwrap_or(self.config.wait_timeout);
		tracing::debug!(target = "uia::session", ?selector, ?timeout, "wait for element");
		let object = self.select(selector).await?;
		object.wait_for_exists(timeout).await?;
		object.exists().await
	}

	/// Clicks the element, then waits for the device to go idle.
	pub async fn click_by_resource_id(&self, resource_id: &str) -> Result<bool> {
		self.click_by(UiSelector::new().resource_id(resource_id)).await
	}

	pub async fn click_by_text(&self, text: &str) -> Result<bool> {
		self.click_by(UiSelector::new().text(text)).await
	}

	pub async fn click_by_text_contains(&self, fragment: &str) -> Result<bool> {
		self.click_by(UiSelector::new().text_contains(fragment)).await
	}

	async fn click_by(&self, selector: UiSelector) -> Result<bool> {
		tracing::debug!(target = "uia::session", ?selector, "click");
		let clicked = self.select(selector).await?.click().await?;
		self.device()?.wait_for_idle(None).await?;
		Ok(clicked)
	}

	/// Empties a text field. Some IMEs ignore the bulk clear, so leftover text
	/// is deleted one key press at a time from the end of the field.
	pub async fn clear_text_by_resource_id(&self, resource_id: &str) -> Result<()> {
		tracing::debug!(target = "uia::session", resource_id, "clear text");
		let object = self.select(UiSelector::new().resource_id(resource_id)).await?;
		object.clear_text_field().await?;
		let leftover = object.text().await?;
		if leftover.is_empty() {
			return Ok(());
		}
		object.click_bottom_right().await?;
		let device = self.device()?;
		for _ in leftover.chars() {
			device.press_delete().await?;
		}
		Ok(())
	}

	/// Replaces the field's text and dismisses the keyboard.
	pub async fn set_text_by_resource_id(&self, resource_id: &str, text: &str) -> Result<bool> {
		tracing::debug!(target = "uia::session", resource_id, text, "type text");
		self.clear_text_by_resource_id(resource_id).await?;
		let typed = self.object()?.set_text(text).await?;
		self.back().await?;
		Ok(typed)
	}

	/// Text of the element, or `None` if nothing matches.
	pub async fn get_text_by_resource_id(&self, resource_id: &str) -> Result<Option<String>> {
		let object = self.select(UiSelector::new().resource_id(resource_id)).await?;
		if !object.exists().await? {
			return Ok(None);
		}
		object.text().await.map(Some)
	}

	/// Captures the screen on the device and pulls the PNG to `local`.
	/// Returns `false` if the device declined to take the screenshot.
	pub async fn take_screenshot(&self, local: &Path) -> Result<bool> {
		if !self.device()?.take_screenshot(SCREENSHOT_NAME, 1.0, SCREENSHOT_QUALITY).await? {
			return Ok(false);
		}
		let remote = format!("{DEVICE_TMP_DIR}{SCREENSHOT_NAME}");
		self.adb().pull(&remote, local).await?;
		tracing::debug!(target = "uia::session", local = %local.display(), "screenshot saved");
		Ok(true)
	}

	/// Dumps, pulls and parses the current window hierarchy, bound to this session.
	pub async fn capture_hierarchy(&self) -> Result<Hierarchy> {
		hierarchy::capture(self.device()?, self.adb(), &self.config.artifacts_dir).await
	}

	pub async fn home(&self) -> Result<bool> {
		self.device()?.press_home().await
	}

	pub async fn back(&self) -> Result<bool> {
		self.device()?.press_back().await
	}

	pub async fn enter(&self) -> Result<bool> {
		self.device()?.press_enter().await
	}

	/// Presses back `presses` times, then home twice.
	pub async fn back_to_home(&self, presses: u32) -> Result<()> {
		for _ in 0..presses {
			self.back().await?;
		}
		self.home().await?;
		self.home().await?;
		Ok(())
	}

	/// Taps absolute device coordinates.
	pub async fn tap(&self, x: i32, y: i32) -> Result<bool> {
		self.device()?.click(x, y).await
	}

	/// The control channel, while this session still holds its device.
	fn leased_adb(&self) -> Result<&Adb> {
		if self.lease.is_none() {
			return Err(Error::SessionNotConnected(self.state().to_string()));
		}
		Ok(self.adb())
	}

	/// Installs `apk`, replacing any existing version and granting its
	/// runtime permissions. Confirms the package installer's prompt whenever
	/// it comes up. Returns whether the installer reported `Success`.
	pub async fn install(&self, apk: &Path, timeout: Option<Duration>) -> Result<bool> {
		let device = self.device()?;
		let timeout = timeout.unwrap_or(DEFAULT_INSTALL_TIMEOUT);
		self.back_to_home(DEFAULT_BACK_PRESSES).await?;

		let serial = self.serial().unwrap_or("device").replace([':', '/', '\\'], "_");
		let log = self.config.artifacts_dir.join(format!("{serial}-install.log"));
		tokio::fs::create_dir_all(&self.config.artifacts_dir).await?;
		match tokio::fs::remove_file(&log).await {
			Ok(()) => {}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => return Err(e.into()),
		}

		tracing::info!(target = "uia::session", apk = %apk.display(), ?timeout, "installing");
		let watchdog = self.adb().install_async(apk, Some(timeout), Some(log.clone())).await?;
		while watchdog.is_running() {
			let package = device.current_package_name().await?;
			if INSTALLER_PACKAGES.contains(&package.as_str()) {
				self.confirm_install_prompt().await?;
			}
			tokio::time::sleep(INSTALL_POLL_INTERVAL).await;
		}
		watchdog.wait().await;

		let output = match tokio::fs::read_to_string(&log).await {
			Ok(output) => output,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
			Err(e) => return Err(e.into()),
		};
		let installed = output.lines().any(|l| l.contains("Success"));
		if !installed {
			tracing::warn!(target = "uia::session", apk = %apk.display(), output = %output.trim(), "install failed");
		}
		Ok(installed)
	}

	async fn confirm_install_prompt(&self) -> Result<bool> {
		for button in INSTALL_PROMPT_BUTTONS {
			if self.resource_id_exists(button).await? {
				tracing::debug!(target = "uia::session", button, "confirming install prompt");
				return self.click_by_resource_id(button).await;
			}
		}
		Ok(false)
	}

	pub async fn uninstall(&self, package: &str) -> Result<bool> {
		self.leased_adb()?.uninstall(package).await
	}

	pub async fn grant_permission(&self, package: &str, permission: &str) -> Result<bool> {
		self.leased_adb()?.grant_permission(package, permission).await
	}

	pub async fn app_version(&self, package: &str) -> Result<Option<AppVersion>> {
		self.leased_adb()?.app_version(package).await
	}

	pub async fn system_language(&self) -> Result<Option<String>> {
		self.leased_adb()?.system_language().await
	}

	/// Starts `package` from its launcher activity, force-stopping any
	/// running instance first when `kill_existing` is set.
	pub async fn launch_app(&self, package: &str, kill_existing: bool) -> Result<bool> {
		let device = self.device()?;
		if kill_existing {
			self.adb().force_stop(package).await?;
			device.wait_for_idle(None).await?;
		}
		let launched = self.adb().launch_app(package).await?;
		if launched {
			device.wait_for_idle(None).await?;
		}
		Ok(launched)
	}

	/// Starts recording the screen for `duration`. Hand the result to
	/// [`save_screen_recording`](Self::save_screen_recording) to fetch the file.
	pub async fn record_screen(&self, duration: Duration, bit_rate: Option<u32>) -> Result<ScreenRecording> {
		let adb = self.leased_adb()?;
		let n = RECORDINGS.fetch_add(1, Ordering::Relaxed);
		let remote = format!("{DEVICE_TMP_DIR}uia-record-{n}.mp4");
		let watchdog = adb
			.record_screen(&remote, duration, bit_rate.unwrap_or(DEFAULT_RECORD_BIT_RATE))
			.await?;
		tracing::debug!(target = "uia::session", remote = %remote, ?duration, "recording screen");
		Ok(ScreenRecording {
			remote,
			watchdog,
			time_limit: duration.min(MAX_RECORD_TIME),
		})
	}

	/// Waits for `recording` to finish, then pulls it to `local`.
	pub async fn save_screen_recording(&self, recording: ScreenRecording, local: &Path) -> Result<()> {
		let adb = self.leased_adb()?;
		let budget = recording.time_limit + RECORD_GRACE;
		if tokio::time::timeout(budget, recording.watchdog.wait()).await.is_err() {
			tracing::warn!(target = "uia::session", remote = %recording.remote, "recording overran, stopping it");
			recording.watchdog.stop();
			recording.watchdog.wait().await;
		}
		adb.pull(&recording.remote, local).await?;
		tracing::debug!(target = "uia::session", local = %local.display(), "screen recording saved");
		Ok(())
	}

	/// Taps through `input`, bypassing the dispatcher.
	pub async fn input_tap(&self, x: i32, y: i32) -> Result<()> {
		self.leased_adb()?.input_tap(x, y).await
	}

	pub async fn input_text(&self, text: &str) -> Result<()> {
		self.leased_adb()?.input_text(text).await
	}

	pub async fn input_key_event(&self, key_code: i32) -> Result<()> {
		self.leased_adb()?.input_key_event(key_code).await
	}
}
