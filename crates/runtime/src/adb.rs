//! Serial-scoped wrapper over the control channel.
//!
//! Every method maps onto one adb invocation. Output parsing for `devices -l`,
//! `ps` and `dumpsys package` lives here so callers only see typed rows.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::command::{CommandRunner, Watchdog};
use crate::error::{Error, Result};

/// Product label used when only the serial is known.
pub const UNKNOWN_PRODUCT: &str = "na";

/// An attached device as reported by the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceInfo {
	pub serial: String,
	pub product: String,
}

impl DeviceInfo {
	pub fn new(serial: impl Into<String>, product: impl Into<String>) -> Self {
		Self {
			serial: serial.into(),
			product: product.into(),
		}
	}
}

/// A row of the device's `ps` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProcess {
	pub user: String,
	pub pid: u32,
	pub name: String,
}

/// Installed version of an app, from `dumpsys package`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppVersion {
	pub name: String,
	pub code: String,
}

impl fmt::Display for AppVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}-{}", self.name, self.code)
	}
}

/// Longest recording `screenrecord` accepts.
pub const MAX_RECORD_TIME: Duration = Duration::from_secs(180);

/// Extra time the local `screenrecord` invocation gets to flush the file.
pub const RECORD_GRACE: Duration = Duration::from_secs(5);

/// Properties holding the system language, most specific first. Newer
/// releases only set the locale ones (`en-US`).
const LANGUAGE_PROPS: [&str; 4] = [
	"persist.sys.language",
	"ro.product.locale.language",
	"persist.sys.locale",
	"ro.product.locale",
];

/// Control channel, optionally pinned to one device serial.
#[derive(Clone)]
pub struct Adb {
	runner: Arc<dyn CommandRunner>,
	serial: Option<String>,
}

impl std::fmt::Debug for Adb {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Adb").field("serial", &self.serial).finish_non_exhaustive()
	}
}

impl Adb {
	pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
		Self { runner, serial: None }
	}

	/// Returns a copy that targets `serial` with `-s`.
	pub fn for_serial(&self, serial: impl Into<String>) -> Self {
		Self {
			runner: Arc::clone(&self.runner),
			serial: Some(serial.into()),
		}
	}

	pub fn serial(&self) -> Option<&str> {
		self.serial.as_deref()
	}

	pub fn runner(&self) -> &Arc<dyn CommandRunner> {
		&self.runner
	}

	fn args<S: AsRef<str>>(&self, rest: &[S]) -> Vec<String> {
		let mut args = Vec::with_capacity(rest.len() + 2);
		if let Some(serial) = &self.serial {
			args.push("-s".to_string());
			args.push(serial.clone());
		}
		args.extend(rest.iter().map(|s| s.as_ref().to_string()));
		args
	}

	/// Raw invocation with the serial prefix applied.
	pub async fn run<S: AsRef<str>>(&self, rest: &[S]) -> Result<Vec<String>> {
		self.runner.run(&self.args(rest)).await
	}

	/// Lists devices in the `device` state, in the order adb reports them.
	pub async fn devices(&self) -> Result<Vec<DeviceInfo>> {
		let lines = self.runner.run(&["devices".to_string(), "-l".to_string()]).await?;
		Ok(parse_devices(&lines))
	}

	pub async fn push(&self, local: &Path, remote: &str) -> Result<()> {
		if !local.is_file() {
			return Err(Error::InvalidArgument(format!("payload not found: {}", local.display())));
		}
		let local = local.display().to_string();
		self.run(&["push", local.as_str(), remote]).await?;
		Ok(())
	}

	/// Pulls `remote` to `local`, replacing any stale local copy, then removes
	/// the remote file so the next dump cannot be mistaken for this one.
	pub async fn pull(&self, remote: &str, local: &Path) -> Result<()> {
		match tokio::fs::remove_file(local).await {
			Ok(()) => {}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => return Err(e.into()),
		}
		if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
			tokio::fs::create_dir_all(parent).await?;
		}

		let local_str = local.display().to_string();
		self.run(&["pull", remote, local_str.as_str()]).await?;

		if !tokio::fs::try_exists(local).await.unwrap_or(false) {
			return Err(Error::CommandFailed {
				command: format!("pull {remote}"),
				code: None,
				stderr: format!("{} was not created", local.display()),
			});
		}

		if let Err(e) = self.shell(&["rm", remote]).await {
			tracing::debug!(target = "uia::adb", remote, error = %e, "failed to remove pulled file");
		}
		Ok(())
	}

	/// Maps host `tcp:local` to device `tcp:remote`.
	pub async fn forward(&self, local: u16, remote: u16) -> Result<()> {
		let local = format!("tcp:{local}");
		let remote = format!("tcp:{remote}");
		self.run(&["forward", local.as_str(), remote.as_str()]).await?;
		Ok(())
	}

	pub async fn forward_remove(&self, local: u16) -> Result<()> {
		let local = format!("tcp:{local}");
		self.run(&["forward", "--remove", local.as_str()]).await?;
		Ok(())
	}

	pub async fn shell<S: AsRef<str>>(&self, command: &[S]) -> Result<Vec<String>> {
		let mut rest = vec!["shell".to_string()];
		rest.extend(command.iter().map(|s| s.as_ref().to_string()));
		self.run(&rest).await
	}

	/// Fire-and-forget shell command; `timeout = None` never expires.
	pub async fn shell_async<S: AsRef<str>>(&self, command: &[S], timeout: Option<Duration>) -> Result<Watchdog> {
		let mut rest = vec!["shell".to_string()];
		rest.extend(command.iter().map(|s| s.as_ref().to_string()));
		self.runner.run_async(&self.args(&rest), timeout, None).await
	}

	pub async fn file_exists(&self, remote: &str) -> Result<bool> {
		match self.shell(&["ls", remote]).await {
			Ok(lines) => Ok(!lines.iter().any(|l| l.contains("No such file"))),
			Err(Error::CommandFailed { .. }) => Ok(false),
			Err(e) => Err(e),
		}
	}

	/// Every process on the device.
	///
	/// Toybox `ps` (Android 8+) only lists the caller's own session without
	/// `-A`. Older toolbox builds read `-A` as a pid filter and print just the
	/// header, so an empty `-A` listing falls back to bare `ps`.
	pub async fn processes(&self) -> Result<Vec<DeviceProcess>> {
		match self.shell(&["ps", "-A"]).await {
			Ok(lines) => {
				let rows = parse_ps(&lines);
				if !rows.is_empty() {
					return Ok(rows);
				}
			}
			Err(Error::CommandFailed { stderr, .. }) => {
				tracing::debug!(target = "uia::adb", stderr = %stderr, "ps -A rejected");
			}
			Err(e) => return Err(e),
		}
		let lines = self.shell(&["ps"]).await?;
		Ok(parse_ps(&lines))
	}

	pub async fn kill(&self, pid: u32) -> Result<()> {
		let pid = pid.to_string();
		self.shell(&["kill", pid.as_str()]).await?;
		Ok(())
	}

	pub async fn getprop(&self, name: &str) -> Result<String> {
		let lines = self.shell(&["getprop", name]).await?;
		Ok(lines.into_iter().next().unwrap_or_default().trim().to_string())
	}

	/// Two-letter system language, e.g. `en`, or `None` if no property is set.
	pub async fn system_language(&self) -> Result<Option<String>> {
		for prop in LANGUAGE_PROPS {
			let value = self.getprop(prop).await?;
			if let Some(language) = value.split(['-', '_']).next().filter(|l| !l.is_empty()) {
				return Ok(Some(language.to_string()));
			}
		}
		Ok(None)
	}

	/// Starts `adb install -rg <apk>` in the background: replace any existing
	/// install and grant every runtime permission. With `log` set the
	/// installer's output lands there, so the caller can look for `Success`.
	pub async fn install_async(&self, apk: &Path, timeout: Option<Duration>, log: Option<PathBuf>) -> Result<Watchdog> {
		if !apk.is_file() {
			return Err(Error::InvalidArgument(format!("apk not found: {}", apk.display())));
		}
		let apk = apk.display().to_string();
		tracing::debug!(target = "uia::adb", apk = %apk, "installing");
		self.runner
			.run_async(&self.args(&["install", "-rg", apk.as_str()]), timeout, log)
			.await
	}

	/// Removes `package`. Returns false if the package manager refused.
	pub async fn uninstall(&self, package: &str) -> Result<bool> {
		match self.run(&["uninstall", package]).await {
			Ok(lines) => Ok(lines.iter().any(|l| l.contains("Success"))),
			Err(Error::CommandFailed { stderr, .. }) => {
				tracing::debug!(target = "uia::adb", package, stderr = %stderr, "uninstall refused");
				Ok(false)
			}
			Err(e) => Err(e),
		}
	}

	/// Grants a runtime permission. `pm grant` is silent on success.
	pub async fn grant_permission(&self, package: &str, permission: &str) -> Result<bool> {
		match self.shell(&["pm", "grant", package, permission]).await {
			Ok(lines) => Ok(!lines.iter().any(|l| is_pm_failure(l))),
			Err(Error::CommandFailed { stderr, .. }) => {
				tracing::debug!(target = "uia::adb", package, permission, stderr = %stderr, "grant refused");
				Ok(false)
			}
			Err(e) => Err(e),
		}
	}

	/// Installed version of `package`, or `None` if it is not installed.
	pub async fn app_version(&self, package: &str) -> Result<Option<AppVersion>> {
		let lines = self.shell(&["dumpsys", "package", package]).await?;
		Ok(parse_app_version(&lines))
	}

	pub async fn force_stop(&self, package: &str) -> Result<()> {
		self.shell(&["am", "force-stop", package]).await?;
		Ok(())
	}

	/// Starts the launcher activity of `package` through `monkey`.
	/// Returns false if the package has nothing to launch.
	pub async fn launch_app(&self, package: &str) -> Result<bool> {
		let lines = match self
			.shell(&["monkey", "-p", package, "-c", "android.intent.category.LAUNCHER", "1"])
			.await
		{
			Ok(lines) => lines,
			Err(Error::CommandFailed { stderr, .. }) => vec![stderr],
			Err(e) => return Err(e),
		};
		let aborted = lines.iter().any(|l| l.contains("monkey aborted") || l.contains("No activities found"));
		if aborted {
			tracing::debug!(target = "uia::adb", package, "nothing to launch");
		}
		Ok(!aborted)
	}

	/// Records the screen into `remote` for `time_limit` (at most
	/// [`MAX_RECORD_TIME`]). The watchdog finishes when the file is complete.
	pub async fn record_screen(&self, remote: &str, time_limit: Duration, bit_rate: u32) -> Result<Watchdog> {
		let secs = time_limit.as_secs();
		if secs == 0 || time_limit > MAX_RECORD_TIME {
			return Err(Error::InvalidArgument(format!(
				"screen recording must last 1..={}s, got {time_limit:?}",
				MAX_RECORD_TIME.as_secs()
			)));
		}
		let secs = secs.to_string();
		let bit_rate = bit_rate.to_string();
		self.shell_async(
			&["screenrecord", "--time-limit", secs.as_str(), "--bit-rate", bit_rate.as_str(), remote],
			Some(time_limit + RECORD_GRACE),
		)
		.await
	}

	/// Raw `input` command, bypassing the dispatcher.
	pub async fn input<S: AsRef<str>>(&self, args: &[S]) -> Result<Vec<String>> {
		let mut command = vec!["input".to_string()];
		command.extend(args.iter().map(|s| s.as_ref().to_string()));
		self.shell(&command).await
	}

	pub async fn input_tap(&self, x: i32, y: i32) -> Result<()> {
		let (x, y) = (x.to_string(), y.to_string());
		self.input(&["tap", x.as_str(), y.as_str()]).await?;
		Ok(())
	}

	/// Types `text` into the focused field. Spaces and shell metacharacters
	/// are escaped for the device shell.
	pub async fn input_text(&self, text: &str) -> Result<()> {
		let escaped = escape_input_text(text);
		self.input(&["text", escaped.as_str()]).await?;
		Ok(())
	}

	pub async fn input_key_event(&self, key_code: i32) -> Result<()> {
		let key_code = key_code.to_string();
		self.input(&["keyevent", key_code.as_str()]).await?;
		Ok(())
	}
}

fn is_pm_failure(line: &str) -> bool {
	line.contains("Exception") || line.starts_with("Error") || line.starts_with("Failure") || line.contains("Unknown package")
}

/// Escapes text for `input text`: `%s` stands for a space, and characters
/// the device shell would interpret get a backslash.
pub fn escape_input_text(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	for c in text.chars() {
		match c {
			' ' => out.push_str("%s"),
			'\\' | '\'' | '"' | '`' | '$' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '*' | '~' | '?' | '#' | '!' => {
				out.push('\\');
				out.push(c);
			}
			_ => out.push(c),
		}
	}
	out
}

/// Pulls `versionName` and `versionCode` out of `dumpsys package` output.
///
/// ```text
///     versionCode=4212 minSdk=24 targetSdk=34
///     versionName=4.2.1
/// ```
pub fn parse_app_version(lines: &[String]) -> Option<AppVersion> {
	let field = |key: &str| {
		lines.iter().find_map(|line| {
			line.split_whitespace()
				.find_map(|token| token.strip_prefix(key))
				.filter(|v| !v.is_empty())
				.map(str::to_string)
		})
	};
	Some(AppVersion {
		name: field("versionName=")?,
		code: field("versionCode=")?,
	})
}

/// Parses `adb devices -l` output.
///
/// ```text
/// List of devices attached
/// emulator-5554          device product:sdk_gphone64 model:Pixel_6 device:emu64 transport_id:1
/// 0123456789ABCDEF       unauthorized usb:1-1 transport_id:2
/// ```
pub fn parse_devices(lines: &[String]) -> Vec<DeviceInfo> {
	lines
		.iter()
		.filter_map(|line| {
			let mut fields = line.split_whitespace();
			let serial = fields.next()?;
			if fields.next()? != "device" {
				return None;
			}
			let rest: Vec<&str> = fields.collect();
			let product = rest
				.iter()
				.find_map(|f| f.strip_prefix("product:"))
				.map(str::to_string)
				.unwrap_or_else(|| {
					if rest.is_empty() {
						UNKNOWN_PRODUCT.to_string()
					} else {
						rest.join(" ")
					}
				});
			Some(DeviceInfo::new(serial, product))
		})
		.collect()
}

/// Parses `ps` output: PID is the second column, name the last.
pub fn parse_ps(lines: &[String]) -> Vec<DeviceProcess> {
	lines
		.iter()
		.filter_map(|line| {
			let fields: Vec<&str> = line.split_whitespace().collect();
			if fields.len() < 3 || fields[0] == "USER" {
				return None;
			}
			let pid = fields[1].parse().ok()?;
			Some(DeviceProcess {
				user: fields[0].to_string(),
				pid,
				name: fields[fields.len() - 1].to_string(),
			})
		})
		.collect()
}
