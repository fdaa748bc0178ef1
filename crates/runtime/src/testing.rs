//! In-process device simulator for tests that must not need hardware.
//!
//! [`FakeDevice`] implements [`CommandRunner`] and keeps the device-side state
//! adb would touch: pushed files, the dispatcher process, port forwards and
//! the process table. Installing a forward binds the host port for real and
//! serves the framed dispatcher protocol on it while the dispatcher is
//! running, so the full tunnel path can be exercised end to end.
//!
//! As on a real device, stopping the local watchdog of the launch command
//! does not stop the dispatcher; only `shell kill <pid>` does. `ps` behaves
//! like toybox unless [`FakeDevice::set_legacy_ps`] is set: the dispatcher is
//! only listed by `ps -A`.
//!
//! Installs complete immediately, or, with [`FakeDevice::set_install_prompt`],
//! once the dispatcher sees a click on one of the installer's confirm buttons.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uia_protocol::{DEVICE_TMP_DIR, LOOKUP_METHOD};

use crate::adb::AppVersion;
use crate::command::{CommandRunner, Watchdog};
use crate::error::{Error, Result};
use crate::transport::{read_frame, write_frame};

/// Process name the simulated dispatcher shows up as in `ps`.
pub const FAKE_DISPATCHER_NAME: &str = "uiautomator";

/// Foreground package while no app has been launched.
pub const FAKE_LAUNCHER: &str = "com.android.launcher3";

/// Foreground package while an install waits for confirmation.
pub const FAKE_INSTALLER: &str = "com.android.packageinstaller";

/// Resource id of the confirm button on the simulated install prompt.
pub const FAKE_INSTALL_CONFIRM: &str = "android:id/button1";

/// Version every simulated install reports.
pub const FAKE_APP_VERSION: (&str, &str) = ("1.0.0", "100");

/// One call received by the simulated dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
	pub guid: String,
	pub method: String,
	pub params: Value,
}

#[derive(Debug, Clone)]
enum Reply {
	Value(Value),
	Error { name: String, message: String },
	Hangup,
	/// Reads the request and never answers it.
	Stall,
}

struct PendingInstall {
	package: String,
	log: Option<PathBuf>,
	done: oneshot::Sender<()>,
}

struct Injected {
	pattern: String,
	remaining: usize,
	stderr: String,
}

struct DeviceState {
	serial: String,
	online: bool,
	files: HashMap<String, Vec<u8>>,
	hierarchy: Option<String>,
	dispatcher_pid: Option<u32>,
	launched_at: Option<Instant>,
	ready_delay: Duration,
	next_pid: u32,
	forwards: HashMap<u16, JoinHandle<()>>,
	connections: Vec<JoinHandle<()>>,
	failures: Vec<Injected>,
	queued: HashMap<String, VecDeque<Reply>>,
	defaults: HashMap<String, Reply>,
	calls: Vec<RemoteCall>,
	commands: Vec<String>,
	legacy_ps: bool,
	props: HashMap<String, String>,
	packages: HashMap<String, AppVersion>,
	granted: Vec<(String, String)>,
	foreground: String,
	install_prompt: bool,
	pending_install: Option<PendingInstall>,
	selected_resource_id: Option<String>,
}

/// Simulated device reachable through a fake control channel.
pub struct FakeDevice {
	state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
	pub fn new(serial: &str) -> Arc<Self> {
		Arc::new(Self {
			state: Arc::new(Mutex::new(DeviceState {
				serial: serial.to_string(),
				online: true,
				files: HashMap::new(),
				hierarchy: None,
				dispatcher_pid: None,
				launched_at: None,
				ready_delay: Duration::ZERO,
				next_pid: 4000,
				forwards: HashMap::new(),
				connections: Vec::new(),
				failures: Vec::new(),
				queued: HashMap::new(),
				defaults: HashMap::new(),
				calls: Vec::new(),
				commands: Vec::new(),
				legacy_ps: false,
				props: HashMap::from([
					("ro.product.model".to_string(), "fake".to_string()),
					("ro.product.brand".to_string(), "fake".to_string()),
				]),
				packages: HashMap::new(),
				granted: Vec::new(),
				foreground: FAKE_LAUNCHER.to_string(),
				install_prompt: false,
				pending_install: None,
				selected_resource_id: None,
			})),
		})
	}

	/// Makes `devices` report nothing.
	pub fn set_online(&self, online: bool) {
		self.state.lock().online = online;
	}

	/// XML the dispatcher writes when asked to dump the hierarchy.
	pub fn set_hierarchy(&self, xml: &str) {
		self.state.lock().hierarchy = Some(xml.to_string());
	}

	/// Delay between launch and the dispatcher accepting connections.
	pub fn set_ready_delay(&self, delay: Duration) {
		self.state.lock().ready_delay = delay;
	}

	/// Result returned for every call to `method` unless one is queued.
	pub fn reply(&self, method: &str, value: Value) {
		self.state.lock().defaults.insert(method.to_string(), Reply::Value(value));
	}

	/// Result returned for the next call to `method` only.
	pub fn reply_once(&self, method: &str, value: Value) {
		self.queue(method, Reply::Value(value));
	}

	/// Exception raised by the next call to `method`.
	pub fn reply_error(&self, method: &str, name: &str, message: &str) {
		self.queue(
			method,
			Reply::Error {
				name: name.to_string(),
				message: message.to_string(),
			},
		);
	}

	/// Drops the connection instead of answering the next call to `method`.
	pub fn hang_up_on(&self, method: &str) {
		self.queue(method, Reply::Hangup);
	}

	/// Leaves the next call to `method` unanswered while keeping the socket open.
	pub fn stall_on(&self, method: &str) {
		self.queue(method, Reply::Stall);
	}

	/// Makes `ps` behave like pre-toybox builds: bare `ps` lists everything and
	/// `-A` is read as a pid filter.
	pub fn set_legacy_ps(&self, legacy: bool) {
		self.state.lock().legacy_ps = legacy;
	}

	/// Value `getprop name` prints; unset properties print an empty line.
	pub fn set_prop(&self, name: &str, value: &str) {
		self.state.lock().props.insert(name.to_string(), value.to_string());
	}

	/// Holds installs on the package installer until it is confirmed.
	pub fn set_install_prompt(&self, prompt: bool) {
		self.state.lock().install_prompt = prompt;
	}

	/// Installs `package` directly, as if it had been there all along.
	pub fn add_package(&self, package: &str, name: &str, code: &str) {
		self.state.lock().packages.insert(
			package.to_string(),
			AppVersion {
				name: name.to_string(),
				code: code.to_string(),
			},
		);
	}

	pub fn has_package(&self, package: &str) -> bool {
		self.state.lock().packages.contains_key(package)
	}

	/// Permissions granted so far, as `(package, permission)` pairs.
	pub fn granted(&self) -> Vec<(String, String)> {
		self.state.lock().granted.clone()
	}

	pub fn foreground(&self) -> String {
		self.state.lock().foreground.clone()
	}

	/// Dispatcher connections whose serving task is still alive.
	pub fn open_connections(&self) -> usize {
		self.state.lock().connections.iter().filter(|c| !c.is_finished()).count()
	}

	fn queue(&self, method: &str, reply: Reply) {
		self.state.lock().queued.entry(method.to_string()).or_default().push_back(reply);
	}

	/// Fails the next `times` commands whose line contains `pattern`.
	pub fn fail_command(&self, pattern: &str, times: usize) {
		self.state.lock().failures.push(Injected {
			pattern: pattern.to_string(),
			remaining: times,
			stderr: format!("error: injected failure for '{pattern}'"),
		});
	}

	/// Drops every open dispatcher connection, as if the cable was pulled.
	pub fn drop_connections(&self) {
		for task in self.state.lock().connections.drain(..) {
			task.abort();
		}
	}

	/// Dispatcher calls received so far, lookups excluded.
	pub fn calls(&self) -> Vec<RemoteCall> {
		self.state.lock().calls.iter().filter(|c| c.method != LOOKUP_METHOD).cloned().collect()
	}

	pub fn calls_to(&self, method: &str) -> Vec<RemoteCall> {
		self.state.lock().calls.iter().filter(|c| c.method == method).cloned().collect()
	}

	/// Every command line received, without the `-s <serial>` prefix.
	pub fn commands(&self) -> Vec<String> {
		self.state.lock().commands.clone()
	}

	pub fn count_commands(&self, pattern: &str) -> usize {
		self.state.lock().commands.iter().filter(|c| c.contains(pattern)).count()
	}

	pub fn dispatcher_running(&self) -> bool {
		self.state.lock().dispatcher_pid.is_some()
	}

	pub fn forwards(&self) -> Vec<u16> {
		let mut ports: Vec<u16> = self.state.lock().forwards.keys().copied().collect();
		ports.sort_unstable();
		ports
	}

	pub fn has_file(&self, remote: &str) -> bool {
		self.state.lock().files.contains_key(remote)
	}

	pub fn put_file(&self, remote: &str, bytes: &[u8]) {
		self.state.lock().files.insert(remote.to_string(), bytes.to_vec());
	}

	fn check_failure(&self, line: &str) -> Result<()> {
		let mut state = self.state.lock();
		if let Some(injected) = state.failures.iter_mut().find(|f| f.remaining > 0 && line.contains(&f.pattern)) {
			injected.remaining -= 1;
			return Err(Error::CommandFailed {
				command: format!("adb {line}"),
				code: Some(1),
				stderr: injected.stderr.clone(),
			});
		}
		Ok(())
	}

	fn record(&self, args: &[String]) -> Vec<String> {
		let args: Vec<String> = match args {
			[flag, _serial, rest @ ..] if flag == "-s" => rest.to_vec(),
			_ => args.to_vec(),
		};
		self.state.lock().commands.push(args.join(" "));
		args
	}

	fn kill_dispatcher(&self) {
		let mut state = self.state.lock();
		state.dispatcher_pid = None;
		state.launched_at = None;
		for task in state.connections.drain(..) {
			task.abort();
		}
	}

	async fn forward(&self, local: u16) -> Result<Vec<String>> {
		let listener = TcpListener::bind(("127.0.0.1", local)).await.map_err(|e| Error::CommandFailed {
			command: format!("adb forward tcp:{local}"),
			code: Some(1),
			stderr: format!("error: cannot bind listener: {e}"),
		})?;
		let state = Arc::clone(&self.state);
		let task = tokio::spawn(async move {
			while let Ok((socket, _)) = listener.accept().await {
				let ready = {
					let s = state.lock();
					matches!(s.launched_at, Some(at) if s.dispatcher_pid.is_some() && at.elapsed() >= s.ready_delay)
				};
				if !ready {
					// adb accepts and closes when nothing listens on the device side
					drop(socket);
					continue;
				}
				let conn_state = Arc::clone(&state);
				let handle = tokio::spawn(serve_dispatcher(socket, conn_state));
				state.lock().connections.push(handle);
			}
		});
		if let Some(old) = self.state.lock().forwards.insert(local, task) {
			old.abort();
		}
		Ok(Vec::new())
	}

	fn shell(&self, cmd: &[String]) -> Result<Vec<String>> {
		let cmd: Vec<&str> = cmd.iter().map(String::as_str).collect();
		let mut state = self.state.lock();
		match cmd.as_slice() {
			["ps", rest @ ..] => {
				let all = rest == ["-A"];
				let mut out = vec!["USER           PID  PPID     VSZ    RSS WCHAN            ADDR S NAME".to_string()];
				if all == state.legacy_ps {
					// toybox without -A, or toolbox filtering on pid "-A"
					if !state.legacy_ps {
						out.push("shell         9100   1   10000   2000 sigsuspend          0 S sh".to_string());
						out.push("shell         9101 9100  10000   2000 0                   0 R ps".to_string());
					}
					return Ok(out);
				}
				out.push("root             1     0   10000   2000 SyS_epoll_          0 S init".to_string());
				if let Some(pid) = state.dispatcher_pid {
					out.push(format!(
						"shell        {pid}   600 1234567  89012 do_sys_poll         0 S {FAKE_DISPATCHER_NAME}"
					));
				}
				Ok(out)
			}
			["kill", pid] => {
				let pid: u32 = pid.parse().map_err(|_| Error::InvalidArgument(pid.to_string()))?;
				if state.dispatcher_pid == Some(pid) {
					drop(state);
					self.kill_dispatcher();
					Ok(Vec::new())
				} else {
					Ok(vec![format!("/system/bin/sh: kill: {pid}: No such process")])
				}
			}
			["rm", path, ..] => {
				state.files.remove(*path);
				Ok(Vec::new())
			}
			["ls", path] => {
				if state.files.contains_key(*path) {
					Ok(vec![path.to_string()])
				} else {
					Err(Error::CommandFailed {
						command: format!("adb shell ls {path}"),
						code: Some(1),
						stderr: format!("ls: {path}: No such file or directory"),
					})
				}
			}
			["uiautomator", "dump", path] => match state.hierarchy.clone() {
				Some(xml) => {
					state.files.insert(path.to_string(), xml.into_bytes());
					Ok(vec![format!("UI hierchary dumped to: {path}")])
				}
				None => Ok(vec!["ERROR: null root node returned by UiTestAutomationBridge.".to_string()]),
			},
			["screencap", "-p", path] => {
				state.files.insert(path.to_string(), FAKE_PNG.to_vec());
				Ok(Vec::new())
			}
			["getprop", name] => Ok(vec![state.props.get(*name).cloned().unwrap_or_default()]),
			["pm", "grant", package, permission] => {
				if !state.packages.contains_key(*package) {
					return Err(Error::CommandFailed {
						command: format!("adb shell pm grant {package} {permission}"),
						code: Some(255),
						stderr: format!(
							"Exception occurred while executing 'grant': java.lang.IllegalArgumentException: Unknown package: {package}"
						),
					});
				}
				state.granted.push((package.to_string(), permission.to_string()));
				Ok(Vec::new())
			}
			["dumpsys", "package", package] => match state.packages.get(*package) {
				Some(version) => Ok(vec![
					"Packages:".to_string(),
					format!("  Package [{package}] (c0ffee):"),
					format!("    versionCode={} minSdk=24 targetSdk=34", version.code),
					format!("    versionName={}", version.name),
				]),
				None => Ok(vec![format!("Unable to find package: {package}")]),
			},
			["am", "force-stop", package] => {
				if state.foreground == *package {
					state.foreground = FAKE_LAUNCHER.to_string();
				}
				Ok(Vec::new())
			}
			["monkey", "-p", package, ..] => {
				if state.packages.contains_key(*package) {
					state.foreground = package.to_string();
					Ok(vec!["Events injected: 1".to_string()])
				} else {
					Ok(vec!["** No activities found to run, monkey aborted.".to_string()])
				}
			}
			_ => Ok(Vec::new()),
		}
	}
}

/// Smallest byte sequence the tests treat as a PNG.
pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

/// Bytes `screenrecord` leaves behind.
pub const FAKE_MP4: &[u8] = b"\0\0\0\x18ftypmp42fake";

fn complete_install(state: &mut DeviceState, package: String, log: Option<&Path>) {
	if let Some(log) = log {
		let _ = std::fs::write(log, "Performing Streamed Install\nSuccess\n");
	}
	let (name, code) = FAKE_APP_VERSION;
	state.packages.insert(
		package,
		AppVersion {
			name: name.to_string(),
			code: code.to_string(),
		},
	);
	state.foreground = FAKE_LAUNCHER.to_string();
}

#[async_trait]
impl CommandRunner for FakeDevice {
	async fn run(&self, args: &[String]) -> Result<Vec<String>> {
		let args = self.record(args);
		let line = args.join(" ");
		self.check_failure(&line)?;

		match args.first().map(String::as_str) {
			Some("devices") => {
				let state = self.state.lock();
				let mut out = vec!["List of devices attached".to_string()];
				if state.online {
					out.push(format!("{}\tdevice product:fake model:Fake transport_id:1", state.serial));
				}
				Ok(out)
			}
			Some("push") if args.len() == 3 => {
				let local = Path::new(&args[1]);
				let bytes = std::fs::read(local)?;
				let mut remote = args[2].clone();
				if remote.ends_with('/') {
					if let Some(name) = local.file_name() {
						remote.push_str(&name.to_string_lossy());
					}
				}
				self.state.lock().files.insert(remote, bytes);
				Ok(vec!["1 file pushed, 0 skipped.".to_string()])
			}
			Some("pull") if args.len() == 3 => {
				let bytes = self.state.lock().files.get(&args[1]).cloned();
				match bytes {
					Some(bytes) => {
						std::fs::write(PathBuf::from(&args[2]), bytes)?;
						Ok(vec!["1 file pulled, 0 skipped.".to_string()])
					}
					None => Err(Error::CommandFailed {
						command: format!("adb {line}"),
						code: Some(1),
						stderr: format!("adb: error: failed to stat remote object '{}': No such file or directory", args[1]),
					}),
				}
			}
			Some("forward") => match args.get(1).map(String::as_str) {
				Some("--remove") => {
					let port = args.get(2).and_then(|a| a.strip_prefix("tcp:")).and_then(|p| p.parse::<u16>().ok());
					if let Some(task) = port.and_then(|p| self.state.lock().forwards.remove(&p)) {
						task.abort();
					}
					Ok(Vec::new())
				}
				Some(spec) => {
					let port = spec
						.strip_prefix("tcp:")
						.and_then(|p| p.parse::<u16>().ok())
						.ok_or_else(|| Error::InvalidArgument(spec.to_string()))?;
					self.forward(port).await
				}
				None => Err(Error::InvalidArgument("forward needs arguments".into())),
			},
			Some("shell") => self.shell(&args[1..]),
			Some("uninstall") if args.len() == 2 => {
				if self.state.lock().packages.remove(&args[1]).is_some() {
					Ok(vec!["Success".to_string()])
				} else {
					Err(Error::CommandFailed {
						command: format!("adb {line}"),
						code: Some(1),
						stderr: "Failure [DELETE_FAILED_INTERNAL_ERROR]".to_string(),
					})
				}
			}
			_ => Ok(Vec::new()),
		}
	}

	async fn run_async(&self, args: &[String], _timeout: Option<Duration>, output: Option<PathBuf>) -> Result<Watchdog> {
		let args = self.record(args);
		let line = args.join(" ");
		self.check_failure(&line)?;

		let (watchdog, mut signal) = Watchdog::new();
		let parts: Vec<&str> = args.iter().map(String::as_str).collect();
		if let ["install", "-rg", apk] = parts.as_slice() {
			let package = Path::new(apk)
				.file_stem()
				.map(|s| s.to_string_lossy().into_owned())
				.unwrap_or_default();
			let mut state = self.state.lock();
			if state.install_prompt {
				let (done, finished) = oneshot::channel();
				state.foreground = FAKE_INSTALLER.to_string();
				state.pending_install = Some(PendingInstall { package, log: output, done });
				tokio::spawn(async move {
					tokio::select! {
						_ = signal.killed() => {}
						_ = finished => {}
					}
					signal.finish();
				});
			} else {
				complete_install(&mut state, package, output.as_deref());
				signal.finish();
			}
		} else if let ["shell", "screenrecord", .., remote] = parts.as_slice() {
			self.state.lock().files.insert(remote.to_string(), FAKE_MP4.to_vec());
			signal.finish();
		} else if line.contains("uiautomator runtest") {
			{
				let mut state = self.state.lock();
				let pid = state.next_pid;
				state.next_pid += 1;
				state.dispatcher_pid = Some(pid);
				state.launched_at = Some(Instant::now());
			}
			tokio::spawn(async move {
				signal.killed().await;
				signal.finish();
			});
		} else {
			signal.finish();
		}
		Ok(watchdog)
	}
}

async fn serve_dispatcher(mut socket: TcpStream, state: Arc<Mutex<DeviceState>>) {
	loop {
		let request = match read_frame(&mut socket).await {
			Ok(Some(request)) => request,
			_ => return,
		};
		let id = request["id"].clone();
		let call = RemoteCall {
			guid: request["guid"].as_str().unwrap_or_default().to_string(),
			method: request["method"].as_str().unwrap_or_default().to_string(),
			params: request["params"].clone(),
		};

		let reply = {
			let mut s = state.lock();
			s.calls.push(call.clone());
			answer(&mut s, &call)
		};

		let response = match reply {
			Reply::Value(result) => json!({"id": id, "result": result}),
			Reply::Error { name, message } => json!({"id": id, "error": {"error": {"name": name, "message": message}}}),
			Reply::Hangup => return,
			Reply::Stall => continue,
		};
		if write_frame(&mut socket, &response).await.is_err() {
			return;
		}
	}
}

fn answer(state: &mut DeviceState, call: &RemoteCall) -> Reply {
	if call.method == LOOKUP_METHOD {
		if let Some(reply) = state.queued.get_mut(LOOKUP_METHOD).and_then(VecDeque::pop_front) {
			return reply;
		}
		let name = call.params["interface"].as_str().unwrap_or("Unknown");
		return Reply::Value(json!({"guid": format!("{name}@{}", state.serial)}));
	}

	// side effects happen even when the result is scripted
	match call.method.as_str() {
		"useUiObjectSelector" => {
			state.selected_resource_id = call.params["selector"]["resourceId"].as_str().map(str::to_string);
		}
		"click" if call.params.get("x").is_none() => {
			if state.selected_resource_id.as_deref() == Some(FAKE_INSTALL_CONFIRM) {
				if let Some(pending) = state.pending_install.take() {
					complete_install(state, pending.package, pending.log.as_deref());
					let _ = pending.done.send(());
				}
			}
		}
		"dumpWindowHierarchy" => {
			if let (Some(name), Some(xml)) = (call.params["fileName"].as_str(), state.hierarchy.clone()) {
				state.files.insert(format!("{DEVICE_TMP_DIR}{name}"), xml.into_bytes());
			}
		}
		"takeScreenshot" => {
			if let Some(name) = call.params["fileName"].as_str() {
				state.files.insert(format!("{DEVICE_TMP_DIR}{name}"), FAKE_PNG.to_vec());
			}
		}
		_ => {}
	}

	if let Some(reply) = state.queued.get_mut(&call.method).and_then(VecDeque::pop_front) {
		return reply;
	}
	if let Some(reply) = state.defaults.get(&call.method) {
		return reply.clone();
	}
	match call.method.as_str() {
		"getCurrentPackageName" => Reply::Value(Value::String(state.foreground.clone())),
		"dumpWindowHierarchy" | "useUiObjectSelector" | "useUiCollectionSelector" | "useUiScrollableSelector" | "wakeUp" | "sleep" | "waitForIdle" => {
			Reply::Value(Value::Null)
		}
		_ => Reply::Value(Value::Bool(true)),
	}
}

impl Drop for FakeDevice {
	fn drop(&mut self) {
		let mut state = self.state.lock();
		for (_, task) in state.forwards.drain() {
			task.abort();
		}
		for task in state.connections.drain(..) {
			task.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::adb::Adb;

	#[tokio::test]
	async fn launch_and_kill_track_the_process_table() {
		let device = FakeDevice::new("emulator-5554");
		let adb = Adb::new(device.clone()).for_serial("emulator-5554");

		let watchdog = adb
			.shell_async(&["uiautomator", "runtest", "uia-server.jar"], None)
			.await
			.unwrap();
		assert!(device.dispatcher_running());

		// the local watchdog does not own the remote process
		watchdog.stop();
		watchdog.wait().await;
		assert!(device.dispatcher_running());

		let procs = adb.processes().await.unwrap();
		let dispatcher = procs.iter().find(|p| p.name == FAKE_DISPATCHER_NAME).unwrap();
		adb.kill(dispatcher.pid).await.unwrap();
		assert!(!device.dispatcher_running());
	}

	#[tokio::test]
	async fn injected_failures_are_consumed() {
		let device = FakeDevice::new("emulator-5554");
		let adb = Adb::new(device.clone());
		device.fail_command("shell getprop", 1);

		assert!(adb.getprop("ro.product.model").await.is_err());
		assert_eq!(adb.getprop("ro.product.model").await.unwrap(), "fake");
	}
}
