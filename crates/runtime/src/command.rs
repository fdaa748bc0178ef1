//! Control-channel command runner.
//!
//! [`CommandRunner`] is the seam between the bridge and the `adb` executable.
//! [`ProcessRunner`] is the real implementation; tests substitute a simulated
//! device. Both stdout and stderr of every child are drained line by line by
//! dedicated tasks, so a chatty child can never block on a full pipe.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Notify, oneshot};

use crate::error::{Error, Result};

/// adb prints push/pull progress on stderr; it is not a warning.
static TRANSFER_PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r".+? KB/s \(.+? bytes in .+?s\)|^\s*\[\s*\d+%\]|file pushed|file pulled").expect("valid regex")
});

/// Executes control-channel command lines.
#[async_trait]
pub trait CommandRunner: Send + Sync {
	/// Runs `args` to completion and returns stdout lines in order.
	///
	/// Fails with [`Error::CommandFailed`] on a non-zero exit code.
	async fn run(&self, args: &[String]) -> Result<Vec<String>>;

	/// Starts `args` in the background.
	///
	/// The child is killed when `timeout` elapses (`None` = never) or when the
	/// returned watchdog is stopped. With `output` set, stdout is appended to
	/// that file instead of being logged.
	async fn run_async(&self, args: &[String], timeout: Option<Duration>, output: Option<PathBuf>) -> Result<Watchdog>;
}

/// Handle on a background command.
///
/// Only tracks the local invocation: stopping it kills the local process,
/// not anything that process started on the device.
#[derive(Clone)]
pub struct Watchdog {
	inner: Arc<WatchdogInner>,
}

struct WatchdogInner {
	running: AtomicBool,
	kill_tx: Mutex<Option<oneshot::Sender<()>>>,
	finished: Notify,
}

/// Owner side of a [`Watchdog`]; held by whatever supervises the process.
pub struct WatchdogSignal {
	inner: Arc<WatchdogInner>,
	kill_rx: oneshot::Receiver<()>,
}

impl Watchdog {
	/// Creates a watchdog in the running state and its supervisor half.
	pub fn new() -> (Watchdog, WatchdogSignal) {
		let (kill_tx, kill_rx) = oneshot::channel();
		let inner = Arc::new(WatchdogInner {
			running: AtomicBool::new(true),
			kill_tx: Mutex::new(Some(kill_tx)),
			finished: Notify::new(),
		});
		(
			Watchdog {
				inner: Arc::clone(&inner),
			},
			WatchdogSignal { inner, kill_rx },
		)
	}

	pub fn is_running(&self) -> bool {
		self.inner.running.load(Ordering::SeqCst)
	}

	/// Asks the supervisor to kill the process. Returns whether it was still
	/// running. Idempotent.
	pub fn stop(&self) -> bool {
		let was_running = self.is_running();
		if let Some(tx) = self.inner.kill_tx.lock().take() {
			let _ = tx.send(());
		}
		was_running
	}

	/// Waits until the process finished, was killed, or timed out.
	pub async fn wait(&self) {
		loop {
			let notified = self.inner.finished.notified();
			if !self.is_running() {
				return;
			}
			notified.await;
		}
	}
}

impl WatchdogSignal {
	/// Resolves when [`Watchdog::stop`] is called.
	pub async fn killed(&mut self) {
		let _ = (&mut self.kill_rx).await;
	}

	/// Marks the process as finished and wakes waiters.
	pub fn finish(self) {
		self.inner.running.store(false, Ordering::SeqCst);
		self.inner.finished.notify_waiters();
	}
}

/// Runs commands by spawning the control-channel executable.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
	program: PathBuf,
}

impl ProcessRunner {
	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
		}
	}

	pub fn program(&self) -> &Path {
		&self.program
	}

	fn command(&self, args: &[String]) -> Command {
		let mut cmd = Command::new(&self.program);
		cmd.args(args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		cmd
	}

	fn describe(&self, args: &[String]) -> String {
		let mut line = self.program.display().to_string();
		for arg in args {
			line.push(' ');
			line.push_str(arg);
		}
		line
	}

	fn spawn_error(&self, e: std::io::Error) -> Error {
		if e.kind() == std::io::ErrorKind::NotFound {
			Error::AdbNotFound(self.program.display().to_string())
		} else {
			Error::Io(e)
		}
	}
}

#[async_trait]
impl CommandRunner for ProcessRunner {
	async fn run(&self, args: &[String]) -> Result<Vec<String>> {
		let command = self.describe(args);
		tracing::debug!(target = "uia::command", %command, "running");

		let mut child = self.command(args).spawn().map_err(|e| self.spawn_error(e))?;
		let stdout = child.stdout.take().map(|out| tokio::spawn(collect_lines(out)));
		let stderr = child.stderr.take().map(|err| tokio::spawn(collect_lines(err)));

		let status = child.wait().await?;
		let stdout = match stdout {
			Some(task) => task.await.unwrap_or_default(),
			None => Vec::new(),
		};
		let stderr = match stderr {
			Some(task) => task.await.unwrap_or_default(),
			None => Vec::new(),
		};

		let stderr: Vec<String> = stderr.into_iter().filter(|line| !TRANSFER_PROGRESS.is_match(line)).collect();
		if !status.success() {
			return Err(Error::CommandFailed {
				command,
				code: status.code(),
				stderr: stderr.join("\n"),
			});
		}
		for line in &stderr {
			tracing::warn!(target = "uia::command", %command, stderr = %line);
		}
		Ok(stdout)
	}

	async fn run_async(&self, args: &[String], timeout: Option<Duration>, output: Option<PathBuf>) -> Result<Watchdog> {
		let command = self.describe(args);
		tracing::debug!(target = "uia::command", %command, ?timeout, "starting in background");

		let mut child = self.command(args).spawn().map_err(|e| self.spawn_error(e))?;
		let (watchdog, mut signal) = Watchdog::new();

		let sink = match output {
			Some(path) => Some(
				tokio::fs::OpenOptions::new()
					.create(true)
					.append(true)
					.open(path)
					.await?,
			),
			None => None,
		};
		if let Some(out) = child.stdout.take() {
			let command = command.clone();
			tokio::spawn(async move {
				let mut lines = BufReader::new(out).lines();
				let mut sink = sink;
				while let Ok(Some(line)) = lines.next_line().await {
					match sink.as_mut() {
						Some(file) => {
							let _ = file.write_all(line.as_bytes()).await;
							let _ = file.write_all(b"\n").await;
							let _ = file.flush().await;
						}
						None => tracing::trace!(target = "uia::command", %command, stdout = %line),
					}
				}
			});
		}
		if let Some(err) = child.stderr.take() {
			let command = command.clone();
			tokio::spawn(async move {
				let mut lines = BufReader::new(err).lines();
				while let Ok(Some(line)) = lines.next_line().await {
					if !TRANSFER_PROGRESS.is_match(&line) {
						tracing::debug!(target = "uia::command", %command, stderr = %line);
					}
				}
			});
		}

		tokio::spawn(async move {
			let deadline = async {
				match timeout {
					Some(limit) => tokio::time::sleep(limit).await,
					None => std::future::pending().await,
				}
			};
			tokio::select! {
				status = child.wait() => {
					tracing::debug!(target = "uia::command", %command, ?status, "background command exited");
				}
				_ = deadline => {
					tracing::warn!(target = "uia::command", %command, "background command timed out, killing");
					let _ = child.kill().await;
				}
				_ = signal.killed() => {
					tracing::debug!(target = "uia::command", %command, "background command stopped");
					let _ = child.kill().await;
				}
			}
			signal.finish();
		});

		Ok(watchdog)
	}
}

async fn collect_lines<R: AsyncRead + Unpin>(reader: R) -> Vec<String> {
	let mut lines = BufReader::new(reader).lines();
	let mut collected = Vec::new();
	while let Ok(Some(line)) = lines.next_line().await {
		collected.push(line);
	}
	collected
}

#[cfg(test)]
mod tests {
	use super::*;

	fn args(list: &[&str]) -> Vec<String> {
		list.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn progress_lines_are_recognized() {
		assert!(TRANSFER_PROGRESS.is_match("1234 KB/s (56789 bytes in 0.044s)"));
		assert!(TRANSFER_PROGRESS.is_match("/tmp/bundle.jar: 1 file pushed, 0 skipped."));
		assert!(!TRANSFER_PROGRESS.is_match("error: device offline"));
	}

	#[tokio::test]
	async fn watchdog_stop_is_idempotent() {
		let (watchdog, mut signal) = Watchdog::new();
		let supervisor = tokio::spawn(async move {
			signal.killed().await;
			signal.finish();
		});

		assert!(watchdog.is_running());
		assert!(watchdog.stop());
		watchdog.wait().await;
		assert!(!watchdog.is_running());
		assert!(!watchdog.stop());
		supervisor.await.unwrap();
	}

	#[tokio::test]
	async fn missing_executable_is_adb_not_found() {
		let runner = ProcessRunner::new("/nonexistent/uia-test/adb");
		let err = runner.run(&args(&["devices"])).await.unwrap_err();
		assert!(matches!(err, Error::AdbNotFound(_)), "{err:?}");
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn run_collects_stdout_lines() {
		let runner = ProcessRunner::new("sh");
		let lines = runner.run(&args(&["-c", "echo first; echo second"])).await.unwrap();
		assert_eq!(lines, vec!["first", "second"]);
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn non_zero_exit_carries_stderr() {
		let runner = ProcessRunner::new("sh");
		let err = runner.run(&args(&["-c", "echo 'error: closed' >&2; exit 3"])).await.unwrap_err();
		match err {
			Error::CommandFailed { code, stderr, .. } => {
				assert_eq!(code, Some(3));
				assert_eq!(stderr, "error: closed");
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn run_drains_large_output_without_blocking() {
		let runner = ProcessRunner::new("sh");
		let lines = runner
			.run(&args(&["-c", "i=0; while [ $i -lt 20000 ]; do echo line-$i; echo err-$i >&2; i=$((i+1)); done"]))
			.await
			.unwrap();
		assert_eq!(lines.len(), 20000);
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn run_async_stops_on_request() {
		let runner = ProcessRunner::new("sh");
		let watchdog = runner.run_async(&args(&["-c", "sleep 30"]), None, None).await.unwrap();
		assert!(watchdog.is_running());

		assert!(watchdog.stop());
		tokio::time::timeout(Duration::from_secs(5), watchdog.wait()).await.unwrap();
		assert!(!watchdog.is_running());
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn run_async_times_out_and_redirects_output() {
		let dir = tempfile::tempdir().unwrap();
		let log = dir.path().join("dispatcher.log");
		let runner = ProcessRunner::new("sh");
		let watchdog = runner
			.run_async(&args(&["-c", "echo started; sleep 30"]), Some(Duration::from_millis(200)), Some(log.clone()))
			.await
			.unwrap();

		tokio::time::timeout(Duration::from_secs(5), watchdog.wait()).await.unwrap();
		assert!(!watchdog.is_running());

		tokio::time::sleep(Duration::from_millis(50)).await;
		let contents = std::fs::read_to_string(&log).unwrap();
		assert!(contents.contains("started"));
	}
}
