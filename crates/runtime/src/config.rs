//! Environment-driven configuration for the control channel.
//!
//! | variable | meaning |
//! |---|---|
//! | `UIA_ADB` | explicit path to the adb executable |
//! | `ANDROID_HOME` / `ANDROID_SDK_ROOT` | SDK root; `platform-tools/adb` is tried |
//! | `UIA_SERIALS` | comma-separated serials, bypasses device enumeration |
//! | `UIA_PAYLOAD_DIR` | local directory holding the dispatcher payload |
//! | `UIA_ARTIFACTS_DIR` | local directory for pulled dumps and screenshots |

use std::path::PathBuf;

pub const ADB_ENV: &str = "UIA_ADB";
pub const SERIALS_ENV: &str = "UIA_SERIALS";
pub const PAYLOAD_DIR_ENV: &str = "UIA_PAYLOAD_DIR";
pub const ARTIFACTS_DIR_ENV: &str = "UIA_ARTIFACTS_DIR";

const SDK_ENVS: [&str; 2] = ["ANDROID_HOME", "ANDROID_SDK_ROOT"];

/// How to reach the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbConfig {
	/// adb executable; resolved lazily, a missing binary surfaces on first use.
	pub program: PathBuf,
	/// When set, these serials are used instead of `adb devices`.
	pub serials: Option<Vec<String>>,
}

impl Default for AdbConfig {
	fn default() -> Self {
		Self {
			program: PathBuf::from(adb_file_name()),
			serials: None,
		}
	}
}

impl AdbConfig {
	/// Builds the config from the process environment.
	pub fn from_env() -> Self {
		Self {
			program: locate_adb(),
			serials: std::env::var(SERIALS_ENV).ok().and_then(|raw| parse_serials(&raw)),
		}
	}

	pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
		self.program = program.into();
		self
	}

	pub fn with_serials(mut self, serials: Vec<String>) -> Self {
		self.serials = Some(serials);
		self
	}
}

/// Finds adb: `UIA_ADB`, then the SDK platform-tools, then `PATH`.
pub fn locate_adb() -> PathBuf {
	if let Some(explicit) = std::env::var_os(ADB_ENV).filter(|v| !v.is_empty()) {
		return PathBuf::from(explicit);
	}

	for var in SDK_ENVS {
		if let Some(root) = std::env::var_os(var) {
			let candidate = PathBuf::from(root).join("platform-tools").join(adb_file_name());
			if candidate.is_file() {
				return candidate;
			}
		}
	}

	match which::which("adb") {
		Ok(path) => path,
		Err(e) => {
			tracing::debug!(target = "uia::config", error = %e, "adb not on PATH, deferring to spawn");
			PathBuf::from(adb_file_name())
		}
	}
}

/// Directory pulled artifacts land in when nothing else is configured.
pub fn default_artifacts_dir() -> PathBuf {
	if let Some(dir) = std::env::var_os(ARTIFACTS_DIR_ENV).filter(|v| !v.is_empty()) {
		return PathBuf::from(dir);
	}
	dirs::cache_dir()
		.unwrap_or_else(std::env::temp_dir)
		.join("uia")
}

/// Directory holding the payload files when nothing else is configured.
pub fn default_payload_dir() -> PathBuf {
	std::env::var_os(PAYLOAD_DIR_ENV)
		.filter(|v| !v.is_empty())
		.map(PathBuf::from)
		.unwrap_or_else(|| PathBuf::from("payload"))
}

/// Splits a comma-separated serial list, dropping blanks.
pub fn parse_serials(raw: &str) -> Option<Vec<String>> {
	let serials: Vec<String> = raw
		.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(str::to_string)
		.collect();
	(!serials.is_empty()).then_some(serials)
}

fn adb_file_name() -> &'static str {
	if cfg!(windows) { "adb.exe" } else { "adb" }
}
