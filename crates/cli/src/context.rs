//! Command context for uia commands
//!
//! Folds the global flags over the environment-derived defaults.

use uia::{AdbConfig, DeviceRegistry, SessionConfig};

use crate::cli::Cli;
use crate::output::OutputFormat;

#[derive(Debug, Clone)]
pub struct CommandContext {
	pub format: OutputFormat,
	pub adb: AdbConfig,
	pub session: SessionConfig,
}

impl CommandContext {
	pub fn from_cli(cli: &Cli) -> Self {
		let mut adb = AdbConfig::from_env();
		if let Some(program) = &cli.adb {
			adb = adb.with_program(program);
		}
		if let Some(serial) = &cli.serial {
			adb = adb.with_serials(vec![serial.clone()]);
		}

		let mut session = SessionConfig::from_env();
		if let Some(dir) = &cli.payload_dir {
			session.tunnel = session.tunnel.with_payload_dir(dir);
		}
		if let Some(dir) = &cli.artifacts_dir {
			session = session.with_artifacts_dir(dir);
		}

		Self {
			format: cli.format,
			adb,
			session,
		}
	}

	pub fn registry(&self) -> DeviceRegistry {
		DeviceRegistry::from_config(&self.adb)
	}
}
