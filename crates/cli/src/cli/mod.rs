#[cfg(test)]
mod tests;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;
use crate::styles::cli_styles;

#[derive(Parser, Debug)]
#[command(name = "uia")]
#[command(about = "Android UI automation from the command line")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format: json or text
	#[arg(short = 'f', long, global = true, value_enum, default_value = "text")]
	pub format: OutputFormat,

	/// Path to the adb executable (defaults to UIA_ADB, the SDK, then PATH)
	#[arg(long, global = true, value_name = "PATH")]
	pub adb: Option<PathBuf>,

	/// Use this device instead of the first free one
	#[arg(short, long, global = true, value_name = "SERIAL")]
	pub serial: Option<String>,

	/// Directory holding uia-server.jar and bundle.jar
	#[arg(long, global = true, value_name = "DIR")]
	pub payload_dir: Option<PathBuf>,

	/// Directory for pulled dumps and screenshots
	#[arg(long, global = true, value_name = "DIR")]
	pub artifacts_dir: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// List attached devices
	Devices,

	/// Dump the current window hierarchy as JSON
	Dump {
		/// Write the JSON here instead of stdout
		#[arg(short, long, value_name = "FILE")]
		out: Option<PathBuf>,
	},

	/// Convert a saved hierarchy XML file to JSON (no device needed)
	Parse {
		/// Hierarchy snapshot produced by a dump
		file: PathBuf,
	},

	/// Click the first element matching a selector
	Click(ClickArgs),

	/// Tap absolute screen coordinates
	Tap { x: i32, y: i32 },

	/// Capture the screen to a local PNG
	#[command(alias = "ss")]
	Screenshot {
		/// Output file path
		#[arg(short, long, value_name = "FILE")]
		out: PathBuf,
	},

	/// Show product, display and foreground package
	Info,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
#[group(required = true, multiple = false)]
pub struct ClickArgs {
	/// Exact visible text
	#[arg(long)]
	pub text: Option<String>,

	/// Visible text fragment
	#[arg(long)]
	pub text_contains: Option<String>,

	/// Fully qualified resource id, e.g. com.example:id/login
	#[arg(long)]
	pub resource_id: Option<String>,
}

/// What a [`ClickArgs`] resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
	Text(String),
	TextContains(String),
	ResourceId(String),
}

impl ClickArgs {
	pub fn target(&self) -> Option<ClickTarget> {
		match (&self.text, &self.text_contains, &self.resource_id) {
			(Some(text), _, _) => Some(ClickTarget::Text(text.clone())),
			(_, Some(fragment), _) => Some(ClickTarget::TextContains(fragment.clone())),
			(_, _, Some(id)) => Some(ClickTarget::ResourceId(id.clone())),
			_ => None,
		}
	}
}
