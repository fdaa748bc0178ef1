//! Result printing for both output formats.
//!
//! JSON goes to stdout as one pretty-printed document per command. Text is
//! for humans and may be colored. Diagnostics always go to stderr.

use std::io::{self, Write};

use colored::Colorize;
use serde::Serialize;
use uia::{DeviceInfo, Hierarchy, NodeRef};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
	/// JSON output
	Json,
	/// Human-readable text
	#[default]
	Text,
}

impl std::fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OutputFormat::Json => write!(f, "json"),
			OutputFormat::Text => write!(f, "text"),
		}
	}
}

/// Prints `value` as JSON, or `text()` in text mode.
pub fn emit<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce() -> String) -> io::Result<()> {
	let mut stdout = io::stdout().lock();
	match format {
		OutputFormat::Json => {
			serde_json::to_writer_pretty(&mut stdout, value)?;
			writeln!(stdout)
		}
		OutputFormat::Text => writeln!(stdout, "{}", text()),
	}
}

pub fn devices_text(devices: &[DeviceInfo]) -> String {
	if devices.is_empty() {
		return "no devices attached".dimmed().to_string();
	}
	devices
		.iter()
		.map(|d| format!("{}\t{}", d.serial.bold(), d.product))
		.collect::<Vec<_>>()
		.join("\n")
}

/// Indented outline of a snapshot, one node per line.
pub fn hierarchy_text(hierarchy: &Hierarchy) -> String {
	let mut out = format!("rotation {}", hierarchy.rotation());
	for node in hierarchy.iter() {
		out.push('\n');
		out.push_str(&node_line(&node));
	}
	out
}

fn node_line(node: &NodeRef<'_>) -> String {
	let indent = "  ".repeat(node.depth());
	let class = node.class_name.rsplit('.').next().unwrap_or_default();
	let mut line = format!("{indent}{}", class.cyan());
	if !node.resource_id.is_empty() {
		line.push_str(&format!(" #{}", node.resource_id));
	}
	if !node.text.is_empty() {
		line.push_str(&format!(" {:?}", node.text));
	}
	if let Some(bounds) = node.bounds {
		line.push_str(&format!(" {}", bounds.to_string().dimmed()));
	}
	line
}
