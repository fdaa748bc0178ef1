use std::path::Path;

use serde_json::json;
use uia::DeviceSession;
use uia::hierarchy::{self, Hierarchy};

use crate::context::CommandContext;
use crate::error::{CliError, Result};
use crate::output;

/// Offline XML to JSON conversion of a saved snapshot.
pub fn parse(ctx: &CommandContext, file: &Path) -> Result<()> {
	let bytes = std::fs::read(file).map_err(|source| CliError::Read {
		path: file.to_path_buf(),
		source,
	})?;
	let hierarchy = hierarchy::parse_bytes(&bytes)?;
	print(ctx, &hierarchy)
}

pub async fn dump(ctx: &CommandContext, session: &DeviceSession, out: Option<&Path>) -> Result<()> {
	let hierarchy = session.capture_hierarchy().await?;
	let Some(out) = out else {
		return print(ctx, &hierarchy);
	};

	let body = serde_json::to_vec_pretty(&hierarchy)?;
	std::fs::write(out, body).map_err(|source| CliError::Write {
		path: out.to_path_buf(),
		source,
	})?;
	output::emit(
		ctx.format,
		&json!({ "path": out, "nodes": hierarchy.len() }),
		|| format!("{} nodes written to {}", hierarchy.len(), out.display()),
	)?;
	Ok(())
}

fn print(ctx: &CommandContext, hierarchy: &Hierarchy) -> Result<()> {
	output::emit(ctx.format, &hierarchy.to_json(), || output::hierarchy_text(hierarchy))?;
	Ok(())
}
