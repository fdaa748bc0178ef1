use std::path::Path;

use serde_json::json;
use uia::DeviceSession;

use crate::cli::{ClickArgs, ClickTarget};
use crate::context::CommandContext;
use crate::error::{CliError, Result};
use crate::output;

pub async fn click(ctx: &CommandContext, session: &DeviceSession, args: &ClickArgs) -> Result<()> {
	let target = args
		.target()
		.ok_or_else(|| CliError::InvalidInput("one of --text, --text-contains or --resource-id is required".into()))?;
	let (clicked, selector) = match &target {
		ClickTarget::Text(text) => (session.click_by_text(text).await?, json!({ "text": text })),
		ClickTarget::TextContains(fragment) => (
			session.click_by_text_contains(fragment).await?,
			json!({ "textContains": fragment }),
		),
		ClickTarget::ResourceId(id) => (session.click_by_resource_id(id).await?, json!({ "resourceId": id })),
	};
	if !clicked {
		return Err(CliError::NotPerformed(format!("no element matched {selector}")));
	}
	output::emit(ctx.format, &json!({ "clicked": true, "selector": selector }), || {
		format!("clicked {selector}")
	})?;
	Ok(())
}

pub async fn tap(ctx: &CommandContext, session: &DeviceSession, x: i32, y: i32) -> Result<()> {
	if !session.tap(x, y).await? {
		return Err(CliError::NotPerformed(format!("tap at ({x}, {y}) was rejected by the device")));
	}
	output::emit(ctx.format, &json!({ "tapped": { "x": x, "y": y } }), || format!("tapped ({x}, {y})"))?;
	Ok(())
}

pub async fn screenshot(ctx: &CommandContext, session: &DeviceSession, out: &Path) -> Result<()> {
	if !session.take_screenshot(out).await? {
		return Err(CliError::NotPerformed("device declined to take a screenshot".into()));
	}
	output::emit(ctx.format, &json!({ "path": out }), || format!("screenshot saved to {}", out.display()))?;
	Ok(())
}
