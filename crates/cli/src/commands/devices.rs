use crate::context::CommandContext;
use crate::error::Result;
use crate::output;

pub async fn list(ctx: &CommandContext) -> Result<()> {
	let registry = ctx.registry();
	let devices = registry.list_devices().await?;
	output::emit(ctx.format, &devices, || output::devices_text(devices))?;
	Ok(())
}
