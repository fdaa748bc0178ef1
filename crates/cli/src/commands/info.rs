use serde::Serialize;
use uia::DeviceSession;

use crate::context::CommandContext;
use crate::error::Result;
use crate::output;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceSummary {
	serial: Option<String>,
	product: String,
	display_width: i32,
	display_height: i32,
	display_rotation: i32,
	current_package: String,
}

pub async fn show(ctx: &CommandContext, session: &DeviceSession) -> Result<()> {
	let device = session.device()?;
	let summary = DeviceSummary {
		serial: session.serial().map(str::to_string),
		product: device.product_name().await?,
		display_width: device.display_width().await?,
		display_height: device.display_height().await?,
		display_rotation: device.display_rotation().await?,
		current_package: device.current_package_name().await?,
	};
	output::emit(ctx.format, &summary, || {
		format!(
			"serial    {}\nproduct   {}\ndisplay   {}x{} (rotation {})\npackage   {}",
			summary.serial.as_deref().unwrap_or("-"),
			summary.product,
			summary.display_width,
			summary.display_height,
			summary.display_rotation,
			summary.current_package,
		)
	})?;
	Ok(())
}
