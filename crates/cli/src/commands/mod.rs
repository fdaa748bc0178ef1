mod devices;
mod info;
mod input;
mod snapshot;

use uia::DeviceSession;

use crate::cli::{Cli, Commands};
use crate::context::CommandContext;
use crate::error::Result;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let ctx = CommandContext::from_cli(&cli);

	// commands that never touch the dispatcher
	match &cli.command {
		Commands::Parse { file } => return snapshot::parse(&ctx, file),
		Commands::Devices => return devices::list(&ctx).await,
		_ => {}
	}

	let registry = ctx.registry();
	let mut session = DeviceSession::open(&registry, ctx.session.clone()).await?;
	tracing::info!(target = "uia::cli", serial = ?session.serial(), "session ready");

	let result = match cli.command {
		Commands::Dump { out } => snapshot::dump(&ctx, &session, out.as_deref()).await,
		Commands::Click(args) => input::click(&ctx, &session, &args).await,
		Commands::Tap { x, y } => input::tap(&ctx, &session, x, y).await,
		Commands::Screenshot { out } => input::screenshot(&ctx, &session, &out).await,
		Commands::Info => info::show(&ctx, &session).await,
		Commands::Parse { .. } | Commands::Devices => Ok(()),
	};

	session.stop().await;
	result
}
