use clap::Parser;
use colored::Colorize;

mod cli;
mod commands;
mod context;
mod error;
mod logging;
mod output;
mod styles;

use cli::Cli;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		eprintln!("{} {}", "error:".red().bold(), err.message());
		std::process::exit(1);
	}
}
