//! Help colors for `uia --help`, cargo-flavoured.

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;

/// Green headers, cyan literals, and the same bold red as our `error:` prefix.
pub fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default().bold())
		.placeholder(AnsiColor::Cyan.on_default())
		.valid(AnsiColor::Cyan.on_default())
		.invalid(AnsiColor::Yellow.on_default().bold())
		.error(AnsiColor::Red.on_default().bold())
}
