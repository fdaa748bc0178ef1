use std::path::PathBuf;

use clap::Parser;

use super::*;

#[test]
fn parse_click_by_resource_id() {
	let cli = Cli::try_parse_from(["uia", "click", "--resource-id", "com.example:id/ok"]).unwrap();

	match cli.command {
		Commands::Click(args) => {
			assert_eq!(args.target(), Some(ClickTarget::ResourceId("com.example:id/ok".into())));
		}
		_ => panic!("Expected Click command"),
	}
}

#[test]
fn click_requires_exactly_one_selector() {
	assert!(Cli::try_parse_from(["uia", "click"]).is_err());
	assert!(Cli::try_parse_from(["uia", "click", "--text", "OK", "--text-contains", "O"]).is_err());
}

#[test]
fn parse_global_flags_after_subcommand() {
	let cli = Cli::try_parse_from([
		"uia",
		"screenshot",
		"--out",
		"/tmp/screen.png",
		"--serial",
		"emulator-5554",
		"-f",
		"json",
		"-vv",
	])
	.unwrap();

	assert_eq!(cli.serial.as_deref(), Some("emulator-5554"));
	assert_eq!(cli.format, OutputFormat::Json);
	assert_eq!(cli.verbose, 2);
	match cli.command {
		Commands::Screenshot { out } => assert_eq!(out, PathBuf::from("/tmp/screen.png")),
		_ => panic!("Expected Screenshot command"),
	}
}

#[test]
fn parse_tap_and_dump_defaults() {
	let cli = Cli::try_parse_from(["uia", "tap", "200", "300"]).unwrap();
	assert!(matches!(cli.command, Commands::Tap { x: 200, y: 300 }));
	assert_eq!(cli.format, OutputFormat::Text);

	let cli = Cli::try_parse_from(["uia", "dump"]).unwrap();
	assert!(matches!(cli.command, Commands::Dump { out: None }));
}

#[test]
fn parse_needs_a_file() {
	assert!(Cli::try_parse_from(["uia", "parse"]).is_err());
	let cli = Cli::try_parse_from(["uia", "parse", "window.xml"]).unwrap();
	assert!(matches!(cli.command, Commands::Parse { ref file } if file == &PathBuf::from("window.xml")));
}
