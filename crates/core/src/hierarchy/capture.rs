//! Fetching snapshots off the device.
//!
//! The dispatcher (or the stock `uiautomator dump` tool) writes the snapshot
//! into the device tmp dir; it is pulled into the artifacts dir and parsed
//! from there. A dump that cannot be produced or pulled is
//! [`Error::HierarchyUnavailable`], which is worth retrying, unlike a
//! malformed document.

use std::path::{Path, PathBuf};

use uia_protocol::DEVICE_TMP_DIR;
use uia_runtime::{Adb, Error, RemoteCause, Result};

use super::{Hierarchy, parse_bytes};
use crate::device::UiDevice;

const DISPATCHER_DUMP: &str = "uia-window-dump.xml";
const SHELL_DUMP: &str = "window_dump.xml";

/// Dumps through the dispatcher and binds the result to `device`.
pub async fn capture(device: &UiDevice, adb: &Adb, artifacts_dir: &Path) -> Result<Hierarchy> {
	device.dump_window_hierarchy(DISPATCHER_DUMP).await.map_err(|e| match e {
		Error::RemoteCallFailed {
			cause: RemoteCause::Remote { .. },
			..
		} => Error::HierarchyUnavailable(e.to_string()),
		other => other,
	})?;

	let remote = format!("{DEVICE_TMP_DIR}{DISPATCHER_DUMP}");
	let local = local_path(artifacts_dir, adb, DISPATCHER_DUMP);
	let mut hierarchy = pull_and_parse(adb, &remote, &local).await?;
	hierarchy.bind(device.clone());
	Ok(hierarchy)
}

/// Dumps with the stock device tool over the control channel. Needs no
/// dispatcher; the result is unbound.
pub async fn capture_with_adb(adb: &Adb, artifacts_dir: &Path) -> Result<Hierarchy> {
	let remote = format!("{DEVICE_TMP_DIR}{SHELL_DUMP}");
	let output = adb
		.shell(&["uiautomator", "dump", remote.as_str()])
		.await
		.map_err(|e| Error::HierarchyUnavailable(e.to_string()))?;
	if let Some(line) = output.iter().find(|line| line.contains("ERROR")) {
		return Err(Error::HierarchyUnavailable(line.trim().to_string()));
	}

	let local = local_path(artifacts_dir, adb, SHELL_DUMP);
	pull_and_parse(adb, &remote, &local).await
}

async fn pull_and_parse(adb: &Adb, remote: &str, local: &Path) -> Result<Hierarchy> {
	adb.pull(remote, local).await.map_err(|e| match e {
		Error::CommandFailed { .. } => Error::HierarchyUnavailable(format!("{remote}: {e}")),
		other => other,
	})?;
	let bytes = tokio::fs::read(local).await?;
	tracing::debug!(target = "uia::hierarchy", local = %local.display(), bytes = bytes.len(), "snapshot pulled");
	parse_bytes(&bytes)
}

fn local_path(artifacts_dir: &Path, adb: &Adb, name: &str) -> PathBuf {
	let serial = adb.serial().unwrap_or("device").replace([':', '/', '\\'], "_");
	artifacts_dir.join(format!("{serial}-{name}"))
}
