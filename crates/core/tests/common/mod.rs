//! Shared fixture: a simulated device behind its own registry.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use uia::{DeviceRegistry, DeviceSession, SessionConfig, TunnelConfig};
use uia_runtime::testing::FakeDevice;
use uia_runtime::tunnel::{BUNDLE_JAR, SERVER_JAR};

pub struct Fixture {
	pub device: Arc<FakeDevice>,
	pub registry: DeviceRegistry,
	pub config: SessionConfig,
	pub payloads: TempDir,
	pub artifacts: TempDir,
}

pub fn fixture(serial: &str) -> Fixture {
	let device = FakeDevice::new(serial);
	let payloads = tempfile::tempdir().unwrap();
	std::fs::write(payloads.path().join(SERVER_JAR), b"server").unwrap();
	std::fs::write(payloads.path().join(BUNDLE_JAR), b"bundle").unwrap();
	let artifacts = tempfile::tempdir().unwrap();
	let config = SessionConfig::default()
		.with_tunnel(
			TunnelConfig::default()
				.with_payload_dir(payloads.path())
				.with_ready_timeout(Duration::from_secs(2))
				.with_backoff(Duration::from_millis(10), Duration::from_millis(100)),
		)
		.with_lease_timeout(Duration::from_millis(200))
		.with_artifacts_dir(artifacts.path());
	Fixture {
		registry: DeviceRegistry::new(device.clone(), None),
		device,
		config,
		payloads,
		artifacts,
	}
}

impl Fixture {
	/// Opens a connected session on this fixture's device.
	pub async fn connect(&self) -> DeviceSession {
		DeviceSession::open(&self.registry, self.config.clone()).await.unwrap()
	}
}
