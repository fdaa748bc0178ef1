use std::collections::HashSet;
use std::time::Duration;

use tempfile::TempDir;

use uia_protocol::LOOKUP_METHOD;

use super::*;
use crate::testing::FakeDevice;

const SERIAL: &str = "emulator-5554";

fn payload_dir() -> TempDir {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join(SERVER_JAR), b"server").unwrap();
	std::fs::write(dir.path().join(BUNDLE_JAR), b"bundle").unwrap();
	dir
}

fn manager(device: &Arc<FakeDevice>, payloads: &TempDir) -> TunnelManager {
	let adb = Adb::new(device.clone()).for_serial(SERIAL);
	let config = TunnelConfig::default()
		.with_payload_dir(payloads.path())
		.with_ready_timeout(Duration::from_secs(2))
		.with_backoff(Duration::from_millis(10), Duration::from_millis(100));
	TunnelManager::new(adb, config)
}

#[tokio::test]
async fn open_runs_every_stage_in_order() {
	let device = FakeDevice::new(SERIAL);
	let payloads = payload_dir();
	let manager = manager(&device, &payloads);

	let mut stages = Vec::new();
	let tunnel = manager.open(|stage| stages.push(stage)).await.unwrap();

	assert_eq!(
		stages,
		vec![DeployStage::Push, DeployStage::Launch, DeployStage::Forward, DeployStage::Connect]
	);
	assert!(device.has_file("/data/local/tmp/uia-server.jar"));
	assert!(device.has_file("/data/local/tmp/bundle.jar"));
	assert_eq!(
		device.count_commands("shell uiautomator runtest uia-server.jar bundle.jar -c uia.server.Dispatcher"),
		1
	);

	let port = tunnel.local_port().unwrap();
	assert!(port >= DISPATCHER_PORT + LOCAL_PORT_OFFSET);
	assert_eq!(device.forwards(), vec![port]);
	assert_eq!(device.count_commands(&format!("forward tcp:{port} tcp:{DISPATCHER_PORT}")), 1);
	assert!(!tunnel.connection().is_closed());

	manager.teardown(tunnel).await;
}

#[tokio::test]
async fn teardown_closes_kills_and_releases() {
	let device = FakeDevice::new(SERIAL);
	let payloads = payload_dir();
	let manager = manager(&device, &payloads);

	let tunnel = manager.open(|_| {}).await.unwrap();
	let port = tunnel.local_port().unwrap();
	let connection = Arc::clone(tunnel.connection());
	assert!(PortAllocator::global().is_reserved(port));

	manager.teardown(tunnel).await;

	assert!(connection.is_closed());
	assert!(!device.dispatcher_running());
	assert!(device.forwards().is_empty());
	assert!(!PortAllocator::global().is_reserved(port));

	let commands = device.commands();
	let ps = commands.iter().position(|c| c == "shell ps -A").unwrap();
	let kill = commands.iter().position(|c| c.starts_with("shell kill ")).unwrap();
	let remove = commands.iter().position(|c| c.starts_with("forward --remove")).unwrap();
	assert!(ps < kill && kill < remove);
}

#[tokio::test]
async fn forward_failure_kills_dispatcher_and_releases_port() {
	let device = FakeDevice::new(SERIAL);
	let payloads = payload_dir();
	let ports = PortAllocator::new();
	let manager = TunnelManager::with_ports(
		Adb::new(device.clone()).for_serial(SERIAL),
		TunnelConfig::default()
			.with_payload_dir(payloads.path())
			.with_local_port_offset(20_000)
			.with_backoff(Duration::from_millis(10), Duration::from_millis(100)),
		Arc::clone(&ports),
	);
	device.fail_command("forward tcp:", 1);

	let err = manager.open(|_| {}).await.unwrap_err();
	assert_eq!(err.deploy_stage(), Some(DeployStage::Forward));
	assert!(err.is_retryable());
	assert!(!device.dispatcher_running());
	assert!(device.forwards().is_empty());
	assert_eq!(ports.reserved_count(), 0);

	let tunnel = manager.open(|_| {}).await.unwrap();
	assert!(tunnel.local_port().unwrap() >= manager.config().local_port_base());
	assert!(device.dispatcher_running());
	assert_eq!(ports.reserved_count(), 1);

	manager.teardown(tunnel).await;
	assert_eq!(ports.reserved_count(), 0);
}

#[tokio::test]
async fn missing_payload_fails_at_push_without_launching() {
	let device = FakeDevice::new(SERIAL);
	let empty = tempfile::tempdir().unwrap();
	let manager = manager(&device, &empty);

	let err = manager.open(|_| {}).await.unwrap_err();
	assert_eq!(err.deploy_stage(), Some(DeployStage::Push));
	assert!(!device.dispatcher_running());
	assert_eq!(device.count_commands("uiautomator runtest"), 0);
}

#[tokio::test]
async fn readiness_waits_for_a_slow_dispatcher() {
	let device = FakeDevice::new(SERIAL);
	device.set_ready_delay(Duration::from_millis(300));
	let payloads = payload_dir();
	let manager = manager(&device, &payloads);

	let tunnel = manager.open(|_| {}).await.unwrap();
	assert!(!tunnel.connection().is_closed());
	manager.teardown(tunnel).await;
}

#[tokio::test]
async fn readiness_budget_exhaustion_cleans_up() {
	let device = FakeDevice::new(SERIAL);
	device.set_ready_delay(Duration::from_secs(60));
	let payloads = payload_dir();
	let adb = Adb::new(device.clone()).for_serial(SERIAL);
	let manager = TunnelManager::new(
		adb,
		TunnelConfig::default()
			.with_payload_dir(payloads.path())
			.with_ready_timeout(Duration::from_millis(250))
			.with_backoff(Duration::from_millis(20), Duration::from_millis(50)),
	);

	let start = tokio::time::Instant::now();
	let err = manager.open(|_| {}).await.unwrap_err();
	assert_eq!(err.deploy_stage(), Some(DeployStage::Connect));
	assert!(start.elapsed() < Duration::from_secs(5));
	assert!(!device.dispatcher_running());
	assert!(device.forwards().is_empty());
}

#[tokio::test]
async fn timed_out_handshake_closes_its_connection() {
	let device = FakeDevice::new(SERIAL);
	for _ in 0..4 {
		device.stall_on(LOOKUP_METHOD);
	}
	let payloads = payload_dir();
	let adb = Adb::new(device.clone()).for_serial(SERIAL);
	let manager = TunnelManager::new(
		adb,
		TunnelConfig::default()
			.with_payload_dir(payloads.path())
			.with_ready_timeout(Duration::from_millis(200))
			.with_backoff(Duration::from_millis(10), Duration::from_millis(50)),
	);
	let dispatcher = manager.deploy().await.unwrap();
	let forward = manager.bind_port().await.unwrap();

	let err = manager.connect(forward.local_port()).await.unwrap_err();
	assert_eq!(err.deploy_stage(), Some(DeployStage::Connect));
	assert!(!device.calls_to(LOOKUP_METHOD).is_empty());

	// dispatcher and forward are still up, so only the client side can close
	let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
	while device.open_connections() > 0 && tokio::time::Instant::now() < deadline {
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	assert_eq!(device.open_connections(), 0);
	assert!(device.dispatcher_running());

	manager.stop_dispatcher(&dispatcher).await;
	manager.remove_forward(forward).await;
}

#[tokio::test]
async fn concurrent_tunnels_get_distinct_ports() {
	let payloads = payload_dir();
	let devices: Vec<Arc<FakeDevice>> = (0..4).map(|i| FakeDevice::new(&format!("emulator-{}", 5554 + 2 * i))).collect();

	let mut tasks = Vec::new();
	for device in &devices {
		let manager = manager(device, &payloads);
		tasks.push(tokio::spawn(async move {
			let tunnel = manager.open(|_| {}).await?;
			Ok::<_, Error>((manager, tunnel))
		}));
	}

	let mut opened = Vec::new();
	for task in tasks {
		opened.push(task.await.unwrap().unwrap());
	}
	let ports: HashSet<u16> = opened.iter().filter_map(|(_, t)| t.local_port()).collect();
	assert_eq!(ports.len(), opened.len());
	let base = DISPATCHER_PORT + LOCAL_PORT_OFFSET;
	assert!(ports.iter().all(|p| *p >= base));

	for (manager, tunnel) in opened {
		manager.teardown(tunnel).await;
	}
}

#[tokio::test]
async fn kill_by_name_targets_only_matching_processes() {
	let device = FakeDevice::new(SERIAL);
	let payloads = payload_dir();
	let manager = manager(&device, &payloads);

	assert_eq!(manager.kill_remote_dispatcher().await.unwrap(), 0);
	manager.deploy().await.unwrap();
	assert_eq!(manager.kill_remote_dispatcher().await.unwrap(), 1);
	assert!(!device.dispatcher_running());
}
