//! Session lifecycle against the simulated device.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{Fixture, fixture};
use serde_json::json;
use uia::{DeployStage, DeviceSession, Error, RemoteCause, SessionState};
use uia_protocol::{DISPATCHER_PORT, LOCAL_PORT_OFFSET};

#[tokio::test]
async fn start_walks_every_state_and_stop_releases_everything() {
	let fx = fixture("emulator-5554");

	let mut session = DeviceSession::open(&fx.registry, fx.config.clone()).await.unwrap();
	assert_eq!(
		session.history(),
		&[
			SessionState::Unstarted,
			SessionState::Deploying,
			SessionState::PortForwarding,
			SessionState::Connected,
		]
	);
	assert_eq!(session.serial(), Some("emulator-5554"));
	let port = session.local_port().unwrap();
	assert!(port >= DISPATCHER_PORT + LOCAL_PORT_OFFSET);
	assert_eq!(fx.device.forwards(), vec![port]);
	assert!(fx.device.dispatcher_running());

	let pool = fx.registry.pool().await.unwrap();
	assert_eq!(pool.snapshot(), (1, 0));

	session.stop().await;
	assert_eq!(session.state(), SessionState::Stopped);
	assert!(!fx.device.dispatcher_running());
	assert!(fx.device.forwards().is_empty());
	assert_eq!(pool.snapshot(), (0, 1));

	session.stop().await;
	assert_eq!(session.history().iter().filter(|s| **s == SessionState::Stopped).count(), 1);
	assert_eq!(fx.device.count_commands("forward --remove"), 1);
}

#[tokio::test]
async fn calls_on_a_stopped_session_are_rejected() {
	let fx = fixture("emulator-5556");
	let mut session = DeviceSession::open(&fx.registry, fx.config.clone()).await.unwrap();
	session.stop().await;

	let err = session.text_exists("OK").await.unwrap_err();
	assert!(matches!(err, Error::SessionNotConnected(ref state) if state == "stopped"), "{err}");
	assert!(matches!(session.tap(1, 1).await, Err(Error::SessionNotConnected(_))));
	assert!(session.start().await.is_err());
}

#[tokio::test]
async fn unstarted_session_has_no_proxies() {
	let fx = fixture("emulator-5558");
	let lease = fx.registry.acquire(Duration::from_millis(100)).await.unwrap();
	let session = DeviceSession::new(fx.registry.adb(), lease, fx.config.clone());

	assert_eq!(session.state(), SessionState::Unstarted);
	assert!(matches!(session.device(), Err(Error::SessionNotConnected(ref s)) if s == "unstarted"));
	assert!(fx.device.commands().iter().all(|c| !c.starts_with("push")));
}

#[tokio::test]
async fn forward_failure_stops_the_session_and_a_retry_succeeds() {
	let fx = fixture("emulator-5560");
	fx.device.fail_command("forward tcp:", 1);

	let lease = fx.registry.acquire(Duration::from_millis(100)).await.unwrap();
	let mut session = DeviceSession::new(fx.registry.adb(), lease, fx.config.clone());
	let err = session.start().await.unwrap_err();

	assert_eq!(err.deploy_stage(), Some(DeployStage::Forward));
	assert_eq!(
		session.history(),
		&[
			SessionState::Unstarted,
			SessionState::Deploying,
			SessionState::PortForwarding,
			SessionState::Stopped,
		]
	);
	assert!(!fx.device.dispatcher_running());
	assert!(fx.device.forwards().is_empty());
	assert_eq!(fx.registry.pool().await.unwrap().available(), 1);

	let mut retry = DeviceSession::open(&fx.registry, fx.config.clone()).await.unwrap();
	assert_eq!(retry.state(), SessionState::Connected);
	assert!(fx.device.dispatcher_running());
	retry.stop().await;
}

#[tokio::test]
async fn push_failure_never_reaches_port_forwarding() {
	let fx = fixture("emulator-5562");
	fx.device.fail_command("push", 1);

	let err = DeviceSession::open(&fx.registry, fx.config.clone()).await.unwrap_err();
	assert_eq!(err.deploy_stage(), Some(DeployStage::Push));
	assert!(err.is_retryable());
	assert_eq!(fx.device.count_commands("uiautomator runtest"), 0);
	assert_eq!(fx.registry.pool().await.unwrap().available(), 1);
}

#[tokio::test]
async fn busy_device_times_out_the_second_lease() {
	let fx = fixture("emulator-5564");
	let mut first = DeviceSession::open(&fx.registry, fx.config.clone()).await.unwrap();

	let err = DeviceSession::open(&fx.registry, fx.config.clone()).await.unwrap_err();
	assert!(matches!(err, Error::LeaseTimeout(_)), "{err}");
	assert!(err.is_retryable());

	first.stop().await;
	let mut second = DeviceSession::open(&fx.registry, fx.config.clone()).await.unwrap();
	second.stop().await;
}

#[tokio::test]
async fn offline_device_reports_no_devices() {
	let fx = fixture("emulator-5566");
	fx.device.set_online(false);
	let err = DeviceSession::open(&fx.registry, fx.config.clone()).await.unwrap_err();
	assert!(matches!(err, Error::NoDevices), "{err}");
}

#[tokio::test]
async fn concurrent_sessions_get_distinct_ports() {
	let fx: Vec<Fixture> = (0..4).map(|i| fixture(&format!("emulator-{}", 5600 + i * 2))).collect();

	// all four scan from the same base at once
	let (a, b, c, d) = tokio::join!(
		DeviceSession::open(&fx[0].registry, fx[0].config.clone()),
		DeviceSession::open(&fx[1].registry, fx[1].config.clone()),
		DeviceSession::open(&fx[2].registry, fx[2].config.clone()),
		DeviceSession::open(&fx[3].registry, fx[3].config.clone()),
	);
	let mut sessions = vec![a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap()];

	let ports: HashSet<u16> = sessions.iter().filter_map(DeviceSession::local_port).collect();
	assert_eq!(ports.len(), 4);
	assert!(ports.iter().all(|p| *p >= DISPATCHER_PORT + LOCAL_PORT_OFFSET));

	for session in &mut sessions {
		session.stop().await;
	}
	for fixture in &fx {
		assert!(fixture.device.forwards().is_empty());
	}
}

#[tokio::test]
async fn lost_tunnel_fails_the_call_and_leaves_the_session_unusable() {
	let fx = fixture("emulator-5568");
	let mut session = DeviceSession::open(&fx.registry, fx.config.clone()).await.unwrap();

	fx.device.drop_connections();
	let err = session.text_exists("OK").await.unwrap_err();
	assert!(err.is_remote_call_failure(), "{err}");
	assert!(session.home().await.is_err());

	session.stop().await;
	assert_eq!(session.state(), SessionState::Stopped);
	assert!(!fx.device.dispatcher_running());
}

#[tokio::test]
async fn remote_exception_is_a_remote_call_failure_not_a_false() {
	let fx = fixture("emulator-5570");
	let mut session = DeviceSession::open(&fx.registry, fx.config.clone()).await.unwrap();

	fx.device.reply_error("click", "UiObjectNotFoundException", "UiSelector[TEXT=Nope]");
	let err = session.click_by_text("Nope").await.unwrap_err();
	match err {
		Error::RemoteCallFailed {
			method,
			cause: RemoteCause::Remote { name, .. },
			..
		} => {
			assert_eq!(method, "click");
			assert_eq!(name, "UiObjectNotFoundException");
		}
		other => panic!("unexpected error: {other}"),
	}

	// negative results are values
	fx.device.reply_once("click", json!(false));
	assert!(!session.click_by_text("Nope").await.unwrap());

	session.stop().await;
}
