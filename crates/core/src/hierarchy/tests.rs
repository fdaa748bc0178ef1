use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use uia_protocol::Rect;
use uia_runtime::testing::FakeDevice;
use uia_runtime::tunnel::{BUNDLE_JAR, SERVER_JAR};
use uia_runtime::{Adb, Error, Tunnel, TunnelConfig, TunnelManager};

use super::*;
use crate::remote::RemoteSession;

const FRAME_LAYOUT: &str = r#"<hierarchy rotation="0"><node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="x" content-desc="" checkable="false" checked="false" clickable="false" enabled="true" focusable="false" focused="false" scrollable="false" long-clickable="false" password="false" selected="false" bounds="[0,0][1080,1812]"/></hierarchy>"#;

const LOGIN_SCREEN: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="1">
  <node index="0" class="android.widget.FrameLayout" package="com.example" bounds="[0,0][1080,1920]">
    <node index="0" class="android.widget.LinearLayout" package="com.example" bounds="[0,0][1080,1920]">
      <node index="0" text="User" resource-id="com.example:id/user" class="android.widget.EditText" package="com.example" focusable="true" focused="true" clickable="true" enabled="true" bounds="[40,100][1040,200]" drawing-order="1" hint="name"/>
      <node index="1" text="Password" resource-id="com.example:id/pass" class="android.widget.EditText" package="com.example" password="true" enabled="true" bounds="[40,220][1040,320]"/>
      <node index="2" text="Sign in" resource-id="com.example:id/submit" class="android.widget.Button" package="com.example" clickable="true" enabled="true" bounds="[100,200][300,400]"/>
    </node>
    <node index="1" text="Remember me" class="android.widget.CheckBox" package="com.example" checkable="true" checked="TRUE" bounds="[40,500][400,560]"/>
  </node>
</hierarchy>"#;

#[test]
fn parses_single_frame_layout() {
	let hierarchy = parse(FRAME_LAYOUT).unwrap();
	let root = hierarchy.root().unwrap();

	assert_eq!(hierarchy.rotation(), "0");
	assert_eq!(hierarchy.len(), 1);
	assert_eq!(root.class_name, "android.widget.FrameLayout");
	assert_eq!(root.package, "x");
	assert_eq!(root.children().count(), 0);
	assert_eq!(root.bounds, Some(Rect::new(0, 0, 1080, 1812)));
	assert!(root.enabled);
	assert!(!root.clickable);
	assert!(root.parent().is_none());
	assert!(!hierarchy.is_bound());
}

#[test]
fn bounds_format_back_to_the_same_literal() {
	for raw in ["[0,0][0,0]", "[0,0][1080,1812]", "[100,200][300,400]", "[7,13][2147483647,99]"] {
		let rect = parse_bounds(raw).unwrap();
		assert_eq!(rect.to_string(), raw);
		assert_eq!(parse_bounds(&rect.to_string()).unwrap(), rect);
	}

	let rect = parse_bounds("[-20,0][1100,1812]").unwrap();
	assert_eq!(rect.left, -20);
}

#[test]
fn malformed_bounds_are_fatal_for_the_snapshot() {
	for raw in ["", "[0,0]", "[0,0][a,b]", "0,0,10,10", "[0, 0][10,10]", "[0,0][10,10]x"] {
		let err = parse_bounds(raw).unwrap_err();
		assert!(matches!(err, Error::HierarchyParse(_)), "{raw:?}: {err}");
	}

	let xml = r#"<hierarchy rotation="0"><node index="0" bounds="[0,0][10"/></hierarchy>"#;
	let err = parse(xml).unwrap_err();
	assert!(matches!(err, Error::HierarchyParse(_)));
	assert!(!err.is_retryable());
}

#[test]
fn node_count_and_preorder_follow_the_document() {
	let hierarchy = parse(LOGIN_SCREEN).unwrap();

	let in_document = roxmltree::Document::parse(LOGIN_SCREEN)
		.unwrap()
		.descendants()
		.filter(|n| n.has_tag_name("node"))
		.map(|n| n.attribute("class").unwrap_or_default().to_string())
		.collect::<Vec<_>>();
	let in_tree: Vec<String> = hierarchy.iter().map(|n| n.class_name.clone()).collect();
	assert_eq!(hierarchy.len(), 6);
	assert_eq!(in_tree, in_document);

	let root = hierarchy.root().unwrap();
	let walked: Vec<NodeId> = std::iter::once(root.id())
		.chain(root.descendants().iter().map(|n| n.id()))
		.collect();
	let arena: Vec<NodeId> = hierarchy.iter().map(|n| n.id()).collect();
	assert_eq!(walked, arena);
}

#[test]
fn navigation_uses_parent_links() {
	let hierarchy = parse(LOGIN_SCREEN).unwrap();
	let submit = hierarchy.find_by_resource_id("com.example:id/submit").unwrap();

	assert_eq!(submit.depth(), 2);
	let layout = submit.parent().unwrap();
	assert_eq!(layout.class_name, "android.widget.LinearLayout");
	assert_eq!(layout.children().count(), 3);
	assert_eq!(layout.parent().unwrap().id(), hierarchy.root().unwrap().id());
	assert_eq!(submit.widget_kind(), WidgetKind::Button);
	assert_eq!(submit.center(), Some(Point { x: 200, y: 300 }));
}

#[test]
fn attributes_are_dispatched_by_name() {
	let hierarchy = parse(LOGIN_SCREEN).unwrap();
	assert_eq!(hierarchy.rotation(), "1");

	let user = hierarchy.find_by_text("User").unwrap();
	assert!(user.focused && user.focusable && user.clickable);
	assert!(user.widget_kind().is_text_input());

	let pass = hierarchy.find_by_resource_id("com.example:id/pass").unwrap();
	assert!(pass.password);
	assert!(!pass.clickable);

	let remember = hierarchy.find_by_text_contains("Remember").unwrap();
	assert!(remember.checkable && remember.checked);
	assert!(remember.widget_kind().is_compound_button());
	assert_eq!(remember.index, 1);

	let clickable = hierarchy.find_all(|n| n.clickable);
	assert_eq!(clickable.len(), 2);
	assert!(hierarchy.find_by_text("Missing").is_none());
}

#[test]
fn unknown_attributes_and_elements_are_skipped() {
	let xml = r#"<hierarchy rotation="0">
		<node index="0" class="android.view.View" bounds="[0,0][10,10]" importantForAccessibility="true" drawing-order="3">
			<extra note="ignored"/>
			<node index="0" class="android.widget.TextView" text="hi" bounds="[0,0][5,5]" a11y-pane="x"/>
		</node>
	</hierarchy>"#;
	let hierarchy = parse(xml).unwrap();
	assert_eq!(hierarchy.len(), 2);
	assert_eq!(hierarchy.find_by_text("hi").unwrap().parent().unwrap().class_name, "android.view.View");
}

#[test]
fn rejects_documents_without_nodes() {
	assert!(matches!(parse(r#"<hierarchy rotation="0"/>"#), Err(Error::HierarchyParse(_))));
	assert!(matches!(parse("<window/>"), Err(Error::HierarchyParse(_))));
	assert!(matches!(parse("<hierarchy><node"), Err(Error::HierarchyParse(_))));
	assert!(matches!(parse_bytes(b"\xff\xfe<hierarchy/>"), Err(Error::HierarchyParse(_))));
	assert!(matches!(
		parse(r#"<hierarchy><node index="first"/></hierarchy>"#),
		Err(Error::HierarchyParse(_))
	));
}

#[test]
fn missing_rotation_defaults_to_zero() {
	let hierarchy = parse(r#"<hierarchy><node class="a"/></hierarchy>"#).unwrap();
	assert_eq!(hierarchy.rotation(), "0");
	assert_eq!(hierarchy.root().unwrap().bounds, None);
}

#[test]
fn json_mirrors_the_tree() {
	let hierarchy = parse(FRAME_LAYOUT).unwrap();
	let value = hierarchy.to_json();

	assert_eq!(
		value,
		json!({
			"hierarchy": {
				"rotation": "0",
				"node": {
					"index": 0,
					"text": "",
					"resource-id": "",
					"class": "android.widget.FrameLayout",
					"package": "x",
					"content-desc": "",
					"checkable": false,
					"checked": false,
					"clickable": false,
					"enabled": true,
					"focusable": false,
					"focused": false,
					"scrollable": false,
					"long-clickable": false,
					"password": false,
					"selected": false,
					"bounds": "[0,0][1080,1812]"
				}
			}
		})
	);

	let nested = parse(LOGIN_SCREEN).unwrap().to_json();
	let root = &nested["hierarchy"]["node"];
	assert_eq!(root["nodes"].as_array().unwrap().len(), 2);
	assert_eq!(root["nodes"][0]["nodes"][2]["bounds"], "[100,200][300,400]");
	assert!(root["nodes"][1].get("nodes").is_none());
}

#[test]
fn extra_top_level_nodes_serialize_under_nodes() {
	let xml = r#"<hierarchy rotation="0"><node class="a"/><node class="b"/></hierarchy>"#;
	let hierarchy = parse(xml).unwrap();
	assert_eq!(hierarchy.roots().count(), 2);
	assert_eq!(hierarchy.root().unwrap().class_name, "a");

	let value = hierarchy.to_json();
	assert_eq!(value["hierarchy"]["node"]["class"], "a");
	assert_eq!(value["hierarchy"]["nodes"][0]["class"], "b");
}

#[tokio::test]
async fn unbound_click_is_rejected() {
	let hierarchy = parse(LOGIN_SCREEN).unwrap();
	let submit = hierarchy.find_by_text("Sign in").unwrap();
	assert!(matches!(submit.click().await, Err(Error::NotBound)));
}

struct Live {
	device: Arc<FakeDevice>,
	manager: TunnelManager,
	tunnel: Tunnel,
	session: RemoteSession,
	_payloads: TempDir,
}

async fn live(serial: &str) -> Live {
	let device = FakeDevice::new(serial);
	let payloads = tempfile::tempdir().unwrap();
	std::fs::write(payloads.path().join(SERVER_JAR), b"server").unwrap();
	std::fs::write(payloads.path().join(BUNDLE_JAR), b"bundle").unwrap();
	let manager = TunnelManager::new(
		Adb::new(device.clone()).for_serial(serial),
		TunnelConfig::default()
			.with_payload_dir(payloads.path())
			.with_backoff(Duration::from_millis(10), Duration::from_millis(100)),
	);
	let tunnel = manager.open(|_| {}).await.unwrap();
	let session = RemoteSession::bind(Arc::clone(tunnel.connection())).await.unwrap();
	Live {
		device,
		manager,
		tunnel,
		session,
		_payloads: payloads,
	}
}

#[tokio::test]
async fn bound_click_taps_the_center_once() {
	let live = live("emulator-5560").await;
	let mut hierarchy = parse(LOGIN_SCREEN).unwrap();
	hierarchy.bind(live.session.device().clone());

	let submit = hierarchy.find_by_resource_id("com.example:id/submit").unwrap();
	assert!(submit.click().await.unwrap());

	let clicks = live.device.calls_to("click");
	assert_eq!(clicks.len(), 1);
	assert_eq!(clicks[0].params, json!({"x": 200, "y": 300}));

	live.manager.teardown(live.tunnel).await;
}

#[test]
fn extreme_bounds_still_have_a_center() {
	let xml = r#"<hierarchy rotation="0"><node index="0" class="android.view.View" bounds="[-2147483648,0][2147483647,10]"/></hierarchy>"#;
	let hierarchy = parse(xml).unwrap();
	let root = hierarchy.root().unwrap();

	assert_eq!(root.bounds.unwrap().width(), 4_294_967_295);
	assert_eq!(root.center(), Some(Point { x: -1, y: 5 }));
}

#[tokio::test]
async fn click_on_a_partly_offscreen_node_taps_its_midpoint() {
	let live = live("emulator-5569").await;
	let xml = r#"<hierarchy rotation="0"><node index="0" class="android.widget.Button" clickable="true" bounds="[-300,100][100,201]"/></hierarchy>"#;
	let mut hierarchy = parse(xml).unwrap();
	hierarchy.bind(live.session.device().clone());

	assert!(hierarchy.root().unwrap().click().await.unwrap());
	assert_eq!(live.device.calls_to("click")[0].params, json!({"x": -100, "y": 150}));

	live.manager.teardown(live.tunnel).await;
}

#[tokio::test]
async fn binding_never_changes_node_data() {
	let live = live("emulator-5562").await;
	let pristine = parse(LOGIN_SCREEN).unwrap();
	let mut hierarchy = pristine.clone();

	hierarchy.bind(live.session.device().clone());
	assert!(hierarchy.is_bound());
	assert_eq!(hierarchy, pristine);
	assert_eq!(hierarchy.to_json(), pristine.to_json());

	assert!(hierarchy.unbind().is_some());
	assert!(!hierarchy.is_bound());
	assert_eq!(hierarchy, pristine);
	let nodes: Vec<&UiNode> = hierarchy.iter().map(|n| n.node()).collect();
	let original: Vec<&UiNode> = pristine.iter().map(|n| n.node()).collect();
	assert_eq!(nodes, original);

	live.manager.teardown(live.tunnel).await;
}

#[tokio::test]
async fn capture_pulls_parses_and_binds() {
	let live = live("emulator-5564").await;
	live.device.set_hierarchy(LOGIN_SCREEN);
	let artifacts = tempfile::tempdir().unwrap();

	let hierarchy = capture(live.session.device(), live.manager.adb(), artifacts.path())
		.await
		.unwrap();
	assert!(hierarchy.is_bound());
	assert_eq!(hierarchy, parse(LOGIN_SCREEN).unwrap());
	assert_eq!(live.device.calls_to("dumpWindowHierarchy").len(), 1);
	assert!(artifacts.path().join("emulator-5564-uia-window-dump.xml").exists());

	live.manager.teardown(live.tunnel).await;
}

#[tokio::test]
async fn capture_failures_are_retryable_not_parse_errors() {
	let live = live("emulator-5566").await;
	let artifacts = tempfile::tempdir().unwrap();

	// dispatcher pre-empted: remote exception
	live.device
		.reply_error("dumpWindowHierarchy", "IllegalStateException", "UiAutomation not connected");
	let err = capture(live.session.device(), live.manager.adb(), artifacts.path())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::HierarchyUnavailable(_)), "{err}");
	assert!(err.is_retryable());

	// no hierarchy set, nothing written, pull fails
	let err = capture(live.session.device(), live.manager.adb(), artifacts.path())
		.await
		.unwrap_err();
	assert!(matches!(err, Error::HierarchyUnavailable(_)), "{err}");

	live.device.set_hierarchy(LOGIN_SCREEN);
	assert!(capture(live.session.device(), live.manager.adb(), artifacts.path()).await.is_ok());

	live.manager.teardown(live.tunnel).await;
}

#[tokio::test]
async fn shell_dump_reports_error_lines_as_unavailable() {
	let device = FakeDevice::new("emulator-5568");
	let adb = Adb::new(device.clone()).for_serial("emulator-5568");
	let artifacts = tempfile::tempdir().unwrap();

	let err = capture_with_adb(&adb, artifacts.path()).await.unwrap_err();
	assert!(matches!(err, Error::HierarchyUnavailable(ref msg) if msg.starts_with("ERROR")), "{err}");

	device.set_hierarchy(FRAME_LAYOUT);
	let hierarchy = capture_with_adb(&adb, artifacts.path()).await.unwrap();
	assert!(!hierarchy.is_bound());
	assert_eq!(hierarchy.len(), 1);
}
