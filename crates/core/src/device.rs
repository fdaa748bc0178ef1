//! Device-level input and queries.
//!
//! [`UiDevice`] talks to the `UiDevice` interface of the dispatcher. Methods
//! that can legitimately fail on the device side return `bool`; only a broken
//! bridge surfaces as an error.

use std::time::Duration;

use serde_json::{Value, json};
use uia_protocol::{DisplaySize, Point};
use uia_runtime::{Channel, Result};

/// Proxy for the remote `UiDevice` interface.
#[derive(Debug, Clone)]
pub struct UiDevice {
	channel: Channel,
}

macro_rules! device_presses {
	($($(#[$doc:meta])* $name:ident => $method:literal),* $(,)?) => {
		$(
			$(#[$doc])*
			pub async fn $name(&self) -> Result<bool> {
				self.channel.send_no_params($method).await
			}
		)*
	};
}

macro_rules! device_actions {
	($($(#[$doc:meta])* $name:ident => $method:literal),* $(,)?) => {
		$(
			$(#[$doc])*
			pub async fn $name(&self) -> Result<()> {
				self.channel.send_no_result($method, Value::Null).await
			}
		)*
	};
}

impl UiDevice {
	pub(crate) fn new(channel: Channel) -> Self {
		Self { channel }
	}

	pub fn channel(&self) -> &Channel {
		&self.channel
	}

	/// Taps at absolute device coordinates.
	pub async fn click(&self, x: i32, y: i32) -> Result<bool> {
		self.channel.send("click", json!({ "x": x, "y": y })).await
	}

	pub async fn swipe(&self, start: Point, end: Point, steps: u32) -> Result<bool> {
		self.channel
			.send(
				"swipe",
				json!({ "startX": start.x, "startY": start.y, "endX": end.x, "endY": end.y, "steps": steps }),
			)
			.await
	}

	/// Swipes through every point of `segments` in order.
	pub async fn swipe_path(&self, segments: &[Point], segment_steps: u32) -> Result<bool> {
		self.channel
			.send("swipePath", json!({ "segments": segments, "segmentSteps": segment_steps }))
			.await
	}

	pub async fn drag(&self, start: Point, end: Point, steps: u32) -> Result<bool> {
		self.channel
			.send(
				"drag",
				json!({ "startX": start.x, "startY": start.y, "endX": end.x, "endY": end.y, "steps": steps }),
			)
			.await
	}

	device_presses!(
		press_back => "pressBack",
		press_home => "pressHome",
		press_enter => "pressEnter",
		press_menu => "pressMenu",
		press_search => "pressSearch",
		press_recent_apps => "pressRecentApps",
		press_delete => "pressDelete",
		press_dpad_center => "pressDPadCenter",
		press_dpad_up => "pressDPadUp",
		press_dpad_down => "pressDPadDown",
		press_dpad_left => "pressDPadLeft",
		press_dpad_right => "pressDPadRight",
		open_notification => "openNotification",
		open_quick_settings => "openQuickSettings",
		is_natural_orientation => "isNaturalOrientation",
		is_screen_on => "isScreenOn",
		has_any_watcher_triggered => "hasAnyWatcherTriggered",
	);

	/// Sends a raw key code, optionally with a meta state mask.
	///
	/// See [`uia_protocol::keycode`] for the common codes.
	pub async fn press_key_code(&self, key_code: i32, meta_state: Option<i32>) -> Result<bool> {
		let params = match meta_state {
			Some(meta) => json!({ "keyCode": key_code, "metaState": meta }),
			None => json!({ "keyCode": key_code }),
		};
		self.channel.send("pressKeyCode", params).await
	}

	device_actions!(
		set_orientation_left => "setOrientationLeft",
		set_orientation_right => "setOrientationRight",
		set_orientation_natural => "setOrientationNatural",
		freeze_rotation => "freezeRotation",
		unfreeze_rotation => "unfreezeRotation",
		/// Turns the screen on if it is off.
		wake_up => "wakeUp",
		sleep => "sleep",
		clear_last_traversed_text => "clearLastTraversedText",
		run_watchers => "runWatchers",
		reset_watcher_triggers => "resetWatcherTriggers",
	);

	pub async fn display_width(&self) -> Result<i32> {
		self.channel.send_no_params("getDisplayWidth").await
	}

	pub async fn display_height(&self) -> Result<i32> {
		self.channel.send_no_params("getDisplayHeight").await
	}

	/// Rotation in quarter turns, 0 through 3.
	pub async fn display_rotation(&self) -> Result<i32> {
		self.channel.send_no_params("getDisplayRotation").await
	}

	pub async fn display_size_dp(&self) -> Result<DisplaySize> {
		self.channel.send_no_params("getDisplaySizeDp").await
	}

	pub async fn current_package_name(&self) -> Result<String> {
		self.channel.send_no_params("getCurrentPackageName").await
	}

	pub async fn current_activity_name(&self) -> Result<String> {
		self.channel.send_no_params("getCurrentActivityName").await
	}

	pub async fn product_name(&self) -> Result<String> {
		self.channel.send_no_params("getProductName").await
	}

	/// Text of the last accessibility traversal, if any.
	pub async fn last_traversed_text(&self) -> Result<Option<String>> {
		self.channel.send_no_params("getLastTraversedText").await
	}

	/// Writes a PNG screenshot into the device tmp dir as `file_name`.
	pub async fn take_screenshot(&self, file_name: &str, scale: f32, quality: u8) -> Result<bool> {
		self.channel
			.send(
				"takeScreenshot",
				json!({ "fileName": file_name, "scale": scale, "quality": quality }),
			)
			.await
	}

	/// Writes the current view tree into the device tmp dir as `file_name`.
	pub async fn dump_window_hierarchy(&self, file_name: &str) -> Result<()> {
		self.channel
			.send_no_result("dumpWindowHierarchy", json!({ "fileName": file_name }))
			.await
	}

	pub async fn wait_for_idle(&self, timeout: Option<Duration>) -> Result<()> {
		let params = match timeout {
			Some(timeout) => json!({ "timeout": timeout.as_millis() as u64 }),
			None => Value::Null,
		};
		self.channel.send_no_result("waitForIdle", params).await
	}

	/// Waits for a window content update in `package`, or in any package.
	pub async fn wait_for_window_update(&self, package: Option<&str>, timeout: Duration) -> Result<bool> {
		self.channel
			.send(
				"waitForWindowUpdate",
				json!({ "packageName": package, "timeout": timeout.as_millis() as u64 }),
			)
			.await
	}

	pub async fn set_compressed_layout_hierarchy(&self, compressed: bool) -> Result<()> {
		self.channel
			.send_no_result("setCompressedLayoutHierarchy", json!({ "compressed": compressed }))
			.await
	}

	pub async fn has_watcher_triggered(&self, name: &str) -> Result<bool> {
		self.channel.send("hasWatcherTriggered", json!({ "name": name })).await
	}

	pub async fn remove_watcher(&self, name: &str) -> Result<()> {
		self.channel.send_no_result("removeWatcher", json!({ "name": name })).await
	}
}
