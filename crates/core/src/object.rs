//! The remote "current UI element" cursor.
//!
//! A [`UiObject`] does not name an element by itself. [`UiObject::use_selector`]
//! positions the dispatcher-side cursor and every later call acts on whatever
//! element the cursor currently points at.
//!
//! The cursor is shared state on the device: two tasks issuing calls through
//! the same proxy race on it. Callers must keep calls on one proxy strictly
//! sequential; the bridge does not serialize them.

use std::time::Duration;

use serde_json::{Value, json};
use uia_protocol::{Interface, Point, Rect, UiSelector};
use uia_runtime::{Channel, Result};

/// Proxy for the remote `UiObject` cursor.
#[derive(Debug, Clone)]
pub struct UiObject {
	channel: Channel,
}

macro_rules! cursor_predicates {
	($($(#[$doc:meta])* $name:ident => $method:literal),* $(,)?) => {
		$(
			$(#[$doc])*
			pub async fn $name(&self) -> Result<bool> {
				self.channel.send_no_params($method).await
			}
		)*
	};
}

macro_rules! cursor_swipes {
	($($name:ident => $method:literal),* $(,)?) => {
		$(
			pub async fn $name(&self, steps: u32) -> Result<bool> {
				self.channel.send($method, json!({ "steps": steps })).await
			}
		)*
	};
}

impl UiObject {
	pub(crate) fn new(channel: Channel) -> Self {
		Self { channel }
	}

	pub fn channel(&self) -> &Channel {
		&self.channel
	}

	/// Points the cursor at the first element matching `selector`.
	///
	/// Always succeeds; whether anything matched shows up in [`exists`](Self::exists)
	/// and [`last_not_found`](Self::last_not_found).
	pub async fn use_selector(&self, selector: &UiSelector) -> Result<()> {
		let method = match self.channel.interface() {
			Interface::Collection => "useUiCollectionSelector",
			Interface::Scrollable => "useUiScrollableSelector",
			Interface::Object | Interface::Device => "useUiObjectSelector",
		};
		self.channel.send_no_result(method, json!({ "selector": selector })).await
	}

	cursor_predicates!(
		/// Whether the cursor currently matches an on-screen element.
		exists => "exists",
		click => "click",
		click_top_left => "clickTopLeft",
		click_bottom_right => "clickBottomRight",
		long_click => "longClick",
		long_click_top_left => "longClickTopLeft",
		long_click_bottom_right => "longClickBottomRight",
		is_checkable => "isCheckable",
		is_checked => "isChecked",
		is_clickable => "isClickable",
		is_enabled => "isEnabled",
		is_focusable => "isFocusable",
		is_focused => "isFocused",
		is_long_clickable => "isLongClickable",
		is_scrollable => "isScrollable",
		is_selected => "isSelected",
	);

	/// Clicks and waits for a new window, `None` using the device default.
	pub async fn click_and_wait_for_new_window(&self, timeout: Option<Duration>) -> Result<bool> {
		let params = match timeout {
			Some(timeout) => json!({ "timeout": timeout.as_millis() as u64 }),
			None => Value::Null,
		};
		self.channel.send("clickAndWaitForNewWindow", params).await
	}

	pub async fn text(&self) -> Result<String> {
		self.channel.send_no_params("getText").await
	}

	pub async fn class_name(&self) -> Result<String> {
		self.channel.send_no_params("getClassName").await
	}

	pub async fn content_description(&self) -> Result<String> {
		self.channel.send_no_params("getContentDescription").await
	}

	pub async fn package_name(&self) -> Result<String> {
		self.channel.send_no_params("getPackageName").await
	}

	pub async fn bounds(&self) -> Result<Rect> {
		self.channel.send_no_params("getBounds").await
	}

	/// Bounds clipped to the visible part of the screen.
	pub async fn visible_bounds(&self) -> Result<Rect> {
		self.channel.send_no_params("getVisibleBounds").await
	}

	pub async fn child_count(&self) -> Result<i32> {
		self.channel.send_no_params("getChildCount").await
	}

	/// Replaces the element's text. Returns false if the element is gone.
	pub async fn set_text(&self, text: &str) -> Result<bool> {
		self.channel.send("setText", json!({ "text": text })).await
	}

	pub async fn clear_text_field(&self) -> Result<()> {
		self.channel.send_no_result("clearTextField", Value::Null).await
	}

	cursor_swipes!(
		swipe_up => "swipeUp",
		swipe_down => "swipeDown",
		swipe_left => "swipeLeft",
		swipe_right => "swipeRight",
	);

	pub async fn drag_to(&self, dest: Point, steps: u32) -> Result<bool> {
		self.channel
			.send("dragTo", json!({ "destX": dest.x, "destY": dest.y, "steps": steps }))
			.await
	}

	pub async fn pinch_in(&self, percent: u32, steps: u32) -> Result<bool> {
		self.channel.send("pinchIn", json!({ "percent": percent, "steps": steps })).await
	}

	pub async fn pinch_out(&self, percent: u32, steps: u32) -> Result<bool> {
		self.channel.send("pinchOut", json!({ "percent": percent, "steps": steps })).await
	}

	/// Waits up to `timeout` for the element to appear.
	pub async fn wait_for_exists(&self, timeout: Duration) -> Result<bool> {
		self.channel
			.send("waitForExists", json!({ "timeout": timeout.as_millis() as u64 }))
			.await
	}

	pub async fn wait_until_gone(&self, timeout: Duration) -> Result<bool> {
		self.channel
			.send("waitUntilGone", json!({ "timeout": timeout.as_millis() as u64 }))
			.await
	}

	/// Moves the cursor to a child of the current element.
	pub async fn select_child(&self, selector: &UiSelector) -> Result<bool> {
		self.channel.send("selectChild", json!({ "selector": selector })).await
	}

	/// Moves the cursor to a sibling of the current element.
	pub async fn select_from_parent(&self, selector: &UiSelector) -> Result<bool> {
		self.channel.send("selectFromParent", json!({ "selector": selector })).await
	}

	/// Message of the last "object not found" raised on the device, if any.
	///
	/// This is a negative result, not a bridge failure.
	pub async fn last_not_found(&self) -> Result<Option<String>> {
		self.channel.send_no_params("getUiObjectNotFoundException").await
	}

	pub async fn clear_not_found(&self) -> Result<()> {
		self.channel
			.send_no_result("clearUiObjectNotFoundException", Value::Null)
			.await
	}
}
