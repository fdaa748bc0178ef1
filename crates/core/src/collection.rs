//! Cursor variant that selects among the children of a container.

use std::ops::Deref;

use serde_json::json;
use uia_protocol::UiSelector;
use uia_runtime::{Channel, Result};

use crate::object::UiObject;

/// Proxy for the remote `UiCollection` cursor.
///
/// Dereferences to [`UiObject`], so every cursor operation is available and
/// acts on the collection's own cursor.
#[derive(Debug, Clone)]
pub struct UiCollection {
	cursor: UiObject,
}

impl UiCollection {
	pub(crate) fn new(channel: Channel) -> Self {
		Self {
			cursor: UiObject::new(channel),
		}
	}

	/// Moves the cursor to the child matching `child` whose text is `text`.
	pub async fn select_child_by_text(&self, child: &UiSelector, text: &str) -> Result<bool> {
		self.channel()
			.send("selectChildByText", json!({ "childPattern": child, "text": text }))
			.await
	}

	pub async fn select_child_by_description(&self, child: &UiSelector, description: &str) -> Result<bool> {
		self.channel()
			.send("selectChildByDescription", json!({ "childPattern": child, "text": description }))
			.await
	}

	/// Moves the cursor to the `instance`-th child matching `child`.
	pub async fn select_child_by_instance(&self, child: &UiSelector, instance: u32) -> Result<bool> {
		self.channel()
			.send("selectChildByInstance", json!({ "childPattern": child, "instance": instance }))
			.await
	}

	/// Number of children matching `child`.
	pub async fn child_count_matching(&self, child: &UiSelector) -> Result<i32> {
		self.channel()
			.send("getChildCount", json!({ "childPattern": child }))
			.await
	}
}

impl Deref for UiCollection {
	type Target = UiObject;

	fn deref(&self) -> &UiObject {
		&self.cursor
	}
}
