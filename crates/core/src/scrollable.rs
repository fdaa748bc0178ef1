//! Cursor variant that scrolls its container while searching.

use std::ops::Deref;

use serde_json::{Value, json};
use uia_protocol::UiSelector;
use uia_runtime::{Channel, Result};

use crate::collection::UiCollection;

/// Proxy for the remote `UiScrollable` cursor.
///
/// Dereferences to [`UiCollection`] and from there to the plain cursor.
#[derive(Debug, Clone)]
pub struct UiScrollable {
	collection: UiCollection,
}

impl UiScrollable {
	pub(crate) fn new(channel: Channel) -> Self {
		Self {
			collection: UiCollection::new(channel),
		}
	}

	pub async fn scroll_forward(&self, steps: u32) -> Result<bool> {
		self.channel().send("scrollForward", json!({ "steps": steps })).await
	}

	pub async fn scroll_backward(&self, steps: u32) -> Result<bool> {
		self.channel().send("scrollBackward", json!({ "steps": steps })).await
	}

	pub async fn scroll_to_beginning(&self, max_swipes: u32, steps: u32) -> Result<bool> {
		self.channel()
			.send("scrollToBeginning", json!({ "maxSwipes": max_swipes, "steps": steps }))
			.await
	}

	pub async fn scroll_to_end(&self, max_swipes: u32, steps: u32) -> Result<bool> {
		self.channel()
			.send("scrollToEnd", json!({ "maxSwipes": max_swipes, "steps": steps }))
			.await
	}

	pub async fn fling_forward(&self) -> Result<bool> {
		self.channel().send_no_params("flingForward").await
	}

	pub async fn fling_backward(&self) -> Result<bool> {
		self.channel().send_no_params("flingBackward").await
	}

	pub async fn fling_to_beginning(&self, max_swipes: u32) -> Result<bool> {
		self.channel()
			.send("flingToBeginning", json!({ "maxSwipes": max_swipes }))
			.await
	}

	pub async fn fling_to_end(&self, max_swipes: u32) -> Result<bool> {
		self.channel().send("flingToEnd", json!({ "maxSwipes": max_swipes })).await
	}

	/// Scrolls until an element matching `selector` is visible.
	pub async fn scroll_into_view(&self, selector: &UiSelector) -> Result<bool> {
		self.channel()
			.send("scrollIntoView", json!({ "selector": selector }))
			.await
	}

	pub async fn scroll_text_into_view(&self, text: &str) -> Result<bool> {
		self.channel().send("scrollTextIntoView", json!({ "text": text })).await
	}

	/// Like [`UiCollection::select_child_by_text`], scrolling first when
	/// `allow_scroll` is set.
	pub async fn select_child_by_text_scrolling(&self, child: &UiSelector, text: &str, allow_scroll: bool) -> Result<bool> {
		self.channel()
			.send(
				"selectChildByText",
				json!({ "childPattern": child, "text": text, "allowScrollSearch": allow_scroll }),
			)
			.await
	}

	pub async fn select_child_by_description_scrolling(
		&self,
		child: &UiSelector,
		description: &str,
		allow_scroll: bool,
	) -> Result<bool> {
		self.channel()
			.send(
				"selectChildByDescription",
				json!({ "childPattern": child, "text": description, "allowScrollSearch": allow_scroll }),
			)
			.await
	}

	pub async fn set_as_vertical_list(&self) -> Result<()> {
		self.channel().send_no_result("setAsVerticalList", Value::Null).await
	}

	pub async fn set_as_horizontal_list(&self) -> Result<()> {
		self.channel().send_no_result("setAsHorizontalList", Value::Null).await
	}

	/// Swipes a search may perform before giving up.
	pub async fn max_search_swipes(&self) -> Result<u32> {
		self.channel().send_no_params("getMaxSearchSwipes").await
	}

	pub async fn set_max_search_swipes(&self, swipes: u32) -> Result<()> {
		self.channel()
			.send_no_result("setMaxSearchSwipes", json!({ "swipes": swipes }))
			.await
	}
}

impl Deref for UiScrollable {
	type Target = UiCollection;

	fn deref(&self) -> &UiCollection {
		&self.collection
	}
}
