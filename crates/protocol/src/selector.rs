//! Selector criteria used to position a remote cursor.
//!
//! A [`UiSelector`] is not a node: it is a query descriptor sent across the
//! bridge. Every criterion is optional and unset criteria are omitted from the
//! wire form, so the dispatcher only sees the predicates the caller chose.

use serde::{Deserialize, Serialize};

/// Query descriptor for locating a UI element on the device.
///
/// Regex criteria (`*_matches`) are carried as pattern strings and compiled on
/// the device side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiSelector {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub checkable: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub checked: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub class_name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub class_name_matches: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub clickable: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description_contains: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description_matches: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description_starts_with: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub enabled: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub focusable: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub focused: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub index: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub instance: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub long_clickable: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub package_name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub package_name_matches: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub resource_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub resource_id_matches: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub scrollable: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub selected: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text_contains: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text_matches: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text_starts_with: Option<String>,
}

macro_rules! string_criteria {
	($($(#[$doc:meta])* $name:ident),* $(,)?) => {
		$(
			$(#[$doc])*
			pub fn $name(mut self, value: impl Into<String>) -> Self {
				self.$name = Some(value.into());
				self
			}
		)*
	};
}

macro_rules! bool_criteria {
	($($name:ident),* $(,)?) => {
		$(
			pub fn $name(mut self, value: bool) -> Self {
				self.$name = Some(value);
				self
			}
		)*
	};
}

impl UiSelector {
	/// Creates a selector with no criteria set.
	pub fn new() -> Self {
		Self::default()
	}

	string_criteria!(
		/// Exact class name, e.g. `android.widget.Button`.
		class_name,
		/// Regex over the class name.
		class_name_matches,
		/// Exact content description.
		description,
		description_contains,
		/// Regex over the content description.
		description_matches,
		description_starts_with,
		package_name,
		/// Regex over the package name.
		package_name_matches,
		/// Fully qualified resource id, e.g. `com.example:id/login`.
		resource_id,
		/// Regex over the resource id.
		resource_id_matches,
		/// Exact visible text.
		text,
		text_contains,
		/// Regex over the visible text.
		text_matches,
		text_starts_with,
	);

	bool_criteria!(
		checkable,
		checked,
		clickable,
		enabled,
		focusable,
		focused,
		long_clickable,
		scrollable,
		selected,
	);

	/// Index among siblings in the hierarchy.
	pub fn index(mut self, value: u32) -> Self {
		self.index = Some(value);
		self
	}

	/// Zero-based occurrence among all matches.
	pub fn instance(mut self, value: u32) -> Self {
		self.instance = Some(value);
		self
	}

	/// Returns true when no criteria are set.
	pub fn is_empty(&self) -> bool {
		*self == Self::default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn unset_criteria_are_omitted() {
		let selector = UiSelector::new().resource_id("com.example:id/login").enabled(true);
		assert_eq!(
			serde_json::to_value(&selector).unwrap(),
			json!({"resourceId": "com.example:id/login", "enabled": true})
		);
	}

	#[test]
	fn regex_criteria_use_camel_case_keys() {
		let selector = UiSelector::new()
			.text_matches("^Sign.*")
			.class_name_matches("android\\.widget\\..*")
			.instance(2);
		let value = serde_json::to_value(&selector).unwrap();
		assert_eq!(value["textMatches"], "^Sign.*");
		assert_eq!(value["classNameMatches"], "android\\.widget\\..*");
		assert_eq!(value["instance"], 2);
	}

	#[test]
	fn empty_selector_detection() {
		assert!(UiSelector::new().is_empty());
		assert!(!UiSelector::new().long_clickable(false).is_empty());
	}
}
