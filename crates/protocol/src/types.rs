//! Core protocol types used across the wire.
//!
//! Geometry primitives, the remote interface names, and the fixed constants
//! shared by the host side and the on-device dispatcher.

use std::fmt;

use serde::{Deserialize, Serialize};

/// TCP port the dispatcher listens on inside the device.
pub const DISPATCHER_PORT: u16 = 8998;

/// Offset added to [`DISPATCHER_PORT`] to get the first host-side port tried.
pub const LOCAL_PORT_OFFSET: u16 = 10000;

/// Scratch directory on the device used for payloads, dumps and screenshots.
pub const DEVICE_TMP_DIR: &str = "/data/local/tmp/";

/// Default timeout in milliseconds for the wait-for style helpers.
pub const DEFAULT_WAIT_MS: u64 = 30_000;

/// A point in absolute device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
	pub x: i32,
	pub y: i32,
}

impl Point {
	pub fn new(x: i32, y: i32) -> Self {
		Self { x, y }
	}
}

/// Screen-space rectangle in absolute device pixels, post-rotation.
///
/// Formats as the bracketed bounds literal used in hierarchy snapshots,
/// `[left,top][right,bottom]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
	pub left: i32,
	pub top: i32,
	pub right: i32,
	pub bottom: i32,
}

impl Rect {
	pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
		Self {
			left,
			top,
			right,
			bottom,
		}
	}

	/// Signed width; widened so any pair of `i32` edges fits.
	pub fn width(&self) -> i64 {
		i64::from(self.right) - i64::from(self.left)
	}

	pub fn height(&self) -> i64 {
		i64::from(self.bottom) - i64::from(self.top)
	}

	/// Center point, rounding towards the top-left corner.
	pub fn center(&self) -> Point {
		Point::new(midpoint(self.left, self.right), midpoint(self.top, self.bottom))
	}

	pub fn contains(&self, point: Point) -> bool {
		point.x >= self.left && point.x < self.right && point.y >= self.top && point.y < self.bottom
	}

	pub fn is_empty(&self) -> bool {
		self.width() <= 0 || self.height() <= 0
	}
}

/// Floor of the mean; always within `i32` because it lies between `a` and `b`.
fn midpoint(a: i32, b: i32) -> i32 {
	let mid = (i64::from(a) + i64::from(b)).div_euclid(2);
	mid as i32
}

impl fmt::Display for Rect {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"[{},{}][{},{}]",
			self.left, self.top, self.right, self.bottom
		)
	}
}

/// Display size in density-independent pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySize {
	pub width: i32,
	pub height: i32,
}

/// The remote interfaces exposed by the dispatcher.
///
/// Each one is resolved once per session through a `lookup` request and then
/// addressed by the guid the dispatcher hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interface {
	/// Device-level input and queries.
	#[serde(rename = "UiDevice")]
	Device,
	/// The single "current UI element" cursor.
	#[serde(rename = "UiObject")]
	Object,
	/// Cursor variant with child selection.
	#[serde(rename = "UiCollection")]
	Collection,
	/// Cursor variant that scrolls before searching.
	#[serde(rename = "UiScrollable")]
	Scrollable,
}

impl Interface {
	pub const ALL: [Interface; 4] = [
		Interface::Device,
		Interface::Object,
		Interface::Collection,
		Interface::Scrollable,
	];

	/// Name used on the wire when resolving the interface.
	pub fn name(self) -> &'static str {
		match self {
			Interface::Device => "UiDevice",
			Interface::Object => "UiObject",
			Interface::Collection => "UiCollection",
			Interface::Scrollable => "UiScrollable",
		}
	}
}

impl fmt::Display for Interface {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// Parameters of a `lookup` request, addressed to the dispatcher root (empty guid).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupParams {
	pub interface: Interface,
}

/// Reply to a `lookup` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupResult {
	pub guid: String,
}

/// Method name used to resolve an [`Interface`] to a guid.
pub const LOOKUP_METHOD: &str = "lookup";

/// Well-known Android key codes used by the convenience helpers.
pub mod keycode {
	pub const HOME: i32 = 3;
	pub const BACK: i32 = 4;
	pub const ENTER: i32 = 66;
	pub const DEL: i32 = 67;
	pub const MENU: i32 = 82;
}
