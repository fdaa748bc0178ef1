//! UI hierarchy snapshots.
//!
//! A [`Hierarchy`] owns every node of one snapshot in a flat arena, in
//! document order. Nodes refer to each other by [`NodeId`]; the parent link
//! is navigation only and never owns anything. Because nodes are pushed as
//! they are parsed, arena order, pre-order traversal and source document
//! order are all the same sequence.
//!
//! A snapshot is plain data. [`Hierarchy::bind`] attaches a device proxy so
//! that [`NodeRef::click`] can replay a tap at the node's center; binding
//! never touches node data and is ignored by equality.

mod capture;
mod parse;
mod widget;

#[cfg(test)]
mod tests;

use std::fmt;
use std::ops::Deref;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;
use uia_protocol::{Point, Rect};
use uia_runtime::{Error, Result};

use crate::device::UiDevice;

pub use capture::{capture, capture_with_adb};
pub use parse::{parse, parse_bounds, parse_bytes, parse_file};
pub use widget::WidgetKind;

/// Handle of a node within its [`Hierarchy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
	pub fn index(self) -> usize {
		self.0
	}
}

/// One element of the view tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UiNode {
	/// Position among siblings as reported by the device.
	pub index: u32,
	pub text: String,
	pub resource_id: String,
	pub class_name: String,
	pub package: String,
	pub content_desc: String,
	pub checkable: bool,
	pub checked: bool,
	pub clickable: bool,
	pub enabled: bool,
	pub focusable: bool,
	pub focused: bool,
	pub scrollable: bool,
	pub long_clickable: bool,
	pub password: bool,
	pub selected: bool,
	/// Absolute device pixels, post-rotation. `None` if the dump had no bounds.
	pub bounds: Option<Rect>,
	parent: Option<NodeId>,
	children: Vec<NodeId>,
}

impl UiNode {
	pub fn parent_id(&self) -> Option<NodeId> {
		self.parent
	}

	pub fn child_ids(&self) -> &[NodeId] {
		&self.children
	}

	pub fn widget_kind(&self) -> WidgetKind {
		WidgetKind::of(&self.class_name)
	}

	pub fn center(&self) -> Option<Point> {
		self.bounds.map(|b| b.center())
	}
}

/// A parsed snapshot, optionally bound to a live device.
#[derive(Clone, Default)]
pub struct Hierarchy {
	rotation: String,
	nodes: Vec<UiNode>,
	roots: Vec<NodeId>,
	device: Option<UiDevice>,
}

impl PartialEq for Hierarchy {
	fn eq(&self, other: &Self) -> bool {
		self.rotation == other.rotation && self.nodes == other.nodes && self.roots == other.roots
	}
}

impl Eq for Hierarchy {}

impl fmt::Debug for Hierarchy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Hierarchy")
			.field("rotation", &self.rotation)
			.field("nodes", &self.nodes.len())
			.field("bound", &self.device.is_some())
			.finish()
	}
}

impl Hierarchy {
	pub(crate) fn from_parts(rotation: String, nodes: Vec<UiNode>, roots: Vec<NodeId>) -> Self {
		Self {
			rotation,
			nodes,
			roots,
			device: None,
		}
	}

	/// Screen rotation at capture time, verbatim from the snapshot.
	pub fn rotation(&self) -> &str {
		&self.rotation
	}

	/// Total number of nodes.
	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	/// The first top-level node.
	pub fn root(&self) -> Option<NodeRef<'_>> {
		self.roots.first().map(|id| self.node_ref(*id))
	}

	/// Every top-level node; more than one when several windows were dumped.
	pub fn roots(&self) -> impl Iterator<Item = NodeRef<'_>> + '_ {
		self.roots.iter().map(|id| self.node_ref(*id))
	}

	pub fn get(&self, id: NodeId) -> Option<NodeRef<'_>> {
		(id.0 < self.nodes.len()).then(|| self.node_ref(id))
	}

	/// All nodes in pre-order, which is also document order.
	pub fn iter(&self) -> impl Iterator<Item = NodeRef<'_>> + '_ {
		(0..self.nodes.len()).map(|i| self.node_ref(NodeId(i)))
	}

	/// First node in document order satisfying `predicate`.
	pub fn find(&self, predicate: impl Fn(&UiNode) -> bool) -> Option<NodeRef<'_>> {
		self.iter().find(|node| predicate(node))
	}

	pub fn find_all(&self, predicate: impl Fn(&UiNode) -> bool) -> Vec<NodeRef<'_>> {
		self.iter().filter(|node| predicate(node)).collect()
	}

	pub fn find_by_resource_id(&self, resource_id: &str) -> Option<NodeRef<'_>> {
		self.find(|node| node.resource_id == resource_id)
	}

	pub fn find_by_text(&self, text: &str) -> Option<NodeRef<'_>> {
		self.find(|node| node.text == text)
	}

	pub fn find_by_text_contains(&self, fragment: &str) -> Option<NodeRef<'_>> {
		self.find(|node| node.text.contains(fragment))
	}

	/// Makes every node clickable through `device`.
	pub fn bind(&mut self, device: UiDevice) {
		self.device = Some(device);
	}

	/// Drops the device binding; node data is unaffected.
	pub fn unbind(&mut self) -> Option<UiDevice> {
		self.device.take()
	}

	pub fn is_bound(&self) -> bool {
		self.device.is_some()
	}

	pub fn device(&self) -> Option<&UiDevice> {
		self.device.as_ref()
	}

	/// `{"hierarchy": {"rotation": .., "node": <root>}}`.
	pub fn to_json(&self) -> Value {
		serde_json::to_value(self).unwrap_or(Value::Null)
	}

	fn node_ref(&self, id: NodeId) -> NodeRef<'_> {
		NodeRef { hierarchy: self, id }
	}
}

impl Serialize for Hierarchy {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		struct Body<'a>(&'a Hierarchy);

		impl Serialize for Body<'_> {
			fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
				let hierarchy = self.0;
				let mut map = serializer.serialize_map(None)?;
				map.serialize_entry("rotation", &hierarchy.rotation)?;
				if let Some(root) = hierarchy.root() {
					map.serialize_entry("node", &root)?;
				}
				if hierarchy.roots.len() > 1 {
					let rest: Vec<NodeRef<'_>> = hierarchy.roots().skip(1).collect();
					map.serialize_entry("nodes", &rest)?;
				}
				map.end()
			}
		}

		let mut map = serializer.serialize_map(Some(1))?;
		map.serialize_entry("hierarchy", &Body(self))?;
		map.end()
	}
}

/// Borrowed view of one node with navigation back into its hierarchy.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
	hierarchy: &'a Hierarchy,
	id: NodeId,
}

impl fmt::Debug for NodeRef<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("NodeRef")
			.field("id", &self.id)
			.field("class", &self.class_name)
			.field("resource_id", &self.resource_id)
			.field("bounds", &self.bounds)
			.finish()
	}
}

impl<'a> Deref for NodeRef<'a> {
	type Target = UiNode;

	fn deref(&self) -> &UiNode {
		&self.hierarchy.nodes[self.id.0]
	}
}

impl<'a> NodeRef<'a> {
	pub fn id(&self) -> NodeId {
		self.id
	}

	pub fn node(&self) -> &'a UiNode {
		&self.hierarchy.nodes[self.id.0]
	}

	pub fn hierarchy(&self) -> &'a Hierarchy {
		self.hierarchy
	}

	pub fn parent(&self) -> Option<NodeRef<'a>> {
		self.node().parent.map(|id| self.hierarchy.node_ref(id))
	}

	/// Direct children, left to right.
	pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
		let hierarchy = self.hierarchy;
		self.node().children.iter().map(move |id| hierarchy.node_ref(*id))
	}

	/// Every node below this one in pre-order, excluding itself.
	pub fn descendants(&self) -> Vec<NodeRef<'a>> {
		let mut out = Vec::new();
		let mut stack: Vec<NodeId> = self.node().children.iter().rev().copied().collect();
		while let Some(id) = stack.pop() {
			out.push(self.hierarchy.node_ref(id));
			stack.extend(self.hierarchy.nodes[id.0].children.iter().rev().copied());
		}
		out
	}

	/// Nesting depth; top-level nodes are at 0.
	pub fn depth(&self) -> usize {
		std::iter::successors(self.parent(), NodeRef::parent).count()
	}

	/// Taps the center of this node through the bound device.
	///
	/// Fails with [`Error::NotBound`] on an unbound snapshot and with
	/// [`Error::InvalidArgument`] for a node without bounds.
	pub async fn click(&self) -> Result<bool> {
		let device = self.hierarchy.device.as_ref().ok_or(Error::NotBound)?;
		let center = self
			.center()
			.ok_or_else(|| Error::InvalidArgument(format!("node {} has no bounds", self.id.0)))?;
		tracing::debug!(target = "uia::hierarchy", x = center.x, y = center.y, "clicking node");
		device.click(center.x, center.y).await
	}
}

impl Serialize for NodeRef<'_> {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		struct Children<'a>(NodeRef<'a>);

		impl Serialize for Children<'_> {
			fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
				let mut seq = serializer.serialize_seq(Some(self.0.children.len()))?;
				for child in self.0.children() {
					seq.serialize_element(&child)?;
				}
				seq.end()
			}
		}

		let node = self.node();
		let mut map = serializer.serialize_map(None)?;
		map.serialize_entry("index", &node.index)?;
		map.serialize_entry("text", &node.text)?;
		map.serialize_entry("resource-id", &node.resource_id)?;
		map.serialize_entry("class", &node.class_name)?;
		map.serialize_entry("package", &node.package)?;
		map.serialize_entry("content-desc", &node.content_desc)?;
		map.serialize_entry("checkable", &node.checkable)?;
		map.serialize_entry("checked", &node.checked)?;
		map.serialize_entry("clickable", &node.clickable)?;
		map.serialize_entry("enabled", &node.enabled)?;
		map.serialize_entry("focusable", &node.focusable)?;
		map.serialize_entry("focused", &node.focused)?;
		map.serialize_entry("scrollable", &node.scrollable)?;
		map.serialize_entry("long-clickable", &node.long_clickable)?;
		map.serialize_entry("password", &node.password)?;
		map.serialize_entry("selected", &node.selected)?;
		if let Some(bounds) = node.bounds {
			map.serialize_entry("bounds", &bounds.to_string())?;
		}
		if !node.children.is_empty() {
			map.serialize_entry("nodes", &Children(*self))?;
		}
		map.end()
	}
}
