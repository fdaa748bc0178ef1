//! Hierarchy snapshot parser.
//!
//! Walks the `<hierarchy>` document once in document order. Only `<node>`
//! elements become nodes; attributes are dispatched by name and unknown ones
//! are logged and skipped, since newer devices keep adding attributes.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use uia_protocol::Rect;
use uia_runtime::{Error, Result};

use super::{Hierarchy, NodeId, UiNode};

const HIERARCHY_TAG: &str = "hierarchy";
const NODE_TAG: &str = "node";

static BOUNDS: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]$").expect("valid regex"));

/// Parses a bounds literal of the form `[left,top][right,bottom]`.
pub fn parse_bounds(raw: &str) -> Result<Rect> {
	let caps = BOUNDS
		.captures(raw)
		.ok_or_else(|| Error::HierarchyParse(format!("malformed bounds {raw:?}")))?;
	let mut values = [0i32; 4];
	for (slot, value) in values.iter_mut().zip(caps.iter().skip(1)) {
		let text = value.map(|m| m.as_str()).unwrap_or_default();
		*slot = text
			.parse()
			.map_err(|_| Error::HierarchyParse(format!("bounds value out of range in {raw:?}")))?;
	}
	let [left, top, right, bottom] = values;
	Ok(Rect::new(left, top, right, bottom))
}

/// Parses a snapshot document.
pub fn parse(xml: &str) -> Result<Hierarchy> {
	let document = roxmltree::Document::parse(xml).map_err(|e| Error::HierarchyParse(e.to_string()))?;
	let top = document.root_element();
	if top.tag_name().name() != HIERARCHY_TAG {
		return Err(Error::HierarchyParse(format!(
			"expected <{HIERARCHY_TAG}> document element, found <{}>",
			top.tag_name().name()
		)));
	}

	let rotation = top.attribute("rotation").unwrap_or("0").to_string();
	let mut nodes = Vec::new();
	let mut roots = Vec::new();
	for child in top.children().filter(roxmltree::Node::is_element) {
		if child.tag_name().name() == NODE_TAG {
			roots.push(build(child, None, &mut nodes)?);
		} else {
			tracing::debug!(target = "uia::hierarchy", tag = child.tag_name().name(), "skipping non-node element");
		}
	}
	if roots.is_empty() {
		return Err(Error::HierarchyParse("snapshot contains no node elements".into()));
	}

	tracing::debug!(target = "uia::hierarchy", %rotation, nodes = nodes.len(), "hierarchy parsed");
	Ok(Hierarchy::from_parts(rotation, nodes, roots))
}

/// Parses raw snapshot bytes, which must be UTF-8.
pub fn parse_bytes(bytes: &[u8]) -> Result<Hierarchy> {
	let xml = std::str::from_utf8(bytes).map_err(|e| Error::HierarchyParse(format!("snapshot is not UTF-8: {e}")))?;
	parse(xml)
}

pub fn parse_file(path: &Path) -> Result<Hierarchy> {
	let bytes = std::fs::read(path)?;
	parse_bytes(&bytes)
}

fn build(element: roxmltree::Node<'_, '_>, parent: Option<NodeId>, nodes: &mut Vec<UiNode>) -> Result<NodeId> {
	let id = NodeId(nodes.len());
	let mut node = UiNode {
		parent,
		..UiNode::default()
	};
	for attr in element.attributes() {
		apply(&mut node, attr.name(), attr.value())?;
	}
	nodes.push(node);

	for child in element.children().filter(roxmltree::Node::is_element) {
		if child.tag_name().name() != NODE_TAG {
			tracing::debug!(target = "uia::hierarchy", tag = child.tag_name().name(), "skipping non-node element");
			continue;
		}
		let child_id = build(child, Some(id), nodes)?;
		nodes[id.0].children.push(child_id);
	}
	Ok(id)
}

fn apply(node: &mut UiNode, name: &str, value: &str) -> Result<()> {
	match name {
		"index" => {
			node.index = value
				.parse()
				.map_err(|_| Error::HierarchyParse(format!("bad index {value:?}")))?;
		}
		"text" => node.text = value.to_string(),
		"resource-id" => node.resource_id = value.to_string(),
		"class" => node.class_name = value.to_string(),
		"package" => node.package = value.to_string(),
		"content-desc" => node.content_desc = value.to_string(),
		"checkable" => node.checkable = flag(value),
		"checked" => node.checked = flag(value),
		"clickable" => node.clickable = flag(value),
		"enabled" => node.enabled = flag(value),
		"focusable" => node.focusable = flag(value),
		"focused" => node.focused = flag(value),
		"scrollable" => node.scrollable = flag(value),
		"long-clickable" => node.long_clickable = flag(value),
		"password" => node.password = flag(value),
		"selected" => node.selected = flag(value),
		"bounds" => node.bounds = Some(parse_bounds(value)?),
		other => {
			tracing::debug!(target = "uia::hierarchy", attribute = other, value, "ignoring unknown attribute");
		}
	}
	Ok(())
}

fn flag(value: &str) -> bool {
	value.eq_ignore_ascii_case("true")
}
