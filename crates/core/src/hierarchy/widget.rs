//! Capability lookup keyed by widget class name.

/// Broad widget family derived from a node's class name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetKind {
	TextInput,
	Text,
	Button,
	CompoundButton,
	Image,
	ScrollContainer,
	Layout,
	Other,
}

impl WidgetKind {
	/// Classifies by the simple class name, so framework and support-library
	/// variants of the same widget land in the same family.
	pub fn of(class_name: &str) -> Self {
		let simple = class_name.rsplit('.').next().unwrap_or(class_name);
		match simple {
			"EditText" | "AutoCompleteTextView" | "MultiAutoCompleteTextView" | "ExtractEditText" | "SearchView" => {
				WidgetKind::TextInput
			}
			"CheckBox" | "RadioButton" | "Switch" | "SwitchCompat" | "ToggleButton" | "CompoundButton"
			| "CheckedTextView" => WidgetKind::CompoundButton,
			"Button" | "ImageButton" | "FloatingActionButton" => WidgetKind::Button,
			"TextView" | "TextClock" | "Chronometer" => WidgetKind::Text,
			"ImageView" | "QuickContactBadge" => WidgetKind::Image,
			"ScrollView" | "HorizontalScrollView" | "NestedScrollView" | "ListView" | "GridView" | "RecyclerView"
			| "ViewPager" | "ViewPager2" | "ExpandableListView" => WidgetKind::ScrollContainer,
			"FrameLayout" | "LinearLayout" | "RelativeLayout" | "GridLayout" | "TableLayout" | "TableRow"
			| "ConstraintLayout" | "CoordinatorLayout" | "DrawerLayout" | "ViewGroup" | "RadioGroup" | "TabHost"
			| "Toolbar" => WidgetKind::Layout,
			_ => WidgetKind::Other,
		}
	}

	pub fn is_text_input(self) -> bool {
		self == WidgetKind::TextInput
	}

	pub fn is_scroll_container(self) -> bool {
		self == WidgetKind::ScrollContainer
	}

	/// Two-state buttons whose `checked` flag is meaningful.
	pub fn is_compound_button(self) -> bool {
		self == WidgetKind::CompoundButton
	}
}
