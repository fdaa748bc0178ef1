//! Wire types for the UI automation dispatcher protocol.
//!
//! This crate contains the serde-serializable types exchanged with the
//! on-device dispatcher over the forwarded tunnel. These types represent the
//! "protocol layer": the shapes of data as they appear on the wire.
//!
//! Types in this crate are:
//! - **Pure data**: no behavior beyond serialization and small geometry helpers
//! - **1:1 with the dispatcher**: field names match what the payload expects
//! - **Stable**: changes only when the wire protocol changes
//!
//! Higher-level proxies are built on top of these types in `uia`.

pub mod selector;
pub mod types;

pub use selector::UiSelector;
pub use types::*;
