//! uia: drive Android UI automation from Rust
//!
//! A small dispatcher is pushed onto the device, launched under the device
//! test runner and reached through an adb port forward. Four proxies talk
//! to it: [`UiDevice`] for device-level input and queries, and the
//! [`UiObject`], [`UiCollection`] and [`UiScrollable`] cursors that are
//! positioned with a [`UiSelector`] and then acted upon.
//!
//! # Examples
//!
//! ## A session on the first free device
//!
//! ```ignore
//! use uia::{DeviceRegistry, DeviceSession, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> uia::Result<()> {
//!     let registry = DeviceRegistry::global();
//!     let mut session = DeviceSession::open(registry, SessionConfig::from_env()).await?;
//!
//!     if session.wait_for_text("Sign in", None).await? {
//!         session.set_text_by_resource_id("com.example:id/user", "alice").await?;
//!         session.click_by_text("Sign in").await?;
//!     }
//!
//!     session.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Working from a snapshot
//!
//! ```ignore
//! let hierarchy = session.capture_hierarchy().await?;
//! if let Some(button) = hierarchy.find_by_text("OK") {
//!     button.click().await?;
//! }
//! std::fs::write("screen.json", hierarchy.to_json().to_string())?;
//! ```
//!
//! Negative outcomes on the device (nothing matched, click missed) come back
//! as `false` or `None`. An `Err` means the bridge itself failed; after an
//! [`Error::RemoteCallFailed`] the session is unusable and must be stopped.

pub mod collection;
pub mod device;
pub mod hierarchy;
pub mod object;
pub mod remote;
pub mod scrollable;
pub mod session;

pub use collection::UiCollection;
pub use device::UiDevice;
pub use hierarchy::{Hierarchy, NodeId, NodeRef, UiNode, WidgetKind};
pub use object::UiObject;
pub use remote::RemoteSession;
pub use scrollable::UiScrollable;
pub use session::{DeviceSession, ScreenRecording, SessionConfig, SessionState};

pub use uia_protocol::{DisplaySize, Interface, Point, Rect, UiSelector, keycode};
pub use uia_runtime::{
	Adb, AdbConfig, AppVersion, DeployStage, DeviceInfo, DeviceLease, DeviceRegistry, Error, RemoteCause, Result, TunnelConfig,
};
