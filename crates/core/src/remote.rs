//! The RPC session: one connection and the four proxies resolved on it.

use std::sync::Arc;

use uia_protocol::Interface;
use uia_runtime::{Channel, Connection, ConnectionLike, Result};

use crate::collection::UiCollection;
use crate::device::UiDevice;
use crate::object::UiObject;
use crate::scrollable::UiScrollable;

/// Proxies bound to one dispatcher connection.
///
/// Resolution happens once, in [`bind`](Self::bind); the proxies are cheap
/// clones sharing the connection and stay valid until [`close`](Self::close).
#[derive(Debug, Clone)]
pub struct RemoteSession {
	connection: Arc<Connection>,
	device: UiDevice,
	object: UiObject,
	collection: UiCollection,
	scrollable: UiScrollable,
}

impl RemoteSession {
	/// Resolves every remote interface by name on `connection`.
	pub async fn bind(connection: Arc<Connection>) -> Result<Self> {
		let device = resolve(&connection, Interface::Device).await?;
		let object = resolve(&connection, Interface::Object).await?;
		let collection = resolve(&connection, Interface::Collection).await?;
		let scrollable = resolve(&connection, Interface::Scrollable).await?;
		Ok(Self {
			connection,
			device: UiDevice::new(device),
			object: UiObject::new(object),
			collection: UiCollection::new(collection),
			scrollable: UiScrollable::new(scrollable),
		})
	}

	pub fn device(&self) -> &UiDevice {
		&self.device
	}

	pub fn object(&self) -> &UiObject {
		&self.object
	}

	pub fn collection(&self) -> &UiCollection {
		&self.collection
	}

	pub fn scrollable(&self) -> &UiScrollable {
		&self.scrollable
	}

	pub fn connection(&self) -> &Arc<Connection> {
		&self.connection
	}

	/// Closes the connection. Idempotent; later calls on any proxy fail with
	/// [`RemoteCallFailed`](uia_runtime::Error::RemoteCallFailed).
	pub fn close(&self) {
		self.connection.close();
	}

	pub fn is_closed(&self) -> bool {
		self.connection.is_closed()
	}
}

async fn resolve(connection: &Arc<Connection>, interface: Interface) -> Result<Channel> {
	let guid = connection
		.resolve(interface)
		.await
		.map_err(|e| e.into_remote_call(interface, "lookup"))?;
	tracing::debug!(target = "uia::session", %interface, %guid, "interface resolved");
	let like: Arc<dyn ConnectionLike> = connection.clone();
	Ok(Channel::new(interface, guid, like))
}
