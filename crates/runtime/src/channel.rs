//! Channel - typed call path from a proxy to one remote object.
//!
//! Every failure below the proxy, whether the socket, the framing, the
//! response shape or a remote exception, leaves a channel as
//! [`Error::RemoteCallFailed`] naming the interface and method.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uia_protocol::Interface;

use crate::connection::ConnectionLike;
use crate::error::Result;

/// Sends calls on behalf of one resolved remote interface.
#[derive(Clone)]
pub struct Channel {
	interface: Interface,
	guid: Arc<str>,
	connection: Arc<dyn ConnectionLike>,
}

impl std::fmt::Debug for Channel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Channel")
			.field("interface", &self.interface)
			.field("guid", &self.guid)
			.finish_non_exhaustive()
	}
}

impl Channel {
	pub fn new(interface: Interface, guid: Arc<str>, connection: Arc<dyn ConnectionLike>) -> Self {
		Self {
			interface,
			guid,
			connection,
		}
	}

	/// Sends `method` and decodes its result.
	pub async fn send<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
		self.call(method, params)
			.await
			.map_err(|e| e.into_remote_call(self.interface, method))
	}

	async fn call<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
		let params_value = serde_json::to_value(params)?;
		let response = self.connection.send_message(&self.guid, method, params_value).await?;
		serde_json::from_value(response).map_err(Into::into)
	}

	/// Sends a method call with no parameters.
	pub async fn send_no_params<R: DeserializeOwned>(&self, method: &str) -> Result<R> {
		self.send(method, Value::Null).await
	}

	/// Sends a method call whose result is ignored.
	pub async fn send_no_result<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
		let _: Value = self.send(method, params).await?;
		Ok(())
	}

	pub fn interface(&self) -> Interface {
		self.interface
	}

	pub fn guid(&self) -> &str {
		&self.guid
	}
}

#[cfg(test)]
mod tests {
	use std::future::Future;
	use std::pin::Pin;

	use parking_lot::Mutex;
	use serde_json::json;

	use super::*;
	use crate::error::{Error, RemoteCause};

	struct Canned {
		reply: Mutex<Option<Result<Value>>>,
		seen: Mutex<Vec<(String, String, Value)>>,
	}

	impl Canned {
		fn new(reply: Result<Value>) -> Arc<Self> {
			Arc::new(Self {
				reply: Mutex::new(Some(reply)),
				seen: Mutex::new(Vec::new()),
			})
		}
	}

	impl ConnectionLike for Canned {
		fn send_message(
			&self,
			guid: &str,
			method: &str,
			params: Value,
		) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
			self.seen.lock().push((guid.to_string(), method.to_string(), params));
			let reply = self.reply.lock().take().unwrap_or(Err(Error::ChannelClosed));
			Box::pin(async move { reply })
		}
	}

	#[tokio::test]
	async fn send_addresses_the_guid_and_decodes() {
		let conn = Canned::new(Ok(json!(1080)));
		let channel = Channel::new(Interface::Device, Arc::from("UiDevice@1"), conn.clone());

		let width: i32 = channel.send_no_params("getDisplayWidth").await.unwrap();
		assert_eq!(width, 1080);
		let seen = conn.seen.lock();
		assert_eq!(seen[0].0, "UiDevice@1");
		assert_eq!(seen[0].1, "getDisplayWidth");
		assert_eq!(seen[0].2, Value::Null);
	}

	#[tokio::test]
	async fn remote_exception_becomes_remote_call_failed() {
		let conn = Canned::new(Err(Error::Remote {
			name: "UiObjectNotFoundException".into(),
			message: "UiSelector[TEXT=OK]".into(),
			stack: None,
		}));
		let channel = Channel::new(Interface::Object, Arc::from("UiObject@1"), conn);

		let err = channel.send::<_, bool>("click", Value::Null).await.unwrap_err();
		match err {
			Error::RemoteCallFailed {
				interface,
				method,
				cause: RemoteCause::Remote { name, .. },
			} => {
				assert_eq!(interface, Interface::Object);
				assert_eq!(method, "click");
				assert_eq!(name, "UiObjectNotFoundException");
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[tokio::test]
	async fn wrong_result_shape_is_a_protocol_cause() {
		let conn = Canned::new(Ok(json!("not a bool")));
		let channel = Channel::new(Interface::Device, Arc::from("UiDevice@1"), conn);

		let err = channel.send::<_, bool>("pressBack", Value::Null).await.unwrap_err();
		assert!(matches!(
			err,
			Error::RemoteCallFailed {
				cause: RemoteCause::Protocol(_),
				..
			}
		));
	}

	#[tokio::test]
	async fn void_calls_accept_any_result() {
		let conn = Canned::new(Ok(Value::Null));
		let channel = Channel::new(Interface::Device, Arc::from("UiDevice@1"), conn);
		channel.send_no_result("wakeUp", Value::Null).await.unwrap();
	}
}
