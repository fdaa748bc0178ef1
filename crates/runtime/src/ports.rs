//! Process-wide local port allocation for forwards.
//!
//! Every tunnel in the process draws its host-side port from one
//! [`PortAllocator`], so two concurrent sessions can never be handed the same
//! port. A port is reserved until its [`PortReservation`] is released or
//! dropped.

use std::collections::BTreeSet;
use std::net::TcpListener as StdTcpListener;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::{Error, Result};

static GLOBAL: OnceLock<Arc<PortAllocator>> = OnceLock::new();

/// Hands out distinct local ports at or above a base.
#[derive(Debug, Default)]
pub struct PortAllocator {
	reserved: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// The allocator shared by every tunnel in this process.
	pub fn global() -> Arc<Self> {
		Arc::clone(GLOBAL.get_or_init(Self::new))
	}

	/// Reserves the lowest port `>= base` that is neither reserved here nor
	/// bound by another process on the loopback interface.
	pub fn reserve(self: &Arc<Self>, base: u16) -> Result<PortReservation> {
		let mut reserved = self.reserved.lock();
		let port = (base..=u16::MAX)
			.find(|port| !reserved.contains(port) && port_available(*port))
			.ok_or(Error::PortsExhausted(base))?;
		reserved.insert(port);
		tracing::debug!(target = "uia::ports", port, "port reserved");
		Ok(PortReservation {
			port,
			allocator: Arc::clone(self),
			released: false,
		})
	}

	pub fn is_reserved(&self, port: u16) -> bool {
		self.reserved.lock().contains(&port)
	}

	pub fn reserved_count(&self) -> usize {
		self.reserved.lock().len()
	}

	fn release(&self, port: u16) {
		if self.reserved.lock().remove(&port) {
			tracing::debug!(target = "uia::ports", port, "port released");
		}
	}
}

/// A reserved local port. Returned to the allocator on release or drop.
#[derive(Debug)]
pub struct PortReservation {
	port: u16,
	allocator: Arc<PortAllocator>,
	released: bool,
}

impl PortReservation {
	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn release(mut self) {
		self.give_back();
	}

	fn give_back(&mut self) {
		if !self.released {
			self.released = true;
			self.allocator.release(self.port);
		}
	}
}

impl Drop for PortReservation {
	fn drop(&mut self) {
		self.give_back();
	}
}

fn port_available(port: u16) -> bool {
	StdTcpListener::bind(("127.0.0.1", port)).is_ok()
}
