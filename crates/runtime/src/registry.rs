//! Device discovery and exclusive leases.
//!
//! Discovery runs once per registry and is memoized for the registry's
//! lifetime; [`DeviceRegistry::global`] makes that once per process. A fresh
//! device list requires a new process.
//!
//! Leases come from a fixed-size [`LeasePool`]. A [`DeviceLease`] goes back to
//! the pool when released or dropped, so concurrent sessions never share a
//! device and a failed session cannot leak one.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, OnceCell};

use crate::adb::{Adb, DeviceInfo, UNKNOWN_PRODUCT};
use crate::command::{CommandRunner, ProcessRunner};
use crate::config::AdbConfig;
use crate::error::{Error, Result};

static GLOBAL: OnceLock<DeviceRegistry> = OnceLock::new();

/// Enumerates devices once and hands out leases.
pub struct DeviceRegistry {
	adb: Adb,
	serial_override: Option<Vec<String>>,
	devices: OnceCell<Vec<DeviceInfo>>,
	pool: OnceCell<Arc<LeasePool>>,
}

impl DeviceRegistry {
	pub fn new(runner: Arc<dyn CommandRunner>, serial_override: Option<Vec<String>>) -> Self {
		Self {
			adb: Adb::new(runner),
			serial_override,
			devices: OnceCell::new(),
			pool: OnceCell::new(),
		}
	}

	pub fn from_config(config: &AdbConfig) -> Self {
		Self::new(Arc::new(ProcessRunner::new(&config.program)), config.serials.clone())
	}

	/// Process-wide registry built from the environment on first use.
	pub fn global() -> &'static DeviceRegistry {
		GLOBAL.get_or_init(|| Self::from_config(&AdbConfig::from_env()))
	}

	/// Unscoped control channel this registry enumerates with.
	pub fn adb(&self) -> &Adb {
		&self.adb
	}

	/// Devices in enumeration order; only the first successful call reaches
	/// the control channel.
	pub async fn list_devices(&self) -> Result<&[DeviceInfo]> {
		let devices = self
			.devices
			.get_or_try_init(|| async {
				let devices: Vec<DeviceInfo> = match &self.serial_override {
					Some(serials) => serials.iter().map(|s| DeviceInfo::new(s.clone(), UNKNOWN_PRODUCT)).collect(),
					None => self.adb.devices().await?,
				};
				if devices.is_empty() {
					return Err(Error::NoDevices);
				}
				tracing::info!(target = "uia::registry", count = devices.len(), "devices discovered");
				Ok::<_, Error>(devices)
			})
			.await?;
		Ok(devices.as_slice())
	}

	/// The lease pool, sized to the discovered device count.
	pub async fn pool(&self) -> Result<Arc<LeasePool>> {
		let pool = self
			.pool
			.get_or_try_init(|| async {
				let devices = self.list_devices().await?;
				Ok::<_, Error>(LeasePool::new(devices.to_vec()))
			})
			.await?;
		Ok(Arc::clone(pool))
	}

	/// Blocks until a device is free or `timeout` elapses.
	pub async fn acquire(&self, timeout: Duration) -> Result<DeviceLease> {
		self.pool().await?.acquire(timeout).await
	}
}

struct PoolState {
	idle: VecDeque<DeviceInfo>,
	outstanding: usize,
}

/// Fixed-size pool of device leases.
pub struct LeasePool {
	state: Mutex<PoolState>,
	total: usize,
	released: Notify,
}

impl LeasePool {
	pub fn new(devices: Vec<DeviceInfo>) -> Arc<Self> {
		let total = devices.len();
		Arc::new(Self {
			state: Mutex::new(PoolState {
				idle: devices.into(),
				outstanding: 0,
			}),
			total,
			released: Notify::new(),
		})
	}

	pub fn total(&self) -> usize {
		self.total
	}

	pub fn available(&self) -> usize {
		self.state.lock().idle.len()
	}

	pub fn outstanding(&self) -> usize {
		self.state.lock().outstanding
	}

	/// `(outstanding, available)` read under one lock.
	pub fn snapshot(&self) -> (usize, usize) {
		let state = self.state.lock();
		(state.outstanding, state.idle.len())
	}

	/// Takes a device, waiting up to `timeout` for one to be released.
	pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<DeviceLease> {
		let deadline = tokio::time::Instant::now() + timeout;
		loop {
			let notified = self.released.notified();
			if let Some(device) = self.try_take() {
				tracing::debug!(target = "uia::registry", serial = %device.serial, "lease acquired");
				return Ok(DeviceLease {
					device,
					pool: Arc::clone(self),
					released: false,
				});
			}

			let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
			if remaining.is_zero() {
				return Err(Error::LeaseTimeout(timeout));
			}
			tokio::select! {
				_ = notified => {}
				_ = tokio::time::sleep(remaining) => {}
			}
		}
	}

	fn try_take(&self) -> Option<DeviceInfo> {
		let mut state = self.state.lock();
		let device = state.idle.pop_front()?;
		state.outstanding += 1;
		Some(device)
	}

	fn put_back(&self, device: DeviceInfo) {
		{
			let mut state = self.state.lock();
			debug_assert!(state.outstanding > 0);
			state.outstanding = state.outstanding.saturating_sub(1);
			state.idle.push_back(device);
		}
		self.released.notify_one();
	}
}

/// Exclusive claim on one device. Returns to its pool on release or drop.
pub struct DeviceLease {
	device: DeviceInfo,
	pool: Arc<LeasePool>,
	released: bool,
}

impl std::fmt::Debug for DeviceLease {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DeviceLease").field("device", &self.device).finish()
	}
}

impl DeviceLease {
	pub fn device(&self) -> &DeviceInfo {
		&self.device
	}

	pub fn serial(&self) -> &str {
		&self.device.serial
	}

	/// Returns the device to the pool.
	pub fn release(mut self) {
		self.give_back();
	}

	fn give_back(&mut self) {
		if !self.released {
			self.released = true;
			tracing::debug!(target = "uia::registry", serial = %self.device.serial, "lease released");
			self.pool.put_back(self.device.clone());
		}
	}
}

impl Drop for DeviceLease {
	fn drop(&mut self) {
		self.give_back();
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use super::*;
	use crate::testing::FakeDevice;

	fn devices(n: usize) -> Vec<DeviceInfo> {
		(0..n).map(|i| DeviceInfo::new(format!("emulator-{}", 5554 + 2 * i), "sdk")).collect()
	}

	#[tokio::test]
	async fn discovery_is_memoized() {
		let device = FakeDevice::new("emulator-5554");
		let registry = DeviceRegistry::new(device.clone(), None);

		let first = registry.list_devices().await.unwrap().to_vec();
		let second = registry.list_devices().await.unwrap().to_vec();

		assert_eq!(first, vec![DeviceInfo::new("emulator-5554", "fake")]);
		assert_eq!(first, second);
		assert_eq!(device.count_commands("devices -l"), 1);
	}

	#[tokio::test]
	async fn serial_override_skips_enumeration() {
		let device = FakeDevice::new("emulator-5554");
		let registry = DeviceRegistry::new(device.clone(), Some(vec!["A".into(), "B".into()]));

		let listed = registry.list_devices().await.unwrap();
		assert_eq!(listed.len(), 2);
		assert_eq!(listed[1], DeviceInfo::new("B", UNKNOWN_PRODUCT));
		assert!(device.commands().is_empty());
	}

	#[tokio::test]
	async fn empty_enumeration_is_no_devices() {
		let device = FakeDevice::new("emulator-5554");
		device.set_online(false);
		let registry = DeviceRegistry::new(device, None);
		assert!(matches!(registry.list_devices().await, Err(Error::NoDevices)));
	}

	#[tokio::test]
	async fn registry_pool_is_sized_to_discovery() {
		let device = FakeDevice::new("emulator-5554");
		let registry = DeviceRegistry::new(device, None);

		let lease = registry.acquire(Duration::from_millis(10)).await.unwrap();
		assert_eq!(lease.serial(), "emulator-5554");
		assert!(matches!(
			registry.acquire(Duration::from_millis(10)).await,
			Err(Error::LeaseTimeout(_))
		));
		drop(lease);
		assert_eq!(registry.pool().await.unwrap().snapshot(), (0, 1));
	}

	#[tokio::test]
	async fn pool_invariant_holds_through_acquire_and_release() {
		let pool = LeasePool::new(devices(3));
		assert_eq!(pool.snapshot(), (0, 3));

		let a = pool.acquire(Duration::from_millis(10)).await.unwrap();
		let b = pool.acquire(Duration::from_millis(10)).await.unwrap();
		let (out, avail) = pool.snapshot();
		assert_eq!((out, avail), (2, 1));
		assert_eq!(out + avail, pool.total());
		assert_ne!(a.serial(), b.serial());

		a.release();
		drop(b);
		assert_eq!(pool.snapshot(), (0, 3));
	}

	#[tokio::test]
	async fn acquire_on_empty_pool_times_out() {
		let pool = LeasePool::new(devices(1));
		let _held = pool.acquire(Duration::from_millis(10)).await.unwrap();

		let start = tokio::time::Instant::now();
		let err = pool.acquire(Duration::from_millis(50)).await.unwrap_err();
		assert!(matches!(err, Error::LeaseTimeout(_)));
		assert!(err.is_retryable());
		assert!(start.elapsed() >= Duration::from_millis(50));
		assert_eq!(pool.snapshot(), (1, 0));
	}

	#[tokio::test]
	async fn acquire_blocks_until_release() {
		let pool = LeasePool::new(devices(1));
		let held = pool.acquire(Duration::from_millis(10)).await.unwrap();
		let serial = held.serial().to_string();

		let waiter = {
			let pool = Arc::clone(&pool);
			tokio::spawn(async move { pool.acquire(Duration::from_secs(5)).await })
		};
		tokio::time::sleep(Duration::from_millis(30)).await;
		assert!(!waiter.is_finished());

		held.release();
		let lease = waiter.await.unwrap().unwrap();
		assert_eq!(lease.serial(), serial);
	}

	#[tokio::test]
	async fn concurrent_acquires_never_duplicate() {
		let pool = LeasePool::new(devices(4));
		let in_use = Arc::new(Mutex::new(HashSet::new()));
		let mut tasks = Vec::new();
		for _ in 0..16 {
			let pool = Arc::clone(&pool);
			let in_use = Arc::clone(&in_use);
			tasks.push(tokio::spawn(async move {
				let lease = pool.acquire(Duration::from_secs(5)).await?;
				assert!(in_use.lock().insert(lease.serial().to_string()), "duplicate lease");
				let (out, avail) = pool.snapshot();
				assert_eq!(out + avail, 4);
				tokio::time::sleep(Duration::from_millis(5)).await;
				in_use.lock().remove(lease.serial());
				Ok::<_, Error>(lease.serial().to_string())
			}));
		}

		let mut seen = HashSet::new();
		for task in tasks {
			seen.insert(task.await.unwrap().unwrap());
		}
		assert!(seen.len() <= 4);
		assert_eq!(pool.snapshot(), (0, 4));
	}
}
