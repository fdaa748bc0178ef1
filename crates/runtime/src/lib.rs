//! UI automation runtime - control channel, tunnel lifecycle, and connection
//!
//! This crate provides the device-side plumbing a session is built on:
//!
//! - **Command runner**: spawning the control-channel executable and
//!   supervising background invocations
//! - **Device registry**: one-time discovery and exclusive device leases
//! - **Tunnel**: payload deployment, dispatcher launch, port forwarding
//! - **Connection**: framed JSON-RPC request/response correlation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │     uia     │  Proxies, hierarchy, sessions
//! └──────┬──────┘
//!        │ Channel per remote interface
//! ┌──────▼──────┐
//! │ uia-runtime │  This crate
//! │  ┌────────┐ │
//! │  │ Conn   │ │  JSON-RPC correlation
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Tunnel │ │  Deploy, forward, readiness, teardown
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Adb    │ │  Control-channel commands
//! │  └────────┘ │
//! └─────────────┘
//! ```

pub mod adb;
pub mod channel;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake_transport;
pub mod ports;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod tunnel;

// Re-export key types at crate root
pub use adb::{Adb, AppVersion, DeviceInfo, DeviceProcess};
pub use channel::Channel;
pub use command::{CommandRunner, ProcessRunner, Watchdog, WatchdogSignal};
pub use config::AdbConfig;
pub use connection::{Connection, ConnectionLike, Message, Request, Response};
pub use error::{DeployStage, Error, RemoteCause, Result};
pub use ports::{PortAllocator, PortReservation};
pub use registry::{DeviceLease, DeviceRegistry, LeasePool};
pub use transport::{StreamTransport, StreamTransportReceiver, StreamTransportSender, Transport, TransportParts, TransportReceiver};
pub use tunnel::{ForwardBinding, Tunnel, TunnelConfig, TunnelManager};
