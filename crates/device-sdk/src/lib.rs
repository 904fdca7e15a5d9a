//! `leda-sdk` is an SDK to attach a device-hosting process to an edge gateway.
//!
//! The process announces its devices, pushes property and event reports,
//! and serves the gateway's `getProperty` / `setProperty` / `callService`
//! calls through a [`DeviceHandler`] you implement.
//!
//! # Architecture
//!
//! ```text
//!  caller ──► RequestBuilder ──► CorrelationRegistry ──► FrameSink ──► socket
//!                                       ▲
//!  socket ──► DeviceAccess::on_receive ─┤ responses
//!                    │                  │
//!                    └─► Dispatcher ────┴─► WorkerPool ──► DeviceHandler
//!                          method calls        │
//!                                              └──► response frame ──► socket
//! ```
//!
//! [`DeviceAccess`] is the core and knows nothing about sockets: a transport
//! calls its `on_establish` / `on_close` / `on_receive` hooks.
//! [`DeviceClient`] is the bundled `tokio-tungstenite` transport with
//! heartbeat and reconnect.
//!
//! ```rust,no_run
//! # use leda_sdk::*;
//! # struct Lamp;
//! # impl DeviceHandler for Lamp {}
//! # async fn demo() -> Result<(), SdkError> {
//! let client = DeviceClientBuilder::new()
//!     .url("ws://127.0.0.1:17682")
//!     .build(DeviceCallbacks::new(Lamp))?;
//! let access = client.access();
//! let shutdown = tokio_util::sync::CancellationToken::new();
//! let driver = client.spawn(shutdown.clone());
//!
//! access.wait_connected(std::time::Duration::from_secs(30)).await?;
//! let lamp = DeviceAddress::new("PK1", "lamp-1");
//! access.online(&lamp).await?;
//! access.report_properties(&lamp, &[DeviceDatum::bool("power", true)])?;
//!
//! shutdown.cancel();
//! let _ = driver.await;
//! # Ok(())
//! # }
//! ```
//!
//! # Blocking calls
//!
//! `online`, `offline` and the `*_sync` reports suspend the calling task
//! until the gateway answers or the deadline passes.  A reply that arrives
//! after the deadline goes to the report-reply observer, if any.

pub mod access;
pub mod builder;
pub mod client;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod handler;
pub mod pool;
pub mod reconnect;
pub mod requester;
pub mod state;
#[cfg(feature = "tls")]
mod tls;
pub mod transport;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use access::{AccessOptions, DeviceAccess};
pub use builder::DeviceClientBuilder;
pub use client::DeviceClient;
pub use config::{ClientConfig, TlsConfig};
pub use correlation::{CorrelationRegistry, PendingReply};
pub use dispatch::{Dispatched, Dispatcher};
pub use handler::{ConnectionObserver, DeviceCallbacks, DeviceHandler, ReportReplyObserver};
pub use reconnect::ReconnectPolicy;
pub use state::{ConnectionState, ConnectionTracker};
pub use transport::{ChannelSink, FrameSink};
pub use types::{DeviceError, Reply, SdkError};

// Device-side code should not need to import leda-protocol directly.
pub use leda_protocol::{DataType, DeviceAddress, DeviceDatum, ErrorCode};
