//! Builder pattern for constructing a [`DeviceClient`].

use std::path::PathBuf;
use std::time::Duration;

use crate::access::{AccessOptions, DeviceAccess};
use crate::client::DeviceClient;
use crate::config::{ClientConfig, TlsConfig};
use crate::handler::DeviceCallbacks;
use crate::reconnect::ReconnectPolicy;
use crate::types::SdkError;

/// Fluent builder for [`DeviceClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use leda_sdk::{DeviceCallbacks, DeviceClientBuilder, DeviceHandler};
/// # struct Lamp;
/// # impl DeviceHandler for Lamp {}
/// # async fn demo() -> Result<(), leda_sdk::SdkError> {
/// let client = DeviceClientBuilder::new()
///     .url("ws://192.168.1.10:17682")
///     .workers(5)
///     .request_timeout(std::time::Duration::from_secs(10))
///     .build(DeviceCallbacks::new(Lamp))?;
/// let access = client.access();
/// # Ok(())
/// # }
/// ```
pub struct DeviceClientBuilder {
    url: String,
    tls: TlsConfig,
    connect_timeout: Duration,
    heartbeat_interval: Duration,
    outbound_capacity: usize,
    max_inbound_bytes: usize,
    reconnect: ReconnectPolicy,
    access: AccessOptions,
}

impl DeviceClientBuilder {
    pub fn new() -> Self {
        Self::from_config(&ClientConfig::default())
    }

    /// Start from a loaded [`ClientConfig`].
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            url: config.url.clone(),
            tls: config.tls.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            outbound_capacity: config.outbound_capacity,
            max_inbound_bytes: config.max_inbound_bytes,
            reconnect: config.reconnect.clone(),
            access: config.access_options(),
        }
    }

    // ── Link ─────────────────────────────────────────────────────────

    /// Gateway URL: `ws://host:port` or `wss://host:port`.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Trusted roots for `wss://`.
    pub fn ca_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls.ca_path = Some(path.into());
        self
    }

    /// Client certificate chain and key for mutual TLS.
    pub fn client_cert(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls.cert_path = Some(cert.into());
        self.tls.key_path = Some(key.into());
        self
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn heartbeat_interval(mut self, d: Duration) -> Self {
        self.heartbeat_interval = d;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn outbound_capacity(mut self, n: usize) -> Self {
        self.outbound_capacity = n;
        self
    }

    pub fn max_inbound_bytes(mut self, n: usize) -> Self {
        self.max_inbound_bytes = n;
        self
    }

    // ── Core ─────────────────────────────────────────────────────────

    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.access.request_timeout = d;
        self
    }

    pub fn handshake_timeout(mut self, d: Duration) -> Self {
        self.access.handshake_timeout = d;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.access.workers = n;
        self
    }

    pub fn queue_depth(mut self, n: usize) -> Self {
        self.access.queue_depth = n;
        self
    }

    pub fn service_output_max_count(mut self, n: usize) -> Self {
        self.access.service_output_max_count = n;
        self
    }

    pub fn max_in_flight(mut self, n: usize) -> Self {
        self.access.max_in_flight = n;
        self
    }

    /// Validate the settings, build the core and return the client.
    pub fn build(self, callbacks: DeviceCallbacks) -> Result<DeviceClient, SdkError> {
        self.validate()?;

        #[cfg(feature = "tls")]
        let connector = if self.url.starts_with("wss://") {
            crate::tls::connector(&self.tls)?
        } else {
            None
        };

        Ok(DeviceClient {
            url: self.url,
            connect_timeout: self.connect_timeout,
            heartbeat_interval: self.heartbeat_interval,
            outbound_capacity: self.outbound_capacity,
            max_inbound_bytes: self.max_inbound_bytes,
            reconnect: self.reconnect,
            access: DeviceAccess::new(callbacks, self.access),
            #[cfg(feature = "tls")]
            connector,
        })
    }

    fn validate(&self) -> Result<(), SdkError> {
        let tls = self.url.starts_with("wss://");
        if !tls && !self.url.starts_with("ws://") {
            return Err(SdkError::Config(format!(
                "gateway url must start with ws:// or wss://, got '{}'",
                self.url
            )));
        }
        if tls && !cfg!(feature = "tls") {
            return Err(SdkError::Config(
                "wss:// needs the `tls` feature of leda-sdk".into(),
            ));
        }
        if self.access.workers == 0 || self.access.queue_depth == 0 {
            return Err(SdkError::Config(
                "workers and queue_depth must be at least 1".into(),
            ));
        }
        if self.outbound_capacity == 0 {
            return Err(SdkError::Config("outbound_capacity must be at least 1".into()));
        }
        if self.heartbeat_interval.is_zero() || self.connect_timeout.is_zero() {
            return Err(SdkError::Config(
                "heartbeat_interval and connect_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DeviceClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
