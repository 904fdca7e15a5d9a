//! Device callbacks: what the embedding application plugs into the SDK.

use std::sync::Arc;

use leda_protocol::{DeviceAddress, DeviceDatum};

use crate::state::ConnectionState;
use crate::types::DeviceError;

/// Implement this trait to serve the gateway's requests for your devices.
///
/// The SDK runs every call on its worker pool, never on the receive path, so
/// implementations may block or do slow I/O.  Calls for the same device are
/// serialized; calls for different devices run concurrently.
///
/// # Example
///
/// ```rust,no_run
/// use leda_sdk::{DeviceAddress, DeviceDatum, DeviceError, DeviceHandler};
///
/// struct Lamp;
///
/// #[async_trait::async_trait]
/// impl DeviceHandler for Lamp {
///     async fn get_properties(
///         &self,
///         _device: &DeviceAddress,
///         keys: &[String],
///     ) -> Result<Vec<DeviceDatum>, DeviceError> {
///         keys.iter()
///             .map(|k| match k.as_str() {
///                 "power" => Ok(DeviceDatum::bool("power", true)),
///                 other => Err(DeviceError::property_not_exist(other)),
///             })
///             .collect()
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait DeviceHandler: Send + Sync + 'static {
    /// Read the named properties.  Returned values are encoded into the
    /// response in the order given.
    async fn get_properties(
        &self,
        _device: &DeviceAddress,
        _keys: &[String],
    ) -> Result<Vec<DeviceDatum>, DeviceError> {
        tracing::warn!("get_properties is not implemented by this device handler");
        Err(DeviceError::unknown("get_properties not implemented"))
    }

    /// Apply one property value.
    ///
    /// A `setProperty` call carrying several items invokes this once per item,
    /// in order, and stops at the first error.  Items already applied stay
    /// applied.
    async fn set_property(
        &self,
        _device: &DeviceAddress,
        _datum: &DeviceDatum,
    ) -> Result<(), DeviceError> {
        tracing::warn!("set_property is not implemented by this device handler");
        Err(DeviceError::unknown("set_property not implemented"))
    }

    /// Invoke a service.
    ///
    /// `outputs` is pre-sized to the configured maximum output count with
    /// empty entries.  Fill slots from the front; serialization stops at the
    /// first slot whose key is empty.
    async fn call_service(
        &self,
        _device: &DeviceAddress,
        service: &str,
        _inputs: &[DeviceDatum],
        _outputs: &mut [DeviceDatum],
    ) -> Result<(), DeviceError> {
        Err(DeviceError::service_not_exist(service))
    }
}

/// Notified synchronously on every connection state transition.
pub trait ConnectionObserver: Send + Sync + 'static {
    fn on_state_change(&self, state: ConnectionState);
}

impl<F> ConnectionObserver for F
where
    F: Fn(ConnectionState) + Send + Sync + 'static,
{
    fn on_state_change(&self, state: ConnectionState) {
        self(state)
    }
}

/// Receives replies to asynchronous reports (responses nobody is waiting for).
pub trait ReportReplyObserver: Send + Sync + 'static {
    fn on_report_reply(&self, message_id: u32, code: i32);
}

impl<F> ReportReplyObserver for F
where
    F: Fn(u32, i32) + Send + Sync + 'static,
{
    fn on_report_reply(&self, message_id: u32, code: i32) {
        self(message_id, code)
    }
}

/// The full set of application hooks, fixed at construction time.
#[derive(Clone)]
pub struct DeviceCallbacks {
    pub(crate) handler: Arc<dyn DeviceHandler>,
    pub(crate) state_observer: Option<Arc<dyn ConnectionObserver>>,
    pub(crate) reply_observer: Option<Arc<dyn ReportReplyObserver>>,
}

impl DeviceCallbacks {
    pub fn new<H: DeviceHandler>(handler: H) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    /// Use a handler that is shared with the rest of the application.
    pub fn from_arc(handler: Arc<dyn DeviceHandler>) -> Self {
        Self {
            handler,
            state_observer: None,
            reply_observer: None,
        }
    }

    pub fn on_state_change<O: ConnectionObserver>(mut self, observer: O) -> Self {
        self.state_observer = Some(Arc::new(observer));
        self
    }

    pub fn on_report_reply<O: ReportReplyObserver>(mut self, observer: O) -> Self {
        self.reply_observer = Some(Arc::new(observer));
        self
    }

    pub fn has_reply_observer(&self) -> bool {
        self.reply_observer.is_some()
    }
}
