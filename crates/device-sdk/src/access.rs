//! [`DeviceAccess`] is the explicitly constructed core that owns the
//! correlation registry, connection state, request builder, dispatcher and
//! worker pool for one gateway link.

use std::sync::Arc;
use std::time::Duration;

use leda_protocol::{DeviceAddress, DeviceDatum};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::correlation::CorrelationRegistry;
use crate::dispatch::{Dispatched, Dispatcher};
use crate::handler::DeviceCallbacks;
use crate::pool::{PoolOptions, WorkerPool};
use crate::requester::{Outbound, RequestBuilder};
use crate::state::{ConnectionState, ConnectionTracker};
use crate::transport::FrameSink;
use crate::types::{Reply, SdkError};

/// Tuning for the core.  See [`ClientConfig`](crate::ClientConfig) for the
/// serialized form.
#[derive(Debug, Clone)]
pub struct AccessOptions {
    /// Budget for synchronous property/event reports.
    pub request_timeout: Duration,
    /// Budget for `onlineDevice` / `offlineDevice`.
    pub handshake_timeout: Duration,
    pub workers: usize,
    pub queue_depth: usize,
    /// Output slots handed to `call_service`.
    pub service_output_max_count: usize,
    /// Cap on synchronous requests awaiting a reply (0 = unlimited).
    pub max_in_flight: usize,
    /// How long `shutdown` lets queued jobs finish.
    pub drain_timeout: Duration,
}

impl Default for AccessOptions {
    fn default() -> Self {
        let pool = PoolOptions::default();
        Self {
            request_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(20 * 60),
            workers: pool.workers,
            queue_depth: pool.queue_depth,
            service_output_max_count: pool.service_output_max_count,
            max_in_flight: 1024,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Cheap to clone; all clones share one core.
#[derive(Clone)]
pub struct DeviceAccess {
    inner: Arc<Inner>,
}

struct Inner {
    tracker: Arc<ConnectionTracker>,
    registry: Arc<CorrelationRegistry>,
    requester: Arc<RequestBuilder>,
    pool: Arc<WorkerPool>,
    dispatcher: Dispatcher,
    options: AccessOptions,
    closed: CancellationToken,
}

impl DeviceAccess {
    /// Build the core.  Inbound frames must be fed from inside a tokio
    /// runtime, since the worker pool spawns a task per device lane.
    pub fn new(callbacks: DeviceCallbacks, options: AccessOptions) -> Self {
        let tracker = Arc::new(ConnectionTracker::new(callbacks.state_observer.clone()));
        let registry = Arc::new(CorrelationRegistry::new(options.max_in_flight));
        let requester = Arc::new(RequestBuilder::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
        ));
        let has_reply_observer = callbacks.has_reply_observer();
        let pool = Arc::new(WorkerPool::start(
            &PoolOptions {
                workers: options.workers,
                queue_depth: options.queue_depth,
                service_output_max_count: options.service_output_max_count,
            },
            callbacks,
            Arc::clone(&requester),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&requester),
            Arc::clone(&pool),
            has_reply_observer,
        );

        Self {
            inner: Arc::new(Inner {
                tracker,
                registry,
                requester,
                pool,
                dispatcher,
                options,
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn options(&self) -> &AccessOptions {
        &self.inner.options
    }

    // ── Device lifecycle ─────────────────────────────────────────────

    /// Announce a device.  Waits for the gateway's acknowledgement.
    pub async fn online(&self, device: &DeviceAddress) -> Result<Reply, SdkError> {
        let reply = self
            .inner
            .requester
            .send_sync(device, Outbound::Online, self.inner.options.handshake_timeout)
            .await?;
        tracing::info!(device = %device, code = reply.code, "device online");
        Ok(reply)
    }

    /// Withdraw a device.  Waits for the gateway's acknowledgement.
    pub async fn offline(&self, device: &DeviceAddress) -> Result<Reply, SdkError> {
        let reply = self
            .inner
            .requester
            .send_sync(device, Outbound::Offline, self.inner.options.handshake_timeout)
            .await?;
        tracing::info!(device = %device, code = reply.code, "device offline");
        Ok(reply)
    }

    // ── Reporting ────────────────────────────────────────────────────

    /// Report properties without waiting.  Returns the message id.
    pub fn report_properties(
        &self,
        device: &DeviceAddress,
        data: &[DeviceDatum],
    ) -> Result<u32, SdkError> {
        self.inner
            .requester
            .send_async(device, Outbound::Properties(data))
    }

    /// Report an event without waiting.  Returns the message id.
    pub fn report_event(
        &self,
        device: &DeviceAddress,
        name: &str,
        data: &[DeviceDatum],
    ) -> Result<u32, SdkError> {
        self.inner
            .requester
            .send_async(device, Outbound::Event { name, data })
    }

    pub async fn report_properties_sync(
        &self,
        device: &DeviceAddress,
        data: &[DeviceDatum],
    ) -> Result<Reply, SdkError> {
        self.inner
            .requester
            .send_sync(
                device,
                Outbound::Properties(data),
                self.inner.options.request_timeout,
            )
            .await
    }

    pub async fn report_event_sync(
        &self,
        device: &DeviceAddress,
        name: &str,
        data: &[DeviceDatum],
    ) -> Result<Reply, SdkError> {
        self.inner
            .requester
            .send_sync(
                device,
                Outbound::Event { name, data },
                self.inner.options.request_timeout,
            )
            .await
    }

    // ── Connection state ─────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.inner.tracker.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.tracker.subscribe()
    }

    /// Wait until the link is up.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), SdkError> {
        let mut rx = self.subscribe_state();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed)),
        )
        .await;

        match waited {
            Ok(Ok(state)) if *state == ConnectionState::Connected => Ok(()),
            Ok(_) => Err(SdkError::Closed),
            Err(_) => Err(SdkError::ConnectTimeout(timeout)),
        }
    }

    /// Number of synchronous requests currently awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.inner.registry.len()
    }

    // ── Transport hooks ──────────────────────────────────────────────

    /// The transport is up and `sink` carries outbound frames.  Returns
    /// `false` if the core has been shut down.
    pub fn on_establish(&self, sink: Arc<dyn FrameSink>) -> bool {
        self.inner.tracker.establish(sink)
    }

    /// The transport went down.  Requests in flight keep waiting until their
    /// own deadlines.
    pub fn on_close(&self) {
        self.inner.tracker.close();
    }

    /// One inbound text frame.  Never blocks on device callbacks.
    pub fn on_receive(&self, text: &str) -> Dispatched {
        self.inner.dispatcher.dispatch(text)
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Enter `Closed`: refuse further sends, fail waiting requests with
    /// [`SdkError::Closed`], and drain the worker pool.
    pub async fn shutdown(&self) {
        if !self.inner.tracker.shutdown() {
            return;
        }
        let abandoned = self.inner.registry.clear();
        if abandoned > 0 {
            tracing::info!(abandoned, "pending requests abandoned at shutdown");
        }
        self.inner.pool.shutdown(self.inner.options.drain_timeout).await;
        self.inner.closed.cancel();
        tracing::info!("device access shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Resolves once [`shutdown`](Self::shutdown) has finished.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::DeviceHandler;

    struct Nothing;
    impl DeviceHandler for Nothing {}

    struct Sink;
    impl FrameSink for Sink {
        fn send_frame(&self, _frame: String) -> Result<(), SdkError> {
            Ok(())
        }
    }

    fn access() -> DeviceAccess {
        DeviceAccess::new(DeviceCallbacks::new(Nothing), AccessOptions::default())
    }

    #[test]
    fn default_options() {
        let o = AccessOptions::default();
        assert_eq!(o.request_timeout, Duration::from_secs(10));
        assert_eq!(o.handshake_timeout, Duration::from_secs(1200));
        assert_eq!(o.workers, 5);
        assert_eq!(o.queue_depth, 5120);
    }

    #[tokio::test]
    async fn wait_connected_resolves_on_establish() {
        let access = access();
        let waiter = {
            let access = access.clone();
            tokio::spawn(async move { access.wait_connected(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        assert!(access.on_establish(Arc::new(Sink)));
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_connected_times_out() {
        let access = access();
        let err = access
            .wait_connected(Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::ConnectTimeout(_)));
    }

    #[tokio::test]
    async fn shutdown_is_terminal() {
        let access = access();
        access.on_establish(Arc::new(Sink));
        access.shutdown().await;
        access.closed().await;

        assert!(access.is_closed());
        assert!(!access.on_establish(Arc::new(Sink)));
        assert!(matches!(
            access.report_properties(&DeviceAddress::new("PK", "DN"), &[]),
            Err(SdkError::Closed)
        ));
        assert!(matches!(
            access.wait_connected(Duration::from_secs(1)).await,
            Err(SdkError::Closed)
        ));
    }
}
