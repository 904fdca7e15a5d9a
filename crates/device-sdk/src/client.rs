//! WebSocket driver: owns the socket and feeds [`DeviceAccess`] through its
//! transport hooks.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use leda_protocol::WS_SUBPROTOCOL;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::access::DeviceAccess;
use crate::reconnect::ReconnectPolicy;
use crate::transport::ChannelSink;
use crate::types::SdkError;

/// A configured gateway client.
///
/// Create via [`DeviceClientBuilder`](crate::builder::DeviceClientBuilder).
/// Grab [`access`](Self::access) before calling [`run`](Self::run); that is
/// the handle for bringing devices online and reporting data.
pub struct DeviceClient {
    pub(crate) url: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) outbound_capacity: usize,
    pub(crate) max_inbound_bytes: usize,
    pub(crate) reconnect: ReconnectPolicy,
    pub(crate) access: DeviceAccess,
    #[cfg(feature = "tls")]
    pub(crate) connector: Option<tokio_tungstenite::Connector>,
}

/// Aborts the task when the connection lifecycle that spawned it ends.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl DeviceClient {
    pub fn builder() -> crate::builder::DeviceClientBuilder {
        crate::builder::DeviceClientBuilder::new()
    }

    /// The core this client drives.
    pub fn access(&self) -> DeviceAccess {
        self.access.clone()
    }

    /// Connect, serve the link, and reconnect after drops.
    ///
    /// Returns when `shutdown` fires (after shutting the core down), when
    /// the core is shut down from elsewhere, or when the reconnect budget is
    /// spent.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SdkError> {
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() || self.access.is_closed() {
                self.access.shutdown().await;
                return Err(SdkError::Shutdown);
            }

            let result = tokio::select! {
                r = self.connect_and_run() => r,
                _ = shutdown.cancelled() => {
                    tracing::info!("shutdown requested");
                    self.access.shutdown().await;
                    return Err(SdkError::Shutdown);
                }
                _ = self.access.closed() => return Err(SdkError::Shutdown),
            };

            match result {
                Ok(true) => attempt = 0,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(url = %self.url, attempt, error = %e, "gateway connection failed");
                }
            }

            if self.access.is_closed() {
                return Err(SdkError::Shutdown);
            }
            if self.reconnect.exhausted(attempt) {
                tracing::error!(attempts = attempt, "reconnect attempts exhausted");
                self.access.shutdown().await;
                return Err(SdkError::ReconnectExhausted(attempt));
            }

            let delay = self.reconnect.delay(attempt);
            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                attempt = attempt + 1,
                "reconnecting"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    self.access.shutdown().await;
                    return Err(SdkError::Shutdown);
                }
                _ = self.access.closed() => return Err(SdkError::Shutdown),
            }

            attempt += 1;
        }
    }

    /// Same as [`run`](Self::run) on a spawned task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<Result<(), SdkError>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// One connection lifecycle.  Returns `Ok(true)` if the link came up
    /// before it ended.
    async fn connect_and_run(&self) -> Result<bool, anyhow::Error> {
        let request = self.request()?;
        tracing::info!(url = %self.url, "connecting to gateway");

        let (ws, _response) = tokio::time::timeout(self.connect_timeout, self.open(request))
            .await
            .map_err(|_| anyhow::anyhow!("connect timed out after {:?}", self.connect_timeout))??;
        let (mut sink, mut stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(self.outbound_capacity);

        let _writer = AbortOnDrop(tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    tracing::debug!(error = %e, "websocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        }));

        let ping_tx = outbound_tx.clone();
        let every = self.heartbeat_interval;
        let _pinger = AbortOnDrop(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                interval.tick().await;
                if ping_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }));

        if !self.access.on_establish(Arc::new(ChannelSink::new(outbound_tx))) {
            return Ok(false);
        }
        tracing::info!(url = %self.url, "connected to gateway");

        let idle = self.heartbeat_interval * 3;
        let outcome: Result<(), anyhow::Error> = loop {
            let next = match tokio::time::timeout(idle, stream.next()).await {
                Ok(next) => next,
                Err(_) => break Err(anyhow::anyhow!("no traffic for {idle:?}")),
            };

            match next {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > self.max_inbound_bytes {
                        tracing::warn!(
                            bytes = text.len(),
                            max = self.max_inbound_bytes,
                            "inbound frame exceeds max_inbound_bytes, dropping"
                        );
                        continue;
                    }
                    self.access.on_receive(&text);
                }
                Some(Ok(Message::Binary(bytes))) => {
                    tracing::debug!(bytes = bytes.len(), "ignoring binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "gateway closed connection");
                    break Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
                None => break Ok(()),
            }
        };

        self.access.on_close();
        if let Err(e) = outcome {
            tracing::warn!(error = %e, "connection lost");
        }
        Ok(true)
    }

    /// Upgrade request offering the gateway subprotocol.
    fn request(&self) -> Result<Request, anyhow::Error> {
        let mut request = self.url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(WS_SUBPROTOCOL));
        Ok(request)
    }

    #[cfg(feature = "tls")]
    async fn open(
        &self,
        request: Request,
    ) -> Result<
        (
            tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
            tokio_tungstenite::tungstenite::handshake::client::Response,
        ),
        tokio_tungstenite::tungstenite::Error,
    > {
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, self.connector.clone())
            .await
    }

    #[cfg(not(feature = "tls"))]
    async fn open(
        &self,
        request: Request,
    ) -> Result<
        (
            tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
            tokio_tungstenite::tungstenite::handshake::client::Response,
        ),
        tokio_tungstenite::tungstenite::Error,
    > {
        tokio_tungstenite::connect_async(request).await
    }
}
