//! Request builder: frames outbound envelopes and drives the synchronous
//! build → register → send → wait cycle.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use leda_protocol::envelope::{FIELD_IDENTIFIER, FIELD_OUTPUT_DATA, FIELD_PROPERTIES};
use leda_protocol::{device_payload, encode, DeviceAddress, DeviceDatum, Envelope, Method, MAX_KEY_LEN};
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::correlation::CorrelationRegistry;
use crate::state::ConnectionTracker;
use crate::types::{Reply, SdkError};

/// What an outbound request carries besides the device address.
#[derive(Debug, Clone, Copy)]
pub enum Outbound<'a> {
    Online,
    Offline,
    Properties(&'a [DeviceDatum]),
    Event {
        name: &'a str,
        data: &'a [DeviceDatum],
    },
}

impl Outbound<'_> {
    pub fn method(&self) -> Method {
        match self {
            Outbound::Online => Method::OnlineDevice,
            Outbound::Offline => Method::OfflineDevice,
            Outbound::Properties(_) => Method::ReportProperty,
            Outbound::Event { .. } => Method::ReportEvent,
        }
    }
}

pub struct RequestBuilder {
    next_id: AtomicU32,
    registry: Arc<CorrelationRegistry>,
    tracker: Arc<ConnectionTracker>,
}

impl RequestBuilder {
    pub fn new(registry: Arc<CorrelationRegistry>, tracker: Arc<ConnectionTracker>) -> Self {
        Self {
            next_id: AtomicU32::new(1),
            registry,
            tracker,
        }
    }

    /// Take the next message id.  Ids increase monotonically and skip `0`
    /// when the counter wraps.
    pub fn next_message_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Fire-and-forget send.  Returns the id so a later report-reply
    /// observer call can be matched up.
    pub fn send_async(&self, device: &DeviceAddress, request: Outbound<'_>) -> Result<u32, SdkError> {
        let payload = build_payload(device, request)?;
        self.tracker.ensure_connected()?;

        let message_id = self.next_message_id();
        let frame = to_frame(&Envelope::request(message_id, request.method(), payload))?;
        self.tracker.send(frame)?;

        tracing::debug!(
            message_id,
            method = %request.method(),
            device = %device,
            "request sent"
        );
        Ok(message_id)
    }

    /// Send and wait for the matching response, up to `timeout`.
    pub async fn send_sync(
        &self,
        device: &DeviceAddress,
        request: Outbound<'_>,
        timeout: Duration,
    ) -> Result<Reply, SdkError> {
        let deadline = Instant::now() + timeout;
        let payload = build_payload(device, request)?;
        self.tracker.ensure_connected()?;

        let message_id = self.next_message_id();
        let frame = to_frame(&Envelope::request(message_id, request.method(), payload))?;

        // Registered before the frame leaves; a failed send drops the handle
        // and with it the entry.
        let pending = self.registry.register(message_id)?;
        self.tracker.send(frame)?;

        tracing::debug!(
            message_id,
            method = %request.method(),
            device = %device,
            timeout_ms = timeout.as_millis() as u64,
            "request sent, awaiting reply"
        );

        let reply = pending.wait_until(deadline, timeout).await?;
        tracing::debug!(message_id, code = reply.code, "reply received");
        Ok(reply)
    }

    /// Answer an inbound method call.
    pub fn respond(&self, message_id: u32, code: i32, payload: Map<String, Value>) -> Result<(), SdkError> {
        let frame = to_frame(&Envelope::response(message_id, code, payload))?;
        self.tracker.send(frame)
    }
}

fn to_frame(envelope: &Envelope) -> Result<String, SdkError> {
    envelope
        .to_json()
        .map_err(|e| SdkError::InvalidParameter(format!("unserializable envelope: {e}")))
}

/// Validate and assemble the payload object for `request`.
pub(crate) fn build_payload(device: &DeviceAddress, request: Outbound<'_>) -> Result<Map<String, Value>, SdkError> {
    if device.product_key.is_empty() || device.device_name.is_empty() {
        return Err(SdkError::InvalidParameter(
            "productKey and deviceName must be non-empty".into(),
        ));
    }

    let mut payload = device_payload(device);
    match request {
        Outbound::Online | Outbound::Offline => {}
        Outbound::Properties(data) => {
            payload.insert(FIELD_PROPERTIES.into(), encode_checked(data)?);
        }
        Outbound::Event { name, data } => {
            if name.is_empty() || name.len() > MAX_KEY_LEN {
                return Err(SdkError::InvalidParameter(format!(
                    "event name must be 1..={MAX_KEY_LEN} bytes"
                )));
            }
            payload.insert(FIELD_IDENTIFIER.into(), Value::String(name.into()));
            payload.insert(FIELD_OUTPUT_DATA.into(), encode_checked(data)?);
        }
    }
    Ok(payload)
}

fn encode_checked(data: &[DeviceDatum]) -> Result<Value, SdkError> {
    for datum in data {
        datum.check_limits().map_err(SdkError::InvalidParameter)?;
    }
    Ok(encode(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FrameSink;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Capture(Mutex<Vec<String>>);

    impl FrameSink for Capture {
        fn send_frame(&self, frame: String) -> Result<(), SdkError> {
            self.0.lock().push(frame);
            Ok(())
        }
    }

    struct Refuse;

    impl FrameSink for Refuse {
        fn send_frame(&self, _frame: String) -> Result<(), SdkError> {
            Err(SdkError::ConnectionDown)
        }
    }

    fn builder(sink: Option<Arc<dyn FrameSink>>) -> (RequestBuilder, Arc<CorrelationRegistry>) {
        let registry = Arc::new(CorrelationRegistry::new(64));
        let tracker = Arc::new(ConnectionTracker::new(None));
        if let Some(sink) = sink {
            tracker.establish(sink);
        }
        (RequestBuilder::new(registry.clone(), tracker), registry)
    }

    fn lamp() -> DeviceAddress {
        DeviceAddress::new("PK1", "DN1")
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let (b, _) = builder(None);
        assert_eq!(b.next_message_id(), 1);
        assert_eq!(b.next_message_id(), 2);
    }

    #[test]
    fn id_counter_skips_zero_on_wrap() {
        let (b, _) = builder(None);
        b.next_id.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(b.next_message_id(), u32::MAX);
        assert_eq!(b.next_message_id(), 1);
    }

    #[test]
    fn property_report_frame() {
        let sink = Arc::new(Capture::default());
        let (b, registry) = builder(Some(sink.clone()));
        let id = b
            .send_async(&lamp(), Outbound::Properties(&[DeviceDatum::int("brightness", 40)]))
            .unwrap();

        let frames = sink.0.lock();
        let v: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(v["messageId"], json!(id));
        assert_eq!(v["method"], "reportProperty");
        assert_eq!(v["version"], "1.0");
        assert_eq!(
            v["payload"],
            json!({
                "productKey": "PK1",
                "deviceName": "DN1",
                "properties": [{ "identifier": "brightness", "type": "int", "value": 40 }]
            })
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn event_frame_carries_identifier_and_output_data() {
        let sink = Arc::new(Capture::default());
        let (b, _) = builder(Some(sink.clone()));
        b.send_async(
            &lamp(),
            Outbound::Event {
                name: "ledBroken",
                data: &[DeviceDatum::text("reason", "burnt")],
            },
        )
        .unwrap();

        let v: Value = serde_json::from_str(&sink.0.lock()[0]).unwrap();
        assert_eq!(v["method"], "reportEvent");
        assert_eq!(v["payload"]["identifier"], "ledBroken");
        assert_eq!(v["payload"]["outputData"][0]["identifier"], "reason");
    }

    #[test]
    fn invalid_input_does_not_consume_an_id() {
        let sink = Arc::new(Capture::default());
        let (b, _) = builder(Some(sink.clone()));
        let long_key = "k".repeat(MAX_KEY_LEN + 1);
        let err = b
            .send_async(&lamp(), Outbound::Properties(&[DeviceDatum::int(long_key, 1)]))
            .unwrap_err();
        assert!(matches!(err, SdkError::InvalidParameter(_)));

        let err = b
            .send_async(&DeviceAddress::new("", "DN1"), Outbound::Online)
            .unwrap_err();
        assert!(matches!(err, SdkError::InvalidParameter(_)));

        assert!(sink.0.lock().is_empty());
        assert_eq!(b.next_message_id(), 1);
    }

    #[test]
    fn disconnected_send_fails_fast() {
        let (b, _) = builder(None);
        assert!(matches!(
            b.send_async(&lamp(), Outbound::Online),
            Err(SdkError::ConnectionDown)
        ));
        assert_eq!(b.next_message_id(), 1);
    }

    #[tokio::test]
    async fn failed_send_leaves_no_entry() {
        let (b, registry) = builder(Some(Arc::new(Refuse)));
        let err = b
            .send_sync(&lamp(), Outbound::Online, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::ConnectionDown));
        assert!(registry.is_empty());
    }

    #[test]
    fn response_frame_shape() {
        let sink = Arc::new(Capture::default());
        let (b, _) = builder(Some(sink.clone()));
        b.respond(12, 109_002, Map::new()).unwrap();
        let v: Value = serde_json::from_str(&sink.0.lock()[0]).unwrap();
        assert_eq!(v, json!({ "messageId": 12, "code": 109_002, "payload": {} }));
    }
}
