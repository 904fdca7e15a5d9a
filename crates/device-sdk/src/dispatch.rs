//! Dispatcher: classifies each inbound frame and routes it.
//!
//! Runs inline on the receive path, so it never awaits: responses go to the
//! correlation registry, method calls are decoded and queued on the worker
//! pool.  Calls that cannot be queued are answered right here.

use std::sync::Arc;

use leda_protocol::envelope::FIELD_IDENTIFIER;
use leda_protocol::{
    address_from_payload, decode, parse_inbound, DataType, DeviceDatum, ErrorCode,
    Inbound, Method,
};
use serde_json::{Map, Value};

use crate::correlation::CorrelationRegistry;
use crate::pool::{DeviceCall, Job, WorkerPool};
use crate::requester::RequestBuilder;

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Response handed to a waiting synchronous caller.
    Delivered,
    /// Response nobody was waiting for; passed to the report-reply observer
    /// if one is registered, otherwise discarded.
    Unmatched,
    /// Method call queued on the worker pool.
    Submitted,
    /// Method call answered immediately with an error code.
    Rejected(ErrorCode),
    /// Frame dropped without a response.
    Dropped,
}

pub struct Dispatcher {
    registry: Arc<CorrelationRegistry>,
    requester: Arc<RequestBuilder>,
    pool: Arc<WorkerPool>,
    has_reply_observer: bool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CorrelationRegistry>,
        requester: Arc<RequestBuilder>,
        pool: Arc<WorkerPool>,
        has_reply_observer: bool,
    ) -> Self {
        Self {
            registry,
            requester,
            pool,
            has_reply_observer,
        }
    }

    pub fn dispatch(&self, text: &str) -> Dispatched {
        let inbound = match parse_inbound(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                return Dispatched::Dropped;
            }
        };

        match inbound {
            Inbound::Response {
                message_id,
                code,
                payload,
            } => self.route_response(message_id, code, payload),
            Inbound::MethodCall {
                message_id,
                method,
                payload,
            } => self.route_call(message_id, &method, &payload),
        }
    }

    fn route_response(&self, message_id: u32, code: i32, payload: Value) -> Dispatched {
        if self.registry.deliver(message_id, code, payload) {
            return Dispatched::Delivered;
        }

        if self.has_reply_observer {
            if let Err(e) = self.pool.submit(Job::ReportReply { message_id, code }) {
                tracing::warn!(message_id, error = %e, "report reply dropped");
            }
        } else {
            tracing::debug!(message_id, code, "discarding unmatched response");
        }
        Dispatched::Unmatched
    }

    fn route_call(&self, message_id: u32, method: &str, payload: &Value) -> Dispatched {
        let Some(device) = address_from_payload(payload) else {
            tracing::warn!(message_id, method, "method call without productKey/deviceName, dropping");
            return Dispatched::Dropped;
        };

        let call = match decode_call(method, payload) {
            Ok(call) => call,
            Err(reason) => {
                tracing::warn!(message_id, method, device = %device, %reason, "rejecting method call");
                return self.reject(message_id, ErrorCode::InvalidParameter);
            }
        };

        tracing::debug!(message_id, method, device = %device, "method call received");
        match self.pool.submit(Job::Invoke {
            message_id,
            device,
            call,
        }) {
            Ok(()) => Dispatched::Submitted,
            Err(e) => self.reject(message_id, e.code()),
        }
    }

    fn reject(&self, message_id: u32, code: ErrorCode) -> Dispatched {
        if let Err(e) = self.requester.respond(message_id, code.code(), Map::new()) {
            tracing::warn!(message_id, error = %e, "failed to send error response");
        }
        Dispatched::Rejected(code)
    }
}

/// Turn a method call payload into the job the pool runs.
fn decode_call(method: &str, payload: &Value) -> Result<DeviceCall, String> {
    let method = match Method::from_name(method) {
        Some(m) if m.is_inbound() => m,
        _ => return Err(format!("unsupported method '{method}'")),
    };

    let (primary, alternate) = method.data_keys();
    let data = payload.get(primary).or_else(|| payload.get(alternate));

    match method {
        Method::GetProperty => {
            let data = decode_data(data.ok_or("no property list")?)?;
            Ok(DeviceCall::GetProperties {
                keys: data.into_iter().map(|d| d.key).collect(),
            })
        }
        Method::SetProperty => {
            let items = decode_data(data.ok_or("no property list")?)?;
            if let Some(bare) = items.iter().find(|d| d.data_type == DataType::Invalid) {
                return Err(format!("property '{}' has no type or value", bare.key));
            }
            Ok(DeviceCall::SetProperties { items })
        }
        Method::CallService => {
            let service = payload
                .get(FIELD_IDENTIFIER)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or("service call without identifier")?;
            let inputs = match data {
                Some(data) => decode_data(data)?,
                None => Vec::new(),
            };
            Ok(DeviceCall::CallService {
                service: service.to_string(),
                inputs,
            })
        }
        _ => Err(format!("unsupported method '{method}'")),
    }
}

fn decode_data(data: &Value) -> Result<Vec<DeviceDatum>, String> {
    decode(data).map_err(|e| e.to_string())
}
