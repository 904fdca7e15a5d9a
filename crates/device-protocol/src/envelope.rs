//! Wire envelope: `{ version, messageId, method | code, payload }`.
//!
//! A frame with `code` is a response; a frame with `method` and no `code` is
//! a method call.  A frame with both or neither is malformed.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::datum::DeviceAddress;

/// Protocol version stamped on every outbound request.
pub const PROTOCOL_VERSION: &str = "1.0";

/// `Sec-WebSocket-Protocol` offered when connecting to the gateway.
pub const WS_SUBPROTOCOL: &str = "alibaba-iot-linkedge-protocol";

// Payload field names.
pub const FIELD_PRODUCT_KEY: &str = "productKey";
pub const FIELD_DEVICE_NAME: &str = "deviceName";
pub const FIELD_IDENTIFIER: &str = "identifier";
pub const FIELD_PROPERTIES: &str = "properties";
pub const FIELD_INPUT_DATA: &str = "inputData";
pub const FIELD_OUTPUT_DATA: &str = "outputData";

/// Method names used on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Device → gateway.
    OnlineDevice,
    OfflineDevice,
    ReportProperty,
    ReportEvent,
    /// Gateway → device.
    GetProperty,
    SetProperty,
    CallService,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::OnlineDevice => "onlineDevice",
            Method::OfflineDevice => "offlineDevice",
            Method::ReportProperty => "reportProperty",
            Method::ReportEvent => "reportEvent",
            Method::GetProperty => "getProperty",
            Method::SetProperty => "setProperty",
            Method::CallService => "callService",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "onlineDevice" => Method::OnlineDevice,
            "offlineDevice" => Method::OfflineDevice,
            "reportProperty" => Method::ReportProperty,
            "reportEvent" => Method::ReportEvent,
            "getProperty" => Method::GetProperty,
            "setProperty" => Method::SetProperty,
            "callService" => Method::CallService,
            _ => return None,
        })
    }

    /// Methods the gateway may invoke on us.
    pub fn is_inbound(self) -> bool {
        matches!(
            self,
            Method::GetProperty | Method::SetProperty | Method::CallService
        )
    }

    /// Payload key holding an inbound call's data array, and the key tried
    /// when that one is absent.
    pub fn data_keys(self) -> (&'static str, &'static str) {
        match self {
            Method::CallService => (FIELD_INPUT_DATA, FIELD_PROPERTIES),
            _ => (FIELD_PROPERTIES, FIELD_INPUT_DATA),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame on the link, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub message_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(default = "empty_object")]
    pub payload: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Envelope {
    /// Outbound request.
    pub fn request(message_id: u32, method: Method, payload: Map<String, Value>) -> Self {
        Self {
            version: Some(PROTOCOL_VERSION.into()),
            message_id,
            method: Some(method.as_str().into()),
            code: None,
            payload: Value::Object(payload),
        }
    }

    /// Outbound response to an inbound method call.
    pub fn response(message_id: u32, code: i32, payload: Map<String, Value>) -> Self {
        Self {
            version: None,
            message_id,
            method: None,
            code: Some(code),
            payload: Value::Object(payload),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decide what this frame is.
    pub fn classify(self) -> Result<Inbound, EnvelopeError> {
        match (self.code, self.method) {
            (Some(code), None) => Ok(Inbound::Response {
                message_id: self.message_id,
                code,
                payload: self.payload,
            }),
            (None, Some(method)) => Ok(Inbound::MethodCall {
                message_id: self.message_id,
                method,
                payload: self.payload,
            }),
            (Some(_), Some(_)) => Err(EnvelopeError::Ambiguous {
                message_id: self.message_id,
            }),
            (None, None) => Err(EnvelopeError::NoDiscriminant {
                message_id: self.message_id,
            }),
        }
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response {
        message_id: u32,
        code: i32,
        payload: Value,
    },
    MethodCall {
        message_id: u32,
        method: String,
        payload: Value,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum EnvelopeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame {message_id} carries both 'code' and 'method'")]
    Ambiguous { message_id: u32 },
    #[error("frame {message_id} carries neither 'code' nor 'method'")]
    NoDiscriminant { message_id: u32 },
}

/// Parse and classify one inbound text frame.
pub fn parse_inbound(text: &str) -> Result<Inbound, EnvelopeError> {
    serde_json::from_str::<Envelope>(text)?.classify()
}

/// Start a payload object addressed to `device`.
pub fn device_payload(device: &DeviceAddress) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert(
        FIELD_PRODUCT_KEY.into(),
        Value::String(device.product_key.clone()),
    );
    payload.insert(
        FIELD_DEVICE_NAME.into(),
        Value::String(device.device_name.clone()),
    );
    payload
}

/// Extract the target device from an inbound payload.
pub fn address_from_payload(payload: &Value) -> Option<DeviceAddress> {
    let product_key = payload.get(FIELD_PRODUCT_KEY)?.as_str()?;
    let device_name = payload.get(FIELD_DEVICE_NAME)?.as_str()?;
    Some(DeviceAddress::new(product_key, device_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let addr = DeviceAddress::new("PK1", "DN1");
        let env = Envelope::request(7, Method::OnlineDevice, device_payload(&addr));
        let v: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(
            v,
            json!({
                "version": PROTOCOL_VERSION,
                "messageId": 7,
                "method": "onlineDevice",
                "payload": { "productKey": "PK1", "deviceName": "DN1" }
            })
        );
    }

    #[test]
    fn response_wire_shape() {
        let env = Envelope::response(9, 0, Map::new());
        let v: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(v, json!({ "messageId": 9, "code": 0, "payload": {} }));
    }

    #[test]
    fn classify_response() {
        let inbound = parse_inbound(r#"{"code":0,"messageId":3,"payload":{"x":1}}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Response {
                message_id: 3,
                code: 0,
                payload: json!({"x": 1})
            }
        );
    }

    #[test]
    fn classify_method_call_without_payload() {
        let inbound = parse_inbound(r#"{"messageId":4,"method":"getProperty"}"#).unwrap();
        match inbound {
            Inbound::MethodCall {
                message_id,
                method,
                payload,
            } => {
                assert_eq!(message_id, 4);
                assert_eq!(method, "getProperty");
                assert_eq!(payload, json!({}));
            }
            other => panic!("expected MethodCall, got {other:?}"),
        }
    }

    #[test]
    fn both_discriminants_is_malformed() {
        let err = parse_inbound(r#"{"messageId":1,"code":0,"method":"getProperty"}"#)
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::Ambiguous { message_id: 1 }));
    }

    #[test]
    fn neither_discriminant_is_malformed() {
        let err = parse_inbound(r#"{"messageId":1,"payload":{}}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::NoDiscriminant { message_id: 1 }));
    }

    #[test]
    fn bad_json_and_bad_ids_are_malformed() {
        assert!(matches!(
            parse_inbound("not json"),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(parse_inbound(r#"{"messageId":"1","code":0}"#).is_err());
        assert!(parse_inbound(r#"{"messageId":-1,"code":0}"#).is_err());
        assert!(parse_inbound(r#"{"messageId":1,"code":"0"}"#).is_err());
    }

    #[test]
    fn method_names_roundtrip() {
        for m in [
            Method::OnlineDevice,
            Method::OfflineDevice,
            Method::ReportProperty,
            Method::ReportEvent,
            Method::GetProperty,
            Method::SetProperty,
            Method::CallService,
        ] {
            assert_eq!(Method::from_name(m.as_str()), Some(m));
        }
        assert_eq!(Method::from_name("reboot"), None);
    }

    #[test]
    fn data_keys_fall_back() {
        assert_eq!(Method::GetProperty.data_keys(), ("properties", "inputData"));
        assert_eq!(Method::CallService.data_keys(), ("inputData", "properties"));
    }

    #[test]
    fn address_extraction() {
        let payload = json!({ "productKey": "PK1", "deviceName": "DN1" });
        assert_eq!(
            address_from_payload(&payload),
            Some(DeviceAddress::new("PK1", "DN1"))
        );
        assert_eq!(address_from_payload(&json!({ "productKey": "PK1" })), None);
        assert_eq!(
            address_from_payload(&json!({ "productKey": 1, "deviceName": "DN1" })),
            None
        );
    }
}
