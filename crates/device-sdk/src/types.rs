//! Core types: replies, device-callback errors, and the SDK error.

use std::time::Duration;

use leda_protocol::{CodecError, ErrorCode};

/// The gateway's answer to a synchronous request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub message_id: u32,
    /// Raw wire code.  `0` is success.
    pub code: i32,
    pub payload: serde_json::Value,
}

impl Reply {
    /// The code classified into the known taxonomy.
    pub fn status(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }

    pub fn is_success(&self) -> bool {
        self.code == ErrorCode::Success.code()
    }
}

/// What a device callback reports when it cannot do what was asked.
///
/// The `code` goes on the wire unchanged; the message is only logged.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct DeviceError {
    pub code: ErrorCode,
    pub message: String,
}

impl DeviceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn property_not_exist(key: &str) -> Self {
        Self::new(ErrorCode::PropertyNotExist, format!("no property '{key}'"))
    }

    pub fn service_not_exist(name: &str) -> Self {
        Self::new(ErrorCode::ServiceNotExist, format!("no service '{name}'"))
    }

    pub fn range_overflow(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RangeOverflow, message)
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameter, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }
}

/// Top-level SDK error.
#[derive(thiserror::Error, Debug)]
pub enum SdkError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("allocation failure: {0}")]
    AllocationFailure(String),
    #[error("message {message_id} got no reply within {after:?}")]
    Timeout { message_id: u32, after: Duration },
    #[error("not connected within {0:?}")]
    ConnectTimeout(Duration),
    #[error("connection down")]
    ConnectionDown,
    #[error("closed")]
    Closed,
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("config: {0}")]
    Config(String),
    #[error("websocket: {0}")]
    WebSocket(String),
    #[error("tls: {0}")]
    Tls(String),
    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("shutdown")]
    Shutdown,
}

impl SdkError {
    /// Map onto the wire taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            SdkError::InvalidParameter(_) | SdkError::Codec(_) | SdkError::Config(_) => {
                ErrorCode::InvalidParameter
            }
            SdkError::AllocationFailure(_) => ErrorCode::AllocationFailure,
            SdkError::Timeout { .. } | SdkError::ConnectTimeout(_) => ErrorCode::Timeout,
            SdkError::ConnectionDown
            | SdkError::Closed
            | SdkError::WebSocket(_)
            | SdkError::Tls(_)
            | SdkError::ReconnectExhausted(_)
            | SdkError::Shutdown => ErrorCode::ConnectionDown,
        }
    }
}
