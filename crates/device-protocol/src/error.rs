//! Numeric result codes carried in the `code` field of response envelopes.

use std::fmt;

/// Result codes understood by both sides of the link.
///
/// The numeric values are the wire values.  Codes received from the gateway
/// that are not in this table classify as [`ErrorCode::Unknown`] via
/// [`ErrorCode::from_code`]; callers that care keep the raw integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success,
    Unknown,
    InvalidParameter,
    AllocationFailure,
    Timeout,
    RangeOverflow,
    PropertyNotExist,
    ServiceNotExist,
    ConnectionDown,
}

impl ErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::Unknown => 100_000,
            ErrorCode::InvalidParameter => 100_001,
            ErrorCode::AllocationFailure => 100_002,
            ErrorCode::Timeout => 100_006,
            ErrorCode::RangeOverflow => 100_007,
            ErrorCode::PropertyNotExist => 109_002,
            ErrorCode::ServiceNotExist => 109_005,
            ErrorCode::ConnectionDown => 109_009,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ErrorCode::Success,
            100_001 => ErrorCode::InvalidParameter,
            100_002 => ErrorCode::AllocationFailure,
            100_006 => ErrorCode::Timeout,
            100_007 => ErrorCode::RangeOverflow,
            109_002 => ErrorCode::PropertyNotExist,
            109_005 => ErrorCode::ServiceNotExist,
            109_009 => ErrorCode::ConnectionDown,
            _ => ErrorCode::Unknown,
        }
    }

    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Success => "success",
            ErrorCode::Unknown => "unknown",
            ErrorCode::InvalidParameter => "invalid_parameter",
            ErrorCode::AllocationFailure => "allocation_failure",
            ErrorCode::Timeout => "timeout",
            ErrorCode::RangeOverflow => "range_overflow",
            ErrorCode::PropertyNotExist => "property_not_exist",
            ErrorCode::ServiceNotExist => "service_not_exist",
            ErrorCode::ConnectionDown => "connection_down",
        };
        write!(f, "{name}({})", self.code())
    }
}
