//! Device data records: the typed key/value triples carried by properties,
//! events and service parameters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum length (bytes) of a property / event / parameter name.
pub const MAX_KEY_LEN: usize = 64;

/// Maximum length (bytes) of a string-encoded value.
pub const MAX_VALUE_LEN: usize = 2048;

/// Declared type of a [`DeviceDatum`], as named in the device model.
///
/// `Invalid` is the sentinel for "no type"; key-only GET requests decode to
/// it, and unknown types encode as `"invalid"` instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int,
    Bool,
    Float,
    Text,
    Date,
    Enum,
    Struct,
    Array,
    Double,
    #[default]
    Invalid,
}

impl DataType {
    /// All nine real types, in wire-table order.
    pub const ALL: [DataType; 9] = [
        DataType::Int,
        DataType::Bool,
        DataType::Float,
        DataType::Text,
        DataType::Date,
        DataType::Enum,
        DataType::Struct,
        DataType::Array,
        DataType::Double,
    ];

    /// Wire name of the type (`"int"`, `"struct"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Int => "int",
            DataType::Bool => "bool",
            DataType::Float => "float",
            DataType::Text => "text",
            DataType::Date => "date",
            DataType::Enum => "enum",
            DataType::Struct => "struct",
            DataType::Array => "array",
            DataType::Double => "double",
            DataType::Invalid => "invalid",
        }
    }

    /// Parse a wire type name. Returns `None` for anything outside the nine
    /// real types (including `"invalid"` itself).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Struct and Array values are embedded JSON documents.
    pub fn is_structured(self) -> bool {
        matches!(self, DataType::Struct | DataType::Array)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One property, event parameter or service parameter.
///
/// `value` is always text; the codec re-expresses it as a typed JSON value on
/// the way out and flattens it back to text on the way in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceDatum {
    pub key: String,
    pub data_type: DataType,
    pub value: String,
}

impl DeviceDatum {
    pub fn new(key: impl Into<String>, data_type: DataType, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            data_type,
            value: value.into(),
        }
    }

    /// A key with no type and no value (what a GET request names).
    pub fn key_only(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            data_type: DataType::Invalid,
            value: String::new(),
        }
    }

    pub fn int(key: impl Into<String>, v: i64) -> Self {
        Self::new(key, DataType::Int, v.to_string())
    }

    pub fn bool(key: impl Into<String>, v: bool) -> Self {
        Self::new(key, DataType::Bool, if v { "1" } else { "0" })
    }

    pub fn double(key: impl Into<String>, v: f64) -> Self {
        Self::new(key, DataType::Double, v.to_string())
    }

    pub fn text(key: impl Into<String>, v: impl Into<String>) -> Self {
        Self::new(key, DataType::Text, v)
    }

    /// Empty key marks an unused slot in a service output buffer.
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// Check the name/value limits. Used before anything goes on the wire.
    pub fn check_limits(&self) -> Result<(), String> {
        if self.key.is_empty() {
            return Err("datum key is empty".into());
        }
        if self.key.len() > MAX_KEY_LEN {
            return Err(format!(
                "datum key '{}' exceeds {MAX_KEY_LEN} bytes",
                self.key
            ));
        }
        if self.value.len() > MAX_VALUE_LEN {
            return Err(format!(
                "value of '{}' is {} bytes (max {MAX_VALUE_LEN})",
                self.key,
                self.value.len()
            ));
        }
        Ok(())
    }
}

/// Identifies a device on the gateway: `(productKey, deviceName)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub product_key: String,
    pub device_name: String,
}

impl DeviceAddress {
    pub fn new(product_key: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            product_key: product_key.into(),
            device_name: device_name.into(),
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.product_key, self.device_name)
    }
}
