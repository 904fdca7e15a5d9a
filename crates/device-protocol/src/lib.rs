//! Device-access protocol: the JSON envelope exchanged with the edge gateway,
//! the typed device-data records it carries, and the codec between them.
//!
//! Devices are addressed by `(productKey, deviceName)`.  The device side sends
//! `onlineDevice` / `offlineDevice` / `reportProperty` / `reportEvent`
//! requests; the gateway sends `getProperty` / `setProperty` / `callService`
//! method calls.  Every request carries a `messageId`, echoed back in the
//! matching response together with a numeric `code`.

pub mod codec;
pub mod datum;
pub mod envelope;
pub mod error;

pub use codec::{decode, encode, CodecError};
pub use datum::{DataType, DeviceAddress, DeviceDatum, MAX_KEY_LEN, MAX_VALUE_LEN};
pub use envelope::{
    address_from_payload, device_payload, parse_inbound, Envelope, EnvelopeError, Inbound,
    Method, PROTOCOL_VERSION, WS_SUBPROTOCOL,
};
pub use error::ErrorCode;
