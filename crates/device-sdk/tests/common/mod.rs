//! Shared fixtures: a lamp device and an in-memory "wire" sink.

#![allow(dead_code)]

use std::time::Duration;

use leda_sdk::{DataType, DeviceAddress, DeviceDatum, DeviceError, DeviceHandler, FrameSink, SdkError};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

/// LED lamp: `power` (bool), `brightness` (0..=100), service `blink`.
pub struct Lamp {
    pub power: Mutex<bool>,
    pub brightness: Mutex<i64>,
}

impl Default for Lamp {
    fn default() -> Self {
        Self {
            power: Mutex::new(false),
            brightness: Mutex::new(50),
        }
    }
}

#[async_trait::async_trait]
impl DeviceHandler for Lamp {
    async fn get_properties(
        &self,
        _device: &DeviceAddress,
        keys: &[String],
    ) -> Result<Vec<DeviceDatum>, DeviceError> {
        keys.iter()
            .map(|key| match key.as_str() {
                "power" => Ok(DeviceDatum::bool("power", *self.power.lock())),
                "brightness" => Ok(DeviceDatum::int("brightness", *self.brightness.lock())),
                other => Err(DeviceError::property_not_exist(other)),
            })
            .collect()
    }

    async fn set_property(
        &self,
        _device: &DeviceAddress,
        datum: &DeviceDatum,
    ) -> Result<(), DeviceError> {
        match datum.key.as_str() {
            "power" => {
                *self.power.lock() = datum.value == "1";
                Ok(())
            }
            "brightness" => {
                let level: i64 = datum
                    .value
                    .parse()
                    .map_err(|_| DeviceError::invalid_parameter("brightness is not an integer"))?;
                if !(0..=100).contains(&level) {
                    return Err(DeviceError::range_overflow(format!(
                        "brightness {level} outside 0..=100"
                    )));
                }
                *self.brightness.lock() = level;
                Ok(())
            }
            other => Err(DeviceError::property_not_exist(other)),
        }
    }

    async fn call_service(
        &self,
        _device: &DeviceAddress,
        service: &str,
        inputs: &[DeviceDatum],
        outputs: &mut [DeviceDatum],
    ) -> Result<(), DeviceError> {
        if service != "blink" {
            return Err(DeviceError::service_not_exist(service));
        }
        let times = inputs
            .iter()
            .find(|d| d.key == "times")
            .and_then(|d| d.value.parse::<i64>().ok())
            .unwrap_or(1);
        outputs[0] = DeviceDatum::new("blinked", DataType::Int, times.to_string());
        Ok(())
    }
}

/// Sink that hands every outbound frame, parsed, to the test.
pub struct Wire(pub mpsc::UnboundedSender<Value>);

impl FrameSink for Wire {
    fn send_frame(&self, frame: String) -> Result<(), SdkError> {
        let value = serde_json::from_str(&frame)
            .map_err(|e| SdkError::InvalidParameter(e.to_string()))?;
        self.0.send(value).map_err(|_| SdkError::ConnectionDown)
    }
}

pub fn lamp_address() -> DeviceAddress {
    DeviceAddress::new("PK1", "DN1")
}

/// Next outbound frame, or panic after five seconds.
pub async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timeout waiting for outbound frame")
        .expect("wire closed")
}
