//! A fleet of simulated LED lamps.

use std::collections::HashMap;

use leda_sdk::{DeviceAddress, DeviceDatum, DeviceError, DeviceHandler};
use parking_lot::Mutex;

pub const MAX_BRIGHTNESS: i64 = 100;

#[derive(Debug, Clone, Default)]
struct LampState {
    power: bool,
    brightness: i64,
    online: bool,
}

pub struct LampFleet {
    lamps: Mutex<HashMap<DeviceAddress, LampState>>,
    order: Vec<DeviceAddress>,
}

impl LampFleet {
    pub fn new(addresses: Vec<DeviceAddress>) -> Self {
        let lamps = addresses
            .iter()
            .map(|a| (a.clone(), LampState::default()))
            .collect();
        Self {
            lamps: Mutex::new(lamps),
            order: addresses,
        }
    }

    pub fn addresses(&self) -> &[DeviceAddress] {
        &self.order
    }

    pub fn set_online(&self, device: &DeviceAddress, online: bool) {
        if let Some(lamp) = self.lamps.lock().get_mut(device) {
            lamp.online = online;
        }
    }

    pub fn mark_all_offline(&self) {
        for lamp in self.lamps.lock().values_mut() {
            lamp.online = false;
        }
    }

    pub fn online(&self) -> Vec<DeviceAddress> {
        let lamps = self.lamps.lock();
        self.order
            .iter()
            .filter(|a| lamps.get(*a).is_some_and(|l| l.online))
            .cloned()
            .collect()
    }

    /// Current `brightness` and `power` as report data.
    pub fn snapshot(&self, device: &DeviceAddress) -> Option<Vec<DeviceDatum>> {
        let lamps = self.lamps.lock();
        let lamp = lamps.get(device)?;
        Some(vec![
            DeviceDatum::int("brightness", lamp.brightness),
            DeviceDatum::bool("power", lamp.power),
        ])
    }

    /// A lamp that is switched on but emits no light counts as broken.
    pub fn is_broken(&self, device: &DeviceAddress) -> bool {
        self.lamps
            .lock()
            .get(device)
            .is_some_and(|l| l.power && l.brightness == 0)
    }

    fn with_lamp<T>(
        &self,
        device: &DeviceAddress,
        f: impl FnOnce(&mut LampState) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut lamps = self.lamps.lock();
        let lamp = lamps
            .get_mut(device)
            .ok_or_else(|| DeviceError::invalid_parameter(format!("unknown device {device}")))?;
        f(lamp)
    }
}

fn parse_level(datum: &DeviceDatum) -> Result<i64, DeviceError> {
    datum
        .value
        .parse()
        .map_err(|_| DeviceError::invalid_parameter(format!("'{}' is not an integer", datum.value)))
}

#[async_trait::async_trait]
impl DeviceHandler for LampFleet {
    async fn get_properties(
        &self,
        device: &DeviceAddress,
        keys: &[String],
    ) -> Result<Vec<DeviceDatum>, DeviceError> {
        self.with_lamp(device, |lamp| {
            keys.iter()
                .map(|key| match key.as_str() {
                    "power" => Ok(DeviceDatum::bool("power", lamp.power)),
                    "brightness" => Ok(DeviceDatum::int("brightness", lamp.brightness)),
                    other => Err(DeviceError::property_not_exist(other)),
                })
                .collect()
        })
    }

    async fn set_property(
        &self,
        device: &DeviceAddress,
        datum: &DeviceDatum,
    ) -> Result<(), DeviceError> {
        self.with_lamp(device, |lamp| match datum.key.as_str() {
            "power" => {
                lamp.power = match parse_level(datum)? {
                    0 => false,
                    1 => true,
                    v => {
                        return Err(DeviceError::range_overflow(format!(
                            "power must be 0 or 1, got {v}"
                        )))
                    }
                };
                Ok(())
            }
            "brightness" => {
                let level = parse_level(datum)?;
                if !(0..=MAX_BRIGHTNESS).contains(&level) {
                    return Err(DeviceError::range_overflow(format!(
                        "brightness must be 0..={MAX_BRIGHTNESS}, got {level}"
                    )));
                }
                lamp.brightness = level;
                Ok(())
            }
            other => Err(DeviceError::property_not_exist(other)),
        })?;
        tracing::info!(device = %device, key = %datum.key, value = %datum.value, "property set");
        Ok(())
    }

    async fn call_service(
        &self,
        device: &DeviceAddress,
        service: &str,
        inputs: &[DeviceDatum],
        _outputs: &mut [DeviceDatum],
    ) -> Result<(), DeviceError> {
        if service != "blink" {
            return Err(DeviceError::service_not_exist(service));
        }
        self.with_lamp(device, |_| Ok(()))?;
        tracing::info!(device = %device, inputs = inputs.len(), "blinking");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leda_sdk::ErrorCode;

    fn fleet() -> (LampFleet, DeviceAddress) {
        let a = DeviceAddress::new("PK", "ledDev001");
        (LampFleet::new(vec![a.clone()]), a)
    }

    #[tokio::test]
    async fn brightness_range_is_enforced() {
        let (fleet, a) = fleet();
        fleet
            .set_property(&a, &DeviceDatum::int("brightness", 80))
            .await
            .unwrap();
        let err = fleet
            .set_property(&a, &DeviceDatum::int("brightness", 101))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RangeOverflow);

        let values = fleet.get_properties(&a, &["brightness".into()]).await.unwrap();
        assert_eq!(values[0].value, "80");
    }

    #[tokio::test]
    async fn power_accepts_only_zero_or_one() {
        let (fleet, a) = fleet();
        fleet.set_property(&a, &DeviceDatum::bool("power", true)).await.unwrap();
        assert!(fleet.is_broken(&a));
        let err = fleet
            .set_property(&a, &DeviceDatum::int("power", 2))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RangeOverflow);
    }

    #[tokio::test]
    async fn unknown_targets() {
        let (fleet, a) = fleet();
        let err = fleet.get_properties(&a, &["colour".into()]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PropertyNotExist);
        let mut out = [];
        let err = fleet.call_service(&a, "dance", &[], &mut out).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ServiceNotExist);
        let stranger = DeviceAddress::new("PK", "nobody");
        assert!(fleet.get_properties(&stranger, &[]).await.is_err());
    }

    #[test]
    fn online_tracking() {
        let (fleet, a) = fleet();
        assert!(fleet.online().is_empty());
        fleet.set_online(&a, true);
        assert_eq!(fleet.online(), vec![a.clone()]);
        fleet.mark_all_offline();
        assert!(fleet.online().is_empty());
    }
}
