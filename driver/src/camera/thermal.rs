//! Sensor temperature and cooler power telemetry

use super::CameraDevice;
use toupcore_bus::names::*;
use toupcore_bus::{PropertyState, Timer};
use toupcore_hw::option;

impl CameraDevice {
    pub(super) fn start_thermal_timer(&self) -> Timer {
        let weak = self.weak.clone();
        Timer::repeating(self.config.temperature_poll_interval(), move || {
            let weak = weak.clone();
            async move {
                if let Some(camera) = weak.upgrade() {
                    camera.poll_thermal().await;
                }
            }
        })
    }

    /// Reads the sensor temperature and cooler power once and publishes them
    pub async fn poll_thermal(&self) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if !state.connected {
            return;
        }
        let props = &mut state.props;
        let cooler_on = props.cooler.switch_value(CCD_COOLER_ON) == Some(true);

        let (temperature, power) = {
            let hardware = self.connection.lock().await;
            let Ok(handle) = hardware.handle() else {
                return;
            };
            let hw = hardware.hardware();
            let temperature = sdk!(hw.get_temperature(handle), "get_Temperature()");
            let power = (!props.cooler_power.hidden).then(|| {
                // The SDK keeps reporting the last voltage after the cooler
                // is switched off
                let current = if cooler_on {
                    sdk!(hw.get_option(handle, option::TEC_VOLTAGE), "get_Option(OPTION_TEC_VOLTAGE)").unwrap_or(0)
                } else {
                    0
                };
                let max = sdk!(hw.get_option(handle, option::TEC_VOLTAGE_MAX), "get_Option(OPTION_TEC_VOLTAGE_MAX)");
                (current, max)
            });
            (temperature, power)
        };

        if let Ok(tenths) = temperature {
            let value = f64::from(tenths) / 10.0;
            state.current_temperature = value;
            let cooler_off = props.is_cooler_off();
            let property = &mut props.temperature;
            let _ = property.set_number(CCD_TEMPERATURE_ITEM, value);
            let target = property.number_target(CCD_TEMPERATURE_ITEM).unwrap_or(value);
            let settling = cooler_off || (value - target).abs() > self.config.temperature_deadband;
            property.state = if property.is_writable() && settling {
                PropertyState::Busy
            } else {
                PropertyState::Ok
            };
            self.bus.update(property, None);
        }

        if let Some((current, max)) = power {
            let property = &mut props.cooler_power;
            let percent = match max {
                Ok(max) if max > 0 => {
                    property.state = PropertyState::Ok;
                    (f64::from(current) / f64::from(max) * 100.0).round()
                }
                _ => {
                    property.state = PropertyState::Alert;
                    0.0
                }
            };
            let _ = property.set_number(CCD_COOLER_POWER_ITEM, percent);
            self.bus.update(property, None);
        }
    }
}
