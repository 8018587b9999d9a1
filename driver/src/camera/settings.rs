//! Client-settable sensor properties
//!
//! Every handler here copies the request into the device's property, pushes
//! it to the hardware and publishes the outcome. Mode, binning and frame
//! changes only invalidate the applied acquisition; the hardware is
//! reprogrammed by the next exposure setup.

use super::properties::{CONVERSION_GAINS, X_CCD_B_GAIN, X_CCD_FAN_SPEED, X_CCD_G_GAIN, X_CCD_HEATER_POWER, X_CCD_R_GAIN, ADJUSTMENTS};
use super::{CameraDevice, CameraState};
use crate::error::{DriverError, DriverResult};
use crate::mode::{select_for_binning, select_for_bit_depth, BinMode, ModeDescriptor};
use toupcore_bus::names::*;
use toupcore_bus::{Permission, Property, PropertyState};
use toupcore_hw::{option, HardwareHandle, HardwareInterface, HwResult};

const GAIN_UNSUPPORTED: &str = "Analog gain setting is not supported";
const FAN_UNSUPPORTED: &str = "Fan speed setting is not supported";
const HEATER_UNSUPPORTED: &str = "Window heater is not supported";
const CONVERSION_GAIN_UNSUPPORTED: &str = "Requested conversion gain is not supported";

/// Replaces a failed hardware call with a user-facing "not supported"
fn unsupported(error: DriverError, message: &str) -> DriverError {
    match error {
        DriverError::HardwareCallFailed(e) => {
            tracing::warn!("{}: {}", message, e);
            DriverError::UnsupportedFeature(message.to_string())
        }
        other => other,
    }
}

fn rounded(property: &Property, item: &str) -> i32 {
    property.number_value(item).unwrap_or(0.0).round() as i32
}

impl CameraDevice {
    async fn with_hardware<T, F>(&self, call: F) -> DriverResult<T>
    where
        F: FnOnce(&dyn HardwareInterface, HardwareHandle) -> HwResult<T>,
    {
        let guard = self.connection.lock().await;
        let handle = guard.handle()?;
        Ok(call(guard.hardware(), handle)?)
    }

    async fn invalidate_acquisition(&self) {
        self.connection.lock().await.acquisition_mut().invalidate();
    }

    /// Publishes `property` as Ok, or as Alert carrying the error message
    fn settle_property(&self, property: &mut Property, result: DriverResult<()>) -> DriverResult<()> {
        match result {
            Ok(()) => {
                property.state = PropertyState::Ok;
                self.bus.update(property, None);
                Ok(())
            }
            Err(e) => {
                property.state = PropertyState::Alert;
                self.bus.update(property, Some(&e.to_string()));
                Err(e)
            }
        }
    }

    fn reject(&self, property: &mut Property, error: DriverError) -> DriverResult<()> {
        self.settle_property(property, Err(error))
    }

    pub(super) async fn change_mode(&self, state: &mut CameraState, request: &Property) -> DriverResult<()> {
        let props = &mut state.props;
        props.mode.copy_values(request);
        let Some((_, mode)) = self.selected_mode(props) else {
            let requested = request.item_names().collect::<Vec<_>>().join(", ");
            return self.reject(&mut props.mode, DriverError::ConfigurationMismatch(requested));
        };
        self.invalidate_acquisition().await;

        let _ = props.frame.set_number_both(CCD_FRAME_BITS_PER_PIXEL, f64::from(mode.bit_depth));
        props.frame.state = PropertyState::Ok;
        self.bus.update(&props.frame, None);
        let bin = f64::from(mode.bin_factor);
        let _ = props.bin.set_number_both(CCD_BIN_HORIZONTAL, bin);
        let _ = props.bin.set_number_both(CCD_BIN_VERTICAL, bin);
        props.bin.state = PropertyState::Ok;
        self.bus.update(&props.bin, None);
        tracing::debug!("'{}' mode set to {}", self.name, mode.name());
        self.settle_property(&mut props.mode, Ok(()))
    }

    /// Binning is always symmetric: whichever axis the client changed wins
    pub(super) async fn change_bin(&self, state: &mut CameraState, request: &Property) -> DriverResult<()> {
        let props = &mut state.props;
        let previous = props.bin.clone();
        let old_horizontal = props.bin.number_value(CCD_BIN_HORIZONTAL).unwrap_or(1.0);
        props.bin.copy_values(request);
        let horizontal = props.bin.number_value(CCD_BIN_HORIZONTAL).unwrap_or(1.0);
        let vertical = props.bin.number_value(CCD_BIN_VERTICAL).unwrap_or(1.0);
        let bin = if horizontal != old_horizontal { horizontal } else { vertical }.round();
        let _ = props.bin.set_number_both(CCD_BIN_HORIZONTAL, bin);
        let _ = props.bin.set_number_both(CCD_BIN_VERTICAL, bin);

        let current = self.selected_mode(props).map(|(_, mode)| mode);
        let selected = current.and_then(|mode| select_for_binning(&self.modes, &mode, bin as u32));
        let Some(index) = selected else {
            props.bin.copy_values(&previous);
            let wanted = current.map_or_else(|| format!("bin {}", bin), |mode| {
                ModeDescriptor::new(mode.family, mode.bit_depth, bin as u32).name()
            });
            let error = DriverError::ConfigurationMismatch(wanted);
            props.mode.state = PropertyState::Alert;
            self.bus.update(&props.mode, Some(&error.to_string()));
            return self.reject(&mut props.bin, error);
        };

        let _ = props.mode.set_switch(&self.modes[index].name(), true);
        self.invalidate_acquisition().await;
        props.mode.state = PropertyState::Ok;
        self.bus.update(&props.mode, None);
        self.settle_property(&mut props.bin, Ok(()))
    }

    pub(super) async fn change_frame(&self, state: &mut CameraState, request: &Property) -> DriverResult<()> {
        let props = &mut state.props;
        if props.frame.perm == Permission::ReadOnly {
            let error = DriverError::UnsupportedFeature("Hardware ROI is not supported".to_string());
            return self.reject(&mut props.frame, error);
        }
        props.frame.copy_values(request);
        self.invalidate_acquisition().await;

        let depth = props.frame.number_value(CCD_FRAME_BITS_PER_PIXEL).unwrap_or(8.0).round() as u32;
        let current = self.selected_mode(props).map(|(_, mode)| mode);
        let selected = current.and_then(|mode| select_for_bit_depth(&self.modes, &mode, depth));
        match (current, selected) {
            (_, Some(index)) => {
                let _ = props.mode.set_switch(&self.modes[index].name(), true);
                props.mode.state = PropertyState::Ok;
                self.bus.update(&props.mode, None);
                self.settle_property(&mut props.frame, Ok(()))
            }
            (Some(mode), None) => {
                let wanted = ModeDescriptor::new(mode.family, depth, mode.bin_factor).name();
                self.reject(&mut props.frame, DriverError::ConfigurationMismatch(wanted))
            }
            (None, None) => self.reject(&mut props.frame, DriverError::ConfigurationMismatch(format!("{} bits", depth))),
        }
    }

    pub(super) async fn change_gain(&self, state: &mut CameraState, request: &Property) -> DriverResult<()> {
        let gain = &mut state.props.gain;
        gain.copy_values(request);
        let value = gain.number_value(CCD_GAIN_ITEM).unwrap_or(0.0).round() as u16;
        let result = self
            .with_hardware(|hw, handle| sdk!(hw.put_expo_gain(handle, value), "put_ExpoAGain({})", value))
            .await
            .map_err(|e| unsupported(e, GAIN_UNSUPPORTED));
        self.settle_property(gain, result)
    }

    pub(super) async fn change_cooler(&self, state: &mut CameraState, request: &Property) -> DriverResult<()> {
        let cooler = &mut state.props.cooler;
        if cooler.hidden {
            return Err(DriverError::UnsupportedFeature("Cooler is not supported".to_string()));
        }
        cooler.copy_values(request);
        let on = i32::from(cooler.switch_value(CCD_COOLER_ON) == Some(true));
        let result = self
            .with_hardware(|hw, handle| sdk!(hw.put_option(handle, option::TEC, on), "put_Option(OPTION_TEC, {})", on))
            .await;
        self.settle_property(cooler, result)
    }

    /// Sets the cooler target. The property stays Busy until the thermal
    /// poll sees the sensor within the deadband.
    pub(super) async fn change_temperature(&self, state: &mut CameraState, request: &Property) -> DriverResult<()> {
        let current = state.current_temperature;
        let props = &mut state.props;
        if props.temperature.hidden || !props.temperature.is_writable() {
            let error = DriverError::UnsupportedFeature("Setting the sensor temperature is not supported".to_string());
            return self.reject(&mut props.temperature, error);
        }
        props.temperature.copy_values(request);
        let target = props.temperature.number_target(CCD_TEMPERATURE_ITEM).unwrap_or(current);
        let tenths = (target * 10.0).round() as i16;
        let result = self
            .with_hardware(|hw, handle| sdk!(hw.put_temperature(handle, tenths), "put_Temperature({})", tenths))
            .await;
        if let Err(e) = result {
            return self.reject(&mut props.temperature, e);
        }

        if props.is_cooler_off() {
            let result = self
                .with_hardware(|hw, handle| sdk!(hw.put_option(handle, option::TEC, 1), "put_Option(OPTION_TEC, 1)"))
                .await;
            if result.is_ok() {
                let _ = props.cooler.set_switch(CCD_COOLER_ON, true);
            }
            // The target was accepted either way
            let _ = self.settle_property(&mut props.cooler, result);
        }

        let temperature = &mut props.temperature;
        let _ = temperature.set_number(CCD_TEMPERATURE_ITEM, current);
        temperature.state = PropertyState::Busy;
        self.bus.update(temperature, None);
        Ok(())
    }

    pub(super) async fn change_advanced(&self, state: &mut CameraState, request: &Property) -> DriverResult<()> {
        let Some(advanced) = state.props.advanced.as_mut() else {
            return Err(DriverError::UnsupportedFeature("Color adjustments are not supported".to_string()));
        };
        advanced.copy_values(request);
        let adjustments: Vec<_> = ADJUSTMENTS
            .iter()
            .map(|(item, adjustment)| (*adjustment, rounded(advanced, item)))
            .collect();
        let white_balance = [X_CCD_R_GAIN, X_CCD_G_GAIN, X_CCD_B_GAIN].map(|item| rounded(advanced, item));

        let result = self
            .with_hardware(|hw, handle| {
                for (adjustment, value) in &adjustments {
                    sdk!(hw.put_adjustment(handle, *adjustment, *value), "put_{:?}({})", adjustment, value)?;
                }
                sdk!(hw.put_white_balance_gain(handle, white_balance), "put_WhiteBalanceGain({:?})", white_balance)
            })
            .await;
        self.settle_property(advanced, result)
    }

    pub(super) async fn change_fan(&self, state: &mut CameraState, request: &Property) -> DriverResult<()> {
        let Some(fan) = state.props.fan.as_mut() else {
            return Err(DriverError::UnsupportedFeature(FAN_UNSUPPORTED.to_string()));
        };
        fan.copy_values(request);
        let speed = rounded(fan, X_CCD_FAN_SPEED);
        let result = self
            .with_hardware(|hw, handle| sdk!(hw.put_option(handle, option::FAN, speed), "put_Option(OPTION_FAN, {})", speed))
            .await
            .map_err(|e| unsupported(e, FAN_UNSUPPORTED));
        self.settle_property(fan, result)
    }

    pub(super) async fn change_heater(&self, state: &mut CameraState, request: &Property) -> DriverResult<()> {
        let Some(heater) = state.props.heater.as_mut() else {
            return Err(DriverError::UnsupportedFeature(HEATER_UNSUPPORTED.to_string()));
        };
        heater.copy_values(request);
        let power = rounded(heater, X_CCD_HEATER_POWER);
        let result = self
            .with_hardware(|hw, handle| sdk!(hw.put_option(handle, option::HEAT, power), "put_Option(OPTION_HEAT, {})", power))
            .await
            .map_err(|e| unsupported(e, HEATER_UNSUPPORTED));
        self.settle_property(heater, result)
    }

    pub(super) async fn change_conversion_gain(&self, state: &mut CameraState, request: &Property) -> DriverResult<()> {
        let Some(conversion_gain) = state.props.conversion_gain.as_mut() else {
            return Err(DriverError::UnsupportedFeature(CONVERSION_GAIN_UNSUPPORTED.to_string()));
        };
        conversion_gain.copy_values(request);
        let value = conversion_gain
            .selected()
            .and_then(|item| CONVERSION_GAINS.iter().position(|name| *name == item.name))
            .unwrap_or(0) as i32;
        let result = self
            .with_hardware(|hw, handle| sdk!(hw.put_option(handle, option::CG, value), "put_Option(OPTION_CG, {})", value))
            .await
            .map_err(|e| unsupported(e, CONVERSION_GAIN_UNSUPPORTED));
        self.settle_property(conversion_gain, result)
    }

    /// Takes effect when the next exposure reprograms the mode
    pub(super) async fn change_bin_mode(&self, state: &mut CameraState, request: &Property) -> DriverResult<()> {
        let property = &mut state.props.bin_mode;
        property.copy_values(request);
        let bin_mode = property
            .selected()
            .and_then(|item| BinMode::from_item_name(&item.name))
            .unwrap_or_default();
        {
            let mut guard = self.connection.lock().await;
            let acquisition = guard.acquisition_mut();
            acquisition.bin_mode = bin_mode;
            acquisition.applied_mode = None;
        }
        self.settle_property(property, Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::DriverConfig;
    use crate::device::BusDevice;
    use crate::error::DriverError;
    use crate::mode::BIN_FACTORS;
    use crate::testing::{connected_camera, number_request, settle, switch_request};
    use super::super::properties::{X_CCD_ADVANCED, X_CCD_BIN_MODE, X_CCD_CONVERSION_GAIN, X_CCD_FAN, X_CCD_FAN_SPEED, X_CCD_HEATER, X_CCD_HEATER_POWER, X_CCD_R_GAIN};
    use toupcore_bus::names::*;
    use toupcore_bus::PropertyState;
    use toupcore_hw::mock::HwCall;
    use toupcore_hw::{flag, option, HardwareEvent};

    const FLAGS: u64 = flag::RAW8 | flag::RAW12 | flag::ROI_HARDWARE;

    #[tokio::test(start_paused = true)]
    async fn test_mode_change_updates_frame_and_bin() {
        let rig = connected_camera(FLAGS, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.hw.clear_calls();

        rig.camera
            .change_property(&switch_request(&name, CCD_MODE, &[("RAW12_3", true)]))
            .await
            .unwrap();

        let frame = rig.bus.property(&name, CCD_FRAME).unwrap();
        assert_eq!(frame.number_value(CCD_FRAME_BITS_PER_PIXEL), Some(12.0));
        let bin = rig.bus.property(&name, CCD_BIN).unwrap();
        assert_eq!(bin.number_value(CCD_BIN_HORIZONTAL), Some(3.0));
        assert_eq!(bin.number_value(CCD_BIN_VERTICAL), Some(3.0));
        assert_eq!(rig.bus.property(&name, CCD_MODE).unwrap().state, PropertyState::Ok);
        // Nothing reaches the hardware until the next exposure
        assert!(rig.hw.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deselecting_every_mode_is_rejected() {
        let rig = connected_camera(FLAGS, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();

        let err = rig
            .camera
            .change_property(&switch_request(&name, CCD_MODE, &[("RAW08_1", false)]))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::ConfigurationMismatch(_)));
        assert_eq!(rig.bus.property(&name, CCD_MODE).unwrap().state, PropertyState::Alert);

        // With no mode selected there is nothing to rebin either
        let err = rig
            .camera
            .change_property(&number_request(&name, CCD_BIN, &[(CCD_BIN_HORIZONTAL, 2.0)]))
            .await
            .unwrap_err();
        assert_eq!(err, DriverError::ConfigurationMismatch("bin 2".to_string()));
        let bin = rig.bus.property(&name, CCD_BIN).unwrap();
        assert_eq!(bin.state, PropertyState::Alert);
        assert_eq!(bin.number_value(CCD_BIN_HORIZONTAL), Some(1.0));
        assert_eq!(bin.number_value(CCD_BIN_VERTICAL), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_binning_is_symmetric() {
        let rig = connected_camera(FLAGS, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();

        rig.camera
            .change_property(&number_request(&name, CCD_BIN, &[(CCD_BIN_HORIZONTAL, 2.0), (CCD_BIN_VERTICAL, 1.0)]))
            .await
            .unwrap();
        let bin = rig.bus.property(&name, CCD_BIN).unwrap();
        assert_eq!(bin.number_value(CCD_BIN_HORIZONTAL), Some(2.0));
        assert_eq!(bin.number_value(CCD_BIN_VERTICAL), Some(2.0));
        let mode = rig.bus.property(&name, CCD_MODE).unwrap();
        assert_eq!(mode.selected().map(|i| i.name.as_str()), Some("RAW08_2"));

        // Only the vertical axis changed, so it wins
        rig.camera
            .change_property(&number_request(&name, CCD_BIN, &[(CCD_BIN_HORIZONTAL, 2.0), (CCD_BIN_VERTICAL, 4.0)]))
            .await
            .unwrap();
        let bin = rig.bus.property(&name, CCD_BIN).unwrap();
        assert_eq!(bin.number_value(CCD_BIN_HORIZONTAL), Some(4.0));
        let mode = rig.bus.property(&name, CCD_MODE).unwrap();
        assert_eq!(mode.selected().map(|i| i.name.as_str()), Some("RAW08_4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_binning_is_symmetric_for_every_factor() {
        let rig = connected_camera(FLAGS, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();

        for factor in BIN_FACTORS {
            for (changed, other) in [(CCD_BIN_HORIZONTAL, CCD_BIN_VERTICAL), (CCD_BIN_VERTICAL, CCD_BIN_HORIZONTAL)] {
                let unchanged = rig.bus.property(&name, CCD_BIN).unwrap().number_value(other).unwrap();
                let v = f64::from(factor);
                rig.camera
                    .change_property(&number_request(&name, CCD_BIN, &[(changed, v), (other, unchanged)]))
                    .await
                    .unwrap();

                let bin = rig.bus.property(&name, CCD_BIN).unwrap();
                assert_eq!(bin.number_value(CCD_BIN_HORIZONTAL), Some(v), "{} = {}", changed, factor);
                assert_eq!(bin.number_value(CCD_BIN_VERTICAL), Some(v), "{} = {}", changed, factor);
                assert_eq!(bin.state, PropertyState::Ok);
                let mode = rig.bus.property(&name, CCD_MODE).unwrap();
                let expected = format!("RAW08_{}", factor);
                assert_eq!(mode.selected().map(|i| i.name.as_str()), Some(expected.as_str()));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_binning_without_matching_mode_restores_both_axes() {
        // A mono model without RAW depths enumerates no modes at all
        let rig = connected_camera(flag::MONO, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        assert!(rig.camera.modes().is_empty());

        for factor in BIN_FACTORS.skip(1) {
            for (changed, other) in [(CCD_BIN_HORIZONTAL, CCD_BIN_VERTICAL), (CCD_BIN_VERTICAL, CCD_BIN_HORIZONTAL)] {
                let err = rig
                    .camera
                    .change_property(&number_request(&name, CCD_BIN, &[(changed, f64::from(factor)), (other, 1.0)]))
                    .await
                    .unwrap_err();
                assert_eq!(err, DriverError::ConfigurationMismatch(format!("bin {}", factor)));

                let bin = rig.bus.property(&name, CCD_BIN).unwrap();
                assert_eq!(bin.state, PropertyState::Alert);
                assert_eq!(bin.number_value(CCD_BIN_HORIZONTAL), Some(1.0));
                assert_eq!(bin.number_value(CCD_BIN_VERTICAL), Some(1.0));
                assert_eq!(rig.bus.property(&name, CCD_MODE).unwrap().state, PropertyState::Alert);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bit_depth_selects_mode() {
        let rig = connected_camera(FLAGS, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();

        rig.camera
            .change_property(&number_request(&name, CCD_FRAME, &[(CCD_FRAME_BITS_PER_PIXEL, 12.0)]))
            .await
            .unwrap();
        let mode = rig.bus.property(&name, CCD_MODE).unwrap();
        assert_eq!(mode.selected().map(|i| i.name.as_str()), Some("RAW12_1"));

        // 10 bits is within the frame range but the model has no such mode
        let err = rig
            .camera
            .change_property(&number_request(&name, CCD_FRAME, &[(CCD_FRAME_BITS_PER_PIXEL, 10.0)]))
            .await
            .unwrap_err();
        assert_eq!(err, DriverError::ConfigurationMismatch("RAW10_1".to_string()));
        assert_eq!(rig.bus.property(&name, CCD_FRAME).unwrap().state, PropertyState::Alert);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_is_read_only_without_hardware_roi() {
        let rig = connected_camera(flag::RAW8, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();

        let err = rig
            .camera
            .change_property(&number_request(&name, CCD_FRAME, &[(CCD_FRAME_WIDTH, 320.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedFeature(_)));
        let frame = rig.bus.property(&name, CCD_FRAME).unwrap();
        assert_eq!(frame.state, PropertyState::Alert);
        assert_eq!(frame.number_value(CCD_FRAME_WIDTH), Some(1280.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bin_mode_reprograms_on_next_exposure() {
        let rig = connected_camera(FLAGS, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera.request_exposure(0.01).await.unwrap();
        rig.hw.fire("tp-1", HardwareEvent::Image);
        settle().await;

        rig.camera
            .change_property(&number_request(&name, CCD_BIN, &[(CCD_BIN_HORIZONTAL, 2.0)]))
            .await
            .unwrap();
        rig.camera
            .change_property(&switch_request(&name, X_CCD_BIN_MODE, &[("AVERAGE", true)]))
            .await
            .unwrap();
        rig.hw.clear_calls();
        rig.camera.request_exposure(0.01).await.unwrap();

        let average = rig.hw.option("tp-1", option::BINNING).unwrap();
        assert_eq!(average & 0x0f, 2);
        assert_ne!(average & !0x0f, 0);
        assert_eq!(rig.hw.count_calls(|c| *c == HwCall::Stop), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gain() {
        let rig = connected_camera(FLAGS, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();

        rig.camera
            .change_property(&number_request(&name, CCD_GAIN, &[(CCD_GAIN_ITEM, 250.4)]))
            .await
            .unwrap();
        assert!(rig.hw.calls().contains(&HwCall::PutExpoGain(250)));

        rig.hw.fail("put_expo_gain");
        let err = rig
            .camera
            .change_property(&number_request(&name, CCD_GAIN, &[(CCD_GAIN_ITEM, 300.0)]))
            .await
            .unwrap_err();
        assert_eq!(err, DriverError::UnsupportedFeature("Analog gain setting is not supported".to_string()));
        assert_eq!(rig.bus.property(&name, CCD_GAIN).unwrap().state, PropertyState::Alert);
        assert_eq!(
            rig.bus.last_message(&name, CCD_GAIN).as_deref(),
            Some("Analog gain setting is not supported")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_temperature_target_turns_cooler_on() {
        let rig = connected_camera(FLAGS | flag::GETTEMPERATURE | flag::TEC_ONOFF, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();

        rig.camera
            .change_property(&number_request(&name, CCD_TEMPERATURE, &[(CCD_TEMPERATURE_ITEM, -15.04)]))
            .await
            .unwrap();

        assert!(rig.hw.calls().contains(&HwCall::PutTemperature(-150)));
        assert_eq!(rig.hw.option("tp-1", option::TEC), Some(1));
        let cooler = rig.bus.property(&name, CCD_COOLER).unwrap();
        assert_eq!(cooler.switch_value(CCD_COOLER_ON), Some(true));
        let temperature = rig.bus.property(&name, CCD_TEMPERATURE).unwrap();
        assert_eq!(temperature.state, PropertyState::Busy);
        assert_eq!(temperature.number_target(CCD_TEMPERATURE_ITEM), Some(-15.04));
        // Value holds the last reading until the next poll
        assert_eq!(temperature.number_value(CCD_TEMPERATURE_ITEM), Some(-10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_temperature_without_cooler_is_rejected() {
        let rig = connected_camera(FLAGS | flag::GETTEMPERATURE, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();

        let err = rig
            .camera
            .change_property(&number_request(&name, CCD_TEMPERATURE, &[(CCD_TEMPERATURE_ITEM, 0.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedFeature(_)));
        assert_eq!(rig.bus.property(&name, CCD_TEMPERATURE).unwrap().state, PropertyState::Alert);
        assert_eq!(rig.hw.count_calls(|c| matches!(c, HwCall::PutTemperature(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooler_switch() {
        let rig = connected_camera(FLAGS | flag::GETTEMPERATURE | flag::TEC_ONOFF, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();

        rig.camera
            .change_property(&switch_request(&name, CCD_COOLER, &[(CCD_COOLER_ON, true)]))
            .await
            .unwrap();
        assert!(rig.hw.calls().contains(&HwCall::PutOption(option::TEC, 1)));

        rig.hw.fail("put_option");
        let err = rig
            .camera
            .change_property(&switch_request(&name, CCD_COOLER, &[(CCD_COOLER_OFF, true)]))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::HardwareCallFailed(_)));
        assert_eq!(rig.bus.property(&name, CCD_COOLER).unwrap().state, PropertyState::Alert);
    }

    #[tokio::test(start_paused = true)]
    async fn test_advanced_pushes_every_adjustment() {
        let rig = connected_camera(FLAGS, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.hw.clear_calls();

        rig.camera
            .change_property(&number_request(&name, X_CCD_ADVANCED, &[(X_CCD_R_GAIN, 20.0)]))
            .await
            .unwrap();

        let calls = rig.hw.calls();
        assert_eq!(calls.iter().filter(|c| matches!(c, HwCall::PutAdjustment(..))).count(), 5);
        assert_eq!(calls.last(), Some(&HwCall::PutWhiteBalanceGain([20, 0, 0])));
        assert_eq!(rig.bus.property(&name, X_CCD_ADVANCED).unwrap().state, PropertyState::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optional_controls() {
        let rig = connected_camera(FLAGS | flag::FAN | flag::HEAT | flag::CGHDR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();

        rig.camera
            .change_property(&number_request(&name, X_CCD_HEATER, &[(X_CCD_HEATER_POWER, 2.0)]))
            .await
            .unwrap();
        assert_eq!(rig.hw.option("tp-1", option::HEAT), Some(2));

        rig.camera
            .change_property(&switch_request(&name, X_CCD_CONVERSION_GAIN, &[("HDR", true)]))
            .await
            .unwrap();
        assert_eq!(rig.hw.option("tp-1", option::CG), Some(2));

        rig.hw.fail("put_option");
        let err = rig
            .camera
            .change_property(&number_request(&name, X_CCD_FAN, &[(X_CCD_FAN_SPEED, 1.0)]))
            .await
            .unwrap_err();
        assert_eq!(err, DriverError::UnsupportedFeature("Fan speed setting is not supported".to_string()));
        assert_eq!(rig.bus.property(&name, X_CCD_FAN).unwrap().state, PropertyState::Alert);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_controls_are_unsupported() {
        let rig = connected_camera(FLAGS | flag::MONO, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();

        for request in [
            number_request(&name, X_CCD_ADVANCED, &[(X_CCD_R_GAIN, 1.0)]),
            number_request(&name, X_CCD_FAN, &[(X_CCD_FAN_SPEED, 1.0)]),
            number_request(&name, X_CCD_HEATER, &[(X_CCD_HEATER_POWER, 1.0)]),
            switch_request(&name, X_CCD_CONVERSION_GAIN, &[("HCG", true)]),
            switch_request(&name, CCD_COOLER, &[(CCD_COOLER_ON, true)]),
        ] {
            let err = rig.camera.change_property(&request).await.unwrap_err();
            assert!(matches!(err, DriverError::UnsupportedFeature(_)), "{}: {:?}", request.name, err);
        }
    }
}
