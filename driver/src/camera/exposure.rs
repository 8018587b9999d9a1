//! Exposure, streaming and abort
//!
//! Requests arm the hardware and return with the property `Busy`. Frames
//! arrive later as `HardwareEvent::Image` on the event worker, which pulls
//! them, hands them to the bus and schedules the transition to `Ok` on the
//! timer service.

use super::{CameraDevice, CameraState};
use crate::connection::HardwareGuard;
use crate::error::{DriverError, DriverResult};
use crate::mode::{fit_roi, PixelFamily};
use std::sync::atomic::Ordering;
use toupcore_bus::names::*;
use toupcore_bus::{defer, ImageFrame, Property, PropertyKind, PropertyState};
use toupcore_hw::{bytes_per_pixel, flag, option, BayerPattern, HardwareEvent, Roi, TRIGGER_CONTINUOUS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Exposure,
    Streaming,
}

impl CameraDevice {
    /// Starts a single exposure of `duration` seconds.
    ///
    /// Returns the state of `CCD_EXPOSURE` afterwards. A request made while
    /// an exposure is already running is ignored and reports `Busy`.
    pub async fn request_exposure(&self, duration: f64) -> DriverResult<PropertyState> {
        let request = Property::request(&self.name, CCD_EXPOSURE, PropertyKind::Number)
            .with_number(CCD_EXPOSURE_ITEM, "", 0.0, 0.0, 0.0, duration);
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(DriverError::NotConnected);
        }
        match self.begin_exposure(&mut state, &request).await {
            Err(DriverError::Busy(_)) => Ok(PropertyState::Busy),
            other => other,
        }
    }

    /// Starts streaming `count` frames of `duration` seconds each, or
    /// frames until aborted if `count` is negative
    pub async fn request_streaming(&self, duration: f64, count: i32) -> DriverResult<PropertyState> {
        let request = Property::request(&self.name, CCD_STREAMING, PropertyKind::Number)
            .with_number(CCD_STREAMING_EXPOSURE, "", 0.0, 0.0, 0.0, duration)
            .with_number(CCD_STREAMING_COUNT, "", 0.0, 0.0, 0.0, f64::from(count));
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(DriverError::NotConnected);
        }
        match self.begin_streaming(&mut state, &request).await {
            Err(DriverError::Busy(_)) => Ok(PropertyState::Busy),
            other => other,
        }
    }

    /// Cancels the pending trigger. Frames already on their way are
    /// dropped by the event worker.
    pub async fn abort(&self) -> DriverResult<()> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(DriverError::NotConnected);
        }
        self.abort_locked(&mut state).await
    }

    pub(super) async fn begin_exposure(&self, state: &mut CameraState, request: &Property) -> DriverResult<PropertyState> {
        let exposure = &mut state.props.exposure;
        if exposure.state == PropertyState::Busy {
            return Err(DriverError::Busy(CCD_EXPOSURE.to_string()));
        }
        exposure.copy_values(request);
        let duration = exposure.number_value(CCD_EXPOSURE_ITEM).unwrap_or(0.0);
        exposure.state = PropertyState::Busy;
        self.bus.update(exposure, None);

        if let Err(e) = self.arm(state, duration, 1).await {
            let exposure = &mut state.props.exposure;
            exposure.state = PropertyState::Alert;
            self.bus.update(exposure, Some(&e.to_string()));
            return Err(e);
        }
        Ok(PropertyState::Busy)
    }

    pub(super) async fn begin_streaming(&self, state: &mut CameraState, request: &Property) -> DriverResult<PropertyState> {
        let streaming = &mut state.props.streaming;
        if streaming.hidden {
            return Err(DriverError::UnsupportedFeature("Streaming is not supported".to_string()));
        }
        if streaming.state == PropertyState::Busy {
            return Err(DriverError::Busy(CCD_STREAMING.to_string()));
        }
        streaming.copy_values(request);
        let duration = streaming.number_value(CCD_STREAMING_EXPOSURE).unwrap_or(0.0);
        let count = streaming.number_value(CCD_STREAMING_COUNT).unwrap_or(-1.0) as i32;
        streaming.state = PropertyState::Busy;
        self.bus.update(streaming, None);

        if count == 0 {
            streaming.state = PropertyState::Ok;
            self.bus.update(streaming, None);
            return Ok(PropertyState::Ok);
        }
        let frames = if count < 0 {
            TRIGGER_CONTINUOUS
        } else {
            count.min(i32::from(TRIGGER_CONTINUOUS - 1)) as u16
        };

        if let Err(e) = self.arm(state, duration, frames).await {
            let streaming = &mut state.props.streaming;
            streaming.state = PropertyState::Alert;
            self.bus.update(streaming, Some(&e.to_string()));
            return Err(e);
        }
        Ok(PropertyState::Busy)
    }

    /// Applies the selected mode and frame, sets the exposure time and
    /// triggers `frames` exposures
    async fn arm(&self, state: &CameraState, duration: f64, frames: u16) -> DriverResult<()> {
        let mut guard = self.connection.lock().await;
        let handle = guard.handle()?;
        self.setup_exposure(&mut guard, state)?;
        let hw = guard.hardware();
        let micros = (duration * 1e6).round() as u32;
        sdk!(hw.put_expo_time(handle, micros), "put_ExpoTime({})", micros)?;
        self.aborting.store(false, Ordering::SeqCst);
        self.arm_generation.fetch_add(1, Ordering::SeqCst);
        sdk!(hw.trigger(handle, frames), "Trigger({})", frames)?;
        Ok(())
    }

    /// Reprograms readout mode and ROI where they differ from what the
    /// hardware was last given
    fn setup_exposure(&self, guard: &mut HardwareGuard<'_>, state: &CameraState) -> DriverResult<()> {
        let props = &state.props;
        let (index, mode) = self
            .selected_mode(props)
            .ok_or_else(|| DriverError::ConfigurationMismatch("the selected mode".to_string()))?;
        let handle = guard.handle()?;
        let hw = guard.hardware();

        if guard.acquisition().applied_mode != Some(index) {
            sdk!(hw.stop(handle), "Stop()")?;
            let bits = match mode.family {
                PixelFamily::Rgb => {
                    sdk!(hw.put_option(handle, option::RAW, 0), "put_Option(OPTION_RAW, 0)")?;
                    sdk!(hw.put_option(handle, option::BITDEPTH, 0), "put_Option(OPTION_BITDEPTH, 0)")?;
                    24
                }
                _ if mode.bit_depth == 8 => {
                    sdk!(hw.put_option(handle, option::RAW, 1), "put_Option(OPTION_RAW, 1)")?;
                    sdk!(hw.put_option(handle, option::BITDEPTH, 0), "put_Option(OPTION_BITDEPTH, 0)")?;
                    8
                }
                _ => {
                    sdk!(hw.put_option(handle, option::BITDEPTH, 1), "put_Option(OPTION_BITDEPTH, 1)")?;
                    sdk!(hw.put_option(handle, option::RAW, 1), "put_Option(OPTION_RAW, 1)")?;
                    mode.bit_depth
                }
            };
            let binning = guard.acquisition().bin_mode.bits() | mode.bin_factor as i32;
            sdk!(hw.put_option(handle, option::BINNING, binning), "put_Option(OPTION_BINNING, {:#x})", binning)?;
            sdk!(hw.put_speed(handle, 0), "put_Speed(0)")?;
            let callback = guard.acquisition().callback.clone().ok_or(DriverError::NotConnected)?;
            sdk!(hw.start_pull_mode(handle, callback), "StartPullModeWithCallback()")?;

            let acquisition = guard.acquisition_mut();
            acquisition.applied_mode = Some(index);
            acquisition.applied_roi = None;
            acquisition.bits = bits;
        }

        if self.descriptor.model.has(flag::ROI_HARDWARE) {
            let frame = &props.frame;
            let item = |name| frame.number_value(name).unwrap_or(0.0).max(0.0) as u32;
            let requested = Roi {
                left: item(CCD_FRAME_LEFT),
                top: item(CCD_FRAME_TOP),
                width: item(CCD_FRAME_WIDTH),
                height: item(CCD_FRAME_HEIGHT),
            };
            let roi = fit_roi(requested, mode.bin_factor, self.max_width, self.max_height);
            if guard.acquisition().applied_roi != Some(roi) {
                sdk!(
                    hw.put_roi(handle, roi),
                    "put_Roi({}, {}, {}, {})",
                    roi.left,
                    roi.top,
                    roi.width,
                    roi.height
                )?;
                guard.acquisition_mut().applied_roi = Some(roi);
            }
        }
        let _ = sdk!(hw.put_option(handle, option::FLUSH, 3), "put_Option(OPTION_FLUSH, 3)");
        Ok(())
    }

    pub(super) async fn change_abort(&self, state: &mut CameraState, request: &Property) -> DriverResult<()> {
        let abort = &mut state.props.abort;
        abort.copy_values(request);
        if abort.switch_value(CCD_ABORT_EXPOSURE_ITEM) == Some(true) {
            return self.abort_locked(state).await;
        }
        abort.state = PropertyState::Ok;
        self.bus.update(abort, None);
        Ok(())
    }

    async fn abort_locked(&self, state: &mut CameraState) -> DriverResult<()> {
        self.aborting.store(true, Ordering::SeqCst);
        let result = {
            let guard = self.connection.lock().await;
            let handle = guard.handle()?;
            sdk!(guard.hardware().abort(handle), "Trigger(0)")
        };

        let props = &mut state.props;
        for property in [&mut props.exposure, &mut props.streaming] {
            if property.state == PropertyState::Busy {
                property.state = PropertyState::Alert;
                self.bus.update(property, Some("Exposure aborted"));
            }
        }
        let abort = &mut props.abort;
        let _ = abort.set_switch(CCD_ABORT_EXPOSURE_ITEM, false);
        abort.state = if result.is_ok() {
            PropertyState::Ok
        } else {
            PropertyState::Alert
        };
        self.bus.update(abort, None);
        tracing::info!("Aborted exposure on '{}'", self.name);
        result.map_err(DriverError::from)
    }

    /// Applies one vendor event raised under arm `generation`. Runs on the
    /// event worker, never inside the SDK's callback.
    pub(super) async fn on_hardware_event(&self, event: HardwareEvent, generation: u64, buffer: &mut [u8]) {
        let stale = generation != self.arm_generation.load(Ordering::SeqCst);
        match event {
            HardwareEvent::Image => self.on_image(buffer, stale).await,
            HardwareEvent::NoFrameTimeout | HardwareEvent::NoPacketTimeout | HardwareEvent::Error if stale => {
                tracing::debug!("'{}': ignored {:?} from an earlier exposure", self.name, event);
            }
            HardwareEvent::NoFrameTimeout | HardwareEvent::NoPacketTimeout | HardwareEvent::Error => {
                self.on_acquisition_failure(event).await
            }
            HardwareEvent::Disconnected => {
                tracing::warn!("'{}' reported a disconnection", self.name);
            }
            other => tracing::debug!("'{}': ignored event {:?}", self.name, other),
        }
    }

    /// A `stale` frame is still pulled so the SDK releases it, then dropped
    async fn on_image(&self, buffer: &mut [u8], stale: bool) {
        let pulled = {
            let guard = self.connection.lock().await;
            let bits = guard.acquisition().bits;
            let bayer = guard.acquisition().bayer;
            guard.handle().and_then(|handle| {
                sdk!(guard.hardware().pull_image(handle, buffer, bits), "PullImageV2({})", bits)
                    .map(|info| (info, bits, bayer))
                    .map_err(DriverError::from)
            })
        };
        if stale {
            tracing::debug!("'{}': dropped a frame from an earlier exposure", self.name);
            return;
        }

        let mut state = self.state.lock().await;
        let props = &mut state.props;
        let (info, bits, bayer) = match pulled {
            Ok(pulled) => pulled,
            Err(e) => {
                self.bus.failure_cleanup(&self.name);
                let message = DriverError::FrameLost(e.to_string()).to_string();
                if props.exposure.state == PropertyState::Busy {
                    props.exposure.state = PropertyState::Alert;
                    self.bus.update(&props.exposure, Some(&message));
                } else if props.streaming.state == PropertyState::Busy {
                    self.bus.finalize_video_stream(&self.name);
                    props.streaming.state = PropertyState::Alert;
                    self.bus.update(&props.streaming, Some(&message));
                }
                return;
            }
        };

        if self.aborting.load(Ordering::SeqCst) {
            self.bus.finalize_video_stream(&self.name);
            return;
        }

        let len = (info.width as usize * info.height as usize * bytes_per_pixel(bits)).min(buffer.len());
        let frame = ImageFrame {
            width: info.width,
            height: info.height,
            bits_per_pixel: if (9..=16).contains(&bits) { 16 } else { bits },
            sequence: info.sequence,
            timestamp: info.timestamp,
            bayer_pattern: bayer.filter(|_| bits != 24 && bits != 48).map(BayerPattern::keyword),
            data: &buffer[..len],
        };

        if props.exposure.state == PropertyState::Busy {
            self.bus.process_image(&self.name, &frame, false);
            let _ = props.exposure.set_number(CCD_EXPOSURE_ITEM, 0.0);
            self.defer_finish(Capture::Exposure);
        } else if props.streaming.state == PropertyState::Busy {
            self.bus.process_image(&self.name, &frame, true);
            let streaming = &mut props.streaming;
            let remaining = streaming.number_value(CCD_STREAMING_COUNT).unwrap_or(0.0) - 1.0;
            let _ = streaming.set_number(CCD_STREAMING_COUNT, remaining.max(-1.0));
            if remaining == 0.0 {
                self.bus.finalize_video_stream(&self.name);
                self.defer_finish(Capture::Streaming);
            } else if remaining < -1.0 {
                self.bus.update(streaming, None);
            }
        } else {
            tracing::debug!("'{}': frame {} arrived with nothing pending", self.name, info.sequence);
        }
    }

    async fn on_acquisition_failure(&self, event: HardwareEvent) {
        tracing::error!("'{}': acquisition failed with {:?}", self.name, event);
        self.bus.failure_cleanup(&self.name);
        let message = format!("Acquisition failed: {:?}", event);
        let mut state = self.state.lock().await;
        let props = &mut state.props;
        if props.exposure.state == PropertyState::Busy {
            props.exposure.state = PropertyState::Alert;
            self.bus.update(&props.exposure, Some(&message));
        }
        if props.streaming.state == PropertyState::Busy {
            self.bus.finalize_video_stream(&self.name);
            props.streaming.state = PropertyState::Alert;
            self.bus.update(&props.streaming, Some(&message));
        }
    }

    /// Moves `capture` from `Busy` to `Ok` on the timer service
    fn defer_finish(&self, capture: Capture) {
        let weak = self.weak.clone();
        defer(async move {
            if let Some(camera) = weak.upgrade() {
                camera.finish(capture).await;
            }
        });
    }

    async fn finish(&self, capture: Capture) {
        let mut state = self.state.lock().await;
        let property = match capture {
            Capture::Exposure => &mut state.props.exposure,
            Capture::Streaming => &mut state.props.streaming,
        };
        if property.state == PropertyState::Busy {
            property.state = PropertyState::Ok;
            self.bus.update(property, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::EVENT_QUEUE_DEPTH;
    use crate::config::DriverConfig;
    use crate::device::BusDevice;
    use crate::error::DriverError;
    use crate::testing::{connected_camera, number_request, settle, switch_request};
    use std::time::Duration;
    use toupcore_bus::names::*;
    use toupcore_bus::{BusEvent, PropertyState};
    use toupcore_hw::mock::HwCall;
    use toupcore_hw::{flag, option, HardwareEvent, Roi, TRIGGER_CONTINUOUS};

    const COLOR: u64 = flag::RAW8 | flag::RAW12 | flag::RAW16 | flag::ROI_HARDWARE;

    fn delivered(events: &[BusEvent]) -> Vec<(u32, u32, u32, Option<String>, bool)> {
        events
            .iter()
            .filter_map(|e| match e {
                BusEvent::ImageDelivered {
                    width,
                    height,
                    bits_per_pixel,
                    bayer_pattern,
                    streaming,
                    ..
                } => Some((*width, *height, *bits_per_pixel, bayer_pattern.clone(), *streaming)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_exposure_in_binned_16_bit_mode() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera
            .change_property(&switch_request(&name, CCD_MODE, &[("RAW16_2", true)]))
            .await
            .unwrap();
        rig.hw.clear_calls();

        let state = rig.camera.request_exposure(2.0).await.unwrap();
        assert_eq!(state, PropertyState::Busy);
        assert_eq!(rig.bus.property(&name, CCD_EXPOSURE).unwrap().state, PropertyState::Busy);

        let calls = rig.hw.calls();
        assert!(calls.contains(&HwCall::PutExpoTime(2_000_000)));
        assert!(calls.contains(&HwCall::Trigger(1)));
        assert!(calls.contains(&HwCall::PutOption(option::BITDEPTH, 1)));
        assert!(calls.contains(&HwCall::PutOption(option::BINNING, 2)));
        assert!(calls.contains(&HwCall::PutRoi(Roi { left: 0, top: 0, width: 640, height: 480 })));
        assert!(calls.contains(&HwCall::PutSpeed(0)));
        assert!(calls.contains(&HwCall::StartPullMode));

        assert!(rig.hw.fire("tp-1", HardwareEvent::Image));
        settle().await;

        assert_eq!(rig.bus.image_count(&name), 1);
        let exposure = rig.bus.property(&name, CCD_EXPOSURE).unwrap();
        assert_eq!(exposure.state, PropertyState::Ok);
        assert_eq!(exposure.number_value(CCD_EXPOSURE_ITEM), Some(0.0));
        assert_eq!(rig.hw.count_calls(|c| *c == HwCall::PullImage { bits: 16 }), 1);
        // 16 bit RAW carries the Bayer pattern
        assert_eq!(
            delivered(&rig.bus.history()),
            vec![(640, 480, 16, Some("RGGB".to_string()), false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_is_only_programmed_once() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        for _ in 0..2 {
            rig.camera.request_exposure(0.5).await.unwrap();
            rig.hw.fire("tp-1", HardwareEvent::Image);
            settle().await;
        }
        assert_eq!(rig.hw.count_calls(|c| *c == HwCall::Stop), 1);
        assert_eq!(rig.hw.count_calls(|c| matches!(c, HwCall::PutRoi(_))), 1);
        assert_eq!(rig.hw.count_calls(|c| *c == HwCall::PutOption(option::FLUSH, 3)), 2);
        assert_eq!(rig.bus.image_count(rig.camera.name()), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exposure_while_busy_is_ignored() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        rig.camera.request_exposure(1.0).await.unwrap();
        rig.hw.clear_calls();

        assert_eq!(rig.camera.request_exposure(5.0).await, Ok(PropertyState::Busy));
        let err = rig
            .camera
            .change_property(&number_request(rig.camera.name(), CCD_EXPOSURE, &[(CCD_EXPOSURE_ITEM, 5.0)]))
            .await
            .unwrap_err();
        assert_eq!(err, DriverError::Busy(CCD_EXPOSURE.to_string()));
        assert!(rig.hw.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_failure_sets_alert() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        rig.hw.fail("trigger");

        let err = rig.camera.request_exposure(1.0).await.unwrap_err();
        assert!(matches!(err, DriverError::HardwareCallFailed(_)));
        let name = rig.camera.name();
        assert_eq!(rig.bus.property(name, CCD_EXPOSURE).unwrap().state, PropertyState::Alert);
        assert!(rig.bus.last_message(name, CCD_EXPOSURE).unwrap().contains("0x80004005"));

        // Not stuck: the next request goes through again
        rig.hw.succeed("trigger");
        assert_eq!(rig.camera.request_exposure(1.0).await, Ok(PropertyState::Busy));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_of_three_frames() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        assert_eq!(rig.camera.request_streaming(0.1, 3).await, Ok(PropertyState::Busy));
        assert!(rig.hw.calls().contains(&HwCall::Trigger(3)));

        for _ in 0..3 {
            rig.hw.fire("tp-1", HardwareEvent::Image);
            settle().await;
        }

        let streaming = rig.bus.property(&name, CCD_STREAMING).unwrap();
        assert_eq!(streaming.state, PropertyState::Ok);
        assert_eq!(streaming.number_value(CCD_STREAMING_COUNT), Some(0.0));
        let transitions = rig
            .bus
            .updates_of(&name, CCD_STREAMING)
            .iter()
            .filter(|p| p.state == PropertyState::Ok)
            .count();
        assert_eq!(transitions, 1);
        assert_eq!(rig.bus.image_count(&name), 3);
        assert!(delivered(&rig.bus.history()).iter().all(|d| d.4));
        assert!(rig.bus.history().contains(&BusEvent::StreamFinalized(name.clone())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_stream_clamps_counter() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera.request_streaming(0.1, -1).await.unwrap();
        assert!(rig.hw.calls().contains(&HwCall::Trigger(TRIGGER_CONTINUOUS)));

        for _ in 0..4 {
            rig.hw.fire("tp-1", HardwareEvent::Image);
            settle().await;
        }
        let streaming = rig.bus.property(&name, CCD_STREAMING).unwrap();
        assert_eq!(streaming.state, PropertyState::Busy);
        assert_eq!(streaming.number_value(CCD_STREAMING_COUNT), Some(-1.0));
        assert_eq!(rig.bus.image_count(&name), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_of_zero_frames_completes_immediately() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        assert_eq!(rig.camera.request_streaming(0.1, 0).await, Ok(PropertyState::Ok));
        assert_eq!(rig.hw.count_calls(|c| matches!(c, HwCall::Trigger(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_hidden_for_single_trigger_models() {
        let rig = connected_camera(COLOR | flag::TRIGGER_SINGLE, DriverConfig::default()).await;
        let err = rig.camera.request_streaming(0.1, 2).await.unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedFeature(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_drops_frames_in_flight() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera.request_exposure(3.0).await.unwrap();

        // The frame is queued before the abort lands but applied after it
        rig.hw.fire("tp-1", HardwareEvent::Image);
        rig.camera.abort().await.unwrap();
        settle().await;

        assert_eq!(rig.bus.image_count(&name), 0);
        assert!(rig.bus.history().contains(&BusEvent::StreamFinalized(name.clone())));
        assert!(rig.hw.calls().contains(&HwCall::Trigger(0)));
        assert_eq!(rig.bus.property(&name, CCD_EXPOSURE).unwrap().state, PropertyState::Alert);
        let abort = rig.bus.property(&name, CCD_ABORT_EXPOSURE).unwrap();
        assert_eq!(abort.switch_value(CCD_ABORT_EXPOSURE_ITEM), Some(false));

        // A new exposure clears the flag
        rig.camera.request_exposure(1.0).await.unwrap();
        rig.hw.fire("tp-1", HardwareEvent::Image);
        settle().await;
        assert_eq!(rig.bus.image_count(&name), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_frame_never_completes_the_next_exposure() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera.request_exposure(3.0).await.unwrap();
        rig.hw.fire("tp-1", HardwareEvent::Image);
        rig.camera.abort().await.unwrap();

        // Re-armed before the worker got to the aborted frame
        assert_eq!(rig.camera.request_exposure(60.0).await, Ok(PropertyState::Busy));
        settle().await;
        assert_eq!(rig.bus.image_count(&name), 0);
        assert_eq!(rig.bus.property(&name, CCD_EXPOSURE).unwrap().state, PropertyState::Busy);

        rig.hw.fire("tp-1", HardwareEvent::Image);
        settle().await;
        assert_eq!(rig.bus.image_count(&name), 1);
        assert_eq!(rig.bus.property(&name, CCD_EXPOSURE).unwrap().state, PropertyState::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_from_earlier_exposure_is_ignored() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera.request_exposure(1.0).await.unwrap();
        rig.hw.fire("tp-1", HardwareEvent::NoFrameTimeout);
        rig.camera.abort().await.unwrap();
        rig.camera.request_exposure(1.0).await.unwrap();
        settle().await;

        assert_eq!(rig.bus.property(&name, CCD_EXPOSURE).unwrap().state, PropertyState::Busy);
        assert!(!rig.bus.history().contains(&BusEvent::FailureCleanup(name.clone())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_queue_is_bounded() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera.request_streaming(0.01, -1).await.unwrap();

        // The worker cannot run until the test yields, so the queue fills up
        for _ in 0..EVENT_QUEUE_DEPTH + 10 {
            assert!(rig.hw.fire("tp-1", HardwareEvent::Image));
        }
        settle().await;
        assert_eq!(rig.bus.image_count(&name), EVENT_QUEUE_DEPTH);

        // Room again once drained
        rig.hw.fire("tp-1", HardwareEvent::Image);
        settle().await;
        assert_eq!(rig.bus.image_count(&name), EVENT_QUEUE_DEPTH + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_through_property() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera.request_streaming(0.5, -1).await.unwrap();

        rig.camera
            .change_property(&switch_request(&name, CCD_ABORT_EXPOSURE, &[(CCD_ABORT_EXPOSURE_ITEM, true)]))
            .await
            .unwrap();
        assert_eq!(rig.bus.property(&name, CCD_STREAMING).unwrap().state, PropertyState::Alert);
        assert_eq!(rig.bus.last_message(&name, CCD_STREAMING).as_deref(), Some("Exposure aborted"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abort_races_callback_without_deadlock() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera.request_streaming(0.01, -1).await.unwrap();

        let hw = rig.hw.clone();
        let firing = std::thread::spawn(move || {
            for _ in 0..200 {
                hw.fire("tp-1", HardwareEvent::Image);
            }
        });
        let aborted = tokio::time::timeout(Duration::from_secs(10), rig.camera.abort()).await;
        assert_eq!(aborted, Ok(Ok(())));
        let delivered_at_abort = rig.bus.image_count(&name);
        firing.join().unwrap();

        // Everything fired after the abort is finalized, never delivered
        tokio::time::timeout(Duration::from_secs(10), rig.camera.disconnect())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rig.bus.image_count(&name), delivered_at_abort);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_failure_sets_alert() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera.request_exposure(1.0).await.unwrap();
        rig.hw.fail("pull_image");

        rig.hw.fire("tp-1", HardwareEvent::Image);
        settle().await;

        assert_eq!(rig.bus.image_count(&name), 0);
        assert!(rig.bus.history().contains(&BusEvent::FailureCleanup(name.clone())));
        assert_eq!(rig.bus.property(&name, CCD_EXPOSURE).unwrap().state, PropertyState::Alert);
        assert!(rig.bus.last_message(&name, CCD_EXPOSURE).unwrap().starts_with("Frame lost"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_event_fails_pending_stream() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera.request_streaming(1.0, 10).await.unwrap();

        rig.hw.fire("tp-1", HardwareEvent::NoFrameTimeout);
        settle().await;

        assert_eq!(rig.bus.property(&name, CCD_STREAMING).unwrap().state, PropertyState::Alert);
        assert!(rig.bus.history().contains(&BusEvent::FailureCleanup(name.clone())));
        assert!(rig.bus.history().contains(&BusEvent::StreamFinalized(name.clone())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rgb_frames_have_no_bayer_pattern() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera
            .change_property(&switch_request(&name, CCD_MODE, &[("RGB08_1", true)]))
            .await
            .unwrap();
        rig.camera.request_exposure(0.2).await.unwrap();
        assert!(rig.hw.calls().contains(&HwCall::PutOption(option::RAW, 0)));

        rig.hw.fire("tp-1", HardwareEvent::Image);
        settle().await;
        assert_eq!(delivered(&rig.bus.history()), vec![(1280, 960, 24, None, false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_frame_resets_to_full_sensor() {
        let rig = connected_camera(COLOR, DriverConfig::default()).await;
        let name = rig.camera.name().to_string();
        rig.camera
            .change_property(&number_request(
                &name,
                CCD_FRAME,
                &[(CCD_FRAME_LEFT, 1000.0), (CCD_FRAME_WIDTH, 600.0)],
            ))
            .await
            .unwrap();
        rig.camera.request_exposure(0.2).await.unwrap();
        assert!(rig
            .hw
            .calls()
            .contains(&HwCall::PutRoi(Roi { left: 0, top: 0, width: 1280, height: 960 })));
    }
}
