//! Motion tracking for head-tracked rendering
//!
//! `MotionTracker::sample` turns the newest sensor orientation into the
//! device rotation applied to the scene. Without a sensor it yields the
//! identity, so the view simply stops following the head.

use glam::{Mat4, Quat};
use log::{info, warn};

use crate::config::MotionConfig;

/// A source of device orientation samples, polled from the render thread.
pub trait RotationSensor {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    /// Start delivering samples at roughly `rate_hz`. Returns false if the
    /// sensor could not be enabled.
    fn enable(&mut self, rate_hz: f32) -> bool;

    /// Drain pending events without blocking and return the newest
    /// device-to-world orientation, if any arrived since the last poll.
    fn poll(&mut self) -> Option<Quat>;
}

/// Placeholder for platforms without a motion sensor
pub struct NoSensor;

impl RotationSensor for NoSensor {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn enable(&mut self, _rate_hz: f32) -> bool {
        false
    }

    fn poll(&mut self) -> Option<Quat> {
        None
    }
}

pub struct MotionTracker {
    sensor: Box<dyn RotationSensor>,
    enabled: bool,
    /// Orientation treated as "looking straight ahead"
    reference: Quat,
    latest: Quat,
    rotation: Mat4,
}

impl MotionTracker {
    pub fn new(mut sensor: Box<dyn RotationSensor>, config: &MotionConfig) -> Self {
        info!("Motion sensor '{}' available: {}", sensor.name(), sensor.is_available());

        let enabled = config.enabled && sensor.is_available() && sensor.enable(config.rate_hz);
        if enabled {
            info!("Motion tracking enabled at {} Hz", config.rate_hz);
        } else if config.enabled {
            warn!("Motion tracking unavailable - using fixed orientation");
        }

        Self {
            sensor,
            enabled,
            reference: Quat::IDENTITY,
            latest: Quat::IDENTITY,
            rotation: Mat4::IDENTITY,
        }
    }

    /// Tracker backed by the platform's rotation sensor, if it has one.
    pub fn platform_default(config: &MotionConfig) -> Self {
        #[cfg(target_os = "android")]
        let sensor: Box<dyn RotationSensor> = Box::new(ndk::NdkRotationSensor::new());
        #[cfg(not(target_os = "android"))]
        let sensor: Box<dyn RotationSensor> = Box::new(NoSensor);

        Self::new(sensor, config)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current device rotation: the inverse of the sensor orientation, i.e.
    /// the world as seen from the device. Identity while tracking is off.
    pub fn sample(&mut self) -> Mat4 {
        if !self.enabled {
            return Mat4::IDENTITY;
        }

        if let Some(orientation) = self.sensor.poll() {
            self.latest = orientation;
            let relative = self.reference.inverse() * orientation;
            self.rotation = Mat4::from_quat(relative).inverse();
        }
        self.rotation
    }

    /// Treat the current orientation as the neutral pose.
    pub fn recenter(&mut self) {
        self.reference = self.latest;
        self.rotation = Mat4::IDENTITY;
        info!("Orientation recentered");
    }
}

#[cfg(target_os = "android")]
mod ndk {
    //! Game Rotation Vector via the NDK sensor API, falling back to
    //! integrating the raw gyroscope.

    use glam::{EulerRot, Quat};
    use log::info;
    use std::ptr;

    use super::RotationSensor;

    const ASENSOR_TYPE_GAME_ROTATION_VECTOR: i32 = 15;
    const ASENSOR_TYPE_GYROSCOPE: i32 = 4;

    pub struct NdkRotationSensor {
        sensor_manager: *mut ndk_sys::ASensorManager,
        sensor: *const ndk_sys::ASensor,
        event_queue: *mut ndk_sys::ASensorEventQueue,

        // Integrated gyroscope angles (radians)
        pitch: f32,
        yaw: f32,
        roll: f32,
        last_gyro_timestamp: Option<i64>,
    }

    impl NdkRotationSensor {
        pub fn new() -> Self {
            let mut sensor = Self {
                sensor_manager: ptr::null_mut(),
                sensor: ptr::null(),
                event_queue: ptr::null_mut(),
                pitch: 0.0,
                yaw: 0.0,
                roll: 0.0,
                last_gyro_timestamp: None,
            };
            sensor.find_sensor();
            sensor
        }

        fn find_sensor(&mut self) {
            unsafe {
                self.sensor_manager =
                    ndk_sys::ASensorManager_getInstanceForPackage(c"com.monetvr.app".as_ptr());
                if self.sensor_manager.is_null() {
                    info!("ASensorManager not available");
                    return;
                }

                self.sensor = ndk_sys::ASensorManager_getDefaultSensor(
                    self.sensor_manager,
                    ASENSOR_TYPE_GAME_ROTATION_VECTOR,
                );
                if self.sensor.is_null() {
                    info!("Game Rotation Vector not available, trying gyroscope");
                    self.sensor = ndk_sys::ASensorManager_getDefaultSensor(
                        self.sensor_manager,
                        ASENSOR_TYPE_GYROSCOPE,
                    );
                }
            }
        }
    }

    impl RotationSensor for NdkRotationSensor {
        fn name(&self) -> &str {
            "android-rotation"
        }

        fn is_available(&self) -> bool {
            !self.sensor.is_null()
        }

        fn enable(&mut self, rate_hz: f32) -> bool {
            if self.sensor.is_null() {
                return false;
            }

            unsafe {
                let mut looper = ndk_sys::ALooper_forThread();
                if looper.is_null() {
                    looper = ndk_sys::ALooper_prepare(0);
                }
                if looper.is_null() {
                    info!("Failed to get ALooper");
                    return false;
                }

                self.event_queue = ndk_sys::ASensorManager_createEventQueue(
                    self.sensor_manager,
                    looper,
                    0,
                    None,
                    ptr::null_mut(),
                );
                if self.event_queue.is_null() {
                    info!("Failed to create sensor event queue");
                    return false;
                }

                let result = ndk_sys::ASensorEventQueue_enableSensor(self.event_queue, self.sensor);
                if result < 0 {
                    info!("Failed to enable sensor: {}", result);
                    return false;
                }

                let period_us = (1_000_000.0 / rate_hz.max(1.0)) as i32;
                ndk_sys::ASensorEventQueue_setEventRate(self.event_queue, self.sensor, period_us);
            }
            true
        }

        fn poll(&mut self) -> Option<Quat> {
            if self.event_queue.is_null() {
                return None;
            }

            let mut newest = None;
            unsafe {
                let mut event: ndk_sys::ASensorEvent = std::mem::zeroed();
                while ndk_sys::ASensorEventQueue_getEvents(self.event_queue, &mut event, 1) > 0 {
                    let data = event.__bindgen_anon_1.__bindgen_anon_1.data;
                    match event.type_ {
                        ASENSOR_TYPE_GAME_ROTATION_VECTOR => {
                            let (x, y, z) = (data[0], data[1], data[2]);
                            let w = (1.0 - x * x - y * y - z * z).max(0.0).sqrt();
                            newest = Some(Quat::from_xyzw(x, y, z, w).normalize());
                        }
                        ASENSOR_TYPE_GYROSCOPE => {
                            if let Some(last) = self.last_gyro_timestamp {
                                let dt = (event.timestamp - last) as f32 * 1e-9;
                                self.pitch += data[0] * dt;
                                self.roll += data[1] * dt;
                                self.yaw += data[2] * dt;
                                newest = Some(Quat::from_euler(EulerRot::YXZ, self.yaw, self.pitch, self.roll));
                            }
                            self.last_gyro_timestamp = Some(event.timestamp);
                        }
                        _ => {}
                    }
                }
            }
            newest
        }
    }

    impl Drop for NdkRotationSensor {
        fn drop(&mut self) {
            unsafe {
                if !self.event_queue.is_null() && !self.sensor_manager.is_null() {
                    ndk_sys::ASensorManager_destroyEventQueue(self.sensor_manager, self.event_queue);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a fixed list of orientations, one per poll.
    struct ScriptedSensor {
        samples: VecDeque<Option<Quat>>,
    }

    impl RotationSensor for ScriptedSensor {
        fn name(&self) -> &str {
            "scripted"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn enable(&mut self, _rate_hz: f32) -> bool {
            true
        }

        fn poll(&mut self) -> Option<Quat> {
            self.samples.pop_front().flatten()
        }
    }

    fn tracker(samples: Vec<Option<Quat>>) -> MotionTracker {
        MotionTracker::new(
            Box::new(ScriptedSensor { samples: samples.into() }),
            &MotionConfig::default(),
        )
    }

    #[test]
    fn missing_sensor_yields_identity() {
        let mut tracker = MotionTracker::new(Box::new(NoSensor), &MotionConfig::default());
        assert!(!tracker.is_enabled());
        for _ in 0..3 {
            assert_eq!(tracker.sample(), Mat4::IDENTITY);
        }
    }

    #[test]
    fn disabled_tracking_ignores_sensor() {
        let config = MotionConfig { enabled: false, ..MotionConfig::default() };
        let mut tracker = MotionTracker::new(
            Box::new(ScriptedSensor { samples: vec![Some(Quat::from_rotation_y(1.0))].into() }),
            &config,
        );
        assert_eq!(tracker.sample(), Mat4::IDENTITY);
    }

    #[test]
    fn sample_is_inverse_of_sensor_rotation() {
        let q = Quat::from_rotation_y(0.5);
        let mut tracker = tracker(vec![Some(q)]);
        let rotation = tracker.sample();
        assert!((rotation * Mat4::from_quat(q)).abs_diff_eq(Mat4::IDENTITY, 1e-5));
    }

    #[test]
    fn keeps_last_rotation_between_samples() {
        let q = Quat::from_rotation_x(0.3);
        let mut tracker = tracker(vec![Some(q), None, None]);
        let first = tracker.sample();
        assert_eq!(tracker.sample(), first);
        assert_eq!(tracker.sample(), first);
    }

    #[test]
    fn recenter_makes_current_pose_neutral() {
        let q = Quat::from_rotation_z(0.7);
        let mut tracker = tracker(vec![Some(q), Some(q)]);
        tracker.sample();
        tracker.recenter();
        assert!(tracker.sample().abs_diff_eq(Mat4::IDENTITY, 1e-5));
    }
}
