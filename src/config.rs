//! Configuration parsing and management for MonetVR
//!
//! Loads `monet_vr.toml` (or `config/monet_vr.toml`) and falls back to
//! defaults that match a 640x480 camera viewed through a phone headset.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, MonetError};
use crate::eye_rig::{ScreenOrientation, SplitAxis};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub stereo: StereoConfig,
    pub distortion: DistortionConfig,
    pub capture: CaptureConfig,
    pub motion: MotionConfig,
    pub model: ModelConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MonetError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e))
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, MonetError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration from default paths
    pub fn load() -> Result<Self, MonetError> {
        let paths = [
            PathBuf::from("monet_vr.toml"),
            PathBuf::from("config/monet_vr.toml"),
        ];

        for path in &paths {
            if path.exists() {
                log::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), MonetError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(invalid("window", "Window size must be non-zero"));
        }

        let s = &self.stereo;
        if !(s.fov_y_degrees > 0.0 && s.fov_y_degrees < 180.0) {
            return Err(invalid("stereo.fov_y_degrees", "Field of view must be in (0, 180)"));
        }
        if s.near <= 0.0 || s.far <= s.near {
            return Err(invalid("stereo.near", "Clip planes must satisfy 0 < near < far"));
        }
        if s.interocular < 0.0 {
            return Err(invalid("stereo.interocular", "Eye separation cannot be negative"));
        }
        if s.convergence <= 0.0 {
            return Err(invalid("stereo.convergence", "Convergence distance must be positive"));
        }

        let c = &self.capture;
        if c.width == 0 || c.height == 0 {
            return Err(invalid("capture", "Capture size must be non-zero"));
        }
        if c.stride == 0 {
            return Err(invalid("capture.stride", "Stride must be at least 1"));
        }
        if c.fps == 0 {
            return Err(invalid("capture.fps", "Frame rate must be at least 1"));
        }
        if c.plane_height <= 0.0 {
            return Err(invalid("capture.plane_height", "Plane height must be positive"));
        }

        if self.motion.rate_hz <= 0.0 {
            return Err(invalid("motion.rate_hz", "Sampling rate must be positive"));
        }
        if self.model.scale <= 0.0 {
            return Err(invalid("model.scale", "Model scale must be positive"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> MonetError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "MonetVR".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Camera and eye layout settings shared by every eye.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoConfig {
    /// Start in stereo mode
    pub enabled: bool,
    pub split_axis: SplitAxis,
    /// Eye separation in world units (metres)
    pub interocular: f32,
    /// Distance of the zero-parallax plane
    pub convergence: f32,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub eye: [f32; 3],
    pub target: [f32; 3],
    pub orientation: ScreenOrientation,
}

impl Default for StereoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            split_axis: SplitAxis::Horizontal,
            interocular: 0.063,
            convergence: 3.0,
            fov_y_degrees: 60.0,
            near: 1.0,
            far: 1000.0,
            eye: [0.0, 0.0, 3.0],
            target: [0.0, 0.0, 0.0],
            orientation: ScreenOrientation::Identity,
        }
    }
}

/// Radial warp coefficients (Cardboard style defaults)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionConfig {
    pub enabled: bool,
    pub k1: f32,
    pub k2: f32,
    /// Radius (in eye-local units) the warp is normalised against
    pub lens_radius: f32,
    /// Horizontal shift of each lens centre, mirrored between eyes
    pub lens_center_offset: f32,
}

impl Default for DistortionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k1: 0.25,
            k2: 0.15,
            lens_radius: 1.0,
            lens_center_offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// `test-pattern`, `none`, or a directory of still images
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Video-plane decimation stride
    pub stride: u32,
    /// World-space height of the video plane
    pub plane_height: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "test-pattern".to_string(),
            width: 640,
            height: 480,
            fps: 60,
            stride: 1,
            plane_height: 3.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub enabled: bool,
    pub rate_hz: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_hz: 60.0,
        }
    }
}

/// The head-tracked model loaded in the background.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: Option<PathBuf>,
    pub visible: bool,
    pub offset: [f32; 3],
    /// Size of the model's bounding-box diagonal after normalisation
    pub scale: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("assets/monster.obj")),
            visible: true,
            offset: [0.0, -0.25, 0.5],
            scale: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.capture.height, 480);
        assert_eq!(config.stereo.split_axis, SplitAxis::Horizontal);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_str(
            r#"
            [stereo]
            enabled = true
            split_axis = "vertical"
            orientation = "landscape_left"

            [distortion]
            k1 = 0.4
            "#,
        )
        .unwrap();

        assert!(config.stereo.enabled);
        assert_eq!(config.stereo.split_axis, SplitAxis::Vertical);
        assert_eq!(config.stereo.orientation, ScreenOrientation::LandscapeLeft);
        assert_eq!(config.distortion.k1, 0.4);
        assert_eq!(config.distortion.k2, 0.15);
        assert_eq!(config.capture.device, "test-pattern");
    }

    #[test]
    fn rejects_zero_stride() {
        let mut config = Config::default();
        config.capture.stride = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("capture.stride"));
    }

    #[test]
    fn rejects_inverted_clip_planes() {
        let mut config = Config::default();
        config.stereo.near = 10.0;
        config.stereo.far = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_error_is_reported() {
        let err = Config::from_str("[stereo\nenabled = ").unwrap_err();
        assert!(matches!(err, MonetError::Config(ConfigError::Parse(_))));
    }
}
