//! Eye rig
//!
//! Derives the camera and viewport for each eye (mono, left, right) from the
//! window size. Recomputed on resize and on stereo toggle only; rendering
//! reads the descriptors without touching them.

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::config::StereoConfig;

/// One rendering viewpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Eye {
    Mono,
    Left,
    Right,
}

impl Eye {
    pub const ALL: [Eye; 3] = [Eye::Mono, Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        match self {
            Eye::Mono => 0,
            Eye::Left => 1,
            Eye::Right => 2,
        }
    }

    /// -1 for the left eye, +1 for the right eye, 0 for mono
    pub fn side(self) -> f32 {
        match self {
            Eye::Mono => 0.0,
            Eye::Left => -1.0,
            Eye::Right => 1.0,
        }
    }
}

/// How the window is divided between the two eyes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitAxis {
    /// Side by side: left eye on the left half
    #[default]
    Horizontal,
    /// Over/under: left eye on the top half
    Vertical,
}

/// Rotation applied after projection so the image matches how the display is held.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenOrientation {
    #[default]
    Identity,
    /// Device rotated a quarter turn counter-clockwise
    LandscapeLeft,
    /// Device rotated a quarter turn clockwise
    LandscapeRight,
    UpsideDown,
}

impl ScreenOrientation {
    pub fn rotation(self) -> Mat4 {
        match self {
            ScreenOrientation::Identity => Mat4::IDENTITY,
            ScreenOrientation::LandscapeLeft => Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2),
            ScreenOrientation::LandscapeRight => Mat4::from_rotation_z(-std::f32::consts::FRAC_PI_2),
            ScreenOrientation::UpsideDown => Mat4::from_rotation_z(std::f32::consts::PI),
        }
    }

    /// Quarter turns exchange the width and height seen by the projection.
    pub fn swaps_axes(self) -> bool {
        matches!(self, ScreenOrientation::LandscapeLeft | ScreenOrientation::LandscapeRight)
    }
}

/// Pixel rectangle, origin at the top-left of the window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(size: (u32, u32)) -> Self {
        Self { x: 0, y: 0, width: size.0, height: size.1 }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }

    pub fn intersection(&self, other: &Viewport) -> Option<Viewport> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        (x1 > x0 && y1 > y0).then(|| Viewport { x: x0, y: y0, width: x1 - x0, height: y1 - y0 })
    }

    /// Split into two halves along `axis`; the halves tile `self` exactly.
    pub fn split(&self, axis: SplitAxis) -> (Viewport, Viewport) {
        match axis {
            SplitAxis::Horizontal => {
                let first = self.width / 2;
                (
                    Viewport { width: first, ..*self },
                    Viewport { x: self.x + first, width: self.width - first, ..*self },
                )
            }
            SplitAxis::Vertical => {
                let first = self.height / 2;
                (
                    Viewport { height: first, ..*self },
                    Viewport { y: self.y + first, height: self.height - first, ..*self },
                )
            }
        }
    }
}

/// Projection and view for one eye
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EyeCamera {
    pub projection: Mat4,
    pub view: Mat4,
    pub position: Vec3,
}

impl EyeCamera {
    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EyeDescriptor {
    pub eye: Eye,
    pub camera: EyeCamera,
    pub viewport: Viewport,
    pub window_size: (u32, u32),
}

/// Off-axis stereo camera: parallel eye axes with frustums sheared so that
/// the convergence plane has zero parallax.
#[derive(Clone, Debug, PartialEq)]
pub struct StereoCamera {
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub interocular: f32,
    pub convergence: f32,
}

impl StereoCamera {
    pub fn from_config(config: &StereoConfig) -> Self {
        Self {
            fov_y: config.fov_y_degrees.to_radians(),
            near: config.near,
            far: config.far,
            position: Vec3::from(config.eye),
            target: Vec3::from(config.target),
            up: Vec3::Y,
            interocular: config.interocular,
            convergence: config.convergence,
        }
    }

    /// Camera for `eye` drawing into a viewport of the given aspect ratio.
    pub fn camera(&self, eye: Eye, aspect: f32, orientation: ScreenOrientation) -> EyeCamera {
        let forward = (self.target - self.position).normalize_or(Vec3::NEG_Z);
        let right = forward.cross(self.up).normalize_or(Vec3::X);
        let up = right.cross(forward);

        let half_separation = self.interocular * 0.5 * eye.side();
        let position = self.position + right * half_separation;
        let view = Mat4::look_to_rh(position, forward, up);

        let aspect = if orientation.swaps_axes() { 1.0 / aspect } else { aspect };
        let top = self.near * (self.fov_y * 0.5).tan();
        let half_width = top * aspect;
        let shift = -half_separation * self.near / self.convergence;

        let projection = orientation.rotation()
            * off_axis_perspective(-half_width + shift, half_width + shift, -top, top, self.near, self.far);

        EyeCamera { projection, view, position }
    }
}

/// Right-handed frustum with a [0, 1] depth range.
pub fn off_axis_perspective(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let x_scale = 2.0 * near / (right - left);
    let y_scale = 2.0 * near / (top - bottom);
    let x_offset = (right + left) / (right - left);
    let y_offset = (top + bottom) / (top - bottom);
    let z_scale = far / (near - far);
    let z_offset = near * far / (near - far);

    Mat4::from_cols(
        Vec4::new(x_scale, 0.0, 0.0, 0.0),
        Vec4::new(0.0, y_scale, 0.0, 0.0),
        Vec4::new(x_offset, y_offset, z_scale, -1.0),
        Vec4::new(0.0, 0.0, z_offset, 0.0),
    )
}

/// All three eye descriptors plus which of them the current mode draws.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EyeLayout {
    pub stereo: bool,
    pub eyes: [EyeDescriptor; 3],
}

impl EyeLayout {
    pub fn descriptor(&self, eye: Eye) -> &EyeDescriptor {
        &self.eyes[eye.index()]
    }

    pub fn active(&self) -> &'static [Eye] {
        if self.stereo {
            &[Eye::Left, Eye::Right]
        } else {
            &[Eye::Mono]
        }
    }
}

pub struct EyeRig {
    camera: StereoCamera,
    split: SplitAxis,
    orientation: ScreenOrientation,
}

impl EyeRig {
    pub fn new(camera: StereoCamera, split: SplitAxis, orientation: ScreenOrientation) -> Self {
        Self { camera, split, orientation }
    }

    pub fn from_config(config: &StereoConfig) -> Self {
        Self::new(StereoCamera::from_config(config), config.split_axis, config.orientation)
    }

    /// Derive every eye descriptor for `window_size`. The left and right eyes
    /// are always derived so the layout is complete; `stereo` selects which
    /// eyes are drawn.
    pub fn recompute(&self, window_size: (u32, u32), stereo: bool) -> EyeLayout {
        let full = Viewport::full(window_size);
        let (left, right) = full.split(self.split);

        let describe = |eye: Eye, viewport: Viewport| EyeDescriptor {
            eye,
            camera: self.camera.camera(eye, viewport.aspect(), self.orientation),
            viewport,
            window_size,
        };

        EyeLayout {
            stereo,
            eyes: [
                describe(Eye::Mono, full),
                describe(Eye::Left, left),
                describe(Eye::Right, right),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rig(split: SplitAxis) -> EyeRig {
        EyeRig::from_config(&StereoConfig { split_axis: split, ..StereoConfig::default() })
    }

    #[test]
    fn mono_spans_full_window() {
        let layout = rig(SplitAxis::Horizontal).recompute((1280, 720), false);
        assert_eq!(layout.active(), &[Eye::Mono]);
        let mono = layout.descriptor(Eye::Mono);
        assert_eq!(mono.viewport, Viewport { x: 0, y: 0, width: 1280, height: 720 });
        assert_eq!(mono.window_size, (1280, 720));
    }

    #[test]
    fn stereo_halves_tile_the_window() {
        for axis in [SplitAxis::Horizontal, SplitAxis::Vertical] {
            for size in [(1280, 720), (1281, 721), (3, 1), (1, 1)] {
                let layout = rig(axis).recompute(size, true);
                let left = layout.descriptor(Eye::Left).viewport;
                let right = layout.descriptor(Eye::Right).viewport;
                assert!(left.intersection(&right).is_none(), "{axis:?} {size:?}");
                assert_eq!(left.area() + right.area(), Viewport::full(size).area());
                assert!(left.intersection(&Viewport::full(size)).map_or(left.is_empty(), |i| i == left));
                assert!(right.intersection(&Viewport::full(size)) == Some(right));
            }
        }
    }

    #[test]
    fn vertical_split_stacks_eyes() {
        let layout = rig(SplitAxis::Vertical).recompute((800, 600), true);
        assert_eq!(layout.descriptor(Eye::Left).viewport, Viewport { x: 0, y: 0, width: 800, height: 300 });
        assert_eq!(layout.descriptor(Eye::Right).viewport, Viewport { x: 0, y: 300, width: 800, height: 300 });
    }

    #[test]
    fn eyes_are_separated_by_interocular() {
        let layout = rig(SplitAxis::Horizontal).recompute((1280, 720), true);
        let left = layout.descriptor(Eye::Left).camera.position;
        let right = layout.descriptor(Eye::Right).camera.position;
        let mono = layout.descriptor(Eye::Mono).camera.position;
        assert!((right.distance(left) - 0.063).abs() < 1e-6);
        assert!(left.x < mono.x && mono.x < right.x);
        assert_eq!(mono, Vec3::new(0.0, 0.0, 3.0));
    }

    #[test]
    fn convergence_plane_has_zero_parallax() {
        let layout = rig(SplitAxis::Horizontal).recompute((1280, 720), true);
        // Default camera sits at z = 3 looking at the origin with convergence 3.
        let point = Vec4::new(0.0, 0.0, 0.0, 1.0);
        for eye in [Eye::Left, Eye::Right] {
            let clip = layout.descriptor(eye).camera.view_proj() * point;
            assert!((clip.x / clip.w).abs() < 1e-5, "{eye:?}");
        }
    }

    #[test]
    fn recompute_is_deterministic() {
        let rig = rig(SplitAxis::Horizontal);
        let before = rig.recompute((1024, 768), true);
        let _ = rig.recompute((300, 200), true);
        assert_eq!(rig.recompute((1024, 768), true), before);
    }

    #[test]
    fn landscape_orientation_swaps_aspect() {
        let config = StereoConfig { orientation: ScreenOrientation::LandscapeLeft, ..StereoConfig::default() };
        let rotated = EyeRig::from_config(&config).recompute((720, 1280), false);
        let upright = rig(SplitAxis::Horizontal).recompute((1280, 720), false);
        let expected = ScreenOrientation::LandscapeLeft.rotation() * upright.eyes[0].camera.projection;
        let actual = rotated.eyes[0].camera.projection;
        assert!(actual.abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn off_axis_matches_symmetric_perspective() {
        let top = 0.1 * (0.5f32).tan();
        let ours = off_axis_perspective(-top * 1.5, top * 1.5, -top, top, 0.1, 100.0);
        let glam = Mat4::perspective_rh(1.0, 1.5, 0.1, 100.0);
        assert!(ours.abs_diff_eq(glam, 1e-5));
    }
}
