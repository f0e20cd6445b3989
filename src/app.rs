//! Frame lifecycle
//!
//! `VrController` owns every pipeline component and is driven by the window
//! runner through the `FrameLifecycle` hooks. GPU state lives in `GpuRuntime`
//! and only exists between `initialize` and `teardown` (or an Android suspend).

use std::sync::Arc;

use glam::Mat4;
use log::{info, warn};
use winit::window::Window;

use crate::compositor::{CompositorTargets, StereoCompositor, StereoMode};
use crate::config::Config;
use crate::distortion::{DistortionCorrector, LensModel, NoDistortion, RadialDistortion};
use crate::error::MonetError;
use crate::eye_rig::EyeRig;
use crate::mesh_loader::AsyncModel;
use crate::renderer::GpuContext;
use crate::scene::{GpuMesh, GpuVideoPlane, SceneInputs, SceneRenderer};
use crate::sensors::MotionTracker;
use crate::texture::{UploadAction, VideoTexture};
use crate::video::{open_or_degrade, FrameImage, VideoSource};
use crate::video_mesh::VideoPlane;

/// Hooks the window runner calls, in this order: `initialize` once, then
/// `on_tick` + `on_render_requested` per frame with `on_resize` and
/// `on_toggle_stereo` in between, and `teardown` last.
pub trait FrameLifecycle {
    fn initialize(&mut self, window: Arc<Window>) -> Result<(), MonetError>;

    /// Poll sensors and capture, upload new data.
    fn on_tick(&mut self);

    fn on_render_requested(&mut self);

    fn on_resize(&mut self, width: u32, height: u32);

    fn on_toggle_stereo(&mut self);

    fn teardown(&mut self);
}

/// Builds the callback the mesh worker fires when it finishes, one per load.
pub type WakeFactory = Box<dyn Fn() -> Box<dyn FnOnce() + Send>>;

/// Everything tied to the GPU device
struct GpuRuntime {
    ctx: GpuContext,
    scene: SceneRenderer,
    distortion: DistortionCorrector,
    targets: CompositorTargets,
    video_texture: VideoTexture,
    plane: Option<GpuVideoPlane>,
}

pub struct VrController {
    config: Config,
    wake: Option<WakeFactory>,

    motion: MotionTracker,
    video: Option<VideoSource>,
    video_plane: VideoPlane,
    model: AsyncModel<GpuMesh>,
    show_model: bool,
    distortion_enabled: bool,

    compositor: Option<StereoCompositor>,
    runtime: Option<GpuRuntime>,
    rotation: Mat4,
}

impl VrController {
    pub fn new(config: Config, wake: Option<WakeFactory>) -> Self {
        let motion = MotionTracker::platform_default(&config.motion);
        let video = open_or_degrade(&config.capture);
        let video_plane = VideoPlane::new(config.capture.stride, config.capture.plane_height);

        Self {
            show_model: config.model.visible,
            distortion_enabled: config.distortion.enabled,
            wake,
            motion,
            video,
            video_plane,
            model: AsyncModel::empty(),
            compositor: None,
            runtime: None,
            rotation: Mat4::IDENTITY,
            config,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.runtime.is_some()
    }

    /// Newest unseen capture frame, and whether the plane mesh was rebuilt for it.
    fn poll_video(&mut self) -> (Option<Arc<FrameImage>>, bool) {
        let frame = self.video.as_ref().and_then(VideoSource::poll_frame);
        let rebuilt = frame.as_ref().is_some_and(|frame| self.video_plane.update(frame.size()).is_some());
        (frame, rebuilt)
    }

    pub fn toggle_distortion(&mut self) {
        self.distortion_enabled = !self.distortion_enabled;
        if let Some(runtime) = &mut self.runtime {
            runtime.distortion.toggle();
        }
    }

    pub fn toggle_model(&mut self) {
        self.show_model = !self.show_model;
        info!("Model visible: {}", self.show_model);
    }

    pub fn recenter(&mut self) {
        self.motion.recenter();
    }

    /// Release the GPU while keeping capture and tracking alive.
    pub fn suspend(&mut self) {
        info!("Releasing GPU resources");
        self.model.shutdown();
        self.runtime = None;
    }

    fn start_model_load(&mut self) {
        if self.model.is_loading() || self.model.get().is_some() {
            return;
        }
        let Some(path) = self.config.model.path.clone() else {
            return;
        };
        let notify = self.wake.as_ref().map(|make| make());
        self.model = AsyncModel::start(path, notify);
    }

    fn lens(&self) -> Box<dyn LensModel> {
        if self.config.distortion.k1 == 0.0 && self.config.distortion.k2 == 0.0 {
            Box::new(NoDistortion)
        } else {
            Box::new(RadialDistortion::from_config(&self.config.distortion))
        }
    }
}

impl FrameLifecycle for VrController {
    fn initialize(&mut self, window: Arc<Window>) -> Result<(), MonetError> {
        let ctx = pollster::block_on(GpuContext::new(window))?;
        let scene = SceneRenderer::new(&ctx.device, ctx.format())?;
        let split = self.config.stereo.split_axis;
        let distortion = DistortionCorrector::new(&ctx.device, ctx.format(), self.lens(), self.distortion_enabled, split)?;

        let size = ctx.size();
        match &mut self.compositor {
            Some(compositor) => compositor.resize(size),
            None => {
                let mode = if self.config.stereo.enabled { StereoMode::Stereo } else { StereoMode::Mono };
                self.compositor = Some(StereoCompositor::new(EyeRig::from_config(&self.config.stereo), size, mode));
            }
        }

        // A fresh device needs a fresh plane buffer for the current mesh.
        let plane = self.video_plane.mesh().map(|mesh| GpuVideoPlane::new(&ctx.device, mesh));

        self.runtime = Some(GpuRuntime {
            ctx,
            scene,
            distortion,
            targets: CompositorTargets::new(),
            video_texture: VideoTexture::new(),
            plane,
        });
        info!("Renderer initialized at {}x{}", size.0, size.1);

        self.start_model_load();
        Ok(())
    }

    fn on_tick(&mut self) {
        self.rotation = self.motion.sample();

        if self.runtime.is_none() {
            return;
        }
        let (frame, rebuilt) = self.poll_video();
        let Some(runtime) = &mut self.runtime else {
            return;
        };

        if let Some(mesh) = self.video_plane.mesh().filter(|_| rebuilt) {
            runtime.plane = Some(GpuVideoPlane::new(&runtime.ctx.device, mesh));
        }
        // An empty poll still goes through the texture so its binding is left untouched.
        let action = runtime.video_texture.update(
            &runtime.ctx.device,
            &runtime.ctx.queue,
            &runtime.scene.video_bind_group_layout,
            &runtime.scene.video_sampler,
            frame.as_deref(),
        );
        if action == UploadAction::Create {
            info!("Video texture bound (generation {})", runtime.video_texture.state().generation());
        }

        let device = &runtime.ctx.device;
        let placement = &self.config.model;
        self.model.poll(|cpu| GpuMesh::new(device, cpu, placement));
    }

    fn on_render_requested(&mut self) {
        let (Some(runtime), Some(compositor)) = (&mut self.runtime, &self.compositor) else {
            return;
        };
        let GpuRuntime { ctx, scene, distortion, targets, video_texture, plane } = runtime;

        let inputs = SceneInputs {
            video: video_texture.gpu(),
            plane: plane.as_ref(),
            rotation: self.rotation,
            model: self.model.get(),
            show_model: self.show_model,
        };
        targets.render(ctx, compositor, scene, distortion, &inputs);
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        let Some(runtime) = &mut self.runtime else {
            return;
        };
        if !runtime.ctx.resize(width, height) {
            warn!("Ignoring resize to {}x{}", width, height);
            return;
        }
        if let Some(compositor) = &mut self.compositor {
            compositor.resize((width, height));
        }
    }

    fn on_toggle_stereo(&mut self) {
        if let Some(compositor) = &mut self.compositor {
            compositor.toggle();
        }
    }

    fn teardown(&mut self) {
        info!("Tearing down");
        // The worker is joined before the GPU it would hand a mesh to goes away.
        self.model.shutdown();
        if let Some(video) = &mut self.video {
            video.stop();
        }
        self.runtime = None;
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::config::CaptureConfig;
    use crate::texture::UploadState;

    fn controller() -> VrController {
        let config = Config {
            capture: CaptureConfig { width: 16, height: 12, ..CaptureConfig::default() },
            ..Config::default()
        };
        VrController::new(config, None)
    }

    #[test]
    fn empty_polls_reach_the_upload_plan() {
        let mut c = controller();
        let mut upload = UploadState::default();

        let deadline = Instant::now() + Duration::from_secs(5);
        let (frame, rebuilt) = loop {
            let polled = c.poll_video();
            if polled.0.is_some() || Instant::now() > deadline {
                break polled;
            }
            thread::sleep(Duration::from_millis(2));
        };
        let frame = frame.expect("a frame within 5s");
        assert!(rebuilt);
        assert_eq!(upload.plan(Some(frame.size())), UploadAction::Create);
        let bound = upload.clone();

        c.teardown();
        let _ = c.poll_video();
        for _ in 0..10 {
            let (frame, rebuilt) = c.poll_video();
            assert!(frame.is_none());
            assert!(!rebuilt);
            assert_eq!(upload.plan(frame.as_deref().map(FrameImage::size)), UploadAction::Skip);
        }
        assert_eq!(upload, bound);
    }
}
