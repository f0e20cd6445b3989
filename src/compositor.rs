//! Stereo compositor
//!
//! Two states, `Mono` and `Stereo`. Mono draws the single eye straight to the
//! surface. Stereo draws both eyes into an off-screen composite and then
//! warps that composite onto the surface through the distortion corrector.

use log::info;

use crate::distortion::DistortionCorrector;
use crate::eye_rig::{Eye, EyeLayout, EyeRig, Viewport};
use crate::renderer::GpuContext;
use crate::scene::{EyeTarget, SceneInputs, SceneRenderer};
use crate::texture::{DepthTarget, OffscreenTarget};

const CLEAR_COLOR: wgpu::Color = wgpu::Color { r: 0.05, g: 0.05, b: 0.08, a: 1.0 };

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StereoMode {
    Mono,
    Stereo,
}

impl StereoMode {
    pub fn toggled(self) -> Self {
        match self {
            StereoMode::Mono => StereoMode::Stereo,
            StereoMode::Stereo => StereoMode::Mono,
        }
    }
}

/// Where the eye passes of a frame draw
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassTarget {
    Surface,
    Offscreen,
}

/// Pass sequence for one frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramePlan {
    pub target: PassTarget,
    pub eyes: &'static [Eye],
    /// Composite goes through the distortion corrector afterwards
    pub distort: bool,
}

/// Mode, eye layout and the size the off-screen composite should have.
/// Holds no GPU objects.
pub struct StereoCompositor {
    mode: StereoMode,
    rig: EyeRig,
    window_size: (u32, u32),
    layout: EyeLayout,
    /// Off-screen composite size, if one should exist
    offscreen: Option<(u32, u32)>,
}

impl StereoCompositor {
    pub fn new(rig: EyeRig, window_size: (u32, u32), mode: StereoMode) -> Self {
        let stereo = mode == StereoMode::Stereo;
        Self {
            mode,
            layout: rig.recompute(window_size, stereo),
            rig,
            window_size,
            offscreen: stereo.then_some(window_size),
        }
    }

    pub fn mode(&self) -> StereoMode {
        self.mode
    }

    pub fn is_stereo(&self) -> bool {
        self.mode == StereoMode::Stereo
    }

    pub fn layout(&self) -> &EyeLayout {
        &self.layout
    }

    /// Required off-screen composite size, `None` when it should not exist.
    pub fn offscreen_size(&self) -> Option<(u32, u32)> {
        self.offscreen
    }

    /// Flip between mono and stereo and re-derive the eye layout.
    pub fn toggle(&mut self) -> StereoMode {
        self.mode = self.mode.toggled();
        let stereo = self.is_stereo();
        self.layout = self.rig.recompute(self.window_size, stereo);
        // The composite outlives a switch back to mono until the next resize.
        if stereo {
            self.offscreen = Some(self.window_size);
        }
        info!("Stereo mode: {:?}", self.mode);
        self.mode
    }

    /// Re-derive eye geometry for a new window size. The mode is unchanged.
    pub fn resize(&mut self, window_size: (u32, u32)) {
        self.window_size = window_size;
        self.layout = self.rig.recompute(window_size, self.is_stereo());
        self.offscreen = self.is_stereo().then_some(window_size);
        info!("Eye layout recomputed for {}x{}", window_size.0, window_size.1);
    }

    pub fn plan(&self) -> FramePlan {
        match self.mode {
            StereoMode::Mono => FramePlan { target: PassTarget::Surface, eyes: &[Eye::Mono], distort: false },
            StereoMode::Stereo => {
                FramePlan { target: PassTarget::Offscreen, eyes: &[Eye::Left, Eye::Right], distort: true }
            }
        }
    }
}

/// GPU attachments the compositor draws into, kept in step with a
/// `StereoCompositor` by `sync`.
#[derive(Default)]
pub struct CompositorTargets {
    surface_depth: Option<DepthTarget>,
    offscreen: Option<OffscreenTarget>,
    generation: u64,
}

impl CompositorTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate, resize or free attachments so they match `compositor`.
    pub fn sync(&mut self, ctx: &GpuContext, compositor: &StereoCompositor) {
        let surface_size = ctx.size();
        if self.surface_depth.as_ref().map(|d| d.size) != Some(surface_size) {
            self.surface_depth = Some(DepthTarget::new(&ctx.device, surface_size, "Surface Depth"));
        }

        match compositor.offscreen_size() {
            Some(size) if self.offscreen.as_ref().map(|t| t.size) != Some(size) => {
                self.generation += 1;
                self.offscreen = Some(OffscreenTarget::new(&ctx.device, size, ctx.format(), self.generation));
            }
            Some(_) => {}
            None => {
                if self.offscreen.take().is_some() {
                    info!("Offscreen composite released");
                }
            }
        }
    }

    /// Encode and present one frame.
    pub fn render(
        &mut self,
        ctx: &GpuContext,
        compositor: &StereoCompositor,
        scene: &SceneRenderer,
        distortion: &mut DistortionCorrector,
        inputs: &SceneInputs<'_>,
    ) {
        self.sync(ctx, compositor);

        let Some(output) = ctx.acquire() else {
            return;
        };
        let surface_view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });

        let plan = compositor.plan();
        let target = match (plan.target, &self.offscreen, &self.surface_depth) {
            (PassTarget::Offscreen, Some(offscreen), _) => {
                Some(EyeTarget { color: &offscreen.color_view, depth: &offscreen.depth.view })
            }
            (PassTarget::Surface, _, Some(depth)) => Some(EyeTarget { color: &surface_view, depth: &depth.view }),
            _ => None,
        };

        if let Some(target) = target {
            clear(&mut encoder, &target);
            for &eye in plan.eyes {
                scene.render_eye(&ctx.queue, &mut encoder, &target, compositor.layout().descriptor(eye), inputs);
            }
        }

        if plan.distort {
            if let Some(offscreen) = &self.offscreen {
                distortion.render(
                    &ctx.device,
                    &ctx.queue,
                    &mut encoder,
                    (&offscreen.color_view, offscreen.generation),
                    &surface_view,
                    Viewport::full(ctx.size()),
                );
            }
        }

        ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
    }
}

fn clear(encoder: &mut wgpu::CommandEncoder, target: &EyeTarget<'_>) {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Clear Pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target.color,
            resolve_target: None,
            ops: wgpu::Operations { load: wgpu::LoadOp::Clear(CLEAR_COLOR), store: wgpu::StoreOp::Store },
        })],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: target.depth,
            depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StereoConfig;

    fn compositor(mode: StereoMode) -> StereoCompositor {
        StereoCompositor::new(EyeRig::from_config(&StereoConfig::default()), (1280, 720), mode)
    }

    #[test]
    fn double_toggle_restores_state() {
        for start in [StereoMode::Mono, StereoMode::Stereo] {
            let mut c = compositor(start);
            let layout = *c.layout();
            c.toggle();
            assert_ne!(c.mode(), start);
            c.toggle();
            assert_eq!(c.mode(), start);
            assert_eq!(*c.layout(), layout);
        }
    }

    #[test]
    fn resize_round_trip_is_exact() {
        let mut c = compositor(StereoMode::Stereo);
        let before = *c.layout();
        c.resize((333, 777));
        assert_eq!(c.layout().descriptor(Eye::Left).window_size, (333, 777));
        c.resize((1280, 720));
        assert_eq!(*c.layout(), before);
        assert_eq!(c.mode(), StereoMode::Stereo);
    }

    #[test]
    fn plan_follows_mode() {
        let mut c = compositor(StereoMode::Mono);
        assert_eq!(c.plan(), FramePlan { target: PassTarget::Surface, eyes: &[Eye::Mono], distort: false });
        c.toggle();
        let plan = c.plan();
        assert_eq!(plan.target, PassTarget::Offscreen);
        assert_eq!(plan.eyes, &[Eye::Left, Eye::Right]);
        assert!(plan.distort);
    }

    #[test]
    fn offscreen_tracks_window_while_stereo() {
        let mut c = compositor(StereoMode::Mono);
        assert_eq!(c.offscreen_size(), None);

        c.toggle();
        assert_eq!(c.offscreen_size(), Some((1280, 720)));
        c.resize((800, 600));
        assert_eq!(c.offscreen_size(), Some((800, 600)));

        // Back to mono keeps the composite until the next resize.
        c.toggle();
        assert_eq!(c.offscreen_size(), Some((800, 600)));
        c.resize((640, 480));
        assert_eq!(c.offscreen_size(), None);
    }

    #[test]
    fn resize_keeps_mode() {
        let mut c = compositor(StereoMode::Mono);
        c.resize((100, 50));
        assert_eq!(c.mode(), StereoMode::Mono);
        assert_eq!(c.layout().active(), &[Eye::Mono]);
        assert_eq!(c.layout().descriptor(Eye::Mono).viewport, Viewport::full((100, 50)));
    }
}
