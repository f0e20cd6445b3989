//! Lens distortion correction
//!
//! Post-process pass that warps the two-eye composite into the visible
//! framebuffer. Each eye half is warped around its own lens centre with a
//! radial polynomial; the identity model turns the pass into a plain blit.

use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use log::info;

use crate::config::DistortionConfig;
use crate::eye_rig::{SplitAxis, Viewport};
use crate::renderer::validated_shader;
use crate::error::RenderError;

/// Mirrors `Distortion` in `shaders/distortion.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DistortionUniforms {
    pub k1: f32,
    pub k2: f32,
    pub scale_factor: f32,
    pub lens_center_offset: f32,
    /// 0 = side by side, 1 = over/under
    pub split_axis: u32,
    pub _padding: [u32; 3],
}

impl DistortionUniforms {
    pub fn identity(split: SplitAxis) -> Self {
        Self {
            k1: 0.0,
            k2: 0.0,
            scale_factor: 1.0,
            lens_center_offset: 0.0,
            split_axis: split_index(split),
            _padding: [0; 3],
        }
    }
}

fn split_index(split: SplitAxis) -> u32 {
    match split {
        SplitAxis::Horizontal => 0,
        SplitAxis::Vertical => 1,
    }
}

/// A way of mapping screen pixels back into the eye composite.
pub trait LensModel: Send {
    fn name(&self) -> &'static str;

    fn uniforms(&self, split: SplitAxis) -> DistortionUniforms;
}

/// Straight copy of each eye half, for viewing without a headset.
pub struct NoDistortion;

impl LensModel for NoDistortion {
    fn name(&self) -> &'static str {
        "none"
    }

    fn uniforms(&self, split: SplitAxis) -> DistortionUniforms {
        DistortionUniforms::identity(split)
    }
}

/// Barrel warp `r' = r (1 + k1 r^2 + k2 r^4)`, rescaled so the lens rim maps onto itself.
#[derive(Clone, Debug, PartialEq)]
pub struct RadialDistortion {
    pub k1: f32,
    pub k2: f32,
    pub lens_radius: f32,
    pub lens_center_offset: f32,
}

impl RadialDistortion {
    pub fn from_config(config: &DistortionConfig) -> Self {
        Self {
            k1: config.k1,
            k2: config.k2,
            lens_radius: config.lens_radius,
            lens_center_offset: config.lens_center_offset,
        }
    }

    fn factor(&self, r2: f32) -> f32 {
        1.0 + self.k1 * r2 + self.k2 * r2 * r2
    }
}

impl LensModel for RadialDistortion {
    fn name(&self) -> &'static str {
        "radial"
    }

    fn uniforms(&self, split: SplitAxis) -> DistortionUniforms {
        // Past a radius of 1 the rim would leave the eye half entirely.
        let r = self.lens_radius.min(1.0);
        DistortionUniforms {
            k1: self.k1,
            k2: self.k2,
            scale_factor: 1.0 / self.factor(r * r),
            lens_center_offset: self.lens_center_offset,
            split_axis: split_index(split),
            _padding: [0; 3],
        }
    }
}

/// CPU twin of `fs_main`: where in the composite (normalised coordinates)
/// the destination point `dest_uv` samples from, or `None` if it falls
/// outside its eye's half.
pub fn composite_source_uv(u: &DistortionUniforms, dest_uv: Vec2) -> Option<Vec2> {
    let vertical = u.split_axis == 1;
    let along = if vertical { dest_uv.y } else { dest_uv.x };
    let right_eye = along >= 0.5;
    let side = if right_eye { 1.0 } else { -1.0 };

    let mut local = dest_uv;
    let half_coord = along * 2.0 - if right_eye { 1.0 } else { 0.0 };
    if vertical {
        local.y = half_coord;
    } else {
        local.x = half_coord;
    }

    // Lens centres move apart along the axis the eyes are split on.
    let shift = side * u.lens_center_offset;
    let center = if vertical { Vec2::new(0.0, shift) } else { Vec2::new(shift, 0.0) };
    let p = local * 2.0 - Vec2::ONE - center;
    let r2 = p.length_squared();
    let f = 1.0 + u.k1 * r2 + u.k2 * r2 * r2;
    let q = p * f * u.scale_factor + center;
    let src_local = (q + Vec2::ONE) * 0.5;

    if src_local.cmplt(Vec2::ZERO).any() || src_local.cmpgt(Vec2::ONE).any() {
        return None;
    }

    let offset = if right_eye { 0.5 } else { 0.0 };
    Some(if vertical {
        Vec2::new(src_local.x, src_local.y * 0.5 + offset)
    } else {
        Vec2::new(src_local.x * 0.5 + offset, src_local.y)
    })
}

/// GPU side of the distortion pass
pub struct DistortionCorrector {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    /// Bind group for the current composite, tagged with its generation
    bind_group: Option<(u64, wgpu::BindGroup)>,

    lens: Box<dyn LensModel>,
    passthrough: NoDistortion,
    enabled: bool,
    split: SplitAxis,
}

impl DistortionCorrector {
    pub fn new(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        lens: Box<dyn LensModel>,
        enabled: bool,
        split: SplitAxis,
    ) -> Result<Self, RenderError> {
        let shader = validated_shader(device, "Distortion Shader", include_str!("shaders/distortion.wgsl"))?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Composite Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Distortion Buffer"),
            size: std::mem::size_of::<DistortionUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Distortion Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Distortion Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        // Pure 2D warp: no depth attachment, no depth test.
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Distortion Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        info!("Distortion corrector ready (model '{}', enabled: {})", lens.name(), enabled);

        Ok(Self {
            pipeline,
            bind_group_layout,
            sampler,
            uniform_buffer,
            bind_group: None,
            lens,
            passthrough: NoDistortion,
            enabled,
            split,
        })
    }

    pub fn toggle(&mut self) {
        self.enabled = !self.enabled;
        info!("Lens distortion: {}", if self.enabled { self.lens.name() } else { self.passthrough.name() });
    }

    /// Uniforms for the active model
    pub fn uniforms(&self) -> DistortionUniforms {
        if self.enabled {
            self.lens.uniforms(self.split)
        } else {
            self.passthrough.uniforms(self.split)
        }
    }

    /// Warp `source` (the composite, tagged by `generation`) into `dest_bounds` of `dest`.
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        source: (&wgpu::TextureView, u64),
        dest: &wgpu::TextureView,
        dest_bounds: Viewport,
    ) {
        if dest_bounds.is_empty() {
            return;
        }

        let (source_view, generation) = source;
        if self.bind_group.as_ref().map(|(g, _)| *g) != Some(generation) {
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Distortion Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(source_view) },
                    wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                    wgpu::BindGroupEntry { binding: 2, resource: self.uniform_buffer.as_entire_binding() },
                ],
            });
            self.bind_group = Some((generation, bind_group));
        }
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&self.uniforms()));

        let Some((_, bind_group)) = &self.bind_group else {
            return;
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Distortion Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: dest,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_viewport(
            dest_bounds.x as f32,
            dest_bounds.y as f32,
            dest_bounds.width as f32,
            dest_bounds.height as f32,
            0.0,
            1.0,
        );
        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.draw(0..6, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radial() -> RadialDistortion {
        RadialDistortion::from_config(&DistortionConfig::default())
    }

    fn grid() -> impl Iterator<Item = Vec2> {
        (0..=20).flat_map(|i| (0..=20).map(move |j| Vec2::new(i as f32 / 20.0, j as f32 / 20.0)))
    }

    #[test]
    fn identity_model_is_a_blit() {
        for split in [SplitAxis::Horizontal, SplitAxis::Vertical] {
            let u = NoDistortion.uniforms(split);
            for uv in grid() {
                let src = composite_source_uv(&u, uv).unwrap();
                assert!((src - uv).length() < 1e-5, "{split:?} {uv} -> {src}");
            }
        }
    }

    #[test]
    fn lens_centres_are_fixed_points() {
        let u = radial().uniforms(SplitAxis::Horizontal);
        let left = composite_source_uv(&u, Vec2::new(0.25, 0.5)).unwrap();
        let right = composite_source_uv(&u, Vec2::new(0.75, 0.5)).unwrap();
        assert!((left - Vec2::new(0.25, 0.5)).length() < 1e-5);
        assert!((right - Vec2::new(0.75, 0.5)).length() < 1e-5);
    }

    #[test]
    fn lens_rim_maps_onto_itself() {
        // Just inside unit radius along the eye's x axis, next to the edge of the half.
        let u = radial().uniforms(SplitAxis::Horizontal);
        let rim = composite_source_uv(&u, Vec2::new(0.001, 0.5)).unwrap();
        assert!((rim - Vec2::new(0.001, 0.5)).length() < 1e-3);
    }

    #[test]
    fn interior_is_pulled_towards_lens_centre() {
        let u = radial().uniforms(SplitAxis::Horizontal);
        let dest = Vec2::new(0.4, 0.5);
        let src = composite_source_uv(&u, dest).unwrap();
        assert!((src.x - 0.25).abs() < (dest.x - 0.25).abs());
    }

    #[test]
    fn eye_halves_never_bleed() {
        for split in [SplitAxis::Horizontal, SplitAxis::Vertical] {
            let u = RadialDistortion { lens_center_offset: 0.1, ..radial() }.uniforms(split);
            for uv in grid() {
                let along = |v: Vec2| if split == SplitAxis::Vertical { v.y } else { v.x };
                if let Some(src) = composite_source_uv(&u, uv) {
                    assert_eq!(along(src) >= 0.5, along(uv) >= 0.5, "{split:?} {uv} -> {src}");
                }
            }
        }
    }

    #[test]
    fn eyes_are_mirror_images() {
        let u = RadialDistortion { lens_center_offset: 0.05, ..radial() }.uniforms(SplitAxis::Horizontal);
        let left = composite_source_uv(&u, Vec2::new(0.1, 0.3)).unwrap();
        let right = composite_source_uv(&u, Vec2::new(0.9, 0.3)).unwrap();
        assert!((left.x - (1.0 - right.x)).abs() < 1e-5);
        assert!((left.y - right.y).abs() < 1e-5);
    }

    #[test]
    fn vertical_lens_centres_shift_along_split() {
        let u = RadialDistortion { lens_center_offset: 0.2, ..radial() }.uniforms(SplitAxis::Vertical);
        // 0.2 in lens space is 0.1 of an eye half, 0.05 of the composite.
        for centre in [Vec2::new(0.5, 0.2), Vec2::new(0.5, 0.8)] {
            let src = composite_source_uv(&u, centre).unwrap();
            assert!((src - centre).length() < 1e-5, "{centre} -> {src}");
        }
        let off_axis = Vec2::new(0.4, 0.2);
        assert!((composite_source_uv(&u, off_axis).unwrap() - off_axis).length() > 1e-3);
    }

    #[test]
    fn uniforms_are_std140_sized() {
        assert_eq!(std::mem::size_of::<DistortionUniforms>(), 32);
    }
}
