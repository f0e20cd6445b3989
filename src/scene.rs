//! Scene renderer
//!
//! Draws one eye: the video backdrop, the debug coordinate frame and colour
//! cube, then the head-tracked model. Each eye gets its own uniform buffer
//! and its own render pass, so no pipeline state carries over between eyes.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

use crate::config::ModelConfig;
use crate::error::RenderError;
use crate::eye_rig::{Eye, EyeDescriptor};
use crate::mesh_loader::CpuMesh;
use crate::renderer::validated_shader;
use crate::texture::{GpuVideoTexture, DEPTH_FORMAT};
use crate::video_mesh::{PlaneVertex, VideoPlaneMesh};

/// Per-eye uniforms, mirrors `Eye` in `shaders/scene.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct EyeUniforms {
    view_proj: [[f32; 4]; 4],
    rotation: [[f32; 4]; 4],
    model: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl ColorVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<ColorVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl MeshVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Unit-length X (red), Y (green) and Z (blue) axes as a line list.
pub fn coordinate_frame(length: f32) -> Vec<ColorVertex> {
    [(Vec3::X, [1.0, 0.0, 0.0]), (Vec3::Y, [0.0, 1.0, 0.0]), (Vec3::Z, [0.0, 0.0, 1.0])]
        .into_iter()
        .flat_map(|(axis, color)| {
            [
                ColorVertex { position: [0.0; 3], color },
                ColorVertex { position: (axis * length).to_array(), color },
            ]
        })
        .collect()
}

/// Cube of edge `size` centred on the origin, one colour per face,
/// counter-clockwise seen from outside.
pub fn color_cube(size: f32) -> Vec<ColorVertex> {
    let h = size * 0.5;
    let faces = [
        (Vec3::X, Vec3::Y, Vec3::Z, [1.0, 0.0, 0.0]),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y, [0.0, 1.0, 1.0]),
        (Vec3::Y, Vec3::Z, Vec3::X, [0.0, 1.0, 0.0]),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z, [1.0, 0.0, 1.0]),
        (Vec3::Z, Vec3::X, Vec3::Y, [0.0, 0.0, 1.0]),
        (Vec3::NEG_Z, Vec3::Y, Vec3::X, [1.0, 1.0, 0.0]),
    ];

    let mut vertices = Vec::with_capacity(36);
    for (normal, u, v, color) in faces {
        let c = normal * h;
        let corner = |su: f32, sv: f32| ColorVertex { position: (c + u * h * su + v * h * sv).to_array(), color };
        vertices.extend_from_slice(&[
            corner(-1.0, -1.0),
            corner(1.0, -1.0),
            corner(1.0, 1.0),
            corner(-1.0, -1.0),
            corner(1.0, 1.0),
            corner(-1.0, 1.0),
        ]);
    }
    vertices
}

/// Fixed placement of the model: normalised to `scale` and moved to `offset`.
pub fn model_matrix(mesh_center: Vec3, mesh_size: f32, config: &ModelConfig) -> Mat4 {
    let normalise = if mesh_size > 0.0 { config.scale / mesh_size } else { config.scale };
    Mat4::from_translation(Vec3::from(config.offset))
        * Mat4::from_scale(Vec3::splat(normalise))
        * Mat4::from_translation(-mesh_center)
}

/// Video-plane buffers on the GPU
pub struct GpuVideoPlane {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

impl GpuVideoPlane {
    pub fn new(device: &wgpu::Device, mesh: &VideoPlaneMesh) -> Self {
        Self {
            vertex_buffer: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Video Plane Vertices"),
                contents: bytemuck::cast_slice(&mesh.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            }),
            index_buffer: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Video Plane Indices"),
                contents: bytemuck::cast_slice(&mesh.indices),
                usage: wgpu::BufferUsages::INDEX,
            }),
            index_count: mesh.indices.len() as u32,
        }
    }
}

/// The loaded model, resident on the GPU
pub struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    pub model: Mat4,
}

impl GpuMesh {
    /// Must run on the thread that owns the device.
    pub fn new(device: &wgpu::Device, mesh: &CpuMesh, placement: &ModelConfig) -> Self {
        let vertices: Vec<MeshVertex> = mesh
            .positions
            .iter()
            .zip(&mesh.normals)
            .map(|(p, n)| MeshVertex { position: *p, normal: *n })
            .collect();

        Self {
            vertex_buffer: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Model Vertices"),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            }),
            index_buffer: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Model Indices"),
                contents: bytemuck::cast_slice(&mesh.indices),
                usage: wgpu::BufferUsages::INDEX,
            }),
            index_count: mesh.indices.len() as u32,
            model: model_matrix(mesh.center(), mesh.size(), placement),
        }
    }
}

/// Everything one eye pass reads besides the eye itself
pub struct SceneInputs<'a> {
    pub video: Option<&'a GpuVideoTexture>,
    pub plane: Option<&'a GpuVideoPlane>,
    pub rotation: Mat4,
    pub model: Option<&'a GpuMesh>,
    pub show_model: bool,
}

/// Colour and depth views an eye pass draws into
pub struct EyeTarget<'a> {
    pub color: &'a wgpu::TextureView,
    pub depth: &'a wgpu::TextureView,
}

pub struct SceneRenderer {
    video_pipeline: wgpu::RenderPipeline,
    line_pipeline: wgpu::RenderPipeline,
    cube_pipeline: wgpu::RenderPipeline,
    mesh_pipeline: wgpu::RenderPipeline,

    eye_buffers: [wgpu::Buffer; 3],
    eye_bind_groups: [wgpu::BindGroup; 3],

    pub video_bind_group_layout: wgpu::BindGroupLayout,
    pub video_sampler: wgpu::Sampler,

    axes: wgpu::Buffer,
    axes_count: u32,
    cube: wgpu::Buffer,
    cube_count: u32,
}

impl SceneRenderer {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Result<Self, RenderError> {
        let shader = validated_shader(device, "Scene Shader", include_str!("shaders/scene.wgsl"))?;

        let eye_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Eye Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let eye_buffers = Eye::ALL.map(|eye| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(match eye {
                    Eye::Mono => "Mono Eye Buffer",
                    Eye::Left => "Left Eye Buffer",
                    Eye::Right => "Right Eye Buffer",
                }),
                size: std::mem::size_of::<EyeUniforms>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        let eye_bind_groups = [0, 1, 2].map(|i| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Eye Bind Group"),
                layout: &eye_bind_group_layout,
                entries: &[wgpu::BindGroupEntry { binding: 0, resource: eye_buffers[i].as_entire_binding() }],
            })
        });

        let video_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Video Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let video_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Video Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let video_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Video Pipeline Layout"),
            bind_group_layouts: &[&eye_bind_group_layout, &video_bind_group_layout],
            push_constant_ranges: &[],
        });
        let scene_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Scene Pipeline Layout"),
            bind_group_layouts: &[&eye_bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |label: &str,
                        layout: &wgpu::PipelineLayout,
                        entry: (&str, &str),
                        vertex: wgpu::VertexBufferLayout<'static>,
                        topology: wgpu::PrimitiveTopology,
                        cull_mode: Option<wgpu::Face>,
                        depth: (bool, wgpu::CompareFunction)| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some(entry.0),
                    buffers: &[vertex],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(entry.1),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: depth.0,
                    depth_compare: depth.1,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        // The backdrop neither writes nor tests depth.
        let video_pipeline = pipeline(
            "Video Plane Pipeline",
            &video_layout,
            ("vs_video", "fs_video"),
            PlaneVertex::layout(),
            wgpu::PrimitiveTopology::TriangleList,
            Some(wgpu::Face::Back),
            (false, wgpu::CompareFunction::Always),
        );
        let line_pipeline = pipeline(
            "Axes Pipeline",
            &scene_layout,
            ("vs_color", "fs_color"),
            ColorVertex::layout(),
            wgpu::PrimitiveTopology::LineList,
            None,
            (true, wgpu::CompareFunction::Less),
        );
        let cube_pipeline = pipeline(
            "Color Cube Pipeline",
            &scene_layout,
            ("vs_color", "fs_color"),
            ColorVertex::layout(),
            wgpu::PrimitiveTopology::TriangleList,
            Some(wgpu::Face::Back),
            (true, wgpu::CompareFunction::Less),
        );
        let mesh_pipeline = pipeline(
            "Model Pipeline",
            &scene_layout,
            ("vs_mesh", "fs_mesh"),
            MeshVertex::layout(),
            wgpu::PrimitiveTopology::TriangleList,
            None,
            (true, wgpu::CompareFunction::Less),
        );

        let axes_vertices = coordinate_frame(1.0);
        let cube_vertices = color_cube(0.3);

        Ok(Self {
            video_pipeline,
            line_pipeline,
            cube_pipeline,
            mesh_pipeline,
            eye_buffers,
            eye_bind_groups,
            video_bind_group_layout,
            video_sampler,
            axes: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Axes Vertices"),
                contents: bytemuck::cast_slice(&axes_vertices),
                usage: wgpu::BufferUsages::VERTEX,
            }),
            axes_count: axes_vertices.len() as u32,
            cube: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Color Cube Vertices"),
                contents: bytemuck::cast_slice(&cube_vertices),
                usage: wgpu::BufferUsages::VERTEX,
            }),
            cube_count: cube_vertices.len() as u32,
        })
    }

    /// Encode one eye pass into `target`, loading what earlier passes left there.
    pub fn render_eye(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &EyeTarget<'_>,
        eye: &EyeDescriptor,
        inputs: &SceneInputs<'_>,
    ) {
        let viewport = eye.viewport;
        if viewport.is_empty() {
            return;
        }

        let slot = eye.eye.index();
        let uniforms = EyeUniforms {
            view_proj: eye.camera.view_proj().to_cols_array_2d(),
            rotation: inputs.rotation.to_cols_array_2d(),
            model: inputs.model.map_or(Mat4::IDENTITY, |m| m.model).to_cols_array_2d(),
        };
        queue.write_buffer(&self.eye_buffers[slot], 0, bytemuck::bytes_of(&uniforms));

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Eye Render Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.color,
                resolve_target: None,
                ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: target.depth,
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_viewport(
            viewport.x as f32,
            viewport.y as f32,
            viewport.width as f32,
            viewport.height as f32,
            0.0,
            1.0,
        );
        render_pass.set_scissor_rect(viewport.x, viewport.y, viewport.width, viewport.height);
        render_pass.set_bind_group(0, &self.eye_bind_groups[slot], &[]);

        // 1. Video backdrop, only once a frame has arrived
        if let (Some(video), Some(plane)) = (inputs.video, inputs.plane) {
            if plane.index_count > 0 {
                render_pass.set_pipeline(&self.video_pipeline);
                render_pass.set_bind_group(1, &video.bind_group, &[]);
                render_pass.set_vertex_buffer(0, plane.vertex_buffer.slice(..));
                render_pass.set_index_buffer(plane.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..plane.index_count, 0, 0..1);
            }
        }

        // 2. Debug geometry with depth test and write
        render_pass.set_pipeline(&self.line_pipeline);
        render_pass.set_vertex_buffer(0, self.axes.slice(..));
        render_pass.draw(0..self.axes_count, 0..1);

        render_pass.set_pipeline(&self.cube_pipeline);
        render_pass.set_vertex_buffer(0, self.cube.slice(..));
        render_pass.draw(0..self.cube_count, 0..1);

        // 3. Head-tracked model once loaded
        if let Some(model) = inputs.model.filter(|_| inputs.show_model) {
            render_pass.set_pipeline(&self.mesh_pipeline);
            render_pass.set_vertex_buffer(0, model.vertex_buffer.slice(..));
            render_pass.set_index_buffer(model.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.draw_indexed(0..model.index_count, 0, 0..1);
        }
    }
}
