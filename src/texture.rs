//! GPU textures owned by the render thread: the live video texture, depth
//! buffers and the off-screen eye composite.

use log::info;

use crate::video::FrameImage;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const VIDEO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// What to do with the video texture this frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadAction {
    /// No new frame: keep the current texture and binding
    Skip,
    /// First frame, or the frame size changed
    Create,
    /// Rewrite the existing texture in place
    Update,
}

/// Bookkeeping behind the video texture, independent of the device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadState {
    size: Option<(u32, u32)>,
    /// Bumped whenever the texture (and so its binding) is replaced
    generation: u64,
    uploads: u64,
}

impl UploadState {
    pub fn plan(&mut self, frame_size: Option<(u32, u32)>) -> UploadAction {
        let Some(frame_size) = frame_size else {
            return UploadAction::Skip;
        };

        self.uploads += 1;
        if self.size == Some(frame_size) {
            UploadAction::Update
        } else {
            self.size = Some(frame_size);
            self.generation += 1;
            UploadAction::Create
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }
}

pub struct GpuVideoTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub bind_group: wgpu::BindGroup,
}

/// The single texture holding the newest camera frame.
#[derive(Default)]
pub struct VideoTexture {
    state: UploadState,
    gpu: Option<GpuVideoTexture>,
}

impl VideoTexture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload `frame` if there is one; created lazily on the first frame.
    pub fn update(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        frame: Option<&FrameImage>,
    ) -> UploadAction {
        let action = self.state.plan(frame.map(FrameImage::size));
        let Some(frame) = frame else {
            return action;
        };

        if action == UploadAction::Create {
            info!("Creating video texture {}x{}", frame.width, frame.height);
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Video Texture"),
                size: wgpu::Extent3d { width: frame.width, height: frame.height, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: VIDEO_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Video Bind Group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&view) },
                    wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(sampler) },
                ],
            });
            self.gpu = Some(GpuVideoTexture { texture, view, bind_group });
        }

        if let Some(gpu) = &self.gpu {
            // Frames arrive top-down and stay that way; the plane's v axis points down.
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &gpu.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &frame.data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(frame.bytes_per_row()),
                    rows_per_image: Some(frame.height),
                },
                wgpu::Extent3d { width: frame.width, height: frame.height, depth_or_array_layers: 1 },
            );
        }
        action
    }

    pub fn gpu(&self) -> Option<&GpuVideoTexture> {
        self.gpu.as_ref()
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }
}

/// Depth buffer matching a colour target
pub struct DepthTarget {
    pub view: wgpu::TextureView,
    pub size: (u32, u32),
}

impl DepthTarget {
    pub fn new(device: &wgpu::Device, size: (u32, u32), label: &str) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d { width: size.0.max(1), height: size.1.max(1), depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { view, size }
    }
}

/// Colour + depth pair both eyes render into before distortion.
pub struct OffscreenTarget {
    pub color_view: wgpu::TextureView,
    pub depth: DepthTarget,
    pub size: (u32, u32),
    /// Distinguishes successive allocations so dependent bind groups get rebuilt
    pub generation: u64,
}

impl OffscreenTarget {
    pub fn new(device: &wgpu::Device, size: (u32, u32), format: wgpu::TextureFormat, generation: u64) -> Self {
        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Composite"),
            size: wgpu::Extent3d { width: size.0.max(1), height: size.1.max(1), depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        info!("Offscreen composite allocated at {}x{}", size.0, size.1);

        Self {
            color_view,
            depth: DepthTarget::new(device, size, "Offscreen Depth"),
            size,
            generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_creates_then_updates_in_place() {
        let mut state = UploadState::default();
        assert_eq!(state.plan(Some((640, 480))), UploadAction::Create);
        assert_eq!(state.plan(Some((640, 480))), UploadAction::Update);
        assert_eq!(state.plan(Some((640, 480))), UploadAction::Update);
        assert_eq!(state.generation(), 1);
        assert_eq!(state.uploads(), 3);
    }

    #[test]
    fn missing_frames_leave_binding_untouched() {
        let mut state = UploadState::default();
        state.plan(Some((320, 240)));
        let before = state.clone();
        for _ in 0..30 {
            assert_eq!(state.plan(None), UploadAction::Skip);
        }
        assert_eq!(state, before);
    }

    #[test]
    fn size_change_replaces_texture() {
        let mut state = UploadState::default();
        state.plan(Some((320, 240)));
        assert_eq!(state.plan(Some((640, 480))), UploadAction::Create);
        assert_eq!(state.generation(), 2);
        assert_eq!(state.size(), Some((640, 480)));
    }

    #[test]
    fn nothing_before_first_frame() {
        let mut state = UploadState::default();
        assert_eq!(state.plan(None), UploadAction::Skip);
        assert_eq!(state.size(), None);
        assert_eq!(state.generation(), 0);
    }
}
