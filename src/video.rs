//! Video source
//!
//! A capture thread produces RGBA frames into a single-slot mailbox; the
//! render thread polls it once per frame. Slow consumers see only the newest
//! frame, intermediate frames are dropped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::config::CaptureConfig;
use crate::error::VideoError;

/// Immutable RGBA8 image, rows stored top-down.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Capture order, starting at 1
    pub sequence: u64,
}

impl FrameImage {
    pub const COMPONENTS: u32 = 4;

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn bytes_per_row(&self) -> u32 {
        self.width * Self::COMPONENTS
    }
}

/// Latest-frame mailbox shared by one producer and one consumer.
pub struct FrameSlot {
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    latest: Option<Arc<FrameImage>>,
    published: u64,
    /// Sequence of the last frame handed to the consumer
    delivered: u64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self { state: Mutex::new(SlotState::default()) }
    }

    /// Replace the current frame; an unread previous frame is dropped.
    pub fn publish(&self, mut frame: FrameImage) {
        if let Ok(mut state) = self.state.lock() {
            state.published += 1;
            frame.sequence = state.published;
            state.latest = Some(Arc::new(frame));
        }
    }

    /// The newest frame if it has not been handed out yet. Checking and
    /// marking happen under one lock, so each frame comes out at most once.
    pub fn take_new_frame(&self) -> Option<Arc<FrameImage>> {
        let mut state = self.state.lock().ok()?;
        let frame = state.latest.clone().filter(|f| f.sequence > state.delivered)?;
        state.delivered = frame.sequence;
        Some(frame)
    }

    pub fn latest(&self) -> Option<Arc<FrameImage>> {
        self.state.lock().ok().and_then(|state| state.latest.clone())
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that can produce frames of a fixed size on the capture thread.
pub trait FrameProducer: Send + 'static {
    fn size(&self) -> (u32, u32);

    /// Produce the next frame. `sequence` is filled in by the slot.
    fn next_frame(&mut self) -> FrameImage;
}

/// Moving gradient standing in for a live camera.
pub struct TestPattern {
    width: u32,
    height: u32,
    frame_count: u64,
}

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, frame_count: 0 }
    }
}

impl FrameProducer for TestPattern {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_frame(&mut self) -> FrameImage {
        let time_offset = ((self.frame_count * 4) % 256) as u8;
        let mut data = vec![255u8; (self.width * self.height * FrameImage::COMPONENTS) as usize];

        for y in 0..self.height {
            for x in 0..self.width {
                let idx = ((y * self.width + x) * FrameImage::COMPONENTS) as usize;
                data[idx] = (x as u8).wrapping_add(time_offset);
                data[idx + 1] = (y as u8).wrapping_add(time_offset);
                data[idx + 2] = ((x ^ y) as u8).wrapping_sub(time_offset);
            }
        }

        self.frame_count += 1;
        FrameImage { width: self.width, height: self.height, data, sequence: 0 }
    }
}

/// Loops over a directory of still images, resized to the requested size.
pub struct ImageSequence {
    width: u32,
    height: u32,
    frames: Vec<Vec<u8>>,
    next: usize,
}

impl ImageSequence {
    pub fn open(dir: &Path, width: u32, height: u32) -> Result<Self, VideoError> {
        let paths = image_files(dir);
        if paths.is_empty() {
            return Err(VideoError::DeviceNotFound(dir.display().to_string()));
        }

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            let img = image::open(path).map_err(|e| VideoError::Decode {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            let rgba = image::imageops::resize(
                &img.to_rgba8(),
                width,
                height,
                image::imageops::FilterType::Triangle,
            );
            frames.push(rgba.into_raw());
        }

        info!("Image sequence {}: {} frames", dir.display(), frames.len());
        Ok(Self { width, height, frames, next: 0 })
    }
}

impl FrameProducer for ImageSequence {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn next_frame(&mut self) -> FrameImage {
        let data = self.frames[self.next].clone();
        self.next = (self.next + 1) % self.frames.len();
        FrameImage { width: self.width, height: self.height, data, sequence: 0 }
    }
}

fn image_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

/// Kind of capture device that can be opened
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    TestPattern,
    ImageSequence(PathBuf),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub kind: DeviceKind,
}

/// Capture devices known for this configuration, for diagnostics.
pub fn enumerate_devices(config: &CaptureConfig) -> Vec<DeviceInfo> {
    let mut devices = vec![DeviceInfo { name: "test-pattern".to_string(), kind: DeviceKind::TestPattern }];

    let dir = Path::new(&config.device);
    if dir.is_dir() && !image_files(dir).is_empty() {
        devices.push(DeviceInfo {
            name: config.device.clone(),
            kind: DeviceKind::ImageSequence(dir.to_path_buf()),
        });
    }
    devices
}

pub fn log_devices(devices: &[DeviceInfo]) {
    for device in devices {
        let kind = match &device.kind {
            DeviceKind::TestPattern => "synthetic",
            DeviceKind::ImageSequence(_) => "image sequence",
        };
        info!("Capture device: {} ({})", device.name, kind);
    }
}

/// Running capture stream. Dropping it stops and joins the capture thread.
pub struct VideoSource {
    slot: Arc<FrameSlot>,
    running: Arc<AtomicBool>,
    size: (u32, u32),
    capture_thread: Option<JoinHandle<()>>,
}

impl VideoSource {
    /// Open the configured device at the configured resolution.
    pub fn open(config: &CaptureConfig) -> Result<Self, VideoError> {
        if config.width == 0 || config.height == 0 {
            return Err(VideoError::InvalidSize { width: config.width, height: config.height });
        }

        let producer: Box<dyn FrameProducer> = match config.device.as_str() {
            "none" | "" => return Err(VideoError::NoDevice),
            "test-pattern" => Box::new(TestPattern::new(config.width, config.height)),
            path => Box::new(ImageSequence::open(Path::new(path), config.width, config.height)?),
        };

        Self::start(producer, config.fps)
    }

    /// Run `producer` on a capture thread at `fps`.
    pub fn start(mut producer: Box<dyn FrameProducer>, fps: u32) -> Result<Self, VideoError> {
        let slot = Arc::new(FrameSlot::new());
        let running = Arc::new(AtomicBool::new(true));
        let size = producer.size();
        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);

        let thread_slot = Arc::clone(&slot);
        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                while thread_running.load(Ordering::SeqCst) {
                    let started = Instant::now();
                    thread_slot.publish(producer.next_frame());
                    if let Some(rest) = period.checked_sub(started.elapsed()) {
                        thread::sleep(rest);
                    }
                }
            })?;

        info!("Capture started at {}x{}, {} fps", size.0, size.1, fps);
        Ok(Self { slot, running, size, capture_thread: Some(handle) })
    }

    /// True at most once per captured frame. Consumes the frame; use
    /// `poll_frame` to receive it.
    pub fn has_new_frame(&self) -> bool {
        self.slot.take_new_frame().is_some()
    }

    pub fn latest_frame(&self) -> Option<Arc<FrameImage>> {
        self.slot.latest()
    }

    /// The newest frame if one arrived since the last poll.
    pub fn poll_frame(&self) -> Option<Arc<FrameImage>> {
        self.slot.take_new_frame()
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.size
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_thread.take() {
            if handle.join().is_err() {
                error!("Capture thread panicked");
            }
        }
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open capture, treating any failure as "no video".
pub fn open_or_degrade(config: &CaptureConfig) -> Option<VideoSource> {
    log_devices(&enumerate_devices(config));
    match VideoSource::open(config) {
        Ok(source) => Some(source),
        Err(e) => {
            warn!("Failed to init capture: {} - video plane disabled", e);
            None
        }
    }
}
