//! Error types for MonetVR

use thiserror::Error;

/// Main error type for MonetVR
#[derive(Error, Debug)]
pub enum MonetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Video error: {0}")]
    Video(#[from] VideoError),

    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("Event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

/// GPU setup errors. All of these are fatal to startup.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to create window: {0}")]
    Window(String),

    #[error("Failed to create surface: {0}")]
    Surface(String),

    #[error("No compatible GPU adapter found")]
    NoAdapter,

    #[error("Failed to create device: {0}")]
    Device(String),

    #[error("Shader '{label}' failed validation: {message}")]
    Shader { label: String, message: String },
}

/// Capture-side errors. These degrade the video plane, never the app.
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("No capture device available")]
    NoDevice,

    #[error("Capture device not found: {0}")]
    DeviceNotFound(String),

    #[error("Invalid capture size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("Failed to decode image {path}: {message}")]
    Decode { path: String, message: String },

    #[error("Failed to start capture thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Async model loading errors
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Failed to load OBJ {path}: {message}")]
    Obj { path: String, message: String },

    #[error("Mesh {0} contains no triangles")]
    Empty(String),

    #[error("Mesh loader worker exited without a result")]
    WorkerLost,
}

/// Result type alias for MonetVR operations
pub type Result<T> = std::result::Result<T, MonetError>;
