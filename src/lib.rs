//! MonetVR - head-tracked stereo video pass-through
//!
//! Renders a live capture stream on a plane behind a head-tracked scene,
//! either mono or as two eye views warped for a VR headset lens.

use std::sync::Arc;

use log::{error, info};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, TouchPhase, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

pub mod app;
pub mod compositor;
pub mod config;
pub mod distortion;
pub mod error;
pub mod eye_rig;
pub mod mesh_loader;
pub mod renderer;
pub mod scene;
pub mod sensors;
pub mod texture;
pub mod video;
pub mod video_mesh;

use app::{FrameLifecycle, VrController, WakeFactory};
use config::Config;
use error::{MonetError, RenderError};

/// Wakeups sent to the event loop from background threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    MeshReady,
}

/// Input the runner understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    ToggleStereo,
    ToggleDistortion,
    ToggleModel,
    Recenter,
    Exit,
}

fn action_for_key(key: KeyCode) -> Option<Action> {
    match key {
        KeyCode::KeyS | KeyCode::Space => Some(Action::ToggleStereo),
        KeyCode::KeyD => Some(Action::ToggleDistortion),
        KeyCode::KeyM => Some(Action::ToggleModel),
        KeyCode::KeyR => Some(Action::Recenter),
        KeyCode::Escape => Some(Action::Exit),
        _ => None,
    }
}

/// Window runner: owns the window and forwards events to the controller
struct VrApp {
    window_config: config::WindowConfig,
    window: Option<Arc<Window>>,
    controller: VrController,
    error: Option<MonetError>,
}

impl VrApp {
    fn new(config: Config, proxy: EventLoopProxy<AppEvent>) -> Self {
        let wake: WakeFactory = Box::new(move || -> Box<dyn FnOnce() + Send> {
            let proxy = proxy.clone();
            Box::new(move || {
                // The loop may already be gone during shutdown.
                let _ = proxy.send_event(AppEvent::MeshReady);
            })
        });

        Self {
            window_config: config.window.clone(),
            window: None,
            controller: VrController::new(config, Some(wake)),
            error: None,
        }
    }

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<Arc<Window>, MonetError> {
        let attrs = Window::default_attributes()
            .with_title(self.window_config.title.clone())
            .with_inner_size(LogicalSize::new(self.window_config.width, self.window_config.height));
        let window = event_loop
            .create_window(attrs)
            .map_err(|e| RenderError::Window(e.to_string()))?;
        Ok(Arc::new(window))
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: MonetError) {
        error!("Startup failed: {}", e);
        self.error = Some(e);
        event_loop.exit();
    }

    fn apply(&mut self, event_loop: &ActiveEventLoop, action: Action) {
        match action {
            Action::ToggleStereo => self.controller.on_toggle_stereo(),
            Action::ToggleDistortion => self.controller.toggle_distortion(),
            Action::ToggleModel => self.controller.toggle_model(),
            Action::Recenter => self.controller.recenter(),
            Action::Exit => {
                info!("Exit requested");
                event_loop.exit();
            }
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, event: &KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        if let PhysicalKey::Code(code) = event.physical_key {
            if let Some(action) = action_for_key(code) {
                self.apply(event_loop, action);
            }
        }
    }
}

impl ApplicationHandler<AppEvent> for VrApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.controller.is_initialized() {
            return;
        }
        info!("App resumed - creating window");

        let window = match &self.window {
            Some(window) => Arc::clone(window),
            None => match self.create_window(event_loop) {
                Ok(window) => window,
                Err(e) => return self.fail(event_loop, e),
            },
        };
        self.window = Some(Arc::clone(&window));

        if let Err(e) = self.controller.initialize(Arc::clone(&window)) {
            return self.fail(event_loop, e);
        }
        window.request_redraw();
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        info!("App suspended");
        self.controller.suspend();
        self.window = None;
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: AppEvent) {
        match event {
            AppEvent::MeshReady => {
                info!("Mesh worker finished");
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                self.controller.on_tick();
                self.controller.on_render_requested();
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                self.controller.on_resize(size.width, size.height);
            }
            WindowEvent::KeyboardInput { event, .. } => self.handle_key(event_loop, &event),
            WindowEvent::Touch(touch) if touch.phase == TouchPhase::Ended => {
                self.apply(event_loop, Action::ToggleStereo);
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.controller.teardown();
    }
}

fn run_event_loop(event_loop: EventLoop<AppEvent>, config: Config) -> error::Result<()> {
    let mut app = VrApp::new(config, event_loop.create_proxy());
    event_loop.run_app(&mut app)?;
    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Run the viewer until the window closes.
pub fn run(config: Config) -> error::Result<()> {
    let event_loop = EventLoop::<AppEvent>::with_user_event().build()?;
    run_event_loop(event_loop, config)
}

/// Android entry point
#[cfg(target_os = "android")]
#[no_mangle]
fn android_main(app: android_activity::AndroidApp) {
    use winit::platform::android::EventLoopBuilderExtAndroid;

    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag("MonetVR"),
    );
    info!("MonetVR starting...");

    let config = Config { stereo: config::StereoConfig { enabled: true, ..Default::default() }, ..Config::default() };
    let event_loop = match EventLoop::<AppEvent>::with_user_event().with_android_app(app).build() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            error!("Failed to create event loop: {}", e);
            return;
        }
    };
    if let Err(e) = run_event_loop(event_loop, config) {
        error!("MonetVR stopped: {}", e);
    }
}
