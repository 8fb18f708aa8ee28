use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes},
};

use crate::config::SessionConfig;
use crate::error::{ArError, Result};
use crate::gfx::rendering::RenderEngine;
use crate::session::ArSession;
use crate::tracking::MarkerTracker;
use crate::video::{VideoSource, Viewport};

/// Windowed AR viewer
///
/// Opens a window once the event loop resumes, initializes an [`ArSession`]
/// rendering into it and runs a frame on every redraw.
pub struct ArApp {
    event_loop: Option<EventLoop<()>>,
    app_state: AppState,
}

struct AppState {
    config: SessionConfig,
    window_size: (u32, u32),
    capabilities: Option<(Box<dyn VideoSource>, Box<dyn MarkerTracker>)>,
    window: Option<Arc<Window>>,
    session: Option<ArSession<RenderEngine>>,
    error: Option<ArError>,
}

impl ArApp {
    pub fn new(
        config: SessionConfig,
        source: Box<dyn VideoSource>,
        tracker: Box<dyn MarkerTracker>,
    ) -> Result<Self> {
        let event_loop = EventLoop::new().map_err(|e| ArError::Window(e.to_string()))?;

        Ok(Self {
            event_loop: Some(event_loop),
            app_state: AppState {
                config,
                window_size: (1200, 800),
                capabilities: Some((source, tracker)),
                window: None,
                session: None,
                error: None,
            },
        })
    }

    /// Initial inner size of the window in logical pixels
    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.app_state.window_size = (width, height);
        self
    }

    /// Runs until the window closes or the session fails
    pub fn run(mut self) -> Result<()> {
        let event_loop = self
            .event_loop
            .take()
            .ok_or_else(|| ArError::Window("event loop already consumed".into()))?;
        event_loop.set_control_flow(ControlFlow::Poll);

        event_loop
            .run_app(&mut self.app_state)
            .map_err(|e| ArError::Window(e.to_string()))?;

        match self.app_state.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl AppState {
    fn start_session(&mut self, window: Arc<Window>) -> Result<ArSession<RenderEngine>> {
        let (source, tracker) = self
            .capabilities
            .take()
            .ok_or(ArError::AlreadyInitialized)?;

        let (width, height) = window.inner_size().into();
        let renderer = pollster::block_on(RenderEngine::new(window, width, height))?;

        let mut session = ArSession::new(self.config.clone(), source, tracker, renderer);
        pollster::block_on(session.initialize())?;
        Ok(session)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: ArError) {
        log::error!("{}", error);
        self.error = Some(error);
        event_loop.exit();
    }
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let (width, height) = self.window_size;
        let attributes = WindowAttributes::default()
            .with_title("arcube")
            .with_transparent(true)
            .with_inner_size(winit::dpi::LogicalSize::new(width, height));

        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, ArError::Window(e.to_string())),
        };
        self.window = Some(window.clone());

        match self.start_session(window) {
            Ok(session) => self.session = Some(session),
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match event {
            WindowEvent::KeyboardInput {
                event:
                    winit::event::KeyEvent {
                        physical_key: winit::keyboard::PhysicalKey::Code(key_code),
                        ..
                    },
                ..
            } => {
                if matches!(key_code, winit::keyboard::KeyCode::Escape) {
                    event_loop.exit();
                }
            }
            WindowEvent::Resized(PhysicalSize { width, height }) => {
                session.handle_resize(Viewport::new(width, height));
            }
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = session.frame() {
                    self.fail(event_loop, e);
                }
            }
            _ => (),
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
