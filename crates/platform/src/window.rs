//! Window management using winit.
//!
//! The frame loop owns the thread, so the window drives winit with
//! `pump_app_events` instead of handing control to `run_app`. Polling between
//! frames uses a zero timeout; [`DrawableSurface::wait_events`] blocks.

use std::sync::Arc;
use std::time::Duration;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window as WinitWindow, WindowAttributes, WindowId};

use swapframe_core::{Error, FrameConfig, Result};

use crate::drawable::DrawableSurface;
use crate::resize::{ResizeListener, ResizeNotifier, resize_channel};

/// How many pump rounds to allow for the platform to deliver `resumed`.
const CREATE_ATTEMPTS: u32 = 100;
const CREATE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Event handler state, separate from the loop so both can be borrowed.
struct WindowState {
    attributes: WindowAttributes,
    window: Option<Arc<WinitWindow>>,
    size: PhysicalSize<u32>,
    close_requested: bool,
    create_error: Option<String>,
    resize: ResizeNotifier,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                self.size = window.inner_size();
                tracing::info!("Window created: {}x{}", self.size.width, self.size.height);
                self.window = Some(Arc::new(window));
            }
            Err(e) => {
                tracing::error!("Failed to create window: {}", e);
                self.create_error = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                tracing::info!("Close requested");
                self.close_requested = true;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if size != self.size {
                    tracing::debug!("Window resized: {}x{}", size.width, size.height);
                    self.size = size;
                    self.resize.notify(size.width, size.height);
                }
            }
            _ => {}
        }
    }
}

/// A winit window plus the event loop that feeds it.
///
/// Any Vulkan surface created from [`raw_handles`](Self::raw_handles) must be
/// destroyed before this value is dropped.
pub struct PlatformWindow {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl PlatformWindow {
    /// Opens a resizable window sized from `config`.
    ///
    /// Returns the window and the listener side of its resize channel.
    ///
    /// # Errors
    ///
    /// Returns `Error::Window` if the event loop or the window cannot be
    /// created, or the platform never delivers a window.
    pub fn new(config: &FrameConfig) -> Result<(Self, ResizeListener)> {
        let event_loop = EventLoop::new().map_err(|e| Error::Window(e.to_string()))?;
        let (notifier, listener) = resize_channel();

        let attributes = WindowAttributes::default()
            .with_title(config.title.clone())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let mut window = Self {
            event_loop,
            state: WindowState {
                attributes,
                window: None,
                size: PhysicalSize::new(config.width, config.height),
                close_requested: false,
                create_error: None,
                resize: notifier,
            },
        };

        for _ in 0..CREATE_ATTEMPTS {
            window.pump(Some(CREATE_POLL_INTERVAL));

            if let Some(error) = window.state.create_error.take() {
                return Err(Error::Window(error));
            }
            if window.state.window.is_some() {
                // Sizes reported during creation are not resizes.
                listener.take_latest();
                return Ok((window, listener));
            }
            if window.state.close_requested {
                break;
            }
        }

        Err(Error::Window(
            "Platform did not deliver a window".to_string(),
        ))
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            tracing::debug!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
    }

    /// Processes pending events without blocking.
    pub fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    /// Raw handles for surface creation.
    ///
    /// # Errors
    ///
    /// Returns `Error::Window` if the window is gone or the platform cannot
    /// provide the handles.
    pub fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let window = self
            .state
            .window
            .as_ref()
            .ok_or_else(|| Error::Window("Window has not been created".to_string()))?;

        let display = window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;
        let handle = window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        Ok((display.as_raw(), handle.as_raw()))
    }

    pub fn set_title(&self, title: &str) {
        if let Some(window) = &self.state.window {
            window.set_title(title);
        }
    }
}

impl DrawableSurface for PlatformWindow {
    fn drawable_size(&self) -> (u32, u32) {
        (self.state.size.width, self.state.size.height)
    }

    fn wait_events(&mut self) {
        if self.state.close_requested {
            return;
        }
        self.pump(None);
    }

    fn close_requested(&self) -> bool {
        self.state.close_requested
    }
}
