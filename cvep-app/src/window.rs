//! Fullscreen window backend.
//!
//! The presentation loop owns the thread, so the winit event loop is pumped
//! without blocking after every swap instead of being run. Quit keys and close
//! requests turn into abort requests; space and enter raise the proceed signal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use cvep_render::Display;
use cvep_speller::{AbortHandle, SignalHandle};
use pixels::{Pixels, PixelsBuilder, SurfaceTexture};
use tracing::{debug, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Fullscreen, Window, WindowId};

use crate::config::ScreenConfig;

const OPEN_ATTEMPTS: usize = 200;

struct WindowState {
    fullscreen: bool,
    size: (u32, u32),
    abort: AbortHandle,
    proceed: SignalHandle,
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    refresh_rate: Option<f64>,
    error: Option<anyhow::Error>,
}

impl WindowState {
    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .ok_or_else(|| anyhow!("no monitor available"))?;
        self.refresh_rate = monitor
            .refresh_rate_millihertz()
            .map(|mhz| mhz as f64 / 1000.0);

        let mut attributes = Window::default_attributes()
            .with_title("cvep")
            .with_resizable(false);
        attributes = if self.fullscreen {
            attributes.with_fullscreen(Some(Fullscreen::Borderless(Some(monitor))))
        } else {
            attributes.with_inner_size(PhysicalSize::new(self.size.0, self.size.1))
        };

        let window = Arc::new(event_loop.create_window(attributes)?);
        let physical = window.inner_size();
        self.size = (physical.width, physical.height);
        info!(
            width = physical.width,
            height = physical.height,
            scale_factor = window.scale_factor(),
            refresh_rate = ?self.refresh_rate,
            "window opened"
        );

        let surface = SurfaceTexture::new(physical.width, physical.height, Arc::clone(&window));
        let pixels = PixelsBuilder::new(physical.width, physical.height, surface)
            .enable_vsync(true)
            .build()?;

        window.set_cursor_visible(false);
        self.pixels = Some(pixels);
        self.window = Some(window);
        Ok(())
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("window close requested");
                self.abort.request();
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape | KeyCode::KeyQ) => {
                        info!(key = ?event.physical_key, "quit key pressed");
                        self.abort.request();
                    }
                    PhysicalKey::Code(KeyCode::Space | KeyCode::Enter | KeyCode::NumpadEnter)
                        if !event.repeat =>
                    {
                        debug!(key = ?event.physical_key, "proceed key pressed");
                        self.proceed.request();
                    }
                    _ => {}
                }
            }
            WindowEvent::Resized(size) if (size.width, size.height) != self.size => {
                warn!(
                    width = size.width,
                    height = size.height,
                    "window resized; frames stay at the original size"
                );
            }
            _ => {}
        }
    }
}

/// A [`Display`] backed by a winit window and a vsync-locked `pixels` surface.
pub struct WinitDisplay {
    event_loop: EventLoop<()>,
    state: WindowState,
    pixels: Pixels<'static>,
}

impl WinitDisplay {
    pub fn open(screen: &ScreenConfig, abort: AbortHandle, proceed: SignalHandle) -> Result<Self> {
        let mut event_loop = EventLoop::new()?;
        let mut state = WindowState {
            fullscreen: screen.fullscreen,
            size: (screen.width, screen.height),
            abort,
            proceed,
            window: None,
            pixels: None,
            refresh_rate: None,
            error: None,
        };

        for _ in 0..OPEN_ATTEMPTS {
            let status = event_loop.pump_app_events(Some(Duration::from_millis(10)), &mut state);
            if let Some(e) = state.error.take() {
                return Err(e);
            }
            if let PumpStatus::Exit(code) = status {
                bail!("event loop exited with code {code} before the window opened");
            }
            if state.pixels.is_some() {
                break;
            }
        }
        let pixels = state
            .pixels
            .take()
            .ok_or_else(|| anyhow!("window did not open"))?;

        Ok(Self {
            event_loop,
            state,
            pixels,
        })
    }

    /// Refresh rate reported by the monitor, if any.
    pub fn monitor_refresh_rate(&self) -> Option<f64> {
        self.state.refresh_rate
    }
}

impl Display for WinitDisplay {
    fn size(&self) -> (u32, u32) {
        self.state.size
    }

    fn frame_mut(&mut self) -> &mut [u8] {
        self.pixels.frame_mut()
    }

    fn present(&mut self) -> Result<()> {
        self.pixels.render()?;
        if let PumpStatus::Exit(code) = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state)
        {
            debug!(code, "event loop exited");
            self.state.abort.request();
        }
        Ok(())
    }
}

impl Drop for WinitDisplay {
    fn drop(&mut self) {
        if let Some(window) = &self.state.window {
            window.set_cursor_visible(true);
        }
    }
}
