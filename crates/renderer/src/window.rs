use std::sync::Arc;

use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use crate::error::{FractalError, Result};
use crate::gpu::Session;
use crate::types::FractalConfig;

/// Opens the window, computes the fractal once and displays it until the
/// window is closed or Escape is pressed.
pub fn run(config: &FractalConfig) -> Result<()> {
    let event_loop = EventLoop::new()
        .map_err(|err| FractalError::Environment(format!("failed to create event loop: {err}")))?;

    let (width, height) = config.size;
    let window = WindowBuilder::new()
        .with_title(config.title.clone())
        .with_inner_size(PhysicalSize::new(width, height))
        .build(&event_loop)
        .map_err(|err| FractalError::Environment(format!("failed to create window: {err}")))?;
    let window = Arc::new(window);

    let mut session = Session::new(window.clone(), config)?;
    println!("{}", session.banner());

    let timing = session.recompute()?;
    println!("kernel execution time (ns): {}", timing.elapsed_ns());

    let mut failure: Option<FractalError> = None;
    let failure_slot = &mut failure;
    event_loop
        .run(move |event, elwt| match event {
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            logical_key: Key::Named(NamedKey::Escape),
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                } => {
                    tracing::debug!("escape pressed; closing window");
                    elwt.exit();
                }
                WindowEvent::Resized(new_size) => session.resize(new_size),
                WindowEvent::RedrawRequested => {
                    if let Err(err) = session.render_frame() {
                        *failure_slot = Some(err);
                        elwt.exit();
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                elwt.set_control_flow(ControlFlow::Poll);
                window.request_redraw();
            }
            _ => {}
        })
        .map_err(|err| FractalError::Environment(format!("event loop failed: {err}")))?;

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
