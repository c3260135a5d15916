//! SDL2 Window Display Module
//! Shows the crop preview and the latest result side by side.
//! Space toggles streaming, Escape or closing the window quits.

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::rect::Rect;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::info;

use crate::pipeline::Pipeline;
use crate::utils::format_rate;

pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    size: u32,
}

impl Sdl2Display {
    /// Window of `2 * size` by `size`: preview left, result right.
    pub fn new(sdl_context: &sdl2::Sdl, size: u32) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("framecast", size * 2, size)
            .position_centered()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            size,
        })
    }

    fn render(&mut self, pipeline: &Pipeline) -> Result<()> {
        let size = self.size;
        self.canvas.set_draw_color(Color::BLACK);
        self.canvas.clear();

        if let Some(preview) = pipeline.preview() {
            let (w, h) = preview.dimensions();
            let mut texture = self
                .texture_creator
                .create_texture_streaming(PixelFormatEnum::RGB24, w, h)
                .map_err(|e| eyre!(e))?;
            texture
                .update(None, preview.as_raw(), (w * 3) as usize)
                .map_err(|e| eyre!(e))?;
            self.canvas
                .copy(&texture, None, Some(Rect::new(0, 0, size, size)))
                .map_err(|e| eyre!(e))?;
        }

        let shown = pipeline.display().current();
        if !shown.is_placeholder() {
            let (w, h) = shown.image.dimensions();
            let mut texture = self
                .texture_creator
                .create_texture_streaming(PixelFormatEnum::RGBA32, w, h)
                .map_err(|e| eyre!(e))?;
            texture
                .update(None, shown.image.as_raw(), (w * 4) as usize)
                .map_err(|e| eyre!(e))?;
            self.canvas
                .copy(&texture, None, Some(Rect::new(size as i32, 0, size, size)))
                .map_err(|e| eyre!(e))?;
        }

        self.canvas.present();
        Ok(())
    }

    fn update_title(&mut self, pipeline: &Pipeline) -> Result<()> {
        let state = pipeline.state();
        let title = format!(
            "framecast [{}] frame rate: {} | timer: {} | number of frames: {}",
            if state.enabled { "Stop" } else { "Start" },
            format_rate(state.frame_rate()),
            state.elapsed_seconds,
            state.frames_received
        );
        self.canvas.window_mut().set_title(&title)?;
        Ok(())
    }

    /// Blocking event loop; returns when the window is closed.
    pub fn run(&mut self, sdl_context: &sdl2::Sdl, pipeline: &Pipeline) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

        'running: loop {
            for event in event_pump.poll_iter() {
                match event {
                    Event::Quit { .. }
                    | Event::KeyDown {
                        keycode: Some(Keycode::Escape),
                        ..
                    } => {
                        info!("Quit event received");
                        break 'running;
                    }
                    Event::KeyDown {
                        keycode: Some(Keycode::Space),
                        repeat: false,
                        ..
                    } => pipeline.toggle(),
                    _ => {}
                }
            }

            self.render(pipeline)?;
            self.update_title(pipeline)?;
            std::thread::sleep(Duration::from_millis(1));
        }

        Ok(())
    }
}
