use std::io;
use std::sync::{Arc, Mutex};
use tui::backend::CrosstermBackend;
use tui::layout::Rect;
use tui::style::{Color, Style};
use tui::symbols::Marker;
use tui::widgets::canvas::{Canvas, Points};
use tui::widgets::{Block, Borders};
use tui::Terminal;

use crate::memory::DISPLAY_SIZE_BYTES;

/// Display is the rendering sink the guest's `draw` binding feeds. It gets a
/// copy of the framebuffer and owns its own scaling and colour policy.
pub trait Display {
    /// draw data based on internal resolution of display
    fn draw(&mut self, data: &[u8]) -> Result<(), io::Error>;

    /// how big the display data should be
    fn get_display_size_bytes(&self) -> usize {
        DISPLAY_SIZE_BYTES
    }
}

// width, height, bits per pixel
struct Resolution(usize, usize, usize);

impl Resolution {
    fn pixel_count(&self) -> usize {
        self.0 * self.1
    }

    fn byte_count(&self) -> usize {
        self.0 * self.1 * self.2 / 8
    }

    fn x_bounds(&self) -> [f64; 2] {
        [0.0, (self.0 - 1) as f64]
    }

    fn y_bounds(&self) -> [f64; 2] {
        [-1.0 * (self.1 - 1) as f64, 0.0]
    }

    /// (x, y) of every pixel whose bit equals `bitplane`, MSB first
    fn bitplane_from_data<'a>(
        &self,
        data: &'a [u8],
        bitplane: u8,
    ) -> impl std::iter::Iterator<Item = (f64, f64)> + 'a {
        let mut count = self.pixel_count();
        let w = self.0;
        std::iter::from_fn(move || {
            while count > 0 {
                count -= 1;
                let bit = 1 & (data[count / 8] >> (7 - count % 8));
                if bit == bitplane {
                    return Some((
                        (count % w) as f64,        // x
                        -1.0 * (count / w) as f64, // y
                    ));
                }
            }
            None
        })
    }
}

/// monochrome display in a terminal, rendered using TUI and crossterm
pub struct MonoTermDisplay {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    resolution: Resolution,
}

impl MonoTermDisplay {
    pub fn new(x: usize, y: usize) -> Result<MonoTermDisplay, io::Error> {
        let backend = CrosstermBackend::new(io::stdout());
        let terminal = Terminal::new(backend)?;
        Ok(MonoTermDisplay {
            terminal,
            resolution: Resolution(x, y, 1),
        })
    }
}

impl Display for MonoTermDisplay {
    fn draw(&mut self, data: &[u8]) -> Result<(), io::Error> {
        if data.len() != self.resolution.byte_count() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "MonoTermDisplay needs {} bytes to draw, got {}",
                    self.resolution.byte_count(),
                    data.len()
                ),
            ));
        }

        // 1:1 between terminal cells, chip8 pixels and the TUI canvas
        let resolution = &self.resolution;
        self.terminal.draw(|f| {
            let size = Rect::new(0, 0, 2 + resolution.0 as u16, 2 + resolution.1 as u16);

            let canvas = Canvas::default()
                .block(
                    Block::default()
                        .title("CHIP-8")
                        .borders(Borders::ALL)
                        .style(Style::default().bg(Color::Black)),
                )
                .x_bounds(resolution.x_bounds())
                .y_bounds(resolution.y_bounds())
                .marker(Marker::Block)
                .paint(|ctx| {
                    ctx.draw(&Points {
                        coords: &resolution.bitplane_from_data(data, 0).collect::<Vec<_>>(),
                        color: Color::Black,
                    });
                    ctx.draw(&Points {
                        coords: &resolution.bitplane_from_data(data, 1).collect::<Vec<_>>(),
                        color: Color::White,
                    });
                });
            f.render_widget(canvas, size);
        })?;
        Ok(())
    }

    fn get_display_size_bytes(&self) -> usize {
        self.resolution.byte_count()
    }
}

/// discards every frame
pub struct DummyDisplay;

impl Display for DummyDisplay {
    fn draw(&mut self, _data: &[u8]) -> Result<(), io::Error> {
        Ok(())
    }
}

/// keeps every frame it is handed; clones share the same log, so one half
/// can go to the runtime while the other is inspected
#[derive(Clone)]
pub struct FrameCapture {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    size: usize,
}

impl Default for FrameCapture {
    fn default() -> Self {
        FrameCapture {
            frames: Arc::default(),
            size: DISPLAY_SIZE_BYTES,
        }
    }
}

impl FrameCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// a capture that asks for `size` bytes a frame
    pub fn with_size(size: usize) -> Self {
        FrameCapture {
            size,
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<Vec<u8>> {
        self.frames.lock().ok().and_then(|f| f.last().cloned())
    }
}

impl Display for FrameCapture {
    fn draw(&mut self, data: &[u8]) -> Result<(), io::Error> {
        self.frames
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "frame log poisoned"))?
            .push(data.to_vec());
        Ok(())
    }

    fn get_display_size_bytes(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_count() {
        let r = Resolution(64, 32, 1);
        assert_eq!(r.pixel_count(), 2048)
    }

    #[test]
    fn test_byte_count() {
        let r = Resolution(64, 32, 1);
        assert_eq!(r.byte_count(), DISPLAY_SIZE_BYTES)
    }

    #[test]
    fn test_bounds() {
        let r = Resolution(64, 32, 1);
        assert_eq!(r.x_bounds(), [0.0, 63.0]);
        assert_eq!(r.y_bounds(), [-31.0, 0.0]);
    }

    #[test]
    fn test_bitplanes_split_pixels() {
        let r = Resolution(64, 32, 1);
        let mut data = [0u8; 256];
        data[0] = 0x80; // top-left
        data[255] = 0x01; // bottom-right
        let lit = r.bitplane_from_data(&data, 1).collect::<Vec<_>>();
        assert_eq!(lit, vec![(63.0, -31.0), (0.0, 0.0)]);
        assert_eq!(r.bitplane_from_data(&data, 0).count(), 2046);
    }

    #[test]
    fn test_frame_capture_shares_log() -> Result<(), io::Error> {
        let capture = FrameCapture::new();
        let mut sink: Box<dyn Display> = Box::new(capture.clone());
        sink.draw(&[1, 2, 3])?;
        sink.draw(&[4])?;
        assert_eq!(capture.frames().len(), 2);
        assert_eq!(capture.last(), Some(vec![4]));
        Ok(())
    }

    #[test]
    fn test_display_sizes() {
        assert_eq!(DummyDisplay.get_display_size_bytes(), 256);
        assert_eq!(FrameCapture::new().get_display_size_bytes(), 256);
        assert_eq!(FrameCapture::with_size(1024).get_display_size_bytes(), 1024);
    }
}
