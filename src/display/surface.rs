use crate::display::frame_channel::{FrameChannel, PaintView};
use anyhow::Context;
use image::{Rgba, RgbaImage};
use std::path::Path;
use std::sync::Arc;

/// Consumer side of the frame hand-off.
///
/// Keeps an RGBA canvas holding the most recent committed frame, cropped to
/// its extent, and refreshes it from the channel on demand. The canvas
/// outlives individual commits; once the channel goes idle it is cleared to
/// neutral gray.
pub struct PresentationSurface {
    channel: Arc<FrameChannel>,
    canvas: Option<RgbaImage>,
    frames_painted: u64,
}

impl PresentationSurface {
    pub fn new(channel: Arc<FrameChannel>) -> PresentationSurface {
        PresentationSurface {
            channel,
            canvas: None,
            frames_painted: 0,
        }
    }

    /// Pull the pending frame into the canvas, if there is one.
    ///
    /// Returns true when a new frame was painted. With nothing pending the
    /// canvas keeps the previous frame; once the channel stops it is
    /// cleared to neutral gray.
    pub fn refresh(&mut self) -> bool {
        let canvas = &mut self.canvas;

        let painted = self.channel.paint(|view| {
            let target = sized_canvas(canvas, view.width as u32, view.height as u32);
            blit_view(target, &view);
        });

        if painted {
            self.frames_painted += 1;
        } else if !self.channel.is_armed() {
            if let Some(canvas) = self.canvas.as_mut() {
                for pixel in canvas.pixels_mut() {
                    *pixel = Rgba([128, 128, 128, 255]);
                }
            }
        }

        painted
    }

    /// Write the current canvas as a PNG.
    pub fn snapshot(&self, path: &Path) -> anyhow::Result<()> {
        let canvas = self
            .canvas
            .as_ref()
            .context("no frame painted yet, nothing to snapshot")?;
        canvas
            .save(path)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        log::info!("Saved snapshot {}", path.display());
        Ok(())
    }

    pub fn frames_painted(&self) -> u64 {
        self.frames_painted
    }

    /// Canvas size, once a frame has been painted.
    pub fn extent(&self) -> Option<(u32, u32)> {
        self.canvas.as_ref().map(|c| c.dimensions())
    }
}

/// Reuse the canvas when the committed extent is unchanged, otherwise
/// allocate one matching it.
fn sized_canvas(canvas: &mut Option<RgbaImage>, width: u32, height: u32) -> &mut RgbaImage {
    let needs_new = canvas
        .as_ref()
        .map(|c| c.dimensions() != (width, height))
        .unwrap_or(true);
    if needs_new {
        *canvas = Some(RgbaImage::new(width, height));
    }
    canvas.as_mut().unwrap()
}

/// Convert the committed rows into RGBA.
///
/// 32-bit rows carry B,G,R,X quadruplets; 24-bit rows carry R,G,B
/// triplets. Rows in the source are `view.stride` bytes apart.
fn blit_view(canvas: &mut RgbaImage, view: &PaintView<'_>) {
    let width = view.width as usize;
    let height = view.height as usize;
    let src_stride = view.stride as usize;
    let bpp = (view.bits / 8) as usize;

    let dst: &mut [u8] = &mut *canvas;
    for y in 0..height {
        let src_row = &view.data[y * src_stride..y * src_stride + width * bpp];
        let dst_row = &mut dst[y * width * 4..(y + 1) * width * 4];

        if bpp == 4 {
            for x in 0..width {
                let s = &src_row[x * 4..x * 4 + 4];
                let d = &mut dst_row[x * 4..x * 4 + 4];
                d[0] = s[2];
                d[1] = s[1];
                d[2] = s[0];
                d[3] = 255;
            }
        } else {
            for x in 0..width {
                let s = &src_row[x * 3..x * 3 + 3];
                let d = &mut dst_row[x * 4..x * 4 + 4];
                d[0] = s[0];
                d[1] = s[1];
                d[2] = s[2];
                d[3] = 255;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed_channel(width: i32, height: i32, bits: i32) -> Arc<FrameChannel> {
        let channel = Arc::new(FrameChannel::new());
        assert!(channel.start(width, height, bits));
        channel
    }

    #[test]
    fn test_refresh_converts_bgrx_rows() {
        let channel = armed_channel(4, 3, 32);
        let mut surface = PresentationSurface::new(Arc::clone(&channel));

        let mut lease = channel.acquire_write_buffer();
        {
            let pixels = lease.pixels();
            // Pixel (0,0) = B,G,R,X
            pixels[0] = 10;
            pixels[1] = 20;
            pixels[2] = 30;
            pixels[3] = 0;
        }
        assert!(channel.commit(lease, 2, 2));

        assert!(surface.refresh());
        assert_eq!(surface.extent(), Some((2, 2)));
        assert_eq!(surface.frames_painted(), 1);

        let canvas = surface.canvas.as_ref().unwrap();
        assert_eq!(*canvas.get_pixel(0, 0), Rgba([30, 20, 10, 255]));
    }

    #[test]
    fn test_refresh_converts_rgb_rows() {
        let channel = armed_channel(4, 3, 24);
        let mut surface = PresentationSurface::new(Arc::clone(&channel));

        let mut lease = channel.acquire_write_buffer();
        {
            let pixels = lease.pixels();
            pixels[0] = 9;
            pixels[1] = 8;
            pixels[2] = 7;
        }
        assert!(channel.commit(lease, 4, 3));

        assert!(surface.refresh());
        let canvas = surface.canvas.as_ref().unwrap();
        assert_eq!(*canvas.get_pixel(0, 0), Rgba([9, 8, 7, 255]));
    }

    #[test]
    fn test_crop_respects_committed_extent() {
        let channel = armed_channel(100, 100, 32);
        let mut surface = PresentationSurface::new(Arc::clone(&channel));

        let lease = channel.acquire_write_buffer();
        assert!(channel.commit(lease, 64, 48));

        assert!(surface.refresh());
        assert_eq!(surface.extent(), Some((64, 48)));
    }

    #[test]
    fn test_canvas_retained_until_channel_stops() {
        let channel = armed_channel(4, 4, 32);
        let mut surface = PresentationSurface::new(Arc::clone(&channel));

        let mut lease = channel.acquire_write_buffer();
        lease.pixels().fill(0xFF);
        assert!(channel.commit(lease, 4, 4));
        assert!(surface.refresh());

        // Nothing new pending: the last frame stays up.
        assert!(!surface.refresh());
        let canvas = surface.canvas.as_ref().unwrap();
        assert_eq!(*canvas.get_pixel(0, 0), Rgba([255, 255, 255, 255]));

        // An idle channel clears to neutral gray.
        channel.stop();
        assert!(!surface.refresh());
        let canvas = surface.canvas.as_ref().unwrap();
        assert_eq!(*canvas.get_pixel(0, 0), Rgba([128, 128, 128, 255]));
    }

    #[test]
    fn test_snapshot_without_frame_fails() {
        let channel = Arc::new(FrameChannel::new());
        let surface = PresentationSurface::new(channel);
        assert!(surface.snapshot(Path::new("/tmp/never-written.png")).is_err());
    }

    #[test]
    fn test_snapshot_writes_png() {
        let channel = armed_channel(8, 8, 32);
        let mut surface = PresentationSurface::new(Arc::clone(&channel));

        let lease = channel.acquire_write_buffer();
        assert!(channel.commit(lease, 8, 8));
        assert!(surface.refresh());

        let path = std::env::temp_dir().join(format!(
            "framegrab-{}-snapshot.png",
            std::process::id()
        ));
        surface.snapshot(&path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        std::fs::remove_file(&path).ok();
    }
}
