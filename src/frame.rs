//! Decoded frame container.
//!
//! - `Frame`: one decoded camera sample with its dimensions and channel order.
//! - `PixelFormat`: the packed 8-bit layouts capture backends hand back.
//!
//! Frames are transient. A frame is produced per capture iteration, handed to a
//! sink or encoder, and dropped; nothing in the crate holds more than one.

use anyhow::{anyhow, Result};

/// Packed 3-byte pixel layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Blue, green, red. What the accelerated pipeline's appsink delivers.
    Bgr24,
    /// Red, green, blue. What decoded device frames and synthetic sources use.
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        3
    }
}

/// One decoded image sample from the camera.
///
/// Dimensions are the decoded size, which may differ marginally from the
/// configured capture size when a backend converts pixel formats.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Frame {
    /// Wrap a pixel buffer, checking it covers exactly `width * height` pixels.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} frame length mismatch: expected {}, got {}",
                format,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Copy pixels out in RGB order, leaving the frame intact.
    pub fn to_rgb(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Rgb24 => self.data.clone(),
            PixelFormat::Bgr24 => self
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        }
    }

    /// Packed `0x00RRGGBB` words, one per pixel, for framebuffer-style sinks.
    pub fn to_0rgb(&self) -> Vec<u32> {
        let (r, b) = match self.format {
            PixelFormat::Rgb24 => (0, 2),
            PixelFormat::Bgr24 => (2, 0),
        };
        self.data
            .chunks_exact(3)
            .map(|px| ((px[r] as u32) << 16) | ((px[1] as u32) << 8) | px[b] as u32)
            .collect()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_buffers() {
        let err = Frame::new(vec![0u8; 5], 1, 2, PixelFormat::Rgb24).unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
    }

    #[test]
    fn bgr_frames_convert_to_rgb() -> Result<()> {
        let frame = Frame::new(vec![1, 2, 3, 4, 5, 6], 2, 1, PixelFormat::Bgr24)?;
        assert_eq!(frame.to_rgb(), vec![3, 2, 1, 6, 5, 4]);
        Ok(())
    }

    #[test]
    fn packs_0rgb_words_for_both_orders() -> Result<()> {
        let rgb = Frame::new(vec![0x11, 0x22, 0x33], 1, 1, PixelFormat::Rgb24)?;
        let bgr = Frame::new(vec![0x33, 0x22, 0x11], 1, 1, PixelFormat::Bgr24)?;
        assert_eq!(rgb.to_0rgb(), vec![0x0011_2233]);
        assert_eq!(bgr.to_0rgb(), vec![0x0011_2233]);
        Ok(())
    }
}
