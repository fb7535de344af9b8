//! JPEG compression and multipart/x-mixed-replace framing.
//!
//! Each part on the wire is:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};

use crate::error::EncodeError;
use crate::frame::Frame;

/// Multipart boundary token, without the leading dashes.
pub const BOUNDARY: &str = "frame";
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// `Content-Type` of the whole streaming response.
pub fn multipart_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={BOUNDARY}")
}

/// One multipart part: header lines, JPEG payload, trailing CRLF.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedFrame {
    bytes: Vec<u8>,
    payload_start: usize,
}

impl EncodedFrame {
    /// Wrap JPEG bytes that are already compressed.
    pub fn from_jpeg(jpeg: &[u8]) -> Self {
        let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
        let mut bytes = Vec::with_capacity(header.len() + jpeg.len() + 2);
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(jpeg);
        bytes.extend_from_slice(b"\r\n");
        Self {
            payload_start: header.len(),
            bytes,
        }
    }

    /// The complete part, ready to write to the response body.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Just the JPEG payload.
    pub fn jpeg(&self) -> &[u8] {
        &self.bytes[self.payload_start..self.bytes.len() - 2]
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StreamEncoder {
    quality: u8,
}

impl Default for StreamEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl StreamEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Compress `frame` and frame it as one multipart part.
    pub fn encode(&self, frame: &Frame) -> Result<EncodedFrame, EncodeError> {
        let invalid = || EncodeError::InvalidFrame {
            width: frame.width,
            height: frame.height,
            len: frame.byte_len(),
        };
        if frame.width == 0 || frame.height == 0 {
            return Err(invalid());
        }
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_raw(frame.width, frame.height, frame.to_rgb()).ok_or_else(invalid)?;

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(&img)?;
        Ok(EncodedFrame::from_jpeg(&jpeg))
    }
}
