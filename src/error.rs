use thiserror::Error;

/// Failures surfaced by [`crate::CaptureManager`].
///
/// Backend-level causes are logged where they happen; callers only see
/// whether the device is gone or the stream has run dry.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Neither the preferred pipeline nor the fallback device could be opened.
    #[error("unable to open camera {device}")]
    DeviceUnavailable { device: String },

    /// The active source stopped producing frames after both tiers were tried.
    #[error("capture stream from {device} ended")]
    StreamEnded { device: String },
}

impl CaptureError {
    pub fn device(&self) -> &str {
        match self {
            CaptureError::DeviceUnavailable { device } | CaptureError::StreamEnded { device } => {
                device
            }
        }
    }

    pub fn is_terminal_end(&self) -> bool {
        matches!(self, CaptureError::StreamEnded { .. })
    }
}

/// A single frame could not be turned into a multipart JPEG part.
///
/// Non-fatal: the frame is skipped.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("frame buffer does not match {width}x{height} ({len} bytes)")]
    InvalidFrame { width: u32, height: u32, len: usize },

    #[error("jpeg compression failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_variants_name_the_device() {
        let gone = CaptureError::DeviceUnavailable {
            device: "/dev/video3".to_string(),
        };
        let ended = CaptureError::StreamEnded {
            device: "/dev/video3".to_string(),
        };
        assert_eq!(gone.device(), "/dev/video3");
        assert_eq!(ended.device(), "/dev/video3");
        assert!(!gone.is_terminal_end());
        assert!(ended.is_terminal_end());
        assert_eq!(gone.to_string(), "unable to open camera /dev/video3");
    }
}
