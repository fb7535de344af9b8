//! Local display mode.
//!
//! `run_display_loop` drives frames from a `CaptureManager` into a
//! `DisplaySink` until the exit key is pressed or the stream ends. Both the
//! manager and the sink are moved in and dropped on every exit path, so the
//! device and the window are released however the loop ends.

use anyhow::{Context, Result};

use crate::capture::CaptureManager;
use crate::error::CaptureError;
use crate::frame::Frame;

/// Something that can put frames on screen.
pub trait DisplaySink {
    /// Render `frame` at its own decoded size.
    fn show(&mut self, frame: &Frame) -> Result<()>;

    /// Bounded-wait poll for the exit key. True means stop.
    fn poll_exit(&mut self) -> bool;
}

/// Why the display loop stopped without an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayOutcome {
    ExitRequested,
    StreamEnded,
}

/// Show frames until exit or end of stream.
///
/// `DeviceUnavailable` is returned as an error (downcastable to
/// [`CaptureError`]); a clean `StreamEnded` is not.
pub fn run_display_loop<S: DisplaySink>(
    mut capture: CaptureManager,
    mut sink: S,
) -> Result<DisplayOutcome> {
    let outcome = loop {
        if sink.poll_exit() {
            break DisplayOutcome::ExitRequested;
        }
        match capture.next_frame() {
            Ok(frame) => sink.show(&frame).context("display frame")?,
            Err(err @ CaptureError::StreamEnded { .. }) => {
                log::info!("display: {}", err);
                break DisplayOutcome::StreamEnded;
            }
            Err(err) => {
                log::error!("display: lost camera {}", err.device());
                return Err(err.into());
            }
        }
    };
    let stats = capture.stats();
    log::info!(
        "display: stopped ({:?}) after {} frames on {} tier",
        outcome,
        stats.frames_captured,
        stats.tier
    );
    Ok(outcome)
}

#[cfg(feature = "display")]
pub use window::WindowDisplay;

#[cfg(feature = "display")]
mod window {
    use anyhow::{anyhow, Result};
    use minifb::{Key, Window, WindowOptions};

    use super::DisplaySink;
    use crate::frame::Frame;

    /// Native window sized to the incoming frames. Escape or closing the
    /// window requests exit.
    pub struct WindowDisplay {
        title: String,
        window: Option<Window>,
        size: (usize, usize),
    }

    impl WindowDisplay {
        pub fn new(title: impl Into<String>) -> Self {
            Self {
                title: title.into(),
                window: None,
                size: (0, 0),
            }
        }
    }

    impl DisplaySink for WindowDisplay {
        fn show(&mut self, frame: &Frame) -> Result<()> {
            let size = (frame.width as usize, frame.height as usize);
            if self.window.is_none() || self.size != size {
                let window = Window::new(&self.title, size.0, size.1, WindowOptions::default())
                    .map_err(|err| anyhow!("open display window: {}", err))?;
                log::info!("display: window {}x{}", size.0, size.1);
                self.window = Some(window);
                self.size = size;
            }
            let buffer = frame.to_0rgb();
            if let Some(window) = self.window.as_mut() {
                window
                    .update_with_buffer(&buffer, size.0, size.1)
                    .map_err(|err| anyhow!("update display window: {}", err))?;
            }
            Ok(())
        }

        fn poll_exit(&mut self) -> bool {
            match self.window.as_mut() {
                Some(window) => {
                    // update_with_buffer pumps events; this covers the first
                    // poll after a slow read.
                    window.update();
                    !window.is_open() || window.is_key_down(Key::Escape)
                }
                None => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;
    use crate::ingest::CaptureTier;

    #[derive(Default)]
    struct RecordingSink {
        shown: Vec<(u32, u32)>,
        exit_after: Option<usize>,
    }

    impl DisplaySink for &mut RecordingSink {
        fn show(&mut self, frame: &Frame) -> Result<()> {
            self.shown.push((frame.width, frame.height));
            Ok(())
        }

        fn poll_exit(&mut self) -> bool {
            self.exit_after.is_some_and(|n| self.shown.len() >= n)
        }
    }

    #[test]
    fn stops_cleanly_when_stream_ends() -> Result<()> {
        let config = CaptureConfig::new("stub://desk?preferred=fail&frames=3", 8, 6, 500);
        let capture = CaptureManager::open(config)?;
        assert_eq!(capture.tier(), CaptureTier::Fallback);

        let mut sink = RecordingSink::default();
        let outcome = run_display_loop(capture, &mut sink)?;
        assert_eq!(outcome, DisplayOutcome::StreamEnded);
        assert_eq!(sink.shown, vec![(8, 6); 3]);
        Ok(())
    }

    #[test]
    fn exit_key_stops_the_loop() -> Result<()> {
        let capture = CaptureManager::open(CaptureConfig::new("stub://desk", 8, 6, 500))?;
        let mut sink = RecordingSink {
            exit_after: Some(2),
            ..RecordingSink::default()
        };
        let outcome = run_display_loop(capture, &mut sink)?;
        assert_eq!(outcome, DisplayOutcome::ExitRequested);
        assert_eq!(sink.shown.len(), 2);
        Ok(())
    }

    #[test]
    fn unavailable_device_surfaces_an_error() -> Result<()> {
        let config = CaptureConfig::new("stub://desk?preferred_frames=1&fallback=fail", 8, 6, 500);
        let capture = CaptureManager::open(config)?;
        let mut sink = RecordingSink::default();

        let err = run_display_loop(capture, &mut sink).unwrap_err();
        let capture_err = err.downcast_ref::<CaptureError>();
        assert!(matches!(
            capture_err,
            Some(CaptureError::DeviceUnavailable { .. })
        ));
        assert_eq!(sink.shown.len(), 1);
        Ok(())
    }
}
