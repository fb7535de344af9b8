//! Direct V4L2 device capture (fallback tier).
//!
//! Opens the device node itself, asks for MJPEG at the configured size and
//! rate, and decodes each buffer on the CPU. Slower than the accelerated
//! pipeline but needs nothing beyond the kernel driver, so it works whenever
//! the device exists.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{decode_to_rgb, DeviceFormat};
use crate::config::CaptureConfig;
use crate::frame::{Frame, PixelFormat};

const MMAP_BUFFERS: u32 = 4;

pub struct V4l2Source {
    config: CaptureConfig,
    state: Option<V4l2State>,
    format: DeviceFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this>,
}

impl V4l2Source {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: DeviceFormat::Mjpeg,
            frame_count: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        "v4l2"
    }

    pub fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"MJPG");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set MJPEG format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.format = DeviceFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} negotiated unsupported format {}",
                self.config.device,
                format.fourcc
            )
        })?;

        let params = v4l::video::capture::Parameters::with_fps(self.config.framerate);
        if let Err(err) = device.set_params(&params) {
            log::warn!(
                "V4l2Source: failed to set fps on {}: {}",
                self.config.device,
                err
            );
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let read_timeout = self.config.read_timeout;
        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                let mut stream = v4l::prelude::MmapStream::with_buffers(
                    device,
                    Type::VideoCapture,
                    MMAP_BUFFERS,
                )
                .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))?;
                if let Some(timeout) = read_timeout {
                    stream.set_timeout(timeout);
                }
                Ok::<_, anyhow::Error>(stream)
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    pub fn read(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (width, height, format) = (self.active_width, self.active_height, self.format);
        let (pixels, width, height) = state.with_stream_mut(|stream| {
            let (buf, meta) = stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            decode_to_rgb(&buf[..used], width, height, format)
        })?;

        self.frame_count += 1;
        Frame::new(pixels, width, height, PixelFormat::Rgb24)
    }

    pub fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Source: released {} after {} frames",
                self.config.device,
                self.frame_count
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.close();
    }
}
