//! Accelerated GStreamer capture pipeline (preferred tier).
//!
//! Pulls MJPEG straight off the UVC device with `v4l2src`, decodes it with
//! `jpegdec`, hands colorspace conversion to `nvvidconv`, and lands packed BGR
//! frames in an appsink. On boards without the NVIDIA converter the pipeline
//! never reaches PLAYING and `open` fails.

#[cfg(feature = "capture-gstreamer")]
use anyhow::{anyhow, Context, Result};
#[cfg(feature = "capture-gstreamer")]
use gstreamer::prelude::*;
#[cfg(feature = "capture-gstreamer")]
use std::time::Duration;

use crate::config::CaptureConfig;
#[cfg(feature = "capture-gstreamer")]
use crate::frame::{Frame, PixelFormat};

#[cfg(feature = "capture-gstreamer")]
const APPSINK_NAME: &str = "appsink";
#[cfg(feature = "capture-gstreamer")]
const STATE_CHANGE_TIMEOUT_SECS: u64 = 5;

/// GStreamer launch description for `config`.
pub fn pipeline_description(config: &CaptureConfig) -> String {
    format!(
        "v4l2src device={device} ! \
         image/jpeg, width={width}, height={height}, framerate={framerate}/1 ! \
         jpegdec ! nvvidconv ! video/x-raw, format=BGRx ! \
         videoconvert ! video/x-raw, format=BGR ! \
         appsink name=appsink sync=false max-buffers=1 drop=true",
        device = config.device,
        width = config.width,
        height = config.height,
        framerate = config.framerate,
    )
}

#[cfg(feature = "capture-gstreamer")]
pub struct PipelineSource {
    config: CaptureConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    opened: bool,
    frame_count: u64,
    last_error: Option<String>,
}

#[cfg(feature = "capture-gstreamer")]
impl PipelineSource {
    /// Build (but do not start) the pipeline.
    pub fn new(config: CaptureConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let description = pipeline_description(&config);
        let pipeline = gstreamer::parse::launch(&description)
            .context("build capture pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("capture pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name(APPSINK_NAME)
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "BGR")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);

        Ok(Self {
            config,
            pipeline,
            appsink,
            opened: false,
            frame_count: 0,
            last_error: None,
        })
    }

    pub fn name(&self) -> &'static str {
        "gstreamer"
    }

    /// Start the pipeline and wait for it to actually reach PLAYING.
    ///
    /// `set_state` returning Ok only means the change was accepted; a missing
    /// element or a busy device shows up while the state change completes.
    pub fn open(&mut self) -> Result<()> {
        self.last_error = None;
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Playing) {
            self.stop_pipeline();
            return Err(anyhow!(err).context("set capture pipeline to Playing"));
        }

        let (result, current, _pending) = self
            .pipeline
            .state(gstreamer::ClockTime::from_seconds(STATE_CHANGE_TIMEOUT_SECS));
        self.poll_bus();
        if let Err(err) = result {
            self.stop_pipeline();
            let detail = self.last_error.take().unwrap_or_else(|| err.to_string());
            return Err(anyhow!(
                "capture pipeline for {} failed to start: {}",
                self.config.device,
                detail
            ));
        }
        if current != gstreamer::State::Playing {
            self.stop_pipeline();
            return Err(anyhow!(
                "capture pipeline for {} stuck in {:?}",
                self.config.device,
                current
            ));
        }

        self.opened = true;
        log::info!(
            "PipelineSource: connected to {} ({}x{} @ {}fps)",
            self.config.device,
            self.config.width,
            self.config.height,
            self.config.framerate
        );
        Ok(())
    }

    pub fn read(&mut self) -> Result<Frame> {
        if !self.opened {
            return Err(anyhow!("capture pipeline not open"));
        }
        self.poll_bus();
        if let Some(err) = &self.last_error {
            return Err(anyhow!("capture pipeline failed: {}", err));
        }

        let sample = match self.config.read_timeout {
            Some(timeout) => self
                .appsink
                .try_pull_sample(clock_time(timeout))
                .ok_or_else(|| anyhow!("capture pipeline stalled for {:?}", timeout))?,
            None => self
                .appsink
                .pull_sample()
                .map_err(|err| anyhow!("pull capture sample: {}", err))?,
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        Frame::new(pixels, width, height, PixelFormat::Bgr24)
    }

    pub fn close(&mut self) {
        if !self.opened {
            return;
        }
        self.stop_pipeline();
        self.opened = false;
        log::info!(
            "PipelineSource: released {} after {} frames",
            self.config.device,
            self.frame_count
        );
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    fn stop_pipeline(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!(
                "PipelineSource: failed to stop pipeline for {}: {}",
                self.config.device,
                err
            );
        }
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "capture-gstreamer")]
impl Drop for PipelineSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "capture-gstreamer")]
fn clock_time(duration: Duration) -> gstreamer::ClockTime {
    gstreamer::ClockTime::from_mseconds(duration.as_millis() as u64)
}

/// Copy packed BGR rows out of a sample, dropping any stride padding.
#[cfg(feature = "capture-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("capture sample missing buffer")?;
    let caps = sample.caps().context("capture sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse capture caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map capture buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("capture buffer shorter than frame")?
            .to_vec();
        return Ok((pixels, width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("capture buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_carries_device_and_mode() {
        let config = CaptureConfig::new("/dev/video2", 640, 480, 15);
        let description = pipeline_description(&config);
        assert!(description.starts_with("v4l2src device=/dev/video2 ! "));
        assert!(description.contains("image/jpeg, width=640, height=480, framerate=15/1"));
        assert!(description.contains("jpegdec ! nvvidconv ! video/x-raw, format=BGRx"));
        assert!(description.contains("videoconvert ! video/x-raw, format=BGR ! appsink"));
    }
}
