//! Capture backends.
//!
//! This module provides the sources a `CaptureManager` can hold:
//! - Accelerated GStreamer pipeline (feature: capture-gstreamer), the preferred tier
//! - Direct V4L2 device capture (feature: capture-v4l2), the fallback tier
//! - Synthetic test pattern for `stub://` device paths
//!
//! Every backend exposes the same open/read/close contract through `FrameSource`,
//! and `CaptureSource` is the tagged variant over the concrete backends.
//! A backend that was compiled out reports an open failure instead of vanishing,
//! so the tiering logic runs identically on every build.

#[cfg_attr(not(feature = "capture-v4l2"), allow(dead_code))]
mod normalize;
pub mod pipeline;
pub mod synthetic;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

use anyhow::Result;
use std::fmt;

use crate::config::CaptureConfig;
use crate::frame::Frame;

#[cfg(feature = "capture-gstreamer")]
pub use pipeline::PipelineSource;
pub use pipeline::pipeline_description;
pub use synthetic::SyntheticSource;
#[cfg(feature = "capture-v4l2")]
pub use v4l2::V4l2Source;

/// Which acquisition strategy a source belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CaptureTier {
    /// Accelerated/offloaded pipeline, tried first.
    Preferred,
    /// Generic device capture, tried second.
    Fallback,
}

impl fmt::Display for CaptureTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureTier::Preferred => f.write_str("preferred"),
            CaptureTier::Fallback => f.write_str("fallback"),
        }
    }
}

/// A capture backend.
///
/// Sources are created closed. `open` acquires the device, `read` blocks for
/// the next decoded frame, `close` releases everything and must be safe to
/// call more than once.
pub trait FrameSource {
    /// Backend identifier, for logs.
    fn name(&self) -> &'static str;

    fn open(&mut self) -> Result<()>;

    fn read(&mut self) -> Result<Frame>;

    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Builds the source for a tier. The seam where tests substitute doubles.
pub trait SourceProvider: Send {
    fn source(&mut self, tier: CaptureTier, config: &CaptureConfig)
        -> Result<Box<dyn FrameSource>>;
}

/// Tagged variant over the concrete capture backends.
pub enum CaptureSource {
    Synthetic(SyntheticSource),
    #[cfg(feature = "capture-gstreamer")]
    Pipeline(PipelineSource),
    #[cfg(feature = "capture-v4l2")]
    Device(V4l2Source),
}

impl CaptureSource {
    /// Select the backend for `tier`. `stub://` paths get a synthetic camera on
    /// both tiers.
    pub fn for_tier(tier: CaptureTier, config: &CaptureConfig) -> Result<Self> {
        if config.device.starts_with(synthetic::STUB_SCHEME) {
            return Ok(CaptureSource::Synthetic(SyntheticSource::new(tier, config)?));
        }
        match tier {
            CaptureTier::Preferred => preferred_source(config),
            CaptureTier::Fallback => fallback_source(config),
        }
    }
}

#[cfg(feature = "capture-gstreamer")]
fn preferred_source(config: &CaptureConfig) -> Result<CaptureSource> {
    Ok(CaptureSource::Pipeline(PipelineSource::new(config.clone())?))
}

#[cfg(not(feature = "capture-gstreamer"))]
fn preferred_source(config: &CaptureConfig) -> Result<CaptureSource> {
    anyhow::bail!(
        "accelerated pipeline for {} requires the capture-gstreamer feature",
        config.device
    )
}

#[cfg(feature = "capture-v4l2")]
fn fallback_source(config: &CaptureConfig) -> Result<CaptureSource> {
    Ok(CaptureSource::Device(V4l2Source::new(config.clone())))
}

#[cfg(not(feature = "capture-v4l2"))]
fn fallback_source(config: &CaptureConfig) -> Result<CaptureSource> {
    anyhow::bail!(
        "device capture for {} requires the capture-v4l2 feature",
        config.device
    )
}

impl FrameSource for CaptureSource {
    fn name(&self) -> &'static str {
        match self {
            CaptureSource::Synthetic(source) => source.name(),
            #[cfg(feature = "capture-gstreamer")]
            CaptureSource::Pipeline(source) => source.name(),
            #[cfg(feature = "capture-v4l2")]
            CaptureSource::Device(source) => source.name(),
        }
    }

    fn open(&mut self) -> Result<()> {
        match self {
            CaptureSource::Synthetic(source) => source.open(),
            #[cfg(feature = "capture-gstreamer")]
            CaptureSource::Pipeline(source) => source.open(),
            #[cfg(feature = "capture-v4l2")]
            CaptureSource::Device(source) => source.open(),
        }
    }

    fn read(&mut self) -> Result<Frame> {
        match self {
            CaptureSource::Synthetic(source) => source.read(),
            #[cfg(feature = "capture-gstreamer")]
            CaptureSource::Pipeline(source) => source.read(),
            #[cfg(feature = "capture-v4l2")]
            CaptureSource::Device(source) => source.read(),
        }
    }

    fn close(&mut self) {
        match self {
            CaptureSource::Synthetic(source) => source.close(),
            #[cfg(feature = "capture-gstreamer")]
            CaptureSource::Pipeline(source) => source.close(),
            #[cfg(feature = "capture-v4l2")]
            CaptureSource::Device(source) => source.close(),
        }
    }

    fn is_open(&self) -> bool {
        match self {
            CaptureSource::Synthetic(source) => source.is_open(),
            #[cfg(feature = "capture-gstreamer")]
            CaptureSource::Pipeline(source) => source.is_open(),
            #[cfg(feature = "capture-v4l2")]
            CaptureSource::Device(source) => source.is_open(),
        }
    }
}

/// Provider backed by the real capture backends.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceProvider;

impl SourceProvider for DeviceProvider {
    fn source(
        &mut self,
        tier: CaptureTier,
        config: &CaptureConfig,
    ) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(CaptureSource::for_tier(tier, config)?))
    }
}

/// Hardware capture backends compiled into this build. Empty means only
/// `stub://` devices can be opened.
pub fn hardware_backends() -> Vec<&'static str> {
    #[allow(unused_mut)]
    let mut backends = Vec::new();
    #[cfg(feature = "capture-gstreamer")]
    backends.push("gstreamer");
    #[cfg(feature = "capture-v4l2")]
    backends.push("v4l2");
    backends
}

/// Warn when `device` names real hardware that this build cannot open.
pub fn warn_if_no_hardware(device: &str) {
    if hardware_backends().is_empty() && !device.starts_with(synthetic::STUB_SCHEME) {
        log::warn!(
            "built without capture-gstreamer or capture-v4l2; {} cannot be opened, \
             rebuild with --features capture-v4l2",
            device
        );
    }
}
