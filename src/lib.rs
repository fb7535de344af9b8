//! USB MJPEG camera capture and streaming.
//!
//! A camera is acquired through one of two tiers: an accelerated GStreamer
//! pipeline first, direct V4L2 capture second. `CaptureManager` owns that
//! choice, degrades from the preferred to the fallback tier at most once, and
//! reports a clean end of stream when the fallback tier also fails. Frames
//! are consumed by one of two front ends:
//!
//! - `display`: a local window until Escape or end of stream
//! - `server`: an HTTP `multipart/x-mixed-replace` stream shared by every
//!   connected viewer
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (GStreamer pipeline, V4L2 device, `stub://` synthetic)
//! - `capture`: tiered acquisition and degradation
//! - `encode`: JPEG compression and multipart framing
//! - `config`, `cli`: file/env/flag configuration
//! - `frame`, `error`: shared types

pub mod capture;
pub mod cli;
pub mod config;
pub mod display;
pub mod encode;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod server;

pub use capture::{CaptureManager, CaptureStats};
pub use config::{AppConfig, CaptureConfig, ConfigOverrides};
pub use display::{run_display_loop, DisplayOutcome, DisplaySink};
pub use encode::{EncodedFrame, StreamEncoder, BOUNDARY};
pub use error::{CaptureError, EncodeError};
pub use frame::{Frame, PixelFormat};
pub use ingest::{CaptureTier, DeviceProvider, FrameSource, SourceProvider};
pub use server::{ServerConfig, ServerHandle, VideoServer};
