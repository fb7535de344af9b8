//! Two-tier capture acquisition.
//!
//! `CaptureManager` owns exactly one open `FrameSource` while capturing. It
//! opens the preferred (accelerated) tier first and falls back to generic
//! device capture when that fails, either at open time or on the first read
//! failure. The switch happens at most once per session: a fallback source
//! that stops producing frames ends the session.
//!
//! ```text
//! Unopened -> Preferred -> Fallback -> Closed
//! ```

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::frame::Frame;
use crate::ingest::{CaptureTier, DeviceProvider, FrameSource, SourceProvider};

/// Counters for health logging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureStats {
    pub device: String,
    pub tier: CaptureTier,
    pub frames_captured: u64,
    /// Preferred-to-fallback switches caused by read failures.
    pub degrades: u32,
}

pub struct CaptureManager {
    config: CaptureConfig,
    provider: Box<dyn SourceProvider>,
    source: Option<Box<dyn FrameSource>>,
    tier: CaptureTier,
    frames_captured: u64,
    degrades: u32,
}

impl CaptureManager {
    /// Open `config.device` with the built-in capture backends.
    pub fn open(config: CaptureConfig) -> Result<Self, CaptureError> {
        Self::with_provider(config, Box::new(DeviceProvider))
    }

    /// Open `config.device`, building sources through `provider`.
    pub fn with_provider(
        config: CaptureConfig,
        provider: Box<dyn SourceProvider>,
    ) -> Result<Self, CaptureError> {
        let mut manager = Self {
            config,
            provider,
            source: None,
            tier: CaptureTier::Preferred,
            frames_captured: 0,
            degrades: 0,
        };

        match manager.open_tier(CaptureTier::Preferred) {
            Ok(source) => {
                log::info!(
                    "CaptureManager: {} opened on preferred tier ({})",
                    manager.config.device,
                    source.name()
                );
                manager.source = Some(source);
            }
            Err(err) => {
                log::warn!(
                    "CaptureManager: preferred pipeline failed for {}: {:#}; \
                     falling back to device capture",
                    manager.config.device,
                    err
                );
                manager.tier = CaptureTier::Fallback;
                let source = manager.open_fallback()?;
                log::info!(
                    "CaptureManager: {} opened on fallback tier ({})",
                    manager.config.device,
                    source.name()
                );
                manager.source = Some(source);
            }
        }

        Ok(manager)
    }

    /// Read one frame, degrading to the fallback tier once if the preferred
    /// source fails.
    ///
    /// A handled degrade is invisible to the caller: the read is retried
    /// against the fresh fallback source within the same call.
    pub fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let result = match self.source.as_mut() {
            Some(source) => source.read(),
            None => return Err(self.stream_ended()),
        };

        let err = match result {
            Ok(frame) => return Ok(self.count(frame)),
            Err(err) => err,
        };

        if self.tier == CaptureTier::Fallback {
            log::warn!(
                "CaptureManager: fallback read failed for {}: {:#}; ending stream",
                self.config.device,
                err
            );
            self.close();
            return Err(self.stream_ended());
        }

        log::warn!(
            "CaptureManager: preferred read failed for {}: {:#}; falling back to device capture",
            self.config.device,
            err
        );
        self.close();
        self.tier = CaptureTier::Fallback;
        let mut source = self.open_fallback()?;
        self.degrades += 1;

        match source.read() {
            Ok(frame) => {
                log::info!(
                    "CaptureManager: {} degraded to fallback tier ({})",
                    self.config.device,
                    source.name()
                );
                self.source = Some(source);
                Ok(self.count(frame))
            }
            Err(err) => {
                log::warn!(
                    "CaptureManager: fallback read failed right after degrade for {}: {:#}",
                    self.config.device,
                    err
                );
                source.close();
                Err(self.stream_ended())
            }
        }
    }

    /// Release the active source. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
            log::debug!(
                "CaptureManager: closed {} ({} tier, {} frames)",
                self.config.device,
                self.tier,
                self.frames_captured
            );
        }
    }

    pub fn tier(&self) -> CaptureTier {
        self.tier
    }

    pub fn is_open(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.is_open())
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            device: self.config.device.clone(),
            tier: self.tier,
            frames_captured: self.frames_captured,
            degrades: self.degrades,
        }
    }

    fn open_tier(&mut self, tier: CaptureTier) -> anyhow::Result<Box<dyn FrameSource>> {
        let mut source = self.provider.source(tier, &self.config)?;
        if let Err(err) = source.open() {
            source.close();
            return Err(err);
        }
        Ok(source)
    }

    fn open_fallback(&mut self) -> Result<Box<dyn FrameSource>, CaptureError> {
        self.open_tier(CaptureTier::Fallback).map_err(|err| {
            log::error!(
                "CaptureManager: fallback capture failed for {}: {:#}",
                self.config.device,
                err
            );
            CaptureError::DeviceUnavailable {
                device: self.config.device.clone(),
            }
        })
    }

    fn count(&mut self, frame: Frame) -> Frame {
        self.frames_captured += 1;
        frame
    }

    fn stream_ended(&self) -> CaptureError {
        CaptureError::StreamEnded {
            device: self.config.device.clone(),
        }
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        self.close();
    }
}
