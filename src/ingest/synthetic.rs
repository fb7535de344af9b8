//! Synthetic camera for `stub://` device paths.
//!
//! Produces a moving RGB test pattern at the configured size and rate, so the
//! binaries and the HTTP endpoint can run without hardware. Query parameters on
//! the stub path script failures for exercising the tiering logic:
//!
//! - `preferred=fail` / `fallback=fail`: opening that tier fails
//! - `frames=N`: every source yields N frames, then reads fail
//! - `preferred_frames=N` / `fallback_frames=N`: per-tier override of `frames`
//! - `stall_ms=N`: every read blocks for N ms, like a wedged device. With a
//!   read timeout configured, a stall longer than the timeout fails the read
//!   once the timeout has elapsed.
//! - `preferred_stall_ms=N` / `fallback_stall_ms=N`: per-tier override of
//!   `stall_ms`
//!
//! e.g. `stub://front?preferred=fail&frames=3`

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::CaptureTier;
use crate::config::CaptureConfig;
use crate::frame::{Frame, PixelFormat};

pub const STUB_SCHEME: &str = "stub://";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct StubScript {
    open_fails: bool,
    frame_limit: Option<u64>,
    stall: Option<Duration>,
}

impl StubScript {
    fn parse(device: &str, tier: CaptureTier) -> Result<Self> {
        let query = device.split_once('?').map(|(_, q)| q).unwrap_or("");
        let (tier_key, frames_key, stall_key) = match tier {
            CaptureTier::Preferred => ("preferred", "preferred_frames", "preferred_stall_ms"),
            CaptureTier::Fallback => ("fallback", "fallback_frames", "fallback_stall_ms"),
        };
        let mut script = StubScript::default();
        let (mut shared_limit, mut tier_limit) = (None, None);
        let (mut shared_stall, mut tier_stall) = (None, None);
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                k if k == tier_key => script.open_fails = value == "fail",
                "frames" => shared_limit = Some(parse_count(key, value)?),
                k if k == frames_key => tier_limit = Some(parse_count(key, value)?),
                "stall_ms" => shared_stall = Some(parse_count(key, value)?),
                k if k == stall_key => tier_stall = Some(parse_count(key, value)?),
                _ => {}
            }
        }
        script.frame_limit = tier_limit.or(shared_limit);
        script.stall = tier_stall.or(shared_stall).map(Duration::from_millis);
        Ok(script)
    }
}

fn parse_count(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| anyhow!("stub option '{}' must be a count (got '{}')", key, value))
}

pub struct SyntheticSource {
    config: CaptureConfig,
    tier: CaptureTier,
    script: StubScript,
    opened: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(tier: CaptureTier, config: &CaptureConfig) -> Result<Self> {
        Ok(Self {
            script: StubScript::parse(&config.device, tier)?,
            config: config.clone(),
            tier,
            opened: false,
            frame_count: 0,
            last_frame_at: None,
        })
    }

    pub fn name(&self) -> &'static str {
        "synthetic"
    }

    /// Synthetic sources are always "connected" unless scripted otherwise.
    pub fn open(&mut self) -> Result<()> {
        if self.script.open_fails {
            return Err(anyhow!(
                "SyntheticSource: {} tier scripted to fail opening {}",
                self.tier,
                self.config.device
            ));
        }
        self.opened = true;
        log::info!(
            "SyntheticSource: connected to {} ({} tier, {}x{})",
            self.config.device,
            self.tier,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    pub fn read(&mut self) -> Result<Frame> {
        if !self.opened {
            return Err(anyhow!("synthetic source not open"));
        }
        if let Some(limit) = self.script.frame_limit {
            if self.frame_count >= limit {
                return Err(anyhow!(
                    "synthetic stream {} exhausted after {} frames",
                    self.config.device,
                    limit
                ));
            }
        }

        self.pace();
        self.stall()?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        let pixels = self.generate_pixels();
        Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            PixelFormat::Rgb24,
        )
    }

    pub fn close(&mut self) {
        if self.opened {
            log::debug!("SyntheticSource: closed {}", self.config.device);
        }
        self.opened = false;
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    // Hold the configured framerate like a real camera would.
    fn pace(&self) {
        let Some(last) = self.last_frame_at else {
            return;
        };
        let interval = self.config.frame_interval();
        let elapsed = last.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }

    // Block like a device that has stopped delivering buffers, honoring the
    // read timeout the way the hardware backends do.
    fn stall(&self) -> Result<()> {
        let Some(stall) = self.script.stall else {
            return Ok(());
        };
        match self.config.read_timeout {
            Some(timeout) if stall > timeout => {
                std::thread::sleep(timeout);
                Err(anyhow!(
                    "synthetic stream {} stalled past the {:?} read timeout",
                    self.config.device,
                    timeout
                ))
            }
            _ => {
                std::thread::sleep(stall);
                Ok(())
            }
        }
    }

    /// Diagonal gradient that scrolls one step per frame.
    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let shift = self.frame_count as usize;
        let mut pixels = vec![0u8; width * height * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i % width;
            let y = i / width;
            px[0] = ((x + shift) % 256) as u8;
            px[1] = ((y + shift) % 256) as u8;
            px[2] = ((x + y) % 256) as u8;
        }
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(device: &str) -> CaptureConfig {
        CaptureConfig::new(device, 32, 24, 200)
    }

    #[test]
    fn produces_frames_at_configured_size() -> Result<()> {
        let mut source = SyntheticSource::new(CaptureTier::Preferred, &stub_config("stub://cam"))?;
        source.open()?;

        let frame = source.read()?;
        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!(frame.format, PixelFormat::Rgb24);

        let next = source.read()?;
        assert_ne!(frame.pixels(), next.pixels(), "pattern should move");
        Ok(())
    }

    #[test]
    fn scripted_open_failure_is_per_tier() -> Result<()> {
        let config = stub_config("stub://cam?preferred=fail");
        let mut preferred = SyntheticSource::new(CaptureTier::Preferred, &config)?;
        let mut fallback = SyntheticSource::new(CaptureTier::Fallback, &config)?;
        assert!(preferred.open().is_err());
        assert!(!preferred.is_open());
        fallback.open()?;
        assert!(fallback.is_open());
        Ok(())
    }

    #[test]
    fn frame_limit_ends_the_stream() -> Result<()> {
        let config = stub_config("stub://cam?frames=5&fallback_frames=2");
        let mut source = SyntheticSource::new(CaptureTier::Fallback, &config)?;
        source.open()?;
        source.read()?;
        source.read()?;
        assert!(source.read().is_err());
        assert_eq!(source.frames_captured(), 2);
        Ok(())
    }

    #[test]
    fn stall_beyond_read_timeout_fails_the_read() -> Result<()> {
        let config = stub_config("stub://cam?stall_ms=5&fallback_stall_ms=2000")
            .with_read_timeout(Duration::from_millis(50));

        let mut preferred = SyntheticSource::new(CaptureTier::Preferred, &config)?;
        preferred.open()?;
        preferred.read()?;

        let mut fallback = SyntheticSource::new(CaptureTier::Fallback, &config)?;
        fallback.open()?;
        let started = Instant::now();
        let err = fallback.read().unwrap_err();
        assert!(err.to_string().contains("read timeout"));
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(fallback.frames_captured(), 0);
        Ok(())
    }

    #[test]
    fn stall_without_read_timeout_only_delays() -> Result<()> {
        let mut source =
            SyntheticSource::new(CaptureTier::Preferred, &stub_config("stub://cam?stall_ms=30"))?;
        source.open()?;
        let started = Instant::now();
        source.read()?;
        assert!(started.elapsed() >= Duration::from_millis(30));
        Ok(())
    }

    #[test]
    fn rejects_malformed_counts() {
        let config = stub_config("stub://cam?frames=lots");
        assert!(SyntheticSource::new(CaptureTier::Preferred, &config).is_err());
    }

    #[test]
    fn reading_before_open_fails() -> Result<()> {
        let mut source = SyntheticSource::new(CaptureTier::Fallback, &stub_config("stub://cam"))?;
        assert!(source.read().is_err());
        Ok(())
    }
}
