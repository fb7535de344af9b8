use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::encode::DEFAULT_JPEG_QUALITY;

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_FRAMERATE: u32 = 30;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    capture: Option<CaptureConfigFile>,
    server: Option<ServerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    framerate: Option<u32>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    host: Option<String>,
    port: Option<u16>,
    jpeg_quality: Option<u8>,
}

/// What to open and at which mode. Fixed for the lifetime of a capture session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Device path (e.g., "/dev/video0"), or `stub://name?...` for a synthetic camera.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Frames per second requested from the device.
    pub framerate: u32,
    /// Upper bound on a single blocking read. `None` waits as long as the device does.
    pub read_timeout: Option<Duration>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            framerate: DEFAULT_FRAMERATE,
            read_timeout: None,
        }
    }
}

impl CaptureConfig {
    pub fn new(device: impl Into<String>, width: u32, height: u32, framerate: u32) -> Self {
        Self {
            device: device.into(),
            width,
            height,
            framerate,
            read_timeout: None,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Nominal spacing between frames at the configured rate.
    pub fn frame_interval(&self) -> Duration {
        if self.framerate == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis((1000 / self.framerate).max(1) as u64)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(anyhow!("capture device must not be empty"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!(
                "capture size must be non-zero (got {}x{})",
                self.width,
                self.height
            ));
        }
        if self.framerate == 0 {
            return Err(anyhow!("framerate must be greater than zero"));
        }
        if self.read_timeout == Some(Duration::ZERO) {
            return Err(anyhow!("read timeout must be greater than zero when set"));
        }
        Ok(())
    }
}

/// Values given on the command line. Anything set here wins over file and env.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub device: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub framerate: Option<u32>,
    pub read_timeout_ms: Option<u64>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub jpeg_quality: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub host: String,
    pub port: u16,
    pub jpeg_quality: u8,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl AppConfig {
    /// Load from an optional JSON file (falling back to `USBCAM_CONFIG`), then
    /// apply `USBCAM_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var("USBCAM_CONFIG")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        };
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let capture = file.capture.unwrap_or_default();
        let server = file.server.unwrap_or_default();
        Self {
            capture: CaptureConfig {
                device: capture
                    .device
                    .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
                width: capture.width.unwrap_or(DEFAULT_WIDTH),
                height: capture.height.unwrap_or(DEFAULT_HEIGHT),
                framerate: capture.framerate.unwrap_or(DEFAULT_FRAMERATE),
                read_timeout: capture.read_timeout_ms.map(Duration::from_millis),
            },
            host: server.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: server.port.unwrap_or(DEFAULT_PORT),
            jpeg_quality: server.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("USBCAM_DEVICE") {
            if !device.trim().is_empty() {
                self.capture.device = device;
            }
        }
        if let Some(width) = parse_env("USBCAM_WIDTH")? {
            self.capture.width = width;
        }
        if let Some(height) = parse_env("USBCAM_HEIGHT")? {
            self.capture.height = height;
        }
        if let Some(framerate) = parse_env("USBCAM_FRAMERATE")? {
            self.capture.framerate = framerate;
        }
        if let Some(ms) = parse_env::<u64>("USBCAM_READ_TIMEOUT_MS")? {
            self.capture.read_timeout = Some(Duration::from_millis(ms));
        }
        if let Ok(host) = std::env::var("USBCAM_HOST") {
            if !host.trim().is_empty() {
                self.host = host;
            }
        }
        if let Some(port) = parse_env("USBCAM_PORT")? {
            self.port = port;
        }
        if let Some(quality) = parse_env("USBCAM_JPEG_QUALITY")? {
            self.jpeg_quality = quality;
        }
        Ok(())
    }

    /// Apply command-line values and re-validate.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<()> {
        if let Some(device) = overrides.device {
            self.capture.device = device;
        }
        if let Some(width) = overrides.width {
            self.capture.width = width;
        }
        if let Some(height) = overrides.height {
            self.capture.height = height;
        }
        if let Some(framerate) = overrides.framerate {
            self.capture.framerate = framerate;
        }
        if let Some(ms) = overrides.read_timeout_ms {
            self.capture.read_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(quality) = overrides.jpeg_quality {
            self.jpeg_quality = quality;
        }
        self.validate()
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn validate(&self) -> Result<()> {
        self.capture.validate()?;
        if self.host.trim().is_empty() {
            return Err(anyhow!("server host must not be empty"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!(
                "jpeg quality must be within 1..=100 (got {})",
                self.jpeg_quality
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be an unsigned integer (got '{}')", key, value)),
        _ => Ok(None),
    }
}
