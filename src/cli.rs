//! Command-line flags shared by the binaries.
//!
//! Every flag is optional so that unset flags fall through to the config file
//! and `USBCAM_*` environment variables; the defaults below are what remains
//! when nothing sets a value.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::config::{AppConfig, ConfigOverrides};

#[derive(Args, Debug, Clone, Default)]
pub struct CaptureArgs {
    /// JSON config file.
    #[arg(long, env = "USBCAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Camera device node [default: /dev/video0].
    #[arg(long)]
    pub device: Option<String>,

    /// Requested capture width [default: 1280].
    #[arg(long)]
    pub width: Option<u32>,

    /// Requested capture height [default: 720].
    #[arg(long)]
    pub height: Option<u32>,

    /// Requested frames per second [default: 30].
    #[arg(long)]
    pub framerate: Option<u32>,

    /// Fail a blocked frame read after this many milliseconds.
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Address to listen on [default: 0.0.0.0].
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on [default: 5000].
    #[arg(long)]
    pub port: Option<u16>,

    /// JPEG quality for streamed frames, 1-100 [default: 80].
    #[arg(long)]
    pub jpeg_quality: Option<u8>,
}

impl CaptureArgs {
    /// Resolve the effective config: file, then env, then these flags.
    pub fn load(&self, serve: Option<&ServeArgs>) -> Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        config.apply_overrides(self.overrides(serve))?;
        Ok(config)
    }

    fn overrides(&self, serve: Option<&ServeArgs>) -> ConfigOverrides {
        let serve = serve.cloned().unwrap_or_default();
        ConfigOverrides {
            device: self.device.clone(),
            width: self.width,
            height: self.height,
            framerate: self.framerate,
            read_timeout_ms: self.read_timeout_ms,
            host: serve.host,
            port: serve.port,
            jpeg_quality: serve.jpeg_quality,
        }
    }
}
