//! usbcam_web - serve the camera as an MJPEG stream over HTTP
//!
//! Open http://<host>:<port>/ in a browser to watch. All viewers share one
//! capture session; the device is released while nobody is watching.
//!
//! Real cameras need a build with the `capture-gstreamer` and/or
//! `capture-v4l2` feature; the default build only opens `stub://` devices.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::mpsc;

use usbcam_mjpeg::{
    cli::{CaptureArgs, ServeArgs},
    ingest,
    server::{ServerConfig, VideoServer},
    CaptureManager,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Stream a USB MJPEG camera over HTTP",
    after_help = "Real devices need a build with the capture-v4l2 or capture-gstreamer feature."
)]
struct Args {
    #[command(flatten)]
    capture: CaptureArgs,

    #[command(flatten)]
    serve: ServeArgs,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.capture.load(Some(&args.serve))?;

    ingest::warn_if_no_hardware(&config.capture.device);

    // Fail fast if neither capture path can open the device. The check is
    // released before serving; the first viewer opens it again.
    let mut check = CaptureManager::open(config.capture.clone())?;
    log::info!(
        "camera {} available via {} capture",
        config.capture.device,
        check.tier()
    );
    check.close();

    let handle = VideoServer::new(ServerConfig::from_app(&config)).spawn()?;
    log::info!(
        "usbcam_web running: {}x{} @ {} fps from {}, open http://{}/",
        config.capture.width,
        config.capture.height,
        config.capture.framerate,
        config.capture.device,
        handle.addr
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("set Ctrl-C handler")?;

    let _ = rx.recv();
    log::info!("shutdown signal received, stopping video server...");
    handle.stop()?;
    Ok(())
}
