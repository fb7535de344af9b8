//! usbcam_display - show the camera in a local window
//!
//! Press Escape or close the window to quit. Real cameras need a build with
//! the `capture-gstreamer` and/or `capture-v4l2` feature as well as `display`.

use anyhow::Result;
use clap::Parser;

use usbcam_mjpeg::{
    cli::CaptureArgs,
    display::{run_display_loop, WindowDisplay},
    ingest,
    CaptureManager,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Display a USB MJPEG camera in a window",
    after_help = "Real devices need a build with the capture-v4l2 or capture-gstreamer feature."
)]
struct Args {
    #[command(flatten)]
    capture: CaptureArgs,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.capture.load(None)?;

    ingest::warn_if_no_hardware(&config.capture.device);
    let capture = CaptureManager::open(config.capture)?;
    log::info!("displaying {} via {} capture", capture.config().device, capture.tier());

    let outcome = run_display_loop(capture, WindowDisplay::new("USB MJPEG Camera"))?;
    log::info!("usbcam_display finished: {:?}", outcome);
    Ok(())
}
