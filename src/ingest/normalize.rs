use anyhow::{anyhow, Context, Result};
use image::GenericImageView;

/// Wire formats a UVC device may hand back after format negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeviceFormat {
    Mjpeg,
    Yuyv,
    Rgb24,
}

impl DeviceFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"MJPG" | b"JPEG" => Some(DeviceFormat::Mjpeg),
            b"YUYV" => Some(DeviceFormat::Yuyv),
            b"RGB3" => Some(DeviceFormat::Rgb24),
            _ => None,
        }
    }
}

/// Decode one device buffer into packed RGB.
///
/// Returns the decoded dimensions, which for MJPEG come from the JPEG header
/// rather than the negotiated format.
pub(crate) fn decode_to_rgb(
    bytes: &[u8],
    width: u32,
    height: u32,
    format: DeviceFormat,
) -> Result<(Vec<u8>, u32, u32)> {
    match format {
        DeviceFormat::Mjpeg => decode_jpeg(bytes),
        DeviceFormat::Yuyv => Ok((yuyv_to_rgb(bytes, width, height)?, width, height)),
        DeviceFormat::Rgb24 => {
            let expected = width
                .checked_mul(height)
                .and_then(|v| v.checked_mul(3))
                .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?
                as usize;
            let pixels = bytes.get(..expected).ok_or_else(|| {
                anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    bytes.len()
                )
            })?;
            Ok((pixels.to_vec(), width, height))
        }
    }
}

fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg buffer"));
    }
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        .context("decode jpeg")?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Ok((rgb.into_raw(), width, height))
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let expected = w
        .checked_mul(h)
        .and_then(|v| v.checked_mul(2))
        .ok_or_else(|| anyhow!("YUYV frame dimensions overflow"))?;
    if pixels.len() < expected || w % 2 != 0 {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {} for {}x{}, got {}",
            expected,
            width,
            height,
            pixels.len()
        ));
    }

    let mut rgb = Vec::with_capacity(w * h * 3);
    for quad in pixels[..expected].chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }

    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
