//! Pure frame format conversions.
//!
//! All functions write into a caller-provided buffer and return the byte
//! count produced. Nothing here touches the device or any lock.

use crate::types::{DepthFormat, FrameMode, VideoFormat};
use crate::{Result, SensorError};

/// Convert an unpacked depth frame to 8-bit grayscale replicated across
/// RGB. Each sample maps linearly from its full range onto 0..=255.
pub(crate) fn depth_to_grayscale_rgb(mode: &FrameMode, raw: &[u8], out: &mut [u8]) -> Result<usize> {
    let range = match mode.depth_format {
        Some(DepthFormat::Depth11Bit) => 2048.0,
        Some(DepthFormat::Depth10Bit) => 1024.0,
        _ => {
            return Err(SensorError::Unsupported(
                "grayscale conversion of packed depth formats",
            ))
        }
    };

    let pixels = mode.width * mode.height;
    let needed = pixels * 3;
    if raw.len() < pixels * 2 || out.len() < needed {
        return Err(SensorError::InvalidArgument(format!(
            "depth conversion buffer mismatch: raw {} out {}",
            raw.len(),
            out.len()
        )));
    }

    for (i, sample) in raw.chunks_exact(2).take(pixels).enumerate() {
        let v = u16::from_le_bytes([sample[0], sample[1]]) as f64;
        let c = ((v / range) * 256.0).round().min(255.0) as u8;
        out[i * 3] = c;
        out[i * 3 + 1] = c;
        out[i * 3 + 2] = c;
    }
    Ok(needed)
}

/// Expand an 8-bit infrared frame to RGB by channel replication.
pub(crate) fn ir8_to_rgb(raw: &[u8], out: &mut [u8]) -> Result<usize> {
    let needed = raw.len() * 3;
    if out.len() < needed {
        return Err(SensorError::InvalidArgument(format!(
            "ir conversion buffer too small: {} < {}",
            out.len(),
            needed
        )));
    }
    for (i, &v) in raw.iter().enumerate() {
        out[i * 3] = v;
        out[i * 3 + 1] = v;
        out[i * 3 + 2] = v;
    }
    Ok(needed)
}

/// Whether a video format is already RGB-shaped and needs no conversion.
pub(crate) fn video_is_rgb(format: VideoFormat) -> bool {
    matches!(format, VideoFormat::Rgb | VideoFormat::YuvRgb)
}
