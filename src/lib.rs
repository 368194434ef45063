//! wipeframe: remove a user-selected region from every frame of a video.
//!
//! The caller draws a rectangle on a scaled-down preview; [`crate::core::coordinates`]
//! maps it to native pixels, [`crate::core::pipeline`] inpaints every frame into a
//! picture-only intermediate, and [`crate::core::remux`] produces the deliverable
//! with the original audio at the requested bitrate. [`CleanupJob`]
//! ties the stages together behind a polling status API.

pub mod core;

pub use crate::core::coordinates::{map_selection, NativeRect, ViewportPoint, ViewportSelection};
pub use crate::core::job::{CleanupJob, JobError, JobPhase, JobRequest, JobState, JobStatus};
pub use crate::core::settings::ProcessingConfig;

use crate::core::frame::FrameBuffer;
use crate::core::source::{open_video_source, SourceError};
use std::path::Path;

/// Frame data returned to the frontend for preview rendering.
/// Contains base64-encoded RGBA pixel data and dimensions.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameData {
    pub width: u32,
    pub height: u32,
    /// Base64-encoded RGBA pixel data (width * height * 4 bytes)
    pub rgba_base64: String,
}

/// Extract the first frame of a video for the selection preview.
/// The frontend draws the viewport rectangle over this image.
pub fn extract_preview_frame(path: &Path) -> Result<FrameData, SourceError> {
    use base64::Engine;

    let mut source = open_video_source(path)?;
    let frame = source
        .read_frame()?
        .ok_or_else(|| SourceError::Read("video contains no decodable frames".into()))?;

    // Convert BGRA → RGBA for HTML Canvas ImageData
    let rgba = bgra_to_rgba(&frame);
    let rgba_base64 = base64::engine::general_purpose::STANDARD.encode(&rgba);

    Ok(FrameData {
        width: frame.width,
        height: frame.height,
        rgba_base64,
    })
}

/// Convert BGRA pixel data to RGBA for use with HTML Canvas ImageData
fn bgra_to_rgba(frame: &FrameBuffer) -> Vec<u8> {
    let mut rgba = vec![0u8; frame.data.len()];
    for (src, dst) in frame.data.chunks_exact(4).zip(rgba.chunks_exact_mut(4)) {
        dst[0] = src[2]; // R
        dst[1] = src[1]; // G
        dst[2] = src[0]; // B
        dst[3] = src[3]; // A
    }
    rgba
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_to_rgba_swaps_channels() {
        let mut frame = FrameBuffer::new(2, 1);
        frame.set_pixel(0, 0, [10, 20, 30, 40]);
        frame.set_pixel(1, 0, [1, 2, 3, 4]);

        let rgba = bgra_to_rgba(&frame);
        assert_eq!(&rgba[0..4], &[30, 20, 10, 40]);
        assert_eq!(&rgba[4..8], &[3, 2, 1, 4]);
    }

    #[test]
    fn test_frame_data_serializes_camel_case() {
        let data = FrameData {
            width: 4,
            height: 2,
            rgba_base64: "AAAA".into(),
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"rgbaBase64\":\"AAAA\""));
    }
}
