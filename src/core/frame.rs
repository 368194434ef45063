//! BGRA frame buffer shared by the decoder, the inpainter and the encoder.

use super::encoder::VideoFrame;

/// BGRA pixel buffer
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row (typically width * 4 for BGRA)
    pub stride: u32,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let stride = width * 4;
        Self {
            data: vec![0u8; (stride * height) as usize],
            width,
            height,
            stride,
        }
    }

    /// Create a frame filled with a solid BGRA color
    pub fn solid(width: u32, height: u32, b: u8, g: u8, r: u8, a: u8) -> Self {
        let stride = width * 4;
        let mut data = vec![0u8; (stride * height) as usize];
        for pixel in data.chunks_exact_mut(4) {
            pixel[0] = b;
            pixel[1] = g;
            pixel[2] = r;
            pixel[3] = a;
        }
        Self { data, width, height, stride }
    }

    /// Get pixel at (x, y) as [B, G, R, A]
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y * self.stride + x * 4) as usize;
        if offset + 3 < self.data.len() {
            [self.data[offset], self.data[offset + 1], self.data[offset + 2], self.data[offset + 3]]
        } else {
            [0, 0, 0, 0]
        }
    }

    /// Set pixel at (x, y) from [B, G, R, A]
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: [u8; 4]) {
        let offset = (y * self.stride + x * 4) as usize;
        if offset + 3 < self.data.len() {
            self.data[offset] = pixel[0];
            self.data[offset + 1] = pixel[1];
            self.data[offset + 2] = pixel[2];
            self.data[offset + 3] = pixel[3];
        }
    }

    /// Convert to VideoFrame by moving data (avoids a full-frame clone)
    pub fn into_video_frame(self, pts: f64) -> VideoFrame {
        VideoFrame {
            data: self.data,
            width: self.width,
            height: self.height,
            stride: self.stride,
            pts,
        }
    }
}
