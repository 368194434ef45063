//! Single-channel binary mask marking the region to inpaint.
//! Built once per job from the mapped rectangle and reused for every frame.

use super::coordinates::NativeRect;

/// Mask pixel value inside the selected region
pub const SELECTED: u8 = 255;
/// Mask pixel value outside the selected region
pub const UNSELECTED: u8 = 0;

/// Mask construction errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum MaskError {
    #[error("Rect {rect:?} lies outside a {width}x{height} frame")]
    InvalidRect { rect: NativeRect, width: u32, height: u32 },
}

/// Frame-sized single-channel buffer: 255 inside the rectangle, 0 elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMask {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl RegionMask {
    /// Build a mask with `rect` filled.
    ///
    /// The mapper already clamps to frame bounds, but this is the seam
    /// between components so the invariant is checked again here.
    pub fn build(rect: &NativeRect, frame_width: u32, frame_height: u32) -> Result<Self, MaskError> {
        if rect.area() == 0 || !rect.fits_within(frame_width, frame_height) {
            return Err(MaskError::InvalidRect {
                rect: *rect,
                width: frame_width,
                height: frame_height,
            });
        }

        let mut data = vec![UNSELECTED; (frame_width * frame_height) as usize];
        for y in rect.y..rect.bottom() {
            let row_start = (y * frame_width + rect.x) as usize;
            let row_end = row_start + rect.width as usize;
            data[row_start..row_end].fill(SELECTED);
        }

        Ok(Self { data, width: frame_width, height: frame_height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn is_selected(&self, x: u32, y: u32) -> bool {
        self.data[(y * self.width + x) as usize] == SELECTED
    }

    /// Number of selected pixels
    pub fn selected_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == SELECTED).count()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_fills_rect_only() {
        let rect = NativeRect::new(2, 1, 3, 2);
        let mask = RegionMask::build(&rect, 8, 6).unwrap();

        assert_eq!(mask.selected_count(), 6);
        assert!(mask.is_selected(2, 1));
        assert!(mask.is_selected(4, 2));
        assert!(!mask.is_selected(1, 1));
        assert!(!mask.is_selected(5, 1));
        assert!(!mask.is_selected(2, 0));
        assert!(!mask.is_selected(2, 3));
    }

    #[test]
    fn test_build_full_frame() {
        let rect = NativeRect::new(0, 0, 4, 4);
        let mask = RegionMask::build(&rect, 4, 4).unwrap();
        assert_eq!(mask.selected_count(), 16);
    }

    #[test]
    fn test_build_rejects_out_of_bounds_rect() {
        let rect = NativeRect::new(2, 2, 10, 10);
        match RegionMask::build(&rect, 8, 8) {
            Err(MaskError::InvalidRect { .. }) => {}
            other => panic!("Expected InvalidRect, got {:?}", other),
        }
    }

    #[test]
    fn test_build_rejects_empty_rect() {
        let rect = NativeRect::new(1, 1, 0, 5);
        assert!(RegionMask::build(&rect, 8, 8).is_err());
    }

    #[test]
    fn test_build_is_deterministic() {
        let rect = NativeRect::new(1, 2, 3, 2);
        let a = RegionMask::build(&rect, 10, 10).unwrap();
        let b = RegionMask::build(&rect, 10, 10).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }
}
