//! Coordinate mapping from the viewport the user drew on to native video
//! pixel space. The viewport and the frame may have different aspect ratios,
//! so each axis is scaled independently.

use serde::{Deserialize, Serialize};

/// A point in viewport pixel space (the preview canvas the user drew on).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportPoint {
    pub x: f64,
    pub y: f64,
}

impl ViewportPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A rectangular selection as reported by the front end: the drag start and
/// end corners (in either order), plus the viewport dimensions at the time
/// the selection was made.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportSelection {
    pub start: ViewportPoint,
    pub end: ViewportPoint,
    pub viewport_width: f64,
    pub viewport_height: f64,
}

impl ViewportSelection {
    pub fn new(start: ViewportPoint, end: ViewportPoint, viewport_width: f64, viewport_height: f64) -> Self {
        Self { start, end, viewport_width, viewport_height }
    }
}

/// A rectangle in native frame pixel coordinates.
/// Invariant: fully contained within `[0, frame_width) x [0, frame_height)`
/// and non-empty (enforced by [`map_selection`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl NativeRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether this rect lies entirely within a frame of the given size
    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        self.right() <= frame_width && self.bottom() <= frame_height
    }
}

/// Coordinate mapping errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinateError {
    #[error("Viewport has no size ({width}x{height}); it must be rendered before selecting")]
    InvalidViewportState { width: f64, height: f64 },
    #[error("Selection collapses to zero area in frame space")]
    EmptySelection,
}

/// Map a viewport selection into native frame pixel space.
///
/// The two corners are normalized (the drag may have gone in any direction),
/// each axis is scaled by its own native/viewport ratio, and the result is
/// clamped to frame bounds. A selection that clamps to zero area is an input
/// error, not a silent no-op.
pub fn map_selection(
    selection: &ViewportSelection,
    native_width: u32,
    native_height: u32,
) -> Result<NativeRect, CoordinateError> {
    if selection.viewport_width <= 0.0 || selection.viewport_height <= 0.0 {
        return Err(CoordinateError::InvalidViewportState {
            width: selection.viewport_width,
            height: selection.viewport_height,
        });
    }

    // Normalize corners: drag start/end may be in either order
    let min_x = selection.start.x.min(selection.end.x);
    let min_y = selection.start.y.min(selection.end.y);
    let max_x = selection.start.x.max(selection.end.x);
    let max_y = selection.start.y.max(selection.end.y);

    // Per-axis scale; aspect ratios of viewport and frame can differ
    let scale_x = native_width as f64 / selection.viewport_width;
    let scale_y = native_height as f64 / selection.viewport_height;

    let x1 = (min_x * scale_x).floor().clamp(0.0, native_width as f64) as u32;
    let y1 = (min_y * scale_y).floor().clamp(0.0, native_height as f64) as u32;
    let x2 = (max_x * scale_x).ceil().clamp(0.0, native_width as f64) as u32;
    let y2 = (max_y * scale_y).ceil().clamp(0.0, native_height as f64) as u32;

    let x2 = x2.min(native_width);
    let y2 = y2.min(native_height);

    if x2 <= x1 || y2 <= y1 {
        return Err(CoordinateError::EmptySelection);
    }

    Ok(NativeRect::new(x1, y1, x2 - x1, y2 - y1))
}
