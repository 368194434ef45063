//! Neighborhood-based inpainting of the masked region.
//!
//! Masked pixels are filled outside-in: a BFS from the mask boundary orders
//! pixels by distance, and each is reconstructed from an inverse-distance
//! weighted average of the known pixels inside its radius window. Larger
//! radius samples further and produces a smoother, less precise fill.

use std::collections::VecDeque;

use super::frame::FrameBuffer;
use super::mask::RegionMask;

/// Inpainting errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum InpaintError {
    #[error("Frame is {frame_width}x{frame_height} but mask is {mask_width}x{mask_height}")]
    DimensionMismatch {
        frame_width: u32,
        frame_height: u32,
        mask_width: u32,
        mask_height: u32,
    },
}

/// Inpaint `frame` under `mask` with the given sampling radius.
///
/// The input frame is not modified; a new buffer is returned. Deterministic
/// for fixed inputs: pixels are processed in (boundary distance, raster)
/// order. A mask that covers the entire frame has nothing to sample from;
/// those pixels pass through unchanged.
pub fn inpaint(
    frame: &FrameBuffer,
    mask: &RegionMask,
    radius: u32,
) -> Result<FrameBuffer, InpaintError> {
    if frame.width != mask.width() || frame.height != mask.height() {
        return Err(InpaintError::DimensionMismatch {
            frame_width: frame.width,
            frame_height: frame.height,
            mask_width: mask.width(),
            mask_height: mask.height(),
        });
    }

    let w = frame.width;
    let h = frame.height;
    let radius = radius.max(1) as i64;

    let mut output = frame.clone();

    // `known[i]` — pixel i holds trustworthy data (unselected, or already filled)
    let mut known = vec![false; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            known[(y * w + x) as usize] = !mask.is_selected(x, y);
        }
    }

    // BFS distance from the mask boundary (4-neighborhood)
    const UNREACHED: u32 = u32::MAX;
    let mut dist = vec![UNREACHED; (w * h) as usize];
    let mut queue = VecDeque::new();

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            if known[idx] {
                dist[idx] = 0;
            } else if has_known_neighbor(&known, x, y, w, h) {
                dist[idx] = 1;
                queue.push_back((x, y));
            }
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        let d = dist[(y * w + x) as usize];
        for (nx, ny) in neighbors4(x, y, w, h) {
            let nidx = (ny * w + nx) as usize;
            if dist[nidx] == UNREACHED {
                dist[nidx] = d + 1;
                queue.push_back((nx, ny));
            }
        }
    }

    // Fill order: outside-in, raster order within each distance layer
    let mut order: Vec<(u32, u32, u32)> = Vec::with_capacity(mask.selected_count());
    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            if mask.is_selected(x, y) && dist[idx] != UNREACHED {
                order.push((dist[idx], y, x));
            }
        }
    }
    order.sort_unstable();

    for (_, y, x) in order {
        let mut weight_sum = 0.0f64;
        let mut acc = [0.0f64; 4];

        let x_min = (x as i64 - radius).max(0);
        let x_max = (x as i64 + radius).min(w as i64 - 1);
        let y_min = (y as i64 - radius).max(0);
        let y_max = (y as i64 + radius).min(h as i64 - 1);

        for ny in y_min..=y_max {
            for nx in x_min..=x_max {
                let nidx = (ny as u32 * w + nx as u32) as usize;
                if !known[nidx] {
                    continue;
                }
                let dx = nx - x as i64;
                let dy = ny - y as i64;
                let d2 = (dx * dx + dy * dy) as f64;
                if d2 == 0.0 || d2 > (radius * radius) as f64 {
                    continue;
                }
                let weight = 1.0 / d2;
                let pixel = output.get_pixel(nx as u32, ny as u32);
                for (a, &p) in acc.iter_mut().zip(pixel.iter()) {
                    *a += weight * p as f64;
                }
                weight_sum += weight;
            }
        }

        // Processing in distance order guarantees a filled neighbor at
        // distance 1, so weight_sum is only zero for unreachable pixels.
        if weight_sum > 0.0 {
            let pixel = [
                (acc[0] / weight_sum).round().clamp(0.0, 255.0) as u8,
                (acc[1] / weight_sum).round().clamp(0.0, 255.0) as u8,
                (acc[2] / weight_sum).round().clamp(0.0, 255.0) as u8,
                (acc[3] / weight_sum).round().clamp(0.0, 255.0) as u8,
            ];
            output.set_pixel(x, y, pixel);
            known[(y * w + x) as usize] = true;
        }
    }

    Ok(output)
}

#[inline]
fn neighbors4(x: u32, y: u32, w: u32, h: u32) -> impl Iterator<Item = (u32, u32)> {
    let mut out = [(0u32, 0u32); 4];
    let mut n = 0;
    if x > 0 {
        out[n] = (x - 1, y);
        n += 1;
    }
    if x + 1 < w {
        out[n] = (x + 1, y);
        n += 1;
    }
    if y > 0 {
        out[n] = (x, y - 1);
        n += 1;
    }
    if y + 1 < h {
        out[n] = (x, y + 1);
        n += 1;
    }
    out.into_iter().take(n)
}

#[inline]
fn has_known_neighbor(known: &[bool], x: u32, y: u32, w: u32, h: u32) -> bool {
    neighbors4(x, y, w, h).any(|(nx, ny)| known[(ny * w + nx) as usize])
}
