//! Pure dimension math for the fit-and-pad operation.
//!
//! No I/O, no pixels — everything here is testable with plain numbers.

/// Scale `source` down so it fits entirely inside `bounds`, preserving
/// aspect ratio. Shrink-only: a source already inside the box is returned
/// unchanged, never upscaled.
///
/// Rounded dimensions are clamped into `1..=bound` so extreme aspect ratios
/// can neither round to zero nor overshoot the box by one pixel.
pub fn fit_within(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (box_w, box_h) = bounds;

    if src_w <= box_w && src_h <= box_h {
        return source;
    }

    let scale = f64::min(box_w as f64 / src_w as f64, box_h as f64 / src_h as f64);
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, box_w);
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, box_h);
    (w, h)
}

/// Top-left position that centers `inner` on an `outer` canvas.
///
/// `inner` always fits (it comes from [`fit_within`]), so both offsets are
/// non-negative; `i64` is what the paste operation takes.
pub fn center_offset(inner: (u32, u32), outer: (u32, u32)) -> (i64, i64) {
    (
        (i64::from(outer.0) - i64::from(inner.0)) / 2,
        (i64::from(outer.1) - i64::from(inner.1)) / 2,
    )
}

/// Whether either dimension of `source` exceeds `bounds`.
pub fn exceeds(source: (u32, u32), bounds: (u32, u32)) -> bool {
    source.0 > bounds.0 || source.1 > bounds.1
}
