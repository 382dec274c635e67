//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Calculate the output size of a fit-within resize.
///
/// Scales `source` down so that neither dimension exceeds its bound,
/// preserving aspect ratio. A missing bound leaves that axis unconstrained.
/// Never enlarges: a source already inside the bounds keeps its size.
///
/// Returns `None` when both bounds are missing or any bound is zero.
///
/// # Examples
/// ```text
/// (800, 600) within (300, None)      → (300, 225)
/// (800, 600) within (200, 200)       → (200, 150)
/// (100, 50)  within (300, 300)       → (100, 50)   // no upscaling
/// ```
pub fn calculate_fit_dimensions(
    source: (u32, u32),
    bounds: (Option<u32>, Option<u32>),
) -> Option<(u32, u32)> {
    let (src_w, src_h) = source;
    if src_w == 0 || src_h == 0 {
        return None;
    }

    let ratio_w = match bounds.0 {
        Some(0) => return None,
        Some(w) => w as f64 / src_w as f64,
        None => f64::INFINITY,
    };
    let ratio_h = match bounds.1 {
        Some(0) => return None,
        Some(h) => h as f64 / src_h as f64,
        None => f64::INFINITY,
    };
    if bounds.0.is_none() && bounds.1.is_none() {
        return None;
    }

    let ratio = ratio_w.min(ratio_h).min(1.0);
    let w = ((src_w as f64 * ratio).round() as u32).max(1);
    let h = ((src_h as f64 * ratio).round() as u32).max(1);
    Some((w, h))
}

/// Calculate dimensions needed to fill a target area (resize before crop).
///
/// Returns dimensions that completely cover the target area while maintaining
/// the source aspect ratio. One dimension will match exactly, the other may exceed.
///
/// # Arguments
/// * `source` - Original image dimensions (width, height)
/// * `target` - Target area dimensions (width, height)
pub fn calculate_fill_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: height will match, width will exceed
        let h = tgt_h;
        let w = ((h as f64 * src_aspect).round() as u32).max(tgt_w);
        (w, h)
    } else {
        // Source is taller: width will match, height will exceed
        let w = tgt_w;
        let h = ((w as f64 / src_aspect).round() as u32).max(tgt_h);
        (w, h)
    }
}

/// Top-left offset that centers a `target` crop inside `filled`.
pub fn calculate_crop_offset(filled: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    (
        filled.0.saturating_sub(target.0) / 2,
        filled.1.saturating_sub(target.1) / 2,
    )
}
