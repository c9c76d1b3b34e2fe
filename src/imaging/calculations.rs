//! Dimension math for compression and thumbnails. No pixels, no I/O.

/// Scale `source` down so it fits inside `bounds`, preserving aspect ratio.
///
/// Never upscales: a source already inside the bounds is returned unchanged.
/// Both output edges are at least 1px and never exceed their bound.
///
/// ```
/// # use product_images::imaging::fit_within;
/// assert_eq!(fit_within((4000, 3000), (1920, 1920)), (1920, 1440));
/// assert_eq!(fit_within((800, 600), (1920, 1920)), (800, 600));
/// ```
pub fn fit_within(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (max_w, max_h) = bounds;

    if src_w <= max_w && src_h <= max_h {
        return source;
    }

    let scale = (max_w as f64 / src_w as f64).min(max_h as f64 / src_h as f64);
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, max_w);
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, max_h);
    (w, h)
}

/// Crop size of a thumbnail: the shorter side of `aspect` gets `short_edge`
/// pixels and the longer side follows the ratio.
///
/// ```
/// # use product_images::imaging::calculate_thumbnail_dimensions;
/// assert_eq!(calculate_thumbnail_dimensions((3, 2), 300), (450, 300));
/// ```
pub fn calculate_thumbnail_dimensions(aspect: (u32, u32), short_edge: u32) -> (u32, u32) {
    let (w, h) = aspect;
    let long_edge = |short: u32, long: u32| {
        ((short_edge as f64 * long as f64 / short as f64).round() as u32).max(1)
    };
    if w <= h {
        (short_edge, long_edge(w, h))
    } else {
        (long_edge(h, w), short_edge)
    }
}
