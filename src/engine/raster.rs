//! Shared scan-conversion helpers for the software passes.

use crate::camera::ScreenPoint;
use crate::random_texture::RandomTexture;
use crate::Float;
use std::ops::Range;

/// Pixel rows and columns whose centers may fall inside the given points' hull.
pub fn pixel_bounds(points: &[ScreenPoint], width: usize, height: usize) -> Option<(Range<usize>, Range<usize>)> {
    let (mut x0, mut y0) = (Float::INFINITY, Float::INFINITY);
    let (mut x1, mut y1) = (Float::NEG_INFINITY, Float::NEG_INFINITY);
    for p in points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    let clamp = |v: Float, max: usize| v.max(0.0).min(max as Float) as usize;
    let xs = clamp((x0 - 0.5).ceil(), width)..clamp((x1 - 0.5).floor() + 1.0, width);
    let ys = clamp((y0 - 0.5).ceil(), height)..clamp((y1 - 0.5).floor() + 1.0, height);
    if xs.is_empty() || ys.is_empty() {
        None
    } else {
        Some((xs, ys))
    }
}

/// Screen-space barycentric weights of `(px, py)` in triangle `abc`, or `None`
/// when the point is outside or the triangle is edge-on.
pub fn barycentric(a: &ScreenPoint, b: &ScreenPoint, c: &ScreenPoint, px: Float, py: Float) -> Option<[Float; 3]> {
    let area = (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y);
    if area.abs() < 1e-6 {
        return None;
    }
    let w0 = ((b.x - px) * (c.y - py) - (c.x - px) * (b.y - py)) / area;
    let w1 = ((c.x - px) * (a.y - py) - (a.x - px) * (c.y - py)) / area;
    let w2 = 1.0 - w0 - w1;
    const EPS: Float = -1e-5;
    if w0 >= EPS && w1 >= EPS && w2 >= EPS {
        Some([w0, w1, w2])
    } else {
        None
    }
}

/// Rescales screen-space weights so attributes interpolate linearly in eye space.
pub fn perspective_weights(w: [Float; 3], pts: [&ScreenPoint; 3]) -> [Float; 3] {
    let p = [w[0] * pts[0].inv_w, w[1] * pts[1].inv_w, w[2] * pts[2].inv_w];
    let sum = p[0] + p[1] + p[2];
    if sum.abs() < 1e-12 {
        w
    } else {
        [p[0] / sum, p[1] / sum, p[2] / sum]
    }
}

/// Uniform value in (0, 1) for a fragment: the pixel position, the pass jitter
/// and a per-primitive identifier together pick the random texel.
pub fn fragment_random(random: &RandomTexture, x: usize, y: usize, jitter: [u32; 2], id: [u16; 2]) -> Float {
    random.sample16(
        x as u64 + jitter[0] as u64 + id[0] as u64,
        y as u64 + jitter[1] as u64 + id[1] as u64,
    )
}

/// Opacity of a segment of length `thickness` through a medium of the given
/// extinction density.
pub fn segment_alpha(density: Float, thickness: Float) -> Float {
    1.0 - (-(density * thickness).max(0.0)).exp()
}

/// Window depth is only valid inside the clip volume.
pub fn depth_visible(depth: Float) -> bool {
    (0.0..=1.0).contains(&depth)
}
