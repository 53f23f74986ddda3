use crate::error::RenderError;
use crate::{Float, Rgb};

pub const DEFAULT_RESOLUTION: usize = 256;

fn hsv_to_rgb(h: Float, s: Float, v: Float) -> Rgb {
    let h = (h.rem_euclid(360.0)) / 60.0;
    let c = v * s;
    let x = c * (1.0 - ((h % 2.0) - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [r + m, g + m, b + m]
}

/// Piecewise-linear interpolation of `(position, value)` control points over
/// `resolution` evenly spaced samples of [0, 1].
fn sample_points<T: Copy>(resolution: usize, points: &[(Float, T)], mix: impl Fn(T, T, Float) -> T) -> Vec<T> {
    debug_assert!(!points.is_empty());
    (0..resolution)
        .map(|i| {
            let s = if resolution > 1 { i as Float / (resolution - 1) as Float } else { 0.0 };
            let upper = points.iter().position(|p| p.0 >= s);
            match upper {
                Some(0) => points[0].1,
                Some(u) => {
                    let (s0, v0) = points[u - 1];
                    let (s1, v1) = points[u];
                    let t = if s1 > s0 { (s - s0) / (s1 - s0) } else { 0.0 };
                    mix(v0, v1, t)
                }
                None => points[points.len() - 1].1,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorMap {
    table: Vec<Rgb>,
}

impl ColorMap {
    /// Hue ramp from blue (0) to red (1).
    pub fn rainbow(resolution: usize) -> Self {
        let table = (0..resolution)
            .map(|i| {
                let t = if resolution > 1 { i as Float / (resolution - 1) as Float } else { 0.0 };
                hsv_to_rgb(240.0 * (1.0 - t), 1.0, 1.0)
            })
            .collect();
        Self { table }
    }

    pub fn gray(resolution: usize) -> Self {
        Self::from_points(resolution, &[(0.0, [0.0; 3]), (1.0, [1.0; 3])])
    }

    pub fn constant(resolution: usize, color: Rgb) -> Self {
        Self { table: vec![color; resolution] }
    }

    /// Control points must be sorted by position.
    pub fn from_points(resolution: usize, points: &[(Float, Rgb)]) -> Self {
        let table = sample_points(resolution, points, |a, b, t| {
            [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t, a[2] + (b[2] - a[2]) * t]
        });
        Self { table }
    }

    pub fn resolution(&self) -> usize {
        self.table.len()
    }

    pub fn table(&self) -> &[Rgb] {
        &self.table
    }

    pub fn at(&self, index: usize) -> Rgb {
        self.table[index]
    }
}

impl Default for ColorMap {
    fn default() -> Self {
        Self::rainbow(DEFAULT_RESOLUTION)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpacityMap {
    table: Vec<Float>,
}

impl OpacityMap {
    /// `i / (resolution - 1)`
    pub fn ramp(resolution: usize) -> Self {
        Self::from_points(resolution, &[(0.0, 0.0), (1.0, 1.0)])
    }

    pub fn constant(resolution: usize, opacity: Float) -> Self {
        Self { table: vec![opacity; resolution] }
    }

    pub fn from_points(resolution: usize, points: &[(Float, Float)]) -> Self {
        Self { table: sample_points(resolution, points, |a, b, t| a + (b - a) * t) }
    }

    pub fn resolution(&self) -> usize {
        self.table.len()
    }

    pub fn table(&self) -> &[Float] {
        &self.table
    }

    pub fn at(&self, index: usize) -> Float {
        self.table[index]
    }
}

impl Default for OpacityMap {
    fn default() -> Self {
        Self::ramp(DEFAULT_RESOLUTION)
    }
}

/// Color map and opacity map over the normalized scalar domain [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct TransferFunction {
    color_map: ColorMap,
    opacity_map: OpacityMap,
}

impl TransferFunction {
    pub fn new(color_map: ColorMap, opacity_map: OpacityMap) -> Result<Self, RenderError> {
        if color_map.resolution() != opacity_map.resolution() || color_map.resolution() == 0 {
            return Err(RenderError::ResolutionMismatch {
                color: color_map.resolution(),
                opacity: opacity_map.resolution(),
            });
        }
        Ok(Self { color_map, opacity_map })
    }

    /// Gray ramp with matching linear opacity.
    pub fn gray_ramp(resolution: usize) -> Self {
        Self {
            color_map: ColorMap::gray(resolution),
            opacity_map: OpacityMap::ramp(resolution),
        }
    }

    pub fn resolution(&self) -> usize {
        self.color_map.resolution()
    }

    pub fn color_map(&self) -> &ColorMap {
        &self.color_map
    }

    pub fn opacity_map(&self) -> &OpacityMap {
        &self.opacity_map
    }

    /// Table index nearest to a normalized scalar, clamped to the table.
    pub fn index_of(&self, s: Float) -> usize {
        let max = (self.resolution() - 1) as Float;
        (s.max(0.0).min(1.0) * max).round() as usize
    }
}

impl Default for TransferFunction {
    fn default() -> Self {
        Self {
            color_map: ColorMap::default(),
            opacity_map: OpacityMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_resolution_mismatch() {
        let res = TransferFunction::new(ColorMap::rainbow(256), OpacityMap::ramp(128));
        assert!(matches!(res, Err(RenderError::ResolutionMismatch { color: 256, opacity: 128 })));
    }

    #[test]
    fn test_default_maps() {
        let tf = TransferFunction::default();
        assert_eq!(tf.resolution(), 256);
        assert_eq!(tf.color_map().at(0), [0.0, 0.0, 1.0]);
        assert_eq!(tf.color_map().at(255), [1.0, 0.0, 0.0]);
        assert_abs_diff_eq!(tf.opacity_map().at(51), 51.0 / 255.0, epsilon = 1e-6);
    }

    #[test]
    fn test_control_points() {
        let opacity = OpacityMap::from_points(5, &[(0.25, 0.0), (0.75, 1.0)]);
        assert_eq!(opacity.table(), &[0.0, 0.0, 0.5, 1.0, 1.0]);

        let gray = ColorMap::gray(3);
        assert_eq!(gray.at(1), [0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_index_of() {
        let tf = TransferFunction::gray_ramp(257);
        assert_eq!(tf.index_of(0.5), 128);
        assert_eq!(tf.index_of(-3.0), 0);
        assert_eq!(tf.index_of(7.0), 256);
    }
}
