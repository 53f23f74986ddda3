//! Pre-integrated transfer function lookup.
//!
//! Entry `(sf, sb)` holds the color and extinction a ray segment accumulates
//! when the scalar varies linearly from `sf` at its front to `sb` at its back,
//! so a fragment only needs one lookup per segment instead of integrating the
//! transfer function along the ray.

use crate::error::DeviceError;
use crate::gpu::{Device, Filter, TexelData, TextureDesc, TextureFormat, TextureId};
use crate::transfer_function::TransferFunction;
use crate::{Float, Rgba};
use ndarray::Array3;
use rayon::prelude::*;

/// One looked-up segment: premultiplied average color and extinction density
/// per unit length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub color: [Float; 3],
    pub density: Float,
}

impl Segment {
    fn from_texel(t: Rgba) -> Self {
        Self { color: [t[0], t[1], t[2]], density: t[3] }
    }
}

#[derive(Debug, Default)]
pub struct PreIntegrationTable {
    transfer_function: Option<TransferFunction>,
    scalar_range: (Float, Float),
    edge_scale: Float,
    table: Option<Array3<Float>>,
    texture: Option<TextureId>,
    downloaded: bool,
}

impl PreIntegrationTable {
    pub fn new() -> Self {
        Self {
            scalar_range: (0.0, 1.0),
            edge_scale: 1.0,
            ..Self::default()
        }
    }

    /// Binds a transfer function and drops any table built from the previous one.
    pub fn set_transfer_function(&mut self, tf: &TransferFunction, min_scalar: Float, max_scalar: Float) {
        debug_assert_eq!(tf.color_map().resolution(), tf.opacity_map().resolution());
        self.transfer_function = Some(tf.clone());
        self.scalar_range = (min_scalar, max_scalar);
        self.table = None;
        self.downloaded = false;
    }

    pub fn transfer_function(&self) -> Option<&TransferFunction> {
        self.transfer_function.as_ref()
    }

    pub fn resolution(&self) -> usize {
        self.transfer_function.as_ref().map(|tf| tf.resolution()).unwrap_or(0)
    }

    pub fn edge_scale(&self) -> Float {
        self.edge_scale
    }

    pub fn is_created(&self) -> bool {
        self.table.is_some()
    }

    pub fn table(&self) -> Option<&Array3<Float>> {
        self.table.as_ref()
    }

    /// Builds the table. `edge_scale` is the segment length the opacity map is
    /// defined for; stored densities are per unit length.
    pub fn create(&mut self, edge_scale: Float) {
        let tf = match &self.transfer_function {
            Some(tf) => tf,
            None => {
                tracing::error!("pre-integration table created without a transfer function");
                return;
            }
        };
        let span = tracing::debug_span!("create_preintegration_table", resolution = tf.resolution());
        let _enter = span.enter();

        let res = tf.resolution();
        let colors = tf.color_map().table();
        let opacities = tf.opacity_map().table();
        let edge_scale = if edge_scale > 0.0 { edge_scale } else { 1.0 };

        // cumulative trapezoid sums of color*opacity and opacity
        let mut color_int = vec![[0.0f64; 3]; res];
        let mut opacity_int = vec![0.0f64; res];
        for i in 1..res {
            let (a0, a1) = (opacities[i - 1] as f64, opacities[i] as f64);
            for c in 0..3 {
                let w0 = colors[i - 1][c] as f64 * a0;
                let w1 = colors[i][c] as f64 * a1;
                color_int[i][c] = color_int[i - 1][c] + 0.5 * (w0 + w1);
            }
            opacity_int[i] = opacity_int[i - 1] + 0.5 * (a0 + a1);
        }

        let mut data = vec![0.0 as Float; res * res * 4];
        data.par_chunks_mut(res * 4).enumerate().for_each(|(sb, row)| {
            for sf in 0..res {
                let texel = &mut row[sf * 4..sf * 4 + 4];
                if sf == sb {
                    let a = opacities[sf];
                    texel[0] = colors[sf][0] * a;
                    texel[1] = colors[sf][1] * a;
                    texel[2] = colors[sf][2] * a;
                    texel[3] = a / edge_scale;
                } else {
                    let (lo, hi) = (sf.min(sb), sf.max(sb));
                    let inv = 1.0 / (hi - lo) as f64;
                    for c in 0..3 {
                        texel[c] = ((color_int[hi][c] - color_int[lo][c]) * inv) as Float;
                    }
                    texel[3] = ((opacity_int[hi] - opacity_int[lo]) * inv) as Float / edge_scale;
                }
            }
        });

        self.edge_scale = edge_scale;
        self.table = Array3::from_shape_vec((res, res, 4), data).ok();
        self.downloaded = false;
        tracing::debug!("pre-integration table built");
    }

    /// Texel `(sf, sb)` as stored, or `None` before `create` or out of range.
    pub fn get(&self, sf: usize, sb: usize) -> Option<Rgba> {
        let table = self.table.as_ref()?;
        let c = |i: usize| table.get((sb, sf, i)).copied();
        Some([c(0)?, c(1)?, c(2)?, c(3)?])
    }

    fn index_of(&self, scalar: Float) -> usize {
        let (min, max) = self.scalar_range;
        let s = if max > min { (scalar - min) / (max - min) } else { 0.0 };
        let last = self.resolution().saturating_sub(1) as Float;
        (s.max(0.0).min(1.0) * last).round() as usize
    }

    /// Nearest-texel lookup with clamp-to-edge addressing. Returns `None` until
    /// the table is created.
    pub fn lookup(&self, front: Float, back: Float) -> Option<Segment> {
        self.get(self.index_of(front), self.index_of(back)).map(Segment::from_texel)
    }

    pub fn is_downloaded(&self) -> bool {
        self.downloaded
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    /// Uploads the table as an RGBA32F texture. Does nothing if the current
    /// table is already on the device.
    pub fn download(&mut self, device: &mut Device) -> Result<(), DeviceError> {
        if self.downloaded {
            return Ok(());
        }
        let table = match &self.table {
            Some(table) => table,
            None => return Ok(()),
        };
        let res = table.shape()[0];
        // iter() walks in logical row-major order, matching the [sb, sf, c] layout
        let flat: Vec<Float> = table.iter().copied().collect();
        let texels: Vec<Rgba> = flat.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]]).collect();

        let texture = match self.texture {
            Some(id) if device.texture(id).map(|t| t.desc().width == res).unwrap_or(false) => id,
            stale => {
                if let Some(id) = stale {
                    device.release_texture(id);
                }
                let desc = TextureDesc::new_2d(res, res, TextureFormat::Rgba32F).with_filter(Filter::Linear);
                let id = device.create_texture(desc)?;
                self.texture = Some(id);
                id
            }
        };
        device.upload_texture(texture, TexelData::Rgba32F(texels))?;
        self.downloaded = true;
        Ok(())
    }

    /// Frees the texture and the table; `create` must run again before reuse.
    pub fn release(&mut self, device: &mut Device) {
        if let Some(id) = self.texture.take() {
            device.release_texture(id);
        }
        self.table = None;
        self.downloaded = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer_function::{ColorMap, OpacityMap};
    use approx::assert_abs_diff_eq;

    fn built(tf: &TransferFunction) -> PreIntegrationTable {
        let mut table = PreIntegrationTable::new();
        table.set_transfer_function(tf, 0.0, 1.0);
        table.create(1.0);
        table
    }

    #[test]
    fn test_diagonal_is_color_times_opacity() {
        let tf = TransferFunction::default();
        let table = built(&tf);
        for s in 0..tf.resolution() {
            let c = tf.color_map().at(s);
            let a = tf.opacity_map().at(s);
            let texel = table.get(s, s).unwrap();
            assert_eq!(texel[0], c[0] * a);
            assert_eq!(texel[1], c[1] * a);
            assert_eq!(texel[2], c[2] * a);
            assert_eq!(texel[3], a);
        }
    }

    #[test]
    fn test_gray_ramp_midpoint() {
        let tf = TransferFunction::gray_ramp(257);
        let table = built(&tf);
        let seg = table.lookup(0.5, 0.5).unwrap();
        assert_eq!(seg.color, [0.25, 0.25, 0.25]);
        assert_eq!(seg.density, 0.5);
    }

    #[test]
    fn test_constant_function_is_flat() {
        let tf = TransferFunction::new(
            ColorMap::constant(32, [0.2, 0.4, 0.8]),
            OpacityMap::constant(32, 0.5),
        ).unwrap();
        let mut table = PreIntegrationTable::new();
        table.set_transfer_function(&tf, 0.0, 1.0);
        table.create(2.0);
        for (sf, sb) in [(0, 31), (31, 0), (5, 6), (17, 17)] {
            let t = table.get(sf, sb).unwrap();
            assert_abs_diff_eq!(t[0], 0.1, epsilon = 1e-6);
            assert_abs_diff_eq!(t[1], 0.2, epsilon = 1e-6);
            assert_abs_diff_eq!(t[2], 0.4, epsilon = 1e-6);
            assert_abs_diff_eq!(t[3], 0.25, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_symmetric_and_averaged() {
        let tf = TransferFunction::gray_ramp(64);
        let table = built(&tf);
        assert_eq!(table.get(3, 40), table.get(40, 3));
        assert_eq!(table.get(64, 0), None);
        assert_eq!(PreIntegrationTable::new().get(0, 0), None);
        // average of s^2 over [a, b] under the trapezoid rule for a linear ramp
        let t = table.get(0, 63).unwrap();
        assert_abs_diff_eq!(t[3], 0.5, epsilon = 1e-6);
        assert!(t[0] > 0.33 && t[0] < 0.34);
    }

    #[test]
    fn test_download_idempotent_and_invalidation() {
        let mut device = Device::new();
        let tf = TransferFunction::default();
        let mut table = built(&tf);
        assert!(!table.is_downloaded());

        table.download(&mut device).unwrap();
        let id = table.texture().unwrap();
        let bytes = device.bytes_in_use();
        table.download(&mut device).unwrap();
        assert_eq!(table.texture(), Some(id));
        assert_eq!(device.bytes_in_use(), bytes);

        table.set_transfer_function(&TransferFunction::gray_ramp(256), 0.0, 1.0);
        assert!(!table.is_created());
        assert!(!table.is_downloaded());
        assert!(table.lookup(0.2, 0.3).is_none());

        table.release(&mut device);
        assert_eq!(device.bytes_in_use(), 0);
        assert!(table.texture().is_none());
    }
}
