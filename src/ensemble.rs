use crate::error::DeviceError;
use crate::gpu::{Device, FramebufferId, TextureDesc, TextureFormat, TextureId};
use crate::{Float, Rgba};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsembleState {
    Unallocated,
    Empty,
    Accumulating,
}

/// Running mean of the passes rendered since the last clear.
///
/// After `n` calls to [`add`](EnsembleAverageBuffer::add) the accumulation
/// texture holds `(1/n)·Σ sample_i`, updated incrementally as
/// `avg ← avg + (sample − avg)/n`.
#[derive(Debug)]
pub struct EnsembleAverageBuffer {
    width: usize,
    height: usize,
    accumulation: Option<TextureId>,
    presented: Option<TextureId>,
    count: usize,
    opacity: Float,
    use_accumulation_buffer: bool,
}

impl Default for EnsembleAverageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl EnsembleAverageBuffer {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            accumulation: None,
            presented: None,
            count: 0,
            opacity: 1.0,
            use_accumulation_buffer: true,
        }
    }

    /// Float accumulation target. Takes effect on the next `create`.
    pub fn enable_accumulation_buffer(&mut self) {
        self.use_accumulation_buffer = true;
    }

    /// 8-bit accumulation target that rounds after every blend.
    pub fn disable_accumulation_buffer(&mut self) {
        self.use_accumulation_buffer = false;
    }

    pub fn is_accumulation_buffer_enabled(&self) -> bool {
        self.use_accumulation_buffer
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of passes averaged since the last clear.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Weight of the most recent pass, `1/count`; 1 while empty.
    pub fn opacity(&self) -> Float {
        self.opacity
    }

    pub fn state(&self) -> EnsembleState {
        match (self.accumulation, self.count) {
            (None, _) => EnsembleState::Unallocated,
            (Some(_), 0) => EnsembleState::Empty,
            _ => EnsembleState::Accumulating,
        }
    }

    pub fn accumulation_texture(&self) -> Option<TextureId> {
        self.accumulation
    }

    pub fn presented_texture(&self) -> Option<TextureId> {
        self.presented
    }

    /// Averaged image as floats, or `None` before `create`.
    pub fn average(&self, device: &Device) -> Option<Vec<Rgba>> {
        let texture = device.texture(self.accumulation?)?;
        Some((0..texture.desc().texel_count()).map(|i| texture.rgba(i)).collect())
    }

    /// (Re)allocates both targets at the given size and clears them.
    pub fn create(&mut self, device: &mut Device, width: usize, height: usize) -> Result<(), DeviceError> {
        self.release(device);
        let format = if self.use_accumulation_buffer { TextureFormat::Rgba32F } else { TextureFormat::Rgba8 };
        let accumulation = device.create_texture(TextureDesc::new_2d(width, height, format))?;
        let presented = match device.create_texture(TextureDesc::new_2d(width, height, TextureFormat::Rgba8)) {
            Ok(id) => id,
            Err(e) => {
                device.release_texture(accumulation);
                return Err(e);
            }
        };
        self.accumulation = Some(accumulation);
        self.presented = Some(presented);
        self.width = width;
        self.height = height;
        self.count = 0;
        self.opacity = 1.0;
        Ok(())
    }

    pub fn clear(&mut self, device: &mut Device) -> Result<(), DeviceError> {
        if let Some(id) = self.accumulation {
            device.clear_texture(id)?;
        }
        self.count = 0;
        self.opacity = 1.0;
        Ok(())
    }

    /// Blends the framebuffer's color into the running mean.
    pub fn add(&mut self, device: &mut Device, source: FramebufferId) -> Result<(), DeviceError> {
        let accumulation = self.accumulation.ok_or(DeviceError::InvalidHandle { kind: "ensemble buffer" })?;
        let count = self.count + 1;
        let opacity = 1.0 / count as Float;
        device.blend_framebuffer(source, accumulation, opacity)?;
        self.count = count;
        self.opacity = opacity;
        Ok(())
    }

    /// Resolves the mean into the presented texture and shows it.
    pub fn draw(&mut self, device: &mut Device) -> Result<(), DeviceError> {
        let (accumulation, presented) = match (self.accumulation, self.presented) {
            (Some(a), Some(p)) => (a, p),
            _ => return Err(DeviceError::InvalidHandle { kind: "ensemble buffer" }),
        };
        device.resolve(accumulation, presented)?;
        device.present(presented)
    }

    pub fn release(&mut self, device: &mut Device) {
        if let Some(id) = self.accumulation.take() {
            device.release_texture(id);
        }
        if let Some(id) = self.presented.take() {
            device.release_texture(id);
        }
        self.count = 0;
        self.opacity = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn feed(values: &[Float], accumulate: bool) -> (EnsembleAverageBuffer, Device) {
        let mut device = Device::new();
        let mut ensemble = EnsembleAverageBuffer::new();
        if !accumulate {
            ensemble.disable_accumulation_buffer();
        }
        ensemble.create(&mut device, 2, 2).unwrap();
        let fb = device.create_framebuffer(2, 2).unwrap();
        for &v in values {
            device.clear_framebuffer(fb, [v, 1.0 - v, v * 0.5, 1.0]).unwrap();
            ensemble.add(&mut device, fb).unwrap();
            assert_abs_diff_eq!(ensemble.opacity(), 1.0 / ensemble.count() as Float);
        }
        (ensemble, device)
    }

    #[test]
    fn test_running_mean() {
        // deterministic pseudo-random sequence in [0, 1)
        let values: Vec<Float> = (0..1000u32)
            .map(|i| ((i.wrapping_mul(2654435761) >> 8) % 1000) as Float / 1000.0)
            .collect();
        for &n in &[1usize, 2, 17, 250, 1000] {
            let (ensemble, device) = feed(&values[..n], true);
            assert_eq!(ensemble.count(), n);
            let mean = values[..n].iter().map(|&v| v as f64).sum::<f64>() / n as f64;
            for texel in ensemble.average(&device).unwrap() {
                assert_abs_diff_eq!(texel[0] as f64, mean, epsilon = 1e-4);
                assert_abs_diff_eq!(texel[1] as f64, 1.0 - mean, epsilon = 1e-4);
                assert_abs_diff_eq!(texel[3], 1.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_states_and_clear() {
        let mut device = Device::new();
        let mut ensemble = EnsembleAverageBuffer::new();
        assert_eq!(ensemble.state(), EnsembleState::Unallocated);
        assert!(ensemble.draw(&mut device).is_err());

        ensemble.create(&mut device, 4, 4).unwrap();
        assert_eq!(ensemble.state(), EnsembleState::Empty);
        assert_eq!(ensemble.opacity(), 1.0);

        let fb = device.create_framebuffer(4, 4).unwrap();
        device.clear_framebuffer(fb, [1.0; 4]).unwrap();
        ensemble.add(&mut device, fb).unwrap();
        ensemble.add(&mut device, fb).unwrap();
        assert_eq!(ensemble.state(), EnsembleState::Accumulating);
        assert_eq!(ensemble.opacity(), 0.5);

        ensemble.draw(&mut device).unwrap();
        assert_eq!(device.screen().unwrap().pixels[5], [255; 4]);

        ensemble.clear(&mut device).unwrap();
        assert_eq!(ensemble.state(), EnsembleState::Empty);
        assert_eq!(ensemble.count(), 0);
        assert_eq!(ensemble.average(&device).unwrap()[0], [0.0; 4]);
    }

    #[test]
    fn test_eight_bit_target_rounds() {
        let (ensemble, device) = feed(&[1.0, 0.0, 0.0], false);
        let texel = ensemble.average(&device).unwrap()[0];
        // 1.0, then 0.5 -> 128/255, then 128/255 * 2/3 -> 85/255
        assert_abs_diff_eq!(texel[0], 85.0 / 255.0, epsilon = 1e-6);
    }
}
