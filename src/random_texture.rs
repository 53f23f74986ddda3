use crate::error::DeviceError;
use crate::gpu::{Device, TexelData, TextureDesc, TextureFormat, TextureId, Wrap};
use crate::math::gcd;
use crate::Float;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

pub const DEFAULT_SIZE: usize = 1024;
pub const DEFAULT_SEED: u64 = 0x5eed_1234_abcd_0001;

/// Multiplier that scatters consecutive indices across the texture.
pub const SCATTER_PRIME: u64 = 12347;

/// `((i·12347) mod size, ((i·12347) / size) mod size)`
///
/// Used both for the per-pass jitter offset and for per-vertex identifiers.
pub fn scatter_index(index: usize, size: usize) -> [u32; 2] {
    let size = size.max(1) as u64;
    let scrambled = index as u64 * SCATTER_PRIME;
    [(scrambled % size) as u32, ((scrambled / size) % size) as u32]
}

/// Number of distinct offsets `scatter_index` visits before repeating.
pub fn cycle_length(size: usize) -> u64 {
    let texels = (size as u64) * (size as u64);
    texels / gcd(SCATTER_PRIME, texels)
}

/// Square texture of uniformly distributed random bytes, shared by all engines.
#[derive(Debug, Clone)]
pub struct RandomTexture {
    size: usize,
    seed: u64,
    texels: Vec<u8>,
    texture: Option<TextureId>,
}

impl RandomTexture {
    pub fn new(size: usize) -> Self {
        Self::with_seed(size, DEFAULT_SEED)
    }

    pub fn with_seed(size: usize, seed: u64) -> Self {
        let size = size.max(1);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut texels = vec![0u8; size * size];
        rng.fill_bytes(&mut texels);
        Self { size, seed, texels, texture: None }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn texels(&self) -> &[u8] {
        &self.texels
    }

    /// Texel at `(x, y)` with repeat addressing.
    pub fn texel(&self, x: u64, y: u64) -> u8 {
        let size = self.size as u64;
        self.texels[((y % size) * size + (x % size)) as usize]
    }

    /// Uniform value in (0, 1) from one texel.
    pub fn sample(&self, x: u64, y: u64) -> Float {
        (self.texel(x, y) as Float + 0.5) / 256.0
    }

    /// Uniform value in (0, 1) with 16 bits of resolution, combining the texel at
    /// `(x, y)` with the one half a texture away on both axes.
    pub fn sample16(&self, x: u64, y: u64) -> Float {
        let half = (self.size / 2) as u64;
        let hi = self.texel(x, y) as u32;
        let lo = self.texel(x + half, y + half) as u32;
        (((hi << 8) | lo) as Float + 0.5) / 65536.0
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn is_downloaded(&self) -> bool {
        self.texture.is_some()
    }

    pub fn download(&mut self, device: &mut Device) -> Result<(), DeviceError> {
        if self.texture.is_some() {
            return Ok(());
        }
        let desc = TextureDesc::new_2d(self.size, self.size, TextureFormat::R8).with_wrap(Wrap::Repeat);
        let id = device.create_texture(desc)?;
        if let Err(e) = device.upload_texture(id, TexelData::R8(self.texels.clone())) {
            device.release_texture(id);
            return Err(e);
        }
        self.texture = Some(id);
        Ok(())
    }

    pub fn release(&mut self, device: &mut Device) {
        if let Some(id) = self.texture.take() {
            device.release_texture(id);
        }
    }
}
