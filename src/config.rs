use crate::error::ConfigError;
use crate::random_texture::{DEFAULT_SEED, DEFAULT_SIZE};
use crate::Rgba;

/// Renderer knobs. Engines read the parts they need from the shared
/// resources handed out at setup.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Passes averaged per frame while the view is still.
    pub repetition_level: usize,
    /// Passes per frame while the view changes, if LOD control is enabled.
    pub coarse_level: usize,
    pub enable_lod: bool,
    pub random_texture_size: usize,
    pub random_seed: u64,
    /// Average into a float target instead of an 8-bit one.
    pub enable_accumulation_buffer: bool,
    /// When off every pass uses the same jitter offset.
    pub enable_random_texture: bool,
    pub enable_exact_depth_testing: bool,
    pub background: Rgba,
    pub two_side_lighting: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            repetition_level: 1,
            coarse_level: 1,
            enable_lod: false,
            random_texture_size: DEFAULT_SIZE,
            random_seed: DEFAULT_SEED,
            enable_accumulation_buffer: true,
            enable_random_texture: true,
            enable_exact_depth_testing: false,
            background: [0.0, 0.0, 0.0, 1.0],
            two_side_lighting: false,
        }
    }
}

impl RendererConfig {
    pub fn with_repetition_level(mut self, level: usize) -> Self {
        self.repetition_level = level;
        if !self.enable_lod {
            self.coarse_level = level;
        }
        self
    }

    pub fn with_lod(mut self, coarse_level: usize) -> Self {
        self.enable_lod = true;
        self.coarse_level = coarse_level;
        self
    }

    pub fn with_random_texture_size(mut self, size: usize) -> Self {
        self.random_texture_size = size;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_accumulation_buffer(mut self, enable: bool) -> Self {
        self.enable_accumulation_buffer = enable;
        self
    }

    pub fn with_random_texture(mut self, enable: bool) -> Self {
        self.enable_random_texture = enable;
        self
    }

    pub fn with_exact_depth_testing(mut self, enable: bool) -> Self {
        self.enable_exact_depth_testing = enable;
        self
    }

    pub fn with_background(mut self, background: Rgba) -> Self {
        self.background = background;
        self
    }

    pub fn with_two_side_lighting(mut self, enable: bool) -> Self {
        self.two_side_lighting = enable;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repetition_level == 0 {
            return Err(ConfigError::ZeroRepetitionLevel);
        }
        if self.enable_lod && (self.coarse_level == 0 || self.coarse_level > self.repetition_level) {
            return Err(ConfigError::CoarseLevelOutOfRange {
                coarse: self.coarse_level,
                repetition: self.repetition_level,
            });
        }
        if self.random_texture_size == 0 || self.random_texture_size > 65536 {
            return Err(ConfigError::RandomTextureSize(self.random_texture_size));
        }
        Ok(())
    }
}
