//! Frame orchestration.
//!
//! [`StochasticRenderer`] owns the off-screen framebuffer, the ensemble
//! buffer and the random texture, and drives every registered engine through
//! the passes of each frame.

use crate::camera::{Camera, Light};
use crate::config::RendererConfig;
use crate::engine::{EngineType, FrameContext, RenderEngine, SharedResources};
use crate::ensemble::EnsembleAverageBuffer;
use crate::error::RenderError;
use crate::gpu::{Device, FramebufferId, TextureDesc, TextureFormat, TextureId};
use crate::math::matrix_to_array;
use crate::random_texture::{scatter_index, RandomTexture};
use crate::{Float, Point3f, Result, Rgba};
use std::sync::Arc;

/// What happened during one call to [`StochasticRenderer::render_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Passes drawn this frame.
    pub passes: usize,
    /// Passes in the ensemble after this frame.
    pub ensemble_count: usize,
    /// The previous ensemble was kept and extended.
    pub retained: bool,
    /// The coarse level was used because the view changed.
    pub coarse: bool,
    pub resized: bool,
    /// Engine rebuilds and draws that failed and were skipped.
    pub failed_engines: usize,
}

struct EngineSlot {
    engine: Box<dyn RenderEngine>,
    ready: bool,
}

pub struct StochasticRenderer {
    config: RendererConfig,
    width: usize,
    height: usize,
    engines: Vec<EngineSlot>,
    ensemble: EnsembleAverageBuffer,
    framebuffer: Option<FramebufferId>,
    depth_texture: Option<TextureId>,
    random_texture: Option<Arc<RandomTexture>>,
    modelview: Option<[Float; 16]>,
    light: Option<Point3f>,
    clear_requested: bool,
    initialized: bool,
}

impl StochasticRenderer {
    pub fn new(config: RendererConfig) -> Result<Self> {
        config.validate()?;
        let mut ensemble = EnsembleAverageBuffer::new();
        if !config.enable_accumulation_buffer {
            ensemble.disable_accumulation_buffer();
        }
        Ok(Self {
            config,
            width: 0,
            height: 0,
            engines: Vec::new(),
            ensemble,
            framebuffer: None,
            depth_texture: None,
            random_texture: None,
            modelview: None,
            light: None,
            clear_requested: true,
            initialized: false,
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Registers an engine. Engines are kept in draw order; engines of the
    /// same type draw in registration order.
    pub fn add_engine(&mut self, engine: Box<dyn RenderEngine>) {
        let ty = engine.engine_type();
        let pos = self.engines.partition_point(|s| s.engine.engine_type() <= ty);
        self.engines.insert(pos, EngineSlot { engine, ready: false });
        self.clear_requested = true;
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    /// Engine at position `i` in draw order.
    pub fn engine(&self, i: usize) -> Option<&(dyn RenderEngine + 'static)> {
        self.engines.get(i).map(|s| s.engine.as_ref())
    }

    pub fn engine_mut(&mut self, i: usize) -> Option<&mut (dyn RenderEngine + 'static)> {
        self.engines.get_mut(i).map(|s| s.engine.as_mut())
    }

    /// First engine whose bound object has the given name.
    pub fn find_engine(&self, name: &str) -> Option<&(dyn RenderEngine + 'static)> {
        self.engines.iter().find(|s| s.engine.name() == Some(name)).map(|s| s.engine.as_ref())
    }

    pub fn find_engine_mut(&mut self, name: &str) -> Option<&mut (dyn RenderEngine + 'static)> {
        self.engines.iter_mut().find(|s| s.engine.name() == Some(name)).map(|s| s.engine.as_mut())
    }

    /// Unregisters the engine bound to `name`. The caller releases its device
    /// resources.
    pub fn remove_engine(&mut self, name: &str) -> Option<Box<dyn RenderEngine>> {
        let pos = self.engines.iter().position(|s| s.engine.name() == Some(name))?;
        self.clear_requested = true;
        Some(self.engines.remove(pos).engine)
    }

    /// Starts a new ensemble at the next frame.
    pub fn clear_ensemble_buffer(&mut self) {
        self.clear_requested = true;
    }

    /// Passes per still frame. Without LOD control the coarse level follows.
    pub fn set_repetition_level(&mut self, level: usize) {
        let level = level.max(1);
        self.config.repetition_level = level;
        self.config.coarse_level = if self.config.enable_lod {
            self.config.coarse_level.min(level)
        } else {
            level
        };
    }

    pub fn repetition_level(&self) -> usize {
        self.config.repetition_level
    }

    /// Uses `coarse_level` passes on frames where the view changed.
    pub fn enable_lod_control(&mut self, coarse_level: usize) {
        self.config.enable_lod = true;
        self.config.coarse_level = coarse_level.max(1).min(self.config.repetition_level);
    }

    pub fn disable_lod_control(&mut self) {
        self.config.enable_lod = false;
        self.config.coarse_level = self.config.repetition_level;
    }

    pub fn coarse_level(&self) -> usize {
        self.config.coarse_level
    }

    pub fn is_lod_enabled(&self) -> bool {
        self.config.enable_lod
    }

    pub fn enable_exact_depth_testing(&mut self) {
        self.config.enable_exact_depth_testing = true;
        self.invalidate();
    }

    pub fn disable_exact_depth_testing(&mut self) {
        self.config.enable_exact_depth_testing = false;
        self.invalidate();
    }

    pub fn is_exact_depth_testing_enabled(&self) -> bool {
        self.config.enable_exact_depth_testing
    }

    pub fn set_random_texture_size(&mut self, size: usize) {
        self.config.random_texture_size = size;
        self.invalidate();
    }

    pub fn enable_accumulation_buffer(&mut self) {
        self.ensemble.enable_accumulation_buffer();
        self.config.enable_accumulation_buffer = true;
        self.invalidate();
    }

    pub fn disable_accumulation_buffer(&mut self) {
        self.ensemble.disable_accumulation_buffer();
        self.config.enable_accumulation_buffer = false;
        self.invalidate();
    }

    pub fn enable_random_texture(&mut self) {
        self.config.enable_random_texture = true;
        self.clear_requested = true;
    }

    pub fn disable_random_texture(&mut self) {
        self.config.enable_random_texture = false;
        self.clear_requested = true;
    }

    pub fn set_background(&mut self, background: Rgba) {
        self.config.background = background;
        self.clear_requested = true;
    }

    /// Runs the one-time setup again at the next frame.
    pub fn invalidate(&mut self) {
        self.initialized = false;
        for slot in self.engines.iter_mut() {
            slot.ready = false;
        }
    }

    pub fn ensemble(&self) -> &EnsembleAverageBuffer {
        &self.ensemble
    }

    pub fn random_texture(&self) -> Option<&Arc<RandomTexture>> {
        self.random_texture.as_ref()
    }

    /// Renders one frame and presents the ensemble average.
    ///
    /// Setup failures are returned. Engines that fail to rebuild or draw are
    /// logged and left out of the pass.
    pub fn render_frame(&mut self, device: &mut Device, camera: &dyn Camera, light: &dyn Light) -> Result<FrameStats> {
        let span = tracing::debug_span!("render_frame");
        let _enter = span.enter();
        let mut stats = FrameStats::default();

        // skipped frames leave the recorded view untouched
        let (width, height) = camera.window_size();
        if width == 0 || height == 0 {
            tracing::debug!(width, height, "empty window, frame skipped");
            return Ok(stats);
        }

        let modelview = camera.modelview_matrix();
        let projection = camera.projection_matrix();
        let light_position = light.position();
        let snapshot = matrix_to_array(&modelview);

        if !self.initialized {
            self.setup(device)?;
            self.modelview = Some(snapshot);
            self.light = Some(light_position);
        } else if self.engines.iter().any(|s| !s.ready) {
            self.setup_engines(device)?;
        }

        let changed = self.modelview != Some(snapshot) || self.light != Some(light_position);
        self.modelview = Some(snapshot);
        self.light = Some(light_position);
        let mut retain = !changed;
        stats.coarse = changed && self.config.enable_lod;
        let passes = if stats.coarse { self.config.coarse_level } else { self.config.repetition_level };

        if (width, height) != (self.width, self.height) || self.framebuffer.is_none() {
            self.resize(device, width, height)?;
            retain = false;
            stats.resized = true;
        }

        for slot in self.engines.iter_mut().filter(|s| s.engine.needs_rebuild()) {
            retain = false;
            if let Err(e) = slot.engine.build_buffers(device) {
                tracing::error!(engine = slot.engine.engine_type().name(), error = %e, "buffer rebuild failed");
                stats.failed_engines += 1;
            }
        }

        let clear = !retain || self.clear_requested;
        if clear {
            self.ensemble.clear(device)?;
            for slot in self.engines.iter_mut() {
                slot.engine.clear_ensemble();
            }
            self.clear_requested = false;
        }
        stats.retained = !clear;

        let framebuffer = self.framebuffer.ok_or(crate::DeviceError::InvalidHandle { kind: "framebuffer" })?;
        let random_size = self.random_texture.as_ref().map(|r| r.size()).unwrap_or(self.config.random_texture_size);
        for _ in 0..passes {
            let pass_index = self.ensemble.count();
            let jitter = if self.config.enable_random_texture {
                scatter_index(pass_index, random_size)
            } else {
                [0, 0]
            };
            let ctx = FrameContext {
                pass_index,
                jitter,
                is_first_pass_of_ensemble: pass_index == 0,
                modelview,
                projection,
                light_position,
                width,
                height,
            };

            device.clear_framebuffer(framebuffer, self.config.background)?;
            match (self.config.enable_exact_depth_testing, self.depth_texture) {
                (true, Some(depth_texture)) => {
                    stats.failed_engines += Self::draw_engines(device, &mut self.engines, framebuffer, None, &ctx, |t| !t.is_volume())?;
                    device.copy_depth(framebuffer, depth_texture)?;
                    stats.failed_engines += Self::draw_engines(device, &mut self.engines, framebuffer, Some(depth_texture), &ctx, EngineType::is_volume)?;
                }
                _ => {
                    stats.failed_engines += Self::draw_engines(device, &mut self.engines, framebuffer, None, &ctx, |_| true)?;
                }
            }
            self.ensemble.add(device, framebuffer)?;
            stats.passes += 1;
        }

        self.ensemble.draw(device)?;
        stats.ensemble_count = self.ensemble.count();
        tracing::debug!(?stats, "frame done");
        Ok(stats)
    }

    /// Draws the engines whose type passes `filter`, in order. Returns the
    /// number of engines that failed.
    fn draw_engines(
        device: &mut Device,
        engines: &mut [EngineSlot],
        framebuffer: FramebufferId,
        depth_snapshot: Option<TextureId>,
        ctx: &FrameContext,
        filter: impl Fn(EngineType) -> bool,
    ) -> Result<usize> {
        let mut failed = 0;
        for slot in engines.iter_mut().filter(|s| filter(s.engine.engine_type())) {
            let mut target = device.render_target(framebuffer, depth_snapshot)?;
            if let Err(e) = slot.engine.draw(ctx, &mut target) {
                tracing::error!(engine = slot.engine.engine_type().name(), error = %e, "draw failed, skipping engine");
                failed += 1;
            }
        }
        Ok(failed)
    }

    fn setup(&mut self, device: &mut Device) -> Result<()> {
        let span = tracing::debug_span!("renderer_setup", engines = self.engines.len());
        let _enter = span.enter();
        self.config.validate()?;

        self.release_random_texture(device);
        let mut random = RandomTexture::with_seed(self.config.random_texture_size, self.config.random_seed);
        random.download(device)?;
        self.random_texture = Some(Arc::new(random));

        // targets are recreated with the current accumulation mode at the next resize
        self.release_targets(device);
        for slot in self.engines.iter_mut() {
            slot.ready = false;
        }
        self.setup_engines(device)?;
        self.initialized = true;
        self.clear_requested = true;
        Ok(())
    }

    fn setup_engines(&mut self, device: &mut Device) -> Result<()> {
        let random_texture = match &self.random_texture {
            Some(r) => r.clone(),
            None => return Err(crate::DeviceError::InvalidHandle { kind: "random texture" }.into()),
        };
        let shared = SharedResources {
            random_texture,
            exact_depth_testing: self.config.enable_exact_depth_testing,
            two_side_lighting: self.config.two_side_lighting,
        };
        for slot in self.engines.iter_mut().filter(|s| !s.ready) {
            let engine = slot.engine.engine_type().name();
            let wrap = |e: RenderError| match e {
                RenderError::EngineSetup { .. } => e,
                e => RenderError::EngineSetup { engine: engine.to_string(), source: Box::new(e) },
            };
            slot.engine.setup(device, &shared).map_err(wrap)?;
            slot.engine.set_render_size(self.width, self.height);
            slot.engine.build_buffers(device).map_err(wrap)?;
            slot.ready = true;
        }
        self.clear_requested = true;
        Ok(())
    }

    fn resize(&mut self, device: &mut Device, width: usize, height: usize) -> Result<()> {
        tracing::debug!(width, height, "resizing render targets");
        self.release_targets(device);
        self.ensemble.create(device, width, height)?;
        self.framebuffer = Some(device.create_framebuffer(width, height)?);
        self.depth_texture = Some(device.create_texture(TextureDesc::new_2d(width, height, TextureFormat::Depth32F))?);
        self.width = width;
        self.height = height;
        for slot in self.engines.iter_mut() {
            slot.engine.set_render_size(width, height);
        }
        Ok(())
    }

    fn release_targets(&mut self, device: &mut Device) {
        self.ensemble.release(device);
        if let Some(id) = self.framebuffer.take() {
            device.release_framebuffer(id);
        }
        if let Some(id) = self.depth_texture.take() {
            device.release_texture(id);
        }
        self.width = 0;
        self.height = 0;
    }

    fn release_random_texture(&mut self, device: &mut Device) {
        if let Some(id) = self.random_texture.take().and_then(|r| r.texture()) {
            device.release_texture(id);
        }
    }

    /// Frees every device resource owned by the renderer and its engines.
    pub fn release(&mut self, device: &mut Device) {
        for slot in self.engines.iter_mut() {
            slot.engine.release(device);
        }
        self.release_targets(device);
        self.release_random_texture(device);
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{LookAtCamera, PointLight};
    use crate::engine::{LineEngine, PolygonEngine, TetrahedraEngine};
    use crate::object::procedural::{bounding_box_lines, box_surface, tetrahedral_cube};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_engines_sorted_by_type() {
        let mut renderer = StochasticRenderer::new(RendererConfig::default()).unwrap();
        let cube = Arc::new(tetrahedral_cube(1).unwrap().into());
        let lines = Arc::new(bounding_box_lines(point3f!(-1, -1, -1), point3f!(1, 1, 1), [255, 255, 0]).unwrap().into());
        renderer.add_engine(Box::new(TetrahedraEngine::with_object(cube).unwrap()));
        let surface = Arc::new(box_surface(point3f!(-1, -1, -1), point3f!(1, 1, 1), [0, 255, 0], 255).unwrap().into());
        renderer.add_engine(Box::new(PolygonEngine::with_object(surface).unwrap()));
        renderer.add_engine(Box::new(LineEngine::with_object(lines).unwrap()));

        let order: Vec<_> = (0..renderer.engine_count()).map(|i| renderer.engine(i).unwrap().engine_type()).collect();
        assert_eq!(order, vec![EngineType::Line, EngineType::Polygon, EngineType::Tetrahedra]);
        assert!(!EngineType::Polygon.is_volume());
        assert!(renderer.find_engine("tetrahedral_cube").is_some());
        assert!(renderer.remove_engine("tetrahedral_cube").is_some());
        assert_eq!(renderer.engine_count(), 2);
    }

    #[test]
    fn test_lod_policy() {
        let mut renderer = StochasticRenderer::new(RendererConfig::default()).unwrap();
        renderer.set_repetition_level(10);
        assert_eq!(renderer.coarse_level(), 10);

        renderer.enable_lod_control(3);
        renderer.set_repetition_level(20);
        assert_eq!(renderer.coarse_level(), 3);
        renderer.set_repetition_level(2);
        assert_eq!(renderer.coarse_level(), 2);

        renderer.enable_lod_control(50);
        assert_eq!(renderer.coarse_level(), 2);
        renderer.disable_lod_control();
        renderer.set_repetition_level(7);
        assert_eq!(renderer.coarse_level(), 7);
    }

    #[test]
    fn test_first_frame() {
        let mut device = Device::new();
        let mut renderer = StochasticRenderer::new(RendererConfig::default().with_repetition_level(3).with_random_texture_size(64)).unwrap();
        let cube = Arc::new(tetrahedral_cube(1).unwrap().into());
        renderer.add_engine(Box::new(TetrahedraEngine::with_object(cube).unwrap()));

        let camera = LookAtCamera::perspective(16, 12);
        let stats = renderer.render_frame(&mut device, &camera, &PointLight::default()).unwrap();
        assert_eq!(stats.passes, 3);
        assert_eq!(stats.ensemble_count, 3);
        assert!(stats.resized);
        assert!(!stats.retained);
        assert_eq!(renderer.engine(0).unwrap().repetition_count(), 3);
        let screen = device.screen().unwrap();
        assert_eq!((screen.width, screen.height), (16, 12));

        renderer.release(&mut device);
        assert_eq!(device.bytes_in_use(), 0);
    }
}
