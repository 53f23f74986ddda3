//! Rendering engines.
//!
//! An engine is bound to one [`RenderObject`], uploads it to the device once,
//! then draws one stochastic pass into the bound render target each time the
//! renderer asks. Engines never blend; the renderer averages whole passes.

pub mod raster;
pub mod tetrahedra;
pub mod line;
pub mod polygon;
pub mod multiple_tetrahedra;
pub mod particle;
pub mod uniform_grid;

pub use line::LineEngine;
pub use multiple_tetrahedra::MultipleTetrahedraEngine;
pub use polygon::PolygonEngine;
pub use particle::ParticleEngine;
pub use tetrahedra::TetrahedraEngine;
pub use uniform_grid::UniformGridEngine;

use crate::camera::Projector;
use crate::error::RenderError;
use crate::gpu::{Device, ProgramId, RenderTarget, ShaderFeatures, ShaderSource};
use crate::object::RenderObject;
use crate::random_texture::RandomTexture;
use crate::shading::Shading;
use crate::{Matrix4f, Point3f, Result};
use std::sync::Arc;

/// Draw order within a pass: surfaces first, then volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineType {
    Point,
    Line,
    Polygon,
    Tetrahedra,
    UniformGrid,
}

impl EngineType {
    /// Volume engines are drawn after the depth snapshot when exact depth
    /// testing is on.
    pub fn is_volume(self) -> bool {
        matches!(self, EngineType::Tetrahedra | EngineType::UniformGrid)
    }

    pub fn name(self) -> &'static str {
        match self {
            EngineType::Point => "point",
            EngineType::Line => "line",
            EngineType::Polygon => "polygon",
            EngineType::Tetrahedra => "tetrahedra",
            EngineType::UniformGrid => "uniform grid",
        }
    }
}

/// Everything an engine needs to know about the pass it is drawing.
#[derive(Debug, Clone)]
pub struct FrameContext {
    /// Index of this pass within the current ensemble.
    pub pass_index: usize,
    /// Offset added to every random texture lookup in this pass.
    pub jitter: [u32; 2],
    pub is_first_pass_of_ensemble: bool,
    pub modelview: Matrix4f,
    pub projection: Matrix4f,
    /// Eye-space light position.
    pub light_position: Point3f,
    pub width: usize,
    pub height: usize,
}

impl FrameContext {
    pub fn projector(&self) -> Projector {
        Projector::new(self.modelview, self.projection, self.width, self.height)
    }
}

/// Resources the renderer creates once and hands to every engine at setup.
#[derive(Debug, Clone)]
pub struct SharedResources {
    pub random_texture: Arc<RandomTexture>,
    pub exact_depth_testing: bool,
    pub two_side_lighting: bool,
}

pub trait RenderEngine {
    fn engine_type(&self) -> EngineType;

    fn object(&self) -> Option<&Arc<RenderObject>>;

    fn name(&self) -> Option<&str> {
        self.object().map(|o| o.name())
    }

    /// Compiles the engine's program and keeps the shared resources.
    fn setup(&mut self, device: &mut Device, shared: &SharedResources) -> Result<()>;

    /// Uploads the bound object's geometry.
    fn build_buffers(&mut self, device: &mut Device) -> Result<()>;

    fn needs_rebuild(&self) -> bool;

    /// Resets per-ensemble counters when the renderer starts a new average.
    fn clear_ensemble(&mut self);

    /// Passes drawn since the last `clear_ensemble`.
    fn repetition_count(&self) -> usize;

    fn set_render_size(&mut self, width: usize, height: usize);

    /// Draws one stochastic pass.
    fn draw(&mut self, ctx: &FrameContext, target: &mut RenderTarget<'_>) -> Result<()>;

    fn release(&mut self, device: &mut Device);
}

/// State every engine carries.
#[derive(Debug, Clone, Default)]
pub struct EngineBase {
    pub(crate) object: Option<Arc<RenderObject>>,
    pub(crate) shading: Shading,
    pub(crate) needs_rebuild: bool,
    pub(crate) repetition_count: usize,
    pub(crate) width: usize,
    pub(crate) height: usize,
    pub(crate) random_texture: Option<Arc<RandomTexture>>,
    pub(crate) program: Option<ProgramId>,
    pub(crate) exact_depth_testing: bool,
    pub(crate) two_side_lighting: bool,
}

impl EngineBase {
    pub fn shading(&self) -> Shading {
        self.shading
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    /// Injects feature defines into `sources` and links them, replacing any
    /// previous program.
    pub(crate) fn setup_program(
        &mut self,
        device: &mut Device,
        engine: &'static str,
        mut sources: Vec<ShaderSource>,
        shared: &SharedResources,
        extra: ShaderFeatures,
    ) -> Result<()> {
        self.random_texture = Some(shared.random_texture.clone());
        self.exact_depth_testing = shared.exact_depth_testing;
        self.two_side_lighting = shared.two_side_lighting;

        let mut features = self.shading.features() | extra;
        if shared.two_side_lighting {
            features |= ShaderFeatures::TWO_SIDE_LIGHTING;
        }
        for source in sources.iter_mut() {
            source.define_features(features);
        }
        if let Some(old) = self.program.take() {
            device.release_program(old);
        }
        match device.create_program(&sources) {
            Ok(id) => {
                self.program = Some(id);
                tracing::debug!(engine, ?features, "program linked");
                Ok(())
            }
            Err(e) => {
                tracing::error!(engine, error = %e, "program setup failed");
                Err(RenderError::EngineSetup { engine: engine.to_string(), source: Box::new(e.into()) })
            }
        }
    }

    pub(crate) fn release_program(&mut self, device: &mut Device) {
        if let Some(id) = self.program.take() {
            device.release_program(id);
        }
    }
}
