//! Particle splatting. Particles are split into interleaved subsets and each
//! pass draws one subset as opaque splats; the ensemble average then
//! reconstructs the density of the whole cloud.

use super::{EngineBase, EngineType, FrameContext, RenderEngine, SharedResources};
use crate::camera::Projector;
use crate::error::{DeviceError, RenderError};
use crate::gpu::texture::unorm8;
use crate::gpu::{BufferId, BufferKind, Device, RenderTarget, ShaderFeatures, ShaderSource, ShaderStage};
use crate::math::{dequantize_snorm8, normalize_or_zero, quantize_snorm8};
use crate::object::{PointObject, RenderObject};
use crate::shading::Shading;
use crate::{Float, Point3f, Result, Vec3f};
use cgmath::{InnerSpace, Transform};
use smallvec::SmallVec;
use std::sync::Arc;

const VERTEX_SHADER: &str = include_str!("../../shaders/point.vert");
const FRAGMENT_SHADER: &str = include_str!("../../shaders/point.frag");

/// Number of particles in each of `level` interleaved subsets. The first
/// `n % level` subsets get one particle more than the rest.
pub fn subset_sizes(n: usize, level: usize) -> SmallVec<[usize; 16]> {
    let level = level.max(1);
    let per = n / level;
    let overflow = n % level;
    (0..level).map(|k| if k < overflow { per + 1 } else { per }).collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleBuffers {
    pub coords: Vec<[Float; 3]>,
    pub colors: Vec<[u8; 3]>,
    pub normals: Vec<[i8; 3]>,
}

impl ParticleBuffers {
    pub fn from_points(points: &PointObject) -> Self {
        let n = points.node_count();
        Self {
            coords: points.coords().iter().map(|p| [p.x, p.y, p.z]).collect(),
            colors: (0..n).map(|i| points.color(i)).collect(),
            normals: points.normals().iter().map(|&v| quantize_snorm8(normalize_or_zero(v))).collect(),
        }
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    fn upload(&self, device: &mut Device) -> std::result::Result<BufferId, DeviceError> {
        let coords: &[u8] = bytemuck::cast_slice(&self.coords);
        let colors: &[u8] = bytemuck::cast_slice(&self.colors);
        let normals: &[u8] = bytemuck::cast_slice(&self.normals);
        let vbo = device.create_buffer(BufferKind::Vertex, coords.len() + colors.len() + normals.len())?;
        let uploaded = device
            .upload_buffer(vbo, 0, coords)
            .and_then(|_| device.upload_buffer(vbo, coords.len(), colors))
            .and_then(|_| device.upload_buffer(vbo, coords.len() + colors.len(), normals));
        if let Err(e) = uploaded {
            device.release_buffer(vbo);
            return Err(e);
        }
        Ok(vbo)
    }
}

pub struct ParticleEngine {
    base: EngineBase,
    repetition_level: usize,
    buffers: Option<ParticleBuffers>,
    vbo: Option<BufferId>,
}

impl Default for ParticleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticleEngine {
    pub fn new() -> Self {
        Self {
            base: EngineBase::default(),
            repetition_level: 1,
            buffers: None,
            vbo: None,
        }
    }

    pub fn with_object(object: Arc<RenderObject>) -> Result<Self> {
        let mut engine = Self::new();
        engine.attach_object(object)?;
        Ok(engine)
    }

    pub fn attach_object(&mut self, object: Arc<RenderObject>) -> Result<()> {
        if !matches!(&*object, RenderObject::Point(_)) {
            tracing::error!(found = %object.kind(), "particle engine requires a point object");
            return Err(RenderError::UnsupportedObject { engine: "particle", found: object.kind() });
        }
        self.base.object = Some(object);
        self.base.needs_rebuild = true;
        Ok(())
    }

    pub fn points(&self) -> Option<&PointObject> {
        match self.base.object.as_deref() {
            Some(RenderObject::Point(p)) => Some(p),
            _ => None,
        }
    }

    /// Number of subsets the cloud is split into; a full cycle of passes
    /// draws every particle once.
    pub fn set_repetition_level(&mut self, level: usize) {
        self.repetition_level = level.max(1);
    }

    pub fn repetition_level(&self) -> usize {
        self.repetition_level
    }

    pub fn set_shading(&mut self, shading: Shading) {
        self.base.shading = shading;
    }

    pub fn buffers(&self) -> Option<&ParticleBuffers> {
        self.buffers.as_ref()
    }

    /// Subset drawn by the next pass.
    pub fn current_subset(&self) -> usize {
        self.base.repetition_count % self.repetition_level
    }

    fn splat(
        &self,
        ctx: &FrameContext,
        projector: &Projector,
        buffers: &ParticleBuffers,
        i: usize,
        half: i64,
        target: &mut RenderTarget<'_>,
    ) {
        let c = buffers.coords[i];
        let p = match projector.project(Point3f::new(c[0], c[1], c[2])) {
            Some(p) if (0.0..=1.0).contains(&p.depth) => p,
            _ => return,
        };
        let rgb = buffers.colors[i];
        let mut color = [unorm8(rgb[0]), unorm8(rgb[1]), unorm8(rgb[2])];
        if buffers.has_normals() {
            let normal = ctx.modelview.transform_vector(dequantize_snorm8(buffers.normals[i]));
            let light_dir = Projector::light_direction(p.eye, ctx.light_position);
            let view_dir = normalize_or_zero(-p.eye);
            let view_dir = if view_dir.magnitude2() > 0.0 { view_dir } else { Vec3f::unit_z() };
            color = self.base.shading.shade(color, normal, light_dir, view_dir, self.base.two_side_lighting);
        }

        let (cx, cy) = (p.x.floor() as i64, p.y.floor() as i64);
        let (width, height) = (target.width() as i64, target.height() as i64);
        for y in (cy - half).max(0)..(cy - half + 2 * half + 1).min(height) {
            for x in (cx - half).max(0)..(cx - half + 2 * half + 1).min(width) {
                target.write(x as usize, y as usize, [color[0], color[1], color[2], 1.0], p.depth);
            }
        }
    }
}

impl RenderEngine for ParticleEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::Point
    }

    fn object(&self) -> Option<&Arc<RenderObject>> {
        self.base.object.as_ref()
    }

    fn setup(&mut self, device: &mut Device, shared: &SharedResources) -> Result<()> {
        let has_normals = self.points().map(|p| !p.normals().is_empty()).unwrap_or(false);
        if !has_normals {
            self.base.shading = Shading::None;
        }
        let sources = vec![
            ShaderSource::new(ShaderStage::Vertex, VERTEX_SHADER),
            ShaderSource::new(ShaderStage::Fragment, FRAGMENT_SHADER),
        ];
        self.base.setup_program(device, "particle", sources, shared, ShaderFeatures::empty())?;
        Ok(())
    }

    fn build_buffers(&mut self, device: &mut Device) -> Result<()> {
        if let Some(id) = self.vbo.take() {
            device.release_buffer(id);
        }
        self.buffers = None;
        if let Some(points) = self.points() {
            let buffers = ParticleBuffers::from_points(points);
            let start = std::time::Instant::now();
            self.vbo = Some(buffers.upload(device)?);
            tracing::debug!("Uploaded {} particles in {} ms", buffers.coords.len(), start.elapsed().as_millis());
            self.buffers = Some(buffers);
        }
        self.base.needs_rebuild = false;
        Ok(())
    }

    fn needs_rebuild(&self) -> bool {
        self.base.needs_rebuild
    }

    fn clear_ensemble(&mut self) {
        self.base.repetition_count = 0;
    }

    fn repetition_count(&self) -> usize {
        self.base.repetition_count
    }

    fn set_render_size(&mut self, width: usize, height: usize) {
        self.base.width = width;
        self.base.height = height;
    }

    fn draw(&mut self, ctx: &FrameContext, target: &mut RenderTarget<'_>) -> Result<()> {
        let buffers = match &self.buffers {
            Some(b) => b,
            None => return Ok(()),
        };
        let size = self.points().map(|p| p.size()).unwrap_or(1.0);
        let half = ((size.round().max(1.0) as i64) - 1) / 2;
        let projector = ctx.projector();

        let level = self.repetition_level;
        let subset = self.current_subset();
        let count = subset_sizes(buffers.coords.len(), level)[subset];
        for k in 0..count {
            self.splat(ctx, &projector, buffers, subset + k * level, half, target);
        }
        self.base.repetition_count += 1;
        Ok(())
    }

    fn release(&mut self, device: &mut Device) {
        if let Some(id) = self.vbo.take() {
            device.release_buffer(id);
        }
        self.buffers = None;
        self.base.release_program(device);
        self.base.needs_rebuild = self.base.object.is_some();
    }
}
