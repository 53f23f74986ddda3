//! Stochastic ray casting through a uniform grid.
//!
//! Each pixel marches its view ray through the grid's bounding box. Segments
//! between consecutive samples are looked up in the pre-integration table and
//! the ray terminates at the first segment whose random test passes, so one
//! pass writes at most one opaque fragment per pixel.

use super::raster::segment_alpha;
use super::{EngineBase, EngineType, FrameContext, RenderEngine, SharedResources};
use crate::camera::Projector;
use crate::error::RenderError;
use crate::gpu::{Device, RenderTarget, ShaderFeatures, ShaderSource, ShaderStage, TexelData, TextureDesc, TextureFormat, TextureId};
use crate::gpu::texture::Filter;
use crate::math::{lerp, normalize_or_zero};
use crate::object::{RenderObject, StructuredVolume};
use crate::preintegration::PreIntegrationTable;
use crate::random_texture::RandomTexture;
use crate::shading::Shading;
use crate::transfer_function::TransferFunction;
use crate::{Float, Point3f, Result, Vec3f};
use cgmath::{EuclideanSpace, InnerSpace, Transform};
use std::sync::Arc;

const VERTEX_SHADER: &str = include_str!("../../shaders/uniform_grid.vert");
const FRAGMENT_SHADER: &str = include_str!("../../shaders/uniform_grid.frag");

/// Normalized grid values with trilinear sampling in object space.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSampler {
    resolution: [usize; 3],
    min: Point3f,
    max: Point3f,
    values: Vec<Float>,
}

impl GridSampler {
    pub fn from_volume(volume: &StructuredVolume) -> Self {
        let range = volume.value_range();
        let values = (0..volume.node_count())
            .map(|i| range.normalize(volume.values().value(i)))
            .collect();
        Self {
            resolution: volume.resolution(),
            min: volume.min_coord(),
            max: volume.max_coord(),
            values,
        }
    }

    pub fn values(&self) -> &[Float] {
        &self.values
    }

    /// Smallest distance between neighbouring grid nodes.
    pub fn voxel_size(&self) -> Float {
        (0..3)
            .filter(|&a| self.resolution[a] > 1)
            .map(|a| (self.max[a] - self.min[a]) / (self.resolution[a] - 1) as Float)
            .filter(|&s| s > 0.0)
            .fold(Float::INFINITY, Float::min)
            .min(1.0e6)
    }

    fn node(&self, i: usize, j: usize, k: usize) -> Float {
        let [nx, ny, _] = self.resolution;
        self.values[(k * ny + j) * nx + i]
    }

    fn grid_coord(&self, p: Point3f, axis: usize) -> (usize, usize, Float) {
        let n = self.resolution[axis];
        let extent = self.max[axis] - self.min[axis];
        if n == 1 || extent <= 0.0 {
            return (0, 0, 0.0);
        }
        let g = ((p[axis] - self.min[axis]) / extent * (n - 1) as Float).max(0.0).min((n - 1) as Float);
        let i0 = (g.floor() as usize).min(n - 2);
        (i0, i0 + 1, g - i0 as Float)
    }

    /// Trilinear value at `p`, clamped to the grid.
    pub fn sample(&self, p: Point3f) -> Float {
        let (x0, x1, fx) = self.grid_coord(p, 0);
        let (y0, y1, fy) = self.grid_coord(p, 1);
        let (z0, z1, fz) = self.grid_coord(p, 2);
        let c00 = lerp(fx, self.node(x0, y0, z0), self.node(x1, y0, z0));
        let c10 = lerp(fx, self.node(x0, y1, z0), self.node(x1, y1, z0));
        let c01 = lerp(fx, self.node(x0, y0, z1), self.node(x1, y0, z1));
        let c11 = lerp(fx, self.node(x0, y1, z1), self.node(x1, y1, z1));
        lerp(fz, lerp(fy, c00, c10), lerp(fy, c01, c11))
    }

    /// Central-difference gradient in object space.
    pub fn gradient(&self, p: Point3f) -> Vec3f {
        let h = self.voxel_size();
        let d = |axis: usize| {
            let mut e = Vec3f::new(0.0, 0.0, 0.0);
            e[axis] = h;
            (self.sample(p + e) - self.sample(p - e)) / (2.0 * h)
        };
        Vec3f::new(d(0), d(1), d(2))
    }

    /// Distances along the ray `origin + t * dir` where it enters and leaves the box.
    pub fn intersect(&self, origin: Point3f, dir: Vec3f, t_max: Float) -> Option<(Float, Float)> {
        let (mut t0, mut t1) = (0.0, t_max);
        for a in 0..3 {
            if dir[a].abs() < 1e-12 {
                if origin[a] < self.min[a] || origin[a] > self.max[a] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / dir[a];
            let mut near = (self.min[a] - origin[a]) * inv;
            let mut far = (self.max[a] - origin[a]) * inv;
            if near > far {
                std::mem::swap(&mut near, &mut far);
            }
            t0 = near.max(t0);
            t1 = far.min(t1);
            if t0 > t1 {
                return None;
            }
        }
        Some((t0, t1))
    }
}

pub struct UniformGridEngine {
    base: EngineBase,
    table: PreIntegrationTable,
    edge_size: Float,
    step_size: Option<Float>,
    sampler: Option<GridSampler>,
    texture: Option<TextureId>,
}

impl Default for UniformGridEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl UniformGridEngine {
    pub fn new() -> Self {
        let mut table = PreIntegrationTable::new();
        table.set_transfer_function(&TransferFunction::default(), 0.0, 1.0);
        Self {
            base: EngineBase::default(),
            table,
            edge_size: 1.0,
            step_size: None,
            sampler: None,
            texture: None,
        }
    }

    pub fn with_object(object: Arc<RenderObject>) -> Result<Self> {
        let mut engine = Self::new();
        engine.attach_object(object)?;
        Ok(engine)
    }

    pub fn attach_object(&mut self, object: Arc<RenderObject>) -> Result<()> {
        if !matches!(&*object, RenderObject::Structured(_)) {
            tracing::error!(found = %object.kind(), "uniform grid engine requires a structured volume");
            return Err(RenderError::UnsupportedObject { engine: "uniform grid", found: object.kind() });
        }
        self.base.object = Some(object);
        self.base.needs_rebuild = true;
        Ok(())
    }

    pub fn volume(&self) -> Option<&StructuredVolume> {
        match self.base.object.as_deref() {
            Some(RenderObject::Structured(v)) => Some(v),
            _ => None,
        }
    }

    pub fn set_transfer_function(&mut self, tf: &TransferFunction) {
        self.table.set_transfer_function(tf, 0.0, 1.0);
    }

    pub fn preintegration_table(&self) -> &PreIntegrationTable {
        &self.table
    }

    pub fn set_edge_size(&mut self, edge_size: Float) {
        if edge_size > 0.0 && edge_size != self.edge_size {
            self.edge_size = edge_size;
            if let Some(tf) = self.table.transfer_function().cloned() {
                self.table.set_transfer_function(&tf, 0.0, 1.0);
            }
        }
    }

    /// Ray marching step in object units. Defaults to one voxel.
    pub fn set_step_size(&mut self, step: Float) {
        self.step_size = if step > 0.0 { Some(step) } else { None };
    }

    pub fn step_size(&self) -> Option<Float> {
        self.step_size.or_else(|| self.sampler.as_ref().map(|s| s.voxel_size()))
    }

    pub fn set_shading(&mut self, shading: Shading) {
        self.base.shading = shading;
    }

    pub fn sampler(&self) -> Option<&GridSampler> {
        self.sampler.as_ref()
    }

    fn release_volume(&mut self, device: &mut Device) {
        if let Some(id) = self.texture.take() {
            device.release_texture(id);
        }
        self.sampler = None;
    }

    #[allow(clippy::too_many_arguments)]
    fn march(
        &self,
        ctx: &FrameContext,
        projector: &Projector,
        sampler: &GridSampler,
        random: &RandomTexture,
        step: Float,
        (x, y): (usize, usize),
        target: &mut RenderTarget<'_>,
    ) {
        let (px, py) = (x as Float + 0.5, y as Float + 0.5);
        let (near, far) = match (projector.unproject(px, py, 0.0), projector.unproject(px, py, 1.0)) {
            (Some(n), Some(f)) => (n, f),
            _ => return,
        };
        let length = (far - near).magnitude();
        if length <= 0.0 {
            return;
        }
        let dir = (far - near) / length;
        let (t0, t1) = match sampler.intersect(near, dir, length) {
            Some(t) => t,
            None => return,
        };
        let limit = match target.snapshot_depth_at(x, y) {
            Some(snapshot) => snapshot.min(target.depth_at(x, y)),
            None => target.depth_at(x, y),
        };
        let depth_of = |t: Float| lerp(t / length, 0.0, 1.0);

        let (jx, jy) = (ctx.jitter[0] as u64, ctx.jitter[1] as u64);
        let (rx, ry) = (x as u64 + jx, y as u64 + jy);
        let first = step * random.sample16(rx + 31, ry + 17);

        let mut front_t = t0;
        let mut front_s = sampler.sample(near + dir * t0);
        let mut back_t = (t0 + first).min(t1);
        let mut k = 0u64;
        while front_t < t1 {
            let front_depth = self.window_depth(projector, near + dir * front_t, depth_of(front_t));
            if front_depth >= limit {
                return;
            }
            let mut back_p = near + dir * back_t;
            let back_depth = self.window_depth(projector, back_p, depth_of(back_t));
            let truncated = back_depth > limit && back_depth > front_depth;
            if truncated {
                let cut = (limit - front_depth) / (back_depth - front_depth);
                back_t = front_t + (back_t - front_t) * cut;
                back_p = near + dir * back_t;
            }
            let back_s = sampler.sample(back_p);

            if let Some(segment) = self.table.lookup(front_s, back_s) {
                let alpha = segment_alpha(segment.density, back_t - front_t);
                if random.sample16(rx + k * 97, ry + k * 211) < alpha {
                    let opacity = segment.density * self.table.edge_scale();
                    if opacity > 0.0 {
                        let front_p = near + dir * front_t;
                        let color = [segment.color[0] / opacity, segment.color[1] / opacity, segment.color[2] / opacity];
                        let c = self.shade(ctx, projector, sampler, front_p, color);
                        target.write(x, y, [c[0], c[1], c[2], 1.0], front_depth);
                        return;
                    }
                }
            }

            if truncated || back_t >= t1 {
                break;
            }
            front_t = back_t;
            front_s = back_s;
            back_t = (back_t + step).min(t1);
            k += 1;
        }
    }

    fn window_depth(&self, projector: &Projector, p: Point3f, fallback: Float) -> Float {
        projector.project(p).map(|s| s.depth).unwrap_or(fallback)
    }

    fn shade(&self, ctx: &FrameContext, projector: &Projector, sampler: &GridSampler, p: Point3f, color: [Float; 3]) -> [Float; 3] {
        if matches!(self.base.shading, Shading::None) {
            return color;
        }
        let normal = ctx.modelview.transform_vector(-sampler.gradient(p));
        let eye = projector.modelview().transform_point(p).to_vec();
        let light_dir = Projector::light_direction(eye, ctx.light_position);
        let view_dir = normalize_or_zero(-eye);
        let view_dir = if view_dir.magnitude2() > 0.0 { view_dir } else { Vec3f::unit_z() };
        self.base.shading.shade(color, normal, light_dir, view_dir, self.base.two_side_lighting)
    }
}

impl RenderEngine for UniformGridEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::UniformGrid
    }

    fn object(&self) -> Option<&Arc<RenderObject>> {
        self.base.object.as_ref()
    }

    fn setup(&mut self, device: &mut Device, shared: &SharedResources) -> Result<()> {
        let sources = vec![
            ShaderSource::new(ShaderStage::Vertex, VERTEX_SHADER),
            ShaderSource::new(ShaderStage::Fragment, FRAGMENT_SHADER),
        ];
        let mut extra = ShaderFeatures::empty();
        if shared.exact_depth_testing {
            extra |= ShaderFeatures::EXACT_DEPTH_TESTING;
        }
        self.base.setup_program(device, "uniform grid", sources, shared, extra)
    }

    fn build_buffers(&mut self, device: &mut Device) -> Result<()> {
        if self.base.needs_rebuild {
            self.release_volume(device);
            if let Some(volume) = self.volume() {
                let sampler = GridSampler::from_volume(volume);
                let [nx, ny, nz] = sampler.resolution;
                let desc = TextureDesc::new_3d(nx, ny, nz, TextureFormat::R32F).with_filter(Filter::Linear);
                let id = device.create_texture(desc)?;
                self.texture = Some(id);
                device.upload_texture(id, TexelData::R32F(sampler.values.clone()))?;
                tracing::debug!(resolution = ?sampler.resolution, "uploaded grid");
                self.sampler = Some(sampler);
            }
            self.base.needs_rebuild = false;
        }
        if !self.table.is_created() {
            self.table.create(self.edge_size);
        }
        self.table.download(device)?;
        Ok(())
    }

    fn needs_rebuild(&self) -> bool {
        self.base.needs_rebuild || !self.table.is_downloaded()
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
        let (sampler, random) = match (&self.sampler, &self.base.random_texture) {
            (Some(s), Some(r)) => (s, r.clone()),
            _ => return Ok(()),
        };
        let step = match self.step_size() {
            Some(s) if s.is_finite() => s,
            _ => return Ok(()),
        };
        if !self.table.is_created() {
            return Ok(());
        }
        let projector = ctx.projector();
        for y in 0..target.height() {
            for x in 0..target.width() {
                self.march(ctx, &projector, sampler, &random, step, (x, y), target);
            }
        }
        self.base.repetition_count += 1;
        Ok(())
    }

    fn release(&mut self, device: &mut Device) {
        self.release_volume(device);
        self.table.release(device);
        self.base.release_program(device);
        self.base.needs_rebuild = self.base.object.is_some();
    }
}
