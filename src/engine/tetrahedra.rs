//! Stochastic projected tetrahedra.
//!
//! Each pass, every pixel covered by a cell gets the cell's front and back face
//! hits. The pre-integration table turns the scalar pair and the thickness
//! between them into an opacity `α`, and the fragment survives with
//! probability `α`. Averaging many passes converges to the composited volume
//! without sorting cells.

use super::raster::{barycentric, depth_visible, fragment_random, perspective_weights, pixel_bounds, segment_alpha};
use super::{EngineBase, EngineType, FrameContext, RenderEngine, SharedResources};
use crate::camera::{Projector, ScreenPoint};
use crate::error::RenderError;
use crate::gpu::{BufferId, BufferKind, Device, RenderTarget, ShaderFeatures, ShaderSource, ShaderStage};
use crate::math::{dequantize_snorm8, lerp, normalize_or_zero, quantize_snorm8, solve_linear_system_4x4};
use crate::object::{CellType, RenderObject, UnstructuredVolume};
use crate::preintegration::PreIntegrationTable;
use crate::random_texture::{scatter_index, RandomTexture, DEFAULT_SIZE};
use crate::shading::Shading;
use crate::transfer_function::TransferFunction;
use crate::{Float, Point3f, Result, Vec3f, Vec4f};
use arrayvec::ArrayVec;
use cgmath::{InnerSpace, Transform};
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_EDGE_SIZE: Float = 1.0;

const VERTEX_SHADER: &str = include_str!("../../shaders/tetrahedra.vert");
const GEOMETRY_SHADER: &str = include_str!("../../shaders/tetrahedra.geom");
const FRAGMENT_SHADER: &str = include_str!("../../shaders/tetrahedra.frag");

/// Faces as the vertex triples opposite each corner.
const FACES: [[usize; 3]; 4] = [[1, 2, 3], [0, 2, 3], [0, 1, 3], [0, 1, 2]];

/// Host copy of what the engine uploads: per-vertex identifiers, coordinates,
/// quantized normals and normalized values for every time step, plus the cell
/// connectivity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TetrahedraBuffers {
    pub identifiers: Vec<[u16; 2]>,
    pub coords: Vec<[Float; 3]>,
    pub normals: Vec<[i8; 3]>,
    pub values: Vec<Float>,
    pub connections: Vec<u32>,
    pub time_steps: usize,
}

impl TetrahedraBuffers {
    /// Builds the buffers for `volume`, with normals from the scalar gradient at `step`.
    pub fn from_volume(volume: &UnstructuredVolume, random_texture_size: usize, step: usize) -> Self {
        let nnodes = volume.node_count();
        let range = volume.value_range();

        let identifiers = (0..nnodes)
            .map(|i| {
                let [x, y] = scatter_index(i, random_texture_size);
                [x as u16, y as u16]
            })
            .collect();

        let coords = volume.coords().iter().map(|p| [p.x, p.y, p.z]).collect();

        let values: Vec<Float> = (0..volume.values().len())
            .map(|i| range.normalize(volume.values().value(i)))
            .collect();

        let step_values = &values[step * nnodes..(step + 1) * nnodes];
        let normals = vertex_normals(volume, step_values);

        Self {
            identifiers,
            coords,
            normals,
            values,
            connections: volume.connections().to_vec(),
            time_steps: volume.time_steps(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.coords.len()
    }

    pub fn cell_count(&self) -> usize {
        self.connections.len() / 4
    }

    pub fn value(&self, step: usize, node: usize) -> Float {
        self.values[step * self.node_count() + node]
    }

    pub fn vertex_bytes(&self) -> usize {
        let n = self.node_count();
        n * (4 + 12 + 3) + self.values.len() * 4
    }

    fn upload(&self, device: &mut Device) -> std::result::Result<(BufferId, BufferId), crate::error::DeviceError> {
        let vbo = device.create_buffer(BufferKind::Vertex, self.vertex_bytes())?;
        let regions: [&[u8]; 4] = [
            bytemuck::cast_slice(&self.identifiers),
            bytemuck::cast_slice(&self.coords),
            bytemuck::cast_slice(&self.normals),
            bytemuck::cast_slice(&self.values),
        ];
        let mut offset = 0;
        for region in regions.iter() {
            if let Err(e) = device.upload_buffer(vbo, offset, region) {
                device.release_buffer(vbo);
                return Err(e);
            }
            offset += region.len();
        }

        let ibo = match device.create_buffer(BufferKind::Index, self.connections.len() * 4) {
            Ok(id) => id,
            Err(e) => {
                device.release_buffer(vbo);
                return Err(e);
            }
        };
        if let Err(e) = device.upload_buffer(ibo, 0, bytemuck::cast_slice(&self.connections)) {
            device.release_buffer(ibo);
            device.release_buffer(vbo);
            return Err(e);
        }
        Ok((vbo, ibo))
    }
}

/// Per-vertex normals: the negated gradient of the linear fit over every
/// incident cell, averaged and quantized to signed bytes. Vertices without
/// cells get a zero normal.
pub fn vertex_normals(volume: &UnstructuredVolume, values: &[Float]) -> Vec<[i8; 3]> {
    let nnodes = volume.node_count();
    let mut sums = vec![Vec3f::new(0.0, 0.0, 0.0); nnodes];
    let mut counts = vec![0u32; nnodes];
    let coords = volume.coords();

    for cell in volume.connections().chunks_exact(4) {
        let ids = [cell[0] as usize, cell[1] as usize, cell[2] as usize, cell[3] as usize];
        let rows = ids.map(|i| Vec4f::new(coords[i].x, coords[i].y, coords[i].z, 1.0));
        let b = Vec4f::new(values[ids[0]], values[ids[1]], values[ids[2]], values[ids[3]]);
        let gradient = solve_linear_system_4x4(rows, b)
            .map(|x| Vec3f::new(x.x, x.y, x.z))
            .unwrap_or_else(|| Vec3f::new(0.0, 0.0, 0.0));
        for &i in ids.iter() {
            sums[i] -= gradient;
            counts[i] += 1;
        }
    }

    sums.iter()
        .zip(counts.iter())
        .map(|(&sum, &count)| {
            if count == 0 {
                [0, 0, 0]
            } else {
                quantize_snorm8(normalize_or_zero(sum / count as Float))
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    depth: Float,
    eye: Vec3f,
    scalar: Float,
    normal: Vec3f,
}

impl Hit {
    fn lerp(&self, other: &Hit, t: Float) -> Hit {
        Hit {
            depth: lerp(t, self.depth, other.depth),
            eye: self.eye + (other.eye - self.eye) * t,
            scalar: lerp(t, self.scalar, other.scalar),
            normal: self.normal + (other.normal - self.normal) * t,
        }
    }
}

pub struct TetrahedraEngine {
    base: EngineBase,
    table: PreIntegrationTable,
    edge_size: Float,
    step: usize,
    geometry_dirty: bool,
    buffers: Option<TetrahedraBuffers>,
    vbo: Option<BufferId>,
    ibo: Option<BufferId>,
}

impl Default for TetrahedraEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TetrahedraEngine {
    pub fn new() -> Self {
        let mut table = PreIntegrationTable::new();
        table.set_transfer_function(&TransferFunction::default(), 0.0, 1.0);
        Self {
            base: EngineBase::default(),
            table,
            edge_size: DEFAULT_EDGE_SIZE,
            step: 0,
            geometry_dirty: false,
            buffers: None,
            vbo: None,
            ibo: None,
        }
    }

    pub fn with_object(object: Arc<RenderObject>) -> Result<Self> {
        let mut engine = Self::new();
        engine.attach_object(object)?;
        Ok(engine)
    }

    /// Binds a tetrahedral volume. Anything else is rejected and the previous
    /// binding is kept.
    pub fn attach_object(&mut self, object: Arc<RenderObject>) -> Result<()> {
        let steps = match &*object {
            RenderObject::Unstructured(v) if v.cell_type() == CellType::Tetrahedra => v.time_steps(),
            other => {
                tracing::error!(found = %other.kind(), "tetrahedra engine requires a tetrahedral volume");
                return Err(RenderError::UnsupportedObject { engine: "tetrahedra", found: other.kind() });
            }
        };
        if self.step >= steps {
            self.step = 0;
        }
        self.base.object = Some(object);
        self.geometry_dirty = true;
        Ok(())
    }

    pub fn volume(&self) -> Option<&UnstructuredVolume> {
        match self.base.object.as_deref() {
            Some(RenderObject::Unstructured(v)) => Some(v),
            _ => None,
        }
    }

    /// Replaces the transfer function; the table is rebuilt at the next buffer update.
    pub fn set_transfer_function(&mut self, tf: &TransferFunction) {
        self.table.set_transfer_function(tf, 0.0, 1.0);
    }

    pub fn transfer_function(&self) -> Option<&TransferFunction> {
        self.table.transfer_function()
    }

    pub fn preintegration_table(&self) -> &PreIntegrationTable {
        &self.table
    }

    /// Reference segment length for the opacity map.
    pub fn set_edge_size(&mut self, edge_size: Float) {
        if edge_size > 0.0 && edge_size != self.edge_size {
            self.edge_size = edge_size;
            if let Some(tf) = self.table.transfer_function().cloned() {
                self.table.set_transfer_function(&tf, 0.0, 1.0);
            }
        }
    }

    pub fn edge_size(&self) -> Float {
        self.edge_size
    }

    /// Selects the time step to render.
    pub fn set_step(&mut self, step: usize) -> Result<()> {
        let steps = self.volume().map(|v| v.time_steps()).unwrap_or(1);
        if step >= steps {
            return Err(RenderError::StepOutOfRange { step, steps });
        }
        if step != self.step {
            self.step = step;
            self.geometry_dirty = true;
        }
        Ok(())
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Takes effect at the next setup.
    pub fn set_shading(&mut self, shading: Shading) {
        self.base.shading = shading;
    }

    pub fn shading(&self) -> Shading {
        self.base.shading()
    }

    pub fn buffers(&self) -> Option<&TetrahedraBuffers> {
        self.buffers.as_ref()
    }

    fn release_buffers(&mut self, device: &mut Device) {
        if let Some(id) = self.vbo.take() {
            device.release_buffer(id);
        }
        if let Some(id) = self.ibo.take() {
            device.release_buffer(id);
        }
        self.buffers = None;
    }

    fn fragment(
        &self,
        ctx: &FrameContext,
        projector: &Projector,
        random: &RandomTexture,
        id: [u16; 2],
        (x, y): (usize, usize),
        mut front: Hit,
        mut back: Hit,
        target: &mut RenderTarget<'_>,
    ) {
        if !depth_visible(front.depth) {
            return;
        }
        if let Some(limit) = target.snapshot_depth_at(x, y) {
            if limit <= front.depth {
                return;
            }
            if limit < back.depth {
                let cut = projector.unproject_eye(x as Float + 0.5, y as Float + 0.5, limit);
                let total = (back.eye - front.eye).magnitude();
                let t = match cut {
                    Some(eye) if total > 0.0 => ((eye - front.eye).magnitude() / total).min(1.0),
                    _ => (limit - front.depth) / (back.depth - front.depth),
                };
                back = front.lerp(&back, t);
            }
        } else if front.depth >= target.depth_at(x, y) {
            return;
        }

        let thickness = (back.eye - front.eye).magnitude();
        let segment = match self.table.lookup(front.scalar, back.scalar) {
            Some(s) => s,
            None => return,
        };
        let alpha = segment_alpha(segment.density, thickness);
        if fragment_random(random, x, y, ctx.jitter, id) >= alpha {
            return;
        }

        let opacity = segment.density * self.table.edge_scale();
        if opacity <= 0.0 {
            return;
        }
        let color = [segment.color[0] / opacity, segment.color[1] / opacity, segment.color[2] / opacity];

        front.normal = ctx.modelview.transform_vector(front.normal);
        let light_dir = Projector::light_direction(front.eye, ctx.light_position);
        let view_dir = normalize_or_zero(-front.eye);
        let view_dir = if view_dir.magnitude2() > 0.0 { view_dir } else { Vec3f::unit_z() };
        let c = self.base.shading.shade(color, front.normal, light_dir, view_dir, self.base.two_side_lighting);
        target.write(x, y, [c[0], c[1], c[2], 1.0], front.depth);
    }
}

impl RenderEngine for TetrahedraEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::Tetrahedra
    }

    fn object(&self) -> Option<&Arc<RenderObject>> {
        self.base.object.as_ref()
    }

    fn setup(&mut self, device: &mut Device, shared: &SharedResources) -> Result<()> {
        let sources = vec![
            ShaderSource::new(ShaderStage::Vertex, VERTEX_SHADER),
            ShaderSource::new(ShaderStage::Geometry, GEOMETRY_SHADER),
            ShaderSource::new(ShaderStage::Fragment, FRAGMENT_SHADER),
        ];
        let mut extra = ShaderFeatures::empty();
        if shared.exact_depth_testing {
            extra |= ShaderFeatures::EXACT_DEPTH_TESTING;
        }
        self.base.setup_program(device, "tetrahedra", sources, shared, extra)?;
        // identifiers depend on the random texture size
        self.geometry_dirty |= self.base.object.is_some();
        Ok(())
    }

    fn build_buffers(&mut self, device: &mut Device) -> Result<()> {
        if self.geometry_dirty {
            self.release_buffers(device);

            let size = self.base.random_texture.as_ref().map(|r| r.size()).unwrap_or(DEFAULT_SIZE);
            let step = self.step;
            let buffers = match self.volume() {
                Some(volume) => {
                    let span = tracing::debug_span!("build_tetrahedra_buffers", cells = volume.cell_count(), nodes = volume.node_count());
                    let _enter = span.enter();
                    let start = Instant::now();
                    let buffers = TetrahedraBuffers::from_volume(volume, size, step);
                    tracing::debug!(
                        "Built {} bytes of vertex data in {} ms",
                        buffers.vertex_bytes(),
                        start.elapsed().as_millis()
                    );
                    buffers
                }
                None => {
                    self.geometry_dirty = false;
                    return Ok(());
                }
            };
            let (vbo, ibo) = buffers.upload(device)?;
            self.vbo = Some(vbo);
            self.ibo = Some(ibo);
            self.buffers = Some(buffers);
            self.geometry_dirty = false;
        }

        if !self.table.is_created() {
            self.table.create(self.edge_size);
        }
        self.table.download(device)?;
        Ok(())
    }

    fn needs_rebuild(&self) -> bool {
        self.geometry_dirty || !self.table.is_downloaded()
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
        let (buffers, random) = match (&self.buffers, &self.base.random_texture) {
            (Some(b), Some(r)) => (b, r.clone()),
            _ => return Ok(()),
        };
        if !self.table.is_created() {
            return Ok(());
        }
        let projector = ctx.projector();
        let (width, height) = (target.width(), target.height());
        let screen: Vec<Option<ScreenPoint>> = buffers.coords.iter()
            .map(|c| projector.project(Point3f::new(c[0], c[1], c[2])))
            .collect();

        for cell in buffers.connections.chunks_exact(4) {
            let ids = [cell[0] as usize, cell[1] as usize, cell[2] as usize, cell[3] as usize];
            let pts = match (screen[ids[0]], screen[ids[1]], screen[ids[2]], screen[ids[3]]) {
                (Some(a), Some(b), Some(c), Some(d)) => [a, b, c, d],
                _ => continue,
            };
            let (xs, ys) = match pixel_bounds(&pts, width, height) {
                Some(bounds) => bounds,
                None => continue,
            };
            let scalars = ids.map(|i| buffers.value(self.step, i));
            let normals = ids.map(|i| dequantize_snorm8(buffers.normals[i]));
            let id = buffers.identifiers[ids[0]];

            for y in ys.clone() {
                for x in xs.clone() {
                    let (px, py) = (x as Float + 0.5, y as Float + 0.5);
                    let mut hits = ArrayVec::<Hit, 4>::new();
                    for face in FACES.iter() {
                        let [i, j, k] = *face;
                        let w = match barycentric(&pts[i], &pts[j], &pts[k], px, py) {
                            Some(w) => w,
                            None => continue,
                        };
                        let pw = perspective_weights(w, [&pts[i], &pts[j], &pts[k]]);
                        hits.push(Hit {
                            depth: w[0] * pts[i].depth + w[1] * pts[j].depth + w[2] * pts[k].depth,
                            eye: pts[i].eye * pw[0] + pts[j].eye * pw[1] + pts[k].eye * pw[2],
                            scalar: scalars[i] * pw[0] + scalars[j] * pw[1] + scalars[k] * pw[2],
                            normal: normals[i] * pw[0] + normals[j] * pw[1] + normals[k] * pw[2],
                        });
                    }
                    if hits.len() < 2 {
                        continue;
                    }
                    let mut front = hits[0];
                    let mut back = hits[0];
                    for h in hits.iter().skip(1) {
                        if h.depth < front.depth { front = *h; }
                        if h.depth > back.depth { back = *h; }
                    }
                    self.fragment(ctx, &projector, &random, id, (x, y), front, back, target);
                }
            }
        }
        self.base.repetition_count += 1;
        Ok(())
    }

    fn release(&mut self, device: &mut Device) {
        self.release_buffers(device);
        self.table.release(device);
        self.base.release_program(device);
        self.geometry_dirty = self.base.object.is_some();
    }
}
