//! Stochastic triangles. A surface fragment survives with probability equal
//! to its interpolated opacity, so semi-transparent meshes need no sorting.

use super::raster::{barycentric, depth_visible, fragment_random, perspective_weights, pixel_bounds};
use super::{EngineBase, EngineType, FrameContext, RenderEngine, SharedResources};
use crate::camera::{Projector, ScreenPoint};
use crate::error::{DeviceError, RenderError};
use crate::gpu::texture::unorm8;
use crate::gpu::{BufferId, BufferKind, Device, RenderTarget, ShaderFeatures, ShaderSource, ShaderStage};
use crate::math::{dequantize_snorm8, normalize_or_zero, quantize_snorm8};
use crate::object::{PolygonObject, PolygonType, RenderObject};
use crate::random_texture::{scatter_index, RandomTexture, DEFAULT_SIZE};
use crate::shading::Shading;
use crate::{Float, Point3f, Result, Vec3f};
use cgmath::{InnerSpace, Transform};
use std::sync::Arc;

pub const DEFAULT_POLYGON_OFFSET: Float = 0.001;

const VERTEX_SHADER: &str = include_str!("../../shaders/polygon.vert");
const FRAGMENT_SHADER: &str = include_str!("../../shaders/polygon.frag");

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonBuffers {
    pub identifiers: Vec<[u16; 2]>,
    pub coords: Vec<[Float; 3]>,
    /// Color with the vertex opacity in alpha.
    pub colors: Vec<[u8; 4]>,
    /// Empty when the mesh has no normals.
    pub normals: Vec<[i8; 3]>,
    pub connections: Vec<u32>,
}

impl PolygonBuffers {
    pub fn from_polygons(polygons: &PolygonObject, random_texture_size: usize) -> Self {
        let n = polygons.node_count();
        Self {
            identifiers: (0..n)
                .map(|i| {
                    let [x, y] = scatter_index(i, random_texture_size);
                    [x as u16, y as u16]
                })
                .collect(),
            coords: polygons.coords().iter().map(|p| [p.x, p.y, p.z]).collect(),
            colors: (0..n)
                .map(|i| {
                    let [r, g, b] = polygons.color(i);
                    [r, g, b, polygons.opacity(i)]
                })
                .collect(),
            normals: polygons.normals().iter().map(|&v| quantize_snorm8(normalize_or_zero(v))).collect(),
            connections: polygons.indices(),
        }
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.connections.len() / 3
    }

    fn upload(&self, device: &mut Device) -> std::result::Result<(BufferId, BufferId), DeviceError> {
        let regions: [&[u8]; 4] = [
            bytemuck::cast_slice(&self.identifiers),
            bytemuck::cast_slice(&self.coords),
            bytemuck::cast_slice(&self.colors),
            bytemuck::cast_slice(&self.normals),
        ];
        let vbo = device.create_buffer(BufferKind::Vertex, regions.iter().map(|r| r.len()).sum())?;
        let mut offset = 0;
        for region in regions {
            if let Err(e) = device.upload_buffer(vbo, offset, region) {
                device.release_buffer(vbo);
                return Err(e);
            }
            offset += region.len();
        }
        let ibo = match device.create_buffer(BufferKind::Index, self.connections.len() * 4) {
            Ok(ibo) => ibo,
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

/// Interpolated attributes of one triangle fragment.
struct Fragment {
    depth: Float,
    eye: Vec3f,
    color: [Float; 3],
    alpha: Float,
    normal: Option<Vec3f>,
}

pub struct PolygonEngine {
    base: EngineBase,
    polygon_offset: Float,
    buffers: Option<PolygonBuffers>,
    vbo: Option<BufferId>,
    ibo: Option<BufferId>,
}

impl Default for PolygonEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolygonEngine {
    pub fn new() -> Self {
        Self {
            base: EngineBase::default(),
            polygon_offset: DEFAULT_POLYGON_OFFSET,
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

    /// Binds a triangle mesh. Quadrangles and other objects are rejected and
    /// the previous binding is kept.
    pub fn attach_object(&mut self, object: Arc<RenderObject>) -> Result<()> {
        match &*object {
            RenderObject::Polygon(p) if p.polygon_type() == PolygonType::Triangle => {}
            other => {
                tracing::error!(found = %other.kind(), "polygon engine requires a triangle mesh");
                return Err(RenderError::UnsupportedObject { engine: "polygon", found: other.kind() });
            }
        }
        self.base.object = Some(object);
        self.base.needs_rebuild = true;
        Ok(())
    }

    pub fn polygons(&self) -> Option<&PolygonObject> {
        match self.base.object.as_deref() {
            Some(RenderObject::Polygon(p)) => Some(p),
            _ => None,
        }
    }

    /// Window-space depth bias pulling the surface towards the viewer.
    pub fn set_polygon_offset(&mut self, offset: Float) {
        self.polygon_offset = offset;
    }

    pub fn polygon_offset(&self) -> Float {
        self.polygon_offset
    }

    /// Takes effect at the next setup. Meshes without normals are never shaded.
    pub fn set_shading(&mut self, shading: Shading) {
        self.base.shading = shading;
    }

    pub fn shading(&self) -> Shading {
        self.base.shading()
    }

    pub fn buffers(&self) -> Option<&PolygonBuffers> {
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

    fn interpolate(buffers: &PolygonBuffers, ids: [usize; 3], pts: [&ScreenPoint; 3], w: [Float; 3]) -> Fragment {
        let pw = perspective_weights(w, pts);
        let mix = |f: &dyn Fn(usize) -> Float| pw[0] * f(ids[0]) + pw[1] * f(ids[1]) + pw[2] * f(ids[2]);
        let c = |k: usize| move |i: usize| unorm8(buffers.colors[i][k]);
        Fragment {
            depth: w[0] * pts[0].depth + w[1] * pts[1].depth + w[2] * pts[2].depth,
            eye: pts[0].eye * pw[0] + pts[1].eye * pw[1] + pts[2].eye * pw[2],
            color: [mix(&c(0)), mix(&c(1)), mix(&c(2))],
            alpha: mix(&c(3)),
            normal: if buffers.has_normals() {
                let n = ids.map(|i| dequantize_snorm8(buffers.normals[i]));
                Some(n[0] * pw[0] + n[1] * pw[1] + n[2] * pw[2])
            } else {
                None
            },
        }
    }

    fn shade(&self, ctx: &FrameContext, fragment: &Fragment) -> [Float; 3] {
        let normal = match fragment.normal {
            Some(n) => ctx.modelview.transform_vector(n),
            None => return fragment.color,
        };
        let light_dir = Projector::light_direction(fragment.eye, ctx.light_position);
        let view_dir = normalize_or_zero(-fragment.eye);
        let view_dir = if view_dir.magnitude2() > 0.0 { view_dir } else { Vec3f::unit_z() };
        self.base.shading.shade(fragment.color, normal, light_dir, view_dir, self.base.two_side_lighting)
    }

    fn rasterize(
        &self,
        ctx: &FrameContext,
        buffers: &PolygonBuffers,
        random: &RandomTexture,
        screen: &[Option<ScreenPoint>],
        ids: [usize; 3],
        target: &mut RenderTarget<'_>,
    ) {
        let pts = match (screen[ids[0]], screen[ids[1]], screen[ids[2]]) {
            (Some(a), Some(b), Some(c)) => [a, b, c],
            _ => return,
        };
        let (xs, ys) = match pixel_bounds(&pts, target.width(), target.height()) {
            Some(bounds) => bounds,
            None => return,
        };
        let id = buffers.identifiers[ids[0]];
        let opaque = ids.iter().all(|&i| buffers.colors[i][3] == u8::MAX);
        for y in ys {
            for x in xs.clone() {
                let (px, py) = (x as Float + 0.5, y as Float + 0.5);
                let w = match barycentric(&pts[0], &pts[1], &pts[2], px, py) {
                    Some(w) => w,
                    None => continue,
                };
                let fragment = Self::interpolate(buffers, ids, [&pts[0], &pts[1], &pts[2]], w);
                if !depth_visible(fragment.depth) || fragment.alpha <= 0.0 {
                    continue;
                }
                if !opaque && fragment_random(random, x, y, ctx.jitter, id) >= fragment.alpha {
                    continue;
                }
                let depth = (fragment.depth - self.polygon_offset).max(0.0);
                let [r, g, b] = self.shade(ctx, &fragment);
                target.write(x, y, [r, g, b, 1.0], depth);
            }
        }
    }
}

impl RenderEngine for PolygonEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::Polygon
    }

    fn object(&self) -> Option<&Arc<RenderObject>> {
        self.base.object.as_ref()
    }

    fn setup(&mut self, device: &mut Device, shared: &SharedResources) -> Result<()> {
        let has_normals = self.polygons().map(|p| !p.normals().is_empty()).unwrap_or(false);
        if !has_normals {
            self.base.shading = Shading::None;
        }
        let sources = vec![
            ShaderSource::new(ShaderStage::Vertex, VERTEX_SHADER),
            ShaderSource::new(ShaderStage::Fragment, FRAGMENT_SHADER),
        ];
        self.base.setup_program(device, "polygon", sources, shared, ShaderFeatures::empty())?;
        // identifiers depend on the random texture size
        self.base.needs_rebuild |= self.base.object.is_some();
        Ok(())
    }

    fn build_buffers(&mut self, device: &mut Device) -> Result<()> {
        self.release_buffers(device);
        let size = self.base.random_texture.as_ref().map(|r| r.size()).unwrap_or(DEFAULT_SIZE);
        if let Some(polygons) = self.polygons() {
            let buffers = PolygonBuffers::from_polygons(polygons, size);
            let (vbo, ibo) = buffers.upload(device)?;
            tracing::debug!("Uploaded {} triangles", buffers.triangle_count());
            self.vbo = Some(vbo);
            self.ibo = Some(ibo);
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
        let (buffers, random) = match (&self.buffers, &self.base.random_texture) {
            (Some(b), Some(r)) => (b, r.clone()),
            _ => return Ok(()),
        };
        let projector = ctx.projector();
        let screen: Vec<Option<ScreenPoint>> = buffers.coords.iter()
            .map(|c| projector.project(Point3f::new(c[0], c[1], c[2])))
            .collect();
        for tri in buffers.connections.chunks_exact(3) {
            let ids = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            self.rasterize(ctx, buffers, &random, &screen, ids, target);
        }
        self.base.repetition_count += 1;
        Ok(())
    }

    fn release(&mut self, device: &mut Device) {
        self.release_buffers(device);
        self.base.release_program(device);
        self.base.needs_rebuild = self.base.object.is_some();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, LookAtCamera};
    use crate::gpu::texture::Framebuffer;
    use crate::gpu::{TextureDesc, TextureFormat};
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    fn context(camera: &LookAtCamera) -> FrameContext {
        let (width, height) = camera.window_size();
        FrameContext {
            pass_index: 0,
            jitter: [0, 0],
            is_first_pass_of_ensemble: true,
            modelview: camera.modelview_matrix(),
            projection: camera.projection_matrix(),
            light_position: point3f!(0, 0, 12),
            width,
            height,
        }
    }

    fn shared() -> SharedResources {
        SharedResources {
            random_texture: Arc::new(RandomTexture::new(64)),
            exact_depth_testing: false,
            two_side_lighting: false,
        }
    }

    /// Two triangles covering the square `[-0.5, 0.5]²` at `z = 0`.
    fn square(colors: Vec<[u8; 3]>) -> PolygonObject {
        PolygonObject::new(
            PolygonType::Triangle,
            vec![point3f!(-0.5, -0.5, 0), point3f!(0.5, -0.5, 0), point3f!(-0.5, 0.5, 0), point3f!(0.5, 0.5, 0)],
            vec![0, 1, 2, 2, 1, 3],
            colors,
        ).unwrap()
    }

    fn covered(target: &RenderTarget<'_>) -> usize {
        (0..target.height())
            .flat_map(|y| (0..target.width()).map(move |x| (x, y)))
            .filter(|&(x, y)| target.color_at(x, y)[3] > 0.0)
            .count()
    }

    #[test]
    fn test_buffers() {
        let mesh = square(vec![[255, 0, 0]])
            .with_opacities(vec![0, 64, 128, 255])
            .unwrap()
            .with_normals(vec![vec3f!(0, 0, 2); 4])
            .unwrap();
        let buffers = PolygonBuffers::from_polygons(&mesh, 1024);
        assert_eq!(buffers.colors[2], [255, 0, 0, 128]);
        assert_eq!(buffers.normals, vec![[0, 0, 127]; 4]);
        assert_eq!(buffers.identifiers[1], [59, 12]);
        assert_eq!(buffers.triangle_count(), 2);

        let flat = PolygonBuffers::from_polygons(&square(vec![]), 1024);
        assert!(!flat.has_normals());
        assert_eq!(flat.colors[0], [255, 255, 255, 255]);
    }

    #[test]
    fn test_rejects_quadrangles() {
        let quad = PolygonObject::new(PolygonType::Quadrangle, vec![point3f!(0, 0, 0); 4], vec![], vec![]).unwrap();
        let res = PolygonEngine::with_object(Arc::new(quad.into()));
        assert!(matches!(res, Err(RenderError::UnsupportedObject { engine: "polygon", .. })));

        let lines = crate::object::LineObject::new(crate::object::LineType::Strip, vec![point3f!(0, 0, 0); 2], vec![], vec![])
            .unwrap();
        let mut engine = PolygonEngine::with_object(Arc::new(square(vec![]).with_name("quad").into())).unwrap();
        assert!(engine.attach_object(Arc::new(lines.into())).is_err());
        assert_eq!(engine.name(), Some("quad"));
    }

    #[test]
    fn test_shading_needs_normals() {
        let mut device = Device::new();
        let mut engine = PolygonEngine::with_object(Arc::new(square(vec![]).into())).unwrap();
        assert_eq!(engine.shading(), Shading::lambert());
        engine.setup(&mut device, &shared()).unwrap();
        assert_eq!(engine.shading(), Shading::None);

        let lit = square(vec![]).with_normals(vec![vec3f!(0, 0, 1); 4]).unwrap();
        let mut engine = PolygonEngine::with_object(Arc::new(lit.into())).unwrap();
        engine.setup(&mut device, &shared()).unwrap();
        assert_eq!(engine.shading(), Shading::lambert());
    }

    #[test]
    fn test_opaque_square_covers_its_pixels() {
        let camera = LookAtCamera::orthographic(1.0, 32, 32);
        let mut device = Device::new();
        let mut engine = PolygonEngine::with_object(Arc::new(square(vec![[0, 0, 255]]).into())).unwrap();
        engine.setup(&mut device, &shared()).unwrap();
        engine.build_buffers(&mut device).unwrap();

        let mut fb = Framebuffer::new(32, 32);
        let mut target = RenderTarget::new(32, 32, &mut fb.color, &mut fb.depth, None);
        engine.draw(&context(&camera), &mut target).unwrap();
        // the square spans pixels 8..24 on both axes
        assert_eq!(covered(&target), 16 * 16);
        let center = target.color_at(16, 16);
        assert_abs_diff_eq!(center[2], 1.0, epsilon = 1e-5);
        assert_eq!((center[0], center[3]), (0.0, 1.0));
        assert_eq!(target.color_at(4, 16), [0.0, 0.0, 0.0, 0.0]);
        assert_eq!(engine.repetition_count(), 1);
    }

    #[test]
    fn test_transparent_square_keeps_a_fraction() {
        let camera = LookAtCamera::orthographic(1.0, 64, 64);
        let mesh = square(vec![]).with_opacities(vec![64]).unwrap();
        let mut device = Device::new();
        let mut engine = PolygonEngine::with_object(Arc::new(mesh.into())).unwrap();
        engine.setup(&mut device, &shared()).unwrap();
        engine.build_buffers(&mut device).unwrap();

        let mut fb = Framebuffer::new(64, 64);
        let mut target = RenderTarget::new(64, 64, &mut fb.color, &mut fb.depth, None);
        engine.draw(&context(&camera), &mut target).unwrap();
        let fraction = covered(&target) as Float / (32.0 * 32.0);
        assert!(fraction > 0.15 && fraction < 0.35, "{}", fraction);

        let invisible = square(vec![]).with_opacities(vec![0]).unwrap();
        let mut engine = PolygonEngine::with_object(Arc::new(invisible.into())).unwrap();
        engine.setup(&mut device, &shared()).unwrap();
        engine.build_buffers(&mut device).unwrap();
        let mut fb = Framebuffer::new(64, 64);
        let mut target = RenderTarget::new(64, 64, &mut fb.color, &mut fb.depth, None);
        engine.draw(&context(&camera), &mut target).unwrap();
        assert_eq!(covered(&target), 0);
    }

    #[test]
    fn test_offset_wins_against_coincident_depth() {
        let camera = LookAtCamera::orthographic(1.0, 32, 32);
        let ctx = context(&camera);
        // just in front of the square, by less than the default offset
        let depth = ctx.projector().project(point3f!(0, 0, 0)).map(|p| p.depth).unwrap() - 0.0005;

        let mut device = Device::new();
        let mut engine = PolygonEngine::with_object(Arc::new(square(vec![[0, 255, 0]]).into())).unwrap();
        engine.setup(&mut device, &shared()).unwrap();
        engine.build_buffers(&mut device).unwrap();
        for (offset, expected) in [(0.0, [1.0, 0.0, 0.0, 1.0]), (DEFAULT_POLYGON_OFFSET, [0.0, 1.0, 0.0, 1.0])] {
            engine.set_polygon_offset(offset);
            let mut fb = Framebuffer::new(32, 32);
            let mut target = RenderTarget::new(32, 32, &mut fb.color, &mut fb.depth, None);
            target.write(16, 16, [1.0, 0.0, 0.0, 1.0], depth);
            engine.draw(&ctx, &mut target).unwrap();
            let c = target.color_at(16, 16);
            for k in 0..4 {
                assert_abs_diff_eq!(c[k], expected[k], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_recovers_from_failed_upload() {
        let filler_desc = TextureDesc::new_2d(1024, 1024, TextureFormat::R8);
        let mut device = Device::with_memory_budget(filler_desc.byte_size() + 80);
        let filler = device.create_texture(filler_desc).unwrap();

        let mut engine = PolygonEngine::with_object(Arc::new(square(vec![]).into())).unwrap();
        // the 80 vertex bytes fit, the 24 index bytes do not
        assert!(engine.build_buffers(&mut device).is_err());
        assert!(engine.needs_rebuild());
        assert!(engine.buffers().is_none());
        assert_eq!(device.bytes_in_use(), filler_desc.byte_size());

        device.release_texture(filler);
        engine.build_buffers(&mut device).unwrap();
        assert!(!engine.needs_rebuild());
        engine.release(&mut device);
        assert_eq!(device.bytes_in_use(), 0);
    }
}
