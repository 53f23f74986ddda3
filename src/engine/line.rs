//! Stochastic lines. A line fragment survives with probability equal to the
//! line opacity, which makes semi-transparent lines order independent.

use super::raster::{depth_visible, fragment_random};
use super::{EngineBase, EngineType, FrameContext, RenderEngine, SharedResources};
use crate::error::{DeviceError, RenderError};
use crate::gpu::texture::unorm8;
use crate::gpu::{BufferId, BufferKind, Device, RenderTarget, ShaderFeatures, ShaderSource, ShaderStage};
use crate::math::lerp;
use crate::object::{LineObject, RenderObject};
use crate::random_texture::{scatter_index, DEFAULT_SIZE};
use crate::{Float, Point3f, Result};
use std::sync::Arc;

const VERTEX_SHADER: &str = include_str!("../../shaders/line.vert");
const FRAGMENT_SHADER: &str = include_str!("../../shaders/line.frag");

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineBuffers {
    pub identifiers: Vec<[u16; 2]>,
    pub coords: Vec<[Float; 3]>,
    pub colors: Vec<[u8; 3]>,
    pub segments: Vec<[u32; 2]>,
}

impl LineBuffers {
    pub fn from_lines(lines: &LineObject, random_texture_size: usize) -> Self {
        let n = lines.node_count();
        Self {
            identifiers: (0..n)
                .map(|i| {
                    let [x, y] = scatter_index(i, random_texture_size);
                    [x as u16, y as u16]
                })
                .collect(),
            coords: lines.coords().iter().map(|p| [p.x, p.y, p.z]).collect(),
            colors: (0..n).map(|i| lines.color(i)).collect(),
            segments: lines.segments(),
        }
    }

    fn upload(&self, device: &mut Device) -> std::result::Result<(BufferId, BufferId), DeviceError> {
        let n = self.coords.len();
        let vbo = device.create_buffer(BufferKind::Vertex, n * (4 + 12 + 3))?;
        let mut offset = 0;
        for region in [
            bytemuck::cast_slice::<_, u8>(&self.identifiers),
            bytemuck::cast_slice(&self.coords),
            bytemuck::cast_slice(&self.colors),
        ] {
            if let Err(e) = device.upload_buffer(vbo, offset, region) {
                device.release_buffer(vbo);
                return Err(e);
            }
            offset += region.len();
        }
        let ibo = device
            .create_buffer(BufferKind::Index, self.segments.len() * 8)
            .and_then(|ibo| match device.upload_buffer(ibo, 0, bytemuck::cast_slice(&self.segments)) {
                Ok(()) => Ok(ibo),
                Err(e) => {
                    device.release_buffer(ibo);
                    Err(e)
                }
            });
        match ibo {
            Ok(ibo) => Ok((vbo, ibo)),
            Err(e) => {
                device.release_buffer(vbo);
                Err(e)
            }
        }
    }
}

#[derive(Default)]
pub struct LineEngine {
    base: EngineBase,
    buffers: Option<LineBuffers>,
    vbo: Option<BufferId>,
    ibo: Option<BufferId>,
}

impl LineEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(object: Arc<RenderObject>) -> Result<Self> {
        let mut engine = Self::new();
        engine.attach_object(object)?;
        Ok(engine)
    }

    pub fn attach_object(&mut self, object: Arc<RenderObject>) -> Result<()> {
        if !matches!(&*object, RenderObject::Line(_)) {
            tracing::error!(found = %object.kind(), "line engine requires a line object");
            return Err(RenderError::UnsupportedObject { engine: "line", found: object.kind() });
        }
        self.base.object = Some(object);
        self.base.needs_rebuild = true;
        Ok(())
    }

    pub fn lines(&self) -> Option<&LineObject> {
        match self.base.object.as_deref() {
            Some(RenderObject::Line(l)) => Some(l),
            _ => None,
        }
    }

    pub fn buffers(&self) -> Option<&LineBuffers> {
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
}

impl RenderEngine for LineEngine {
    fn engine_type(&self) -> EngineType {
        EngineType::Line
    }

    fn object(&self) -> Option<&Arc<RenderObject>> {
        self.base.object.as_ref()
    }

    fn setup(&mut self, device: &mut Device, shared: &SharedResources) -> Result<()> {
        let sources = vec![
            ShaderSource::new(ShaderStage::Vertex, VERTEX_SHADER),
            ShaderSource::new(ShaderStage::Fragment, FRAGMENT_SHADER),
        ];
        self.base.shading = crate::shading::Shading::None;
        self.base.setup_program(device, "line", sources, shared, ShaderFeatures::empty())?;
        self.base.needs_rebuild |= self.base.object.is_some();
        Ok(())
    }

    fn build_buffers(&mut self, device: &mut Device) -> Result<()> {
        self.release_buffers(device);
        let size = self.base.random_texture.as_ref().map(|r| r.size()).unwrap_or(DEFAULT_SIZE);
        if let Some(lines) = self.lines() {
            let buffers = LineBuffers::from_lines(lines, size);
            let (vbo, ibo) = buffers.upload(device)?;
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
        let (size, opacity) = match self.lines() {
            Some(l) => (l.size(), l.opacity()),
            None => return Ok(()),
        };
        let projector = ctx.projector();
        let screen: Vec<_> = buffers.coords.iter()
            .map(|c| projector.project(Point3f::new(c[0], c[1], c[2])))
            .collect();
        let (width, height) = (target.width() as i64, target.height() as i64);
        let brush = size.round().max(1.0) as i64;
        let lo = -(brush - 1) / 2;

        for &[i, j] in buffers.segments.iter() {
            let (i, j) = (i as usize, j as usize);
            let (a, b) = match (screen[i], screen[j]) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };
            let id = buffers.identifiers[i];
            let (ca, cb) = (buffers.colors[i], buffers.colors[j]);
            let steps = (b.x - a.x).abs().max((b.y - a.y).abs()).ceil().max(1.0) as usize;

            for s in 0..=steps {
                let t = s as Float / steps as Float;
                let depth = lerp(t, a.depth, b.depth);
                if !depth_visible(depth) {
                    continue;
                }
                let cx = lerp(t, a.x, b.x).floor() as i64;
                let cy = lerp(t, a.y, b.y).floor() as i64;
                let color = [
                    lerp(t, unorm8(ca[0]), unorm8(cb[0])),
                    lerp(t, unorm8(ca[1]), unorm8(cb[1])),
                    lerp(t, unorm8(ca[2]), unorm8(cb[2])),
                    1.0,
                ];
                for dy in lo..lo + brush {
                    for dx in lo..lo + brush {
                        let (x, y) = (cx + dx, cy + dy);
                        if x < 0 || y < 0 || x >= width || y >= height {
                            continue;
                        }
                        let (x, y) = (x as usize, y as usize);
                        if opacity < 1.0 && fragment_random(&random, x, y, ctx.jitter, id) >= opacity {
                            continue;
                        }
                        target.write(x, y, color, depth);
                    }
                }
            }
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
    use crate::object::LineType;
    use crate::random_texture::RandomTexture;

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

    fn setup(engine: &mut LineEngine, device: &mut Device) {
        let shared = SharedResources {
            random_texture: Arc::new(RandomTexture::new(64)),
            exact_depth_testing: false,
            two_side_lighting: false,
        };
        engine.setup(device, &shared).unwrap();
        engine.build_buffers(device).unwrap();
    }

    #[test]
    fn test_buffers() {
        let lines = LineObject::new(
            LineType::Polyline,
            vec![point3f!(0, 0, 0), point3f!(1, 0, 0), point3f!(1, 1, 0)],
            vec![0, 2],
            vec![[255, 0, 0]],
        ).unwrap();
        let buffers = LineBuffers::from_lines(&lines, 1024);
        assert_eq!(buffers.segments, vec![[0, 1], [1, 2]]);
        assert_eq!(buffers.colors, vec![[255, 0, 0]; 3]);
        assert_eq!(buffers.identifiers[1], [59, 12]);
    }

    #[test]
    fn test_rejects_volumes() {
        let volume = crate::object::procedural::tetrahedral_cube(1).unwrap();
        let res = LineEngine::with_object(Arc::new(volume.into()));
        assert!(matches!(res, Err(RenderError::UnsupportedObject { engine: "line", .. })));
    }

    #[test]
    fn test_opaque_line_covers_its_pixels() {
        let camera = LookAtCamera::orthographic(1.0, 32, 32);
        let lines = LineObject::new(
            LineType::Strip,
            vec![point3f!(-0.5, 0, 0), point3f!(0.5, 0, 0)],
            vec![],
            vec![[0, 255, 0]],
        ).unwrap();
        let mut device = Device::new();
        let mut engine = LineEngine::with_object(Arc::new(lines.into())).unwrap();
        setup(&mut engine, &mut device);

        let mut fb = Framebuffer::new(32, 32);
        let mut target = RenderTarget::new(32, 32, &mut fb.color, &mut fb.depth, None);
        engine.draw(&context(&camera), &mut target).unwrap();

        for x in 8..24 {
            assert_eq!(target.color_at(x, 16), [0.0, 1.0, 0.0, 1.0]);
        }
        assert_eq!(target.color_at(16, 20), [0.0, 0.0, 0.0, 0.0]);
        assert_eq!(engine.repetition_count(), 1);
    }

    #[test]
    fn test_transparent_line_keeps_a_fraction() {
        let camera = LookAtCamera::orthographic(1.0, 64, 64);
        let lines = LineObject::new(
            LineType::Strip,
            vec![point3f!(-1, 0, 0), point3f!(1, 0, 0)],
            vec![],
            vec![],
        ).unwrap().with_size(4.0).with_opacity(0.25);
        let mut device = Device::new();
        let mut engine = LineEngine::with_object(Arc::new(lines.into())).unwrap();
        setup(&mut engine, &mut device);

        let mut fb = Framebuffer::new(64, 64);
        let mut target = RenderTarget::new(64, 64, &mut fb.color, &mut fb.depth, None);
        engine.draw(&context(&camera), &mut target).unwrap();
        let covered = (0..64)
            .flat_map(|y| (0..64).map(move |x| (x, y)))
            .filter(|&(x, y)| target.color_at(x, y)[3] > 0.0)
            .count();
        // 64 x 4 brush pixels
        let fraction = covered as Float / 256.0;
        assert!(fraction > 0.1 && fraction < 0.4, "{}", fraction);
    }
}
