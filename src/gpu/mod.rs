//! Software reference device.
//!
//! Every GPU resource the renderer uses lives in a typed arena owned by the
//! [`Device`]. Engines and the orchestrator only hold handles. An optional
//! memory budget makes allocation failure reproducible.

pub mod shader;
pub mod texture;

pub use shader::{ProgramObject, ShaderFeatures, ShaderSource, ShaderStage};
pub use texture::{
    Filter, Framebuffer, RenderTarget, TexelData, Texture, TextureDesc, TextureFormat, Wrap,
};

use crate::error::DeviceError;
use crate::id_arena::{Id, IdArena};
use crate::{Float, Rgba};
use rayon::prelude::*;

pub type TextureId = Id<Texture>;
pub type BufferId = Id<Buffer>;
pub type ProgramId = Id<ProgramObject>;
pub type FramebufferId = Id<Framebuffer>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
}

#[derive(Debug, Clone)]
pub struct Buffer {
    kind: BufferKind,
    data: Vec<u8>,
}

impl Buffer {
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// The image most recently presented to the window, row 0 at the bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct Screen {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<[u8; 4]>,
}

#[derive(Default)]
pub struct Device {
    textures: IdArena<Texture>,
    buffers: IdArena<Buffer>,
    programs: IdArena<ProgramObject>,
    framebuffers: IdArena<Framebuffer>,
    memory_budget: Option<usize>,
    bytes_in_use: usize,
    screen: Option<Screen>,
}

fn invalid(kind: &'static str) -> DeviceError {
    DeviceError::InvalidHandle { kind }
}

impl Device {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_budget(bytes: usize) -> Self {
        Self {
            memory_budget: Some(bytes),
            ..Self::default()
        }
    }

    pub fn bytes_in_use(&self) -> usize {
        self.bytes_in_use
    }

    pub fn memory_budget(&self) -> Option<usize> {
        self.memory_budget
    }

    fn reserve(&mut self, requested: usize) -> Result<(), DeviceError> {
        if let Some(budget) = self.memory_budget {
            let available = budget.saturating_sub(self.bytes_in_use);
            if requested > available {
                tracing::warn!(requested, available, "device allocation failed");
                return Err(DeviceError::OutOfMemory { requested, available });
            }
        }
        self.bytes_in_use += requested;
        Ok(())
    }

    fn free(&mut self, bytes: usize) {
        self.bytes_in_use = self.bytes_in_use.saturating_sub(bytes);
    }

    pub fn create_texture(&mut self, desc: TextureDesc) -> Result<TextureId, DeviceError> {
        self.reserve(desc.byte_size())?;
        let data = TexelData::zeroed(desc.format, desc.texel_count());
        Ok(self.textures.insert(Texture { desc, data }))
    }

    pub fn upload_texture(&mut self, id: TextureId, data: TexelData) -> Result<(), DeviceError> {
        let texture = self.textures.get_mut(id).ok_or_else(|| invalid("texture"))?;
        if data.format() != texture.desc.format {
            return Err(DeviceError::FormatMismatch {
                expected: texture.desc.format.name(),
                actual: data.format().name(),
            });
        }
        if data.len() != texture.desc.texel_count() {
            return Err(DeviceError::SizeMismatch { expected: texture.desc.texel_count(), actual: data.len() });
        }
        texture.data = data;
        Ok(())
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id)
    }

    pub fn clear_texture(&mut self, id: TextureId) -> Result<(), DeviceError> {
        let texture = self.textures.get_mut(id).ok_or_else(|| invalid("texture"))?;
        texture.data = TexelData::zeroed(texture.desc.format, texture.desc.texel_count());
        Ok(())
    }

    pub fn release_texture(&mut self, id: TextureId) {
        if let Some(texture) = self.textures.remove(id) {
            self.free(texture.desc.byte_size());
        }
    }

    pub fn create_buffer(&mut self, kind: BufferKind, size: usize) -> Result<BufferId, DeviceError> {
        self.reserve(size)?;
        Ok(self.buffers.insert(Buffer { kind, data: vec![0; size] }))
    }

    /// Copies `data` into the buffer starting at `offset` bytes.
    pub fn upload_buffer(&mut self, id: BufferId, offset: usize, data: &[u8]) -> Result<(), DeviceError> {
        let buffer = self.buffers.get_mut(id).ok_or_else(|| invalid("buffer"))?;
        let end = offset + data.len();
        if end > buffer.data.len() {
            return Err(DeviceError::SizeMismatch { expected: buffer.data.len(), actual: end });
        }
        buffer.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub fn buffer(&self, id: BufferId) -> Option<&Buffer> {
        self.buffers.get(id)
    }

    pub fn release_buffer(&mut self, id: BufferId) {
        if let Some(buffer) = self.buffers.remove(id) {
            self.free(buffer.data.len());
        }
    }

    pub fn create_program(&mut self, sources: &[ShaderSource]) -> Result<ProgramId, DeviceError> {
        let program = shader::link(sources)?;
        Ok(self.programs.insert(program))
    }

    pub fn program(&self, id: ProgramId) -> Option<&ProgramObject> {
        self.programs.get(id)
    }

    pub fn release_program(&mut self, id: ProgramId) {
        self.programs.remove(id);
    }

    pub fn create_framebuffer(&mut self, width: usize, height: usize) -> Result<FramebufferId, DeviceError> {
        let framebuffer = Framebuffer::new(width, height);
        self.reserve(framebuffer.byte_size())?;
        Ok(self.framebuffers.insert(framebuffer))
    }

    pub fn framebuffer(&self, id: FramebufferId) -> Option<&Framebuffer> {
        self.framebuffers.get(id)
    }

    pub fn release_framebuffer(&mut self, id: FramebufferId) {
        if let Some(framebuffer) = self.framebuffers.remove(id) {
            self.free(framebuffer.byte_size());
        }
    }

    pub fn clear_framebuffer(&mut self, id: FramebufferId, color: Rgba) -> Result<(), DeviceError> {
        let fb = self.framebuffers.get_mut(id).ok_or_else(|| invalid("framebuffer"))?;
        fb.color.par_iter_mut().for_each(|c| *c = color);
        fb.depth.par_iter_mut().for_each(|d| *d = 1.0);
        Ok(())
    }

    /// Binds the framebuffer for drawing, optionally exposing a depth snapshot texture.
    pub fn render_target(
        &mut self,
        id: FramebufferId,
        depth_snapshot: Option<TextureId>,
    ) -> Result<RenderTarget<'_>, DeviceError> {
        let snapshot = match depth_snapshot {
            Some(tex) => {
                let texture = self.textures.get(tex).ok_or_else(|| invalid("texture"))?;
                Some(texture.as_depth().ok_or(DeviceError::FormatMismatch {
                    expected: TextureFormat::Depth32F.name(),
                    actual: texture.desc.format.name(),
                })?)
            }
            None => None,
        };
        let fb = self.framebuffers.get_mut(id).ok_or_else(|| invalid("framebuffer"))?;
        if let Some(snapshot) = snapshot {
            if snapshot.len() != fb.depth.len() {
                return Err(DeviceError::SizeMismatch { expected: fb.depth.len(), actual: snapshot.len() });
            }
        }
        Ok(RenderTarget::new(fb.width, fb.height, &mut fb.color, &mut fb.depth, snapshot))
    }

    /// Copies the framebuffer's depth attachment into a depth texture.
    pub fn copy_depth(&mut self, fb: FramebufferId, dst: TextureId) -> Result<(), DeviceError> {
        let fb = self.framebuffers.get(fb).ok_or_else(|| invalid("framebuffer"))?;
        let texture = self.textures.get_mut(dst).ok_or_else(|| invalid("texture"))?;
        match &mut texture.data {
            TexelData::Depth32F(d) if d.len() == fb.depth.len() => {
                d.copy_from_slice(&fb.depth);
                Ok(())
            }
            TexelData::Depth32F(d) => Err(DeviceError::SizeMismatch { expected: fb.depth.len(), actual: d.len() }),
            other => Err(DeviceError::FormatMismatch {
                expected: TextureFormat::Depth32F.name(),
                actual: other.format().name(),
            }),
        }
    }

    /// `dst ← dst + (src − dst)·opacity` for every texel, the fixed-function
    /// blend of a full-screen quad drawn with constant alpha.
    pub fn blend_framebuffer(&mut self, src: FramebufferId, dst: TextureId, opacity: Float) -> Result<(), DeviceError> {
        let fb = self.framebuffers.get(src).ok_or_else(|| invalid("framebuffer"))?;
        let target = self.textures.get_mut(dst).ok_or_else(|| invalid("texture"))?;
        if target.desc.texel_count() != fb.color.len() {
            return Err(DeviceError::SizeMismatch { expected: target.desc.texel_count(), actual: fb.color.len() });
        }
        let mix = |d: Float, s: Float| d + (s - d) * opacity;
        match &mut target.data {
            TexelData::Rgba32F(accum) => {
                accum.par_iter_mut().zip(fb.color.par_iter()).for_each(|(d, s)| {
                    for c in 0..4 {
                        d[c] = mix(d[c], s[c]);
                    }
                });
            }
            TexelData::Rgba8(accum) => {
                accum.par_iter_mut().zip(fb.color.par_iter()).for_each(|(d, s)| {
                    for c in 0..4 {
                        d[c] = texture::to_unorm8(mix(texture::unorm8(d[c]), s[c]));
                    }
                });
            }
            other => {
                return Err(DeviceError::FormatMismatch {
                    expected: TextureFormat::Rgba32F.name(),
                    actual: other.format().name(),
                })
            }
        }
        Ok(())
    }

    /// Converts any color texture into an RGBA8 texture of the same size.
    pub fn resolve(&mut self, src: TextureId, dst: TextureId) -> Result<(), DeviceError> {
        let (src, dst) = self.textures.get2_mut(src, dst).ok_or_else(|| invalid("texture"))?;
        let count = src.desc.texel_count();
        match &mut dst.data {
            TexelData::Rgba8(out) if out.len() == count => {
                let src = &*src;
                out.par_iter_mut().enumerate().for_each(|(i, o)| {
                    let c = src.rgba(i);
                    *o = [texture::to_unorm8(c[0]), texture::to_unorm8(c[1]), texture::to_unorm8(c[2]), texture::to_unorm8(c[3])];
                });
                Ok(())
            }
            TexelData::Rgba8(out) => Err(DeviceError::SizeMismatch { expected: count, actual: out.len() }),
            other => Err(DeviceError::FormatMismatch {
                expected: TextureFormat::Rgba8.name(),
                actual: other.format().name(),
            }),
        }
    }

    /// Shows an RGBA8 texture on the window.
    pub fn present(&mut self, id: TextureId) -> Result<(), DeviceError> {
        let texture = self.textures.get(id).ok_or_else(|| invalid("texture"))?;
        let pixels = texture.as_rgba8().ok_or(DeviceError::FormatMismatch {
            expected: TextureFormat::Rgba8.name(),
            actual: texture.desc.format.name(),
        })?;
        self.screen = Some(Screen {
            width: texture.desc.width,
            height: texture.desc.height,
            pixels: pixels.to_vec(),
        });
        Ok(())
    }

    pub fn screen(&self) -> Option<&Screen> {
        self.screen.as_ref()
    }
}
