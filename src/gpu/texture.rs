use crate::{Float, Rgba};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8,
    Rgba8,
    R32F,
    Rgba32F,
    Depth32F,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::Rgba8 => 4,
            TextureFormat::R32F => 4,
            TextureFormat::Rgba32F => 16,
            TextureFormat::Depth32F => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TextureFormat::R8 => "R8",
            TextureFormat::Rgba8 => "RGBA8",
            TextureFormat::R32F => "R32F",
            TextureFormat::Rgba32F => "RGBA32F",
            TextureFormat::Depth32F => "DEPTH32F",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    Repeat,
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub format: TextureFormat,
    pub wrap: Wrap,
    pub filter: Filter,
}

impl TextureDesc {
    pub fn new_2d(width: usize, height: usize, format: TextureFormat) -> Self {
        Self::new_3d(width, height, 1, format)
    }

    pub fn new_3d(width: usize, height: usize, depth: usize, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            depth,
            format,
            wrap: Wrap::ClampToEdge,
            filter: Filter::Nearest,
        }
    }

    pub fn with_wrap(self, wrap: Wrap) -> Self {
        Self { wrap, ..self }
    }

    pub fn with_filter(self, filter: Filter) -> Self {
        Self { filter, ..self }
    }

    pub fn texel_count(&self) -> usize {
        self.width * self.height * self.depth
    }

    pub fn byte_size(&self) -> usize {
        self.texel_count() * self.format.bytes_per_texel()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TexelData {
    R8(Vec<u8>),
    Rgba8(Vec<[u8; 4]>),
    R32F(Vec<Float>),
    Rgba32F(Vec<Rgba>),
    Depth32F(Vec<Float>),
}

impl TexelData {
    pub fn zeroed(format: TextureFormat, len: usize) -> Self {
        match format {
            TextureFormat::R8 => TexelData::R8(vec![0; len]),
            TextureFormat::Rgba8 => TexelData::Rgba8(vec![[0; 4]; len]),
            TextureFormat::R32F => TexelData::R32F(vec![0.0; len]),
            TextureFormat::Rgba32F => TexelData::Rgba32F(vec![[0.0; 4]; len]),
            TextureFormat::Depth32F => TexelData::Depth32F(vec![1.0; len]),
        }
    }

    pub fn format(&self) -> TextureFormat {
        match self {
            TexelData::R8(_) => TextureFormat::R8,
            TexelData::Rgba8(_) => TextureFormat::Rgba8,
            TexelData::R32F(_) => TextureFormat::R32F,
            TexelData::Rgba32F(_) => TextureFormat::Rgba32F,
            TexelData::Depth32F(_) => TextureFormat::Depth32F,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TexelData::R8(v) => v.len(),
            TexelData::Rgba8(v) => v.len(),
            TexelData::R32F(v) => v.len(),
            TexelData::Rgba32F(v) => v.len(),
            TexelData::Depth32F(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads an 8-bit channel as a normalized float.
pub fn unorm8(v: u8) -> Float {
    v as Float / 255.0
}

pub fn to_unorm8(v: Float) -> u8 {
    (v.max(0.0).min(1.0) * 255.0).round() as u8
}

#[derive(Debug, Clone)]
pub struct Texture {
    pub(crate) desc: TextureDesc,
    pub(crate) data: TexelData,
}

impl Texture {
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn data(&self) -> &TexelData {
        &self.data
    }

    pub fn as_r8(&self) -> Option<&[u8]> {
        match &self.data { TexelData::R8(v) => Some(v), _ => None }
    }

    pub fn as_rgba8(&self) -> Option<&[[u8; 4]]> {
        match &self.data { TexelData::Rgba8(v) => Some(v), _ => None }
    }

    pub fn as_r32f(&self) -> Option<&[Float]> {
        match &self.data { TexelData::R32F(v) => Some(v), _ => None }
    }

    pub fn as_rgba32f(&self) -> Option<&[Rgba]> {
        match &self.data { TexelData::Rgba32F(v) => Some(v), _ => None }
    }

    pub fn as_depth(&self) -> Option<&[Float]> {
        match &self.data { TexelData::Depth32F(v) => Some(v), _ => None }
    }

    /// Texel `i` as RGBA floats regardless of storage format.
    pub fn rgba(&self, i: usize) -> Rgba {
        match &self.data {
            TexelData::R8(v) => { let c = unorm8(v[i]); [c, c, c, 1.0] }
            TexelData::Rgba8(v) => { let c = v[i]; [unorm8(c[0]), unorm8(c[1]), unorm8(c[2]), unorm8(c[3])] }
            TexelData::R32F(v) | TexelData::Depth32F(v) => [v[i], v[i], v[i], 1.0],
            TexelData::Rgba32F(v) => v[i],
        }
    }
}

/// Off-screen color and depth attachments. Row 0 is the bottom of the image.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    pub(crate) width: usize,
    pub(crate) height: usize,
    pub(crate) color: Vec<Rgba>,
    pub(crate) depth: Vec<Float>,
}

impl Framebuffer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            color: vec![[0.0; 4]; width * height],
            depth: vec![1.0; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn color(&self) -> &[Rgba] {
        &self.color
    }

    pub fn depth(&self) -> &[Float] {
        &self.depth
    }

    pub fn byte_size(&self) -> usize {
        self.width * self.height * (TextureFormat::Rgba32F.bytes_per_texel() + TextureFormat::Depth32F.bytes_per_texel())
    }
}

/// The bound draw target for one engine draw call.
pub struct RenderTarget<'a> {
    width: usize,
    height: usize,
    color: &'a mut [Rgba],
    depth: &'a mut [Float],
    depth_snapshot: Option<&'a [Float]>,
}

impl<'a> RenderTarget<'a> {
    pub fn new(
        width: usize,
        height: usize,
        color: &'a mut [Rgba],
        depth: &'a mut [Float],
        depth_snapshot: Option<&'a [Float]>,
    ) -> Self {
        debug_assert_eq!(color.len(), width * height);
        debug_assert_eq!(depth.len(), width * height);
        Self { width, height, color, depth, depth_snapshot }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn depth_at(&self, x: usize, y: usize) -> Float {
        self.depth[self.index(x, y)]
    }

    pub fn color_at(&self, x: usize, y: usize) -> Rgba {
        self.color[self.index(x, y)]
    }

    /// Depth of opaque geometry captured before volume engines were drawn.
    pub fn snapshot_depth_at(&self, x: usize, y: usize) -> Option<Float> {
        self.depth_snapshot.map(|d| d[self.index(x, y)])
    }

    pub fn has_depth_snapshot(&self) -> bool {
        self.depth_snapshot.is_some()
    }

    /// Writes the fragment if it passes a LESS depth test.
    pub fn write(&mut self, x: usize, y: usize, color: Rgba, depth: Float) -> bool {
        let i = self.index(x, y);
        if depth < self.depth[i] {
            self.depth[i] = depth;
            self.color[i] = color;
            true
        } else {
            false
        }
    }
}
