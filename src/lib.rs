#[macro_use] pub mod macros; // must stay at the top
pub mod math;
pub mod id_arena;
pub mod error;
pub mod object;
pub mod transfer_function;
pub mod preintegration;
pub mod random_texture;
pub mod ensemble;
pub mod camera;
pub mod shading;
pub mod gpu;
pub mod engine;
pub mod config;
pub mod renderer;
pub mod imageio;

pub use error::{RenderError, DeviceError, ObjectError, ConfigError};
pub use renderer::{StochasticRenderer, FrameStats};
pub use config::RendererConfig;

use cgmath::{Matrix4, Point3, Vector3, Vector4};

pub type Float = f32;

pub type Point3f = Point3<Float>;
pub type Vec3f = Vector3<Float>;
pub type Vec4f = Vector4<Float>;
pub type Matrix4f = Matrix4<Float>;

/// Linear RGBA color, each channel nominally in [0, 1].
pub type Rgba = [Float; 4];
pub type Rgb = [Float; 3];

pub type Result<T, E = RenderError> = std::result::Result<T, E>;
