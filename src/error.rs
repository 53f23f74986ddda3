use crate::gpu::shader::ShaderStage;
use thiserror::Error;

/// Failures reported by the device when creating or touching resources.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{stage} shader failed to compile:\n{log}")]
    ShaderCompile { stage: ShaderStage, log: String },

    #[error("program failed to link:\n{log}")]
    ProgramLink { log: String },

    #[error("out of device memory: requested {requested} bytes with {available} bytes available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("invalid {kind} handle")]
    InvalidHandle { kind: &'static str },

    #[error("size mismatch: expected {expected} elements, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("texture format mismatch: expected {expected}, got {actual}")]
    FormatMismatch { expected: &'static str, actual: &'static str },
}

/// Host geometry that violates its own invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ObjectError {
    #[error("connection {index} refers to node {node} but the object has {nnodes} nodes")]
    ConnectionOutOfRange { index: usize, node: u32, nnodes: usize },

    #[error("{count} connections is not a multiple of {per_cell} nodes per cell")]
    RaggedConnections { count: usize, per_cell: usize },

    #[error("{what} has {actual} entries, expected {expected}")]
    LengthMismatch { what: &'static str, expected: usize, actual: usize },

    #[error("{values} values cannot be split into steps of {nnodes} nodes")]
    BadStepCount { values: usize, nnodes: usize },

    #[error("grid resolution must be non-zero on every axis, got {0:?}")]
    EmptyGrid([usize; 3]),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("repetition level must be at least 1")]
    ZeroRepetitionLevel,

    #[error("coarse level {coarse} must be between 1 and the repetition level {repetition}")]
    CoarseLevelOutOfRange { coarse: usize, repetition: usize },

    #[error("random texture size {0} must be between 1 and 65536")]
    RandomTextureSize(usize),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{engine} engine cannot render a {found} object")]
    UnsupportedObject { engine: &'static str, found: String },

    #[error("color map resolution {color} does not match opacity map resolution {opacity}")]
    ResolutionMismatch { color: usize, opacity: usize },

    #[error("setup of the {engine} engine failed")]
    EngineSetup {
        engine: String,
        #[source]
        source: Box<RenderError>,
    },

    #[error("time step {step} out of range, object has {steps} steps")]
    StepOutOfRange { step: usize, steps: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
