use crate::error::DeviceError;
use bitflags::bitflags;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Fragment => "fragment",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Optional shader paths, each enabled by a preprocessor define.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderFeatures: u8 {
        const LAMBERT_SHADING = 1 << 0;
        const PHONG_SHADING = 1 << 1;
        const BLINN_PHONG_SHADING = 1 << 2;
        const TWO_SIDE_LIGHTING = 1 << 3;
        const EXACT_DEPTH_TESTING = 1 << 4;
    }
}

impl ShaderFeatures {
    pub fn define_names(self) -> Vec<&'static str> {
        let names = [
            (ShaderFeatures::LAMBERT_SHADING, "ENABLE_LAMBERT_SHADING"),
            (ShaderFeatures::PHONG_SHADING, "ENABLE_PHONG_SHADING"),
            (ShaderFeatures::BLINN_PHONG_SHADING, "ENABLE_BLINN_PHONG_SHADING"),
            (ShaderFeatures::TWO_SIDE_LIGHTING, "ENABLE_TWO_SIDE_LIGHTING"),
            (ShaderFeatures::EXACT_DEPTH_TESTING, "ENABLE_EXACT_DEPTH_TESTING"),
        ];
        names.iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Shader text for one stage. The code is opaque apart from `#define` injection.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderSource {
    stage: ShaderStage,
    code: String,
}

impl ShaderSource {
    pub fn new(stage: ShaderStage, code: impl Into<String>) -> Self {
        Self { stage, code: code.into() }
    }

    pub fn from_file(stage: ShaderStage, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let code = std::fs::read_to_string(path)?;
        Ok(Self::new(stage, code))
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Inserts `#define name` right after the `#version` line, or at the top
    /// when there is none.
    pub fn define(&mut self, name: &str) {
        let line = format!("#define {}\n", name);
        let version_end = self.code.find("#version").map(|start| {
            self.code[start..].find('\n').map(|nl| start + nl + 1).unwrap_or(self.code.len())
        });
        match version_end {
            Some(at) => {
                if at == self.code.len() && !self.code.ends_with('\n') {
                    self.code.push('\n');
                    self.code.push_str(&line);
                } else {
                    self.code.insert_str(at, &line);
                }
            }
            None => self.code.insert_str(0, &line),
        }
    }

    pub fn define_features(&mut self, features: ShaderFeatures) {
        for name in features.define_names() {
            self.define(name);
        }
    }
}

/// A linked program as the device keeps it.
#[derive(Debug, Clone)]
pub struct ProgramObject {
    stages: Vec<ShaderStage>,
    defines: Vec<String>,
    log: String,
}

impl ProgramObject {
    pub fn stages(&self) -> &[ShaderStage] {
        &self.stages
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.iter().any(|d| d == name)
    }

    pub fn log(&self) -> &str {
        &self.log
    }
}

fn directive<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.trim_start().strip_prefix('#')?.trim_start();
    let rest = rest.strip_prefix(name)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Preprocessor-level validation standing in for a driver compile.
fn compile(source: &ShaderSource) -> Result<Vec<String>, DeviceError> {
    let fail = |log: String| DeviceError::ShaderCompile { stage: source.stage, log };
    if source.code.trim().is_empty() {
        return Err(fail("ERROR: 0:0: empty shader source".to_string()));
    }

    let mut depth = 0i32;
    let mut defines = Vec::new();
    for (n, line) in source.code.lines().enumerate() {
        if ["if", "ifdef", "ifndef"].iter().any(|d| directive(line, d).is_some()) {
            depth += 1;
        } else if directive(line, "endif").is_some() {
            depth -= 1;
            if depth < 0 {
                return Err(fail(format!("ERROR: 0:{}: #endif without #if", n + 1)));
            }
        } else if let Some(name) = directive(line, "define") {
            if let Some(name) = name.split_whitespace().next() {
                defines.push(name.to_string());
            }
        }
    }
    if depth != 0 {
        return Err(fail(format!("ERROR: 0:{}: unterminated #if", source.code.lines().count())));
    }
    if !source.code.contains("void main") {
        return Err(fail("ERROR: 0:0: missing entry point 'main'".to_string()));
    }
    Ok(defines)
}

pub(crate) fn link(sources: &[ShaderSource]) -> Result<ProgramObject, DeviceError> {
    let mut defines = Vec::new();
    let mut log = String::new();
    for source in sources {
        let mut d = compile(source)?;
        log.push_str(&format!("{} shader compiled, {} defines\n", source.stage, d.len()));
        defines.append(&mut d);
    }

    let stages: Vec<ShaderStage> = sources.iter().map(|s| s.stage).collect();
    for required in [ShaderStage::Vertex, ShaderStage::Fragment] {
        if !stages.contains(&required) {
            return Err(DeviceError::ProgramLink {
                log: format!("{}ERROR: no {} shader attached", log, required),
            });
        }
    }
    defines.sort();
    defines.dedup();
    Ok(ProgramObject { stages, defines, log })
}
