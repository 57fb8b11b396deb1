//! Shader and program object state plus the GL enums the facade accepts.

use crate::glsl::symbols::ShaderStage;
use crate::linker::LinkedProgram;
use crate::wasm_backend::CompiledModule;
use std::collections::HashMap;
use std::sync::Arc;

pub const GL_FRAGMENT_SHADER: u32 = 0x8B30;
pub const GL_VERTEX_SHADER: u32 = 0x8B31;

pub const GL_SHADER_TYPE: u32 = 0x8B4F;
pub const GL_DELETE_STATUS: u32 = 0x8B80;
pub const GL_COMPILE_STATUS: u32 = 0x8B81;
pub const GL_LINK_STATUS: u32 = 0x8B82;
pub const GL_INFO_LOG_LENGTH: u32 = 0x8B84;
pub const GL_ATTACHED_SHADERS: u32 = 0x8B85;

/// Map a GL shader-type enum onto a stage.
pub fn stage_from_enum(type_: u32) -> Option<ShaderStage> {
    match type_ {
        GL_VERTEX_SHADER => Some(ShaderStage::Vertex),
        GL_FRAGMENT_SHADER => Some(ShaderStage::Fragment),
        _ => None,
    }
}

pub fn enum_from_stage(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => GL_VERTEX_SHADER,
        ShaderStage::Fragment => GL_FRAGMENT_SHADER,
    }
}

/// One shader object: source, compile status, info log, and the compiled
/// module once compilation succeeds.
#[derive(Debug, Clone)]
pub struct Shader {
    pub stage: ShaderStage,
    pub source: String,
    pub compiled: bool,
    pub info_log: String,
    pub module: Option<Arc<CompiledModule>>,
}

impl Shader {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            source: String::new(),
            compiled: false,
            info_log: String::new(),
            module: None,
        }
    }
}

/// A shader attached to a program. Deleting the shader snapshots its
/// compiled module here, so the bytes survive until the program lets go.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub handle: u32,
    pub stage: ShaderStage,
    pub snapshot: Option<Arc<CompiledModule>>,
}

/// One program object.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub attached: Vec<Attachment>,
    pub linked: bool,
    pub info_log: String,
    /// Pre-link `bindAttribLocation` hints.
    pub attribute_bindings: HashMap<String, u32>,
    pub vs_module: Option<Arc<CompiledModule>>,
    pub fs_module: Option<Arc<CompiledModule>>,
    pub linked_program: Option<LinkedProgram>,
}
