//! The shader/program facade.
//!
//! Handle-based surface the host drives: create and compile shaders,
//! attach them to programs, link, and query the results. All operations
//! are synchronous; user errors land in the owning object's info log and
//! status flag, never in a panic.

pub mod shaders;
pub mod types;

use crate::glsl::symbols::ShaderStage;
use crate::linker::LinkTables;
use crate::wasm_backend::{BackendConfig, CompiledModule};
use std::collections::HashMap;
use std::sync::Arc;
use types::*;

/// A shader compilation context: owns every shader and program handle.
/// Single-threaded; the host serializes access.
#[derive(Debug, Default)]
pub struct Context {
    pub(crate) shaders: HashMap<u32, Shader>,
    pub(crate) programs: HashMap<u32, Program>,
    next_shader: u32,
    next_program: u32,
    pub(crate) config: BackendConfig,
}

impl Context {
    pub fn new() -> Self {
        Self::with_config(BackendConfig::default())
    }

    pub fn with_config(config: BackendConfig) -> Self {
        Self {
            shaders: HashMap::new(),
            programs: HashMap::new(),
            next_shader: 0,
            next_program: 0,
            config,
        }
    }

    // ----- shader lifecycle -----------------------------------------------

    /// Create a shader of the given GL type. Returns 0 for an invalid
    /// type enum.
    pub fn create_shader(&mut self, type_: u32) -> u32 {
        let Some(stage) = stage_from_enum(type_) else {
            return 0;
        };
        self.next_shader += 1;
        let handle = self.next_shader;
        self.shaders.insert(handle, Shader::new(stage));
        handle
    }

    /// Delete a shader. If it is still attached to a program, the program
    /// keeps a snapshot of the compiled module so the bytes stay alive.
    pub fn delete_shader(&mut self, shader: u32) {
        let Some(object) = self.shaders.remove(&shader) else {
            return;
        };
        for program in self.programs.values_mut() {
            for attachment in &mut program.attached {
                if attachment.handle == shader && attachment.snapshot.is_none() {
                    attachment.snapshot = object.module.clone();
                }
            }
        }
    }

    /// Replace a shader's source. Does not recompile.
    pub fn shader_source(&mut self, shader: u32, source: &str) -> bool {
        match self.shaders.get_mut(&shader) {
            Some(object) => {
                object.source = source.to_string();
                true
            }
            None => false,
        }
    }

    pub fn get_shader_parameter(&self, shader: u32, pname: u32) -> i32 {
        let Some(object) = self.shaders.get(&shader) else {
            return 0;
        };
        match pname {
            GL_SHADER_TYPE => enum_from_stage(object.stage) as i32,
            GL_COMPILE_STATUS => i32::from(object.compiled),
            GL_INFO_LOG_LENGTH => object.info_log.len() as i32,
            GL_DELETE_STATUS => 0,
            _ => 0,
        }
    }

    pub fn get_shader_info_log(&self, shader: u32) -> String {
        self.shaders
            .get(&shader)
            .map(|s| s.info_log.clone())
            .unwrap_or_default()
    }

    /// The compiled module of a shader, if compilation succeeded.
    pub fn shader_module(&self, shader: u32) -> Option<&Arc<CompiledModule>> {
        self.shaders.get(&shader).and_then(|s| s.module.as_ref())
    }

    // ----- program lifecycle ----------------------------------------------

    pub fn create_program(&mut self) -> u32 {
        self.next_program += 1;
        let handle = self.next_program;
        self.programs.insert(handle, Program::default());
        handle
    }

    pub fn delete_program(&mut self, program: u32) {
        self.programs.remove(&program);
    }

    /// Attach a shader. A successful link is terminal: attaches onto a
    /// linked program are no-ops until the next link resets it.
    pub fn attach_shader(&mut self, program: u32, shader: u32) -> bool {
        let Some(stage) = self.shaders.get(&shader).map(|s| s.stage) else {
            return false;
        };
        let Some(object) = self.programs.get_mut(&program) else {
            return false;
        };
        if object.linked {
            return true;
        }
        if object.attached.iter().any(|a| a.stage == stage) {
            return false;
        }
        object.attached.push(Attachment {
            handle: shader,
            stage,
            snapshot: None,
        });
        true
    }

    pub fn get_program_parameter(&self, program: u32, pname: u32) -> i32 {
        let Some(object) = self.programs.get(&program) else {
            return 0;
        };
        match pname {
            GL_LINK_STATUS => i32::from(object.linked),
            GL_ATTACHED_SHADERS => object.attached.len() as i32,
            GL_INFO_LOG_LENGTH => object.info_log.len() as i32,
            GL_DELETE_STATUS => 0,
            _ => 0,
        }
    }

    pub fn get_program_info_log(&self, program: u32) -> String {
        self.programs
            .get(&program)
            .map(|p| p.info_log.clone())
            .unwrap_or_default()
    }

    /// Record a pre-link attribute location hint.
    pub fn bind_attrib_location(&mut self, program: u32, index: u32, name: &str) {
        if let Some(object) = self.programs.get_mut(&program) {
            object
                .attribute_bindings
                .insert(name.to_string(), index);
        }
    }

    /// Resolved attribute location, or -1 when unknown or unlinked.
    pub fn get_attrib_location(&self, program: u32, name: &str) -> i32 {
        self.programs
            .get(&program)
            .filter(|p| p.linked)
            .and_then(|p| p.linked_program.as_ref())
            .and_then(|l| l.tables.attribute_location(name))
            .map_or(-1, |loc| loc as i32)
    }

    /// Resolved uniform location, or `None` when unknown or unlinked.
    pub fn get_uniform_location(&self, program: u32, name: &str) -> Option<u32> {
        self.programs
            .get(&program)
            .filter(|p| p.linked)
            .and_then(|p| p.linked_program.as_ref())
            .and_then(|l| l.tables.uniform_location(name))
    }

    /// Final WASM bytes for one stage of a linked program.
    pub fn program_wasm(&self, program: u32, type_: u32) -> Option<&[u8]> {
        let object = self.programs.get(&program)?;
        let linked = object.linked_program.as_ref()?;
        match stage_from_enum(type_)? {
            ShaderStage::Vertex => Some(&linked.vertex_bytes),
            ShaderStage::Fragment => Some(&linked.fragment_bytes),
        }
    }

    /// Layout tables of a linked program.
    pub fn program_link_tables(&self, program: u32) -> Option<&LinkTables> {
        self.programs
            .get(&program)
            .filter(|p| p.linked)
            .and_then(|p| p.linked_program.as_ref())
            .map(|l| &l.tables)
    }
}
