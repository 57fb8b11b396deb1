//! Compile and link operations.
//!
//! Both operations report user errors through the info-log/status channel
//! and never return `Err` to the caller. Internal invariant violations
//! panic with a diagnostic: they are compiler bugs, not user errors.

use super::Context;
use crate::glsl::symbols::ShaderStage;
use crate::linker::{link, LinkInputs};
use crate::wasm_backend::{self, CompiledModule};
use std::sync::Arc;

impl Context {
    /// Compile a shader from its current source. The sequence inside one
    /// compile is deterministic: parse, type-check, classify, emit,
    /// serialize.
    pub fn compile_shader(&mut self, shader: u32) {
        let Some(object) = self.shaders.get(&shader) else {
            return;
        };
        let stage = object.stage;
        let source = object.source.clone();

        let outcome = wasm_backend::compile(stage, &source, &self.config);

        let object = self.shaders.get_mut(&shader).expect("checked above");
        object.compiled = false;
        object.module = None;
        object.info_log.clear();
        match outcome {
            Ok(module) => {
                object.compiled = true;
                object.module = Some(module);
            }
            Err(err) if err.is_internal() => panic!("{err}"),
            Err(err) => {
                object.info_log.push_str(&err.info_log_line());
                object.info_log.push('\n');
            }
        }
    }

    /// Link the attached vertex/fragment pair. The sequence is
    /// deterministic: validate, resolve attributes, match varyings, build
    /// uniforms, finalize.
    pub fn link_program(&mut self, program: u32) {
        let Some(object) = self.programs.get(&program) else {
            return;
        };

        // Resolve each attachment to a compiled module: the live shader
        // if it still exists, else the snapshot taken at deletion.
        let mut vs_module: Option<Arc<CompiledModule>> = None;
        let mut fs_module: Option<Arc<CompiledModule>> = None;
        let mut failure: Option<String> = None;
        for attachment in &object.attached {
            let module = match self.shaders.get(&attachment.handle) {
                Some(shader) if shader.compiled => shader.module.clone(),
                Some(_) => {
                    failure = Some(format!(
                        "ERROR: attached {} shader is not compiled",
                        attachment.stage.name()
                    ));
                    break;
                }
                None => attachment.snapshot.clone(),
            };
            let slot = match attachment.stage {
                ShaderStage::Vertex => &mut vs_module,
                ShaderStage::Fragment => &mut fs_module,
            };
            match module {
                Some(module) => *slot = Some(module),
                None => {
                    failure = Some(format!(
                        "ERROR: attached {} shader has no compiled module",
                        attachment.stage.name()
                    ));
                    break;
                }
            }
        }

        let bindings = object.attribute_bindings.clone();
        let object = self.programs.get_mut(&program).expect("checked above");
        object.linked = false;
        object.linked_program = None;

        if let Some(message) = failure {
            object.info_log = message;
            return;
        }
        let (Some(vs), Some(fs)) = (vs_module, fs_module) else {
            object.info_log = "ERROR: program must have both vertex and fragment shaders".to_string();
            return;
        };

        match link(
            &LinkInputs {
                vertex: &vs,
                fragment: &fs,
                attribute_bindings: &bindings,
            },
            &self.config,
        ) {
            Ok(linked) => {
                object.vs_module = Some(vs);
                object.fs_module = Some(fs);
                object.linked_program = Some(linked);
                object.linked = true;
                object.info_log = "Program linked successfully.".to_string();
            }
            Err(err) => {
                object.info_log = err.info_log_line();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::types::*;

    const VS: &str = "#version 300 es\nvoid main() { gl_Position = vec4(0.0); }";
    const FS: &str =
        "#version 300 es\nprecision mediump float;\nout vec4 c;\nvoid main() { c = vec4(1.0); }";

    fn compiled_shader(ctx: &mut Context, type_: u32, source: &str) -> u32 {
        let shader = ctx.create_shader(type_);
        ctx.shader_source(shader, source);
        ctx.compile_shader(shader);
        shader
    }

    fn linked_program(ctx: &mut Context) -> u32 {
        let vs = compiled_shader(ctx, GL_VERTEX_SHADER, VS);
        let fs = compiled_shader(ctx, GL_FRAGMENT_SHADER, FS);
        let program = ctx.create_program();
        ctx.attach_shader(program, vs);
        ctx.attach_shader(program, fs);
        ctx.link_program(program);
        program
    }

    #[test]
    fn compile_sets_status_and_keeps_log_clean() {
        let mut ctx = Context::new();
        let shader = compiled_shader(&mut ctx, GL_VERTEX_SHADER, VS);
        assert_eq!(ctx.get_shader_parameter(shader, GL_COMPILE_STATUS), 1);
        assert!(!ctx.get_shader_info_log(shader).contains("ERROR:"));
    }

    #[test]
    fn failed_compile_has_nonempty_log() {
        let mut ctx = Context::new();
        let shader = compiled_shader(&mut ctx, GL_VERTEX_SHADER, "void main() {}");
        assert_eq!(ctx.get_shader_parameter(shader, GL_COMPILE_STATUS), 0);
        let log = ctx.get_shader_info_log(shader);
        assert!(log.starts_with("ERROR:"));
        assert!(log.contains("#version 300 es"));
    }

    #[test]
    fn recompile_clears_previous_state(){
        let mut ctx = Context::new();
        let shader = compiled_shader(&mut ctx, GL_VERTEX_SHADER, "nonsense");
        assert_eq!(ctx.get_shader_parameter(shader, GL_COMPILE_STATUS), 0);
        ctx.shader_source(shader, VS);
        ctx.compile_shader(shader);
        assert_eq!(ctx.get_shader_parameter(shader, GL_COMPILE_STATUS), 1);
        assert!(ctx.get_shader_info_log(shader).is_empty());
    }

    #[test]
    fn link_produces_program_bytes_and_tables() {
        let mut ctx = Context::new();
        let program = linked_program(&mut ctx);
        assert_eq!(ctx.get_program_parameter(program, GL_LINK_STATUS), 1);
        let bytes = ctx.program_wasm(program, GL_VERTEX_SHADER).unwrap();
        assert_eq!(&bytes[0..4], b"\0asm");
        assert!(ctx.program_link_tables(program).is_some());
    }

    #[test]
    fn deleting_shader_after_attach_keeps_bytes_alive() {
        let mut ctx = Context::new();
        let vs = compiled_shader(&mut ctx, GL_VERTEX_SHADER, VS);
        let fs = compiled_shader(&mut ctx, GL_FRAGMENT_SHADER, FS);
        let program = ctx.create_program();
        ctx.attach_shader(program, vs);
        ctx.attach_shader(program, fs);
        ctx.delete_shader(vs);
        ctx.delete_shader(fs);
        ctx.link_program(program);
        assert_eq!(ctx.get_program_parameter(program, GL_LINK_STATUS), 1);
        assert!(ctx.program_wasm(program, GL_FRAGMENT_SHADER).is_some());
    }

    #[test]
    fn linking_without_fragment_shader_fails() {
        let mut ctx = Context::new();
        let vs = compiled_shader(&mut ctx, GL_VERTEX_SHADER, VS);
        let program = ctx.create_program();
        ctx.attach_shader(program, vs);
        ctx.link_program(program);
        assert_eq!(ctx.get_program_parameter(program, GL_LINK_STATUS), 0);
        assert!(ctx
            .get_program_info_log(program)
            .contains("both vertex and fragment"));
    }

    #[test]
    fn linking_uncompiled_shader_fails() {
        let mut ctx = Context::new();
        let vs = ctx.create_shader(GL_VERTEX_SHADER);
        ctx.shader_source(vs, VS);
        let fs = compiled_shader(&mut ctx, GL_FRAGMENT_SHADER, FS);
        let program = ctx.create_program();
        ctx.attach_shader(program, vs);
        ctx.attach_shader(program, fs);
        ctx.link_program(program);
        assert_eq!(ctx.get_program_parameter(program, GL_LINK_STATUS), 0);
        assert!(ctx.get_program_info_log(program).contains("not compiled"));
    }

    #[test]
    fn attach_after_successful_link_is_a_no_op() {
        let mut ctx = Context::new();
        let program = linked_program(&mut ctx);
        let extra = compiled_shader(&mut ctx, GL_VERTEX_SHADER, VS);
        assert!(ctx.attach_shader(program, extra));
        assert_eq!(ctx.get_program_parameter(program, GL_ATTACHED_SHADERS), 2);
    }

    #[test]
    fn locations_are_queryable_after_link() {
        let mut ctx = Context::new();
        let vs = compiled_shader(
            &mut ctx,
            GL_VERTEX_SHADER,
            "#version 300 es\nin vec4 a_pos;\nuniform mat4 u_mvp;\nvoid main() { gl_Position = u_mvp * a_pos; }",
        );
        let fs = compiled_shader(&mut ctx, GL_FRAGMENT_SHADER, FS);
        let program = ctx.create_program();
        ctx.attach_shader(program, vs);
        ctx.attach_shader(program, fs);
        ctx.link_program(program);
        assert_eq!(ctx.get_attrib_location(program, "a_pos"), 0);
        assert_eq!(ctx.get_attrib_location(program, "missing"), -1);
        assert_eq!(ctx.get_uniform_location(program, "u_mvp"), Some(0));
        assert_eq!(ctx.get_uniform_location(program, "missing"), None);
    }

    #[test]
    fn invalid_shader_type_returns_null_handle() {
        let mut ctx = Context::new();
        assert_eq!(ctx.create_shader(0x1234), 0);
    }
}
