//! GLSL-to-WebAssembly backend.
//!
//! Compilation is deterministic: parse, type-check, classify, emit,
//! self-check, serialize. Compiling the same source twice produces
//! bit-identical bytes. Emission at compile time uses per-unit provisional
//! location maps; the linker re-emits both stages of a program against the
//! resolved joint maps, so the two modules always agree on the shared
//! layout.

pub mod builtins;
pub mod control_flow;
pub mod emitter;
pub mod expressions;
pub mod frame_allocator;
pub mod function_abi;
pub mod memory_layout;
pub mod selfcheck;

use crate::error::CompileError;
use crate::glsl::ast::Span;
use crate::glsl::parser::parse_source;
use crate::glsl::symbols::{ShaderStage, SymbolTable};
use crate::glsl::typecheck::{self, TypedShader};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Configuration for WASM generation.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Minimum page count declared on the imported memory.
    pub memory_min_pages: u64,
    /// Capture a WAT rendering of every emitted module for debugging.
    pub capture_wat: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            memory_min_pages: 16,
            capture_wat: false,
        }
    }
}

/// One successfully compiled shader: the typed unit (retained for
/// link-time re-emission), its symbol table, and loadable bytes emitted
/// against the unit's provisional location maps.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub stage: ShaderStage,
    pub shader: TypedShader,
    pub bytes: Vec<u8>,
    pub wat: Option<String>,
}

impl CompiledModule {
    pub fn symbols(&self) -> &SymbolTable {
        &self.shader.symbols
    }

    /// Render the compiled bytes as WAT for debugging.
    pub fn wat(&self) -> Result<String, CompileError> {
        wasmprinter::print_bytes(&self.bytes)
            .map_err(|e| CompileError::Internal(format!("module failed to print: {e}")))
    }
}

/// Compile one shader source through the full pipeline.
pub fn compile(
    stage: ShaderStage,
    source: &str,
    config: &BackendConfig,
) -> Result<Arc<CompiledModule>, CompileError> {
    tracing::debug!(stage = stage.name(), source_len = source.len(), "compiling shader");

    let unit = parse_source(source)?;
    let mut shader = typecheck::check(stage, unit)?;
    function_abi::classify_symbols(&mut shader)?;

    let attributes = provisional_attribute_locations(&shader.symbols);
    let varyings = memory_layout::pack_varying_locations(&shader.symbols.varyings);
    let uniforms = memory_layout::assign_uniform_slots(&shader.symbols.uniforms)
        .map_err(|e| CompileError::type_error(e.to_string(), Span::new(1, 1)))?;

    let maps = emitter::LocationMaps {
        attributes: &attributes,
        uniforms: &uniforms,
        varyings: &varyings,
    };
    let emitted = emitter::emit_module(&shader, &maps, config)?;
    selfcheck::verify_module(&emitted, &shader.symbols)?;

    tracing::debug!(
        stage = stage.name(),
        bytes = emitted.bytes.len(),
        "shader compiled"
    );
    Ok(Arc::new(CompiledModule {
        stage,
        shader,
        bytes: emitted.bytes,
        wat: emitted.wat,
    }))
}

/// Re-emit a compiled module against linker-resolved location maps and
/// self-check the result.
pub fn reemit(
    module: &CompiledModule,
    maps: &emitter::LocationMaps<'_>,
    config: &BackendConfig,
) -> Result<Vec<u8>, CompileError> {
    let emitted = emitter::emit_module(&module.shader, maps, config)?;
    selfcheck::verify_module(&emitted, &module.shader.symbols)?;
    Ok(emitted.bytes)
}

/// Per-unit provisional attribute assignment: explicit locations win
/// (collisions are tolerated here and rejected by the linker), the rest
/// pack into unused slots in declaration order. Matrix attributes span one
/// location per column.
pub(crate) fn provisional_attribute_locations(symbols: &SymbolTable) -> BTreeMap<String, u32> {
    let mut locations = BTreeMap::new();
    let mut used = vec![false; memory_layout::MAX_ATTRIBUTE_LOCATIONS as usize * 2];
    for attr in &symbols.attributes {
        if let Some(loc) = attr.location {
            let span = memory_layout::attribute_location_span(&attr.ty);
            locations.insert(attr.name.clone(), loc);
            for s in 0..span {
                if let Some(slot) = used.get_mut((loc + s) as usize) {
                    *slot = true;
                }
            }
        }
    }
    for attr in &symbols.attributes {
        if locations.contains_key(&attr.name) {
            continue;
        }
        let span = memory_layout::attribute_location_span(&attr.ty);
        let mut candidate = 0u32;
        loop {
            let free = (0..span).all(|s| {
                used.get((candidate + s) as usize)
                    .map_or(true, |slot| !*slot)
            });
            if free {
                break;
            }
            candidate += 1;
        }
        locations.insert(attr.name.clone(), candidate);
        for s in 0..span {
            if let Some(slot) = used.get_mut((candidate + s) as usize) {
                *slot = true;
            }
        }
    }
    locations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_vs(body: &str) -> Result<Arc<CompiledModule>, CompileError> {
        compile(
            ShaderStage::Vertex,
            &format!("#version 300 es\n{body}"),
            &BackendConfig::default(),
        )
    }

    #[test]
    fn trivial_vertex_shader_compiles() {
        let module = compile_vs("void main() { gl_Position = vec4(0.0); }").unwrap();
        assert_eq!(&module.bytes[0..4], b"\0asm");
        assert_eq!(&module.bytes[4..8], &[1, 0, 0, 0]);
    }

    #[test]
    fn compilation_is_deterministic() {
        let source = "in vec4 a_pos;\nuniform mat4 u_mvp;\nout vec2 v_uv;\nvoid main() { v_uv = a_pos.xy; gl_Position = u_mvp * a_pos; }";
        let first = compile_vs(source).unwrap();
        let second = compile_vs(source).unwrap();
        assert_eq!(first.bytes, second.bytes);
    }

    #[test]
    fn parse_errors_carry_positions() {
        let err = compile_vs("void main() { gl_Position = ; }").unwrap_err();
        assert!(matches!(err, CompileError::Parse { .. }));
        assert!(err.info_log_line().starts_with("ERROR: "));
    }

    #[test]
    fn wat_capture_is_optional() {
        let config = BackendConfig {
            capture_wat: true,
            ..BackendConfig::default()
        };
        let module = compile(
            ShaderStage::Vertex,
            "#version 300 es\nvoid main() { gl_Position = vec4(0.0); }",
            &config,
        )
        .unwrap();
        let wat = module.wat.as_ref().expect("wat captured");
        assert!(wat.contains("(export \"main\""));
        assert!(wat.contains("(import \"env\" \"memory\""));
    }

    #[test]
    fn provisional_attributes_pack_around_explicit() {
        let module = compile_vs(
            "layout(location = 1) in vec4 a;\nin vec2 b;\nin mat4 m;\nvoid main() { gl_Position = a + m * vec4(b, 0.0, 1.0); }",
        )
        .unwrap();
        let locations = provisional_attribute_locations(module.symbols());
        assert_eq!(locations["a"], 1);
        assert_eq!(locations["b"], 0);
        // mat4 needs four consecutive free locations: 2..=5.
        assert_eq!(locations["m"], 2);
    }
}
