//! WebAssembly module emission.
//!
//! Walks the typed AST and produces the module sections: type, import
//! (shared memory and math builtins), global (the six region pointers),
//! function, export (`main`), and code. Two entry functions are emitted per
//! shader: the user's `main` with the internal calling convention, and an
//! exported wrapper `main` that seeds the globals from its six i32
//! arguments and dispatches.

use crate::error::CompileError;
use crate::glsl::ast::{Decl, FunctionDecl, Span};
use crate::glsl::symbols::ShaderStage;
use crate::glsl::typecheck::TypedShader;
use crate::glsl::types::GlslType;
use crate::wasm_backend::builtins::{MATH_IMPORTS, TEXTURE_SAMPLE_IMPORT};
use crate::wasm_backend::frame_allocator::{emit_frame_alloc, push_store, Insns};
use crate::wasm_backend::function_abi::{FunctionAbi, ParameterAbi};
use crate::wasm_backend::memory_layout::{self, RegionLayout};
use crate::wasm_backend::BackendConfig;
use std::collections::{BTreeMap, HashMap};
use wasm_encoder::{
    CodeSection, ConstExpr, EntityType, ExportKind, ExportSection, Function, FunctionSection,
    GlobalSection, GlobalType, ImportSection, Instruction, MemoryType, Module, TypeSection,
    ValType,
};

/// Resolved location maps the module is emitted against. At compile time
/// these are the per-unit provisional assignments; at link time the linker
/// passes the joint resolution.
#[derive(Debug, Clone, Copy)]
pub struct LocationMaps<'a> {
    pub attributes: &'a BTreeMap<String, u32>,
    pub uniforms: &'a BTreeMap<String, u32>,
    pub varyings: &'a BTreeMap<String, u32>,
}

/// The finished module plus the bookkeeping the self-check and linker use.
#[derive(Debug, Clone)]
pub struct EmittedModule {
    pub bytes: Vec<u8>,
    pub wat: Option<String>,
    /// User function name -> WASM function index; the user main is under
    /// `"main"`. The exported wrapper is the highest index.
    pub function_indices: BTreeMap<String, u32>,
    pub import_function_count: u32,
}

/// Emit one compiled shader against the given location maps.
pub fn emit_module(
    shader: &TypedShader,
    maps: &LocationMaps<'_>,
    config: &BackendConfig,
) -> Result<EmittedModule, CompileError> {
    ModuleEmitter::new(shader, maps, config)?.emit()
}

struct ModuleEmitter<'a> {
    shader: &'a TypedShader,
    maps: &'a LocationMaps<'a>,
    config: &'a BackendConfig,

    types: TypeSection,
    type_keys: Vec<(Vec<ValType>, Vec<ValType>)>,
    imports: ImportSection,
    functions: FunctionSection,
    globals: GlobalSection,
    exports: ExportSection,
    code: CodeSection,

    import_function_count: u32,
    texture_sample_idx: Option<u32>,
    function_indices: BTreeMap<String, u32>,
    /// Private-region offsets of module-scope plain variables.
    global_var_offsets: BTreeMap<String, u32>,
}

impl<'a> ModuleEmitter<'a> {
    fn new(
        shader: &'a TypedShader,
        maps: &'a LocationMaps<'a>,
        config: &'a BackendConfig,
    ) -> Result<Self, CompileError> {
        let mut emitter = Self {
            shader,
            maps,
            config,
            types: TypeSection::new(),
            type_keys: Vec::new(),
            imports: ImportSection::new(),
            functions: FunctionSection::new(),
            globals: GlobalSection::new(),
            exports: ExportSection::new(),
            code: CodeSection::new(),
            import_function_count: 0,
            texture_sample_idx: None,
            function_indices: BTreeMap::new(),
            global_var_offsets: BTreeMap::new(),
        };
        emitter.plan_private_globals()?;
        Ok(emitter)
    }

    /// Deduplicating type interner; indices follow insertion order so
    /// emission stays deterministic.
    fn type_index(&mut self, params: Vec<ValType>, results: Vec<ValType>) -> u32 {
        if let Some(found) = self
            .type_keys
            .iter()
            .position(|(p, r)| *p == params && *r == results)
        {
            return found as u32;
        }
        self.types.ty().function(params.clone(), results.clone());
        self.type_keys.push((params, results));
        (self.type_keys.len() - 1) as u32
    }

    /// Assign private-region offsets to module-scope plain variables,
    /// packed after the reserved fragment-output slots.
    fn plan_private_globals(&mut self) -> Result<(), CompileError> {
        let mut offset = memory_layout::PRIVATE_GLOBALS_BASE;
        for decl in &self.shader.unit.decls {
            let Decl::Global(global) = decl else { continue };
            if global.qualifiers.storage.is_some() {
                continue;
            }
            let ty = self.resolve_global_type(global)?;
            let size = ty.byte_size();
            offset = (offset + 15) & !15;
            self.global_var_offsets
                .insert(global.name.clone(), offset - memory_layout::PRIVATE_GLOBALS_BASE);
            offset += size;
        }
        let used = offset - memory_layout::PRIVATE_GLOBALS_BASE;
        if used > memory_layout::MAX_PRIVATE_GLOBALS_BYTES {
            return Err(CompileError::unsupported(
                format!(
                    "module-scope variables use {used} bytes, exceeding the {} byte private region",
                    memory_layout::MAX_PRIVATE_GLOBALS_BYTES
                ),
                Span::new(1, 1),
            ));
        }
        Ok(())
    }

    fn resolve_global_type(
        &self,
        global: &crate::glsl::ast::GlobalDecl,
    ) -> Result<GlslType, CompileError> {
        use crate::glsl::ast::TypeSpec;
        let base = match &global.ty {
            TypeSpec::Builtin(ty) => ty.clone(),
            TypeSpec::Named(name) => GlslType::Struct(
                self.shader
                    .structs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CompileError::Internal(format!("unresolved struct '{name}'")))?,
            ),
        };
        Ok(match global.array_size {
            Some(count) => GlslType::Array(Box::new(base), count),
            None => base,
        })
    }

    fn emit(mut self) -> Result<EmittedModule, CompileError> {
        self.emit_imports();
        self.emit_globals();

        // Function index plan: imports, user functions in declaration
        // order, the user main, then the exported wrapper.
        let mut next = self.import_function_count;
        let mut user_functions: Vec<&FunctionDecl> = Vec::new();
        let mut main_decl: Option<&FunctionDecl> = None;
        for decl in &self.shader.unit.decls {
            let Decl::Function(func) = decl else { continue };
            if func.name == "main" {
                main_decl = Some(func);
            } else {
                self.function_indices.insert(func.name.clone(), next);
                user_functions.push(func);
                next += 1;
            }
        }
        let main_decl =
            main_decl.ok_or_else(|| CompileError::Internal("main() missing after checking".into()))?;
        let user_main_idx = next;
        self.function_indices.insert("main".to_string(), user_main_idx);
        let wrapper_idx = user_main_idx + 1;

        for func in user_functions {
            let abi = self
                .shader
                .symbols
                .function(&func.name)
                .and_then(|f| f.abi.clone())
                .ok_or_else(|| {
                    CompileError::Internal(format!("function '{}' was not classified", func.name))
                })?;
            self.emit_function(func, abi, false)?;
        }
        let main_abi = FunctionAbi {
            params: Vec::new(),
            result: None,
            uses_frame: false,
            call_frame_size: 0,
        };
        self.emit_function(main_decl, main_abi, true)?;
        self.emit_wrapper(user_main_idx);
        self.exports.export("main", ExportKind::Func, wrapper_idx);

        // Sections in canonical id order: Type(1), Import(2), Function(3),
        // Global(6), Export(7), Code(10).
        let mut module = Module::new();
        module.section(&self.types);
        module.section(&self.imports);
        module.section(&self.functions);
        module.section(&self.globals);
        module.section(&self.exports);
        module.section(&self.code);
        let bytes = module.finish();

        let wat = if self.config.capture_wat {
            Some(wasmprinter::print_bytes(&bytes).map_err(|e| {
                CompileError::Internal(format!("emitted module failed to print: {e}"))
            })?)
        } else {
            None
        };

        tracing::debug!(
            stage = self.shader.stage.name(),
            bytes = bytes.len(),
            functions = self.function_indices.len() + 1,
            "emitted shader module"
        );

        Ok(EmittedModule {
            bytes,
            wat,
            function_indices: self.function_indices,
            import_function_count: self.import_function_count,
        })
    }

    fn emit_imports(&mut self) {
        self.imports.import(
            "env",
            "memory",
            MemoryType {
                minimum: self.config.memory_min_pages,
                maximum: None,
                memory64: false,
                shared: false,
                page_size_log2: None,
            },
        );

        let unary = self.type_index(vec![ValType::F32], vec![ValType::F32]);
        let binary = self.type_index(vec![ValType::F32; 2], vec![ValType::F32]);
        for (name, arity) in MATH_IMPORTS {
            let type_idx = if *arity == 1 { unary } else { binary };
            self.imports
                .import("env", name, EntityType::Function(type_idx));
            self.import_function_count += 1;
        }

        if self.shader.symbols.references_samplers() {
            let sample_ty = self.type_index(
                vec![ValType::I32, ValType::F32, ValType::F32, ValType::F32],
                vec![ValType::F32; 4],
            );
            self.imports
                .import("env", TEXTURE_SAMPLE_IMPORT, EntityType::Function(sample_ty));
            self.texture_sample_idx = Some(self.import_function_count);
            self.import_function_count += 1;
        }
    }

    /// The six mutable i32 pointer globals, all initialized to zero and
    /// seeded by the wrapper.
    fn emit_globals(&mut self) {
        for _ in 0..6 {
            self.globals.global(
                GlobalType {
                    val_type: ValType::I32,
                    mutable: true,
                    shared: false,
                },
                &ConstExpr::i32_const(0),
            );
        }
    }

    fn emit_function(
        &mut self,
        func: &FunctionDecl,
        abi: FunctionAbi,
        is_user_main: bool,
    ) -> Result<(), CompileError> {
        let type_idx = self.type_index(abi.param_valtypes(), abi.result_valtypes());
        self.functions.function(type_idx);

        let emitter = FunctionEmitter::new(
            self.shader,
            self.maps,
            &self.function_indices,
            self.texture_sample_idx,
            &self.global_var_offsets,
            func,
            abi,
            is_user_main,
        )?;
        let (locals, insns) = emitter.emit_body()?;

        let mut wasm_func = Function::new_with_locals_types(locals);
        for insn in &insns {
            wasm_func.instruction(insn);
        }
        wasm_func.instruction(&Instruction::End);
        self.code.function(&wasm_func);
        Ok(())
    }

    /// The exported entry: store the six pointer arguments into the
    /// globals, then run the user main.
    fn emit_wrapper(&mut self, user_main_idx: u32) {
        let type_idx = self.type_index(vec![ValType::I32; 6], Vec::new());
        self.functions.function(type_idx);

        let mut wasm_func = Function::new_with_locals_types(Vec::new());
        for i in 0..6u32 {
            wasm_func.instruction(&Instruction::LocalGet(i));
            wasm_func.instruction(&Instruction::GlobalSet(i));
        }
        wasm_func.instruction(&Instruction::Call(user_main_idx));
        wasm_func.instruction(&Instruction::End);
        self.code.function(&wasm_func);
    }
}

// ---------------------------------------------------------------------------
// Function-level emission state
// ---------------------------------------------------------------------------

/// Where a resolvable variable lives.
#[derive(Debug, Clone)]
pub(crate) enum VarStorage {
    /// Flattened into WASM locals starting at `base`.
    Locals { base: u32 },
    /// In this function's frame allocation, addressed off the frame base
    /// local.
    Frame { offset: u32 },
    /// A framed parameter: the i32 local holds a pointer into the caller's
    /// frame.
    FramePtr { ptr_local: u32 },
    /// In one of the shared memory regions, addressed off a pointer
    /// global. `matrix_col_stride` is the byte distance between matrix
    /// columns (64 for attribute matrices, packed otherwise).
    Region {
        global: u32,
        offset: u32,
        matrix_col_stride: u32,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct VarInfo {
    pub ty: GlslType,
    pub storage: VarStorage,
}

/// An evaluated value: components flattened into locals `base..base+n`.
#[derive(Debug, Clone)]
pub(crate) struct Value {
    pub ty: GlslType,
    pub base: u32,
}

/// Base of a memory address: a local holding a pointer, or a region
/// pointer global.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AddrBase {
    Local(u32),
    Global(u32),
}

/// A resolved storage location.
#[derive(Debug, Clone)]
pub(crate) struct Place {
    pub ty: GlslType,
    pub kind: PlaceKind,
    /// Component remap for swizzled vector places.
    pub swizzle: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub(crate) enum PlaceKind {
    /// Contiguous locals starting at `base`.
    Locals { base: u32 },
    /// Vector in locals indexed by a runtime value.
    LocalsDyn {
        base: u32,
        count: u8,
        index_local: u32,
    },
    /// Linear memory; component k of a matrix sits at
    /// `(k / rows) * col_stride + (k % rows) * 4`, everything else at
    /// `k * 4`.
    Memory {
        base: AddrBase,
        static_offset: u32,
        dynamic: Option<u32>,
        col_stride: u32,
    },
}

/// Absolute control levels a loop's break/continue branch to.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopLabels {
    pub break_level: u32,
    pub continue_level: u32,
}

pub(crate) struct FunctionEmitter<'a> {
    pub(crate) shader: &'a TypedShader,
    pub(crate) maps: &'a LocationMaps<'a>,
    pub(crate) fn_indices: &'a BTreeMap<String, u32>,
    pub(crate) texture_sample_idx: Option<u32>,

    pub(crate) decl: &'a FunctionDecl,
    pub(crate) abi: FunctionAbi,
    pub(crate) is_user_main: bool,

    pub(crate) code: Insns,
    pub(crate) locals: Vec<ValType>,
    pub(crate) param_count: u32,

    pub(crate) scopes: Vec<HashMap<String, VarInfo>>,

    /// Bytes of this function's own frame allocation.
    pub(crate) frame_size: u32,
    /// Decided up front by scanning the body, so every `return` knows
    /// whether a frame restore is due regardless of emission order.
    pub(crate) uses_local_frame: bool,
    pub(crate) saved_sp_local: u32,
    pub(crate) frame_base_local: u32,
    pub(crate) sret_local: Option<u32>,

    pub(crate) control_depth: u32,
    pub(crate) loop_stack: Vec<LoopLabels>,

    /// Flattened aggregate parameters copied into the frame at entry:
    /// (first param local, component types, frame offset).
    entry_copies: Vec<(u32, Vec<ValType>, u32)>,
}

impl<'a> FunctionEmitter<'a> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        shader: &'a TypedShader,
        maps: &'a LocationMaps<'a>,
        fn_indices: &'a BTreeMap<String, u32>,
        texture_sample_idx: Option<u32>,
        global_var_offsets: &'a BTreeMap<String, u32>,
        decl: &'a FunctionDecl,
        abi: FunctionAbi,
        is_user_main: bool,
    ) -> Result<Self, CompileError> {
        let param_count = abi.param_valtypes().len() as u32;
        let mut emitter = Self {
            shader,
            maps,
            fn_indices,
            texture_sample_idx,
            decl,
            abi,
            is_user_main,
            code: Insns::new(),
            locals: Vec::new(),
            param_count,
            scopes: Vec::new(),
            frame_size: 0,
            uses_local_frame: false,
            saved_sp_local: 0,
            frame_base_local: 0,
            sret_local: None,
            control_depth: 0,
            loop_stack: Vec::new(),
            entry_copies: Vec::new(),
        };

        // The frame bookkeeping locals exist in every function; unused
        // ones cost nothing after the entry sequence is skipped.
        emitter.saved_sp_local = emitter.alloc_local(ValType::I32);
        emitter.frame_base_local = emitter.alloc_local(ValType::I32);

        emitter.scopes.push(emitter.module_scope(global_var_offsets));
        emitter.bind_params()?;
        emitter.uses_local_frame =
            !emitter.entry_copies.is_empty() || emitter.body_declares_aggregates(&decl.body);
        Ok(emitter)
    }

    /// Whether any statement declares a matrix, array, or struct local,
    /// which forces a frame allocation for addressability.
    fn body_declares_aggregates(&self, block: &crate::glsl::ast::Block) -> bool {
        use crate::glsl::ast::{Stmt, TypeSpec};
        block.stmts.iter().any(|stmt| match stmt {
            Stmt::Decl(decl) => {
                decl.array_size.is_some()
                    || match &decl.ty {
                        TypeSpec::Builtin(ty) => {
                            matches!(ty, GlslType::Matrix { .. } | GlslType::Array(..))
                        }
                        TypeSpec::Named(_) => true,
                    }
            }
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                self.body_declares_aggregates(then_branch)
                    || else_branch
                        .as_ref()
                        .is_some_and(|b| self.body_declares_aggregates(b))
            }
            Stmt::For { init, body, .. } => {
                init.as_deref().is_some_and(|s| {
                    self.body_declares_aggregates(&crate::glsl::ast::Block {
                        stmts: vec![s.clone()],
                    })
                }) || self.body_declares_aggregates(body)
            }
            Stmt::While { body, .. } => self.body_declares_aggregates(body),
            Stmt::Block(block) => self.body_declares_aggregates(block),
            _ => false,
        })
    }

    /// Module-interface bindings shared by every function of this shader.
    fn module_scope(&self, global_var_offsets: &BTreeMap<String, u32>) -> HashMap<String, VarInfo> {
        use memory_layout::*;
        let mut scope = HashMap::new();
        let symbols = &self.shader.symbols;

        match self.shader.stage {
            ShaderStage::Vertex => {
                scope.insert(
                    "gl_Position".to_string(),
                    VarInfo {
                        ty: GlslType::Vector(crate::glsl::types::ScalarKind::Float, 4),
                        storage: VarStorage::Region {
                            global: VARYING_PTR_GLOBAL,
                            offset: POSITION_OFFSET,
                            matrix_col_stride: 16,
                        },
                    },
                );
                scope.insert(
                    "gl_PointSize".to_string(),
                    VarInfo {
                        ty: GlslType::Scalar(crate::glsl::types::ScalarKind::Float),
                        storage: VarStorage::Region {
                            global: VARYING_PTR_GLOBAL,
                            offset: POINT_SLOT_OFFSET,
                            matrix_col_stride: 16,
                        },
                    },
                );
            }
            ShaderStage::Fragment => {
                scope.insert(
                    "gl_FragCoord".to_string(),
                    VarInfo {
                        ty: GlslType::Vector(crate::glsl::types::ScalarKind::Float, 4),
                        storage: VarStorage::Region {
                            global: VARYING_PTR_GLOBAL,
                            offset: POSITION_OFFSET,
                            matrix_col_stride: 16,
                        },
                    },
                );
                scope.insert(
                    "gl_PointCoord".to_string(),
                    VarInfo {
                        ty: GlslType::Vector(crate::glsl::types::ScalarKind::Float, 2),
                        storage: VarStorage::Region {
                            global: VARYING_PTR_GLOBAL,
                            offset: POINT_SLOT_OFFSET,
                            matrix_col_stride: 16,
                        },
                    },
                );
            }
        }

        for attr in &symbols.attributes {
            let location = self.maps.attributes.get(&attr.name).copied().unwrap_or(0);
            scope.insert(
                attr.name.clone(),
                VarInfo {
                    ty: attr.ty.clone(),
                    storage: VarStorage::Region {
                        global: ATTR_PTR_GLOBAL,
                        offset: attribute_offset(location),
                        matrix_col_stride: ATTRIBUTE_STRIDE,
                    },
                },
            );
        }
        for varying in &symbols.varyings {
            let location = self.maps.varyings.get(&varying.name).copied().unwrap_or(0);
            scope.insert(
                varying.name.clone(),
                VarInfo {
                    ty: varying.ty.clone(),
                    storage: VarStorage::Region {
                        global: VARYING_PTR_GLOBAL,
                        offset: varying_offset(location),
                        matrix_col_stride: 16,
                    },
                },
            );
        }
        for uniform in &symbols.uniforms {
            let location = self.maps.uniforms.get(&uniform.name).copied().unwrap_or(0);
            let ty = match uniform.array_size {
                Some(count) => GlslType::Array(Box::new(uniform.ty.clone()), count),
                None => uniform.ty.clone(),
            };
            let col_stride = match &uniform.ty {
                GlslType::Matrix { rows, .. } => u32::from(*rows) * 4,
                _ => 16,
            };
            scope.insert(
                uniform.name.clone(),
                VarInfo {
                    ty,
                    storage: VarStorage::Region {
                        global: UNIFORM_PTR_GLOBAL,
                        offset: uniform_offset(location),
                        matrix_col_stride: col_stride,
                    },
                },
            );
        }
        for output in &symbols.frag_outputs {
            scope.insert(
                output.name.clone(),
                VarInfo {
                    ty: output.ty.clone(),
                    storage: VarStorage::Region {
                        global: PRIVATE_PTR_GLOBAL,
                        offset: frag_output_offset(output.location),
                        matrix_col_stride: 16,
                    },
                },
            );
        }

        // Module-scope plain variables, packed into the private region.
        for decl in &self.shader.unit.decls {
            let Decl::Global(global) = decl else { continue };
            if global.qualifiers.storage.is_some() {
                continue;
            }
            let Some(offset) = global_var_offsets.get(&global.name) else {
                continue;
            };
            let ty = self.plain_global_type(global);
            let col_stride = match &ty {
                GlslType::Matrix { rows, .. } => u32::from(*rows) * 4,
                _ => 16,
            };
            scope.insert(
                global.name.clone(),
                VarInfo {
                    ty,
                    storage: VarStorage::Region {
                        global: PRIVATE_PTR_GLOBAL,
                        offset: PRIVATE_GLOBALS_BASE + offset,
                        matrix_col_stride: col_stride,
                    },
                },
            );
        }

        scope
    }

    fn plain_global_type(&self, global: &crate::glsl::ast::GlobalDecl) -> GlslType {
        use crate::glsl::ast::TypeSpec;
        let base = match &global.ty {
            TypeSpec::Builtin(ty) => ty.clone(),
            TypeSpec::Named(name) => self
                .shader
                .structs
                .get(name)
                .cloned()
                .map(GlslType::Struct)
                .unwrap_or(GlslType::Void),
        };
        match global.array_size {
            Some(count) => GlslType::Array(Box::new(base), count),
            None => base,
        }
    }

    /// Bind parameters to their storage per the classified ABI.
    fn bind_params(&mut self) -> Result<(), CompileError> {
        let mut scope = HashMap::new();
        let mut cursor = 0u32;
        if self.abi.has_sret() {
            self.sret_local = Some(cursor);
            cursor += 1;
        }
        let symbol = self
            .shader
            .symbols
            .function(&self.decl.name)
            .ok_or_else(|| CompileError::Internal("missing function symbol".into()))?;
        let param_types = symbol.params.clone();
        let abi_params = self.abi.params.clone();
        for ((param, abi), ty) in self
            .decl
            .params
            .iter()
            .zip(abi_params.iter())
            .zip(param_types)
        {

            if param.qualifier != crate::glsl::ast::ParamQualifier::In {
                return Err(CompileError::unsupported(
                    format!(
                        "'out' and 'inout' parameters are not supported ('{}')",
                        param.name
                    ),
                    param.span,
                ));
            }

            let storage = match abi {
                ParameterAbi::Flattened { valtypes, .. } => match &ty {
                    GlslType::Scalar(_) | GlslType::Vector(..) | GlslType::Sampler(_) => {
                        let storage = VarStorage::Locals { base: cursor };
                        cursor += valtypes.len() as u32;
                        storage
                    }
                    // Flattened aggregates are copied into the frame at
                    // entry so indexing has an address to work with.
                    _ => {
                        let offset = self.alloc_frame(ty.byte_size());
                        self.entry_copies.push((cursor, valtypes.clone(), offset));
                        cursor += valtypes.len() as u32;
                        VarStorage::Frame { offset }
                    }
                },
                ParameterAbi::Frame { .. } => {
                    let storage = VarStorage::FramePtr { ptr_local: cursor };
                    cursor += 1;
                    storage
                }
            };
            scope.insert(param.name.clone(), VarInfo { ty, storage });
        }
        self.scopes.push(scope);
        Ok(())
    }

    // ----- small allocation helpers --------------------------------------

    pub(crate) fn alloc_local(&mut self, valtype: ValType) -> u32 {
        let idx = self.param_count + self.locals.len() as u32;
        self.locals.push(valtype);
        idx
    }

    /// Allocate contiguous locals for every component of a type.
    pub(crate) fn alloc_value(&mut self, ty: &GlslType) -> Value {
        let base = self.param_count + self.locals.len() as u32;
        self.locals.extend(ty.flat_valtypes());
        Value {
            ty: ty.clone(),
            base,
        }
    }

    /// Reserve bytes in this function's frame allocation.
    pub(crate) fn alloc_frame(&mut self, size: u32) -> u32 {
        self.frame_size = (self.frame_size + 15) & !15;
        let offset = self.frame_size;
        self.frame_size += size;
        offset
    }

    pub(crate) fn current_scope(&mut self) -> &mut HashMap<String, VarInfo> {
        self.scopes.last_mut().expect("scope stack is never empty")
    }

    pub(crate) fn lookup_var(&self, name: &str) -> Option<&VarInfo> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    // ----- body assembly --------------------------------------------------

    fn emit_body(mut self) -> Result<(Vec<ValType>, Insns), CompileError> {
        if self.is_user_main {
            self.emit_main_prologue()?;
        }

        let decl = self.decl;
        for stmt in &decl.body.stmts {
            self.emit_stmt(stmt)?;
        }

        let mut final_code = Insns::new();

        debug_assert_eq!(
            self.uses_local_frame,
            self.frame_size > 0,
            "frame pre-scan disagrees with emission"
        );

        // Entry: allocate this function's frame and copy flattened
        // aggregate parameters into it.
        if self.uses_local_frame {
            emit_frame_alloc(
                &mut final_code,
                self.frame_size,
                self.saved_sp_local,
                self.frame_base_local,
            );
            let entry_copies = std::mem::take(&mut self.entry_copies);
            for (param_base, valtypes, offset) in entry_copies {
                for (i, valtype) in valtypes.iter().enumerate() {
                    final_code.push(Instruction::LocalGet(self.frame_base_local));
                    final_code.push(Instruction::LocalGet(param_base + i as u32));
                    push_store(&mut final_code, *valtype, offset + i as u32 * 4);
                }
            }
        }

        final_code.extend(self.code.drain(..));

        // Exit: void functions fall off the end after restoring the frame
        // pointer; non-void functions must have returned already.
        let returns_value = !self.abi.result_valtypes().is_empty();
        if returns_value {
            final_code.push(Instruction::Unreachable);
        } else if self.uses_local_frame {
            crate::wasm_backend::frame_allocator::emit_frame_release(
                &mut final_code,
                self.saved_sp_local,
            );
        }

        Ok((self.locals, final_code))
    }

    /// The user main's prologue: reset the discard flag (fragment) and run
    /// module-scope initializers in declaration order.
    fn emit_main_prologue(&mut self) -> Result<(), CompileError> {
        if self.shader.stage == ShaderStage::Fragment {
            self.code.push(Instruction::GlobalGet(
                memory_layout::PRIVATE_PTR_GLOBAL,
            ));
            self.code.push(Instruction::I32Const(0));
            self.code.push(Instruction::I32Store(
                crate::wasm_backend::frame_allocator::memarg(memory_layout::FRAG_DISCARD_OFFSET),
            ));
        }

        let shader = self.shader;
        for decl in &shader.unit.decls {
            let Decl::Global(global) = decl else { continue };
            if global.qualifiers.storage.is_some() {
                continue;
            }
            let Some(init) = &global.init else { continue };
            let value = self.eval(init)?;
            let info = self
                .lookup_var(&global.name)
                .cloned()
                .ok_or_else(|| CompileError::Internal(format!("unbound global '{}'", global.name)))?;
            let place = self.place_for_var(&info);
            self.store_place(&place, &value)?;
        }
        Ok(())
    }
}

/// The region layout every emitted module assumes. Exposed so hosts can
/// place buffers without re-deriving constants.
pub fn reference_layout() -> RegionLayout {
    RegionLayout::default()
}
