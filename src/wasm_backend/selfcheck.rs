//! Post-emission self-checks.
//!
//! A module whose emitted type section disagrees with the classified ABI
//! table is inconsistent; that is a compiler bug, not a user error, so the
//! check reports it through the internal-invariant channel and callers
//! abort loudly instead of handing broken bytes to the rasterizer.

use crate::error::CompileError;
use crate::glsl::symbols::SymbolTable;
use crate::wasm_backend::emitter::EmittedModule;
use wasmparser::{CompositeInnerType, Parser, Payload, TypeRef, Validator};

fn internal(msg: impl Into<String>) -> CompileError {
    CompileError::Internal(msg.into())
}

fn map_valtype(ty: wasmparser::ValType) -> Option<wasm_encoder::ValType> {
    match ty {
        wasmparser::ValType::I32 => Some(wasm_encoder::ValType::I32),
        wasmparser::ValType::I64 => Some(wasm_encoder::ValType::I64),
        wasmparser::ValType::F32 => Some(wasm_encoder::ValType::F32),
        wasmparser::ValType::F64 => Some(wasm_encoder::ValType::F64),
        _ => None,
    }
}

/// Parsed signature table of a binary module.
struct ModuleShape {
    types: Vec<(Vec<wasm_encoder::ValType>, Vec<wasm_encoder::ValType>)>,
    func_type_indices: Vec<u32>,
    import_func_count: u32,
    main_export: Option<u32>,
}

fn parse_shape(bytes: &[u8]) -> Result<ModuleShape, CompileError> {
    let mut shape = ModuleShape {
        types: Vec::new(),
        func_type_indices: Vec::new(),
        import_func_count: 0,
        main_export: None,
    };
    for payload in Parser::new(0).parse_all(bytes) {
        let payload = payload.map_err(|e| internal(format!("emitted module unreadable: {e}")))?;
        match payload {
            Payload::TypeSection(reader) => {
                for rec_group in reader {
                    let rec_group =
                        rec_group.map_err(|e| internal(format!("type section: {e}")))?;
                    for sub_type in rec_group.types() {
                        if let CompositeInnerType::Func(func_type) =
                            &sub_type.composite_type.inner
                        {
                            let params = func_type
                                .params()
                                .iter()
                                .map(|t| map_valtype(*t))
                                .collect::<Option<Vec<_>>>()
                                .ok_or_else(|| internal("non-MVP value type in signature"))?;
                            let results = func_type
                                .results()
                                .iter()
                                .map(|t| map_valtype(*t))
                                .collect::<Option<Vec<_>>>()
                                .ok_or_else(|| internal("non-MVP value type in signature"))?;
                            shape.types.push((params, results));
                        }
                    }
                }
            }
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.map_err(|e| internal(format!("import section: {e}")))?;
                    if matches!(import.ty, TypeRef::Func(_)) {
                        shape.import_func_count += 1;
                    }
                }
            }
            Payload::FunctionSection(reader) => {
                for func in reader {
                    let type_idx = func.map_err(|e| internal(format!("function section: {e}")))?;
                    shape.func_type_indices.push(type_idx);
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.map_err(|e| internal(format!("export section: {e}")))?;
                    if export.name == "main"
                        && matches!(export.kind, wasmparser::ExternalKind::Func)
                    {
                        shape.main_export = Some(export.index);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(shape)
}

impl ModuleShape {
    fn signature_of(&self, func_idx: u32) -> Result<&(Vec<wasm_encoder::ValType>, Vec<wasm_encoder::ValType>), CompileError> {
        let code_idx = func_idx
            .checked_sub(self.import_func_count)
            .ok_or_else(|| internal("signature query for an imported function"))?;
        let type_idx = self
            .func_type_indices
            .get(code_idx as usize)
            .ok_or_else(|| internal(format!("function index {func_idx} out of range")))?;
        self.types
            .get(*type_idx as usize)
            .ok_or_else(|| internal(format!("type index {type_idx} out of range")))
    }
}

/// Validate the emitted bytes and cross-check every function signature
/// against the classified ABI table.
pub fn verify_module(
    emitted: &EmittedModule,
    symbols: &SymbolTable,
) -> Result<(), CompileError> {
    Validator::new()
        .validate_all(&emitted.bytes)
        .map_err(|e| internal(format!("emitted module failed validation: {e}")))?;

    let shape = parse_shape(&emitted.bytes)?;
    if shape.import_func_count != emitted.import_function_count {
        return Err(internal("import count drifted during emission"));
    }

    // Every classified user function must carry exactly its ABI signature.
    for func in &symbols.functions {
        let Some(abi) = &func.abi else {
            return Err(internal(format!("function '{}' was never classified", func.name)));
        };
        let idx = emitted
            .function_indices
            .get(&func.name)
            .ok_or_else(|| internal(format!("function '{}' was not emitted", func.name)))?;
        let (params, results) = shape.signature_of(*idx)?;
        if *params != abi.param_valtypes() || *results != abi.result_valtypes() {
            return Err(internal(format!(
                "function '{}' signature disagrees with its ABI classification",
                func.name
            )));
        }
    }

    // The user main is internal and takes nothing.
    let user_main = emitted
        .function_indices
        .get("main")
        .ok_or_else(|| internal("user main was not emitted"))?;
    let (params, results) = shape.signature_of(*user_main)?;
    if !params.is_empty() || !results.is_empty() {
        return Err(internal("user main must have no parameters or results"));
    }

    // The exported wrapper takes the six region pointers.
    let export_idx = shape
        .main_export
        .ok_or_else(|| internal("module does not export 'main'"))?;
    let (params, results) = shape.signature_of(export_idx)?;
    if *params != vec![wasm_encoder::ValType::I32; 6] || !results.is_empty() {
        return Err(internal(
            "exported 'main' does not have the (i32 x 6) -> () signature",
        ));
    }

    Ok(())
}
