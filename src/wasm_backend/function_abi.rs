//! Function ABI: deterministic classification and layout for function
//! signatures.
//!
//! A pure, testable facility that classifies every parameter and result as
//! either Flattened (passed as WASM scalar values) or Frame (passed via a
//! pointer into the frame arena). The decisions are recorded in the symbol
//! table so the emitter and the linker always agree.

use crate::error::CompileError;
use crate::glsl::typecheck::TypedShader;
use crate::glsl::types::GlslType;
use wasm_encoder::ValType;

/// Maximum bytes for a parameter or result to be flattened into scalar
/// values. Above this threshold the frame arena is used.
pub const MAX_FLATTEN_BYTES: u32 = 16;

/// Maximum number of flattened scalar parameters per signature.
pub const MAX_FLATTENED_PARAMS: usize = 16;

/// Framed entries in a call frame are aligned to one vec4.
pub const FRAME_ALIGN: u32 = 16;

/// How a parameter is passed.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterAbi {
    /// Passed as flattened WASM scalar values, one per component.
    Flattened { valtypes: Vec<ValType>, byte_size: u32 },
    /// Caller writes the value at `offset` within the call frame and
    /// passes a single i32 pointer.
    Frame { offset: u32, size: u32 },
}

/// How a result is returned.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultAbi {
    /// Returned as flattened WASM scalar values (multi-value).
    Flattened { valtypes: Vec<ValType>, byte_size: u32 },
    /// Returned through an out-pointer prepended to the parameter list;
    /// the callee writes the value at `offset` within the call frame.
    Frame { offset: u32, size: u32 },
}

/// The complete calling convention of one user function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionAbi {
    pub params: Vec<ParameterAbi>,
    pub result: Option<ResultAbi>,
    /// Whether any parameter or the result goes through the frame arena.
    pub uses_frame: bool,
    /// Total bytes the caller reserves in the frame arena per call.
    pub call_frame_size: u32,
}

impl FunctionAbi {
    /// Compute the ABI for a signature. Fails on signatures the backend
    /// refuses to lower rather than guessing a layout.
    pub fn classify(params: &[GlslType], result: &GlslType) -> Result<Self, AbiError> {
        let mut abi_params = Vec::with_capacity(params.len());
        let mut frame_offset = 0u32;
        let mut uses_frame = false;
        let mut flattened_total = 0usize;

        for param in params {
            match classify_type(param)? {
                TypeClass::Flattened(valtypes, byte_size) => {
                    flattened_total += valtypes.len();
                    if flattened_total > MAX_FLATTENED_PARAMS {
                        return Err(AbiError::TooManyParameters);
                    }
                    abi_params.push(ParameterAbi::Flattened {
                        valtypes,
                        byte_size,
                    });
                }
                TypeClass::Frame(size) => {
                    uses_frame = true;
                    frame_offset = align_up(frame_offset, FRAME_ALIGN);
                    abi_params.push(ParameterAbi::Frame {
                        offset: frame_offset,
                        size,
                    });
                    frame_offset += size;
                }
            }
        }

        let result = match result {
            GlslType::Void => None,
            ty => match classify_type(ty)? {
                TypeClass::Flattened(valtypes, byte_size) => Some(ResultAbi::Flattened {
                    valtypes,
                    byte_size,
                }),
                TypeClass::Frame(size) => {
                    uses_frame = true;
                    frame_offset = align_up(frame_offset, FRAME_ALIGN);
                    let offset = frame_offset;
                    frame_offset += size;
                    Some(ResultAbi::Frame { offset, size })
                }
            },
        };

        Ok(FunctionAbi {
            params: abi_params,
            result,
            uses_frame,
            call_frame_size: align_up(frame_offset, FRAME_ALIGN),
        })
    }

    /// Whether the result is returned through a prepended out-pointer.
    pub fn has_sret(&self) -> bool {
        matches!(self.result, Some(ResultAbi::Frame { .. }))
    }

    /// WASM parameter value types: the sret pointer first if the result is
    /// framed, then each parameter in source order.
    pub fn param_valtypes(&self) -> Vec<ValType> {
        let mut valtypes = Vec::new();
        if self.has_sret() {
            valtypes.push(ValType::I32);
        }
        for param in &self.params {
            match param {
                ParameterAbi::Flattened { valtypes: vts, .. } => {
                    valtypes.extend_from_slice(vts);
                }
                ParameterAbi::Frame { .. } => valtypes.push(ValType::I32),
            }
        }
        valtypes
    }

    /// WASM result value types. Framed results do not appear in the
    /// signature; they are written through the sret pointer.
    pub fn result_valtypes(&self) -> Vec<ValType> {
        match &self.result {
            Some(ResultAbi::Flattened { valtypes, .. }) => valtypes.clone(),
            _ => Vec::new(),
        }
    }
}

/// Classification of one type.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TypeClass {
    Flattened(Vec<ValType>, u32),
    Frame(u32),
}

/// Classify a GLSL type for ABI purposes. Sizes are the packed sizes of
/// [`GlslType::byte_size`]; opaque samplers travel as one i32 handle.
pub(crate) fn classify_type(ty: &GlslType) -> Result<TypeClass, AbiError> {
    match ty {
        GlslType::Void => Err(AbiError::VoidValue),
        GlslType::Sampler(_) => Ok(TypeClass::Flattened(vec![ValType::I32], 4)),
        _ => {
            let size = ty.byte_size();
            if size <= MAX_FLATTEN_BYTES {
                Ok(TypeClass::Flattened(ty.flat_valtypes(), size))
            } else {
                Ok(TypeClass::Frame(size))
            }
        }
    }
}

fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

/// Errors raised during ABI computation.
#[derive(Debug, Clone, PartialEq)]
pub enum AbiError {
    VoidValue,
    TooManyParameters,
}

impl std::fmt::Display for AbiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbiError::VoidValue => write!(f, "'void' cannot be passed or returned by value"),
            AbiError::TooManyParameters => write!(
                f,
                "too many flattened parameters (limit is {MAX_FLATTENED_PARAMS} scalar values)"
            ),
        }
    }
}

impl std::error::Error for AbiError {}

/// Classify every user function of a checked shader and record the
/// decisions in its symbol table.
pub fn classify_symbols(shader: &mut TypedShader) -> Result<(), CompileError> {
    use crate::glsl::ast::Decl;

    // Spans for diagnostics, keyed by declaration order.
    let spans: std::collections::HashMap<String, crate::glsl::ast::Span> = shader
        .unit
        .decls
        .iter()
        .filter_map(|d| match d {
            Decl::Function(f) => Some((f.name.clone(), f.span)),
            _ => None,
        })
        .collect();

    for func in &mut shader.symbols.functions {
        let abi = FunctionAbi::classify(&func.params, &func.ret).map_err(|e| {
            let span = spans.get(&func.name).copied().unwrap_or_default();
            CompileError::unsupported(format!("function '{}': {e}", func.name), span)
        })?;
        func.abi = Some(abi);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glsl::types::ScalarKind;

    fn float() -> GlslType {
        GlslType::Scalar(ScalarKind::Float)
    }

    fn vec(n: u8) -> GlslType {
        GlslType::Vector(ScalarKind::Float, n)
    }

    fn mat(n: u8) -> GlslType {
        GlslType::Matrix { cols: n, rows: n }
    }

    #[test]
    fn scalar_f32_flattened() {
        let abi = FunctionAbi::classify(&[float()], &GlslType::Void).unwrap();
        assert_eq!(abi.params.len(), 1);
        match &abi.params[0] {
            ParameterAbi::Flattened {
                valtypes,
                byte_size,
            } => {
                assert_eq!(valtypes, &[ValType::F32]);
                assert_eq!(*byte_size, 4);
            }
            _ => panic!("expected Flattened"),
        }
        assert!(!abi.uses_frame);
    }

    #[test]
    fn vec4_is_at_the_flatten_threshold() {
        let abi = FunctionAbi::classify(&[vec(4)], &GlslType::Void).unwrap();
        match &abi.params[0] {
            ParameterAbi::Flattened {
                valtypes,
                byte_size,
            } => {
                assert_eq!(valtypes, &[ValType::F32; 4]);
                assert_eq!(*byte_size, 16);
            }
            _ => panic!("expected Flattened"),
        }
    }

    #[test]
    fn mat2_flattens_and_mat3_is_framed() {
        let abi = FunctionAbi::classify(&[mat(2)], &GlslType::Void).unwrap();
        assert!(matches!(
            abi.params[0],
            ParameterAbi::Flattened { byte_size: 16, .. }
        ));

        let abi = FunctionAbi::classify(&[mat(3)], &GlslType::Void).unwrap();
        assert!(matches!(
            abi.params[0],
            ParameterAbi::Frame { offset: 0, size: 36 }
        ));
        assert!(abi.uses_frame);
    }

    #[test]
    fn mat4_param_then_vec4_matches_transform_vector_shape() {
        // vec4 transformVector(mat4 m, vec4 v)
        let abi = FunctionAbi::classify(&[mat(4), vec(4)], &vec(4)).unwrap();
        assert_eq!(
            abi.param_valtypes(),
            vec![
                ValType::I32,
                ValType::F32,
                ValType::F32,
                ValType::F32,
                ValType::F32
            ]
        );
        assert_eq!(abi.result_valtypes(), vec![ValType::F32; 4]);
        assert_eq!(abi.call_frame_size, 64);
    }

    #[test]
    fn float_array_of_four_flattens() {
        // float sumArray(float arr[4]) sits exactly on the threshold.
        let arr = GlslType::Array(Box::new(float()), 4);
        let abi = FunctionAbi::classify(&[arr], &float()).unwrap();
        match &abi.params[0] {
            ParameterAbi::Flattened { valtypes, .. } => {
                assert_eq!(valtypes, &[ValType::F32; 4]);
            }
            _ => panic!("expected Flattened array at threshold"),
        }
    }

    #[test]
    fn large_array_is_framed() {
        let arr = GlslType::Array(Box::new(float()), 8);
        let abi = FunctionAbi::classify(&[arr], &GlslType::Void).unwrap();
        assert!(matches!(
            abi.params[0],
            ParameterAbi::Frame { offset: 0, size: 32 }
        ));
    }

    #[test]
    fn framed_result_uses_sret_pointer() {
        let abi = FunctionAbi::classify(&[vec(2)], &mat(4)).unwrap();
        assert!(abi.has_sret());
        assert_eq!(
            abi.param_valtypes(),
            vec![ValType::I32, ValType::F32, ValType::F32]
        );
        assert!(abi.result_valtypes().is_empty());
        match abi.result {
            Some(ResultAbi::Frame { offset, size }) => {
                assert_eq!(offset, 0);
                assert_eq!(size, 64);
            }
            _ => panic!("expected framed result"),
        }
    }

    #[test]
    fn frame_offsets_are_vec4_aligned() {
        let abi = FunctionAbi::classify(&[mat(3), mat(3)], &GlslType::Void).unwrap();
        let offsets: Vec<u32> = abi
            .params
            .iter()
            .map(|p| match p {
                ParameterAbi::Frame { offset, .. } => *offset,
                _ => panic!("expected Frame"),
            })
            .collect();
        assert_eq!(offsets, vec![0, 48]);
        assert_eq!(abi.call_frame_size, 96);
    }

    #[test]
    fn vec3_result_is_multi_value() {
        let abi = FunctionAbi::classify(&[], &vec(3)).unwrap();
        assert_eq!(abi.result_valtypes(), vec![ValType::F32; 3]);
        assert!(!abi.uses_frame);
    }

    #[test]
    fn integer_vector_uses_i32_lanes() {
        let abi = FunctionAbi::classify(
            &[GlslType::Vector(ScalarKind::Int, 4)],
            &GlslType::Scalar(ScalarKind::Bool),
        )
        .unwrap();
        assert_eq!(abi.param_valtypes(), vec![ValType::I32; 4]);
        assert_eq!(abi.result_valtypes(), vec![ValType::I32]);
    }

    #[test]
    fn too_many_flattened_scalars_is_rejected() {
        let params = vec![vec(4), vec(4), vec(4), vec(4), float()];
        let err = FunctionAbi::classify(&params, &GlslType::Void).unwrap_err();
        assert_eq!(err, AbiError::TooManyParameters);
    }
}
