//! Per-shader symbol tables.
//!
//! The type checker records every attribute, varying, uniform, fragment
//! output, and user function it resolves. The ABI classifier later fills in
//! the per-function calling convention, so the emitter and the linker see
//! identical classifications.

use crate::glsl::ast::Interpolation;
use crate::glsl::types::GlslType;
use crate::wasm_backend::function_abi::FunctionAbi;
use serde::Serialize;

/// The two shader stages a program links together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

/// A vertex input.
#[derive(Debug, Clone, Serialize)]
pub struct AttributeInfo {
    pub name: String,
    pub ty: GlslType,
    /// Explicit `layout(location = N)` if the source gave one.
    pub location: Option<u32>,
}

/// An interstage value: `out` in the vertex unit, `in` in the fragment unit.
#[derive(Debug, Clone, Serialize)]
pub struct VaryingInfo {
    pub name: String,
    pub ty: GlslType,
    pub interpolation: Interpolation,
    pub location: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UniformKind {
    Plain,
    /// Opaque handle bound by texture unit index.
    Sampler,
}

#[derive(Debug, Clone, Serialize)]
pub struct UniformInfo {
    pub name: String,
    pub ty: GlslType,
    pub array_size: Option<u32>,
    pub kind: UniformKind,
}

impl UniformInfo {
    /// Packed byte size of the whole uniform, arrays included.
    pub fn byte_size(&self) -> u32 {
        let base = self.ty.byte_size();
        base * self.array_size.unwrap_or(1)
    }
}

/// A fragment color output and its draw-buffer location.
#[derive(Debug, Clone, Serialize)]
pub struct FragOutputInfo {
    pub name: String,
    pub ty: GlslType,
    pub location: u32,
}

/// A user-defined function with its resolved signature and, once the
/// classifier has run, its calling convention.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionSymbol {
    pub name: String,
    pub params: Vec<GlslType>,
    pub ret: GlslType,
    #[serde(skip)]
    pub abi: Option<FunctionAbi>,
}

/// Everything the rest of the pipeline needs to know about one translation
/// unit, in declaration order.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolTable {
    pub stage: ShaderStage,
    pub attributes: Vec<AttributeInfo>,
    pub varyings: Vec<VaryingInfo>,
    pub uniforms: Vec<UniformInfo>,
    pub frag_outputs: Vec<FragOutputInfo>,
    pub functions: Vec<FunctionSymbol>,
}

impl SymbolTable {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            attributes: Vec::new(),
            varyings: Vec::new(),
            uniforms: Vec::new(),
            frag_outputs: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn varying(&self, name: &str) -> Option<&VaryingInfo> {
        self.varyings.iter().find(|v| v.name == name)
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSymbol> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut FunctionSymbol> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    /// Whether any uniform is an opaque sampler (decides the texture
    /// import).
    pub fn references_samplers(&self) -> bool {
        self.uniforms.iter().any(|u| u.kind == UniformKind::Sampler)
    }
}
