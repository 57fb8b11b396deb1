//! GLSL type representation and packed size rules.
//!
//! Sizes follow the packed layout used throughout the compiler: scalars are
//! 4 bytes, `vecN` is 4*N, `matNxM` is 4*N*M (column major), fixed arrays
//! are element size times count, and structs are the sum of their members
//! with no inter-member padding. Frames are raw bump regions, so no struct
//! padding is required.

use serde::Serialize;
use wasm_encoder::ValType;

/// Scalar component categories. Booleans lower to i32 (0 or 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScalarKind {
    Float,
    Int,
    Uint,
    Bool,
}

impl ScalarKind {
    /// The WASM value type carrying one component of this kind.
    pub fn valtype(self) -> ValType {
        match self {
            ScalarKind::Float => ValType::F32,
            ScalarKind::Int | ScalarKind::Uint | ScalarKind::Bool => ValType::I32,
        }
    }

    pub fn glsl_name(self) -> &'static str {
        match self {
            ScalarKind::Float => "float",
            ScalarKind::Int => "int",
            ScalarKind::Uint => "uint",
            ScalarKind::Bool => "bool",
        }
    }

    /// Prefix used by vector spellings (`vec`, `ivec`, `uvec`, `bvec`).
    fn vector_prefix(self) -> &'static str {
        match self {
            ScalarKind::Float => "vec",
            ScalarKind::Int => "ivec",
            ScalarKind::Uint => "uvec",
            ScalarKind::Bool => "bvec",
        }
    }
}

/// Opaque sampler categories accepted by the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SamplerKind {
    Sampler2D,
    Sampler3D,
    SamplerCube,
}

impl SamplerKind {
    pub fn glsl_name(self) -> &'static str {
        match self {
            SamplerKind::Sampler2D => "sampler2D",
            SamplerKind::Sampler3D => "sampler3D",
            SamplerKind::SamplerCube => "samplerCube",
        }
    }

    /// Number of texture coordinate components `texture()` expects.
    pub fn coord_components(self) -> u8 {
        match self {
            SamplerKind::Sampler2D => 2,
            SamplerKind::Sampler3D | SamplerKind::SamplerCube => 3,
        }
    }
}

/// A user-declared struct type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructType {
    pub name: String,
    pub members: Vec<StructMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructMember {
    pub name: String,
    pub ty: GlslType,
}

impl StructType {
    /// Byte offset and type of a member, if present.
    pub fn member(&self, name: &str) -> Option<(u32, &GlslType)> {
        let mut offset = 0;
        for member in &self.members {
            if member.name == name {
                return Some((offset, &member.ty));
            }
            offset += member.ty.byte_size();
        }
        None
    }
}

/// A concrete GLSL type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GlslType {
    Void,
    Scalar(ScalarKind),
    /// Vector of 2 to 4 components.
    Vector(ScalarKind, u8),
    /// Column-major float matrix: `cols` columns of `rows` components.
    Matrix { cols: u8, rows: u8 },
    /// Fixed-size array (sized declarations only).
    Array(Box<GlslType>, u32),
    Struct(Box<StructType>),
    Sampler(SamplerKind),
}

impl GlslType {
    /// Resolve a built-in type keyword (`vec3`, `mat4x2`, `sampler2D`, ...).
    pub fn from_keyword(word: &str) -> Option<GlslType> {
        let ty = match word {
            "void" => GlslType::Void,
            "float" => GlslType::Scalar(ScalarKind::Float),
            "int" => GlslType::Scalar(ScalarKind::Int),
            "uint" => GlslType::Scalar(ScalarKind::Uint),
            "bool" => GlslType::Scalar(ScalarKind::Bool),
            "vec2" => GlslType::Vector(ScalarKind::Float, 2),
            "vec3" => GlslType::Vector(ScalarKind::Float, 3),
            "vec4" => GlslType::Vector(ScalarKind::Float, 4),
            "ivec2" => GlslType::Vector(ScalarKind::Int, 2),
            "ivec3" => GlslType::Vector(ScalarKind::Int, 3),
            "ivec4" => GlslType::Vector(ScalarKind::Int, 4),
            "uvec2" => GlslType::Vector(ScalarKind::Uint, 2),
            "uvec3" => GlslType::Vector(ScalarKind::Uint, 3),
            "uvec4" => GlslType::Vector(ScalarKind::Uint, 4),
            "bvec2" => GlslType::Vector(ScalarKind::Bool, 2),
            "bvec3" => GlslType::Vector(ScalarKind::Bool, 3),
            "bvec4" => GlslType::Vector(ScalarKind::Bool, 4),
            "mat2" | "mat2x2" => GlslType::Matrix { cols: 2, rows: 2 },
            "mat3" | "mat3x3" => GlslType::Matrix { cols: 3, rows: 3 },
            "mat4" | "mat4x4" => GlslType::Matrix { cols: 4, rows: 4 },
            "mat2x3" => GlslType::Matrix { cols: 2, rows: 3 },
            "mat2x4" => GlslType::Matrix { cols: 2, rows: 4 },
            "mat3x2" => GlslType::Matrix { cols: 3, rows: 2 },
            "mat3x4" => GlslType::Matrix { cols: 3, rows: 4 },
            "mat4x2" => GlslType::Matrix { cols: 4, rows: 2 },
            "mat4x3" => GlslType::Matrix { cols: 4, rows: 3 },
            "sampler2D" => GlslType::Sampler(SamplerKind::Sampler2D),
            "sampler3D" => GlslType::Sampler(SamplerKind::Sampler3D),
            "samplerCube" => GlslType::Sampler(SamplerKind::SamplerCube),
            _ => return None,
        };
        Some(ty)
    }

    /// Packed size in bytes. Opaque handles occupy 4 bytes.
    pub fn byte_size(&self) -> u32 {
        match self {
            GlslType::Void => 0,
            GlslType::Scalar(_) => 4,
            GlslType::Vector(_, n) => 4 * u32::from(*n),
            GlslType::Matrix { cols, rows } => 4 * u32::from(*cols) * u32::from(*rows),
            GlslType::Array(elem, count) => elem.byte_size() * count,
            GlslType::Struct(s) => s.members.iter().map(|m| m.ty.byte_size()).sum(),
            GlslType::Sampler(_) => 4,
        }
    }

    /// Total scalar component count in memory order.
    pub fn component_count(&self) -> u32 {
        match self {
            GlslType::Void => 0,
            GlslType::Scalar(_) | GlslType::Sampler(_) => 1,
            GlslType::Vector(_, n) => u32::from(*n),
            GlslType::Matrix { cols, rows } => u32::from(*cols) * u32::from(*rows),
            GlslType::Array(elem, count) => elem.component_count() * count,
            GlslType::Struct(s) => s.members.iter().map(|m| m.ty.component_count()).sum(),
        }
    }

    /// Per-component scalar kinds in memory order (column major for
    /// matrices, member order for structs).
    pub fn flat_scalar_kinds(&self) -> Vec<ScalarKind> {
        match self {
            GlslType::Void => Vec::new(),
            GlslType::Scalar(kind) => vec![*kind],
            GlslType::Vector(kind, n) => vec![*kind; usize::from(*n)],
            GlslType::Matrix { cols, rows } => {
                vec![ScalarKind::Float; usize::from(*cols) * usize::from(*rows)]
            }
            GlslType::Array(elem, count) => {
                let elem_kinds = elem.flat_scalar_kinds();
                let mut kinds = Vec::with_capacity(elem_kinds.len() * *count as usize);
                for _ in 0..*count {
                    kinds.extend_from_slice(&elem_kinds);
                }
                kinds
            }
            GlslType::Struct(s) => s
                .members
                .iter()
                .flat_map(|m| m.ty.flat_scalar_kinds())
                .collect(),
            GlslType::Sampler(_) => vec![ScalarKind::Int],
        }
    }

    /// Per-component WASM value types in memory order.
    pub fn flat_valtypes(&self) -> Vec<ValType> {
        self.flat_scalar_kinds()
            .into_iter()
            .map(ScalarKind::valtype)
            .collect()
    }

    /// The scalar kind shared by all components, for homogeneous types.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            GlslType::Scalar(kind) | GlslType::Vector(kind, _) => Some(*kind),
            GlslType::Matrix { .. } => Some(ScalarKind::Float),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, GlslType::Scalar(_))
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, GlslType::Vector(..))
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, GlslType::Matrix { .. })
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, GlslType::Sampler(_))
    }

    /// Integer scalar or vector (the kinds a varying must declare `flat`).
    pub fn is_integer_based(&self) -> bool {
        matches!(
            self.scalar_kind(),
            Some(ScalarKind::Int) | Some(ScalarKind::Uint)
        ) && !self.is_matrix()
    }

    /// The column type of a matrix.
    pub fn matrix_column(&self) -> Option<GlslType> {
        match self {
            GlslType::Matrix { rows, .. } => Some(GlslType::Vector(ScalarKind::Float, *rows)),
            _ => None,
        }
    }

    /// Element type yielded by `base[index]`.
    pub fn index_element(&self) -> Option<GlslType> {
        match self {
            GlslType::Vector(kind, _) => Some(GlslType::Scalar(*kind)),
            GlslType::Matrix { .. } => self.matrix_column(),
            GlslType::Array(elem, _) => Some((**elem).clone()),
            _ => None,
        }
    }

    /// Human-readable spelling for diagnostics.
    pub fn glsl_name(&self) -> String {
        match self {
            GlslType::Void => "void".to_string(),
            GlslType::Scalar(kind) => kind.glsl_name().to_string(),
            GlslType::Vector(kind, n) => format!("{}{}", kind.vector_prefix(), n),
            GlslType::Matrix { cols, rows } if cols == rows => format!("mat{cols}"),
            GlslType::Matrix { cols, rows } => format!("mat{cols}x{rows}"),
            GlslType::Array(elem, count) => format!("{}[{}]", elem.glsl_name(), count),
            GlslType::Struct(s) => s.name.clone(),
            GlslType::Sampler(kind) => kind.glsl_name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_sizes() {
        assert_eq!(GlslType::Scalar(ScalarKind::Float).byte_size(), 4);
        assert_eq!(GlslType::Vector(ScalarKind::Float, 3).byte_size(), 12);
        assert_eq!(GlslType::Matrix { cols: 4, rows: 4 }.byte_size(), 64);
        assert_eq!(GlslType::Matrix { cols: 3, rows: 2 }.byte_size(), 24);
        let arr = GlslType::Array(Box::new(GlslType::Scalar(ScalarKind::Float)), 4);
        assert_eq!(arr.byte_size(), 16);
    }

    #[test]
    fn struct_members_pack_without_padding() {
        let s = StructType {
            name: "Light".to_string(),
            members: vec![
                StructMember {
                    name: "dir".to_string(),
                    ty: GlslType::Vector(ScalarKind::Float, 3),
                },
                StructMember {
                    name: "intensity".to_string(),
                    ty: GlslType::Scalar(ScalarKind::Float),
                },
            ],
        };
        assert_eq!(s.member("dir").unwrap().0, 0);
        assert_eq!(s.member("intensity").unwrap().0, 12);
        assert_eq!(GlslType::Struct(Box::new(s)).byte_size(), 16);
    }

    #[test]
    fn flat_valtypes_mix_int_and_float() {
        let s = StructType {
            name: "Mix".to_string(),
            members: vec![
                StructMember {
                    name: "count".to_string(),
                    ty: GlslType::Scalar(ScalarKind::Int),
                },
                StructMember {
                    name: "weight".to_string(),
                    ty: GlslType::Scalar(ScalarKind::Float),
                },
            ],
        };
        let ty = GlslType::Struct(Box::new(s));
        assert_eq!(ty.flat_valtypes(), vec![ValType::I32, ValType::F32]);
    }

    #[test]
    fn keyword_lookup_covers_matrix_spellings() {
        assert_eq!(
            GlslType::from_keyword("mat3x2"),
            Some(GlslType::Matrix { cols: 3, rows: 2 })
        );
        assert_eq!(
            GlslType::from_keyword("mat2"),
            GlslType::from_keyword("mat2x2")
        );
        assert!(GlslType::from_keyword("double").is_none());
    }

    #[test]
    fn integer_vectors_require_flat() {
        assert!(GlslType::Vector(ScalarKind::Int, 4).is_integer_based());
        assert!(GlslType::Scalar(ScalarKind::Uint).is_integer_based());
        assert!(!GlslType::Vector(ScalarKind::Float, 4).is_integer_based());
    }
}
