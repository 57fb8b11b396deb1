//! Host math builtin imports.
//!
//! Every compiled module imports the same fixed set of math functions from
//! `env`, whether or not the shader calls them. The host supplies all of
//! them, which keeps the import shape identical across modules. Builtins
//! with native WASM opcodes (sqrt, abs, floor, min, ...) are lowered
//! inline and never imported.

/// The fixed math import set, in import order. Arity 1 means f32 -> f32,
/// arity 2 means (f32, f32) -> f32.
pub const MATH_IMPORTS: &[(&str, u8)] = &[
    ("sin", 1),
    ("cos", 1),
    ("tan", 1),
    ("asin", 1),
    ("acos", 1),
    ("atan", 1),
    ("atan2", 2),
    ("exp", 1),
    ("exp2", 1),
    ("log", 1),
    ("log2", 1),
    ("pow", 2),
    ("sinh", 1),
    ("cosh", 1),
    ("tanh", 1),
    ("asinh", 1),
    ("acosh", 1),
    ("atanh", 1),
];

/// Import name of the optional texture sampling callback:
/// `(unit: i32, s: f32, t: f32, r: f32) -> (f32, f32, f32, f32)`.
pub const TEXTURE_SAMPLE_IMPORT: &str = "texture_sample";

/// Function index of a math import within the module's import space.
pub fn math_import_index(name: &str) -> Option<u32> {
    MATH_IMPORTS
        .iter()
        .position(|(n, _)| *n == name)
        .map(|i| i as u32)
}

/// Map a GLSL builtin call to the math import implementing one scalar
/// lane, together with its arity. Returns `None` for builtins lowered
/// inline.
pub fn import_for_builtin(name: &str, arg_count: usize) -> Option<(&'static str, u8)> {
    let import = match name {
        "sin" | "cos" | "tan" | "asin" | "acos" | "exp" | "exp2" | "log" | "log2" | "sinh"
        | "cosh" | "tanh" | "asinh" | "acosh" | "atanh" => name,
        "atan" if arg_count == 1 => "atan",
        "atan" if arg_count == 2 => "atan2",
        "pow" => "pow",
        _ => return None,
    };
    MATH_IMPORTS
        .iter()
        .find(|(n, _)| *n == import)
        .map(|(n, arity)| (*n, *arity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_table_is_the_documented_set() {
        assert_eq!(MATH_IMPORTS.len(), 18);
        assert_eq!(math_import_index("sin"), Some(0));
        assert_eq!(math_import_index("atan2"), Some(6));
        assert_eq!(math_import_index("atanh"), Some(17));
        assert_eq!(math_import_index("sqrt"), None, "sqrt is a native opcode");
    }

    #[test]
    fn atan_dispatches_on_arity() {
        assert_eq!(import_for_builtin("atan", 1), Some(("atan", 1)));
        assert_eq!(import_for_builtin("atan", 2), Some(("atan2", 2)));
    }

    #[test]
    fn inline_builtins_have_no_import() {
        for name in ["sqrt", "floor", "fract", "mix", "clamp", "dot", "normalize"] {
            assert_eq!(import_for_builtin(name, 1), None);
        }
    }
}
