//! GLSL ES 3.00 frontend: lexer, parser, and type checker.
//!
//! The frontend turns shader source into a typed translation unit plus a
//! symbol table; the WASM backend consumes both.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod symbols;
pub mod typecheck;
pub mod types;

pub use symbols::ShaderStage;
pub use typecheck::TypedShader;
