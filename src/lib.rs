//! WebGL2 shader compilation and linking core.
//!
//! Compiles GLSL ES 3.00 shader source to WebAssembly modules, links
//! vertex and fragment shaders into a program, and exposes the compiled
//! bytes plus the layout tables a software rasterizer consumes at draw
//! time.
//!
//! # Modules
//!
//! - [`glsl`] - GLSL ES 3.00 frontend: lexer, parser, type checker
//! - [`wasm_backend`] - ABI classification, memory planning, WASM emission
//! - [`linker`] - vertex/fragment program linking and layout tables
//! - [`context`] - the handle-based shader/program facade
//!
//! # Pipeline
//!
//! Compilation is deterministic (parse, type-check, classify, emit,
//! serialize); compiling the same source twice produces bit-identical
//! bytes. Every compiled module exports `main` with the fixed signature
//! `(i32, i32, i32, i32, i32, i32) -> ()`: the six base pointers for the
//! attribute, uniform, varying, private, and texture regions plus the
//! frame stack pointer.

pub mod context;
pub mod error;
pub mod glsl;
pub mod linker;
pub mod wasm_backend;

pub use context::Context;
pub use error::{CompileError, LinkError};
pub use glsl::ShaderStage;
pub use linker::{LinkTables, LinkedProgram};
pub use wasm_backend::{BackendConfig, CompiledModule};
