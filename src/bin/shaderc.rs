//! Native inspection tool: compile a vertex/fragment pair and dump the
//! compiled WASM, the WAT rendering, and the link tables.
//!
//! Gated behind the `cli` feature; the library itself stays free of
//! binary-only dependencies.

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use webgl2_shaderc::context::types::{
    GL_COMPILE_STATUS, GL_FRAGMENT_SHADER, GL_LINK_STATUS, GL_VERTEX_SHADER,
};
use webgl2_shaderc::Context;

/// Compile and link a GLSL ES 3.00 shader pair.
#[derive(Parser)]
#[command(name = "shaderc", version, about)]
struct Args {
    /// Vertex shader source file.
    vertex: PathBuf,
    /// Fragment shader source file.
    fragment: PathBuf,
    /// Write the linked modules next to the inputs as .wasm files.
    #[arg(long)]
    emit_wasm: bool,
    /// Print the WAT rendering of both modules.
    #[arg(long)]
    wat: bool,
    /// Print the link tables as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let args = Args::parse();
    let vs_source = fs::read_to_string(&args.vertex)
        .with_context(|| format!("reading {}", args.vertex.display()))?;
    let fs_source = fs::read_to_string(&args.fragment)
        .with_context(|| format!("reading {}", args.fragment.display()))?;

    let mut ctx = Context::new();
    let vs = ctx.create_shader(GL_VERTEX_SHADER);
    ctx.shader_source(vs, &vs_source);
    ctx.compile_shader(vs);
    if ctx.get_shader_parameter(vs, GL_COMPILE_STATUS) == 0 {
        bail!("vertex shader failed:\n{}", ctx.get_shader_info_log(vs));
    }

    let fs = ctx.create_shader(GL_FRAGMENT_SHADER);
    ctx.shader_source(fs, &fs_source);
    ctx.compile_shader(fs);
    if ctx.get_shader_parameter(fs, GL_COMPILE_STATUS) == 0 {
        bail!("fragment shader failed:\n{}", ctx.get_shader_info_log(fs));
    }

    let program = ctx.create_program();
    ctx.attach_shader(program, vs);
    ctx.attach_shader(program, fs);
    ctx.link_program(program);
    if ctx.get_program_parameter(program, GL_LINK_STATUS) == 0 {
        bail!("link failed:\n{}", ctx.get_program_info_log(program));
    }

    let vs_bytes = ctx
        .program_wasm(program, GL_VERTEX_SHADER)
        .expect("linked program has vertex bytes")
        .to_vec();
    let fs_bytes = ctx
        .program_wasm(program, GL_FRAGMENT_SHADER)
        .expect("linked program has fragment bytes")
        .to_vec();
    println!(
        "linked: vertex {} bytes, fragment {} bytes",
        vs_bytes.len(),
        fs_bytes.len()
    );

    if args.emit_wasm {
        let vs_out = args.vertex.with_extension("wasm");
        let fs_out = args.fragment.with_extension("wasm");
        fs::write(&vs_out, &vs_bytes)?;
        fs::write(&fs_out, &fs_bytes)?;
        println!("wrote {} and {}", vs_out.display(), fs_out.display());
    }

    if args.wat {
        println!(";; vertex\n{}", wasmprinter::print_bytes(&vs_bytes)?);
        println!(";; fragment\n{}", wasmprinter::print_bytes(&fs_bytes)?);
    }

    if args.json {
        let tables = ctx
            .program_link_tables(program)
            .expect("linked program has tables");
        println!("{}", serde_json::to_string_pretty(tables)?);
    }

    Ok(())
}
