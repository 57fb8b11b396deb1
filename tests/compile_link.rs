//! End-to-end compile and link scenarios, inspecting the emitted binaries
//! structurally with wasmparser.

use wasmparser::{CompositeInnerType, Operator, Parser, Payload, TypeRef, ValType};
use webgl2_shaderc::context::types::*;
use webgl2_shaderc::Context;

// ---------------------------------------------------------------------------
// binary inspection helpers
// ---------------------------------------------------------------------------

struct ModuleInfo {
    /// (params, results) of every defined (non-imported) function, in
    /// index order. The exported wrapper is always last.
    defined_signatures: Vec<(Vec<ValType>, Vec<ValType>)>,
    /// `global.set` counts per defined function, keyed by global index.
    frame_sp_sets: Vec<usize>,
    function_imports: Vec<String>,
    has_memory_import: bool,
    main_export_index: Option<u32>,
    import_func_count: u32,
}

fn inspect(bytes: &[u8]) -> ModuleInfo {
    let mut types = Vec::new();
    let mut func_type_indices = Vec::new();
    let mut info = ModuleInfo {
        defined_signatures: Vec::new(),
        frame_sp_sets: Vec::new(),
        function_imports: Vec::new(),
        has_memory_import: false,
        main_export_index: None,
        import_func_count: 0,
    };

    for payload in Parser::new(0).parse_all(bytes) {
        match payload.expect("module parses") {
            Payload::TypeSection(reader) => {
                for rec_group in reader {
                    for sub_type in rec_group.expect("type group").types() {
                        if let CompositeInnerType::Func(func_type) = &sub_type.composite_type.inner
                        {
                            types.push((
                                func_type.params().to_vec(),
                                func_type.results().to_vec(),
                            ));
                        }
                    }
                }
            }
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.expect("import entry");
                    match import.ty {
                        TypeRef::Func(_) => {
                            info.import_func_count += 1;
                            info.function_imports
                                .push(format!("{}.{}", import.module, import.name));
                        }
                        TypeRef::Memory(_) => {
                            if import.module == "env" && import.name == "memory" {
                                info.has_memory_import = true;
                            }
                        }
                        _ => {}
                    }
                }
            }
            Payload::FunctionSection(reader) => {
                for func in reader {
                    func_type_indices.push(func.expect("function entry"));
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.expect("export entry");
                    if export.name == "main" {
                        info.main_export_index = Some(export.index);
                    }
                }
            }
            Payload::CodeSectionEntry(body) => {
                let mut sets = 0usize;
                let mut reader = body.get_operators_reader().expect("operators");
                while !reader.eof() {
                    if let Operator::GlobalSet { global_index: 5 } =
                        reader.read().expect("operator")
                    {
                        sets += 1;
                    }
                }
                info.frame_sp_sets.push(sets);
            }
            _ => {}
        }
    }

    for type_idx in func_type_indices {
        info.defined_signatures
            .push(types[type_idx as usize].clone());
    }
    info
}

// ---------------------------------------------------------------------------
// fixture plumbing
// ---------------------------------------------------------------------------

fn compile(ctx: &mut Context, type_: u32, source: &str) -> u32 {
    let shader = ctx.create_shader(type_);
    ctx.shader_source(shader, source);
    ctx.compile_shader(shader);
    shader
}

fn link_sources(ctx: &mut Context, vs: &str, fs: &str) -> u32 {
    let vs = compile(ctx, GL_VERTEX_SHADER, vs);
    let fs = compile(ctx, GL_FRAGMENT_SHADER, fs);
    let program = ctx.create_program();
    ctx.attach_shader(program, vs);
    ctx.attach_shader(program, fs);
    ctx.link_program(program);
    program
}

const TRIVIAL_FS: &str =
    "#version 300 es\nprecision mediump float;\nout vec4 c;\nvoid main() { c = vec4(1.0); }";

// ---------------------------------------------------------------------------
// S1: trivial vertex + fragment pair
// ---------------------------------------------------------------------------

#[test]
fn s1_trivial_pair_links_with_canonical_entry() {
    let mut ctx = Context::new();
    let program = link_sources(
        &mut ctx,
        "#version 300 es\nvoid main(){gl_Position=vec4(0.0);}",
        TRIVIAL_FS,
    );
    assert_eq!(ctx.get_program_parameter(program, GL_LINK_STATUS), 1);

    let bytes = ctx.program_wasm(program, GL_VERTEX_SHADER).unwrap();
    assert_eq!(&bytes[0..4], &[0x00, 0x61, 0x73, 0x6D]);

    let info = inspect(bytes);
    assert!(info.has_memory_import);
    let export_idx = info.main_export_index.expect("main exported");
    let (params, results) =
        &info.defined_signatures[(export_idx - info.import_func_count) as usize];
    assert_eq!(params, &vec![ValType::I32; 6]);
    assert!(results.is_empty());
}

#[test]
fn math_builtin_imports_are_always_present() {
    let mut ctx = Context::new();
    let program = link_sources(
        &mut ctx,
        "#version 300 es\nvoid main(){gl_Position=vec4(0.0);}",
        TRIVIAL_FS,
    );
    let info = inspect(ctx.program_wasm(program, GL_VERTEX_SHADER).unwrap());
    for name in [
        "sin", "cos", "tan", "asin", "acos", "atan", "atan2", "exp", "exp2", "log", "log2",
        "pow", "sinh", "cosh", "tanh", "asinh", "acosh", "atanh",
    ] {
        assert!(
            info.function_imports.contains(&format!("env.{name}")),
            "missing math import {name}"
        );
    }
    assert!(!info
        .function_imports
        .contains(&"env.texture_sample".to_string()));
}

#[test]
fn sampler_shaders_import_the_texture_callback() {
    let mut ctx = Context::new();
    let program = link_sources(
        &mut ctx,
        "#version 300 es\nout vec2 v_uv;\nvoid main(){v_uv=vec2(0.5);gl_Position=vec4(0.0);}",
        "#version 300 es\nprecision mediump float;\nuniform sampler2D u_tex;\nin vec2 v_uv;\nout vec4 c;\nvoid main(){c=texture(u_tex,v_uv);}",
    );
    assert_eq!(ctx.get_program_parameter(program, GL_LINK_STATUS), 1);
    let info = inspect(ctx.program_wasm(program, GL_FRAGMENT_SHADER).unwrap());
    assert!(info
        .function_imports
        .contains(&"env.texture_sample".to_string()));
}

// ---------------------------------------------------------------------------
// S2: duplicate explicit attribute locations
// ---------------------------------------------------------------------------

#[test]
fn s2_duplicate_location_fails_the_link() {
    let mut ctx = Context::new();
    let program = link_sources(
        &mut ctx,
        "#version 300 es\nlayout(location=0) in vec4 a;\nlayout(location=0) in vec4 b;\nvoid main(){gl_Position=a+b;}",
        TRIVIAL_FS,
    );
    assert_eq!(ctx.get_program_parameter(program, GL_LINK_STATUS), 0);
    assert!(ctx
        .get_program_info_log(program)
        .contains("bound to location"));
}

// ---------------------------------------------------------------------------
// S3: integer varyings must be flat
// ---------------------------------------------------------------------------

#[test]
fn s3_non_flat_integer_varying_fails_type_check() {
    let mut ctx = Context::new();
    let fs = compile(
        &mut ctx,
        GL_FRAGMENT_SHADER,
        "#version 300 es\nprecision mediump float;\nin int v;\nout vec4 c;\nvoid main(){c=vec4(v);}",
    );
    assert_eq!(ctx.get_shader_parameter(fs, GL_COMPILE_STATUS), 0);
    let log = ctx.get_shader_info_log(fs);
    assert!(log.starts_with("ERROR:"));
    assert!(log.contains("flat"));
}

// ---------------------------------------------------------------------------
// S4: flat ivec4 varying round trip
// ---------------------------------------------------------------------------

#[test]
fn s4_flat_ivec4_varying_links_with_shared_offsets() {
    let mut ctx = Context::new();
    let program = link_sources(
        &mut ctx,
        "#version 300 es\nflat out ivec4 v;\nvoid main(){v=ivec4(-1,2,-3,4);gl_Position=vec4(0.0);}",
        "#version 300 es\nprecision mediump float;\nflat in ivec4 v;\nout vec4 c;\nvoid main(){\n  if (v == ivec4(-1,2,-3,4)) { c = vec4(0.0,1.0,0.0,1.0); } else { c = vec4(1.0,0.0,0.0,1.0); }\n}",
    );
    assert_eq!(
        ctx.get_program_parameter(program, GL_LINK_STATUS),
        1,
        "log: {}",
        ctx.get_program_info_log(program)
    );
    let tables = ctx.program_link_tables(program).unwrap();
    let varying = tables.varyings.iter().find(|v| v.name == "v").unwrap();
    // Location 0 sits after the gl_Position and point slots.
    assert_eq!(varying.location, 0);
    assert_eq!(varying.offset, 32);
}

// ---------------------------------------------------------------------------
// S5: the 16-byte array boundary
// ---------------------------------------------------------------------------

#[test]
fn s5_float_array_of_four_flattens_and_is_stable() {
    let vs = "#version 300 es\nfloat sumArray(float arr[4]) {\n  float s = 0.0;\n  for (int i = 0; i < 4; i++) { s += arr[i]; }\n  return s;\n}\nvoid main(){\n  float data[4];\n  data[0]=1.0; data[1]=2.0; data[2]=3.0; data[3]=4.0;\n  gl_Position = vec4(sumArray(data));\n}";

    let mut ctx = Context::new();
    let program = link_sources(&mut ctx, vs, TRIVIAL_FS);
    assert_eq!(
        ctx.get_program_parameter(program, GL_LINK_STATUS),
        1,
        "log: {}",
        ctx.get_program_info_log(program)
    );
    let first = ctx.program_wasm(program, GL_VERTEX_SHADER).unwrap().to_vec();

    // The array parameter sits exactly on the threshold and flattens:
    // four f32 lanes, no pointer.
    let info = inspect(&first);
    let (params, results) = &info.defined_signatures[0];
    assert_eq!(params, &vec![ValType::F32; 4]);
    assert_eq!(results, &vec![ValType::F32]);

    // Stable across runs.
    let mut ctx2 = Context::new();
    let program2 = link_sources(&mut ctx2, vs, TRIVIAL_FS);
    let second = ctx2.program_wasm(program2, GL_VERTEX_SHADER).unwrap();
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// S6: mat4 parameters are framed
// ---------------------------------------------------------------------------

const S6_VS: &str = "#version 300 es\nuniform mat4 u_m;\nin vec4 a;\nvec4 transformVector(mat4 m, vec4 v) { return m * v; }\nvoid main(){ gl_Position = transformVector(u_m, a); }";

#[test]
fn s6_mat4_parameter_forces_frame_pointer() {
    let mut ctx = Context::new();
    let program = link_sources(&mut ctx, S6_VS, TRIVIAL_FS);
    assert_eq!(
        ctx.get_program_parameter(program, GL_LINK_STATUS),
        1,
        "log: {}",
        ctx.get_program_info_log(program)
    );
    let info = inspect(ctx.program_wasm(program, GL_VERTEX_SHADER).unwrap());
    // transformVector is the first defined function: i32 frame pointer
    // for the mat4, then four flattened f32 lanes for the vec4.
    let (params, results) = &info.defined_signatures[0];
    assert_eq!(
        params,
        &vec![
            ValType::I32,
            ValType::F32,
            ValType::F32,
            ValType::F32,
            ValType::F32
        ]
    );
    assert_eq!(results, &vec![ValType::F32; 4]);
}

#[test]
fn frame_stack_pointer_writes_pair_up() {
    let mut ctx = Context::new();
    let program = link_sources(&mut ctx, S6_VS, TRIVIAL_FS);
    let info = inspect(ctx.program_wasm(program, GL_VERTEX_SHADER).unwrap());
    // Every defined function except the exported wrapper (which seeds the
    // globals once) balances its frame-SP bumps.
    let body_count = info.frame_sp_sets.len();
    for (idx, sets) in info.frame_sp_sets[..body_count - 1].iter().enumerate() {
        assert_eq!(sets % 2, 0, "function {idx} has unbalanced frame-SP writes");
    }
    // The call site in main allocates and releases once.
    assert!(info.frame_sp_sets[body_count - 2] >= 2);
}

// ---------------------------------------------------------------------------
// determinism and info-log properties
// ---------------------------------------------------------------------------

#[test]
fn compiling_twice_is_bit_identical() {
    let source = "#version 300 es\nin vec4 a;\nuniform mat4 u;\nout vec2 v;\nvoid main(){v=a.xy;gl_Position=u*a;}";
    let mut ctx = Context::new();
    let first = compile(&mut ctx, GL_VERTEX_SHADER, source);
    let second = compile(&mut ctx, GL_VERTEX_SHADER, source);
    let first_bytes = ctx.shader_module(first).unwrap().bytes.clone();
    let second_bytes = ctx.shader_module(second).unwrap().bytes.clone();
    assert_eq!(first_bytes, second_bytes);
}

#[test]
fn info_log_round_trip() {
    let mut ctx = Context::new();
    let good = compile(
        &mut ctx,
        GL_VERTEX_SHADER,
        "#version 300 es\nvoid main(){gl_Position=vec4(0.0);}",
    );
    assert_eq!(ctx.get_shader_parameter(good, GL_COMPILE_STATUS), 1);
    assert!(!ctx
        .get_shader_info_log(good)
        .lines()
        .any(|l| l.starts_with("ERROR:")));

    let bad = compile(
        &mut ctx,
        GL_VERTEX_SHADER,
        "#version 300 es\nvoid main(){gl_Position=vec4(0.0)}",
    );
    assert_eq!(ctx.get_shader_parameter(bad, GL_COMPILE_STATUS), 0);
    let log = ctx.get_shader_info_log(bad);
    assert!(log.lines().any(|l| l.starts_with("ERROR:")));
    // Position suffix: line:col of the offending token.
    assert!(log.trim_end().rsplit(' ').next().unwrap().contains(':'));
}

#[test]
fn bind_attrib_location_applies_before_link() {
    let mut ctx = Context::new();
    let vs = compile(
        &mut ctx,
        GL_VERTEX_SHADER,
        "#version 300 es\nin vec4 a_pos;\nin vec3 a_normal;\nvoid main(){gl_Position=a_pos+vec4(a_normal,0.0);}",
    );
    let fs = compile(&mut ctx, GL_FRAGMENT_SHADER, TRIVIAL_FS);
    let program = ctx.create_program();
    ctx.attach_shader(program, vs);
    ctx.attach_shader(program, fs);
    ctx.bind_attrib_location(program, 5, "a_normal");
    ctx.link_program(program);
    assert_eq!(ctx.get_program_parameter(program, GL_LINK_STATUS), 1);
    assert_eq!(ctx.get_attrib_location(program, "a_normal"), 5);
    assert_eq!(ctx.get_attrib_location(program, "a_pos"), 0);
}

#[test]
fn control_flow_and_builtins_compile() {
    let mut ctx = Context::new();
    let program = link_sources(
        &mut ctx,
        "#version 300 es\nin vec3 a_dir;\nout vec3 v_color;\nvoid main() {\n  vec3 n = normalize(a_dir);\n  float acc = 0.0;\n  for (int i = 0; i < 8; i++) {\n    if (acc > 3.0) { break; }\n    acc += clamp(dot(n, vec3(0.0, 1.0, 0.0)), 0.0, 1.0);\n  }\n  v_color = mix(vec3(0.1), abs(n), fract(acc));\n  gl_Position = vec4(n * sin(acc), 1.0);\n}",
        "#version 300 es\nprecision mediump float;\nin vec3 v_color;\nout vec4 c;\nvoid main() {\n  float g = pow(max(v_color.y, 0.0), 2.2);\n  c = vec4(v_color.x, g, v_color.z, 1.0);\n}",
    );
    assert_eq!(
        ctx.get_program_parameter(program, GL_LINK_STATUS),
        1,
        "log: {}",
        ctx.get_program_info_log(program)
    );
}

#[test]
fn discard_compiles_in_fragment_shaders() {
    let mut ctx = Context::new();
    let program = link_sources(
        &mut ctx,
        "#version 300 es\nout vec2 v_uv;\nvoid main(){v_uv=vec2(0.0);gl_Position=vec4(0.0);}",
        "#version 300 es\nprecision mediump float;\nin vec2 v_uv;\nout vec4 c;\nvoid main(){\n  if (v_uv.x < 0.5) { discard; }\n  c = vec4(1.0);\n}",
    );
    assert_eq!(
        ctx.get_program_parameter(program, GL_LINK_STATUS),
        1,
        "log: {}",
        ctx.get_program_info_log(program)
    );
}

#[test]
fn struct_uniforms_and_functions_round_trip() {
    let mut ctx = Context::new();
    let program = link_sources(
        &mut ctx,
        "#version 300 es\nstruct Light { vec3 dir; float power; };\nuniform Light u_light;\nin vec3 a_n;\nout float v_l;\nfloat lambert(Light l, vec3 n) { return max(dot(l.dir, n), 0.0) * l.power; }\nvoid main(){ v_l = lambert(u_light, a_n); gl_Position = vec4(a_n, 1.0); }",
        "#version 300 es\nprecision mediump float;\nin float v_l;\nout vec4 c;\nvoid main(){ c = vec4(v_l); }",
    );
    assert_eq!(
        ctx.get_program_parameter(program, GL_LINK_STATUS),
        1,
        "log: {}",
        ctx.get_program_info_log(program)
    );
}
