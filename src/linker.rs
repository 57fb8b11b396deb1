//! Program linking.
//!
//! The linker is the sole authority that crosses module boundaries: it
//! resolves attribute locations, matches fragment inputs against vertex
//! outputs, merges the uniform tables, then re-emits both modules against
//! the resolved joint maps so they agree byte for byte on the shared
//! memory layout.

use crate::error::LinkError;
use crate::glsl::ast::Interpolation;
use crate::glsl::symbols::{AttributeInfo, SymbolTable, UniformInfo, UniformKind};
use crate::glsl::types::GlslType;
use crate::wasm_backend::emitter::LocationMaps;
use crate::wasm_backend::memory_layout::{
    self, attribute_location_span, RegionLayout, MAX_ATTRIBUTE_LOCATIONS, MAX_VARYINGS,
};
use crate::wasm_backend::{reemit, BackendConfig, CompiledModule};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Inputs to one link: both compiled modules plus the pre-link
/// `bindAttribLocation` hints.
pub struct LinkInputs<'a> {
    pub vertex: &'a CompiledModule,
    pub fragment: &'a CompiledModule,
    pub attribute_bindings: &'a HashMap<String, u32>,
}

/// One resolved attribute: location and byte offset in the attribute
/// region.
#[derive(Debug, Clone, Serialize)]
pub struct AttributeSlot {
    pub name: String,
    pub ty: GlslType,
    pub location: u32,
    pub offset: u32,
}

/// One resolved uniform: opaque location and byte offset in the uniform
/// region.
#[derive(Debug, Clone, Serialize)]
pub struct UniformSlot {
    pub name: String,
    pub ty: GlslType,
    pub array_size: Option<u32>,
    pub kind: UniformKind,
    pub location: u32,
    pub offset: u32,
}

/// One resolved varying: shared location and byte offset in the varying
/// region.
#[derive(Debug, Clone, Serialize)]
pub struct VaryingSlot {
    pub name: String,
    pub ty: GlslType,
    pub interpolation: Interpolation,
    pub location: u32,
    pub offset: u32,
}

/// The layout tables a linked program exposes to the rasterizer.
#[derive(Debug, Clone, Serialize)]
pub struct LinkTables {
    pub attributes: Vec<AttributeSlot>,
    pub uniforms: Vec<UniformSlot>,
    pub varyings: Vec<VaryingSlot>,
    pub region_layout: RegionLayout,
}

impl LinkTables {
    pub fn attribute_location(&self, name: &str) -> Option<u32> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.location)
    }

    pub fn uniform_location(&self, name: &str) -> Option<u32> {
        self.uniforms
            .iter()
            .find(|u| u.name == name)
            .map(|u| u.location)
    }

    pub fn varying_offset(&self, name: &str) -> Option<u32> {
        self.varyings
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.offset)
    }
}

/// A successfully linked program: final bytes for both stages plus the
/// resolved layout tables. Locations are immutable from here on.
#[derive(Debug, Clone)]
pub struct LinkedProgram {
    pub vertex_bytes: Vec<u8>,
    pub fragment_bytes: Vec<u8>,
    pub tables: LinkTables,
}

/// Link one vertex/fragment pair.
pub fn link(inputs: &LinkInputs<'_>, config: &BackendConfig) -> Result<LinkedProgram, LinkError> {
    let vs_symbols = inputs.vertex.symbols();
    let fs_symbols = inputs.fragment.symbols();
    tracing::debug!(
        attributes = vs_symbols.attributes.len(),
        varyings = vs_symbols.varyings.len(),
        "linking program"
    );

    let attributes = resolve_attributes(&vs_symbols.attributes, inputs.attribute_bindings)?;
    let varyings = resolve_varyings(vs_symbols, fs_symbols)?;
    let uniforms = resolve_uniforms(vs_symbols, fs_symbols)?;

    let attribute_map: BTreeMap<String, u32> = attributes
        .iter()
        .map(|a| (a.name.clone(), a.location))
        .collect();
    let varying_map: BTreeMap<String, u32> = varyings
        .iter()
        .map(|v| (v.name.clone(), v.location))
        .collect();
    let uniform_map: BTreeMap<String, u32> = uniforms
        .iter()
        .map(|u| (u.name.clone(), u.location))
        .collect();
    let maps = LocationMaps {
        attributes: &attribute_map,
        uniforms: &uniform_map,
        varyings: &varying_map,
    };

    let vertex_bytes = reemit_stage(inputs.vertex, &maps, config)?;
    let fragment_bytes = reemit_stage(inputs.fragment, &maps, config)?;

    tracing::debug!(
        vs_bytes = vertex_bytes.len(),
        fs_bytes = fragment_bytes.len(),
        "program linked"
    );

    Ok(LinkedProgram {
        vertex_bytes,
        fragment_bytes,
        tables: LinkTables {
            attributes,
            uniforms,
            varyings,
            region_layout: RegionLayout::default(),
        },
    })
}

fn reemit_stage(
    module: &CompiledModule,
    maps: &LocationMaps<'_>,
    config: &BackendConfig,
) -> Result<Vec<u8>, LinkError> {
    reemit(module, maps, config).map_err(|e| {
        if e.is_internal() {
            // Self-check violations are compiler bugs; abort loudly.
            panic!("{e}");
        }
        LinkError::Emit(e.to_string())
    })
}

/// Attribute resolution: explicit layout locations first, then
/// `bindAttribLocation` hints, then dense packing into unused slots.
/// Explicit collisions fail the link.
fn resolve_attributes(
    attributes: &[AttributeInfo],
    bindings: &HashMap<String, u32>,
) -> Result<Vec<AttributeSlot>, LinkError> {
    let mut owner: Vec<Option<&str>> = vec![None; MAX_ATTRIBUTE_LOCATIONS as usize];
    let mut resolved: BTreeMap<String, u32> = BTreeMap::new();

    // Pass 1: explicit layout qualifiers, then bindAttribLocation hints
    // for attributes without one.
    for hints in [false, true] {
        for attr in attributes {
            let location = if hints {
                if resolved.contains_key(&attr.name) {
                    continue;
                }
                bindings.get(&attr.name).copied()
            } else {
                attr.location
            };
            let Some(location) = location else { continue };
            let span = attribute_location_span(&attr.ty);
            if location + span > MAX_ATTRIBUTE_LOCATIONS {
                return Err(LinkError::ResourceLimit(format!(
                    "attribute '{}' at location {} exceeds the {} attribute locations",
                    attr.name, location, MAX_ATTRIBUTE_LOCATIONS
                )));
            }
            for s in 0..span {
                let slot = &mut owner[(location + s) as usize];
                if let Some(other) = slot {
                    return Err(LinkError::AttributeCollision {
                        first: (*other).to_string(),
                        second: attr.name.clone(),
                        location: location + s,
                    });
                }
                *slot = Some(attr.name.as_str());
            }
            resolved.insert(attr.name.clone(), location);
        }
    }

    // Pass 2: pack the rest into unused slots in declaration order.
    for attr in attributes {
        if resolved.contains_key(&attr.name) {
            continue;
        }
        let span = attribute_location_span(&attr.ty);
        let mut candidate = 0u32;
        let location = loop {
            if candidate + span > MAX_ATTRIBUTE_LOCATIONS {
                return Err(LinkError::ResourceLimit(format!(
                    "no free location for attribute '{}' ({} locations available)",
                    attr.name, MAX_ATTRIBUTE_LOCATIONS
                )));
            }
            if (0..span).all(|s| owner[(candidate + s) as usize].is_none()) {
                break candidate;
            }
            candidate += 1;
        };
        for s in 0..span {
            owner[(location + s) as usize] = Some(attr.name.as_str());
        }
        resolved.insert(attr.name.clone(), location);
    }

    Ok(attributes
        .iter()
        .map(|attr| {
            let location = resolved[&attr.name];
            AttributeSlot {
                name: attr.name.clone(),
                ty: attr.ty.clone(),
                location,
                offset: memory_layout::attribute_offset(location),
            }
        })
        .collect())
}

/// Varying matching: every fragment input must name a vertex output with
/// identical type and interpolation. Locations come from the vertex side
/// (explicit first, then dense packing); an explicit fragment location
/// must agree.
fn resolve_varyings(
    vs: &SymbolTable,
    fs: &SymbolTable,
) -> Result<Vec<VaryingSlot>, LinkError> {
    // Validate explicit vertex locations are unique.
    let mut explicit: HashMap<u32, &str> = HashMap::new();
    for varying in &vs.varyings {
        if let Some(location) = varying.location {
            if let Some(other) = explicit.insert(location, &varying.name) {
                return Err(LinkError::VaryingMismatch(format!(
                    "Varyings '{}' and '{}' are both assigned location {}",
                    other, varying.name, location
                )));
            }
        }
    }

    let locations = memory_layout::pack_varying_locations(&vs.varyings);

    for varying in &vs.varyings {
        let location = locations[&varying.name];
        if location >= MAX_VARYINGS {
            return Err(LinkError::ResourceLimit(format!(
                "varying '{}' exceeds the {} varying locations",
                varying.name, MAX_VARYINGS
            )));
        }
    }

    for input in &fs.varyings {
        let Some(output) = vs.varying(&input.name) else {
            return Err(LinkError::VaryingMismatch(format!(
                "Varying '{}' is read by the fragment shader but not written by the vertex shader",
                input.name
            )));
        };
        if output.ty != input.ty {
            return Err(LinkError::VaryingMismatch(format!(
                "Varying '{}' has type {} in the vertex shader but {} in the fragment shader",
                input.name,
                output.ty.glsl_name(),
                input.ty.glsl_name()
            )));
        }
        if output.interpolation != input.interpolation {
            return Err(LinkError::VaryingMismatch(format!(
                "Varying '{}' has mismatched interpolation qualifiers between stages",
                input.name
            )));
        }
        if let Some(frag_location) = input.location {
            if frag_location != locations[&input.name] {
                return Err(LinkError::VaryingMismatch(format!(
                    "Varying '{}' is assigned location {} in the fragment shader but {} by the vertex stage",
                    input.name, frag_location, locations[&input.name]
                )));
            }
        }
    }

    Ok(vs
        .varyings
        .iter()
        .map(|varying| {
            let location = locations[&varying.name];
            VaryingSlot {
                name: varying.name.clone(),
                ty: varying.ty.clone(),
                interpolation: varying.interpolation,
                location,
                offset: memory_layout::varying_offset(location),
            }
        })
        .collect())
}

/// Merge the uniform tables: same name across stages must agree on type;
/// locations are assigned densely, vertex declarations first.
fn resolve_uniforms(
    vs: &SymbolTable,
    fs: &SymbolTable,
) -> Result<Vec<UniformSlot>, LinkError> {
    let mut merged: Vec<&UniformInfo> = Vec::new();
    for uniform in &vs.uniforms {
        merged.push(uniform);
    }
    for uniform in &fs.uniforms {
        if let Some(existing) = vs.uniform(&uniform.name) {
            let same = existing.ty == uniform.ty
                && existing.array_size == uniform.array_size
                && existing.kind == uniform.kind;
            if !same {
                return Err(LinkError::UniformMismatch(format!(
                    "Uniform '{}' is declared with different types in the vertex and fragment shaders",
                    uniform.name
                )));
            }
        } else {
            merged.push(uniform);
        }
    }

    let locations = memory_layout::assign_uniform_slots(merged.iter().copied())?;

    Ok(merged
        .into_iter()
        .map(|uniform| {
            let location = locations[&uniform.name];
            UniformSlot {
                name: uniform.name.clone(),
                ty: uniform.ty.clone(),
                array_size: uniform.array_size,
                kind: uniform.kind,
                location,
                offset: memory_layout::uniform_offset(location),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glsl::symbols::ShaderStage;
    use crate::wasm_backend::compile;
    use std::sync::Arc;

    fn compile_pair(vs_body: &str, fs_body: &str) -> (Arc<CompiledModule>, Arc<CompiledModule>) {
        let config = BackendConfig::default();
        let vs = compile(
            ShaderStage::Vertex,
            &format!("#version 300 es\n{vs_body}"),
            &config,
        )
        .expect("vertex shader should compile");
        let fs = compile(
            ShaderStage::Fragment,
            &format!("#version 300 es\nprecision mediump float;\n{fs_body}"),
            &config,
        )
        .expect("fragment shader should compile");
        (vs, fs)
    }

    fn link_pair(vs_body: &str, fs_body: &str) -> Result<LinkedProgram, LinkError> {
        let (vs, fs) = compile_pair(vs_body, fs_body);
        let bindings = HashMap::new();
        link(
            &LinkInputs {
                vertex: &vs,
                fragment: &fs,
                attribute_bindings: &bindings,
            },
            &BackendConfig::default(),
        )
    }

    #[test]
    fn trivial_pair_links() {
        let program = link_pair(
            "void main() { gl_Position = vec4(0.0); }",
            "out vec4 c; void main() { c = vec4(1.0); }",
        )
        .unwrap();
        assert_eq!(&program.vertex_bytes[0..4], b"\0asm");
        assert_eq!(&program.fragment_bytes[0..4], b"\0asm");
        assert!(program.tables.varyings.is_empty());
    }

    #[test]
    fn duplicate_explicit_locations_fail() {
        let err = link_pair(
            "layout(location = 0) in vec4 a;\nlayout(location = 0) in vec4 b;\nvoid main() { gl_Position = a + b; }",
            "out vec4 c; void main() { c = vec4(1.0); }",
        )
        .unwrap_err();
        assert!(err.info_log_line().contains("bound to location"));
    }

    #[test]
    fn matrix_attribute_spans_collide() {
        let err = link_pair(
            "layout(location = 0) in mat4 m;\nlayout(location = 3) in vec4 a;\nvoid main() { gl_Position = m * a; }",
            "out vec4 c; void main() { c = vec4(1.0); }",
        )
        .unwrap_err();
        assert!(err.info_log_line().contains("bound to location 3"));
    }

    #[test]
    fn unassigned_attributes_pack_into_free_slots() {
        let program = link_pair(
            "layout(location = 0) in vec4 a;\nin vec2 b;\nvoid main() { gl_Position = a + vec4(b, 0.0, 1.0); }",
            "out vec4 c; void main() { c = vec4(1.0); }",
        )
        .unwrap();
        assert_eq!(program.tables.attribute_location("a"), Some(0));
        assert_eq!(program.tables.attribute_location("b"), Some(1));
        let b = program.tables.attributes.iter().find(|x| x.name == "b").unwrap();
        assert_eq!(b.offset, 64);
    }

    #[test]
    fn bind_attrib_location_hint_is_honored() {
        let (vs, fs) = compile_pair(
            "in vec4 a_pos;\nvoid main() { gl_Position = a_pos; }",
            "out vec4 c; void main() { c = vec4(1.0); }",
        );
        let mut bindings = HashMap::new();
        bindings.insert("a_pos".to_string(), 7);
        let program = link(
            &LinkInputs {
                vertex: &vs,
                fragment: &fs,
                attribute_bindings: &bindings,
            },
            &BackendConfig::default(),
        )
        .unwrap();
        assert_eq!(program.tables.attribute_location("a_pos"), Some(7));
    }

    #[test]
    fn fragment_input_without_vertex_output_fails() {
        let err = link_pair(
            "void main() { gl_Position = vec4(0.0); }",
            "in vec2 v_uv; out vec4 c; void main() { c = vec4(v_uv, 0.0, 1.0); }",
        )
        .unwrap_err();
        assert!(err.to_string().contains("not written by the vertex shader"));
    }

    #[test]
    fn varying_type_mismatch_fails() {
        let err = link_pair(
            "out vec3 v_color; void main() { v_color = vec3(1.0); gl_Position = vec4(0.0); }",
            "in vec2 v_color; out vec4 c; void main() { c = vec4(v_color, 0.0, 1.0); }",
        )
        .unwrap_err();
        assert!(err.to_string().contains("vec3"));
        assert!(err.to_string().contains("vec2"));
    }

    #[test]
    fn interpolation_mismatch_fails() {
        let err = link_pair(
            "flat out float v_k; void main() { v_k = 1.0; gl_Position = vec4(0.0); }",
            "in float v_k; out vec4 c; void main() { c = vec4(v_k); }",
        )
        .unwrap_err();
        assert!(err.to_string().contains("interpolation"));
    }

    #[test]
    fn matched_varyings_share_locations_and_offsets() {
        let program = link_pair(
            "out vec2 v_uv;\nflat out ivec4 v_id;\nvoid main() { v_uv = vec2(0.0); v_id = ivec4(-1, 2, -3, 4); gl_Position = vec4(0.0); }",
            "in vec2 v_uv;\nflat in ivec4 v_id;\nout vec4 c;\nvoid main() { c = vec4(v_uv, float(v_id.x), 1.0); }",
        )
        .unwrap();
        // Slot 0 is gl_Position, slot 1 the point slot; user varyings
        // start at byte 32.
        assert_eq!(program.tables.varying_offset("v_uv"), Some(32));
        assert_eq!(program.tables.varying_offset("v_id"), Some(48));
    }

    #[test]
    fn uniforms_merge_across_stages() {
        let program = link_pair(
            "uniform mat4 u_mvp;\nuniform float u_t;\nvoid main() { gl_Position = u_mvp * vec4(u_t); }",
            "uniform float u_t;\nuniform vec4 u_tint;\nout vec4 c;\nvoid main() { c = u_tint * u_t; }",
        )
        .unwrap();
        assert_eq!(program.tables.uniform_location("u_mvp"), Some(0));
        assert_eq!(program.tables.uniform_location("u_t"), Some(1));
        assert_eq!(program.tables.uniform_location("u_tint"), Some(2));
        let tint = program.tables.uniforms.iter().find(|u| u.name == "u_tint").unwrap();
        assert_eq!(tint.offset, 128);
    }

    #[test]
    fn uniform_type_conflict_fails() {
        let err = link_pair(
            "uniform float u_k;\nvoid main() { gl_Position = vec4(u_k); }",
            "uniform vec2 u_k;\nout vec4 c;\nvoid main() { c = vec4(u_k, 0.0, 1.0); }",
        )
        .unwrap_err();
        assert!(err.to_string().contains("different types"));
    }

    #[test]
    fn linked_bytes_are_deterministic() {
        let vs_body = "in vec4 a;\nout vec2 v;\nvoid main() { v = a.xy; gl_Position = a; }";
        let fs_body = "in vec2 v;\nout vec4 c;\nvoid main() { c = vec4(v, 0.0, 1.0); }";
        let first = link_pair(vs_body, fs_body).unwrap();
        let second = link_pair(vs_body, fs_body).unwrap();
        assert_eq!(first.vertex_bytes, second.vertex_bytes);
        assert_eq!(first.fragment_bytes, second.fragment_bytes);
    }
}
