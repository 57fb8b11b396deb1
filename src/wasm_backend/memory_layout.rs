//! Shared linear-memory layout for compiled shader modules.
//!
//! Both modules of a program address the same six regions through the six
//! mutable globals seeded by the wrapper `main`. All offsets below are
//! relative to the region base pointers, so the host may place the regions
//! anywhere; the reference layout packs them behind a single scratch base.

use crate::error::LinkError;
use crate::glsl::symbols::{UniformInfo, VaryingInfo};
use serde::Serialize;
use std::collections::BTreeMap;

/// Memory pointer global indices:
/// - 0: attribute base
/// - 1: uniform base
/// - 2: varying base
/// - 3: private/scratch base
/// - 4: texture descriptor base
/// - 5: frame stack pointer
pub const ATTR_PTR_GLOBAL: u32 = 0;
pub const UNIFORM_PTR_GLOBAL: u32 = 1;
pub const VARYING_PTR_GLOBAL: u32 = 2;
pub const PRIVATE_PTR_GLOBAL: u32 = 3;
pub const TEXTURE_PTR_GLOBAL: u32 = 4;
pub const FRAME_SP_GLOBAL: u32 = 5;

/// Region offsets within the reference scratch layout.
pub const ATTR_REGION_OFFSET: u32 = 0x0000;
pub const UNIFORM_REGION_OFFSET: u32 = 0x4000;
pub const VARYING_REGION_OFFSET: u32 = 0x8000;
pub const PRIVATE_REGION_OFFSET: u32 = 0xC000;
pub const TEXTURE_REGION_OFFSET: u32 = 0x10000;
pub const FRAME_REGION_OFFSET: u32 = 0x20000;
pub const FRAME_STACK_SIZE: u32 = 0x20000;

/// Each attribute location owns a 64-byte stride: room for one vec4 of
/// 32-bit components plus alignment slack.
pub const ATTRIBUTE_STRIDE: u32 = 64;

/// Each varying location owns one vec4.
pub const VARYING_SLOT_SIZE: u32 = 16;

/// Each uniform location owns a 64-byte slot (one mat4).
pub const UNIFORM_SLOT_SIZE: u32 = 64;

/// Varying slot 0 is gl_Position; slot 1 carries gl_PointSize (vertex) and
/// gl_PointCoord (fragment). User varyings start at slot 2.
pub const POSITION_OFFSET: u32 = 0;
pub const POINT_SLOT_OFFSET: u32 = 16;
pub const FIRST_USER_VARYING_SLOT: u32 = 2;

/// Fragment color outputs live at the start of the private region, one
/// 16-byte slot per draw buffer.
pub const FRAG_OUTPUT_SLOT_SIZE: u32 = 16;

/// `discard` raises this flag; the rasterizer drops the fragment.
pub const FRAG_DISCARD_OFFSET: u32 = 0x100;

/// Module-scope variables pack after the discard flag.
pub const PRIVATE_GLOBALS_BASE: u32 = 0x110;

/// Resource limits enforced at link time.
pub const MAX_ATTRIBUTE_LOCATIONS: u32 = 16;
pub const MAX_VARYINGS: u32 = 15;
pub const MAX_FRAG_OUTPUTS: u32 = 8;
pub const MAX_UNIFORM_SLOTS: u32 =
    (VARYING_REGION_OFFSET - UNIFORM_REGION_OFFSET) / UNIFORM_SLOT_SIZE;

/// Private region capacity for module-scope variables.
pub const MAX_PRIVATE_GLOBALS_BYTES: u32 =
    TEXTURE_REGION_OFFSET - PRIVATE_REGION_OFFSET - PRIVATE_GLOBALS_BASE;

/// Byte offset of an attribute location within the attribute region.
#[inline]
pub fn attribute_offset(location: u32) -> u32 {
    location * ATTRIBUTE_STRIDE
}

/// Locations consumed by one attribute: matrices take one per column.
pub fn attribute_location_span(ty: &crate::glsl::types::GlslType) -> u32 {
    match ty {
        crate::glsl::types::GlslType::Matrix { cols, .. } => u32::from(*cols),
        _ => 1,
    }
}

/// Byte offset of a varying location within the varying region.
#[inline]
pub fn varying_offset(location: u32) -> u32 {
    (location + FIRST_USER_VARYING_SLOT) * VARYING_SLOT_SIZE
}

/// Byte offset of a uniform location within the uniform region.
#[inline]
pub fn uniform_offset(location: u32) -> u32 {
    location * UNIFORM_SLOT_SIZE
}

/// Byte offset of a fragment output location within the private region.
#[inline]
pub fn frag_output_offset(location: u32) -> u32 {
    location * FRAG_OUTPUT_SLOT_SIZE
}

/// The reference placement of the six regions behind one scratch base.
/// Recorded on every linked program so the rasterizer and the modules
/// agree byte for byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionLayout {
    pub attr_base: u32,
    pub uniform_base: u32,
    pub varying_base: u32,
    pub private_base: u32,
    pub texture_base: u32,
    pub frame_base: u32,
    pub frame_size: u32,
}

impl RegionLayout {
    /// Place the regions behind `base`.
    pub fn with_base(base: u32) -> Self {
        Self {
            attr_base: base + ATTR_REGION_OFFSET,
            uniform_base: base + UNIFORM_REGION_OFFSET,
            varying_base: base + VARYING_REGION_OFFSET,
            private_base: base + PRIVATE_REGION_OFFSET,
            texture_base: base + TEXTURE_REGION_OFFSET,
            frame_base: base + FRAME_REGION_OFFSET,
            frame_size: FRAME_STACK_SIZE,
        }
    }
}

impl Default for RegionLayout {
    fn default() -> Self {
        Self::with_base(0)
    }
}

/// Number of 64-byte slots a uniform occupies. Arrays and structs span
/// several consecutive slots; everything else fits in one.
pub fn uniform_slot_count(uniform: &UniformInfo) -> u32 {
    uniform.byte_size().div_ceil(UNIFORM_SLOT_SIZE).max(1)
}

/// Assign uniform locations densely in declaration order. Multi-slot
/// uniforms advance the cursor by their slot count, so the byte layout
/// stays packed per slot.
pub fn assign_uniform_slots<'a>(
    uniforms: impl IntoIterator<Item = &'a UniformInfo>,
) -> Result<BTreeMap<String, u32>, LinkError> {
    let mut locations = BTreeMap::new();
    let mut next = 0u32;
    for uniform in uniforms {
        let slots = uniform_slot_count(uniform);
        if next + slots > MAX_UNIFORM_SLOTS {
            return Err(LinkError::ResourceLimit(format!(
                "uniform '{}' exceeds the {} available uniform slots",
                uniform.name, MAX_UNIFORM_SLOTS
            )));
        }
        locations.insert(uniform.name.clone(), next);
        next += slots;
    }
    Ok(locations)
}

/// Pack varying locations: explicit `layout(location = N)` wins, everything
/// else fills unused slots in declaration order. Collisions are tolerated
/// here; the linker validates them against its own rules.
pub fn pack_varying_locations(varyings: &[VaryingInfo]) -> BTreeMap<String, u32> {
    let mut locations = BTreeMap::new();
    let mut used: Vec<u32> = Vec::new();
    for varying in varyings {
        if let Some(loc) = varying.location {
            locations.insert(varying.name.clone(), loc);
            used.push(loc);
        }
    }
    let mut next = 0u32;
    for varying in varyings {
        if locations.contains_key(&varying.name) {
            continue;
        }
        while used.contains(&next) {
            next += 1;
        }
        locations.insert(varying.name.clone(), next);
        used.push(next);
        next += 1;
    }
    locations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glsl::ast::Interpolation;
    use crate::glsl::symbols::UniformKind;
    use crate::glsl::types::{GlslType, ScalarKind};

    fn uniform(name: &str, ty: GlslType, array: Option<u32>) -> UniformInfo {
        UniformInfo {
            name: name.to_string(),
            ty,
            array_size: array,
            kind: UniformKind::Plain,
        }
    }

    #[test]
    fn attribute_offsets_are_monotone_in_location() {
        assert_eq!(attribute_offset(0), 0);
        assert_eq!(attribute_offset(1), 64);
        assert_eq!(attribute_offset(15), 960);
    }

    #[test]
    fn varying_offsets_reserve_position_and_point_slots() {
        assert_eq!(varying_offset(0), 32);
        assert_eq!(varying_offset(1), 48);
        assert!(varying_offset(0) > POINT_SLOT_OFFSET);
    }

    #[test]
    fn regions_do_not_overlap() {
        let layout = RegionLayout::default();
        assert!(layout.attr_base + attribute_offset(MAX_ATTRIBUTE_LOCATIONS) <= layout.uniform_base);
        assert!(layout.uniform_base + uniform_offset(MAX_UNIFORM_SLOTS) <= layout.varying_base);
        assert!(
            layout.varying_base + varying_offset(MAX_VARYINGS) + VARYING_SLOT_SIZE
                <= layout.private_base
        );
        assert!(layout.private_base + PRIVATE_GLOBALS_BASE < layout.texture_base);
        assert!(layout.texture_base < layout.frame_base);
    }

    #[test]
    fn uniform_slots_advance_by_size() {
        let uniforms = vec![
            uniform("u_scale", GlslType::Scalar(ScalarKind::Float), None),
            uniform("u_mvp", GlslType::Matrix { cols: 4, rows: 4 }, None),
            uniform("u_weights", GlslType::Scalar(ScalarKind::Float), Some(32)),
            uniform("u_tint", GlslType::Vector(ScalarKind::Float, 4), None),
        ];
        let locations = assign_uniform_slots(&uniforms).unwrap();
        assert_eq!(locations["u_scale"], 0);
        assert_eq!(locations["u_mvp"], 1);
        // 32 floats = 128 bytes = 2 slots.
        assert_eq!(locations["u_weights"], 2);
        assert_eq!(locations["u_tint"], 4);
    }

    #[test]
    fn varying_packing_honors_explicit_locations() {
        let varyings = vec![
            VaryingInfo {
                name: "a".to_string(),
                ty: GlslType::Vector(ScalarKind::Float, 2),
                interpolation: Interpolation::Smooth,
                location: None,
            },
            VaryingInfo {
                name: "b".to_string(),
                ty: GlslType::Vector(ScalarKind::Float, 4),
                interpolation: Interpolation::Smooth,
                location: Some(0),
            },
            VaryingInfo {
                name: "c".to_string(),
                ty: GlslType::Scalar(ScalarKind::Float),
                interpolation: Interpolation::Smooth,
                location: None,
            },
        ];
        let locations = pack_varying_locations(&varyings);
        assert_eq!(locations["b"], 0);
        assert_eq!(locations["a"], 1);
        assert_eq!(locations["c"], 2);
    }
}
