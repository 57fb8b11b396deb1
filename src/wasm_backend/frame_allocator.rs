//! Frame arena allocation sequences.
//!
//! The frame region is a LIFO arena rooted at the frame stack pointer
//! global. Every allocation saves the current pointer into a local and the
//! matching release restores it, so each bump-up is paired with its dual
//! bump-down on every path.

use crate::wasm_backend::memory_layout::FRAME_SP_GLOBAL;
use wasm_encoder::{Instruction, MemArg, ValType};

/// Instruction buffer used while a function body is under construction.
pub type Insns = Vec<Instruction<'static>>;

/// Emit the allocation sequence:
/// 1. `saved = FRAME_SP`
/// 2. `base = align_up(saved, 16)`
/// 3. `FRAME_SP = base + size`
///
/// `saved_sp_local` and `base_local` must be i32 locals owned by the
/// caller; release with [`emit_frame_release`].
pub fn emit_frame_alloc(code: &mut Insns, size: u32, saved_sp_local: u32, base_local: u32) {
    code.push(Instruction::GlobalGet(FRAME_SP_GLOBAL));
    code.push(Instruction::LocalTee(saved_sp_local));

    // base = (saved + 15) & !15
    code.push(Instruction::I32Const(15));
    code.push(Instruction::I32Add);
    code.push(Instruction::I32Const(!15));
    code.push(Instruction::I32And);
    code.push(Instruction::LocalTee(base_local));

    code.push(Instruction::I32Const(size as i32));
    code.push(Instruction::I32Add);
    code.push(Instruction::GlobalSet(FRAME_SP_GLOBAL));
}

/// Emit the release sequence: `FRAME_SP = saved`.
pub fn emit_frame_release(code: &mut Insns, saved_sp_local: u32) {
    code.push(Instruction::LocalGet(saved_sp_local));
    code.push(Instruction::GlobalSet(FRAME_SP_GLOBAL));
}

/// Memory argument for one 4-byte component at a static offset.
pub fn memarg(offset: u32) -> MemArg {
    MemArg {
        offset: u64::from(offset),
        align: 2,
        memory_index: 0,
    }
}

/// Push the load instruction for one component of the given value type.
/// The address must already be on the stack.
pub fn push_load(code: &mut Insns, valtype: ValType, offset: u32) {
    match valtype {
        ValType::F32 => code.push(Instruction::F32Load(memarg(offset))),
        ValType::I32 => code.push(Instruction::I32Load(memarg(offset))),
        other => unreachable!("unsupported component type {other:?}"),
    }
}

/// Push the store instruction for one component of the given value type.
/// The address and the value must already be on the stack.
pub fn push_store(code: &mut Insns, valtype: ValType, offset: u32) {
    match valtype {
        ValType::F32 => code.push(Instruction::F32Store(memarg(offset))),
        ValType::I32 => code.push(Instruction::I32Store(memarg(offset))),
        other => unreachable!("unsupported component type {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_release_pair_sp_writes() {
        let mut code = Insns::new();
        emit_frame_alloc(&mut code, 64, 0, 1);
        emit_frame_release(&mut code, 0);

        let sp_writes = code
            .iter()
            .filter(|i| matches!(i, Instruction::GlobalSet(FRAME_SP_GLOBAL)))
            .count();
        assert_eq!(sp_writes, 2, "one bump-up and one bump-down");
        assert!(matches!(code.last(), Some(Instruction::GlobalSet(_))));
    }

    #[test]
    fn alloc_reads_sp_before_writing() {
        let mut code = Insns::new();
        emit_frame_alloc(&mut code, 16, 0, 1);
        assert!(matches!(code[0], Instruction::GlobalGet(FRAME_SP_GLOBAL)));
    }

    #[test]
    fn memarg_uses_four_byte_alignment() {
        let arg = memarg(12);
        assert_eq!(arg.offset, 12);
        assert_eq!(arg.align, 2);
    }
}
