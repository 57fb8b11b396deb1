//! Statement and structured control-flow lowering.
//!
//! Loops lower to the `block { loop { cond; block { body } step; br } }`
//! shape: the outer block is the break target, the inner block is the
//! continue target. Early `return` restores the frame stack pointer to the
//! function entry's saved value before leaving.

use crate::error::CompileError;
use crate::glsl::ast::{Block, LocalDecl, Stmt, TypeSpec};
use crate::glsl::symbols::ShaderStage;
use crate::glsl::types::GlslType;
use crate::wasm_backend::emitter::{FunctionEmitter, LoopLabels, VarInfo, VarStorage};
use crate::wasm_backend::frame_allocator::{emit_frame_release, memarg};
use crate::wasm_backend::function_abi::ResultAbi;
use crate::wasm_backend::memory_layout::{FRAG_DISCARD_OFFSET, PRIVATE_PTR_GLOBAL};
use std::collections::HashMap;
use wasm_encoder::{BlockType, Instruction};

impl<'a> FunctionEmitter<'a> {
    // ----- structured-control bookkeeping ---------------------------------

    /// Open a structured frame (block/loop/if) and track its depth so
    /// break/continue can compute relative branch targets.
    pub(crate) fn begin_structured(&mut self, insn: Instruction<'static>) {
        self.code.push(insn);
        self.control_depth += 1;
    }

    pub(crate) fn structured_else(&mut self) {
        self.code.push(Instruction::Else);
    }

    pub(crate) fn end_structured(&mut self) {
        self.code.push(Instruction::End);
        self.control_depth -= 1;
    }

    // ----- statements -----------------------------------------------------

    pub(crate) fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Decl(decl) => self.emit_local_decl(decl),
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(())
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                let cond_val = self.eval(cond)?;
                self.code.push(Instruction::LocalGet(cond_val.base));
                self.begin_structured(Instruction::If(BlockType::Empty));
                self.emit_scoped_block(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.structured_else();
                    self.emit_scoped_block(else_branch)?;
                }
                self.end_structured();
                Ok(())
            }
            Stmt::While { cond, body, .. } => self.emit_loop(Some(cond), None, body),
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                self.scopes.push(HashMap::new());
                if let Some(init) = init {
                    self.emit_stmt(init)?;
                }
                self.emit_loop(cond.as_ref(), step.as_ref(), body)?;
                self.scopes.pop();
                Ok(())
            }
            Stmt::Return { value, .. } => self.emit_return(value.as_ref()),
            Stmt::Break(span) => {
                let labels = *self.loop_stack.last().ok_or_else(|| {
                    CompileError::Internal(format!("break outside loop at {span}"))
                })?;
                let rel = self.control_depth - labels.break_level;
                self.code.push(Instruction::Br(rel));
                Ok(())
            }
            Stmt::Continue(span) => {
                let labels = *self.loop_stack.last().ok_or_else(|| {
                    CompileError::Internal(format!("continue outside loop at {span}"))
                })?;
                let rel = self.control_depth - labels.continue_level;
                self.code.push(Instruction::Br(rel));
                Ok(())
            }
            Stmt::Discard(_) => {
                if self.shader.stage == ShaderStage::Fragment {
                    self.code.push(Instruction::GlobalGet(PRIVATE_PTR_GLOBAL));
                    self.code.push(Instruction::I32Const(1));
                    self.code.push(Instruction::I32Store(memarg(FRAG_DISCARD_OFFSET)));
                }
                // The fragment is abandoned; leave the current function.
                self.emit_return(None)
            }
            Stmt::Block(block) => self.emit_scoped_block(block),
            Stmt::Empty => Ok(()),
        }
    }

    fn emit_scoped_block(&mut self, block: &Block) -> Result<(), CompileError> {
        self.scopes.push(HashMap::new());
        for stmt in &block.stmts {
            self.emit_stmt(stmt)?;
        }
        self.scopes.pop();
        Ok(())
    }

    /// Shared lowering for `while` and `for`.
    fn emit_loop(
        &mut self,
        cond: Option<&crate::glsl::ast::Expr>,
        step: Option<&crate::glsl::ast::Expr>,
        body: &Block,
    ) -> Result<(), CompileError> {
        self.begin_structured(Instruction::Block(BlockType::Empty));
        let break_level = self.control_depth;
        self.begin_structured(Instruction::Loop(BlockType::Empty));
        let loop_level = self.control_depth;

        if let Some(cond) = cond {
            let cond_val = self.eval(cond)?;
            self.code.push(Instruction::LocalGet(cond_val.base));
            self.code.push(Instruction::I32Eqz);
            self.code.push(Instruction::BrIf(self.control_depth - break_level));
        }

        self.begin_structured(Instruction::Block(BlockType::Empty));
        let continue_level = self.control_depth;
        self.loop_stack.push(LoopLabels {
            break_level,
            continue_level,
        });
        self.emit_scoped_block(body)?;
        self.loop_stack.pop();
        self.end_structured();

        if let Some(step) = step {
            self.eval(step)?;
        }
        self.code.push(Instruction::Br(self.control_depth - loop_level));
        self.end_structured();
        self.end_structured();
        Ok(())
    }

    /// Lower `return`, restoring the entry frame pointer first on every
    /// path that allocated a frame.
    fn emit_return(
        &mut self,
        value: Option<&crate::glsl::ast::Expr>,
    ) -> Result<(), CompileError> {
        let result_abi = self.abi.result.clone();
        match (value, result_abi) {
            (Some(expr), Some(ResultAbi::Flattened { valtypes, .. })) => {
                let result = self.eval(expr)?;
                if self.uses_local_frame {
                    emit_frame_release(&mut self.code, self.saved_sp_local);
                }
                for k in 0..valtypes.len() as u32 {
                    self.code.push(Instruction::LocalGet(result.base + k));
                }
            }
            (Some(expr), Some(ResultAbi::Frame { .. })) => {
                // Write the value through the sret pointer.
                let result = self.eval(expr)?;
                let sret = self
                    .sret_local
                    .ok_or_else(|| CompileError::Internal("framed return without sret".into()))?;
                let valtypes = result.ty.flat_valtypes();
                for (k, valtype) in valtypes.iter().enumerate() {
                    self.code.push(Instruction::LocalGet(sret));
                    self.code.push(Instruction::LocalGet(result.base + k as u32));
                    crate::wasm_backend::frame_allocator::push_store(
                        &mut self.code,
                        *valtype,
                        k as u32 * 4,
                    );
                }
                if self.uses_local_frame {
                    emit_frame_release(&mut self.code, self.saved_sp_local);
                }
            }
            (None, None) | (None, Some(_)) | (Some(_), None) => {
                if self.uses_local_frame {
                    emit_frame_release(&mut self.code, self.saved_sp_local);
                }
            }
        }
        self.code.push(Instruction::Return);
        Ok(())
    }

    // ----- declarations ---------------------------------------------------

    fn emit_local_decl(&mut self, decl: &LocalDecl) -> Result<(), CompileError> {
        let ty = self.resolve_local_type(decl)?;

        let storage = match &ty {
            GlslType::Scalar(_) | GlslType::Vector(..) => {
                let value = self.alloc_value(&ty);
                VarStorage::Locals { base: value.base }
            }
            // Aggregates live in the frame so indexing has an address.
            _ => {
                let offset = self.alloc_frame(ty.byte_size());
                VarStorage::Frame { offset }
            }
        };

        let info = VarInfo {
            ty: ty.clone(),
            storage,
        };
        self.current_scope().insert(decl.name.clone(), info.clone());

        if let Some(init) = &decl.init {
            let value = self.eval(init)?;
            let place = self.place_for_var(&info);
            self.store_place(&place, &value)?;
        }
        Ok(())
    }

    fn resolve_local_type(&self, decl: &LocalDecl) -> Result<GlslType, CompileError> {
        let base = match &decl.ty {
            TypeSpec::Builtin(ty) => ty.clone(),
            TypeSpec::Named(name) => GlslType::Struct(
                self.shader
                    .structs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CompileError::Internal(format!("unresolved struct '{name}'")))?,
            ),
        };
        Ok(match decl.array_size {
            Some(count) => GlslType::Array(Box::new(base), count),
            None => base,
        })
    }
}
