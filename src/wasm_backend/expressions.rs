//! Expression lowering.
//!
//! Expressions are translated bottom-up; every evaluated value lives in a
//! contiguous run of WASM locals, one per scalar component. Vector and
//! matrix operations expand into per-component sequences; there is no SIMD
//! use. Readability of the emitted code wins over instruction count.

use crate::error::CompileError;
use crate::glsl::ast::{BinaryOp, Expr, ExprKind, IncDecOp, Span, UnaryOp};
use crate::glsl::typecheck::swizzle_indices;
use crate::glsl::types::{GlslType, ScalarKind};
use crate::wasm_backend::builtins;
use crate::wasm_backend::emitter::{
    AddrBase, FunctionEmitter, Place, PlaceKind, Value, VarInfo, VarStorage,
};
use crate::wasm_backend::frame_allocator::{
    emit_frame_alloc, emit_frame_release, push_load, push_store,
};
use crate::wasm_backend::function_abi::{ParameterAbi, ResultAbi};
use wasm_encoder::{Instruction, ValType};

/// Float constant instruction. `.into()` bridges the encoder's constant
/// payload type.
pub(crate) fn fconst(v: f32) -> Instruction<'static> {
    Instruction::F32Const(v.into())
}

/// Byte offset of component `k` within a value of type `ty`, given the
/// column stride for matrices (attribute matrices use the 64-byte location
/// stride, everything else is packed).
fn comp_byte_offset(ty: &GlslType, col_stride: u32, k: u32) -> u32 {
    match ty {
        GlslType::Matrix { rows, .. } => {
            let rows = u32::from(*rows);
            (k / rows) * col_stride + (k % rows) * 4
        }
        _ => k * 4,
    }
}

fn packed_col_stride(ty: &GlslType) -> u32 {
    match ty {
        GlslType::Matrix { rows, .. } => u32::from(*rows) * 4,
        _ => 16,
    }
}

impl<'a> FunctionEmitter<'a> {
    fn ty_of(&self, expr: &Expr) -> GlslType {
        self.shader.type_of(expr).clone()
    }

    /// Local index of component `i` of a value, broadcasting scalars.
    fn comp(&self, value: &Value, i: u32) -> u32 {
        if value.ty.component_count() <= 1 {
            value.base
        } else {
            value.base + i
        }
    }

    fn push_addr_base(&mut self, base: AddrBase) {
        match base {
            AddrBase::Local(idx) => self.code.push(Instruction::LocalGet(idx)),
            AddrBase::Global(idx) => self.code.push(Instruction::GlobalGet(idx)),
        }
    }

    /// Copy the components of `src` into locals starting at `dst_base`.
    pub(crate) fn copy_value(&mut self, src: &Value, dst_base: u32) {
        for k in 0..src.ty.component_count() {
            self.code.push(Instruction::LocalGet(src.base + k));
            self.code.push(Instruction::LocalSet(dst_base + k));
        }
    }

    // ----- places ---------------------------------------------------------

    pub(crate) fn place_for_var(&mut self, info: &VarInfo) -> Place {
        let kind = match &info.storage {
            VarStorage::Locals { base } => PlaceKind::Locals { base: *base },
            VarStorage::Frame { offset } => PlaceKind::Memory {
                base: AddrBase::Local(self.frame_base_local),
                static_offset: *offset,
                dynamic: None,
                col_stride: packed_col_stride(&info.ty),
            },
            VarStorage::FramePtr { ptr_local } => PlaceKind::Memory {
                base: AddrBase::Local(*ptr_local),
                static_offset: 0,
                dynamic: None,
                col_stride: packed_col_stride(&info.ty),
            },
            VarStorage::Region {
                global,
                offset,
                matrix_col_stride,
            } => PlaceKind::Memory {
                base: AddrBase::Global(*global),
                static_offset: *offset,
                dynamic: None,
                col_stride: *matrix_col_stride,
            },
        };
        Place {
            ty: info.ty.clone(),
            kind,
            swizzle: None,
        }
    }

    /// Resolve an lvalue-shaped expression to a storage place, emitting
    /// index computations along the way. Returns `None` for expressions
    /// that are not storage locations (call results, literals, ...).
    pub(crate) fn try_resolve_place(
        &mut self,
        expr: &Expr,
    ) -> Result<Option<Place>, CompileError> {
        match &expr.kind {
            ExprKind::Ident(name) => {
                let info = match self.lookup_var(name) {
                    Some(info) => info.clone(),
                    None => {
                        return Err(CompileError::Internal(format!(
                            "unbound identifier '{name}' survived checking"
                        )));
                    }
                };
                Ok(Some(self.place_for_var(&info)))
            }
            ExprKind::Member { base, member } => {
                let Some(mut place) = self.try_resolve_place(base)? else {
                    return Ok(None);
                };
                match place.ty.clone() {
                    GlslType::Struct(s) => {
                        let (offset, member_ty) = s.member(member).ok_or_else(|| {
                            CompileError::Internal(format!("missing member '{member}'"))
                        })?;
                        match &mut place.kind {
                            PlaceKind::Locals { base } => *base += offset / 4,
                            PlaceKind::Memory {
                                static_offset,
                                col_stride,
                                ..
                            } => {
                                *static_offset += offset;
                                *col_stride = packed_col_stride(member_ty);
                            }
                            _ => {
                                return Err(CompileError::Internal(
                                    "struct place with dynamic component".into(),
                                ));
                            }
                        }
                        place.ty = member_ty.clone();
                        Ok(Some(place))
                    }
                    GlslType::Vector(kind, _) => {
                        let indices = swizzle_indices(member).ok_or_else(|| {
                            CompileError::Internal(format!("invalid swizzle '{member}'"))
                        })?;
                        let composed: Vec<u8> = match &place.swizzle {
                            Some(old) => indices.iter().map(|&i| old[i as usize]).collect(),
                            None => indices,
                        };
                        place.ty = if composed.len() == 1 {
                            GlslType::Scalar(kind)
                        } else {
                            GlslType::Vector(kind, composed.len() as u8)
                        };
                        place.swizzle = Some(composed);
                        Ok(Some(place))
                    }
                    _ => Err(CompileError::Internal(
                        "member access on unexpected type".into(),
                    )),
                }
            }
            ExprKind::Index { base, index } => {
                let Some(mut place) = self.try_resolve_place(base)? else {
                    return Ok(None);
                };
                let const_index = match &index.kind {
                    ExprKind::IntLiteral(v) => Some(*v as u32),
                    ExprKind::UintLiteral(v) => Some(*v),
                    _ => None,
                };
                match place.ty.clone() {
                    GlslType::Vector(kind, count) => {
                        if let Some(k) = const_index {
                            let real = match &place.swizzle {
                                Some(s) => s[k as usize],
                                None => k as u8,
                            };
                            place.swizzle = Some(vec![real]);
                            place.ty = GlslType::Scalar(kind);
                            return Ok(Some(place));
                        }
                        if place.swizzle.is_some() {
                            return Err(CompileError::unsupported(
                                "dynamic indexing of a swizzle",
                                expr.span,
                            ));
                        }
                        let idx = self.eval(index)?;
                        place.ty = GlslType::Scalar(kind);
                        place.kind = match place.kind {
                            PlaceKind::Locals { base } => PlaceKind::LocalsDyn {
                                base,
                                count,
                                index_local: idx.base,
                            },
                            PlaceKind::Memory {
                                base,
                                static_offset,
                                dynamic,
                                col_stride,
                            } => {
                                let dyn_local = self.combine_dynamic(idx.base, 4, dynamic);
                                PlaceKind::Memory {
                                    base,
                                    static_offset,
                                    dynamic: Some(dyn_local),
                                    col_stride,
                                }
                            }
                            PlaceKind::LocalsDyn { .. } => {
                                return Err(CompileError::Internal(
                                    "indexing an already-indexed scalar".into(),
                                ));
                            }
                        };
                        Ok(Some(place))
                    }
                    GlslType::Matrix { rows, .. } => {
                        let column_ty = GlslType::Vector(ScalarKind::Float, rows);
                        match &mut place.kind {
                            PlaceKind::Memory {
                                static_offset,
                                dynamic,
                                col_stride,
                                ..
                            } => {
                                if let Some(k) = const_index {
                                    *static_offset += k * *col_stride;
                                } else {
                                    let stride = *col_stride;
                                    let prev = *dynamic;
                                    let idx = self.eval(index)?;
                                    let dyn_local = self.combine_dynamic(idx.base, stride, prev);
                                    *dynamic = Some(dyn_local);
                                }
                            }
                            _ => {
                                return Err(CompileError::Internal(
                                    "matrix stored outside memory".into(),
                                ));
                            }
                        }
                        place.ty = column_ty;
                        Ok(Some(place))
                    }
                    GlslType::Array(elem, _) => {
                        let elem_size = elem.byte_size();
                        match &mut place.kind {
                            PlaceKind::Memory {
                                static_offset,
                                dynamic,
                                col_stride,
                                ..
                            } => {
                                if let Some(k) = const_index {
                                    *static_offset += k * elem_size;
                                } else {
                                    let prev = *dynamic;
                                    let idx = self.eval(index)?;
                                    let dyn_local = self.combine_dynamic(idx.base, elem_size, prev);
                                    *dynamic = Some(dyn_local);
                                }
                                *col_stride = packed_col_stride(&elem);
                            }
                            _ => {
                                return Err(CompileError::Internal(
                                    "array stored outside memory".into(),
                                ));
                            }
                        }
                        place.ty = (*elem).clone();
                        Ok(Some(place))
                    }
                    _ => Err(CompileError::Internal("indexing a non-indexable type".into())),
                }
            }
            _ => Ok(None),
        }
    }

    /// Fold a runtime index into a byte offset local:
    /// `new = index * scale [+ previous]`.
    fn combine_dynamic(&mut self, index_local: u32, scale: u32, previous: Option<u32>) -> u32 {
        let out = self.alloc_local(ValType::I32);
        self.code.push(Instruction::LocalGet(index_local));
        self.code.push(Instruction::I32Const(scale as i32));
        self.code.push(Instruction::I32Mul);
        if let Some(prev) = previous {
            self.code.push(Instruction::LocalGet(prev));
            self.code.push(Instruction::I32Add);
        }
        self.code.push(Instruction::LocalSet(out));
        out
    }

    /// Load a resolved place into fresh locals.
    pub(crate) fn load_place(&mut self, place: &Place) -> Result<Value, CompileError> {
        let out = self.alloc_value(&place.ty);
        let valtypes = place.ty.flat_valtypes();
        match &place.kind {
            PlaceKind::Locals { base } => {
                for k in 0..valtypes.len() as u32 {
                    let real = match &place.swizzle {
                        Some(s) => u32::from(s[k as usize]),
                        None => k,
                    };
                    self.code.push(Instruction::LocalGet(base + real));
                    self.code.push(Instruction::LocalSet(out.base + k));
                }
            }
            PlaceKind::LocalsDyn {
                base,
                count,
                index_local,
            } => {
                // select-chain: out = comps[index]
                self.code.push(Instruction::LocalGet(*base));
                self.code.push(Instruction::LocalSet(out.base));
                for i in 1..u32::from(*count) {
                    self.code.push(Instruction::LocalGet(base + i));
                    self.code.push(Instruction::LocalGet(out.base));
                    self.code.push(Instruction::LocalGet(*index_local));
                    self.code.push(Instruction::I32Const(i as i32));
                    self.code.push(Instruction::I32Eq);
                    self.code.push(Instruction::Select);
                    self.code.push(Instruction::LocalSet(out.base));
                }
            }
            PlaceKind::Memory {
                base,
                static_offset,
                dynamic,
                col_stride,
            } => {
                for (k, valtype) in valtypes.iter().enumerate() {
                    let real = match &place.swizzle {
                        Some(s) => u32::from(s[k]),
                        None => k as u32,
                    };
                    let offset = static_offset + comp_byte_offset(&place.ty, *col_stride, real);
                    self.push_addr_base(*base);
                    if let Some(dyn_local) = dynamic {
                        self.code.push(Instruction::LocalGet(*dyn_local));
                        self.code.push(Instruction::I32Add);
                    }
                    push_load(&mut self.code, *valtype, offset);
                    self.code.push(Instruction::LocalSet(out.base + k as u32));
                }
            }
        }
        Ok(out)
    }

    /// Store an evaluated value into a resolved place, component by
    /// component in RHS evaluation order.
    pub(crate) fn store_place(&mut self, place: &Place, value: &Value) -> Result<(), CompileError> {
        let valtypes = place.ty.flat_valtypes();
        match &place.kind {
            PlaceKind::Locals { base } => {
                for k in 0..valtypes.len() as u32 {
                    let real = match &place.swizzle {
                        Some(s) => u32::from(s[k as usize]),
                        None => k,
                    };
                    self.code.push(Instruction::LocalGet(self.comp(value, k)));
                    self.code.push(Instruction::LocalSet(base + real));
                }
            }
            PlaceKind::LocalsDyn {
                base,
                count,
                index_local,
            } => {
                // Write the selected component only.
                for i in 0..u32::from(*count) {
                    self.code.push(Instruction::LocalGet(*index_local));
                    self.code.push(Instruction::I32Const(i as i32));
                    self.code.push(Instruction::I32Eq);
                    self.begin_structured(Instruction::If(wasm_encoder::BlockType::Empty));
                    self.code.push(Instruction::LocalGet(value.base));
                    self.code.push(Instruction::LocalSet(base + i));
                    self.end_structured();
                }
            }
            PlaceKind::Memory {
                base,
                static_offset,
                dynamic,
                col_stride,
            } => {
                for (k, valtype) in valtypes.iter().enumerate() {
                    let real = match &place.swizzle {
                        Some(s) => u32::from(s[k]),
                        None => k as u32,
                    };
                    let offset = static_offset + comp_byte_offset(&place.ty, *col_stride, real);
                    self.push_addr_base(*base);
                    if let Some(dyn_local) = dynamic {
                        self.code.push(Instruction::LocalGet(*dyn_local));
                        self.code.push(Instruction::I32Add);
                    }
                    self.code.push(Instruction::LocalGet(self.comp(value, k as u32)));
                    push_store(&mut self.code, *valtype, offset);
                }
            }
        }
        Ok(())
    }

    // ----- evaluation -----------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value, CompileError> {
        let ty = self.ty_of(expr);
        match &expr.kind {
            ExprKind::FloatLiteral(v) => {
                let out = self.alloc_value(&ty);
                self.code.push(fconst(*v));
                self.code.push(Instruction::LocalSet(out.base));
                Ok(out)
            }
            ExprKind::IntLiteral(v) => {
                let out = self.alloc_value(&ty);
                self.code.push(Instruction::I32Const(*v as i32));
                self.code.push(Instruction::LocalSet(out.base));
                Ok(out)
            }
            ExprKind::UintLiteral(v) => {
                let out = self.alloc_value(&ty);
                self.code.push(Instruction::I32Const(*v as i32));
                self.code.push(Instruction::LocalSet(out.base));
                Ok(out)
            }
            ExprKind::BoolLiteral(v) => {
                let out = self.alloc_value(&ty);
                self.code.push(Instruction::I32Const(i32::from(*v)));
                self.code.push(Instruction::LocalSet(out.base));
                Ok(out)
            }
            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. } => {
                if let Some(place) = self.try_resolve_place(expr)? {
                    self.load_place(&place)
                } else {
                    self.eval_rvalue_access(expr)
                }
            }
            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, &ty),
            ExprKind::Unary { op, expr: operand } => self.eval_unary(*op, operand, &ty),
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                let out = self.alloc_value(&ty);
                let cond_val = self.eval(cond)?;
                self.code.push(Instruction::LocalGet(cond_val.base));
                self.begin_structured(Instruction::If(wasm_encoder::BlockType::Empty));
                let then_val = self.eval(then_expr)?;
                self.copy_value(&then_val, out.base);
                self.structured_else();
                let else_val = self.eval(else_expr)?;
                self.copy_value(&else_val, out.base);
                self.end_structured();
                Ok(out)
            }
            ExprKind::Call { name, args } => self.eval_call(name, args, &ty, expr.span),
            ExprKind::Assign { op, target, value } => {
                let rhs = self.eval(value)?;
                let place = self.try_resolve_place(target)?.ok_or_else(|| {
                    CompileError::Internal("assignment target is not a place".into())
                })?;
                let final_val = match op {
                    None => rhs,
                    Some(op) => {
                        let current = self.load_place(&place)?;
                        self.emit_binary_values(*op, &current, &rhs, &ty)?
                    }
                };
                self.store_place(&place, &final_val)?;
                Ok(final_val)
            }
            ExprKind::IncDec { op, prefix, target } => {
                let place = self.try_resolve_place(target)?.ok_or_else(|| {
                    CompileError::Internal("increment target is not a place".into())
                })?;
                let old = self.load_place(&place)?;
                let new = self.alloc_value(&ty);
                let kind = ty.scalar_kind().unwrap_or(ScalarKind::Float);
                for k in 0..ty.component_count() {
                    self.code.push(Instruction::LocalGet(old.base + k));
                    match kind {
                        ScalarKind::Float => {
                            self.code.push(fconst(1.0));
                            self.code.push(match op {
                                IncDecOp::Inc => Instruction::F32Add,
                                IncDecOp::Dec => Instruction::F32Sub,
                            });
                        }
                        _ => {
                            self.code.push(Instruction::I32Const(1));
                            self.code.push(match op {
                                IncDecOp::Inc => Instruction::I32Add,
                                IncDecOp::Dec => Instruction::I32Sub,
                            });
                        }
                    }
                    self.code.push(Instruction::LocalSet(new.base + k));
                }
                self.store_place(&place, &new)?;
                Ok(if *prefix { new } else { old })
            }
        }
    }

    /// Member/index access on a temporary (e.g. a call result): evaluate
    /// the whole base and slice components out of it.
    fn eval_rvalue_access(&mut self, expr: &Expr) -> Result<Value, CompileError> {
        let ty = self.ty_of(expr);
        match &expr.kind {
            ExprKind::Member { base, member } => {
                let base_val = self.eval(base)?;
                let out = self.alloc_value(&ty);
                match &base_val.ty {
                    GlslType::Struct(s) => {
                        let (offset, _) = s.member(member).ok_or_else(|| {
                            CompileError::Internal(format!("missing member '{member}'"))
                        })?;
                        let first = offset / 4;
                        for k in 0..ty.component_count() {
                            self.code
                                .push(Instruction::LocalGet(base_val.base + first + k));
                            self.code.push(Instruction::LocalSet(out.base + k));
                        }
                    }
                    GlslType::Vector(..) => {
                        let indices = swizzle_indices(member).ok_or_else(|| {
                            CompileError::Internal(format!("invalid swizzle '{member}'"))
                        })?;
                        for (k, &i) in indices.iter().enumerate() {
                            self.code
                                .push(Instruction::LocalGet(base_val.base + u32::from(i)));
                            self.code.push(Instruction::LocalSet(out.base + k as u32));
                        }
                    }
                    other => {
                        return Err(CompileError::Internal(format!(
                            "member access on temporary {other:?}"
                        )));
                    }
                }
                Ok(out)
            }
            ExprKind::Index { base, index } => {
                let k = match &index.kind {
                    ExprKind::IntLiteral(v) => *v as u32,
                    ExprKind::UintLiteral(v) => *v,
                    _ => {
                        return Err(CompileError::unsupported(
                            "dynamic indexing of a temporary value",
                            expr.span,
                        ));
                    }
                };
                let base_val = self.eval(base)?;
                let out = self.alloc_value(&ty);
                let first = match &base_val.ty {
                    GlslType::Vector(..) => k,
                    GlslType::Matrix { rows, .. } => k * u32::from(*rows),
                    GlslType::Array(elem, _) => k * elem.component_count(),
                    other => {
                        return Err(CompileError::Internal(format!(
                            "indexing temporary {other:?}"
                        )));
                    }
                };
                for c in 0..ty.component_count() {
                    self.code
                        .push(Instruction::LocalGet(base_val.base + first + c));
                    self.code.push(Instruction::LocalSet(out.base + c));
                }
                Ok(out)
            }
            _ => Err(CompileError::Internal("unexpected rvalue access".into())),
        }
    }

    // ----- operators ------------------------------------------------------

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        out_ty: &GlslType,
    ) -> Result<Value, CompileError> {
        if op.is_logical() {
            return self.eval_short_circuit(op, lhs, rhs);
        }
        let a = self.eval(lhs)?;
        let b = self.eval(rhs)?;
        self.emit_binary_values(op, &a, &b, out_ty)
    }

    fn eval_short_circuit(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Value, CompileError> {
        let out = self.alloc_value(&GlslType::Scalar(ScalarKind::Bool));
        let a = self.eval(lhs)?;
        self.code.push(Instruction::LocalGet(a.base));
        self.begin_structured(Instruction::If(wasm_encoder::BlockType::Empty));
        match op {
            BinaryOp::LogicalAnd => {
                let b = self.eval(rhs)?;
                self.code.push(Instruction::LocalGet(b.base));
                self.code.push(Instruction::LocalSet(out.base));
                self.structured_else();
                self.code.push(Instruction::I32Const(0));
                self.code.push(Instruction::LocalSet(out.base));
            }
            BinaryOp::LogicalOr => {
                self.code.push(Instruction::I32Const(1));
                self.code.push(Instruction::LocalSet(out.base));
                self.structured_else();
                let b = self.eval(rhs)?;
                self.code.push(Instruction::LocalGet(b.base));
                self.code.push(Instruction::LocalSet(out.base));
            }
            _ => unreachable!("not a logical operator"),
        }
        self.end_structured();
        Ok(out)
    }

    /// Combine two evaluated values. Handles linear-algebra `*` forms,
    /// aggregate equality, and the componentwise remainder.
    pub(crate) fn emit_binary_values(
        &mut self,
        op: BinaryOp,
        a: &Value,
        b: &Value,
        out_ty: &GlslType,
    ) -> Result<Value, CompileError> {
        use GlslType::{Matrix, Vector};

        if op == BinaryOp::Mul {
            match (&a.ty, &b.ty) {
                (Matrix { .. }, Matrix { .. }) => return self.emit_mat_mat_mul(a, b, out_ty),
                (Matrix { .. }, Vector(..)) => return self.emit_mat_vec_mul(a, b, out_ty),
                (Vector(..), Matrix { .. }) => return self.emit_vec_mat_mul(a, b, out_ty),
                _ => {}
            }
        }

        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) && a.ty.component_count() > 1 {
            return self.emit_aggregate_equality(op, a, b);
        }

        let kind = a
            .ty
            .scalar_kind()
            .or_else(|| b.ty.scalar_kind())
            .unwrap_or(ScalarKind::Float);
        let out = self.alloc_value(out_ty);
        for k in 0..out_ty.component_count() {
            self.code.push(Instruction::LocalGet(self.comp(a, k)));
            self.code.push(Instruction::LocalGet(self.comp(b, k)));
            self.code.push(scalar_op(op, kind)?);
            self.code.push(Instruction::LocalSet(out.base + k));
        }
        Ok(out)
    }

    /// `==` / `!=` on vectors and matrices: fold component equality.
    fn emit_aggregate_equality(
        &mut self,
        op: BinaryOp,
        a: &Value,
        b: &Value,
    ) -> Result<Value, CompileError> {
        let kind = a.ty.scalar_kind().unwrap_or(ScalarKind::Float);
        let eq = match kind {
            ScalarKind::Float => Instruction::F32Eq,
            _ => Instruction::I32Eq,
        };
        let out = self.alloc_value(&GlslType::Scalar(ScalarKind::Bool));
        for k in 0..a.ty.component_count() {
            self.code.push(Instruction::LocalGet(a.base + k));
            self.code.push(Instruction::LocalGet(b.base + k));
            self.code.push(eq.clone());
            if k > 0 {
                self.code.push(Instruction::I32And);
            }
        }
        if op == BinaryOp::Ne {
            self.code.push(Instruction::I32Eqz);
        }
        self.code.push(Instruction::LocalSet(out.base));
        Ok(out)
    }

    fn emit_mat_mat_mul(
        &mut self,
        a: &Value,
        b: &Value,
        out_ty: &GlslType,
    ) -> Result<Value, CompileError> {
        let (GlslType::Matrix { cols: ac, rows: ar }, GlslType::Matrix { rows: br, .. }) =
            (&a.ty, &b.ty)
        else {
            return Err(CompileError::Internal("matrix multiply on non-matrix".into()));
        };
        let (ac, ar, br) = (u32::from(*ac), u32::from(*ar), u32::from(*br));
        let GlslType::Matrix { cols: oc, rows: or } = out_ty else {
            return Err(CompileError::Internal("matrix multiply result shape".into()));
        };
        let (oc, or) = (u32::from(*oc), u32::from(*or));
        let out = self.alloc_value(out_ty);
        for c in 0..oc {
            for r in 0..or {
                for k in 0..ac {
                    self.code.push(Instruction::LocalGet(a.base + k * ar + r));
                    self.code.push(Instruction::LocalGet(b.base + c * br + k));
                    self.code.push(Instruction::F32Mul);
                    if k > 0 {
                        self.code.push(Instruction::F32Add);
                    }
                }
                self.code.push(Instruction::LocalSet(out.base + c * or + r));
            }
        }
        Ok(out)
    }

    fn emit_mat_vec_mul(
        &mut self,
        m: &Value,
        v: &Value,
        out_ty: &GlslType,
    ) -> Result<Value, CompileError> {
        let GlslType::Matrix { cols, rows } = &m.ty else {
            return Err(CompileError::Internal("matrix multiply on non-matrix".into()));
        };
        let (cols, rows) = (u32::from(*cols), u32::from(*rows));
        let out = self.alloc_value(out_ty);
        for r in 0..rows {
            for c in 0..cols {
                self.code.push(Instruction::LocalGet(m.base + c * rows + r));
                self.code.push(Instruction::LocalGet(v.base + c));
                self.code.push(Instruction::F32Mul);
                if c > 0 {
                    self.code.push(Instruction::F32Add);
                }
            }
            self.code.push(Instruction::LocalSet(out.base + r));
        }
        Ok(out)
    }

    fn emit_vec_mat_mul(
        &mut self,
        v: &Value,
        m: &Value,
        out_ty: &GlslType,
    ) -> Result<Value, CompileError> {
        let GlslType::Matrix { cols, rows } = &m.ty else {
            return Err(CompileError::Internal("matrix multiply on non-matrix".into()));
        };
        let (cols, rows) = (u32::from(*cols), u32::from(*rows));
        let out = self.alloc_value(out_ty);
        for c in 0..cols {
            for r in 0..rows {
                self.code.push(Instruction::LocalGet(v.base + r));
                self.code.push(Instruction::LocalGet(m.base + c * rows + r));
                self.code.push(Instruction::F32Mul);
                if r > 0 {
                    self.code.push(Instruction::F32Add);
                }
            }
            self.code.push(Instruction::LocalSet(out.base + c));
        }
        Ok(out)
    }

    fn eval_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        out_ty: &GlslType,
    ) -> Result<Value, CompileError> {
        let v = self.eval(operand)?;
        let out = self.alloc_value(out_ty);
        let kind = out_ty.scalar_kind().unwrap_or(ScalarKind::Bool);
        for k in 0..out_ty.component_count() {
            match (op, kind) {
                (UnaryOp::Neg, ScalarKind::Float) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::F32Neg);
                }
                (UnaryOp::Neg, _) => {
                    self.code.push(Instruction::I32Const(0));
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::I32Sub);
                }
                (UnaryOp::Not, _) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::I32Eqz);
                }
                (UnaryOp::BitNot, _) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::I32Const(-1));
                    self.code.push(Instruction::I32Xor);
                }
            }
            self.code.push(Instruction::LocalSet(out.base + k));
        }
        Ok(out)
    }

    // ----- calls ----------------------------------------------------------

    fn eval_call(
        &mut self,
        name: &str,
        args: &[Expr],
        out_ty: &GlslType,
        span: Span,
    ) -> Result<Value, CompileError> {
        if let Some(ctor_ty) = GlslType::from_keyword(name) {
            return self.emit_constructor(&ctor_ty, args);
        }
        if self.shader.structs.contains_key(name) {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(self.eval(arg)?);
            }
            let out = self.alloc_value(out_ty);
            let mut cursor = out.base;
            for value in &values {
                self.copy_value(value, cursor);
                cursor += value.ty.component_count();
            }
            return Ok(out);
        }
        if name == "texture" {
            return self.emit_texture_sample(args, out_ty, span);
        }
        if let Some(result) = self.emit_builtin(name, args, out_ty, span)? {
            return Ok(result);
        }
        self.emit_user_call(name, args, out_ty, span)
    }

    fn emit_texture_sample(
        &mut self,
        args: &[Expr],
        out_ty: &GlslType,
        _span: Span,
    ) -> Result<Value, CompileError> {
        let sampler = self.eval(&args[0])?;
        let coord = self.eval(&args[1])?;
        let sample_idx = self
            .texture_sample_idx
            .ok_or_else(|| CompileError::Internal("texture import missing".into()))?;

        self.code.push(Instruction::LocalGet(sampler.base));
        for c in 0..3u32 {
            if c < coord.ty.component_count() {
                self.code.push(Instruction::LocalGet(coord.base + c));
            } else {
                self.code.push(fconst(0.0));
            }
        }
        self.code.push(Instruction::Call(sample_idx));
        let out = self.alloc_value(out_ty);
        for k in (0..4u32).rev() {
            self.code.push(Instruction::LocalSet(out.base + k));
        }
        Ok(out)
    }

    fn emit_user_call(
        &mut self,
        name: &str,
        args: &[Expr],
        out_ty: &GlslType,
        _span: Span,
    ) -> Result<Value, CompileError> {
        let abi = self
            .shader
            .symbols
            .function(name)
            .and_then(|f| f.abi.clone())
            .ok_or_else(|| CompileError::Internal(format!("unclassified function '{name}'")))?;
        let fn_idx = *self
            .fn_indices
            .get(name)
            .ok_or_else(|| CompileError::Internal(format!("unindexed function '{name}'")))?;

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }

        let (saved_sp, frame_base) = if abi.uses_frame {
            let saved = self.alloc_local(ValType::I32);
            let base = self.alloc_local(ValType::I32);
            emit_frame_alloc(&mut self.code, abi.call_frame_size, saved, base);
            (Some(saved), Some(base))
        } else {
            (None, None)
        };

        // Write framed arguments into the call frame before the call.
        for (value, param_abi) in values.iter().zip(abi.params.iter()) {
            if let ParameterAbi::Frame { offset, .. } = param_abi {
                let valtypes = value.ty.flat_valtypes();
                for (k, valtype) in valtypes.iter().enumerate() {
                    self.code
                        .push(Instruction::LocalGet(frame_base.expect("framed call")));
                    self.code.push(Instruction::LocalGet(value.base + k as u32));
                    push_store(&mut self.code, *valtype, offset + k as u32 * 4);
                }
            }
        }

        // Operands: sret pointer first, then parameters in source order.
        if let Some(ResultAbi::Frame { offset, .. }) = &abi.result {
            self.code
                .push(Instruction::LocalGet(frame_base.expect("framed result")));
            if *offset > 0 {
                self.code.push(Instruction::I32Const(*offset as i32));
                self.code.push(Instruction::I32Add);
            }
        }
        for (value, param_abi) in values.iter().zip(abi.params.iter()) {
            match param_abi {
                ParameterAbi::Flattened { valtypes, .. } => {
                    for k in 0..valtypes.len() as u32 {
                        self.code.push(Instruction::LocalGet(value.base + k));
                    }
                }
                ParameterAbi::Frame { offset, .. } => {
                    self.code
                        .push(Instruction::LocalGet(frame_base.expect("framed call")));
                    if *offset > 0 {
                        self.code.push(Instruction::I32Const(*offset as i32));
                        self.code.push(Instruction::I32Add);
                    }
                }
            }
        }

        self.code.push(Instruction::Call(fn_idx));

        let out = self.alloc_value(out_ty);
        match &abi.result {
            Some(ResultAbi::Flattened { valtypes, .. }) => {
                for k in (0..valtypes.len() as u32).rev() {
                    self.code.push(Instruction::LocalSet(out.base + k));
                }
            }
            Some(ResultAbi::Frame { offset, .. }) => {
                let valtypes = out_ty.flat_valtypes();
                for (k, valtype) in valtypes.iter().enumerate() {
                    self.code
                        .push(Instruction::LocalGet(frame_base.expect("framed result")));
                    push_load(&mut self.code, *valtype, offset + k as u32 * 4);
                    self.code.push(Instruction::LocalSet(out.base + k as u32));
                }
            }
            None => {}
        }

        if let Some(saved) = saved_sp {
            emit_frame_release(&mut self.code, saved);
        }
        Ok(out)
    }

    // ----- constructors and conversions -----------------------------------

    /// Emit a scalar kind conversion on the value at the top of the stack.
    fn push_convert(&mut self, from: ScalarKind, to: ScalarKind) {
        use ScalarKind::*;
        match (from, to) {
            (a, b) if a == b => {}
            (Int, Uint) | (Uint, Int) | (Bool, Int) | (Bool, Uint) => {}
            (Float, Int) => self.code.push(Instruction::I32TruncF32S),
            (Float, Uint) => self.code.push(Instruction::I32TruncF32U),
            (Int, Float) => self.code.push(Instruction::F32ConvertI32S),
            (Uint, Float) | (Bool, Float) => self.code.push(Instruction::F32ConvertI32U),
            (Int, Bool) | (Uint, Bool) => {
                self.code.push(Instruction::I32Const(0));
                self.code.push(Instruction::I32Ne);
            }
            (Float, Bool) => {
                self.code.push(fconst(0.0));
                self.code.push(Instruction::F32Ne);
            }
            _ => unreachable!("conversion {from:?} -> {to:?}"),
        }
    }

    fn emit_constructor(
        &mut self,
        target: &GlslType,
        args: &[Expr],
    ) -> Result<Value, CompileError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        let out = self.alloc_value(target);

        match target {
            GlslType::Scalar(to_kind) => {
                let from_kind = values[0].ty.flat_scalar_kinds()[0];
                self.code.push(Instruction::LocalGet(values[0].base));
                self.push_convert(from_kind, *to_kind);
                self.code.push(Instruction::LocalSet(out.base));
            }
            GlslType::Vector(to_kind, n) => {
                let n = u32::from(*n);
                if values.len() == 1 && values[0].ty.is_scalar() {
                    let from_kind = values[0].ty.flat_scalar_kinds()[0];
                    for k in 0..n {
                        self.code.push(Instruction::LocalGet(values[0].base));
                        self.push_convert(from_kind, *to_kind);
                        self.code.push(Instruction::LocalSet(out.base + k));
                    }
                } else {
                    // Concatenate argument components, truncating a single
                    // longer vector argument.
                    let mut written = 0u32;
                    'outer: for value in &values {
                        let kinds = value.ty.flat_scalar_kinds();
                        for (i, from_kind) in kinds.iter().enumerate() {
                            if written == n {
                                break 'outer;
                            }
                            self.code
                                .push(Instruction::LocalGet(value.base + i as u32));
                            self.push_convert(*from_kind, *to_kind);
                            self.code.push(Instruction::LocalSet(out.base + written));
                            written += 1;
                        }
                    }
                }
            }
            GlslType::Matrix { cols, rows } => {
                let (cols, rows) = (u32::from(*cols), u32::from(*rows));
                if values.len() == 1 && values[0].ty.is_scalar() {
                    // Diagonal matrix.
                    let from_kind = values[0].ty.flat_scalar_kinds()[0];
                    for c in 0..cols {
                        for r in 0..rows {
                            if c == r {
                                self.code.push(Instruction::LocalGet(values[0].base));
                                self.push_convert(from_kind, ScalarKind::Float);
                            } else {
                                self.code.push(fconst(0.0));
                            }
                            self.code.push(Instruction::LocalSet(out.base + c * rows + r));
                        }
                    }
                } else if values.len() == 1 && values[0].ty == *target {
                    self.copy_value(&values[0], out.base);
                } else {
                    let mut written = 0u32;
                    for value in &values {
                        let kinds = value.ty.flat_scalar_kinds();
                        for (i, from_kind) in kinds.iter().enumerate() {
                            self.code
                                .push(Instruction::LocalGet(value.base + i as u32));
                            self.push_convert(*from_kind, ScalarKind::Float);
                            self.code.push(Instruction::LocalSet(out.base + written));
                            written += 1;
                        }
                    }
                }
            }
            other => {
                return Err(CompileError::Internal(format!(
                    "constructor for {other:?} reached the emitter"
                )));
            }
        }
        Ok(out)
    }

    // ----- builtins -------------------------------------------------------

    /// Lower a built-in function call. Returns `Ok(None)` when the name is
    /// a user function instead.
    fn emit_builtin(
        &mut self,
        name: &str,
        args: &[Expr],
        out_ty: &GlslType,
        span: Span,
    ) -> Result<Option<Value>, CompileError> {
        if self.shader.symbols.function(name).is_some() {
            return Ok(None);
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        let v = &values;

        // Imported transcendentals, applied per component.
        if let Some((import, arity)) = builtins::import_for_builtin(name, args.len()) {
            let idx = builtins::math_import_index(import)
                .ok_or_else(|| CompileError::Internal(format!("missing import '{import}'")))?;
            let out = self.alloc_value(out_ty);
            for k in 0..out_ty.component_count() {
                self.code.push(Instruction::LocalGet(self.comp(&v[0], k)));
                if arity == 2 {
                    self.code.push(Instruction::LocalGet(self.comp(&v[1], k)));
                }
                self.code.push(Instruction::Call(idx));
                self.code.push(Instruction::LocalSet(out.base + k));
            }
            return Ok(Some(out));
        }

        let kind = v
            .first()
            .and_then(|value| value.ty.scalar_kind())
            .unwrap_or(ScalarKind::Float);

        let out = match name {
            "sqrt" | "floor" | "ceil" | "trunc" | "round" | "abs" | "sign" | "fract"
            | "inversesqrt" | "radians" | "degrees" | "normalize" => {
                self.emit_componentwise_unary(name, &v[0], out_ty, kind)?
            }
            "min" | "max" | "mod" | "step" => {
                self.emit_componentwise_binary(name, &v[0], &v[1], out_ty, kind)?
            }
            "clamp" => {
                let lo = self.emit_componentwise_binary("max", &v[0], &v[1], out_ty, kind)?;
                self.emit_componentwise_binary("min", &lo, &v[2], out_ty, kind)?
            }
            "mix" => {
                // x + (y - x) * a
                let out = self.alloc_value(out_ty);
                for k in 0..out_ty.component_count() {
                    self.code.push(Instruction::LocalGet(self.comp(&v[0], k)));
                    self.code.push(Instruction::LocalGet(self.comp(&v[1], k)));
                    self.code.push(Instruction::LocalGet(self.comp(&v[0], k)));
                    self.code.push(Instruction::F32Sub);
                    self.code.push(Instruction::LocalGet(self.comp(&v[2], k)));
                    self.code.push(Instruction::F32Mul);
                    self.code.push(Instruction::F32Add);
                    self.code.push(Instruction::LocalSet(out.base + k));
                }
                out
            }
            "smoothstep" => {
                let out = self.alloc_value(out_ty);
                let t = self.alloc_local(ValType::F32);
                for k in 0..out_ty.component_count() {
                    // t = clamp((x - e0) / (e1 - e0), 0, 1)
                    self.code.push(Instruction::LocalGet(self.comp(&v[2], k)));
                    self.code.push(Instruction::LocalGet(self.comp(&v[0], k)));
                    self.code.push(Instruction::F32Sub);
                    self.code.push(Instruction::LocalGet(self.comp(&v[1], k)));
                    self.code.push(Instruction::LocalGet(self.comp(&v[0], k)));
                    self.code.push(Instruction::F32Sub);
                    self.code.push(Instruction::F32Div);
                    self.code.push(fconst(0.0));
                    self.code.push(Instruction::F32Max);
                    self.code.push(fconst(1.0));
                    self.code.push(Instruction::F32Min);
                    self.code.push(Instruction::LocalTee(t));
                    // t * t * (3 - 2t)
                    self.code.push(Instruction::LocalGet(t));
                    self.code.push(Instruction::F32Mul);
                    self.code.push(fconst(3.0));
                    self.code.push(fconst(2.0));
                    self.code.push(Instruction::LocalGet(t));
                    self.code.push(Instruction::F32Mul);
                    self.code.push(Instruction::F32Sub);
                    self.code.push(Instruction::F32Mul);
                    self.code.push(Instruction::LocalSet(out.base + k));
                }
                out
            }
            "dot" => {
                let out = self.alloc_value(out_ty);
                self.push_dot(&v[0], &v[1]);
                self.code.push(Instruction::LocalSet(out.base));
                out
            }
            "length" => {
                let out = self.alloc_value(out_ty);
                self.push_dot(&v[0], &v[0]);
                self.code.push(Instruction::F32Sqrt);
                self.code.push(Instruction::LocalSet(out.base));
                out
            }
            "distance" => {
                let diff = self.emit_componentwise_sub(&v[0], &v[1])?;
                let out = self.alloc_value(out_ty);
                self.push_dot(&diff, &diff);
                self.code.push(Instruction::F32Sqrt);
                self.code.push(Instruction::LocalSet(out.base));
                out
            }
            "cross" => {
                let out = self.alloc_value(out_ty);
                const IDX: [(u32, u32); 3] = [(1, 2), (2, 0), (0, 1)];
                for (k, &(i, j)) in IDX.iter().enumerate() {
                    self.code.push(Instruction::LocalGet(v[0].base + i));
                    self.code.push(Instruction::LocalGet(v[1].base + j));
                    self.code.push(Instruction::F32Mul);
                    self.code.push(Instruction::LocalGet(v[0].base + j));
                    self.code.push(Instruction::LocalGet(v[1].base + i));
                    self.code.push(Instruction::F32Mul);
                    self.code.push(Instruction::F32Sub);
                    self.code.push(Instruction::LocalSet(out.base + k as u32));
                }
                out
            }
            "reflect" => {
                // I - 2 * dot(N, I) * N
                let d = self.alloc_local(ValType::F32);
                self.push_dot(&v[1], &v[0]);
                self.code.push(Instruction::LocalSet(d));
                let out = self.alloc_value(out_ty);
                for k in 0..out_ty.component_count() {
                    self.code.push(Instruction::LocalGet(self.comp(&v[0], k)));
                    self.code.push(fconst(2.0));
                    self.code.push(Instruction::LocalGet(d));
                    self.code.push(Instruction::F32Mul);
                    self.code.push(Instruction::LocalGet(self.comp(&v[1], k)));
                    self.code.push(Instruction::F32Mul);
                    self.code.push(Instruction::F32Sub);
                    self.code.push(Instruction::LocalSet(out.base + k));
                }
                out
            }
            "refract" => {
                // d = dot(N, I); kk = 1 - eta^2 * (1 - d^2)
                // kk < 0 ? 0 : eta*I - (eta*d + sqrt(kk)) * N
                let d = self.alloc_local(ValType::F32);
                let kk = self.alloc_local(ValType::F32);
                let eta = v[2].base;
                self.push_dot(&v[1], &v[0]);
                self.code.push(Instruction::LocalSet(d));
                self.code.push(fconst(1.0));
                self.code.push(Instruction::LocalGet(eta));
                self.code.push(Instruction::LocalGet(eta));
                self.code.push(Instruction::F32Mul);
                self.code.push(fconst(1.0));
                self.code.push(Instruction::LocalGet(d));
                self.code.push(Instruction::LocalGet(d));
                self.code.push(Instruction::F32Mul);
                self.code.push(Instruction::F32Sub);
                self.code.push(Instruction::F32Mul);
                self.code.push(Instruction::F32Sub);
                self.code.push(Instruction::LocalSet(kk));
                let out = self.alloc_value(out_ty);
                for k in 0..out_ty.component_count() {
                    // candidate = eta*I_k - (eta*d + sqrt(max(kk, 0))) * N_k
                    self.code.push(Instruction::LocalGet(eta));
                    self.code.push(Instruction::LocalGet(self.comp(&v[0], k)));
                    self.code.push(Instruction::F32Mul);
                    self.code.push(Instruction::LocalGet(eta));
                    self.code.push(Instruction::LocalGet(d));
                    self.code.push(Instruction::F32Mul);
                    self.code.push(Instruction::LocalGet(kk));
                    self.code.push(fconst(0.0));
                    self.code.push(Instruction::F32Max);
                    self.code.push(Instruction::F32Sqrt);
                    self.code.push(Instruction::F32Add);
                    self.code.push(Instruction::LocalGet(self.comp(&v[1], k)));
                    self.code.push(Instruction::F32Mul);
                    self.code.push(Instruction::F32Sub);
                    // select(candidate, 0.0, kk >= 0)
                    self.code.push(fconst(0.0));
                    self.code.push(Instruction::LocalGet(kk));
                    self.code.push(fconst(0.0));
                    self.code.push(Instruction::F32Ge);
                    self.code.push(Instruction::Select);
                    self.code.push(Instruction::LocalSet(out.base + k));
                }
                out
            }
            _ => {
                return Err(CompileError::unsupported(
                    format!("built-in '{name}' is not supported by the backend"),
                    span,
                ));
            }
        };
        Ok(Some(out))
    }

    /// Push `dot(a, b)` onto the stack.
    fn push_dot(&mut self, a: &Value, b: &Value) {
        for k in 0..a.ty.component_count() {
            self.code.push(Instruction::LocalGet(a.base + k));
            self.code.push(Instruction::LocalGet(b.base + k));
            self.code.push(Instruction::F32Mul);
            if k > 0 {
                self.code.push(Instruction::F32Add);
            }
        }
    }

    fn emit_componentwise_sub(&mut self, a: &Value, b: &Value) -> Result<Value, CompileError> {
        let out = self.alloc_value(&a.ty.clone());
        for k in 0..a.ty.component_count() {
            self.code.push(Instruction::LocalGet(a.base + k));
            self.code.push(Instruction::LocalGet(b.base + k));
            self.code.push(Instruction::F32Sub);
            self.code.push(Instruction::LocalSet(out.base + k));
        }
        Ok(out)
    }

    fn emit_componentwise_unary(
        &mut self,
        name: &str,
        v: &Value,
        out_ty: &GlslType,
        kind: ScalarKind,
    ) -> Result<Value, CompileError> {
        use std::f32::consts::PI;
        let out = self.alloc_value(out_ty);

        // normalize needs the whole-vector inverse length first.
        let inv_len = if name == "normalize" {
            let inv = self.alloc_local(ValType::F32);
            self.code.push(fconst(1.0));
            self.push_dot(v, v);
            self.code.push(Instruction::F32Sqrt);
            self.code.push(Instruction::F32Div);
            self.code.push(Instruction::LocalSet(inv));
            Some(inv)
        } else {
            None
        };

        for k in 0..out_ty.component_count() {
            match (name, kind) {
                ("sqrt", _) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::F32Sqrt);
                }
                ("floor", _) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::F32Floor);
                }
                ("ceil", _) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::F32Ceil);
                }
                ("trunc", _) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::F32Trunc);
                }
                ("round", _) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::F32Nearest);
                }
                ("abs", ScalarKind::Float) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::F32Abs);
                }
                ("abs", _) => {
                    // select(-x, x, x < 0)
                    self.code.push(Instruction::I32Const(0));
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::I32Sub);
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::I32Const(0));
                    self.code.push(Instruction::I32LtS);
                    self.code.push(Instruction::Select);
                }
                ("sign", ScalarKind::Float) => {
                    // (x > 0) - (x < 0), as float
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(fconst(0.0));
                    self.code.push(Instruction::F32Gt);
                    self.code.push(Instruction::F32ConvertI32S);
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(fconst(0.0));
                    self.code.push(Instruction::F32Lt);
                    self.code.push(Instruction::F32ConvertI32S);
                    self.code.push(Instruction::F32Sub);
                }
                ("sign", _) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::I32Const(0));
                    self.code.push(Instruction::I32GtS);
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::I32Const(0));
                    self.code.push(Instruction::I32LtS);
                    self.code.push(Instruction::I32Sub);
                }
                ("fract", _) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::F32Floor);
                    self.code.push(Instruction::F32Sub);
                }
                ("inversesqrt", _) => {
                    self.code.push(fconst(1.0));
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(Instruction::F32Sqrt);
                    self.code.push(Instruction::F32Div);
                }
                ("radians", _) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(fconst(PI / 180.0));
                    self.code.push(Instruction::F32Mul);
                }
                ("degrees", _) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code.push(fconst(180.0 / PI));
                    self.code.push(Instruction::F32Mul);
                }
                ("normalize", _) => {
                    self.code.push(Instruction::LocalGet(v.base + k));
                    self.code
                        .push(Instruction::LocalGet(inv_len.expect("computed above")));
                    self.code.push(Instruction::F32Mul);
                }
                _ => {
                    return Err(CompileError::Internal(format!(
                        "componentwise builtin '{name}' missing"
                    )));
                }
            }
            self.code.push(Instruction::LocalSet(out.base + k));
        }
        Ok(out)
    }

    fn emit_componentwise_binary(
        &mut self,
        name: &str,
        a: &Value,
        b: &Value,
        out_ty: &GlslType,
        kind: ScalarKind,
    ) -> Result<Value, CompileError> {
        let out = self.alloc_value(out_ty);
        for k in 0..out_ty.component_count() {
            match (name, kind) {
                ("min", ScalarKind::Float) | ("max", ScalarKind::Float) => {
                    self.code.push(Instruction::LocalGet(self.comp(a, k)));
                    self.code.push(Instruction::LocalGet(self.comp(b, k)));
                    self.code.push(if name == "min" {
                        Instruction::F32Min
                    } else {
                        Instruction::F32Max
                    });
                }
                ("min", int_kind) | ("max", int_kind) => {
                    // select(a, b, a < b) for min; flipped for max.
                    let lt = if int_kind == ScalarKind::Uint {
                        Instruction::I32LtU
                    } else {
                        Instruction::I32LtS
                    };
                    self.code.push(Instruction::LocalGet(self.comp(a, k)));
                    self.code.push(Instruction::LocalGet(self.comp(b, k)));
                    self.code.push(Instruction::LocalGet(self.comp(a, k)));
                    self.code.push(Instruction::LocalGet(self.comp(b, k)));
                    self.code.push(lt);
                    if name == "max" {
                        self.code.push(Instruction::I32Eqz);
                    }
                    self.code.push(Instruction::Select);
                }
                ("mod", _) => {
                    // x - y * floor(x / y)
                    self.code.push(Instruction::LocalGet(self.comp(a, k)));
                    self.code.push(Instruction::LocalGet(self.comp(b, k)));
                    self.code.push(Instruction::LocalGet(self.comp(a, k)));
                    self.code.push(Instruction::LocalGet(self.comp(b, k)));
                    self.code.push(Instruction::F32Div);
                    self.code.push(Instruction::F32Floor);
                    self.code.push(Instruction::F32Mul);
                    self.code.push(Instruction::F32Sub);
                }
                ("step", _) => {
                    // x < edge ? 0 : 1
                    self.code.push(fconst(0.0));
                    self.code.push(fconst(1.0));
                    self.code.push(Instruction::LocalGet(self.comp(b, k)));
                    self.code.push(Instruction::LocalGet(self.comp(a, k)));
                    self.code.push(Instruction::F32Lt);
                    self.code.push(Instruction::Select);
                }
                _ => {
                    return Err(CompileError::Internal(format!(
                        "componentwise builtin '{name}' missing"
                    )));
                }
            }
            self.code.push(Instruction::LocalSet(out.base + k));
        }
        Ok(out)
    }
}

/// Scalar instruction for a componentwise binary operator.
fn scalar_op(op: BinaryOp, kind: ScalarKind) -> Result<Instruction<'static>, CompileError> {
    use BinaryOp::*;
    use ScalarKind::*;
    let insn = match (op, kind) {
        (Add, Float) => Instruction::F32Add,
        (Sub, Float) => Instruction::F32Sub,
        (Mul, Float) => Instruction::F32Mul,
        (Div, Float) => Instruction::F32Div,
        (Add, _) => Instruction::I32Add,
        (Sub, _) => Instruction::I32Sub,
        (Mul, _) => Instruction::I32Mul,
        (Div, Uint) => Instruction::I32DivU,
        (Div, _) => Instruction::I32DivS,
        (Mod, Uint) => Instruction::I32RemU,
        (Mod, _) => Instruction::I32RemS,
        (BitAnd, _) => Instruction::I32And,
        (BitOr, _) => Instruction::I32Or,
        (BitXor, _) => Instruction::I32Xor,
        (Shl, _) => Instruction::I32Shl,
        (Shr, Uint) => Instruction::I32ShrU,
        (Shr, _) => Instruction::I32ShrS,
        (Eq, Float) => Instruction::F32Eq,
        (Ne, Float) => Instruction::F32Ne,
        (Lt, Float) => Instruction::F32Lt,
        (Le, Float) => Instruction::F32Le,
        (Gt, Float) => Instruction::F32Gt,
        (Ge, Float) => Instruction::F32Ge,
        (Eq, _) => Instruction::I32Eq,
        (Ne, _) => Instruction::I32Ne,
        (Lt, Uint) => Instruction::I32LtU,
        (Le, Uint) => Instruction::I32LeU,
        (Gt, Uint) => Instruction::I32GtU,
        (Ge, Uint) => Instruction::I32GeU,
        (Lt, _) => Instruction::I32LtS,
        (Le, _) => Instruction::I32LeS,
        (Gt, _) => Instruction::I32GtS,
        (Ge, _) => Instruction::I32GeS,
        (LogicalAnd, _) | (LogicalOr, _) => {
            return Err(CompileError::Internal(
                "logical operators are lowered with short-circuit blocks".into(),
            ));
        }
    };
    Ok(insn)
}
