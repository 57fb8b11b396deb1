//! Type checker and resolver.
//!
//! Walks the AST threading an environment of declarations, assigns a
//! concrete type to every expression, and records the translation unit's
//! symbol table. GLSL ES 3.00 has no implicit conversions, so operand types
//! must match exactly; constructors are the only conversion points.

use crate::error::CompileError;
use crate::glsl::ast::*;
use crate::glsl::symbols::*;
use crate::glsl::types::*;
use std::collections::HashMap;

/// A translation unit with every expression typed and the symbol table
/// recorded. This is what compilation retains for the backend.
#[derive(Debug, Clone)]
pub struct TypedShader {
    pub stage: ShaderStage,
    pub unit: TranslationUnit,
    pub expr_types: HashMap<ExprId, GlslType>,
    pub structs: HashMap<String, Box<StructType>>,
    pub symbols: SymbolTable,
}

impl TypedShader {
    /// The resolved type of an expression. Panics on an unknown id, which
    /// would mean the checker skipped a node.
    pub fn type_of(&self, expr: &Expr) -> &GlslType {
        self.expr_types
            .get(&expr.id)
            .expect("expression missing from type table")
    }
}

/// Type-check a parsed translation unit for the given stage.
pub fn check(stage: ShaderStage, unit: TranslationUnit) -> Result<TypedShader, CompileError> {
    let mut checker = Checker::new(stage);
    checker.collect_structs(&unit)?;
    checker.collect_functions(&unit)?;
    checker.check_globals(&unit)?;
    checker.check_functions(&unit)?;
    if !checker.saw_main {
        return Err(CompileError::type_error(
            "missing 'void main()' entry point",
            Span::new(1, 1),
        ));
    }
    Ok(TypedShader {
        stage,
        unit,
        expr_types: checker.expr_types,
        structs: checker.structs,
        symbols: checker.symbols,
    })
}

#[derive(Debug, Clone)]
struct VarBinding {
    ty: GlslType,
    writable: bool,
}

struct Checker {
    stage: ShaderStage,
    structs: HashMap<String, Box<StructType>>,
    expr_types: HashMap<ExprId, GlslType>,
    symbols: SymbolTable,
    scopes: Vec<HashMap<String, VarBinding>>,
    current_ret: GlslType,
    loop_depth: u32,
    saw_main: bool,
}

impl Checker {
    fn new(stage: ShaderStage) -> Self {
        let mut globals = HashMap::new();
        match stage {
            ShaderStage::Vertex => {
                globals.insert(
                    "gl_Position".to_string(),
                    VarBinding {
                        ty: GlslType::Vector(ScalarKind::Float, 4),
                        writable: true,
                    },
                );
                globals.insert(
                    "gl_PointSize".to_string(),
                    VarBinding {
                        ty: GlslType::Scalar(ScalarKind::Float),
                        writable: true,
                    },
                );
            }
            ShaderStage::Fragment => {
                globals.insert(
                    "gl_FragCoord".to_string(),
                    VarBinding {
                        ty: GlslType::Vector(ScalarKind::Float, 4),
                        writable: false,
                    },
                );
                globals.insert(
                    "gl_PointCoord".to_string(),
                    VarBinding {
                        ty: GlslType::Vector(ScalarKind::Float, 2),
                        writable: false,
                    },
                );
            }
        }
        Self {
            stage,
            structs: HashMap::new(),
            expr_types: HashMap::new(),
            symbols: SymbolTable::new(stage),
            scopes: vec![globals],
            current_ret: GlslType::Void,
            loop_depth: 0,
            saw_main: false,
        }
    }

    fn err(&self, message: impl Into<String>, span: Span) -> CompileError {
        CompileError::type_error(message, span)
    }

    // ----- declaration collection ----------------------------------------

    fn collect_structs(&mut self, unit: &TranslationUnit) -> Result<(), CompileError> {
        for decl in &unit.decls {
            let Decl::Struct(decl) = decl else { continue };
            if self.structs.contains_key(&decl.name) {
                return Err(self.err(
                    format!("struct '{}' is already defined", decl.name),
                    decl.span,
                ));
            }
            let mut members = Vec::new();
            for member in &decl.members {
                let ty = self.resolve_type(&member.ty, member.array_size, member.span)?;
                if ty.is_opaque() {
                    return Err(self.err(
                        format!("struct member '{}' may not be opaque", member.name),
                        member.span,
                    ));
                }
                members.push(StructMember {
                    name: member.name.clone(),
                    ty,
                });
            }
            self.structs.insert(
                decl.name.clone(),
                Box::new(StructType {
                    name: decl.name.clone(),
                    members,
                }),
            );
        }
        Ok(())
    }

    fn collect_functions(&mut self, unit: &TranslationUnit) -> Result<(), CompileError> {
        for decl in &unit.decls {
            let Decl::Function(func) = decl else { continue };
            if func.name == "main" {
                continue;
            }
            if self.symbols.function(&func.name).is_some() {
                return Err(self.err(
                    format!("function '{}' is already defined; overloads are not supported", func.name),
                    func.span,
                ));
            }
            let ret = self.resolve_type(&func.ret, None, func.span)?;
            let mut params = Vec::new();
            for param in &func.params {
                let ty = self.resolve_type(&param.ty, param.array_size, param.span)?;
                if ty == GlslType::Void {
                    return Err(self.err("'void' is not a valid parameter type", param.span));
                }
                params.push(ty);
            }
            self.symbols.functions.push(FunctionSymbol {
                name: func.name.clone(),
                params,
                ret,
                abi: None,
            });
        }
        Ok(())
    }

    fn resolve_type(
        &self,
        spec: &TypeSpec,
        array_size: Option<u32>,
        span: Span,
    ) -> Result<GlslType, CompileError> {
        let base = match spec {
            TypeSpec::Builtin(ty) => ty.clone(),
            TypeSpec::Named(name) => match self.structs.get(name) {
                Some(s) => GlslType::Struct(s.clone()),
                None => {
                    return Err(self.err(format!("unknown type name '{name}'"), span));
                }
            },
        };
        match array_size {
            Some(count) => Ok(GlslType::Array(Box::new(base), count)),
            None => Ok(base),
        }
    }

    // ----- globals --------------------------------------------------------

    fn check_globals(&mut self, unit: &TranslationUnit) -> Result<(), CompileError> {
        for decl in &unit.decls {
            let Decl::Global(global) = decl else { continue };
            let ty = self.resolve_type(&global.ty, global.array_size, global.span)?;
            let span = global.span;
            let name = global.name.clone();

            if self.scopes[0].contains_key(&name) {
                return Err(self.err(format!("redefinition of '{name}'"), span));
            }
            if name.starts_with("gl_") {
                return Err(self.err(
                    format!("'{name}': identifiers starting with 'gl_' are reserved"),
                    span,
                ));
            }

            match global.qualifiers.storage {
                Some(StorageQualifier::Uniform) => {
                    self.check_uniform(global, &ty)?;
                }
                Some(StorageQualifier::In) => match self.stage {
                    ShaderStage::Vertex => self.check_attribute(global, &ty)?,
                    ShaderStage::Fragment => self.check_varying(global, &ty, false)?,
                },
                Some(StorageQualifier::Out) => match self.stage {
                    ShaderStage::Vertex => self.check_varying(global, &ty, true)?,
                    ShaderStage::Fragment => self.check_frag_output(global, &ty)?,
                },
                None => {
                    // Module-scope plain or const variable.
                    if global.qualifiers.is_const && global.init.is_none() {
                        return Err(self.err(
                            format!("const variable '{name}' requires an initializer"),
                            span,
                        ));
                    }
                    if let Some(init) = &global.init {
                        let init_ty = self.check_expr(init)?;
                        if init_ty != ty {
                            return Err(self.err(
                                format!(
                                    "cannot initialize '{}' of type {} with {}",
                                    name,
                                    ty.glsl_name(),
                                    init_ty.glsl_name()
                                ),
                                span,
                            ));
                        }
                    }
                    self.scopes[0].insert(
                        name,
                        VarBinding {
                            ty,
                            writable: !global.qualifiers.is_const,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn check_uniform(&mut self, global: &GlobalDecl, ty: &GlslType) -> Result<(), CompileError> {
        if global.init.is_some() {
            return Err(self.err(
                format!("uniform '{}' may not be initialized", global.name),
                global.span,
            ));
        }
        let (kind, element) = match ty {
            GlslType::Sampler(_) => (UniformKind::Sampler, ty.clone()),
            GlslType::Array(elem, _) if elem.is_opaque() => {
                return Err(self.err(
                    format!("sampler arrays are not supported ('{}')", global.name),
                    global.span,
                ));
            }
            GlslType::Array(elem, _) => (UniformKind::Plain, (**elem).clone()),
            _ => (UniformKind::Plain, ty.clone()),
        };
        let array_size = match ty {
            GlslType::Array(_, count) => Some(*count),
            _ => None,
        };
        self.symbols.uniforms.push(UniformInfo {
            name: global.name.clone(),
            ty: element.clone(),
            array_size,
            kind,
        });
        self.scopes[0].insert(
            global.name.clone(),
            VarBinding {
                ty: ty.clone(),
                writable: false,
            },
        );
        Ok(())
    }

    fn check_attribute(&mut self, global: &GlobalDecl, ty: &GlslType) -> Result<(), CompileError> {
        let valid = matches!(
            ty.scalar_kind(),
            Some(ScalarKind::Float) | Some(ScalarKind::Int) | Some(ScalarKind::Uint)
        ) && !matches!(ty, GlslType::Array(..));
        if !valid {
            return Err(self.err(
                format!(
                    "'{}' is not a valid attribute type for '{}'",
                    ty.glsl_name(),
                    global.name
                ),
                global.span,
            ));
        }
        if global.init.is_some() {
            return Err(self.err(
                format!("attribute '{}' may not be initialized", global.name),
                global.span,
            ));
        }
        self.symbols.attributes.push(AttributeInfo {
            name: global.name.clone(),
            ty: ty.clone(),
            location: global.qualifiers.layout_location,
        });
        self.scopes[0].insert(
            global.name.clone(),
            VarBinding {
                ty: ty.clone(),
                writable: false,
            },
        );
        Ok(())
    }

    fn check_varying(
        &mut self,
        global: &GlobalDecl,
        ty: &GlslType,
        is_output: bool,
    ) -> Result<(), CompileError> {
        match ty {
            GlslType::Scalar(ScalarKind::Bool) | GlslType::Vector(ScalarKind::Bool, _) => {
                return Err(self.err(
                    format!("'bool' values cannot be passed between stages ('{}')", global.name),
                    global.span,
                ));
            }
            GlslType::Scalar(_) | GlslType::Vector(..) => {}
            _ => {
                return Err(self.err(
                    format!(
                        "'{}' is not a valid varying type for '{}'",
                        ty.glsl_name(),
                        global.name
                    ),
                    global.span,
                ));
            }
        }
        let interpolation = global
            .qualifiers
            .interpolation
            .unwrap_or(Interpolation::Smooth);
        if ty.is_integer_based() && interpolation != Interpolation::Flat {
            return Err(self.err(
                format!(
                    "integer varying '{}' must be qualified 'flat'",
                    global.name
                ),
                global.span,
            ));
        }
        if global.init.is_some() {
            return Err(self.err(
                format!("varying '{}' may not be initialized", global.name),
                global.span,
            ));
        }
        self.symbols.varyings.push(VaryingInfo {
            name: global.name.clone(),
            ty: ty.clone(),
            interpolation,
            location: global.qualifiers.layout_location,
        });
        self.scopes[0].insert(
            global.name.clone(),
            VarBinding {
                ty: ty.clone(),
                writable: is_output,
            },
        );
        Ok(())
    }

    fn check_frag_output(&mut self, global: &GlobalDecl, ty: &GlslType) -> Result<(), CompileError> {
        match ty {
            GlslType::Scalar(kind) | GlslType::Vector(kind, _)
                if *kind != ScalarKind::Bool => {}
            _ => {
                return Err(self.err(
                    format!(
                        "'{}' is not a valid fragment output type for '{}'",
                        ty.glsl_name(),
                        global.name
                    ),
                    global.span,
                ));
            }
        }
        let location = global.qualifiers.layout_location.unwrap_or(0);
        if location >= crate::wasm_backend::memory_layout::MAX_FRAG_OUTPUTS {
            return Err(self.err(
                format!(
                    "fragment output '{}' exceeds the {} draw buffers",
                    global.name,
                    crate::wasm_backend::memory_layout::MAX_FRAG_OUTPUTS
                ),
                global.span,
            ));
        }
        self.symbols.frag_outputs.push(FragOutputInfo {
            name: global.name.clone(),
            ty: ty.clone(),
            location,
        });
        self.scopes[0].insert(
            global.name.clone(),
            VarBinding {
                ty: ty.clone(),
                writable: true,
            },
        );
        Ok(())
    }

    // ----- functions ------------------------------------------------------

    fn check_functions(&mut self, unit: &TranslationUnit) -> Result<(), CompileError> {
        for decl in &unit.decls {
            let Decl::Function(func) = decl else { continue };
            let ret = self.resolve_type(&func.ret, None, func.span)?;

            if func.name == "main" {
                if ret != GlslType::Void || !func.params.is_empty() {
                    return Err(self.err("main() must be declared 'void main()'", func.span));
                }
                if self.saw_main {
                    return Err(self.err("main() is already defined", func.span));
                }
                self.saw_main = true;
            }

            self.scopes.push(HashMap::new());
            for param in &func.params {
                let ty = self.resolve_type(&param.ty, param.array_size, param.span)?;
                if self.current_scope().contains_key(&param.name) {
                    return Err(self.err(
                        format!("duplicate parameter name '{}'", param.name),
                        param.span,
                    ));
                }
                self.current_scope().insert(
                    param.name.clone(),
                    VarBinding {
                        ty,
                        writable: true,
                    },
                );
            }
            self.current_ret = ret;
            self.check_block(&func.body)?;
            self.scopes.pop();
        }
        Ok(())
    }

    fn current_scope(&mut self) -> &mut HashMap<String, VarBinding> {
        self.scopes.last_mut().expect("scope stack is never empty")
    }

    fn lookup(&self, name: &str) -> Option<&VarBinding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    // ----- statements -----------------------------------------------------

    fn check_block(&mut self, block: &Block) -> Result<(), CompileError> {
        self.scopes.push(HashMap::new());
        for stmt in &block.stmts {
            self.check_stmt(stmt)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Decl(decl) => self.check_local_decl(decl),
            Stmt::Expr(expr) => {
                self.check_expr(expr)?;
                Ok(())
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                span,
            } => {
                let cond_ty = self.check_expr(cond)?;
                if cond_ty != GlslType::Scalar(ScalarKind::Bool) {
                    return Err(self.err("if condition must be a boolean scalar", *span));
                }
                self.check_block(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.check_block(else_branch)?;
                }
                Ok(())
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                span,
            } => {
                // The loop variable scope covers the condition, step, and body.
                self.scopes.push(HashMap::new());
                if let Some(init) = init {
                    self.check_stmt(init)?;
                }
                if let Some(cond) = cond {
                    let cond_ty = self.check_expr(cond)?;
                    if cond_ty != GlslType::Scalar(ScalarKind::Bool) {
                        return Err(self.err("for condition must be a boolean scalar", *span));
                    }
                }
                if let Some(step) = step {
                    self.check_expr(step)?;
                }
                self.loop_depth += 1;
                self.check_block(body)?;
                self.loop_depth -= 1;
                self.scopes.pop();
                Ok(())
            }
            Stmt::While { cond, body, span } => {
                let cond_ty = self.check_expr(cond)?;
                if cond_ty != GlslType::Scalar(ScalarKind::Bool) {
                    return Err(self.err("while condition must be a boolean scalar", *span));
                }
                self.loop_depth += 1;
                self.check_block(body)?;
                self.loop_depth -= 1;
                Ok(())
            }
            Stmt::Return { value, span } => {
                match (value, self.current_ret.clone()) {
                    (None, GlslType::Void) => Ok(()),
                    (None, ret) => Err(self.err(
                        format!("return value of type {} expected", ret.glsl_name()),
                        *span,
                    )),
                    (Some(_), GlslType::Void) => {
                        Err(self.err("void function cannot return a value", *span))
                    }
                    (Some(expr), ret) => {
                        let ty = self.check_expr(expr)?;
                        if ty != ret {
                            return Err(self.err(
                                format!(
                                    "returning {} from a function declared {}",
                                    ty.glsl_name(),
                                    ret.glsl_name()
                                ),
                                *span,
                            ));
                        }
                        Ok(())
                    }
                }
            }
            Stmt::Break(span) | Stmt::Continue(span) => {
                if self.loop_depth == 0 {
                    return Err(self.err("break/continue outside of a loop", *span));
                }
                Ok(())
            }
            Stmt::Discard(span) => {
                if self.stage != ShaderStage::Fragment {
                    return Err(self.err("'discard' is only valid in fragment shaders", *span));
                }
                Ok(())
            }
            Stmt::Block(block) => self.check_block(block),
            Stmt::Empty => Ok(()),
        }
    }

    fn check_local_decl(&mut self, decl: &LocalDecl) -> Result<(), CompileError> {
        let ty = self.resolve_type(&decl.ty, decl.array_size, decl.span)?;
        if ty == GlslType::Void {
            return Err(self.err("variables may not be 'void'", decl.span));
        }
        if ty.is_opaque() {
            return Err(self.err("opaque types may only be declared as uniforms", decl.span));
        }
        if let Some(init) = &decl.init {
            let init_ty = self.check_expr(init)?;
            if init_ty != ty {
                return Err(self.err(
                    format!(
                        "cannot initialize '{}' of type {} with {}",
                        decl.name,
                        ty.glsl_name(),
                        init_ty.glsl_name()
                    ),
                    decl.span,
                ));
            }
        } else if decl.is_const {
            return Err(self.err(
                format!("const variable '{}' requires an initializer", decl.name),
                decl.span,
            ));
        }
        if self.current_scope().contains_key(&decl.name) {
            return Err(self.err(format!("redefinition of '{}'", decl.name), decl.span));
        }
        self.current_scope().insert(
            decl.name.clone(),
            VarBinding {
                ty,
                writable: !decl.is_const,
            },
        );
        Ok(())
    }

    // ----- expressions ----------------------------------------------------

    fn record(&mut self, expr: &Expr, ty: GlslType) -> GlslType {
        self.expr_types.insert(expr.id, ty.clone());
        ty
    }

    fn check_expr(&mut self, expr: &Expr) -> Result<GlslType, CompileError> {
        let ty = match &expr.kind {
            ExprKind::FloatLiteral(_) => GlslType::Scalar(ScalarKind::Float),
            ExprKind::IntLiteral(value) => {
                if *value > i32::MAX as i64 {
                    return Err(self.err("integer literal out of range", expr.span));
                }
                GlslType::Scalar(ScalarKind::Int)
            }
            ExprKind::UintLiteral(_) => GlslType::Scalar(ScalarKind::Uint),
            ExprKind::BoolLiteral(_) => GlslType::Scalar(ScalarKind::Bool),
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(binding) => binding.ty.clone(),
                None => {
                    return Err(self.err(format!("use of undeclared identifier '{name}'"), expr.span));
                }
            },
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_ty = self.check_expr(lhs)?;
                let rhs_ty = self.check_expr(rhs)?;
                self.check_binary(*op, &lhs_ty, &rhs_ty, expr.span)?
            }
            ExprKind::Unary { op, expr: operand } => {
                let operand_ty = self.check_expr(operand)?;
                self.check_unary(*op, &operand_ty, expr.span)?
            }
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                let cond_ty = self.check_expr(cond)?;
                if cond_ty != GlslType::Scalar(ScalarKind::Bool) {
                    return Err(self.err("ternary condition must be a boolean scalar", expr.span));
                }
                let then_ty = self.check_expr(then_expr)?;
                let else_ty = self.check_expr(else_expr)?;
                if then_ty != else_ty {
                    return Err(self.err(
                        format!(
                            "ternary branches disagree: {} vs {}",
                            then_ty.glsl_name(),
                            else_ty.glsl_name()
                        ),
                        expr.span,
                    ));
                }
                then_ty
            }
            ExprKind::Call { name, args } => {
                let mut arg_types = Vec::with_capacity(args.len());
                for arg in args {
                    arg_types.push(self.check_expr(arg)?);
                }
                self.check_call(name, &arg_types, expr.span)?
            }
            ExprKind::Index { base, index } => {
                let base_ty = self.check_expr(base)?;
                let index_ty = self.check_expr(index)?;
                if !matches!(
                    index_ty,
                    GlslType::Scalar(ScalarKind::Int) | GlslType::Scalar(ScalarKind::Uint)
                ) {
                    return Err(self.err("index must be an integer scalar", expr.span));
                }
                if let ExprKind::IntLiteral(value) = &index.kind {
                    self.check_constant_index(&base_ty, *value, expr.span)?;
                }
                match base_ty.index_element() {
                    Some(element) => element,
                    None => {
                        return Err(self.err(
                            format!("type {} cannot be indexed", base_ty.glsl_name()),
                            expr.span,
                        ));
                    }
                }
            }
            ExprKind::Member { base, member } => {
                let base_ty = self.check_expr(base)?;
                self.check_member(&base_ty, member, expr.span)?
            }
            ExprKind::Assign { op, target, value } => {
                let target_ty = self.check_expr(target)?;
                let value_ty = self.check_expr(value)?;
                self.check_lvalue(target)?;
                let result_ty = match op {
                    None => {
                        if target_ty != value_ty {
                            return Err(self.err(
                                format!(
                                    "cannot assign {} to {}",
                                    value_ty.glsl_name(),
                                    target_ty.glsl_name()
                                ),
                                expr.span,
                            ));
                        }
                        target_ty
                    }
                    Some(op) => {
                        let combined = self.check_binary(*op, &target_ty, &value_ty, expr.span)?;
                        if combined != target_ty {
                            return Err(self.err(
                                format!(
                                    "compound assignment changes type from {} to {}",
                                    target_ty.glsl_name(),
                                    combined.glsl_name()
                                ),
                                expr.span,
                            ));
                        }
                        combined
                    }
                };
                result_ty
            }
            ExprKind::IncDec { target, .. } => {
                let target_ty = self.check_expr(target)?;
                self.check_lvalue(target)?;
                match target_ty.scalar_kind() {
                    Some(ScalarKind::Float) | Some(ScalarKind::Int) | Some(ScalarKind::Uint)
                        if !target_ty.is_matrix() =>
                    {
                        target_ty
                    }
                    _ => {
                        return Err(self.err(
                            format!("cannot increment {}", target_ty.glsl_name()),
                            expr.span,
                        ));
                    }
                }
            }
        };
        Ok(self.record(expr, ty))
    }

    fn check_constant_index(
        &self,
        base_ty: &GlslType,
        value: i64,
        span: Span,
    ) -> Result<(), CompileError> {
        let limit = match base_ty {
            GlslType::Vector(_, n) => u32::from(*n),
            GlslType::Matrix { cols, .. } => u32::from(*cols),
            GlslType::Array(_, count) => *count,
            _ => return Ok(()),
        };
        if value < 0 || value as u32 >= limit {
            return Err(self.err(
                format!("index {value} out of range for {}", base_ty.glsl_name()),
                span,
            ));
        }
        Ok(())
    }

    fn check_binary(
        &self,
        op: BinaryOp,
        lhs: &GlslType,
        rhs: &GlslType,
        span: Span,
    ) -> Result<GlslType, CompileError> {
        use GlslType::*;
        let mismatch = || {
            self.err(
                format!(
                    "operator '{}' cannot combine {} and {}",
                    op.symbol(),
                    lhs.glsl_name(),
                    rhs.glsl_name()
                ),
                span,
            )
        };

        if op.is_logical() {
            let bool_ty = Scalar(ScalarKind::Bool);
            if *lhs == bool_ty && *rhs == bool_ty {
                return Ok(bool_ty);
            }
            return Err(mismatch());
        }

        if op.is_comparison() {
            if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
                // Equality compares whole values componentwise.
                if lhs == rhs && !lhs.is_opaque() && !matches!(lhs, Struct(_) | Array(..)) {
                    return Ok(Scalar(ScalarKind::Bool));
                }
                return Err(mismatch());
            }
            // Ordering is defined on scalars only.
            match (lhs, rhs) {
                (Scalar(a), Scalar(b)) if a == b && *a != ScalarKind::Bool => {
                    return Ok(Scalar(ScalarKind::Bool));
                }
                _ => return Err(mismatch()),
            }
        }

        if op.is_integer_only() {
            let kind = match (lhs.scalar_kind(), rhs.scalar_kind()) {
                (Some(a), Some(b)) if a == b => a,
                _ => return Err(mismatch()),
            };
            if !matches!(kind, ScalarKind::Int | ScalarKind::Uint) {
                return Err(mismatch());
            }
            return match (lhs, rhs) {
                (Scalar(_), Scalar(_)) => Ok(lhs.clone()),
                (Vector(..), Vector(..)) if lhs == rhs => Ok(lhs.clone()),
                (Vector(..), Scalar(_)) => Ok(lhs.clone()),
                (Scalar(_), Vector(..)) => Ok(rhs.clone()),
                _ => Err(mismatch()),
            };
        }

        // Arithmetic: +, -, *, /
        let kind = match (lhs.scalar_kind(), rhs.scalar_kind()) {
            (Some(a), Some(b)) if a == b && a != ScalarKind::Bool => a,
            _ => return Err(mismatch()),
        };

        // Linear-algebra forms of '*'.
        if op == BinaryOp::Mul && kind == ScalarKind::Float {
            match (lhs, rhs) {
                (Matrix { cols, rows }, Matrix { cols: rc, rows: rr }) => {
                    if cols != rr {
                        return Err(mismatch());
                    }
                    return Ok(Matrix {
                        cols: *rc,
                        rows: *rows,
                    });
                }
                (Matrix { cols, rows }, Vector(ScalarKind::Float, n)) => {
                    if cols != n {
                        return Err(mismatch());
                    }
                    return Ok(Vector(ScalarKind::Float, *rows));
                }
                (Vector(ScalarKind::Float, n), Matrix { cols, rows }) => {
                    if n != rows {
                        return Err(mismatch());
                    }
                    return Ok(Vector(ScalarKind::Float, *cols));
                }
                _ => {}
            }
        }

        match (lhs, rhs) {
            (Scalar(_), Scalar(_)) => Ok(lhs.clone()),
            (Vector(..), Vector(..)) if lhs == rhs => Ok(lhs.clone()),
            (Vector(..), Scalar(_)) => Ok(lhs.clone()),
            (Scalar(_), Vector(..)) => Ok(rhs.clone()),
            (Matrix { .. }, Matrix { .. }) if lhs == rhs && op != BinaryOp::Mul => {
                Ok(lhs.clone())
            }
            (Matrix { .. }, Scalar(_)) => Ok(lhs.clone()),
            (Scalar(_), Matrix { .. }) => Ok(rhs.clone()),
            _ => Err(mismatch()),
        }
    }

    fn check_unary(
        &self,
        op: UnaryOp,
        operand: &GlslType,
        span: Span,
    ) -> Result<GlslType, CompileError> {
        let ok = match op {
            UnaryOp::Neg => matches!(
                operand.scalar_kind(),
                Some(ScalarKind::Float) | Some(ScalarKind::Int) | Some(ScalarKind::Uint)
            ),
            UnaryOp::Not => *operand == GlslType::Scalar(ScalarKind::Bool),
            UnaryOp::BitNot => matches!(
                operand.scalar_kind(),
                Some(ScalarKind::Int) | Some(ScalarKind::Uint)
            ) && !operand.is_matrix(),
        };
        if ok {
            Ok(operand.clone())
        } else {
            Err(self.err(
                format!("invalid operand type {} for unary operator", operand.glsl_name()),
                span,
            ))
        }
    }

    fn check_member(
        &self,
        base: &GlslType,
        member: &str,
        span: Span,
    ) -> Result<GlslType, CompileError> {
        match base {
            GlslType::Struct(s) => match s.member(member) {
                Some((_, ty)) => Ok(ty.clone()),
                None => Err(self.err(
                    format!("struct '{}' has no member '{member}'", s.name),
                    span,
                )),
            },
            GlslType::Vector(kind, size) => {
                let indices = swizzle_indices(member).ok_or_else(|| {
                    self.err(format!("invalid swizzle '.{member}'"), span)
                })?;
                if indices.iter().any(|&i| i >= *size) {
                    return Err(self.err(
                        format!("swizzle '.{member}' out of range for {}", base.glsl_name()),
                        span,
                    ));
                }
                if indices.len() == 1 {
                    Ok(GlslType::Scalar(*kind))
                } else {
                    Ok(GlslType::Vector(*kind, indices.len() as u8))
                }
            }
            _ => Err(self.err(
                format!("type {} has no members", base.glsl_name()),
                span,
            )),
        }
    }

    /// Validate that an expression denotes a writable storage location.
    fn check_lvalue(&self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Ident(name) => {
                let binding = self
                    .lookup(name)
                    .ok_or_else(|| self.err(format!("use of undeclared identifier '{name}'"), expr.span))?;
                if !binding.writable {
                    return Err(self.err(format!("'{name}' is read-only"), expr.span));
                }
                Ok(())
            }
            ExprKind::Index { base, .. } => self.check_lvalue(base),
            ExprKind::Member { base, member } => {
                // A swizzle write may not repeat components.
                if let Some(indices) = swizzle_indices(member) {
                    let mut seen = [false; 4];
                    for &i in &indices {
                        if seen[i as usize] {
                            return Err(self.err(
                                format!("swizzle '.{member}' repeats a component in assignment"),
                                expr.span,
                            ));
                        }
                        seen[i as usize] = true;
                    }
                }
                self.check_lvalue(base)
            }
            _ => Err(self.err("expression is not assignable", expr.span)),
        }
    }

    // ----- calls ----------------------------------------------------------

    fn check_call(
        &self,
        name: &str,
        args: &[GlslType],
        span: Span,
    ) -> Result<GlslType, CompileError> {
        // Constructors first: builtin type spellings and struct names.
        if let Some(ty) = GlslType::from_keyword(name) {
            return self.check_constructor(&ty, args, span);
        }
        if let Some(s) = self.structs.get(name) {
            let expected: Vec<_> = s.members.iter().map(|m| m.ty.clone()).collect();
            if args != expected.as_slice() {
                return Err(self.err(
                    format!("constructor arguments do not match struct '{}'", s.name),
                    span,
                ));
            }
            return Ok(GlslType::Struct(s.clone()));
        }

        if let Some(result) = self.check_builtin_call(name, args, span) {
            return result;
        }

        match self.symbols.function(name) {
            Some(func) => {
                if args != func.params.as_slice() {
                    let got: Vec<_> = args.iter().map(|t| t.glsl_name()).collect();
                    return Err(self.err(
                        format!(
                            "no matching call to '{}({})'",
                            name,
                            got.join(", ")
                        ),
                        span,
                    ));
                }
                Ok(func.ret.clone())
            }
            None => Err(self.err(format!("call to undeclared function '{name}'"), span)),
        }
    }

    fn check_constructor(
        &self,
        ty: &GlslType,
        args: &[GlslType],
        span: Span,
    ) -> Result<GlslType, CompileError> {
        let arg_components: u32 = args.iter().map(GlslType::component_count).sum();
        let invalid_arg = args
            .iter()
            .any(|a| !matches!(a, GlslType::Scalar(_) | GlslType::Vector(..) | GlslType::Matrix { .. }));
        if args.is_empty() || invalid_arg {
            return Err(self.err(
                format!("invalid constructor call for {}", ty.glsl_name()),
                span,
            ));
        }
        match ty {
            GlslType::Scalar(_) => {
                if args.len() == 1 && args[0].component_count() >= 1 {
                    Ok(ty.clone())
                } else {
                    Err(self.err(
                        format!("{} constructor takes one scalar argument", ty.glsl_name()),
                        span,
                    ))
                }
            }
            GlslType::Vector(_, size) => {
                let size = u32::from(*size);
                let single_splat = args.len() == 1 && args[0].is_scalar();
                let single_vector = args.len() == 1 && args[0].component_count() >= size;
                if single_splat || single_vector || arg_components == size {
                    Ok(ty.clone())
                } else {
                    Err(self.err(
                        format!(
                            "{} constructor needs {} components, got {}",
                            ty.glsl_name(),
                            size,
                            arg_components
                        ),
                        span,
                    ))
                }
            }
            GlslType::Matrix { cols, rows } => {
                let needed = u32::from(*cols) * u32::from(*rows);
                let single_scalar = args.len() == 1 && args[0].is_scalar();
                let same_matrix = args.len() == 1 && args[0] == *ty;
                let has_matrix_arg = args.iter().any(GlslType::is_matrix);
                if single_scalar || same_matrix || (!has_matrix_arg && arg_components == needed) {
                    Ok(ty.clone())
                } else {
                    Err(self.err(
                        format!("invalid {} constructor", ty.glsl_name()),
                        span,
                    ))
                }
            }
            _ => Err(self.err(
                format!("type {} has no constructor", ty.glsl_name()),
                span,
            )),
        }
    }

    /// Built-in function signature matching. Returns `None` when the name
    /// is not a built-in so user functions can be tried next.
    fn check_builtin_call(
        &self,
        name: &str,
        args: &[GlslType],
        span: Span,
    ) -> Option<Result<GlslType, CompileError>> {
        use GlslType::{Scalar, Vector};
        use ScalarKind::Float;

        let gen_float = |t: &GlslType| {
            matches!(t, Scalar(Float) | Vector(Float, _))
        };
        let float_scalar = Scalar(Float);
        let fail = |msg: String| Some(Err(self.err(msg, span)));
        let bad_args = || {
            let got: Vec<_> = args.iter().map(|t| t.glsl_name()).collect();
            fail(format!("no matching call to '{}({})'", name, got.join(", ")))
        };

        match name {
            // Componentwise float -> float, one argument.
            "sin" | "cos" | "tan" | "asin" | "acos" | "exp" | "exp2" | "log" | "log2"
            | "sqrt" | "inversesqrt" | "floor" | "ceil" | "fract" | "trunc" | "round"
            | "radians" | "degrees" | "sinh" | "cosh" | "tanh" | "asinh" | "acosh"
            | "atanh" | "normalize" => {
                if args.len() == 1 && gen_float(&args[0]) {
                    Some(Ok(args[0].clone()))
                } else {
                    bad_args()
                }
            }
            // atan(y_over_x) and atan(y, x).
            "atan" => match args {
                [a] if gen_float(a) => Some(Ok(a.clone())),
                [a, b] if gen_float(a) && a == b => Some(Ok(a.clone())),
                _ => bad_args(),
            },
            "pow" => match args {
                [a, b] if gen_float(a) && a == b => Some(Ok(a.clone())),
                _ => bad_args(),
            },
            "mod" => match args {
                [a, b] if gen_float(a) && (a == b || *b == float_scalar) => Some(Ok(a.clone())),
                _ => bad_args(),
            },
            "abs" | "sign" => match args {
                [a] if matches!(
                    a.scalar_kind(),
                    Some(ScalarKind::Float) | Some(ScalarKind::Int)
                ) && !a.is_matrix() =>
                {
                    Some(Ok(a.clone()))
                }
                _ => bad_args(),
            },
            "min" | "max" => match args {
                [a, b]
                    if !a.is_matrix()
                        && a.scalar_kind().is_some()
                        && a.scalar_kind() != Some(ScalarKind::Bool)
                        && (a == b || *b == Scalar(a.scalar_kind().expect("checked"))) =>
                {
                    Some(Ok(a.clone()))
                }
                _ => bad_args(),
            },
            "clamp" => match args {
                [a, b, c]
                    if !a.is_matrix()
                        && a.scalar_kind().is_some()
                        && a.scalar_kind() != Some(ScalarKind::Bool)
                        && ((a == b && a == c)
                            || (*b == Scalar(a.scalar_kind().expect("checked"))
                                && b == c)) =>
                {
                    Some(Ok(a.clone()))
                }
                _ => bad_args(),
            },
            "mix" => match args {
                [a, b, c] if gen_float(a) && a == b && (a == c || *c == float_scalar) => {
                    Some(Ok(a.clone()))
                }
                _ => bad_args(),
            },
            "step" => match args {
                [a, b] if gen_float(b) && (a == b || *a == float_scalar) => Some(Ok(b.clone())),
                _ => bad_args(),
            },
            "smoothstep" => match args {
                [a, b, c]
                    if gen_float(c) && ((a == b && b == c) || (*a == float_scalar && a == b)) =>
                {
                    Some(Ok(c.clone()))
                }
                _ => bad_args(),
            },
            "length" => match args {
                [a] if gen_float(a) => Some(Ok(float_scalar)),
                _ => bad_args(),
            },
            "distance" => match args {
                [a, b] if gen_float(a) && a == b => Some(Ok(float_scalar)),
                _ => bad_args(),
            },
            "dot" => match args {
                [a, b] if gen_float(a) && a == b => Some(Ok(float_scalar)),
                _ => bad_args(),
            },
            "cross" => match args {
                [Vector(Float, 3), Vector(Float, 3)] => Some(Ok(Vector(Float, 3))),
                _ => bad_args(),
            },
            "reflect" => match args {
                [a, b] if gen_float(a) && a == b => Some(Ok(a.clone())),
                _ => bad_args(),
            },
            "refract" => match args {
                [a, b, c] if gen_float(a) && a == b && *c == float_scalar => Some(Ok(a.clone())),
                _ => bad_args(),
            },
            "texture" => match args {
                [GlslType::Sampler(kind), coord]
                    if *coord == Vector(Float, kind.coord_components()) =>
                {
                    Some(Ok(Vector(Float, 4)))
                }
                _ => bad_args(),
            },
            _ => None,
        }
    }
}

/// Map a swizzle spelling to component indices. Accepts the xyzw, rgba, and
/// stpq alphabets, without mixing.
pub fn swizzle_indices(member: &str) -> Option<Vec<u8>> {
    if member.is_empty() || member.len() > 4 {
        return None;
    }
    const SETS: [&str; 3] = ["xyzw", "rgba", "stpq"];
    for set in SETS {
        let indices: Option<Vec<u8>> = member
            .chars()
            .map(|c| set.find(c).map(|i| i as u8))
            .collect();
        if let Some(indices) = indices {
            return Some(indices);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glsl::parser::parse_source;

    fn check_stage(stage: ShaderStage, body: &str) -> Result<TypedShader, CompileError> {
        let unit = parse_source(&format!("#version 300 es\n{body}")).expect("parse failure");
        check(stage, unit)
    }

    fn check_vs(body: &str) -> Result<TypedShader, CompileError> {
        check_stage(ShaderStage::Vertex, body)
    }

    fn check_fs(body: &str) -> Result<TypedShader, CompileError> {
        check_stage(ShaderStage::Fragment, body)
    }

    #[test]
    fn trivial_vertex_shader_checks() {
        let shader = check_vs("void main() { gl_Position = vec4(0.0); }").unwrap();
        assert!(shader.symbols.attributes.is_empty());
        assert!(shader.symbols.varyings.is_empty());
    }

    #[test]
    fn vertex_in_is_an_attribute() {
        let shader = check_vs("layout(location = 1) in vec3 a_pos;\nvoid main() { gl_Position = vec4(a_pos, 1.0); }")
            .unwrap();
        let attr = shader.symbols.attribute("a_pos").unwrap();
        assert_eq!(attr.location, Some(1));
        assert_eq!(attr.ty, GlslType::Vector(ScalarKind::Float, 3));
    }

    #[test]
    fn fragment_in_is_a_varying() {
        let shader =
            check_fs("precision mediump float;\nin vec2 v_uv;\nout vec4 color;\nvoid main() { color = vec4(v_uv, 0.0, 1.0); }")
                .unwrap();
        let varying = shader.symbols.varying("v_uv").unwrap();
        assert_eq!(varying.interpolation, Interpolation::Smooth);
    }

    #[test]
    fn integer_varying_without_flat_is_rejected() {
        let err = check_fs("in int v_id;\nout vec4 c;\nvoid main() { c = vec4(v_id); }").unwrap_err();
        assert!(err.to_string().contains("flat"));
        let err = check_vs("out uvec3 v_bits;\nvoid main() { gl_Position = vec4(0.0); }").unwrap_err();
        assert!(err.to_string().contains("flat"));
    }

    #[test]
    fn flat_integer_varying_is_accepted() {
        check_fs("flat in ivec4 v_id;\nout vec4 c;\nvoid main() { c = vec4(v_id); }").unwrap();
    }

    #[test]
    fn bool_varying_is_rejected() {
        let err = check_vs("out bool v_flag;\nvoid main() { gl_Position = vec4(0.0); }").unwrap_err();
        assert!(err.to_string().contains("bool"));
    }

    #[test]
    fn gl_position_is_predeclared_and_writable() {
        check_vs("void main() { gl_Position = vec4(1.0, 2.0, 3.0, 4.0); gl_PointSize = 2.0; }").unwrap();
    }

    #[test]
    fn frag_coord_is_read_only() {
        let err = check_fs("out vec4 c;\nvoid main() { gl_FragCoord = vec4(0.0); c = vec4(1.0); }")
            .unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn uniforms_are_read_only() {
        let err = check_vs("uniform float u_t;\nvoid main() { u_t = 1.0; gl_Position = vec4(0.0); }")
            .unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn no_implicit_conversions() {
        let err = check_vs("void main() { float x = 1; gl_Position = vec4(x); }").unwrap_err();
        assert!(err.to_string().contains("cannot initialize"));
    }

    #[test]
    fn constructor_conversions_are_allowed() {
        check_vs("void main() { float x = float(1); gl_Position = vec4(x); }").unwrap();
    }

    #[test]
    fn vector_constructor_component_count() {
        let err = check_vs("void main() { vec4 v = vec4(1.0, 2.0); gl_Position = v; }").unwrap_err();
        assert!(err.to_string().contains("components"));
        check_vs("void main() { vec4 v = vec4(vec2(0.0), 0.0, 1.0); gl_Position = v; }").unwrap();
    }

    #[test]
    fn swizzles_type_check() {
        let shader = check_vs(
            "void main() { vec4 v = vec4(1.0); vec2 w = v.xy; v.zw = w; gl_Position = v; }",
        )
        .unwrap();
        assert!(shader.saw_any_expr_of(GlslType::Vector(ScalarKind::Float, 2)));
    }

    #[test]
    fn repeated_swizzle_write_is_rejected() {
        let err =
            check_vs("void main() { vec4 v = vec4(1.0); v.xx = vec2(0.0); gl_Position = v; }")
                .unwrap_err();
        assert!(err.to_string().contains("repeats"));
    }

    #[test]
    fn matrix_vector_multiply() {
        check_vs(
            "uniform mat4 u_mvp;\nin vec4 a_pos;\nvoid main() { gl_Position = u_mvp * a_pos; }",
        )
        .unwrap();
    }

    #[test]
    fn matrix_shape_mismatch_is_rejected() {
        let err = check_vs("void main() { mat3 m = mat3(1.0); vec4 v = m * vec4(1.0); gl_Position = v; }")
            .unwrap_err();
        assert!(err.to_string().contains("cannot combine"));
    }

    #[test]
    fn user_function_calls_check_signatures() {
        check_vs(
            "float scale(float x, float k) { return x * k; }\nvoid main() { gl_Position = vec4(scale(1.0, 2.0)); }",
        )
        .unwrap();
        let err = check_vs(
            "float scale(float x) { return x; }\nvoid main() { gl_Position = vec4(scale(1)); }",
        )
        .unwrap_err();
        assert!(err.to_string().contains("no matching call"));
    }

    #[test]
    fn texture_requires_matching_coordinates() {
        check_fs(
            "uniform sampler2D u_tex;\nin vec2 v_uv;\nout vec4 c;\nvoid main() { c = texture(u_tex, v_uv); }",
        )
        .unwrap();
        let err = check_fs(
            "uniform sampler2D u_tex;\nout vec4 c;\nvoid main() { c = texture(u_tex, vec3(0.0)); }",
        )
        .unwrap_err();
        assert!(err.to_string().contains("no matching call"));
    }

    #[test]
    fn sampler_uniform_is_recorded_as_opaque() {
        let shader = check_fs(
            "uniform sampler2D u_tex;\nin vec2 v_uv;\nout vec4 c;\nvoid main() { c = texture(u_tex, v_uv); }",
        )
        .unwrap();
        let uniform = shader.symbols.uniform("u_tex").unwrap();
        assert_eq!(uniform.kind, UniformKind::Sampler);
        assert!(shader.symbols.references_samplers());
    }

    #[test]
    fn discard_only_in_fragment() {
        check_fs("out vec4 c;\nvoid main() { discard; c = vec4(0.0); }").unwrap();
        let err = check_vs("void main() { discard; gl_Position = vec4(0.0); }").unwrap_err();
        assert!(err.to_string().contains("fragment"));
    }

    #[test]
    fn missing_main_is_an_error() {
        let err = check_vs("float helper() { return 1.0; }").unwrap_err();
        assert!(err.to_string().contains("main"));
    }

    #[test]
    fn struct_member_access() {
        check_vs(
            "struct Light { vec3 dir; float power; };\nuniform Light u_light;\nvoid main() { gl_Position = vec4(u_light.dir * u_light.power, 1.0); }",
        )
        .unwrap();
    }

    #[test]
    fn constant_index_out_of_range() {
        let err = check_vs("void main() { vec3 v = vec3(0.0); float x = v[3]; gl_Position = vec4(x); }")
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    impl TypedShader {
        fn saw_any_expr_of(&self, ty: GlslType) -> bool {
            self.expr_types.values().any(|t| *t == ty)
        }
    }
}
