//! Abstract syntax tree for the GLSL ES 3.00 subset.
//!
//! Every node carries a [`Span`] so diagnostics can point at the offending
//! source position. Expression nodes additionally carry a unique id; the
//! type checker keys its expression-type table on it.

use crate::glsl::types::GlslType;
use serde::Serialize;
use std::fmt;

/// A source position, 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A parsed type reference: either a built-in spelling or a struct name
/// that the type checker resolves against the declared structs.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    Builtin(GlslType),
    Named(String),
}

/// Storage qualifiers legal at global scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageQualifier {
    In,
    Out,
    Uniform,
}

/// Interpolation qualifiers on varyings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Interpolation {
    Smooth,
    Flat,
}

/// The qualifier set attached to one declaration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Qualifiers {
    pub storage: Option<StorageQualifier>,
    pub interpolation: Option<Interpolation>,
    pub centroid: bool,
    pub invariant: bool,
    pub layout_location: Option<u32>,
    pub is_const: bool,
}

/// One translation unit: the declarations of a single shader source.
#[derive(Debug, Clone)]
pub struct TranslationUnit {
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone)]
pub enum Decl {
    /// `precision mediump float;` is parsed and semantically ignored.
    Precision { span: Span },
    Struct(StructDecl),
    Global(GlobalDecl),
    Function(FunctionDecl),
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub members: Vec<StructMemberDecl>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct StructMemberDecl {
    pub ty: TypeSpec,
    pub name: String,
    pub array_size: Option<u32>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct GlobalDecl {
    pub qualifiers: Qualifiers,
    pub ty: TypeSpec,
    pub name: String,
    pub array_size: Option<u32>,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub ret: TypeSpec,
    pub name: String,
    pub params: Vec<Param>,
    pub body: Block,
    pub span: Span,
}

/// Parameter passing qualifiers. `in` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamQualifier {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub qualifier: ParamQualifier,
    pub ty: TypeSpec,
    pub name: String,
    pub array_size: Option<u32>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Decl(LocalDecl),
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
        span: Span,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Block,
        span: Span,
    },
    While {
        cond: Expr,
        body: Block,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Break(Span),
    Continue(Span),
    Discard(Span),
    Block(Block),
    Empty,
}

#[derive(Debug, Clone)]
pub struct LocalDecl {
    pub is_const: bool,
    pub ty: TypeSpec,
    pub name: String,
    pub array_size: Option<u32>,
    pub init: Option<Expr>,
    pub span: Span,
}

/// Unique id assigned by the parser, keying the expression-type table.
pub type ExprId = u32;

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    FloatLiteral(f32),
    IntLiteral(i64),
    UintLiteral(u32),
    BoolLiteral(bool),
    Ident(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Constructor, built-in, or user function call; resolved by name.
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// Struct field access or vector swizzle.
    Member {
        base: Box<Expr>,
        member: String,
    },
    Assign {
        /// `None` for plain `=`, otherwise the compound operator.
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    IncDec {
        op: IncDecOp,
        prefix: bool,
        target: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    /// Operators producing `bool` regardless of operand type.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }

    /// Operators restricted to integer operands.
    pub fn is_integer_only(self) -> bool {
        matches!(
            self,
            BinaryOp::Mod
                | BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor
                | BinaryOp::Shl
                | BinaryOp::Shr
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDecOp {
    Inc,
    Dec,
}
