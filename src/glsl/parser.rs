//! Recursive-descent parser for the GLSL ES 3.00 subset.
//!
//! The grammar follows the GLSL operator precedence table. Struct names are
//! tracked while parsing so declarations can be told apart from expression
//! statements without lookahead beyond one token.

use crate::error::CompileError;
use crate::glsl::ast::*;
use crate::glsl::lexer::{tokenize, Token, TokenKind};
use crate::glsl::types::GlslType;
use std::collections::HashSet;

/// Tokenize and parse one shader source into a translation unit.
pub fn parse_source(source: &str) -> Result<TranslationUnit, CompileError> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).run()
}

const PRECISION_WORDS: &[&str] = &["highp", "mediump", "lowp"];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    struct_names: HashSet<String>,
    next_expr_id: ExprId,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            struct_names: HashSet::new(),
            next_expr_id: 0,
        }
    }

    fn run(&mut self) -> Result<TranslationUnit, CompileError> {
        let mut decls = Vec::new();
        while !self.at(&TokenKind::Eof) {
            self.parse_external_declaration(&mut decls)?;
        }
        Ok(TranslationUnit { decls })
    }

    // ----- token plumbing -------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_ahead(&self, n: usize) -> &TokenKind {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn at_word(&self, word: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Ident(w) if w == word)
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.at_word(word) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, CompileError> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            Err(CompileError::parse(
                format!(
                    "expected {}, found {}",
                    kind.describe(),
                    self.peek_kind().describe()
                ),
                self.span(),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), CompileError> {
        let span = self.span();
        match self.bump().kind {
            TokenKind::Ident(name) => Ok((name, span)),
            other => Err(CompileError::parse(
                format!("expected identifier, found {}", other.describe()),
                span,
            )),
        }
    }

    fn expect_int_literal(&mut self) -> Result<(u32, Span), CompileError> {
        let span = self.span();
        match self.bump().kind {
            TokenKind::IntLiteral(v) if v >= 0 && v <= u32::MAX as i64 => Ok((v as u32, span)),
            TokenKind::UintLiteral(v) => Ok((v, span)),
            other => Err(CompileError::parse(
                format!("expected integer literal, found {}", other.describe()),
                span,
            )),
        }
    }

    fn mk_expr(&mut self, kind: ExprKind, span: Span) -> Expr {
        let id = self.next_expr_id;
        self.next_expr_id += 1;
        Expr { id, kind, span }
    }

    // ----- declarations ---------------------------------------------------

    fn parse_external_declaration(&mut self, decls: &mut Vec<Decl>) -> Result<(), CompileError> {
        let span = self.span();

        if self.eat_word("precision") {
            // precision <qualifier> <type> ;
            self.expect_ident()?;
            self.expect_ident()?;
            self.expect(&TokenKind::Semicolon)?;
            decls.push(Decl::Precision { span });
            return Ok(());
        }

        if self.at_word("struct") {
            let decl = self.parse_struct_decl()?;
            decls.push(Decl::Struct(decl));
            return Ok(());
        }

        let qualifiers = self.parse_qualifiers()?;
        let ty = self.parse_type_spec()?;
        let (name, name_span) = self.expect_ident()?;

        if self.at(&TokenKind::LParen) {
            if qualifiers != Qualifiers::default() {
                return Err(CompileError::parse(
                    "qualifiers are not allowed on function declarations",
                    span,
                ));
            }
            if let Some(decl) = self.parse_function_rest(ty, name, name_span)? {
                decls.push(decl);
            }
            return Ok(());
        }

        // Global variable declaration, possibly with several declarators.
        let mut current = (name, name_span);
        loop {
            let array_size = self.parse_array_suffix()?;
            let init = if self.eat(&TokenKind::Assign) {
                Some(self.parse_assignment_expr()?)
            } else {
                None
            };
            decls.push(Decl::Global(GlobalDecl {
                qualifiers: qualifiers.clone(),
                ty: ty.clone(),
                name: current.0,
                array_size,
                init,
                span: current.1,
            }));
            if self.eat(&TokenKind::Comma) {
                current = self.expect_ident()?;
            } else {
                break;
            }
        }
        self.expect(&TokenKind::Semicolon)?;
        Ok(())
    }

    fn parse_struct_decl(&mut self) -> Result<StructDecl, CompileError> {
        let span = self.span();
        self.bump(); // struct
        let (name, _) = self.expect_ident()?;
        self.expect(&TokenKind::LBrace)?;
        let mut members = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let member_span = self.span();
            self.skip_precision_words();
            let ty = self.parse_type_spec()?;
            let (member_name, _) = self.expect_ident()?;
            let array_size = self.parse_array_suffix()?;
            self.expect(&TokenKind::Semicolon)?;
            members.push(StructMemberDecl {
                ty,
                name: member_name,
                array_size,
                span: member_span,
            });
        }
        self.expect(&TokenKind::RBrace)?;
        self.expect(&TokenKind::Semicolon)?;
        if members.is_empty() {
            return Err(CompileError::parse(
                format!("struct '{name}' has no members"),
                span,
            ));
        }
        self.struct_names.insert(name.clone());
        Ok(StructDecl {
            name,
            members,
            span,
        })
    }

    fn parse_function_rest(
        &mut self,
        ret: TypeSpec,
        name: String,
        span: Span,
    ) -> Result<Option<Decl>, CompileError> {
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.at(&TokenKind::RParen) {
            // `void` as the sole parameter means an empty list.
            if self.at_word("void") && *self.peek_ahead(1) == TokenKind::RParen {
                self.bump();
            } else {
                loop {
                    params.push(self.parse_param()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
            }
        }
        self.expect(&TokenKind::RParen)?;

        if self.eat(&TokenKind::Semicolon) {
            // Forward prototype; the checker collects signatures up front,
            // so prototypes carry no information and are dropped.
            return Ok(None);
        }

        let body = self.parse_block()?;
        Ok(Some(Decl::Function(FunctionDecl {
            ret,
            name,
            params,
            body,
            span,
        })))
    }

    fn parse_param(&mut self) -> Result<Param, CompileError> {
        let span = self.span();
        let mut qualifier = ParamQualifier::In;
        loop {
            if self.eat_word("const") {
                continue;
            }
            if self.eat_word("inout") {
                qualifier = ParamQualifier::InOut;
                continue;
            }
            if self.eat_word("out") {
                qualifier = ParamQualifier::Out;
                continue;
            }
            if self.eat_word("in") {
                qualifier = ParamQualifier::In;
                continue;
            }
            if self.at_precision_word() {
                self.bump();
                continue;
            }
            break;
        }
        let ty = self.parse_type_spec()?;
        let (name, _) = self.expect_ident()?;
        let array_size = self.parse_array_suffix()?;
        Ok(Param {
            qualifier,
            ty,
            name,
            array_size,
            span,
        })
    }

    fn parse_qualifiers(&mut self) -> Result<Qualifiers, CompileError> {
        let mut qualifiers = Qualifiers::default();
        loop {
            if self.at_word("layout") {
                self.bump();
                self.expect(&TokenKind::LParen)?;
                let (key, key_span) = self.expect_ident()?;
                if key != "location" {
                    return Err(CompileError::parse(
                        format!("unsupported layout qualifier '{key}'"),
                        key_span,
                    ));
                }
                self.expect(&TokenKind::Assign)?;
                let (value, _) = self.expect_int_literal()?;
                self.expect(&TokenKind::RParen)?;
                qualifiers.layout_location = Some(value);
                continue;
            }
            if self.eat_word("const") {
                qualifiers.is_const = true;
                continue;
            }
            if self.eat_word("invariant") {
                qualifiers.invariant = true;
                continue;
            }
            if self.eat_word("centroid") {
                qualifiers.centroid = true;
                continue;
            }
            if self.eat_word("flat") {
                qualifiers.interpolation = Some(Interpolation::Flat);
                continue;
            }
            if self.eat_word("smooth") {
                qualifiers.interpolation = Some(Interpolation::Smooth);
                continue;
            }
            if self.eat_word("uniform") {
                qualifiers.storage = Some(StorageQualifier::Uniform);
                continue;
            }
            if self.at_word("in") && self.type_follows(1) {
                self.bump();
                qualifiers.storage = Some(StorageQualifier::In);
                continue;
            }
            if self.at_word("out") && self.type_follows(1) {
                self.bump();
                qualifiers.storage = Some(StorageQualifier::Out);
                continue;
            }
            if self.at_precision_word() {
                self.bump();
                continue;
            }
            break;
        }
        Ok(qualifiers)
    }

    fn at_precision_word(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Ident(w) if PRECISION_WORDS.contains(&w.as_str()))
    }

    fn skip_precision_words(&mut self) {
        while self.at_precision_word() {
            self.bump();
        }
    }

    /// Whether the token `n` ahead starts a type (possibly behind a
    /// precision word).
    fn type_follows(&self, n: usize) -> bool {
        let mut idx = n;
        if let TokenKind::Ident(w) = self.peek_ahead(idx) {
            if PRECISION_WORDS.contains(&w.as_str()) {
                idx += 1;
            }
        }
        match self.peek_ahead(idx) {
            TokenKind::Ident(w) => {
                GlslType::from_keyword(w).is_some() || self.struct_names.contains(w)
            }
            _ => false,
        }
    }

    fn parse_type_spec(&mut self) -> Result<TypeSpec, CompileError> {
        self.skip_precision_words();
        let (word, span) = self.expect_ident()?;
        if let Some(ty) = GlslType::from_keyword(&word) {
            return Ok(TypeSpec::Builtin(ty));
        }
        if self.struct_names.contains(&word) {
            return Ok(TypeSpec::Named(word));
        }
        Err(CompileError::parse(
            format!("unknown type name '{word}'"),
            span,
        ))
    }

    fn parse_array_suffix(&mut self) -> Result<Option<u32>, CompileError> {
        if !self.eat(&TokenKind::LBracket) {
            return Ok(None);
        }
        let (size, span) = self.expect_int_literal()?;
        if size == 0 {
            return Err(CompileError::parse("array size must be positive", span));
        }
        self.expect(&TokenKind::RBracket)?;
        Ok(Some(size))
    }

    // ----- statements -----------------------------------------------------

    fn parse_block(&mut self) -> Result<Block, CompileError> {
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(CompileError::parse("unterminated block", self.span()));
            }
            self.parse_statement_into(&mut stmts)?;
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Block { stmts })
    }

    /// Parse one statement; declarations with several declarators expand to
    /// several `Stmt::Decl` entries.
    fn parse_statement_into(&mut self, out: &mut Vec<Stmt>) -> Result<(), CompileError> {
        let span = self.span();

        if self.at(&TokenKind::LBrace) {
            let block = self.parse_block()?;
            out.push(Stmt::Block(block));
            return Ok(());
        }
        if self.eat(&TokenKind::Semicolon) {
            out.push(Stmt::Empty);
            return Ok(());
        }
        if self.at_word("if") {
            out.push(self.parse_if()?);
            return Ok(());
        }
        if self.at_word("for") {
            out.push(self.parse_for()?);
            return Ok(());
        }
        if self.at_word("while") {
            out.push(self.parse_while()?);
            return Ok(());
        }
        if self.eat_word("return") {
            let value = if self.at(&TokenKind::Semicolon) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect(&TokenKind::Semicolon)?;
            out.push(Stmt::Return { value, span });
            return Ok(());
        }
        if self.eat_word("break") {
            self.expect(&TokenKind::Semicolon)?;
            out.push(Stmt::Break(span));
            return Ok(());
        }
        if self.eat_word("continue") {
            self.expect(&TokenKind::Semicolon)?;
            out.push(Stmt::Continue(span));
            return Ok(());
        }
        if self.eat_word("discard") {
            self.expect(&TokenKind::Semicolon)?;
            out.push(Stmt::Discard(span));
            return Ok(());
        }

        if self.decl_starts_here() {
            let decls = self.parse_local_decls()?;
            out.extend(decls.into_iter().map(Stmt::Decl));
            return Ok(());
        }

        let expr = self.parse_expr()?;
        self.expect(&TokenKind::Semicolon)?;
        out.push(Stmt::Expr(expr));
        Ok(())
    }

    fn decl_starts_here(&self) -> bool {
        if self.at_word("const") || self.at_precision_word() {
            return true;
        }
        match self.peek_kind() {
            TokenKind::Ident(w) => {
                let is_type =
                    GlslType::from_keyword(w).is_some() || self.struct_names.contains(w);
                // A type name followed by an identifier is a declaration; a
                // type name followed by `(` is a constructor expression.
                is_type
                    && *w != "void"
                    && matches!(self.peek_ahead(1), TokenKind::Ident(_))
            }
            _ => false,
        }
    }

    fn parse_local_decls(&mut self) -> Result<Vec<LocalDecl>, CompileError> {
        let is_const = self.eat_word("const");
        let ty = self.parse_type_spec()?;
        let mut decls = Vec::new();
        loop {
            let (name, span) = self.expect_ident()?;
            let array_size = self.parse_array_suffix()?;
            let init = if self.eat(&TokenKind::Assign) {
                Some(self.parse_assignment_expr()?)
            } else {
                None
            };
            decls.push(LocalDecl {
                is_const,
                ty: ty.clone(),
                name,
                array_size,
                init,
                span,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::Semicolon)?;
        Ok(decls)
    }

    fn parse_if(&mut self) -> Result<Stmt, CompileError> {
        let span = self.span();
        self.bump(); // if
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        let then_branch = self.parse_branch_body()?;
        let else_branch = if self.eat_word("else") {
            if self.at_word("if") {
                let mut stmts = Vec::new();
                stmts.push(self.parse_if()?);
                Some(Block { stmts })
            } else {
                Some(self.parse_branch_body()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
            span,
        })
    }

    /// A branch body is a block or a single statement wrapped in one.
    fn parse_branch_body(&mut self) -> Result<Block, CompileError> {
        if self.at(&TokenKind::LBrace) {
            self.parse_block()
        } else {
            let mut stmts = Vec::new();
            self.parse_statement_into(&mut stmts)?;
            Ok(Block { stmts })
        }
    }

    fn parse_for(&mut self) -> Result<Stmt, CompileError> {
        let span = self.span();
        self.bump(); // for
        self.expect(&TokenKind::LParen)?;

        let init = if self.eat(&TokenKind::Semicolon) {
            None
        } else if self.decl_starts_here() {
            let mut decls = self.parse_local_decls()?;
            if decls.len() != 1 {
                return Err(CompileError::parse(
                    "a for initializer may declare only one variable",
                    span,
                ));
            }
            Some(Box::new(Stmt::Decl(decls.pop().expect("one declarator"))))
        } else {
            let expr = self.parse_expr()?;
            self.expect(&TokenKind::Semicolon)?;
            Some(Box::new(Stmt::Expr(expr)))
        };

        let cond = if self.at(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&TokenKind::Semicolon)?;

        let step = if self.at(&TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&TokenKind::RParen)?;

        let body = self.parse_branch_body()?;
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
            span,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, CompileError> {
        let span = self.span();
        self.bump(); // while
        self.expect(&TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.parse_branch_body()?;
        Ok(Stmt::While { cond, body, span })
    }

    // ----- expressions ----------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_assignment_expr()
    }

    fn parse_assignment_expr(&mut self) -> Result<Expr, CompileError> {
        let target = self.parse_ternary()?;
        let span = self.span();
        let op = match self.peek_kind() {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinaryOp::Add),
            TokenKind::MinusAssign => Some(BinaryOp::Sub),
            TokenKind::StarAssign => Some(BinaryOp::Mul),
            TokenKind::SlashAssign => Some(BinaryOp::Div),
            _ => return Ok(target),
        };
        self.bump();
        let value = self.parse_assignment_expr()?;
        Ok(self.mk_expr(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        ))
    }

    fn parse_ternary(&mut self) -> Result<Expr, CompileError> {
        let cond = self.parse_binary(0)?;
        if !self.at(&TokenKind::Question) {
            return Ok(cond);
        }
        let span = self.span();
        self.bump();
        let then_expr = self.parse_assignment_expr()?;
        self.expect(&TokenKind::Colon)?;
        let else_expr = self.parse_assignment_expr()?;
        Ok(self.mk_expr(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            span,
        ))
    }

    /// Precedence-climbing over the binary operator table.
    fn parse_binary(&mut self, min_level: u8) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let Some((op, level)) = self.peek_binary_op() else {
                break;
            };
            if level < min_level {
                break;
            }
            let span = self.span();
            self.bump();
            let rhs = self.parse_binary(level + 1)?;
            lhs = self.mk_expr(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn peek_binary_op(&self) -> Option<(BinaryOp, u8)> {
        let entry = match self.peek_kind() {
            TokenKind::PipePipe => (BinaryOp::LogicalOr, 0),
            TokenKind::AmpAmp => (BinaryOp::LogicalAnd, 1),
            TokenKind::Pipe => (BinaryOp::BitOr, 2),
            TokenKind::Caret => (BinaryOp::BitXor, 3),
            TokenKind::Amp => (BinaryOp::BitAnd, 4),
            TokenKind::EqEq => (BinaryOp::Eq, 5),
            TokenKind::NotEq => (BinaryOp::Ne, 5),
            TokenKind::Lt => (BinaryOp::Lt, 6),
            TokenKind::Le => (BinaryOp::Le, 6),
            TokenKind::Gt => (BinaryOp::Gt, 6),
            TokenKind::Ge => (BinaryOp::Ge, 6),
            TokenKind::Shl => (BinaryOp::Shl, 7),
            TokenKind::Shr => (BinaryOp::Shr, 7),
            TokenKind::Plus => (BinaryOp::Add, 8),
            TokenKind::Minus => (BinaryOp::Sub, 8),
            TokenKind::Star => (BinaryOp::Mul, 9),
            TokenKind::Slash => (BinaryOp::Div, 9),
            TokenKind::Percent => (BinaryOp::Mod, 9),
            _ => return None,
        };
        Some(entry)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let span = self.span();
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Plus => {
                // Unary plus is a no-op.
                self.bump();
                return self.parse_unary();
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let op = if self.at(&TokenKind::PlusPlus) {
                    IncDecOp::Inc
                } else {
                    IncDecOp::Dec
                };
                self.bump();
                let target = self.parse_unary()?;
                return Ok(self.mk_expr(
                    ExprKind::IncDec {
                        op,
                        prefix: true,
                        target: Box::new(target),
                    },
                    span,
                ));
            }
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let expr = self.parse_unary()?;
            return Ok(self.mk_expr(
                ExprKind::Unary {
                    op,
                    expr: Box::new(expr),
                },
                span,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_primary()?;
        loop {
            let span = self.span();
            match self.peek_kind() {
                TokenKind::LBracket => {
                    self.bump();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = self.mk_expr(
                        ExprKind::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                TokenKind::Dot => {
                    self.bump();
                    let (member, _) = self.expect_ident()?;
                    expr = self.mk_expr(
                        ExprKind::Member {
                            base: Box::new(expr),
                            member,
                        },
                        span,
                    );
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let op = if self.at(&TokenKind::PlusPlus) {
                        IncDecOp::Inc
                    } else {
                        IncDecOp::Dec
                    };
                    self.bump();
                    expr = self.mk_expr(
                        ExprKind::IncDec {
                            op,
                            prefix: false,
                            target: Box::new(expr),
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let span = self.span();
        match self.peek_kind().clone() {
            TokenKind::FloatLiteral(v) => {
                self.bump();
                Ok(self.mk_expr(ExprKind::FloatLiteral(v), span))
            }
            TokenKind::IntLiteral(v) => {
                self.bump();
                Ok(self.mk_expr(ExprKind::IntLiteral(v), span))
            }
            TokenKind::UintLiteral(v) => {
                self.bump();
                Ok(self.mk_expr(ExprKind::UintLiteral(v), span))
            }
            TokenKind::LParen => {
                self.bump();
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::Ident(word) => {
                self.bump();
                match word.as_str() {
                    "true" => Ok(self.mk_expr(ExprKind::BoolLiteral(true), span)),
                    "false" => Ok(self.mk_expr(ExprKind::BoolLiteral(false), span)),
                    _ => {
                        if self.at(&TokenKind::LParen) {
                            self.bump();
                            let mut args = Vec::new();
                            if !self.at(&TokenKind::RParen) {
                                loop {
                                    args.push(self.parse_assignment_expr()?);
                                    if !self.eat(&TokenKind::Comma) {
                                        break;
                                    }
                                }
                            }
                            self.expect(&TokenKind::RParen)?;
                            Ok(self.mk_expr(ExprKind::Call { name: word, args }, span))
                        } else {
                            Ok(self.mk_expr(ExprKind::Ident(word), span))
                        }
                    }
                }
            }
            other => Err(CompileError::parse(
                format!("unexpected token {}", other.describe()),
                span,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> TranslationUnit {
        parse_source(&format!("#version 300 es\n{body}")).expect("parse failure")
    }

    fn parse_err(body: &str) -> CompileError {
        parse_source(&format!("#version 300 es\n{body}")).expect_err("expected parse failure")
    }

    #[test]
    fn minimal_vertex_shader() {
        let unit = parse("void main() { gl_Position = vec4(0.0); }");
        assert_eq!(unit.decls.len(), 1);
        let Decl::Function(func) = &unit.decls[0] else {
            panic!("expected function");
        };
        assert_eq!(func.name, "main");
        assert!(func.params.is_empty());
        assert_eq!(func.body.stmts.len(), 1);
    }

    #[test]
    fn layout_location_qualifier() {
        let unit = parse("layout(location = 3) in vec4 a_pos;\nvoid main() {}");
        let Decl::Global(global) = &unit.decls[0] else {
            panic!("expected global");
        };
        assert_eq!(global.qualifiers.layout_location, Some(3));
        assert_eq!(global.qualifiers.storage, Some(StorageQualifier::In));
        assert_eq!(global.name, "a_pos");
    }

    #[test]
    fn flat_integer_varying() {
        let unit = parse("flat in ivec4 v_id;\nvoid main() {}");
        let Decl::Global(global) = &unit.decls[0] else {
            panic!("expected global");
        };
        assert_eq!(global.qualifiers.interpolation, Some(Interpolation::Flat));
    }

    #[test]
    fn multiple_declarators_split() {
        let unit = parse("in vec2 a, b;\nvoid main() {}");
        let names: Vec<_> = unit
            .decls
            .iter()
            .filter_map(|d| match d {
                Decl::Global(g) => Some(g.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn struct_then_variable() {
        let unit = parse("struct Light { vec3 dir; float power; };\nuniform Light u_light;\nvoid main() {}");
        assert!(matches!(unit.decls[0], Decl::Struct(_)));
        let Decl::Global(global) = &unit.decls[1] else {
            panic!("expected global");
        };
        assert_eq!(global.ty, TypeSpec::Named("Light".to_string()));
    }

    #[test]
    fn function_with_array_param() {
        let unit = parse("float sumArray(float arr[4]) { return arr[0]; }\nvoid main() {}");
        let Decl::Function(func) = &unit.decls[0] else {
            panic!("expected function");
        };
        assert_eq!(func.params.len(), 1);
        assert_eq!(func.params[0].array_size, Some(4));
    }

    #[test]
    fn operator_precedence_builds_expected_tree() {
        let unit = parse("void main() { float x = 1.0 + 2.0 * 3.0; }");
        let Decl::Function(func) = &unit.decls[0] else {
            panic!("expected function");
        };
        let Stmt::Decl(decl) = &func.body.stmts[0] else {
            panic!("expected declaration");
        };
        let ExprKind::Binary { op, rhs, .. } = &decl.init.as_ref().unwrap().kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn swizzle_and_index_postfix() {
        let unit = parse("void main() { vec4 v = vec4(0.0); v.xy = v.zw; float f = v[0]; }");
        let Decl::Function(func) = &unit.decls[0] else {
            panic!("expected function");
        };
        assert_eq!(func.body.stmts.len(), 3);
    }

    #[test]
    fn for_loop_with_inc() {
        let unit = parse("void main() { for (int i = 0; i < 4; i++) { } }");
        let Decl::Function(func) = &unit.decls[0] else {
            panic!("expected function");
        };
        let Stmt::For { init, cond, step, .. } = &func.body.stmts[0] else {
            panic!("expected for");
        };
        assert!(init.is_some());
        assert!(cond.is_some());
        assert!(matches!(
            step.as_ref().unwrap().kind,
            ExprKind::IncDec { prefix: false, .. }
        ));
    }

    #[test]
    fn prototypes_are_dropped() {
        let unit = parse("float helper(float x);\nfloat helper(float x) { return x; }\nvoid main() {}");
        let functions = unit
            .decls
            .iter()
            .filter(|d| matches!(d, Decl::Function(_)))
            .count();
        assert_eq!(functions, 2);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = parse_err("double x;\nvoid main() {}");
        assert!(err.to_string().contains("unknown type name"));
    }

    #[test]
    fn error_carries_position() {
        let err = parse_err("void main() { float ; }");
        let CompileError::Parse { span, .. } = err else {
            panic!("expected parse error");
        };
        assert_eq!(span.line, 2);
    }

    #[test]
    fn ternary_and_logical_ops() {
        parse("void main() { float x = (1.0 > 0.5 && true) ? 1.0 : 0.0; }");
    }
}
