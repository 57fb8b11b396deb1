//! Tokenizer for GLSL ES 3.00 source.
//!
//! The lexer also enforces the mandatory `#version 300 es` header: it must
//! be the first directive before any token, and no other preprocessor
//! directives are accepted.

use crate::error::CompileError;
use crate::glsl::ast::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    FloatLiteral(f32),
    IntLiteral(i64),
    UintLiteral(u32),

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Dot,
    Question,
    Colon,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    AmpAmp,
    PipePipe,
    Shl,
    Shr,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,

    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,

    PlusPlus,
    MinusMinus,

    Eof,
}

impl TokenKind {
    /// Short spelling used in "unexpected token" diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("'{name}'"),
            TokenKind::FloatLiteral(v) => format!("'{v}'"),
            TokenKind::IntLiteral(v) => format!("'{v}'"),
            TokenKind::UintLiteral(v) => format!("'{v}u'"),
            TokenKind::Eof => "end of source".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Dot => ".",
            TokenKind::Question => "?",
            TokenKind::Colon => ":",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Tilde => "~",
            TokenKind::Bang => "!",
            TokenKind::AmpAmp => "&&",
            TokenKind::PipePipe => "||",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::Assign => "=",
            TokenKind::PlusAssign => "+=",
            TokenKind::MinusAssign => "-=",
            TokenKind::StarAssign => "*=",
            TokenKind::SlashAssign => "/=",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::PlusPlus => "++",
            TokenKind::MinusMinus => "--",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

/// Tokenize a whole shader source, validating the version header.
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        col: 1,
    };
    lexer.run()
}

impl Lexer {
    fn run(&mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        let mut version_seen = false;

        loop {
            self.skip_trivia()?;
            let span = self.span();
            let Some(c) = self.peek() else {
                break;
            };

            if c == '#' {
                if version_seen || !tokens.is_empty() {
                    return Err(CompileError::parse(
                        "preprocessor directives other than the version header are not supported",
                        span,
                    ));
                }
                self.consume_version_directive(span)?;
                version_seen = true;
                continue;
            }

            if !version_seen {
                return Err(CompileError::parse(
                    "missing '#version 300 es' directive",
                    span,
                ));
            }

            let kind = if c.is_ascii_alphabetic() || c == '_' {
                self.lex_word()
            } else if c.is_ascii_digit() || (c == '.' && self.peek_ahead(1).is_some_and(|d| d.is_ascii_digit())) {
                self.lex_number(span)?
            } else {
                self.lex_operator(span)?
            };
            tokens.push(Token { kind, span });
        }

        if !version_seen {
            return Err(CompileError::parse(
                "missing '#version 300 es' directive",
                Span::new(1, 1),
            ));
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            span: self.span(),
        });
        Ok(tokens)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_ahead(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) -> Result<(), CompileError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_ahead(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_ahead(1) == Some('*') => {
                    let span = self.span();
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some('*') if self.peek_ahead(1) == Some('/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => {
                                return Err(CompileError::parse("unterminated block comment", span));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Consume a `#...` line; only `#version 300 es` is accepted.
    fn consume_version_directive(&mut self, span: Span) -> Result<(), CompileError> {
        let mut directive = String::new();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            directive.push(c);
            self.bump();
        }
        let normalized: Vec<&str> = directive.split_whitespace().collect();
        if normalized != ["#version", "300", "es"] {
            return Err(CompileError::parse(
                format!("expected '#version 300 es', found '{}'", directive.trim()),
                span,
            ));
        }
        Ok(())
    }

    fn lex_word(&mut self) -> TokenKind {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        // Keywords (including true/false) are resolved by the parser.
        TokenKind::Ident(word)
    }

    fn lex_number(&mut self, span: Span) -> Result<TokenKind, CompileError> {
        let mut text = String::new();
        let mut is_float = false;

        // Hex integers
        if self.peek() == Some('0') && matches!(self.peek_ahead(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    digits.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                return Err(CompileError::parse("malformed hexadecimal literal", span));
            }
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|_| CompileError::parse("hexadecimal literal out of range", span))?;
            if self.eat('u') || self.eat('U') {
                return Ok(TokenKind::UintLiteral(value as u32));
            }
            return Ok(TokenKind::IntLiteral(value));
        }

        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {
                    text.push(c);
                    self.bump();
                }
                '.' => {
                    if is_float {
                        break;
                    }
                    is_float = true;
                    text.push(c);
                    self.bump();
                }
                'e' | 'E' => {
                    is_float = true;
                    text.push(c);
                    self.bump();
                    if matches!(self.peek(), Some('+') | Some('-')) {
                        text.push(self.bump().unwrap());
                    }
                }
                _ => break,
            }
        }

        if self.eat('f') || self.eat('F') {
            is_float = true;
        }

        if is_float {
            let value: f32 = text
                .parse()
                .map_err(|_| CompileError::parse(format!("malformed float literal '{text}'"), span))?;
            Ok(TokenKind::FloatLiteral(value))
        } else if self.eat('u') || self.eat('U') {
            let value: u32 = text
                .parse()
                .map_err(|_| CompileError::parse(format!("unsigned literal '{text}' out of range"), span))?;
            Ok(TokenKind::UintLiteral(value))
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| CompileError::parse(format!("integer literal '{text}' out of range"), span))?;
            Ok(TokenKind::IntLiteral(value))
        }
    }

    fn lex_operator(&mut self, span: Span) -> Result<TokenKind, CompileError> {
        let c = self.bump().expect("caller checked peek");
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '.' => TokenKind::Dot,
            '?' => TokenKind::Question,
            ':' => TokenKind::Colon,
            '~' => TokenKind::Tilde,
            '^' => TokenKind::Caret,
            '+' => {
                if self.eat('+') {
                    TokenKind::PlusPlus
                } else if self.eat('=') {
                    TokenKind::PlusAssign
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    TokenKind::MinusMinus
                } else if self.eat('=') {
                    TokenKind::MinusAssign
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                if self.eat('=') {
                    TokenKind::StarAssign
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    TokenKind::SlashAssign
                } else {
                    TokenKind::Slash
                }
            }
            '%' => TokenKind::Percent,
            '&' => {
                if self.eat('&') {
                    TokenKind::AmpAmp
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::PipePipe
                } else {
                    TokenKind::Pipe
                }
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '=' => {
                if self.eat('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '<' => {
                if self.eat('<') {
                    TokenKind::Shl
                } else if self.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('>') {
                    TokenKind::Shr
                } else if self.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            other => {
                return Err(CompileError::parse(
                    format!("unexpected character '{other}'"),
                    span,
                ));
            }
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "#version 300 es\n";

    fn lex(body: &str) -> Vec<TokenKind> {
        tokenize(&format!("{HEADER}{body}"))
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn missing_version_is_an_error() {
        let err = tokenize("void main() {}").unwrap_err();
        assert!(err.to_string().contains("#version 300 es"));
    }

    #[test]
    fn wrong_version_is_an_error() {
        let err = tokenize("#version 100\nvoid main() {}").unwrap_err();
        assert!(err.to_string().contains("expected '#version 300 es'"));
    }

    #[test]
    fn comments_before_version_are_fine() {
        assert!(tokenize("// header comment\n#version 300 es\nvoid main(){}").is_ok());
    }

    #[test]
    fn numeric_literals() {
        let kinds = lex("1 2u 3.5 .5 1e3 2.0f 0x1F");
        assert_eq!(
            kinds,
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::UintLiteral(2),
                TokenKind::FloatLiteral(3.5),
                TokenKind::FloatLiteral(0.5),
                TokenKind::FloatLiteral(1000.0),
                TokenKind::FloatLiteral(2.0),
                TokenKind::IntLiteral(31),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn operators_longest_match() {
        let kinds = lex("<<= >= == ++ -= &&");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Shl,
                TokenKind::Assign,
                TokenKind::Ge,
                TokenKind::EqEq,
                TokenKind::PlusPlus,
                TokenKind::MinusAssign,
                TokenKind::AmpAmp,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn spans_track_lines_and_columns() {
        let tokens = tokenize("#version 300 es\nvoid main() {\n  x;\n}").unwrap();
        let x = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Ident("x".to_string()))
            .unwrap();
        assert_eq!(x.span, Span::new(3, 3));
    }

    #[test]
    fn later_directives_are_rejected() {
        let err = tokenize("#version 300 es\n#define FOO 1\nvoid main(){}").unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }
}
