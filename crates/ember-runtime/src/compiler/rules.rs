//! Pratt precedence table
//!
//! Grounded on `original_source/clox/src/compiler.c`'s `rules[]` array
//! and the precedence ladder in spec.md §4.1. Expressed as two plain
//! match functions rather than a literal array of function pointers —
//! a `fn(&mut Compiler, bool)` table in Rust either needs every handler
//! to share one signature via trait objects or leans on `unsafe`
//! transmutes between method pointers, neither of which buys anything
//! a match arm doesn't already give you for a fixed, closed set of
//! token kinds (spec.md §9 explicitly leaves this encoding open).

use crate::token::TokenKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    pub fn next(self) -> Self {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

/// Whether `kind` has a prefix parser at all — used to detect "expect
/// expression" in `parse_precedence`.
pub fn has_prefix_rule(kind: TokenKind) -> bool {
    !matches!(
        kind,
        TokenKind::Eof
            | TokenKind::Error
            | TokenKind::Comma
            | TokenKind::Semicolon
            | TokenKind::RightParen
            | TokenKind::RightBrace
            | TokenKind::Equal
            | TokenKind::EqualEqual
            | TokenKind::BangEqual
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Plus
            | TokenKind::Slash
            | TokenKind::Star
            | TokenKind::And
            | TokenKind::Or
            | TokenKind::Class
            | TokenKind::Else
            | TokenKind::For
            | TokenKind::Fun
            | TokenKind::If
            | TokenKind::Print
            | TokenKind::Return
            | TokenKind::Var
            | TokenKind::While
    )
}

pub fn infix_precedence(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Or => Precedence::Or,
        TokenKind::And => Precedence::And,
        TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equality,
        TokenKind::Less | TokenKind::LessEqual | TokenKind::Greater | TokenKind::GreaterEqual => {
            Precedence::Comparison
        }
        TokenKind::Plus | TokenKind::Minus => Precedence::Term,
        TokenKind::Star | TokenKind::Slash => Precedence::Factor,
        TokenKind::LeftParen | TokenKind::Dot => Precedence::Call,
        _ => Precedence::None,
    }
}
