use std::borrow::Cow;

use crate::{quote::write_ident, sql::tokens::Token, traits::SQLParam};
use core::fmt::Write;

/// A SQL chunk represents a part of an SQL statement.
///
/// - `Token` - SQL keywords and operators (SELECT, FROM, =, etc.)
/// - `Ident` - Quoted identifiers ("table_name", "column_name")
/// - `Raw` - Unquoted raw SQL text (function names, template text)
/// - `Number` - Unsigned integer literal (LIMIT, OFFSET)
/// - `Param` - A bound value, rendered as `$n` when the statement is built
#[derive(Debug, Clone, PartialEq)]
pub enum SQLChunk<V: SQLParam> {
    Token(Token),
    Ident(Cow<'static, str>),
    Raw(Cow<'static, str>),
    Number(u64),
    Param(V),
}

impl<V: SQLParam> SQLChunk<V> {
    #[inline]
    pub const fn token(t: Token) -> Self {
        Self::Token(t)
    }

    #[inline]
    pub fn ident(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Ident(name.into())
    }

    #[inline]
    pub fn raw(text: impl Into<Cow<'static, str>>) -> Self {
        Self::Raw(text.into())
    }

    /// Write chunk content to buffer. Params are written by the caller.
    pub(crate) fn write(&self, buf: &mut impl Write) {
        match self {
            SQLChunk::Token(token) => {
                let _ = buf.write_str(token.as_str());
            }
            SQLChunk::Ident(name) => write_ident(buf, name),
            SQLChunk::Raw(text) => {
                let _ = buf.write_str(text);
            }
            SQLChunk::Number(n) => {
                let _ = write!(buf, "{n}");
            }
            SQLChunk::Param(value) => {
                let _ = buf.write_str(&value.to_literal());
            }
        }
    }

    #[inline]
    fn is_raw(&self) -> bool {
        matches!(self, SQLChunk::Raw(_))
    }
}

impl<V: SQLParam> From<Token> for SQLChunk<V> {
    fn from(value: Token) -> Self {
        SQLChunk::Token(value)
    }
}

/// Canonical spacing logic for SQL chunk rendering.
pub(crate) fn chunk_needs_space<V: SQLParam>(current: &SQLChunk<V>, next: &SQLChunk<V>) -> bool {
    if let SQLChunk::Raw(text) = current
        && (text.ends_with(' ') || text.ends_with('('))
    {
        return false;
    }

    if let SQLChunk::Raw(text) = next
        && (text.starts_with(' ') || text.starts_with(')') || text.starts_with(','))
    {
        return false;
    }

    // Template text glued to its placeholders: `$1::int4`, `-$2`
    if (current.is_raw() && matches!(next, SQLChunk::Param(_)))
        || (matches!(current, SQLChunk::Param(_)) && next.is_raw())
    {
        return false;
    }

    match (current, next) {
        (_, SQLChunk::Token(Token::RPAREN | Token::COMMA | Token::DOT | Token::CAST)) => false,
        (SQLChunk::Token(Token::LPAREN | Token::DOT | Token::CAST), _) => false,
        (SQLChunk::Token(Token::COMMA), _) => true,
        // `count(`, `"v"("a")` stay glued; `AS (`, `IN (`, `= (` do not
        (SQLChunk::Token(t), SQLChunk::Token(Token::LPAREN)) => t.is_keyword() || t.is_operator(),
        (_, SQLChunk::Token(Token::LPAREN)) => false,
        _ => true,
    }
}
