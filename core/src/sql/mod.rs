mod chunk;
mod tokens;

use std::borrow::Cow;

use crate::{
    error::CompileError,
    traits::{SQLParam, ToSQL},
};
pub use chunk::*;
use core::fmt::{Display, Write};
use smallvec::SmallVec;
pub use tokens::*;

/// A rendered statement: SQL text with `$1..$n` placeholders plus the values
/// they refer to, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement<V> {
    pub text: String,
    pub values: Vec<V>,
}

impl<V> Statement<V> {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            values: Vec::new(),
        }
    }
}

/// SQL fragment builder with flat chunk storage.
///
/// Fragments are concatenated, never nested, so values stay in textual order
/// and [`SQL::build`] can number placeholders in one pass no matter how deeply
/// the sub-queries that produced them were nested.
#[derive(Debug, Clone, PartialEq)]
pub struct SQL<V: SQLParam> {
    pub chunks: SmallVec<[SQLChunk<V>; 8]>,
}

impl<V: SQLParam> SQL<V> {
    // ==================== constructors ====================

    #[inline]
    pub const fn empty() -> Self {
        Self {
            chunks: SmallVec::new_const(),
        }
    }

    #[inline]
    pub fn token(t: Token) -> Self {
        Self {
            chunks: smallvec::smallvec![SQLChunk::Token(t)],
        }
    }

    /// Creates SQL with a quoted identifier
    #[inline]
    pub fn ident(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            chunks: smallvec::smallvec![SQLChunk::Ident(name.into())],
        }
    }

    /// Creates a qualified column reference: "table"."column"
    #[inline]
    pub fn qualified(
        table: impl Into<Cow<'static, str>>,
        column: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            chunks: smallvec::smallvec![
                SQLChunk::Ident(table.into()),
                SQLChunk::Token(Token::DOT),
                SQLChunk::Ident(column.into()),
            ],
        }
    }

    /// Creates SQL with raw text (unquoted)
    #[inline]
    pub fn raw(text: impl Into<Cow<'static, str>>) -> Self {
        Self {
            chunks: smallvec::smallvec![SQLChunk::Raw(text.into())],
        }
    }

    #[inline]
    pub fn number(value: u64) -> Self {
        Self {
            chunks: smallvec::smallvec![SQLChunk::Number(value)],
        }
    }

    /// Creates SQL with a single parameter value
    #[inline]
    pub fn param(value: impl Into<V>) -> Self {
        Self {
            chunks: smallvec::smallvec![SQLChunk::Param(value.into())],
        }
    }

    /// Creates SQL for a function call: NAME(args)
    /// Subqueries are wrapped in parentheses: NAME((SELECT ...))
    pub fn func(name: impl Into<Cow<'static, str>>, args: SQL<V>) -> Self {
        let args = if args.is_subquery() {
            args.parens()
        } else {
            args
        };
        SQL::raw(name)
            .push(Token::LPAREN)
            .append(args)
            .push(Token::RPAREN)
    }

    /// Parses a raw template whose placeholders are local (`$1` refers to
    /// `values[0]`). The values are inlined as params in textual order, so the
    /// template renumbers correctly wherever it is spliced.
    ///
    /// Placeholders inside quoted literals, quoted identifiers and
    /// dollar-quoted strings are left untouched. A placeholder may be
    /// repeated; each occurrence binds its own copy.
    pub fn template(text: &str, values: impl IntoIterator<Item = V>) -> Result<Self, CompileError> {
        let values: Vec<V> = values.into_iter().collect();
        let mut sql = SQL::empty();
        let mut segment = String::new();
        let mut rest = text;

        while let Some(ch) = rest.chars().next() {
            if let Some(span) = quoted_span(rest) {
                let len = span
                    .map_err(|kind| CompileError::InvalidTemplate(format!("unterminated {kind} in `{text}`")))?;
                segment.push_str(&rest[..len]);
                rest = &rest[len..];
                continue;
            }

            let digits = rest
                .strip_prefix('$')
                .map_or(0, |tail| tail.bytes().take_while(u8::is_ascii_digit).count());
            if digits == 0 {
                segment.push(ch);
                rest = &rest[ch.len_utf8()..];
                continue;
            }

            let index: usize = rest[1..=digits]
                .parse()
                .map_err(|_| CompileError::InvalidTemplate(format!("placeholder overflow in `{text}`")))?;
            let value = index
                .checked_sub(1)
                .and_then(|i| values.get(i))
                .ok_or_else(|| {
                    CompileError::InvalidTemplate(format!(
                        "`${index}` has no value ({} provided)",
                        values.len()
                    ))
                })?;
            if !segment.is_empty() {
                sql.push_mut(SQLChunk::Raw(Cow::Owned(core::mem::take(&mut segment))));
            }
            sql.push_mut(SQLChunk::Param(value.clone()));
            rest = &rest[1 + digits..];
        }

        if !segment.is_empty() {
            sql.push_mut(SQLChunk::Raw(Cow::Owned(segment)));
        }
        Ok(sql)
    }

    // ==================== builder methods ====================

    /// Append another SQL fragment (flat extend)
    #[inline]
    pub fn append(mut self, other: impl Into<SQL<V>>) -> Self {
        self.append_mut(other);
        self
    }

    #[inline]
    pub fn append_mut(&mut self, other: impl Into<SQL<V>>) {
        let other = other.into();
        if self.chunks.is_empty() {
            self.chunks = other.chunks;
            return;
        }
        self.chunks.extend(other.chunks);
    }

    /// Push a single chunk
    #[inline]
    pub fn push(mut self, chunk: impl Into<SQLChunk<V>>) -> Self {
        self.chunks.push(chunk.into());
        self
    }

    #[inline]
    pub fn push_mut(&mut self, chunk: impl Into<SQLChunk<V>>) {
        self.chunks.push(chunk.into());
    }

    // ==================== combinators ====================

    /// Joins multiple SQL fragments with a separator
    pub fn join<T>(sqls: T, separator: Token) -> SQL<V>
    where
        T: IntoIterator,
        T::Item: ToSQL<V>,
    {
        let mut iter = sqls.into_iter();
        let Some(first) = iter.next() else {
            return SQL::empty();
        };

        let mut result = first.into_sql();
        for item in iter {
            result.chunks.push(SQLChunk::Token(separator));
            result.chunks.extend(item.into_sql().chunks);
        }
        result
    }

    /// Wrap in parentheses: (self)
    #[inline]
    pub fn parens(self) -> Self {
        SQL::token(Token::LPAREN).append(self).push(Token::RPAREN)
    }

    /// Check if this SQL fragment is a subquery (starts with SELECT or WITH)
    #[inline]
    pub fn is_subquery(&self) -> bool {
        matches!(
            self.chunks.first(),
            Some(SQLChunk::Token(Token::SELECT | Token::WITH))
        )
    }

    /// self AS "name"
    pub fn alias(self, name: impl Into<Cow<'static, str>>) -> SQL<V> {
        self.push(Token::AS).push(SQLChunk::Ident(name.into()))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    // ==================== output methods ====================

    /// Returns an iterator over the parameter values in placeholder order
    pub fn params(&self) -> impl Iterator<Item = &V> {
        self.chunks.iter().filter_map(|chunk| match chunk {
            SQLChunk::Param(value) => Some(value),
            _ => None,
        })
    }

    /// Renders the SQL text with `$1, $2, ...` placeholders.
    pub fn sql(&self) -> String {
        let mut buf = String::with_capacity(self.chunks.len().saturating_mul(8).max(64));
        self.write_to(&mut buf, false);
        buf
    }

    /// Renders the SQL text with every value inlined as a literal.
    ///
    /// Only for statements Postgres cannot parameterize, and for logging.
    pub fn inline(&self) -> String {
        let mut buf = String::with_capacity(self.chunks.len().saturating_mul(8).max(64));
        self.write_to(&mut buf, true);
        buf
    }

    /// Generates the SQL text and collects the values in a single pass.
    ///
    /// The `n`-th placeholder in the text always refers to `values[n - 1]`.
    pub fn build(self) -> Statement<V> {
        let text = self.sql();
        let values = self
            .chunks
            .into_iter()
            .filter_map(|chunk| match chunk {
                SQLChunk::Param(value) => Some(value),
                _ => None,
            })
            .collect();
        Statement { text, values }
    }

    fn write_to(&self, buf: &mut impl Write, inline: bool) {
        let mut param_index = 1usize;
        for (i, chunk) in self.chunks.iter().enumerate() {
            match chunk {
                SQLChunk::Param(_) if !inline => {
                    let _ = write!(buf, "${param_index}");
                    param_index += 1;
                }
                _ => chunk.write(buf),
            }

            if self.needs_space(i) {
                let _ = buf.write_char(' ');
            }
        }
    }

    fn needs_space(&self, index: usize) -> bool {
        let Some(next) = self.chunks.get(index + 1) else {
            return false;
        };
        chunk_needs_space(&self.chunks[index], next)
    }
}

/// Byte length of the quoted span opening `rest`: a `'literal'`, a
/// `"identifier"` or a `$tag$ ... $tag$` string. `None` when `rest` does not
/// open one; the error names the span kind when it never closes.
fn quoted_span(rest: &str) -> Option<Result<usize, &'static str>> {
    let (close, kind) = match *rest.as_bytes().first()? {
        b'\'' => ("'", "literal"),
        b'"' => ("\"", "quoted identifier"),
        b'$' => {
            let tail = &rest[1..];
            if tail.starts_with(|c: char| c.is_ascii_digit()) {
                return None;
            }
            let tag_len = tail.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))?;
            if !tail[tag_len..].starts_with('$') {
                return None;
            }
            (&rest[..tag_len + 2], "dollar-quoted string")
        }
        _ => return None,
    };
    let open = close.len();
    Some(
        rest[open..]
            .find(close)
            .map(|end| open + end + close.len())
            .ok_or(kind),
    )
}

// ==================== trait implementations ====================

impl<V: SQLParam> Default for SQL<V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<V: SQLParam> From<Token> for SQL<V> {
    fn from(value: Token) -> Self {
        SQL::token(value)
    }
}

impl<V: SQLParam> From<&'static str> for SQL<V> {
    fn from(s: &'static str) -> Self {
        SQL::raw(s)
    }
}

impl<V: SQLParam> Display for SQL<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let params: Vec<_> = self.params().collect();
        write!(f, r#"sql: "{}", params: {:?}"#, self.sql(), params)
    }
}

impl<V: SQLParam> ToSQL<V> for SQL<V> {
    fn to_sql(&self) -> SQL<V> {
        self.clone()
    }

    fn into_sql(self) -> SQL<V> {
        self
    }
}

impl<V: SQLParam> FromIterator<SQLChunk<V>> for SQL<V> {
    fn from_iter<I: IntoIterator<Item = SQLChunk<V>>>(iter: I) -> Self {
        Self {
            chunks: SmallVec::from_iter(iter),
        }
    }
}

impl<V: SQLParam> IntoIterator for SQL<V> {
    type Item = SQLChunk<V>;
    type IntoIter = smallvec::IntoIter<[SQLChunk<V>; 8]>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Int(i64);

    impl SQLParam for Int {
        fn to_literal(&self) -> String {
            self.0.to_string()
        }
    }

    type Sql = SQL<Int>;

    #[test]
    fn numbers_placeholders_in_textual_order() {
        let inner = Sql::token(Token::SELECT)
            .append(Sql::qualified("t", "id"))
            .push(Token::FROM)
            .append(Sql::ident("t"))
            .push(Token::WHERE)
            .append(Sql::ident("a"))
            .push(Token::EQ)
            .append(Sql::param(Int(2)));
        let sql = Sql::token(Token::SELECT)
            .append(Sql::param(Int(1)))
            .push(Token::COMMA)
            .append(inner.parens())
            .push(Token::COMMA)
            .append(Sql::param(Int(3)));

        let statement = sql.build();
        assert_eq!(
            statement.text,
            r#"SELECT $1, (SELECT "t"."id" FROM "t" WHERE "a" = $2), $3"#
        );
        assert_eq!(statement.values, vec![Int(1), Int(2), Int(3)]);
    }

    #[test]
    fn rendering_is_idempotent() {
        let sql = Sql::token(Token::SELECT).append(Sql::param(Int(7))).alias("x");
        assert_eq!(sql.sql(), sql.sql());
        assert_eq!(sql.clone().build(), sql.build());
    }

    #[test]
    fn function_calls_and_casts_are_glued() {
        let sql = Sql::func("count", Sql::token(Token::STAR))
            .push(Token::COMMA)
            .append(Sql::param(Int(1)))
            .push(Token::CAST)
            .append(Sql::raw("int4"));
        assert_eq!(sql.sql(), "count(*), $1::int4");
    }

    #[test]
    fn template_renumbers_inside_parent() {
        let template = Sql::template("a = $1 AND b = $2 OR c = $1", [Int(10), Int(20)]).unwrap();
        let sql = Sql::token(Token::WHERE)
            .append(Sql::ident("x"))
            .push(Token::EQ)
            .append(Sql::param(Int(5)))
            .push(Token::AND)
            .append(template.parens());

        let statement = sql.build();
        assert_eq!(
            statement.text,
            r#"WHERE "x" = $1 AND (a = $2 AND b = $3 OR c = $4)"#
        );
        assert_eq!(statement.values, vec![Int(5), Int(10), Int(20), Int(10)]);
    }

    #[test]
    fn template_keeps_casts_and_literals() {
        let sql = Sql::template("$1::int8 + '$2'", [Int(1)]).unwrap();
        assert_eq!(sql.sql(), "$1::int8 + '$2'");
    }

    #[test]
    fn template_skips_quoted_identifiers_and_dollar_quotes() {
        let template = Sql::template(r#""col$1", $$ $1 $$, $fn$ $2 $fn$, $1"#, [Int(7)]).unwrap();
        let statement = Sql::param(Int(5)).push(Token::COMMA).append(template).build();
        assert_eq!(statement.text, r#"$1, "col$1", $$ $1 $$, $fn$ $2 $fn$, $2"#);
        assert_eq!(statement.values, vec![Int(5), Int(7)]);

        assert!(matches!(
            Sql::template("$tag$ never closed", []),
            Err(CompileError::InvalidTemplate(message)) if message.contains("dollar-quoted")
        ));
    }

    #[test]
    fn template_rejects_missing_values() {
        assert!(matches!(
            Sql::template("a = $2", [Int(1)]),
            Err(CompileError::InvalidTemplate(_))
        ));
        assert!(matches!(
            Sql::template("a = $0", [Int(1)]),
            Err(CompileError::InvalidTemplate(_))
        ));
        assert!(matches!(
            Sql::template("a = 'oops", []),
            Err(CompileError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn inline_renders_literals() {
        let sql = Sql::ident("n").push(Token::EQ).append(Sql::param(Int(3)));
        assert_eq!(sql.inline(), r#""n" = 3"#);
    }
}
