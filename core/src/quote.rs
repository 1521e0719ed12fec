//! Identifier and literal quoting.

use core::fmt::Write;

/// Wraps an identifier in double quotes, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    write_ident(&mut out, name);
    out
}

pub(crate) fn write_ident(buf: &mut impl Write, name: &str) {
    let _ = buf.write_char('"');
    for ch in name.chars() {
        if ch == '"' {
            let _ = buf.write_char('"');
        }
        let _ = buf.write_char(ch);
    }
    let _ = buf.write_char('"');
}

/// Quotes a string literal.
///
/// Strings containing backslashes are emitted as `E'...'` escape strings so the
/// result is the same regardless of `standard_conforming_strings`.
pub fn quote_literal(value: &str) -> String {
    let escape = value.contains('\\');
    let mut out = String::with_capacity(value.len() + 3);
    if escape {
        out.push('E');
    }
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// Renders bytes as a hex `bytea` literal.
pub fn quote_bytea(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + 12);
    out.push_str("'\\x");
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out.push_str("'::bytea");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idents_double_embedded_quotes() {
        assert_eq!(quote_ident("users"), r#""users""#);
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }

    #[test]
    fn literals_escape_quotes_and_backslashes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal(r"a\b"), r"E'a\\b'");
        assert_eq!(quote_literal(""), "''");
    }

    #[test]
    fn bytea_renders_hex() {
        assert_eq!(quote_bytea(&[0x00, 0xab, 0x10]), r"'\x00ab10'::bytea");
    }
}
