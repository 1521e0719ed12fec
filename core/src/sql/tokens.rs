macro_rules! tokens {
    (
        keywords { $($kw:ident),* $(,)? }
        operators { $($op:ident => $op_str:literal),* $(,)? }
        punctuation { $($p:ident => $p_str:literal),* $(,)? }
    ) => {
        /// SQL keywords, operators and punctuation.
        #[allow(non_camel_case_types, clippy::upper_case_acronyms)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Token {
            $($kw,)*
            $($op,)*
            $($p,)*
        }

        impl Token {
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Token::$kw => stringify!($kw),)*
                    $(Token::$op => $op_str,)*
                    $(Token::$p => $p_str,)*
                }
            }

            #[inline]
            pub const fn is_keyword(&self) -> bool {
                matches!(self, $(Token::$kw)|*)
            }

            #[inline]
            pub const fn is_operator(&self) -> bool {
                matches!(self, $(Token::$op)|*)
            }
        }
    };
}

tokens! {
    keywords {
        SELECT, DISTINCT, ON, FROM, ONLY, AS, JOIN, INNER, LEFT, RIGHT, FULL, CROSS,
        LATERAL, WHERE, AND, OR, NOT, IN, IS, NULL, TRUE, FALSE, EXISTS, LIKE, ILIKE,
        BETWEEN, GROUP, BY, HAVING, WINDOW, UNION, INTERSECT, EXCEPT, ALL, ORDER, ASC,
        DESC, NULLS, FIRST, LAST, LIMIT, OFFSET, FOR, UPDATE, SHARE, NO, KEY, NOWAIT,
        SKIP, LOCKED, OF, WITH, RECURSIVE, MATERIALIZED, INSERT, INTO, VALUES, DEFAULT,
        SET, DELETE, RETURNING, CONFLICT, DO, NOTHING, OVER, PARTITION, FILTER,
    }
    operators {
        EQ => "=",
        NE => "<>",
        LT => "<",
        LE => "<=",
        GT => ">",
        GE => ">=",
        PLUS => "+",
        MINUS => "-",
        CONCAT => "||",
    }
    punctuation {
        LPAREN => "(",
        RPAREN => ")",
        COMMA => ",",
        DOT => ".",
        STAR => "*",
        CAST => "::",
    }
}

impl core::fmt::Display for Token {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
