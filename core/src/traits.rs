use crate::sql::SQL;

/// A value that can be bound as a statement parameter.
///
/// `to_literal` renders the value as an inline SQL literal. It is used only for
/// statements Postgres cannot parameterize (DDL, debugging output).
pub trait SQLParam: Clone + core::fmt::Debug + PartialEq {
    fn to_literal(&self) -> String;
}

/// Conversion into a SQL fragment.
pub trait ToSQL<V: SQLParam> {
    fn to_sql(&self) -> SQL<V>;

    /// Consume self and return SQL without cloning.
    fn into_sql(self) -> SQL<V>
    where
        Self: Sized,
    {
        self.to_sql()
    }

    fn alias(&self, alias: &str) -> SQL<V> {
        self.to_sql().alias(alias.to_owned())
    }
}
