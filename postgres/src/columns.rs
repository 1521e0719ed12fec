//! Column definitions.

use std::{borrow::Cow, sync::Arc};

use crate::values::PostgresValue;

/// Column data types, with the name used for explicit casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    Smallint,
    Integer,
    Bigint,
    Serial,
    BigSerial,
    Real,
    DoublePrecision,
    Numeric,
    Text,
    Varchar,
    Bytea,
    Json,
    Jsonb,
    Uuid,
    Date,
    Timestamp,
    TimestampTz,
}

impl ColumnType {
    pub const fn cast_name(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "bool",
            ColumnType::Smallint => "int2",
            ColumnType::Integer | ColumnType::Serial => "int4",
            ColumnType::Bigint | ColumnType::BigSerial => "int8",
            ColumnType::Real => "float4",
            ColumnType::DoublePrecision => "float8",
            ColumnType::Numeric => "numeric",
            ColumnType::Text => "text",
            ColumnType::Varchar => "varchar",
            ColumnType::Bytea => "bytea",
            ColumnType::Json => "json",
            ColumnType::Jsonb => "jsonb",
            ColumnType::Uuid => "uuid",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::TimestampTz => "timestamptz",
        }
    }

    /// Serial columns get their value from a sequence.
    pub const fn is_serial(&self) -> bool {
        matches!(self, ColumnType::Serial | ColumnType::BigSerial)
    }
}

/// Transforms a decoded value before it reaches the caller.
pub type ColumnParser = Arc<dyn Fn(PostgresValue) -> PostgresValue + Send + Sync>;

/// A column of a [`TableDef`](crate::TableDef).
#[derive(Clone)]
pub struct Column {
    pub name: Cow<'static, str>,
    pub ty: ColumnType,
    pub primary_key: bool,
    pub nullable: bool,
    pub has_default: bool,
    pub parser: Option<ColumnParser>,
}

macro_rules! column_ctors {
    ($($fn_name:ident => $ty:ident),* $(,)?) => {
        $(
            #[inline]
            pub fn $fn_name(name: impl Into<Cow<'static, str>>) -> Self {
                Self::new(name, ColumnType::$ty)
            }
        )*
    };
}

impl Column {
    pub fn new(name: impl Into<Cow<'static, str>>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            primary_key: false,
            nullable: false,
            has_default: ty.is_serial(),
            parser: None,
        }
    }

    column_ctors! {
        boolean => Boolean,
        smallint => Smallint,
        integer => Integer,
        bigint => Bigint,
        serial => Serial,
        bigserial => BigSerial,
        real => Real,
        double_precision => DoublePrecision,
        numeric => Numeric,
        text => Text,
        varchar => Varchar,
        bytea => Bytea,
        json => Json,
        jsonb => Jsonb,
        uuid => Uuid,
        date => Date,
        timestamp => Timestamp,
        timestamptz => TimestampTz,
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    /// Attach a parser applied to every value read from this column.
    pub fn parse(mut self, parser: impl Fn(PostgresValue) -> PostgresValue + Send + Sync + 'static) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    pub fn parse_value(&self, value: PostgresValue) -> PostgresValue {
        match &self.parser {
            Some(parser) => parser(value),
            None => value,
        }
    }
}

impl core::fmt::Debug for Column {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("primary_key", &self.primary_key)
            .field("nullable", &self.nullable)
            .field("has_default", &self.has_default)
            .field("parser", &self.parser.is_some())
            .finish()
    }
}
