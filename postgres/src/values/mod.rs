//! PostgreSQL value type

mod conversions;
mod drivers;

pub use conversions::*;

use relq_core::{SQLParam, quote_bytea, quote_literal};

#[cfg(feature = "uuid")]
use uuid::Uuid;

#[cfg(feature = "chrono")]
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

//------------------------------------------------------------------------------
// PostgresValue Definition
//------------------------------------------------------------------------------

/// Represents a PostgreSQL value.
///
/// ```
/// use relq_postgres::values::PostgresValue;
///
/// let int_val: PostgresValue = 42i32.into();
/// assert!(matches!(int_val, PostgresValue::Integer(42)));
///
/// let str_val: PostgresValue = "hello".into();
/// assert!(matches!(str_val, PostgresValue::Text(_)));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PostgresValue {
    /// NULL value
    #[default]
    Null,
    /// BOOLEAN values
    Boolean(bool),
    /// SMALLINT values (16-bit signed integer)
    Smallint(i16),
    /// INTEGER values (32-bit signed integer)
    Integer(i32),
    /// BIGINT values (64-bit signed integer)
    Bigint(i64),
    /// REAL values (32-bit floating point)
    Real(f32),
    /// DOUBLE PRECISION values (64-bit floating point)
    DoublePrecision(f64),
    /// NUMERIC values, kept in their textual form
    Numeric(String),
    /// TEXT, VARCHAR, CHAR values
    Text(String),
    /// BYTEA values (binary data)
    Bytea(Vec<u8>),
    /// JSON and JSONB values
    Json(serde_json::Value),
    /// UUID values
    #[cfg(feature = "uuid")]
    Uuid(Uuid),
    /// DATE values
    #[cfg(feature = "chrono")]
    Date(NaiveDate),
    /// TIMESTAMP values (without timezone)
    #[cfg(feature = "chrono")]
    Timestamp(NaiveDateTime),
    /// TIMESTAMPTZ values
    #[cfg(feature = "chrono")]
    TimestampTz(DateTime<Utc>),
    /// Array of any PostgreSQL type
    Array(Vec<PostgresValue>),
}

impl PostgresValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, PostgresValue::Null)
    }

    /// The type name used when the value has to be cast explicitly.
    pub fn sql_type(&self) -> Option<&'static str> {
        Some(match self {
            PostgresValue::Null => return None,
            PostgresValue::Boolean(_) => "bool",
            PostgresValue::Smallint(_) => "int2",
            PostgresValue::Integer(_) => "int4",
            PostgresValue::Bigint(_) => "int8",
            PostgresValue::Real(_) => "float4",
            PostgresValue::DoublePrecision(_) => "float8",
            PostgresValue::Numeric(_) => "numeric",
            PostgresValue::Text(_) => "text",
            PostgresValue::Bytea(_) => "bytea",
            PostgresValue::Json(_) => "jsonb",
            #[cfg(feature = "uuid")]
            PostgresValue::Uuid(_) => "uuid",
            #[cfg(feature = "chrono")]
            PostgresValue::Date(_) => "date",
            #[cfg(feature = "chrono")]
            PostgresValue::Timestamp(_) => "timestamp",
            #[cfg(feature = "chrono")]
            PostgresValue::TimestampTz(_) => "timestamptz",
            PostgresValue::Array(items) => {
                match items.iter().find_map(PostgresValue::sql_type)? {
                    "bool" => "bool[]",
                    "int2" => "int2[]",
                    "int4" => "int4[]",
                    "int8" => "int8[]",
                    "float4" => "float4[]",
                    "float8" => "float8[]",
                    "numeric" => "numeric[]",
                    "bytea" => "bytea[]",
                    "jsonb" => "jsonb[]",
                    "uuid" => "uuid[]",
                    "date" => "date[]",
                    "timestamp" => "timestamp[]",
                    "timestamptz" => "timestamptz[]",
                    _ => "text[]",
                }
            }
        })
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PostgresValue::Smallint(i) => Some(i64::from(*i)),
            PostgresValue::Integer(i) => Some(i64::from(*i)),
            PostgresValue::Bigint(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PostgresValue::Real(f) => Some(f64::from(*f)),
            PostgresValue::DoublePrecision(f) => Some(*f),
            PostgresValue::Numeric(n) => n.parse().ok(),
            other => other.as_i64().map(|i| i as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PostgresValue::Text(s) | PostgresValue::Numeric(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PostgresValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            PostgresValue::Json(json) => Some(json),
            _ => None,
        }
    }

    /// Converts a JSON value produced by `row_to_json`/`json_agg` back into a
    /// value, used when relation sub-selects are decoded.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => PostgresValue::Null,
            serde_json::Value::Bool(b) => PostgresValue::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => PostgresValue::Bigint(i),
                None => n
                    .as_f64()
                    .map(PostgresValue::DoublePrecision)
                    .unwrap_or_else(|| PostgresValue::Numeric(n.to_string())),
            },
            serde_json::Value::String(s) => PostgresValue::Text(s),
            other => PostgresValue::Json(other),
        }
    }
}

impl SQLParam for PostgresValue {
    fn to_literal(&self) -> String {
        match self {
            PostgresValue::Null => "NULL".to_owned(),
            PostgresValue::Boolean(b) => b.to_string(),
            PostgresValue::Smallint(i) => i.to_string(),
            PostgresValue::Integer(i) => i.to_string(),
            PostgresValue::Bigint(i) => i.to_string(),
            PostgresValue::Real(f) => f.to_string(),
            PostgresValue::DoublePrecision(f) => f.to_string(),
            PostgresValue::Numeric(n) => n.clone(),
            PostgresValue::Text(s) => quote_literal(s),
            PostgresValue::Bytea(bytes) => quote_bytea(bytes),
            PostgresValue::Json(json) => format!("{}::jsonb", quote_literal(&json.to_string())),
            #[cfg(feature = "uuid")]
            PostgresValue::Uuid(uuid) => format!("'{uuid}'::uuid"),
            #[cfg(feature = "chrono")]
            PostgresValue::Date(date) => format!("'{date}'::date"),
            #[cfg(feature = "chrono")]
            PostgresValue::Timestamp(ts) => format!("'{ts}'::timestamp"),
            #[cfg(feature = "chrono")]
            PostgresValue::TimestampTz(ts) => format!("'{}'::timestamptz", ts.to_rfc3339()),
            PostgresValue::Array(items) => {
                let inner: Vec<String> = items.iter().map(SQLParam::to_literal).collect();
                format!("ARRAY[{}]", inner.join(", "))
            }
        }
    }
}

impl std::fmt::Display for PostgresValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostgresValue::Text(s) | PostgresValue::Numeric(s) => f.write_str(s),
            PostgresValue::Json(json) => write!(f, "{json}"),
            other => f.write_str(&other.to_literal()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        assert_eq!(PostgresValue::Null.to_literal(), "NULL");
        assert_eq!(PostgresValue::from("o'neil").to_literal(), "'o''neil'");
        assert_eq!(PostgresValue::from(7i64).to_literal(), "7");
        assert_eq!(
            PostgresValue::from(serde_json::json!({"a": 1})).to_literal(),
            r#"'{"a":1}'::jsonb"#
        );
        assert_eq!(
            PostgresValue::Array(vec![1i32.into(), 2i32.into()]).to_literal(),
            "ARRAY[1, 2]"
        );
    }

    #[test]
    fn sql_types() {
        assert_eq!(PostgresValue::from(1i32).sql_type(), Some("int4"));
        assert_eq!(PostgresValue::from("x").sql_type(), Some("text"));
        assert_eq!(PostgresValue::Null.sql_type(), None);
        assert_eq!(
            PostgresValue::Array(vec![PostgresValue::Null, 5i64.into()]).sql_type(),
            Some("int8[]")
        );
    }

    #[test]
    fn json_round_trip_keeps_scalars() {
        assert_eq!(
            PostgresValue::from_json(serde_json::json!(3)),
            PostgresValue::Bigint(3)
        );
        assert_eq!(
            PostgresValue::from_json(serde_json::json!("x")),
            PostgresValue::Text("x".into())
        );
        assert!(matches!(
            PostgresValue::from_json(serde_json::json!([1])),
            PostgresValue::Json(_)
        ));
    }
}
