//! Conversions into and out of [`PostgresValue`].

use super::PostgresValue;
use relq_core::{Error, Result};

#[cfg(feature = "uuid")]
use uuid::Uuid;

#[cfg(feature = "chrono")]
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for PostgresValue {
                #[inline]
                fn from(value: $ty) -> Self {
                    PostgresValue::$variant(value.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Boolean,
    i16 => Smallint,
    i32 => Integer,
    i64 => Bigint,
    f32 => Real,
    f64 => DoublePrecision,
    String => Text,
    &str => Text,
    &String => Text,
    Vec<u8> => Bytea,
    &[u8] => Bytea,
    serde_json::Value => Json,
}

#[cfg(feature = "uuid")]
impl_from! { Uuid => Uuid }

#[cfg(feature = "chrono")]
impl_from! {
    NaiveDate => Date,
    NaiveDateTime => Timestamp,
    DateTime<Utc> => TimestampTz,
}

impl<T: Into<PostgresValue>> From<Option<T>> for PostgresValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PostgresValue::Null, Into::into)
    }
}

macro_rules! impl_from_vec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for PostgresValue {
                fn from(values: Vec<$ty>) -> Self {
                    PostgresValue::Array(values.into_iter().map(Into::into).collect())
                }
            }
        )*
    };
}

impl_from_vec!(bool, i16, i32, i64, f64, String, &str);

//------------------------------------------------------------------------------
// Decoding
//------------------------------------------------------------------------------

/// Conversion from a decoded column value into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: PostgresValue) -> Result<Self>;
}

fn mismatch<T>(expected: &str, value: &PostgresValue) -> Result<T> {
    Err(Error::Mapping(format!("expected {expected}, got {value:?}")))
}

impl FromValue for PostgresValue {
    fn from_value(value: PostgresValue) -> Result<Self> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: PostgresValue) -> Result<Self> {
        match value {
            PostgresValue::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: PostgresValue) -> Result<Self> {
        match value {
            PostgresValue::Boolean(b) => Ok(b),
            PostgresValue::Json(serde_json::Value::Bool(b)) => Ok(b),
            other => mismatch("bool", &other),
        }
    }
}

macro_rules! impl_from_value_int {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: PostgresValue) -> Result<Self> {
                    let wide = match &value {
                        PostgresValue::Numeric(n) => n.parse::<i64>().ok(),
                        other => other.as_i64(),
                    };
                    match wide.map(<$ty>::try_from) {
                        Some(Ok(v)) => Ok(v),
                        _ => mismatch(stringify!($ty), &value),
                    }
                }
            }
        )*
    };
}

impl_from_value_int!(i16, i32, i64);

impl FromValue for f64 {
    fn from_value(value: PostgresValue) -> Result<Self> {
        match value.as_f64() {
            Some(f) => Ok(f),
            None => mismatch("f64", &value),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: PostgresValue) -> Result<Self> {
        match value {
            PostgresValue::Real(f) => Ok(f),
            other => f64::from_value(other).map(|f| f as f32),
        }
    }
}

impl FromValue for String {
    fn from_value(value: PostgresValue) -> Result<Self> {
        match value {
            PostgresValue::Text(s) | PostgresValue::Numeric(s) => Ok(s),
            other => mismatch("text", &other),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: PostgresValue) -> Result<Self> {
        match value {
            PostgresValue::Bytea(bytes) => Ok(bytes),
            other => mismatch("bytea", &other),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: PostgresValue) -> Result<Self> {
        Ok(match value {
            PostgresValue::Json(json) => json,
            PostgresValue::Null => serde_json::Value::Null,
            PostgresValue::Boolean(b) => serde_json::Value::Bool(b),
            PostgresValue::Text(s) => serde_json::Value::String(s),
            other => match other.as_i64() {
                Some(i) => serde_json::Value::from(i),
                None => match other.as_f64() {
                    Some(f) => serde_json::Value::from(f),
                    None => return mismatch("json", &other),
                },
            },
        })
    }
}

#[cfg(feature = "uuid")]
impl FromValue for Uuid {
    fn from_value(value: PostgresValue) -> Result<Self> {
        match value {
            PostgresValue::Uuid(uuid) => Ok(uuid),
            PostgresValue::Text(s) => {
                Uuid::parse_str(&s).map_err(|err| Error::Mapping(err.to_string()))
            }
            other => mismatch("uuid", &other),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromValue for DateTime<Utc> {
    fn from_value(value: PostgresValue) -> Result<Self> {
        match value {
            PostgresValue::TimestampTz(ts) => Ok(ts),
            PostgresValue::Timestamp(ts) => Ok(ts.and_utc()),
            PostgresValue::Text(s) => DateTime::parse_from_rfc3339(&s)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|err| Error::Mapping(err.to_string())),
            other => mismatch("timestamptz", &other),
        }
    }
}

#[cfg(feature = "chrono")]
impl FromValue for NaiveDate {
    fn from_value(value: PostgresValue) -> Result<Self> {
        match value {
            PostgresValue::Date(date) => Ok(date),
            other => mismatch("date", &other),
        }
    }
}
