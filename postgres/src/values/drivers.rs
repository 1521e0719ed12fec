//! tokio-postgres `ToSql`/`FromSql` implementations for PostgresValue

#[cfg(feature = "tokio-postgres")]
mod postgres_impl {
    use super::super::PostgresValue;
    use bytes::{BufMut, BytesMut};
    use std::error::Error;
    use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type};

    type BoxError = Box<dyn Error + Sync + Send>;

    impl ToSql for PostgresValue {
        fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
            match self {
                PostgresValue::Null => Ok(IsNull::Yes),
                PostgresValue::Boolean(b) => b.to_sql(ty, out),
                PostgresValue::Smallint(_) | PostgresValue::Integer(_) | PostgresValue::Bigint(_) => {
                    let wide = self.as_i64().ok_or("integer value expected")?;
                    // Parameters are typed by the server; narrow or widen to match.
                    if *ty == Type::INT2 {
                        i16::try_from(wide)?.to_sql(ty, out)
                    } else if *ty == Type::INT4 {
                        i32::try_from(wide)?.to_sql(ty, out)
                    } else if *ty == Type::FLOAT4 {
                        (wide as f32).to_sql(ty, out)
                    } else if *ty == Type::FLOAT8 {
                        (wide as f64).to_sql(ty, out)
                    } else if *ty == Type::NUMERIC {
                        encode_numeric(&wide.to_string(), out)
                    } else if *ty == Type::TEXT || *ty == Type::VARCHAR {
                        wide.to_string().to_sql(ty, out)
                    } else {
                        wide.to_sql(ty, out)
                    }
                }
                PostgresValue::Real(f) => float_to_sql(f64::from(*f), ty, out),
                PostgresValue::DoublePrecision(f) => float_to_sql(*f, ty, out),
                PostgresValue::Numeric(n) => {
                    if *ty == Type::NUMERIC {
                        encode_numeric(n, out)
                    } else if *ty == Type::FLOAT8 || *ty == Type::FLOAT4 {
                        float_to_sql(n.parse::<f64>()?, ty, out)
                    } else {
                        n.as_str().to_sql(ty, out)
                    }
                }
                PostgresValue::Text(s) => s.as_str().to_sql(ty, out),
                PostgresValue::Bytea(bytes) => bytes.as_slice().to_sql(ty, out),
                PostgresValue::Json(json) => json.to_sql(ty, out),
                #[cfg(feature = "uuid")]
                PostgresValue::Uuid(uuid) => uuid.to_sql(ty, out),
                #[cfg(feature = "chrono")]
                PostgresValue::Date(date) => date.to_sql(ty, out),
                #[cfg(feature = "chrono")]
                PostgresValue::Timestamp(ts) => ts.to_sql(ty, out),
                #[cfg(feature = "chrono")]
                PostgresValue::TimestampTz(ts) => ts.to_sql(ty, out),
                PostgresValue::Array(items) => items.to_sql(ty, out),
            }
        }

        fn accepts(_ty: &Type) -> bool {
            true
        }

        tokio_postgres::types::to_sql_checked!();
    }

    fn float_to_sql(value: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if *ty == Type::FLOAT4 {
            (value as f32).to_sql(ty, out)
        } else if *ty == Type::NUMERIC {
            encode_numeric(&value.to_string(), out)
        } else {
            value.to_sql(ty, out)
        }
    }

    impl<'a> FromSql<'a> for PostgresValue {
        fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
            if let Kind::Array(_) = ty.kind() {
                return Vec::<PostgresValue>::from_sql(ty, raw).map(PostgresValue::Array);
            }
            if let Kind::Enum(_) = ty.kind() {
                return Ok(PostgresValue::Text(std::str::from_utf8(raw)?.to_owned()));
            }

            Ok(if *ty == Type::BOOL {
                PostgresValue::Boolean(bool::from_sql(ty, raw)?)
            } else if *ty == Type::INT2 {
                PostgresValue::Smallint(i16::from_sql(ty, raw)?)
            } else if *ty == Type::INT4 {
                PostgresValue::Integer(i32::from_sql(ty, raw)?)
            } else if *ty == Type::INT8 {
                PostgresValue::Bigint(i64::from_sql(ty, raw)?)
            } else if *ty == Type::FLOAT4 {
                PostgresValue::Real(f32::from_sql(ty, raw)?)
            } else if *ty == Type::FLOAT8 {
                PostgresValue::DoublePrecision(f64::from_sql(ty, raw)?)
            } else if *ty == Type::NUMERIC {
                PostgresValue::Numeric(decode_numeric(raw)?)
            } else if *ty == Type::BYTEA {
                PostgresValue::Bytea(raw.to_vec())
            } else if *ty == Type::JSON || *ty == Type::JSONB {
                PostgresValue::Json(serde_json::Value::from_sql(ty, raw)?)
            } else if *ty == Type::TEXT
                || *ty == Type::VARCHAR
                || *ty == Type::BPCHAR
                || *ty == Type::NAME
                || *ty == Type::UNKNOWN
            {
                PostgresValue::Text(String::from_sql(ty, raw)?)
            } else {
                return decode_optional(ty, raw);
            })
        }

        fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
            Ok(PostgresValue::Null)
        }

        fn accepts(_ty: &Type) -> bool {
            true
        }
    }

    #[allow(unused_variables)]
    fn decode_optional(ty: &Type, raw: &[u8]) -> Result<PostgresValue, BoxError> {
        #[cfg(feature = "uuid")]
        if *ty == Type::UUID {
            return Ok(PostgresValue::Uuid(uuid::Uuid::from_sql(ty, raw)?));
        }
        #[cfg(feature = "chrono")]
        {
            if *ty == Type::DATE {
                return Ok(PostgresValue::Date(chrono::NaiveDate::from_sql(ty, raw)?));
            }
            if *ty == Type::TIMESTAMP {
                return Ok(PostgresValue::Timestamp(chrono::NaiveDateTime::from_sql(ty, raw)?));
            }
            if *ty == Type::TIMESTAMPTZ {
                return Ok(PostgresValue::TimestampTz(
                    chrono::DateTime::<chrono::Utc>::from_sql(ty, raw)?,
                ));
            }
        }
        Err(format!("unsupported column type `{ty}`").into())
    }

    const NUMERIC_POS: u16 = 0x0000;
    const NUMERIC_NEG: u16 = 0x4000;
    const NUMERIC_NAN: u16 = 0xC000;

    /// Writes a decimal string in the binary NUMERIC wire format
    /// (base-10000 digit groups).
    fn encode_numeric(text: &str, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("nan") {
            out.put_i16(0);
            out.put_i16(0);
            out.put_u16(NUMERIC_NAN);
            out.put_u16(0);
            return Ok(IsNull::No);
        }

        let (sign, unsigned) = match text.strip_prefix('-') {
            Some(rest) => (NUMERIC_NEG, rest),
            None => (NUMERIC_POS, text.strip_prefix('+').unwrap_or(text)),
        };
        let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        if int_part.is_empty() && frac_part.is_empty()
            || !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit())
        {
            return Err(format!("invalid numeric `{text}`").into());
        }

        let int_part = int_part.trim_start_matches('0');
        let int_pad = (4 - int_part.len() % 4) % 4;
        let frac_pad = (4 - frac_part.len() % 4) % 4;
        let int_digits = format!("{}{int_part}", "0".repeat(int_pad));
        let frac_digits = format!("{frac_part}{}", "0".repeat(frac_pad));

        let group = |chunk: &[u8]| {
            chunk
                .iter()
                .fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'))
        };
        let int_groups: Vec<i16> = int_digits.as_bytes().chunks(4).map(group).collect();
        let mut digits: Vec<i16> = int_groups.clone();
        digits.extend(frac_digits.as_bytes().chunks(4).map(group));

        let mut weight = int_groups.len() as i16 - 1;
        let leading = digits.iter().take_while(|d| **d == 0).count();
        digits.drain(..leading);
        weight -= leading as i16;
        while digits.last() == Some(&0) {
            digits.pop();
        }

        let (sign, weight) = if digits.is_empty() {
            (NUMERIC_POS, 0)
        } else {
            (sign, weight)
        };
        out.put_i16(i16::try_from(digits.len())?);
        out.put_i16(weight);
        out.put_u16(sign);
        out.put_u16(u16::try_from(frac_part.len())?);
        for digit in digits {
            out.put_i16(digit);
        }
        Ok(IsNull::No)
    }

    fn decode_numeric(raw: &[u8]) -> Result<String, BoxError> {
        let word = |i: usize| -> Result<i16, BoxError> {
            raw.get(i * 2..i * 2 + 2)
                .map(|b| i16::from_be_bytes([b[0], b[1]]))
                .ok_or_else(|| "truncated numeric".into())
        };
        let ndigits = word(0)? as usize;
        let weight = word(1)?;
        let sign = word(2)? as u16;
        let dscale = word(3)? as usize;
        if sign == NUMERIC_NAN {
            return Ok("NaN".to_owned());
        }
        let digits = (0..ndigits)
            .map(|i| word(4 + i))
            .collect::<Result<Vec<_>, _>>()?;

        let mut int_part = String::new();
        for power in (0..=weight.max(0)).rev() {
            let index = (weight - power) as usize;
            let digit = if weight < 0 { 0 } else { digits.get(index).copied().unwrap_or(0) };
            if int_part.is_empty() {
                int_part.push_str(&digit.to_string());
            } else {
                int_part.push_str(&format!("{digit:04}"));
            }
        }

        let mut frac_part = String::new();
        let mut index = weight + 1;
        while frac_part.len() < dscale {
            let digit = if index < 0 {
                0
            } else {
                digits.get(index as usize).copied().unwrap_or(0)
            };
            frac_part.push_str(&format!("{digit:04}"));
            index += 1;
        }
        frac_part.truncate(dscale);

        let mut text = String::new();
        if sign == NUMERIC_NEG {
            text.push('-');
        }
        text.push_str(&int_part);
        if dscale > 0 {
            text.push('.');
            text.push_str(&frac_part);
        }
        Ok(text)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn round_trip(text: &str) -> String {
            let mut out = BytesMut::new();
            encode_numeric(text, &mut out).unwrap();
            decode_numeric(&out).unwrap()
        }

        #[test]
        fn numeric_wire_format_round_trips() {
            assert_eq!(round_trip("0"), "0");
            assert_eq!(round_trip("12345.678"), "12345.678");
            assert_eq!(round_trip("-0.05"), "-0.05");
            assert_eq!(round_trip("100000000"), "100000000");
            assert_eq!(round_trip("NaN"), "NaN");
        }

        #[test]
        fn invalid_numeric_is_rejected() {
            let mut out = BytesMut::new();
            assert!(encode_numeric("12a", &mut out).is_err());
            assert!(encode_numeric(".", &mut out).is_err());
        }
    }
}
