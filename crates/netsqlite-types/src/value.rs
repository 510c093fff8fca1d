//! The closed value variant used for every SQL argument and result column.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A dynamically typed SQL scalar.
///
/// All wire conversions go through this type: RPC JSON bodies, raw-protocol
/// MessagePack envelopes, engine bindings, and the driver's native
/// conversions. Serialized adjacently tagged, e.g.
/// `{"type": "integer", "value": 42}` or `{"type": "null"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// Boolean. SQLite stores it as integer 0/1.
    Boolean(bool),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes (MessagePack `bin` on the raw protocol).
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl SqlValue {
    /// Returns the lowercase type label (matches the serialized tag).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Returns `true` for [`SqlValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Errors converting a [`SqlValue`] into a native type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// The value's variant cannot represent the requested type.
    #[error("cannot convert {found} value into {expected}")]
    TypeMismatch {
        /// Requested native type.
        expected: &'static str,
        /// Variant actually present.
        found: &'static str,
    },

    /// The value is numeric but outside the range of the requested type.
    #[error("value {0} out of range for {1}")]
    OutOfRange(i64, &'static str),
}

/// Conversion from a [`SqlValue`] into a native Rust scalar.
///
/// Implemented for the scalar types SQLite can hand back plus `Option<T>`
/// for nullable columns.
pub trait FromSqlValue: Sized {
    /// Performs the conversion.
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError>;
}

fn mismatch<T>(expected: &'static str, value: &SqlValue) -> Result<T, ValueError> {
    Err(ValueError::TypeMismatch {
        expected,
        found: value.type_name(),
    })
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        Ok(value)
    }
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Integer(i) => Ok(i),
            SqlValue::Boolean(b) => Ok(i64::from(b)),
            other => mismatch("i64", &other),
        }
    }
}

impl FromSqlValue for i32 {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        let wide = i64::from_sql_value(value)?;
        i32::try_from(wide).map_err(|_| ValueError::OutOfRange(wide, "i32"))
    }
}

impl FromSqlValue for f64 {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Float(f) => Ok(f),
            SqlValue::Integer(i) => Ok(i as f64),
            other => mismatch("f64", &other),
        }
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Boolean(b) => Ok(b),
            SqlValue::Integer(0) => Ok(false),
            SqlValue::Integer(1) => Ok(true),
            SqlValue::Integer(i) => Err(ValueError::OutOfRange(i, "bool")),
            other => mismatch("bool", &other),
        }
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Text(s) => Ok(s),
            other => mismatch("String", &other),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Bytes(b) => Ok(b),
            SqlValue::Text(s) => Ok(s.into_bytes()),
            other => mismatch("Vec<u8>", &other),
        }
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: SqlValue) -> Result<Self, ValueError> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql_value(other).map(Some),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_representation_is_tagged() {
        let json = serde_json::to_value(SqlValue::Integer(42)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "integer", "value": 42}));

        let json = serde_json::to_value(SqlValue::Null).unwrap();
        assert_eq!(json, serde_json::json!({"type": "null"}));

        let parsed: SqlValue =
            serde_json::from_value(serde_json::json!({"type": "text", "value": "k1"})).unwrap();
        assert_eq!(parsed, SqlValue::Text("k1".into()));
    }

    #[test]
    fn bytes_survive_messagepack() {
        let value = SqlValue::Bytes(vec![0, 159, 146, 150]);
        let packed = rmp_serde::to_vec_named(&value).unwrap();
        let unpacked: SqlValue = rmp_serde::from_slice(&packed).unwrap();
        assert_eq!(unpacked, value);
    }

    #[test]
    fn native_conversions() {
        assert_eq!(i64::from_sql_value(SqlValue::Integer(7)), Ok(7));
        assert_eq!(f64::from_sql_value(SqlValue::Integer(2)), Ok(2.0));
        assert_eq!(bool::from_sql_value(SqlValue::Integer(1)), Ok(true));
        assert_eq!(
            Option::<String>::from_sql_value(SqlValue::Null),
            Ok(None)
        );
        assert_eq!(
            Option::<String>::from_sql_value(SqlValue::Text("v1".into())),
            Ok(Some("v1".to_string()))
        );
    }

    #[test]
    fn conversion_errors_name_both_types() {
        let err = i64::from_sql_value(SqlValue::Text("x".into())).unwrap_err();
        assert_eq!(
            err,
            ValueError::TypeMismatch {
                expected: "i64",
                found: "text"
            }
        );
        assert!(matches!(
            i32::from_sql_value(SqlValue::Integer(i64::MAX)),
            Err(ValueError::OutOfRange(_, "i32"))
        ));
        assert!(matches!(
            bool::from_sql_value(SqlValue::Integer(2)),
            Err(ValueError::OutOfRange(2, "bool"))
        ));
    }

    #[test]
    fn option_into_value() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("a")), SqlValue::Text("a".into()));
    }
}
