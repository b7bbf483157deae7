//! Cell values and the total order used for sorting.

use polars::prelude::AnyValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// One decoded cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Date, time, datetime or duration: ordered by its physical integer in the
    /// column's unit and shown as polars formats it.
    #[serde(serialize_with = "serialize_temporal", skip_deserializing)]
    Temporal(i64, String),
    Str(String),
}

fn serialize_temporal<S: serde::Serializer>(
    _physical: &i64,
    text: &String,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(text)
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Rank of the value's type in the cross-type order:
    /// bool < number < temporal < string < null.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::Temporal(..) => 2,
            Value::Str(_) => 3,
            Value::Null => 4,
        }
    }

    /// Total ascending order. Nulls sort after every other value and ints and
    /// floats compare exactly, without rounding the int. `-0.0` equals `0.0`;
    /// NaN sorts after +inf (negative NaN before -inf).
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b)),
            (Value::Int(a), Value::Float(b)) => cmp_int_float(*a, *b),
            (Value::Float(a), Value::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Value::Temporal(a, ta), Value::Temporal(b, tb)) => {
                a.cmp(b).then_with(|| ta.cmp(tb))
            }
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

/// Exact comparison of an integer with a float.
fn cmp_int_float(int: i64, float: f64) -> Ordering {
    // 2^63 as a float; every finite float below it and at or above -2^63
    // truncates to an i64 without loss.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if float >= LIMIT {
        return Ordering::Less;
    }
    if float < -LIMIT {
        return Ordering::Greater;
    }
    let whole = float.trunc();
    int.cmp(&(whole as i64)).then_with(|| {
        if float > whole {
            Ordering::Less
        } else if float < whole {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Temporal(_, text) => f.write_str(text),
            Value::Str(s) => f.write_str(s),
        }
    }
}

impl From<AnyValue<'_>> for Value {
    fn from(value: AnyValue<'_>) -> Self {
        match value {
            AnyValue::Null => Value::Null,
            AnyValue::Boolean(b) => Value::Bool(b),
            AnyValue::Int8(i) => Value::Int(i as i64),
            AnyValue::Int16(i) => Value::Int(i as i64),
            AnyValue::Int32(i) => Value::Int(i as i64),
            AnyValue::Int64(i) => Value::Int(i),
            AnyValue::UInt8(i) => Value::Int(i as i64),
            AnyValue::UInt16(i) => Value::Int(i as i64),
            AnyValue::UInt32(i) => Value::Int(i as i64),
            AnyValue::UInt64(i) => i64::try_from(i)
                .map(Value::Int)
                .unwrap_or(Value::Float(i as f64)),
            AnyValue::Float32(x) => Value::Float(x as f64),
            AnyValue::Float64(x) => Value::Float(x),
            AnyValue::String(s) => Value::Str(s.to_string()),
            AnyValue::StringOwned(s) => Value::Str(s.to_string()),
            AnyValue::Date(days) => Value::Temporal(days as i64, value.to_string()),
            AnyValue::Datetime(ticks, ..) | AnyValue::DatetimeOwned(ticks, ..) => {
                Value::Temporal(ticks, value.to_string())
            }
            AnyValue::Duration(ticks, _) => Value::Temporal(ticks, value.to_string()),
            AnyValue::Time(nanos) => Value::Temporal(nanos, value.to_string()),
            other => Value::Str(other.to_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::TimeUnit;

    fn sorted(mut values: Vec<Value>) -> Vec<Value> {
        values.sort_by(|a, b| a.total_cmp(b));
        values
    }

    #[test]
    fn test_nulls_sort_last() {
        let values = vec![Value::Null, Value::Int(3), Value::Null, Value::Int(-1)];
        assert_eq!(
            sorted(values),
            vec![Value::Int(-1), Value::Int(3), Value::Null, Value::Null]
        );
    }

    #[test]
    fn test_mixed_numbers_compare_numerically() {
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(2.5)), Ordering::Less);
        assert_eq!(Value::Float(2.0).total_cmp(&Value::Int(2)), Ordering::Equal);
        assert_eq!(
            Value::Float(f64::NAN).total_cmp(&Value::Float(f64::INFINITY)),
            Ordering::Greater
        );
        assert_eq!(
            Value::Float(f64::NAN).total_cmp(&Value::Null),
            Ordering::Less
        );
    }

    #[test]
    fn test_cross_type_order() {
        let values = vec![
            Value::from("b"),
            Value::Null,
            Value::from(1),
            Value::from(true),
            Value::from("a"),
        ];
        assert_eq!(
            sorted(values),
            vec![
                Value::Bool(true),
                Value::Int(1),
                Value::from("a"),
                Value::from("b"),
                Value::Null
            ]
        );
    }

    #[test]
    fn test_from_any_value() {
        assert_eq!(Value::from(AnyValue::Int32(4)), Value::Int(4));
        assert_eq!(Value::from(AnyValue::Null), Value::Null);
        assert_eq!(Value::from(AnyValue::String("x")), Value::from("x"));
        assert_eq!(Value::from(AnyValue::Float64(0.5)), Value::Float(0.5));
        assert_eq!(Value::from(AnyValue::UInt64(u64::MAX)), Value::Float(u64::MAX as f64));
    }

    #[test]
    fn test_small_integers_are_numeric() {
        let nine = Value::from(AnyValue::Int16(9));
        let ten = Value::from(AnyValue::Int16(10));
        assert_eq!(nine, Value::Int(9));
        assert_eq!(nine.total_cmp(&ten), Ordering::Less);
        assert_eq!(Value::from(AnyValue::Int8(-3)), Value::Int(-3));
        assert_eq!(Value::from(AnyValue::UInt8(200)), Value::Int(200));
        assert_eq!(Value::from(AnyValue::UInt16(60000)), Value::Int(60000));
    }

    #[test]
    fn test_temporal_values_order_by_physical_value() {
        let day = Value::from(AnyValue::Duration(86_400_000, TimeUnit::Milliseconds));
        let two_hours = Value::from(AnyValue::Duration(7_200_000, TimeUnit::Milliseconds));
        assert!(matches!(day, Value::Temporal(86_400_000, _)));
        assert_eq!(two_hours.total_cmp(&day), Ordering::Less);

        let early = Value::from(AnyValue::Date(9));
        let late = Value::from(AnyValue::Date(10));
        assert_eq!(early.total_cmp(&late), Ordering::Less);
        assert_eq!(late.to_string(), "1970-01-11");
        assert_eq!(
            serde_json::to_string(&late).unwrap(),
            r#""1970-01-11""#
        );
        assert_eq!(late.total_cmp(&Value::from("a")), Ordering::Less);
        assert_eq!(late.total_cmp(&Value::Int(i64::MAX)), Ordering::Greater);
    }

    #[test]
    fn test_int_float_order_is_transitive_beyond_f64_precision() {
        let big = 1i64 << 53;
        let float = Value::Float(big as f64);
        assert_eq!(Value::Int(big).total_cmp(&float), Ordering::Equal);
        assert_eq!(Value::Int(big + 1).total_cmp(&float), Ordering::Greater);
        assert_eq!(float.total_cmp(&Value::Int(big + 1)), Ordering::Less);
        assert_eq!(
            Value::Int(i64::MAX).total_cmp(&Value::Float(i64::MAX as f64)),
            Ordering::Less
        );
        assert_eq!(Value::Int(-1).total_cmp(&Value::Float(-0.5)), Ordering::Less);
        assert_eq!(Value::Float(-0.0).total_cmp(&Value::Float(0.0)), Ordering::Equal);

        let mut values = vec![
            Value::Int(big + 1),
            Value::Float(big as f64),
            Value::Int(big),
            Value::Float(f64::NAN),
            Value::Int(big - 1),
        ];
        values.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(values[0], Value::Int(big - 1));
        assert_eq!(values[3], Value::Int(big + 1));
        assert!(matches!(values[4], Value::Float(x) if x.is_nan()));
    }

    #[test]
    fn test_serializes_untagged() {
        let json = serde_json::to_string(&vec![
            Value::Null,
            Value::Int(1),
            Value::from("s"),
            Value::Bool(false),
        ])
        .unwrap();
        assert_eq!(json, r#"[null,1,"s",false]"#);
    }
}
