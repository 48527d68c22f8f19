use crate::catalog::types::{ColumnType, TypeCategory, TypeName, Value};
use crate::error::AlterError;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Context a coercion is requested in; later variants permit more casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CoercionContext {
    Implicit,
    Assignment,
    Explicit,
}

/// How a value of one type is turned into another.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CoercionPath {
    /// Binary-compatible; the stored bytes are reinterpreted unchanged.
    Relabel,
    /// Same representation, but values longer than the limit are refused.
    LengthCheck(i32),
    /// Value-level conversion.
    Convert,
}

impl CoercionPath {
    pub fn is_relabel(self) -> bool {
        matches!(self, CoercionPath::Relabel)
    }
}

/// Finds the cast path between two non-domain types.
pub fn find_coercion_path(
    from: &TypeName,
    to: &TypeName,
    ctx: CoercionContext,
) -> Option<CoercionPath> {
    use ColumnType as T;
    let (src, dst) = (&from.ty, &to.ty);
    if src == dst {
        return Some(length_path(from.typmod, to.typmod));
    }
    match (src.category(), dst.category()) {
        (TypeCategory::String, TypeCategory::String) => {
            // varchar -> text is a pure relabel; text -> varchar(n) needs a length check.
            Some(length_path(from.typmod, to.typmod))
        }
        (TypeCategory::Numeric, TypeCategory::Numeric) => {
            let (s, d) = (src.numeric_rank()?, dst.numeric_rank()?);
            if d > s || ctx >= CoercionContext::Assignment {
                Some(CoercionPath::Convert)
            } else {
                None
            }
        }
        (_, TypeCategory::String) if ctx >= CoercionContext::Assignment => {
            Some(CoercionPath::Convert)
        }
        (TypeCategory::String, _) if ctx == CoercionContext::Explicit => match dst {
            T::Blob | T::Boolean | T::Timestamp | T::Json => Some(CoercionPath::Convert),
            _ if dst.numeric_rank().is_some() => Some(CoercionPath::Convert),
            _ => None,
        },
        (TypeCategory::Boolean, TypeCategory::Numeric)
        | (TypeCategory::Numeric, TypeCategory::Boolean)
            if ctx == CoercionContext::Explicit
                && !matches!(src, T::Float)
                && !matches!(dst, T::Float) =>
        {
            Some(CoercionPath::Convert)
        }
        _ => None,
    }
}

fn length_path(from_typmod: i32, to_typmod: i32) -> CoercionPath {
    if to_typmod < 0 || (from_typmod >= 0 && to_typmod >= from_typmod) {
        CoercionPath::Relabel
    } else {
        CoercionPath::LengthCheck(to_typmod)
    }
}

/// Converts a datum to the representation of `to`.
pub fn convert_value(value: &Value, to: &TypeName) -> Result<Value, AlterError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let out = match &to.ty {
        ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt => {
            let v = match value {
                Value::Integer(v) => *v,
                Value::Float(f) => {
                    let rounded = f.round_ties_even();
                    if !rounded.is_finite() || rounded > i64::MAX as f64 || rounded < i64::MIN as f64
                    {
                        return Err(out_of_range(&to.ty));
                    }
                    rounded as i64
                }
                Value::Boolean(b) => i64::from(*b),
                Value::Text(s) => s.trim().parse::<i64>().map_err(|_| AlterError::DataException {
                    message: format!("invalid input syntax for type {}: \"{}\"", to.ty.name(), s),
                })?,
                other => return Err(cannot_convert(other, to)),
            };
            Value::Integer(check_integer_range(v, &to.ty)?)
        }
        ColumnType::Float => match value {
            Value::Integer(v) => Value::Float(*v as f64),
            Value::Float(f) => Value::Float(*f),
            Value::Text(s) => Value::Float(s.trim().parse::<f64>().map_err(|_| {
                AlterError::DataException {
                    message: format!("invalid input syntax for type double precision: \"{s}\""),
                }
            })?),
            other => return Err(cannot_convert(other, to)),
        },
        ColumnType::Text | ColumnType::Varchar => {
            let text: CompactString = match value {
                Value::Text(s) | Value::Json(s) => s.clone(),
                Value::Integer(v) | Value::Timestamp(v) => v.to_string().into(),
                Value::Float(f) => format_float(*f).into(),
                Value::Boolean(b) => if *b { "true" } else { "false" }.into(),
                Value::Blob(b) => {
                    let mut out = String::from("\\x");
                    for byte in b {
                        out.push_str(&format!("{byte:02x}"));
                    }
                    out.into()
                }
                Value::Null => return Ok(Value::Null),
            };
            if matches!(to.ty, ColumnType::Varchar) && to.typmod >= 0 {
                check_length(&text, to.typmod)?;
            }
            Value::Text(text)
        }
        ColumnType::Boolean => match value {
            Value::Boolean(b) => Value::Boolean(*b),
            Value::Integer(v) => Value::Boolean(*v != 0),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "yes" | "y" | "on" | "1" => Value::Boolean(true),
                "f" | "false" | "no" | "n" | "off" | "0" => Value::Boolean(false),
                _ => {
                    return Err(AlterError::DataException {
                        message: format!("invalid input syntax for type boolean: \"{s}\""),
                    });
                }
            },
            other => return Err(cannot_convert(other, to)),
        },
        ColumnType::Timestamp => match value {
            Value::Timestamp(v) => Value::Timestamp(*v),
            Value::Text(s) => Value::Timestamp(s.trim().parse::<i64>().map_err(|_| {
                AlterError::DataException {
                    message: format!("invalid input syntax for type timestamp: \"{s}\""),
                }
            })?),
            other => return Err(cannot_convert(other, to)),
        },
        ColumnType::Json => match value {
            Value::Json(s) => Value::Json(s.clone()),
            Value::Text(s) => {
                serde_json::from_str::<serde_json::Value>(s).map_err(|e| {
                    AlterError::DataException {
                        message: format!("invalid input syntax for type json: {e}"),
                    }
                })?;
                Value::Json(s.clone())
            }
            other => return Err(cannot_convert(other, to)),
        },
        ColumnType::Blob => match value {
            Value::Blob(b) => Value::Blob(b.clone()),
            Value::Text(s) => Value::Blob(s.as_bytes().to_vec()),
            other => return Err(cannot_convert(other, to)),
        },
        ColumnType::Domain(name) => {
            return Err(AlterError::internal(format!(
                "domain {name} must be coerced through its base type"
            )));
        }
    };
    Ok(out)
}

pub fn check_length(text: &str, limit: i32) -> Result<(), AlterError> {
    if limit >= 0 && text.chars().count() > limit as usize {
        return Err(AlterError::DataException {
            message: format!("value too long for type character varying({limit})"),
        });
    }
    Ok(())
}

fn check_integer_range(v: i64, ty: &ColumnType) -> Result<i64, AlterError> {
    let ok = match ty {
        ColumnType::SmallInt => i16::try_from(v).is_ok(),
        ColumnType::Integer => i32::try_from(v).is_ok(),
        _ => true,
    };
    if ok { Ok(v) } else { Err(out_of_range(ty)) }
}

pub(crate) fn out_of_range(ty: &ColumnType) -> AlterError {
    AlterError::DataException {
        message: format!("{} out of range", ty.name()),
    }
}

fn cannot_convert(value: &Value, to: &TypeName) -> AlterError {
    AlterError::DataException {
        message: format!(
            "cannot convert value {} to type {}",
            value.literal(),
            to.display()
        ),
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varchar_widening_is_relabel() {
        let path = find_coercion_path(
            &TypeName::varchar(10),
            &TypeName::varchar(20),
            CoercionContext::Assignment,
        );
        assert_eq!(path, Some(CoercionPath::Relabel));
        let to_text = find_coercion_path(
            &TypeName::varchar(10),
            &TypeName::new(ColumnType::Text),
            CoercionContext::Implicit,
        );
        assert_eq!(to_text, Some(CoercionPath::Relabel));
    }

    #[test]
    fn narrowing_needs_length_check() {
        let path = find_coercion_path(
            &TypeName::new(ColumnType::Text),
            &TypeName::varchar(3),
            CoercionContext::Assignment,
        );
        assert_eq!(path, Some(CoercionPath::LengthCheck(3)));
    }

    #[test]
    fn integer_to_bigint_converts_and_text_to_int_needs_explicit() {
        let int = TypeName::new(ColumnType::Integer);
        let big = TypeName::new(ColumnType::BigInt);
        let text = TypeName::new(ColumnType::Text);
        assert_eq!(
            find_coercion_path(&int, &big, CoercionContext::Implicit),
            Some(CoercionPath::Convert)
        );
        assert_eq!(find_coercion_path(&big, &int, CoercionContext::Implicit), None);
        assert_eq!(
            find_coercion_path(&text, &int, CoercionContext::Assignment),
            None
        );
        assert_eq!(
            find_coercion_path(&text, &int, CoercionContext::Explicit),
            Some(CoercionPath::Convert)
        );
    }

    #[test]
    fn conversions_enforce_ranges() {
        let small = TypeName::new(ColumnType::SmallInt);
        assert!(convert_value(&Value::Integer(40_000), &small).is_err());
        assert_eq!(
            convert_value(&Value::Float(2.5), &TypeName::new(ColumnType::Integer)).expect("round"),
            Value::Integer(2)
        );
        assert_eq!(
            convert_value(&Value::Integer(7), &TypeName::new(ColumnType::Text)).expect("text"),
            Value::text("7")
        );
        assert!(convert_value(&Value::text("abcd"), &TypeName::varchar(3)).is_err());
        assert!(convert_value(&Value::text("{"), &TypeName::new(ColumnType::Json)).is_err());
    }
}
