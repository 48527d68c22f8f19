use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub type Oid = u32;
pub type AttrNumber = i16;

pub const INVALID_OID: Oid = 0;
/// First oid handed out to user objects.
pub const FIRST_NORMAL_OID: Oid = 16384;
/// Attribute number of the virtual per-row object identifier column.
pub const OID_ATTRIBUTE_NUMBER: AttrNumber = -2;
/// Type modifier meaning "unconstrained".
pub const NO_TYPMOD: i32 = -1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Text,
    Varchar,
    Timestamp,
    Blob,
    Json,
    Domain(CompactString),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Boolean,
    Numeric,
    String,
    DateTime,
    Binary,
    Json,
    Domain,
}

impl ColumnType {
    pub fn name(&self) -> String {
        match self {
            ColumnType::Boolean => "boolean".into(),
            ColumnType::SmallInt => "smallint".into(),
            ColumnType::Integer => "integer".into(),
            ColumnType::BigInt => "bigint".into(),
            ColumnType::Float => "double precision".into(),
            ColumnType::Text => "text".into(),
            ColumnType::Varchar => "character varying".into(),
            ColumnType::Timestamp => "timestamp without time zone".into(),
            ColumnType::Blob => "bytea".into(),
            ColumnType::Json => "json".into(),
            ColumnType::Domain(name) => name.to_string(),
        }
    }

    pub fn display(&self, typmod: i32) -> String {
        match self {
            ColumnType::Varchar if typmod >= 0 => format!("character varying({typmod})"),
            _ => self.name(),
        }
    }

    pub fn category(&self) -> TypeCategory {
        match self {
            ColumnType::Boolean => TypeCategory::Boolean,
            ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt | ColumnType::Float => {
                TypeCategory::Numeric
            }
            ColumnType::Text | ColumnType::Varchar => TypeCategory::String,
            ColumnType::Timestamp => TypeCategory::DateTime,
            ColumnType::Blob => TypeCategory::Binary,
            ColumnType::Json => TypeCategory::Json,
            ColumnType::Domain(_) => TypeCategory::Domain,
        }
    }

    pub fn is_collatable(&self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::Varchar)
    }

    /// Rank within the numeric promotion ladder; `None` for non-numerics.
    pub fn numeric_rank(&self) -> Option<u8> {
        match self {
            ColumnType::SmallInt => Some(1),
            ColumnType::Integer => Some(2),
            ColumnType::BigInt => Some(3),
            ColumnType::Float => Some(4),
            _ => None,
        }
    }

    /// Fixed storage width, or `None` for variable-length types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            ColumnType::Boolean => Some(1),
            ColumnType::SmallInt => Some(2),
            ColumnType::Integer => Some(4),
            ColumnType::BigInt | ColumnType::Float | ColumnType::Timestamp => Some(8),
            _ => None,
        }
    }

    /// Worst-case width used when deciding whether a relation needs
    /// out-of-line storage.
    pub fn max_width(&self, typmod: i32) -> usize {
        match self.fixed_width() {
            Some(w) => w,
            None => match self {
                ColumnType::Varchar if typmod >= 0 => typmod as usize * 4 + 4,
                _ => usize::MAX / 4096,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TypeName {
    pub ty: ColumnType,
    pub typmod: i32,
}

impl TypeName {
    pub fn new(ty: ColumnType) -> Self {
        Self {
            ty,
            typmod: NO_TYPMOD,
        }
    }

    pub fn varchar(len: i32) -> Self {
        Self {
            ty: ColumnType::Varchar,
            typmod: len,
        }
    }

    pub fn display(&self) -> String {
        self.ty.display(self.typmod)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Text(CompactString),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Blob(Vec<u8>),
    Timestamp(i64),
    Json(CompactString),
    Null,
}

impl Value {
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Timestamp(_) => 5,
            Value::Float(_) => 6,
            Value::Text(_) => 7,
            Value::Json(_) => 8,
            Value::Blob(_) => 9,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn text(s: &str) -> Self {
        Value::Text(CompactString::from(s))
    }

    /// Approximate on-disk width of the datum.
    pub fn width(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Float(_) | Value::Timestamp(_) => 8,
            Value::Text(s) | Value::Json(s) => s.len() + 4,
            Value::Blob(b) => b.len() + 4,
        }
    }

    pub fn type_hint(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(ColumnType::Boolean),
            Value::Integer(v) if i32::try_from(*v).is_ok() => Some(ColumnType::Integer),
            Value::Integer(_) => Some(ColumnType::BigInt),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
            Value::Blob(_) => Some(ColumnType::Blob),
            Value::Json(_) => Some(ColumnType::Json),
        }
    }

    /// SQL literal rendering used when deparsing stored expressions.
    pub fn literal(&self) -> String {
        match self {
            Value::Null => "NULL".into(),
            Value::Boolean(b) => if *b { "true" } else { "false" }.into(),
            Value::Integer(v) => v.to_string(),
            Value::Float(v) => format!("{v:?}"),
            Value::Text(s) | Value::Json(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Timestamp(v) => format!("timestamp '{v}'"),
            Value::Blob(b) => {
                let mut out = String::from("'\\x");
                for byte in b {
                    out.push_str(&format!("{byte:02x}"));
                }
                out.push('\'');
                out
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Json(a), Value::Json(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(v) | Value::Timestamp(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Text(s) | Value::Json(s) => s.hash(state),
            Value::Blob(b) => b.hash(state),
        }
    }
}

/// SQL comparison that is unknown (`None`) when either side is null and
/// promotes mixed integer/float operands.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
        _ => Some(left.cmp(right)),
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnType, TypeName, Value, compare_values};
    use proptest::prelude::*;
    use std::cmp::Ordering;

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Boolean),
            any::<i64>().prop_map(Value::Integer),
            any::<i64>().prop_map(Value::Timestamp),
            any::<f64>()
                .prop_filter("finite float only", |v| v.is_finite())
                .prop_map(Value::Float),
            "\\PC{0,32}".prop_map(|s| Value::Text(s.into())),
            "\\PC{0,32}".prop_map(|s| Value::Json(s.into())),
            prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Blob),
            Just(Value::Null),
        ]
    }

    fn encode<T: serde::Serialize>(value: &T) -> Vec<u8> {
        rmp_serde::to_vec(value).expect("encode should succeed")
    }

    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> T {
        rmp_serde::from_slice(bytes).expect("decode should succeed")
    }

    proptest! {
        #[test]
        fn ordering_is_total_and_antisymmetric(a in arb_value(), b in arb_value()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }

        #[test]
        fn encoded_tuples_keep_ordering(a in arb_value(), b in arb_value()) {
            let ra = vec![a.clone(), Value::Null];
            let rb = vec![b.clone(), Value::Null];
            let da: Vec<Value> = decode(&encode(&ra));
            let db: Vec<Value> = decode(&encode(&rb));
            prop_assert_eq!(ra.cmp(&rb), da.cmp(&db));
        }

        #[test]
        fn sql_compare_is_unknown_only_for_nulls(a in arb_value(), b in arb_value()) {
            let unknown = compare_values(&a, &b).is_none();
            prop_assert_eq!(unknown, a.is_null() || b.is_null());
        }
    }

    #[test]
    fn integer_float_comparison_promotes() {
        assert_eq!(
            compare_values(&Value::Integer(2), &Value::Float(2.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn type_display_includes_length_modifier() {
        assert_eq!(TypeName::varchar(10).display(), "character varying(10)");
        assert_eq!(TypeName::new(ColumnType::Integer).display(), "integer");
        assert_eq!(Value::Integer(5_000_000_000).type_hint(), Some(ColumnType::BigInt));
        assert_eq!(Value::text("it's").literal(), "'it''s'");
    }
}
