use crate::catalog::types::{ColumnType, TypeName, Value, compare_values};
use crate::error::AlterError;
use crate::expr::cast::{CoercionPath, check_length, convert_value, out_of_range};
use crate::expr::{BinaryOp, BoundExpr, Builtin};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

static RANDOM_STATE: AtomicU64 = AtomicU64::new(0x9e37_79b9_7f4a_7c15);

/// Executable form of a [`BoundExpr`] bound to a row layout where attribute
/// `n` lives at index `n - 1`.
#[derive(Debug, Clone)]
pub struct Evaluator {
    root: Node,
}

#[derive(Debug, Clone)]
enum Node {
    Column(usize),
    Const(Value),
    Coerce(Box<Node>, CoercionPath, TypeName),
    Binary(BinaryOp, Box<Node>, Box<Node>, TypeName),
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    NullTest(Box<Node>, bool),
    InList(Box<Node>, Vec<Node>),
    Func(Builtin, Vec<Node>),
    RowCompare(BinaryOp, Vec<Node>, Vec<Node>),
    HashPartition(u32, u32, Vec<Node>),
    Domain {
        arg: Box<Node>,
        name: String,
        not_null: bool,
        check: Option<Box<Node>>,
    },
}

pub fn compile(expr: &BoundExpr) -> Result<Evaluator, AlterError> {
    Ok(Evaluator {
        root: compile_node(expr)?,
    })
}

fn compile_node(expr: &BoundExpr) -> Result<Node, AlterError> {
    let node = match expr {
        BoundExpr::Var { attnum, .. } => {
            if *attnum <= 0 {
                return Err(AlterError::internal(format!(
                    "system attribute {attnum} cannot be evaluated"
                )));
            }
            Node::Column((*attnum - 1) as usize)
        }
        BoundExpr::Const { value, .. } => Node::Const(value.clone()),
        BoundExpr::Coerce { arg, to, path, .. } => {
            Node::Coerce(Box::new(compile_node(arg)?), *path, to.clone())
        }
        BoundExpr::Binary {
            op,
            left,
            right,
            ty,
        } => Node::Binary(
            *op,
            Box::new(compile_node(left)?),
            Box::new(compile_node(right)?),
            ty.clone(),
        ),
        BoundExpr::And(items) => Node::And(compile_list(items)?),
        BoundExpr::Or(items) => Node::Or(compile_list(items)?),
        BoundExpr::Not(inner) => Node::Not(Box::new(compile_node(inner)?)),
        BoundExpr::NullTest { arg, is_null } => {
            Node::NullTest(Box::new(compile_node(arg)?), *is_null)
        }
        BoundExpr::InList { arg, list } => {
            Node::InList(Box::new(compile_node(arg)?), compile_list(list)?)
        }
        BoundExpr::Func { func, args, .. } => Node::Func(*func, compile_list(args)?),
        BoundExpr::RowCompare { op, left, right } => {
            if left.len() != right.len() || left.is_empty() {
                return Err(AlterError::internal("row comparison arity mismatch"));
            }
            Node::RowCompare(*op, compile_list(left)?, compile_list(right)?)
        }
        BoundExpr::HashPartition {
            modulus,
            remainder,
            keys,
        } => {
            if *modulus == 0 {
                return Err(AlterError::internal("hash partition modulus is zero"));
            }
            Node::HashPartition(*modulus, *remainder, compile_list(keys)?)
        }
        BoundExpr::DomainCheck {
            arg,
            domain,
            not_null,
            check,
        } => Node::Domain {
            arg: Box::new(compile_node(arg)?),
            name: domain.to_string(),
            not_null: *not_null,
            check: match check {
                Some(c) => Some(Box::new(compile_node(c)?)),
                None => None,
            },
        },
    };
    Ok(node)
}

fn compile_list(items: &[BoundExpr]) -> Result<Vec<Node>, AlterError> {
    items.iter().map(compile_node).collect()
}

impl Evaluator {
    pub fn eval(&self, row: &[Value]) -> Result<Value, AlterError> {
        eval_node(&self.root, row)
    }

    /// Three-valued boolean result; `None` is SQL unknown.
    pub fn eval_bool(&self, row: &[Value]) -> Result<Option<bool>, AlterError> {
        match self.eval(row)? {
            Value::Boolean(b) => Ok(Some(b)),
            Value::Null => Ok(None),
            other => Err(AlterError::internal(format!(
                "boolean expression produced {}",
                other.literal()
            ))),
        }
    }

    /// Constraint semantics: only a definite false fails.
    pub fn check(&self, row: &[Value]) -> Result<bool, AlterError> {
        Ok(self.eval_bool(row)? != Some(false))
    }

    /// Qualification semantics: only a definite true passes.
    pub fn qual(&self, row: &[Value]) -> Result<bool, AlterError> {
        Ok(self.eval_bool(row)? == Some(true))
    }
}

fn truth(v: &Value) -> Result<Option<bool>, AlterError> {
    match v {
        Value::Boolean(b) => Ok(Some(*b)),
        Value::Null => Ok(None),
        other => Err(AlterError::internal(format!(
            "expected boolean operand, got {}",
            other.literal()
        ))),
    }
}

fn from_truth(t: Option<bool>) -> Value {
    t.map(Value::Boolean).unwrap_or(Value::Null)
}

fn eval_node(node: &Node, row: &[Value]) -> Result<Value, AlterError> {
    match node {
        Node::Column(idx) => Ok(row.get(*idx).cloned().unwrap_or(Value::Null)),
        Node::Const(v) => Ok(v.clone()),
        Node::Coerce(arg, path, to) => {
            let v = eval_node(arg, row)?;
            match path {
                CoercionPath::Relabel => Ok(v),
                CoercionPath::LengthCheck(limit) => {
                    if let Value::Text(s) = &v {
                        check_length(s, *limit)?;
                    }
                    Ok(v)
                }
                CoercionPath::Convert => convert_value(&v, to),
            }
        }
        Node::Binary(op, l, r, ty) => {
            let lv = eval_node(l, row)?;
            let rv = eval_node(r, row)?;
            eval_binary(*op, &lv, &rv, ty)
        }
        Node::And(items) => {
            let mut saw_null = false;
            for item in items {
                match truth(&eval_node(item, row)?)? {
                    Some(false) => return Ok(Value::Boolean(false)),
                    None => saw_null = true,
                    Some(true) => {}
                }
            }
            Ok(if saw_null {
                Value::Null
            } else {
                Value::Boolean(true)
            })
        }
        Node::Or(items) => {
            let mut saw_null = false;
            for item in items {
                match truth(&eval_node(item, row)?)? {
                    Some(true) => return Ok(Value::Boolean(true)),
                    None => saw_null = true,
                    Some(false) => {}
                }
            }
            Ok(if saw_null {
                Value::Null
            } else {
                Value::Boolean(false)
            })
        }
        Node::Not(inner) => Ok(from_truth(truth(&eval_node(inner, row)?)?.map(|b| !b))),
        Node::NullTest(arg, is_null) => {
            let v = eval_node(arg, row)?;
            Ok(Value::Boolean(v.is_null() == *is_null))
        }
        Node::InList(arg, list) => {
            let v = eval_node(arg, row)?;
            if v.is_null() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            for item in list {
                match compare_values(&v, &eval_node(item, row)?) {
                    Some(Ordering::Equal) => return Ok(Value::Boolean(true)),
                    None => saw_null = true,
                    Some(_) => {}
                }
            }
            Ok(if saw_null {
                Value::Null
            } else {
                Value::Boolean(false)
            })
        }
        Node::Func(func, args) => eval_func(*func, args, row),
        Node::RowCompare(op, left, right) => {
            for (l, r) in left.iter().zip(right) {
                let lv = eval_node(l, row)?;
                let rv = eval_node(r, row)?;
                match compare_values(&lv, &rv) {
                    None => return Ok(Value::Null),
                    Some(Ordering::Equal) => continue,
                    Some(ord) => return Ok(Value::Boolean(ordering_satisfies(*op, ord))),
                }
            }
            Ok(Value::Boolean(ordering_satisfies(*op, Ordering::Equal)))
        }
        Node::HashPartition(modulus, remainder, keys) => {
            let mut values = Vec::with_capacity(keys.len());
            for key in keys {
                values.push(eval_node(key, row)?);
            }
            let hash = hash_partition_keys(&values)?;
            Ok(Value::Boolean(hash % u64::from(*modulus) == u64::from(*remainder)))
        }
        Node::Domain {
            arg,
            name,
            not_null,
            check,
        } => {
            let v = eval_node(arg, row)?;
            if v.is_null() && *not_null {
                return Err(AlterError::DomainNotNull {
                    domain: name.clone(),
                });
            }
            if let Some(check) = check {
                let passed = truth(&eval_node(check, std::slice::from_ref(&v))?)?;
                if passed == Some(false) {
                    return Err(AlterError::DomainViolation {
                        domain: name.clone(),
                    });
                }
            }
            Ok(v)
        }
    }
}

fn ordering_satisfies(op: BinaryOp, ord: Ordering) -> bool {
    match op {
        BinaryOp::Eq => ord == Ordering::Equal,
        BinaryOp::Ne => ord != Ordering::Equal,
        BinaryOp::Lt => ord == Ordering::Less,
        BinaryOp::Le => ord != Ordering::Greater,
        BinaryOp::Gt => ord == Ordering::Greater,
        BinaryOp::Ge => ord != Ordering::Less,
        _ => false,
    }
}

fn eval_binary(op: BinaryOp, l: &Value, r: &Value, ty: &TypeName) -> Result<Value, AlterError> {
    if op.is_comparison() {
        return Ok(compare_values(l, r)
            .map(|ord| Value::Boolean(ordering_satisfies(op, ord)))
            .unwrap_or(Value::Null));
    }
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    match (op, l, r) {
        (BinaryOp::Concat, _, _) => {
            let mut out = String::new();
            for v in [l, r] {
                match v {
                    Value::Text(s) => out.push_str(s),
                    other => {
                        if let Value::Text(s) = convert_value(other, &TypeName::new(ColumnType::Text))? {
                            out.push_str(&s);
                        }
                    }
                }
            }
            Ok(Value::Text(out.into()))
        }
        (_, Value::Integer(a), Value::Integer(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(*b),
                BinaryOp::Sub => a.checked_sub(*b),
                BinaryOp::Mul => a.checked_mul(*b),
                BinaryOp::Div => {
                    if *b == 0 {
                        return Err(division_by_zero());
                    }
                    a.checked_div(*b)
                }
                _ => None,
            }
            .ok_or_else(|| out_of_range(&ty.ty))?;
            let fits = match ty.ty {
                ColumnType::SmallInt => i16::try_from(result).is_ok(),
                ColumnType::Integer => i32::try_from(result).is_ok(),
                _ => true,
            };
            if !fits {
                return Err(out_of_range(&ty.ty));
            }
            Ok(Value::Integer(result))
        }
        (_, Value::Float(_) | Value::Integer(_), Value::Float(_) | Value::Integer(_)) => {
            let a = as_f64(l);
            let b = as_f64(r);
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => {
                    if b == 0.0 {
                        return Err(division_by_zero());
                    }
                    a / b
                }
                _ => return Err(AlterError::internal("unsupported float operator")),
            };
            if !result.is_finite() {
                return Err(out_of_range(&ColumnType::Float));
            }
            Ok(Value::Float(result))
        }
        _ => Err(AlterError::internal(format!(
            "operator {} not applicable to {} and {}",
            op.symbol(),
            l.literal(),
            r.literal()
        ))),
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Integer(i) => *i as f64,
        Value::Float(f) => *f,
        _ => 0.0,
    }
}

fn division_by_zero() -> AlterError {
    AlterError::DataException {
        message: "division by zero".into(),
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

fn next_random() -> f64 {
    let mut x = RANDOM_STATE.load(AtomicOrdering::Relaxed) ^ now_micros() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    RANDOM_STATE.store(x, AtomicOrdering::Relaxed);
    (x >> 11) as f64 / (1u64 << 53) as f64
}

fn eval_func(func: Builtin, args: &[Node], row: &[Value]) -> Result<Value, AlterError> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval_node(arg, row)?);
    }
    let first = values.first().cloned().unwrap_or(Value::Null);
    let out = match func {
        Builtin::Lower | Builtin::Upper | Builtin::Length => match first {
            Value::Null => Value::Null,
            Value::Text(s) => match func {
                Builtin::Lower => Value::Text(s.to_lowercase().into()),
                Builtin::Upper => Value::Text(s.to_uppercase().into()),
                _ => Value::Integer(s.chars().count() as i64),
            },
            other => {
                return Err(AlterError::internal(format!(
                    "{}() applied to {}",
                    func.name(),
                    other.literal()
                )));
            }
        },
        Builtin::Abs => match first {
            Value::Integer(v) => Value::Integer(v.checked_abs().ok_or_else(|| {
                out_of_range(&ColumnType::BigInt)
            })?),
            Value::Float(v) => Value::Float(v.abs()),
            other => other,
        },
        Builtin::Coalesce => values
            .into_iter()
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null),
        Builtin::Now | Builtin::ClockTimestamp => Value::Timestamp(now_micros()),
        Builtin::Random => Value::Float(next_random()),
    };
    Ok(out)
}

/// Combined hash of partition key values; null keys do not contribute.
pub fn hash_partition_keys(values: &[Value]) -> Result<u64, AlterError> {
    let mut hash: u32 = 0;
    for value in values {
        if value.is_null() {
            continue;
        }
        let bytes = rmp_serde::to_vec(value).map_err(|e| AlterError::internal(e.to_string()))?;
        hash = crc32c::crc32c_append(hash, &bytes);
    }
    Ok(u64::from(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::CoercionForm;

    fn int(v: i64) -> BoundExpr {
        BoundExpr::constant(Value::Integer(v), TypeName::new(ColumnType::Integer))
    }

    fn var(attnum: i16) -> BoundExpr {
        BoundExpr::var(attnum, TypeName::new(ColumnType::Integer))
    }

    #[test]
    fn three_valued_logic() {
        let expr = BoundExpr::And(vec![
            BoundExpr::compare(BinaryOp::Gt, var(1), int(0)),
            BoundExpr::compare(BinaryOp::Lt, var(2), int(10)),
        ]);
        let eval = compile(&expr).expect("compile");
        assert_eq!(
            eval.eval_bool(&[Value::Integer(1), Value::Null]).expect("eval"),
            None
        );
        assert_eq!(
            eval.eval_bool(&[Value::Integer(-1), Value::Null]).expect("eval"),
            Some(false)
        );
        assert!(eval.check(&[Value::Integer(1), Value::Null]).expect("check"));
        assert!(!eval.qual(&[Value::Integer(1), Value::Null]).expect("qual"));
    }

    #[test]
    fn integer_overflow_is_a_data_exception() {
        let expr = BoundExpr::Binary {
            op: BinaryOp::Add,
            left: Box::new(var(1)),
            right: Box::new(int(1)),
            ty: TypeName::new(ColumnType::Integer),
        };
        let eval = compile(&expr).expect("compile");
        let err = eval
            .eval(&[Value::Integer(i32::MAX as i64)])
            .expect_err("overflow");
        assert_eq!(err.to_string(), "integer out of range");
    }

    #[test]
    fn length_check_coercion_refuses_long_values() {
        let expr = BoundExpr::Coerce {
            arg: Box::new(BoundExpr::var(1, TypeName::new(ColumnType::Text))),
            to: TypeName::varchar(2),
            path: CoercionPath::LengthCheck(2),
            form: CoercionForm::Implicit,
        };
        let eval = compile(&expr).expect("compile");
        assert!(eval.eval(&[Value::text("ab")]).is_ok());
        assert!(eval.eval(&[Value::text("abc")]).is_err());
    }

    #[test]
    fn hash_partitions_cover_every_value_once() {
        for key in 0..50i64 {
            let hits = (0..4u32)
                .filter(|r| {
                    let expr = BoundExpr::HashPartition {
                        modulus: 4,
                        remainder: *r,
                        keys: vec![var(1)],
                    };
                    compile(&expr)
                        .and_then(|e| e.qual(&[Value::Integer(key)]))
                        .expect("eval")
                })
                .count();
            assert_eq!(hits, 1);
        }
    }

    #[test]
    fn row_compare_is_lexicographic() {
        let expr = BoundExpr::RowCompare {
            op: BinaryOp::Lt,
            left: vec![var(1), var(2)],
            right: vec![int(1), int(5)],
        };
        let eval = compile(&expr).expect("compile");
        assert!(eval.qual(&[Value::Integer(1), Value::Integer(4)]).expect("eval"));
        assert!(!eval.qual(&[Value::Integer(1), Value::Integer(5)]).expect("eval"));
        assert!(eval.qual(&[Value::Integer(0), Value::Integer(99)]).expect("eval"));
    }
}
