//! Partition bounds: validation, overlap detection, derived partition
//! constraints and tuple routing.

use crate::catalog::Catalog;
use crate::catalog::schema::{
    PartitionBound, PartitionKey, PartitionStrategy, RangeDatum, RelationDef,
};
use crate::catalog::types::{AttrNumber, Oid, TypeName, Value};
use crate::error::AlterError;
use crate::expr::cast::convert_value;
use crate::expr::eval::compile;
use crate::expr::{BinaryOp, BoundExpr, base_type};
use std::cmp::Ordering;

fn key_of(parent: &RelationDef) -> Result<&PartitionKey, AlterError> {
    parent.partition_key.as_ref().ok_or_else(|| {
        AlterError::wrong_kind(format!("table \"{}\" is not partitioned", parent.name))
    })
}

fn key_types(catalog: &Catalog, parent: &RelationDef) -> Result<Vec<TypeName>, AlterError> {
    key_of(parent)?
        .attnums
        .iter()
        .map(|attnum| {
            let att = parent.attribute(*attnum).ok_or_else(|| {
                AlterError::internal(format!("partition key attribute {attnum} missing"))
            })?;
            base_type(&att.type_name, catalog)
        })
        .collect()
}

fn coerce_datum(value: &Value, ty: &TypeName, partition: &str) -> Result<Value, AlterError> {
    convert_value(value, ty).map_err(|_| {
        AlterError::table_def(format!(
            "specified value {} cannot be cast to type {} for partition \"{partition}\"",
            value.literal(),
            ty.display()
        ))
    })
}

fn coerce_range(
    datums: &[RangeDatum],
    types: &[TypeName],
    partition: &str,
) -> Result<Vec<RangeDatum>, AlterError> {
    if datums.len() != types.len() {
        return Err(AlterError::table_def(
            "range bound must have one value per partition key column",
        ));
    }
    let mut out = Vec::with_capacity(datums.len());
    let mut infinite: Option<&RangeDatum> = None;
    for (datum, ty) in datums.iter().zip(types) {
        match (datum, infinite) {
            (RangeDatum::Value(v), None) => {
                if v.is_null() {
                    return Err(AlterError::table_def(
                        "cannot specify NULL in range bound",
                    ));
                }
                out.push(RangeDatum::Value(coerce_datum(v, ty, partition)?));
            }
            (RangeDatum::Value(_), Some(_)) => {
                return Err(AlterError::DataException {
                    message: "every bound following MINVALUE or MAXVALUE must also be MINVALUE or MAXVALUE"
                        .into(),
                });
            }
            (inf, Some(prev)) if inf != prev => {
                return Err(AlterError::DataException {
                    message: "every bound following MINVALUE or MAXVALUE must also be MINVALUE or MAXVALUE"
                        .into(),
                });
            }
            (inf, _) => {
                infinite = Some(datum);
                out.push(inf.clone());
            }
        }
    }
    Ok(out)
}

/// Validates `bound` against the parent's key and coerces its datums to the
/// key column types.
pub fn transform_partition_bound(
    catalog: &Catalog,
    parent: &RelationDef,
    partition: &str,
    bound: &PartitionBound,
) -> Result<PartitionBound, AlterError> {
    let key = key_of(parent)?;
    let types = key_types(catalog, parent)?;
    let mismatch = |expected: PartitionStrategy| {
        AlterError::table_def(format!(
            "invalid bound specification for a {} partition",
            expected.name()
        ))
    };
    match bound {
        PartitionBound::Default => {
            if key.strategy == PartitionStrategy::Hash {
                return Err(AlterError::table_def(
                    "a hash-partitioned table may not have a default partition",
                ));
            }
            Ok(PartitionBound::Default)
        }
        PartitionBound::Hash { modulus, remainder } => {
            if key.strategy != PartitionStrategy::Hash {
                return Err(mismatch(key.strategy));
            }
            if *modulus == 0 {
                return Err(AlterError::InvalidParameterValue {
                    message: "modulus for hash partition must be a positive integer".into(),
                });
            }
            if remainder >= modulus {
                return Err(AlterError::InvalidParameterValue {
                    message: "remainder for hash partition must be less than modulus".into(),
                });
            }
            Ok(bound.clone())
        }
        PartitionBound::List(values) => {
            if key.strategy != PartitionStrategy::List {
                return Err(mismatch(key.strategy));
            }
            let ty = &types[0];
            let mut out: Vec<Value> = Vec::with_capacity(values.len());
            for v in values {
                let coerced = coerce_datum(v, ty, partition)?;
                if !out.contains(&coerced) {
                    out.push(coerced);
                }
            }
            Ok(PartitionBound::List(out))
        }
        PartitionBound::Range { lower, upper } => {
            if key.strategy != PartitionStrategy::Range {
                return Err(mismatch(key.strategy));
            }
            let lower = coerce_range(lower, &types, partition)?;
            let upper = coerce_range(upper, &types, partition)?;
            if lower >= upper {
                return Err(AlterError::object_def(format!(
                    "empty range bound specified for partition \"{partition}\""
                )));
            }
            Ok(PartitionBound::Range { lower, upper })
        }
    }
}

/// Partitions of `parent` with their bounds, default included.
pub fn partition_bounds(catalog: &Catalog, parent: Oid) -> Vec<(Oid, PartitionBound)> {
    catalog
        .children(parent)
        .into_iter()
        .filter_map(|child| {
            let rel = catalog.relations.get(&child)?;
            let bound = rel.partition_bound.clone()?;
            Some((child, bound))
        })
        .collect()
}

pub fn default_partition(catalog: &Catalog, parent: Oid) -> Option<Oid> {
    partition_bounds(catalog, parent)
        .into_iter()
        .find(|(_, b)| b.is_default())
        .map(|(oid, _)| oid)
}

fn overlap(partition: &str, existing: &str) -> AlterError {
    AlterError::object_def(format!(
        "partition \"{partition}\" would overlap partition \"{existing}\""
    ))
}

/// Rejects `bound` if it collides with a bound already attached to `parent`.
pub fn check_new_partition_bound(
    catalog: &Catalog,
    parent: Oid,
    partition: &str,
    bound: &PartitionBound,
) -> Result<(), AlterError> {
    for (sibling, existing) in partition_bounds(catalog, parent) {
        let sibling_name = catalog.relation_name(sibling);
        match (bound, &existing) {
            (PartitionBound::Default, PartitionBound::Default) => {
                return Err(AlterError::object_def(format!(
                    "partition \"{partition}\" conflicts with existing default partition \"{sibling_name}\""
                )));
            }
            (PartitionBound::List(new), PartitionBound::List(old)) => {
                if new.iter().any(|v| old.contains(v)) {
                    return Err(overlap(partition, &sibling_name));
                }
            }
            (
                PartitionBound::Range { lower, upper },
                PartitionBound::Range {
                    lower: old_lower,
                    upper: old_upper,
                },
            ) => {
                if lower < old_upper && old_lower < upper {
                    return Err(overlap(partition, &sibling_name));
                }
            }
            (
                PartitionBound::Hash { modulus, remainder },
                PartitionBound::Hash {
                    modulus: old_modulus,
                    remainder: old_remainder,
                },
            ) => {
                let (small, large) = if modulus <= old_modulus {
                    (*modulus, *old_modulus)
                } else {
                    (*old_modulus, *modulus)
                };
                if large % small != 0 {
                    return Err(AlterError::object_def(
                        "every hash partition modulus must be a factor of the next larger modulus",
                    ));
                }
                if remainder % small == old_remainder % small {
                    return Err(overlap(partition, &sibling_name));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn key_vars(parent: &RelationDef, key: &PartitionKey) -> Result<Vec<BoundExpr>, AlterError> {
    key.attnums
        .iter()
        .map(|attnum| {
            parent
                .attribute(*attnum)
                .map(|a| BoundExpr::var(*attnum, a.type_name.clone()))
                .ok_or_else(|| AlterError::internal(format!("partition key attribute {attnum} missing")))
        })
        .collect()
}

/// Comparison of the key prefix against the finite part of a range bound.
/// `None` when the bound is unbounded on that side.
fn range_side(
    vars: &[BoundExpr],
    datums: &[RangeDatum],
    types: &[TypeName],
    lower: bool,
) -> Option<BoundExpr> {
    let finite = datums
        .iter()
        .take_while(|d| matches!(d, RangeDatum::Value(_)))
        .count();
    if finite == 0 {
        return None;
    }
    let next = datums.get(finite);
    let op = match (lower, next) {
        (true, Some(RangeDatum::MaxValue)) => BinaryOp::Gt,
        (true, _) => BinaryOp::Ge,
        (false, Some(RangeDatum::MaxValue)) => BinaryOp::Le,
        (false, _) => BinaryOp::Lt,
    };
    let consts: Vec<BoundExpr> = datums[..finite]
        .iter()
        .zip(types)
        .filter_map(|(d, ty)| match d {
            RangeDatum::Value(v) => Some(BoundExpr::constant(v.clone(), ty.clone())),
            _ => None,
        })
        .collect();
    if finite == 1 {
        return Some(BoundExpr::compare(op, vars[0].clone(), consts[0].clone()));
    }
    Some(BoundExpr::RowCompare {
        op,
        left: vars[..finite].to_vec(),
        right: consts,
    })
}

/// Constraint implied by one bound, over the parent's attribute numbers.
/// `None` means the bound admits every row.
pub fn partition_qual(
    catalog: &Catalog,
    parent: &RelationDef,
    bound: &PartitionBound,
) -> Result<Option<BoundExpr>, AlterError> {
    let key = key_of(parent)?;
    let vars = key_vars(parent, key)?;
    let types = key_types(catalog, parent)?;
    let qual = match bound {
        PartitionBound::Range { lower, upper } => {
            let mut clauses: Vec<BoundExpr> =
                vars.iter().cloned().map(BoundExpr::not_null).collect();
            clauses.extend(range_side(&vars, lower, &types, true));
            clauses.extend(range_side(&vars, upper, &types, false));
            Some(BoundExpr::and_all(clauses))
        }
        PartitionBound::List(values) => {
            let var = vars[0].clone();
            let non_null: Vec<BoundExpr> = values
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| BoundExpr::constant(v.clone(), types[0].clone()))
                .collect();
            let accepts_null = values.iter().any(Value::is_null);
            let membership = (!non_null.is_empty()).then(|| BoundExpr::InList {
                arg: Box::new(var.clone()),
                list: non_null,
            });
            let is_null = BoundExpr::NullTest {
                arg: Box::new(var.clone()),
                is_null: true,
            };
            Some(match (membership, accepts_null) {
                (Some(m), true) => BoundExpr::or_all(vec![is_null, m]),
                (Some(m), false) => BoundExpr::and_all(vec![BoundExpr::not_null(var), m]),
                (None, _) => is_null,
            })
        }
        PartitionBound::Hash { modulus, remainder } => Some(BoundExpr::HashPartition {
            modulus: *modulus,
            remainder: *remainder,
            keys: vars,
        }),
        PartitionBound::Default => {
            let mut others = Vec::new();
            for (_, sibling) in partition_bounds(catalog, parent.oid) {
                if sibling.is_default() {
                    continue;
                }
                if let Some(q) = partition_qual(catalog, parent, &sibling)? {
                    others.push(q);
                }
            }
            if others.is_empty() {
                None
            } else {
                Some(BoundExpr::Not(Box::new(BoundExpr::or_all(others))))
            }
        }
    };
    Ok(qual)
}

fn remap(catalog: &Catalog, expr: &BoundExpr, from: Oid, to: Oid) -> Result<BoundExpr, AlterError> {
    if from == to {
        return Ok(expr.clone());
    }
    let map = catalog.attribute_map(from, to)?;
    expr.map_attnums(&|attnum: AttrNumber| {
        map.iter().find(|(src, _)| *src == attnum).map(|(_, dst)| *dst)
    })
}

/// Full partition constraint of `relid`: its own bound plus every
/// ancestor's, expressed over `relid`'s attribute numbers.
pub fn get_partition_constraint(catalog: &Catalog, relid: Oid) -> Result<Option<BoundExpr>, AlterError> {
    let mut clauses = Vec::new();
    let mut current = relid;
    while let Some(parent) = catalog.partition_parent(current) {
        let child_rel = catalog.relation(current)?;
        let parent_rel = catalog.relation(parent)?;
        if let Some(bound) = &child_rel.partition_bound
            && let Some(qual) = partition_qual(catalog, parent_rel, bound)?
        {
            clauses.push(remap(catalog, &qual, parent, relid)?);
        }
        current = parent;
    }
    Ok((!clauses.is_empty()).then(|| BoundExpr::and_all(clauses)))
}

/// Expresses a constraint written over `from`'s attributes over `to`'s.
pub fn map_to_relation(
    catalog: &Catalog,
    expr: &BoundExpr,
    from: Oid,
    to: Oid,
) -> Result<BoundExpr, AlterError> {
    remap(catalog, expr, from, to)
}

/// Leaf partition that accepts `row` (laid out per `parent`'s attributes),
/// plus the row re-laid for that leaf.
pub fn route_tuple(
    catalog: &Catalog,
    parent: Oid,
    row: Vec<Value>,
) -> Result<(Oid, Vec<Value>), AlterError> {
    let parent_rel = catalog.relation(parent)?;
    let mut default = None;
    let mut target = None;
    for (child, bound) in partition_bounds(catalog, parent) {
        if bound.is_default() {
            default = Some(child);
            continue;
        }
        let Some(qual) = partition_qual(catalog, parent_rel, &bound)? else {
            target = Some(child);
            break;
        };
        if compile(&qual)?.qual(&row)? {
            target = Some(child);
            break;
        }
    }
    let child = target.or(default).ok_or_else(|| AlterError::NoPartitionForRow {
        relation: parent_rel.name.to_string(),
    })?;
    let child_rel = catalog.relation(child)?;
    let mut child_row = vec![Value::Null; child_rel.attributes.len()];
    for (src, dst) in catalog.attribute_map(parent, child)? {
        child_row[(dst - 1) as usize] = row[(src - 1) as usize].clone();
    }
    if child_rel.is_partitioned() {
        return route_tuple(catalog, child, child_row);
    }
    Ok((child, child_row))
}

/// Orders two partitions of a range-partitioned table by lower bound.
pub fn compare_range_bounds(a: &PartitionBound, b: &PartitionBound) -> Ordering {
    match (a, b) {
        (PartitionBound::Range { lower: la, .. }, PartitionBound::Range { lower: lb, .. }) => la.cmp(lb),
        (PartitionBound::Default, PartitionBound::Default) => Ordering::Equal,
        (PartitionBound::Default, _) => Ordering::Greater,
        (_, PartitionBound::Default) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::{AttributeDef, RelKind};
    use crate::catalog::types::ColumnType;

    fn range_parent(catalog: &mut Catalog) -> Oid {
        let oid = catalog.alloc_oid();
        let mut rel = RelationDef::new(oid, "p", "public", RelKind::PartitionedTable, "postgres");
        rel.attributes
            .push(AttributeDef::new(1, "a", TypeName::new(ColumnType::Integer)));
        rel.partition_key = Some(PartitionKey {
            strategy: PartitionStrategy::Range,
            attnums: vec![1],
        });
        catalog.insert_relation(rel);
        oid
    }

    fn range(lo: i64, hi: i64) -> PartitionBound {
        PartitionBound::Range {
            lower: vec![RangeDatum::Value(Value::Integer(lo))],
            upper: vec![RangeDatum::Value(Value::Integer(hi))],
        }
    }

    fn attach(catalog: &mut Catalog, parent: Oid, name: &str, bound: PartitionBound) -> Oid {
        let oid = catalog.alloc_oid();
        let mut rel = RelationDef::new(oid, name, "public", RelKind::Table, "postgres");
        rel.attributes
            .push(AttributeDef::new(1, "a", TypeName::new(ColumnType::Integer)));
        rel.is_partition = true;
        rel.partition_bound = Some(bound);
        catalog.insert_relation(rel);
        catalog.add_inherit_edge(oid, parent);
        oid
    }

    #[test]
    fn empty_and_mismatched_bounds_are_rejected() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let parent = range_parent(&mut catalog);
        let rel = catalog.relation(parent).expect("parent").clone();
        let err = transform_partition_bound(&catalog, &rel, "x", &range(5, 5)).unwrap_err();
        assert!(err.to_string().contains("empty range bound"));
        let err =
            transform_partition_bound(&catalog, &rel, "x", &PartitionBound::List(vec![Value::Integer(1)]))
                .unwrap_err();
        assert!(err.to_string().contains("range partition"));
    }

    #[test]
    fn overlapping_ranges_are_detected() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let parent = range_parent(&mut catalog);
        attach(&mut catalog, parent, "p_0", range(0, 10));
        assert!(check_new_partition_bound(&catalog, parent, "ok", &range(10, 20)).is_ok());
        let err = check_new_partition_bound(&catalog, parent, "bad", &range(5, 15)).unwrap_err();
        assert_eq!(err.to_string(), "partition \"bad\" would overlap partition \"p_0\"");
    }

    #[test]
    fn hash_moduli_must_divide() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let oid = catalog.alloc_oid();
        let mut rel = RelationDef::new(oid, "h", "public", RelKind::PartitionedTable, "postgres");
        rel.attributes
            .push(AttributeDef::new(1, "a", TypeName::new(ColumnType::Integer)));
        rel.partition_key = Some(PartitionKey {
            strategy: PartitionStrategy::Hash,
            attnums: vec![1],
        });
        catalog.insert_relation(rel);
        attach(&mut catalog, oid, "h0", PartitionBound::Hash { modulus: 4, remainder: 0 });
        let bad = PartitionBound::Hash { modulus: 6, remainder: 1 };
        assert!(check_new_partition_bound(&catalog, oid, "h1", &bad).is_err());
        let clash = PartitionBound::Hash { modulus: 8, remainder: 4 };
        assert!(check_new_partition_bound(&catalog, oid, "h2", &clash).is_err());
        let fine = PartitionBound::Hash { modulus: 8, remainder: 1 };
        assert!(check_new_partition_bound(&catalog, oid, "h3", &fine).is_ok());
    }

    #[test]
    fn rows_route_to_range_or_default() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let parent = range_parent(&mut catalog);
        let low = attach(&mut catalog, parent, "p_0", range(0, 10));
        let def = attach(&mut catalog, parent, "p_def", PartitionBound::Default);
        let (hit, _) = route_tuple(&catalog, parent, vec![Value::Integer(3)]).expect("route");
        assert_eq!(hit, low);
        let (miss, _) = route_tuple(&catalog, parent, vec![Value::Integer(42)]).expect("route");
        assert_eq!(miss, def);
        let (null_row, _) = route_tuple(&catalog, parent, vec![Value::Null]).expect("route");
        assert_eq!(null_row, def);
    }

    #[test]
    fn default_constraint_excludes_siblings() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let parent = range_parent(&mut catalog);
        attach(&mut catalog, parent, "p_0", range(0, 10));
        let def = attach(&mut catalog, parent, "p_def", PartitionBound::Default);
        let qual = get_partition_constraint(&catalog, def)
            .expect("qual")
            .expect("non-trivial");
        let eval = compile(&qual).expect("compile");
        assert!(!eval.check(&[Value::Integer(5)]).expect("eval"));
        assert!(eval.check(&[Value::Integer(50)]).expect("eval"));
    }
}
