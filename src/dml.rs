//! Row insertion and scans. Enough DML to populate tables and observe
//! what ALTER TABLE did to them.

use crate::alter::AlterContext;
use crate::catalog::Catalog;
use crate::catalog::schema::{AttributeDef, ConstraintKind, Privilege, RelKind, RelationDef};
use crate::catalog::types::{ColumnType, Oid, TypeName, Value};
use crate::error::AlterError;
use crate::expr::cast::CoercionContext;
use crate::expr::eval::compile;
use crate::expr::{Analyzer, BoundExpr, CoercionForm};
use crate::index::insert_index_entries;
use crate::lock::LockMode;
use crate::partition::{get_partition_constraint, route_tuple};
use crate::permission::check_privilege;
use crate::storage::{StorageManager, Tuple};
use crate::triggers::ri_check_row;

/// Coerces an input value to the column's type, running domain checks.
fn coerce_input(
    catalog: &Catalog,
    rel: &RelationDef,
    att: &AttributeDef,
    value: Value,
) -> Result<Value, AlterError> {
    let is_domain = matches!(att.type_name.ty, ColumnType::Domain(_));
    if value.is_null() && !is_domain {
        return Ok(Value::Null);
    }
    let source = TypeName::new(value.type_hint().unwrap_or(ColumnType::Text));
    let source_display = source.display();
    let expr = BoundExpr::constant(value, source);
    let coerced = Analyzer::new(rel, catalog)
        .coerce(
            expr,
            &att.type_name,
            CoercionContext::Assignment,
            CoercionForm::Implicit,
        )?
        .ok_or_else(|| AlterError::DatatypeMismatch {
            message: format!(
                "column \"{}\" is of type {} but expression is of type {}",
                att.name,
                att.type_name.display(),
                source_display
            ),
        })?;
    compile(&coerced)?.eval(&[])
}

/// Builds the stored row for `values`, given positionally over the live
/// columns. Missing trailing values take the column default.
fn form_row(catalog: &Catalog, rel: &RelationDef, values: Vec<Value>) -> Result<Vec<Value>, AlterError> {
    let live: Vec<&AttributeDef> = rel.live_attributes().collect();
    if values.len() > live.len() {
        return Err(AlterError::DataException {
            message: "INSERT has more expressions than target columns".into(),
        });
    }
    let mut row = vec![Value::Null; rel.attributes.len()];
    let mut values = values.into_iter();
    for att in live {
        let value = match values.next() {
            Some(v) => v,
            None => match &att.default {
                Some(expr) => compile(expr)?.eval(&[])?,
                None => Value::Null,
            },
        };
        row[(att.attnum - 1) as usize] = coerce_input(catalog, rel, att, value)?;
    }
    Ok(row)
}

/// Checks a new row of leaf `relid` and appends it with its index entries.
fn store_row(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    row: Vec<Value>,
) -> Result<(), AlterError> {
    let rel = ctx.catalog.relation(relid)?.clone();
    let heap = rel
        .storage
        .ok_or_else(|| AlterError::internal(format!("relation {} has no storage", rel.name)))?;
    for att in rel.live_attributes() {
        if att.not_null && row[(att.attnum - 1) as usize].is_null() {
            return Err(AlterError::NotNullViolation {
                relation: rel.name.to_string(),
                column: att.name.to_string(),
            });
        }
    }
    let constraints: Vec<_> = ctx
        .catalog
        .constraints_of(relid)
        .into_iter()
        .cloned()
        .collect();
    for con in constraints.iter().filter(|c| c.kind == ConstraintKind::Check) {
        if let Some(expr) = &con.expr
            && !compile(expr)?.check(&row)?
        {
            return Err(AlterError::CheckViolation {
                relation: rel.name.to_string(),
                constraint: con.name.to_string(),
            });
        }
    }
    if rel.is_partition
        && let Some(qual) = get_partition_constraint(ctx.catalog, relid)?
        && !compile(&qual)?.qual(&row)?
    {
        return Err(AlterError::PartitionConstraintViolation {
            relation: rel.name.to_string(),
        });
    }
    for con in constraints
        .iter()
        .filter(|c| c.kind == ConstraintKind::ForeignKey)
    {
        if con.deferred {
            ctx.session.queue_trigger_event(relid);
            continue;
        }
        if !ri_check_row(ctx.catalog, ctx.storage, con, &row)? {
            return Err(AlterError::ForeignKeyViolation {
                relation: rel.name.to_string(),
                constraint: con.name.to_string(),
            });
        }
    }
    insert_index_entries(ctx.catalog, ctx.storage, relid, &row)?;
    let oid = rel.has_oids.then(|| ctx.storage.alloc_row_oid());
    ctx.storage.append(heap, Tuple { oid, values: row })
}

/// INSERT INTO `table` VALUES (...), routing through partitions.
pub fn insert(
    ctx: &mut AlterContext<'_>,
    table: &str,
    rows: Vec<Vec<Value>>,
) -> Result<usize, AlterError> {
    let relid = ctx.catalog.lookup_required(table)?;
    ctx.lock_relation(relid, LockMode::RowExclusive);
    let rel = ctx.catalog.relation(relid)?.clone();
    if !matches!(rel.kind, RelKind::Table | RelKind::PartitionedTable) {
        return Err(AlterError::wrong_kind(format!(
            "cannot insert into {} \"{}\"",
            rel.kind.description(),
            rel.name
        )));
    }
    check_privilege(ctx.catalog, ctx.caller, relid, Privilege::Insert)?;
    let mut count = 0;
    for values in rows {
        let row = form_row(ctx.catalog, &rel, values)?;
        if rel.is_partitioned() {
            let (leaf, leaf_row) = route_tuple(ctx.catalog, relid, row)?;
            ctx.lock_relation(leaf, LockMode::RowExclusive);
            store_row(ctx, leaf, leaf_row)?;
        } else {
            store_row(ctx, relid, row)?;
        }
        count += 1;
    }
    Ok(count)
}

/// Rows of `table` and every table inheriting from it, projected onto the
/// live columns of `table`.
pub fn scan(
    catalog: &Catalog,
    storage: &StorageManager,
    table: &str,
) -> Result<Vec<Vec<Value>>, AlterError> {
    let relid = catalog.lookup_required(table)?;
    let root = catalog.relation(relid)?;
    let mut out = Vec::new();
    for member in catalog.find_all_inheritors(relid) {
        let rel = catalog.relation(member)?;
        let Some(heap) = rel.storage else { continue };
        let map = catalog.attribute_map(relid, member)?;
        for tuple in storage.tuples(heap)? {
            let row = rel.deform(&tuple.values);
            let projected = root
                .live_attributes()
                .map(|att| {
                    map.iter()
                        .find(|(src, _)| *src == att.attnum)
                        .and_then(|(_, dst)| row.get((*dst - 1) as usize).cloned())
                        .unwrap_or(Value::Null)
                })
                .collect();
            out.push(projected);
        }
    }
    Ok(out)
}

/// Row OIDs of `table` in physical order, for relations created WITH OIDS.
pub fn row_oids(
    catalog: &Catalog,
    storage: &StorageManager,
    table: &str,
) -> Result<Vec<Option<Oid>>, AlterError> {
    let relid = catalog.lookup_required(table)?;
    let Some(heap) = catalog.relation(relid)?.storage else {
        return Ok(Vec::new());
    };
    Ok(storage.tuples(heap)?.into_iter().map(|t| t.oid).collect())
}
