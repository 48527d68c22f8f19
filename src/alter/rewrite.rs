//! Phase 3: rewrite or scan-validate every table the catalog passes left
//! work for, then validate new foreign keys once all tables are settled.

use std::collections::HashSet;

use crate::alter::work_queue::{WorkQueue, WorkQueueEntry};
use crate::alter::{AlterContext, FkValidationPath};
use crate::catalog::Catalog;
use crate::catalog::schema::{ConstraintKind, Persistence, RelationDef};
use crate::catalog::types::{Oid, Value};
use crate::error::AlterError;
use crate::expr::eval::{Evaluator, compile};
use crate::expr::cast::convert_value;
use crate::index::build_index;
use crate::lock::LockMode;
use crate::storage::{StorageId, StorageManager, Tuple};
use crate::triggers::{referencing_key, ri_check_row};
use compact_str::CompactString;
use tracing::{debug, info};

/// Per-row checks compiled once per table.
struct RowChecks {
    relation: String,
    not_null: Vec<(usize, String)>,
    checks: Vec<(String, Evaluator)>,
    partition: Option<Evaluator>,
    validate_default: bool,
}

impl RowChecks {
    fn compile(entry: &WorkQueueEntry, rel: &RelationDef) -> Result<Self, AlterError> {
        let not_null = if entry.verify_new_notnull {
            rel.live_attributes()
                .filter(|a| a.not_null)
                .map(|a| ((a.attnum - 1) as usize, a.name.to_string()))
                .collect()
        } else {
            Vec::new()
        };
        let checks = entry
            .constraints
            .iter()
            .filter(|c| c.kind == ConstraintKind::Check)
            .filter_map(|c| c.qual.as_ref().map(|q| (c.name.to_string(), q)))
            .map(|(name, qual)| Ok((name, compile(qual)?)))
            .collect::<Result<Vec<_>, AlterError>>()?;
        let partition = entry.partition_constraint.as_ref().map(compile).transpose()?;
        Ok(Self {
            relation: rel.name.to_string(),
            not_null,
            checks,
            partition,
            validate_default: entry.validate_default,
        })
    }

    fn is_empty(&self) -> bool {
        self.not_null.is_empty() && self.checks.is_empty() && self.partition.is_none()
    }

    fn verify(&self, row: &[Value]) -> Result<(), AlterError> {
        for (slot, column) in &self.not_null {
            if row.get(*slot).is_none_or(Value::is_null) {
                return Err(AlterError::NotNullViolation {
                    relation: self.relation.clone(),
                    column: column.clone(),
                });
            }
        }
        for (name, check) in &self.checks {
            if !check.check(row)? {
                return Err(AlterError::CheckViolation {
                    relation: self.relation.clone(),
                    constraint: name.clone(),
                });
            }
        }
        if let Some(partition) = &self.partition
            && !partition.qual(row)?
        {
            return Err(if self.validate_default {
                AlterError::DefaultPartitionViolation {
                    relation: self.relation.clone(),
                }
            } else {
                AlterError::PartitionConstraintViolation {
                    relation: self.relation.clone(),
                }
            });
        }
        Ok(())
    }
}

pub fn rewrite_tables(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    lockmode: LockMode,
) -> Result<(), AlterError> {
    for idx in 0..queue.len() {
        let entry = queue.entry(idx);
        if !entry.needs_phase3() || !entry.kind.has_storage() {
            continue;
        }
        let entry = entry.clone();
        let rel = ctx.catalog.relation(entry.relid)?.clone();
        if !entry.rewrite.is_empty() {
            rewrite_table(ctx, &entry, &rel)?;
        } else {
            let checks = RowChecks::compile(&entry, &rel)?;
            if !checks.is_empty() {
                validate_table(ctx, &rel, &checks)?;
            }
            if let Some(tablespace) = &entry.new_tablespace {
                move_relation(ctx, entry.relid, tablespace)?;
            }
        }
    }
    validate_foreign_keys(ctx, queue)?;
    debug!(lock = lockmode.name(), tables = queue.len(), "phase 3 complete");
    Ok(())
}

fn rewrite_table(
    ctx: &mut AlterContext<'_>,
    entry: &WorkQueueEntry,
    rel: &RelationDef,
) -> Result<(), AlterError> {
    let Some(old_storage) = rel.storage else {
        return Ok(());
    };
    let reasons = entry.rewrite.names().join(", ");
    debug!(relation = %rel.name, reasons = %reasons, "rewriting table");

    let checks = RowChecks::compile(entry, rel)?;
    let computations = entry
        .new_values
        .iter()
        .map(|nv| Ok(((nv.attnum - 1) as usize, compile(&nv.expr)?)))
        .collect::<Result<Vec<_>, AlterError>>()?;
    let tablespace = entry
        .new_tablespace
        .clone()
        .unwrap_or_else(|| rel.tablespace.clone());
    let persistence = entry.new_persistence.unwrap_or(rel.persistence);

    let fresh = ctx.storage.create(&tablespace, persistence);
    ctx.session.schedule_unlink(fresh, false);
    for tuple in ctx.storage.tuples(old_storage)? {
        ctx.session.cancel.check()?;
        let old_row = entry.old_desc.deform(&tuple.values);
        let mut new_row = rel.deform(&tuple.values);
        for (slot, eval) in &computations {
            let value = eval.eval(&old_row)?;
            if let Some(target) = new_row.get_mut(*slot) {
                *target = value;
            }
        }
        checks.verify(&new_row)?;
        let oid = match (rel.has_oids, tuple.oid) {
            (false, _) => None,
            (true, Some(oid)) => Some(oid),
            (true, None) => Some(ctx.storage.alloc_row_oid()),
        };
        ctx.storage.append(
            fresh,
            Tuple {
                oid,
                values: new_row,
            },
        )?;
    }
    if persistence == Persistence::Permanent {
        ctx.storage.fsync(fresh)?;
    }

    {
        let target = ctx.catalog.relation_mut(entry.relid)?;
        target.storage = Some(fresh);
        target.tablespace = tablespace;
        target.persistence = persistence;
    }
    ctx.session.schedule_unlink(old_storage, true);
    if entry.chg_persistence
        && let Some(toast) = rel.toast
    {
        ctx.catalog.relation_mut(toast)?.persistence = persistence;
    }

    let indexes: Vec<Oid> = ctx
        .catalog
        .indexes_of(entry.relid)
        .iter()
        .map(|i| i.oid)
        .collect();
    for index in indexes {
        if entry.chg_persistence {
            ctx.catalog.relation_mut(index)?.persistence = persistence;
        }
        build_index(ctx.catalog, ctx.storage, ctx.session, index)?;
    }
    ctx.invalidate(entry.relid);
    ctx.report.rewritten.push(rel.name.to_string());
    ctx.report
        .rewrite_reasons
        .push((rel.name.to_string(), entry.rewrite));
    Ok(())
}

fn validate_table(
    ctx: &mut AlterContext<'_>,
    rel: &RelationDef,
    checks: &RowChecks,
) -> Result<(), AlterError> {
    let Some(heap) = rel.storage else {
        return Ok(());
    };
    debug!(relation = %rel.name, "verifying table");
    for tuple in ctx.storage.tuples(heap)? {
        ctx.session.cancel.check()?;
        checks.verify(&rel.deform(&tuple.values))?;
    }
    ctx.report.validated.push(rel.name.to_string());
    Ok(())
}

/// Copies the relation's blocks verbatim into fresh storage in `tablespace`.
fn move_relation(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    tablespace: &CompactString,
) -> Result<(), AlterError> {
    let rel = ctx.catalog.relation(relid)?.clone();
    let Some(old) = rel.storage else {
        ctx.catalog.relation_mut(relid)?.tablespace = tablespace.clone();
        return Ok(());
    };
    let copied = copy_storage(ctx.storage, old, tablespace, rel.persistence)?;
    ctx.session.schedule_unlink(copied.0, false);
    ctx.session.schedule_unlink(old, true);
    {
        let target = ctx.catalog.relation_mut(relid)?;
        target.storage = Some(copied.0);
        target.tablespace = tablespace.clone();
    }
    ctx.invalidate(relid);
    debug!(relation = %rel.name, tablespace = %tablespace, blocks = copied.1, "moved relation");
    ctx.report.block_copies.push((rel.name.to_string(), copied.1));
    Ok(())
}

fn copy_storage(
    storage: &mut StorageManager,
    src: StorageId,
    tablespace: &str,
    persistence: Persistence,
) -> Result<(StorageId, usize), AlterError> {
    let dst = storage.create(tablespace, persistence);
    let nblocks = storage.nblocks(src)?;
    let copied = storage.copy_block_range(src, dst, 0, nblocks)?;
    if persistence == Persistence::Permanent {
        storage.fsync(dst)?;
    }
    Ok((dst, copied))
}

/// Referenced-side keys coerced to the comparison type of each column.
fn referenced_keys(
    catalog: &Catalog,
    storage: &StorageManager,
    con: &crate::catalog::schema::ConstraintDef,
) -> Result<HashSet<Vec<Value>>, AlterError> {
    let mut keys = HashSet::new();
    let Some(fk) = &con.foreign_key else {
        return Ok(keys);
    };
    let referenced = catalog.relation(fk.referenced_rel)?;
    let Some(heap) = referenced.storage else {
        return Ok(keys);
    };
    for tuple in storage.tuples(heap)? {
        let row = referenced.deform(&tuple.values);
        let key = fk
            .pk_attnums
            .iter()
            .zip(&fk.operators)
            .map(|(a, op)| {
                let v = row.get((*a - 1) as usize).cloned().unwrap_or(Value::Null);
                if op.pk_type == op.operand {
                    Ok(v)
                } else {
                    convert_value(&v, &op.operand)
                }
            })
            .collect::<Result<Vec<_>, AlterError>>()?;
        keys.insert(key);
    }
    Ok(keys)
}

fn validate_foreign_keys(ctx: &mut AlterContext<'_>, queue: &WorkQueue) -> Result<(), AlterError> {
    for entry in queue.iter() {
        for pending in entry
            .constraints
            .iter()
            .filter(|c| c.kind == ConstraintKind::ForeignKey)
        {
            let con = ctx.catalog.constraint(pending.constraint_oid)?.clone();
            let rel = ctx.catalog.relation(entry.relid)?.clone();
            let path = validate_foreign_key(ctx, &rel, &con)?;
            ctx.catalog.constraint_mut(con.oid)?.validated = true;
            ctx.invalidate(entry.relid);
            ctx.report
                .fk_validations
                .push((rel.name.to_string(), path));
        }
    }
    Ok(())
}

fn validate_foreign_key(
    ctx: &mut AlterContext<'_>,
    rel: &RelationDef,
    con: &crate::catalog::schema::ConstraintDef,
) -> Result<FkValidationPath, AlterError> {
    let violation = || AlterError::ForeignKeyViolation {
        relation: rel.name.to_string(),
        constraint: con.name.to_string(),
    };
    let bulk = con
        .foreign_key
        .as_ref()
        .is_some_and(|fk| fk.operators.iter().all(|op| op.is_binary()));
    let path = if bulk {
        FkValidationPath::Bulk
    } else {
        FkValidationPath::RowByRow
    };
    info!(constraint = %con.name, relation = %rel.name, path = ?path, "validating foreign key constraint");
    let Some(heap) = rel.storage else {
        return Ok(path);
    };
    let tuples = ctx.storage.tuples(heap)?;
    if bulk {
        let keys = referenced_keys(ctx.catalog, ctx.storage, con)?;
        for tuple in tuples {
            ctx.session.cancel.check()?;
            let row = rel.deform(&tuple.values);
            match referencing_key(con, &row) {
                Ok(Some(key)) if !keys.contains(&key) => return Err(violation()),
                Ok(_) => {}
                Err(AlterError::ForeignKeyViolation { .. }) => return Err(violation()),
                Err(e) => return Err(e),
            }
        }
    } else {
        for tuple in tuples {
            ctx.session.cancel.check()?;
            let row = rel.deform(&tuple.values);
            if !ri_check_row(ctx.catalog, ctx.storage, con, &row)? {
                return Err(violation());
            }
        }
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alter::work_queue::NewConstraint;
    use crate::catalog::schema::{AttributeDef, RelKind};
    use crate::catalog::types::{ColumnType, TypeName};
    use crate::expr::{BinaryOp, BoundExpr};

    fn table() -> RelationDef {
        let mut rel = RelationDef::new(100, "t", "public", RelKind::Table, "alice");
        rel.attributes
            .push(AttributeDef::new(1, "a", TypeName::new(ColumnType::Integer)).not_null());
        rel.attributes
            .push(AttributeDef::new(2, "b", TypeName::new(ColumnType::Integer)));
        rel
    }

    fn entry(rel: &RelationDef) -> WorkQueueEntry {
        let mut catalog = Catalog::bootstrap("pg_default");
        catalog.insert_relation(rel.clone());
        let mut queue = WorkQueue::new();
        let idx = queue.find_or_create(&catalog, rel.oid).unwrap();
        queue.entry(idx).clone()
    }

    #[test]
    fn not_null_check_names_column() {
        let rel = table();
        let mut e = entry(&rel);
        e.verify_new_notnull = true;
        let checks = RowChecks::compile(&e, &rel).unwrap();
        assert!(checks.verify(&[Value::Integer(1), Value::Null]).is_ok());
        let err = checks.verify(&[Value::Null, Value::Integer(1)]).unwrap_err();
        assert!(matches!(err, AlterError::NotNullViolation { column, .. } if column == "a"));
    }

    #[test]
    fn check_passes_on_null_and_fails_on_false() {
        let rel = table();
        let mut e = entry(&rel);
        let int = TypeName::new(ColumnType::Integer);
        e.constraints.push(NewConstraint {
            name: "b_pos".into(),
            kind: ConstraintKind::Check,
            constraint_oid: 1,
            qual: Some(BoundExpr::compare(
                BinaryOp::Gt,
                BoundExpr::var(2, int.clone()),
                BoundExpr::constant(Value::Integer(0), int),
            )),
            referenced_rel: None,
        });
        let checks = RowChecks::compile(&e, &rel).unwrap();
        assert!(checks.verify(&[Value::Integer(1), Value::Null]).is_ok());
        assert!(checks.verify(&[Value::Integer(1), Value::Integer(3)]).is_ok());
        let err = checks
            .verify(&[Value::Integer(1), Value::Integer(-3)])
            .unwrap_err();
        assert!(matches!(err, AlterError::CheckViolation { constraint, .. } if constraint == "b_pos"));
    }

    #[test]
    fn default_partition_failure_is_distinct() {
        let rel = table();
        let mut e = entry(&rel);
        e.partition_constraint = Some(BoundExpr::not_null(BoundExpr::var(
            2,
            TypeName::new(ColumnType::Integer),
        )));
        e.validate_default = true;
        let checks = RowChecks::compile(&e, &rel).unwrap();
        let err = checks.verify(&[Value::Integer(1), Value::Null]).unwrap_err();
        assert!(matches!(err, AlterError::DefaultPartitionViolation { .. }));
        assert!(err.to_string().contains("updated partition constraint"));
    }

    #[test]
    fn block_copy_preserves_blocks() {
        let mut storage = StorageManager::new(2);
        let src = storage.create("pg_default", Persistence::Permanent);
        storage
            .append_all(src, (0..5).map(|i| Tuple::new(vec![Value::Integer(i)])))
            .unwrap();
        let (dst, copied) = copy_storage(&mut storage, src, "fast", Persistence::Permanent).unwrap();
        assert_eq!(copied, 3);
        assert_eq!(storage.tablespace(dst).unwrap(), "fast");
        assert_eq!(storage.tuples(dst).unwrap(), storage.tuples(src).unwrap());
        assert!(storage.is_synced(dst).unwrap());
    }
}
