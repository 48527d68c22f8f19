//! Table constraints: CHECK and FOREIGN KEY creation, validation, deferral
//! changes and removal, plus index-backed constraints through their index.

use crate::alter::AlterContext;
use crate::alter::command::{ConstraintSpec, ForeignKeySpec, IndexSpec, PreviousConstraint};
use crate::alter::exec::ExecTarget;
use crate::alter::work_queue::{NewConstraint, WorkQueue};
use crate::catalog::Catalog;
use crate::catalog::depend::{
    DependKind, DropBehavior, ObjectAddress, ObjectAddresses, perform_deletion,
    record_dependencies_on_columns, record_dependency,
};
use crate::catalog::schema::{
    ConstraintDef, ConstraintKind, EqualityOperator, ForeignKeyInfo, Persistence, Privilege,
    RelKind, RelationDef,
};
use crate::catalog::types::{AttrNumber, Oid, TypeName};
use crate::error::AlterError;
use crate::expr::cast::{CoercionContext, find_coercion_path};
use crate::expr::{Analyzer, BoundExpr, RawExpr, base_type};
use crate::index::{define_index, find_unique_index, primary_key};
use crate::lock::LockMode;
use crate::permission::check_privilege;
use crate::triggers::create_fk_triggers;
use tracing::{debug, info};

/// Definition that recreates `con` under its current name.
pub fn constraint_spec_from_def(
    catalog: &Catalog,
    con: &ConstraintDef,
) -> Result<ConstraintSpec, AlterError> {
    let rel = catalog.relation(con.relid)?;
    let names = |rel: &RelationDef, attnums: &[AttrNumber]| -> Result<Vec<String>, AlterError> {
        attnums
            .iter()
            .map(|a| {
                rel.attribute(*a)
                    .map(|att| att.name.to_string())
                    .ok_or_else(|| AlterError::internal(format!("constraint column {a} missing")))
            })
            .collect()
    };
    let spec = match con.kind {
        ConstraintKind::Check => {
            let expr = con
                .expr
                .as_ref()
                .ok_or_else(|| AlterError::internal("check constraint without expression"))?;
            ConstraintSpec::Check {
                name: Some(con.name.to_string()),
                expr: expr.deparse(rel)?,
                no_inherit: con.no_inherit,
                not_valid: !con.validated,
            }
        }
        ConstraintKind::ForeignKey => {
            let fk = con
                .foreign_key
                .as_ref()
                .ok_or_else(|| AlterError::internal("foreign key without key info"))?;
            let pk_rel = catalog.relation(fk.referenced_rel)?;
            ConstraintSpec::ForeignKey(ForeignKeySpec {
                name: Some(con.name.to_string()),
                columns: names(rel, &fk.fk_attnums)?,
                ref_table: pk_rel.qualified_name(),
                ref_columns: names(pk_rel, &fk.pk_attnums)?,
                on_delete: fk.on_delete,
                on_update: fk.on_update,
                match_type: fk.match_type,
                deferrable: con.deferrable,
                deferred: con.deferred,
                not_valid: !con.validated,
            })
        }
        ConstraintKind::PrimaryKey => ConstraintSpec::PrimaryKey {
            name: Some(con.name.to_string()),
            columns: names(rel, &con.attnums)?,
        },
        ConstraintKind::Unique => ConstraintSpec::Unique {
            name: Some(con.name.to_string()),
            columns: names(rel, &con.attnums)?,
        },
    };
    Ok(spec)
}

pub fn exec_add_index(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    spec: &IndexSpec,
    is_readd: bool,
) -> Result<Option<ObjectAddress>, AlterError> {
    // A pending rewrite rebuilds every index of the table anyway.
    let skip_build = !queue.entry(t.entry).rewrite.is_empty();
    let built = define_index(ctx, t.relid, spec, skip_build, None)?;
    if built.needs_not_null_check && ctx.catalog.relation(t.relid)?.kind.has_storage() {
        queue.entry_mut(t.entry).verify_new_notnull = true;
    }
    if is_readd {
        debug!(
            index = built.oid,
            reused = spec.reuse_storage.is_some(),
            "re-added index after column type change"
        );
    }
    Ok(Some(ObjectAddress::relation(built.oid)))
}

pub fn exec_add_constraint(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    spec: &ConstraintSpec,
    previous: Option<&PreviousConstraint>,
    is_readd: bool,
) -> Result<Option<ObjectAddress>, AlterError> {
    match spec {
        ConstraintSpec::Check {
            name,
            expr,
            no_inherit,
            not_valid,
        } => {
            let name = match name {
                Some(n) => n.clone(),
                None => {
                    let first = expr.column_names().into_iter().next();
                    ctx.catalog
                        .choose_constraint_name(t.relid, first.as_deref(), "check")
                }
            };
            let check = CheckDef {
                name: &name,
                expr,
                no_inherit: *no_inherit,
                not_valid: *not_valid,
            };
            add_check_constraint(ctx, queue, t, &check, is_readd)
        }
        ConstraintSpec::ForeignKey(fk) => add_foreign_key(ctx, queue, t, fk, previous),
        ConstraintSpec::Unique { .. } | ConstraintSpec::PrimaryKey { .. } => Err(
            AlterError::internal("index-backed constraints are added through their index"),
        ),
    }
}

/// A CHECK constraint with its name already fixed, so every copy down the
/// inheritance tree carries the same name.
struct CheckDef<'a> {
    name: &'a str,
    expr: &'a RawExpr,
    no_inherit: bool,
    not_valid: bool,
}

fn validated_premises(catalog: &Catalog, rel: &RelationDef, except: Oid) -> Vec<BoundExpr> {
    let mut premises: Vec<BoundExpr> = catalog
        .constraints_of(rel.oid)
        .into_iter()
        .filter(|c| c.oid != except && c.kind == ConstraintKind::Check && c.validated)
        .filter_map(|c| c.expr.clone())
        .collect();
    premises.extend(
        rel.live_attributes()
            .filter(|a| a.not_null)
            .map(|a| BoundExpr::not_null(BoundExpr::var(a.attnum, a.type_name.clone()))),
    );
    premises
}

/// Queues a phase 3 check of `qual` unless existing constraints prove it.
fn queue_check_validation(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    entry: usize,
    rel: &RelationDef,
    con: &ConstraintDef,
    qual: BoundExpr,
) {
    if ctx.config.constraint_implication_enabled {
        let premises = validated_premises(ctx.catalog, rel, con.oid);
        if ctx.prover.implies(&premises, &qual) {
            info!(
                relation = %rel.name,
                constraint = %con.name,
                prover = ctx.prover.name(),
                "existing constraints prove the new constraint; skipping validation scan"
            );
            ctx.report
                .skipped_validations
                .push(format!("{}.{}", rel.name, con.name));
            return;
        }
    }
    queue.entry_mut(entry).constraints.push(NewConstraint {
        name: con.name.clone(),
        kind: ConstraintKind::Check,
        constraint_oid: con.oid,
        qual: Some(qual),
        referenced_rel: None,
    });
}

fn add_check_constraint(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    check: &CheckDef<'_>,
    is_readd: bool,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(t.relid)?.clone();
    if check.no_inherit && rel.is_partitioned() {
        return Err(AlterError::table_def(format!(
            "cannot add NO INHERIT constraint to partitioned table \"{}\"",
            rel.name
        )));
    }
    let qual = Analyzer::new(&rel, &*ctx.catalog).analyze_predicate(check.expr, "CHECK")?;

    if let Some(existing) = ctx.catalog.constraint_by_name(t.relid, check.name).cloned() {
        // A local copy that is also inherited was already recreated by the
        // parent's re-add; it only needs its local flag back.
        if is_readd && !t.recursing && !existing.is_local && existing.inhcount > 0 {
            return restore_local_check(ctx, &rel, &existing, &qual);
        }
        if !t.recursing {
            return Err(AlterError::DuplicateObject {
                message: format!(
                    "constraint \"{}\" for relation \"{}\" already exists",
                    check.name, rel.name
                ),
            });
        }
        return merge_check_into_child(ctx, &rel, &existing, &qual);
    }

    let oid = ctx.catalog.alloc_oid();
    let con = ConstraintDef {
        oid,
        relid: t.relid,
        name: check.name.into(),
        kind: ConstraintKind::Check,
        expr: Some(qual.clone()),
        index: None,
        foreign_key: None,
        attnums: qual.attnums().into_iter().collect(),
        deferrable: false,
        deferred: false,
        validated: !check.not_valid,
        inhcount: i32::from(t.recursing),
        is_local: !t.recursing,
        no_inherit: check.no_inherit,
    };
    ctx.catalog.constraints.insert(oid, con.clone());
    record_dependencies_on_columns(
        ctx.catalog,
        ObjectAddress::constraint(oid),
        t.relid,
        con.attnums.iter().copied(),
        DependKind::Auto,
    );
    debug!(relation = %rel.name, constraint = check.name, is_readd, "added check constraint");

    if !check.not_valid && rel.kind.has_storage() {
        queue_check_validation(ctx, queue, t.entry, &rel, &con, qual);
    }

    if check.no_inherit {
        return Ok(Some(ObjectAddress::constraint(oid)));
    }
    let children = ctx.catalog.children(t.relid);
    if !children.is_empty() && !t.recurse && !t.recursing {
        return Err(AlterError::table_def(format!(
            "constraint must be added to child tables too (\"{}\")",
            check.name
        )));
    }
    for child in children {
        ctx.lock_relation(child, t.lockmode);
        let name = ctx.catalog.relation_name(child);
        ctx.session.check_table_not_in_use(child, &name, "ALTER TABLE")?;
        let entry = queue.find_or_create(ctx.catalog, child)?;
        let child_target = ExecTarget {
            entry,
            relid: child,
            recurse: true,
            recursing: true,
            lockmode: t.lockmode,
        };
        add_check_constraint(ctx, queue, child_target, check, is_readd)?;
    }
    Ok(Some(ObjectAddress::constraint(oid)))
}

fn merge_check_into_child(
    ctx: &mut AlterContext<'_>,
    rel: &RelationDef,
    existing: &ConstraintDef,
    qual: &BoundExpr,
) -> Result<Option<ObjectAddress>, AlterError> {
    let same = existing.kind == ConstraintKind::Check
        && existing
            .expr
            .as_ref()
            .is_some_and(|e| e.canonical(rel) == qual.canonical(rel));
    if !same {
        return Err(AlterError::DuplicateObject {
            message: format!(
                "constraint \"{}\" for relation \"{}\" already exists",
                existing.name, rel.name
            ),
        });
    }
    if existing.no_inherit {
        return Err(AlterError::object_def(format!(
            "constraint \"{}\" conflicts with non-inherited constraint on relation \"{}\"",
            existing.name, rel.name
        )));
    }
    ctx.notice(format!(
        "merging constraint \"{}\" with inherited definition",
        existing.name
    ));
    ctx.catalog.constraint_mut(existing.oid)?.inhcount += 1;
    Ok(Some(ObjectAddress::constraint(existing.oid)))
}

fn restore_local_check(
    ctx: &mut AlterContext<'_>,
    rel: &RelationDef,
    existing: &ConstraintDef,
    qual: &BoundExpr,
) -> Result<Option<ObjectAddress>, AlterError> {
    let same = existing
        .expr
        .as_ref()
        .is_some_and(|e| e.canonical(rel) == qual.canonical(rel));
    if !same {
        return Err(AlterError::DuplicateObject {
            message: format!(
                "constraint \"{}\" for relation \"{}\" already exists",
                existing.name, rel.name
            ),
        });
    }
    ctx.catalog.constraint_mut(existing.oid)?.is_local = true;
    debug!(relation = %rel.name, constraint = %existing.name, "restored local check constraint");
    Ok(Some(ObjectAddress::constraint(existing.oid)))
}

fn resolve_columns(rel: &RelationDef, columns: &[String]) -> Result<Vec<(AttrNumber, TypeName)>, AlterError> {
    columns
        .iter()
        .map(|c| {
            rel.attribute_by_name(c)
                .map(|a| (a.attnum, a.type_name.clone()))
                .ok_or_else(|| AlterError::UndefinedColumn {
                    relation: rel.name.to_string(),
                    column: c.clone(),
                })
        })
        .collect()
}

fn check_fk_persistence(rel: &RelationDef, pk_rel: &RelationDef) -> Result<(), AlterError> {
    let message = match (rel.persistence, pk_rel.persistence) {
        (Persistence::Permanent, p) if p != Persistence::Permanent => {
            "constraints on permanent tables may reference only permanent tables"
        }
        (Persistence::Unlogged, Persistence::Temporary) => {
            "constraints on unlogged tables may reference only permanent or unlogged tables"
        }
        (Persistence::Temporary, p) if p != Persistence::Temporary => {
            "constraints on temporary tables may reference only temporary tables"
        }
        _ => return Ok(()),
    };
    Err(AlterError::InvalidForeignKey {
        message: message.into(),
    })
}

fn add_foreign_key(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    spec: &ForeignKeySpec,
    previous: Option<&PreviousConstraint>,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(t.relid)?.clone();
    if rel.is_partitioned() {
        return Err(AlterError::unsupported(format!(
            "foreign key constraints are not supported on partitioned table \"{}\"",
            rel.name
        )));
    }
    let pk_oid = ctx.catalog.lookup_required(&spec.ref_table)?;
    // A self-referencing key already holds the lock it needs.
    if pk_oid != t.relid {
        ctx.lock_relation(pk_oid, LockMode::ShareRowExclusive);
    }
    let pk_rel = ctx.catalog.relation(pk_oid)?.clone();
    if pk_rel.is_partitioned() {
        return Err(AlterError::wrong_kind(format!(
            "cannot reference partitioned table \"{}\"",
            pk_rel.name
        )));
    }
    if pk_rel.kind != RelKind::Table {
        return Err(AlterError::wrong_kind(format!(
            "referenced relation \"{}\" is not a table",
            pk_rel.name
        )));
    }
    check_privilege(ctx.catalog, ctx.caller, pk_oid, Privilege::References)?;
    check_fk_persistence(&rel, &pk_rel)?;
    if spec.deferred && !spec.deferrable {
        return Err(AlterError::object_def(
            "constraint declared INITIALLY DEFERRED must be DEFERRABLE",
        ));
    }

    let fk_cols = resolve_columns(&rel, &spec.columns)?;
    let (pk_cols, pk_index) = if spec.ref_columns.is_empty() {
        let pk = primary_key(ctx.catalog, pk_oid).ok_or_else(|| AlterError::InvalidForeignKey {
            message: format!(
                "there is no primary key for referenced table \"{}\"",
                pk_rel.name
            ),
        })?;
        let cols = pk
            .attnums
            .iter()
            .filter_map(|a| pk_rel.attribute(*a))
            .map(|a| (a.attnum, a.type_name.clone()))
            .collect::<Vec<_>>();
        (cols, pk.oid)
    } else {
        let cols = resolve_columns(&pk_rel, &spec.ref_columns)?;
        let attnums: Vec<AttrNumber> = cols.iter().map(|(a, _)| *a).collect();
        let index = find_unique_index(ctx.catalog, pk_oid, &attnums).ok_or_else(|| {
            AlterError::InvalidForeignKey {
                message: format!(
                    "there is no unique constraint matching given keys for referenced table \"{}\"",
                    pk_rel.name
                ),
            }
        })?;
        (cols, index)
    };
    if fk_cols.len() != pk_cols.len() {
        return Err(AlterError::InvalidForeignKey {
            message: "number of referencing and referenced columns for foreign key disagree"
                .into(),
        });
    }

    let name = spec.name.clone().unwrap_or_else(|| {
        ctx.catalog
            .choose_constraint_name(t.relid, spec.columns.first().map(String::as_str), "fkey")
    });
    if ctx.catalog.constraint_by_name(t.relid, &name).is_some() {
        return Err(AlterError::DuplicateObject {
            message: format!(
                "constraint \"{name}\" for relation \"{}\" already exists",
                rel.name
            ),
        });
    }

    let mut operators = Vec::with_capacity(fk_cols.len());
    for (i, ((_, fk_type), (_, pk_type))) in fk_cols.iter().zip(&pk_cols).enumerate() {
        let fk_base = base_type(fk_type, &*ctx.catalog)?;
        let pk_base = base_type(pk_type, &*ctx.catalog)?;
        let fk_coercion = if fk_base == pk_base {
            None
        } else {
            Some(
                find_coercion_path(&fk_base, &pk_base, CoercionContext::Implicit).ok_or_else(
                    || AlterError::DatatypeMismatch {
                        message: format!(
                            "foreign key constraint \"{name}\" cannot be implemented: key columns \"{}\" and \"{}\" are of incompatible types: {} and {}",
                            spec.columns[i],
                            pk_rel
                                .attribute(pk_cols[i].0)
                                .map(|a| a.name.to_string())
                                .unwrap_or_default(),
                            fk_type.display(),
                            pk_type.display()
                        ),
                    },
                )?,
            )
        };
        operators.push(EqualityOperator {
            operand: pk_base,
            fk_type: fk_type.clone(),
            pk_type: pk_type.clone(),
            fk_coercion,
        });
    }

    // Re-adding after a type change: same operators and binary coercions
    // mean the old validation still holds.
    let unchanged = previous.is_some_and(|prev| {
        prev.validated
            && prev.operators.len() == operators.len()
            && prev
                .operators
                .iter()
                .zip(&operators)
                .all(|(old, new)| old.operand == new.operand && old.is_binary() && new.is_binary())
    });

    let oid = ctx.catalog.alloc_oid();
    let fk_attnums: Vec<AttrNumber> = fk_cols.iter().map(|(a, _)| *a).collect();
    let pk_attnums: Vec<AttrNumber> = pk_cols.iter().map(|(a, _)| *a).collect();
    let con = ConstraintDef {
        oid,
        relid: t.relid,
        name: name.as_str().into(),
        kind: ConstraintKind::ForeignKey,
        expr: None,
        index: Some(pk_index),
        foreign_key: Some(ForeignKeyInfo {
            referenced_rel: pk_oid,
            referenced_index: pk_index,
            fk_attnums: fk_attnums.clone(),
            pk_attnums: pk_attnums.clone(),
            operators,
            on_delete: spec.on_delete,
            on_update: spec.on_update,
            match_type: spec.match_type,
        }),
        attnums: fk_attnums.clone(),
        deferrable: spec.deferrable,
        deferred: spec.deferred,
        validated: !spec.not_valid,
        inhcount: 0,
        is_local: true,
        no_inherit: true,
    };
    ctx.catalog.constraints.insert(oid, con.clone());
    let address = ObjectAddress::constraint(oid);
    record_dependencies_on_columns(ctx.catalog, address, t.relid, fk_attnums, DependKind::Auto);
    record_dependencies_on_columns(ctx.catalog, address, pk_oid, pk_attnums, DependKind::Normal);
    record_dependency(
        ctx.catalog,
        address,
        ObjectAddress::relation(pk_index),
        DependKind::Normal,
    );
    create_fk_triggers(ctx.catalog, &con)?;
    ctx.invalidate(pk_oid);

    if unchanged {
        debug!(constraint = %name, "foreign key operators unchanged; revalidation skipped");
        ctx.report.skipped_validations.push(format!("{}.{name}", rel.name));
    } else if !spec.not_valid {
        queue.entry_mut(t.entry).constraints.push(NewConstraint {
            name: name.as_str().into(),
            kind: ConstraintKind::ForeignKey,
            constraint_oid: oid,
            qual: None,
            referenced_rel: Some(pk_oid),
        });
    }
    Ok(Some(address))
}

pub fn exec_alter_constraint(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    name: &str,
    deferrable: bool,
    deferred: bool,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel_name = ctx.catalog.relation_name(relid);
    let con = ctx
        .catalog
        .constraint_by_name(relid, name)
        .cloned()
        .ok_or_else(|| AlterError::UndefinedConstraint {
            relation: rel_name.clone(),
            constraint: name.to_string(),
        })?;
    if con.kind != ConstraintKind::ForeignKey {
        return Err(AlterError::wrong_kind(format!(
            "constraint \"{name}\" of relation \"{rel_name}\" is not a foreign key constraint"
        )));
    }
    if deferred && !deferrable {
        return Err(AlterError::object_def(
            "constraint declared INITIALLY DEFERRED must be DEFERRABLE",
        ));
    }
    if con.deferrable == deferrable && con.deferred == deferred {
        return Ok(None);
    }
    let target = ctx.catalog.constraint_mut(con.oid)?;
    target.deferrable = deferrable;
    target.deferred = deferred;
    if let Some(fk) = &con.foreign_key {
        ctx.invalidate(fk.referenced_rel);
    }
    Ok(Some(ObjectAddress::constraint(con.oid)))
}

pub fn exec_validate_constraint(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    name: &str,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(t.relid)?.clone();
    let con = ctx
        .catalog
        .constraint_by_name(t.relid, name)
        .cloned()
        .ok_or_else(|| AlterError::UndefinedConstraint {
            relation: rel.name.to_string(),
            constraint: name.to_string(),
        })?;
    match con.kind {
        ConstraintKind::ForeignKey => {
            if !con.validated {
                let referenced_rel = con.foreign_key.as_ref().map(|f| f.referenced_rel);
                if let Some(pk) = referenced_rel
                    && pk != t.relid
                {
                    ctx.lock_relation(pk, LockMode::ShareRowExclusive);
                }
                // The flag flips once the phase 3 check passes.
                queue.entry_mut(t.entry).constraints.push(NewConstraint {
                    name: con.name.clone(),
                    kind: ConstraintKind::ForeignKey,
                    constraint_oid: con.oid,
                    qual: None,
                    referenced_rel,
                });
            }
        }
        ConstraintKind::Check => validate_check(ctx, queue, t, &rel, &con)?,
        _ => {
            return Err(AlterError::wrong_kind(format!(
                "constraint \"{name}\" of relation \"{}\" is not a foreign key or check constraint",
                rel.name
            )));
        }
    }
    Ok(Some(ObjectAddress::constraint(con.oid)))
}

fn validate_check(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    rel: &RelationDef,
    con: &ConstraintDef,
) -> Result<(), AlterError> {
    if con.validated {
        return Ok(());
    }
    if !con.no_inherit {
        let children = ctx.catalog.children(t.relid);
        if !children.is_empty() && !t.recurse && !t.recursing {
            return Err(AlterError::table_def(format!(
                "constraint must be validated on child tables too (\"{}\")",
                con.name
            )));
        }
        for child in children {
            ctx.lock_relation(child, t.lockmode);
            let child_rel = ctx.catalog.relation(child)?.clone();
            let Some(child_con) = ctx.catalog.constraint_by_name(child, &con.name).cloned() else {
                return Err(AlterError::UndefinedConstraint {
                    relation: child_rel.name.to_string(),
                    constraint: con.name.to_string(),
                });
            };
            let entry = queue.find_or_create(ctx.catalog, child)?;
            let child_target = ExecTarget {
                entry,
                relid: child,
                recurse: true,
                recursing: true,
                lockmode: t.lockmode,
            };
            validate_check(ctx, queue, child_target, &child_rel, &child_con)?;
        }
    }
    if rel.kind.has_storage()
        && let Some(qual) = con.expr.clone()
    {
        queue.entry_mut(t.entry).constraints.push(NewConstraint {
            name: con.name.clone(),
            kind: ConstraintKind::Check,
            constraint_oid: con.oid,
            qual: Some(qual),
            referenced_rel: None,
        });
    }
    // A failing scan aborts the statement, so the flag can flip now.
    ctx.catalog.constraint_mut(con.oid)?.validated = true;
    Ok(())
}

pub fn exec_drop_constraint(
    ctx: &mut AlterContext<'_>,
    t: ExecTarget,
    name: &str,
    behavior: DropBehavior,
    missing_ok: bool,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(t.relid)?.clone();
    let Some(con) = ctx.catalog.constraint_by_name(t.relid, name).cloned() else {
        if missing_ok {
            ctx.notice(format!(
                "constraint \"{name}\" of relation \"{}\" does not exist, skipping",
                rel.name
            ));
            return Ok(None);
        }
        return Err(AlterError::UndefinedConstraint {
            relation: rel.name.to_string(),
            constraint: name.to_string(),
        });
    };
    if con.inhcount > 0 && !t.recursing {
        return Err(AlterError::table_def(format!(
            "cannot drop inherited constraint \"{name}\" of relation \"{}\"",
            rel.name
        )));
    }
    if let Some(fk) = &con.foreign_key
        && fk.referenced_rel != t.relid
    {
        ctx.lock_relation(fk.referenced_rel, LockMode::AccessExclusive);
    }

    let mut doomed = ObjectAddresses::new();
    doomed.add(ObjectAddress::constraint(con.oid));
    let report = perform_deletion(ctx.catalog, &doomed, behavior)?;
    for storage in report.dropped_storage {
        ctx.session.schedule_unlink(storage, true);
    }
    debug!(relation = %rel.name, constraint = name, "dropped constraint");

    if con.kind != ConstraintKind::Check || con.no_inherit {
        return Ok(None);
    }
    let children = ctx.catalog.children(t.relid);
    if !children.is_empty() && !t.recurse && rel.is_partitioned() {
        return Err(AlterError::OnlyNotAllowed {
            message: "cannot remove constraint from only the partitioned table when partitions exist"
                .into(),
        });
    }
    for child in children {
        ctx.lock_relation(child, t.lockmode);
        let child_name = ctx.catalog.relation_name(child);
        let child_con = ctx
            .catalog
            .constraint_by_name(child, name)
            .cloned()
            .ok_or_else(|| AlterError::UndefinedConstraint {
                relation: child_name,
                constraint: name.to_string(),
            })?;
        if t.recurse && child_con.inhcount == 1 && !child_con.is_local {
            let child_target = ExecTarget {
                relid: child,
                recursing: true,
                ..t
            };
            exec_drop_constraint(ctx, child_target, name, behavior, false)?;
        } else {
            let target = ctx.catalog.constraint_mut(child_con.oid)?;
            target.inhcount -= 1;
            if !t.recurse {
                target.is_local = true;
            }
        }
    }
    Ok(None)
}
