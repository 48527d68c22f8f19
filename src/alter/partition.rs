//! ATTACH PARTITION and DETACH PARTITION for tables and partitioned
//! indexes.

use crate::alter::AlterContext;
use crate::alter::exec::ExecTarget;
use crate::alter::work_queue::WorkQueue;
use crate::catalog::depend::{DependKind, ObjectAddress, record_dependency};
use crate::catalog::schema::{ConstraintKind, PartitionBound, Persistence, RelKind, RelationDef};
use crate::catalog::types::Oid;
use crate::error::AlterError;
use crate::expr::BoundExpr;
use crate::index::{
    attach_or_create_partition_index, attach_partition_index, detach_partition_indexes,
    validate_partition_index,
};
use crate::lock::LockMode;
use crate::merge::{
    merge_attributes_into_existing, merge_constraints_into_existing,
    merge_distribution_into_existing, remove_inheritance_counts,
};
use crate::partition::{
    check_new_partition_bound, default_partition, get_partition_constraint,
    transform_partition_bound,
};
use crate::permission::check_owner;
use tracing::{debug, info};

fn check_attachable(
    ctx: &AlterContext<'_>,
    parent: &RelationDef,
    attach: &RelationDef,
) -> Result<(), AlterError> {
    if !matches!(
        attach.kind,
        RelKind::Table | RelKind::PartitionedTable | RelKind::ForeignTable
    ) {
        return Err(AlterError::wrong_kind(format!(
            "\"{}\" is not a table or foreign table",
            attach.name
        )));
    }
    if attach.is_partition {
        return Err(AlterError::object_def(format!(
            "\"{}\" is already a partition",
            attach.name
        )));
    }
    if attach.of_type.is_some() {
        return Err(AlterError::wrong_kind("cannot attach a typed table as partition"));
    }
    if !ctx.catalog.parents(attach.oid).is_empty() {
        return Err(AlterError::wrong_kind(
            "cannot attach inheritance child as partition",
        ));
    }
    if !attach.is_partitioned() && ctx.catalog.has_subclass(attach.oid) {
        return Err(AlterError::wrong_kind(
            "cannot attach inheritance parent as partition",
        ));
    }
    if ctx.catalog.find_all_inheritors(attach.oid).contains(&parent.oid) {
        return Err(AlterError::CircularInheritance {
            relation: attach.name.to_string(),
            parent: parent.name.to_string(),
        });
    }
    match (parent.persistence, attach.persistence) {
        (Persistence::Temporary, p) if p != Persistence::Temporary => {
            return Err(AlterError::wrong_kind(format!(
                "cannot attach a permanent relation as partition of temporary relation \"{}\"",
                parent.name
            )));
        }
        (p, Persistence::Temporary) if p != Persistence::Temporary => {
            return Err(AlterError::wrong_kind(format!(
                "cannot attach a temporary relation as partition of permanent relation \"{}\"",
                parent.name
            )));
        }
        _ => {}
    }
    if let Some(trigger) = ctx
        .catalog
        .triggers_of(attach.oid)
        .into_iter()
        .find(|t| t.has_transition_tables && t.row_level)
    {
        return Err(AlterError::unsupported(format!(
            "trigger \"{}\" prevents table \"{}\" from becoming a partition",
            trigger.name, attach.name
        )));
    }
    Ok(())
}

/// Leaf relations under `relid` (itself when it is not partitioned).
fn leaves(ctx: &AlterContext<'_>, relid: Oid) -> Vec<Oid> {
    ctx.catalog
        .find_all_inheritors(relid)
        .into_iter()
        .filter(|oid| {
            ctx.catalog
                .relations
                .get(oid)
                .is_some_and(|r| r.kind.has_storage())
        })
        .collect()
}

/// Whether validated constraints of `rel` already prove `qual`.
fn constraint_implied(ctx: &AlterContext<'_>, rel: &RelationDef, qual: &BoundExpr) -> bool {
    if !ctx.config.constraint_implication_enabled {
        return false;
    }
    let mut premises: Vec<BoundExpr> = ctx
        .catalog
        .constraints_of(rel.oid)
        .into_iter()
        .filter(|c| c.kind == ConstraintKind::Check && c.validated)
        .filter_map(|c| c.expr.clone())
        .collect();
    premises.extend(
        rel.live_attributes()
            .filter(|a| a.not_null)
            .map(|a| BoundExpr::not_null(BoundExpr::var(a.attnum, a.type_name.clone()))),
    );
    ctx.prover.implies(&premises, qual)
}

/// Queues a scan of every leaf under `relid` against its partition
/// constraint, unless existing constraints already prove it.
pub(crate) fn queue_partition_check(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    relid: Oid,
    validate_default: bool,
) -> Result<(), AlterError> {
    for leaf in leaves(ctx, relid) {
        let Some(qual) = get_partition_constraint(ctx.catalog, leaf)? else {
            continue;
        };
        let rel = ctx.catalog.relation(leaf)?.clone();
        if constraint_implied(ctx, &rel, &qual) {
            let what = if validate_default {
                "updated partition constraint for default partition"
            } else {
                "partition constraint for table"
            };
            info!(
                relation = %rel.name,
                prover = ctx.prover.name(),
                "{what} is implied by existing constraints"
            );
            ctx.report
                .skipped_validations
                .push(format!("{} partition constraint", rel.name));
            continue;
        }
        if leaf != relid {
            ctx.lock_relation(leaf, LockMode::AccessExclusive);
        }
        let entry = queue.find_or_create(ctx.catalog, leaf)?;
        let e = queue.entry_mut(entry);
        e.partition_constraint = Some(qual);
        e.validate_default |= validate_default;
    }
    Ok(())
}

pub fn exec_attach_partition(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    name: &str,
    bound: &PartitionBound,
) -> Result<Option<ObjectAddress>, AlterError> {
    let parent = ctx.catalog.relation(t.relid)?.clone();
    // The default partition is locked before the table being attached.
    let default = default_partition(ctx.catalog, t.relid);
    if let Some(default) = default {
        ctx.lock_relation(default, LockMode::AccessExclusive);
    }
    let attach_oid = ctx.catalog.lookup_required(name)?;
    ctx.lock_relation(attach_oid, LockMode::AccessExclusive);
    let attach = ctx.catalog.relation(attach_oid)?.clone();
    check_owner(ctx.catalog, ctx.caller, &attach)?;
    ctx.session
        .check_table_not_in_use(attach_oid, &attach.name, "ALTER TABLE")?;
    check_attachable(ctx, &parent, &attach)?;

    let bound = transform_partition_bound(ctx.catalog, &parent, &attach.name, bound)?;
    check_new_partition_bound(ctx.catalog, t.relid, &attach.name, &bound)?;
    merge_distribution_into_existing(ctx.config, &attach, &parent)?;
    merge_attributes_into_existing(ctx.catalog, ctx.config, attach_oid, t.relid)?;
    merge_constraints_into_existing(ctx.catalog, attach_oid, t.relid)?;

    {
        let rel = ctx.catalog.relation_mut(attach_oid)?;
        rel.is_partition = true;
        rel.partition_bound = Some(bound.clone());
    }
    ctx.catalog.add_inherit_edge(attach_oid, t.relid);
    record_dependency(
        ctx.catalog,
        ObjectAddress::relation(attach_oid),
        ObjectAddress::relation(t.relid),
        DependKind::Auto,
    );

    let parent_indexes: Vec<Oid> = ctx
        .catalog
        .indexes_of(t.relid)
        .iter()
        .map(|i| i.oid)
        .collect();
    for parent_index in parent_indexes {
        attach_or_create_partition_index(ctx, parent_index, attach_oid)?;
        validate_partition_index(ctx.catalog, parent_index)?;
    }

    queue_partition_check(ctx, queue, attach_oid, false)?;
    if let Some(default) = default {
        queue_partition_check(ctx, queue, default, true)?;
        ctx.invalidate(default);
    }
    ctx.invalidate(attach_oid);
    debug!(
        parent = %parent.name,
        partition = %attach.name,
        default = bound.is_default(),
        "attached partition"
    );
    Ok(Some(ObjectAddress::relation(attach_oid)))
}

pub fn exec_detach_partition(
    ctx: &mut AlterContext<'_>,
    t: ExecTarget,
    name: &str,
) -> Result<Option<ObjectAddress>, AlterError> {
    let parent_name = ctx.catalog.relation_name(t.relid);
    let part_oid = ctx.catalog.lookup_required(name)?;
    if ctx.catalog.partition_parent(part_oid) != Some(t.relid) {
        return Err(AlterError::RelationNotRelated {
            message: format!(
                "relation \"{name}\" is not a partition of relation \"{parent_name}\""
            ),
        });
    }
    let default = default_partition(ctx.catalog, t.relid).filter(|d| *d != part_oid);
    if let Some(default) = default {
        ctx.lock_relation(default, LockMode::AccessExclusive);
    }
    ctx.lock_relation(part_oid, LockMode::AccessExclusive);
    let part_name = ctx.catalog.relation_name(part_oid);
    ctx.session
        .check_table_not_in_use(part_oid, &part_name, "ALTER TABLE")?;

    ctx.catalog.remove_inherit_edge(part_oid, t.relid);
    {
        let rel = ctx.catalog.relation_mut(part_oid)?;
        rel.is_partition = false;
        rel.partition_bound = None;
    }
    remove_inheritance_counts(ctx.catalog, part_oid, t.relid)?;
    let dependent = ObjectAddress::relation(part_oid);
    let referenced = ObjectAddress::relation(t.relid);
    ctx.catalog
        .depends
        .retain(|e| !(e.dependent == dependent && e.referenced == referenced));
    detach_partition_indexes(ctx.catalog, part_oid)?;

    // The default partition's constraint only loosens; no scan needed.
    if let Some(default) = default {
        ctx.invalidate(default);
    }
    ctx.invalidate(part_oid);
    debug!(parent = %parent_name, partition = %part_name, "detached partition");
    Ok(Some(ObjectAddress::relation(part_oid)))
}

pub fn exec_attach_index_partition(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    index: &str,
) -> Result<Option<ObjectAddress>, AlterError> {
    let table = ctx.catalog.index(relid)?.relid;
    let child_index = ctx.catalog.lookup_required(index)?;
    if let Some(child) = ctx.catalog.indexes.get(&child_index) {
        let child_table = child.relid;
        ctx.lock_relation(child_table, LockMode::ShareUpdateExclusive);
    }
    ctx.lock_relation(child_index, LockMode::AccessExclusive);
    let attached = attach_partition_index(ctx, relid, index)?;
    ctx.invalidate(table);
    Ok(Some(ObjectAddress::relation(attached)))
}
