//! Phase 2: runs queued subcommands pass by pass across every relation in
//! the work queue.

use crate::alter::command::{CommentTarget, Subcommand};
use crate::alter::work_queue::{AlterPass, QueuedCommand, WorkQueue};
use crate::alter::{AlterContext, columns, constraints, inherit, misc, partition};
use crate::catalog::depend::{
    DependKind, DropBehavior, ObjectAddress, ObjectAddresses, perform_deletion, record_dependency,
};
use crate::catalog::schema::{RelKind, RelationDef};
use crate::catalog::types::Oid;
use crate::error::AlterError;
use crate::lock::LockMode;
use tracing::debug;

pub(crate) const TOAST_NAMESPACE: &str = "pg_toast";

/// Where a subcommand runs and how it was queued.
#[derive(Debug, Clone, Copy)]
pub struct ExecTarget {
    pub entry: usize,
    pub relid: Oid,
    pub recurse: bool,
    pub recursing: bool,
    pub lockmode: LockMode,
}

pub fn rewrite_catalogs(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    lockmode: LockMode,
) -> Result<(), AlterError> {
    for pass in AlterPass::ALL {
        let mut i = 0;
        // Entries may be appended while a pass runs; they are visited too.
        while i < queue.len() {
            loop {
                let cmds = std::mem::take(&mut queue.entry_mut(i).subcmds[pass.index()]);
                if cmds.is_empty() {
                    break;
                }
                for queued in cmds {
                    let target = ExecTarget {
                        entry: i,
                        relid: queue.entry(i).relid,
                        recurse: queued.recurse,
                        recursing: queued.recursing,
                        lockmode,
                    };
                    let address = exec_cmd(ctx, queue, target, &queued.cmd)?;
                    ctx.record_event(target.relid, pass, &queued.cmd, address)?;
                    ctx.invalidate(target.relid);
                    ctx.command_counter_increment();
                }
            }
            if pass == AlterPass::AlterType {
                post_alter_type_cleanup(ctx, queue, i)?;
            }
            i += 1;
        }
        debug!(pass = pass.name(), "pass complete");
    }

    for i in 0..queue.len() {
        let relid = queue.entry(i).relid;
        if ctx.catalog.relations.contains_key(&relid) {
            create_toast_if_needed(ctx, relid)?;
        }
    }
    Ok(())
}

fn exec_cmd(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    cmd: &Subcommand,
) -> Result<Option<ObjectAddress>, AlterError> {
    match cmd {
        Subcommand::AddColumn {
            column,
            if_not_exists,
        } => columns::exec_add_column(ctx, queue, t, column, *if_not_exists),
        Subcommand::ColumnDefault { column, default } => {
            columns::exec_column_default(ctx, t.relid, column, default.as_ref())
        }
        Subcommand::DropNotNull { column } => columns::exec_drop_not_null(ctx, t.relid, column),
        Subcommand::SetNotNull { column } => columns::exec_set_not_null(ctx, queue, t, column),
        Subcommand::SetStatistics { column, target } => {
            columns::exec_set_statistics(ctx, t.relid, column, *target)
        }
        Subcommand::SetStorage { column, storage } => {
            columns::exec_set_storage(ctx, t.relid, column, *storage)
        }
        Subcommand::SetAttributeOptions { column, options } => {
            columns::exec_set_attribute_options(ctx, t.relid, column, options)
        }
        Subcommand::DropColumn {
            column,
            behavior,
            missing_ok,
        } => columns::exec_drop_column(ctx, queue, t, column, *behavior, *missing_ok),
        Subcommand::AddIndex(spec) => constraints::exec_add_index(ctx, queue, t, spec, false),
        Subcommand::ReAddIndex(spec) => constraints::exec_add_index(ctx, queue, t, spec, true),
        Subcommand::AddConstraint(spec) => {
            constraints::exec_add_constraint(ctx, queue, t, spec, None, false)
        }
        Subcommand::ReAddConstraint { spec, previous } => {
            constraints::exec_add_constraint(ctx, queue, t, spec, previous.as_ref(), true)
        }
        Subcommand::AlterConstraint {
            name,
            deferrable,
            deferred,
        } => constraints::exec_alter_constraint(ctx, t.relid, name, *deferrable, *deferred),
        Subcommand::ValidateConstraint { name } => {
            constraints::exec_validate_constraint(ctx, queue, t, name)
        }
        Subcommand::DropConstraint {
            name,
            behavior,
            missing_ok,
        } => constraints::exec_drop_constraint(ctx, t, name, *behavior, *missing_ok),
        Subcommand::ReAddComment { target, comment } => {
            exec_readd_comment(ctx, t.relid, target, comment)
        }
        Subcommand::AlterColumnType {
            column,
            type_name,
            collation,
            ..
        } => columns::exec_alter_column_type(ctx, queue, t, column, type_name, collation.as_deref()),
        Subcommand::ChangeOwner { new_owner } => misc::exec_change_owner(ctx, t.relid, new_owner, false),
        Subcommand::ClusterOn { index } => misc::exec_cluster_on(ctx, t.relid, index),
        Subcommand::DropCluster => misc::exec_drop_cluster(ctx, t.relid),
        Subcommand::SetLogged | Subcommand::SetUnlogged => {
            misc::exec_set_persistence(ctx, queue, t)
        }
        Subcommand::SetWithOids => misc::exec_set_oids(ctx, t.relid, true),
        Subcommand::SetWithoutOids => misc::exec_set_oids(ctx, t.relid, false),
        Subcommand::SetTablespace { tablespace } => {
            misc::exec_set_tablespace(ctx, t.relid, tablespace)
        }
        Subcommand::SetRelOptions { options } => misc::exec_set_rel_options(ctx, t.relid, options),
        Subcommand::ResetRelOptions { options } => {
            misc::exec_reset_rel_options(ctx, t.relid, options)
        }
        Subcommand::SetTrigger { target, firing } => {
            misc::exec_set_trigger(ctx, t.relid, target, *firing)
        }
        Subcommand::SetRule { name, firing } => misc::exec_set_rule(ctx, t.relid, name, *firing),
        Subcommand::AddInherit { parent } => inherit::exec_add_inherit(ctx, t.relid, parent),
        Subcommand::DropInherit { parent } => inherit::exec_drop_inherit(ctx, t.relid, parent),
        Subcommand::DropOf => inherit::exec_drop_of(ctx, t.relid),
        Subcommand::ReplicaIdentity(spec) => misc::exec_replica_identity(ctx, t.relid, spec),
        Subcommand::SetRowSecurity(enabled) => misc::exec_set_row_security(ctx, t.relid, *enabled),
        Subcommand::SetForceRowSecurity(forced) => {
            misc::exec_force_row_security(ctx, t.relid, *forced)
        }
        Subcommand::GenericOptions(options) => {
            misc::exec_generic_options(ctx, t.relid, options)
        }
        Subcommand::AttachPartition {
            partition: name,
            bound,
        } => partition::exec_attach_partition(ctx, queue, t, name, bound),
        Subcommand::DetachPartition { partition: name } => {
            partition::exec_detach_partition(ctx, t, name)
        }
        Subcommand::AttachIndexPartition { index } => {
            partition::exec_attach_index_partition(ctx, t.relid, index)
        }
        Subcommand::SetDistribution {
            strategy,
            column,
            nodes,
        } => misc::exec_set_distribution(ctx, t.relid, *strategy, column.as_deref(), nodes.as_deref()),
    }
}

fn exec_readd_comment(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    target: &CommentTarget,
    comment: &str,
) -> Result<Option<ObjectAddress>, AlterError> {
    let address = match target {
        CommentTarget::Constraint(name) => ctx
            .catalog
            .constraint_by_name(relid, name)
            .map(|c| ObjectAddress::constraint(c.oid)),
        CommentTarget::Index(name) => {
            let namespace = ctx.catalog.relation(relid)?.namespace.clone();
            ctx.catalog
                .lookup(&format!("{namespace}.{name}"))
                .map(ObjectAddress::relation)
        }
    };
    if let Some(address) = address {
        ctx.catalog.set_comment(address, Some(comment.to_string()));
    }
    Ok(address)
}

/// After a table's column types changed: drop the indexes and constraints
/// that depended on them and queue their re-creation from the saved
/// definitions.
fn post_alter_type_cleanup(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    entry: usize,
) -> Result<(), AlterError> {
    let e = queue.entry_mut(entry);
    let index_ids = std::mem::take(&mut e.changed_index_ids);
    let index_defs = std::mem::take(&mut e.changed_index_defs);
    let constraint_ids = std::mem::take(&mut e.changed_constraint_ids);
    let constraint_defs = std::mem::take(&mut e.changed_constraint_defs);
    if index_ids.is_empty() && constraint_ids.is_empty() {
        return Ok(());
    }
    let mut doomed = ObjectAddresses::new();

    for (oid, def) in constraint_ids.iter().zip(constraint_defs) {
        let con = ctx.catalog.constraint(*oid)?.clone();
        doomed.add(ObjectAddress::constraint(con.oid));
        // Inherited-only copies come back when the parent's definition recurses.
        if !con.is_local {
            continue;
        }
        ctx.lock_relation(con.relid, LockMode::AccessExclusive);
        let owner = queue.find_or_create(ctx.catalog, con.relid)?;
        let comment = ctx
            .catalog
            .comment(&ObjectAddress::constraint(con.oid))
            .map(str::to_string);
        let Subcommand::AddConstraint(spec) = def else {
            return Err(AlterError::internal("unexpected saved constraint definition"));
        };
        let previous = con.foreign_key.as_ref().map(|fk| crate::alter::command::PreviousConstraint {
            operators: fk.operators.clone(),
            validated: con.validated,
        });
        let target = queue.entry_mut(owner);
        target.queue(
            AlterPass::ReaddOldConstraint,
            QueuedCommand::new(Subcommand::ReAddConstraint { spec, previous }, true, false),
        );
        if let Some(comment) = comment {
            target.queue(
                AlterPass::ReaddOldConstraint,
                QueuedCommand::new(
                    Subcommand::ReAddComment {
                        target: CommentTarget::Constraint(con.name.to_string()),
                        comment,
                    },
                    false,
                    false,
                ),
            );
        }
    }

    for (oid, mut spec) in index_ids.iter().zip(index_defs) {
        let idx = ctx.catalog.index(*oid)?.clone();
        match idx.constraint {
            Some(con) => doomed.add(ObjectAddress::constraint(con)),
            None => doomed.add(ObjectAddress::relation(*oid)),
        }
        // Partition indexes come back when the parent's index is rebuilt.
        if idx.parent.is_some() {
            continue;
        }
        ctx.lock_relation(idx.relid, LockMode::AccessExclusive);
        let owner = queue.find_or_create(ctx.catalog, idx.relid)?;
        // Without a rewrite the old index contents stay valid.
        if queue.entry(owner).rewrite.is_empty()
            && let Ok(index_rel) = ctx.catalog.relation_mut(*oid)
        {
            spec.reuse_storage = index_rel.storage.take();
        }
        let comment = ctx
            .catalog
            .comment(&ObjectAddress::relation(*oid))
            .map(str::to_string);
        let name = spec.name.clone().unwrap_or_default();
        let target = queue.entry_mut(owner);
        target.queue(
            AlterPass::ReaddOldIndex,
            QueuedCommand::new(Subcommand::ReAddIndex(spec), false, false),
        );
        if let Some(comment) = comment {
            target.queue(
                AlterPass::ReaddOldIndex,
                QueuedCommand::new(
                    Subcommand::ReAddComment {
                        target: CommentTarget::Index(name),
                        comment,
                    },
                    false,
                    false,
                ),
            );
        }
    }

    let report = perform_deletion(ctx.catalog, &doomed, DropBehavior::Restrict)?;
    for storage in report.dropped_storage {
        ctx.session.schedule_unlink(storage, true);
    }
    debug!(
        relation = %ctx.catalog.relation_name(queue.entry(entry).relid),
        dropped = report.deleted.len(),
        "rebuilding dependent objects after type change"
    );
    ctx.command_counter_increment();
    Ok(())
}

pub(crate) fn create_toast_if_needed(ctx: &mut AlterContext<'_>, relid: Oid) -> Result<(), AlterError> {
    let rel = ctx.catalog.relation(relid)?;
    if !matches!(rel.kind, RelKind::Table | RelKind::MaterializedView)
        || rel.toast.is_some()
        || rel.storage.is_none()
        || rel.max_row_width() <= ctx.config.toast_threshold_bytes
    {
        return Ok(());
    }
    let (name, owner, tablespace, persistence) = (
        rel.name.to_string(),
        rel.owner.clone(),
        rel.tablespace.clone(),
        rel.persistence,
    );
    let oid = ctx.catalog.alloc_oid();
    let toast_name = format!("pg_toast_{relid}");
    let mut toast = RelationDef::new(oid, &toast_name, TOAST_NAMESPACE, RelKind::Toast, &owner);
    toast.tablespace = tablespace.clone();
    toast.persistence = persistence;
    let storage = ctx.storage.create(&tablespace, persistence);
    ctx.session.schedule_unlink(storage, false);
    toast.storage = Some(storage);
    ctx.catalog.insert_relation(toast);
    ctx.catalog.relation_mut(relid)?.toast = Some(oid);
    record_dependency(
        ctx.catalog,
        ObjectAddress::relation(oid),
        ObjectAddress::relation(relid),
        DependKind::Internal,
    );
    debug!(relation = %name, toast = %toast_name, "created toast table");
    ctx.report.toast_created.push(name);
    Ok(())
}
