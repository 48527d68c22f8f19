//! Phase 1: checks every subcommand against its target, sorts it into a
//! pass and performs the simple recursions.

use crate::alter::columns::prep_alter_column_type;
use crate::alter::command::{ObjectKind, Subcommand};
use crate::alter::work_queue::{AlterPass, QueuedCommand, RewriteReason, WorkQueue};
use crate::alter::{AlterContext, RecursionContext};
use crate::catalog::GLOBAL_TABLESPACE;
use crate::catalog::schema::{ConstraintKind, Persistence, RelKind, RelationDef};
use crate::catalog::types::Oid;
use crate::error::{AlterError, ObjectKindName};
use crate::lock::LockMode;
use crate::permission::check_alter_permission;
use tracing::debug;

pub const ATT_TABLE: u8 = 0x01;
pub const ATT_VIEW: u8 = 0x02;
pub const ATT_MATVIEW: u8 = 0x04;
pub const ATT_INDEX: u8 = 0x08;
pub const ATT_COMPOSITE_TYPE: u8 = 0x10;
pub const ATT_FOREIGN_TABLE: u8 = 0x20;
pub const ATT_PARTITIONED_INDEX: u8 = 0x40;

const TARGET_NAMES: [(u8, &str); 7] = [
    (ATT_TABLE, "table"),
    (ATT_VIEW, "view"),
    (ATT_MATVIEW, "materialized view"),
    (ATT_INDEX, "index"),
    (ATT_PARTITIONED_INDEX, "partitioned index"),
    (ATT_COMPOSITE_TYPE, "composite type"),
    (ATT_FOREIGN_TABLE, "foreign table"),
];

fn kind_bit(kind: RelKind) -> u8 {
    match kind {
        RelKind::Table | RelKind::PartitionedTable => ATT_TABLE,
        RelKind::View => ATT_VIEW,
        RelKind::MaterializedView => ATT_MATVIEW,
        RelKind::Index => ATT_INDEX,
        RelKind::PartitionedIndex => ATT_PARTITIONED_INDEX,
        RelKind::CompositeType => ATT_COMPOSITE_TYPE,
        RelKind::ForeignTable => ATT_FOREIGN_TABLE,
        RelKind::Toast => 0,
    }
}

/// "a table, view, or foreign table" for a target mask.
pub fn describe_targets(allowed: u8) -> String {
    let names: Vec<&str> = TARGET_NAMES
        .iter()
        .filter(|(bit, _)| allowed & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    let article = match names.first() {
        Some(first) if first.starts_with(['a', 'e', 'i', 'o', 'u']) => "an",
        _ => "a",
    };
    let list = match names.as_slice() {
        [] => String::new(),
        [one] => (*one).to_string(),
        [a, b] => format!("{a} or {b}"),
        [init @ .., last] => format!("{}, or {last}", init.join(", ")),
    };
    format!("{article} {list}")
}

/// Shape and permission check shared by every subcommand.
pub fn check_simple_permissions(
    ctx: &AlterContext<'_>,
    rel: &RelationDef,
    allowed: u8,
) -> Result<(), AlterError> {
    if kind_bit(rel.kind) & allowed == 0 {
        return Err(AlterError::WrongObjectType {
            relation: rel.name.to_string(),
            allowed: describe_targets(allowed),
            hint: Some(format!(
                "This operation is not supported for {}.",
                rel.kind.plural()
            )),
        });
    }
    check_alter_permission(ctx.catalog, ctx.caller, rel, ctx.config)
}

/// Queues `cmd` for each inheritor of `relid` as a recursing command.
fn simple_recursion(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    relid: Oid,
    cmd: &Subcommand,
    recurse: bool,
    lockmode: LockMode,
    object_kind: ObjectKind,
) -> Result<(), AlterError> {
    if !recurse {
        return Ok(());
    }
    let rel = ctx.catalog.relation(relid)?;
    if !rel.kind.is_table() && rel.kind != RelKind::ForeignTable {
        return Ok(());
    }
    for child in ctx.catalog.find_all_inheritors(relid).into_iter().skip(1) {
        ctx.lock_relation(child, lockmode);
        let name = ctx.catalog.relation_name(child);
        ctx.session
            .check_table_not_in_use(child, &name, object_kind.statement())?;
        prepare_cmd(ctx, queue, child, cmd, false, true, lockmode, object_kind)?;
    }
    Ok(())
}

fn queued_column(cmd: &Subcommand) -> &str {
    match cmd {
        Subcommand::AlterColumnType { column, .. } => column,
        _ => "",
    }
}

/// Recursion for ALTER COLUMN TYPE. A child column may only change when
/// every parent it inherits the column from is part of the altered tree.
fn alter_type_recursion(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    relid: Oid,
    cmd: &Subcommand,
    recurse: bool,
    lockmode: LockMode,
    object_kind: ObjectKind,
) -> Result<(), AlterError> {
    if !recurse {
        return Ok(());
    }
    let rel = ctx.catalog.relation(relid)?;
    if !rel.kind.is_table() && rel.kind != RelKind::ForeignTable {
        return Ok(());
    }
    let column = queued_column(cmd);
    for (child, numparents) in ctx.catalog.inheritors_with_parent_counts(relid).into_iter().skip(1) {
        ctx.lock_relation(child, lockmode);
        let child_rel = ctx.catalog.relation(child)?;
        if let Some(att) = child_rel.attribute_by_name(column)
            && att.inhcount > numparents
        {
            return Err(AlterError::table_def(format!(
                "cannot alter inherited column \"{column}\" of relation \"{}\"",
                child_rel.name
            )));
        }
        let name = child_rel.name.to_string();
        ctx.session
            .check_table_not_in_use(child, &name, object_kind.statement())?;
        prepare_cmd(ctx, queue, child, cmd, false, true, lockmode, object_kind)?;
    }
    Ok(())
}

fn prep_change_persistence(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    entry: usize,
    rel: &RelationDef,
    to_logged: bool,
) -> Result<(), AlterError> {
    if rel.persistence == Persistence::Temporary {
        return Err(AlterError::table_def(format!(
            "cannot change logged status of table \"{}\" because it is temporary",
            rel.name
        )));
    }
    let target = if to_logged {
        Persistence::Permanent
    } else {
        Persistence::Unlogged
    };
    if queue.entry(entry).chg_persistence {
        return Err(AlterError::InvalidParameterValue {
            message: "cannot change persistence setting twice".into(),
        });
    }
    if rel.persistence == target {
        return Ok(());
    }
    // Logged tables may not reference unlogged ones, and the reverse.
    for con in ctx.catalog.constraints.values() {
        let Some(fk) = &con.foreign_key else {
            continue;
        };
        if con.kind != ConstraintKind::ForeignKey || fk.referenced_rel == con.relid {
            continue;
        }
        if to_logged && con.relid == rel.oid {
            let other = ctx.catalog.relation(fk.referenced_rel)?;
            if other.persistence != Persistence::Permanent {
                return Err(AlterError::table_def(format!(
                    "could not change table \"{}\" to logged because it references unlogged table \"{}\"",
                    rel.name, other.name
                )));
            }
        }
        if !to_logged && fk.referenced_rel == rel.oid {
            let other = ctx.catalog.relation(con.relid)?;
            if other.persistence == Persistence::Permanent {
                return Err(AlterError::table_def(format!(
                    "could not change table \"{}\" to unlogged because it references logged table \"{}\"",
                    rel.name, other.name
                )));
            }
        }
    }
    let e = queue.entry_mut(entry);
    e.chg_persistence = true;
    e.new_persistence = Some(target);
    if rel.kind.has_storage() {
        e.rewrite.insert(RewriteReason::PERSISTENCE);
    }
    Ok(())
}

fn prep_set_tablespace(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    entry: usize,
    rel: &RelationDef,
    tablespace: &str,
) -> Result<(), AlterError> {
    if !ctx.catalog.tablespaces.contains(tablespace) {
        return Err(AlterError::UndefinedObject {
            kind: ObjectKindName::Tablespace,
            name: tablespace.to_string(),
        });
    }
    if tablespace == GLOBAL_TABLESPACE {
        return Err(AlterError::InvalidParameterValue {
            message: "only shared relations can be placed in pg_global tablespace".into(),
        });
    }
    let e = queue.entry_mut(entry);
    if e.new_tablespace.is_some() {
        return Err(AlterError::InvalidParameterValue {
            message: "cannot have multiple SET TABLESPACE subcommands".into(),
        });
    }
    if rel.tablespace != tablespace {
        e.new_tablespace = Some(tablespace.into());
    }
    Ok(())
}

/// Phase 1 for one subcommand on one relation.
#[allow(clippy::too_many_arguments)]
pub fn prepare_cmd(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    relid: Oid,
    cmd: &Subcommand,
    recurse: bool,
    recursing: bool,
    lockmode: LockMode,
    object_kind: ObjectKind,
) -> Result<(), AlterError> {
    let rel = ctx.catalog.relation(relid)?.clone();
    let entry = queue.find_or_create(ctx.catalog, relid)?;
    let has_children = ctx.catalog.has_subclass(relid);

    let pass = match cmd {
        Subcommand::AddColumn { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_COMPOSITE_TYPE | ATT_FOREIGN_TABLE)?;
            if rel.of_type.is_some() && !recursing {
                return Err(AlterError::wrong_kind("cannot add column to typed table"));
            }
            if rel.is_partition && !recursing {
                return Err(AlterError::wrong_kind("cannot add column to a partition"));
            }
            AlterPass::AddColumn
        }
        Subcommand::ColumnDefault { default, .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_VIEW | ATT_FOREIGN_TABLE)?;
            simple_recursion(ctx, queue, relid, cmd, recurse, lockmode, object_kind)?;
            if default.is_some() {
                AlterPass::AddConstraint
            } else {
                AlterPass::Drop
            }
        }
        Subcommand::DropNotNull { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_FOREIGN_TABLE)?;
            if rel.is_partitioned() && !recurse && has_children {
                return Err(AlterError::OnlyNotAllowed {
                    message: "cannot remove constraint from only the partitioned table when partitions exist".into(),
                });
            }
            simple_recursion(ctx, queue, relid, cmd, recurse, lockmode, object_kind)?;
            AlterPass::Drop
        }
        Subcommand::SetNotNull { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_FOREIGN_TABLE)?;
            if rel.is_partitioned() && !recurse && has_children {
                return Err(AlterError::OnlyNotAllowed {
                    message: "cannot add constraint to only the partitioned table when partitions exist".into(),
                });
            }
            simple_recursion(ctx, queue, relid, cmd, recurse, lockmode, object_kind)?;
            AlterPass::AddConstraint
        }
        Subcommand::SetStatistics { .. } => {
            check_simple_permissions(
                ctx,
                &rel,
                ATT_TABLE | ATT_MATVIEW | ATT_INDEX | ATT_FOREIGN_TABLE,
            )?;
            simple_recursion(ctx, queue, relid, cmd, recurse, lockmode, object_kind)?;
            AlterPass::Misc
        }
        Subcommand::SetAttributeOptions { .. } => {
            check_simple_permissions(
                ctx,
                &rel,
                ATT_TABLE | ATT_MATVIEW | ATT_INDEX | ATT_FOREIGN_TABLE,
            )?;
            AlterPass::Misc
        }
        Subcommand::SetStorage { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_MATVIEW | ATT_FOREIGN_TABLE)?;
            simple_recursion(ctx, queue, relid, cmd, recurse, lockmode, object_kind)?;
            AlterPass::Misc
        }
        Subcommand::DropColumn { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_COMPOSITE_TYPE | ATT_FOREIGN_TABLE)?;
            if rel.of_type.is_some() && !recursing {
                return Err(AlterError::wrong_kind("cannot drop column from typed table"));
            }
            AlterPass::Drop
        }
        Subcommand::AddIndex(_) => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_MATVIEW)?;
            AlterPass::AddIndex
        }
        Subcommand::ReAddIndex(_) => AlterPass::ReaddOldIndex,
        Subcommand::AddConstraint(_) => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_FOREIGN_TABLE)?;
            AlterPass::AddConstraint
        }
        Subcommand::ReAddConstraint { .. } => AlterPass::ReaddOldConstraint,
        Subcommand::AlterConstraint { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE)?;
            AlterPass::Misc
        }
        Subcommand::ValidateConstraint { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_FOREIGN_TABLE)?;
            AlterPass::Misc
        }
        Subcommand::DropConstraint { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_FOREIGN_TABLE)?;
            AlterPass::Drop
        }
        Subcommand::ReAddComment { .. } => AlterPass::ReaddOldConstraint,
        Subcommand::AlterColumnType { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_COMPOSITE_TYPE | ATT_FOREIGN_TABLE)?;
            // Children were checked against their parents inside the tree by
            // alter_type_recursion before being prepared.
            let rctx = if recursing {
                let column = queued_column(cmd);
                let inhcount = rel.attribute_by_name(column).map_or(0, |a| a.inhcount);
                RecursionContext::child(inhcount)
            } else {
                RecursionContext::top()
            };
            prep_alter_column_type(ctx, queue, entry, cmd, recurse, rctx)?;
            alter_type_recursion(ctx, queue, relid, cmd, recurse, lockmode, object_kind)?;
            AlterPass::AlterType
        }
        Subcommand::ChangeOwner { .. } => AlterPass::Misc,
        Subcommand::ClusterOn { .. } | Subcommand::DropCluster => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_MATVIEW)?;
            AlterPass::Misc
        }
        Subcommand::SetLogged | Subcommand::SetUnlogged => {
            check_simple_permissions(ctx, &rel, ATT_TABLE)?;
            let to_logged = matches!(cmd, Subcommand::SetLogged);
            prep_change_persistence(ctx, queue, entry, &rel, to_logged)?;
            AlterPass::Misc
        }
        Subcommand::SetWithOids => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_FOREIGN_TABLE)?;
            if !rel.has_oids && rel.kind.has_storage() {
                queue.entry_mut(entry).rewrite.insert(RewriteReason::OIDS);
            }
            simple_recursion(ctx, queue, relid, cmd, recurse, lockmode, object_kind)?;
            AlterPass::AddColumn
        }
        Subcommand::SetWithoutOids => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_FOREIGN_TABLE)?;
            if rel.has_oids && rel.kind.has_storage() {
                queue.entry_mut(entry).rewrite.insert(RewriteReason::OIDS);
            }
            simple_recursion(ctx, queue, relid, cmd, recurse, lockmode, object_kind)?;
            AlterPass::Drop
        }
        Subcommand::SetTablespace { tablespace } => {
            check_simple_permissions(
                ctx,
                &rel,
                ATT_TABLE | ATT_MATVIEW | ATT_INDEX | ATT_PARTITIONED_INDEX,
            )?;
            prep_set_tablespace(ctx, queue, entry, &rel, tablespace)?;
            AlterPass::Misc
        }
        Subcommand::SetRelOptions { .. } | Subcommand::ResetRelOptions { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_VIEW | ATT_MATVIEW | ATT_INDEX)?;
            AlterPass::Misc
        }
        Subcommand::SetTrigger { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_FOREIGN_TABLE)?;
            AlterPass::Misc
        }
        Subcommand::SetRule { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_VIEW)?;
            AlterPass::Misc
        }
        Subcommand::AddInherit { .. } | Subcommand::DropInherit { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_FOREIGN_TABLE)?;
            AlterPass::Misc
        }
        Subcommand::DropOf => {
            check_simple_permissions(ctx, &rel, ATT_TABLE)?;
            AlterPass::Misc
        }
        Subcommand::ReplicaIdentity(_) => {
            check_simple_permissions(ctx, &rel, ATT_TABLE | ATT_MATVIEW)?;
            AlterPass::Misc
        }
        Subcommand::SetRowSecurity(_) | Subcommand::SetForceRowSecurity(_) => {
            check_simple_permissions(ctx, &rel, ATT_TABLE)?;
            AlterPass::Misc
        }
        Subcommand::GenericOptions(_) => {
            check_simple_permissions(ctx, &rel, ATT_FOREIGN_TABLE)?;
            AlterPass::Misc
        }
        Subcommand::AttachPartition { .. } | Subcommand::DetachPartition { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE)?;
            if !rel.is_partitioned() {
                return Err(AlterError::wrong_kind(format!(
                    "table \"{}\" is not partitioned",
                    rel.name
                )));
            }
            AlterPass::Partition
        }
        Subcommand::AttachIndexPartition { .. } => {
            check_simple_permissions(ctx, &rel, ATT_PARTITIONED_INDEX)?;
            AlterPass::Partition
        }
        Subcommand::SetDistribution { .. } => {
            check_simple_permissions(ctx, &rel, ATT_TABLE)?;
            if !ctx.config.distribution_enabled {
                return Err(AlterError::unsupported(
                    "DISTRIBUTE BY requires a distributed configuration",
                ));
            }
            AlterPass::Distribution
        }
    };

    debug!(
        relation = %rel.name,
        command = cmd.tag(),
        pass = pass.name(),
        recursing,
        "prepared subcommand"
    );
    queue
        .entry_mut(entry)
        .queue(pass, QueuedCommand::new(cmd.clone(), recurse, recursing));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_descriptions_read_naturally() {
        assert_eq!(describe_targets(ATT_TABLE), "a table");
        assert_eq!(describe_targets(ATT_INDEX), "an index");
        assert_eq!(describe_targets(ATT_TABLE | ATT_MATVIEW), "a table or materialized view");
        assert_eq!(
            describe_targets(ATT_TABLE | ATT_VIEW | ATT_FOREIGN_TABLE),
            "a table, view, or foreign table"
        );
    }
}
