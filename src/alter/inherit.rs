//! INHERIT, NO INHERIT and NOT OF on existing tables.

use crate::alter::AlterContext;
use crate::catalog::depend::{DependKind, ObjectAddress, record_dependency};
use crate::catalog::schema::{Persistence, RelKind};
use crate::catalog::types::Oid;
use crate::error::AlterError;
use crate::lock::LockMode;
use crate::merge::{
    merge_attributes_into_existing, merge_constraints_into_existing,
    merge_distribution_into_existing, remove_inheritance_counts,
};
use crate::permission::check_owner;
use tracing::debug;

fn drop_edge_dependency(ctx: &mut AlterContext<'_>, child: Oid, parent: Oid) {
    let dependent = ObjectAddress::relation(child);
    let referenced = ObjectAddress::relation(parent);
    ctx.catalog
        .depends
        .retain(|e| !(e.dependent == dependent && e.referenced == referenced));
}

pub fn exec_add_inherit(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    parent: &str,
) -> Result<Option<ObjectAddress>, AlterError> {
    let parent_oid = ctx.catalog.lookup_required(parent)?;
    ctx.lock_relation(parent_oid, LockMode::ShareUpdateExclusive);
    let child = ctx.catalog.relation(relid)?.clone();
    let parent_rel = ctx.catalog.relation(parent_oid)?.clone();
    check_owner(ctx.catalog, ctx.caller, &parent_rel)?;

    if parent_rel.is_partitioned() {
        return Err(AlterError::wrong_kind(format!(
            "cannot inherit from partitioned table \"{}\"",
            parent_rel.name
        )));
    }
    if child.is_partition {
        return Err(AlterError::wrong_kind("cannot change inheritance of a partition"));
    }
    if child.is_partitioned() {
        return Err(AlterError::wrong_kind(format!(
            "cannot change inheritance of partitioned table \"{}\"",
            child.name
        )));
    }
    if !matches!(parent_rel.kind, RelKind::Table | RelKind::ForeignTable) {
        return Err(AlterError::wrong_kind(format!(
            "inherited relation \"{}\" is not a table or foreign table",
            parent_rel.name
        )));
    }
    if child.of_type.is_some() {
        return Err(AlterError::wrong_kind("cannot change inheritance of typed table"));
    }
    if parent_rel.persistence == Persistence::Temporary
        && child.persistence != Persistence::Temporary
    {
        return Err(AlterError::wrong_kind(format!(
            "cannot inherit from temporary relation \"{}\"",
            parent_rel.name
        )));
    }
    if ctx.catalog.parents(relid).contains(&parent_oid) {
        return Err(AlterError::DuplicateObject {
            message: format!(
                "relation \"{}\" would be inherited from more than once",
                parent_rel.name
            ),
        });
    }
    // The parent must not already descend from the child.
    if ctx.catalog.find_all_inheritors(relid).contains(&parent_oid) {
        return Err(AlterError::CircularInheritance {
            relation: child.name.to_string(),
            parent: parent_rel.name.to_string(),
        });
    }
    if let Some(trigger) = ctx
        .catalog
        .triggers_of(relid)
        .into_iter()
        .find(|t| t.has_transition_tables && t.row_level)
    {
        return Err(AlterError::unsupported(format!(
            "trigger \"{}\" prevents table \"{}\" from becoming an inheritance child",
            trigger.name, child.name
        )));
    }

    merge_attributes_into_existing(ctx.catalog, ctx.config, relid, parent_oid)?;
    merge_constraints_into_existing(ctx.catalog, relid, parent_oid)?;
    merge_distribution_into_existing(ctx.config, &child, &parent_rel)?;

    let seqno = ctx.catalog.add_inherit_edge(relid, parent_oid);
    record_dependency(
        ctx.catalog,
        ObjectAddress::relation(relid),
        ObjectAddress::relation(parent_oid),
        DependKind::Normal,
    );
    ctx.invalidate(parent_oid);
    debug!(child = %child.name, parent = %parent_rel.name, seqno, "added inheritance");
    Ok(Some(ObjectAddress::relation(parent_oid)))
}

pub fn exec_drop_inherit(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    parent: &str,
) -> Result<Option<ObjectAddress>, AlterError> {
    let parent_oid = ctx.catalog.lookup_required(parent)?;
    ctx.lock_relation(parent_oid, LockMode::ShareUpdateExclusive);
    let child = ctx.catalog.relation(relid)?.clone();
    if child.is_partition {
        return Err(AlterError::wrong_kind("cannot change inheritance of a partition"));
    }
    if child.is_partitioned() {
        return Err(AlterError::wrong_kind(
            "cannot change inheritance of partitioned table",
        ));
    }
    if !ctx.catalog.remove_inherit_edge(relid, parent_oid) {
        return Err(AlterError::RelationNotRelated {
            message: format!(
                "relation \"{parent}\" is not a parent of relation \"{}\"",
                child.name
            ),
        });
    }
    remove_inheritance_counts(ctx.catalog, relid, parent_oid)?;
    drop_edge_dependency(ctx, relid, parent_oid);
    ctx.invalidate(parent_oid);
    debug!(child = %child.name, parent, "removed inheritance");
    Ok(Some(ObjectAddress::relation(parent_oid)))
}

pub fn exec_drop_of(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(relid)?;
    let Some(type_oid) = rel.of_type else {
        return Err(AlterError::wrong_kind(format!(
            "\"{}\" is not a typed table",
            rel.name
        )));
    };
    drop_edge_dependency(ctx, relid, type_oid);
    ctx.catalog.relation_mut(relid)?.of_type = None;
    Ok(Some(ObjectAddress::relation(relid)))
}

