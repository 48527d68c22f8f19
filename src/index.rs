//! Index definition, builds, key maintenance and partitioned-index
//! attachment.

use crate::alter::AlterContext;
use crate::alter::command::IndexSpec;
use crate::catalog::Catalog;
use crate::catalog::depend::{
    DependKind, ObjectAddress, record_dependencies_on_columns, record_dependency,
};
use crate::catalog::schema::{
    AttributeDef, ConstraintDef, ConstraintKind, IndexDef, RelKind, RelationDef,
};
use crate::catalog::types::{AttrNumber, Oid, Value};
use crate::error::AlterError;
use crate::expr::eval::compile;
use crate::expr::{Analyzer, BoundExpr};
use crate::session::Session;
use crate::storage::{StorageManager, Tuple};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBuildResult {
    pub oid: Oid,
    /// A primary key made a nullable column NOT NULL; existing rows must be
    /// checked.
    pub needs_not_null_check: bool,
}

/// Spec that recreates `idx` under its current name.
pub fn index_spec_from_def(catalog: &Catalog, idx: &IndexDef) -> Result<IndexSpec, AlterError> {
    let table = catalog.relation(idx.relid)?;
    let index_rel = catalog.relation(idx.oid)?;
    let columns = idx
        .attnums
        .iter()
        .map(|a| {
            table
                .attribute(*a)
                .map(|att| att.name.to_string())
                .ok_or_else(|| AlterError::internal(format!("index column {a} missing")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let predicate = idx.predicate.as_ref().map(|p| p.deparse(table)).transpose()?;
    let constraint = idx.constraint.map(|c| catalog.constraint(c)).transpose()?;
    Ok(IndexSpec {
        name: Some(index_rel.name.to_string()),
        columns,
        method: idx.method,
        unique: idx.unique,
        primary: idx.primary,
        predicate,
        is_constraint: constraint.is_some(),
        constraint_name: constraint.map(|c| c.name.to_string()),
        deferrable: constraint.is_some_and(|c| c.deferrable),
        reuse_storage: None,
    })
}

fn choose_index_name(catalog: &Catalog, table: &RelationDef, spec: &IndexSpec) -> String {
    let suffix = if spec.primary {
        "pkey"
    } else if spec.is_constraint || spec.unique {
        "key"
    } else {
        "idx"
    };
    let base = if spec.primary {
        format!("{}_{suffix}", table.name)
    } else {
        format!("{}_{}_{suffix}", table.name, spec.columns.join("_"))
    };
    catalog.choose_relation_name(&table.namespace, &base)
}

/// Creates an index (and its constraint, for UNIQUE or PRIMARY KEY) on
/// `relid`. On a partitioned table the index is cascaded to every partition,
/// attaching matching existing indexes where possible.
pub fn define_index(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    spec: &IndexSpec,
    skip_build: bool,
    parent_index: Option<Oid>,
) -> Result<IndexBuildResult, AlterError> {
    let table = ctx.catalog.relation(relid)?.clone();
    if !matches!(
        table.kind,
        RelKind::Table | RelKind::PartitionedTable | RelKind::MaterializedView
    ) {
        return Err(AlterError::WrongObjectType {
            relation: table.name.to_string(),
            allowed: "a table or materialized view".into(),
            hint: Some(format!(
                "This operation is not supported for {}.",
                table.kind.plural()
            )),
        });
    }

    let mut attnums: Vec<AttrNumber> = Vec::with_capacity(spec.columns.len());
    for column in &spec.columns {
        let att = table
            .attribute_by_name(column)
            .ok_or_else(|| AlterError::UndefinedColumn {
                relation: table.name.to_string(),
                column: column.clone(),
            })?;
        attnums.push(att.attnum);
    }

    if spec.primary
        && ctx
            .catalog
            .indexes_of(relid)
            .iter()
            .any(|i| i.primary)
    {
        return Err(AlterError::table_def(format!(
            "multiple primary keys for table \"{}\" are not allowed",
            table.name
        )));
    }
    if (spec.unique || spec.primary)
        && let Some(key) = &table.partition_key
        && !key.attnums.iter().all(|k| attnums.contains(k))
    {
        return Err(AlterError::table_def(
            "unique constraint on partitioned table must include all partitioning columns",
        ));
    }

    let predicate = match &spec.predicate {
        Some(raw) => Some(Analyzer::new(&table, &*ctx.catalog).analyze_predicate(raw, "WHERE")?),
        None => None,
    };

    let name = match (&spec.name, &spec.constraint_name) {
        (Some(n), _) => n.clone(),
        (None, Some(n)) if spec.is_constraint => n.clone(),
        _ => choose_index_name(ctx.catalog, &table, spec),
    };
    if ctx.catalog.name_taken(&table.namespace, &name) {
        return Err(AlterError::DuplicateObject {
            message: format!("relation \"{name}\" already exists"),
        });
    }
    let constraint_name = spec.constraint_name.clone().unwrap_or_else(|| name.clone());
    if spec.is_constraint && ctx.catalog.constraint_by_name(relid, &constraint_name).is_some() {
        return Err(AlterError::DuplicateObject {
            message: format!(
                "constraint \"{constraint_name}\" for relation \"{}\" already exists",
                table.name
            ),
        });
    }

    let mut needs_not_null_check = false;
    if spec.primary {
        let rel = ctx.catalog.relation_mut(relid)?;
        for attnum in &attnums {
            if let Some(att) = rel.attribute_mut(*attnum)
                && !att.not_null
            {
                att.not_null = true;
                needs_not_null_check = true;
            }
        }
    }

    let oid = ctx.catalog.alloc_oid();
    let partitioned = table.is_partitioned();
    let kind = if partitioned {
        RelKind::PartitionedIndex
    } else {
        RelKind::Index
    };
    let mut index_rel = RelationDef::new(oid, &name, &table.namespace, kind, &table.owner);
    index_rel.tablespace = table.tablespace.clone();
    index_rel.persistence = table.persistence;
    for (i, attnum) in attnums.iter().enumerate() {
        if let Some(att) = table.attribute(*attnum) {
            index_rel.attributes.push(AttributeDef::new(
                (i + 1) as AttrNumber,
                &att.name,
                att.type_name.clone(),
            ));
        }
    }
    let reused = spec.reuse_storage.filter(|s| ctx.storage.exists(*s));
    if !partitioned && (reused.is_some() || skip_build) {
        let storage = match reused {
            Some(s) => s,
            None => {
                let s = ctx.storage.create(&table.tablespace, table.persistence);
                ctx.session.schedule_unlink(s, false);
                s
            }
        };
        index_rel.storage = Some(storage);
    }
    ctx.catalog.insert_relation(index_rel);

    let constraint = if spec.is_constraint {
        let con_oid = ctx.catalog.alloc_oid();
        ctx.catalog.constraints.insert(
            con_oid,
            ConstraintDef {
                oid: con_oid,
                relid,
                name: constraint_name.as_str().into(),
                kind: if spec.primary {
                    ConstraintKind::PrimaryKey
                } else {
                    ConstraintKind::Unique
                },
                expr: None,
                index: Some(oid),
                foreign_key: None,
                attnums: attnums.clone(),
                deferrable: spec.deferrable,
                deferred: false,
                validated: true,
                inhcount: i32::from(parent_index.is_some()),
                is_local: parent_index.is_none(),
                no_inherit: false,
            },
        );
        record_dependencies_on_columns(
            ctx.catalog,
            ObjectAddress::constraint(con_oid),
            relid,
            attnums.iter().copied(),
            DependKind::Auto,
        );
        record_dependency(
            ctx.catalog,
            ObjectAddress::relation(oid),
            ObjectAddress::constraint(con_oid),
            DependKind::Internal,
        );
        Some(con_oid)
    } else {
        record_dependencies_on_columns(
            ctx.catalog,
            ObjectAddress::relation(oid),
            relid,
            attnums.iter().copied(),
            DependKind::Auto,
        );
        None
    };
    if let Some(pred) = &predicate {
        record_dependencies_on_columns(
            ctx.catalog,
            ObjectAddress::relation(oid),
            relid,
            pred.attnums(),
            DependKind::Auto,
        );
    }

    ctx.catalog.indexes.insert(
        oid,
        IndexDef {
            oid,
            relid,
            method: spec.method,
            attnums,
            unique: spec.unique || spec.primary,
            primary: spec.primary,
            predicate,
            valid: !partitioned,
            parent: parent_index,
            constraint,
        },
    );
    debug!(index = %name, table = %table.name, partitioned, "index defined");

    if partitioned {
        for partition in ctx.catalog.children(relid) {
            attach_or_create_partition_index(ctx, oid, partition)?;
        }
        validate_partition_index(ctx.catalog, oid)?;
    } else if !skip_build && reused.is_none() {
        build_index(ctx.catalog, ctx.storage, ctx.session, oid)?;
    } else if reused.is_some() {
        debug!(index = %name, "reusing index storage");
    }
    Ok(IndexBuildResult {
        oid,
        needs_not_null_check,
    })
}

fn index_key(idx: &IndexDef, row: &[Value]) -> Vec<Value> {
    idx.attnums
        .iter()
        .map(|a| row.get((*a - 1) as usize).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Fills fresh storage for the index from the heap and swaps it in. The
/// previous storage goes away at commit, the new one at abort.
pub fn build_index(
    catalog: &mut Catalog,
    storage: &mut StorageManager,
    session: &mut Session,
    index_oid: Oid,
) -> Result<(), AlterError> {
    let idx = catalog.index(index_oid)?.clone();
    let table = catalog.relation(idx.relid)?.clone();
    let index_rel = catalog.relation(index_oid)?.clone();
    let Some(heap) = table.storage else {
        return Ok(());
    };
    let predicate = idx.predicate.as_ref().map(compile).transpose()?;
    let mut keys: Vec<Vec<Value>> = Vec::new();
    for tuple in storage.tuples(heap)? {
        let row = table.deform(&tuple.values);
        if let Some(pred) = &predicate
            && !pred.qual(&row)?
        {
            continue;
        }
        keys.push(index_key(&idx, &row));
    }
    if idx.unique {
        let mut seen = HashSet::new();
        for key in &keys {
            if key.iter().any(Value::is_null) {
                continue;
            }
            if !seen.insert(key.clone()) {
                return Err(AlterError::UniqueViolation {
                    index: index_rel.name.to_string(),
                });
            }
        }
    }
    keys.sort();
    let fresh = storage.create(&index_rel.tablespace, index_rel.persistence);
    session.schedule_unlink(fresh, false);
    storage.append_all(fresh, keys.into_iter().map(Tuple::new))?;
    catalog.relation_mut(index_oid)?.storage = Some(fresh);
    if let Some(old) = index_rel.storage {
        session.schedule_unlink(old, true);
    }
    debug!(index = %index_rel.name, "index built");
    Ok(())
}

/// Adds the key of a new heap row to every index on `relid`, enforcing
/// uniqueness.
pub fn insert_index_entries(
    catalog: &Catalog,
    storage: &mut StorageManager,
    relid: Oid,
    row: &[Value],
) -> Result<(), AlterError> {
    for idx in catalog.indexes_of(relid) {
        let index_rel = catalog.relation(idx.oid)?;
        let Some(target) = index_rel.storage else {
            continue;
        };
        if let Some(pred) = &idx.predicate
            && !compile(pred)?.qual(row)?
        {
            continue;
        }
        let key = index_key(idx, row);
        if idx.unique && !key.iter().any(Value::is_null) {
            let exists = storage.tuples(target)?.iter().any(|t| t.values == key);
            if exists {
                return Err(AlterError::DuplicateKey {
                    index: index_rel.name.to_string(),
                });
            }
        }
        storage.append(target, Tuple::new(key))?;
    }
    Ok(())
}

fn same_structure(
    catalog: &Catalog,
    parent_idx: &IndexDef,
    child_idx: &IndexDef,
) -> Result<bool, AlterError> {
    if parent_idx.method != child_idx.method
        || parent_idx.unique != child_idx.unique
        || parent_idx.attnums.len() != child_idx.attnums.len()
        || parent_idx.constraint.is_some() != child_idx.constraint.is_some()
    {
        return Ok(false);
    }
    let parent_table = catalog.relation(parent_idx.relid)?;
    let child_table = catalog.relation(child_idx.relid)?;
    for (p, c) in parent_idx.attnums.iter().zip(&child_idx.attnums) {
        let pname = parent_table.attribute(*p).map(|a| &a.name);
        let cname = child_table.attribute(*c).map(|a| &a.name);
        if pname.is_none() || pname != cname {
            return Ok(false);
        }
    }
    let same_predicate = match (&parent_idx.predicate, &child_idx.predicate) {
        (None, None) => true,
        (Some(p), Some(c)) => p.canonical(parent_table) == c.canonical(child_table),
        _ => false,
    };
    Ok(same_predicate)
}

/// Gives partition `partition` an index attached to `parent_index`,
/// reusing a structurally identical unattached index when one exists.
pub fn attach_or_create_partition_index(
    ctx: &mut AlterContext<'_>,
    parent_index: Oid,
    partition: Oid,
) -> Result<Oid, AlterError> {
    let pidx = ctx.catalog.index(parent_index)?.clone();
    let candidates: Vec<IndexDef> = ctx
        .catalog
        .indexes_of(partition)
        .into_iter()
        .filter(|i| i.parent.is_none())
        .cloned()
        .collect();
    for cidx in candidates {
        if same_structure(ctx.catalog, &pidx, &cidx)? {
            set_index_parent(ctx.catalog, cidx.oid, parent_index)?;
            debug!(index = cidx.oid, parent = parent_index, "attached existing partition index");
            return Ok(cidx.oid);
        }
    }
    let mut spec = index_spec_from_def(ctx.catalog, &pidx)?;
    spec.name = None;
    let created = define_index(ctx, partition, &spec, false, Some(parent_index))?;
    Ok(created.oid)
}

fn set_index_parent(catalog: &mut Catalog, child: Oid, parent: Oid) -> Result<(), AlterError> {
    let parent_con = catalog.index(parent)?.constraint;
    let idx = catalog
        .indexes
        .get_mut(&child)
        .ok_or_else(|| AlterError::internal(format!("cache lookup failed for index {child}")))?;
    idx.parent = Some(parent);
    let child_con = idx.constraint;
    if let (Some(_), Some(con)) = (parent_con, child_con) {
        let con = catalog.constraint_mut(con)?;
        con.inhcount += 1;
        con.is_local = false;
    }
    Ok(())
}

/// Marks a partitioned index valid once every partition has a valid
/// attached index, and propagates upward.
pub fn validate_partition_index(catalog: &mut Catalog, index_oid: Oid) -> Result<(), AlterError> {
    let idx = catalog.index(index_oid)?.clone();
    if idx.valid {
        return Ok(());
    }
    let partitions = catalog.children(idx.relid);
    let attached = partitions
        .iter()
        .filter(|p| {
            catalog
                .indexes_of(**p)
                .iter()
                .any(|i| i.parent == Some(index_oid) && i.valid)
        })
        .count();
    if attached < partitions.len() {
        return Ok(());
    }
    if let Some(entry) = catalog.indexes.get_mut(&index_oid) {
        entry.valid = true;
    }
    debug!(index = index_oid, "partitioned index is now valid");
    if let Some(parent) = idx.parent {
        validate_partition_index(catalog, parent)?;
    }
    Ok(())
}

/// ALTER INDEX parent ATTACH PARTITION child.
pub fn attach_partition_index(
    ctx: &mut AlterContext<'_>,
    parent_index: Oid,
    child_index_name: &str,
) -> Result<Oid, AlterError> {
    let parent_rel = ctx.catalog.relation(parent_index)?.clone();
    let child_oid = ctx.catalog.lookup_required(child_index_name)?;
    let child_rel = ctx.catalog.relation(child_oid)?.clone();
    if !child_rel.kind.is_index() {
        return Err(AlterError::wrong_kind(format!(
            "\"{}\" is not an index",
            child_rel.name
        )));
    }
    let pidx = ctx.catalog.index(parent_index)?.clone();
    let cidx = ctx.catalog.index(child_oid)?.clone();
    if ctx.catalog.partition_parent(cidx.relid) != Some(pidx.relid) {
        return Err(AlterError::object_def(format!(
            "index \"{}\" is not an index on any partition of table \"{}\"",
            child_rel.name,
            ctx.catalog.relation_name(pidx.relid)
        )));
    }
    if cidx.parent == Some(parent_index) {
        return Ok(child_oid);
    }
    if cidx.parent.is_some() {
        return Err(AlterError::object_def(format!(
            "index \"{}\" is already attached to another index",
            child_rel.name
        )));
    }
    let already = ctx
        .catalog
        .indexes_of(cidx.relid)
        .iter()
        .any(|i| i.parent == Some(parent_index));
    if already {
        return Err(AlterError::object_def(format!(
            "another index is already attached for partition \"{}\"",
            ctx.catalog.relation_name(cidx.relid)
        )));
    }
    if !same_structure(ctx.catalog, &pidx, &cidx)? {
        return Err(AlterError::object_def(format!(
            "cannot attach index \"{}\" as a partition of index \"{}\": index definitions do not match",
            child_rel.name, parent_rel.name
        )));
    }
    set_index_parent(ctx.catalog, child_oid, parent_index)?;
    validate_partition_index(ctx.catalog, parent_index)?;
    Ok(child_oid)
}

/// Detaches every index of `partition` from its partitioned parent index.
pub fn detach_partition_indexes(catalog: &mut Catalog, partition: Oid) -> Result<(), AlterError> {
    let attached: Vec<(Oid, Option<Oid>)> = catalog
        .indexes_of(partition)
        .into_iter()
        .filter(|i| i.parent.is_some())
        .map(|i| (i.oid, i.constraint))
        .collect();
    for (oid, constraint) in attached {
        if let Some(idx) = catalog.indexes.get_mut(&oid) {
            idx.parent = None;
        }
        if let Some(con) = constraint {
            let con = catalog.constraint_mut(con)?;
            con.inhcount = (con.inhcount - 1).max(0);
            con.is_local = true;
        }
    }
    Ok(())
}

/// Whether a unique, non-partial, valid index covers exactly `attnums`.
pub fn find_unique_index(catalog: &Catalog, relid: Oid, attnums: &[AttrNumber]) -> Option<Oid> {
    let wanted: HashSet<_> = attnums.iter().collect();
    catalog
        .indexes_of(relid)
        .into_iter()
        .find(|i| {
            i.unique
                && i.valid
                && i.predicate.is_none()
                && i.attnums.len() == attnums.len()
                && i.attnums.iter().collect::<HashSet<_>>() == wanted
        })
        .map(|i| i.oid)
}

pub fn primary_key(catalog: &Catalog, relid: Oid) -> Option<&IndexDef> {
    catalog
        .indexes_of(relid)
        .into_iter()
        .find(|i| i.primary && i.valid)
}

/// Key expression list for an index, used by the bulk foreign-key check.
pub fn key_exprs(table: &RelationDef, attnums: &[AttrNumber]) -> Vec<BoundExpr> {
    attnums
        .iter()
        .filter_map(|a| table.attribute(*a))
        .map(|a| BoundExpr::var(a.attnum, a.type_name.clone()))
        .collect()
}
