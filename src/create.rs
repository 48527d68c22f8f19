//! CREATE statements: tables (with INHERITS, PARTITION BY, PARTITION OF and
//! OF type), indexes, views, composite types and triggers, plus DROP.

use crate::alter::command::{
    AlterTableStmt, ColumnDef, ConstraintSpec, IndexSpec, ObjectKind, Subcommand,
};
use crate::alter::exec::create_toast_if_needed;
use crate::alter::misc::resolve_distribution;
use crate::alter::partition::queue_partition_check;
use crate::alter::transform::split_column_constraints;
use crate::alter::work_queue::WorkQueue;
use crate::alter::{AlterContext, alter_table, rewrite};
use crate::catalog::depend::{
    DependKind, DropBehavior, ObjectAddress, ObjectAddresses, ObjectClass, perform_deletion,
    record_dependencies_on_columns, record_dependency,
};
use crate::catalog::schema::{
    AttributeDef, ConstraintDef, ConstraintKind, DistributionPolicy, DistributionStrategy,
    OnCommitAction, PartitionBound, PartitionKey, PartitionStrategy, Persistence, RelKind,
    RelationDef, TriggerDef, TriggerFiring, TriggerFunction,
};
use crate::catalog::types::{AttrNumber, ColumnType, Oid};
use crate::catalog::{DEFAULT_NAMESPACE, GLOBAL_TABLESPACE, TEMP_NAMESPACE};
use crate::error::{AlterError, ObjectKindName};
use crate::expr::{Analyzer, base_type};
use crate::index::define_index;
use crate::lock::LockMode;
use crate::merge::{inherited_checks, merge_attributes, merge_distribution_into_existing};
use crate::partition::{check_new_partition_bound, default_partition, transform_partition_bound};
use crate::permission::{check_owner, check_system_protection};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub strategy: PartitionStrategy,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSpec {
    pub strategy: DistributionStrategy,
    pub column: Option<String>,
    /// Defaults to every configured node.
    pub nodes: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTableStmt {
    /// Relation name, optionally `namespace.name`.
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<ConstraintSpec>,
    pub inherits: Vec<String>,
    pub partition_by: Option<PartitionSpec>,
    pub partition_of: Option<(String, PartitionBound)>,
    pub of_type: Option<String>,
    pub persistence: Persistence,
    pub on_commit: OnCommitAction,
    pub tablespace: Option<String>,
    pub distribution: Option<DistributionSpec>,
    pub with_oids: bool,
    pub if_not_exists: bool,
}

impl CreateTableStmt {
    pub fn new(name: &str, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.to_string(),
            columns,
            constraints: Vec::new(),
            inherits: Vec::new(),
            partition_by: None,
            partition_of: None,
            of_type: None,
            persistence: Persistence::Permanent,
            on_commit: OnCommitAction::Noop,
            tablespace: None,
            distribution: None,
            with_oids: false,
            if_not_exists: false,
        }
    }

    pub fn inherits(mut self, parents: &[&str]) -> Self {
        self.inherits = parents.iter().map(|p| (*p).to_string()).collect();
        self
    }

    pub fn partition_by(mut self, strategy: PartitionStrategy, columns: &[&str]) -> Self {
        self.partition_by = Some(PartitionSpec {
            strategy,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        });
        self
    }

    pub fn partition_of(mut self, parent: &str, bound: PartitionBound) -> Self {
        self.partition_of = Some((parent.to_string(), bound));
        self
    }

    pub fn of_type(mut self, type_name: &str) -> Self {
        self.of_type = Some(type_name.to_string());
        self
    }

    pub fn temporary(mut self, on_commit: OnCommitAction) -> Self {
        self.persistence = Persistence::Temporary;
        self.on_commit = on_commit;
        self
    }

    pub fn unlogged(mut self) -> Self {
        self.persistence = Persistence::Unlogged;
        self
    }

    pub fn tablespace(mut self, tablespace: &str) -> Self {
        self.tablespace = Some(tablespace.to_string());
        self
    }

    pub fn distribute_by(mut self, strategy: DistributionStrategy, column: Option<&str>) -> Self {
        self.distribution = Some(DistributionSpec {
            strategy,
            column: column.map(str::to_string),
            nodes: None,
        });
        self
    }

    pub fn with_oids(mut self) -> Self {
        self.with_oids = true;
        self
    }

    pub fn constraint(mut self, constraint: ConstraintSpec) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub name: String,
    pub function: String,
    pub row_level: bool,
    pub transition_tables: bool,
}

impl TriggerSpec {
    pub fn row(name: &str, function: &str) -> Self {
        Self {
            name: name.to_string(),
            function: function.to_string(),
            row_level: true,
            transition_tables: false,
        }
    }

    pub fn with_transition_tables(mut self) -> Self {
        self.transition_tables = true;
        self
    }
}

fn split_name(name: &str, persistence: Persistence) -> Result<(String, String), AlterError> {
    match name.split_once('.') {
        Some((ns, rel)) => {
            if persistence == Persistence::Temporary && ns != TEMP_NAMESPACE {
                return Err(AlterError::table_def(
                    "cannot create temporary relation in non-temporary schema",
                ));
            }
            Ok((ns.to_string(), rel.to_string()))
        }
        None if persistence == Persistence::Temporary => {
            Ok((TEMP_NAMESPACE.to_string(), name.to_string()))
        }
        None => Ok((DEFAULT_NAMESPACE.to_string(), name.to_string())),
    }
}

fn resolve_tablespace(ctx: &AlterContext<'_>, requested: Option<&str>) -> Result<String, AlterError> {
    let name = requested.unwrap_or(ctx.config.default_tablespace.as_str());
    if !ctx.catalog.tablespaces.contains(name) {
        return Err(AlterError::UndefinedObject {
            kind: ObjectKindName::Tablespace,
            name: name.to_string(),
        });
    }
    if name == GLOBAL_TABLESPACE {
        return Err(AlterError::InvalidParameterValue {
            message: "only shared relations can be placed in pg_global tablespace".into(),
        });
    }
    Ok(name.to_string())
}

/// Locks and checks the relations named in INHERITS or PARTITION OF.
fn open_parents(
    ctx: &mut AlterContext<'_>,
    stmt: &CreateTableStmt,
    name: &str,
) -> Result<Vec<RelationDef>, AlterError> {
    let as_partition = stmt.partition_of.is_some();
    let names: Vec<&str> = match &stmt.partition_of {
        Some((parent, _)) => vec![parent.as_str()],
        None => stmt.inherits.iter().map(String::as_str).collect(),
    };
    let mut parents: Vec<RelationDef> = Vec::with_capacity(names.len());
    for parent_name in names {
        let oid = ctx.catalog.lookup_required(parent_name)?;
        let mode = if as_partition {
            LockMode::AccessExclusive
        } else {
            LockMode::ShareUpdateExclusive
        };
        ctx.lock_relation(oid, mode);
        let parent = ctx.catalog.relation(oid)?.clone();
        if parents.iter().any(|p| p.oid == oid) {
            return Err(AlterError::DuplicateObject {
                message: format!(
                    "relation \"{}\" would be inherited from more than once",
                    parent.name
                ),
            });
        }
        if as_partition && !parent.is_partitioned() {
            return Err(AlterError::wrong_kind(format!(
                "table \"{}\" is not partitioned",
                parent.name
            )));
        }
        if !as_partition && parent.is_partitioned() {
            return Err(AlterError::wrong_kind(format!(
                "cannot inherit from partitioned table \"{}\"",
                parent.name
            )));
        }
        if !as_partition && parent.is_partition {
            return Err(AlterError::wrong_kind(format!(
                "cannot inherit from partition \"{}\"",
                parent.name
            )));
        }
        if !matches!(
            parent.kind,
            RelKind::Table | RelKind::PartitionedTable | RelKind::ForeignTable
        ) {
            return Err(AlterError::wrong_kind(format!(
                "inherited relation \"{}\" is not a table or foreign table",
                parent.name
            )));
        }
        match (parent.persistence, stmt.persistence) {
            (Persistence::Temporary, p) if p != Persistence::Temporary => {
                return Err(AlterError::wrong_kind(if as_partition {
                    format!(
                        "cannot create a permanent relation as partition of temporary relation \"{}\"",
                        parent.name
                    )
                } else {
                    format!("cannot inherit from temporary relation \"{}\"", parent.name)
                }));
            }
            (p, Persistence::Temporary) if as_partition && p != Persistence::Temporary => {
                return Err(AlterError::wrong_kind(format!(
                    "cannot create a temporary relation as partition of permanent relation \"{}\"",
                    parent.name
                )));
            }
            _ => {}
        }
        check_owner(ctx.catalog, ctx.caller, &parent)?;
        parents.push(parent);
    }
    if as_partition
        && let Some(parent) = parents.first()
    {
        for column in &stmt.columns {
            if parent.attribute_by_name(&column.name).is_none() {
                return Err(AlterError::UndefinedColumn {
                    relation: name.to_string(),
                    column: column.name.clone(),
                });
            }
        }
    }
    Ok(parents)
}

/// Attribute definitions for the locally declared columns, or for the
/// composite type of a typed table with the local options applied.
fn local_attributes(
    ctx: &AlterContext<'_>,
    name: &str,
    columns: &[ColumnDef],
    of_type: Option<&RelationDef>,
) -> Result<Vec<AttributeDef>, AlterError> {
    if let Some(ty) = of_type {
        let mut attributes: Vec<AttributeDef> = ty
            .live_attributes()
            .map(|a| AttributeDef::new(0, &a.name, a.type_name.clone()))
            .collect();
        for column in columns {
            let att = attributes
                .iter_mut()
                .find(|a| a.name == column.name)
                .ok_or_else(|| AlterError::UndefinedColumn {
                    relation: name.to_string(),
                    column: column.name.clone(),
                })?;
            att.not_null |= column.not_null;
        }
        return Ok(attributes);
    }
    let mut attributes = Vec::with_capacity(columns.len());
    for column in columns {
        base_type(&column.type_name, &*ctx.catalog)?;
        if column.collation.is_some() && !column.type_name.ty.is_collatable() {
            return Err(AlterError::DatatypeMismatch {
                message: format!(
                    "collations are not supported by type {}",
                    column.type_name.display()
                ),
            });
        }
        let mut att = AttributeDef::new(0, &column.name, column.type_name.clone());
        att.collation = column.collation.as_deref().map(CompactString::from);
        att.not_null = column.not_null;
        attributes.push(att);
    }
    Ok(attributes)
}

/// Binds column defaults once attribute numbers are final. Defaults may
/// not read columns.
fn bind_defaults(
    ctx: &AlterContext<'_>,
    rel: &mut RelationDef,
    columns: &[ColumnDef],
) -> Result<(), AlterError> {
    for column in columns {
        let Some(raw) = &column.default else { continue };
        if !raw.column_names().is_empty() {
            return Err(AlterError::table_def(
                "cannot use column reference in DEFAULT expression",
            ));
        }
        let Some(att) = rel.attribute_by_name(&column.name) else {
            continue;
        };
        let type_name = att.type_name.clone();
        let bound = Analyzer::new(&*rel, &*ctx.catalog).analyze_for_column(
            raw,
            &column.name,
            &type_name,
            "default expression",
        )?;
        if let Some(att) = rel
            .attributes
            .iter_mut()
            .find(|a| a.name == column.name && !a.is_dropped)
        {
            att.default = Some(bound);
        }
    }
    Ok(())
}

fn resolve_partition_key(
    ctx: &AlterContext<'_>,
    rel: &RelationDef,
    spec: &PartitionSpec,
) -> Result<PartitionKey, AlterError> {
    if spec.columns.is_empty() {
        return Err(AlterError::table_def("partition key must name at least one column"));
    }
    if spec.strategy == PartitionStrategy::List && spec.columns.len() > 1 {
        return Err(AlterError::table_def(
            "cannot use \"list\" partition strategy with more than one column",
        ));
    }
    if rel.persistence == Persistence::Unlogged {
        return Err(AlterError::table_def("partitioned tables cannot be unlogged"));
    }
    let mut attnums: Vec<AttrNumber> = Vec::with_capacity(spec.columns.len());
    for column in &spec.columns {
        let att = rel
            .attribute_by_name(column)
            .ok_or_else(|| AlterError::UndefinedColumn {
                relation: rel.name.to_string(),
                column: column.clone(),
            })?;
        let ty = base_type(&att.type_name, &*ctx.catalog)?;
        if matches!(ty.ty, ColumnType::Json | ColumnType::Blob) {
            return Err(AlterError::object_def(format!(
                "data type {} has no default operator class for partitioning",
                att.type_name.display()
            )));
        }
        if attnums.contains(&att.attnum) {
            return Err(AlterError::DuplicateColumn {
                relation: rel.name.to_string(),
                column: column.clone(),
            });
        }
        attnums.push(att.attnum);
    }
    Ok(PartitionKey {
        strategy: spec.strategy,
        attnums,
    })
}

/// The parent's policy re-pointed at the child's copy of the column.
fn inherit_distribution(rel: &RelationDef, parent: &RelationDef) -> Option<DistributionPolicy> {
    let policy = parent.distribution.as_ref()?;
    let column = match &policy.column {
        Some((_, name)) => Some((rel.attribute_by_name(name)?.attnum, name.clone())),
        None => None,
    };
    Some(DistributionPolicy {
        strategy: policy.strategy,
        column,
        nodes: policy.nodes.clone(),
    })
}

fn add_inherited_checks(
    ctx: &mut AlterContext<'_>,
    rel: &RelationDef,
    parents: &[Oid],
) -> Result<(), AlterError> {
    for (name, expr) in inherited_checks(ctx.catalog, rel, parents)? {
        if let Some(existing) = ctx.catalog.constraint_by_name(rel.oid, &name) {
            let oid = existing.oid;
            ctx.catalog.constraint_mut(oid)?.inhcount += 1;
            continue;
        }
        let oid = ctx.catalog.alloc_oid();
        let attnums: Vec<AttrNumber> = expr.attnums().into_iter().collect();
        ctx.catalog.constraints.insert(
            oid,
            ConstraintDef {
                oid,
                relid: rel.oid,
                name: name.as_str().into(),
                kind: ConstraintKind::Check,
                expr: Some(expr),
                index: None,
                foreign_key: None,
                attnums: attnums.clone(),
                deferrable: false,
                deferred: false,
                validated: true,
                inhcount: 1,
                is_local: false,
                no_inherit: false,
            },
        );
        record_dependencies_on_columns(
            ctx.catalog,
            ObjectAddress::constraint(oid),
            rel.oid,
            attnums,
            DependKind::Auto,
        );
    }
    Ok(())
}

/// Runs CREATE TABLE. Returns `None` when IF NOT EXISTS found the name
/// taken.
pub fn create_table(
    ctx: &mut AlterContext<'_>,
    stmt: &CreateTableStmt,
) -> Result<Option<Oid>, AlterError> {
    let (namespace, name) = split_name(&stmt.name, stmt.persistence)?;
    if ctx.catalog.name_taken(&namespace, &name) {
        if stmt.if_not_exists {
            ctx.notice(format!("relation \"{name}\" already exists, skipping"));
            return Ok(None);
        }
        return Err(AlterError::DuplicateObject {
            message: format!("relation \"{name}\" already exists"),
        });
    }
    if stmt.on_commit != OnCommitAction::Noop && stmt.persistence != Persistence::Temporary {
        return Err(AlterError::table_def(
            "ON COMMIT can only be used on temporary tables",
        ));
    }
    if stmt.partition_of.is_some() && !stmt.inherits.is_empty() {
        return Err(AlterError::table_def(
            "a partition cannot also inherit from other tables",
        ));
    }
    let tablespace = resolve_tablespace(ctx, stmt.tablespace.as_deref())?;

    let of_type = match &stmt.of_type {
        Some(type_name) => {
            if !stmt.inherits.is_empty() {
                return Err(AlterError::wrong_kind("typed tables cannot inherit"));
            }
            let oid = ctx.catalog.lookup_required(type_name)?;
            let ty = ctx.catalog.relation(oid)?.clone();
            if ty.kind != RelKind::CompositeType {
                return Err(AlterError::wrong_kind(format!(
                    "\"{}\" is not a composite type",
                    ty.name
                )));
            }
            Some(ty)
        }
        None => None,
    };

    let parents = open_parents(ctx, stmt, &name)?;
    let parent_oids: Vec<Oid> = parents.iter().map(|p| p.oid).collect();

    // A new non-default partition narrows the default partition.
    let default_to_check = match &stmt.partition_of {
        Some((_, bound)) if !bound.is_default() => default_partition(ctx.catalog, parent_oids[0]),
        _ => None,
    };
    if let Some(default) = default_to_check {
        ctx.lock_relation(default, LockMode::AccessExclusive);
    }

    let mut columns: Vec<ColumnDef> = Vec::with_capacity(stmt.columns.len());
    let mut follow_up: Vec<Subcommand> = Vec::new();
    for column in &stmt.columns {
        let (stripped, after) = split_column_constraints(column);
        columns.push(stripped);
        follow_up.extend(after);
    }
    follow_up.extend(stmt.constraints.iter().cloned().map(Subcommand::AddConstraint));

    let local = local_attributes(ctx, &name, &columns, of_type.as_ref())?;
    let attributes = merge_attributes(ctx.catalog, ctx.config, &name, local, &parent_oids)?;

    let oid = ctx.catalog.alloc_oid();
    let mut rel = RelationDef::new(oid, &name, &namespace, RelKind::Table, &ctx.caller.caller_id);
    rel.tablespace = tablespace.as_str().into();
    rel.persistence = stmt.persistence;
    rel.has_oids = stmt.with_oids || parents.iter().any(|p| p.has_oids);
    rel.attributes = attributes;
    rel.of_type = of_type.as_ref().map(|t| t.oid);
    bind_defaults(ctx, &mut rel, &columns)?;

    if let Some(spec) = &stmt.partition_by {
        rel.partition_key = Some(resolve_partition_key(ctx, &rel, spec)?);
        rel.kind = RelKind::PartitionedTable;
    }
    if let Some((_, bound)) = &stmt.partition_of {
        let parent = &parents[0];
        let bound = transform_partition_bound(ctx.catalog, parent, &name, bound)?;
        check_new_partition_bound(ctx.catalog, parent.oid, &name, &bound)?;
        rel.is_partition = true;
        rel.partition_bound = Some(bound);
    }

    rel.distribution = match &stmt.distribution {
        Some(spec) => {
            if !ctx.config.distribution_enabled {
                return Err(AlterError::unsupported(
                    "DISTRIBUTE BY requires a distributed configuration",
                ));
            }
            Some(resolve_distribution(
                ctx.catalog,
                ctx.config,
                &rel,
                spec.strategy,
                spec.column.as_deref(),
                spec.nodes.as_deref(),
            )?)
        }
        None => parents.first().and_then(|p| inherit_distribution(&rel, p)),
    };
    for parent in &parents {
        merge_distribution_into_existing(ctx.config, &rel, parent)?;
    }

    if rel.kind.has_storage() {
        let storage = ctx.storage.create(&rel.tablespace, rel.persistence);
        ctx.session.schedule_unlink(storage, false);
        rel.storage = Some(storage);
    }
    ctx.catalog.insert_relation(rel.clone());

    let edge_kind = if rel.is_partition {
        DependKind::Auto
    } else {
        DependKind::Normal
    };
    for parent in &parent_oids {
        ctx.catalog.add_inherit_edge(oid, *parent);
        record_dependency(
            ctx.catalog,
            ObjectAddress::relation(oid),
            ObjectAddress::relation(*parent),
            edge_kind,
        );
        ctx.invalidate(*parent);
    }
    if let Some(ty) = &of_type {
        record_dependency(
            ctx.catalog,
            ObjectAddress::relation(oid),
            ObjectAddress::relation(ty.oid),
            DependKind::Normal,
        );
    }
    if let Some(key) = &rel.partition_key {
        record_dependencies_on_columns(
            ctx.catalog,
            ObjectAddress::relation(oid),
            oid,
            key.attnums.iter().copied(),
            DependKind::Internal,
        );
    }
    add_inherited_checks(ctx, &rel, &parent_oids)?;

    if rel.is_partition {
        let parent_indexes: Vec<Oid> = ctx
            .catalog
            .indexes_of(parent_oids[0])
            .iter()
            .map(|i| i.oid)
            .collect();
        for parent_index in parent_indexes {
            crate::index::attach_or_create_partition_index(ctx, parent_index, oid)?;
        }
    }
    if let Some(default) = default_to_check {
        let mut queue = WorkQueue::new();
        queue_partition_check(ctx, &mut queue, default, true)?;
        rewrite::rewrite_tables(ctx, &mut queue, LockMode::AccessExclusive)?;
        ctx.invalidate(default);
    }

    ctx.session.register_on_commit(oid, stmt.on_commit);
    create_toast_if_needed(ctx, oid)?;
    ctx.invalidate(oid);
    ctx.command_counter_increment();
    debug!(
        relation = %name,
        namespace = %namespace,
        kind = rel.kind.description(),
        parents = parent_oids.len(),
        "created table"
    );

    if !follow_up.is_empty() {
        alter_table(
            ctx,
            &AlterTableStmt::new(&format!("{namespace}.{name}"), follow_up),
        )?;
    }
    Ok(Some(oid))
}

/// Creates a relation kind without inheritance: views, materialized
/// views, composite types and foreign tables.
pub fn create_relation(
    ctx: &mut AlterContext<'_>,
    name: &str,
    kind: RelKind,
    columns: &[ColumnDef],
) -> Result<Oid, AlterError> {
    if !matches!(
        kind,
        RelKind::View | RelKind::MaterializedView | RelKind::CompositeType | RelKind::ForeignTable
    ) {
        return Err(AlterError::internal(format!(
            "create_relation cannot create {}",
            kind.description()
        )));
    }
    let (namespace, relname) = split_name(name, Persistence::Permanent)?;
    if ctx.catalog.name_taken(&namespace, &relname) {
        return Err(AlterError::DuplicateObject {
            message: format!("relation \"{relname}\" already exists"),
        });
    }
    let local = local_attributes(ctx, &relname, columns, None)?;
    let attributes = merge_attributes(ctx.catalog, ctx.config, &relname, local, &[])?;
    let oid = ctx.catalog.alloc_oid();
    let mut rel = RelationDef::new(oid, &relname, &namespace, kind, &ctx.caller.caller_id);
    rel.tablespace = ctx.config.default_tablespace.as_str().into();
    rel.attributes = attributes;
    if kind.has_storage() {
        let storage = ctx.storage.create(&rel.tablespace, rel.persistence);
        ctx.session.schedule_unlink(storage, false);
        rel.storage = Some(storage);
    }
    ctx.catalog.insert_relation(rel);
    ctx.invalidate(oid);
    ctx.command_counter_increment();
    debug!(relation = %relname, kind = kind.description(), "created relation");
    Ok(oid)
}

pub fn create_index(
    ctx: &mut AlterContext<'_>,
    table: &str,
    spec: &IndexSpec,
) -> Result<Oid, AlterError> {
    let relid = ctx.catalog.lookup_required(table)?;
    ctx.lock_relation(relid, LockMode::Share);
    let rel = ctx.catalog.relation(relid)?.clone();
    check_owner(ctx.catalog, ctx.caller, &rel)?;
    ctx.session
        .check_table_not_in_use(relid, &rel.name, "CREATE INDEX")?;
    let result = define_index(ctx, relid, spec, false, None)?;
    if result.needs_not_null_check {
        let mut queue = WorkQueue::new();
        let entry = queue.find_or_create(ctx.catalog, relid)?;
        queue.entry_mut(entry).verify_new_notnull = true;
        rewrite::rewrite_tables(ctx, &mut queue, LockMode::Share)?;
    }
    ctx.invalidate(relid);
    ctx.command_counter_increment();
    Ok(result.oid)
}

pub fn create_trigger(
    ctx: &mut AlterContext<'_>,
    table: &str,
    spec: &TriggerSpec,
) -> Result<Oid, AlterError> {
    let relid = ctx.catalog.lookup_required(table)?;
    ctx.lock_relation(relid, LockMode::ShareRowExclusive);
    let rel = ctx.catalog.relation(relid)?.clone();
    check_owner(ctx.catalog, ctx.caller, &rel)?;
    if ctx.catalog.triggers_of(relid).iter().any(|t| t.name == spec.name) {
        return Err(AlterError::DuplicateObject {
            message: format!(
                "trigger \"{}\" for relation \"{}\" already exists",
                spec.name, rel.name
            ),
        });
    }
    if spec.transition_tables && (rel.is_partition || !ctx.catalog.parents(relid).is_empty()) {
        return Err(AlterError::unsupported(
            "ROW triggers with transition tables are not supported on partitions or inheritance children",
        ));
    }
    let oid = ctx.catalog.alloc_oid();
    ctx.catalog.triggers.insert(
        oid,
        TriggerDef {
            oid,
            relid,
            name: spec.name.as_str().into(),
            function: TriggerFunction::User(spec.function.as_str().into()),
            firing: TriggerFiring::Origin,
            is_internal: false,
            row_level: spec.row_level,
            has_transition_tables: spec.transition_tables,
            constraint: None,
        },
    );
    record_dependency(
        ctx.catalog,
        ObjectAddress::trigger(oid),
        ObjectAddress::relation(relid),
        DependKind::Auto,
    );
    ctx.invalidate(relid);
    Ok(oid)
}

/// DROP TABLE, DROP INDEX, DROP VIEW and the like; `kind` names the
/// statement. Storage goes away at commit.
pub fn drop_relation(
    ctx: &mut AlterContext<'_>,
    kind: ObjectKind,
    name: &str,
    behavior: DropBehavior,
    missing_ok: bool,
) -> Result<(), AlterError> {
    let Some(relid) = ctx.catalog.lookup(name) else {
        if missing_ok {
            ctx.notice(format!("relation \"{name}\" does not exist, skipping"));
            return Ok(());
        }
        return Err(AlterError::UndefinedTable {
            relation: name.to_string(),
        });
    };
    let rel = ctx.catalog.relation(relid)?.clone();
    let actual = ObjectKind::of_relkind(rel.kind);
    if actual != kind || rel.kind == RelKind::Toast {
        return Err(AlterError::WrongObjectType {
            relation: rel.name.to_string(),
            allowed: kind.drop_target().to_string(),
            hint: Some(actual.drop_hint()),
        });
    }
    ctx.lock_relation(relid, LockMode::AccessExclusive);
    check_system_protection(&rel, ctx.config)?;
    check_owner(ctx.catalog, ctx.caller, &rel)?;
    ctx.session
        .check_table_not_in_use(relid, &rel.name, kind.drop_statement())?;
    for child in ctx.catalog.children(relid) {
        ctx.lock_relation(child, LockMode::AccessExclusive);
    }

    let mut targets = ObjectAddresses::new();
    targets.add(ObjectAddress::relation(relid));
    let report = perform_deletion(ctx.catalog, &targets, behavior)?;
    for storage in report.dropped_storage {
        ctx.session.schedule_unlink(storage, true);
    }
    for addr in &report.deleted {
        if addr.class == ObjectClass::Relation && addr.sub_id == 0 {
            ctx.session.remove_on_commit(addr.oid);
            ctx.invalidate(addr.oid);
        }
    }
    ctx.command_counter_increment();
    debug!(relation = %rel.name, objects = report.deleted.len(), "dropped relation");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_names_land_in_temp_namespace() {
        assert_eq!(
            split_name("t", Persistence::Temporary).unwrap(),
            (TEMP_NAMESPACE.to_string(), "t".to_string())
        );
        assert_eq!(
            split_name("s.t", Persistence::Permanent).unwrap(),
            ("s".to_string(), "t".to_string())
        );
        assert!(split_name("public.t", Persistence::Temporary).is_err());
    }

    #[test]
    fn builder_collects_options() {
        let stmt = CreateTableStmt::new("p1", Vec::new())
            .partition_of("p", PartitionBound::Default)
            .temporary(OnCommitAction::DeleteRows)
            .if_not_exists();
        assert_eq!(stmt.persistence, Persistence::Temporary);
        assert_eq!(stmt.on_commit, OnCommitAction::DeleteRows);
        assert!(stmt.if_not_exists);
        assert!(matches!(stmt.partition_of, Some((ref p, PartitionBound::Default)) if p == "p"));
    }
}
