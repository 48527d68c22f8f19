//! Relation-level subcommands of the Misc and Distribution passes.

use crate::alter::AlterContext;
use crate::alter::command::{GenericOption, GenericOptionAction, ReplicaIdentitySpec, TriggerTarget};
use crate::alter::exec::ExecTarget;
use crate::alter::work_queue::WorkQueue;
use crate::catalog::Catalog;
use crate::catalog::depend::ObjectAddress;
use crate::catalog::schema::{
    DistributionPolicy, DistributionStrategy, IndexMethod, RelKind, RelationDef, ReplicaIdentity,
    TriggerFiring,
};
use crate::catalog::types::{ColumnType, Oid};
use crate::config::EngineConfig;
use crate::error::{AlterError, ObjectKindName};
use crate::permission::{check_can_assign_owner, check_owner};
use compact_str::CompactString;
use tracing::debug;

pub fn exec_change_owner(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    new_owner: &str,
    recursing: bool,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(relid)?.clone();
    if !recursing && matches!(rel.kind, RelKind::Index | RelKind::PartitionedIndex | RelKind::Toast) {
        // Owned relations follow their table.
        ctx.notice(format!(
            "cannot change owner of {} \"{}\"; change the ownership of the table instead",
            rel.kind.description(),
            rel.name
        ));
        return Ok(None);
    }
    if rel.owner == new_owner {
        return Ok(None);
    }
    if !recursing {
        check_owner(ctx.catalog, ctx.caller, &rel)?;
        check_can_assign_owner(ctx.catalog, ctx.caller, new_owner)?;
    }
    ctx.catalog.relation_mut(relid)?.owner = new_owner.into();
    ctx.invalidate(relid);

    let mut owned: Vec<Oid> = ctx.catalog.indexes_of(relid).iter().map(|i| i.oid).collect();
    owned.extend(rel.toast);
    for oid in owned {
        exec_change_owner(ctx, oid, new_owner, true)?;
    }
    debug!(relation = %rel.name, owner = new_owner, "changed owner");
    Ok(Some(ObjectAddress::relation(relid)))
}

fn index_of_table(
    ctx: &AlterContext<'_>,
    relid: Oid,
    index: &str,
) -> Result<Oid, AlterError> {
    let table = ctx.catalog.relation(relid)?;
    let qualified = if index.contains('.') {
        index.to_string()
    } else {
        format!("{}.{index}", table.namespace)
    };
    let oid = ctx.catalog.lookup(&qualified).ok_or_else(|| AlterError::UndefinedObject {
        kind: ObjectKindName::Index,
        name: index.to_string(),
    })?;
    match ctx.catalog.indexes.get(&oid) {
        Some(idx) if idx.relid == relid => Ok(oid),
        _ => Err(AlterError::object_def(format!(
            "\"{index}\" is not an index for table \"{}\"",
            table.name
        ))),
    }
}

pub fn exec_cluster_on(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    index: &str,
) -> Result<Option<ObjectAddress>, AlterError> {
    let oid = index_of_table(ctx, relid, index)?;
    let idx = ctx.catalog.index(oid)?;
    if idx.method != IndexMethod::BTree {
        return Err(AlterError::unsupported(format!(
            "cannot cluster on index \"{index}\" because access method does not support clustering"
        )));
    }
    if idx.predicate.is_some() {
        return Err(AlterError::unsupported(format!(
            "cannot cluster on partial index \"{index}\""
        )));
    }
    if !idx.valid {
        return Err(AlterError::unsupported(format!(
            "cannot cluster on invalid index \"{index}\""
        )));
    }
    let rel = ctx.catalog.relation_mut(relid)?;
    if rel.cluster_index == Some(oid) {
        return Ok(None);
    }
    rel.cluster_index = Some(oid);
    Ok(Some(ObjectAddress::relation(oid)))
}

pub fn exec_drop_cluster(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation_mut(relid)?;
    Ok(rel.cluster_index.take().map(ObjectAddress::relation))
}

/// Relations with storage change persistence during the phase 3 rewrite;
/// the rest only need the catalog flag.
pub fn exec_set_persistence(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
) -> Result<Option<ObjectAddress>, AlterError> {
    let Some(target) = queue.entry(t.entry).new_persistence else {
        return Ok(None);
    };
    let rel = ctx.catalog.relation_mut(t.relid)?;
    if !rel.kind.has_storage() {
        rel.persistence = target;
    }
    Ok(Some(ObjectAddress::relation(t.relid)))
}

pub fn exec_set_oids(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    with_oids: bool,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(relid)?;
    if rel.has_oids == with_oids {
        return Ok(None);
    }
    if with_oids && rel.attribute_by_name("oid").is_some() {
        return Err(AlterError::DuplicateColumn {
            relation: rel.name.to_string(),
            column: "oid".into(),
        });
    }
    ctx.catalog.relation_mut(relid)?.has_oids = with_oids;
    Ok(Some(ObjectAddress::relation(relid)))
}

/// Storage-less relations move in the catalog only; the rest are copied
/// block by block in phase 3.
pub fn exec_set_tablespace(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    tablespace: &str,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation_mut(relid)?;
    if rel.tablespace == tablespace {
        return Ok(None);
    }
    if rel.storage.is_none() {
        rel.tablespace = tablespace.into();
        debug!(relation = %rel.name, tablespace, "moved storage-less relation");
    }
    Ok(Some(ObjectAddress::relation(relid)))
}

#[derive(Debug, Clone, Copy)]
enum OptionKind {
    Bool,
    Int(i64, i64),
    Enum(&'static [&'static str]),
}

const TABLE_OPTIONS: &[(&str, OptionKind)] = &[
    ("fillfactor", OptionKind::Int(10, 100)),
    ("autovacuum_enabled", OptionKind::Bool),
    ("toast_tuple_target", OptionKind::Int(128, 8160)),
    ("parallel_workers", OptionKind::Int(0, 1024)),
    ("user_catalog_table", OptionKind::Bool),
];

const INDEX_OPTIONS: &[(&str, OptionKind)] = &[("fillfactor", OptionKind::Int(10, 100))];

const VIEW_OPTIONS: &[(&str, OptionKind)] = &[
    ("check_option", OptionKind::Enum(&["local", "cascaded"])),
    ("security_barrier", OptionKind::Bool),
];

fn options_for(kind: RelKind) -> &'static [(&'static str, OptionKind)] {
    match kind {
        RelKind::View => VIEW_OPTIONS,
        RelKind::Index | RelKind::PartitionedIndex => INDEX_OPTIONS,
        _ => TABLE_OPTIONS,
    }
}

fn validate_option(kind: RelKind, name: &str, value: &str) -> Result<String, AlterError> {
    let Some((_, option)) = options_for(kind).iter().find(|(n, _)| *n == name) else {
        return Err(AlterError::InvalidParameterValue {
            message: format!("unrecognized parameter \"{name}\""),
        });
    };
    let invalid = |what: &str| AlterError::InvalidParameterValue {
        message: format!("invalid value for {what} option \"{name}\": {value}"),
    };
    match option {
        OptionKind::Bool => match value.to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Ok("true".into()),
            "false" | "off" | "0" => Ok("false".into()),
            _ => Err(invalid("boolean")),
        },
        OptionKind::Int(min, max) => {
            let parsed: i64 = value.parse().map_err(|_| invalid("integer"))?;
            if parsed < *min || parsed > *max {
                return Err(AlterError::InvalidParameterValue {
                    message: format!(
                        "value {value} out of bounds for option \"{name}\"; valid values are between \"{min}\" and \"{max}\""
                    ),
                });
            }
            Ok(parsed.to_string())
        }
        OptionKind::Enum(allowed) => {
            let lowered = value.to_ascii_lowercase();
            if allowed.contains(&lowered.as_str()) {
                Ok(lowered)
            } else {
                Err(invalid("enum"))
            }
        }
    }
}

pub fn exec_set_rel_options(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    options: &[(String, String)],
) -> Result<Option<ObjectAddress>, AlterError> {
    let kind = ctx.catalog.relation(relid)?.kind;
    let validated = options
        .iter()
        .map(|(name, value)| {
            let name = name.to_ascii_lowercase();
            let value = validate_option(kind, &name, value)?;
            Ok((name, value))
        })
        .collect::<Result<Vec<_>, AlterError>>()?;
    let rel = ctx.catalog.relation_mut(relid)?;
    rel.options.extend(validated);
    Ok(Some(ObjectAddress::relation(relid)))
}

pub fn exec_reset_rel_options(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    options: &[String],
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation_mut(relid)?;
    for name in options {
        rel.options.remove(&name.to_ascii_lowercase());
    }
    Ok(Some(ObjectAddress::relation(relid)))
}

pub fn exec_set_trigger(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    target: &TriggerTarget,
    firing: TriggerFiring,
) -> Result<Option<ObjectAddress>, AlterError> {
    let superuser = ctx.caller.is_superuser(ctx.catalog);
    let triggers: Vec<(Oid, CompactString, bool)> = ctx
        .catalog
        .triggers_of(relid)
        .into_iter()
        .map(|t| (t.oid, t.name.clone(), t.is_internal))
        .collect();
    let selected: Vec<&(Oid, CompactString, bool)> = match target {
        TriggerTarget::Named(name) => {
            let found: Vec<_> = triggers.iter().filter(|t| t.1 == name.as_str()).collect();
            if found.is_empty() {
                return Err(AlterError::UndefinedObject {
                    kind: ObjectKindName::Trigger,
                    name: format!(
                        "{name}\" for table \"{}",
                        ctx.catalog.relation_name(relid)
                    ),
                });
            }
            found
        }
        TriggerTarget::All => triggers.iter().collect(),
        TriggerTarget::User => triggers.iter().filter(|t| !t.2).collect(),
    };
    if let Some(system) = selected.iter().find(|t| t.2)
        && !superuser
    {
        return Err(AlterError::InsufficientPrivilege {
            message: format!("permission denied: \"{}\" is a system trigger", system.1),
        });
    }
    let mut changed = 0;
    for (oid, _, _) in selected {
        if let Some(trigger) = ctx.catalog.triggers.get_mut(oid)
            && trigger.firing != firing
        {
            trigger.firing = firing;
            changed += 1;
        }
    }
    debug!(relid, changed, ?firing, "set trigger firing");
    Ok(Some(ObjectAddress::relation(relid)))
}

pub fn exec_set_rule(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    name: &str,
    firing: TriggerFiring,
) -> Result<Option<ObjectAddress>, AlterError> {
    let oid = ctx
        .catalog
        .rules_of(relid)
        .into_iter()
        .find(|r| r.name == name)
        .map(|r| r.oid)
        .ok_or_else(|| AlterError::UndefinedObject {
            kind: ObjectKindName::Rule,
            name: format!("{name}\" for relation \"{}", ctx.catalog.relation_name(relid)),
        })?;
    if let Some(rule) = ctx.catalog.rules.get_mut(&oid) {
        rule.firing = firing;
    }
    Ok(Some(ObjectAddress::rule(oid)))
}

pub fn exec_replica_identity(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    spec: &ReplicaIdentitySpec,
) -> Result<Option<ObjectAddress>, AlterError> {
    let identity = match spec {
        ReplicaIdentitySpec::Default => ReplicaIdentity::Default,
        ReplicaIdentitySpec::Nothing => ReplicaIdentity::Nothing,
        ReplicaIdentitySpec::Full => ReplicaIdentity::Full,
        ReplicaIdentitySpec::Index(name) => {
            let oid = index_of_table(ctx, relid, name)?;
            let rel = ctx.catalog.relation(relid)?;
            let idx = ctx.catalog.index(oid)?;
            if !idx.unique {
                return Err(AlterError::object_def(format!(
                    "cannot use non-unique index \"{name}\" as replica identity"
                )));
            }
            if idx.predicate.is_some() {
                return Err(AlterError::object_def(format!(
                    "cannot use partial index \"{name}\" as replica identity"
                )));
            }
            if !idx.valid {
                return Err(AlterError::object_def(format!(
                    "cannot use invalid index \"{name}\" as replica identity"
                )));
            }
            if let Some(con) = idx.constraint
                && ctx.catalog.constraint(con)?.deferrable
            {
                return Err(AlterError::unsupported(format!(
                    "cannot use non-immediate index \"{name}\" as replica identity"
                )));
            }
            for attnum in &idx.attnums {
                let att = rel.attribute(*attnum).ok_or_else(|| {
                    AlterError::internal(format!("index column {attnum} missing"))
                })?;
                if !att.not_null {
                    return Err(AlterError::object_def(format!(
                        "index \"{name}\" cannot be used as replica identity because column \"{}\" is nullable",
                        att.name
                    )));
                }
            }
            ReplicaIdentity::Index(oid)
        }
    };
    let rel = ctx.catalog.relation_mut(relid)?;
    if rel.replica_identity == identity {
        return Ok(None);
    }
    rel.replica_identity = identity;
    Ok(Some(ObjectAddress::relation(relid)))
}

pub fn exec_set_row_security(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    enabled: bool,
) -> Result<Option<ObjectAddress>, AlterError> {
    ctx.catalog.relation_mut(relid)?.row_security = enabled;
    Ok(Some(ObjectAddress::relation(relid)))
}

pub fn exec_force_row_security(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    forced: bool,
) -> Result<Option<ObjectAddress>, AlterError> {
    ctx.catalog.relation_mut(relid)?.force_row_security = forced;
    Ok(Some(ObjectAddress::relation(relid)))
}

pub fn exec_generic_options(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    options: &[GenericOption],
) -> Result<Option<ObjectAddress>, AlterError> {
    let mut current = ctx.catalog.relation(relid)?.generic_options.clone();
    for option in options {
        match option.action {
            GenericOptionAction::Add => {
                if current.contains_key(&option.name) {
                    return Err(AlterError::DuplicateObject {
                        message: format!("option \"{}\" provided more than once", option.name),
                    });
                }
                current.insert(option.name.clone(), option.value.clone().unwrap_or_default());
            }
            GenericOptionAction::Set | GenericOptionAction::Drop => {
                if !current.contains_key(&option.name) {
                    return Err(AlterError::UndefinedObject {
                        kind: ObjectKindName::Option,
                        name: option.name.clone(),
                    });
                }
                if option.action == GenericOptionAction::Drop {
                    current.remove(&option.name);
                } else {
                    current.insert(option.name.clone(), option.value.clone().unwrap_or_default());
                }
            }
        }
    }
    ctx.catalog.relation_mut(relid)?.generic_options = current;
    Ok(Some(ObjectAddress::relation(relid)))
}

/// Replaces the placement policy. Data placement in this engine is logical,
/// so the change is catalog-only.
/// Builds a distribution policy for `rel`, checking the column's type and
/// the requested nodes.
pub(crate) fn resolve_distribution(
    catalog: &Catalog,
    config: &EngineConfig,
    rel: &RelationDef,
    strategy: DistributionStrategy,
    column: Option<&str>,
    nodes: Option<&[String]>,
) -> Result<DistributionPolicy, AlterError> {
    let column = match (strategy.needs_column(), column) {
        (true, None) => {
            return Err(AlterError::InvalidParameterValue {
                message: format!("distribution by {} requires a column", strategy.name()),
            });
        }
        (false, Some(_)) => {
            return Err(AlterError::InvalidParameterValue {
                message: format!("distribution by {} does not take a column", strategy.name()),
            });
        }
        (false, None) => None,
        (true, Some(name)) => {
            let att = rel.attribute_by_name(name).ok_or_else(|| AlterError::UndefinedColumn {
                relation: rel.name.to_string(),
                column: name.to_string(),
            })?;
            let ty = crate::expr::base_type(&att.type_name, catalog)?;
            let distributable = match strategy {
                DistributionStrategy::Modulo => matches!(
                    ty.ty,
                    ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt
                ),
                _ => !matches!(ty.ty, ColumnType::Float | ColumnType::Json | ColumnType::Blob),
            };
            if !distributable {
                return Err(AlterError::unsupported(format!(
                    "column \"{name}\" with type {} cannot be used for distribution by {}",
                    att.type_name.display(),
                    strategy.name()
                )));
            }
            Some((att.attnum, att.name.clone()))
        }
    };
    let nodes: Vec<CompactString> = match nodes {
        Some(list) => {
            for node in list {
                if !config.default_nodes.iter().any(|n| n == node) {
                    return Err(AlterError::UndefinedObject {
                        kind: ObjectKindName::Option,
                        name: format!("node {node}"),
                    });
                }
            }
            list.iter().map(|n| n.as_str().into()).collect()
        }
        None => config.default_nodes.iter().map(|n| n.as_str().into()).collect(),
    };
    Ok(DistributionPolicy {
        strategy,
        column,
        nodes,
    })
}

pub fn exec_set_distribution(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    strategy: DistributionStrategy,
    column: Option<&str>,
    nodes: Option<&[String]>,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(relid)?.clone();
    if ctx.catalog.has_subclass(relid) || !ctx.catalog.parents(relid).is_empty() {
        return Err(AlterError::unsupported(format!(
            "cannot change distribution of table \"{}\" because it is part of an inheritance tree",
            rel.name
        )));
    }
    let policy = resolve_distribution(ctx.catalog, ctx.config, &rel, strategy, column, nodes)?;
    if rel.distribution.as_ref() == Some(&policy) {
        return Ok(None);
    }
    debug!(relation = %rel.name, policy = %policy, "changed distribution");
    ctx.catalog.relation_mut(relid)?.distribution = Some(policy);
    Ok(Some(ObjectAddress::relation(relid)))
}
