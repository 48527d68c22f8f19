//! Column-level subcommands: add, drop, retype, defaults, NOT NULL and the
//! per-attribute settings.

use crate::alter::command::{ColumnDef, Subcommand};
use crate::alter::constraints::constraint_spec_from_def;
use crate::alter::exec::ExecTarget;
use crate::alter::work_queue::{NewColumnValue, RewriteReason, WorkQueue};
use crate::alter::{AlterContext, RecursionContext};
use crate::catalog::depend::{
    DropBehavior, ObjectAddress, ObjectAddresses, ObjectClass, dependents_of, perform_deletion,
};
use crate::catalog::schema::{AttributeDef, AttributeStorage, ConstraintKind, RelationDef};
use crate::catalog::types::{AttrNumber, ColumnType, Oid, TypeName, Value};
use crate::error::AlterError;
use crate::expr::cast::{CoercionContext, convert_value};
use crate::expr::eval::compile;
use crate::expr::{Analyzer, BoundExpr, CoercionForm, RawExpr, base_type};
use crate::index::index_spec_from_def;
use compact_str::CompactString;
use tracing::{debug, info};

const MAX_STATISTICS_TARGET: i32 = 10000;
const ATTRIBUTE_OPTIONS: [&str; 2] = ["n_distinct", "n_distinct_inherited"];

fn column_of<'r>(rel: &'r RelationDef, column: &str) -> Result<&'r AttributeDef, AlterError> {
    rel.attribute_by_name(column)
        .ok_or_else(|| AlterError::UndefinedColumn {
            relation: rel.name.to_string(),
            column: column.to_string(),
        })
}

fn user_column<'r>(rel: &'r RelationDef, column: &str) -> Result<&'r AttributeDef, AlterError> {
    let att = column_of(rel, column)?;
    if att.attnum <= 0 {
        return Err(AlterError::unsupported(format!(
            "cannot alter system column \"{column}\""
        )));
    }
    Ok(att)
}

fn attribute_mut<'r>(
    rel: &'r mut RelationDef,
    attnum: AttrNumber,
) -> Result<&'r mut AttributeDef, AlterError> {
    let relid = rel.oid;
    rel.attribute_mut(attnum)
        .ok_or_else(|| AlterError::internal(format!("attribute {attnum} of relation {relid} vanished")))
}

fn in_partition_key(rel: &RelationDef, attnum: AttrNumber) -> bool {
    rel.partition_key
        .as_ref()
        .is_some_and(|k| k.attnums.contains(&attnum))
}

fn in_distribution_key(rel: &RelationDef, attnum: AttrNumber) -> bool {
    rel.distribution
        .as_ref()
        .and_then(|d| d.column.as_ref())
        .is_some_and(|(a, _)| *a == attnum)
}

fn check_collation(type_name: &TypeName, collation: Option<&str>) -> Result<(), AlterError> {
    if collation.is_some() && !type_name.ty.is_collatable() {
        return Err(AlterError::DatatypeMismatch {
            message: format!("collations are not supported by type {}", type_name.display()),
        });
    }
    Ok(())
}

fn domain_has_constraints(ctx: &AlterContext<'_>, type_name: &TypeName) -> bool {
    match &type_name.ty {
        ColumnType::Domain(name) => ctx
            .catalog
            .domains
            .get(name.as_str())
            .is_some_and(|d| d.has_constraints()),
        _ => false,
    }
}

/// Binds a default expression for `column`; defaults may not read columns.
fn bind_default(
    ctx: &AlterContext<'_>,
    rel: &RelationDef,
    column: &str,
    type_name: &TypeName,
    raw: &RawExpr,
) -> Result<BoundExpr, AlterError> {
    if !raw.column_names().is_empty() {
        return Err(AlterError::table_def(
            "cannot use column reference in DEFAULT expression",
        ));
    }
    Analyzer::new(rel, &*ctx.catalog).analyze_for_column(raw, column, type_name, "default expression")
}

pub fn exec_add_column(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    column: &ColumnDef,
    if_not_exists: bool,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(t.relid)?.clone();

    if let Some(existing) = rel.attribute_by_name(&column.name) {
        if t.recursing {
            return merge_child_column(ctx, queue, t, &rel, existing.attnum, column);
        }
        if if_not_exists {
            ctx.notice(format!(
                "column \"{}\" of relation \"{}\" already exists, skipping",
                column.name, rel.name
            ));
            return Ok(None);
        }
        return Err(AlterError::DuplicateColumn {
            relation: rel.name.to_string(),
            column: column.name.clone(),
        });
    }
    if rel.has_oids && column.name == "oid" {
        return Err(AlterError::DuplicateColumn {
            relation: rel.name.to_string(),
            column: column.name.clone(),
        });
    }

    let children = ctx.catalog.children(t.relid);
    if !t.recurse && !t.recursing && !children.is_empty() {
        return Err(AlterError::table_def(format!(
            "column must be added to child tables too (\"{}\")",
            column.name
        )));
    }
    if rel.attributes.len() >= ctx.config.max_columns {
        return Err(AlterError::TooManyColumns {
            max: ctx.config.max_columns,
        });
    }
    base_type(&column.type_name, &*ctx.catalog)?;
    check_collation(&column.type_name, column.collation.as_deref())?;

    let attnum = rel.next_attnum();
    let mut att = AttributeDef::new(attnum, &column.name, column.type_name.clone());
    if let Some(collation) = &column.collation {
        att.collation = Some(collation.as_str().into());
    }
    att.not_null = column.not_null;
    att.is_local = !t.recursing;
    att.inhcount = i32::from(t.recursing);

    let default = match &column.default {
        Some(raw) => Some(bind_default(ctx, &rel, &column.name, &column.type_name, raw)?),
        None => None,
    };
    att.default = default.clone();

    if rel.kind.has_storage() {
        match default {
            Some(expr)
                if ctx.config.fast_default_enabled
                    && expr.is_row_independent()
                    && !expr.contains_domain_check() =>
            {
                let value = compile(&expr)?.eval(&[])?;
                if !value.is_null() {
                    att.missing_value = Some(value);
                }
            }
            Some(expr) => {
                let entry = queue.entry_mut(t.entry);
                entry.new_values.push(NewColumnValue { attnum, expr });
                entry.rewrite.insert(RewriteReason::DEFAULT_VALUE);
            }
            None if domain_has_constraints(ctx, &column.type_name) => {
                // Existing rows get a null the domain must accept.
                let null = BoundExpr::constant(Value::Null, TypeName::new(ColumnType::Text));
                let checked = Analyzer::new(&rel, &*ctx.catalog)
                    .coerce(
                        null,
                        &column.type_name,
                        CoercionContext::Assignment,
                        CoercionForm::Implicit,
                    )?
                    .ok_or_else(|| AlterError::internal("domain coercion of null failed"))?;
                let entry = queue.entry_mut(t.entry);
                entry.new_values.push(NewColumnValue {
                    attnum,
                    expr: checked,
                });
                entry.rewrite.insert(RewriteReason::DEFAULT_VALUE);
            }
            None => {}
        }
        if att.not_null && att.missing_value.is_none() {
            queue.entry_mut(t.entry).verify_new_notnull = true;
        }
    }

    debug!(
        relation = %rel.name,
        column = %column.name,
        attnum,
        fast_default = att.missing_value.is_some(),
        "adding column"
    );
    ctx.catalog.relation_mut(t.relid)?.attributes.push(att);
    ctx.invalidate(t.relid);

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
        exec_add_column(ctx, queue, child_target, column, if_not_exists)?;
    }
    Ok(Some(ObjectAddress::column(t.relid, attnum)))
}

/// A child that already has the column: the definitions must agree and
/// the column gains one more inheritance.
fn merge_child_column(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    rel: &RelationDef,
    attnum: AttrNumber,
    column: &ColumnDef,
) -> Result<Option<ObjectAddress>, AlterError> {
    let existing = rel
        .attribute(attnum)
        .ok_or_else(|| AlterError::internal("merged column vanished"))?;
    if existing.type_name != column.type_name {
        return Err(AlterError::DatatypeMismatch {
            message: format!(
                "child table \"{}\" has different type for column \"{}\"",
                rel.name, column.name
            ),
        });
    }
    if let Some(collation) = &column.collation
        && existing.collation.as_deref() != Some(collation.as_str())
    {
        return Err(AlterError::CollationMismatch {
            message: format!(
                "child table \"{}\" has different collation for column \"{}\"",
                rel.name, column.name
            ),
        });
    }
    ctx.notice(format!(
        "merging definition of column \"{}\" for child \"{}\"",
        column.name, rel.name
    ));
    let needs_not_null = column.not_null && !existing.not_null;
    let att = attribute_mut(ctx.catalog.relation_mut(t.relid)?, attnum)?;
    att.inhcount += 1;
    if needs_not_null {
        att.not_null = true;
        if rel.kind.has_storage() {
            queue.entry_mut(t.entry).verify_new_notnull = true;
        }
    }
    Ok(None)
}

pub fn exec_drop_column(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    column: &str,
    behavior: DropBehavior,
    missing_ok: bool,
) -> Result<Option<ObjectAddress>, AlterError> {
    let mut doomed = ObjectAddresses::new();
    let address = collect_drop_column(ctx, queue, t, column, missing_ok, &mut doomed)?;
    if doomed.is_empty() {
        return Ok(address);
    }
    let report = perform_deletion(ctx.catalog, &doomed, behavior)?;
    for storage in report.dropped_storage {
        ctx.session.schedule_unlink(storage, true);
    }
    Ok(address)
}

fn collect_drop_column(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    column: &str,
    missing_ok: bool,
    doomed: &mut ObjectAddresses,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(t.relid)?.clone();
    let Some(att) = rel.attribute_by_name(column) else {
        if missing_ok {
            ctx.notice(format!(
                "column \"{column}\" of relation \"{}\" does not exist, skipping",
                rel.name
            ));
            return Ok(None);
        }
        return Err(AlterError::UndefinedColumn {
            relation: rel.name.to_string(),
            column: column.to_string(),
        });
    };
    let attnum = att.attnum;
    if attnum <= 0 {
        return Err(AlterError::unsupported(format!(
            "cannot drop system column \"{column}\""
        )));
    }
    if att.inhcount > 0 && !t.recursing {
        return Err(AlterError::table_def(format!(
            "cannot drop inherited column \"{column}\""
        )));
    }
    if in_partition_key(&rel, attnum) {
        return Err(AlterError::table_def(format!(
            "cannot drop column named in partition key \"{column}\""
        )));
    }
    if in_distribution_key(&rel, attnum) {
        return Err(AlterError::table_def(format!(
            "cannot drop column named in distribution key \"{column}\""
        )));
    }

    let children = ctx.catalog.children(t.relid);
    if !children.is_empty() && !t.recurse && rel.is_partitioned() {
        return Err(AlterError::OnlyNotAllowed {
            message: "cannot drop column from only the partitioned table when partitions exist"
                .into(),
        });
    }
    for child in children {
        ctx.lock_relation(child, t.lockmode);
        let child_rel = ctx.catalog.relation(child)?;
        let Some(catt) = child_rel.attribute_by_name(column) else {
            return Err(AlterError::internal(format!(
                "child table \"{}\" is missing inherited column \"{column}\"",
                child_rel.name
            )));
        };
        let (cattnum, inhcount, is_local) = (catt.attnum, catt.inhcount, catt.is_local);
        if t.recurse && inhcount == 1 && !is_local {
            let entry = queue.find_or_create(ctx.catalog, child)?;
            let child_target = ExecTarget {
                entry,
                relid: child,
                recurse: true,
                recursing: true,
                lockmode: t.lockmode,
            };
            collect_drop_column(ctx, queue, child_target, column, false, doomed)?;
        } else {
            let catt = attribute_mut(ctx.catalog.relation_mut(child)?, cattnum)?;
            catt.inhcount -= 1;
            // Under ONLY the children keep the column as their own.
            if !t.recurse {
                catt.is_local = true;
            }
        }
    }

    if rel.has_oids && column == "oid" {
        return Ok(None);
    }
    let address = ObjectAddress::column(t.relid, attnum);
    doomed.add(address);
    debug!(relation = %rel.name, column, "dropping column");
    Ok(Some(address))
}

/// Phase 1 for ALTER COLUMN TYPE on one relation: checks the change and
/// records the per-row conversion.
pub fn prep_alter_column_type(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    entry: usize,
    cmd: &Subcommand,
    recurse: bool,
    rctx: RecursionContext,
) -> Result<(), AlterError> {
    let Subcommand::AlterColumnType {
        column,
        type_name,
        using,
        collation,
    } = cmd
    else {
        return Err(AlterError::internal("expected ALTER COLUMN TYPE"));
    };
    let relid = queue.entry(entry).relid;
    let rel = ctx.catalog.relation(relid)?.clone();
    if rel.of_type.is_some() && rctx.top_level {
        return Err(AlterError::wrong_kind("cannot alter column type of typed table"));
    }
    let att = column_of(&rel, column)?;
    if att.attnum <= 0 {
        return Err(AlterError::unsupported(format!(
            "cannot alter system column \"{column}\""
        )));
    }
    if att.inhcount > rctx.expected_parents {
        return Err(AlterError::table_def(format!(
            "cannot alter inherited column \"{column}\""
        )));
    }
    if in_partition_key(&rel, att.attnum) {
        return Err(AlterError::table_def(format!(
            "cannot alter type of column named in partition key \"{column}\""
        )));
    }
    if in_distribution_key(&rel, att.attnum) {
        return Err(AlterError::table_def(format!(
            "cannot alter type of column named in distribution key \"{column}\""
        )));
    }
    base_type(type_name, &*ctx.catalog)?;
    check_collation(type_name, collation.as_deref())?;

    let analyzer = Analyzer::new(&rel, &*ctx.catalog);
    let source = match using {
        Some(raw) => {
            if !rel.kind.has_storage() {
                return Err(AlterError::unsupported(format!(
                    "ALTER TYPE USING is only supported on plain tables (\"{}\")",
                    rel.name
                )));
            }
            analyzer.analyze(raw)?
        }
        None => BoundExpr::var(att.attnum, att.type_name.clone()),
    };
    let from = source.ty();
    let converted = analyzer
        .coerce(source, type_name, CoercionContext::Assignment, CoercionForm::Implicit)?
        .ok_or_else(|| AlterError::CannotCoerce {
            column: column.clone(),
            from: from.display(),
            to: type_name.display(),
            hint: using.is_none().then(|| {
                format!(
                    "You might need to specify \"USING {column}::{}\".",
                    type_name.display()
                )
            }),
        })?;

    if rel.kind.has_storage() {
        let e = queue.entry_mut(entry);
        if e.new_values.iter().any(|v| v.attnum == att.attnum) {
            return Err(AlterError::table_def(format!(
                "cannot alter type of column \"{column}\" twice"
            )));
        }
        if !converted.is_relabeled_var(att.attnum) {
            e.rewrite.insert(RewriteReason::COLUMN_TYPE);
        }
        e.new_values.push(NewColumnValue {
            attnum: att.attnum,
            expr: converted,
        });
    }

    if !recurse && rctx.top_level && ctx.catalog.has_subclass(relid) {
        return Err(AlterError::table_def(format!(
            "type of inherited column \"{column}\" must be changed in child tables too"
        )));
    }
    Ok(())
}

/// Phase 2 for ALTER COLUMN TYPE: updates the attribute and remembers every
/// index and constraint built on the old type for rebuilding.
pub fn exec_alter_column_type(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    column: &str,
    type_name: &TypeName,
    collation: Option<&str>,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(t.relid)?.clone();
    let att = column_of(&rel, column)?.clone();

    for edge in dependents_of(ctx.catalog, ObjectAddress::column(t.relid, att.attnum)) {
        let dep = edge.dependent;
        match dep.class {
            ObjectClass::Relation if dep.sub_id == 0 && ctx.catalog.indexes.contains_key(&dep.oid) => {
                let idx = ctx.catalog.index(dep.oid)?.clone();
                match idx.constraint {
                    Some(con) => remember_constraint(ctx, queue, t.entry, con)?,
                    None => remember_index(ctx, queue, t.entry, dep.oid)?,
                }
            }
            ObjectClass::Constraint => remember_constraint(ctx, queue, t.entry, dep.oid)?,
            ObjectClass::Relation if dep.sub_id != 0 => {}
            _ => {
                return Err(AlterError::unsupported(format!(
                    "cannot alter type of a column used by {}",
                    dep.describe(ctx.catalog)
                )));
            }
        }
    }

    let default = match &att.default {
        Some(expr) => Some(
            Analyzer::new(&rel, &*ctx.catalog)
                .coerce(
                    expr.clone(),
                    type_name,
                    CoercionContext::Assignment,
                    CoercionForm::Implicit,
                )?
                .ok_or_else(|| AlterError::DatatypeMismatch {
                    message: format!(
                        "default for column \"{column}\" cannot be cast automatically to type {}",
                        type_name.display()
                    ),
                })?,
        ),
        None => None,
    };
    let missing = match &att.missing_value {
        Some(v) => Some(convert_value(v, type_name)?),
        None => None,
    };
    let new_collation: Option<CompactString> = match collation {
        Some(c) => Some(c.into()),
        None if type_name.ty.is_collatable() => Some(
            att.collation
                .clone()
                .unwrap_or_else(|| CompactString::from("default")),
        ),
        None => None,
    };

    let target = attribute_mut(ctx.catalog.relation_mut(t.relid)?, att.attnum)?;
    target.type_name = type_name.clone();
    target.collation = new_collation;
    target.default = default;
    target.missing_value = missing;
    if target.type_name.ty.fixed_width().is_some() {
        target.storage = AttributeStorage::Plain;
    } else if target.storage == AttributeStorage::Plain {
        target.storage = AttributeStorage::Extended;
    }
    debug!(
        relation = %rel.name,
        column,
        from = %att.type_name.display(),
        to = %type_name.display(),
        "altered column type"
    );
    Ok(Some(ObjectAddress::column(t.relid, att.attnum)))
}

fn remember_index(
    ctx: &AlterContext<'_>,
    queue: &mut WorkQueue,
    entry: usize,
    index: Oid,
) -> Result<(), AlterError> {
    let e = queue.entry(entry);
    if e.changed_index_ids.contains(&index) {
        return Ok(());
    }
    let idx = ctx.catalog.index(index)?;
    let spec = index_spec_from_def(ctx.catalog, idx)?;
    let e = queue.entry_mut(entry);
    e.changed_index_ids.push(index);
    e.changed_index_defs.push(spec);
    Ok(())
}

fn remember_constraint(
    ctx: &AlterContext<'_>,
    queue: &mut WorkQueue,
    entry: usize,
    oid: Oid,
) -> Result<(), AlterError> {
    let con = ctx.catalog.constraint(oid)?;
    // Index-backed constraints come back through their index.
    if matches!(con.kind, ConstraintKind::PrimaryKey | ConstraintKind::Unique)
        && let Some(index) = con.index
    {
        return remember_index(ctx, queue, entry, index);
    }
    let spec = constraint_spec_from_def(ctx.catalog, con)?;
    queue.entry_mut(entry).add_changed_constraint(oid, spec);
    Ok(())
}

pub fn exec_column_default(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    column: &str,
    default: Option<&RawExpr>,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(relid)?.clone();
    let att = user_column(&rel, column)?;
    let bound = match default {
        Some(raw) => Some(bind_default(ctx, &rel, column, &att.type_name, raw)?),
        None => None,
    };
    let attnum = att.attnum;
    attribute_mut(ctx.catalog.relation_mut(relid)?, attnum)?.default = bound;
    Ok(Some(ObjectAddress::column(relid, attnum)))
}

pub fn exec_drop_not_null(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    column: &str,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(relid)?.clone();
    let att = user_column(&rel, column)?;
    let in_pkey = ctx
        .catalog
        .indexes_of(relid)
        .iter()
        .any(|i| i.primary && i.attnums.contains(&att.attnum));
    if in_pkey {
        return Err(AlterError::table_def(format!(
            "column \"{column}\" is in a primary key"
        )));
    }
    if rel.is_partition
        && let Some(parent) = ctx.catalog.partition_parent(relid)
        && ctx
            .catalog
            .relation(parent)?
            .attribute_by_name(column)
            .is_some_and(|a| a.not_null)
    {
        return Err(AlterError::table_def(format!(
            "column \"{column}\" is marked NOT NULL in parent table"
        )));
    }
    if !att.not_null {
        return Ok(None);
    }
    let attnum = att.attnum;
    attribute_mut(ctx.catalog.relation_mut(relid)?, attnum)?.not_null = false;
    Ok(Some(ObjectAddress::column(relid, attnum)))
}

pub fn exec_set_not_null(
    ctx: &mut AlterContext<'_>,
    queue: &mut WorkQueue,
    t: ExecTarget,
    column: &str,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(t.relid)?.clone();
    let att = user_column(&rel, column)?;
    if att.not_null {
        return Ok(None);
    }
    let attnum = att.attnum;
    let ty = att.type_name.clone();
    attribute_mut(ctx.catalog.relation_mut(t.relid)?, attnum)?.not_null = true;

    if rel.kind.has_storage() && !not_null_implied(ctx, &rel, attnum, ty) {
        queue.entry_mut(t.entry).verify_new_notnull = true;
    }
    Ok(Some(ObjectAddress::column(t.relid, attnum)))
}

/// Whether validated CHECK constraints already rule out nulls in `attnum`.
fn not_null_implied(
    ctx: &mut AlterContext<'_>,
    rel: &RelationDef,
    attnum: AttrNumber,
    ty: TypeName,
) -> bool {
    if !ctx.config.constraint_implication_enabled {
        return false;
    }
    let premises: Vec<BoundExpr> = ctx
        .catalog
        .constraints_of(rel.oid)
        .into_iter()
        .filter(|c| c.kind == ConstraintKind::Check && c.validated)
        .filter_map(|c| c.expr.clone())
        .collect();
    if premises.is_empty() {
        return false;
    }
    let goal = BoundExpr::not_null(BoundExpr::var(attnum, ty));
    if !ctx.prover.implies(&premises, &goal) {
        return false;
    }
    let column = rel
        .attribute(attnum)
        .map(|a| a.name.to_string())
        .unwrap_or_default();
    info!(
        relation = %rel.name,
        column = %column,
        prover = ctx.prover.name(),
        "existing constraints on column are sufficient to prove that it does not contain nulls"
    );
    ctx.report
        .skipped_validations
        .push(format!("{}.{column} NOT NULL", rel.name));
    true
}

pub fn exec_set_statistics(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    column: &str,
    target: i32,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(relid)?.clone();
    if rel.kind.is_index() {
        return Err(AlterError::unsupported(format!(
            "cannot alter statistics on non-expression column \"{column}\" of index \"{}\"",
            rel.name
        )));
    }
    if target < -1 {
        return Err(AlterError::InvalidParameterValue {
            message: format!("statistics target {target} is too low"),
        });
    }
    let target = if target > MAX_STATISTICS_TARGET {
        ctx.notice(format!("lowering statistics target to {MAX_STATISTICS_TARGET}"));
        MAX_STATISTICS_TARGET
    } else {
        target
    };
    let attnum = user_column(&rel, column)?.attnum;
    attribute_mut(ctx.catalog.relation_mut(relid)?, attnum)?.stats_target = target;
    Ok(Some(ObjectAddress::column(relid, attnum)))
}

pub fn exec_set_storage(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    column: &str,
    storage: AttributeStorage,
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(relid)?.clone();
    let att = user_column(&rel, column)?;
    if storage != AttributeStorage::Plain && att.type_name.ty.fixed_width().is_some() {
        return Err(AlterError::DatatypeMismatch {
            message: format!(
                "column data type {} can only have storage PLAIN",
                att.type_name.display()
            ),
        });
    }
    let attnum = att.attnum;
    attribute_mut(ctx.catalog.relation_mut(relid)?, attnum)?.storage = storage;
    Ok(Some(ObjectAddress::column(relid, attnum)))
}

pub fn exec_set_attribute_options(
    ctx: &mut AlterContext<'_>,
    relid: Oid,
    column: &str,
    options: &[(String, Option<String>)],
) -> Result<Option<ObjectAddress>, AlterError> {
    let rel = ctx.catalog.relation(relid)?.clone();
    let attnum = user_column(&rel, column)?.attnum;
    for (name, value) in options {
        if !ATTRIBUTE_OPTIONS.contains(&name.as_str()) {
            return Err(AlterError::InvalidParameterValue {
                message: format!("unrecognized parameter \"{name}\""),
            });
        }
        if let Some(value) = value {
            let parsed: f64 = value.parse().map_err(|_| AlterError::InvalidParameterValue {
                message: format!("invalid value for floating point option \"{name}\": {value}"),
            })?;
            if parsed < -1.0 {
                return Err(AlterError::InvalidParameterValue {
                    message: format!("value {value} out of bounds for option \"{name}\""),
                });
            }
        }
    }
    let att = attribute_mut(ctx.catalog.relation_mut(relid)?, attnum)?;
    for (name, value) in options {
        match value {
            Some(v) => {
                att.options.insert(name.clone(), v.clone());
            }
            None => {
                att.options.remove(name);
            }
        }
    }
    Ok(Some(ObjectAddress::column(relid, attnum)))
}
