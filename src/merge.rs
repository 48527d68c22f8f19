//! Reconciling a child relation's shape with its parents: column merging
//! for CREATE TABLE ... INHERITS, and compatibility checks plus inheritance
//! counters for INHERIT and ATTACH PARTITION.

use crate::catalog::Catalog;
use crate::catalog::schema::{AttributeDef, ConstraintKind, RelationDef};
use crate::catalog::types::{AttrNumber, Oid};
use crate::config::EngineConfig;
use crate::error::AlterError;
use crate::expr::BoundExpr;
use tracing::info;

/// Merges inherited columns from `parents` (in order) with `local`
/// definitions. Inherited columns come first; a local column whose name
/// matches an inherited one is folded into it.
pub fn merge_attributes(
    catalog: &Catalog,
    config: &EngineConfig,
    relation: &str,
    local: Vec<AttributeDef>,
    parents: &[Oid],
) -> Result<Vec<AttributeDef>, AlterError> {
    let mut merged: Vec<AttributeDef> = Vec::new();
    // Parent defaults that disagree; a local default resolves the clash.
    let mut conflicting: Vec<String> = Vec::new();

    for parent_oid in parents {
        let parent = catalog.relation(*parent_oid)?;
        for patt in parent.live_attributes() {
            let default = match &patt.default {
                Some(d) if d.attnums().is_empty() => Some(d.clone()),
                Some(_) => {
                    return Err(AlterError::unsupported(format!(
                        "cannot inherit default of column \"{}\" that references other columns",
                        patt.name
                    )));
                }
                None => None,
            };
            if let Some(existing) = merged.iter_mut().find(|a| a.name == patt.name) {
                info!(column = %patt.name, "merging multiple inherited definitions of column");
                if existing.type_name != patt.type_name {
                    return Err(AlterError::DatatypeMismatch {
                        message: format!(
                            "inherited column \"{}\" has a type conflict: {} versus {}",
                            patt.name,
                            existing.type_name.display(),
                            patt.type_name.display()
                        ),
                    });
                }
                if existing.collation != patt.collation {
                    return Err(AlterError::CollationMismatch {
                        message: format!("inherited column \"{}\" has a collation conflict", patt.name),
                    });
                }
                existing.inhcount += 1;
                existing.not_null |= patt.not_null;
                match (&existing.default, default) {
                    (None, d) => existing.default = d,
                    (Some(a), Some(b)) if *a != b => conflicting.push(patt.name.to_string()),
                    _ => {}
                }
                continue;
            }
            let mut att = AttributeDef::new(0, &patt.name, patt.type_name.clone());
            att.collation = patt.collation.clone();
            att.not_null = patt.not_null;
            att.default = default;
            att.storage = patt.storage;
            att.inhcount = 1;
            att.is_local = false;
            merged.push(att);
        }
    }

    for (i, att) in local.iter().enumerate() {
        if local[..i].iter().any(|a| a.name == att.name) {
            return Err(AlterError::DuplicateColumn {
                relation: relation.to_string(),
                column: att.name.to_string(),
            });
        }
    }
    for att in local {
        if let Some(existing) = merged.iter_mut().find(|a| a.name == att.name) {
            info!(column = %att.name, "merging column with inherited definition");
            if existing.type_name != att.type_name {
                return Err(AlterError::DatatypeMismatch {
                    message: format!(
                        "column \"{}\" has a type conflict: {} versus {}",
                        att.name,
                        existing.type_name.display(),
                        att.type_name.display()
                    ),
                });
            }
            if att.collation.is_some() && existing.collation != att.collation {
                return Err(AlterError::CollationMismatch {
                    message: format!("column \"{}\" has a collation conflict", att.name),
                });
            }
            existing.is_local = true;
            existing.not_null |= att.not_null;
            if att.default.is_some() {
                existing.default = att.default;
                conflicting.retain(|c| *c != att.name);
            }
            continue;
        }
        merged.push(att);
    }

    if let Some(column) = conflicting.into_iter().next() {
        return Err(AlterError::ConflictingDefaults { column });
    }
    if merged.len() > config.max_columns {
        return Err(AlterError::TooManyColumns {
            max: config.max_columns,
        });
    }
    for (i, att) in merged.iter_mut().enumerate() {
        att.attnum = (i + 1) as AttrNumber;
    }
    Ok(merged)
}

/// Checks that every parent column exists compatibly in `child` and bumps
/// the child's inheritance counters. Partitions additionally lose their
/// local flags and may not carry extra columns.
pub fn merge_attributes_into_existing(
    catalog: &mut Catalog,
    config: &EngineConfig,
    child: Oid,
    parent: Oid,
) -> Result<(), AlterError> {
    let parent_rel = catalog.relation(parent)?.clone();
    let child_rel = catalog.relation(child)?.clone();
    let as_partition = parent_rel.is_partitioned();

    if parent_rel.has_oids && !child_rel.has_oids {
        return Err(AlterError::table_def(format!(
            "table \"{}\" without OIDs cannot inherit from table \"{}\" with OIDs",
            child_rel.name, parent_rel.name
        )));
    }
    if as_partition && child_rel.has_oids && !parent_rel.has_oids {
        return Err(AlterError::table_def(format!(
            "cannot attach table \"{}\" with OIDs as partition of table \"{}\" without OIDs",
            child_rel.name, parent_rel.name
        )));
    }

    if as_partition {
        for catt in child_rel.live_attributes() {
            if parent_rel.attribute_by_name(&catt.name).is_none() {
                return Err(AlterError::DatatypeMismatch {
                    message: format!(
                        "table \"{}\" contains column \"{}\" not found in parent \"{}\"",
                        child_rel.name, catt.name, parent_rel.name
                    ),
                });
            }
        }
    }

    let mut updates: Vec<(AttrNumber, bool)> = Vec::new();
    for patt in parent_rel.live_attributes() {
        let catt = child_rel.attribute_by_name(&patt.name).ok_or_else(|| {
            AlterError::DatatypeMismatch {
                message: format!("child table is missing column \"{}\"", patt.name),
            }
        })?;
        if catt.type_name != patt.type_name {
            return Err(AlterError::DatatypeMismatch {
                message: format!(
                    "child table \"{}\" has different type for column \"{}\"",
                    child_rel.name, patt.name
                ),
            });
        }
        if catt.collation != patt.collation {
            return Err(AlterError::CollationMismatch {
                message: format!(
                    "child table \"{}\" has different collation for column \"{}\"",
                    child_rel.name, patt.name
                ),
            });
        }
        if patt.not_null && !catt.not_null {
            return Err(AlterError::DatatypeMismatch {
                message: format!(
                    "column \"{}\" in child table must be marked NOT NULL",
                    patt.name
                ),
            });
        }
        if config.requires_positional_match() && catt.attnum != patt.attnum {
            return Err(AlterError::table_def(format!(
                "table \"{}\" contains column \"{}\" at position {}, but parent \"{}\" has it at position {}",
                child_rel.name, patt.name, catt.attnum, parent_rel.name, patt.attnum
            )));
        }
        updates.push((catt.attnum, as_partition));
    }
    if config.requires_positional_match() && child_rel.attributes.len() != parent_rel.attributes.len()
    {
        return Err(AlterError::table_def(format!(
            "table \"{}\" has a different number of columns than parent \"{}\"",
            child_rel.name, parent_rel.name
        )));
    }

    let rel = catalog.relation_mut(child)?;
    for (attnum, partition) in updates {
        if let Some(att) = rel.attribute_mut(attnum) {
            att.inhcount += 1;
            if partition {
                att.is_local = false;
            }
        }
    }
    Ok(())
}

/// Every inheritable CHECK constraint of `parent` must exist on `child`
/// with the same definition.
pub fn merge_constraints_into_existing(
    catalog: &mut Catalog,
    child: Oid,
    parent: Oid,
) -> Result<(), AlterError> {
    let parent_rel = catalog.relation(parent)?.clone();
    let child_rel = catalog.relation(child)?.clone();
    let as_partition = parent_rel.is_partitioned();
    let mut bumped = Vec::new();
    for pcon in catalog.constraints_of(parent) {
        if pcon.kind != ConstraintKind::Check || pcon.no_inherit {
            continue;
        }
        let ccon = catalog
            .constraint_by_name(child, &pcon.name)
            .filter(|c| c.kind == ConstraintKind::Check)
            .ok_or_else(|| AlterError::DatatypeMismatch {
                message: format!("child table is missing constraint \"{}\"", pcon.name),
            })?;
        let same = match (&pcon.expr, &ccon.expr) {
            (Some(p), Some(c)) => p.canonical(&parent_rel) == c.canonical(&child_rel),
            (None, None) => true,
            _ => false,
        };
        if !same {
            return Err(AlterError::DatatypeMismatch {
                message: format!(
                    "child table \"{}\" has different definition for check constraint \"{}\"",
                    child_rel.name, pcon.name
                ),
            });
        }
        if ccon.no_inherit {
            return Err(AlterError::DatatypeMismatch {
                message: format!(
                    "constraint \"{}\" conflicts with non-inherited constraint on child table \"{}\"",
                    pcon.name, child_rel.name
                ),
            });
        }
        bumped.push(ccon.oid);
    }
    for oid in bumped {
        let con = catalog.constraint_mut(oid)?;
        con.inhcount += 1;
        if as_partition {
            con.is_local = false;
        }
    }
    Ok(())
}

/// Under a distributed deployment, a child must be placed exactly like its
/// parent.
pub fn merge_distribution_into_existing(
    config: &EngineConfig,
    child: &RelationDef,
    parent: &RelationDef,
) -> Result<(), AlterError> {
    if !config.distribution_enabled {
        return Ok(());
    }
    match (&child.distribution, &parent.distribution) {
        (None, None) => Ok(()),
        (Some(c), Some(p)) => {
            if c.strategy != p.strategy {
                return Err(AlterError::table_def(format!(
                    "table \"{}\" is distributed by {} but parent \"{}\" is distributed by {}",
                    child.name,
                    c.strategy.name(),
                    parent.name,
                    p.strategy.name()
                )));
            }
            let cname = c.column.as_ref().map(|(_, n)| n.as_str());
            let pname = p.column.as_ref().map(|(_, n)| n.as_str());
            let positions_differ = config.requires_positional_match()
                && c.column.as_ref().map(|(a, _)| *a) != p.column.as_ref().map(|(a, _)| *a);
            if cname != pname || positions_differ {
                return Err(AlterError::table_def(format!(
                    "distribution column of table \"{}\" ({}) does not match parent \"{}\" ({})",
                    child.name,
                    cname.unwrap_or("none"),
                    parent.name,
                    pname.unwrap_or("none")
                )));
            }
            let mut cn = c.nodes.clone();
            let mut pn = p.nodes.clone();
            cn.sort();
            pn.sort();
            if cn != pn {
                return Err(AlterError::table_def(format!(
                    "table \"{}\" is located on different nodes than parent \"{}\"",
                    child.name, parent.name
                )));
            }
            Ok(())
        }
        _ => Err(AlterError::table_def(format!(
            "table \"{}\" and parent \"{}\" have different distribution",
            child.name, parent.name
        ))),
    }
}

/// Reverses the counters bumped when `child` started inheriting from
/// `parent`. Columns and constraints no longer inherited from anywhere
/// become local.
pub fn remove_inheritance_counts(
    catalog: &mut Catalog,
    child: Oid,
    parent: Oid,
) -> Result<(), AlterError> {
    let parent_rel = catalog.relation(parent)?.clone();
    let names: Vec<_> = parent_rel.live_attributes().map(|a| a.name.clone()).collect();
    let rel = catalog.relation_mut(child)?;
    for att in rel.attributes.iter_mut().filter(|a| !a.is_dropped) {
        if names.contains(&att.name) && att.inhcount > 0 {
            att.inhcount -= 1;
            if att.inhcount == 0 {
                att.is_local = true;
            }
        }
    }
    let inherited: Vec<_> = catalog
        .constraints_of(parent)
        .into_iter()
        .filter(|c| c.kind == ConstraintKind::Check && !c.no_inherit)
        .map(|c| c.name.clone())
        .collect();
    let targets: Vec<Oid> = catalog
        .constraints_of(child)
        .into_iter()
        .filter(|c| inherited.contains(&c.name) && c.inhcount > 0)
        .map(|c| c.oid)
        .collect();
    for oid in targets {
        let con = catalog.constraint_mut(oid)?;
        con.inhcount -= 1;
        if con.inhcount == 0 {
            con.is_local = true;
        }
    }
    Ok(())
}

/// Copies inheritable CHECK constraints of `parents` onto a freshly created
/// child, rebinding them to the child's attribute numbers.
pub fn inherited_checks(
    catalog: &Catalog,
    child: &RelationDef,
    parents: &[Oid],
) -> Result<Vec<(String, BoundExpr)>, AlterError> {
    let mut out: Vec<(String, BoundExpr)> = Vec::new();
    for parent in parents {
        let parent_rel = catalog.relation(*parent)?;
        for con in catalog.constraints_of(*parent) {
            if con.kind != ConstraintKind::Check || con.no_inherit {
                continue;
            }
            let Some(expr) = &con.expr else { continue };
            let mapped = expr.map_attnums(&|attnum: AttrNumber| {
                let name = &parent_rel.attribute(attnum)?.name;
                child.attribute_by_name(name).map(|a| a.attnum)
            })?;
            if let Some((_, existing)) = out.iter().find(|(n, _)| n == con.name.as_str()) {
                if existing.canonical(child) != mapped.canonical(child) {
                    return Err(AlterError::DuplicateObject {
                        message: format!(
                            "check constraint name \"{}\" appears multiple times but with different expressions",
                            con.name
                        ),
                    });
                }
                continue;
            }
            out.push((con.name.to_string(), mapped));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::RelKind;
    use crate::catalog::types::{ColumnType, TypeName, Value};

    fn table(catalog: &mut Catalog, name: &str, cols: &[(&str, ColumnType)]) -> Oid {
        let oid = catalog.alloc_oid();
        let mut rel = RelationDef::new(oid, name, "public", RelKind::Table, "postgres");
        for (i, (col, ty)) in cols.iter().enumerate() {
            rel.attributes.push(AttributeDef::new(
                (i + 1) as AttrNumber,
                col,
                TypeName::new(ty.clone()),
            ));
        }
        catalog.insert_relation(rel);
        oid
    }

    #[test]
    fn conflicting_inherited_defaults_need_a_local_default() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let p1 = table(&mut catalog, "p1", &[("a", ColumnType::Integer)]);
        let p2 = table(&mut catalog, "p2", &[("a", ColumnType::Integer)]);
        let int = TypeName::new(ColumnType::Integer);
        catalog.relation_mut(p1).expect("p1").attributes[0].default =
            Some(BoundExpr::constant(Value::Integer(1), int.clone()));
        catalog.relation_mut(p2).expect("p2").attributes[0].default =
            Some(BoundExpr::constant(Value::Integer(2), int.clone()));
        let config = EngineConfig::default();
        let err = merge_attributes(&catalog, &config, "c", Vec::new(), &[p1, p2]).unwrap_err();
        assert!(matches!(err, AlterError::ConflictingDefaults { .. }));
        assert_eq!(
            err.hint(),
            Some("To resolve the conflict, specify a default explicitly.")
        );

        let mut local = AttributeDef::new(0, "a", int.clone());
        local.default = Some(BoundExpr::constant(Value::Integer(3), int));
        let merged = merge_attributes(&catalog, &config, "c", vec![local], &[p1, p2]).expect("merge");
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].inhcount, 2);
        assert!(merged[0].is_local);
    }

    #[test]
    fn existing_child_must_match_types() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let parent = table(&mut catalog, "p", &[("a", ColumnType::Integer)]);
        let child = table(&mut catalog, "c", &[("a", ColumnType::Text)]);
        let err = merge_attributes_into_existing(&mut catalog, &EngineConfig::default(), child, parent)
            .unwrap_err();
        assert!(err.to_string().contains("different type for column \"a\""));
    }

    #[test]
    fn positional_profile_rejects_reordered_columns() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let parent = table(&mut catalog, "p", &[("a", ColumnType::Integer), ("b", ColumnType::Text)]);
        let child = table(&mut catalog, "c", &[("b", ColumnType::Text), ("a", ColumnType::Integer)]);
        assert!(
            merge_attributes_into_existing(&mut catalog, &EngineConfig::default(), child, parent)
                .is_ok()
        );
        let err = merge_attributes_into_existing(
            &mut catalog,
            &EngineConfig::distributed(&["n1"]),
            child,
            parent,
        )
        .unwrap_err();
        assert!(err.to_string().contains("at position"));
    }

    #[test]
    fn counters_roll_back_on_removal() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let parent = table(&mut catalog, "p", &[("a", ColumnType::Integer)]);
        let child = table(&mut catalog, "c", &[("a", ColumnType::Integer)]);
        merge_attributes_into_existing(&mut catalog, &EngineConfig::default(), child, parent)
            .expect("merge");
        assert_eq!(catalog.relation(child).expect("c").attributes[0].inhcount, 1);
        remove_inheritance_counts(&mut catalog, child, parent).expect("remove");
        let att = &catalog.relation(child).expect("c").attributes[0];
        assert_eq!(att.inhcount, 0);
        assert!(att.is_local);
    }
}
