//! Dependency edges between catalog objects and deferred multi-object
//! deletion driven by them.

use crate::catalog::Catalog;
use crate::catalog::types::{AttrNumber, Oid};
use crate::error::AlterError;
use crate::storage::StorageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectClass {
    Relation,
    Constraint,
    Trigger,
    Rule,
}

/// Catalog object identity; `sub_id` is an attribute number for columns
/// and zero for whole objects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectAddress {
    pub class: ObjectClass,
    pub oid: Oid,
    pub sub_id: i32,
}

impl ObjectAddress {
    pub fn relation(oid: Oid) -> Self {
        Self {
            class: ObjectClass::Relation,
            oid,
            sub_id: 0,
        }
    }

    pub fn column(relid: Oid, attnum: AttrNumber) -> Self {
        Self {
            class: ObjectClass::Relation,
            oid: relid,
            sub_id: i32::from(attnum),
        }
    }

    pub fn constraint(oid: Oid) -> Self {
        Self {
            class: ObjectClass::Constraint,
            oid,
            sub_id: 0,
        }
    }

    pub fn trigger(oid: Oid) -> Self {
        Self {
            class: ObjectClass::Trigger,
            oid,
            sub_id: 0,
        }
    }

    pub fn rule(oid: Oid) -> Self {
        Self {
            class: ObjectClass::Rule,
            oid,
            sub_id: 0,
        }
    }

    /// The whole object this address is part of.
    pub fn whole(self) -> Self {
        Self { sub_id: 0, ..self }
    }

    fn is_part_of(self, other: ObjectAddress) -> bool {
        other.sub_id == 0 && self.class == other.class && self.oid == other.oid && self != other
    }

    pub fn describe(&self, catalog: &Catalog) -> String {
        match self.class {
            ObjectClass::Relation => match catalog.relations.get(&self.oid) {
                Some(rel) if self.sub_id > 0 => {
                    let column = rel
                        .attribute(self.sub_id as AttrNumber)
                        .map(|a| a.name.to_string())
                        .unwrap_or_else(|| self.sub_id.to_string());
                    format!("column {column} of {} {}", rel.kind.description(), rel.name)
                }
                Some(rel) => format!("{} {}", rel.kind.description(), rel.name),
                None => format!("relation {}", self.oid),
            },
            ObjectClass::Constraint => match catalog.constraints.get(&self.oid) {
                Some(con) => format!(
                    "constraint {} on table {}",
                    con.name,
                    catalog.relation_name(con.relid)
                ),
                None => format!("constraint {}", self.oid),
            },
            ObjectClass::Trigger => match catalog.triggers.get(&self.oid) {
                Some(trig) => format!(
                    "trigger {} on table {}",
                    trig.name,
                    catalog.relation_name(trig.relid)
                ),
                None => format!("trigger {}", self.oid),
            },
            ObjectClass::Rule => match catalog.rules.get(&self.oid) {
                Some(rule) => format!(
                    "rule {} on table {}",
                    rule.name,
                    catalog.relation_name(rule.relid)
                ),
                None => format!("rule {}", self.oid),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DependKind {
    /// Dropping the referenced object requires CASCADE.
    Normal,
    /// Dependent goes away silently with the referenced object.
    Auto,
    /// Dependent is an implementation detail of the referenced object.
    Internal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DependEdge {
    pub dependent: ObjectAddress,
    pub referenced: ObjectAddress,
    pub kind: DependKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DropBehavior {
    #[default]
    Restrict,
    Cascade,
}

/// Ordered, duplicate-free set of addresses queued for deletion.
#[derive(Debug, Clone, Default)]
pub struct ObjectAddresses {
    items: Vec<ObjectAddress>,
}

impl ObjectAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, addr: ObjectAddress) {
        if !self.items.contains(&addr) {
            self.items.push(addr);
        }
    }

    pub fn contains(&self, addr: &ObjectAddress) -> bool {
        self.items.contains(addr)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectAddress> {
        self.items.iter()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeletionReport {
    pub deleted: Vec<ObjectAddress>,
    /// Storage released by dropped relations; the caller schedules unlinks.
    pub dropped_storage: Vec<StorageId>,
}

pub fn record_dependency(
    catalog: &mut Catalog,
    dependent: ObjectAddress,
    referenced: ObjectAddress,
    kind: DependKind,
) {
    let edge = DependEdge {
        dependent,
        referenced,
        kind,
    };
    if !catalog.depends.contains(&edge) {
        catalog.depends.push_back(edge);
    }
}

pub fn record_dependencies_on_columns(
    catalog: &mut Catalog,
    dependent: ObjectAddress,
    relid: Oid,
    attnums: impl IntoIterator<Item = AttrNumber>,
    kind: DependKind,
) {
    for attnum in attnums {
        if attnum > 0 {
            record_dependency(catalog, dependent, ObjectAddress::column(relid, attnum), kind);
        }
    }
}

/// Drops every edge whose dependent side is `dependent`.
pub fn delete_dependencies_of(catalog: &mut Catalog, dependent: ObjectAddress) {
    catalog.depends.retain(|e| e.dependent != dependent);
}

/// Edges whose referenced side is `referenced` or a part of it.
pub fn dependents_of(catalog: &Catalog, referenced: ObjectAddress) -> Vec<DependEdge> {
    catalog
        .depends
        .iter()
        .filter(|e| e.referenced == referenced || e.referenced.is_part_of(referenced))
        .copied()
        .collect()
}

/// Objects owned by a relation that must disappear with it even when no
/// explicit edge was recorded.
fn owned_objects(catalog: &Catalog, relid: Oid) -> Vec<ObjectAddress> {
    let mut out = Vec::new();
    out.extend(
        catalog
            .constraints_of(relid)
            .into_iter()
            .map(|c| ObjectAddress::constraint(c.oid)),
    );
    out.extend(
        catalog
            .indexes_of(relid)
            .into_iter()
            .map(|i| ObjectAddress::relation(i.oid)),
    );
    out.extend(
        catalog
            .triggers_of(relid)
            .into_iter()
            .map(|t| ObjectAddress::trigger(t.oid)),
    );
    out.extend(
        catalog
            .rules_of(relid)
            .into_iter()
            .map(|r| ObjectAddress::rule(r.oid)),
    );
    if let Ok(rel) = catalog.relation(relid)
        && let Some(toast) = rel.toast
    {
        out.push(ObjectAddress::relation(toast));
    }
    out
}

/// Deletes `targets` and everything that depends on them. Auto and
/// internal dependents go silently; a normal dependent fails the whole
/// deletion under `Restrict`.
pub fn perform_deletion(
    catalog: &mut Catalog,
    targets: &ObjectAddresses,
    behavior: DropBehavior,
) -> Result<DeletionReport, AlterError> {
    for target in targets.iter() {
        refuse_internal_target(catalog, target, targets)?;
    }

    let mut doomed: Vec<ObjectAddress> = Vec::new();
    let mut seen = BTreeSet::new();
    let mut blockers: Vec<DependEdge> = Vec::new();
    let mut stack: Vec<ObjectAddress> = targets.iter().copied().collect();
    while let Some(addr) = stack.pop() {
        if !seen.insert(addr) {
            continue;
        }
        doomed.push(addr);
        if addr.class == ObjectClass::Relation && addr.sub_id == 0 {
            stack.extend(owned_objects(catalog, addr.oid));
        }
        for edge in dependents_of(catalog, addr) {
            match edge.kind {
                DependKind::Auto | DependKind::Internal => stack.push(edge.dependent),
                DependKind::Normal => match behavior {
                    DropBehavior::Cascade => stack.push(edge.dependent),
                    DropBehavior::Restrict => blockers.push(edge),
                },
            }
        }
    }

    let covered = |addr: &ObjectAddress| {
        seen.contains(addr) || seen.iter().any(|d| addr.is_part_of(*d))
    };
    let blocking: Vec<_> = blockers
        .into_iter()
        .filter(|edge| !covered(&edge.dependent))
        .collect();
    if let Some(first) = blocking.first() {
        let target = targets
            .iter()
            .next()
            .copied()
            .unwrap_or(first.referenced);
        let detail = blocking
            .iter()
            .map(|e| {
                format!(
                    "{} depends on {}",
                    e.dependent.describe(catalog),
                    e.referenced.describe(catalog)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        return Err(AlterError::DependentObjectsStillExist {
            message: format!(
                "cannot drop {} because other objects depend on it",
                target.describe(catalog)
            ),
            detail,
        });
    }

    let mut report = DeletionReport::default();
    for addr in &doomed {
        // Columns of a relation that is itself going away need no work.
        if addr.sub_id != 0 && seen.contains(&addr.whole()) {
            continue;
        }
        delete_one(catalog, *addr, &mut report)?;
        report.deleted.push(*addr);
    }
    let gone: BTreeSet<_> = report.deleted.iter().copied().collect();
    catalog.depends.retain(|e| {
        !gone.contains(&e.dependent)
            && !gone.contains(&e.referenced)
            && !gone.iter().any(|g| e.dependent.is_part_of(*g) || e.referenced.is_part_of(*g))
    });
    catalog
        .comments
        .retain(|addr, _| !gone.contains(addr) && !gone.iter().any(|g| addr.is_part_of(*g)));
    debug!(objects = report.deleted.len(), "performed deletion");
    Ok(report)
}

fn refuse_internal_target(
    catalog: &Catalog,
    target: &ObjectAddress,
    targets: &ObjectAddresses,
) -> Result<(), AlterError> {
    let owner = catalog
        .depends
        .iter()
        .find(|e| e.dependent == *target && e.kind == DependKind::Internal);
    if let Some(edge) = owner
        && !targets.contains(&edge.referenced)
    {
        return Err(AlterError::DependentObjectsStillExist {
            message: format!(
                "cannot drop {} because {} requires it",
                target.describe(catalog),
                edge.referenced.describe(catalog)
            ),
            detail: format!("You can drop {} instead.", edge.referenced.describe(catalog)),
        });
    }
    Ok(())
}

fn delete_one(
    catalog: &mut Catalog,
    addr: ObjectAddress,
    report: &mut DeletionReport,
) -> Result<(), AlterError> {
    match addr.class {
        ObjectClass::Relation if addr.sub_id > 0 => {
            if let Some(rel) = catalog.relations.get_mut(&addr.oid)
                && let Some(att) = rel.attribute_mut(addr.sub_id as AttrNumber)
            {
                att.mark_dropped();
            }
        }
        ObjectClass::Relation => {
            if let Some(rel) = catalog.remove_relation(addr.oid) {
                report.dropped_storage.extend(rel.storage);
            }
            catalog.indexes.remove(&addr.oid);
            catalog
                .inherits
                .retain(|e| e.child != addr.oid && e.parent != addr.oid);
            catalog.grants.retain(|(_, relid, _)| *relid != addr.oid);
        }
        ObjectClass::Constraint => {
            if let Some(con) = catalog.constraints.remove(&addr.oid) {
                // Indexes keep a back pointer to the constraint that owns them.
                if let Some(index) = con.index
                    && let Some(def) = catalog.indexes.get_mut(&index)
                    && def.constraint == Some(con.oid)
                {
                    def.constraint = None;
                }
            }
        }
        ObjectClass::Trigger => {
            catalog.triggers.remove(&addr.oid);
        }
        ObjectClass::Rule => {
            catalog.rules.remove(&addr.oid);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::{AttributeDef, ConstraintDef, ConstraintKind, RelKind, RelationDef};
    use crate::catalog::types::{ColumnType, TypeName};

    fn setup() -> (Catalog, Oid, Oid) {
        let mut catalog = Catalog::bootstrap("pg_default");
        let oid = catalog.alloc_oid();
        let mut rel = RelationDef::new(oid, "t", "public", RelKind::Table, "alice");
        rel.attributes
            .push(AttributeDef::new(1, "a", TypeName::new(ColumnType::Integer)));
        rel.attributes
            .push(AttributeDef::new(2, "b", TypeName::new(ColumnType::Integer)));
        catalog.insert_relation(rel);
        let con = catalog.alloc_oid();
        catalog.constraints.insert(
            con,
            ConstraintDef {
                oid: con,
                relid: oid,
                name: "t_a_check".into(),
                kind: ConstraintKind::Check,
                expr: None,
                index: None,
                foreign_key: None,
                attnums: vec![1],
                deferrable: false,
                deferred: false,
                validated: true,
                inhcount: 0,
                is_local: true,
                no_inherit: false,
            },
        );
        (catalog, oid, con)
    }

    #[test]
    fn auto_dependents_follow_their_column() {
        let (mut catalog, relid, con) = setup();
        record_dependency(
            &mut catalog,
            ObjectAddress::constraint(con),
            ObjectAddress::column(relid, 1),
            DependKind::Auto,
        );
        let mut targets = ObjectAddresses::new();
        targets.add(ObjectAddress::column(relid, 1));
        let report = perform_deletion(&mut catalog, &targets, DropBehavior::Restrict).expect("drop");
        assert_eq!(report.deleted.len(), 2);
        assert!(catalog.constraints.is_empty());
        assert!(catalog.depends.is_empty());
        let rel = catalog.relation(relid).expect("rel");
        assert!(rel.attribute(1).expect("slot").is_dropped);
    }

    #[test]
    fn normal_dependents_block_restrict_but_not_cascade() {
        let (mut catalog, relid, con) = setup();
        record_dependency(
            &mut catalog,
            ObjectAddress::constraint(con),
            ObjectAddress::column(relid, 2),
            DependKind::Normal,
        );
        let mut targets = ObjectAddresses::new();
        targets.add(ObjectAddress::column(relid, 2));
        let err = perform_deletion(&mut catalog.clone(), &targets, DropBehavior::Restrict)
            .expect_err("restrict");
        assert_eq!(
            err.to_string(),
            "cannot drop column b of table t because other objects depend on it"
        );
        assert_eq!(
            err.detail(),
            Some("constraint t_a_check on table t depends on column b of table t")
        );
        perform_deletion(&mut catalog, &targets, DropBehavior::Cascade).expect("cascade");
        assert!(catalog.constraints.is_empty());
    }

    #[test]
    fn dropping_a_relation_takes_owned_objects() {
        let (mut catalog, relid, _) = setup();
        let mut targets = ObjectAddresses::new();
        targets.add(ObjectAddress::relation(relid));
        perform_deletion(&mut catalog, &targets, DropBehavior::Restrict).expect("drop");
        assert!(catalog.lookup("t").is_none());
        assert!(catalog.constraints.is_empty());
    }
}
