//! Per-relation work items of one ALTER TABLE.

use crate::alter::command::{ConstraintSpec, IndexSpec, Subcommand};
use crate::catalog::Catalog;
use crate::catalog::schema::{ConstraintKind, Persistence, RelKind, RelationDef};
use crate::catalog::types::{AttrNumber, Oid};
use crate::error::AlterError;
use crate::expr::BoundExpr;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Phase 2 passes in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlterPass {
    Drop,
    AlterType,
    ReaddOldIndex,
    ReaddOldConstraint,
    ColumnAttributes,
    AddColumn,
    AddIndex,
    AddConstraint,
    Misc,
    Distribution,
    Partition,
}

pub const PASS_COUNT: usize = 11;

impl AlterPass {
    pub const ALL: [AlterPass; PASS_COUNT] = [
        AlterPass::Drop,
        AlterPass::AlterType,
        AlterPass::ReaddOldIndex,
        AlterPass::ReaddOldConstraint,
        AlterPass::ColumnAttributes,
        AlterPass::AddColumn,
        AlterPass::AddIndex,
        AlterPass::AddConstraint,
        AlterPass::Misc,
        AlterPass::Distribution,
        AlterPass::Partition,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            AlterPass::Drop => "Drop",
            AlterPass::AlterType => "AlterType",
            AlterPass::ReaddOldIndex => "ReaddOldIndex",
            AlterPass::ReaddOldConstraint => "ReaddOldConstraint",
            AlterPass::ColumnAttributes => "ColumnAttributes",
            AlterPass::AddColumn => "AddColumn",
            AlterPass::AddIndex => "AddIndex",
            AlterPass::AddConstraint => "AddConstraint",
            AlterPass::Misc => "Misc",
            AlterPass::Distribution => "Distribution",
            AlterPass::Partition => "Partition",
        }
    }
}

/// Why a relation must be physically rewritten; empty means at most a
/// validation scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct RewriteReason(u8);

impl RewriteReason {
    pub const NONE: RewriteReason = RewriteReason(0);
    pub const COLUMN_TYPE: RewriteReason = RewriteReason(1);
    pub const DEFAULT_VALUE: RewriteReason = RewriteReason(1 << 1);
    pub const OIDS: RewriteReason = RewriteReason(1 << 2);
    pub const PERSISTENCE: RewriteReason = RewriteReason(1 << 3);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: RewriteReason) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: RewriteReason) {
        self.0 |= other.0;
    }

    pub fn names(self) -> Vec<&'static str> {
        [
            (RewriteReason::COLUMN_TYPE, "column type"),
            (RewriteReason::DEFAULT_VALUE, "default value"),
            (RewriteReason::OIDS, "oids"),
            (RewriteReason::PERSISTENCE, "persistence"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect()
    }
}

/// Constraint existing rows must satisfy, checked in phase 3.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConstraint {
    pub name: CompactString,
    pub kind: ConstraintKind,
    pub constraint_oid: Oid,
    /// Boolean expression over the table's current attributes. Unused for
    /// foreign keys, which are checked against the referenced table.
    pub qual: Option<BoundExpr>,
    pub referenced_rel: Option<Oid>,
}

/// Value computation for a new or retyped column during rewrite. The
/// expression reads the row as laid out by the pre-alter descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct NewColumnValue {
    pub attnum: AttrNumber,
    pub expr: BoundExpr,
}

/// A subcommand with the recursion flags it was prepared under.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCommand {
    pub cmd: Subcommand,
    /// Whether the command applies to descendants (no ONLY).
    pub recurse: bool,
    /// Queued on behalf of an ancestor.
    pub recursing: bool,
}

impl QueuedCommand {
    pub fn new(cmd: Subcommand, recurse: bool, recursing: bool) -> Self {
        Self {
            cmd,
            recurse,
            recursing,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkQueueEntry {
    pub relid: Oid,
    pub kind: RelKind,
    pub old_desc: RelationDef,
    pub subcmds: [Vec<QueuedCommand>; PASS_COUNT],
    pub constraints: Vec<NewConstraint>,
    pub new_values: Vec<NewColumnValue>,
    pub verify_new_notnull: bool,
    pub rewrite: RewriteReason,
    pub new_tablespace: Option<CompactString>,
    pub new_persistence: Option<Persistence>,
    pub chg_persistence: bool,
    pub partition_constraint: Option<BoundExpr>,
    /// The partition constraint is being checked because a sibling was
    /// attached, not because this table was altered.
    pub validate_default: bool,
    pub changed_constraint_ids: Vec<Oid>,
    pub changed_constraint_defs: Vec<Subcommand>,
    pub changed_index_ids: Vec<Oid>,
    pub changed_index_defs: Vec<IndexSpec>,
}

impl WorkQueueEntry {
    fn new(rel: &RelationDef) -> Self {
        Self {
            relid: rel.oid,
            kind: rel.kind,
            old_desc: rel.clone(),
            subcmds: Default::default(),
            constraints: Vec::new(),
            new_values: Vec::new(),
            verify_new_notnull: false,
            rewrite: RewriteReason::NONE,
            new_tablespace: None,
            new_persistence: None,
            chg_persistence: false,
            partition_constraint: None,
            validate_default: false,
            changed_constraint_ids: Vec::new(),
            changed_constraint_defs: Vec::new(),
            changed_index_ids: Vec::new(),
            changed_index_defs: Vec::new(),
        }
    }

    pub fn queue(&mut self, pass: AlterPass, cmd: QueuedCommand) {
        self.subcmds[pass.index()].push(cmd);
    }

    pub fn has_subcommands(&self, pass: AlterPass) -> bool {
        !self.subcmds[pass.index()].is_empty()
    }

    /// Whether phase 3 must visit the table at all.
    pub fn needs_phase3(&self) -> bool {
        !self.rewrite.is_empty()
            || self
                .constraints
                .iter()
                .any(|c| c.kind != ConstraintKind::ForeignKey)
            || self.verify_new_notnull
            || self.partition_constraint.is_some()
            || self.new_tablespace.is_some()
    }

    pub fn add_changed_constraint(&mut self, oid: Oid, def: ConstraintSpec) {
        if !self.changed_constraint_ids.contains(&oid) {
            self.changed_constraint_ids.push(oid);
            self.changed_constraint_defs.push(Subcommand::AddConstraint(def));
        }
    }
}

/// Arena of entries; each relation appears at most once.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    entries: Vec<WorkQueueEntry>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_or_create(&mut self, catalog: &Catalog, relid: Oid) -> Result<usize, AlterError> {
        if let Some(idx) = self.position(relid) {
            return Ok(idx);
        }
        let rel = catalog.relation(relid)?;
        self.entries.push(WorkQueueEntry::new(rel));
        Ok(self.entries.len() - 1)
    }

    pub fn position(&self, relid: Oid) -> Option<usize> {
        self.entries.iter().position(|e| e.relid == relid)
    }

    pub fn entry(&self, idx: usize) -> &WorkQueueEntry {
        &self.entries[idx]
    }

    pub fn entry_mut(&mut self, idx: usize) -> &mut WorkQueueEntry {
        &mut self.entries[idx]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkQueueEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::RelationDef;

    #[test]
    fn passes_are_totally_ordered() {
        let mut sorted = AlterPass::ALL;
        sorted.sort();
        assert_eq!(sorted, AlterPass::ALL);
        assert!(AlterPass::Drop < AlterPass::AddColumn);
        assert_eq!(AlterPass::Partition.index(), PASS_COUNT - 1);
    }

    #[test]
    fn entries_are_created_once_per_relation() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let oid = catalog.alloc_oid();
        catalog.insert_relation(RelationDef::new(oid, "t", "public", RelKind::Table, "alice"));
        let mut queue = WorkQueue::new();
        let first = queue.find_or_create(&catalog, oid).expect("entry");
        let second = queue.find_or_create(&catalog, oid).expect("entry");
        assert_eq!(first, second);
        assert_eq!(queue.len(), 1);
        assert!(queue.find_or_create(&catalog, 999).is_err());
    }

    #[test]
    fn foreign_keys_alone_skip_the_table_scan() {
        let mut catalog = Catalog::bootstrap("pg_default");
        let oid = catalog.alloc_oid();
        catalog.insert_relation(RelationDef::new(oid, "t", "public", RelKind::Table, "alice"));
        let mut queue = WorkQueue::new();
        let idx = queue.find_or_create(&catalog, oid).expect("entry");
        let pending = |kind| NewConstraint {
            name: "c".into(),
            kind,
            constraint_oid: 1,
            qual: None,
            referenced_rel: None,
        };
        let entry = queue.entry_mut(idx);
        assert!(!entry.needs_phase3());
        entry.constraints.push(pending(ConstraintKind::ForeignKey));
        assert!(!entry.needs_phase3());
        entry.constraints.push(pending(ConstraintKind::Check));
        assert!(entry.needs_phase3());
    }

    #[test]
    fn rewrite_reasons_accumulate() {
        let mut reason = RewriteReason::NONE;
        assert!(reason.is_empty());
        reason.insert(RewriteReason::COLUMN_TYPE);
        reason.insert(RewriteReason::OIDS);
        assert!(reason.contains(RewriteReason::OIDS));
        assert!(!reason.contains(RewriteReason::PERSISTENCE));
        assert_eq!(reason.names(), vec!["column type", "oids"]);
    }
}
