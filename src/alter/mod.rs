//! ALTER TABLE execution.
//!
//! A statement runs in three phases over a [`WorkQueue`] holding one entry
//! per touched relation:
//!
//! 1. *prepare*: permission and shape checks, simple recursion to
//!    descendants, and sorting every subcommand into its pass;
//! 2. *catalog rewrite*: passes run in order, each across every queued
//!    relation, with a command-counter barrier after every subcommand;
//! 3. *table rewrite*: relations whose rows are affected are rewritten or
//!    scanned for validation, then foreign keys are checked.
//!
//! Any error aborts the statement; the caller restores its snapshots.

pub mod columns;
pub mod command;
pub mod constraints;
pub mod exec;
pub mod inherit;
pub mod lock_level;
pub mod misc;
pub mod partition;
pub mod prep;
pub mod rewrite;
pub mod transform;
pub mod work_queue;

use crate::alter::command::{AlterTableStmt, ObjectKind, Subcommand};
use crate::alter::lock_level::alter_table_get_lock_level;
use crate::alter::transform::transform_alter_table_stmt;
use crate::alter::work_queue::{AlterPass, RewriteReason, WorkQueue};
use crate::catalog::Catalog;
use crate::catalog::depend::ObjectAddress;
use crate::catalog::schema::RelKind;
use crate::catalog::types::Oid;
use crate::config::EngineConfig;
use crate::error::AlterError;
use crate::events::AlterEvent;
use crate::expr::implication::ImplicationProver;
use crate::lock::{LockManager, LockMode};
use crate::permission::CallerContext;
use crate::session::Session;
use crate::storage::StorageManager;
use serde::Serialize;
use tracing::{debug, info};

/// How a foreign key's existing rows were checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FkValidationPath {
    /// Hash lookup of referencing keys against the referenced keys.
    Bulk,
    /// The row-by-row check procedure.
    RowByRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutedSubcommand {
    pub pass: AlterPass,
    pub relation: String,
    pub tag: &'static str,
}

/// What one ALTER TABLE statement did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlterReport {
    pub lock_mode: Option<LockMode>,
    /// Statement skipped under IF EXISTS.
    pub skipped: bool,
    pub trace: Vec<ExecutedSubcommand>,
    pub rewritten: Vec<String>,
    pub rewrite_reasons: Vec<(String, RewriteReason)>,
    /// Relations scanned for validation without a rewrite.
    pub validated: Vec<String>,
    /// Constraints whose validation scan was skipped because existing
    /// constraints already imply them.
    pub skipped_validations: Vec<String>,
    /// Relations moved by block copy, with the number of blocks copied.
    pub block_copies: Vec<(String, usize)>,
    pub toast_created: Vec<String>,
    pub fk_validations: Vec<(String, FkValidationPath)>,
    /// User-visible notices and warnings, in emission order.
    pub notices: Vec<String>,
}

impl AlterReport {
    pub fn was_rewritten(&self, relation: &str) -> bool {
        self.rewritten.iter().any(|r| r == relation)
    }

    pub fn was_validated(&self, relation: &str) -> bool {
        self.validated.iter().any(|r| r == relation)
    }

    pub fn passes_run(&self) -> Vec<AlterPass> {
        let mut passes: Vec<AlterPass> = self.trace.iter().map(|t| t.pass).collect();
        passes.dedup();
        passes
    }
}

/// Everything a DDL operation may touch.
pub struct AlterContext<'a> {
    pub catalog: &'a mut Catalog,
    pub storage: &'a mut StorageManager,
    pub session: &'a mut Session,
    pub locks: &'a LockManager,
    pub caller: &'a CallerContext,
    pub config: &'a EngineConfig,
    pub prover: &'a dyn ImplicationProver,
    pub report: AlterReport,
    pub events: Vec<AlterEvent>,
}

impl<'a> AlterContext<'a> {
    pub fn lock_relation(&mut self, relid: Oid, mode: LockMode) {
        self.locks.lock(self.session.id, relid, mode);
        self.session.record_lock(relid, mode);
    }

    /// Makes catalog changes so far visible to what follows.
    pub fn command_counter_increment(&mut self) {
        self.session.command_counter_increment();
    }

    pub fn invalidate(&mut self, relid: Oid) {
        self.session.invalidate(relid);
    }

    pub fn notice(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(notice = %message);
        self.report.notices.push(message);
    }

    pub(crate) fn record_event(
        &mut self,
        relid: Oid,
        pass: AlterPass,
        cmd: &Subcommand,
        address: Option<ObjectAddress>,
    ) -> Result<(), AlterError> {
        let relation_name = self.catalog.relation_name(relid);
        let payload = rmp_serde::to_vec(cmd).map_err(|e| AlterError::internal(e.to_string()))?;
        self.report.trace.push(ExecutedSubcommand {
            pass,
            relation: relation_name.clone(),
            tag: cmd.tag(),
        });
        self.events.push(AlterEvent {
            relation: relid,
            relation_name,
            command_tag: cmd.tag().to_string(),
            pass: pass.name().to_string(),
            address,
            payload,
        });
        Ok(())
    }
}

/// Where recursion over an inheritance tree stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecursionContext {
    pub top_level: bool,
    /// Parents of this relation that are part of the tree being altered.
    pub expected_parents: i32,
}

impl RecursionContext {
    pub fn top() -> Self {
        Self {
            top_level: true,
            expected_parents: 0,
        }
    }

    pub fn child(expected_parents: i32) -> Self {
        Self {
            top_level: false,
            expected_parents,
        }
    }
}

fn check_statement_kind(kind: ObjectKind, rel_kind: RelKind, name: &str) -> Result<(), AlterError> {
    let (ok, allowed) = match kind {
        ObjectKind::Table => (true, ""),
        ObjectKind::Index => (rel_kind.is_index(), "an index"),
        ObjectKind::View => (rel_kind == RelKind::View, "a view"),
        ObjectKind::MaterializedView => {
            (rel_kind == RelKind::MaterializedView, "a materialized view")
        }
        ObjectKind::ForeignTable => (rel_kind == RelKind::ForeignTable, "a foreign table"),
        ObjectKind::Type => (rel_kind == RelKind::CompositeType, "a composite type"),
    };
    if ok {
        return Ok(());
    }
    Err(AlterError::WrongObjectType {
        relation: name.to_string(),
        allowed: allowed.to_string(),
        hint: Some(ObjectKind::of_relkind(rel_kind).alter_hint()),
    })
}

/// Runs one ALTER TABLE statement.
pub fn alter_table(ctx: &mut AlterContext<'_>, stmt: &AlterTableStmt) -> Result<(), AlterError> {
    let lockmode = alter_table_get_lock_level(&stmt.cmds);
    ctx.report.lock_mode = Some(lockmode);

    let Some(relid) = ctx.catalog.lookup(&stmt.relation) else {
        if stmt.missing_ok {
            ctx.notice(format!(
                "relation \"{}\" does not exist, skipping",
                stmt.relation
            ));
            ctx.report.skipped = true;
            return Ok(());
        }
        return Err(AlterError::UndefinedTable {
            relation: stmt.relation.clone(),
        });
    };
    let rel = ctx.catalog.relation(relid)?.clone();
    check_statement_kind(stmt.object_kind, rel.kind, &rel.name)?;

    // An index's table is locked before the index itself.
    if rel.kind.is_index()
        && let Some(idx) = ctx.catalog.indexes.get(&relid)
    {
        let table = idx.relid;
        ctx.lock_relation(table, lockmode);
    }
    ctx.lock_relation(relid, lockmode);
    ctx.session
        .check_table_not_in_use(relid, &rel.name, stmt.object_kind.statement())?;

    debug!(
        relation = %rel.name,
        lock = lockmode.name(),
        subcommands = stmt.cmds.len(),
        "alter table"
    );

    let stmt = transform_alter_table_stmt(stmt);
    let mut queue = WorkQueue::new();
    for cmd in &stmt.cmds {
        prep::prepare_cmd(
            ctx,
            &mut queue,
            relid,
            cmd,
            stmt.recurse,
            false,
            lockmode,
            stmt.object_kind,
        )?;
    }
    exec::rewrite_catalogs(ctx, &mut queue, lockmode)?;
    rewrite::rewrite_tables(ctx, &mut queue, lockmode)?;
    Ok(())
}
