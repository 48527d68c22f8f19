//! relalter: a relational catalog engine centred on ALTER TABLE.
//!
//! [`Database`] owns one session's view of the catalog and storage, runs
//! statements inside transactions and savepoints, and notifies registered
//! [`EventHook`]s of every executed ALTER TABLE subcommand.

pub mod alter;
pub mod catalog;
pub mod config;
pub mod create;
pub mod dml;
pub mod error;
pub mod events;
pub mod expr;
pub mod index;
pub mod lock;
pub mod merge;
pub mod partition;
pub mod permission;
pub mod session;
pub mod storage;
pub mod triggers;

use crate::alter::command::{AlterTableStmt, ColumnDef, IndexSpec, ObjectKind};
use crate::alter::{AlterContext, AlterReport, alter_table};
use crate::catalog::Catalog;
use crate::catalog::depend::{DropBehavior, ObjectAddress};
use crate::catalog::schema::{ConstraintKind, DomainDef, Privilege, RelKind, RelationDef, RoleDef};
use crate::catalog::types::{Oid, Value};
use crate::config::EngineConfig;
use crate::create::{CreateTableStmt, TriggerSpec};
use crate::error::AlterError;
use crate::events::{AlterEvent, EventHook};
use crate::expr::implication::{ConservativeProver, ImplicationProver, NeverProver};
use crate::lock::LockManager;
use crate::permission::CallerContext;
use crate::session::{CancelToken, Session};
use crate::storage::StorageManager;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Savepoint {
    name: String,
    catalog: Catalog,
    storage: StorageManager,
}

/// State captured at BEGIN. Rollback restores the snapshots wholesale.
struct Transaction {
    catalog: Catalog,
    storage: StorageManager,
    savepoints: Vec<Savepoint>,
    failed: bool,
    implicit: bool,
}

pub struct Database {
    config: EngineConfig,
    catalog: Catalog,
    storage: StorageManager,
    session: Session,
    locks: Arc<LockManager>,
    caller: CallerContext,
    prover: Box<dyn ImplicationProver>,
    event_hooks: Arc<Mutex<Vec<Arc<dyn EventHook>>>>,
    tx: Option<Transaction>,
}

impl Database {
    pub fn open(config: EngineConfig) -> Result<Self, AlterError> {
        Self::with_lock_manager(config, Arc::new(LockManager::new()))
    }

    /// Opens a database whose relation locks live in `locks`, so several
    /// sessions can contend on them.
    pub fn with_lock_manager(
        config: EngineConfig,
        locks: Arc<LockManager>,
    ) -> Result<Self, AlterError> {
        config.validate()?;
        info!(
            shape_matching = ?config.shape_matching,
            distribution_enabled = config.distribution_enabled,
            fast_default_enabled = config.fast_default_enabled,
            constraint_implication_enabled = config.constraint_implication_enabled,
            rows_per_block = config.rows_per_block,
            default_tablespace = %config.default_tablespace,
            "opening database"
        );
        let prover: Box<dyn ImplicationProver> = if config.constraint_implication_enabled {
            Box::new(ConservativeProver)
        } else {
            Box::new(NeverProver)
        };
        Ok(Self {
            catalog: Catalog::bootstrap(&config.default_tablespace),
            storage: StorageManager::new(config.rows_per_block),
            session: Session::new(),
            locks,
            caller: CallerContext::new("postgres"),
            prover,
            event_hooks: Arc::new(Mutex::new(Vec::new())),
            tx: None,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn lock_manager(&self) -> Arc<LockManager> {
        Arc::clone(&self.locks)
    }

    /// Handle another thread can use to cancel the running statement.
    pub fn cancel_token(&self) -> CancelToken {
        self.session.cancel.clone()
    }

    pub fn caller(&self) -> &CallerContext {
        &self.caller
    }

    pub fn set_caller(&mut self, caller: CallerContext) {
        self.caller = caller;
    }

    pub fn set_prover(&mut self, prover: Box<dyn ImplicationProver>) {
        self.prover = prover;
    }

    pub fn add_event_hook(&self, hook: Arc<dyn EventHook>) {
        self.event_hooks.lock().push(hook);
    }

    pub fn remove_event_hook(&self, hook: &Arc<dyn EventHook>) {
        let mut hooks = self.event_hooks.lock();
        hooks.retain(|existing| !Arc::ptr_eq(existing, hook));
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.implicit)
    }

    pub fn relation(&self, name: &str) -> Result<&RelationDef, AlterError> {
        let oid = self.catalog.lookup_required(name)?;
        self.catalog.relation(oid)
    }

    // ---- transactions -------------------------------------------------

    pub fn begin(&mut self) -> Result<(), AlterError> {
        if self.tx.is_some() {
            return Err(AlterError::InvalidTransactionState {
                message: "there is already a transaction in progress".into(),
            });
        }
        self.start_transaction(false);
        debug!(session = self.session.id, "transaction started");
        Ok(())
    }

    fn start_transaction(&mut self, implicit: bool) {
        self.tx = Some(Transaction {
            catalog: self.catalog.snapshot(),
            storage: self.storage.clone(),
            savepoints: Vec::new(),
            failed: false,
            implicit,
        });
    }

    /// Commits the open transaction. A failed transaction is rolled back
    /// and reported as an error.
    pub fn commit(&mut self) -> Result<(), AlterError> {
        let Some(tx) = self.tx.take() else {
            return Err(AlterError::InvalidTransactionState {
                message: "there is no transaction in progress".into(),
            });
        };
        if tx.failed {
            self.abort(tx);
            return Err(AlterError::InvalidTransactionState {
                message: "current transaction was aborted and has been rolled back".into(),
            });
        }
        if let Err(err) = self.pre_commit() {
            warn!(error = %err, code = err.code_str(), "commit failed");
            self.abort(tx);
            return Err(err);
        }
        let end = self.session.end_transaction(true);
        for storage in end.unlink {
            self.storage.unlink(storage);
        }
        self.locks.release_all(self.session.id);
        debug!(session = self.session.id, "transaction committed");
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<(), AlterError> {
        let Some(tx) = self.tx.take() else {
            return Err(AlterError::InvalidTransactionState {
                message: "there is no transaction in progress".into(),
            });
        };
        self.abort(tx);
        Ok(())
    }

    fn abort(&mut self, tx: Transaction) {
        self.catalog = tx.catalog;
        self.storage = tx.storage;
        let end = self.session.end_transaction(false);
        for storage in end.unlink {
            self.storage.unlink(storage);
        }
        self.locks.release_all(self.session.id);
        debug!(session = self.session.id, "transaction rolled back");
    }

    /// Deferred constraint checks, then ON COMMIT actions.
    fn pre_commit(&mut self) -> Result<(), AlterError> {
        let mut pending: Vec<Oid> = self.session.pending_trigger_events().to_vec();
        pending.sort_unstable();
        pending.dedup();
        for relid in pending {
            self.check_deferred_foreign_keys(relid)?;
        }
        self.session.fire_pending_trigger_events();

        let (truncate, drop) = self.session.pre_commit_actions();
        for relid in truncate {
            self.truncate_relation(relid)?;
        }
        for relid in drop {
            let Ok(rel) = self.catalog.relation(relid) else {
                continue;
            };
            let name = rel.qualified_name();
            self.with_context(|ctx| create::drop_relation(ctx, ObjectKind::Table, &name, DropBehavior::Cascade, true))?;
        }
        Ok(())
    }

    fn check_deferred_foreign_keys(&self, relid: Oid) -> Result<(), AlterError> {
        let Ok(rel) = self.catalog.relation(relid) else {
            return Ok(());
        };
        let Some(heap) = rel.storage else {
            return Ok(());
        };
        let rows = self.storage.tuples(heap)?;
        for con in self
            .catalog
            .constraints_of(relid)
            .into_iter()
            .filter(|c| c.kind == ConstraintKind::ForeignKey && c.deferred)
        {
            for tuple in &rows {
                let row = rel.deform(&tuple.values);
                if !triggers::ri_check_row(&self.catalog, &self.storage, con, &row)? {
                    return Err(AlterError::ForeignKeyViolation {
                        relation: rel.name.to_string(),
                        constraint: con.name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn truncate_relation(&mut self, relid: Oid) -> Result<(), AlterError> {
        let rel = self.catalog.relation(relid)?;
        if let Some(heap) = rel.storage {
            self.storage.truncate(heap)?;
        }
        let index_storage: Vec<_> = self
            .catalog
            .indexes_of(relid)
            .iter()
            .filter_map(|i| self.catalog.relations.get(&i.oid).and_then(|r| r.storage))
            .collect();
        for storage in index_storage {
            self.storage.truncate(storage)?;
        }
        Ok(())
    }

    pub fn savepoint(&mut self, name: &str) -> Result<(), AlterError> {
        let catalog = self.catalog.snapshot();
        let storage = self.storage.clone();
        let tx = self.explicit_tx("SAVEPOINT")?;
        if tx.failed {
            return Err(aborted());
        }
        tx.savepoints.push(Savepoint {
            name: name.to_string(),
            catalog,
            storage,
        });
        self.session.begin_subtransaction();
        Ok(())
    }

    pub fn release_savepoint(&mut self, name: &str) -> Result<(), AlterError> {
        let tx = self.explicit_tx("RELEASE SAVEPOINT")?;
        if tx.failed {
            return Err(aborted());
        }
        let pos = savepoint_position(tx, name)?;
        let depth = tx.savepoints.len() - pos;
        tx.savepoints.truncate(pos);
        for _ in 0..depth {
            self.session.end_subtransaction(true)?;
        }
        Ok(())
    }

    /// Rolls back to `name`, leaving the savepoint in place. Clears a
    /// failed transaction state.
    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), AlterError> {
        let tx = self.explicit_tx("ROLLBACK TO SAVEPOINT")?;
        let pos = savepoint_position(tx, name)?;
        let depth = tx.savepoints.len() - pos;
        tx.savepoints.truncate(pos + 1);
        tx.failed = false;
        let target = &tx.savepoints[pos];
        let (catalog, storage) = (target.catalog.snapshot(), target.storage.clone());
        self.catalog = catalog;
        self.storage = storage;
        for _ in 0..depth {
            let end = self.session.end_subtransaction(false)?;
            for storage in end.unlink {
                self.storage.unlink(storage);
            }
        }
        self.session.begin_subtransaction();
        Ok(())
    }

    fn explicit_tx(&mut self, statement: &str) -> Result<&mut Transaction, AlterError> {
        match self.tx.as_mut() {
            Some(tx) if !tx.implicit => Ok(tx),
            _ => Err(AlterError::InvalidTransactionState {
                message: format!("{statement} can only be used in transaction blocks"),
            }),
        }
    }

    // ---- statements ---------------------------------------------------

    fn with_context<T>(
        &mut self,
        op: impl FnOnce(&mut AlterContext<'_>) -> Result<T, AlterError>,
    ) -> Result<(T, AlterReport, Vec<AlterEvent>), AlterError> {
        let mut ctx = AlterContext {
            catalog: &mut self.catalog,
            storage: &mut self.storage,
            session: &mut self.session,
            locks: &*self.locks,
            caller: &self.caller,
            config: &self.config,
            prover: &*self.prover,
            report: AlterReport::default(),
            events: Vec::new(),
        };
        let value = op(&mut ctx)?;
        Ok((value, ctx.report, ctx.events))
    }

    /// Runs one statement. Outside a transaction block the statement gets
    /// its own transaction; inside one, an error marks the block failed.
    fn run<T>(
        &mut self,
        op: impl FnOnce(&mut AlterContext<'_>) -> Result<T, AlterError>,
    ) -> Result<(T, AlterReport), AlterError> {
        if self.tx.as_ref().is_some_and(|tx| tx.failed) {
            return Err(aborted());
        }
        if self.tx.is_none() {
            self.start_transaction(true);
        }
        let implicit = self.tx.as_ref().is_some_and(|tx| tx.implicit);
        // A failed statement inside a block leaves nothing of itself behind.
        let statement_start = (!implicit).then(|| (self.catalog.snapshot(), self.storage.clone()));
        match self.with_context(op) {
            Ok((value, report, events)) => {
                self.session.command_counter_increment();
                if implicit {
                    self.commit()?;
                }
                self.dispatch_events(&events);
                Ok((value, report))
            }
            Err(err) => {
                warn!(error = %err, code = err.code_str(), "statement failed");
                if let Some(mut tx) = self.tx.take() {
                    if implicit {
                        self.abort(tx);
                    } else {
                        if let Some((catalog, storage)) = statement_start {
                            self.catalog = catalog;
                            self.storage = storage;
                        }
                        tx.failed = true;
                        self.tx = Some(tx);
                    }
                }
                Err(err)
            }
        }
    }

    fn dispatch_events(&self, events: &[AlterEvent]) {
        if events.is_empty() {
            return;
        }
        let hooks = self.event_hooks.lock().clone();
        for event in events {
            for hook in &hooks {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook.on_event(event)))
                    .is_err()
                {
                    warn!(
                        relation = %event.relation_name,
                        command = %event.command_tag,
                        "event hook panicked while handling event"
                    );
                }
            }
        }
    }

    pub fn alter(&mut self, stmt: &AlterTableStmt) -> Result<AlterReport, AlterError> {
        let ((), report) = self.run(|ctx| alter_table(ctx, stmt))?;
        Ok(report)
    }

    pub fn create_table(&mut self, stmt: &CreateTableStmt) -> Result<Option<Oid>, AlterError> {
        self.run(|ctx| create::create_table(ctx, stmt))
            .map(|(oid, _)| oid)
    }

    /// Creates a view, materialized view, composite type or foreign table.
    pub fn create_relation(
        &mut self,
        name: &str,
        kind: RelKind,
        columns: &[ColumnDef],
    ) -> Result<Oid, AlterError> {
        self.run(|ctx| create::create_relation(ctx, name, kind, columns))
            .map(|(oid, _)| oid)
    }

    pub fn create_index(&mut self, table: &str, spec: &IndexSpec) -> Result<Oid, AlterError> {
        self.run(|ctx| create::create_index(ctx, table, spec))
            .map(|(oid, _)| oid)
    }

    pub fn create_trigger(&mut self, table: &str, spec: &TriggerSpec) -> Result<Oid, AlterError> {
        self.run(|ctx| create::create_trigger(ctx, table, spec))
            .map(|(oid, _)| oid)
    }

    pub fn drop_table(
        &mut self,
        name: &str,
        behavior: DropBehavior,
        missing_ok: bool,
    ) -> Result<(), AlterError> {
        self.drop_relation(ObjectKind::Table, name, behavior, missing_ok)
    }

    pub fn drop_index(
        &mut self,
        name: &str,
        behavior: DropBehavior,
        missing_ok: bool,
    ) -> Result<(), AlterError> {
        self.drop_relation(ObjectKind::Index, name, behavior, missing_ok)
    }

    /// DROP of any relation kind; `kind` must match the relation.
    pub fn drop_relation(
        &mut self,
        kind: ObjectKind,
        name: &str,
        behavior: DropBehavior,
        missing_ok: bool,
    ) -> Result<(), AlterError> {
        self.run(|ctx| create::drop_relation(ctx, kind, name, behavior, missing_ok))
            .map(|_| ())
    }

    pub fn insert(&mut self, table: &str, rows: Vec<Vec<Value>>) -> Result<usize, AlterError> {
        self.run(|ctx| dml::insert(ctx, table, rows))
            .map(|(count, _)| count)
    }

    pub fn scan(&self, table: &str) -> Result<Vec<Vec<Value>>, AlterError> {
        dml::scan(&self.catalog, &self.storage, table)
    }

    pub fn row_oids(&self, table: &str) -> Result<Vec<Option<Oid>>, AlterError> {
        dml::row_oids(&self.catalog, &self.storage, table)
    }

    pub fn open_cursor(&mut self, name: &str, table: &str) -> Result<(), AlterError> {
        let relid = self.catalog.lookup_required(table)?;
        self.session.open_cursor(name, relid);
        Ok(())
    }

    pub fn close_cursor(&mut self, name: &str) -> bool {
        self.session.close_cursor(name)
    }

    // ---- shared objects -----------------------------------------------

    pub fn create_role(&mut self, name: &str, superuser: bool) -> Result<(), AlterError> {
        if self.catalog.roles.contains_key(name) {
            return Err(AlterError::DuplicateObject {
                message: format!("role \"{name}\" already exists"),
            });
        }
        self.catalog.roles.insert(
            name.into(),
            RoleDef {
                name: name.into(),
                superuser,
                policy_exempt: superuser,
            },
        );
        Ok(())
    }

    pub fn create_tablespace(&mut self, name: &str) -> Result<(), AlterError> {
        if self.catalog.tablespaces.insert(name.into()).is_some() {
            return Err(AlterError::DuplicateObject {
                message: format!("tablespace \"{name}\" already exists"),
            });
        }
        Ok(())
    }

    pub fn create_domain(&mut self, domain: DomainDef) -> Result<(), AlterError> {
        if self.catalog.domains.contains_key(domain.name.as_str()) {
            return Err(AlterError::DuplicateObject {
                message: format!("type \"{}\" already exists", domain.name),
            });
        }
        self.catalog.domains.insert(domain.name.clone(), domain);
        Ok(())
    }

    pub fn grant(&mut self, role: &str, table: &str, privilege: Privilege) -> Result<(), AlterError> {
        self.catalog.role(role)?;
        let relid = self.catalog.lookup_required(table)?;
        self.catalog.grants.insert((role.into(), relid, privilege));
        Ok(())
    }

    pub fn comment_on(&mut self, addr: ObjectAddress, comment: Option<&str>) {
        self.catalog.set_comment(addr, comment.map(str::to_string));
    }
}

fn aborted() -> AlterError {
    AlterError::InvalidTransactionState {
        message: "current transaction is aborted, commands ignored until end of transaction block"
            .into(),
    }
}

fn savepoint_position(tx: &Transaction, name: &str) -> Result<usize, AlterError> {
    tx.savepoints
        .iter()
        .rposition(|s| s.name == name)
        .ok_or_else(|| AlterError::InvalidTransactionState {
            message: format!("savepoint \"{name}\" does not exist"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alter::command::Subcommand;
    use crate::catalog::types::{ColumnType, TypeName};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn db_with_table() -> Database {
        let mut db = Database::open(EngineConfig::default()).expect("open");
        db.create_table(&CreateTableStmt::new(
            "t",
            vec![ColumnDef::new("a", TypeName::new(ColumnType::Integer))],
        ))
        .expect("create");
        db
    }

    #[test]
    fn rollback_restores_catalog() {
        let mut db = db_with_table();
        db.begin().expect("begin");
        db.alter(&AlterTableStmt::new(
            "t",
            vec![Subcommand::AddColumn {
                column: ColumnDef::new("b", TypeName::new(ColumnType::Text)),
                if_not_exists: false,
            }],
        ))
        .expect("alter");
        assert!(db.relation("t").expect("t").attribute_by_name("b").is_some());
        db.rollback().expect("rollback");
        assert!(db.relation("t").expect("t").attribute_by_name("b").is_none());
    }

    #[test]
    fn failed_block_rejects_statements_until_rollback() {
        let mut db = db_with_table();
        db.begin().expect("begin");
        let err = db
            .alter(&AlterTableStmt::new(
                "t",
                vec![Subcommand::DropColumn {
                    column: "missing".into(),
                    behavior: DropBehavior::Restrict,
                    missing_ok: false,
                }],
            ))
            .expect_err("no such column");
        assert!(matches!(err, AlterError::UndefinedColumn { .. }));
        let next = db.insert("t", vec![vec![Value::from(1)]]).expect_err("aborted");
        assert!(matches!(next, AlterError::InvalidTransactionState { .. }));
        assert!(db.commit().is_err());
        assert!(!db.in_transaction());
        assert_eq!(db.insert("t", vec![vec![Value::from(1)]]).expect("insert"), 1);
    }

    #[test]
    fn savepoint_rollback_keeps_earlier_work() {
        let mut db = db_with_table();
        db.begin().expect("begin");
        db.insert("t", vec![vec![Value::from(1)]]).expect("insert");
        db.savepoint("s1").expect("savepoint");
        db.insert("t", vec![vec![Value::from(2)]]).expect("insert");
        db.rollback_to_savepoint("s1").expect("rollback to");
        db.commit().expect("commit");
        assert_eq!(db.scan("t").expect("scan"), vec![vec![Value::Integer(1)]]);
    }

    #[test]
    fn savepoint_outside_block_is_rejected() {
        let mut db = db_with_table();
        assert!(matches!(
            db.savepoint("s"),
            Err(AlterError::InvalidTransactionState { .. })
        ));
    }

    struct Counter(AtomicUsize);

    impl EventHook for Counter {
        fn on_event(&self, _event: &AlterEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn hooks_see_each_subcommand() {
        let mut db = db_with_table();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        db.add_event_hook(counter.clone());
        db.alter(&AlterTableStmt::new(
            "t",
            vec![
                Subcommand::AddColumn {
                    column: ColumnDef::new("b", TypeName::new(ColumnType::Integer)),
                    if_not_exists: false,
                },
                Subcommand::AddColumn {
                    column: ColumnDef::new("c", TypeName::new(ColumnType::Integer)),
                    if_not_exists: false,
                },
            ],
        ))
        .expect("alter");
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn locks_released_at_statement_end() {
        let mut db = db_with_table();
        let relid = db.catalog().lookup_required("t").expect("t");
        db.insert("t", vec![vec![Value::from(1)]]).expect("insert");
        assert_eq!(db.lock_manager().held_by(db.session().id, relid), None);
    }
}
