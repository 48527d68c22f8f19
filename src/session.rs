//! Per-session transactional state: command counter and invalidations,
//! on-commit actions for temporary tables, deferred storage unlinks, open
//! cursors and pending trigger events.

use crate::catalog::schema::OnCommitAction;
use crate::catalog::types::Oid;
use crate::error::AlterError;
use crate::lock::{LockMode, SessionId};
use crate::storage::StorageId;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub type SubTransactionId = u32;

pub const TOP_SUBTRANSACTION: SubTransactionId = 1;

/// Creating subtransaction of items that outlived an earlier commit.
const COMMITTED_EARLIER: SubTransactionId = 0;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Relation cache invalidation emitted at a command boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalidation {
    pub relid: Oid,
    pub command_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OnCommitItem {
    relid: Oid,
    action: OnCommitAction,
    creating_subid: SubTransactionId,
    /// Set once the relation is dropped in this transaction.
    deleting_subid: Option<SubTransactionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingUnlink {
    storage: StorageId,
    /// True: remove at commit (old storage). False: remove at abort (new storage).
    at_commit: bool,
    subid: SubTransactionId,
}

/// Work the caller performs once a transaction outcome is known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOfTransaction {
    pub unlink: Vec<StorageId>,
}

/// Cooperative cancellation flag polled between rows.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), AlterError> {
        if self.is_cancelled() {
            return Err(AlterError::QueryCanceled);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cursor {
    name: String,
    relid: Oid,
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    command_id: u32,
    pending_invalidations: BTreeSet<Oid>,
    invalidations: Vec<Invalidation>,
    on_commit: Vec<OnCommitItem>,
    pending_unlinks: Vec<PendingUnlink>,
    cursors: Vec<Cursor>,
    pending_trigger_events: Vec<Oid>,
    subxacts: Vec<SubTransactionId>,
    next_subid: SubTransactionId,
    lock_log: Vec<(Oid, LockMode)>,
    pub cancel: CancelToken,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            command_id: 0,
            pending_invalidations: BTreeSet::new(),
            invalidations: Vec::new(),
            on_commit: Vec::new(),
            pending_unlinks: Vec::new(),
            cursors: Vec::new(),
            pending_trigger_events: Vec::new(),
            subxacts: vec![TOP_SUBTRANSACTION],
            next_subid: TOP_SUBTRANSACTION + 1,
            lock_log: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn command_id(&self) -> u32 {
        self.command_id
    }

    pub fn current_subid(&self) -> SubTransactionId {
        self.subxacts.last().copied().unwrap_or(TOP_SUBTRANSACTION)
    }

    pub fn subxact_depth(&self) -> usize {
        self.subxacts.len() - 1
    }

    pub fn invalidate(&mut self, relid: Oid) {
        self.pending_invalidations.insert(relid);
    }

    /// Command boundary: later commands see earlier catalog changes, and
    /// queued invalidations are sent.
    pub fn command_counter_increment(&mut self) {
        self.command_id += 1;
        let command_id = self.command_id;
        let pending = std::mem::take(&mut self.pending_invalidations);
        self.invalidations
            .extend(pending.into_iter().map(|relid| Invalidation { relid, command_id }));
    }

    pub fn invalidations(&self) -> &[Invalidation] {
        &self.invalidations
    }

    pub fn take_invalidations(&mut self) -> Vec<Invalidation> {
        std::mem::take(&mut self.invalidations)
    }

    pub fn record_lock(&mut self, relid: Oid, mode: LockMode) {
        self.lock_log.push((relid, mode));
    }

    pub fn lock_log(&self) -> &[(Oid, LockMode)] {
        &self.lock_log
    }

    pub fn open_cursor(&mut self, name: &str, relid: Oid) {
        self.cursors.push(Cursor {
            name: name.to_string(),
            relid,
        });
    }

    pub fn close_cursor(&mut self, name: &str) -> bool {
        let before = self.cursors.len();
        self.cursors.retain(|c| c.name != name);
        before != self.cursors.len()
    }

    pub fn queue_trigger_event(&mut self, relid: Oid) {
        self.pending_trigger_events.push(relid);
    }

    /// Relations with trigger events queued for commit, in queue order.
    pub fn pending_trigger_events(&self) -> &[Oid] {
        &self.pending_trigger_events
    }

    pub fn fire_pending_trigger_events(&mut self) {
        self.pending_trigger_events.clear();
    }

    /// Refuses to alter a relation this session is still reading or has
    /// deferred trigger work for.
    pub fn check_table_not_in_use(&self, relid: Oid, name: &str, stmt: &str) -> Result<(), AlterError> {
        if self.cursors.iter().any(|c| c.relid == relid) {
            return Err(AlterError::in_use(format!(
                "cannot {stmt} \"{name}\" because it is being used by active queries in this session"
            )));
        }
        if self.pending_trigger_events.contains(&relid) {
            return Err(AlterError::in_use(format!(
                "cannot {stmt} \"{name}\" because it has pending trigger events"
            )));
        }
        Ok(())
    }

    pub fn register_on_commit(&mut self, relid: Oid, action: OnCommitAction) {
        // Nothing to do at commit for the default behaviours.
        if matches!(action, OnCommitAction::Noop | OnCommitAction::PreserveRows) {
            return;
        }
        let creating_subid = self.current_subid();
        self.on_commit.push(OnCommitItem {
            relid,
            action,
            creating_subid,
            deleting_subid: None,
        });
    }

    pub fn remove_on_commit(&mut self, relid: Oid) {
        let subid = self.current_subid();
        for item in self.on_commit.iter_mut().filter(|i| i.relid == relid) {
            item.deleting_subid.get_or_insert(subid);
        }
    }

    /// Actions to run just before commit: relations to truncate and to drop.
    pub fn pre_commit_actions(&self) -> (Vec<Oid>, Vec<Oid>) {
        let mut truncate = Vec::new();
        let mut drop = Vec::new();
        for item in self.on_commit.iter().filter(|i| i.deleting_subid.is_none()) {
            match item.action {
                OnCommitAction::DeleteRows => truncate.push(item.relid),
                OnCommitAction::Drop => drop.push(item.relid),
                OnCommitAction::Noop | OnCommitAction::PreserveRows => {}
            }
        }
        (truncate, drop)
    }

    pub fn on_commit_registered(&self, relid: Oid) -> bool {
        self.on_commit
            .iter()
            .any(|i| i.relid == relid && i.deleting_subid.is_none())
    }

    /// Schedules `storage` for removal when the transaction ends:
    /// at commit for storage being replaced, at abort for new storage.
    pub fn schedule_unlink(&mut self, storage: StorageId, at_commit: bool) {
        let subid = self.current_subid();
        self.pending_unlinks.push(PendingUnlink {
            storage,
            at_commit,
            subid,
        });
    }

    pub fn pending_unlink_count(&self) -> usize {
        self.pending_unlinks.len()
    }

    pub fn begin_subtransaction(&mut self) -> SubTransactionId {
        let subid = self.next_subid;
        self.next_subid += 1;
        self.subxacts.push(subid);
        subid
    }

    pub fn end_subtransaction(&mut self, commit: bool) -> Result<EndOfTransaction, AlterError> {
        if self.subxacts.len() <= 1 {
            return Err(AlterError::InvalidTransactionState {
                message: "no active subtransaction".to_string(),
            });
        }
        let my = self.subxacts.pop().unwrap_or(TOP_SUBTRANSACTION);
        let parent = self.current_subid();
        let mut out = EndOfTransaction::default();
        if commit {
            for item in &mut self.on_commit {
                if item.creating_subid == my {
                    item.creating_subid = parent;
                }
                if item.deleting_subid == Some(my) {
                    item.deleting_subid = Some(parent);
                }
            }
            for unlink in &mut self.pending_unlinks {
                if unlink.subid == my {
                    unlink.subid = parent;
                }
            }
        } else {
            self.on_commit.retain(|i| i.creating_subid != my);
            for item in &mut self.on_commit {
                if item.deleting_subid == Some(my) {
                    item.deleting_subid = None;
                }
            }
            self.pending_unlinks.retain(|u| {
                if u.subid != my {
                    return true;
                }
                if !u.at_commit {
                    out.unlink.push(u.storage);
                }
                false
            });
        }
        Ok(out)
    }

    /// Ends the top-level transaction and resets all transaction state.
    pub fn end_transaction(&mut self, commit: bool) -> EndOfTransaction {
        let unlink = self
            .pending_unlinks
            .iter()
            .filter(|u| u.at_commit == commit)
            .map(|u| u.storage)
            .collect();
        self.pending_unlinks.clear();
        if commit {
            self.on_commit.retain(|i| i.deleting_subid.is_none());
            for item in &mut self.on_commit {
                item.creating_subid = COMMITTED_EARLIER;
            }
        } else {
            self.on_commit.retain(|i| i.creating_subid == COMMITTED_EARLIER);
            for item in &mut self.on_commit {
                item.deleting_subid = None;
            }
        }
        self.subxacts.truncate(1);
        self.pending_invalidations.clear();
        self.pending_trigger_events.clear();
        self.lock_log.clear();
        self.cancel.reset();
        EndOfTransaction { unlink }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidations_flush_at_command_boundaries() {
        let mut session = Session::new();
        session.invalidate(5);
        session.invalidate(5);
        session.invalidate(6);
        assert!(session.invalidations().is_empty());
        session.command_counter_increment();
        assert_eq!(session.invalidations().len(), 2);
        assert!(session.invalidations().iter().all(|i| i.command_id == 1));
    }

    #[test]
    fn unlinks_follow_transaction_outcome() {
        let mut session = Session::new();
        session.schedule_unlink(1, true);
        session.schedule_unlink(2, false);
        assert_eq!(session.end_transaction(true).unlink, vec![1]);
        session.schedule_unlink(3, true);
        session.schedule_unlink(4, false);
        assert_eq!(session.end_transaction(false).unlink, vec![4]);
    }

    #[test]
    fn subtransaction_abort_forgets_its_on_commit_items() {
        let mut session = Session::new();
        session.register_on_commit(10, OnCommitAction::DeleteRows);
        session.begin_subtransaction();
        session.register_on_commit(11, OnCommitAction::Drop);
        session.remove_on_commit(10);
        session.schedule_unlink(9, false);
        let out = session.end_subtransaction(false).expect("abort");
        assert_eq!(out.unlink, vec![9]);
        assert_eq!(session.pre_commit_actions(), (vec![10], vec![]));

        session.begin_subtransaction();
        session.register_on_commit(12, OnCommitAction::Drop);
        session.end_subtransaction(true).expect("commit");
        assert_eq!(session.pre_commit_actions(), (vec![10], vec![12]));
        assert!(session.end_subtransaction(true).is_err());
    }

    #[test]
    fn open_cursor_blocks_alter() {
        let mut session = Session::new();
        session.open_cursor("c1", 42);
        let err = session
            .check_table_not_in_use(42, "t", "ALTER TABLE")
            .expect_err("in use");
        assert!(err.to_string().contains("active queries"));
        assert!(session.close_cursor("c1"));
        session.queue_trigger_event(42);
        assert!(session.check_table_not_in_use(42, "t", "ALTER TABLE").is_err());
        session.fire_pending_trigger_events();
        assert!(session.check_table_not_in_use(42, "t", "ALTER TABLE").is_ok());
    }
}
