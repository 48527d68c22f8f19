//! Relation-level lock manager shared between sessions.

use crate::catalog::types::Oid;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

pub type SessionId = u64;

/// Table lock strengths, weakest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum LockMode {
    AccessShare,
    RowShare,
    RowExclusive,
    ShareUpdateExclusive,
    Share,
    ShareRowExclusive,
    Exclusive,
    AccessExclusive,
}

impl LockMode {
    pub const ALL: [LockMode; 8] = [
        LockMode::AccessShare,
        LockMode::RowShare,
        LockMode::RowExclusive,
        LockMode::ShareUpdateExclusive,
        LockMode::Share,
        LockMode::ShareRowExclusive,
        LockMode::Exclusive,
        LockMode::AccessExclusive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LockMode::AccessShare => "AccessShareLock",
            LockMode::RowShare => "RowShareLock",
            LockMode::RowExclusive => "RowExclusiveLock",
            LockMode::ShareUpdateExclusive => "ShareUpdateExclusiveLock",
            LockMode::Share => "ShareLock",
            LockMode::ShareRowExclusive => "ShareRowExclusiveLock",
            LockMode::Exclusive => "ExclusiveLock",
            LockMode::AccessExclusive => "AccessExclusiveLock",
        }
    }

    pub fn conflicts_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match self {
            AccessShare => other == AccessExclusive,
            RowShare => matches!(other, Exclusive | AccessExclusive),
            RowExclusive => matches!(other, Share | ShareRowExclusive | Exclusive | AccessExclusive),
            ShareUpdateExclusive => matches!(
                other,
                ShareUpdateExclusive | Share | ShareRowExclusive | Exclusive | AccessExclusive
            ),
            Share => matches!(
                other,
                RowExclusive | ShareUpdateExclusive | ShareRowExclusive | Exclusive | AccessExclusive
            ),
            ShareRowExclusive => matches!(
                other,
                RowExclusive | ShareUpdateExclusive | Share | ShareRowExclusive | Exclusive | AccessExclusive
            ),
            Exclusive => !matches!(other, AccessShare),
            AccessExclusive => true,
        }
    }
}

#[derive(Debug, Default)]
struct LockTable {
    held: HashMap<Oid, Vec<(SessionId, LockMode)>>,
}

impl LockTable {
    fn grantable(&self, session: SessionId, relid: Oid, mode: LockMode) -> bool {
        self.held.get(&relid).is_none_or(|holders| {
            holders
                .iter()
                .all(|(holder, held)| *holder == session || !mode.conflicts_with(*held))
        })
    }

    fn grant(&mut self, session: SessionId, relid: Oid, mode: LockMode) {
        let holders = self.held.entry(relid).or_default();
        if !holders.contains(&(session, mode)) {
            holders.push((session, mode));
        }
    }
}

/// Locks are held until [`LockManager::release_all`] at transaction end.
/// Waiting has no timeout.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, session: SessionId, relid: Oid, mode: LockMode) {
        let mut table = self.table.lock();
        while !table.grantable(session, relid, mode) {
            debug!(session, relid, mode = mode.name(), "waiting for relation lock");
            self.released.wait(&mut table);
        }
        table.grant(session, relid, mode);
    }

    pub fn try_lock(&self, session: SessionId, relid: Oid, mode: LockMode) -> bool {
        let mut table = self.table.lock();
        if !table.grantable(session, relid, mode) {
            return false;
        }
        table.grant(session, relid, mode);
        true
    }

    /// Strongest mode `session` holds on `relid`.
    pub fn held_by(&self, session: SessionId, relid: Oid) -> Option<LockMode> {
        self.table.lock().held.get(&relid).and_then(|holders| {
            holders
                .iter()
                .filter(|(holder, _)| *holder == session)
                .map(|(_, mode)| *mode)
                .max()
        })
    }

    pub fn release_all(&self, session: SessionId) {
        let mut table = self.table.lock();
        table.held.retain(|_, holders| {
            holders.retain(|(holder, _)| *holder != session);
            !holders.is_empty()
        });
        drop(table);
        self.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn conflict_table_is_symmetric() {
        for a in LockMode::ALL {
            for b in LockMode::ALL {
                assert_eq!(a.conflicts_with(b), b.conflicts_with(a), "{a:?} vs {b:?}");
            }
        }
        assert!(!LockMode::ShareUpdateExclusive.conflicts_with(LockMode::RowExclusive));
        assert!(LockMode::ShareRowExclusive.conflicts_with(LockMode::ShareRowExclusive));
    }

    #[test]
    fn own_locks_never_conflict() {
        let manager = LockManager::new();
        manager.lock(1, 100, LockMode::AccessExclusive);
        assert!(manager.try_lock(1, 100, LockMode::AccessShare));
        assert!(!manager.try_lock(2, 100, LockMode::AccessShare));
        assert_eq!(manager.held_by(1, 100), Some(LockMode::AccessExclusive));
        manager.release_all(1);
        assert!(manager.try_lock(2, 100, LockMode::AccessShare));
    }

    #[test]
    fn blocked_session_proceeds_after_release() {
        let manager = Arc::new(LockManager::new());
        manager.lock(1, 7, LockMode::AccessExclusive);
        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let manager = Arc::clone(&manager);
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                manager.lock(2, 7, LockMode::AccessShare);
                acquired.store(true, Ordering::SeqCst);
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        manager.release_all(1);
        waiter.join().expect("waiter");
        assert!(acquired.load(Ordering::SeqCst));
    }
}
