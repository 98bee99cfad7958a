use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

/// Where a guard was taken, for the poisoned-lock warning.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LockSite {
    pub module: &'static str,
    pub op: &'static str,
}

impl LockSite {
    pub(crate) const fn new(module: &'static str, op: &'static str) -> Self {
        Self { module, op }
    }
}

fn recover<G>(result: LockResult<G>, site: LockSite, kind: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op = site.op,
            target_module = site.module,
            lock_kind = kind,
            result = "poisoned_recovered",
            hint = "in-process cache state may be stale after a panic elsewhere",
            "Recovered from poisoned cache lock"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn read<T>(lock: &RwLock<T>, site: LockSite) -> RwLockReadGuard<'_, T> {
    recover(lock.read(), site, "rwlock.read")
}

pub(crate) fn write<T>(lock: &RwLock<T>, site: LockSite) -> RwLockWriteGuard<'_, T> {
    recover(lock.write(), site, "rwlock.write")
}

pub(crate) fn lock<T>(mutex: &Mutex<T>, site: LockSite) -> MutexGuard<'_, T> {
    recover(mutex.lock(), site, "mutex.lock")
}
