pub(crate) mod free_list;
pub(crate) mod loom_tests;
pub(crate) mod mlock;
pub(crate) mod pool;
pub(crate) mod stats;
pub(crate) mod wipe;

#[cfg(test)]
crate::sync::static_rwlock! {
    pub static TEST_MUTEX: crate::sync::RwLock<()> = crate::sync::RwLock::new(());
}

/// Best-effort raise of the soft `RLIMIT_MEMLOCK` before a test builds a
/// locked pool. Parallel tests each pin whole pages, which can outgrow a
/// small default budget even when every individual pool is tiny.
#[cfg(test)]
pub(crate) fn raise_memlock_budget() {
    use mlock::MlockOps;
    let _ = mlock::PlatformMlockOps::memlock_limit();
}
