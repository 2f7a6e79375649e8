//! A page-locked pool for cryptographically sensitive allocations.
//!
//! One contiguous anonymous mapping, pinned with `mlock` and excluded from
//! core dumps where the platform allows, is carved into small aligned
//! regions by a best-fit free list. The backing pages never reach swap,
//! every handout is zeroed, and the whole region is scrubbed again on
//! teardown. Callers treat a `None`/`false` answer as "use the ordinary
//! heap instead": the pool is a bounded budget, not a general allocator.

use super::free_list::FreeList;
use super::mlock::{MlockOps, PlatformMlockOps, PoolError};
use super::stats;
use super::wipe::wipe;
#[cfg(debug_assertions)]
use fixedbitset::FixedBitSet;
use std::ptr::NonNull;

use crate::sync::{Mutex, OnceLock};

/// Mutable allocator state, guarded by the pool mutex as one unit.
struct PoolState {
    free: FreeList,
    /// Per-byte liveness of handed-out ranges. Debug builds only: catches
    /// double frees and frees of ranges the pool never handed out.
    #[cfg(debug_assertions)]
    live: FixedBitSet,
}

/// A fixed-size pool of page-locked memory.
///
/// Construction queries the process `RLIMIT_MEMLOCK` budget (capped at
/// [`MLOCK_UPPER_BOUND`](super::mlock::MLOCK_UPPER_BOUND)), maps and pins
/// that many bytes, and serves allocations from them until dropped. A zero
/// budget yields a *disabled* pool: every [`allocate`](Self::allocate)
/// returns `None` and every [`deallocate`](Self::deallocate) returns
/// `false`, so callers transparently fall back to the heap.
///
/// All operations serialize on one internal mutex; the critical sections
/// are bounded by the free-list length and no lock is ever held across a
/// syscall after construction.
pub struct LockedPool {
    /// Base of the locked mapping. `None` when the pool is disabled.
    base: Option<NonNull<u8>>,
    capacity: usize,
    state: Mutex<PoolState>,
}

// Safety: the raw base pointer is owned by the pool, and all mutation of
// the region and its bookkeeping happens behind the state mutex.
unsafe impl Send for LockedPool {}
// Safety: see above; &self operations take the mutex before touching state.
unsafe impl Sync for LockedPool {}

impl LockedPool {
    /// Build the pool from the process lockable-memory budget.
    ///
    /// Raises the soft `RLIMIT_MEMLOCK` to the hard limit (best effort)
    /// and sizes the pool to `min(limit, MLOCK_UPPER_BOUND)`. A limit of
    /// zero gives a disabled pool, which is not an error.
    ///
    /// # Errors
    ///
    /// Returns `PoolError` when the mapping cannot be created or cannot be
    /// pinned. Nothing is left mapped on failure.
    pub fn new() -> Result<Self, PoolError> {
        Self::with_capacity(PlatformMlockOps::memlock_limit())
    }

    /// Build a pool over exactly `capacity` bytes of locked memory.
    ///
    /// [`new`](Self::new) resolves the capacity from the OS limit; this
    /// entry point injects it directly, which is how the test suite builds
    /// small deterministic pools. `capacity == 0` produces a disabled
    /// pool.
    ///
    /// # Errors
    ///
    /// Same contract as [`new`](Self::new).
    pub fn with_capacity(capacity: usize) -> Result<Self, PoolError> {
        if capacity == 0 {
            log::warn!("no lockable memory budget; secure pool disabled");
            return Ok(Self::disabled());
        }

        // Safety: fresh anonymous mapping of `capacity` bytes.
        let base = unsafe { PlatformMlockOps::map(capacity)? };

        // Safety: the mapping above is `capacity` bytes and exclusively
        // ours until we return.
        unsafe { wipe(base.as_ptr(), capacity) };

        // Safety: `base` is a live mapping of `capacity` bytes.
        if let Err(e) = unsafe { PlatformMlockOps::lock(base, capacity) } {
            log::warn!("could not pin {capacity}-byte pool: {e}");
            // An unlocked mapping must not outlive the failure.
            // Safety: releasing the mapping created above.
            unsafe { PlatformMlockOps::unmap(base, capacity) };
            return Err(e);
        }

        log::debug!("locked pool ready: {capacity} bytes at {base:p}");
        stats::LOCKED_POOL_CAPACITY.add(capacity);

        Ok(Self {
            base: Some(base),
            capacity,
            state: Mutex::new(PoolState {
                free: FreeList::new(capacity),
                #[cfg(debug_assertions)]
                live: FixedBitSet::with_capacity(capacity),
            }),
        })
    }

    fn disabled() -> Self {
        Self {
            base: None,
            capacity: 0,
            state: Mutex::new(PoolState {
                free: FreeList::new(0),
                #[cfg(debug_assertions)]
                live: FixedBitSet::new(),
            }),
        }
    }

    /// True when construction found no lockable-memory budget.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.base.is_none()
    }

    /// Total bytes backing the pool (0 when disabled).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently on the free list.
    ///
    /// # Panics
    ///
    /// Panics if the pool mutex is poisoned.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.state.lock().unwrap().free.free_bytes()
    }

    /// Hand out `num_elems * elem_size` zeroed bytes aligned to
    /// `elem_size`.
    ///
    /// The requested alignment *is* the element size: array-of-`elem_size`
    /// allocations land naturally aligned without a separate parameter.
    /// This is a deliberately narrow contract; callers that need a
    /// stricter alignment round their element size up to it.
    ///
    /// Returns `None` when the pool is disabled, when the byte count is
    /// zero or overflows `usize`, when it is at least the whole pool
    /// (strictly: `n >= capacity` is refused), or when no free extent can
    /// hold it. All of these are in-band "fall back to the heap" answers,
    /// never panics.
    ///
    /// # Panics
    ///
    /// Panics if the pool mutex is poisoned.
    pub fn allocate(&self, num_elems: usize, elem_size: usize) -> Option<NonNull<u8>> {
        let base = self.base?;

        let n = num_elems.checked_mul(elem_size)?;
        if n == 0 || n >= self.capacity {
            return None;
        }

        let mut state = self.state.lock().unwrap();
        let offset = state.free.reserve(n, elem_size)?;

        #[cfg(debug_assertions)]
        {
            debug_assert_eq!(
                state.live.count_ones(offset..offset + n),
                0,
                "free list handed out bytes that are still live"
            );
            state.live.set_range(offset..offset + n, true);
        }

        stats::LOCKED_POOL_IN_USE.add(n);
        stats::LOCKED_POOL_LIVE_ALLOCS.add(1);

        // Safety: `offset + n <= capacity`, so the range is inside the
        // mapping, and it was free until this call removed it from the
        // list, so we are the only writer.
        let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) };
        // Safety: same range; zero it before the caller ever sees it.
        unsafe { wipe(ptr.as_ptr(), n) };

        debug_assert!(
            (ptr.as_ptr() as usize).is_multiple_of(elem_size),
            "returning a misaligned pointer"
        );

        Some(ptr)
    }

    /// Take back a range previously handed out by
    /// [`allocate`](Self::allocate).
    ///
    /// Returns `false` when the pool is disabled or `ptr` does not point
    /// into it; the caller then routes the pointer to whatever allocator
    /// it actually came from. The bytes are *not* wiped here: the caller
    /// may legitimately hold the contents up to this very call and is
    /// responsible for scrubbing them first. (Handouts are always wiped,
    /// so stale contents never resurface through `allocate`.)
    ///
    /// The range must exactly match a prior `allocate` that has not been
    /// freed since; the pool cannot detect violations in release builds.
    ///
    /// # Panics
    ///
    /// Panics when `ptr` is inside the pool but `ptr + n` runs past its
    /// end, or when the byte count overflows. Both indicate a caller bug,
    /// not an in-band failure. Also panics if the pool mutex is poisoned.
    pub fn deallocate(&self, ptr: NonNull<u8>, num_elems: usize, elem_size: usize) -> bool {
        let Some(base) = self.base else {
            return false;
        };

        // allocate refused overflowing and empty requests, so neither can
        // name a range this pool handed out.
        let n = num_elems
            .checked_mul(elem_size)
            .expect("deallocate: byte count overflows");
        if n == 0 {
            return false;
        }

        let addr = ptr.as_ptr() as usize;
        let pool = base.as_ptr() as usize;
        if addr < pool || addr >= pool + self.capacity {
            return false;
        }

        let end = addr.checked_add(n).expect("deallocate: range end overflows");
        assert!(
            end <= pool + self.capacity,
            "pointer partially overlaps the pool"
        );

        let start = addr - pool;
        let mut state = self.state.lock().unwrap();

        #[cfg(debug_assertions)]
        {
            debug_assert_eq!(
                state.live.count_ones(start..start + n),
                n,
                "freeing bytes that were not live"
            );
            state.live.set_range(start..start + n, false);
        }

        state.free.release(start, n);

        stats::LOCKED_POOL_IN_USE.sub(n);
        stats::LOCKED_POOL_LIVE_ALLOCS.sub(1);

        true
    }

    /// Free-list snapshot as `(offset, len)` pairs, for invariant checks.
    #[cfg(any(test, loom))]
    pub(crate) fn free_extents(&self) -> Vec<(usize, usize)> {
        let state = self.state.lock().unwrap();
        state.free.assert_canonical();
        state
            .free
            .extents()
            .iter()
            .map(|e| (e.offset, e.len))
            .collect()
    }
}

impl Drop for LockedPool {
    fn drop(&mut self) {
        let Some(base) = self.base.take() else {
            return;
        };
        // Scrub before the pages go back to the OS; unlock and unmap are
        // best effort at teardown.
        // Safety: the mapping is still live and, with the pool being
        // dropped, exclusively ours.
        unsafe {
            wipe(base.as_ptr(), self.capacity);
            PlatformMlockOps::unlock(base, self.capacity);
            PlatformMlockOps::unmap(base, self.capacity);
        }
        stats::LOCKED_POOL_CAPACITY.sub(self.capacity);
        self.capacity = 0;
    }
}

static GLOBAL_LOCKED_POOL: OnceLock<LockedPool> = OnceLock::new();

/// Process-wide pool facade.
///
/// The first access constructs the singleton from the OS lockable-memory
/// limit; every later access returns the same instance. The pool lives
/// until process exit: statics are never dropped, and the pages cannot
/// reach swap in the meantime, so the OS reclaiming the locked mapping at
/// teardown leaks nothing sensitive.
pub struct GlobalLockedPool;

impl GlobalLockedPool {
    fn ensure_initialized() -> Result<&'static LockedPool, PoolError> {
        if let Some(pool) = GLOBAL_LOCKED_POOL.get() {
            return Ok(pool);
        }

        let candidate = LockedPool::new()?;
        drop(GLOBAL_LOCKED_POOL.set(candidate));
        Ok(GLOBAL_LOCKED_POOL
            .get()
            .expect("global locked pool should be initialized"))
    }

    /// The process-wide pool instance.
    ///
    /// # Panics
    ///
    /// Panics when first-time construction fails (the mapping or the lock
    /// syscall was refused). A zero lockable-memory budget is *not* a
    /// failure; it yields a disabled pool.
    pub fn instance() -> &'static LockedPool {
        match Self::ensure_initialized() {
            Ok(pool) => pool,
            Err(e) => panic!("failed to initialize the global locked pool: {e}"),
        }
    }

    /// Fallible variant of [`instance`](Self::instance).
    ///
    /// # Errors
    ///
    /// Returns the construction error instead of panicking.
    pub fn try_instance() -> Result<&'static LockedPool, PoolError> {
        Self::ensure_initialized()
    }

    /// The singleton, if some earlier call already constructed it.
    pub fn get() -> Option<&'static LockedPool> {
        GLOBAL_LOCKED_POOL.get()
    }

    /// Allocate from the process pool. See [`LockedPool::allocate`].
    ///
    /// # Panics
    ///
    /// Panics when first-time construction fails; see
    /// [`instance`](Self::instance).
    pub fn allocate(num_elems: usize, elem_size: usize) -> Option<NonNull<u8>> {
        Self::instance().allocate(num_elems, elem_size)
    }

    /// Return a range to the process pool. See [`LockedPool::deallocate`].
    ///
    /// # Panics
    ///
    /// Panics when first-time construction fails; see
    /// [`instance`](Self::instance).
    pub fn deallocate(ptr: NonNull<u8>, num_elems: usize, elem_size: usize) -> bool {
        Self::instance().deallocate(ptr, num_elems, elem_size)
    }
}
