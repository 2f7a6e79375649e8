//! Page-locked storage for cryptographically sensitive material.
//!
//! `secpool` owns one contiguous, `mlock`ed, core-dump-excluded memory
//! region sized from the process `RLIMIT_MEMLOCK` budget (capped at
//! [`MLOCK_UPPER_BOUND`]) and carves it into small aligned regions with a
//! best-fit free list. Handouts are always zeroed; the whole pool is
//! scrubbed again on teardown; the backing pages can never reach swap.
//!
//! The intended caller is a crypto library's secret-key storage: ask the
//! pool first, fall back to the ordinary heap when it answers `None`, and
//! route frees through [`LockedPool::deallocate`], whose `bool` answer
//! says whether the pointer was the pool's to begin with.
//!
//! ```no_run
//! use secpool::GlobalLockedPool;
//!
//! // 128 bytes, aligned to 16 (alignment is the element size).
//! if let Some(key) = GlobalLockedPool::allocate(8, 16) {
//!     // ... use the zeroed, page-locked bytes ...
//!     assert!(GlobalLockedPool::deallocate(key, 8, 16));
//! }
//! ```

pub(crate) mod sync;

// public module: contains implementation details (hidden via pub(crate))
// and TEST_MUTEX (public for tests)
pub mod memory;

pub mod lookup;

// locked pool
pub use memory::mlock::{MLOCK_UPPER_BOUND, PoolError};
pub use memory::pool::{GlobalLockedPool, LockedPool};

// diagnostics
pub use memory::stats::{PoolStats, snapshot as pool_stats};

// algorithm lookup shim
pub use lookup::{HashFactory, HashFunction, HashRegistry, find_hash};
