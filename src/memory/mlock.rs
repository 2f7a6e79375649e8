use std::fmt;
use std::ptr::NonNull;

/// Hard cap on the pool size, regardless of what `RLIMIT_MEMLOCK` allows.
///
/// Linux defaults to 64 KiB of lockable memory per process, but the BSDs
/// hand out a sizeable fraction of total RAM. 512 KiB covers a
/// cryptographic working set while keeping many concurrent processes from
/// draining a machine's locked-memory budget.
pub const MLOCK_UPPER_BOUND: usize = 512 * 1024;

#[derive(Debug)]
pub enum PoolError {
    /// The anonymous mapping for the pool could not be created.
    MapFailed(std::io::Error),
    /// The mapping existed but could not be pinned in physical memory.
    /// The mapping has already been released when this is returned.
    LockFailed(std::io::Error),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::MapFailed(e) => write!(f, "failed to map locked pool: {e}"),
            PoolError::LockFailed(e) => write!(f, "failed to lock pool in memory: {e}"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::MapFailed(e) | PoolError::LockFailed(e) => Some(e),
        }
    }
}

/// Abstract interface for the virtual-memory syscalls the pool consumes.
pub(crate) trait MlockOps {
    /// Lockable-memory budget for this process, in bytes, capped at
    /// [`MLOCK_UPPER_BOUND`]. Raises the soft `RLIMIT_MEMLOCK` to the hard
    /// limit first (best effort). Returns 0 when nothing can be locked.
    fn memlock_limit() -> usize;

    /// Map `len` bytes of anonymous read/write memory, page-aligned,
    /// excluded from core dumps where the platform offers a way to ask.
    unsafe fn map(len: usize) -> Result<NonNull<u8>, PoolError>;

    /// Pin `[ptr, ptr + len)` in physical memory so it can never reach
    /// swap.
    unsafe fn lock(ptr: NonNull<u8>, len: usize) -> Result<(), PoolError>;

    /// Undo [`lock`](MlockOps::lock). Best effort; only called on teardown.
    unsafe fn unlock(ptr: NonNull<u8>, len: usize);

    /// Release the mapping entirely. Best effort; pointers into it are
    /// invalid afterwards.
    unsafe fn unmap(ptr: NonNull<u8>, len: usize);

    /// OS page size.
    fn page_size() -> usize;
}

pub(crate) struct PlatformMlockOps;

#[cfg(all(not(unix), not(any(loom, miri))))]
compile_error!("secpool needs mmap/mlock and supports only Unix-like targets.");

#[cfg(all(unix, not(any(loom, miri))))]
mod unix {
    use super::{MlockOps, PlatformMlockOps, PoolError};
    use std::io;
    use std::ptr::NonNull;

    /// FreeBSD can tag the mapping itself as not-for-core-dumps. Linux has
    /// no mmap flag for it; `MADV_DONTDUMP` after the fact is the
    /// equivalent. Elsewhere the hint simply does not exist.
    #[cfg(target_os = "freebsd")]
    const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NOCORE;
    #[cfg(not(target_os = "freebsd"))]
    const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

    impl MlockOps for PlatformMlockOps {
        fn memlock_limit() -> usize {
            let mut limits = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };

            // Safety: FFI call to getrlimit with a valid out-param.
            if unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut limits) } != 0 {
                return 0;
            }

            if limits.rlim_cur < limits.rlim_max {
                limits.rlim_cur = limits.rlim_max;
                // Safety: FFI calls to setrlimit/getrlimit. The raise is
                // best effort; the re-query reports whatever stuck.
                unsafe {
                    let _ = libc::setrlimit(libc::RLIMIT_MEMLOCK, &limits);
                    let _ = libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut limits);
                }
            }

            if limits.rlim_cur == libc::RLIM_INFINITY {
                return super::MLOCK_UPPER_BOUND;
            }
            // rlim_t is wider than usize on some targets; the cap keeps the
            // cast in range.
            std::cmp::min(limits.rlim_cur, super::MLOCK_UPPER_BOUND as libc::rlim_t) as usize
        }

        unsafe fn map(len: usize) -> Result<NonNull<u8>, PoolError> {
            // Safety: FFI call to mmap.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    MAP_FLAGS,
                    -1,
                    0,
                )
            };

            if ptr == libc::MAP_FAILED {
                return Err(PoolError::MapFailed(io::Error::last_os_error()));
            }

            let ptr = NonNull::new(ptr.cast::<u8>())
                .ok_or_else(|| PoolError::MapFailed(io::Error::other("mmap returned null")))?;

            #[cfg(target_os = "linux")]
            // Safety: FFI call to madvise on the mapping created above.
            // Failure leaves the pool usable, just visible in core dumps.
            unsafe {
                libc::madvise(ptr.as_ptr().cast::<libc::c_void>(), len, libc::MADV_DONTDUMP);
            }

            Ok(ptr)
        }

        unsafe fn lock(ptr: NonNull<u8>, len: usize) -> Result<(), PoolError> {
            // Safety: FFI call to mlock on a live mapping.
            if unsafe { libc::mlock(ptr.as_ptr().cast::<libc::c_void>(), len) } != 0 {
                return Err(PoolError::LockFailed(io::Error::last_os_error()));
            }
            Ok(())
        }

        unsafe fn unlock(ptr: NonNull<u8>, len: usize) {
            // Safety: FFI call to munlock on a live mapping.
            unsafe {
                libc::munlock(ptr.as_ptr().cast::<libc::c_void>(), len);
            }
        }

        unsafe fn unmap(ptr: NonNull<u8>, len: usize) {
            // Safety: FFI call to munmap; the caller gives up the mapping.
            unsafe {
                libc::munmap(ptr.as_ptr().cast::<libc::c_void>(), len);
            }
        }

        fn page_size() -> usize {
            use crate::sync::OnceLock;
            static CACHED: OnceLock<usize> = OnceLock::new();
            *CACHED.get_or_init(|| {
                // Safety: FFI call to sysconf.
                let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
                assert!(
                    raw > 0,
                    "sysconf(_SC_PAGESIZE) failed: {}",
                    io::Error::last_os_error()
                );
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                {
                    raw as usize
                }
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Loom/Miri mock: heap-backed MlockOps (no real mmap/mlock)
//
// Under `cfg(loom)` we cannot issue real syscalls — loom runs inside a
// single OS process with its own scheduler — and Miri has no FFI. Every
// "mapping" is a plain zeroed heap allocation; locking is a no-op and the
// budget is simply the cap. This is sufficient for testing the allocator's
// synchronization and bookkeeping; real pinning behaviour is exercised by
// the platform implementation in normal builds.
// ---------------------------------------------------------------------------
#[cfg(any(loom, miri))]
impl MlockOps for PlatformMlockOps {
    fn memlock_limit() -> usize {
        MLOCK_UPPER_BOUND
    }

    unsafe fn map(len: usize) -> Result<NonNull<u8>, PoolError> {
        if len == 0 {
            return Err(PoolError::MapFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "zero-size mapping",
            )));
        }
        let layout = std::alloc::Layout::from_size_align(len, 4096)
            .map_err(|e| PoolError::MapFailed(std::io::Error::other(e)))?;
        // Safety: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or_else(|| {
            PoolError::MapFailed(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "alloc returned null",
            ))
        })
    }

    unsafe fn lock(_ptr: NonNull<u8>, _len: usize) -> Result<(), PoolError> {
        Ok(()) // heap memory; nothing to pin
    }

    unsafe fn unlock(_ptr: NonNull<u8>, _len: usize) {}

    unsafe fn unmap(ptr: NonNull<u8>, len: usize) {
        let layout = std::alloc::Layout::from_size_align(len, 4096)
            .expect("layout was valid at map time");
        // Safety: ptr was allocated with the same layout via `map`.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }

    fn page_size() -> usize {
        4096
    }
}

#[cfg(all(test, not(any(loom, miri))))]
mod tests {
    use super::*;

    #[test]
    fn test_memlock_limit_capped() {
        let _guard = crate::memory::TEST_MUTEX.write().unwrap();
        let limit = PlatformMlockOps::memlock_limit();
        assert!(limit <= MLOCK_UPPER_BOUND);
    }

    #[test]
    fn test_map_lock_unlock_unmap_cycle() {
        let _guard = crate::memory::TEST_MUTEX.write().unwrap();
        if PlatformMlockOps::memlock_limit() == 0 {
            eprintln!("test_map_lock_unlock_unmap_cycle: no lockable memory on this system");
            return;
        }

        let len = PlatformMlockOps::page_size();
        // Safety: test code; the mapping is released before returning.
        unsafe {
            let ptr = PlatformMlockOps::map(len).expect("map failed");

            // Fresh anonymous pages read as zero.
            let slice = std::slice::from_raw_parts(ptr.as_ptr(), len);
            assert!(slice.iter().all(|&b| b == 0));

            PlatformMlockOps::lock(ptr, len).expect("mlock failed");

            let slice = std::slice::from_raw_parts_mut(ptr.as_ptr(), len);
            slice[0] = 42;
            slice[len - 1] = 24;
            assert_eq!(slice[0], 42);
            assert_eq!(slice[len - 1], 24);

            PlatformMlockOps::unlock(ptr, len);
            PlatformMlockOps::unmap(ptr, len);
        }
    }

    #[test]
    fn test_map_is_page_aligned() {
        let _guard = crate::memory::TEST_MUTEX.read().unwrap();
        let len = 1024;
        // Safety: test code; the mapping is released before returning.
        unsafe {
            let ptr = PlatformMlockOps::map(len).expect("map failed");
            assert!(
                (ptr.as_ptr() as usize).is_multiple_of(PlatformMlockOps::page_size()),
                "mmap returned an address not aligned to the page size"
            );
            PlatformMlockOps::unmap(ptr, len);
        }
    }

    #[test]
    fn test_page_size_is_power_of_two() {
        let size = PlatformMlockOps::page_size();
        assert!(size > 0);
        assert!(size.is_power_of_two(), "page size {size} is not a power of two");
    }
}
