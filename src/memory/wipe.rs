//! Zeroing the optimizer cannot elide.

use zeroize::Zeroize;

/// Zero `len` bytes at `ptr`.
///
/// Goes through `zeroize`, which lowers to volatile writes with a compiler
/// fence, so the stores survive even when the buffer is dead afterwards,
/// which is the case that matters when scrubbing key material.
///
/// # Safety
/// - `ptr` must be valid for reads and writes of `len` bytes.
/// - No other reference to the range may exist for the duration of the
///   call.
pub(crate) unsafe fn wipe(ptr: *mut u8, len: usize) {
    if len == 0 {
        return;
    }
    // Safety: bounds and exclusivity upheld by the caller.
    let bytes = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
    bytes.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wipe_clears_every_byte() {
        let mut buf = vec![0xAAu8; 257];
        // Safety: test code; buf is exclusively owned.
        unsafe { wipe(buf.as_mut_ptr(), buf.len()) };
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wipe_partial_range() {
        let mut buf = vec![0xFFu8; 64];
        // Safety: test code; the range is in bounds.
        unsafe { wipe(buf.as_mut_ptr(), 16) };
        assert!(buf[..16].iter().all(|&b| b == 0));
        assert!(buf[16..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_wipe_zero_len_is_noop() {
        let mut buf = [0xABu8; 4];
        // Safety: test code.
        unsafe { wipe(buf.as_mut_ptr(), 0) };
        assert_eq!(buf, [0xAB; 4]);
    }
}
