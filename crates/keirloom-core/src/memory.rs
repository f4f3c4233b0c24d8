//! Memory protection for seed material
//!
//! Two hardening measures:
//!
//! 1. **Core dump prevention**: `setrlimit(RLIMIT_CORE, 0)` so a crash
//!    never writes seed material to disk.
//! 2. **Page locking**: decrypted seeds live in `mlock`ed buffers that the
//!    OS may not swap out.
//!
//! Both are best-effort: failures are logged and execution continues, since
//! containers and unprivileged users may not be allowed either operation.

use std::sync::atomic::{AtomicBool, Ordering};
use zeroize::Zeroize;

/// Core dumps are disabled at most once per process.
static CORE_DUMPS_DISABLED: AtomicBool = AtomicBool::new(false);

/// Turn off core dumps process-wide.
///
/// Call early in startup, before any seed is decrypted. Returns `true` if
/// core dumps were successfully disabled (or already were).
pub fn disable_core_dumps() -> bool {
    if CORE_DUMPS_DISABLED.swap(true, Ordering::SeqCst) {
        return true;
    }

    #[cfg(unix)]
    {
        unix::disable_core_dumps_impl()
    }

    #[cfg(not(unix))]
    {
        log::warn!("core dump prevention not supported on this platform");
        false
    }
}

/// A buffer that is mlocked on creation and zeroized then munlocked on drop.
///
/// Holds decrypted seed material that must never hit swap.
pub struct SecretBuf {
    data: Vec<u8>,
    locked: bool,
}

impl SecretBuf {
    /// Allocate a zero-filled buffer and lock it in memory.
    pub fn new(len: usize) -> Self {
        let data = vec![0u8; len];
        let locked = if data.is_empty() {
            true
        } else {
            // SAFETY: the pointer and length come from a live Vec we own,
            // and the region stays allocated until munlock in Drop.
            unsafe { lock_region(data.as_ptr(), data.len()) }
        };

        if !locked {
            log::warn!("failed to mlock {} bytes; seed may be swappable", len);
        }

        Self { data, locked }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Whether the pages are actually locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for SecretBuf {
    fn drop(&mut self) {
        // Plaintext must be gone before the pages unlock
        self.data.zeroize();

        if self.locked && !self.data.is_empty() {
            // SAFETY: matches the lock_region call made in new()
            unsafe {
                unlock_region(self.data.as_ptr(), self.data.len());
            }
        }
    }
}

/// # Safety
/// `ptr` must point to a live allocation of at least `len` bytes that stays
/// allocated until the matching `unlock_region`.
unsafe fn lock_region(ptr: *const u8, len: usize) -> bool {
    #[cfg(unix)]
    {
        unix::mlock_impl(ptr, len)
    }

    #[cfg(not(unix))]
    {
        let _ = (ptr, len);
        false
    }
}

/// # Safety
/// `ptr` and `len` must match a previous `lock_region` call.
unsafe fn unlock_region(ptr: *const u8, len: usize) -> bool {
    #[cfg(unix)]
    {
        unix::munlock_impl(ptr, len)
    }

    #[cfg(not(unix))]
    {
        let _ = (ptr, len);
        true
    }
}

#[cfg(unix)]
mod unix {
    pub fn disable_core_dumps_impl() -> bool {
        // SAFETY: setrlimit with RLIMIT_CORE=0 is a standard POSIX call
        unsafe {
            let rlim = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            if libc::setrlimit(libc::RLIMIT_CORE, &rlim) != 0 {
                let errno = std::io::Error::last_os_error();
                log::warn!("failed to disable core dumps: {}", errno);
                return false;
            }
        }
        true
    }

    pub unsafe fn mlock_impl(ptr: *const u8, len: usize) -> bool {
        if libc::mlock(ptr as *const libc::c_void, len) != 0 {
            let errno = std::io::Error::last_os_error();
            log::warn!("mlock failed for {} bytes: {}", len, errno);
            return false;
        }
        true
    }

    pub unsafe fn munlock_impl(ptr: *const u8, len: usize) -> bool {
        libc::munlock(ptr as *const libc::c_void, len) == 0
    }
}
