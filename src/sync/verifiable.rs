//! Verifiable lock
//!
//! `VerifiableLock` is the IRQ-saving [`Mutex`] plus a generation token.
//! Every acquisition hands out a fresh [`LockToken`]; code deep inside a
//! critical section can present that token to [`VerifiableLock::check`] to
//! assert it is still the holder, and [`VerifiableGuard::release`] refuses a
//! token from any other acquisition.
//!
//! The generation counter only exists in debug builds. Release builds keep
//! the guard and the API, but tokens are zero-sized and every check passes.
//!
//! # Example
//! ```ignore
//! let guard = mac_phy.acquire();
//! let token = guard.token();
//! debug_assert!(mac_phy.check(token));
//! guard.release(token);
//! ```

use core::ops::{Deref, DerefMut};
#[cfg(debug_assertions)]
use core::sync::atomic::{AtomicU32, Ordering};

use super::mutex::{Mutex, MutexGuard};

/// Generations above this value restart at 1
#[cfg(debug_assertions)]
const GENERATION_WRAP: u32 = 0x8000_0000;

/// Proof of one particular acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockToken {
    #[cfg(debug_assertions)]
    generation: u32,
}

pub struct VerifiableLock<T> {
    inner: Mutex<T>,
    #[cfg(debug_assertions)]
    generation: AtomicU32,
}

impl<T> VerifiableLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            #[cfg(debug_assertions)]
            generation: AtomicU32::new(0),
        }
    }

    /// Block until exclusive, masking interrupts for the critical section
    pub fn acquire(&self) -> VerifiableGuard<'_, T> {
        let guard = self.inner.lock();
        let token = self.next_token();
        VerifiableGuard {
            lock: self,
            guard,
            token,
        }
    }

    /// Non-blocking "caller must already hold this lock" assertion helper
    pub fn check(&self, token: LockToken) -> bool {
        #[cfg(debug_assertions)]
        {
            self.inner.is_locked() && self.generation.load(Ordering::Relaxed) == token.generation
        }
        #[cfg(not(debug_assertions))]
        {
            let _ = token;
            true
        }
    }

    #[cfg(debug_assertions)]
    fn next_token(&self) -> LockToken {
        // Only the holder advances the counter, so load/store is enough.
        let mut generation = self.generation.load(Ordering::Relaxed).wrapping_add(1);
        if generation > GENERATION_WRAP {
            generation = 1;
        }
        self.generation.store(generation, Ordering::Relaxed);
        LockToken { generation }
    }

    #[cfg(not(debug_assertions))]
    fn next_token(&self) -> LockToken {
        LockToken {}
    }
}

/// Scoped holder of a [`VerifiableLock`]
///
/// Dropping the guard releases the lock without a token check; use
/// [`release`](Self::release) where the caller wants the check.
pub struct VerifiableGuard<'a, T> {
    lock: &'a VerifiableLock<T>,
    guard: MutexGuard<'a, T>,
    token: LockToken,
}

impl<'a, T> VerifiableGuard<'a, T> {
    pub fn token(&self) -> LockToken {
        self.token
    }

    /// The lock this guard belongs to
    pub fn lock(&self) -> &'a VerifiableLock<T> {
        self.lock
    }

    /// Release with a token check
    ///
    /// # Panics
    ///
    /// In debug builds, if `token` did not come from this acquisition.
    pub fn release(self, token: LockToken) {
        debug_assert!(
            token == self.token,
            "VerifiableLock released with a token from another acquisition"
        );
        drop(self);
    }
}

impl<T> Deref for VerifiableGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for VerifiableGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
