//! IRQ-saving spinlock
//!
//! This module provides `Mutex`, a spinlock that masks interrupts while the
//! lock is held. Every piece of controller state that an interrupt handler
//! can reach lives behind one of these.
//!
//! ## Why mask interrupts?
//!
//! A plain spinlock deadlocks as soon as the interrupt handler wants a lock
//! that the interrupted code already holds:
//!
//! ```text
//! 1. Deferred worker acquires the Rx lock
//! 2. LAN911x raises RSFL
//! 3. Interrupt handler tries to acquire the Rx lock
//! 4. DEADLOCK: handler spins forever, worker never resumes
//! ```
//!
//! ## Implementation
//!
//! Same shape as Linux `spin_lock_irqsave()`:
//! 1. Save current IRQ state
//! 2. Mask interrupts
//! 3. Acquire spinlock
//! 4. On drop: release lock, restore IRQ state
//!
//! On bare-metal aarch64 the IRQ state is the DAIF register. Hosted builds
//! have no interrupt mask to touch; under `cfg(test)` a per-thread nesting
//! depth is kept instead so the simulated device knows when it may deliver
//! an interrupt.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Mutex that masks interrupts while locked
///
/// # Example
/// ```ignore
/// let stats = Mutex::new(Statistics::default());
///
/// let mut guard = stats.lock();
/// guard.rx_errors += 1;
/// // Interrupts restored when guard is dropped
/// ```
pub struct Mutex<T> {
    inner: UnsafeCell<T>,
    locked: AtomicBool,
}

// SAFETY: Mutex is Sync because:
// - Access to inner data is protected by atomic `locked` flag
// - IRQs are masked while lock is held (prevents concurrent interrupt access)
// - Only one thread/CPU can hold the lock at a time
unsafe impl<T: Send> Sync for Mutex<T> {}
unsafe impl<T: Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create a new mutex
    pub const fn new(value: T) -> Self {
        Self {
            inner: UnsafeCell::new(value),
            locked: AtomicBool::new(false),
        }
    }

    /// Acquire the lock (masks interrupts)
    ///
    /// Returns a guard that will restore interrupts when dropped.
    /// Spins if the lock is already held (should be rare - locks held briefly).
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let irq_state = IrqState::disable();

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        MutexGuard {
            mutex: self,
            irq_state,
        }
    }

    /// Whether some context currently holds the lock
    ///
    /// Only meaningful as a debug assertion; the answer may be stale by the
    /// time the caller looks at it.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// Guard returned by `Mutex::lock()`
///
/// Restores interrupt state when dropped.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    irq_state: IrqState,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Lock is held, so we have exclusive access
        unsafe { &*self.mutex.inner.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Lock is held, so we have exclusive access
        unsafe { &mut *self.mutex.inner.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
        self.irq_state.restore();
    }
}

/// Saved IRQ state (from DAIF register)
///
/// DAIF = Debug, SError, IRQ, FIQ mask bits
/// We only care about IRQ (bit 1) for this implementation.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
struct IrqState {
    daif: u64,
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
impl IrqState {
    /// Mask IRQs and return previous state
    fn disable() -> Self {
        let daif: u64;

        // SAFETY: Reading/writing DAIF is safe because:
        // 1. DAIF is accessible at EL1 (our exception level)
        // 2. MSR daifset masks interrupts atomically
        // 3. We save the old value to restore later
        unsafe {
            core::arch::asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack));
            core::arch::asm!("msr daifset, #2", options(nomem, nostack));
        }

        Self { daif }
    }

    /// Restore previous IRQ state
    fn restore(&self) {
        // SAFETY: Restoring DAIF is safe because:
        // 1. We're restoring a value we previously saved
        // 2. DAIF write is atomic (single MSR instruction)
        unsafe {
            core::arch::asm!("msr daif, {}", in(reg) self.daif, options(nomem, nostack));
        }
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
struct IrqState;

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
impl IrqState {
    fn disable() -> Self {
        #[cfg(test)]
        MASK_DEPTH.with(|depth| depth.set(depth.get() + 1));
        IrqState
    }

    fn restore(&self) {
        #[cfg(test)]
        MASK_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

#[cfg(all(test, not(all(target_arch = "aarch64", target_os = "none"))))]
std::thread_local! {
    static MASK_DEPTH: core::cell::Cell<usize> = const { core::cell::Cell::new(0) };
}

/// Whether the calling thread is inside a `Mutex` critical section
#[cfg(all(test, not(all(target_arch = "aarch64", target_os = "none"))))]
pub(crate) fn interrupts_masked() -> bool {
    MASK_DEPTH.with(|depth| depth.get() != 0)
}
