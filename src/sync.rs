use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use lock_api::RawMutex;

use crate::kernel_func::KernelFunc;

/// Spin lock that keeps local interrupts disabled while held.
///
/// Interrupt state is switched through the kernel's [`KernelFunc`] hooks.
/// [`RawMutex::INIT`] has no kernel to call and is a plain spin lock; driver
/// locks are built with [`irq_mutex`].
pub struct SpinNoIrq {
    lock: AtomicBool,
    saved_irq: UnsafeCell<bool>,
    kf: Option<Arc<dyn KernelFunc>>,
}

unsafe impl Sync for SpinNoIrq {}
unsafe impl Send for SpinNoIrq {}

impl SpinNoIrq {
    pub fn new(kf: Arc<dyn KernelFunc>) -> Self {
        Self {
            lock: AtomicBool::new(false),
            saved_irq: UnsafeCell::new(false),
            kf: Some(kf),
        }
    }

    /// Disable interrupts, returning whether they were enabled before.
    fn irq_save(&self) -> bool {
        match &self.kf {
            Some(kf) => {
                let enabled = !kf.irqs_disabled();
                kf.disable_irqs();
                enabled
            }
            None => false,
        }
    }

    fn irq_restore(&self, enabled: bool) {
        if let (true, Some(kf)) = (enabled, &self.kf) {
            kf.enable_irqs();
        }
    }
}

unsafe impl RawMutex for SpinNoIrq {
    type GuardMarker = lock_api::GuardSend;
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        lock: AtomicBool::new(false),
        saved_irq: UnsafeCell::new(false),
        kf: None,
    };

    fn lock(&self) {
        let irq_enabled_before = self.irq_save();
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.lock.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
        unsafe { *self.saved_irq.get() = irq_enabled_before };
    }

    fn try_lock(&self) -> bool {
        let irq_enabled_before = self.irq_save();
        if self
            .lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            unsafe { *self.saved_irq.get() = irq_enabled_before };
            true
        } else {
            self.irq_restore(irq_enabled_before);
            false
        }
    }

    unsafe fn unlock(&self) {
        let irq_enabled_before = unsafe { *self.saved_irq.get() };
        self.lock.store(false, Ordering::Release);
        self.irq_restore(irq_enabled_before);
    }
}

pub type Mutex<T> = lock_api::Mutex<SpinNoIrq, T>;

/// A [`Mutex`] that masks local interrupts through `kf` while held.
pub fn irq_mutex<T>(kf: &Arc<dyn KernelFunc>, value: T) -> Mutex<T> {
    Mutex::from_raw(SpinNoIrq::new(kf.clone()), value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeKernel;

    #[test]
    fn test_try_lock_fails_while_held() {
        let m = Mutex::new(5u32);
        let guard = m.lock();
        assert!(m.try_lock().is_none());
        drop(guard);
        assert_eq!(*m.try_lock().unwrap(), 5);
    }

    #[test]
    fn test_interrupts_masked_while_held() {
        let kernel = FakeKernel::new();
        let m = irq_mutex(&kernel.as_kf(), 0u32);

        let guard = m.lock();
        assert!(!kernel.irqs_enabled());
        // A failed attempt from the same CPU leaves them masked.
        assert!(m.try_lock().is_none());
        assert!(!kernel.irqs_enabled());
        drop(guard);
        assert!(kernel.irqs_enabled());
    }

    #[test]
    fn test_nested_locks_restore_outer_state() {
        let kernel = FakeKernel::new();
        let outer = irq_mutex(&kernel.as_kf(), ());
        let inner = irq_mutex(&kernel.as_kf(), ());

        let a = outer.lock();
        let b = inner.lock();
        drop(b);
        assert!(!kernel.irqs_enabled());
        drop(a);
        assert!(kernel.irqs_enabled());

        // Taken with interrupts already off: they stay off afterwards.
        kernel.set_irqs_enabled(false);
        drop(outer.lock());
        assert!(!kernel.irqs_enabled());
    }
}
