//! There is a single CPU, so masking interrupts is the only exclusion
//! the task layer needs: the timer alarm is the one asynchronous path
//! into the scheduler, and it cannot fire while interrupts are masked.
//!
//! Every mutation of the task ring happens while an [`InterruptGuard`]
//! is alive. The guard restores the previous interrupt state when it is
//! dropped, so guards nest and every early return or `?` releases it.

use crate::arch::Arch;

pub mod timer;

pub struct InterruptGuard {
    arch:        &'static dyn Arch,
    was_enabled: bool,
}

impl InterruptGuard {
    pub fn new(arch: &'static dyn Arch) -> Self {
        let was_enabled = arch.disable_interrupts();
        InterruptGuard { arch, was_enabled }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.arch.restore_interrupts(self.was_enabled);
    }
}

/// Runs `f` with interrupts masked.
pub fn without_interrupts<R>(arch: &'static dyn Arch, f: impl FnOnce() -> R) -> R {
    let _guard = InterruptGuard::new(arch);
    f()
}
