//! The hardware below the task layer.
//!
//! Everything the scheduler needs from the CPU goes through [`Arch`]:
//! masking interrupts, capturing the boot flow for the bootstrap task,
//! and the two control transfers (`switch` and `enter`). The real
//! implementation for i386 lives in [`x86`]; tests plug in a simulated
//! one.

use crate::proc::ArchContext;

#[cfg(target_arch = "x86")]
pub mod x86;

pub trait Arch: Sync {
    /// Masks interrupts, returning whether they were enabled before.
    fn disable_interrupts(&self) -> bool;

    /// Unmasks interrupts if `enabled`, otherwise leaves them masked.
    fn restore_interrupts(&self, enabled: bool);

    /// Stack pointer of the calling flow.
    fn stack_pointer(&self) -> usize;

    /// Flags register of the calling flow.
    fn flags(&self) -> usize;

    /// Physical base of the kernel page directory.
    fn kernel_root(&self) -> usize;

    /// Saves the executing flow into `save` and resumes `load`.
    ///
    /// The register set, flags, selectors and address-space root of the
    /// caller are pushed as a resume frame on its own stack and the stack
    /// pointer is stored in `save`. Then the frame addressed by `load`'s
    /// stack pointer is unwound: address-space root, selectors, general
    /// registers and finally an interrupt return to the saved instruction
    /// pointer. Returns when some later switch loads `save` again.
    ///
    /// # Safety
    ///
    /// Interrupts must be masked. `load` must address a fully-formed
    /// resume frame and both pointers must stay valid across the call.
    unsafe fn switch(&self, save: *mut ArchContext, load: *const ArchContext);

    /// Starts executing `context` on its own stack, without saving the
    /// calling flow. Used once, for the bootstrap task.
    ///
    /// # Safety
    ///
    /// `context` must describe a runnable flow. The caller's stack frames
    /// may be overwritten.
    unsafe fn enter(&self, context: *const ArchContext) -> !;
}
