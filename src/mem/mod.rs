use core::{fmt, ptr::NonNull};

use bitflags::bitflags;

pub use self::{heap::KernelHeap, kbox::KBox};

mod heap;
mod kbox;

/// The page size of kernel.
pub const PAGE_SIZE: usize = 4096;

/// Alignment of every block handed out by a [`KernelAllocator`].
pub const MIN_ALIGN: usize = 16;

bitflags! {
    /// Allocation flags, after the `GFP_*` family of the kernel allocator.
    #[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
    pub struct AllocFlags: u16 {
        const NORMAL = 1 << 0; // normal zone
        const DMA    = 1 << 1; // DMA zone
        const USER   = 1 << 2; // pages visible to user mode
        const ZERO   = 1 << 3; // zero the block before returning it
    }
}

impl AllocFlags {
    /// Zeroed memory from the normal zone.
    pub const NORMAL_ZERO: AllocFlags = AllocFlags::NORMAL.union(AllocFlags::ZERO);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("out of memory")
    }
}

/// The kernel memory allocator, as seen by the task layer.
///
/// Blocks are at least [`MIN_ALIGN`] aligned. `free` takes the address
/// alone, so an implementation has to remember the block size itself.
pub trait KernelAllocator: Sync {
    fn alloc(&self, size: usize, flags: AllocFlags) -> Result<NonNull<u8>, OutOfMemory>;

    /// # Safety
    ///
    /// `addr` must come from `alloc` of this allocator and must not be
    /// used after this call.
    unsafe fn free(&self, addr: NonNull<u8>);
}
