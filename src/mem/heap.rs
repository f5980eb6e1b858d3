use core::{alloc::Layout, ptr::NonNull};

use linked_list_allocator::Heap;
use log::trace;
use spin::Mutex;

use super::{AllocFlags, KernelAllocator, OutOfMemory, MIN_ALIGN};

/// Bytes reserved in front of every block for its header. A whole
/// `MIN_ALIGN` unit keeps the returned address aligned.
const HEADER_SIZE: usize = MIN_ALIGN;

/// Kept just before the block itself, so that `free` only needs the
/// address of the block.
#[repr(C)]
struct BlockHeader {
    size: usize,
}

/// A [`KernelAllocator`] over a fixed memory region.
pub struct KernelHeap {
    heap: Mutex<Heap>,
}

impl KernelHeap {
    pub const fn empty() -> Self {
        KernelHeap {
            heap: Mutex::new(Heap::empty()),
        }
    }

    /// Hands `size` bytes starting at `start` to the heap.
    ///
    /// # Safety
    ///
    /// The region must be valid for reads and writes, unused by anything
    /// else and live for the rest of the program. Must be called once.
    pub unsafe fn init(&self, start: *mut u8, size: usize) {
        self.heap.lock().init(start, size);
    }

    /// Bytes currently handed out, headers included.
    pub fn used(&self) -> usize {
        self.heap.lock().used()
    }

    pub fn free_bytes(&self) -> usize {
        self.heap.lock().free()
    }
}

impl KernelAllocator for KernelHeap {
    fn alloc(&self, size: usize, flags: AllocFlags) -> Result<NonNull<u8>, OutOfMemory> {
        let total = size.checked_add(HEADER_SIZE).ok_or(OutOfMemory)?;
        let layout = Layout::from_size_align(total, MIN_ALIGN).map_err(|_| OutOfMemory)?;

        let header = self
            .heap
            .lock()
            .allocate_first_fit(layout)
            .map_err(|_| OutOfMemory)?;

        let block = unsafe {
            header.cast::<BlockHeader>().as_ptr().write(BlockHeader { size: total });
            let block = header.as_ptr().add(HEADER_SIZE);
            if flags.contains(AllocFlags::ZERO) {
                block.write_bytes(0, size);
            }
            NonNull::new_unchecked(block)
        };

        trace!(
            "kheap: alloc({}, {:?}) = 0x{:x}",
            size,
            flags,
            block.as_ptr() as usize
        );
        Ok(block)
    }

    unsafe fn free(&self, addr: NonNull<u8>) {
        let header = NonNull::new_unchecked(addr.as_ptr().sub(HEADER_SIZE));
        let total = header.cast::<BlockHeader>().as_ptr().read().size;

        trace!("kheap: free(0x{:x}), {} bytes", addr.as_ptr() as usize, total);
        self.heap
            .lock()
            .deallocate(header, Layout::from_size_align_unchecked(total, MIN_ALIGN));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap(size: usize) -> KernelHeap {
        let region = Box::leak(vec![0u8; size].into_boxed_slice());
        let heap = KernelHeap::empty();
        unsafe { heap.init(region.as_mut_ptr(), size) };
        heap
    }

    #[test]
    fn alloc_is_aligned_and_zeroed() {
        let heap = heap(4096);

        let a = heap.alloc(40, AllocFlags::NORMAL).unwrap();
        unsafe { a.as_ptr().write_bytes(0xAA, 40) };
        unsafe { heap.free(a) };

        let b = heap.alloc(40, AllocFlags::NORMAL_ZERO).unwrap();
        assert_eq!(b.as_ptr() as usize % MIN_ALIGN, 0);
        let bytes = unsafe { core::slice::from_raw_parts(b.as_ptr(), 40) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { heap.free(b) };
    }

    #[test]
    fn free_returns_the_whole_block() {
        let heap = heap(4096);
        let before = heap.used();

        let block = heap.alloc(100, AllocFlags::NORMAL).unwrap();
        assert!(heap.used() >= before + 100 + HEADER_SIZE);

        unsafe { heap.free(block) };
        assert_eq!(heap.used(), before);
    }

    #[test]
    fn exhaustion_is_reported() {
        let heap = heap(1024);
        assert_eq!(heap.alloc(4096, AllocFlags::NORMAL), Err(OutOfMemory));
        assert_eq!(heap.alloc(usize::MAX, AllocFlags::NORMAL), Err(OutOfMemory));
    }
}
