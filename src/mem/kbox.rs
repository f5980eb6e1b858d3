use core::{
    fmt,
    mem::{align_of, size_of},
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
};

use super::{AllocFlags, KernelAllocator, OutOfMemory, MIN_ALIGN};

/// An owning pointer to a value living in memory obtained from a
/// [`KernelAllocator`]. The value never moves while the box is alive.
pub struct KBox<T> {
    ptr:       NonNull<T>,
    allocator: &'static dyn KernelAllocator,
}

// SAFETY: `KBox` owns its value exactly like `Box` does.
unsafe impl<T: Send> Send for KBox<T> {}
unsafe impl<T: Sync> Sync for KBox<T> {}

impl<T> KBox<T> {
    /// Moves `value` into a fresh block. On failure `value` is dropped.
    pub fn try_new(
        value: T,
        allocator: &'static dyn KernelAllocator,
        flags: AllocFlags,
    ) -> Result<Self, OutOfMemory> {
        assert!(align_of::<T>() <= MIN_ALIGN, "KBox: over-aligned type");

        let raw = allocator.alloc(size_of::<T>().max(1), flags)?;
        let ptr = raw.cast::<T>();
        unsafe { ptr::write(ptr.as_ptr(), value) };

        Ok(KBox { ptr, allocator })
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T> Deref for KBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for KBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for KBox<T> {
    fn drop(&mut self) {
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
            self.allocator.free(self.ptr.cast());
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for KBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
