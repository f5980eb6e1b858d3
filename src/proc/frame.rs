//! The kernel stack of a task and the synthetic frame a task that never
//! ran is first resumed through.
//!
//! A switched-out task is described entirely by the resume frame its
//! stack pointer addresses. The switch routine unwinds it in this order
//! (lowest address first):
//!
//! | slot                        | width      | restored by |
//! | --------------------------- | ---------- | ----------- |
//! | `cr3`                       | word       | `pop; mov cr3` |
//! | `ss` `gs` `fs` `es` `ds`    | 16 bit     | `popw` |
//! | `edi` ... `eax`             | word       | `popa` |
//! | `eip` `cs` `eflags`         | word       | `iret` |
//!
//! For a new task, [`build_resume_frame`] also places an [`EntryFrame`]
//! right above it, so that after the `iret` the entry routine sees the
//! stack of an ordinary cdecl call: return address at `[esp]`, argument
//! at `[esp + 4]`.

use core::{
    fmt,
    mem::size_of,
    ptr::{self, NonNull},
    slice,
};

use log::trace;

use super::ArchContext;
use crate::{
    console::HexDump,
    mem::{AllocFlags, KernelAllocator, OutOfMemory, MIN_ALIGN},
};

/// Layout consumed by the switch routine. Must not be reordered.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResumeFrame {
    pub cr3: usize,

    pub ss: u16,
    pub gs: u16,
    pub fs: u16,
    pub es: u16,
    pub ds: u16,

    // pusha order, reversed
    pub edi: usize,
    pub esi: usize,
    pub ebp: usize,
    pub esp: usize, // skipped by popa
    pub ebx: usize,
    pub edx: usize,
    pub ecx: usize,
    pub eax: usize,

    // iret frame, same privilege level
    pub eip:    usize,
    pub cs:     usize,
    pub eflags: usize,
}

impl ResumeFrame {
    pub const SIZE: usize = size_of::<ResumeFrame>();

    /// The frame restoring exactly `context`. `esp` is only a record of
    /// where the stack pointer will be after the `iret`.
    pub fn from_context(context: &ArchContext, esp: usize) -> Self {
        ResumeFrame {
            cr3: context.cr3,
            ss: context.ss,
            gs: context.gs,
            fs: context.fs,
            es: context.es,
            ds: context.ds,
            edi: context.edi,
            esi: context.esi,
            ebp: context.ebp,
            esp,
            ebx: context.ebx,
            edx: context.edx,
            ecx: context.ecx,
            eax: context.eax,
            eip: context.eip,
            cs: context.cs as usize,
            eflags: context.eflags,
        }
    }
}

/// What a cdecl call `entry(arg)` leaves on the stack.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntryFrame {
    /// Where the entry routine returns to.
    pub ret: usize,
    pub arg: usize,
}

/// A fixed-size stack, growing down from [`KernelStack::top`].
pub struct KernelStack {
    base:      NonNull<u8>,
    size:      usize,
    allocator: &'static dyn KernelAllocator,
}

// SAFETY: the stack memory is owned by the stack, like a `Box<[u8]>`.
unsafe impl Send for KernelStack {}

impl KernelStack {
    /// The smallest stack that holds the frames of a task that never ran.
    pub const MIN_SIZE: usize =
        (ResumeFrame::SIZE + size_of::<EntryFrame>() + MIN_ALIGN - 1) & !(MIN_ALIGN - 1);

    pub fn allocate(
        size: usize,
        allocator: &'static dyn KernelAllocator,
    ) -> Result<Self, OutOfMemory> {
        let base = allocator.alloc(size, AllocFlags::NORMAL_ZERO)?;
        Ok(KernelStack {
            base,
            size,
            allocator,
        })
    }

    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// The initial stack pointer, aligned down to [`MIN_ALIGN`].
    pub fn top(&self) -> usize {
        (self.base() + self.size) & !(MIN_ALIGN - 1)
    }

    /// Whether `len` bytes at `addr` lie within the stack.
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        addr >= self.base() && addr.checked_add(len).map_or(false, |end| end <= self.top())
    }

    /// Decodes the resume frame at `sp`, if one fits there.
    pub fn resume_frame_at(&self, sp: usize) -> Option<ResumeFrame> {
        self.read_at(sp)
    }

    /// Decodes the entry frame sitting above the resume frame at `sp`.
    pub fn entry_frame_at(&self, sp: usize) -> Option<EntryFrame> {
        self.read_at(sp.checked_add(ResumeFrame::SIZE)?)
    }

    /// The bytes from `sp` up to the top of the stack.
    pub fn bytes_from(&self, sp: usize) -> &[u8] {
        assert!(self.contains(sp, 0), "kstack: 0x{:x} is outside the stack", sp);
        unsafe { slice::from_raw_parts(sp as *const u8, self.top() - sp) }
    }

    fn read_at<T: Copy>(&self, addr: usize) -> Option<T> {
        if !self.contains(addr, size_of::<T>()) {
            return None;
        }
        Some(unsafe { ptr::read_unaligned(addr as *const T) })
    }

    fn writer(&mut self) -> StackWriter<'_> {
        StackWriter {
            sp:    self.top(),
            stack: self,
        }
    }
}

impl Drop for KernelStack {
    fn drop(&mut self) {
        unsafe { self.allocator.free(self.base) }
    }
}

impl fmt::Debug for KernelStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KernelStack(0x{:x}..0x{:x})", self.base(), self.top())
    }
}

/// Pushes values down a stack, like `push` does.
struct StackWriter<'a> {
    stack: &'a mut KernelStack,
    sp:    usize,
}

impl StackWriter<'_> {
    fn push<T: Copy>(&mut self, value: T) -> usize {
        let sp = self.sp - size_of::<T>();
        assert!(
            sp >= self.stack.base(),
            "kstack: overflow while pushing {} bytes",
            size_of::<T>()
        );
        unsafe { ptr::write_unaligned(sp as *mut T, value) };
        self.sp = sp;
        sp
    }
}

/// Writes the first resume frame of a task onto `stack`, so that the
/// first switch into `context` behaves like a call `eip(arg)` that
/// returns to `ret`. Points `context.esp` at the frame.
///
/// The frame is consumed by that first switch; afterwards the stack
/// only holds what the task itself leaves there.
pub fn build_resume_frame(
    stack: &mut KernelStack,
    context: &mut ArchContext,
    arg: usize,
    ret: usize,
) {
    let mut writer = stack.writer();

    let entry_sp = writer.push(EntryFrame { ret, arg });
    let sp = writer.push(ResumeFrame::from_context(context, entry_sp));
    context.esp = sp;

    trace!(
        "kstack: resume frame at 0x{:x}, entry 0x{:x}\n{}",
        sp,
        context.eip,
        HexDump(stack.bytes_from(sp))
    );
}

#[cfg(test)]
mod tests {
    use core::mem::offset_of;

    use super::*;

    #[test]
    fn resume_frame_layout() {
        const W: usize = size_of::<usize>();

        assert_eq!(ResumeFrame::SIZE, 12 * W + 5 * 2);
        assert_eq!(offset_of!(ResumeFrame, cr3), 0);
        assert_eq!(offset_of!(ResumeFrame, ss), W);
        assert_eq!(offset_of!(ResumeFrame, ds), W + 8);
        assert_eq!(offset_of!(ResumeFrame, edi), W + 10);
        assert_eq!(offset_of!(ResumeFrame, eax), 8 * W + 10);
        assert_eq!(offset_of!(ResumeFrame, eip), 9 * W + 10);
        assert_eq!(offset_of!(ResumeFrame, eflags), 11 * W + 10);
    }

    #[test]
    fn entry_frame_is_a_cdecl_call() {
        assert_eq!(offset_of!(EntryFrame, ret), 0);
        assert_eq!(offset_of!(EntryFrame, arg), size_of::<usize>());
    }
}
