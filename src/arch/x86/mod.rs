//! i386 protected mode.

use core::{
    arch::{asm, global_asm},
    mem::offset_of,
};

use super::Arch;
use crate::proc::{task_return, ArchContext, EFlags};

global_asm!(include_str!("switch.S"), options(att_syntax));

// `switch.S` and `enter` address these fields by offset.
const _: () = assert!(offset_of!(ArchContext, esp) == 0);
const _: () = assert!(offset_of!(ArchContext, eip) == 4);
const _: () = assert!(offset_of!(ArchContext, eflags) == 8);

extern "C" {
    /// Pushes a resume frame for the caller, stores `esp` into `save`
    /// and unwinds the frame `load` points at.
    fn task_switch_to(save: *mut ArchContext, load: *const ArchContext);
}

pub struct X86 {
    kernel_dir: usize,
}

impl X86 {
    /// `kernel_dir` is the physical address of the kernel page directory.
    pub const fn new(kernel_dir: usize) -> Self {
        X86 { kernel_dir }
    }
}

impl Arch for X86 {
    fn disable_interrupts(&self) -> bool {
        let flags: usize;
        unsafe { asm!("pushfd", "pop {}", "cli", out(reg) flags) };
        EFlags::from_bits_retain(flags).contains(EFlags::IF)
    }

    fn restore_interrupts(&self, enabled: bool) {
        if enabled {
            unsafe { asm!("sti", options(nomem, nostack)) };
        }
    }

    fn stack_pointer(&self) -> usize {
        let sp: usize;
        unsafe { asm!("mov {}, esp", out(reg) sp, options(nomem, nostack)) };
        sp
    }

    fn flags(&self) -> usize {
        let flags: usize;
        unsafe { asm!("pushfd", "pop {}", out(reg) flags) };
        flags
    }

    fn kernel_root(&self) -> usize {
        self.kernel_dir
    }

    unsafe fn switch(&self, save: *mut ArchContext, load: *const ArchContext) {
        task_switch_to(save, load)
    }

    unsafe fn enter(&self, context: *const ArchContext) -> ! {
        // Same stack shape a cdecl call `entry(0)` returning into
        // `task_return` would leave.
        asm!(
            "mov esp, [{ctx}]",
            "push {zero}",
            "push {ret}",
            "push dword ptr [{ctx} + 8]",
            "popfd",
            "jmp dword ptr [{ctx} + 4]",
            ctx = in(reg) context,
            ret = in(reg) task_return as *const () as usize,
            zero = in(reg) 0usize,
            options(noreturn),
        )
    }
}
