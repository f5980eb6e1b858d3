use bit_field::BitField;
use bitflags::bitflags;

bitflags! {
    /// The flags register.
    #[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
    pub struct EFlags: usize {
        const CF       = 1 << 0;  // carry
        const RESERVED = 1 << 1;  // always set
        const PF       = 1 << 2;  // parity
        const AF       = 1 << 4;  // adjust
        const ZF       = 1 << 6;  // zero
        const SF       = 1 << 7;  // sign
        const TF       = 1 << 8;  // trap
        const IF       = 1 << 9;  // interrupt enable
        const DF       = 1 << 10; // direction
        const OF       = 1 << 11; // overflow
    }
}

/// Flags a new task starts with: interrupts enabled, nothing else.
pub const DEFAULT_EFLAGS: EFlags = EFlags::RESERVED.union(EFlags::IF);

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrivilegeLevel {
    Ring0 = 0,
    Ring3 = 3,
}

/// A segment selector.
///
/// [3..15] - index into the descriptor table.
/// [2]     - table indicator, 0 for the GDT.
/// [0..1]  - requested privilege level.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Selector(u16);

impl Selector {
    pub fn new(index: u16, rpl: PrivilegeLevel) -> Self {
        let mut bits = 0u16;
        bits.set_bits(3..16, index);
        bits.set_bits(0..2, rpl as u16);
        Selector(bits)
    }

    pub const fn from_bits(bits: u16) -> Self {
        Selector(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub fn index(self) -> u16 {
        self.0.get_bits(3..16)
    }

    pub fn rpl(self) -> u16 {
        self.0.get_bits(0..2)
    }
}

/// Kernel code segment, GDT entry 1.
pub const KERNEL_CS: Selector = Selector::from_bits(0x08);

/// Kernel data segment, GDT entry 2. Also used for the stack.
pub const KERNEL_DS: Selector = Selector::from_bits(0x10);

/// The resumable hardware state of one task.
///
/// Only `esp` is live while the task is switched out: it addresses the
/// resume frame on the task's kernel stack, where the switch routine
/// keeps everything else. The other fields hold the values the task was
/// created with and are copied into its first resume frame.
///
/// `esp`, `eip` and `eflags` are read by assembly at fixed offsets, so
/// they stay first and in this order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArchContext {
    pub esp:    usize,
    pub eip:    usize,
    pub eflags: usize,

    pub ebp: usize,
    pub eax: usize,
    pub ebx: usize,
    pub ecx: usize,
    pub edx: usize,
    pub esi: usize,
    pub edi: usize,

    /// Physical base of the page directory.
    pub cr3: usize,

    pub cs: u16,
    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,
    pub ss: u16,
}

impl ArchContext {
    /// A kernel-mode context entering `eip` with `flags`, kernel
    /// selectors and the address space rooted at `cr3`.
    pub fn kernel(eip: usize, flags: EFlags, cr3: usize) -> Self {
        ArchContext {
            eip,
            eflags: flags.bits(),
            cr3,
            cs: KERNEL_CS.bits(),
            ds: KERNEL_DS.bits(),
            es: KERNEL_DS.bits(),
            fs: KERNEL_DS.bits(),
            gs: KERNEL_DS.bits(),
            ss: KERNEL_DS.bits(),
            ..Default::default()
        }
    }

    pub fn flags(&self) -> EFlags {
        EFlags::from_bits_retain(self.eflags)
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.flags().contains(EFlags::IF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_selectors_match_gdt_layout() {
        assert_eq!(Selector::new(1, PrivilegeLevel::Ring0), KERNEL_CS);
        assert_eq!(Selector::new(2, PrivilegeLevel::Ring0), KERNEL_DS);
        assert_eq!(KERNEL_DS.index(), 2);
        assert_eq!(KERNEL_CS.rpl(), 0);

        let user_code = Selector::new(3, PrivilegeLevel::Ring3);
        assert_eq!(user_code.bits(), 0x1b);
        assert_eq!(user_code.rpl(), 3);
    }

    #[test]
    fn default_flags_enable_interrupts() {
        assert_eq!(DEFAULT_EFLAGS.bits(), 0x202);

        let context = ArchContext::kernel(0x1000, DEFAULT_EFLAGS, 0x9000);
        assert!(context.interrupts_enabled());
        assert_eq!(context.cs, 0x08);
        assert_eq!(context.ss, 0x10);
        assert_eq!(context.esp, 0);
    }

    #[test]
    fn assembly_offsets() {
        use core::mem::{offset_of, size_of};

        assert_eq!(offset_of!(ArchContext, esp), 0);
        assert_eq!(offset_of!(ArchContext, eip), size_of::<usize>());
        assert_eq!(offset_of!(ArchContext, eflags), 2 * size_of::<usize>());
    }
}
