#![allow(dead_code)]

use std::{
    collections::HashSet,
    ptr::{self, NonNull},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Mutex,
    },
};

use log::LevelFilter;
use tempos_proc::{
    arch::Arch,
    intr::timer::{AlarmFn, Tick, Timer},
    mem::{AllocFlags, KernelAllocator, KernelHeap, OutOfMemory},
    proc::{ArchContext, EntryFn, EntryFrame, ResumeFrame, Transfer},
    Platform,
};

/// Stack pointer the simulated boot flow runs on.
pub const BOOT_SP: usize = 0xb000;

/// Flags of the simulated boot flow: interrupts off.
pub const BOOT_FLAGS: usize = 0x2;

pub const KERNEL_ROOT: usize = 0x0010_0000;

pub fn init_test_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(LevelFilter::Debug)
        .try_init();
}

pub fn heap(size: usize) -> &'static KernelHeap {
    let region = Box::leak(vec![0u8; size].into_boxed_slice());
    let heap = Box::leak(Box::new(KernelHeap::empty()));
    unsafe { heap.init(region.as_mut_ptr(), size) };
    heap
}

/// Hands out `budget` blocks, then runs out of memory.
pub struct FailingAllocator {
    inner:  &'static KernelHeap,
    budget: AtomicUsize,
}

impl FailingAllocator {
    pub fn new(inner: &'static KernelHeap, budget: usize) -> &'static Self {
        Box::leak(Box::new(FailingAllocator {
            inner,
            budget: AtomicUsize::new(budget),
        }))
    }

    pub fn set_budget(&self, budget: usize) {
        self.budget.store(budget, Ordering::SeqCst);
    }
}

impl KernelAllocator for FailingAllocator {
    fn alloc(&self, size: usize, flags: AllocFlags) -> Result<NonNull<u8>, OutOfMemory> {
        let granted = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !granted {
            return Err(OutOfMemory);
        }
        self.inner.alloc(size, flags)
    }

    unsafe fn free(&self, addr: NonNull<u8>) {
        self.inner.free(addr)
    }
}

/// What a task saw when it was resumed for the first time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resumed {
    pub esp:    usize,
    pub eip:    usize,
    pub eflags: usize,
    pub cr3:    usize,
    pub cs:     usize,
    pub ss:     u16,
    pub arg:    usize,
    pub ret:    usize,
}

#[derive(Default)]
struct SimState {
    /// Stack pointers handed out to saved flows.
    saved:    HashSet<usize>,
    resumed:  Vec<Resumed>,
    switches: usize,
}

/// A CPU that cannot actually change stacks.
///
/// Saving a flow stores a unique fake stack pointer. Loading one that was
/// saved before is a no-op; loading a fresh task decodes the resume frame
/// from its stack, and optionally calls the entry routine it names.
pub struct SimArch {
    interrupts:  AtomicBool,
    next_sp:     AtomicUsize,
    run_entries: bool,
    state:       Mutex<SimState>,
}

impl SimArch {
    pub fn new(run_entries: bool) -> &'static Self {
        let mut state = SimState::default();
        state.saved.insert(BOOT_SP);
        Box::leak(Box::new(SimArch {
            interrupts: AtomicBool::new(true),
            next_sp: AtomicUsize::new(0x1000),
            run_entries,
            state: Mutex::new(state),
        }))
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn resumed(&self) -> Vec<Resumed> {
        self.state.lock().unwrap().resumed.clone()
    }

    pub fn switches(&self) -> usize {
        self.state.lock().unwrap().switches
    }
}

impl Arch for SimArch {
    fn disable_interrupts(&self) -> bool {
        self.interrupts.swap(false, Ordering::SeqCst)
    }

    fn restore_interrupts(&self, enabled: bool) {
        if enabled {
            self.interrupts.store(true, Ordering::SeqCst);
        }
    }

    fn stack_pointer(&self) -> usize {
        BOOT_SP
    }

    fn flags(&self) -> usize {
        BOOT_FLAGS
    }

    fn kernel_root(&self) -> usize {
        KERNEL_ROOT
    }

    unsafe fn switch(&self, save: *mut ArchContext, load: *const ArchContext) {
        assert!(!self.interrupts_enabled(), "switch with interrupts enabled");

        let esp = (*load).esp;
        let fake = self.next_sp.fetch_add(0x10, Ordering::SeqCst);
        (*save).esp = fake;

        let resumed = {
            let mut state = self.state.lock().unwrap();
            state.switches += 1;
            state.saved.insert(fake);
            if state.saved.contains(&esp) {
                return;
            }

            let frame = ptr::read_unaligned(esp as *const ResumeFrame);
            let entry = ptr::read_unaligned((esp + ResumeFrame::SIZE) as *const EntryFrame);
            let resumed = Resumed {
                esp,
                eip: frame.eip,
                eflags: frame.eflags,
                cr3: frame.cr3,
                cs: frame.cs,
                ss: frame.ss,
                arg: entry.arg,
                ret: entry.ret,
            };
            state.resumed.push(resumed);
            resumed
        };

        if self.run_entries {
            let entry: EntryFn = std::mem::transmute::<usize, EntryFn>(resumed.eip);
            entry(resumed.arg);
        }
    }

    unsafe fn enter(&self, _context: *const ArchContext) -> ! {
        panic!("SimArch cannot enter a context");
    }
}

/// A timer driven by hand.
#[derive(Debug)]
pub struct SimTimer {
    now:    AtomicU64,
    accept: AtomicBool,
    armed:  Mutex<Vec<(Tick, AlarmFn, usize)>>,
}

impl SimTimer {
    pub fn new() -> &'static Self {
        Box::leak(Box::new(SimTimer {
            now:    AtomicU64::new(0),
            accept: AtomicBool::new(true),
            armed:  Mutex::new(Vec::new()),
        }))
    }

    pub fn reject_alarms(&self) {
        self.accept.store(false, Ordering::SeqCst);
    }

    pub fn deadlines(&self) -> Vec<Tick> {
        self.armed.lock().unwrap().iter().map(|(deadline, ..)| *deadline).collect()
    }

    pub fn advance(&self, ticks: Tick) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Runs the alarms that are due. Returns how many ran.
    pub fn fire_due(&self) -> usize {
        let now = self.now();
        let due: Vec<_> = {
            let mut armed = self.armed.lock().unwrap();
            let (due, pending) = armed.drain(..).partition(|(deadline, ..)| *deadline <= now);
            *armed = pending;
            due
        };
        for (_, callback, arg) in due.iter() {
            callback(*arg);
        }
        due.len()
    }
}

impl Timer for SimTimer {
    fn now(&self) -> Tick {
        self.now.load(Ordering::SeqCst)
    }

    fn arm_one_shot(&self, deadline: Tick, callback: AlarmFn, arg: usize) -> bool {
        if !self.accept.load(Ordering::SeqCst) {
            return false;
        }
        self.armed.lock().unwrap().push((deadline, callback, arg));
        true
    }
}

pub struct Sim {
    pub arch:  &'static SimArch,
    pub heap:  &'static KernelHeap,
    pub timer: &'static SimTimer,
}

impl Sim {
    pub fn new() -> Self {
        Self::with_entries(false)
    }

    pub fn with_entries(run_entries: bool) -> Self {
        init_test_logger();
        Self::without_logger(run_entries)
    }

    /// Leaves the logger slot free for the crate's own console logger.
    pub fn without_logger(run_entries: bool) -> Self {
        Sim {
            arch:  SimArch::new(run_entries),
            heap:  heap(1024 * 1024),
            timer: SimTimer::new(),
        }
    }

    pub fn platform(&self) -> Platform {
        Platform {
            arch:      self.arch,
            allocator: self.heap,
            timer:     self.timer,
        }
    }
}

/// Performs `transfer` with interrupts masked, like the kernel does.
pub fn perform(arch: &'static SimArch, transfer: Transfer) {
    let was_enabled = arch.disable_interrupts();
    unsafe { transfer.perform() };
    arch.restore_interrupts(was_enabled);
}

pub fn perform_opt(arch: &'static SimArch, transfer: Option<Transfer>) -> bool {
    match transfer {
        Some(transfer) => {
            perform(arch, transfer);
            true
        }
        None => false,
    }
}

pub extern "C" fn idle(_: usize) {}
