use super::{
    build_resume_frame, ArchContext, EFlags, KernelStack, TaskId, DEFAULT_EFLAGS, DEFAULT_PRIORITY,
    KERNEL_PID,
};

pub type Pid = i32;

/// Advisory only: the round-robin scheduler never looks at it.
pub type Priority = i32;

/// Entry routine of a task, called with the argument given at creation.
pub type EntryFn = extern "C" fn(usize);

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum State {
    /// Eligible to run, not executing.
    ReadyToRun,
    /// Executing. Exactly one task at a time.
    Running,
    /// Blocked until the task it waits on terminates.
    Stopped,
    /// Terminated; kept until a waiter collects its return code.
    Zombie,
}

/// An opaque filesystem resource (an inode of the VFS). Stored by the
/// task, never interpreted here.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FsHandle(usize);

impl FsHandle {
    pub const fn from_raw(raw: usize) -> Self {
        FsHandle(raw)
    }

    pub const fn into_raw(self) -> usize {
        self.0
    }
}

/// Task control block.
pub struct Task {
    pub(super) context: ArchContext,

    pub(super) state:       State,
    pub(super) priority:    Priority,
    pub(super) pid:         Pid,
    /// `None` for the bootstrap task, which runs on the boot stack.
    pub(super) stack:       Option<KernelStack>,
    pub(super) return_code: i32,
    /// Reserved; waiting goes through `waiting_on`.
    pub(super) wait_queue:  usize,
    /// The task this one is `Stopped` on.
    pub(super) waiting_on:  Option<TaskId>,
    /// Root directory.
    pub(super) root:        Option<FsHandle>,
    /// Current directory.
    pub(super) cwd:         Option<FsHandle>,
}

impl Task {
    /// The first task of the system. It is already executing: it adopts
    /// the stack pointer and flags of the flow that initializes the
    /// scheduler, with `entry` as the place it (re)starts from.
    pub fn bootstrap(sp: usize, flags: usize, entry: EntryFn, root: usize) -> Self {
        let mut context = ArchContext::kernel(
            entry as *const () as usize,
            EFlags::from_bits_retain(flags) | EFlags::IF,
            root,
        );
        context.esp = sp;

        Task {
            context,
            state: State::Running,
            priority: DEFAULT_PRIORITY,
            pid: KERNEL_PID,
            stack: None,
            return_code: 0,
            wait_queue: 0,
            waiting_on: None,
            root: None,
            cwd: None,
        }
    }

    /// A kernel thread that has never run. Resuming it for the first
    /// time calls `entry(arg)`; if `entry` returns, it returns to `ret`.
    pub fn new(
        priority: Priority,
        mut stack: KernelStack,
        entry: EntryFn,
        arg: usize,
        ret: usize,
        root: usize,
    ) -> Self {
        let mut context = ArchContext::kernel(entry as *const () as usize, DEFAULT_EFLAGS, root);
        build_resume_frame(&mut stack, &mut context, arg, ret);

        Task {
            context,
            state: State::ReadyToRun,
            priority,
            pid: KERNEL_PID,
            stack: Some(stack),
            return_code: 0,
            wait_queue: 0,
            waiting_on: None,
            root: None,
            cwd: None,
        }
    }

    pub fn context(&self) -> &ArchContext {
        &self.context
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Assigned by the process layer when a task becomes a process.
    pub fn set_pid(&mut self, pid: Pid) {
        self.pid = pid;
    }

    pub fn stack(&self) -> Option<&KernelStack> {
        self.stack.as_ref()
    }

    pub fn return_code(&self) -> i32 {
        self.return_code
    }

    pub fn wait_queue(&self) -> usize {
        self.wait_queue
    }

    pub fn waiting_on(&self) -> Option<TaskId> {
        self.waiting_on
    }

    pub fn root(&self) -> Option<FsHandle> {
        self.root
    }

    pub fn cwd(&self) -> Option<FsHandle> {
        self.cwd
    }

    pub fn set_root(&mut self, root: Option<FsHandle>) {
        self.root = root;
    }

    pub fn set_cwd(&mut self, cwd: Option<FsHandle>) {
        self.cwd = cwd;
    }
}
