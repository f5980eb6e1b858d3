//! Tasks and their scheduling.
//!
//! The [`Scheduler`] owns the task ring and makes every decision. The
//! functions at this level are the kernel-facing entry points: they run
//! the one installed scheduler with interrupts masked and carry out the
//! transfers it decides on, after its lock is released.

use core::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use log::{error, info};
use spin::{Mutex, RwLock};

pub use self::{context::*, frame::*, sched::*, switch::*, task::*, task_list::*};
use crate::{
    config::SchedConfig,
    intr::{without_interrupts, InterruptGuard},
    mem::{OutOfMemory, PAGE_SIZE},
};

mod context;
mod frame;
mod sched;
mod switch;
mod task;
mod task_list;

/// Default size of the kernel stack of a created task.
pub const KERNEL_STACK_SIZE: usize = PAGE_SIZE * 2;

/// Default bound on the number of live tasks.
pub const MAX_NUM_PROCESS: usize = 32000;

/// Pid of the bootstrap task.
pub const KERNEL_PID: Pid = 0;

/// Pid given to the first user process.
pub const INIT_PID: Pid = 1;

/// Priority of the bootstrap task. Recorded only; scheduling ignores it.
pub const DEFAULT_PRIORITY: Priority = 0;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskError {
    OutOfMemory,
    /// The handle does not name a live task.
    InvalidHandle,
    TooManyTasks,
    /// The configured stack cannot hold the frames of a new task.
    StackTooSmall,
    WaitOnSelf,
    /// Blocking would leave no task to run.
    Deadlock,
    NoRunnableTask,
    /// The timer refused the preemption alarm.
    AlarmRejected,
    NotInitialized,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TaskError::OutOfMemory => "out of memory",
            TaskError::InvalidHandle => "invalid task handle",
            TaskError::TooManyTasks => "too many tasks",
            TaskError::StackTooSmall => "kernel stack too small",
            TaskError::WaitOnSelf => "a task cannot wait on itself",
            TaskError::Deadlock => "no other task could run",
            TaskError::NoRunnableTask => "no runnable task",
            TaskError::AlarmRejected => "could not install scheduler alarm",
            TaskError::NotInitialized => "scheduler not initialized",
        };
        f.write_str(msg)
    }
}

impl From<OutOfMemory> for TaskError {
    fn from(_: OutOfMemory) -> Self {
        TaskError::OutOfMemory
    }
}

// Written only with interrupts masked, so the alarm path can always read it.
static PLATFORM: RwLock<Option<Platform>> = RwLock::new(None);

static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

// Bumped by every install and carried by the alarm it arms.
static EPOCH: AtomicUsize = AtomicUsize::new(0);

fn mask_interrupts() -> Result<InterruptGuard, TaskError> {
    let platform = (*PLATFORM.read()).ok_or(TaskError::NotInitialized)?;
    Ok(InterruptGuard::new(platform.arch))
}

fn locked<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Result<R, TaskError> {
    SCHEDULER.lock().as_mut().map(f).ok_or(TaskError::NotInitialized)
}

/// Runs `f` on the installed scheduler with interrupts masked.
pub fn with_sched<R>(f: impl FnOnce(&mut Scheduler) -> R) -> Result<R, TaskError> {
    let _guard = mask_interrupts()?;
    locked(f)
}

/// Installs the scheduler: the calling flow becomes the bootstrap task
/// and the first preemption alarm is armed.
///
/// Panics if a scheduler is already installed, if the bootstrap task
/// cannot be allocated or if the alarm is refused; the kernel cannot go
/// on without a scheduler.
pub fn install(platform: Platform, config: SchedConfig, entry: EntryFn) -> TaskId {
    let _guard = InterruptGuard::new(platform.arch);

    let mut slot = SCHEDULER.lock();
    assert!(slot.is_none(), "proc: scheduler already installed");

    let mut sched = match Scheduler::new(platform, config, entry) {
        Ok(sched) => sched,
        Err(err) => panic!("proc: cannot create the bootstrap task: {}", err),
    };
    let epoch = EPOCH.fetch_add(1, Ordering::Relaxed) + 1;
    if sched.start_preemption(schedule_tick, epoch).is_err() {
        panic!("Could not install scheduler alarm.");
    }

    let id = match sched.current() {
        Some(id) => id,
        None => panic!("proc: bootstrap task is not current"),
    };
    *PLATFORM.write() = Some(platform);
    *slot = Some(sched);
    info!("proc: scheduler installed, {:?}", config);
    id
}

/// Installs the scheduler and starts executing the bootstrap task at
/// `entry`, on the stack of the caller.
pub fn init(platform: Platform, config: SchedConfig, entry: EntryFn) -> ! {
    install(platform, config, entry);

    match with_sched(|sched| sched.current_context()) {
        Ok(Some(context)) => unsafe { platform.arch.enter(context) },
        _ => panic!("proc: bootstrap task vanished"),
    }
}

/// Takes the installed scheduler down, returning it with every task it
/// still owns.
pub fn shutdown() -> Option<Scheduler> {
    let platform = (*PLATFORM.read())?;
    without_interrupts(platform.arch, || {
        let sched = SCHEDULER.lock().take();
        *PLATFORM.write() = None;
        sched
    })
}

pub fn current() -> Option<TaskId> {
    with_sched(|sched| sched.current()).ok().flatten()
}

/// Creates a kernel thread running `entry(arg)`. It runs once the
/// scheduler gets round to it.
pub fn create(priority: Priority, entry: EntryFn, arg: usize) -> Result<TaskId, TaskError> {
    with_sched(|sched| sched.create(priority, entry, arg))?
}

/// Switches to `target` right away. Returns whether the CPU changed
/// hands (and has since come back).
pub fn switch_to(target: Option<TaskId>) -> bool {
    let Ok(_guard) = mask_interrupts() else {
        return false;
    };
    match locked(|sched| sched.switch_to(target)) {
        Ok(Some(transfer)) => {
            unsafe { transfer.perform() };
            true
        }
        _ => false,
    }
}

/// The preemption alarm. `epoch` names the install that armed it; an
/// alarm left over from an earlier install is ignored and not re-armed.
pub fn schedule_tick(epoch: usize) {
    let Ok(_guard) = mask_interrupts() else {
        return;
    };
    let tick = locked(|sched| match sched.alarm_arg() {
        Some(armed) if armed == epoch => sched.schedule(),
        _ => None,
    });
    if let Ok(Some(transfer)) = tick {
        unsafe { transfer.perform() };
    }
}

/// Terminates the running task with `code`.
pub fn exit(code: i32) -> ! {
    let guard = mask_interrupts();
    match locked(|sched| sched.exit(code)) {
        Ok(Ok(transfer)) => unsafe { transfer.perform() },
        Ok(Err(err)) | Err(err) => panic!("proc: exit({}): {}", code, err),
    }
    drop(guard);

    error!("proc: a terminated task was resumed");
    panic!("proc: zombie resumed");
}

/// Waits until `task` terminates, then destroys it and returns its code.
pub fn wait(task: TaskId) -> Result<i32, TaskError> {
    loop {
        let _guard = mask_interrupts()?;
        match locked(|sched| sched.wait(task))?? {
            WaitStatus::Collected(code) => return Ok(code),
            WaitStatus::Blocked(transfer) => unsafe { transfer.perform() },
        }
    }
}

/// Where the entry routine of a task returns to.
pub extern "C" fn task_return() -> ! {
    exit(0)
}
