use core::fmt;

use log::{debug, info, trace};

use super::{
    ArchContext, EntryFn, KernelStack, Priority, State, Task, TaskError, TaskId, TaskRing,
    Transfer,
};
use crate::{
    arch::Arch,
    config::SchedConfig,
    intr::timer::{self, AlarmFn, Timer},
    mem::{AllocFlags, KBox, KernelAllocator},
};

/// The services the scheduler runs on top of.
#[derive(Clone, Copy)]
pub struct Platform {
    pub arch:      &'static dyn Arch,
    pub allocator: &'static dyn KernelAllocator,
    pub timer:     &'static dyn Timer,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedStats {
    /// Preemption ticks handled.
    pub ticks:            u64,
    /// Transfers decided.
    pub switches:         u64,
    /// Switch requests refused because a handle was absent or stale.
    pub invalid_switches: u64,
}

/// Outcome of [`Scheduler::wait`].
pub enum WaitStatus {
    /// The task had terminated; it is destroyed and this is its code.
    Collected(i32),
    /// The caller is now `Stopped`. Once the transfer is performed and
    /// the caller is resumed, it must wait again.
    Blocked(Transfer),
}

impl fmt::Debug for WaitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitStatus::Collected(code) => write!(f, "Collected({})", code),
            WaitStatus::Blocked(transfer) => write!(f, "Blocked({:?})", transfer),
        }
    }
}

/// Round-robin scheduler over a [`TaskRing`].
///
/// Methods decide; they never transfer control themselves. Whatever
/// needs the CPU to change hands comes back as a [`Transfer`] that the
/// caller performs once it has released its own locks.
pub struct Scheduler {
    pub(super) platform: Platform,
    pub(super) config:   SchedConfig,
    pub(super) ring:     TaskRing,
    pub(super) alarm:    Option<(AlarmFn, usize)>,
    pub(super) stats:    SchedStats,
}

impl Scheduler {
    /// Adopts the calling flow as the first task, `Running` and current.
    /// `entry` is where that task is considered to start.
    pub fn new(platform: Platform, config: SchedConfig, entry: EntryFn) -> Result<Self, TaskError> {
        let arch = platform.arch;
        let task = Task::bootstrap(arch.stack_pointer(), arch.flags(), entry, arch.kernel_root());
        let task = KBox::try_new(task, platform.allocator, AllocFlags::NORMAL_ZERO)?;

        let mut ring = TaskRing::new();
        let id = ring.insert(task)?;
        ring.set_current(id);
        info!("sched: bootstrap task {} adopted, sp 0x{:x}", id, arch.stack_pointer());

        Ok(Scheduler {
            platform,
            config,
            ring,
            alarm: None,
            stats: SchedStats::default(),
        })
    }

    /// A new kernel thread calling `entry(arg)`, `ReadyToRun`, at the end
    /// of the ring. It inherits the directories of the running task.
    ///
    /// Fails without side effects when the task limit is reached, the
    /// configured stack cannot hold the initial frames or memory runs out.
    pub fn create(&mut self, priority: Priority, entry: EntryFn, arg: usize) -> Result<TaskId, TaskError> {
        if self.ring.len() >= self.config.max_tasks {
            return Err(TaskError::TooManyTasks);
        }
        if self.config.stack_size < KernelStack::MIN_SIZE {
            return Err(TaskError::StackTooSmall);
        }

        let stack = KernelStack::allocate(self.config.stack_size, self.platform.allocator)?;
        let mut task = Task::new(
            priority,
            stack,
            entry,
            arg,
            super::task_return as *const () as usize,
            self.platform.arch.kernel_root(),
        );
        if let Some(creator) = self.ring.current().and_then(|id| self.ring.get(id)) {
            task.root = creator.root;
            task.cwd = creator.cwd;
        }

        let task = KBox::try_new(task, self.platform.allocator, AllocFlags::NORMAL_ZERO)?;
        let id = self.ring.insert(task)?;
        debug!("sched: created {} entry 0x{:x} arg 0x{:x}", id, entry as *const () as usize, arg);
        Ok(id)
    }

    /// Arms the first preemption tick. `alarm` is what the timer calls on
    /// expiry, with `arg`, every quantum; it is expected to end up in
    /// [`Scheduler::schedule`].
    pub fn start_preemption(&mut self, alarm: AlarmFn, arg: usize) -> Result<(), TaskError> {
        if !timer::arm_after(self.platform.timer, self.config.quantum, alarm, arg) {
            return Err(TaskError::AlarmRejected);
        }
        self.alarm = Some((alarm, arg));
        info!("sched: preemption every {} ticks", self.config.quantum);
        Ok(())
    }

    /// One preemption tick: re-arms the alarm for the next quantum and
    /// rotates to the next runnable task after the cursor, if any.
    pub fn schedule(&mut self) -> Option<Transfer> {
        self.stats.ticks += 1;

        if let Some((alarm, arg)) = self.alarm {
            if !timer::arm_after(self.platform.timer, self.config.quantum, alarm, arg) {
                panic!("Could not install scheduler alarm.");
            }
        }

        let next = self.pick_next();
        trace!("sched: tick {}, next {:?}", self.stats.ticks, next);
        next.and_then(|id| self.switch_to(Some(id)))
    }

    /// The first `ReadyToRun` task after the cursor, going round.
    pub fn pick_next(&self) -> Option<TaskId> {
        self.ring.next_after_cursor(|task| task.state == State::ReadyToRun)
    }

    /// Terminates the running task with `code` and hands the CPU to the
    /// next runnable task. Tasks waiting on it become runnable.
    ///
    /// If nothing can run afterwards the running task is left as it was
    /// and [`TaskError::NoRunnableTask`] is returned.
    pub fn exit(&mut self, code: i32) -> Result<Transfer, TaskError> {
        let id = self.ring.current().ok_or(TaskError::NotInitialized)?;
        if let Some(task) = self.ring.get_mut(id) {
            task.state = State::Zombie;
            task.return_code = code;
        }
        let woken = self.ring.wake_waiters(id);
        debug!("sched: {} exits with {}, {} waiter(s) woken", id, code, woken);

        match self.pick_next().and_then(|next| self.switch_to(Some(next))) {
            Some(transfer) => Ok(transfer),
            None => {
                if let Some(task) = self.ring.get_mut(id) {
                    task.state = State::Running;
                }
                Err(TaskError::NoRunnableTask)
            }
        }
    }

    /// Collects `target` if it has terminated, otherwise stops the running
    /// task until it does.
    ///
    /// A task never waits on itself, and the last runnable task cannot
    /// block: that would leave nothing to run.
    pub fn wait(&mut self, target: TaskId) -> Result<WaitStatus, TaskError> {
        let id = self.ring.current().ok_or(TaskError::NotInitialized)?;
        if target == id {
            return Err(TaskError::WaitOnSelf);
        }
        let state = self.ring.get(target).map(Task::state).ok_or(TaskError::InvalidHandle)?;

        if state == State::Zombie {
            let task = self.ring.remove(target).ok_or(TaskError::InvalidHandle)?;
            let code = task.return_code;
            drop(task);
            debug!("sched: {} collected {} with {}", id, target, code);
            return Ok(WaitStatus::Collected(code));
        }

        if let Some(task) = self.ring.get_mut(id) {
            task.state = State::Stopped;
            task.waiting_on = Some(target);
        }

        match self.pick_next().and_then(|next| self.switch_to(Some(next))) {
            Some(transfer) => {
                debug!("sched: {} waits on {}", id, target);
                Ok(WaitStatus::Blocked(transfer))
            }
            None => {
                if let Some(task) = self.ring.get_mut(id) {
                    task.state = State::Running;
                    task.waiting_on = None;
                }
                Err(TaskError::Deadlock)
            }
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub fn ring(&self) -> &TaskRing {
        &self.ring
    }

    pub fn current(&self) -> Option<TaskId> {
        self.ring.current()
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.ring.get(id)
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.ring.get_mut(id)
    }

    pub fn stats(&self) -> SchedStats {
        self.stats
    }

    /// The argument the preemption alarm is armed with, once started.
    pub fn alarm_arg(&self) -> Option<usize> {
        self.alarm.map(|(_, arg)| arg)
    }

    /// Context of the running task, stable for as long as it lives.
    pub fn current_context(&self) -> Option<*const ArchContext> {
        self.ring
            .current()
            .and_then(|id| self.ring.get(id))
            .map(|task| task.context() as *const ArchContext)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.ring.len())
            .field("current", &self.ring.current())
            .field("stats", &self.stats)
            .finish()
    }
}
