use core::{fmt, ptr};

use log::{debug, warn};

use super::{ArchContext, Scheduler, State, TaskId, TaskRing};
use crate::arch::Arch;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SwitchError {
    /// The cursor does not name a live task.
    NoCurrentTask,
    /// The target is absent or was destroyed.
    InvalidTarget(Option<TaskId>),
    /// The target is not `ReadyToRun`.
    NotRunnable(TaskId, State),
}

impl fmt::Display for SwitchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchError::NoCurrentTask => f.write_str("no current task"),
            SwitchError::InvalidTarget(Some(id)) => write!(f, "invalid target {}", id),
            SwitchError::InvalidTarget(None) => f.write_str("null target"),
            SwitchError::NotRunnable(id, state) => write!(f, "target {} is {:?}", id, state),
        }
    }
}

/// The ring side of a switch: which contexts to save and load.
pub struct SwitchPlan {
    pub from: TaskId,
    pub to:   TaskId,
    save:     *mut ArchContext,
    load:     *const ArchContext,
}

impl TaskRing {
    /// Hands the CPU over to `target`, as far as the ring is concerned:
    ///
    /// 1. the running task becomes `ReadyToRun` (unless it already left
    ///    `Running` on its own, to block or to exit),
    /// 2. its context is recorded as the save destination,
    /// 3. the cursor moves to `target`,
    /// 4. `target` becomes `Running`.
    ///
    /// `Ok(None)` means `target` is already running. On error nothing
    /// has changed.
    pub fn begin_switch(&mut self, target: Option<TaskId>) -> Result<Option<SwitchPlan>, SwitchError> {
        let from = self.current().ok_or(SwitchError::NoCurrentTask)?;
        let to = target
            .filter(|&id| self.contains(id))
            .ok_or(SwitchError::InvalidTarget(target))?;

        if from == to {
            return Ok(None);
        }
        let target_state = self.get(to).map(|task| task.state);
        if target_state != Some(State::ReadyToRun) {
            return Err(SwitchError::NotRunnable(to, target_state.unwrap_or(State::Zombie)));
        }

        let save = {
            let current = self.get_mut(from).ok_or(SwitchError::NoCurrentTask)?;
            if current.state == State::Running {
                current.state = State::ReadyToRun;
            }
            ptr::addr_of_mut!(current.context)
        };

        self.set_current(to);

        let load = {
            let next = self.get_mut(to).ok_or(SwitchError::InvalidTarget(target))?;
            next.state = State::Running;
            ptr::addr_of!(next.context)
        };

        Ok(Some(SwitchPlan {
            from,
            to,
            save,
            load,
        }))
    }
}

/// A hardware transfer that has been decided but not yet performed.
///
/// Both tasks are already in their new states; what remains is the
/// control transfer itself, which has to happen before interrupts are
/// unmasked again.
#[must_use = "the task ring already points at the target"]
pub struct Transfer {
    arch: &'static dyn Arch,
    plan: SwitchPlan,
}

impl Transfer {
    pub fn from(&self) -> TaskId {
        self.plan.from
    }

    pub fn to(&self) -> TaskId {
        self.plan.to
    }

    /// Context the current flow is saved into.
    pub fn save_context(&self) -> *mut ArchContext {
        self.plan.save
    }

    /// Context that is resumed.
    pub fn load_context(&self) -> *const ArchContext {
        self.plan.load
    }

    /// Runs the hardware transfer. Returns once the saved task is
    /// switched back to.
    ///
    /// # Safety
    ///
    /// Interrupts must be masked, and neither task may be destroyed
    /// between the decision and this call.
    pub unsafe fn perform(self) {
        self.arch.switch(self.plan.save, self.plan.load);
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transfer({} -> {})", self.plan.from, self.plan.to)
    }
}

impl Scheduler {
    /// Decides a switch from the running task to `target`.
    ///
    /// An absent current task or an absent, destroyed or non-runnable
    /// target leaves the ring untouched; the condition is logged and
    /// counted rather than ignored. Switching to the running task is a
    /// no-op. The returned transfer must be performed by the caller.
    pub fn switch_to(&mut self, target: Option<TaskId>) -> Option<Transfer> {
        match self.ring.begin_switch(target) {
            Ok(Some(plan)) => {
                self.stats.switches += 1;
                debug!("sched: switch {} -> {}", plan.from, plan.to);
                Some(Transfer {
                    arch: self.platform.arch,
                    plan,
                })
            }
            Ok(None) => None,
            Err(err) => {
                self.stats.invalid_switches += 1;
                warn!("sched: switch_to ignored: {}", err);
                None
            }
        }
    }
}
