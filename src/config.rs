use crate::{
    intr::timer::{Tick, SCHEDULER_QUANTUM},
    proc::{KERNEL_STACK_SIZE, MAX_NUM_PROCESS},
};

/// Runtime knobs of the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedConfig {
    /// Ticks between two scheduling decisions.
    pub quantum:    Tick,
    /// Size in bytes of the kernel stack given to every created task.
    pub stack_size: usize,
    /// Upper bound on the number of tasks in the ring.
    pub max_tasks:  usize,
}

impl SchedConfig {
    pub const fn new() -> Self {
        SchedConfig {
            quantum:    SCHEDULER_QUANTUM,
            stack_size: KERNEL_STACK_SIZE,
            max_tasks:  MAX_NUM_PROCESS,
        }
    }

    pub const fn with_quantum(mut self, quantum: Tick) -> Self {
        self.quantum = quantum;
        self
    }

    pub const fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub const fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::new()
    }
}
