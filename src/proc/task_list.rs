use alloc::vec::Vec;
use core::fmt;

use log::debug;

use super::{State, Task};
use crate::mem::{KBox, OutOfMemory};

/// Handle of a task in the [`TaskRing`].
///
/// Slots are reused once a task is destroyed; the generation makes every
/// handle to the destroyed task invalid instead of aliasing the new one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    index:      u32,
    generation: u32,
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}.{}", self.index, self.generation)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Slot {
    generation: u32,
    task:       Option<KBox<Task>>,
}

/// All tasks, in the circular order they are scheduled in, plus the
/// cursor naming the running one.
///
/// The tasks themselves live in an arena of slots; the ring is an
/// ordered list of handles into it and the cursor is a position in that
/// list.
pub struct TaskRing {
    slots:  Vec<Slot>,
    free:   Vec<u32>,
    order:  Vec<TaskId>,
    cursor: Option<usize>,
}

impl TaskRing {
    pub const fn new() -> Self {
        TaskRing {
            slots:  Vec::new(),
            free:   Vec::new(),
            order:  Vec::new(),
            cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.task.as_deref())
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.task.as_deref_mut())
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.get(id).is_some()
    }

    /// Appends `task` at the end of the ring. Nothing is changed if the
    /// ring cannot grow.
    pub fn insert(&mut self, task: KBox<Task>) -> Result<TaskId, OutOfMemory> {
        self.order.try_reserve(1).map_err(|_| OutOfMemory)?;

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.task = Some(task);
                TaskId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.try_reserve(1).map_err(|_| OutOfMemory)?;
                let wanted = self.slots.len() + 1 - self.free.len();
                self.free.try_reserve(wanted).map_err(|_| OutOfMemory)?;
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    task:       Some(task),
                });
                TaskId {
                    index,
                    generation: 0,
                }
            }
        };

        self.order.push(id);
        debug!("task_list: inserted {} at position {}", id, self.order.len() - 1);
        Ok(id)
    }

    /// Takes `id` out of the ring. The running task cannot be removed.
    pub fn remove(&mut self, id: TaskId) -> Option<KBox<Task>> {
        let pos = self.position(id)?;
        if self.cursor == Some(pos) {
            return None;
        }

        self.order.remove(pos);
        if let Some(cursor) = self.cursor {
            if pos < cursor {
                self.cursor = Some(cursor - 1);
            }
        }

        let slot = &mut self.slots[id.index as usize];
        let task = slot.task.take();
        slot.generation = slot.generation.wrapping_add(1);
        // Never reallocates: the free list is sized when a slot is created.
        self.free.push(id.index);

        debug!("task_list: removed {}", id);
        task
    }

    /// Position of `id` in the ring.
    pub fn position(&self, id: TaskId) -> Option<usize> {
        if !self.contains(id) {
            return None;
        }
        self.order.iter().position(|&other| other == id)
    }

    /// The task under the cursor.
    pub fn current(&self) -> Option<TaskId> {
        self.cursor
            .and_then(|pos| self.order.get(pos).copied())
            .filter(|&id| self.contains(id))
    }

    /// Moves the cursor to `id`. Only the switch protocol and the
    /// bootstrap path do this.
    pub(super) fn set_current(&mut self, id: TaskId) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.cursor = Some(pos);
                true
            }
            None => false,
        }
    }

    /// The first task after the cursor, going round the ring, for which
    /// `pred` holds. The current task itself is never returned.
    pub fn next_after_cursor(&self, pred: impl Fn(&Task) -> bool) -> Option<TaskId> {
        let len = self.order.len();
        let start = self.cursor.map_or(0, |cursor| cursor + 1);
        let skip = if self.cursor.is_some() { 1 } else { 0 };

        (0..len - skip.min(len))
            .map(|offset| self.order[(start + offset) % len])
            .find(|&id| self.get(id).map_or(false, &pred))
    }

    /// Tasks in ring order.
    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &Task)> + '_ {
        self.order
            .iter()
            .filter_map(move |&id| self.get(id).map(|task| (id, task)))
    }

    /// Ids in ring order.
    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.order.iter().copied()
    }

    /// Every task that is `Stopped` waiting on `id` becomes `ReadyToRun`.
    pub(super) fn wake_waiters(&mut self, id: TaskId) -> usize {
        let mut woken = 0;
        for slot in self.slots.iter_mut() {
            if let Some(task) = slot.task.as_deref_mut() {
                if task.state == State::Stopped && task.waiting_on == Some(id) {
                    task.state = State::ReadyToRun;
                    task.waiting_on = None;
                    woken += 1;
                }
            }
        }
        woken
    }

    /// Number of tasks in `state`.
    pub fn count(&self, state: State) -> usize {
        self.iter().filter(|(_, task)| task.state == state).count()
    }
}

impl Default for TaskRing {
    fn default() -> Self {
        Self::new()
    }
}
