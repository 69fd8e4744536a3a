use std::{fmt, future::Future, pin::Pin, time::Instant};

use super::locals::TaskLocals;

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Slot index of the main task.
pub(crate) const MAIN_SLOT: usize = 0;

/// Generation-checked handle to a task slot.
///
/// A slot is reused once its task has finished; the generation makes ids of
/// earlier occupants stale instead of silently naming the new task.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    slot: u32,
    generation: u32,
}

impl TaskId {
    pub const MAIN: TaskId = TaskId {
        slot: MAIN_SLOT as u32,
        generation: 0,
    };

    pub(crate) fn new(slot: usize, generation: u32) -> Self {
        Self {
            slot: slot as u32,
            generation,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_main(&self) -> bool {
        self.slot() == MAIN_SLOT
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}.{})", self.slot, self.generation)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            write!(f, "main")
        } else {
            write!(f, "{}.{}", self.slot, self.generation)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Eligible to run, unless sleeping.
    Ready,
    /// Waiting for an `unblock`.
    Blocked,
    /// Finished, or never used. A free slot may still hold the remains of
    /// its last task until the slot is reclaimed.
    Free,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Ready => "ready",
            TaskState::Blocked => "blocked",
            TaskState::Free => "free",
        };
        f.write_str(s)
    }
}

/// Snapshot of one live task, handed out by the enumeration hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub sleeping: bool,
}

pub(crate) struct Slot {
    pub generation: u32,
    pub seq: u64,
    pub state: TaskState,
    pub wake_at: Option<Instant>,
    pub future: Option<TaskFuture>,
    pub locals: TaskLocals,
}

impl Slot {
    pub fn free() -> Self {
        Self {
            generation: 0,
            seq: 0,
            state: TaskState::Free,
            wake_at: None,
            future: None,
            locals: TaskLocals::default(),
        }
    }

    pub fn main() -> Self {
        Self {
            state: TaskState::Ready,
            ..Self::free()
        }
    }

    pub fn is_runnable(&self, now: Instant) -> bool {
        self.state == TaskState::Ready && self.wake_at.is_none_or(|wake| wake <= now)
    }

    pub fn name(&self, slot: usize) -> String {
        if slot == MAIN_SLOT {
            "main".to_string()
        } else {
            format!("task-{}", self.seq)
        }
    }

    /// Takes whatever a finished task left behind. The caller drops it
    /// outside of any scheduler borrow, since dropping a future may close
    /// transports that call back into the scheduler.
    pub fn reclaim(&mut self) -> Option<(TaskFuture, TaskLocals)> {
        debug_assert_eq!(self.state, TaskState::Free);
        self.wake_at = None;
        let future = self.future.take()?;
        Some((future, std::mem::take(&mut self.locals)))
    }
}
