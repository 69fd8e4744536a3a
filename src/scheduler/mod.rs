//! Cooperative task scheduler.
//!
//! This module multiplexes many logical tasks over the single OS thread that
//! calls [`Scheduler::run`]. Tasks are futures; they give up control only at
//! explicit suspension points ([`Scheduler::yield_now`],
//! [`Scheduler::sleep_for`], [`Scheduler::block`], and any asynchronous
//! transport call that cannot complete immediately).
//!
//! # Scheduling policy
//!
//! Slot 0 holds the main task, the future passed to [`Scheduler::run`]. Every
//! other slot holds a background task created with [`Scheduler::spawn`].
//!
//! - A background task that suspends always hands control to the main task.
//! - When the main task suspends, the scheduler processes pending I/O
//!   completions and cross-thread handoffs, then resumes one background task,
//!   scanning slots round-robin from just after the last one resumed. Blocked
//!   tasks and tasks still sleeping are skipped; free slots are reclaimed as
//!   the scan passes them.
//! - A task named by the most recent [`Scheduler::unblock`] is tried first.
//! - If nothing is runnable, the main task's yield returns straight away.
//!
//! Long computations call [`Scheduler::maybe_yield`], which only suspends
//! once the configured time slice has elapsed or an I/O completion is
//! waiting.
//!
//! # Task enumeration
//!
//! [`Scheduler::tasks`], [`Scheduler::for_each_task`] and
//! [`Scheduler::with_locals`] expose every live task and its local storage.
//! Task state lives in owned futures, so nothing needs to scan task stacks.
//!
//! # Example
//!
//! ```rust
//! use std::{cell::Cell, rc::Rc};
//! use weft::{Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
//! let hits = Rc::new(Cell::new(0));
//!
//! let counter = Rc::clone(&hits);
//! scheduler
//!     .spawn(move |sched| async move {
//!         loop {
//!             counter.set(counter.get() + 1);
//!             sched.yield_now().await;
//!         }
//!     })
//!     .unwrap();
//!
//! let main = scheduler.clone();
//! scheduler.run(async move {
//!     for _ in 0..3 {
//!         main.yield_now().await;
//!     }
//! });
//! scheduler.shutdown();
//! assert_eq!(hits.get(), 3);
//! ```
mod config;
mod locals;
mod reactor;
mod task;

use std::{
    cell::{Cell, RefCell},
    convert::Infallible,
    future::{self, Future},
    io,
    pin::{Pin, pin},
    rc::Rc,
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use log::{debug, error, trace, warn};
use thiserror::Error;

use task::{MAIN_SLOT, Slot, TaskFuture};

pub use config::{DEFAULT_IO_TIMEOUT, DEFAULT_MAX_TASKS, DEFAULT_TIME_SLICE, SchedulerConfig};
pub use locals::TaskLocals;
pub use reactor::{Handoff, Notifier};
pub use task::{TaskId, TaskInfo, TaskState};

pub(crate) use reactor::{IoHandler, Reactor, Readiness};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task pool exhausted: all {capacity} slots are in use")]
    PoolExhausted { capacity: usize },

    #[error("task {0} no longer exists")]
    StaleTask(TaskId),

    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    #[error("scheduler has shut down")]
    Disconnected,

    #[error("reactor I/O error: {0}")]
    Io(#[from] io::Error),
}

type HandoffHandler = Rc<dyn Fn(&Scheduler, Handoff)>;

/// Cheaply cloneable handle to one scheduler. All clones drive the same task
/// table and must stay on the thread that created it.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    tasks: RefCell<TaskTable>,
    current: Cell<usize>,
    resumed_at: Cell<Instant>,
    running: Cell<bool>,
    reactor: Reactor,
    on_handoff: RefCell<Option<HandoffHandler>>,
}

struct TaskTable {
    slots: Vec<Slot>,
    last_resumed: usize,
    next_hint: Option<usize>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;

        let mut slots = Vec::with_capacity(config.max_tasks + 1);
        slots.push(Slot::main());
        slots.resize_with(config.max_tasks + 1, Slot::free);

        Ok(Self {
            inner: Rc::new(Inner {
                config,
                tasks: RefCell::new(TaskTable {
                    slots,
                    last_resumed: MAIN_SLOT,
                    next_hint: None,
                    next_seq: 1,
                }),
                current: Cell::new(MAIN_SLOT),
                resumed_at: Cell::new(Instant::now()),
                running: Cell::new(false),
                reactor: Reactor::new()?,
                on_handoff: RefCell::new(None),
            }),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub(crate) fn reactor(&self) -> &Reactor {
        &self.inner.reactor
    }

    /// Creates a background task running the future returned by `entry`.
    ///
    /// # Errors
    /// [`SchedulerError::PoolExhausted`] if every background slot is taken.
    pub fn spawn<F, Fut>(&self, entry: F) -> Result<TaskId, SchedulerError>
    where
        F: FnOnce(Scheduler) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let future: TaskFuture = Box::pin(entry(self.clone()));
        let current = self.inner.current.get();

        let (id, seq, remains) = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let Some(index) = tasks
                .slots
                .iter()
                .enumerate()
                .skip(1)
                .position(|(i, slot)| i != current && slot.state == TaskState::Free)
                .map(|offset| offset + 1)
            else {
                return Err(SchedulerError::PoolExhausted {
                    capacity: self.inner.config.max_tasks,
                });
            };

            let seq = tasks.next_seq;
            tasks.next_seq += 1;

            let slot = &mut tasks.slots[index];
            let remains = slot.reclaim();
            slot.generation = slot.generation.wrapping_add(1);
            slot.seq = seq;
            slot.state = TaskState::Ready;
            slot.future = Some(future);
            (TaskId::new(index, slot.generation), seq, remains)
        };
        drop(remains);

        debug!("spawned task-{seq} as {id}");
        Ok(id)
    }

    /// Drives `main` to completion on the calling thread, running background
    /// tasks whenever `main` suspends.
    ///
    /// # Panics
    /// If called while this scheduler is already running.
    pub fn run<F: Future>(&self, main: F) -> F::Output {
        assert!(
            !self.inner.running.replace(true),
            "scheduler is already running"
        );
        let mut main = pin!(main);
        let mut cx = Context::from_waker(Waker::noop());

        let output = loop {
            self.inner.current.set(MAIN_SLOT);
            self.inner.resumed_at.set(Instant::now());
            if let Poll::Ready(output) = main.as_mut().poll(&mut cx) {
                break output;
            }
            self.switch_from_main();
        };

        self.inner.running.set(false);
        output
    }

    fn switch_from_main(&self) {
        self.drive_io(Duration::ZERO);
        if let Some(index) = self.next_runnable() {
            self.resume(index);
            return;
        }

        // Nothing to run. A sleeping main task may wait in the reactor until
        // the earliest sleeper is due or I/O arrives.
        if let Some(timeout) = self.idle_timeout() {
            self.drive_io(timeout);
        }
    }

    /// Dispatches queued readiness events and handoffs.
    fn drive_io(&self, timeout: Duration) {
        let reactor = &self.inner.reactor;
        if let Err(err) = reactor.poll(timeout) {
            error!("reactor poll failed: {err}");
        }

        for (handler, readiness) in reactor.take_ready() {
            let Some(handler) = handler.upgrade() else {
                continue;
            };
            if let Some(waiter) = handler.on_ready(readiness) {
                self.wake(waiter);
            }
        }

        let handoffs = reactor.take_handoffs();
        if handoffs.is_empty() {
            return;
        }
        let handler = self.inner.on_handoff.borrow().clone();
        for handoff in handoffs {
            match &handler {
                Some(handler) => handler(self, handoff),
                None => warn!("no handoff handler installed, dropping {handoff:?}"),
            }
        }
    }

    fn next_runnable(&self) -> Option<usize> {
        let now = Instant::now();
        let mut remains = Vec::new();

        let picked = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let hinted = tasks
                .next_hint
                .take()
                .filter(|&hint| tasks.slots[hint].is_runnable(now));

            let picked = hinted.or_else(|| {
                let len = tasks.slots.len();
                let start = tasks.last_resumed;
                (1..=len)
                    .map(|step| (start + step) % len)
                    .filter(|&index| index != MAIN_SLOT)
                    .find(|&index| {
                        let slot = &mut tasks.slots[index];
                        if slot.state == TaskState::Free {
                            remains.extend(slot.reclaim());
                            return false;
                        }
                        slot.is_runnable(now)
                    })
            });

            if let Some(index) = picked {
                tasks.last_resumed = index;
            }
            picked
        };
        drop(remains);
        picked
    }

    fn idle_timeout(&self) -> Option<Duration> {
        let tasks = self.inner.tasks.borrow();
        let main_wake = tasks.slots[MAIN_SLOT].wake_at?;
        let earliest = tasks.slots[1..]
            .iter()
            .filter(|slot| slot.state == TaskState::Ready)
            .filter_map(|slot| slot.wake_at)
            .fold(main_wake, std::cmp::min);
        Some(earliest.saturating_duration_since(Instant::now()))
    }

    fn resume(&self, index: usize) {
        let (id, mut future) = {
            let mut tasks = self.inner.tasks.borrow_mut();
            let slot = &mut tasks.slots[index];
            match slot.future.take() {
                Some(future) => (TaskId::new(index, slot.generation), future),
                None => return,
            }
        };

        trace!("resuming {id}");
        self.inner.current.set(index);
        self.inner.resumed_at.set(Instant::now());
        let finished = future
            .as_mut()
            .poll(&mut Context::from_waker(Waker::noop()))
            .is_ready();
        self.inner.current.set(MAIN_SLOT);

        let mut tasks = self.inner.tasks.borrow_mut();
        let slot = &mut tasks.slots[index];
        if finished {
            debug!("task {id} finished");
            slot.state = TaskState::Free;
        }
        // Kept until the slot is reclaimed, even once finished.
        slot.future = Some(future);
    }

    /// Identity of the running task.
    pub fn current(&self) -> TaskId {
        let index = self.inner.current.get();
        let generation = self.inner.tasks.borrow().slots[index].generation;
        TaskId::new(index, generation)
    }

    /// State of `id`, or `None` if its slot has been reused.
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        let tasks = self.inner.tasks.borrow();
        let slot = tasks.slots.get(id.slot())?;
        (slot.generation == id.generation()).then_some(slot.state)
    }

    /// Suspends the running task once.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow { yielded: false }
    }

    /// Suspends the running task if its time slice is used up or an I/O
    /// completion is waiting to be processed.
    pub async fn maybe_yield(&self) {
        let expired = self.inner.resumed_at.get().elapsed() >= self.inner.config.time_slice;
        if expired || self.inner.reactor.has_pending() {
            self.yield_now().await;
        }
    }

    /// Suspends the running task for at least `duration`.
    pub async fn sleep_for(&self, duration: Duration) {
        let index = self.inner.current.get();
        let wake = Instant::now() + duration;
        self.inner.tasks.borrow_mut().slots[index].wake_at = Some(wake);

        while Instant::now() < wake {
            self.yield_now().await;
        }
        self.inner.tasks.borrow_mut().slots[index].wake_at = None;
    }

    /// Marks the running task blocked and suspends it until some other code
    /// calls [`Scheduler::unblock`] with its id.
    ///
    /// # Panics
    /// If called from the main task.
    pub async fn block(&self) {
        let index = self.inner.current.get();
        assert_ne!(index, MAIN_SLOT, "the main task cannot block");
        {
            let mut tasks = self.inner.tasks.borrow_mut();
            let slot = &mut tasks.slots[index];
            assert_eq!(slot.state, TaskState::Ready, "blocking a task that is not ready");
            slot.state = TaskState::Blocked;
        }

        future::poll_fn(|_| {
            if self.inner.tasks.borrow().slots[index].state == TaskState::Blocked {
                Poll::Pending
            } else {
                Poll::Ready(())
            }
        })
        .await
    }

    /// Makes a blocked task ready and schedules it to run next.
    ///
    /// # Errors
    /// [`SchedulerError::StaleTask`] if the task's slot has been reused.
    ///
    /// # Panics
    /// If the task exists but is not blocked.
    pub fn unblock(&self, id: TaskId) -> Result<(), SchedulerError> {
        let mut tasks = self.inner.tasks.borrow_mut();
        let slot = tasks
            .slots
            .get_mut(id.slot())
            .filter(|slot| slot.generation == id.generation() && !id.is_main())
            .ok_or(SchedulerError::StaleTask(id))?;

        assert_eq!(slot.state, TaskState::Blocked, "task {id} is not blocked");
        slot.state = TaskState::Ready;
        tasks.next_hint = Some(id.slot());
        trace!("unblocked {id}");
        Ok(())
    }

    /// Unblocks `id` if it is still blocked, ignoring ids that went away.
    /// Used by completion paths that can race with a task's teardown.
    pub(crate) fn wake(&self, id: TaskId) {
        if self.state(id) == Some(TaskState::Blocked) {
            // Checked above; unblock cannot fail or panic here.
            let _ = self.unblock(id);
        } else {
            trace!("ignoring wake-up for {id}");
        }
    }

    /// Finishes the running task. The returned future never completes.
    ///
    /// # Panics
    /// If called from the main task, which is never destroyed.
    pub async fn end(&self) -> Infallible {
        let index = self.inner.current.get();
        assert_ne!(index, MAIN_SLOT, "the main task cannot end");

        let id = self.current();
        self.inner.tasks.borrow_mut().slots[index].state = TaskState::Free;
        debug!("task {id} ended");
        future::pending().await
    }

    /// Number of background tasks that have not finished.
    pub fn live_tasks(&self) -> usize {
        self.inner.tasks.borrow().slots[1..]
            .iter()
            .filter(|slot| slot.state != TaskState::Free)
            .count()
    }

    /// Calls `f` with every live task, main first.
    pub fn for_each_task(&self, mut f: impl FnMut(&TaskInfo, &TaskLocals)) {
        let tasks = self.inner.tasks.borrow();
        for (index, slot) in tasks.slots.iter().enumerate() {
            if slot.state == TaskState::Free {
                continue;
            }
            let info = TaskInfo {
                id: TaskId::new(index, slot.generation),
                name: slot.name(index),
                state: slot.state,
                sleeping: slot.wake_at.is_some(),
            };
            f(&info, &slot.locals);
        }
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        let mut out = Vec::new();
        self.for_each_task(|info, _| out.push(info.clone()));
        out
    }

    /// Runs `f` on the running task's local storage. `f` must not call back
    /// into the scheduler.
    pub fn locals<R>(&self, f: impl FnOnce(&mut TaskLocals) -> R) -> R {
        let index = self.inner.current.get();
        f(&mut self.inner.tasks.borrow_mut().slots[index].locals)
    }

    /// Runs `f` on the local storage of `id`. `f` must not call back into
    /// the scheduler.
    pub fn with_locals<R>(
        &self,
        id: TaskId,
        f: impl FnOnce(&mut TaskLocals) -> R,
    ) -> Result<R, SchedulerError> {
        let mut tasks = self.inner.tasks.borrow_mut();
        let slot = tasks
            .slots
            .get_mut(id.slot())
            .filter(|slot| slot.generation == id.generation() && slot.state != TaskState::Free)
            .ok_or(SchedulerError::StaleTask(id))?;
        Ok(f(&mut slot.locals))
    }

    /// Sender other threads use to hand work to this scheduler.
    pub fn notifier(&self) -> Notifier {
        self.inner.reactor.notifier()
    }

    /// Installs the handler that processes handoffs on the scheduler thread.
    pub fn on_handoff<F>(&self, handler: F)
    where
        F: Fn(&Scheduler, Handoff) + 'static,
    {
        self.inner.on_handoff.replace(Some(Rc::new(handler)));
    }

    /// Destroys every background task and the handoff handler.
    ///
    /// Tasks hold clones of their scheduler, so a scheduler with live tasks
    /// is only released after this is called.
    pub fn shutdown(&self) {
        let remains: Vec<_> = {
            let mut tasks = self.inner.tasks.borrow_mut();
            tasks.next_hint = None;
            tasks.slots[1..]
                .iter_mut()
                .filter_map(|slot| {
                    slot.state = TaskState::Free;
                    slot.reclaim()
                })
                .collect()
        };
        debug!("shutting down with {} task(s)", remains.len());
        drop(remains);
        self.inner.on_handoff.replace(None);
    }
}

/// Future returned by [`Scheduler::yield_now`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            Poll::Pending
        }
    }
}
