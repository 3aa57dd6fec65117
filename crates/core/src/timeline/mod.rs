//! Display-tick queue driving every cooperative loop in the pipeline.
//!
//! Loops are [`FrameTask`]s. A task runs once per display refresh and decides
//! at the end of each tick whether to enqueue its continuation for the next
//! refresh. Cancelling a task removes it from the queue so its continuation is
//! never run. Everything happens on the thread that calls
//! [`FrameScheduler::run_frame`]; no two ticks of the same task ever overlap.
//!
//! Within a refresh every [`TaskPhase::Produce`] task ticks before any
//! [`TaskPhase::Present`] task, so consumers see what producers published in
//! the same refresh regardless of when either was scheduled.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Monotonic display clock advanced once per refresh.
#[derive(Debug, Default, Clone)]
pub struct FrameClock {
    pub elapsed: Duration,
    pub frames: u64,
}

impl FrameClock {
    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
        self.frames = 0;
    }

    pub fn advance(&mut self, delta: Duration) -> FrameInfo {
        self.elapsed += delta;
        self.frames += 1;
        FrameInfo {
            index: self.frames,
            time: self.elapsed,
            delta,
        }
    }
}

/// Timing for the refresh currently being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// 1-based refresh counter.
    pub index: u64,
    pub time: Duration,
    pub delta: Duration,
}

/// What a task wants after finishing one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    /// Enqueue the continuation on the next refresh.
    Reschedule,
    /// Drop the task.
    Finish,
}

/// Which half of a refresh a task runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// Publishes snapshots.
    Produce,
    /// Reads what the producers published this refresh.
    Present,
}

/// One unit of cooperative work executed per display refresh.
pub trait FrameTask {
    fn name(&self) -> &'static str;

    fn tick(&mut self, frame: &FrameInfo) -> TaskControl;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Default)]
pub struct FrameScheduler {
    next_id: u64,
    tasks: HashMap<TaskId, Box<dyn FrameTask>>,
    produce: Vec<TaskId>,
    present: Vec<TaskId>,
    clock: FrameClock,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a producer task. Its first tick happens on the next refresh.
    pub fn schedule(&mut self, task: Box<dyn FrameTask>) -> TaskId {
        self.schedule_in(TaskPhase::Produce, task)
    }

    pub fn schedule_in(&mut self, phase: TaskPhase, task: Box<dyn FrameTask>) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        tracing::trace!(%id, task = task.name(), ?phase, "scheduled frame task");
        self.tasks.insert(id, task);
        self.queue_mut(phase).push(id);
        id
    }

    /// Cancels the pending continuation of `id`. Returns `false` when the task
    /// had already finished or been cancelled; that is not an error.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        match self.tasks.remove(&id) {
            Some(task) => {
                tracing::trace!(%id, task = task.name(), "cancelled frame task");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    /// Executes one display refresh: every task queued before this call ticks
    /// exactly once. Producers tick first, then presenters, each in the order
    /// they were queued.
    pub fn run_frame(&mut self, delta: Duration) -> FrameInfo {
        let frame = self.clock.advance(delta);
        self.run_phase(TaskPhase::Produce, &frame);
        self.run_phase(TaskPhase::Present, &frame);
        frame
    }

    fn run_phase(&mut self, phase: TaskPhase, frame: &FrameInfo) {
        let due = std::mem::take(self.queue_mut(phase));

        for id in due {
            let Some(mut task) = self.tasks.remove(&id) else {
                continue;
            };
            match task.tick(frame) {
                TaskControl::Reschedule => {
                    self.tasks.insert(id, task);
                    self.queue_mut(phase).push(id);
                }
                TaskControl::Finish => {
                    tracing::trace!(%id, task = task.name(), "frame task finished");
                }
            }
        }
    }

    fn queue_mut(&mut self, phase: TaskPhase) -> &mut Vec<TaskId> {
        match phase {
            TaskPhase::Produce => &mut self.produce,
            TaskPhase::Present => &mut self.present,
        }
    }
}

impl fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("tasks", &self.tasks.len())
            .field("produce", &self.produce)
            .field("present", &self.present)
            .field("clock", &self.clock)
            .finish()
    }
}
