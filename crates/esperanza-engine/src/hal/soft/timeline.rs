use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::command::RecordedList;
use super::{ExecutionMode, SoftStats};

/// Completed value of one fence plus the condition waiters block on.
#[derive(Debug)]
pub(super) struct FenceState {
    value: Mutex<u64>,
    reached: Condvar,
}

impl FenceState {
    pub(super) fn new(initial_value: u64) -> Self {
        Self {
            value: Mutex::new(initial_value),
            reached: Condvar::new(),
        }
    }

    pub(super) fn completed(&self) -> u64 {
        *self.value.lock()
    }

    pub(super) fn set(&self, value: u64) {
        *self.value.lock() = value;
        self.reached.notify_all();
    }

    /// Blocks until the completed value is at least `value`.
    pub(super) fn block_until(&self, value: u64) {
        let mut current = self.value.lock();
        while *current < value {
            self.reached.wait(&mut current);
        }
    }
}

pub(super) enum Op {
    Execute(RecordedList),
    Signal(Arc<FenceState>, u64),
    Wait(Arc<FenceState>, u64),
}

#[derive(Default)]
struct TimelineState {
    lanes: Vec<VecDeque<Op>>,
    stats: SoftStats,
    shutdown: bool,
}

/// The software GPU: one lane of pending operations per queue.
///
/// Lanes drain in submission order. A pending wait blocks only its own lane, so
/// cross-queue ordering exists only where a wait was submitted.
pub(super) struct Timeline {
    mode: ExecutionMode,
    state: Mutex<TimelineState>,
    wake: Condvar,
}

impl Timeline {
    pub(super) fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            state: Mutex::new(TimelineState::default()),
            wake: Condvar::new(),
        }
    }

    pub(super) fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub(super) fn add_lane(&self) -> usize {
        let mut state = self.state.lock();
        state.lanes.push(VecDeque::new());
        state.lanes.len() - 1
    }

    pub(super) fn submit(&self, lane: usize, op: Op) {
        let mut state = self.state.lock();
        if let Some(ops) = state.lanes.get_mut(lane) {
            ops.push_back(op);
        }
        if self.mode == ExecutionMode::Threaded {
            self.wake.notify_all();
        }
    }

    /// Wakes the worker after a CPU-side fence signal.
    pub(super) fn kick(&self) {
        let _state = self.state.lock();
        self.wake.notify_all();
    }

    /// Runs every operation that can make progress on the calling thread.
    pub(super) fn flush(&self) -> bool {
        let mut state = self.state.lock();
        drain(&mut state)
    }

    pub(super) fn stats(&self) -> SoftStats {
        self.state.lock().stats.clone()
    }

    pub(super) fn pending_ops(&self) -> usize {
        self.state.lock().lanes.iter().map(VecDeque::len).sum()
    }

    pub(super) fn run_worker(&self) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                log::trace!("soft gpu worker exiting");
                return;
            }
            drain(&mut state);
            self.wake.wait(&mut state);
        }
    }

    pub(super) fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.wake.notify_all();
    }
}

fn drain(state: &mut TimelineState) -> bool {
    let TimelineState { lanes, stats, .. } = state;
    let mut any = false;

    loop {
        let mut progressed = false;

        for ops in lanes.iter_mut() {
            while let Some(op) = ops.pop_front() {
                if let Op::Wait(fence, value) = &op {
                    if fence.completed() < *value {
                        ops.push_front(op);
                        break;
                    }
                }
                apply(op, stats);
                progressed = true;
            }
        }

        if !progressed {
            break;
        }
        any = true;
    }

    any
}

fn apply(op: Op, stats: &mut SoftStats) {
    match op {
        Op::Execute(list) => {
            if list.is_stale() {
                log::error!("soft gpu executed a list whose allocator was reset while in flight");
                stats.stale_executions += 1;
            } else {
                stats.executed_commands += list.len() as u64;
            }
            stats.executed_lists += 1;
        }
        Op::Signal(fence, value) => {
            fence.set(value);
            stats.signals += 1;
        }
        Op::Wait(_, _) => {
            stats.waits += 1;
        }
    }
}
