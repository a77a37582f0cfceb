use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::hal::{CommandList, CommandListType, Fence, HalError, HalResult, Queue};

use super::command::SoftCommandList;
use super::timeline::{FenceState, Op, Timeline};
use super::{E_FAIL, ExecutionMode, Fault, FaultInjector};

pub struct SoftQueue {
    ty: CommandListType,
    lane: usize,
    timeline: Arc<Timeline>,
    faults: Arc<FaultInjector>,
    name: Mutex<String>,
}

impl SoftQueue {
    pub(super) fn new(ty: CommandListType, timeline: Arc<Timeline>, faults: Arc<FaultInjector>) -> Self {
        let lane = timeline.add_lane();
        Self {
            ty,
            lane,
            timeline,
            faults,
            name: Mutex::new(String::new()),
        }
    }
}

impl fmt::Debug for SoftQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftQueue")
            .field("ty", &self.ty)
            .field("lane", &self.lane)
            .field("name", &*self.name.lock())
            .finish()
    }
}

fn fence_state(fence: &dyn Fence) -> HalResult<Arc<FenceState>> {
    fence
        .as_any()
        .downcast_ref::<SoftFence>()
        .map(|soft| Arc::clone(&soft.state))
        .ok_or(HalError::BackendMismatch)
}

impl Queue for SoftQueue {
    fn ty(&self) -> CommandListType {
        self.ty
    }

    fn execute(&self, list: &mut dyn CommandList) -> HalResult<()> {
        let list = list
            .as_any_mut()
            .downcast_mut::<SoftCommandList>()
            .ok_or(HalError::BackendMismatch)?;
        if !list.is_closed() {
            return Err(HalError::ListNotClosed);
        }
        self.timeline.submit(self.lane, Op::Execute(list.recorded()));
        Ok(())
    }

    fn signal(&self, fence: &dyn Fence, value: u64) -> HalResult<()> {
        if self.faults.take(Fault::Signal) {
            return Err(HalError::Status(E_FAIL));
        }
        let state = fence_state(fence)?;
        self.timeline.submit(self.lane, Op::Signal(state, value));
        Ok(())
    }

    fn wait(&self, fence: &dyn Fence, value: u64) -> HalResult<()> {
        let state = fence_state(fence)?;
        self.timeline.submit(self.lane, Op::Wait(state, value));
        Ok(())
    }

    fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_owned();
    }
}

pub struct SoftFence {
    state: Arc<FenceState>,
    timeline: Arc<Timeline>,
    name: Mutex<String>,
}

impl SoftFence {
    pub(super) fn new(initial_value: u64, timeline: Arc<Timeline>) -> Self {
        Self {
            state: Arc::new(FenceState::new(initial_value)),
            timeline,
            name: Mutex::new(String::new()),
        }
    }
}

impl fmt::Debug for SoftFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftFence")
            .field("completed", &self.state.completed())
            .field("name", &*self.name.lock())
            .finish()
    }
}

impl Fence for SoftFence {
    fn completed_value(&self) -> u64 {
        self.state.completed()
    }

    fn signal(&self, value: u64) -> HalResult<()> {
        self.state.set(value);
        self.timeline.kick();
        Ok(())
    }

    fn wait(&self, value: u64) -> HalResult<()> {
        if self.state.completed() >= value {
            return Ok(());
        }

        match self.timeline.mode() {
            ExecutionMode::Threaded => {
                self.state.block_until(value);
                Ok(())
            }
            ExecutionMode::Manual => {
                // Nothing else runs the timeline in manual mode.
                self.timeline.flush();
                let completed = self.state.completed();
                if completed >= value {
                    Ok(())
                } else {
                    Err(HalError::Stalled { value, completed })
                }
            }
        }
    }

    fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_owned();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
