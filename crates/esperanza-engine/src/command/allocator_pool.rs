use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::hal::{self, CommandListType};

use super::error::{CommandResult, hal};
use super::FenceValue;

/// A command allocator checked out of a pool.
///
/// Not `Clone`: while checked out, the holder is the only user. Return it with
/// `CommandQueue::discard_allocator` once the list recorded from it was submitted.
pub struct CommandAllocator {
    raw: Arc<dyn hal::CommandAllocator>,
}

impl CommandAllocator {
    /// The native allocator, for binding command lists to it.
    pub fn raw(&self) -> &Arc<dyn hal::CommandAllocator> {
        &self.raw
    }

    /// List type the allocator records for.
    pub fn ty(&self) -> CommandListType {
        self.raw.ty()
    }

    /// Debug name assigned by the pool, `CommandAllocator {n}`.
    pub fn name(&self) -> String {
        self.raw.name()
    }
}

impl fmt::Debug for CommandAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandAllocator")
            .field("name", &self.raw.name())
            .field("ty", &self.raw.ty())
            .finish()
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    /// Every allocator this pool ever created.
    allocators: Vec<Arc<dyn hal::CommandAllocator>>,
    /// Discarded allocators with the fence value that frees them, oldest first.
    ready: VecDeque<(FenceValue, Arc<dyn hal::CommandAllocator>)>,
}

/// Recycles the command allocators of one queue type.
///
/// Discarded allocators come back in submission order, so only the front of the
/// ready queue needs checking. When the front is not yet safe a new allocator is
/// created, even if a later entry would be.
#[derive(Debug)]
pub struct CommandAllocatorPool {
    ty: CommandListType,
    inner: Mutex<PoolInner>,
}

impl CommandAllocatorPool {
    /// Creates an empty pool for `ty` allocators.
    pub fn new(ty: CommandListType) -> Self {
        Self {
            ty,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// List type of every allocator in the pool.
    pub fn ty(&self) -> CommandListType {
        self.ty
    }

    /// Hands out a reset allocator whose last use completed at or before `completed`,
    /// or a new one.
    pub fn request_allocator(
        &self,
        device: &dyn hal::Device,
        completed: FenceValue,
    ) -> CommandResult<CommandAllocator> {
        let mut inner = self.inner.lock();

        if let Some((fence_value, allocator)) = inner.ready.front() {
            if *fence_value <= completed {
                // Reset before popping: a failed reset leaves the entry for the next request.
                allocator.reset().map_err(hal("reset command allocator"))?;
                if let Some((_, allocator)) = inner.ready.pop_front() {
                    return Ok(CommandAllocator { raw: allocator });
                }
            }
        }

        let allocator = device
            .create_command_allocator(self.ty)
            .map_err(hal("create command allocator"))?;
        allocator.set_name(&format!("CommandAllocator {}", inner.allocators.len()));
        inner.allocators.push(Arc::clone(&allocator));

        log::debug!(
            "created {} command allocator #{}",
            self.ty,
            inner.allocators.len()
        );

        Ok(CommandAllocator { raw: allocator })
    }

    /// Returns `allocator` to the pool; it is reused once `fence_value` completes.
    pub fn discard_allocator(&self, fence_value: FenceValue, allocator: CommandAllocator) {
        self.inner.lock().ready.push_back((fence_value, allocator.raw));
    }

    /// Number of allocators created by this pool.
    pub fn size(&self) -> usize {
        self.inner.lock().allocators.len()
    }

    /// Number of discarded allocators waiting for reuse.
    pub fn ready_len(&self) -> usize {
        self.inner.lock().ready.len()
    }

    /// Releases every allocator. Only valid once the queue is idle.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        log::trace!(
            "releasing {} {} command allocator(s)",
            inner.allocators.len(),
            self.ty
        );
        inner.ready.clear();
        inner.allocators.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;
    use crate::hal::soft::{ExecutionMode, Fault, SoftDevice};
    use crate::hal::Device;

    const TY: CommandListType = CommandListType::Direct;

    fn fence(sequence: u64) -> FenceValue {
        FenceValue::new(TY, sequence)
    }

    fn device() -> SoftDevice {
        SoftDevice::new(ExecutionMode::Manual).unwrap()
    }

    #[test]
    fn empty_pool_creates_exactly_one_allocator() {
        let device = device();
        let pool = CommandAllocatorPool::new(TY);
        let allocator = pool.request_allocator(&device, fence(0)).unwrap();
        assert_eq!(pool.size(), 1);
        assert_eq!(allocator.name(), "CommandAllocator 0");
        assert_eq!(allocator.ty(), TY);
    }

    #[test]
    fn allocator_is_reused_only_after_its_fence() {
        let device = device();
        let pool = CommandAllocatorPool::new(TY);
        let a = pool.request_allocator(&device, fence(0)).unwrap();
        let a_name = a.name();
        pool.discard_allocator(fence(1), a);

        let b = pool.request_allocator(&device, fence(0)).unwrap();
        assert_ne!(b.name(), a_name);
        assert_eq!(pool.size(), 2);

        let again = pool.request_allocator(&device, fence(1)).unwrap();
        assert_eq!(again.name(), a_name);
        assert_eq!(again.raw().reset_count(), 1);
        assert_eq!(pool.size(), 2);
        drop(b);
    }

    #[test]
    fn only_the_front_of_the_ready_queue_is_checked() {
        let device = device();
        let pool = CommandAllocatorPool::new(TY);
        let a = pool.request_allocator(&device, fence(0)).unwrap();
        let b = pool.request_allocator(&device, fence(0)).unwrap();
        // Out of submission order: the front is not safe, the entry behind it is.
        pool.discard_allocator(fence(5), a);
        pool.discard_allocator(fence(2), b);

        let c = pool.request_allocator(&device, fence(3)).unwrap();
        assert_eq!(c.name(), "CommandAllocator 2");
        assert_eq!(pool.ready_len(), 2);
    }

    #[test]
    fn failed_reset_is_reported_and_not_handed_out() {
        let device = device();
        let pool = CommandAllocatorPool::new(TY);
        let a = pool.request_allocator(&device, fence(0)).unwrap();
        pool.discard_allocator(fence(1), a);

        device.inject_fault(Fault::ResetAllocator);
        assert!(pool.request_allocator(&device, fence(1)).is_err());
        assert_eq!(pool.ready_len(), 1);

        let a = pool.request_allocator(&device, fence(1)).unwrap();
        assert_eq!(a.name(), "CommandAllocator 0");
    }

    #[test]
    fn creation_failure_leaves_pool_unchanged() {
        let device = device();
        let pool = CommandAllocatorPool::new(TY);
        device.inject_fault(Fault::CreateAllocator);
        assert!(pool.request_allocator(&device, fence(0)).is_err());
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn shutdown_releases_everything() {
        let device = device();
        let pool = CommandAllocatorPool::new(TY);
        let a = pool.request_allocator(&device, fence(0)).unwrap();
        pool.discard_allocator(fence(1), a);
        pool.shutdown();
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.ready_len(), 0);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Request,
        Discard(usize),
        Complete,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => Just(Step::Request),
            3 => (0usize..8).prop_map(Step::Discard),
            2 => Just(Step::Complete),
        ]
    }

    proptest! {
        #[test]
        fn in_flight_allocators_are_never_handed_out(steps in prop::collection::vec(step(), 1..64)) {
            let device = device();
            let pool = CommandAllocatorPool::new(TY);

            let mut held: Vec<CommandAllocator> = Vec::new();
            let mut held_names: HashSet<String> = HashSet::new();
            // name -> fence value it was discarded with
            let mut in_flight: Vec<(String, FenceValue)> = Vec::new();
            let mut next = 1u64;
            let mut completed = 0u64;

            for step in steps {
                match step {
                    Step::Request => {
                        let allocator = pool.request_allocator(&device, fence(completed)).unwrap();
                        let name = allocator.name();
                        prop_assert!(!held_names.contains(&name));
                        prop_assert!(!in_flight
                            .iter()
                            .any(|(n, f)| *n == name && *f > fence(completed)));
                        in_flight.retain(|(n, _)| *n != name);
                        held_names.insert(name);
                        held.push(allocator);
                    }
                    Step::Discard(index) => {
                        if held.is_empty() {
                            continue;
                        }
                        let allocator = held.swap_remove(index % held.len());
                        let name = allocator.name();
                        held_names.remove(&name);
                        in_flight.push((name, fence(next)));
                        pool.discard_allocator(fence(next), allocator);
                        next += 1;
                    }
                    Step::Complete => {
                        completed = (completed + 1).min(next - 1);
                    }
                }
            }

            prop_assert_eq!(pool.size(), held.len() + pool.ready_len());
        }
    }
}
