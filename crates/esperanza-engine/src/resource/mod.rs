//! GPU resource lifetime and state tracking.
//!
//! A `GpuResource` owns a native resource together with:
//! - its current usage state and a pending split-transition state
//! - its GPU virtual address (when the backend has one)
//! - a version that changes whenever the native object is replaced or destroyed
//!
//! Dependents cache the version they built against and compare for equality.

use std::sync::Arc;

use bitflags::bitflags;

use crate::hal::{self, BarrierSplit, Command, HalError, HalResult};

bitflags! {
    /// Resource usage states. Values match `D3D12_RESOURCE_STATES`.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct ResourceStates: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const RENDER_TARGET = 0x4;
        const UNORDERED_ACCESS = 0x8;
        const DEPTH_WRITE = 0x10;
        const DEPTH_READ = 0x20;
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        const PIXEL_SHADER_RESOURCE = 0x80;
        const STREAM_OUT = 0x100;
        const INDIRECT_ARGUMENT = 0x200;
        const COPY_DEST = 0x400;
        const COPY_SOURCE = 0x800;
        const RESOLVE_DEST = 0x1000;
        const RESOLVE_SOURCE = 0x2000;
        const GENERIC_READ = 0x1 | 0x2 | 0x40 | 0x80 | 0x200 | 0x800;
        const PRESENT = 0;
        const PREDICATION = 0x200;
    }
}

impl Default for ResourceStates {
    fn default() -> Self {
        ResourceStates::COMMON
    }
}

/// Identity of the native object behind a `GpuResource`.
///
/// Only equality is meaningful: a different version means cached views are stale.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ResourceVersion(u64);

#[derive(Debug, Default)]
pub struct GpuResource {
    raw: Option<Arc<dyn hal::Resource>>,
    usage_state: ResourceStates,
    transitioning_state: Option<ResourceStates>,
    gpu_virtual_address: Option<u64>,
    version: u64,
}

impl GpuResource {
    /// Creates an empty resource in the `COMMON` state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_raw(raw: Arc<dyn hal::Resource>, state: ResourceStates) -> Self {
        let mut resource = Self::new();
        resource.attach(raw, state);
        resource
    }

    /// Swaps in a new native object. Invalidates anything built against the old one.
    pub fn replace(&mut self, raw: Arc<dyn hal::Resource>, state: ResourceStates) {
        self.attach(raw, state);
        self.version += 1;
    }

    /// Releases the native object. The version changes even when nothing was attached.
    pub fn destroy(&mut self) {
        if let Some(raw) = self.raw.take() {
            log::trace!("destroying gpu resource {}", raw.id());
        }
        self.gpu_virtual_address = None;
        self.transitioning_state = None;
        self.version += 1;
    }

    fn attach(&mut self, raw: Arc<dyn hal::Resource>, state: ResourceStates) {
        self.gpu_virtual_address = raw.gpu_virtual_address();
        self.raw = Some(raw);
        self.usage_state = state;
        self.transitioning_state = None;
    }

    pub fn raw(&self) -> Option<&Arc<dyn hal::Resource>> {
        self.raw.as_ref()
    }

    pub fn gpu_virtual_address(&self) -> Option<u64> {
        self.gpu_virtual_address
    }

    pub fn usage_state(&self) -> ResourceStates {
        self.usage_state
    }

    pub fn transitioning_state(&self) -> Option<ResourceStates> {
        self.transitioning_state
    }

    pub fn version(&self) -> ResourceVersion {
        ResourceVersion(self.version)
    }

    fn raw_id(&self) -> HalResult<u64> {
        self.raw
            .as_ref()
            .map(|raw| raw.id())
            .ok_or_else(|| HalError::InvalidRecording("barrier on a destroyed resource".into()))
    }

    /// Records a barrier moving the resource into `new_state`.
    ///
    /// Completes a pending split transition when `new_state` is its target. Any other
    /// target while a split is pending is an error: the split halves must pair up.
    pub fn transition(
        &mut self,
        list: &mut dyn hal::CommandList,
        new_state: ResourceStates,
    ) -> HalResult<()> {
        if let Some(pending) = self.transitioning_state {
            if pending != new_state {
                return Err(HalError::InvalidRecording(format!(
                    "transition to {new_state:?} while a split transition to {pending:?} is pending"
                )));
            }
            return self.end_split_transition(list);
        }
        if new_state == self.usage_state {
            return Ok(());
        }

        list.record(Command::ResourceBarrier {
            resource: self.raw_id()?,
            before: self.usage_state,
            after: new_state,
            split: None,
        })?;
        self.usage_state = new_state;
        Ok(())
    }

    /// Starts a split barrier toward `new_state`; finish it with `end_split_transition`.
    pub fn begin_split_transition(
        &mut self,
        list: &mut dyn hal::CommandList,
        new_state: ResourceStates,
    ) -> HalResult<()> {
        if let Some(pending) = self.transitioning_state {
            return Err(HalError::InvalidRecording(format!(
                "split transition to {pending:?} is still pending"
            )));
        }
        if new_state == self.usage_state {
            return Ok(());
        }

        list.record(Command::ResourceBarrier {
            resource: self.raw_id()?,
            before: self.usage_state,
            after: new_state,
            split: Some(BarrierSplit::Begin),
        })?;
        self.transitioning_state = Some(new_state);
        Ok(())
    }

    /// No-op when no split transition is pending.
    pub fn end_split_transition(&mut self, list: &mut dyn hal::CommandList) -> HalResult<()> {
        let Some(pending) = self.transitioning_state else {
            return Ok(());
        };

        list.record(Command::ResourceBarrier {
            resource: self.raw_id()?,
            before: self.usage_state,
            after: pending,
            split: Some(BarrierSplit::End),
        })?;
        self.usage_state = pending;
        self.transitioning_state = None;
        Ok(())
    }
}

/// Remembers the last resource version a dependent was built against.
#[derive(Debug, Default, Clone)]
pub struct VersionCache {
    seen: Option<ResourceVersion>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing was cached yet or the resource changed since.
    pub fn is_stale(&self, resource: &GpuResource) -> bool {
        self.seen != Some(resource.version())
    }

    /// Records the current version; returns whether it differed from the cached one.
    pub fn refresh(&mut self, resource: &GpuResource) -> bool {
        let stale = self.is_stale(resource);
        self.seen = Some(resource.version());
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::soft::{ExecutionMode, SoftCommandAllocator, SoftDevice};
    use crate::hal::{BufferDesc, CommandListType, Device};

    fn buffer(device: &SoftDevice) -> Arc<dyn hal::Resource> {
        device
            .create_buffer(&BufferDesc {
                label: "test buffer".into(),
                size: 1024,
            })
            .unwrap()
    }

    fn recorded(allocator: &Arc<dyn hal::CommandAllocator>) -> Vec<Command> {
        allocator
            .as_any()
            .downcast_ref::<SoftCommandAllocator>()
            .unwrap()
            .recorded()
    }

    #[test]
    fn generic_read_matches_native_value() {
        assert_eq!(ResourceStates::GENERIC_READ.bits(), 0xAC3);
        assert_eq!(ResourceStates::PRESENT, ResourceStates::COMMON);
    }

    #[test]
    fn new_resource_is_common_without_address() {
        let resource = GpuResource::new();
        assert_eq!(resource.usage_state(), ResourceStates::COMMON);
        assert_eq!(resource.transitioning_state(), None);
        assert_eq!(resource.gpu_virtual_address(), None);
        assert!(resource.raw().is_none());
    }

    #[test]
    fn destroy_and_replace_change_version() {
        let device = SoftDevice::new(ExecutionMode::Manual).unwrap();
        let mut resource = GpuResource::from_raw(buffer(&device), ResourceStates::COPY_DEST);
        assert!(resource.gpu_virtual_address().is_some());

        let v0 = resource.version();
        resource.destroy();
        let v1 = resource.version();
        assert_ne!(v0, v1);
        assert_eq!(resource.gpu_virtual_address(), None);

        resource.replace(buffer(&device), ResourceStates::COMMON);
        assert_ne!(resource.version(), v1);
        assert_ne!(resource.version(), v0);
    }

    #[test]
    fn version_cache_detects_replacement() {
        let device = SoftDevice::new(ExecutionMode::Manual).unwrap();
        let mut resource = GpuResource::from_raw(buffer(&device), ResourceStates::COMMON);
        let mut cache = VersionCache::new();

        assert!(cache.refresh(&resource));
        assert!(!cache.is_stale(&resource));

        resource.replace(buffer(&device), ResourceStates::COMMON);
        assert!(cache.is_stale(&resource));
        assert!(cache.refresh(&resource));
        assert!(!cache.refresh(&resource));
    }

    #[test]
    fn transition_records_barrier_once() {
        let device = SoftDevice::new(ExecutionMode::Manual).unwrap();
        let allocator = device
            .create_command_allocator(CommandListType::Direct)
            .unwrap();
        let mut list = device
            .create_command_list(CommandListType::Direct, &allocator)
            .unwrap();
        let mut resource = GpuResource::from_raw(buffer(&device), ResourceStates::COMMON);

        resource
            .transition(list.as_mut(), ResourceStates::RENDER_TARGET)
            .unwrap();
        resource
            .transition(list.as_mut(), ResourceStates::RENDER_TARGET)
            .unwrap();

        let commands = recorded(&allocator);
        assert_eq!(commands.len(), 1);
        match &commands[0] {
            Command::ResourceBarrier {
                before,
                after,
                split,
                ..
            } => {
                assert_eq!(*before, ResourceStates::COMMON);
                assert_eq!(*after, ResourceStates::RENDER_TARGET);
                assert_eq!(*split, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(resource.usage_state(), ResourceStates::RENDER_TARGET);
    }

    #[test]
    fn split_transition_completes_on_matching_transition() {
        let device = SoftDevice::new(ExecutionMode::Manual).unwrap();
        let allocator = device
            .create_command_allocator(CommandListType::Direct)
            .unwrap();
        let mut list = device
            .create_command_list(CommandListType::Direct, &allocator)
            .unwrap();
        let mut resource = GpuResource::from_raw(buffer(&device), ResourceStates::COPY_DEST);

        resource
            .begin_split_transition(list.as_mut(), ResourceStates::PIXEL_SHADER_RESOURCE)
            .unwrap();
        assert_eq!(
            resource.transitioning_state(),
            Some(ResourceStates::PIXEL_SHADER_RESOURCE)
        );
        assert!(
            resource
                .begin_split_transition(list.as_mut(), ResourceStates::COMMON)
                .is_err()
        );

        resource
            .transition(list.as_mut(), ResourceStates::PIXEL_SHADER_RESOURCE)
            .unwrap();
        assert_eq!(resource.transitioning_state(), None);
        assert_eq!(resource.usage_state(), ResourceStates::PIXEL_SHADER_RESOURCE);

        let splits: Vec<_> = recorded(&allocator)
            .into_iter()
            .filter_map(|c| match c {
                Command::ResourceBarrier { split, .. } => split,
                _ => None,
            })
            .collect();
        assert_eq!(splits, vec![BarrierSplit::Begin, BarrierSplit::End]);
    }

    #[test]
    fn barrier_on_destroyed_resource_fails() {
        let device = SoftDevice::new(ExecutionMode::Manual).unwrap();
        let allocator = device
            .create_command_allocator(CommandListType::Direct)
            .unwrap();
        let mut list = device
            .create_command_list(CommandListType::Direct, &allocator)
            .unwrap();
        let mut resource = GpuResource::new();
        assert!(
            resource
                .transition(list.as_mut(), ResourceStates::COPY_SOURCE)
                .is_err()
        );
    }

    #[test]
    fn transition_away_from_a_pending_split_is_rejected() {
        let device = SoftDevice::new(ExecutionMode::Manual).unwrap();
        let allocator = device
            .create_command_allocator(CommandListType::Direct)
            .unwrap();
        let mut list = device
            .create_command_list(CommandListType::Direct, &allocator)
            .unwrap();
        let mut resource = GpuResource::from_raw(buffer(&device), ResourceStates::COPY_DEST);

        resource
            .begin_split_transition(list.as_mut(), ResourceStates::PIXEL_SHADER_RESOURCE)
            .unwrap();
        let err = resource
            .transition(list.as_mut(), ResourceStates::RENDER_TARGET)
            .unwrap_err();
        assert!(matches!(err, HalError::InvalidRecording(_)));
        assert_eq!(resource.usage_state(), ResourceStates::COPY_DEST);
        assert_eq!(
            resource.transitioning_state(),
            Some(ResourceStates::PIXEL_SHADER_RESOURCE)
        );

        resource.end_split_transition(list.as_mut()).unwrap();
        let barriers: Vec<_> = recorded(&allocator)
            .into_iter()
            .filter_map(|c| match c {
                Command::ResourceBarrier {
                    before,
                    after,
                    split,
                    ..
                } => Some((before, after, split)),
                _ => None,
            })
            .collect();
        assert_eq!(
            barriers,
            vec![
                (
                    ResourceStates::COPY_DEST,
                    ResourceStates::PIXEL_SHADER_RESOURCE,
                    Some(BarrierSplit::Begin)
                ),
                (
                    ResourceStates::COPY_DEST,
                    ResourceStates::PIXEL_SHADER_RESOURCE,
                    Some(BarrierSplit::End)
                ),
            ]
        );
        assert_eq!(resource.usage_state(), ResourceStates::PIXEL_SHADER_RESOURCE);
    }
}
