//! Backend seam for the explicit graphics API.
//!
//! Everything above this module talks to the GPU through these traits:
//! - `Device` creates queues, fences, allocators, command lists and heaps
//! - `Queue` executes closed command lists and orders work with fences
//! - `Fence` exposes the monotonically increasing completed value
//!
//! Two backends implement the seam: [`soft`] (a software GPU timeline that is
//! always available) and `wgpu` (feature `backend_wgpu`).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

mod address;
pub mod soft;

#[cfg(feature = "backend_wgpu")]
pub mod wgpu;

pub(crate) use address::{AddressSpace, VirtualDescriptorHeap};

use crate::resource::ResourceStates;

/// Native command list type.
///
/// Discriminants match the D3D12 enumeration; the fence type tag is derived from them.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CommandListType {
    Direct = 0,
    Bundle = 1,
    Compute = 2,
    Copy = 3,
    VideoDecode = 4,
    VideoProcess = 5,
    VideoEncode = 6,
}

impl CommandListType {
    pub const ALL: [CommandListType; 7] = [
        CommandListType::Direct,
        CommandListType::Bundle,
        CommandListType::Compute,
        CommandListType::Copy,
        CommandListType::VideoDecode,
        CommandListType::VideoProcess,
        CommandListType::VideoEncode,
    ];

    /// Looks up the list type for a raw discriminant (e.g. a fence type tag).
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| *ty as u8 == raw)
    }
}

impl fmt::Display for CommandListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandListType::Direct => "direct",
            CommandListType::Bundle => "bundle",
            CommandListType::Compute => "compute",
            CommandListType::Copy => "copy",
            CommandListType::VideoDecode => "video-decode",
            CommandListType::VideoProcess => "video-process",
            CommandListType::VideoEncode => "video-encode",
        };
        f.write_str(name)
    }
}

/// Descriptor heap type.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorHeapType {
    CbvSrvUav = 0,
    Sampler = 1,
    Rtv = 2,
    Dsv = 3,
}

impl DescriptorHeapType {
    pub const COUNT: usize = 4;

    pub const ALL: [DescriptorHeapType; Self::COUNT] = [
        DescriptorHeapType::CbvSrvUav,
        DescriptorHeapType::Sampler,
        DescriptorHeapType::Rtv,
        DescriptorHeapType::Dsv,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Render-target and depth-stencil descriptors are never read by shaders.
    pub fn can_be_shader_visible(self) -> bool {
        matches!(self, DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler)
    }

    /// Per-descriptor stride used by backends without a native descriptor layout.
    pub(crate) fn virtual_increment_size(self) -> u32 {
        match self {
            DescriptorHeapType::CbvSrvUav => 32,
            DescriptorHeapType::Sampler => 32,
            DescriptorHeapType::Rtv => 32,
            DescriptorHeapType::Dsv => 8,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DescriptorHeapDesc {
    pub ty: DescriptorHeapType,
    pub num_descriptors: u32,
    pub shader_visible: bool,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
}

/// Which backend produced a device.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Backend {
    Soft,
    Wgpu,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Soft => f.write_str("soft"),
            Backend::Wgpu => f.write_str("wgpu"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: Backend,
}

/// Commands a list can carry.
///
/// Only submission plumbing lives here; draw and dispatch recording is not part of this layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Marker(String),
    BeginEvent(String),
    EndEvent,
    ResourceBarrier {
        resource: u64,
        before: ResourceStates,
        after: ResourceStates,
        split: Option<BarrierSplit>,
    },
}

/// Half of a split resource barrier.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BarrierSplit {
    Begin,
    End,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HalError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device is lost")]
    DeviceLost,
    #[error("object is still in use")]
    InUse,
    #[error("command list is closed")]
    ListClosed,
    #[error("command list is still recording")]
    ListNotClosed,
    #[error("invalid recording: {0}")]
    InvalidRecording(String),
    #[error("object was created by a different backend")]
    BackendMismatch,
    #[error("fence can never reach {value:#x} (completed {completed:#x})")]
    Stalled { value: u64, completed: u64 },
    #[error("native call failed with status {0:#010x}")]
    Status(u32),
    #[error("{0}")]
    Backend(String),
}

pub type HalResult<T> = Result<T, HalError>;

pub trait Device: Send + Sync + fmt::Debug {
    fn info(&self) -> DeviceInfo;

    fn create_command_queue(&self, ty: CommandListType) -> HalResult<Box<dyn Queue>>;

    fn create_fence(&self, initial_value: u64) -> HalResult<Arc<dyn Fence>>;

    fn create_command_allocator(&self, ty: CommandListType)
    -> HalResult<Arc<dyn CommandAllocator>>;

    /// Creates a list in the recording state, bound to `allocator`.
    fn create_command_list(
        &self,
        ty: CommandListType,
        allocator: &Arc<dyn CommandAllocator>,
    ) -> HalResult<Box<dyn CommandList>>;

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc)
    -> HalResult<Arc<dyn DescriptorHeap>>;

    /// Byte stride between two descriptors of `ty`. Constant for the device lifetime.
    fn descriptor_handle_increment_size(&self, ty: DescriptorHeapType) -> u32;

    fn create_buffer(&self, desc: &BufferDesc) -> HalResult<Arc<dyn Resource>>;
}

pub trait Queue: Send + Sync + fmt::Debug {
    fn ty(&self) -> CommandListType;

    /// Submits a closed command list.
    fn execute(&self, list: &mut dyn CommandList) -> HalResult<()>;

    /// Sets `fence` to `value` once all previously submitted work completes.
    fn signal(&self, fence: &dyn Fence, value: u64) -> HalResult<()>;

    /// Makes later work on this queue wait until `fence` reaches `value`.
    ///
    /// The calling thread never blocks.
    fn wait(&self, fence: &dyn Fence, value: u64) -> HalResult<()>;

    fn set_name(&self, name: &str);
}

pub trait Fence: Send + Sync + fmt::Debug {
    fn completed_value(&self) -> u64;

    /// Sets the fence value from the CPU.
    fn signal(&self, value: u64) -> HalResult<()>;

    /// Blocks the calling thread until the completed value is at least `value`.
    ///
    /// Each caller waits on its own target; concurrent waiters never observe one another.
    fn wait(&self, value: u64) -> HalResult<()>;

    fn set_name(&self, name: &str);

    fn as_any(&self) -> &dyn Any;
}

pub trait CommandAllocator: Send + Sync + fmt::Debug {
    fn ty(&self) -> CommandListType;

    /// Releases recorded command memory. Fails while a list is still recording.
    fn reset(&self) -> HalResult<()>;

    fn reset_count(&self) -> u64;

    fn set_name(&self, name: &str);

    fn name(&self) -> String;

    fn as_any(&self) -> &dyn Any;
}

pub trait CommandList: Send + fmt::Debug {
    fn ty(&self) -> CommandListType;

    fn record(&mut self, command: Command) -> HalResult<()>;

    fn close(&mut self) -> HalResult<()>;

    /// Reopens a closed list against `allocator`.
    fn reset(&mut self, allocator: &Arc<dyn CommandAllocator>) -> HalResult<()>;

    fn is_closed(&self) -> bool;

    fn set_name(&mut self, name: &str);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub trait DescriptorHeap: Send + Sync + fmt::Debug {
    fn desc(&self) -> &DescriptorHeapDesc;

    fn cpu_start(&self) -> usize;

    /// `None` unless the heap is shader visible.
    fn gpu_start(&self) -> Option<u64>;

    fn set_name(&self, name: &str);
}

pub trait Resource: Send + Sync + fmt::Debug {
    fn id(&self) -> u64;

    fn size(&self) -> u64;

    fn gpu_virtual_address(&self) -> Option<u64>;
}

/// Tracks event-group nesting while a list records.
#[derive(Debug, Default)]
pub(crate) struct EventDepth(u32);

impl EventDepth {
    pub(crate) fn apply(&mut self, command: &Command) -> HalResult<()> {
        match command {
            Command::BeginEvent(_) => self.0 += 1,
            Command::EndEvent => {
                self.0 = self.0.checked_sub(1).ok_or_else(|| {
                    HalError::InvalidRecording("end event without a matching begin".into())
                })?;
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn check_balanced(&self) -> HalResult<()> {
        if self.0 != 0 {
            return Err(HalError::InvalidRecording(format!(
                "{} event group(s) left open",
                self.0
            )));
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.0 = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_type_round_trips_through_raw_tag() {
        for ty in CommandListType::ALL {
            assert_eq!(CommandListType::from_raw(ty as u8), Some(ty));
        }
        assert_eq!(CommandListType::from_raw(7), None);
    }

    #[test]
    fn event_depth_rejects_unbalanced_end() {
        let mut depth = EventDepth::default();
        assert!(depth.apply(&Command::EndEvent).is_err());
    }

    #[test]
    fn event_depth_requires_balance_to_close() {
        let mut depth = EventDepth::default();
        depth.apply(&Command::BeginEvent("frame".into())).unwrap();
        assert!(depth.check_balanced().is_err());
        depth.apply(&Command::EndEvent).unwrap();
        assert!(depth.check_balanced().is_ok());
    }
}
