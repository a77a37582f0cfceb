use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::hal::{
    Command, CommandAllocator, CommandList, CommandListType, EventDepth, HalError, HalResult,
};

use super::{Fault, FaultInjector};

#[derive(Debug, Default)]
struct StorageInner {
    commands: Vec<Command>,
    generation: u64,
    open_lists: usize,
    reset_count: u64,
}

/// Command memory owned by one allocator.
#[derive(Debug, Default)]
pub(super) struct AllocatorStorage {
    inner: Mutex<StorageInner>,
}

impl AllocatorStorage {
    fn generation(&self) -> u64 {
        self.inner.lock().generation
    }
}

/// What the timeline needs to know about a submitted list.
pub(super) struct RecordedList {
    storage: Arc<AllocatorStorage>,
    generation: u64,
    commands: usize,
}

impl RecordedList {
    /// True when the allocator was reset after this list recorded into it.
    pub(super) fn is_stale(&self) -> bool {
        self.storage.generation() != self.generation
    }

    pub(super) fn len(&self) -> usize {
        self.commands
    }
}

#[derive(Debug)]
pub struct SoftCommandAllocator {
    ty: CommandListType,
    storage: Arc<AllocatorStorage>,
    faults: Arc<FaultInjector>,
    name: Mutex<String>,
}

impl SoftCommandAllocator {
    pub(super) fn new(ty: CommandListType, faults: Arc<FaultInjector>) -> Self {
        Self {
            ty,
            storage: Arc::new(AllocatorStorage::default()),
            faults,
            name: Mutex::new(String::new()),
        }
    }

    /// Number of commands recorded since the last reset.
    pub fn recorded_len(&self) -> usize {
        self.storage.inner.lock().commands.len()
    }

    /// Snapshot of the commands recorded since the last reset.
    pub fn recorded(&self) -> Vec<Command> {
        self.storage.inner.lock().commands.clone()
    }
}

impl CommandAllocator for SoftCommandAllocator {
    fn ty(&self) -> CommandListType {
        self.ty
    }

    fn reset(&self) -> HalResult<()> {
        if self.faults.take(Fault::ResetAllocator) {
            return Err(HalError::Status(super::E_FAIL));
        }

        let mut inner = self.storage.inner.lock();
        if inner.open_lists > 0 {
            return Err(HalError::InUse);
        }
        inner.commands.clear();
        inner.generation += 1;
        inner.reset_count += 1;
        Ok(())
    }

    fn reset_count(&self) -> u64 {
        self.storage.inner.lock().reset_count
    }

    fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_owned();
    }

    fn name(&self) -> String {
        self.name.lock().clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct SoftCommandList {
    ty: CommandListType,
    storage: Arc<AllocatorStorage>,
    generation: u64,
    commands: usize,
    closed: bool,
    depth: EventDepth,
    name: String,
}

impl SoftCommandList {
    pub(super) fn open(ty: CommandListType, allocator: &Arc<dyn CommandAllocator>) -> HalResult<Self> {
        let storage = storage_of(allocator)?;
        let generation = bind(&storage)?;

        Ok(Self {
            ty,
            storage,
            generation,
            commands: 0,
            closed: false,
            depth: EventDepth::default(),
            name: String::new(),
        })
    }

    pub(super) fn recorded(&self) -> RecordedList {
        RecordedList {
            storage: Arc::clone(&self.storage),
            generation: self.generation,
            commands: self.commands,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn storage_of(allocator: &Arc<dyn CommandAllocator>) -> HalResult<Arc<AllocatorStorage>> {
    allocator
        .as_any()
        .downcast_ref::<SoftCommandAllocator>()
        .map(|soft| Arc::clone(&soft.storage))
        .ok_or(HalError::BackendMismatch)
}

/// Marks the allocator as recording; only one list may record into it at a time.
fn bind(storage: &AllocatorStorage) -> HalResult<u64> {
    let mut inner = storage.inner.lock();
    if inner.open_lists > 0 {
        return Err(HalError::InUse);
    }
    inner.open_lists += 1;
    Ok(inner.generation)
}

fn unbind(storage: &AllocatorStorage) {
    let mut inner = storage.inner.lock();
    inner.open_lists = inner.open_lists.saturating_sub(1);
}

impl CommandList for SoftCommandList {
    fn ty(&self) -> CommandListType {
        self.ty
    }

    fn record(&mut self, command: Command) -> HalResult<()> {
        if self.closed {
            return Err(HalError::ListClosed);
        }
        self.depth.apply(&command)?;
        self.storage.inner.lock().commands.push(command);
        self.commands += 1;
        Ok(())
    }

    fn close(&mut self) -> HalResult<()> {
        if self.closed {
            return Err(HalError::ListClosed);
        }
        self.depth.check_balanced()?;
        self.closed = true;
        unbind(&self.storage);
        Ok(())
    }

    fn reset(&mut self, allocator: &Arc<dyn CommandAllocator>) -> HalResult<()> {
        if !self.closed {
            return Err(HalError::ListNotClosed);
        }
        let storage = storage_of(allocator)?;
        self.generation = bind(&storage)?;
        self.storage = storage;
        self.commands = 0;
        self.closed = false;
        self.depth.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for SoftCommandList {
    fn drop(&mut self) {
        if !self.closed {
            unbind(&self.storage);
        }
    }
}
