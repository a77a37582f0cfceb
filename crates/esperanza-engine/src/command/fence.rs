use std::fmt;

use crate::hal::CommandListType;

const TAG_SHIFT: u32 = 56;
const SEQUENCE_MASK: u64 = (1 << TAG_SHIFT) - 1;

/// A fence value tagged with the type of the queue that signals it.
///
/// The top 8 bits hold the queue's list type, the low 56 bits a sequence number that
/// starts at 1 for the first signal. Values from different queues never collide.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FenceValue(u64);

impl FenceValue {
    /// Tags `sequence` with `ty`. Bits of `sequence` above the low 56 are dropped.
    pub const fn new(ty: CommandListType, sequence: u64) -> Self {
        Self(((ty as u64) << TAG_SHIFT) | (sequence & SEQUENCE_MASK))
    }

    /// Wraps a value read back from a native fence.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The value a queue's fence holds before anything was signaled on it.
    pub const fn initial(ty: CommandListType) -> Self {
        Self::new(ty, 0)
    }

    /// The value as signaled on the native fence.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Top 8 bits: the producing queue's list type discriminant.
    pub const fn tag(self) -> u8 {
        (self.0 >> TAG_SHIFT) as u8
    }

    /// Low 56 bits: position in the producing queue's signal order.
    pub const fn sequence(self) -> u64 {
        self.0 & SEQUENCE_MASK
    }

    /// The producing queue's list type, if the tag names one.
    pub fn list_type(self) -> Option<CommandListType> {
        CommandListType::from_raw(self.tag())
    }

    pub(crate) const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for FenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FenceValue({:#018x})", self.0)
    }
}

impl fmt::Display for FenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.list_type() {
            Some(ty) => write!(f, "{ty}#{}", self.sequence()),
            None => write!(f, "{:#018x}", self.0),
        }
    }
}
