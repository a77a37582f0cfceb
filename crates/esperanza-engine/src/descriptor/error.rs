use thiserror::Error;

use crate::hal::{DescriptorHeapType, HalError};

/// Failure of a descriptor allocation.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("cannot allocate {count} {ty:?} descriptors at once (heaps hold {capacity})")]
    RequestTooLarge {
        ty: DescriptorHeapType,
        count: u32,
        capacity: u32,
    },

    #[error("descriptor heap pool was destroyed")]
    PoolDestroyed,

    #[error("{op} failed: {source}")]
    Hal {
        op: &'static str,
        #[source]
        source: HalError,
    },
}

impl DescriptorError {
    /// Reports the error to the log and hands it back for propagation.
    pub(crate) fn logged(self) -> Self {
        log::error!("{self}");
        self
    }
}

pub(crate) fn hal(op: &'static str) -> impl FnOnce(HalError) -> DescriptorError {
    move |source| DescriptorError::Hal { op, source }.logged()
}

pub type DescriptorResult<T> = Result<T, DescriptorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hal_wrapper_keeps_the_operation() {
        let err = hal("create descriptor heap")(HalError::OutOfMemory);
        assert!(matches!(
            err,
            DescriptorError::Hal {
                op: "create descriptor heap",
                source: HalError::OutOfMemory
            }
        ));
        assert_eq!(err.to_string(), "create descriptor heap failed: out of memory");
    }

    #[test]
    fn logged_hands_the_error_back() {
        assert!(matches!(
            DescriptorError::PoolDestroyed.logged(),
            DescriptorError::PoolDestroyed
        ));
    }
}
