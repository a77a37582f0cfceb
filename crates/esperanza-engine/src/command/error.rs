use thiserror::Error;

use crate::hal::{CommandListType, HalError};

use super::FenceValue;

/// Broad class of a [`CommandError`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// The call was made in a state that does not allow it. Nothing was touched.
    Precondition,
    /// The backend reported a failure.
    Hardware,
    /// The request names something this layer does not support. A caller bug.
    Unsupported,
}

/// Failure of a queue, manager or allocator pool operation.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0} queue is already initialized")]
    AlreadyInitialized(CommandListType),

    #[error("{0} queue is not initialized")]
    NotInitialized(CommandListType),

    #[error("{0} queue was destroyed and cannot be reused")]
    Destroyed(CommandListType),

    #[error("allocator pool of the {ty} queue still holds {len} allocator(s)")]
    PoolNotEmpty { ty: CommandListType, len: usize },

    #[error("{0} queue has never submitted work")]
    NothingSubmitted(CommandListType),

    #[error("fence value {0:?} does not belong to any queue")]
    UnknownFence(FenceValue),

    #[error("{0} command lists are not supported")]
    UnsupportedListType(CommandListType),

    /// The list reached the queue but its fence value was never signaled.
    #[error("{ty} command list was submitted but signaling {pending} failed: {source}")]
    Unfenced {
        ty: CommandListType,
        /// Value the next signal on the queue will use.
        pending: FenceValue,
        #[source]
        source: HalError,
    },

    #[error("{op} failed: {source}")]
    Hal {
        op: &'static str,
        #[source]
        source: HalError,
    },
}

impl CommandError {
    /// Classifies the error; see [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::AlreadyInitialized(_)
            | CommandError::NotInitialized(_)
            | CommandError::Destroyed(_)
            | CommandError::PoolNotEmpty { .. }
            | CommandError::NothingSubmitted(_)
            | CommandError::UnknownFence(_) => ErrorKind::Precondition,
            CommandError::UnsupportedListType(_) => ErrorKind::Unsupported,
            CommandError::Unfenced { .. } | CommandError::Hal { .. } => ErrorKind::Hardware,
        }
    }

    /// Reports the error to the log and hands it back for propagation.
    pub(crate) fn logged(self) -> Self {
        match self.kind() {
            ErrorKind::Unsupported => log::warn!("{self}"),
            _ => log::error!("{self}"),
        }
        self
    }
}

/// Wraps a backend failure of `op` and logs it.
pub(crate) fn hal(op: &'static str) -> impl FnOnce(HalError) -> CommandError {
    move |source| CommandError::Hal { op, source }.logged()
}

pub type CommandResult<T> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_separate_caller_bugs_from_hardware() {
        assert_eq!(
            CommandError::UnsupportedListType(CommandListType::Bundle).kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(
            CommandError::AlreadyInitialized(CommandListType::Direct).kind(),
            ErrorKind::Precondition
        );
        let err = hal("signal fence")(HalError::DeviceLost);
        assert_eq!(err.kind(), ErrorKind::Hardware);
        assert_eq!(err.to_string(), "signal fence failed: device is lost");
    }
}
