use thiserror::Error;

use crate::hal::{Backend, HalError};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("unknown backend {0:?} (expected \"soft\" or \"wgpu\")")]
    UnknownBackend(String),

    #[error("the {0} backend is not compiled into this build")]
    BackendUnavailable(Backend),

    #[error("device creation failed: {0}")]
    Hal(#[from] HalError),
}
