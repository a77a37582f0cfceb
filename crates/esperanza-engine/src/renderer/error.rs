use thiserror::Error;

use crate::command::CommandError;
use crate::descriptor::DescriptorError;
use crate::device::DeviceError;
use crate::hal::HalError;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("invalid renderer configuration: {0}")]
    Config(String),

    #[error("renderer was destroyed")]
    Destroyed,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("recording frame commands failed: {0}")]
    Record(#[from] HalError),
}
