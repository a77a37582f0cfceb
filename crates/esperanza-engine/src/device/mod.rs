//! Device provider.
//!
//! This module is responsible for:
//! - choosing a backend (`DeviceInit`, optionally from the environment)
//! - creating the device every queue, heap and resource is built on
//!
//! The device must outlive everything created from it; `Arc` ownership enforces that.

mod error;
mod init;
mod provider;

pub use error::DeviceError;
pub use init::{BACKEND_ENV, DeviceInit, PowerPreference};
pub use provider::create_device;
