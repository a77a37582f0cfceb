//! Logger initialization.
//!
//! The engine logs through the `log` facade only; binaries call `init_logging`
//! early in `main` to install `env_logger`.

mod init;

pub use init::{LoggingConfig, default_level, init_logging};
