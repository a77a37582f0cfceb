use std::str::FromStr;

use crate::hal::Backend;
use crate::hal::soft::ExecutionMode;

use super::DeviceError;

/// Environment variable that selects the backend in [`DeviceInit::from_env`].
pub const BACKEND_ENV: &str = "ESPERANZA_BACKEND";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum PowerPreference {
    LowPower,
    #[default]
    HighPerformance,
}

/// Initialization parameters for the device provider.
///
/// Keep this structure stable and minimal. Add configuration flags only when a
/// concrete platform or backend requirement exists.
#[derive(Debug, Clone)]
pub struct DeviceInit {
    pub backend: Backend,

    /// Adapter preference. Only the wgpu backend chooses between adapters.
    pub power_preference: PowerPreference,

    /// Use a software adapter even when hardware is present.
    pub force_fallback_adapter: bool,

    /// How the software GPU runs its timeline.
    ///
    /// `Threaded` behaves like a real GPU; `Manual` only runs work when waited on.
    pub soft_mode: ExecutionMode,

    pub label: String,
}

impl Default for DeviceInit {
    fn default() -> Self {
        Self {
            backend: if cfg!(feature = "backend_wgpu") {
                Backend::Wgpu
            } else {
                Backend::Soft
            },
            power_preference: PowerPreference::default(),
            force_fallback_adapter: false,
            soft_mode: ExecutionMode::Threaded,
            label: "esperanza device".to_owned(),
        }
    }
}

impl DeviceInit {
    /// Software device running on a worker thread.
    pub fn soft() -> Self {
        Self {
            backend: Backend::Soft,
            ..Self::default()
        }
    }

    /// Defaults, with the backend taken from `ESPERANZA_BACKEND` when it is set.
    pub fn from_env() -> Result<Self, DeviceError> {
        let mut init = Self::default();
        if let Ok(name) = std::env::var(BACKEND_ENV) {
            init.backend = name.parse()?;
        }
        Ok(init)
    }
}

impl FromStr for Backend {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soft" | "software" => Ok(Backend::Soft),
            "wgpu" => Ok(Backend::Wgpu),
            _ => Err(DeviceError::UnknownBackend(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse_case_insensitively() {
        assert_eq!("soft".parse::<Backend>().unwrap(), Backend::Soft);
        assert_eq!(" WGPU ".parse::<Backend>().unwrap(), Backend::Wgpu);
        assert!(matches!(
            "vulkan".parse::<Backend>(),
            Err(DeviceError::UnknownBackend(name)) if name == "vulkan"
        ));
    }

    #[test]
    fn soft_preset_keeps_other_defaults() {
        let init = DeviceInit::soft();
        assert_eq!(init.backend, Backend::Soft);
        assert_eq!(init.soft_mode, ExecutionMode::Threaded);
        assert_eq!(init.power_preference, PowerPreference::HighPerformance);
    }
}
