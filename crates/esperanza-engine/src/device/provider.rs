use std::sync::Arc;

use crate::hal::soft::SoftDevice;
use crate::hal::{self, Backend};

use super::{DeviceError, DeviceInit};

/// Creates the device every other component is built on.
///
/// wgpu adapter/device acquisition is asynchronous; this blocks on it.
pub fn create_device(init: &DeviceInit) -> Result<Arc<dyn hal::Device>, DeviceError> {
    let device: Arc<dyn hal::Device> = match init.backend {
        Backend::Soft => Arc::new(SoftDevice::new(init.soft_mode).inspect_err(|e| {
            log::error!("creating soft device failed: {e}");
        })?),
        Backend::Wgpu => create_wgpu(init)?,
    };

    let info = device.info();
    log::info!("Selected GPU: {} ({})", info.name, info.backend);
    Ok(device)
}

#[cfg(feature = "backend_wgpu")]
fn create_wgpu(init: &DeviceInit) -> Result<Arc<dyn hal::Device>, DeviceError> {
    use super::PowerPreference;
    use crate::hal::wgpu::{WgpuDevice, WgpuInit};

    let wgpu_init = WgpuInit {
        power_preference: match init.power_preference {
            PowerPreference::LowPower => ::wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => ::wgpu::PowerPreference::HighPerformance,
        },
        force_fallback_adapter: init.force_fallback_adapter,
        label: init.label.clone(),
    };

    let device = pollster::block_on(WgpuDevice::new(&wgpu_init)).inspect_err(|e| {
        log::error!("creating wgpu device failed: {e}");
    })?;
    Ok(Arc::new(device))
}

#[cfg(not(feature = "backend_wgpu"))]
fn create_wgpu(_init: &DeviceInit) -> Result<Arc<dyn hal::Device>, DeviceError> {
    log::error!("wgpu backend requested but the backend_wgpu feature is disabled");
    Err(DeviceError::BackendUnavailable(Backend::Wgpu))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::soft::ExecutionMode;

    #[test]
    fn soft_device_reports_its_backend() {
        let init = DeviceInit {
            soft_mode: ExecutionMode::Manual,
            ..DeviceInit::soft()
        };
        let device = create_device(&init).unwrap();
        assert_eq!(device.info().backend, Backend::Soft);
    }
}
