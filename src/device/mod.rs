//! Device selection and model residency.
//!
//! This module contains:
//! - DeviceManager, the interface to whoever owns compute devices
//! - LocalDeviceManager, a standalone implementation over candle devices
//! - ModelHandle, the Unloaded/Resident/Offloaded state machine

pub mod residency;

use candle_core::{DType, Device};
use tracing::info;

use crate::config::DeviceKind;
use crate::error::{Error, Result};

pub use residency::{ModelHandle, Placement, Residency};

/// Device policy supplied by the host.
pub trait DeviceManager: Send + Sync {
    /// Device inference should run on.
    fn inference_device(&self) -> Device;

    /// Device idle weights are parked on.
    fn offload_device(&self) -> Device;

    /// Devices the model must not be placed on; CPU is used instead.
    fn is_special_device(&self, device: &Device) -> bool;

    /// Whether weights should be loaded in half precision on `device`.
    fn prefers_reduced_precision(&self, device: &Device) -> bool;

    /// Makes `handle` resident on its load device.
    ///
    /// Called before every generation. Errors propagate to the caller
    /// unchanged.
    fn ensure_resident(&self, handle: &mut dyn Placement) -> Result<()> {
        handle.ensure_resident()
    }
}

/// Where and how a model is placed, decided once per engine.
#[derive(Debug, Clone)]
pub struct PlacementPlan {
    /// Device used for generation.
    pub load_device: Device,
    /// Device used when the model is offloaded.
    pub offload_device: Device,
    /// Weight data type.
    pub dtype: DType,
}

impl PlacementPlan {
    /// Resolves the placement from a device manager.
    pub fn resolve(devices: &dyn DeviceManager) -> Self {
        let mut load_device = devices.inference_device();
        let mut offload_device = devices.offload_device();

        if devices.is_special_device(&load_device) {
            load_device = Device::Cpu;
            offload_device = Device::Cpu;
        }

        let reduced = devices.prefers_reduced_precision(&load_device);
        let dtype = if reduced { DType::F16 } else { DType::F32 };
        info!(device = ?load_device, use_fp16 = reduced, "prompt expansion placement resolved");

        Self {
            load_device,
            offload_device,
            dtype,
        }
    }

    /// Whether the plan uses half precision.
    pub fn reduced_precision(&self) -> bool {
        self.dtype == DType::F16
    }
}

/// Device manager for running outside a host application.
///
/// Offloading always targets the CPU. Metal is treated as a special device,
/// so the model ends up on the CPU there.
#[derive(Debug, Clone)]
pub struct LocalDeviceManager {
    device: Device,
}

impl LocalDeviceManager {
    /// Opens the requested device.
    pub fn new(kind: DeviceKind) -> Result<Self> {
        let device = match kind {
            DeviceKind::Cpu => Device::Cpu,
            DeviceKind::Cuda => Device::new_cuda(0)
                .map_err(|e| Error::Device(format!("failed to open CUDA device 0: {e}")))?,
            DeviceKind::Metal => Device::new_metal(0)
                .map_err(|e| Error::Device(format!("failed to open Metal device 0: {e}")))?,
            DeviceKind::Auto => {
                if candle_core::utils::cuda_is_available() {
                    Device::new_cuda(0).unwrap_or(Device::Cpu)
                } else if candle_core::utils::metal_is_available() {
                    Device::new_metal(0).unwrap_or(Device::Cpu)
                } else {
                    Device::Cpu
                }
            }
        };
        Ok(Self { device })
    }

    /// CPU-only manager.
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
        }
    }
}

impl DeviceManager for LocalDeviceManager {
    fn inference_device(&self) -> Device {
        self.device.clone()
    }

    fn offload_device(&self) -> Device {
        Device::Cpu
    }

    fn is_special_device(&self, device: &Device) -> bool {
        device.is_metal()
    }

    fn prefers_reduced_precision(&self, device: &Device) -> bool {
        device.is_cuda()
    }
}
