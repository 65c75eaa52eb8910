//! Compute device selection.
//!
//! Burn backends are chosen at compile time, so this module only decides which
//! of the compiled-in backends a run should use.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Requested compute device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// NdArray CPU backend
    #[default]
    Cpu,
    /// WGPU backend
    Gpu,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "CPU"),
            DeviceKind::Gpu => write!(f, "GPU"),
        }
    }
}

/// Resolves the requested device against what the binary was built with.
///
/// A GPU request falls back to the CPU when no GPU backend was compiled in or
/// no adapter is visible on this machine.
pub fn resolve_device(requested: DeviceKind, gpu_backend_compiled: bool) -> DeviceKind {
    match requested {
        DeviceKind::Cpu => DeviceKind::Cpu,
        DeviceKind::Gpu if !gpu_backend_compiled => {
            info!("GPU requested but this build has no GPU backend; using CPU");
            DeviceKind::Cpu
        }
        DeviceKind::Gpu if !is_gpu_available() => {
            info!("GPU requested but not available; using CPU");
            DeviceKind::Cpu
        }
        DeviceKind::Gpu => DeviceKind::Gpu,
    }
}

/// Check if any GPU acceleration is likely available
pub fn is_gpu_available() -> bool {
    has_nvidia_gpu() || has_amd_gpu()
}

fn has_nvidia_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
    }

    #[cfg(not(target_os = "linux"))]
    {
        std::env::var("CUDA_VISIBLE_DEVICES").is_ok()
    }
}

fn has_amd_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/sys/module/amdgpu").exists()
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        assert_eq!(DeviceKind::Cpu.to_string(), "CPU");
        assert_eq!(DeviceKind::Gpu.to_string(), "GPU");
    }

    #[test]
    fn test_cpu_is_always_cpu() {
        assert_eq!(resolve_device(DeviceKind::Cpu, true), DeviceKind::Cpu);
        assert_eq!(resolve_device(DeviceKind::Cpu, false), DeviceKind::Cpu);
    }

    #[test]
    fn test_gpu_without_backend_falls_back() {
        assert_eq!(resolve_device(DeviceKind::Gpu, false), DeviceKind::Cpu);
    }

    #[test]
    fn test_gpu_resolution_is_a_valid_device() {
        let device = resolve_device(DeviceKind::Gpu, true);
        assert!(matches!(device, DeviceKind::Cpu | DeviceKind::Gpu));
    }
}
