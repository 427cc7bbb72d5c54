//! Compute device detection and selection
//!
//! Probes for available accelerators once at startup and exposes the fixed
//! preference order the model services use: CUDA GPU, then Apple Metal (MPS),
//! then CPU.

use serde::{Deserialize, Serialize};
use std::process::Command;
use std::sync::OnceLock;

/// Cached device selection, probed once per process
static SELECTED_DEVICE: OnceLock<Device> = OnceLock::new();

/// Inference compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Mps,
    Cpu,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::Mps => write!(f, "mps"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// Detect the best available device.
///
/// CUDA is probed via nvidia-smi, which in multi-tenant environments
/// correctly reports only the GPUs allocated to this container. MPS is
/// assumed present on macOS hosts.
pub fn detect_device() -> Device {
    if cuda_available() {
        tracing::info!("Using CUDA GPU for inference");
        return Device::Cuda;
    }

    if cfg!(target_os = "macos") {
        tracing::info!("Using Apple Metal Performance Shaders (MPS)");
        return Device::Mps;
    }

    tracing::info!("No accelerator detected, using CPU");
    Device::Cpu
}

fn cuda_available() -> bool {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=index", "--format=csv,noheader"])
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            stdout
                .lines()
                .any(|line| line.trim().parse::<u32>().is_ok())
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!(stderr = %stderr, "nvidia-smi failed, assuming no CUDA GPUs");
            false
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to run nvidia-smi, assuming no CUDA GPUs");
            false
        }
    }
}

/// Get the cached device selection, probing on first call
pub fn selected() -> Device {
    *SELECTED_DEVICE.get_or_init(detect_device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cuda.to_string(), "cuda");
        assert_eq!(Device::Mps.to_string(), "mps");
        assert_eq!(Device::Cpu.to_string(), "cpu");
    }

    #[test]
    fn test_detect_does_not_panic() {
        // Result depends on the host; just verify detection completes
        let _ = detect_device();
    }

    #[test]
    fn test_selected_is_stable() {
        assert_eq!(selected(), selected());
    }

    #[test]
    fn test_device_serde() {
        let json = serde_json::to_string(&Device::Cuda).unwrap();
        assert_eq!(json, "\"cuda\"");
        let device: Device = serde_json::from_str("\"cpu\"").unwrap();
        assert_eq!(device, Device::Cpu);
    }
}
