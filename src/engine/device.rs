//! Device selection and numeric precision.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Compute device the engine runs on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    /// Host CPU.
    #[default]
    Cpu,
    /// CUDA accelerator.
    Cuda,
}

impl Device {
    /// Every selectable device, in display order.
    pub const ALL: [Self; 2] = [Self::Cpu, Self::Cuda];

    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }

    /// Precision used on this device.
    #[must_use]
    pub const fn precision(self) -> Precision {
        match self {
            Self::Cpu => Precision::Float32,
            Self::Cuda => Precision::Float16,
        }
    }

    /// Names of all devices, for selectors.
    #[must_use]
    pub fn choices() -> Vec<&'static str> {
        Self::ALL.iter().map(|d| d.as_str()).collect()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Device {
    type Err = ChatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            other => Err(ChatError::UnknownDevice(other.to_string())),
        }
    }
}

/// Floating point precision of the loaded weights.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// 32-bit floats.
    Float32,
    /// 16-bit floats.
    Float16,
}

impl Precision {
    /// Name as understood by the inference server.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float16 => "float16",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observable device state.
///
/// `AcceleratorRequested` is published while a move to the accelerator is in
/// flight; the engine keeps answering on its previous device until the move
/// completes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Running on the CPU.
    Cpu,
    /// Move to the accelerator pending.
    AcceleratorRequested,
    /// Running on the accelerator.
    AcceleratorActive,
}

impl DeviceState {
    /// State after a completed move to `device`.
    #[must_use]
    pub const fn settled(device: Device) -> Self {
        match device {
            Device::Cpu => Self::Cpu,
            Device::Cuda => Self::AcceleratorActive,
        }
    }

    /// Device that is actually serving requests in this state.
    #[must_use]
    pub const fn effective_device(self) -> Device {
        match self {
            Self::Cpu | Self::AcceleratorRequested => Device::Cpu,
            Self::AcceleratorActive => Device::Cuda,
        }
    }
}

/// Reports whether an accelerator can be used.
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    /// True when the runtime has a usable accelerator.
    async fn accelerator_available(&self) -> bool;
}

/// Probe with a fixed answer.
#[derive(Clone, Copy, Debug)]
pub struct StaticProbe(pub bool);

#[async_trait]
impl DeviceProbe for StaticProbe {
    async fn accelerator_available(&self) -> bool {
        self.0
    }
}

/// Pick the device to start on, falling back to CPU when the accelerator is
/// missing.
pub async fn resolve_startup_device(requested: Device, probe: &dyn DeviceProbe) -> Device {
    if requested == Device::Cuda && !probe.accelerator_available().await {
        tracing::warn!("CUDA not available, falling back to CPU");
        return Device::Cpu;
    }
    requested
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device() {
        assert_eq!("cpu".parse::<Device>().ok(), Some(Device::Cpu));
        assert_eq!("cuda".parse::<Device>().ok(), Some(Device::Cuda));
        assert!(matches!(
            "tpu".parse::<Device>(),
            Err(ChatError::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_precision_follows_device() {
        assert_eq!(Device::Cpu.precision(), Precision::Float32);
        assert_eq!(Device::Cuda.precision(), Precision::Float16);
    }

    #[test]
    fn test_requested_state_still_serves_on_cpu() {
        assert_eq!(DeviceState::AcceleratorRequested.effective_device(), Device::Cpu);
        assert_eq!(DeviceState::settled(Device::Cuda), DeviceState::AcceleratorActive);
    }

    #[tokio::test]
    async fn test_startup_falls_back_without_accelerator() {
        assert_eq!(
            resolve_startup_device(Device::Cuda, &StaticProbe(false)).await,
            Device::Cpu
        );
        assert_eq!(
            resolve_startup_device(Device::Cuda, &StaticProbe(true)).await,
            Device::Cuda
        );
    }
}
