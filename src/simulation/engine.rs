//! High-level runtime engine settings
//!
//! Selects the force model and the hardware backend used when building and
//! running a `Scenario`. A requested backend that is missing, or that the
//! model cannot use, falls back to the CPU with a visible warning.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::NptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
        }
    }
}

impl FromStr for Device {
    type Err = NptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(NptError::config(format!("unknown device `{other}`"))),
        }
    }
}

/// Backends present on this host
pub fn detect_devices() -> Vec<Device> {
    let mut found = vec![Device::Cpu];
    if Path::new("/dev/nvidiactl").exists() {
        found.push(Device::Cuda);
    }
    found
}

#[derive(Debug, Clone, PartialEq)]
pub struct Engine {
    pub model: String, // force provider identifier
    pub requested: Device, // backend named in the configuration
    pub device: Device, // backend actually used
}

impl Engine {
    /// Resolve the backend; `supported` lists what the model can run on
    pub fn select(model: &str, requested: Device, available: &[Device], supported: &[Device]) -> Self {
        let device = match check_device(requested, available, supported) {
            Ok(device) => device,
            Err(err) => {
                log::warn!("{err}; falling back to cpu");
                Device::Cpu
            }
        };
        Self {
            model: model.to_string(),
            requested,
            device,
        }
    }
}

fn check_device(requested: Device, available: &[Device], supported: &[Device]) -> Result<Device, NptError> {
    if available.contains(&requested) && supported.contains(&requested) {
        Ok(requested)
    } else {
        Err(NptError::DeviceUnavailable(requested.to_string()))
    }
}
