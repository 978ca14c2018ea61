use std::fmt;
use std::str::FromStr;

/// Compute device a model replica is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(i32),
}

impl FromStr for Device {
    type Err = String;

    /// Accepts `cpu`, `cuda` (device 0) and `cuda:N`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.split_once(':') {
            None if s == "cpu" => Ok(Device::Cpu),
            None if s == "cuda" => Ok(Device::Cuda(0)),
            Some(("cuda", id)) => id
                .parse::<i32>()
                .ok()
                .filter(|id| *id >= 0)
                .map(Device::Cuda)
                .ok_or_else(|| format!("invalid CUDA device index '{}'", id)),
            _ => Err(format!("unknown device '{}'", s)),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(id) => write!(f, "cuda:{}", id),
        }
    }
}

/// Parse a comma-separated device list such as `cuda:0,cuda:1`.
pub fn parse_device_list(list: &str) -> Result<Vec<Device>, String> {
    let devices = list
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<Device>, _>>()?;

    if devices.is_empty() {
        return Err("at least one device is required".to_string());
    }

    Ok(devices)
}
