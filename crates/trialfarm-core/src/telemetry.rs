//! Device telemetry parsing and load thresholds
//!
//! Status reports are the text tables printed by `nvidia-smi`. Each device
//! contributes one line of the form:
//!
//! ```text
//! | 30%   45C    P2    70W / 250W |   1234MiB / 11178MiB |     23%      Default |
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::ProbeConfig;

static DEVICE_LINE: OnceLock<Regex> = OnceLock::new();

fn device_line() -> &'static Regex {
    DEVICE_LINE.get_or_init(|| {
        Regex::new(r"(\d+)C.*?\|\s*(\d+)\s*MiB\s*/\s*(\d+)\s*MiB\s*\|\s*(\d+)\s*%")
            .expect("device line pattern is valid")
    })
}

/// One device's load, as read from a single status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTelemetry {
    /// Temperature in degrees Celsius
    pub temperature_c: u32,
    /// Used memory in MiB
    pub used_mem_mib: u64,
    /// Total memory in MiB
    pub total_mem_mib: u64,
    /// Utilization percentage (0-100)
    pub utilization_pct: u32,
}

impl DeviceTelemetry {
    /// Fraction of device memory in use, `None` when the total is zero
    pub fn mem_fraction(&self) -> Option<f64> {
        if self.total_mem_mib == 0 {
            return None;
        }
        Some(self.used_mem_mib as f64 / self.total_mem_mib as f64)
    }

    pub fn util_fraction(&self) -> f64 {
        self.utilization_pct as f64 / 100.0
    }

    /// Whether both memory and utilization are strictly under the thresholds
    pub fn is_idle(&self, thresholds: &ProbeConfig) -> bool {
        match self.mem_fraction() {
            Some(mem) => {
                mem < thresholds.max_mem_fraction
                    && self.util_fraction() < thresholds.max_util_fraction
            }
            None => false,
        }
    }
}

/// Parse every device line of a status report, in report order
///
/// Lines that don't match the device pattern are skipped.
pub fn parse_status(raw: &str) -> Vec<DeviceTelemetry> {
    raw.lines()
        .filter_map(|line| {
            let caps = device_line().captures(line)?;
            Some(DeviceTelemetry {
                temperature_c: caps[1].parse().ok()?,
                used_mem_mib: caps[2].parse().ok()?,
                total_mem_mib: caps[3].parse().ok()?,
                utilization_pct: caps[4].parse().ok()?,
            })
        })
        .collect()
}

/// Telemetry for one device of a report, if the report lists it
pub fn device_telemetry(raw: &str, device: u32) -> Option<DeviceTelemetry> {
    parse_status(raw).get(device as usize).copied()
}

/// Whether `device` is listed in the report and under both load thresholds
pub fn is_available(raw: &str, device: u32, thresholds: &ProbeConfig) -> bool {
    device_telemetry(raw, device).is_some_and(|t| t.is_idle(thresholds))
}
