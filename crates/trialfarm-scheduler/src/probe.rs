//! Device availability probing for a worker slot

use std::sync::Arc;
use tracing::debug;
use trialfarm_core::{device_telemetry, is_available, DeviceTelemetry, ProbeConfig};
use trialfarm_runtime::Transport;

/// Reads the status report of a worker's host and judges its device
pub struct ResourceProbe {
    transport: Arc<dyn Transport>,
    device: u32,
    config: ProbeConfig,
}

impl ResourceProbe {
    pub fn new(transport: Arc<dyn Transport>, device: u32, config: ProbeConfig) -> Self {
        Self {
            transport,
            device,
            config,
        }
    }

    /// Whether this probe's device is listed in `raw` and under both thresholds
    pub fn is_available(&self, raw: &str) -> bool {
        is_available(raw, self.device, &self.config)
    }

    /// Read the device status `samples` times, `sample_interval` apart
    ///
    /// Returns false as soon as one read is unavailable, unparsable, or fails
    /// to arrive; the remaining reads are not requested.
    pub async fn check(&self) -> bool {
        for sample in 0..self.config.samples {
            let available = match self.transport.status_report().await {
                Ok(raw) => self.is_available(&raw),
                Err(e) => {
                    debug!(device = self.device, error = %e, "Status query failed");
                    false
                }
            };

            if !available {
                debug!(device = self.device, sample = sample, "Device not available");
                return false;
            }

            if sample + 1 < self.config.samples {
                tokio::time::sleep(self.config.sample_interval()).await;
            }
        }

        true
    }

    /// Whether the host answers and lists this device, regardless of load
    pub async fn is_reachable(&self) -> bool {
        self.snapshot().await.is_some()
    }

    /// Current telemetry of this device, if the host answers and lists it
    pub async fn snapshot(&self) -> Option<DeviceTelemetry> {
        match self.transport.status_report().await {
            Ok(raw) => device_telemetry(&raw, self.device),
            Err(e) => {
                debug!(device = self.device, error = %e, "Status query failed");
                None
            }
        }
    }
}
