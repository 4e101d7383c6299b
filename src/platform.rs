//! Injected platform metrics capability
//!
//! Core logic never reads host-environment globals directly. Instead a
//! `PlatformMetrics` value is handed to the pipeline at construction: either
//! an available probe that can report process resource usage and host
//! details, or the unavailable variant that reports nothing.

use crate::error::ProbeError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Size of the host display surface, when the host has one
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Capability interface for reading host resource usage
#[cfg_attr(test, mockall::automock)]
pub trait PlatformProbe: Send + Sync {
    /// Resident memory of the current process in megabytes
    fn memory_usage_mb(&self) -> Result<f64, ProbeError>;

    /// CPU time consumed by the process as a percentage of wall time since the last call
    fn cpu_usage_percent(&self) -> Result<f64, ProbeError>;

    /// Host viewport, if the host has a display surface
    fn viewport(&self) -> Option<Viewport>;

    /// Short runtime identifier used for error tags (e.g. `linux-x86_64`)
    fn runtime(&self) -> String;
}

/// Platform capability handed to the pipeline
#[derive(Clone, Default)]
pub enum PlatformMetrics {
    Available(Arc<dyn PlatformProbe>),
    #[default]
    Unavailable,
}

impl std::fmt::Debug for PlatformMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformMetrics::Available(_) => f.write_str("PlatformMetrics::Available"),
            PlatformMetrics::Unavailable => f.write_str("PlatformMetrics::Unavailable"),
        }
    }
}

impl PlatformMetrics {
    pub fn available(probe: impl PlatformProbe + 'static) -> Self {
        PlatformMetrics::Available(Arc::new(probe))
    }

    pub fn is_available(&self) -> bool {
        matches!(self, PlatformMetrics::Available(_))
    }

    /// Memory reading, or `None` when the capability is missing or the probe fails
    pub fn memory_usage_mb(&self) -> Option<f64> {
        match self {
            PlatformMetrics::Available(probe) => match probe.memory_usage_mb() {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!("Memory probe failed: {}", e);
                    None
                }
            },
            PlatformMetrics::Unavailable => None,
        }
    }

    pub fn cpu_usage_percent(&self) -> Option<f64> {
        match self {
            PlatformMetrics::Available(probe) => match probe.cpu_usage_percent() {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!("CPU probe failed: {}", e);
                    None
                }
            },
            PlatformMetrics::Unavailable => None,
        }
    }

    pub fn viewport(&self) -> Option<Viewport> {
        match self {
            PlatformMetrics::Available(probe) => probe.viewport(),
            PlatformMetrics::Unavailable => None,
        }
    }

    pub fn runtime(&self) -> Option<String> {
        match self {
            PlatformMetrics::Available(probe) => Some(probe.runtime()),
            PlatformMetrics::Unavailable => None,
        }
    }
}

/// Probe backed by the operating system's view of the current process
#[derive(Debug, Default)]
pub struct ProcessProbe {
    /// (wall clock, cpu seconds) at the previous CPU reading
    last_cpu_reading: std::sync::Mutex<Option<(std::time::Instant, f64)>>,
}

impl ProcessProbe {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(target_os = "linux")]
    fn resident_kb() -> Result<u64, ProbeError> {
        let status = std::fs::read_to_string("/proc/self/status")?;
        status
            .lines()
            .find(|line| line.starts_with("VmRSS:"))
            .and_then(|line| line.split_whitespace().nth(1))
            .ok_or_else(|| ProbeError::ParseError("VmRSS not found".to_string()))?
            .parse::<u64>()
            .map_err(|e| ProbeError::ParseError(e.to_string()))
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    fn resident_kb() -> Result<u64, ProbeError> {
        let usage = Self::rusage()?;
        // ru_maxrss is reported in bytes on macOS; this is peak, not current, residency
        Ok(usage.ru_maxrss as u64 / 1024)
    }

    #[cfg(not(unix))]
    fn resident_kb() -> Result<u64, ProbeError> {
        Err(ProbeError::Unavailable("resident memory".to_string()))
    }

    #[cfg(unix)]
    fn rusage() -> Result<libc::rusage, ProbeError> {
        // SAFETY: getrusage only writes into the zeroed struct we own
        unsafe {
            let mut usage: libc::rusage = std::mem::zeroed();
            if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
                Ok(usage)
            } else {
                Err(ProbeError::IoError(std::io::Error::last_os_error()))
            }
        }
    }

    #[cfg(unix)]
    fn cpu_seconds() -> Result<f64, ProbeError> {
        let usage = Self::rusage()?;
        let user = usage.ru_utime.tv_sec as f64 + usage.ru_utime.tv_usec as f64 / 1_000_000.0;
        let system = usage.ru_stime.tv_sec as f64 + usage.ru_stime.tv_usec as f64 / 1_000_000.0;
        Ok(user + system)
    }

    #[cfg(not(unix))]
    fn cpu_seconds() -> Result<f64, ProbeError> {
        Err(ProbeError::Unavailable("process cpu time".to_string()))
    }
}

impl PlatformProbe for ProcessProbe {
    fn memory_usage_mb(&self) -> Result<f64, ProbeError> {
        Ok(Self::resident_kb()? as f64 / 1024.0)
    }

    fn cpu_usage_percent(&self) -> Result<f64, ProbeError> {
        let now = std::time::Instant::now();
        let cpu = Self::cpu_seconds()?;
        let mut last = self
            .last_cpu_reading
            .lock()
            .map_err(|_| ProbeError::Unavailable("cpu reading lock poisoned".to_string()))?;

        let percent = match *last {
            Some((then, previous_cpu)) => {
                let wall = now.duration_since(then).as_secs_f64();
                if wall > 0.0 {
                    ((cpu - previous_cpu) / wall * 100.0).clamp(0.0, 100.0)
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        *last = Some((now, cpu));
        Ok(percent)
    }

    fn viewport(&self) -> Option<Viewport> {
        let width = std::env::var("COLUMNS").ok()?.parse().ok()?;
        let height = std::env::var("LINES").ok()?.parse().ok()?;
        Some(Viewport { width, height })
    }

    fn runtime(&self) -> String {
        format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
    }
}
