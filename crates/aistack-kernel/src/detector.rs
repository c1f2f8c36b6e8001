//! [`HardwareDetector`] – source of the raw [`HardwareProfile`].
//!
//! The policy engine never probes hardware itself.  A detector is chosen when
//! the control layer is constructed and asked for a snapshot once per
//! evaluation.

use std::fs;
use std::path::PathBuf;

use aistack_types::{CpuInfo, HardwareProfile, MemoryInfo};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("hardware detection failed in {detector}: {details}")]
    Failed { detector: String, details: String },
}

/// Capability interface for hardware probing.
pub trait HardwareDetector: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Produce a fresh hardware snapshot.
    fn detect(&self) -> Result<HardwareProfile, DetectError>;
}

// ────────────────────────────────────────────────────────────────────────────
// StaticDetector
// ────────────────────────────────────────────────────────────────────────────

/// Returns a fixed, pre-built profile.
///
/// ```
/// use aistack_kernel::detector::{HardwareDetector, StaticDetector};
/// use aistack_types::HardwareProfile;
///
/// let detector = StaticDetector::new(HardwareProfile::default());
/// assert_eq!(detector.detect().unwrap(), HardwareProfile::default());
/// ```
#[derive(Debug, Clone)]
pub struct StaticDetector {
    profile: HardwareProfile,
}

impl StaticDetector {
    pub fn new(profile: HardwareProfile) -> Self {
        Self { profile }
    }
}

impl HardwareDetector for StaticDetector {
    fn name(&self) -> &str {
        "static"
    }

    fn detect(&self) -> Result<HardwareProfile, DetectError> {
        Ok(self.profile.clone())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// NativeDetector
// ────────────────────────────────────────────────────────────────────────────

/// Best-effort probe of the local host.
///
/// Reports the build target architecture, the OS-visible thread count and,
/// on Linux, `MemTotal` from `/proc/meminfo`.  GPUs and disks are left empty;
/// accelerator probing is the job of an external collaborator that can feed
/// a [`StaticDetector`] instead.
#[derive(Debug, Clone)]
pub struct NativeDetector {
    meminfo_path: PathBuf,
}

impl Default for NativeDetector {
    fn default() -> Self {
        Self {
            meminfo_path: PathBuf::from("/proc/meminfo"),
        }
    }
}

impl NativeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read memory totals from a custom meminfo file.
    pub fn with_meminfo_path(path: impl Into<PathBuf>) -> Self {
        Self {
            meminfo_path: path.into(),
        }
    }
}

impl HardwareDetector for NativeDetector {
    fn name(&self) -> &str {
        "native"
    }

    fn detect(&self) -> Result<HardwareProfile, DetectError> {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .map_err(|e| DetectError::Failed {
                detector: self.name().to_string(),
                details: format!("query thread count: {e}"),
            })?;

        let total = match fs::read_to_string(&self.meminfo_path) {
            Ok(raw) => meminfo_total_bytes(&raw).unwrap_or(0),
            Err(e) => {
                debug!(path = %self.meminfo_path.display(), error = %e, "meminfo unavailable");
                0
            }
        };

        Ok(HardwareProfile {
            cpu: CpuInfo {
                arch: std::env::consts::ARCH.to_string(),
                cores: threads,
                threads,
                ..Default::default()
            },
            memory: MemoryInfo {
                total,
                ..Default::default()
            },
            ..Default::default()
        })
    }
}

/// Extract `MemTotal` (reported in kB) from `/proc/meminfo` contents.
pub fn meminfo_total_bytes(raw: &str) -> Option<u64> {
    raw.lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16318356 kB\nMemFree:         1234567 kB\n";

    #[test]
    fn meminfo_total_is_parsed_in_bytes() {
        assert_eq!(meminfo_total_bytes(MEMINFO), Some(16318356 * 1024));
    }

    #[test]
    fn meminfo_without_total_is_none() {
        assert_eq!(meminfo_total_bytes("MemFree: 10 kB\n"), None);
    }

    #[test]
    fn native_detector_reads_custom_meminfo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meminfo");
        std::fs::write(&path, MEMINFO).unwrap();

        let profile = NativeDetector::with_meminfo_path(&path).detect().unwrap();
        assert_eq!(profile.memory.total, 16318356 * 1024);
        assert_eq!(profile.cpu.arch, std::env::consts::ARCH);
        assert!(profile.cpu.threads >= 1);
        assert!(profile.gpus.is_empty());
    }

    #[test]
    fn native_detector_tolerates_missing_meminfo() {
        let dir = tempfile::tempdir().unwrap();
        let profile = NativeDetector::with_meminfo_path(dir.path().join("nope"))
            .detect()
            .unwrap();
        assert_eq!(profile.memory.total, 0);
    }

    #[test]
    fn static_detector_returns_its_profile() {
        let mut profile = HardwareProfile::default();
        profile.cpu.arch = "aarch64".into();
        let detector = StaticDetector::new(profile.clone());
        assert_eq!(detector.name(), "static");
        assert_eq!(detector.detect().unwrap(), profile);
    }
}
