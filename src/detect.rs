//! Hardware and firmware detection
//!
//! Parsers take the raw text so they can be tested without the hardware;
//! the thin readers around them touch `/proc`, `/sys` and `lspci`.

use anyhow::{Context, Result};
use provision::Firmware;
use provision::disk::bytes_to_mib;
use regex::Regex;
use std::fmt;
use std::path::Path;

use crate::runner;

/// CPU vendor, for microcode selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuVendor {
    Intel,
    Amd,
    Unknown,
}

/// GPU vendor, for driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Intel,
    Amd,
    Nvidia,
    Unknown,
}

impl CpuVendor {
    /// Key used in the `desktop.microcode` table
    pub fn key(&self) -> &'static str {
        match self {
            Self::Intel => "intel",
            Self::Amd => "amd",
            Self::Unknown => "unknown",
        }
    }

    /// Parse the `vendor_id` line of `/proc/cpuinfo`
    pub fn from_cpuinfo(cpuinfo: &str) -> Self {
        let vendor = cpuinfo
            .lines()
            .find_map(|line| {
                let (key, value) = line.split_once(':')?;
                (key.trim() == "vendor_id").then(|| value.trim())
            })
            .unwrap_or_default();

        match vendor {
            "GenuineIntel" => Self::Intel,
            "AuthenticAMD" => Self::Amd,
            _ => Self::Unknown,
        }
    }
}

impl GpuVendor {
    /// Key used in the `desktop.gpu_drivers` table
    pub fn key(&self) -> &'static str {
        match self {
            Self::Intel => "intel",
            Self::Amd => "amd",
            Self::Nvidia => "nvidia",
            Self::Unknown => "unknown",
        }
    }

    /// Parse `lspci` output into the vendors of all display controllers
    ///
    /// Returns `[Unknown]` when no display controller is listed.
    pub fn from_lspci(lspci: &str) -> Result<Vec<Self>> {
        let re = Regex::new(
            r"(?i)(?:VGA compatible controller|3D controller|Display controller)[^:]*:\s*(.+)$",
        )
        .context("Invalid lspci pattern")?;

        let mut vendors = Vec::new();
        for line in lspci.lines() {
            let Some(caps) = re.captures(line) else {
                continue;
            };
            let device = caps.get(1).map_or("", |m| m.as_str());
            let vendor = if device.contains("NVIDIA") {
                Self::Nvidia
            } else if device.contains("AMD")
                || device.contains("ATI")
                || device.contains("Advanced Micro Devices")
            {
                Self::Amd
            } else if device.contains("Intel") {
                Self::Intel
            } else {
                Self::Unknown
            };
            if !vendors.contains(&vendor) {
                vendors.push(vendor);
            }
        }

        if vendors.is_empty() {
            vendors.push(Self::Unknown);
        }
        Ok(vendors)
    }
}

impl fmt::Display for CpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Detected hardware of the machine being installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub cpu: CpuVendor,
    pub gpus: Vec<GpuVendor>,
}

impl Capabilities {
    /// Probe the running machine; unreadable sources count as Unknown
    pub fn detect() -> Self {
        let cpu = match std::fs::read_to_string("/proc/cpuinfo") {
            Ok(info) => CpuVendor::from_cpuinfo(&info),
            Err(e) => {
                log::warn!("Could not read /proc/cpuinfo: {e}");
                CpuVendor::Unknown
            }
        };

        let lspci = runner::run_capture("lspci", &[]);
        let gpus = match lspci.and_then(|out| GpuVendor::from_lspci(&out)) {
            Ok(gpus) => gpus,
            Err(e) => {
                log::warn!("Could not list PCI devices: {e:#}");
                vec![GpuVendor::Unknown]
            }
        };

        log::debug!("Detected CPU {cpu}, GPUs {gpus:?}");
        Self { cpu, gpus }
    }
}

/// Firmware the live system was booted with
pub fn firmware() -> Firmware {
    if Path::new("/sys/firmware/efi").exists() {
        Firmware::Uefi
    } else {
        Firmware::Bios
    }
}

/// Size of a block device in MiB
pub fn disk_size_mib(device: &str) -> Result<u64> {
    let out = runner::run_capture("blockdev", &["--getsize64", device])
        .with_context(|| format!("Could not read the size of {device}"))?;
    let bytes: u64 = out
        .trim()
        .parse()
        .with_context(|| format!("Unexpected blockdev output: '{out}'"))?;
    Ok(bytes_to_mib(bytes))
}

/// Installed RAM in MiB
pub fn ram_mib() -> Result<u64> {
    let meminfo =
        std::fs::read_to_string("/proc/meminfo").context("Could not read /proc/meminfo")?;
    parse_meminfo_mib(&meminfo).context("MemTotal missing from /proc/meminfo")
}

fn parse_meminfo_mib(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: u64 = line
        .trim_start_matches("MemTotal:")
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .ok()?;
    Some(kib.div_ceil(1024))
}

// ============================================================================
// Tests
// ============================================================================
