//! Install configuration (`install.toml`)
//!
//! Everything except `disk.device` has a default, so the smallest useful
//! config is:
//!
//! ```toml
//! [disk]
//! device = "/dev/sda"
//! ```

use anyhow::{Context, Result, bail};
use chrono::TimeDelta;
use provision::{DataIntent, DiskIntent, Filesystem, Firmware, SizeSpec};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Login names accepted by `useradd` without `--badname`
const USER_NAME_PATTERN: &str = r"^[a-z_][a-z0-9_-]{0,31}$";

/// Single DNS label
const HOSTNAME_PATTERN: &str = r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$";

// ============================================================================
// Main Config Schema
// ============================================================================

/// The complete install configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    pub disk: DiskConfig,

    #[serde(default)]
    pub system: SystemConfig,

    #[serde(default)]
    pub users: Vec<UserConfig>,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub bootloader: BootloaderConfig,

    #[serde(default)]
    pub desktop: DesktopConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

/// Target disk and layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Whole-disk device node, e.g. `/dev/sda` or `/dev/nvme0n1`
    pub device: String,

    #[serde(default)]
    pub firmware: FirmwareChoice,

    /// Disk size override (e.g. `64GiB`); probed with `blockdev` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    #[serde(default = "default_esp_size")]
    pub esp_size: SizeSpec,

    #[serde(default = "default_esp_mountpoint")]
    pub esp_mountpoint: String,

    #[serde(default)]
    pub swap: SwapPolicy,

    #[serde(default = "default_root_size")]
    pub root_size: SizeSpec,

    #[serde(default = "default_root_filesystem")]
    pub root_filesystem: Filesystem,

    #[serde(default = "default_min_root")]
    pub min_root: SizeSpec,

    /// Extra partition after root, e.g. a separate `/home`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub size: SizeSpec,
    #[serde(default = "default_root_filesystem")]
    pub filesystem: Filesystem,
    #[serde(default = "default_data_mountpoint")]
    pub mountpoint: String,
}

/// Firmware mode; `auto` follows `/sys/firmware/efi`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareChoice {
    #[default]
    Auto,
    Uefi,
    Bios,
}

/// Swap partition sizing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SwapPolicy {
    #[default]
    None,
    /// Same size as installed RAM
    Ram,
    Size(SizeSpec),
}

impl FromStr for SwapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" | "" => Ok(Self::None),
            "ram" => Ok(Self::Ram),
            _ => match s.parse::<SizeSpec>()? {
                SizeSpec::Remainder => Err("swap cannot take the rest of the disk".to_string()),
                size => Ok(Self::Size(size)),
            },
        }
    }
}

impl TryFrom<String> for SwapPolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SwapPolicy> for String {
    fn from(value: SwapPolicy) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SwapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Ram => f.write_str("ram"),
            Self::Size(size) => write!(f, "{size}"),
        }
    }
}

/// Identity of the installed system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Zone under `/usr/share/zoneinfo`, e.g. `Europe/Berlin`
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_locale")]
    pub locale: String,

    #[serde(default = "default_keymap")]
    pub keymap: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            timezone: default_timezone(),
            locale: default_locale(),
            keymap: default_keymap(),
        }
    }
}

/// A login account to create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,

    #[serde(default = "default_groups")]
    pub groups: Vec<String>,

    #[serde(default = "default_shell")]
    pub shell: String,

    /// Grant `sudo` through the wheel group
    #[serde(default)]
    pub sudo: bool,

    /// Hash for `/etc/shadow` (as produced by `openssl passwd -6`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

/// Base system installation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_base_packages")]
    pub packages: Vec<String>,

    /// Extra arguments for `pacstrap` before the target root
    #[serde(default = "default_pacstrap_args")]
    pub pacstrap_args: Vec<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            packages: default_base_packages(),
            pacstrap_args: default_pacstrap_args(),
        }
    }
}

/// GRUB installation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootloaderConfig {
    /// EFI boot entry name
    #[serde(default = "default_bootloader_id")]
    pub id: String,

    #[serde(default = "default_bootloader_packages")]
    pub packages: Vec<String>,

    /// Kernel command line appended to `GRUB_CMDLINE_LINUX_DEFAULT`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmdline: Option<String>,
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            id: default_bootloader_id(),
            packages: default_bootloader_packages(),
            cmdline: None,
        }
    }
}

/// Lightweight desktop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_desktop_packages")]
    pub packages: Vec<String>,

    /// systemd unit enabled in the target, e.g. `lightdm`
    #[serde(default = "default_display_manager")]
    pub display_manager: String,

    /// Extra units to enable
    #[serde(default = "default_services")]
    pub services: Vec<String>,

    /// CPU vendor (`intel`, `amd`) to microcode package
    #[serde(default = "default_microcode")]
    pub microcode: BTreeMap<String, String>,

    /// GPU vendor (`intel`, `amd`, `nvidia`, `unknown`) to driver packages
    #[serde(default = "default_gpu_drivers")]
    pub gpu_drivers: BTreeMap<String, Vec<String>>,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            packages: default_desktop_packages(),
            display_manager: default_display_manager(),
            services: default_services(),
            microcode: default_microcode(),
            gpu_drivers: default_gpu_drivers(),
        }
    }
}

/// Engine tuning and locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the progress record and confirmation token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,

    /// Mount point of the new system
    #[serde(default = "default_target_root")]
    pub target_root: String,

    /// Timeout for bounded steps (filesystem creation, mounts)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,

    #[serde(default = "default_confirmation_ttl")]
    pub confirmation_ttl_minutes: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            target_root: default_target_root(),
            command_timeout_secs: default_command_timeout(),
            heartbeat_secs: default_heartbeat(),
            confirmation_ttl_minutes: default_confirmation_ttl(),
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_esp_size() -> SizeSpec {
    SizeSpec::Mib(512)
}

fn default_esp_mountpoint() -> String {
    "/boot".to_string()
}

fn default_root_size() -> SizeSpec {
    SizeSpec::Remainder
}

fn default_root_filesystem() -> Filesystem {
    Filesystem::Ext4
}

fn default_min_root() -> SizeSpec {
    SizeSpec::Mib(provision::disk::DEFAULT_MIN_ROOT_MIB)
}

fn default_data_mountpoint() -> String {
    "/home".to_string()
}

fn default_hostname() -> String {
    "archlinux".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_locale() -> String {
    "en_US.UTF-8".to_string()
}

fn default_keymap() -> String {
    "us".to_string()
}

fn default_groups() -> Vec<String> {
    vec!["wheel".to_string()]
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_base_packages() -> Vec<String> {
    ["base", "linux", "linux-firmware", "sudo", "networkmanager"]
        .map(String::from)
        .to_vec()
}

fn default_pacstrap_args() -> Vec<String> {
    vec!["-K".to_string()]
}

fn default_bootloader_id() -> String {
    "GRUB".to_string()
}

fn default_bootloader_packages() -> Vec<String> {
    ["grub", "efibootmgr"].map(String::from).to_vec()
}

fn default_true() -> bool {
    true
}

fn default_desktop_packages() -> Vec<String> {
    [
        "xorg-server",
        "xfce4",
        "xfce4-goodies",
        "lightdm",
        "lightdm-gtk-greeter",
    ]
    .map(String::from)
    .to_vec()
}

fn default_display_manager() -> String {
    "lightdm".to_string()
}

fn default_services() -> Vec<String> {
    vec!["NetworkManager".to_string()]
}

fn default_microcode() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("intel".to_string(), "intel-ucode".to_string()),
        ("amd".to_string(), "amd-ucode".to_string()),
    ])
}

fn default_gpu_drivers() -> BTreeMap<String, Vec<String>> {
    let drivers = |pkgs: &[&str]| pkgs.iter().map(|p| (*p).to_string()).collect::<Vec<_>>();
    BTreeMap::from([
        ("intel".to_string(), drivers(&["mesa", "vulkan-intel"])),
        ("amd".to_string(), drivers(&["mesa", "vulkan-radeon", "xf86-video-amdgpu"])),
        ("nvidia".to_string(), drivers(&["nvidia", "nvidia-utils"])),
        ("unknown".to_string(), drivers(&["mesa"])),
    ])
}

fn default_target_root() -> String {
    "/mnt".to_string()
}

fn default_command_timeout() -> u64 {
    600
}

fn default_heartbeat() -> u64 {
    30
}

fn default_confirmation_ttl() -> i64 {
    60
}

// ============================================================================
// Loading and validation
// ============================================================================

impl InstallConfig {
    /// Load and validate the config at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read install config: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid install config: {}", path.display()))?;
        log::debug!("Loaded install config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate config text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Invalid TOML format")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.disk.device.starts_with("/dev/") {
            bail!(
                "disk.device must be a device node under /dev, got '{}'",
                self.disk.device
            );
        }

        let hostname_re = Regex::new(HOSTNAME_PATTERN).context("Invalid hostname pattern")?;
        if !hostname_re.is_match(&self.system.hostname) {
            bail!("system.hostname '{}' is not a valid hostname", self.system.hostname);
        }

        let name_re = Regex::new(USER_NAME_PATTERN).context("Invalid user name pattern")?;
        for user in &self.users {
            if !name_re.is_match(&user.name) {
                bail!("user name '{}' is not a valid login name", user.name);
            }
            if user.name == "root" {
                bail!("'root' is created by the base system; remove it from [[users]]");
            }
        }

        if let Some(size) = &self.disk.size {
            provision::disk::parse_mib(size).map_err(|e| anyhow::anyhow!("disk.size: {e}"))?;
        }
        if self.engine.heartbeat_secs == 0 {
            bail!("engine.heartbeat_secs must be at least 1");
        }
        self.confirmation_ttl()?;
        Ok(())
    }

    /// How long a stored confirmation stays valid
    pub fn confirmation_ttl(&self) -> Result<TimeDelta> {
        let minutes = self.engine.confirmation_ttl_minutes;
        if minutes < 1 {
            bail!("engine.confirmation_ttl_minutes must be at least 1, got {minutes}");
        }
        TimeDelta::try_minutes(minutes)
            .with_context(|| format!("engine.confirmation_ttl_minutes is too large: {minutes}"))
    }

    /// Resolve firmware mode, probing the running system for `auto`
    pub fn firmware(&self) -> Firmware {
        match self.disk.firmware {
            FirmwareChoice::Uefi => Firmware::Uefi,
            FirmwareChoice::Bios => Firmware::Bios,
            FirmwareChoice::Auto => crate::detect::firmware(),
        }
    }

    /// Disk intent for the planner
    ///
    /// `ram_mib` is only consulted for the `ram` swap policy.
    pub fn disk_intent(
        &self,
        firmware: Firmware,
        ram_mib: impl FnOnce() -> Result<u64>,
    ) -> Result<DiskIntent> {
        let swap = match self.disk.swap {
            SwapPolicy::None => None,
            SwapPolicy::Ram => Some(SizeSpec::Mib(ram_mib()?)),
            SwapPolicy::Size(size) => Some(size),
        };

        let min_root_mib = match self.disk.min_root {
            SizeSpec::Mib(mib) => mib,
            _ => bail!("disk.min_root must be an absolute size such as 2GiB"),
        };

        Ok(DiskIntent {
            device: self.disk.device.clone(),
            firmware,
            esp_size: self.disk.esp_size,
            esp_mountpoint: self.disk.esp_mountpoint.clone(),
            swap,
            root_size: self.disk.root_size,
            root_filesystem: self.disk.root_filesystem,
            data: self.disk.data.as_ref().map(|d| DataIntent {
                size: d.size,
                filesystem: d.filesystem,
                mountpoint: d.mountpoint.clone(),
            }),
            min_root_mib,
        })
    }

    /// Disk size override in MiB, if configured
    pub fn disk_size_override(&self) -> Option<u64> {
        self.disk
            .size
            .as_deref()
            .and_then(|s| provision::disk::parse_mib(s).ok())
    }

    /// Target root as a path, with `~` and variables expanded
    pub fn target_root(&self) -> PathBuf {
        crate::paths::expand(&self.engine.target_root)
    }
}

// ============================================================================
// Tests
// ============================================================================
