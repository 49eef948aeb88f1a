//! Disk layout planning
//!
//! A [`DiskPlan`] is pure data: the target device, its partition table and
//! the concrete offset of every partition. Nothing in this module touches a
//! device. [`validate`] checks the layout invariants and [`render`] turns a
//! plan into the `parted` commands that would create it.
//!
//! Offsets are whole MiB. The first partition starts at 1 MiB, each next
//! partition starts where the previous one ends, and only the last one may
//! extend to the end of the disk.

pub mod probe;
pub mod size;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::confirm::PlanDigest;
use crate::error::PlanError;
use crate::types::CommandSpec;

pub use probe::{ExpectedPartition, PartedTable, ProbedPartition};
pub use size::{MAX_SIZE_MIB, SizeSpec, bytes_to_mib, format_mib, parse_mib};

/// Offset of the first partition, leaving room for the partition table
pub const FIRST_PARTITION_MIB: u64 = 1;

/// Default minimum size of the root partition
pub const DEFAULT_MIN_ROOT_MIB: u64 = 2048;

/// Boot firmware the installed system will use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Firmware {
    Uefi,
    Bios,
}

impl Firmware {
    /// Partition table label conventionally paired with this firmware
    pub fn default_table(&self) -> TableLabel {
        match self {
            Self::Uefi => TableLabel::Gpt,
            Self::Bios => TableLabel::Msdos,
        }
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uefi => "UEFI",
            Self::Bios => "BIOS",
        })
    }
}

/// Partition table type, named as `parted` names it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableLabel {
    Gpt,
    Msdos,
}

impl TableLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Msdos => "msdos",
        }
    }
}

/// What a partition is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionRole {
    Esp,
    Swap,
    Root,
    Data,
}

impl PartitionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Esp => "esp",
            Self::Swap => "swap",
            Self::Root => "root",
            Self::Data => "data",
        }
    }
}

impl fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filesystem created on a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filesystem {
    Vfat,
    Swap,
    Ext4,
    Btrfs,
    Xfs,
}

impl Filesystem {
    /// Filesystem type argument for `parted mkpart`
    pub fn parted_type(&self) -> &'static str {
        match self {
            Self::Vfat => "fat32",
            Self::Swap => "linux-swap",
            Self::Ext4 => "ext4",
            Self::Btrfs => "btrfs",
            Self::Xfs => "xfs",
        }
    }

    /// Signature type as reported by `blkid -s TYPE`
    pub fn blkid_type(&self) -> &'static str {
        match self {
            Self::Vfat => "vfat",
            Self::Swap => "swap",
            Self::Ext4 => "ext4",
            Self::Btrfs => "btrfs",
            Self::Xfs => "xfs",
        }
    }

    /// Command that creates this filesystem on `device`
    pub fn mkfs_command(&self, device: &str) -> CommandSpec {
        match self {
            Self::Vfat => CommandSpec::new("mkfs.fat").args(["-F", "32", device]),
            Self::Swap => CommandSpec::new("mkswap").arg(device),
            Self::Ext4 => CommandSpec::new("mkfs.ext4").args(["-F", device]),
            Self::Btrfs => CommandSpec::new("mkfs.btrfs").args(["-f", device]),
            Self::Xfs => CommandSpec::new("mkfs.xfs").args(["-f", device]),
        }
    }

    /// Whether a partition with `role` may carry this filesystem
    pub fn fits(&self, role: PartitionRole) -> bool {
        match role {
            PartitionRole::Esp => matches!(self, Self::Vfat),
            PartitionRole::Swap => matches!(self, Self::Swap),
            PartitionRole::Root => matches!(self, Self::Ext4 | Self::Btrfs | Self::Xfs),
            PartitionRole::Data => !matches!(self, Self::Swap),
        }
    }
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.blkid_type())
    }
}

/// Where a partition ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionEnd {
    /// Absolute offset in MiB
    Mib(u64),
    /// End of the disk (`100%` to `parted`)
    DiskEnd,
}

/// One partition with resolved offsets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub role: PartitionRole,
    pub filesystem: Filesystem,
    /// Size as requested, kept for display
    pub size: SizeSpec,
    pub start_mib: u64,
    pub end: PartitionEnd,
    /// Mount point inside the target root, if mounted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
}

impl PartitionSpec {
    /// End offset in MiB, resolving [`PartitionEnd::DiskEnd`] against `disk_mib`
    pub fn end_mib(&self, disk_mib: u64) -> u64 {
        match self.end {
            PartitionEnd::Mib(end) => end,
            PartitionEnd::DiskEnd => disk_mib,
        }
    }

    /// Size in MiB on a disk of `disk_mib`
    pub fn size_mib(&self, disk_mib: u64) -> u64 {
        self.end_mib(disk_mib).saturating_sub(self.start_mib)
    }

    /// `parted` end argument
    fn parted_end(&self) -> String {
        match self.end {
            PartitionEnd::Mib(end) => format!("{end}MiB"),
            PartitionEnd::DiskEnd => "100%".to_string(),
        }
    }
}

/// Optional extra data partition (e.g. `/home`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIntent {
    pub size: SizeSpec,
    pub filesystem: Filesystem,
    pub mountpoint: String,
}

/// What the operator asked for, before offsets are resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskIntent {
    pub device: String,
    pub firmware: Firmware,
    pub esp_size: SizeSpec,
    pub esp_mountpoint: String,
    /// `None` for no swap partition
    pub swap: Option<SizeSpec>,
    pub root_size: SizeSpec,
    pub root_filesystem: Filesystem,
    pub data: Option<DataIntent>,
    pub min_root_mib: u64,
}

impl DiskIntent {
    /// UEFI layout with a 512 MiB ESP, no swap and root taking the rest
    pub fn new(device: impl Into<String>, firmware: Firmware) -> Self {
        Self {
            device: device.into(),
            firmware,
            esp_size: SizeSpec::Mib(512),
            esp_mountpoint: "/boot".to_string(),
            swap: None,
            root_size: SizeSpec::Remainder,
            root_filesystem: Filesystem::Ext4,
            data: None,
            min_root_mib: DEFAULT_MIN_ROOT_MIB,
        }
    }
}

/// Complete, immutable layout for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskPlan {
    pub device: String,
    pub firmware: Firmware,
    pub table: TableLabel,
    pub disk_size_mib: u64,
    pub min_root_mib: u64,
    pub partitions: Vec<PartitionSpec>,
}

impl DiskPlan {
    /// Resolve an intent into concrete offsets on a disk of `disk_size_mib`
    ///
    /// Partitions are laid out ESP (UEFI only), swap, root, data. The result
    /// is not validated; call [`validate`] before using it. Fails only when
    /// the offsets do not fit in a `u64`.
    pub fn from_intent(intent: &DiskIntent, disk_size_mib: u64) -> Result<Self, PlanError> {
        let mut layout: Vec<(PartitionRole, Filesystem, SizeSpec, Option<String>)> = Vec::new();

        if intent.firmware == Firmware::Uefi {
            layout.push((
                PartitionRole::Esp,
                Filesystem::Vfat,
                intent.esp_size,
                Some(intent.esp_mountpoint.clone()),
            ));
        }
        if let Some(swap) = intent.swap {
            layout.push((PartitionRole::Swap, Filesystem::Swap, swap, None));
        }
        layout.push((
            PartitionRole::Root,
            intent.root_filesystem,
            intent.root_size,
            Some("/".to_string()),
        ));
        if let Some(data) = &intent.data {
            layout.push((
                PartitionRole::Data,
                data.filesystem,
                data.size,
                Some(data.mountpoint.clone()),
            ));
        }

        let mut cursor = FIRST_PARTITION_MIB;
        let mut partitions = Vec::with_capacity(layout.len());
        for (role, filesystem, size, mountpoint) in layout {
            let start_mib = cursor;
            let end = match size.resolve(disk_size_mib) {
                Some(mib) => {
                    let end = start_mib
                        .checked_add(mib)
                        .ok_or_else(|| PlanError::InvalidSize {
                            message: format!("{role} partition of {size} does not fit any disk"),
                        })?;
                    PartitionEnd::Mib(end)
                }
                None => PartitionEnd::DiskEnd,
            };
            cursor = match end {
                PartitionEnd::Mib(end) => end,
                PartitionEnd::DiskEnd => disk_size_mib,
            };
            partitions.push(PartitionSpec {
                role,
                filesystem,
                size,
                start_mib,
                end,
                mountpoint,
            });
        }

        Ok(Self {
            device: intent.device.clone(),
            firmware: intent.firmware,
            table: intent.firmware.default_table(),
            disk_size_mib,
            min_root_mib: intent.min_root_mib,
            partitions,
        })
    }

    /// Device node of partition `number` (1-based)
    ///
    /// Devices whose name ends in a digit (`nvme0n1`, `mmcblk0`, `loop0`)
    /// get a `p` separator.
    pub fn partition_device(&self, number: usize) -> String {
        partition_device(&self.device, number)
    }

    /// 1-based partition number of the first partition with `role`
    pub fn number_of(&self, role: PartitionRole) -> Option<usize> {
        self.partitions
            .iter()
            .position(|p| p.role == role)
            .map(|i| i + 1)
    }

    /// First partition with `role` and its device node
    pub fn find(&self, role: PartitionRole) -> Option<(String, &PartitionSpec)> {
        self.number_of(role)
            .map(|n| (self.partition_device(n), &self.partitions[n - 1]))
    }

    /// Partitions with their device nodes, in plan order
    pub fn devices(&self) -> impl Iterator<Item = (String, &PartitionSpec)> {
        self.partitions
            .iter()
            .enumerate()
            .map(|(i, p)| (self.partition_device(i + 1), p))
    }

    /// Partitioning operations in the order they must run
    pub fn operations(&self) -> Vec<PartedOp> {
        let mut ops = vec![PartedOp::MkLabel(self.table)];

        for (i, part) in self.partitions.iter().enumerate() {
            ops.push(PartedOp::MkPart {
                number: i + 1,
                name: match self.table {
                    TableLabel::Gpt => part.role.as_str().to_string(),
                    TableLabel::Msdos => "primary".to_string(),
                },
                fs_type: part.filesystem.parted_type().to_string(),
                start: format!("{}MiB", part.start_mib),
                end: part.parted_end(),
            });
        }

        for (i, part) in self.partitions.iter().enumerate() {
            let flag = match (self.table, part.role) {
                (TableLabel::Gpt, PartitionRole::Esp) => Some("esp"),
                (TableLabel::Msdos, PartitionRole::Root) => Some("boot"),
                _ => None,
            };
            if let Some(flag) = flag {
                ops.push(PartedOp::SetFlag {
                    number: i + 1,
                    flag: flag.to_string(),
                });
            }
        }

        ops
    }

    /// Expected on-disk shape of partition `number`, for probing
    pub fn expected_partition(&self, number: usize) -> Option<ExpectedPartition> {
        let part = self.partitions.get(number.checked_sub(1)?)?;
        Some(ExpectedPartition {
            number,
            start_mib: part.start_mib,
            end_mib: match part.end {
                PartitionEnd::Mib(end) => Some(end),
                PartitionEnd::DiskEnd => None,
            },
        })
    }

    /// Expected shape of every partition, in order
    pub fn expected_layout(&self) -> Vec<ExpectedPartition> {
        (1..=self.partitions.len())
            .filter_map(|n| self.expected_partition(n))
            .collect()
    }

    /// Canonical text form the digest is computed from
    fn canonical(&self) -> String {
        let mut out = format!(
            "device={};firmware={:?};table={};size={};min_root={}",
            self.device,
            self.firmware,
            self.table.as_str(),
            self.disk_size_mib,
            self.min_root_mib
        );
        for part in &self.partitions {
            out.push_str(&format!(
                ";{}:{}:{}:{}:{}",
                part.role,
                part.filesystem,
                part.start_mib,
                part.parted_end(),
                part.mountpoint.as_deref().unwrap_or("-")
            ));
        }
        out
    }

    /// Content hash identifying this exact plan
    pub fn digest(&self) -> PlanDigest {
        PlanDigest::of(self.canonical().as_bytes())
    }

    /// Summary shown to the operator before any irreversible action
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            device: self.device.clone(),
            firmware: self.firmware,
            table: self.table,
            disk_size_mib: self.disk_size_mib,
            partitions: self
                .devices()
                .map(|(device, p)| PartitionLine {
                    device,
                    role: p.role,
                    filesystem: p.filesystem,
                    start_mib: p.start_mib,
                    end_mib: p.end_mib(self.disk_size_mib),
                    mountpoint: p.mountpoint.clone(),
                })
                .collect(),
            digest: self.digest(),
        }
    }
}

/// Device node for partition `number` of `device`
pub fn partition_device(device: &str, number: usize) -> String {
    if device.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{device}p{number}")
    } else {
        format!("{device}{number}")
    }
}

/// A single `parted` operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartedOp {
    MkLabel(TableLabel),
    MkPart {
        number: usize,
        name: String,
        fs_type: String,
        start: String,
        end: String,
    },
    SetFlag {
        number: usize,
        flag: String,
    },
}

impl PartedOp {
    /// Script-mode `parted` invocation for this operation on `device`
    pub fn command(&self, device: &str) -> CommandSpec {
        match self {
            Self::MkLabel(label) => {
                CommandSpec::new("parted").args(["-s", device, "mklabel", label.as_str()])
            }
            Self::MkPart {
                name,
                fs_type,
                start,
                end,
                ..
            } => CommandSpec::new("parted").args([
                "-s",
                "-a",
                "optimal",
                device,
                "mkpart",
                name,
                fs_type,
                start,
                end,
            ]),
            Self::SetFlag { number, flag } => CommandSpec::new("parted").args([
                "-s",
                device,
                "set",
                &number.to_string(),
                flag,
                "on",
            ]),
        }
    }

    /// Short human description
    pub fn describe(&self) -> String {
        match self {
            Self::MkLabel(label) => format!("create {} partition table", label.as_str()),
            Self::MkPart {
                number,
                name,
                start,
                end,
                ..
            } => format!("create partition {number} ({name}) {start}-{end}"),
            Self::SetFlag { number, flag } => format!("set {flag} flag on partition {number}"),
        }
    }
}

/// Check the layout invariants of `plan`
///
/// Accepts iff partitions are contiguous from 1 MiB, non-overlapping, fit on
/// the disk, each filesystem suits its role, there is exactly one root of at
/// least the minimum size and, under UEFI, exactly one ESP.
pub fn validate(plan: &DiskPlan) -> Result<(), PlanError> {
    if plan.partitions.is_empty() {
        return Err(PlanError::Empty {
            device: plan.device.clone(),
        });
    }

    let last = plan.partitions.len() - 1;
    let mut previous_end = FIRST_PARTITION_MIB;

    for (i, part) in plan.partitions.iter().enumerate() {
        let index = i + 1;
        let role = part.role.to_string();

        if part.end == PartitionEnd::DiskEnd && i != last {
            return Err(PlanError::RemainderNotLast { index, role });
        }

        if part.start_mib < previous_end {
            return Err(PlanError::Overlap {
                index,
                role,
                start_mib: part.start_mib,
                previous_end_mib: previous_end,
            });
        }
        if part.start_mib > previous_end {
            return Err(PlanError::Gap {
                index,
                role,
                start_mib: part.start_mib,
                previous_end_mib: previous_end,
            });
        }

        let end = part.end_mib(plan.disk_size_mib);
        if end > plan.disk_size_mib || part.start_mib >= plan.disk_size_mib {
            return Err(PlanError::InsufficientSpace {
                device: plan.device.clone(),
                required_mib: end.max(part.start_mib.saturating_add(1)),
                available_mib: plan.disk_size_mib,
            });
        }
        if end <= part.start_mib {
            return Err(PlanError::InvalidSize {
                message: format!("partition {index} ({role}) has no space"),
            });
        }

        if !part.filesystem.fits(part.role) {
            return Err(PlanError::FilesystemMismatch {
                role,
                filesystem: part.filesystem.to_string(),
            });
        }

        previous_end = end;
    }

    let esp_count = plan
        .partitions
        .iter()
        .filter(|p| p.role == PartitionRole::Esp)
        .count();
    if plan.firmware == Firmware::Uefi && esp_count == 0 {
        return Err(PlanError::MissingEsp);
    }
    if esp_count > 1 {
        return Err(PlanError::MultipleEsp { count: esp_count });
    }

    let roots: Vec<&PartitionSpec> = plan
        .partitions
        .iter()
        .filter(|p| p.role == PartitionRole::Root)
        .collect();
    match roots.as_slice() {
        [] => return Err(PlanError::MissingRoot),
        [root] => {
            let size_mib = root.size_mib(plan.disk_size_mib);
            if size_mib < plan.min_root_mib {
                return Err(PlanError::RootTooSmall {
                    size_mib,
                    min_mib: plan.min_root_mib,
                });
            }
        }
        many => return Err(PlanError::MultipleRoot { count: many.len() }),
    }

    Ok(())
}

/// Translate `plan` into the ordered `parted` commands that create it
pub fn render(plan: &DiskPlan) -> Vec<CommandSpec> {
    plan.operations()
        .iter()
        .map(|op| op.command(&plan.device))
        .collect()
}

/// One row of a [`PlanSummary`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLine {
    pub device: String,
    pub role: PartitionRole,
    pub filesystem: Filesystem,
    pub start_mib: u64,
    pub end_mib: u64,
    pub mountpoint: Option<String>,
}

/// What the operator is asked to approve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub device: String,
    pub firmware: Firmware,
    pub table: TableLabel,
    pub disk_size_mib: u64,
    pub partitions: Vec<PartitionLine>,
    pub digest: PlanDigest,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({}, {} {} table), plan {}",
            self.device,
            format_mib(self.disk_size_mib),
            self.firmware,
            self.table.as_str(),
            self.digest.short()
        )?;
        for line in &self.partitions {
            writeln!(
                f,
                "  {:<16} {:<5} {:<6} {:>10} - {:<10} {}",
                line.device,
                line.role.as_str(),
                line.filesystem.blkid_type(),
                format!("{}MiB", line.start_mib),
                format!("{}MiB", line.end_mib),
                line.mountpoint.as_deref().unwrap_or("")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EIGHT_GIB: u64 = 8192;

    fn example_intent() -> DiskIntent {
        DiskIntent {
            swap: Some(SizeSpec::Mib(4096)),
            ..DiskIntent::new("/dev/sda", Firmware::Uefi)
        }
    }

    fn example_plan() -> DiskPlan {
        DiskPlan::from_intent(&example_intent(), EIGHT_GIB).unwrap()
    }

    #[test]
    fn test_example_layout_offsets() {
        let plan = example_plan();
        assert_eq!(plan.table, TableLabel::Gpt);

        let offsets: Vec<(PartitionRole, u64, PartitionEnd)> = plan
            .partitions
            .iter()
            .map(|p| (p.role, p.start_mib, p.end))
            .collect();
        assert_eq!(
            offsets,
            vec![
                (PartitionRole::Esp, 1, PartitionEnd::Mib(513)),
                (PartitionRole::Swap, 513, PartitionEnd::Mib(4609)),
                (PartitionRole::Root, 4609, PartitionEnd::DiskEnd),
            ]
        );
        assert_eq!(validate(&plan), Ok(()));
    }

    #[test]
    fn test_render_example_mkpart_order() {
        let commands = render(&example_plan());
        let mkparts: Vec<String> = commands
            .iter()
            .filter(|c| c.args.iter().any(|a| a == "mkpart"))
            .map(ToString::to_string)
            .collect();

        assert_eq!(
            mkparts,
            vec![
                "parted -s -a optimal /dev/sda mkpart esp fat32 1MiB 513MiB",
                "parted -s -a optimal /dev/sda mkpart swap linux-swap 513MiB 4609MiB",
                "parted -s -a optimal /dev/sda mkpart root ext4 4609MiB 100%",
            ]
        );
        assert_eq!(commands[0].to_string(), "parted -s /dev/sda mklabel gpt");
        assert_eq!(
            commands.last().map(ToString::to_string).as_deref(),
            Some("parted -s /dev/sda set 1 esp on")
        );
    }

    #[test]
    fn test_oversized_partition_is_a_plan_error() {
        let intent = DiskIntent {
            swap: Some(SizeSpec::Mib(u64::MAX)),
            ..DiskIntent::new("/dev/sda", Firmware::Uefi)
        };
        assert!(matches!(
            DiskPlan::from_intent(&intent, EIGHT_GIB),
            Err(PlanError::InvalidSize { .. })
        ));

        let intent = DiskIntent {
            swap: Some(SizeSpec::Mib(MAX_SIZE_MIB)),
            ..DiskIntent::new("/dev/sda", Firmware::Uefi)
        };
        let plan = DiskPlan::from_intent(&intent, EIGHT_GIB).unwrap();
        assert!(matches!(
            validate(&plan),
            Err(PlanError::InsufficientSpace { .. })
        ));
    }

    #[test]
    fn test_render_is_pure() {
        let plan = example_plan();
        assert_eq!(render(&plan), render(&plan));
    }

    #[test]
    fn test_bios_layout_uses_msdos_and_boot_flag() {
        let intent = DiskIntent {
            swap: Some(SizeSpec::Mib(1024)),
            ..DiskIntent::new("/dev/vda", Firmware::Bios)
        };
        let plan = DiskPlan::from_intent(&intent, EIGHT_GIB).unwrap();
        assert_eq!(validate(&plan), Ok(()));
        assert_eq!(plan.table, TableLabel::Msdos);
        assert_eq!(plan.number_of(PartitionRole::Esp), None);

        let commands: Vec<String> = render(&plan).iter().map(ToString::to_string).collect();
        assert!(commands.contains(
            &"parted -s -a optimal /dev/vda mkpart primary ext4 1025MiB 100%".to_string()
        ));
        assert!(commands.contains(&"parted -s /dev/vda set 2 boot on".to_string()));
    }

    #[test]
    fn test_uefi_requires_esp() {
        let mut plan = example_plan();
        plan.partitions.remove(0);
        plan.partitions[0].start_mib = 1;
        plan.partitions[0].end = PartitionEnd::Mib(4097);
        plan.partitions[1].start_mib = 4097;
        assert_eq!(validate(&plan), Err(PlanError::MissingEsp));

        plan.firmware = Firmware::Bios;
        assert_eq!(validate(&plan), Ok(()));
    }

    #[test]
    fn test_rejects_second_esp() {
        let mut plan = example_plan();
        plan.partitions[1].role = PartitionRole::Esp;
        plan.partitions[1].filesystem = Filesystem::Vfat;
        assert_eq!(validate(&plan), Err(PlanError::MultipleEsp { count: 2 }));
    }

    #[test]
    fn test_rejects_overlap_and_gap() {
        let mut plan = example_plan();
        plan.partitions[1].start_mib = 500;
        assert!(matches!(
            validate(&plan),
            Err(PlanError::Overlap { index: 2, previous_end_mib: 513, .. })
        ));

        plan.partitions[1].start_mib = 600;
        assert!(matches!(
            validate(&plan),
            Err(PlanError::Gap { index: 2, previous_end_mib: 513, .. })
        ));
    }

    #[test]
    fn test_rejects_layout_larger_than_disk() {
        let intent = DiskIntent {
            swap: Some(SizeSpec::Mib(16384)),
            ..DiskIntent::new("/dev/sda", Firmware::Uefi)
        };
        let plan = DiskPlan::from_intent(&intent, EIGHT_GIB).unwrap();
        assert!(matches!(
            validate(&plan),
            Err(PlanError::InsufficientSpace { available_mib: 8192, .. })
        ));
    }

    #[test]
    fn test_rejects_small_root() {
        let intent = DiskIntent {
            swap: Some(SizeSpec::Mib(6144)),
            ..DiskIntent::new("/dev/sda", Firmware::Uefi)
        };
        let plan = DiskPlan::from_intent(&intent, EIGHT_GIB).unwrap();
        assert_eq!(
            validate(&plan),
            Err(PlanError::RootTooSmall {
                size_mib: 8192 - 6657,
                min_mib: DEFAULT_MIN_ROOT_MIB,
            })
        );
    }

    #[test]
    fn test_rejects_remainder_before_last() {
        let intent = DiskIntent {
            data: Some(DataIntent {
                size: SizeSpec::Mib(1024),
                filesystem: Filesystem::Ext4,
                mountpoint: "/home".into(),
            }),
            ..DiskIntent::new("/dev/sda", Firmware::Uefi)
        };
        let plan = DiskPlan::from_intent(&intent, EIGHT_GIB).unwrap();
        assert!(matches!(
            validate(&plan),
            Err(PlanError::RemainderNotLast { index: 2, .. })
        ));
    }

    #[test]
    fn test_percent_sizes_and_data_partition() {
        let intent = DiskIntent {
            root_size: SizeSpec::Percent(50),
            data: Some(DataIntent {
                size: SizeSpec::Remainder,
                filesystem: Filesystem::Xfs,
                mountpoint: "/home".into(),
            }),
            ..DiskIntent::new("/dev/nvme0n1", Firmware::Uefi)
        };
        let plan = DiskPlan::from_intent(&intent, EIGHT_GIB).unwrap();
        assert_eq!(validate(&plan), Ok(()));
        assert_eq!(plan.partitions[1].end, PartitionEnd::Mib(513 + 4096));
        assert_eq!(
            plan.find(PartitionRole::Data).map(|(dev, _)| dev),
            Some("/dev/nvme0n1p3".to_string())
        );
    }

    #[test]
    fn test_rejects_wrong_filesystem_for_role() {
        let mut plan = example_plan();
        plan.partitions[2].filesystem = Filesystem::Vfat;
        assert!(matches!(
            validate(&plan),
            Err(PlanError::FilesystemMismatch { .. })
        ));
    }

    #[test]
    fn test_partition_device_names() {
        assert_eq!(partition_device("/dev/sda", 1), "/dev/sda1");
        assert_eq!(partition_device("/dev/nvme0n1", 2), "/dev/nvme0n1p2");
        assert_eq!(partition_device("/dev/mmcblk0", 3), "/dev/mmcblk0p3");
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = example_plan();
        let mut b = example_plan();
        assert_eq!(a.digest(), b.digest());

        b.device = "/dev/sdb".into();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_summary_lists_partitions() {
        let summary = example_plan().summary();
        assert_eq!(summary.partitions.len(), 3);
        assert_eq!(summary.partitions[2].end_mib, EIGHT_GIB);
        let text = summary.to_string();
        assert!(text.contains("/dev/sda3"));
        assert!(text.contains("8GiB"));
    }
}
