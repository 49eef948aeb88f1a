//! Reading the on-disk partition table back
//!
//! Post-conditions for partitioning steps compare the plan against
//! `parted -s -m <device> unit MiB print`, whose machine-readable output
//! looks like:
//!
//! ```text
//! BYT;
//! /dev/sda:8192MiB:scsi:512:512:gpt:ATA VBOX HARDDISK:;
//! 1:1.00MiB:513MiB:512MiB:fat32:esp:boot, esp;
//! 2:513MiB:4609MiB:4096MiB:linux-swap(v1):swap:swap;
//! ```

use crate::types::CommandSpec;

/// Offsets are compared with this tolerance; parted rounds to 0.01 MiB
/// and reports inclusive end sectors.
const TOLERANCE_MIB: f64 = 1.0;

/// Command printing the partition table of `device` in machine format
pub fn print_command(device: &str) -> CommandSpec {
    CommandSpec::new("parted").args(["-s", "-m", device, "unit", "MiB", "print"])
}

/// A partition as reported by parted
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedPartition {
    pub number: usize,
    pub start_mib: f64,
    pub end_mib: f64,
    pub fs_type: String,
    pub name: String,
    pub flags: Vec<String>,
}

/// Partition table as reported by parted
#[derive(Debug, Clone, PartialEq)]
pub struct PartedTable {
    /// `gpt`, `msdos`, `loop` or `unknown`
    pub label: String,
    pub partitions: Vec<ProbedPartition>,
}

/// What a planned partition should look like on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExpectedPartition {
    pub number: usize,
    pub start_mib: u64,
    /// `None` when the partition runs to the end of the disk
    pub end_mib: Option<u64>,
}

impl ExpectedPartition {
    pub fn matches(&self, probed: &ProbedPartition) -> bool {
        probed.number == self.number
            && close(probed.start_mib, self.start_mib)
            && self.end_mib.is_none_or(|end| close(probed.end_mib, end))
    }
}

fn close(actual: f64, expected: u64) -> bool {
    (actual - expected as f64).abs() < TOLERANCE_MIB
}

impl PartedTable {
    /// Parse `parted -m` output; `None` if there is no disk line
    pub fn parse(output: &str) -> Option<Self> {
        let mut label = None;
        let mut partitions = Vec::new();

        for line in output.lines() {
            let line = line.trim().trim_end_matches(';');
            if line.is_empty() || line == "BYT" || line == "CHS" || line == "CYL" {
                continue;
            }

            let fields: Vec<&str> = line.split(':').collect();
            if line.starts_with('/') {
                label = fields.get(5).map(|s| (*s).to_string());
                continue;
            }

            let Ok(number) = fields[0].parse::<usize>() else {
                continue;
            };
            if fields.len() < 4 {
                continue;
            }
            let (Some(start_mib), Some(end_mib)) = (parse_mib(fields[1]), parse_mib(fields[2]))
            else {
                continue;
            };

            partitions.push(ProbedPartition {
                number,
                start_mib,
                end_mib,
                fs_type: fields.get(4).copied().unwrap_or_default().to_string(),
                name: fields.get(5).copied().unwrap_or_default().to_string(),
                flags: fields
                    .get(6)
                    .map(|f| {
                        f.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
            });
        }

        label.map(|label| Self { label, partitions })
    }

    pub fn partition(&self, number: usize) -> Option<&ProbedPartition> {
        self.partitions.iter().find(|p| p.number == number)
    }

    /// Check the table has `label` and its partitions are a prefix of `expected`
    ///
    /// An empty table of the right type matches, as does a table where the
    /// first few planned partitions already exist. Anything else (wrong
    /// type, foreign partitions, extra partitions) is reported as a mismatch.
    pub fn matches_prefix(
        &self,
        label: &str,
        expected: &[ExpectedPartition],
    ) -> Result<(), String> {
        if self.label != label {
            return Err(format!(
                "partition table is '{}', expected '{label}'",
                self.label
            ));
        }
        if self.partitions.len() > expected.len() {
            return Err(format!(
                "{} partitions present, plan has {}",
                self.partitions.len(),
                expected.len()
            ));
        }
        for (probed, want) in self.partitions.iter().zip(expected) {
            if !want.matches(probed) {
                return Err(format!(
                    "partition {} spans {:.0}-{:.0}MiB, plan expects {}-{}",
                    probed.number,
                    probed.start_mib,
                    probed.end_mib,
                    want.start_mib,
                    want.end_mib
                        .map_or_else(|| "end".to_string(), |e| e.to_string())
                ));
            }
        }
        Ok(())
    }
}

fn parse_mib(field: &str) -> Option<f64> {
    field.trim().strip_suffix("MiB")?.parse().ok()
}
