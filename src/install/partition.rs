use provision::disk::PartedOp;
use provision::{CommandSpec, DiskPlan, PostCondition, Stage, Step, render};

use super::PARTITION;

/// Partition table and partitions, exactly as planned
///
/// Every step is irreversible. Each one is skipped when `parted` already
/// reports the planned shape, so a half-partitioned disk resumes where it
/// stopped instead of being wiped again.
pub(super) fn stage(plan: &DiskPlan) -> Stage {
    let device = plan.device.clone();
    let layout = plan.expected_layout();

    let steps = plan
        .operations()
        .into_iter()
        .zip(render(plan))
        .map(|(op, command)| {
            let check = match &op {
                PartedOp::MkLabel(label) => PostCondition::PartitionTable {
                    device: device.clone(),
                    label: *label,
                    layout: layout.clone(),
                },
                PartedOp::MkPart { number, .. } => match plan.expected_partition(*number) {
                    Some(expected) => PostCondition::Partition {
                        device: device.clone(),
                        expected,
                    },
                    None => PostCondition::path_exists(plan.partition_device(*number)),
                },
                PartedOp::SetFlag { number, flag } => PostCondition::PartitionFlag {
                    device: device.clone(),
                    number: *number,
                    flag: flag.clone(),
                },
            };
            Step::new(op.describe(), command, check).irreversible()
        });

    let settle = Step::new(
        "wait for partition devices",
        CommandSpec::new("udevadm").arg("settle"),
        PostCondition::all(
            plan.devices()
                .map(|(node, _)| PostCondition::path_exists(node))
                .collect(),
        ),
    );

    Stage::new(PARTITION).steps(steps.collect::<Vec<_>>()).step(settle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::tests::{config, plan};

    #[test]
    fn test_steps_follow_rendered_commands() {
        let config = config();
        let plan = plan(&config);
        let stage = stage(&plan);

        let commands: Vec<String> = stage.steps.iter().map(|s| s.command.to_string()).collect();
        assert_eq!(
            commands,
            vec![
                "parted -s /dev/sda mklabel gpt",
                "parted -s -a optimal /dev/sda mkpart esp fat32 1MiB 513MiB",
                "parted -s -a optimal /dev/sda mkpart swap linux-swap 513MiB 4609MiB",
                "parted -s -a optimal /dev/sda mkpart root ext4 4609MiB 100%",
                "parted -s /dev/sda set 1 esp on",
                "udevadm settle",
            ]
        );
        assert!(stage.is_irreversible());
        assert!(!stage.steps.last().unwrap().irreversible);
    }

    #[test]
    fn test_partition_checks_probe_offsets() {
        let config = config();
        let plan = plan(&config);
        let stage = stage(&plan);

        match &stage.steps[3].check {
            PostCondition::Partition { device, expected } => {
                assert_eq!(device, "/dev/sda");
                assert_eq!(expected.number, 3);
                assert_eq!(expected.start_mib, 4609);
                assert_eq!(expected.end_mib, None);
            }
            other => panic!("unexpected check {other:?}"),
        }
    }
}
