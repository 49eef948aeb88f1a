use provision::{CommandSpec, DiskPlan, Filesystem, PostCondition, Stage, Step};

use super::mount::{active_swap, mount_source};
use super::{BOOTLOADER, FINALIZE, Target};

/// Release the disk: swap off, then unmount the whole target tree
pub(super) fn stage(plan: &DiskPlan, target: &Target) -> Stage {
    let mut steps: Vec<Step> = plan
        .devices()
        .filter(|(_, part)| part.filesystem == Filesystem::Swap)
        .map(|(device, _)| {
            Step::new(
                format!("disable swap on {device}"),
                CommandSpec::new("swapoff").arg(device.clone()),
                PostCondition::output_has_line(active_swap(), device).negate(),
            )
        })
        .collect();

    let root = target.root_str();
    steps.push(Step::new(
        format!("unmount {}", target.root().display()),
        CommandSpec::new("umount").args(["-R".to_string(), root.clone()]),
        PostCondition::succeeds(mount_source(&root)).negate(),
    ));

    Stage::new(FINALIZE).after(BOOTLOADER).steps(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::tests::{config, plan};

    #[test]
    fn test_finalize_steps() {
        let config = config();
        let plan = plan(&config);
        let stage = stage(&plan, &Target::new("/mnt"));

        let commands: Vec<String> = stage.steps.iter().map(|s| s.command.to_string()).collect();
        assert_eq!(commands, vec!["swapoff /dev/sda2", "umount -R /mnt"]);
        assert!(matches!(stage.steps[1].check, PostCondition::Not { .. }));
    }
}
