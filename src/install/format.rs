use provision::{CommandSpec, DiskPlan, PostCondition, Stage, Step};
use std::time::Duration;

use super::{FORMAT, PARTITION};

/// `blkid` probe printing the filesystem signature of `device`
fn signature(device: &str) -> CommandSpec {
    CommandSpec::new("blkid").args(["-s", "TYPE", "-o", "value", device])
}

/// One `mkfs`/`mkswap` per partition, verified by its signature
pub(super) fn stage(plan: &DiskPlan, timeout: Duration) -> Stage {
    let steps = plan.devices().map(|(device, part)| {
        let fs = part.filesystem;
        Step::new(
            format!("create {fs} on {device} ({})", part.role),
            fs.mkfs_command(&device),
            PostCondition::output_equals(signature(&device), fs.blkid_type()),
        )
        .irreversible()
        .timeout(timeout)
    });

    Stage::new(FORMAT).after(PARTITION).steps(steps)
}
