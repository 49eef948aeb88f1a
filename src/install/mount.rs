use provision::{CommandSpec, DiskPlan, Filesystem, PostCondition, Stage, Step};
use std::time::Duration;

use super::{FORMAT, MOUNT, Target};

/// Active swap devices, one per line
pub(super) fn active_swap() -> CommandSpec {
    CommandSpec::new("swapon").args(["--show=NAME", "--noheadings"])
}

/// Source device mounted at `path`, without a btrfs subvolume suffix;
/// exits 1 when nothing is mounted there
pub(super) fn mount_source(path: &str) -> CommandSpec {
    CommandSpec::new("findmnt").args(["-n", "-v", "-o", "SOURCE", "--mountpoint", path])
}

/// Mount every filesystem under the target root and enable swap
///
/// Parents are mounted before children (`/` before `/boot`), and each
/// mount is verified with `findmnt`. Mounts are gone after a reboot of the
/// live system, so the stage is re-checked even when recorded Completed.
pub(super) fn stage(plan: &DiskPlan, target: &Target, timeout: Duration) -> Stage {
    let mut mounts: Vec<(String, String)> = plan
        .devices()
        .filter_map(|(device, part)| part.mountpoint.clone().map(|mp| (device, mp)))
        .collect();
    mounts.sort_by_key(|(_, mp)| mp.trim_end_matches('/').matches('/').count());

    let mut steps: Vec<Step> = mounts
        .into_iter()
        .map(|(device, mountpoint)| {
            let path = target.path_str(&mountpoint);
            Step::new(
                format!("mount {device} on {path}"),
                CommandSpec::new("mount").args(["--mkdir", &device, &path]),
                PostCondition::output_equals(mount_source(&path), device),
            )
            .timeout(timeout)
        })
        .collect();

    steps.extend(
        plan.devices()
            .filter(|(_, part)| part.filesystem == Filesystem::Swap)
            .map(|(device, _)| {
                Step::new(
                    format!("enable swap on {device}"),
                    CommandSpec::new("swapon").arg(device.clone()),
                    PostCondition::output_has_line(active_swap(), device),
                )
                .timeout(timeout)
            }),
    );

    Stage::new(MOUNT).after(FORMAT).steps(steps).volatile()
}
