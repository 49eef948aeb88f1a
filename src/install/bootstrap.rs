use provision::{CommandSpec, Stage, Step};

use super::{BOOTSTRAP, MOUNT, Target};
use crate::config::BootstrapConfig;

/// Base system via `pacstrap`
///
/// Unbounded: downloads can take a long time on slow mirrors, so this step
/// relies on the runner's heartbeat instead of a timeout.
pub(super) fn stage(config: &BootstrapConfig, target: &Target) -> Stage {
    let pacstrap = CommandSpec::new("pacstrap")
        .args(config.pacstrap_args.iter().cloned())
        .arg(target.root_str())
        .args(config.packages.iter().cloned());

    Stage::new(BOOTSTRAP).after(MOUNT).step(Step::new(
        "install base system",
        pacstrap,
        target.installed(&config.packages),
    ))
}
