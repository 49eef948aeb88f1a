//! Install stages
//!
//! Each submodule turns the install config and the disk plan into one
//! [`Stage`] of idempotent steps. Nothing here runs a command; the stages
//! are handed to the engine's executor.
//!
//! Stage order:
//!
//! ```text
//! partition -> format -> mount -> bootstrap -> configure -> [desktop] -> bootloader -> finalize
//! ```

mod bootloader;
mod bootstrap;
mod configure;
mod desktop;
mod finalize;
mod format;
mod mount;
mod partition;

use provision::{CommandSpec, DiskPlan, GraphError, PostCondition, Stage, StageGraph};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::InstallConfig;
use crate::detect::Capabilities;

pub const PARTITION: &str = "partition";
pub const FORMAT: &str = "format";
pub const MOUNT: &str = "mount";
pub const BOOTSTRAP: &str = "bootstrap";
pub const CONFIGURE: &str = "configure";
pub const DESKTOP: &str = "desktop";
pub const BOOTLOADER: &str = "bootloader";
pub const FINALIZE: &str = "finalize";

/// Everything the stage builders read
pub struct Installation<'a> {
    pub config: &'a InstallConfig,
    pub plan: &'a DiskPlan,
    pub capabilities: &'a Capabilities,
}

impl Installation<'_> {
    fn target(&self) -> Target {
        Target::new(self.config.target_root())
    }

    /// Timeout for steps that must not hang (filesystem creation, mounts)
    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.engine.command_timeout_secs)
    }

    /// Build every stage, with dependencies declared
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![
            partition::stage(self.plan),
            format::stage(self.plan, self.command_timeout()),
            mount::stage(self.plan, &self.target(), self.command_timeout()),
            bootstrap::stage(&self.config.bootstrap, &self.target()),
            configure::stage(self.config, &self.target()),
        ];

        let mut bootloader = bootloader::stage(self.config, self.plan, &self.target());
        if self.config.desktop.enabled {
            stages.push(desktop::stage(
                &self.config.desktop,
                self.capabilities,
                &self.target(),
            ));
            bootloader = bootloader.after(DESKTOP);
        }
        stages.push(bootloader);
        stages.push(finalize::stage(self.plan, &self.target()));
        stages
    }

    /// Ordered graph of all stages
    pub fn graph(&self) -> Result<StageGraph, GraphError> {
        StageGraph::new(self.stages())
    }
}

/// Root of the system being installed, e.g. `/mnt`
pub(crate) struct Target {
    root: PathBuf,
}

impl Target {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn root_str(&self) -> String {
        self.root.display().to_string()
    }

    /// Host path of `path` inside the target
    pub(crate) fn path(&self, path: &str) -> PathBuf {
        match path.trim_start_matches('/') {
            "" => self.root.clone(),
            relative => self.root.join(relative),
        }
    }

    pub(crate) fn path_str(&self, path: &str) -> String {
        self.path(path).display().to_string()
    }

    /// Run a program inside the target with `arch-chroot`
    pub(crate) fn chroot<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("arch-chroot").arg(self.root_str()).args(args)
    }

    /// Install packages inside the target, skipping those already present
    pub(crate) fn pacman_install(&self, packages: &[String]) -> CommandSpec {
        self.chroot(["pacman", "-S", "--noconfirm", "--needed"])
            .args(packages.iter().cloned())
    }

    /// Holds when every name is installed in the target
    ///
    /// A name may be a package group (`xfce4`), which `pacman -Q` rejects;
    /// those are accepted when `pacman -Qg` knows the group.
    pub(crate) fn installed(&self, packages: &[String]) -> PostCondition {
        let query = |flag: &str, name: &str| {
            PostCondition::succeeds(CommandSpec::new("pacman").args([
                "--root",
                &self.root_str(),
                flag,
                name,
            ]))
        };
        PostCondition::all(
            packages
                .iter()
                .map(|name| PostCondition::any(vec![query("-Q", name), query("-Qg", name)]))
                .collect(),
        )
    }

    /// Overwrite a target file with `content`
    pub(crate) fn write_file(&self, path: &str, content: impl Into<String>) -> CommandSpec {
        CommandSpec::new("tee").arg(self.path_str(path)).stdin(content)
    }

    /// Append `content` to a target file
    pub(crate) fn append_file(&self, path: &str, content: impl Into<String>) -> CommandSpec {
        CommandSpec::new("tee")
            .args(["-a".to_string(), self.path_str(path)])
            .stdin(content)
    }

    /// Holds when the systemd unit is enabled in the target
    pub(crate) fn unit_enabled(&self, unit: &str) -> PostCondition {
        PostCondition::output_equals(self.chroot(["systemctl", "is-enabled", unit]), "enabled")
    }
}

// ============================================================================
// Tests
// ============================================================================
