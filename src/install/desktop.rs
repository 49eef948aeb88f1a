use provision::{Stage, Step};

use super::{CONFIGURE, DESKTOP, Target};
use crate::config::DesktopConfig;
use crate::detect::Capabilities;

/// Desktop packages plus the microcode and drivers the hardware needs
pub(super) fn packages(config: &DesktopConfig, caps: &Capabilities) -> Vec<String> {
    let mut packages = config.packages.clone();

    match config.microcode.get(caps.cpu.key()) {
        Some(ucode) => packages.push(ucode.clone()),
        None => log::debug!("No microcode package for CPU vendor {}", caps.cpu),
    }
    for gpu in &caps.gpus {
        match config.gpu_drivers.get(gpu.key()) {
            Some(drivers) => packages.extend(drivers.iter().cloned()),
            None => log::debug!("No driver packages for GPU vendor {gpu}"),
        }
    }

    let mut seen = std::collections::HashSet::new();
    packages.retain(|p| seen.insert(p.clone()));
    packages
}

pub(super) fn stage(config: &DesktopConfig, caps: &Capabilities, target: &Target) -> Stage {
    let packages = packages(config, caps);
    let mut steps = vec![Step::new(
        "install desktop packages",
        target.pacman_install(&packages),
        target.installed(&packages),
    )];

    let units = std::iter::once(&config.display_manager).chain(&config.services);
    for unit in units {
        steps.push(Step::new(
            format!("enable {unit}"),
            target.chroot(["systemctl", "enable", unit.as_str()]),
            target.unit_enabled(unit),
        ));
    }

    Stage::new(DESKTOP).after(CONFIGURE).steps(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{CpuVendor, GpuVendor};
    use crate::install::tests::capabilities;
    use provision::{CommandOutput, CommandRunner, CommandSpec, RunLimits};
    use std::time::Duration;

    const GROUPS: [&str; 2] = ["xfce4", "xfce4-goodies"];

    /// A target where every package is installed except `missing`; group
    /// names are unknown to `pacman -Q` and known to `pacman -Qg`
    struct PacmanDb {
        missing: Option<&'static str>,
    }

    impl CommandRunner for PacmanDb {
        fn run(&self, spec: &CommandSpec, _limits: &RunLimits) -> anyhow::Result<CommandOutput> {
            let flag = spec.args[2].as_str();
            let name = spec.args[3].as_str();
            let is_group = GROUPS.contains(&name);
            let known = match flag {
                "-Q" => !is_group && self.missing != Some(name),
                "-Qg" => is_group,
                _ => false,
            };
            Ok(if known {
                CommandOutput::ok(format!("{name} 1.0\n"))
            } else {
                CommandOutput::failed(1, format!("error: package '{name}' was not found"))
            })
        }
    }

    #[test]
    fn test_installed_check_accepts_package_groups() {
        let config = DesktopConfig::default();
        let stage = stage(&config, &capabilities(), &Target::new("/mnt"));
        let check = &stage.steps[0].check;
        let heartbeat = Duration::from_secs(1);

        let outcome = check
            .evaluate(&PacmanDb { missing: None }, heartbeat)
            .unwrap();
        assert!(outcome.is_satisfied(), "{outcome:?}");

        let outcome = check
            .evaluate(&PacmanDb { missing: Some("lightdm") }, heartbeat)
            .unwrap();
        assert!(!outcome.is_satisfied());
    }

    #[test]
    fn test_packages_follow_capabilities() {
        let config = DesktopConfig::default();
        let packages = packages(&config, &capabilities());

        assert!(packages.contains(&"intel-ucode".to_string()));
        assert!(packages.contains(&"vulkan-intel".to_string()));
        assert!(packages.contains(&"nvidia".to_string()));
        assert_eq!(packages.iter().filter(|p| *p == "mesa").count(), 1);
        assert!(!packages.contains(&"amd-ucode".to_string()));
    }

    #[test]
    fn test_unknown_hardware() {
        let config = DesktopConfig::default();
        let caps = Capabilities {
            cpu: CpuVendor::Unknown,
            gpus: vec![GpuVendor::Unknown],
        };
        let packages = packages(&config, &caps);
        assert!(!packages.iter().any(|p| p.ends_with("-ucode")));
        assert!(packages.contains(&"mesa".to_string()));
    }

    #[test]
    fn test_enables_display_manager_and_services() {
        let config = DesktopConfig::default();
        let stage = stage(&config, &capabilities(), &Target::new("/mnt"));

        let commands: Vec<String> = stage.steps[1..]
            .iter()
            .map(|s| s.command.to_string())
            .collect();
        assert_eq!(
            commands,
            vec![
                "arch-chroot /mnt systemctl enable lightdm",
                "arch-chroot /mnt systemctl enable NetworkManager",
            ]
        );
    }
}
