use provision::{CommandSpec, DiskPlan, Firmware, PartitionRole, PostCondition, Stage, Step};

use super::{BOOTLOADER, CONFIGURE, Target};
use crate::config::InstallConfig;

const GRUB_DEFAULTS: &str = "/etc/default/grub";
const GRUB_CFG: &str = "/boot/grub/grub.cfg";

/// GRUB for the plan's firmware, plus its generated config
pub(super) fn stage(config: &InstallConfig, plan: &DiskPlan, target: &Target) -> Stage {
    let boot = &config.bootloader;
    let mut steps = vec![Step::new(
        "install bootloader packages",
        target.pacman_install(&boot.packages),
        target.installed(&boot.packages),
    )];

    let mut cfg_check = vec![PostCondition::file_contains(target.path(GRUB_CFG), "menuentry")];
    if let Some(cmdline) = &boot.cmdline {
        let line = format!("GRUB_CMDLINE_LINUX_DEFAULT=\"{cmdline}\"");
        steps.push(Step::new(
            "set kernel command line",
            CommandSpec::new("sed").args([
                "-i".to_string(),
                format!("s|^GRUB_CMDLINE_LINUX_DEFAULT=.*|{}|", line.replace('|', r"\|")),
                target.path_str(GRUB_DEFAULTS),
            ]),
            PostCondition::file_contains(target.path(GRUB_DEFAULTS), line),
        ));
        cfg_check.push(PostCondition::file_contains(target.path(GRUB_CFG), cmdline.clone()));
    }

    steps.push(match plan.firmware {
        Firmware::Uefi => {
            let esp = plan
                .find(PartitionRole::Esp)
                .and_then(|(_, p)| p.mountpoint.clone())
                .unwrap_or_else(|| config.disk.esp_mountpoint.clone());
            let efi_dir = format!("--efi-directory={esp}");
            let id = format!("--bootloader-id={}", boot.id);
            Step::new(
                "install GRUB (UEFI)",
                target.chroot([
                    "grub-install",
                    "--target=x86_64-efi",
                    efi_dir.as_str(),
                    id.as_str(),
                ]),
                PostCondition::path_exists(
                    target.path(&format!("{esp}/EFI/{}/grubx64.efi", boot.id)),
                ),
            )
        }
        Firmware::Bios => Step::new(
            "install GRUB (BIOS)",
            target.chroot(["grub-install", "--target=i386-pc", plan.device.as_str()]),
            PostCondition::path_exists(target.path("/boot/grub/i386-pc/core.img")),
        ),
    });

    steps.push(Step::new(
        "generate GRUB config",
        target.chroot(["grub-mkconfig", "-o", GRUB_CFG]),
        PostCondition::all(cfg_check),
    ));

    Stage::new(BOOTLOADER).after(CONFIGURE).steps(steps)
}
