use anyhow::Result;
use colored::Colorize;
use provision::Firmware;
use std::path::Path;

use crate::Context;
use crate::config::{FirmwareChoice, InstallConfig};
use crate::detect;
use crate::privilege;
use crate::ui;

struct Issue {
    category: &'static str,
    summary: String,
    detail: Option<String>,
    fix: Option<String>,
}

/// Programs the install stages call, with the package providing them
const REQUIRED_COMMANDS: &[(&str, &str, &str)] = &[
    ("parted", "Partitioning", "parted"),
    ("udevadm", "Device settling", "systemd"),
    ("blkid", "Filesystem probing", "util-linux"),
    ("blockdev", "Disk size", "util-linux"),
    ("mkfs.ext4", "ext4 filesystems", "e2fsprogs"),
    ("mkfs.fat", "EFI system partition", "dosfstools"),
    ("mkswap", "Swap", "util-linux"),
    ("findmnt", "Mount checks", "util-linux"),
    ("pacstrap", "Base system install", "arch-install-scripts"),
    ("genfstab", "fstab generation", "arch-install-scripts"),
    ("arch-chroot", "Configuring the target", "arch-install-scripts"),
    ("pacman", "Package checks", "pacman"),
    ("lspci", "GPU detection", "pciutils"),
];

pub fn run(ctx: &Context) -> Result<()> {
    ui::header("Install Preflight");

    let mut issues: Vec<Issue> = Vec::new();

    check_privileges(&mut issues);
    check_commands(&mut issues);

    let config = match super::load_config(ctx) {
        Ok(config) => {
            ui::section("Install Config");
            println!("  {} config loaded", "✓".green());
            Some(config)
        }
        Err(e) => {
            ui::section("Install Config");
            println!("  {} config {}", "✗".red(), "(unusable)".red());
            issues.push(Issue {
                category: "Config",
                summary: "Install config could not be loaded".to_string(),
                detail: Some(format!("{e:#}")),
                fix: Some("Create install.toml or pass --config".to_string()),
            });
            None
        }
    };

    if let Some(config) = &config {
        check_firmware(config, &mut issues);
        check_device(config, &mut issues);
        check_filesystem_tools(config, &mut issues);
    }

    println!();
    if issues.is_empty() {
        ui::success("Ready to install");
    } else {
        print_issue_summary(&issues);
    }
    Ok(())
}

fn print_issue_summary(issues: &[Issue]) {
    let count = issues.len();
    let label = if count == 1 { "Issue" } else { "Issues" };
    ui::header(&format!("{count} {label} Found"));

    for (i, issue) in issues.iter().enumerate() {
        println!(
            "  {}  {} {}",
            format!("{}.", i + 1).bold(),
            issue.summary,
            format!("[{}]", issue.category).dimmed()
        );
        if let Some(detail) = &issue.detail {
            for line in detail.lines() {
                println!("      {}", line.dimmed());
            }
        }
        if let Some(fix) = &issue.fix {
            println!("      {} {}", "Fix:".cyan(), fix);
        }
        println!();
    }
}

fn check_privileges(issues: &mut Vec<Issue>) {
    ui::section("Privileges");
    if privilege::is_root() {
        println!("  {} running as root", "✓".green());
    } else {
        println!("  {} running as root {}", "✗".red(), "(no)".red());
        issues.push(Issue {
            category: "Privileges",
            summary: "Not running as root".to_string(),
            detail: Some("Partitioning, mounting and chroot need root".to_string()),
            fix: Some("Run with sudo".to_string()),
        });
    }
}

fn check_commands(issues: &mut Vec<Issue>) {
    ui::section("Required Commands");
    for (cmd, desc, package) in REQUIRED_COMMANDS {
        require_command(cmd, desc, package, issues);
    }
}

fn require_command(cmd: &str, desc: &str, package: &str, issues: &mut Vec<Issue>) {
    if which::which(cmd).is_ok() {
        println!("  {} {} - {}", "✓".green(), cmd, desc.dimmed());
    } else {
        println!("  {} {} - {} {}", "✗".red(), cmd, desc, "(missing)".red());
        issues.push(Issue {
            category: "Required Commands",
            summary: format!("{cmd} is not installed"),
            detail: Some(format!("{desc} needs it")),
            fix: Some(format!("pacman -S {package}")),
        });
    }
}

/// Tools for filesystems the config asks for beyond ext4 and FAT
fn check_filesystem_tools(config: &InstallConfig, issues: &mut Vec<Issue>) {
    let filesystems = std::iter::once(config.disk.root_filesystem)
        .chain(config.disk.data.as_ref().map(|d| d.filesystem));
    for fs in filesystems {
        let program = fs.mkfs_command("/dev/null").program;
        if REQUIRED_COMMANDS.iter().any(|(cmd, ..)| *cmd == program) {
            continue;
        }
        let package = match fs {
            provision::Filesystem::Btrfs => "btrfs-progs",
            provision::Filesystem::Xfs => "xfsprogs",
            _ => continue,
        };
        require_command(&program, &format!("{fs} filesystems"), package, issues);
    }
}

fn check_firmware(config: &InstallConfig, issues: &mut Vec<Issue>) {
    ui::section("Firmware");
    let booted = detect::firmware();
    println!("  {} booted in {} mode", "•".blue(), booted);

    let wanted = match config.disk.firmware {
        FirmwareChoice::Auto => return,
        FirmwareChoice::Uefi => Firmware::Uefi,
        FirmwareChoice::Bios => Firmware::Bios,
    };
    if wanted == booted {
        println!("  {} config asks for {}", "✓".green(), wanted);
    } else {
        println!("  {} config asks for {}", "✗".red(), wanted);
        issues.push(Issue {
            category: "Firmware",
            summary: format!("Config asks for {wanted} but the system booted in {booted} mode"),
            detail: Some("The bootloader is installed for the configured mode".to_string()),
            fix: Some(format!(
                "Boot the installer in {wanted} mode, or set disk.firmware = \"auto\""
            )),
        });
    }
}

fn check_device(config: &InstallConfig, issues: &mut Vec<Issue>) {
    ui::section("Target Disk");
    let device = &config.disk.device;
    if !Path::new(device).exists() {
        println!("  {} {} {}", "✗".red(), device, "(not found)".red());
        issues.push(Issue {
            category: "Target Disk",
            summary: format!("{device} does not exist"),
            detail: None,
            fix: Some("Check disk.device against `lsblk`".to_string()),
        });
        return;
    }

    match config.disk_size_override().map_or_else(|| detect::disk_size_mib(device), Ok) {
        Ok(mib) => println!(
            "  {} {} ({})",
            "✓".green(),
            device,
            ui::format_size(mib * 1024 * 1024)
        ),
        Err(e) => {
            println!("  {} {} {}", "✗".red(), device, "(size unknown)".red());
            issues.push(Issue {
                category: "Target Disk",
                summary: format!("Could not read the size of {device}"),
                detail: Some(format!("{e:#}")),
                fix: Some("Set disk.size in the config".to_string()),
            });
        }
    }
}
