use provision::{CommandSpec, PostCondition, Stage, Step};
use std::path::PathBuf;

use super::{BOOTSTRAP, CONFIGURE, Target};
use crate::config::{InstallConfig, UserConfig};

const SUDOERS_DROP_IN: &str = "/etc/sudoers.d/10-wheel";
const WHEEL_RULE: &str = "%wheel ALL=(ALL:ALL) ALL";

/// fstab, clock, locale, console, network identity and accounts
pub(super) fn stage(config: &InstallConfig, target: &Target) -> Stage {
    let mut steps = vec![fstab(target)];
    steps.extend(clock(&config.system.timezone, target));
    steps.extend(locale(&config.system.locale, target));
    steps.push(keymap(&config.system.keymap, target));
    steps.extend(identity(&config.system.hostname, target));
    for user in &config.users {
        steps.extend(account(user, target));
    }
    if config.users.iter().any(|u| u.sudo) {
        steps.extend(sudoers(target));
    }

    Stage::new(CONFIGURE).after(BOOTSTRAP).steps(steps)
}

fn fstab(target: &Target) -> Step {
    let fstab = target.path_str("/etc/fstab");
    Step::new(
        "generate fstab",
        CommandSpec::new("sh").args([
            "-c".to_string(),
            r#"genfstab -U "$1" > "$1/etc/fstab""#.to_string(),
            "genfstab".to_string(),
            target.root_str(),
        ]),
        PostCondition::succeeds(CommandSpec::new("findmnt").args([
            "--tab-file".to_string(),
            fstab,
            "--noheadings".to_string(),
            "--mountpoint".to_string(),
            "/".to_string(),
        ])),
    )
}

fn clock(timezone: &str, target: &Target) -> Vec<Step> {
    let zoneinfo = format!("/usr/share/zoneinfo/{timezone}");
    vec![
        Step::new(
            format!("set timezone {timezone}"),
            target.chroot(["ln", "-sf", zoneinfo.as_str(), "/etc/localtime"]),
            PostCondition::LinkTarget {
                path: target.path("/etc/localtime"),
                target: PathBuf::from(&zoneinfo),
            },
        ),
        Step::new(
            "sync hardware clock",
            target.chroot(["hwclock", "--systohc"]),
            PostCondition::path_exists(target.path("/etc/adjtime")),
        ),
    ]
}

/// Name `locale -a` lists for `locale`, e.g. `en_US.utf8` for `en_US.UTF-8`
fn normalized_locale(locale: &str) -> String {
    match locale.split_once('.') {
        Some((lang, codeset)) => {
            let codeset: String = codeset
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .collect();
            format!("{lang}.{}", codeset.to_ascii_lowercase())
        }
        None => locale.to_string(),
    }
}

fn locale(locale: &str, target: &Target) -> Vec<Step> {
    let charset = locale.split_once('.').map_or("UTF-8", |(_, c)| c);
    let entry = format!("{locale} {charset}");
    let lang = format!("LANG={locale}");

    vec![
        Step::new(
            format!("enable {locale} in locale.gen"),
            target.append_file("/etc/locale.gen", format!("{entry}\n")),
            PostCondition::file_contains(target.path("/etc/locale.gen"), format!("\n{entry}\n")),
        ),
        Step::new(
            "generate locales",
            target.chroot(["locale-gen"]),
            PostCondition::output_has_line(
                target.chroot(["locale", "-a"]),
                normalized_locale(locale),
            ),
        ),
        Step::new(
            "write locale.conf",
            target.write_file("/etc/locale.conf", format!("{lang}\n")),
            PostCondition::file_contains(target.path("/etc/locale.conf"), lang),
        ),
    ]
}

fn keymap(keymap: &str, target: &Target) -> Step {
    let line = format!("KEYMAP={keymap}");
    Step::new(
        "write vconsole.conf",
        target.write_file("/etc/vconsole.conf", format!("{line}\n")),
        PostCondition::file_contains(target.path("/etc/vconsole.conf"), line),
    )
}

fn identity(hostname: &str, target: &Target) -> Vec<Step> {
    let hosts_line = format!("127.0.1.1 {hostname}.localdomain {hostname}");
    vec![
        Step::new(
            format!("set hostname {hostname}"),
            target.write_file("/etc/hostname", format!("{hostname}\n")),
            PostCondition::file_contains(target.path("/etc/hostname"), hostname),
        ),
        Step::new(
            "write hosts",
            target.append_file(
                "/etc/hosts",
                format!("127.0.0.1 localhost\n::1 localhost\n{hosts_line}\n"),
            ),
            PostCondition::file_contains(target.path("/etc/hosts"), hosts_line),
        ),
    ]
}

fn account(user: &UserConfig, target: &Target) -> Vec<Step> {
    let mut groups = user.groups.clone();
    if user.sudo && !groups.iter().any(|g| g == "wheel") {
        groups.push("wheel".to_string());
    }

    let mut useradd = target.chroot(["useradd", "-m", "-s", user.shell.as_str()]);
    if !groups.is_empty() {
        useradd = useradd.args(["-G".to_string(), groups.join(",")]);
    }
    useradd = useradd.arg(user.name.clone());

    let mut steps = vec![Step::new(
        format!("create user {}", user.name),
        useradd,
        PostCondition::file_contains(target.path("/etc/passwd"), format!("\n{}:", user.name)),
    )];

    if let Some(hash) = &user.password_hash {
        steps.push(Step::new(
            format!("set password for {}", user.name),
            target
                .chroot(["chpasswd", "-e"])
                .stdin(format!("{}:{hash}\n", user.name)),
            PostCondition::file_contains(
                target.path("/etc/shadow"),
                format!("\n{}:{hash}:", user.name),
            ),
        ));
    }

    steps
}

fn sudoers(target: &Target) -> Vec<Step> {
    let path = target.path_str(SUDOERS_DROP_IN);
    vec![
        Step::new(
            "allow wheel to use sudo",
            target.write_file(SUDOERS_DROP_IN, format!("{WHEEL_RULE}\n")),
            PostCondition::file_contains(target.path(SUDOERS_DROP_IN), WHEEL_RULE),
        ),
        Step::new(
            "restrict sudoers drop-in permissions",
            CommandSpec::new("chmod").args(["0440".to_string(), path.clone()]),
            PostCondition::output_equals(
                CommandSpec::new("stat").args(["-c".to_string(), "%a".to_string(), path]),
                "440",
            ),
        ),
    ]
}
