//! Path resolution for rootstrap
//!
//! # Environment Variables
//!
//! - `ROOTSTRAP_CONFIG_DIR` - Directory holding `install.toml`
//! - `ROOTSTRAP_STATE_DIR` - Directory holding the progress record and token
//!
//! # Path Resolution Priority
//!
//! For config_file():
//! 1. `--config` on the command line
//! 2. `ROOTSTRAP_CONFIG_DIR/install.toml`
//! 3. `/etc/rootstrap/install.toml`
//!
//! For state_dir():
//! 1. `ROOTSTRAP_STATE_DIR` environment variable
//! 2. `engine.state_dir` from the install config
//! 3. `/var/lib/rootstrap` when running as root
//! 4. `XDG_STATE_HOME/rootstrap` or `~/.local/state/rootstrap` otherwise

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "ROOTSTRAP_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "ROOTSTRAP_STATE_DIR";

const SYSTEM_CONFIG_DIR: &str = "/etc/rootstrap";
const SYSTEM_STATE_DIR: &str = "/var/lib/rootstrap";

const CONFIG_FILE: &str = "install.toml";
const PROGRESS_FILE: &str = "progress.toml";
const TOKEN_FILE: &str = "token.toml";

/// Get the install config path
pub fn config_file(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        log::debug!("Using config from --config: {}", path.display());
        return path.to_path_buf();
    }

    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir).join(CONFIG_FILE);
        log::debug!("Using config from {}: {}", ENV_CONFIG_DIR, path.display());
        return path;
    }

    let path = PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE);
    log::debug!("Using default config: {}", path.display());
    path
}

/// Get the state directory path
pub fn state_dir(configured: Option<&str>) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Some(dir) = configured {
        let path = expand(dir);
        log::debug!("Using state dir from config: {}", path.display());
        return Ok(path);
    }

    if crate::privilege::is_root() {
        return Ok(PathBuf::from(SYSTEM_STATE_DIR));
    }

    let base = match dirs::state_dir() {
        Some(dir) => dir,
        None => dirs::home_dir()
            .context("Could not determine home directory")?
            .join(".local")
            .join("state"),
    };
    let path = base.join("rootstrap");
    log::debug!("Not running as root, using user state dir: {}", path.display());
    Ok(path)
}

/// Progress record inside `state_dir`
pub fn progress_file(state_dir: &Path) -> PathBuf {
    state_dir.join(PROGRESS_FILE)
}

/// Confirmation token inside `state_dir`
pub fn token_file(state_dir: &Path) -> PathBuf {
    state_dir.join(TOKEN_FILE)
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
