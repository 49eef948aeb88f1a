//! Subcommand implementations
//!
//! Every command that needs the plan goes through [`prepare`], which loads
//! the config, sizes the disk, validates the layout and builds the stage
//! graph. Plan and graph errors surface before anything touches the disk.

pub mod confirm;
pub mod doctor;
pub mod plan;
pub mod reset;
pub mod run;
pub mod status;

use anyhow::{Context as _, Result};
use provision::{DiskPlan, RecordStore, StageGraph, validate};
use std::path::PathBuf;

use crate::Context;
use crate::config::InstallConfig;
use crate::detect::{self, Capabilities};
use crate::install::Installation;
use crate::paths;
use crate::state::TokenFile;

/// Config, validated plan and stage graph for one invocation
pub struct Prepared {
    pub config: InstallConfig,
    pub plan: DiskPlan,
    pub capabilities: Capabilities,
    pub graph: StageGraph,
    pub state_dir: PathBuf,
}

impl Prepared {
    pub fn record_store(&self) -> RecordStore {
        RecordStore::new(paths::progress_file(&self.state_dir))
    }

    pub fn token_file(&self) -> TokenFile {
        TokenFile::new(paths::token_file(&self.state_dir))
    }

    /// Token lifetime from the config
    pub fn token_ttl(&self) -> Result<chrono::TimeDelta> {
        self.config.confirmation_ttl()
    }
}

/// Load the install config named on the command line or by default
pub fn load_config(ctx: &Context) -> Result<InstallConfig> {
    let path = paths::config_file(ctx.config.as_deref());
    InstallConfig::load(&path)
}

/// State directory for `config`
pub fn state_dir(config: &InstallConfig) -> Result<PathBuf> {
    paths::state_dir(config.engine.state_dir.as_deref())
}

/// Load config, resolve and validate the disk plan, build the stages
pub fn prepare(ctx: &Context) -> Result<Prepared> {
    let config = load_config(ctx)?;
    let firmware = config.firmware();
    log::debug!("Firmware mode: {firmware}");

    let disk_size_mib = match config.disk_size_override() {
        Some(size) => size,
        None => detect::disk_size_mib(&config.disk.device)?,
    };

    let intent = config.disk_intent(firmware, detect::ram_mib)?;
    let plan = DiskPlan::from_intent(&intent, disk_size_mib)?;
    validate(&plan)?;
    log::debug!("Plan {} validated", plan.digest().short());

    let capabilities = Capabilities::detect();
    let graph = Installation {
        config: &config,
        plan: &plan,
        capabilities: &capabilities,
    }
    .graph()?;

    let state_dir = state_dir(&config).context("Could not determine state directory")?;

    Ok(Prepared {
        config,
        plan,
        capabilities,
        graph,
        state_dir,
    })
}
