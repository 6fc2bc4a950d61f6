//! `cellsync config show|init`

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use cellsync_core::{config, CellsyncConfig};

use super::home_dir;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration as YAML.
    Show,

    /// Write the default configuration to ~/.cellsync/config.yaml.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
}

pub fn run(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let cfg = config::load().context("failed to load ~/.cellsync/config.yaml")?;
            cfg.reconcile
                .validate()
                .context("config loaded but is not usable for reconciliation")?;
            let yaml = serde_yaml::to_string(&cfg).context("failed to serialize config")?;
            print!("{yaml}");
            Ok(())
        }
        ConfigCommand::Init { force } => {
            let path = config::config_path_at(&home_dir()?);
            if path.exists() && !force {
                bail!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
            let written = config::save(&CellsyncConfig::default())
                .context("failed to write default config")?;
            println!("✓ Wrote default config to {}", written.display());
            Ok(())
        }
    }
}
