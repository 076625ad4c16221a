//! Show or initialize the configuration file.

use std::path::Path;

use vizcast_common::config::AppConfig;

pub fn show(config: &AppConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

pub fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    AppConfig::default().save_to(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
