//! `palaver init`: write a default config file.

use anyhow::Context;
use palaver_config::AppConfig;

pub fn run() -> anyhow::Result<()> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        println!("Edit it manually or delete it and re-run init.");
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;
    std::fs::write(&config_path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Created {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Add an API key to the config, or set PALAVER_API_KEY / OPENAI_API_KEY");
    println!("  2. Run: palaver chat -m \"hello\"");

    Ok(())
}
