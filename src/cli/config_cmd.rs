use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::output::{OutputFormat, OutputOptions};
use burnwatch::core::config::EngineConfig;

pub fn init(path: &Path, _opts: &OutputOptions) -> Result<()> {
    if path.exists() {
        eprintln!("Config file already exists at {}", path.display());
        eprintln!("Remove it first if you want to regenerate.");
        return Ok(());
    }

    let config = EngineConfig::default();
    config
        .save_to(path)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    println!("Generated config at {}", path.display());
    println!(
        "  Session budget {} tokens, weekly tiers: {}",
        config.session.budget_limit,
        config
            .weekly
            .tiers
            .iter()
            .map(|t| format!("{} {}h", t.tier, t.hours_limit))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}

pub fn check(path: &Path, _opts: &OutputOptions) -> Result<()> {
    if !path.exists() {
        eprintln!("No config file found at {}", path.display());
        eprintln!("Run `burnwatch config init` to create one.");
        return Ok(());
    }

    let config = match EngineConfig::load_from(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let issues = config.validate();
    if issues.is_empty() {
        println!("Config is valid: {}", path.display());
    } else {
        eprintln!("Config issues found in {}:", path.display());
        for issue in &issues {
            eprintln!("  - {}", issue);
        }
        std::process::exit(1);
    }
    Ok(())
}

/// Print the effective configuration (file values over defaults).
pub fn show(config: &EngineConfig, opts: &OutputOptions) -> Result<()> {
    match opts.format {
        OutputFormat::Text => print!("{}", toml::to_string_pretty(config)?),
        OutputFormat::Json => println!("{}", opts.to_json(config)?),
    }
    Ok(())
}
