use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::debrid::types::ProviderSettings;

/// CLI flags. These override anything set in the config file or environment.
#[derive(Debug, Parser, Deserialize, Serialize)]
#[command(version)]
pub struct Args {
    /// Path to the TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Override `multi_provider_mode`.
    #[arg(long)]
    pub multi_provider_mode: Option<MultiProviderMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MultiProviderMode {
    Preferred,
    Fastest,
}

impl Default for MultiProviderMode {
    fn default() -> Self {
        MultiProviderMode::Preferred
    }
}

/// One provider entry as it appears in the TOML config file, before API keys
/// are resolved from the environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfigEntry {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub priority: u32,
    /// Env var name to read the API key from, e.g. `REALDEBRID_API_KEY`.
    /// The key itself is never read from the TOML file or logged.
    pub api_key_env: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// On-disk shape of the config file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub multi_provider_mode: Option<MultiProviderMode>,
    #[serde(default)]
    pub providers: Vec<ProviderConfigEntry>,
}

/// Resolved runtime settings: CLI > env > TOML file > built-in default.
#[derive(Debug, Clone)]
pub struct Settings {
    pub multi_provider_mode: MultiProviderMode,
    pub providers: Vec<ProviderSettings>,
}

impl Settings {
    /// Loads the config file (if present), applies env-var API key
    /// resolution, then layers CLI overrides on top.
    pub async fn load(args: Args) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config_path = args.config.clone().unwrap_or_else(|| PathBuf::from("debrid-engine.toml"));
        let file = match tokio::fs::read_to_string(&config_path).await {
            Ok(raw) => toml::from_str::<ConfigFile>(&raw)
                .with_context(|| format!("parsing config file at {}", config_path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigFile::default(),
            Err(e) => return Err(e).context("reading config file"),
        };

        let mut providers = Vec::with_capacity(file.providers.len());
        for entry in file.providers {
            let api_key = std::env::var(&entry.api_key_env).unwrap_or_default();
            providers.push(ProviderSettings {
                name: entry.name,
                api_key,
                enabled: entry.enabled,
                priority: entry.priority,
                options: entry.options,
            });
        }
        providers.sort_by_key(|p| p.priority);

        let multi_provider_mode = args
            .multi_provider_mode
            .or(file.multi_provider_mode)
            .unwrap_or_default();

        Ok(Self { multi_provider_mode, providers })
    }
}
