use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use std::{
    env, fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::args::BaseArgs;
use crate::ui::{print_command_status, CommandStatus};

mod get;
mod list;
mod set;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_interval_secs: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub const KNOWN_KEYS: &[&str] = &[
    "data_dir",
    "container",
    "model",
    "fetch_interval_secs",
    "refresh_interval_secs",
];

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of seconds, got '{value}'"))?;
    if secs == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(secs)
}

impl Config {
    pub fn get_field(&self, key: &str) -> Option<String> {
        match key {
            "data_dir" => self.data_dir.clone(),
            "container" => self.container.clone(),
            "model" => self.model.clone(),
            "fetch_interval_secs" => self.fetch_interval_secs.map(|v| v.to_string()),
            "refresh_interval_secs" => self.refresh_interval_secs.map(|v| v.to_string()),
            _ => None,
        }
    }

    pub fn set_field(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "data_dir" => self.data_dir = Some(value),
            "container" => self.container = Some(value),
            "model" => self.model = Some(value),
            "fetch_interval_secs" => self.fetch_interval_secs = Some(parse_secs(key, &value)?),
            "refresh_interval_secs" => self.refresh_interval_secs = Some(parse_secs(key, &value)?),
            _ => bail!("Unknown config key: {key}"),
        }
        Ok(())
    }

    pub fn unset_field(&mut self, key: &str) -> bool {
        match key {
            "data_dir" => self.data_dir = None,
            "container" => self.container = None,
            "model" => self.model = None,
            "fetch_interval_secs" => self.fetch_interval_secs = None,
            "refresh_interval_secs" => self.refresh_interval_secs = None,
            _ => return false,
        }
        true
    }

    pub fn non_empty_fields(&self) -> Vec<(&'static str, String)> {
        KNOWN_KEYS
            .iter()
            .filter_map(|&key| self.get_field(key).map(|v| (key, v)))
            .collect()
    }
}

pub fn config_dir() -> Result<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg).join("sqltune"));
    }
    dirs::home_dir()
        .map(|path| path.join(".config").join("sqltune"))
        .ok_or_else(|| anyhow!("$HOME not configured."))
}

/// `SQLTUNE_CONFIG` wins over the XDG location.
pub fn config_path() -> Result<PathBuf> {
    if let Some(explicit) = env::var_os("SQLTUNE_CONFIG").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(explicit));
    }
    Ok(config_dir()?.join("config.json"))
}

pub fn load_file(path: &Path) -> Config {
    let file_contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Config::default(),
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("could not read {}: {e}", path.display()),
            );
            return Config::default();
        }
    };

    let config: Config = match serde_json::from_str(&file_contents) {
        Ok(c) => c,
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("could not parse {}: {e}", path.display()),
            );
            return Config::default();
        }
    };

    for key in config.extra.keys() {
        print_command_status(
            CommandStatus::Warning,
            &format!("unknown config key {} in {}", key, path.display()),
        );
    }
    tracing::debug!(path = %path.display(), "loaded config");

    config
}

pub fn load() -> Result<Config> {
    Ok(load_file(&config_path()?))
}

pub fn save_file(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;

    Ok(())
}

// --- CLI commands ---

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommands>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommands {
    /// List config values
    List {
        /// Also print the config file location
        #[arg(long)]
        verbose: bool,
    },
    /// Get a config value
    Get {
        /// Config key (data_dir, container, model, fetch_interval_secs, refresh_interval_secs)
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key (data_dir, container, model, fetch_interval_secs, refresh_interval_secs)
        key: String,
        /// Value to set
        value: String,
    },
    /// Remove a config value
    Unset {
        /// Config key (data_dir, container, model, fetch_interval_secs, refresh_interval_secs)
        key: String,
    },
}

fn validate_key(key: &str) -> Result<()> {
    if !KNOWN_KEYS.contains(&key) {
        bail!(
            "Unknown config key: {key}\nValid keys: {}",
            KNOWN_KEYS.join(", ")
        );
    }
    Ok(())
}

pub fn run(base: BaseArgs, args: ConfigArgs) -> Result<()> {
    let path = config_path()?;
    match args.command {
        None => list::run(&base, &path, false),
        Some(ConfigCommands::List { verbose }) => list::run(&base, &path, verbose),
        Some(ConfigCommands::Get { key }) => {
            validate_key(&key)?;
            get::run(&base, &path, &key)
        }
        Some(ConfigCommands::Set { key, value }) => {
            validate_key(&key)?;
            set::run(&path, &key, &value)
        }
        Some(ConfigCommands::Unset { key }) => {
            validate_key(&key)?;
            set::unset(&path, &key)
        }
    }
}
