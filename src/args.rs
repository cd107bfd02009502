use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::Args;

use crate::query::TimeRange;
use crate::store::SourceKind;

#[derive(Debug, Clone, Default, Args)]
pub struct BaseArgs {
    /// Output as JSON
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Directory of local JSON log files (or via SQLTUNE_DATA_DIR)
    #[arg(long, env = "SQLTUNE_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Azure storage connection string (or via BLOB_CONN_STR)
    #[arg(
        long,
        env = "BLOB_CONN_STR",
        hide_env_values = true,
        global = true
    )]
    pub blob_conn_str: Option<String>,

    /// Blob container holding fetched logs (or via SQLTUNE_CONTAINER)
    #[arg(long, env = "SQLTUNE_CONTAINER", global = true)]
    pub container: Option<String>,

    /// Completion service API key (or via OPENAI_API_KEY)
    #[arg(
        long,
        env = "OPENAI_API_KEY",
        hide_env_values = true,
        global = true
    )]
    pub openai_api_key: Option<String>,

    /// Completion service API version (or via OPENAI_API_VERSION)
    #[arg(long, env = "OPENAI_API_VERSION", global = true)]
    pub openai_api_version: Option<String>,

    /// Completion service endpoint (or via AZURE_ENDPOINT)
    #[arg(long, env = "AZURE_ENDPOINT", global = true)]
    pub azure_endpoint: Option<String>,

    /// Completion model deployment (or via SQLTUNE_MODEL)
    #[arg(long, env = "SQLTUNE_MODEL", global = true)]
    pub model: Option<String>,

    /// Path to a .env file to load before running commands.
    #[arg(long, env = "SQLTUNE_ENV_FILE", hide_env_values = true)]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct CLIArgs<T: Args> {
    #[command(flatten)]
    pub base: BaseArgs,

    #[command(flatten)]
    pub args: T,
}

/// Which records to look at: source, day range and cfg_path selection.
#[derive(Debug, Clone, Args)]
pub struct WindowArgs {
    /// Where to read records from
    #[arg(long, value_enum, default_value_t = SourceKind::Local)]
    pub source: SourceKind,

    /// First day to include (YYYY-MM-DD, default yesterday)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Last day to include (YYYY-MM-DD, default today)
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Only include these cfg_path values (repeatable)
    #[arg(long = "cfg-path", value_name = "PATH")]
    pub cfg_paths: Vec<String>,
}

impl WindowArgs {
    pub fn range(&self, today: NaiveDate) -> Result<TimeRange> {
        let to = self.to.unwrap_or(today);
        let from = self
            .from
            .unwrap_or_else(|| to.pred_opt().unwrap_or(to));
        if from > to {
            bail!("--from {from} is after --to {to}");
        }
        Ok(TimeRange::days(from, to))
    }
}
