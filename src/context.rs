use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::args::BaseArgs;
use crate::config::{self, Config};
use crate::fetch::DEFAULT_FETCH_INTERVAL;
use crate::store::{connect_azure, BlobContainer, LocalReader, RemoteReader, Sources};
use crate::tune::{AzureOpenAiClient, CompletionClient, TuningAdvisor, DEFAULT_API_VERSION, DEFAULT_MODEL};
use crate::ui::{print_command_status, CommandStatus};

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_CONTAINER: &str = "msaiquery";
pub const DEFAULT_REFRESH_SECS: u64 = 600;
pub const MIN_REFRESH_SECS: u64 = 30;
pub const MAX_REFRESH_SECS: u64 = 3600;

/// Effective settings after flags, environment and the config file are merged.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub container: String,
    pub blob_conn_str: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_api_version: String,
    pub azure_endpoint: Option<String>,
    pub model: String,
    pub fetch_interval: Duration,
    pub refresh_interval: Duration,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Settings {
    pub fn resolve(base: &BaseArgs, config: &Config) -> Self {
        let data_dir = base
            .data_dir
            .clone()
            .or_else(|| config.data_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let refresh_secs = config
            .refresh_interval_secs
            .unwrap_or(DEFAULT_REFRESH_SECS)
            .clamp(MIN_REFRESH_SECS, MAX_REFRESH_SECS);

        Self {
            data_dir,
            container: non_empty(&base.container)
                .or_else(|| non_empty(&config.container))
                .unwrap_or_else(|| DEFAULT_CONTAINER.to_string()),
            blob_conn_str: non_empty(&base.blob_conn_str),
            openai_api_key: non_empty(&base.openai_api_key),
            openai_api_version: non_empty(&base.openai_api_version)
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            azure_endpoint: non_empty(&base.azure_endpoint),
            model: non_empty(&base.model)
                .or_else(|| non_empty(&config.model))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            fetch_interval: config
                .fetch_interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_FETCH_INTERVAL),
            refresh_interval: Duration::from_secs(refresh_secs),
        }
    }
}

/// Clients built once per command and handed to whatever needs them.
/// A client that cannot be built is absent, with the reason in `notices`.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Settings,
    pub sources: Sources,
    pub advisor: TuningAdvisor,
    pub notices: Vec<String>,
    blob_notice: Option<String>,
}

impl AppContext {
    pub fn from_base(base: &BaseArgs) -> Result<Self> {
        let config = config::load()?;
        Ok(Self::build(Settings::resolve(base, &config)))
    }

    pub fn build(settings: Settings) -> Self {
        let mut notices = Vec::new();
        let mut blob_notice = None;

        let container = settings.blob_conn_str.as_deref().and_then(|conn| {
            match connect_azure(conn, &settings.container) {
                Ok(container) => Some(container),
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "blob client unavailable");
                    let notice = format!("blob storage unavailable: {err:#}");
                    notices.push(notice.clone());
                    blob_notice = Some(notice);
                    None
                }
            }
        });

        let client: Option<Arc<dyn CompletionClient>> =
            match (&settings.azure_endpoint, &settings.openai_api_key) {
                (Some(endpoint), Some(key)) => match AzureOpenAiClient::new(
                    endpoint.as_str(),
                    key.as_str(),
                    settings.openai_api_version.as_str(),
                    settings.model.as_str(),
                ) {
                    Ok(client) => Some(Arc::new(client)),
                    Err(err) => {
                        notices.push(format!("completion client unavailable: {err:#}"));
                        None
                    }
                },
                _ => None,
            };

        Self {
            sources: Sources::new(
                LocalReader::new(settings.data_dir.clone()),
                RemoteReader::new(container),
            ),
            advisor: TuningAdvisor::new(client),
            settings,
            notices,
            blob_notice,
        }
    }

    pub fn container(&self) -> Option<Arc<dyn BlobContainer>> {
        self.sources.remote.container().cloned()
    }

    pub fn require_container(&self) -> Result<Arc<dyn BlobContainer>> {
        match self.container() {
            Some(container) => Ok(container),
            None => match &self.blob_notice {
                Some(reason) => bail!("blob storage required: {reason}"),
                None => bail!("blob storage required: set BLOB_CONN_STR or pass --blob-conn-str"),
            },
        }
    }

    pub fn report_notices(&self) {
        for notice in &self.notices {
            print_command_status(CommandStatus::Warning, notice);
        }
    }
}
