use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::args::BaseArgs;
use crate::context::AppContext;
use crate::http::client_with_timeout;
use crate::store::BlobContainer;
use crate::ui::{print_command_status, with_spinner, CommandStatus};

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    /// Endpoint that returns JSON log records
    url: String,

    /// Keep fetching at a fixed interval until interrupted
    #[arg(long)]
    watch: bool,

    /// Seconds between fetches in watch mode
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,
}

/// Blob key for a fetch made at `at`, one per UTC minute.
pub fn blob_key_for(at: &DateTime<Utc>) -> String {
    format!("logs/{}.json", at.format("%Y/%m/%d/%H/%M"))
}

pub struct LogFetcher {
    http: reqwest::Client,
    container: Arc<dyn BlobContainer>,
}

impl LogFetcher {
    pub fn new(container: Arc<dyn BlobContainer>) -> Result<Self> {
        Ok(Self {
            http: client_with_timeout(FETCH_TIMEOUT)?,
            container,
        })
    }

    pub fn container_name(&self) -> &str {
        self.container.name()
    }

    pub async fn fetch_once(&self, url: &str) -> Result<String> {
        self.fetch_stamped(url, Utc::now).await
    }

    /// GET `url`, then store the JSON body under the minute key for the
    /// moment the body arrived, replacing any earlier write to that minute.
    async fn fetch_stamped<C>(&self, url: &str, clock: C) -> Result<String>
    where
        C: FnOnce() -> DateTime<Utc> + Send,
    {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;
        let data: Value = response
            .json()
            .await
            .with_context(|| format!("response from {url} is not valid JSON"))?;
        let body = serde_json::to_vec(&data).context("failed to serialize fetched JSON")?;

        let key = blob_key_for(&clock());
        self.container.upload(&key, body).await?;
        tracing::info!(url, key = %key, container = self.container.name(), "stored fetched logs");
        Ok(key)
    }
}

/// Fetch forever at a fixed interval until `token` is cancelled. Every
/// outcome goes to `report`; failures never stop the loop. Returns the
/// number of completed fetches.
pub async fn run_periodic<F>(
    fetcher: Arc<LogFetcher>,
    url: String,
    interval: Duration,
    token: CancellationToken,
    mut report: F,
) -> usize
where
    F: FnMut(Result<String>) + Send,
{
    let mut completed = 0usize;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            outcome = fetcher.fetch_once(&url) => outcome,
        };
        completed += 1;
        if let Err(err) = &outcome {
            tracing::warn!(url = %url, error = %format!("{err:#}"), "periodic fetch failed");
        }
        report(outcome);

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    completed
}

/// Handle to a running periodic fetch. Dropping it cancels the loop.
pub struct PeriodicFetch {
    url: String,
    token: CancellationToken,
    handle: JoinHandle<usize>,
}

impl PeriodicFetch {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    /// Wait for the loop to exit; call `stop` first.
    pub async fn wait(&mut self) -> Result<usize> {
        (&mut self.handle)
            .await
            .map_err(|err| anyhow!("periodic fetch task failed: {err}"))
    }
}

impl Drop for PeriodicFetch {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub fn spawn_periodic_fetch<F>(
    runtime: &tokio::runtime::Handle,
    fetcher: Arc<LogFetcher>,
    url: String,
    interval: Duration,
    report: F,
) -> PeriodicFetch
where
    F: FnMut(Result<String>) + Send + 'static,
{
    let token = CancellationToken::new();
    let handle = runtime.spawn(run_periodic(
        fetcher,
        url.clone(),
        interval,
        token.clone(),
        report,
    ));
    PeriodicFetch { url, token, handle }
}

pub async fn run(base: BaseArgs, args: FetchArgs) -> Result<()> {
    let ctx = AppContext::from_base(&base)?;
    let container = ctx.require_container()?;
    let fetcher = Arc::new(LogFetcher::new(container)?);

    if !args.watch {
        let key = with_spinner(
            &format!("Fetching {}...", args.url),
            fetcher.fetch_once(&args.url),
        )
        .await?;
        if base.json {
            println!("{}", serde_json::json!({ "key": key }));
        } else {
            print_command_status(
                CommandStatus::Success,
                &format!("Stored {} in {key}", args.url),
            );
        }
        return Ok(());
    }

    let interval = args
        .interval
        .map(Duration::from_secs)
        .unwrap_or(ctx.settings.fetch_interval);
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    print_command_status(
        CommandStatus::Success,
        &format!(
            "Fetching {} every {}s into {} (Ctrl+C stops)",
            args.url,
            interval.as_secs(),
            fetcher.container_name()
        ),
    );
    let json = base.json;
    let completed = run_periodic(fetcher, args.url, interval, token, move |outcome| {
        match (outcome, json) {
            (Ok(key), true) => println!("{}", serde_json::json!({ "key": key })),
            (Ok(key), false) => {
                print_command_status(CommandStatus::Success, &format!("Stored {key}"))
            }
            (Err(err), _) => print_command_status(
                CommandStatus::Error,
                &format!("URL fetch error: {err:#}"),
            ),
        }
    })
    .await;
    print_command_status(
        CommandStatus::Warning,
        &format!("Stopped after {completed} fetches"),
    );
    Ok(())
}
