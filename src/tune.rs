use std::io::{IsTerminal, Read};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::args::BaseArgs;
use crate::context::AppContext;
use crate::http::client_with_timeout;
use crate::record::is_tunable_sql;
use crate::ui::with_spinner;

pub const MAX_COMPLETION_TOKENS: u32 = 1000;
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_API_VERSION: &str = "2024-10-21";
pub const NOT_CONFIGURED: &str = "completion client is not configured";
pub const NOTHING_TO_TUNE: &str = "nothing to tune";

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Args)]
pub struct TuneArgs {
    /// SQL to tune (reads stdin when omitted)
    sql: Option<String>,
}

/// A text-completion service: one prompt in, one suggestion out.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

pub fn tuning_prompt(sql: &str) -> String {
    format!("Optimize this SQL: {sql}")
}

/// Azure OpenAI chat completions, one deployment per model name.
#[derive(Clone)]
pub struct AzureOpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    deployment: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl AzureOpenAiClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Result<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            bail!("completion endpoint is empty");
        }
        let api_key = api_key.into();
        if api_key.is_empty() {
            bail!("completion API key is empty");
        }
        Ok(Self {
            http: client_with_timeout(COMPLETION_TIMEOUT)?,
            endpoint,
            api_key,
            api_version: api_version.into(),
            deployment: deployment.into(),
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.endpoint, self.deployment
        )
    }
}

#[async_trait]
impl CompletionClient for AzureOpenAiClient {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = ChatRequest {
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
        };
        let response = self
            .http
            .post(self.completions_url())
            .query(&[("api-version", self.api_version.as_str())])
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("completion service returned {status}: {text}");
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("failed to parse completion response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context("completion response has no choices")
    }
}

/// Wraps an optional completion client and never fails: every outcome is a
/// message for the operator.
#[derive(Clone, Default)]
pub struct TuningAdvisor {
    client: Option<Arc<dyn CompletionClient>>,
}

impl TuningAdvisor {
    pub fn new(client: Option<Arc<dyn CompletionClient>>) -> Self {
        Self { client }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    pub async fn tune(&self, sql: &str) -> String {
        let Some(client) = &self.client else {
            return NOT_CONFIGURED.to_string();
        };
        if !is_tunable_sql(sql) {
            return NOTHING_TO_TUNE.to_string();
        }

        match client
            .complete(&tuning_prompt(sql.trim()), MAX_COMPLETION_TOKENS)
            .await
        {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "tuning request failed");
                format!("tuning error: {err:#}")
            }
        }
    }
}

fn read_sql(arg: Option<String>) -> Result<String> {
    if let Some(sql) = arg {
        return Ok(sql);
    }
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        bail!("pass SQL as an argument or pipe it on stdin");
    }
    let mut sql = String::new();
    stdin
        .read_to_string(&mut sql)
        .context("failed to read SQL from stdin")?;
    Ok(sql)
}

pub async fn run(base: BaseArgs, args: TuneArgs) -> Result<()> {
    let ctx = AppContext::from_base(&base)?;
    ctx.report_notices();
    let sql = read_sql(args.sql)?;

    let suggestion = with_spinner("Requesting tuning suggestion...", ctx.advisor.tune(&sql)).await;
    if base.json {
        println!(
            "{}",
            serde_json::to_string(&serde_json::json!({
                "sql": sql,
                "suggestion": suggestion,
            }))?
        );
    } else {
        println!("{suggestion}");
    }
    Ok(())
}
