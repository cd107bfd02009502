use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::path::Path as ObjPath;
use object_store::{ObjectStore, PutPayload};

use super::LoadReport;
use crate::query::TimeRange;
use crate::record::normalize_bytes;

/// The slice of a blob container the readers and fetcher need.
#[async_trait]
pub trait BlobContainer: Send + Sync {
    fn name(&self) -> &str;
    async fn list_keys(&self) -> Result<Vec<String>>;
    async fn download(&self, key: &str) -> Result<Vec<u8>>;
    /// Write `body` at `key`, replacing whatever was there.
    async fn upload(&self, key: &str, body: Vec<u8>) -> Result<()>;
}

pub struct ObjectStoreContainer {
    store: Arc<dyn ObjectStore>,
    name: String,
}

impl ObjectStoreContainer {
    pub fn new(store: Arc<dyn ObjectStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }
}

#[async_trait]
impl BlobContainer for ObjectStoreContainer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .store
            .list(None)
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .with_context(|| format!("failed to list container {}", self.name))?;
        keys.sort();
        Ok(keys)
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let location = ObjPath::from(key);
        let bytes = self
            .store
            .get(&location)
            .await
            .with_context(|| format!("failed to download {key}"))?
            .bytes()
            .await
            .with_context(|| format!("failed to read body of {key}"))?;
        Ok(bytes.to_vec())
    }

    async fn upload(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let location = ObjPath::from(key);
        self.store
            .put(&location, PutPayload::from(body))
            .await
            .with_context(|| format!("failed to upload {key}"))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct AzureConnection {
    account_name: Option<String>,
    account_key: Option<String>,
    sas: Option<String>,
    blob_endpoint: Option<String>,
    use_emulator: bool,
}

impl AzureConnection {
    fn allows_http(&self) -> bool {
        self.blob_endpoint
            .as_deref()
            .is_some_and(|endpoint| endpoint.starts_with("http://"))
    }
}

/// `acct` from `https://acct.blob.core.windows.net/`.
fn account_from_endpoint(endpoint: &str) -> Option<String> {
    let host = endpoint.split_once("://").map_or(endpoint, |(_, rest)| rest);
    let host = host.split(['/', ':']).next()?;
    let label = host.split('.').next()?;
    if label.is_empty() || host == label || label.parse::<u8>().is_ok() {
        return None;
    }
    Some(label.to_string())
}

fn parse_connection_string(conn: &str) -> Result<AzureConnection> {
    let mut parsed = AzureConnection::default();
    let mut protocol = None;
    let mut suffix = None;
    for part in conn.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = part.split_once('=') else {
            bail!("malformed connection string segment '{part}'");
        };
        let value = value.trim().to_string();
        match key.trim() {
            "AccountName" => parsed.account_name = Some(value),
            "AccountKey" => parsed.account_key = Some(value),
            "SharedAccessSignature" => parsed.sas = Some(value),
            "BlobEndpoint" => parsed.blob_endpoint = Some(value.trim_end_matches('/').to_string()),
            "EndpointSuffix" => suffix = Some(value),
            "DefaultEndpointsProtocol" => protocol = Some(value),
            "UseDevelopmentStorage" => parsed.use_emulator = value == "true",
            _ => {}
        }
    }
    if parsed.use_emulator {
        return Ok(parsed);
    }

    if parsed.account_name.is_none() {
        parsed.account_name = parsed.blob_endpoint.as_deref().and_then(account_from_endpoint);
    }
    let Some(account) = parsed.account_name.as_deref() else {
        bail!("connection string must contain AccountName or an account BlobEndpoint");
    };
    if parsed.blob_endpoint.is_none() {
        if let Some(suffix) = suffix {
            let protocol = protocol.as_deref().unwrap_or("https");
            parsed.blob_endpoint = Some(format!("{protocol}://{account}.blob.{suffix}"));
        }
    }
    if parsed.account_key.is_none() && parsed.sas.is_none() {
        bail!("connection string must contain AccountKey or SharedAccessSignature");
    }
    Ok(parsed)
}

/// Build a container client from an Azure storage connection string.
pub fn connect_azure(conn: &str, container: &str) -> Result<Arc<dyn BlobContainer>> {
    let parsed = parse_connection_string(conn)?;
    let mut builder = MicrosoftAzureBuilder::new()
        .with_container_name(container)
        .with_use_emulator(parsed.use_emulator)
        .with_allow_http(parsed.allows_http());
    if let Some(account) = parsed.account_name {
        builder = builder.with_account(account);
    }
    if let Some(endpoint) = parsed.blob_endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if let Some(key) = parsed.account_key {
        builder = builder.with_access_key(key);
    } else if let Some(sas) = parsed.sas {
        // object_store percent-decodes and splits the token itself
        builder = builder.with_config(AzureConfigKey::SasKey, sas);
    }
    let store = builder
        .build()
        .with_context(|| format!("failed to configure blob container {container}"))?;
    Ok(Arc::new(ObjectStoreContainer::new(Arc::new(store), container)))
}

/// Reads every object of the container. A missing container client means
/// the store is unavailable, not an error.
#[derive(Clone, Default)]
pub struct RemoteReader {
    container: Option<Arc<dyn BlobContainer>>,
}

impl RemoteReader {
    pub fn new(container: Option<Arc<dyn BlobContainer>>) -> Self {
        Self { container }
    }

    pub fn container(&self) -> Option<&Arc<dyn BlobContainer>> {
        self.container.as_ref()
    }

    pub async fn load(&self, range: &TimeRange) -> LoadReport {
        self.load_at(range, Utc::now()).await
    }

    pub async fn load_at(&self, range: &TimeRange, now: DateTime<Utc>) -> LoadReport {
        let Some(container) = &self.container else {
            return LoadReport::unavailable("blob storage is not configured");
        };

        let keys = match container.list_keys().await {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!(container = container.name(), error = %format!("{err:#}"), "blob listing failed");
                return LoadReport::unavailable(format!("{err:#}"));
            }
        };

        let mut report = LoadReport::default();
        for key in keys {
            let outcome = match container.download(&key).await {
                Ok(bytes) => normalize_bytes(&bytes, now),
                Err(err) => Err(err),
            };
            report.absorb(key, outcome);
        }
        // Every object is parsed before the window applies; there is no
        // server-side range query.
        report.retain_range(range);
        report
    }
}
