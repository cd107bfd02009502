use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

use crate::query::TimeRange;
use crate::record::{LogRecord, LogTable};
use crate::utils::pluralize;

mod local;
mod remote;

pub use local::LocalReader;
pub use remote::{connect_azure, BlobContainer, ObjectStoreContainer, RemoteReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// JSON files in the local data directory
    Local,
    /// Objects in the remote blob container
    Blob,
}

impl SourceKind {
    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Local => "local JSON",
            SourceKind::Blob => "blob storage",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            SourceKind::Local => SourceKind::Blob,
            SourceKind::Blob => SourceKind::Local,
        }
    }
}

/// A source document that could not be turned into records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSource {
    pub source: String,
    pub reason: String,
}

/// Outcome of one full load: the table plus what was skipped and why.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub table: LogTable,
    pub sources_read: usize,
    pub skipped: Vec<SkippedSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<String>,
}

impl LoadReport {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            unavailable: Some(reason.into()),
            ..Self::default()
        }
    }

    fn absorb(&mut self, source: String, outcome: Result<Vec<LogRecord>>) {
        match outcome {
            Ok(records) => {
                self.sources_read += 1;
                self.table.extend(records);
            }
            Err(err) => {
                tracing::debug!(source = %source, error = %format!("{err:#}"), "skipping source document");
                self.skipped.push(SkippedSource {
                    source,
                    reason: format!("{err:#}"),
                });
            }
        }
    }

    fn retain_range(&mut self, range: &TimeRange) {
        self.table = range.filter(&self.table);
    }

    pub fn summary(&self) -> String {
        let records = self.table.len();
        let mut text = format!(
            "{records} {} from {} {}",
            pluralize(records, "record", None),
            self.sources_read,
            pluralize(self.sources_read, "document", None)
        );
        if !self.skipped.is_empty() {
            text.push_str(&format!(", {} skipped", self.skipped.len()));
        }
        text
    }
}

/// Both readers behind one switch, as the operator sees them.
#[derive(Clone)]
pub struct Sources {
    pub local: LocalReader,
    pub remote: RemoteReader,
}

impl Sources {
    pub fn new(local: LocalReader, remote: RemoteReader) -> Self {
        Self { local, remote }
    }

    /// Load from the chosen source and keep only rows inside `range`.
    pub async fn load(&self, kind: SourceKind, range: &TimeRange) -> LoadReport {
        match kind {
            SourceKind::Local => {
                let mut report = self.local.load();
                report.retain_range(range);
                report
            }
            SourceKind::Blob => self.remote.load(range).await,
        }
    }
}
