use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use glob::{glob_with, MatchOptions, Pattern};

use super::LoadReport;
use crate::record::normalize_bytes;

/// Reads every `*.json` file directly inside one directory.
#[derive(Debug, Clone)]
pub struct LocalReader {
    dir: PathBuf,
}

impl LocalReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn load(&self) -> LoadReport {
        self.load_at(Utc::now())
    }

    pub fn load_at(&self, now: DateTime<Utc>) -> LoadReport {
        if !self.dir.is_dir() {
            return LoadReport::unavailable(format!(
                "data directory {} does not exist",
                self.dir.display()
            ));
        }

        let files = match self.json_files() {
            Ok(files) => files,
            Err(err) => return LoadReport::unavailable(format!("{err:#}")),
        };

        let mut report = LoadReport::default();
        for path in files {
            let outcome = fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))
                .and_then(|bytes| normalize_bytes(&bytes, now));
            report.absorb(path.display().to_string(), outcome);
        }
        report
    }

    fn json_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let dir = self
            .dir
            .to_str()
            .with_context(|| format!("data directory {} is not UTF-8", self.dir.display()))?;
        let pattern = format!("{}/*.json", Pattern::escape(dir));
        let options = MatchOptions {
            require_literal_leading_dot: true,
            ..MatchOptions::default()
        };

        let mut files: Vec<PathBuf> = glob_with(&pattern, options)
            .with_context(|| format!("invalid glob pattern {pattern}"))?
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        Ok(files)
    }
}
