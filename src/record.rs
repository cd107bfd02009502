use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_APP_NAME: &str = "unknown";
pub const DEFAULT_USER_IP: &str = "0.0.0.0";
pub const DEFAULT_CFG_PATH: &str = "/config/default";
pub const NO_SQL: &str = "no SQL available";

/// Canonical column order of a log table.
pub const COLUMNS: [&str; 6] = [
    "timestamp",
    "app_name",
    "elapse_time",
    "user_ip",
    "cfg_path",
    "sql",
];

const OFFSET_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z"];
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
// Numeric timestamps above this magnitude are epoch milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// One request-log entry with every canonical field populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub app_name: String,
    pub elapse_time: f64,
    pub user_ip: String,
    pub cfg_path: String,
    pub sql: String,
}

impl LogRecord {
    /// Build a record from one raw JSON object. Absent and null fields take
    /// their defaults; `now` stands in for a missing or unparseable timestamp.
    pub fn from_object(row: &Map<String, Value>, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: row
                .get("timestamp")
                .and_then(parse_timestamp)
                .unwrap_or(now),
            app_name: text_or(row.get("app_name"), DEFAULT_APP_NAME),
            elapse_time: row
                .get("elapse_time")
                .map(coerce_elapse_time)
                .unwrap_or(0.0),
            user_ip: text_or(row.get("user_ip"), DEFAULT_USER_IP),
            cfg_path: text_or(row.get("cfg_path"), DEFAULT_CFG_PATH),
            sql: text_or(row.get("sql"), NO_SQL),
        }
    }

    pub fn has_sql(&self) -> bool {
        is_tunable_sql(&self.sql)
    }
}

/// True when `sql` is worth sending to the tuning service.
pub fn is_tunable_sql(sql: &str) -> bool {
    let trimmed = sql.trim();
    !trimmed.is_empty() && trimmed != NO_SQL
}

/// Normalize one parsed document: a single object or an array of objects.
pub fn normalize_document(value: &Value, now: DateTime<Utc>) -> Result<Vec<LogRecord>> {
    match value {
        Value::Object(row) => Ok(vec![LogRecord::from_object(row, now)]),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| match item {
                Value::Object(row) => Ok(LogRecord::from_object(row, now)),
                other => bail!("element {idx} is {}, expected an object", json_kind(other)),
            })
            .collect(),
        other => bail!(
            "document is {}, expected an object or an array of objects",
            json_kind(other)
        ),
    }
}

pub fn normalize_bytes(bytes: &[u8], now: DateTime<Utc>) -> Result<Vec<LogRecord>> {
    let value: Value = serde_json::from_slice(bytes).context("invalid JSON")?;
    normalize_document(&value, now)
}

/// Coerce a raw `elapse_time` into a non-negative finite number, or 0.
pub fn coerce_elapse_time(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => 0.0,
    }
}

pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => {
            let raw = n.as_f64().filter(|v| v.is_finite())?;
            let millis = if raw.abs() > EPOCH_MILLIS_THRESHOLD {
                raw
            } else {
                raw * 1000.0
            };
            DateTime::from_timestamp_millis(millis as i64)
        }
        _ => None,
    }
}

pub fn parse_timestamp_str(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(input, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(input, format) {
            return Some(parsed.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(input, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

fn text_or(value: Option<&Value>, default: &str) -> String {
    match value {
        None | Some(Value::Null) => default.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Ordered collection of normalized records. Rebuilt from source on every load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LogTable {
    records: Vec<LogRecord>,
}

impl LogTable {
    pub fn new(records: Vec<LogRecord>) -> Self {
        Self { records }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &'static [&'static str] {
        &COLUMNS
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LogRecord> {
        self.records.iter()
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = LogRecord>) {
        self.records.extend(records);
    }
}

impl FromIterator<LogRecord> for LogTable {
    fn from_iter<I: IntoIterator<Item = LogRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a LogTable {
    type Item = &'a LogRecord;
    type IntoIter = std::slice::Iter<'a, LogRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
