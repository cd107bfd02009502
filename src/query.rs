use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::record::{LogRecord, LogTable};

pub const BUCKET_MINUTES: i64 = 10;
pub const DEFAULT_TOP_K: usize = 10;

/// Inclusive `[start, end]` window over record timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// From the first instant of `start` to the last microsecond of `end`.
    pub fn days(start: NaiveDate, end: NaiveDate) -> Self {
        let start_at = start.and_time(NaiveTime::MIN).and_utc();
        let end_at =
            end.and_time(NaiveTime::MIN).and_utc() + Duration::days(1) - Duration::microseconds(1);
        Self::new(start_at, end_at)
    }

    /// Yesterday through today.
    pub fn default_days(today: NaiveDate) -> Self {
        let yesterday = today.pred_opt().unwrap_or(today);
        Self::days(yesterday, today)
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts <= self.end
    }

    pub fn filter(&self, table: &LogTable) -> LogTable {
        table
            .iter()
            .filter(|r| self.contains(&r.timestamp))
            .cloned()
            .collect()
    }
}

/// Keep rows whose `cfg_path` is selected. An empty selection keeps everything.
pub fn filter_cfg_paths(table: &LogTable, selected: &[String]) -> LogTable {
    if selected.is_empty() {
        return table.clone();
    }
    let selected: HashSet<&str> = selected.iter().map(String::as_str).collect();
    table
        .iter()
        .filter(|r| selected.contains(r.cfg_path.as_str()))
        .cloned()
        .collect()
}

/// Distinct `cfg_path` values in first-seen order.
pub fn cfg_path_options(table: &LogTable) -> Vec<String> {
    let mut seen = HashSet::new();
    table
        .iter()
        .filter(|r| seen.insert(r.cfg_path.as_str()))
        .map(|r| r.cfg_path.clone())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketAverage {
    pub bucket: DateTime<Utc>,
    pub cfg_path: String,
    pub avg_elapse_time: f64,
    pub count: usize,
}

pub fn bucket_start(ts: &DateTime<Utc>) -> DateTime<Utc> {
    let width = BUCKET_MINUTES * 60;
    let floored = ts.timestamp().div_euclid(width) * width;
    DateTime::from_timestamp(floored, 0).unwrap_or(*ts)
}

/// Mean `elapse_time` per (10-minute bucket, cfg_path). Buckets without rows
/// are absent. Sorted by bucket, then cfg_path.
pub fn windowed_average(table: &LogTable) -> Vec<BucketAverage> {
    let mut groups: BTreeMap<(DateTime<Utc>, &str), (f64, usize)> = BTreeMap::new();
    for record in table {
        let entry = groups
            .entry((bucket_start(&record.timestamp), record.cfg_path.as_str()))
            .or_insert((0.0, 0));
        entry.0 += record.elapse_time;
        entry.1 += 1;
    }

    groups
        .into_iter()
        .map(|((bucket, cfg_path), (sum, count))| BucketAverage {
            bucket,
            cfg_path: cfg_path.to_string(),
            avg_elapse_time: sum / count as f64,
            count,
        })
        .collect()
}

/// The `k` slowest rows, ties kept in input order.
pub fn top_k(table: &LogTable, k: usize) -> Vec<LogRecord> {
    let mut rows = table.records().to_vec();
    rows.sort_by(|a, b| b.elapse_time.total_cmp(&a.elapse_time));
    rows.truncate(k);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, s).unwrap()
    }

    fn row(ts: DateTime<Utc>, cfg_path: &str, elapse_time: f64, sql: &str) -> LogRecord {
        LogRecord {
            timestamp: ts,
            app_name: "app".into(),
            elapse_time,
            user_ip: "10.0.0.1".into(),
            cfg_path: cfg_path.into(),
            sql: sql.into(),
        }
    }

    #[test]
    fn time_range_is_inclusive_on_both_ends() {
        let range = TimeRange::new(at(10, 0, 0), at(11, 0, 0));
        let table = LogTable::new(vec![
            row(at(9, 59, 59), "/a", 1.0, "q0"),
            row(at(10, 0, 0), "/a", 1.0, "q1"),
            row(at(10, 30, 0), "/a", 1.0, "q2"),
            row(at(11, 0, 0), "/a", 1.0, "q3"),
            row(at(11, 0, 1), "/a", 1.0, "q4"),
        ]);
        let kept: Vec<String> = range.filter(&table).iter().map(|r| r.sql.clone()).collect();
        assert_eq!(kept, vec!["q1", "q2", "q3"]);
    }

    #[test]
    fn day_range_covers_whole_days() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
        let range = TimeRange::default_days(today);
        assert_eq!(range.start, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        assert!(range.contains(
            &Utc.with_ymd_and_hms(2025, 3, 2, 23, 59, 59).unwrap()
        ));
        assert!(!range.contains(&Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap()));
    }

    #[test]
    fn cfg_filter_and_options() {
        let table = LogTable::new(vec![
            row(at(10, 0, 0), "/b", 1.0, "q1"),
            row(at(10, 1, 0), "/a", 2.0, "q2"),
            row(at(10, 2, 0), "/b", 3.0, "q3"),
            row(at(10, 3, 0), "/c", 4.0, "q4"),
        ]);
        assert_eq!(cfg_path_options(&table), vec!["/b", "/a", "/c"]);

        let unfiltered = filter_cfg_paths(&table, &[]);
        assert_eq!(unfiltered, table);

        let only_b = filter_cfg_paths(&table, &["/b".to_string()]);
        let sqls: Vec<&str> = only_b.iter().map(|r| r.sql.as_str()).collect();
        assert_eq!(sqls, vec!["q1", "q3"]);

        let none = filter_cfg_paths(&table, &["/zzz".to_string()]);
        assert!(none.is_empty());
    }

    #[test]
    fn two_records_minutes_apart_share_a_bucket() {
        let table = LogTable::new(vec![
            row(at(10, 21, 0), "/a", 100.0, "q1"),
            row(at(10, 23, 0), "/a", 50.0, "q2"),
        ]);
        let averages = windowed_average(&table);
        assert_eq!(
            averages,
            vec![BucketAverage {
                bucket: at(10, 20, 0),
                cfg_path: "/a".into(),
                avg_elapse_time: 75.0,
                count: 2,
            }]
        );
    }

    #[test]
    fn buckets_split_by_window_and_cfg_path() {
        let table = LogTable::new(vec![
            row(at(10, 9, 59), "/b", 4.0, "q1"),
            row(at(10, 10, 0), "/a", 6.0, "q2"),
            row(at(10, 5, 0), "/a", 2.0, "q3"),
            row(at(10, 40, 0), "/a", 8.0, "q4"),
        ]);
        let averages = windowed_average(&table);
        let keys: Vec<(DateTime<Utc>, &str, f64)> = averages
            .iter()
            .map(|a| (a.bucket, a.cfg_path.as_str(), a.avg_elapse_time))
            .collect();
        assert_eq!(
            keys,
            vec![
                (at(10, 0, 0), "/a", 2.0),
                (at(10, 0, 0), "/b", 4.0),
                (at(10, 10, 0), "/a", 6.0),
                (at(10, 40, 0), "/a", 8.0),
            ]
        );
    }

    #[test]
    fn top_k_is_stable_among_ties() {
        let mut rows = Vec::new();
        for i in 0..12 {
            let elapse = if i % 3 == 0 { 9.0 } else { 5.0 };
            rows.push(row(at(10, i, 0), "/a", elapse, &format!("q{i}")));
        }
        let table = LogTable::new(rows);
        let top: Vec<String> = top_k(&table, DEFAULT_TOP_K)
            .into_iter()
            .map(|r| r.sql)
            .collect();
        assert_eq!(
            top,
            vec!["q0", "q3", "q6", "q9", "q1", "q2", "q4", "q5", "q7", "q8"]
        );
    }

    #[test]
    fn top_k_with_fewer_rows_returns_all_sorted() {
        let table = LogTable::new(vec![
            row(at(10, 0, 0), "/a", 1.0, "slow?"),
            row(at(10, 1, 0), "/a", 30.0, "slowest"),
        ]);
        let top = top_k(&table, 10);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].sql, "slowest");
        assert!(top_k(&LogTable::empty(), 10).is_empty());
    }
}
