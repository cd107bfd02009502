use anyhow::Result;
use chrono::Utc;
use clap::Args;
use comfy_table::{Cell, CellAlignment};
use serde::Serialize;

use crate::args::{BaseArgs, WindowArgs};
use crate::context::AppContext;
use crate::query::{
    filter_cfg_paths, top_k, windowed_average, BucketAverage, TimeRange, DEFAULT_TOP_K,
};
use crate::record::LogRecord;
use crate::store::{LoadReport, SkippedSource, SourceKind};
use crate::ui::{
    apply_column_padding, header, print_command_status, print_with_pager, styled_table, truncate,
    with_spinner, CommandStatus,
};

const SQL_COLUMN_WIDTH: usize = 60;

#[derive(Debug, Clone, Args)]
pub struct TopArgs {
    #[command(flatten)]
    window: WindowArgs,

    /// Number of slowest queries to show
    #[arg(long, short = 'n', default_value_t = DEFAULT_TOP_K)]
    limit: usize,
}

#[derive(Debug, Serialize)]
struct TopOutput<'a> {
    source: SourceKind,
    range: &'a TimeRange,
    cfg_paths: &'a [String],
    columns: &'static [&'static str],
    records: usize,
    sources_read: usize,
    skipped: &'a [SkippedSource],
    #[serde(skip_serializing_if = "Option::is_none")]
    unavailable: Option<&'a str>,
    averages: &'a [BucketAverage],
    top: &'a [LogRecord],
}

pub async fn run(base: BaseArgs, args: TopArgs) -> Result<()> {
    let ctx = AppContext::from_base(&base)?;
    ctx.report_notices();
    let range = args.window.range(Utc::now().date_naive())?;
    let source = args.window.source;

    let report: LoadReport = with_spinner(
        &format!("Loading records from {}...", source.label()),
        ctx.sources.load(source, &range),
    )
    .await;

    let table = filter_cfg_paths(&report.table, &args.window.cfg_paths);
    let averages = windowed_average(&table);
    let top = top_k(&table, args.limit);

    if base.json {
        let output = TopOutput {
            source,
            range: &range,
            cfg_paths: &args.window.cfg_paths,
            columns: table.columns(),
            records: table.len(),
            sources_read: report.sources_read,
            skipped: &report.skipped,
            unavailable: report.unavailable.as_deref(),
            averages: &averages,
            top: &top,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if let Some(reason) = &report.unavailable {
        print_command_status(
            CommandStatus::Warning,
            &format!("{} unavailable: {reason}", source.label()),
        );
    }
    for skipped in &report.skipped {
        tracing::info!(source = %skipped.source, reason = %skipped.reason, "skipped");
    }
    print_command_status(CommandStatus::Success, &report.summary());

    if table.is_empty() {
        print_command_status(CommandStatus::Warning, "No records in the selected window");
        return Ok(());
    }

    let output = format!(
        "10-minute average elapse time\n{}\n\nTop {} slowest queries\n{}",
        render_averages(&averages),
        top.len(),
        render_top(&top)
    );
    print_with_pager(&output)?;
    Ok(())
}

fn render_averages(averages: &[BucketAverage]) -> String {
    let mut table = styled_table();
    table.set_header(vec![
        header("Window"),
        header("cfg_path"),
        header("Avg elapse"),
        header("Rows"),
    ]);
    for point in averages {
        table.add_row(vec![
            Cell::new(point.bucket.format("%Y-%m-%d %H:%M")),
            Cell::new(&point.cfg_path),
            Cell::new(format!("{:.3}", point.avg_elapse_time)).set_alignment(CellAlignment::Right),
            Cell::new(point.count).set_alignment(CellAlignment::Right),
        ]);
    }
    apply_column_padding(&mut table, (0, 2));
    table.to_string()
}

fn render_top(rows: &[LogRecord]) -> String {
    let mut table = styled_table();
    table.set_header(vec![
        header("#"),
        header("Elapse"),
        header("Timestamp"),
        header("App"),
        header("cfg_path"),
        header("SQL"),
    ]);
    for (idx, row) in rows.iter().enumerate() {
        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(format!("{:.3}", row.elapse_time)).set_alignment(CellAlignment::Right),
            Cell::new(row.timestamp.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&row.app_name),
            Cell::new(&row.cfg_path),
            Cell::new(truncate(&row.sql, SQL_COLUMN_WIDTH)),
        ]);
    }
    apply_column_padding(&mut table, (0, 2));
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(min: u32, elapse_time: f64, sql: &str) -> LogRecord {
        LogRecord {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 10, min, 0).unwrap(),
            app_name: "billing".into(),
            elapse_time,
            user_ip: "10.0.0.1".into(),
            cfg_path: "/svc/a".into(),
            sql: sql.into(),
        }
    }

    #[test]
    fn top_table_ranks_and_truncates() {
        let long_sql = format!("select {} from t", "col, ".repeat(40));
        let rendered = render_top(&[row(1, 12.5, &long_sql), row(2, 3.0, "select 1")]);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("Elapse"));
        assert!(lines[1].contains("12.500"));
        assert!(lines[1].contains('…'));
        assert!(lines[2].contains("select 1"));
    }

    #[test]
    fn averages_table_has_one_line_per_point() {
        let averages = vec![BucketAverage {
            bucket: Utc.with_ymd_and_hms(2025, 3, 1, 10, 20, 0).unwrap(),
            cfg_path: "/svc/a".into(),
            avg_elapse_time: 75.0,
            count: 2,
        }];
        let rendered = render_averages(&averages);
        assert!(rendered.contains("2025-03-01 10:20"));
        assert!(rendered.contains("75.000"));
        assert_eq!(rendered.lines().count(), 2);
    }

    #[test]
    fn json_output_shape() {
        let top = vec![row(1, 2.0, "select 1")];
        let range = TimeRange::days(
            chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        );
        let output = TopOutput {
            source: SourceKind::Blob,
            range: &range,
            cfg_paths: &[],
            columns: &crate::record::COLUMNS,
            records: 1,
            sources_read: 1,
            skipped: &[],
            unavailable: None,
            averages: &[],
            top: &top,
        };
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["source"], "blob");
        assert_eq!(value["top"][0]["sql"], "select 1");
        assert_eq!(value["top"][0]["elapse_time"], 2.0);
        assert!(value.get("unavailable").is_none());
        assert_eq!(value["columns"].as_array().unwrap().len(), 6);
    }
}
