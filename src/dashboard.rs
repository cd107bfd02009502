use std::collections::BTreeMap;
use std::io::{self, IsTerminal};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::prelude::Frame;
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols::Marker;
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Axis, Block, BorderType, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table,
    TableState, Wrap,
};
use ratatui::Terminal;

use crate::args::{BaseArgs, WindowArgs};
use crate::context::AppContext;
use crate::fetch::{spawn_periodic_fetch, LogFetcher, PeriodicFetch};
use crate::query::{
    cfg_path_options, filter_cfg_paths, top_k, windowed_average, BucketAverage, TimeRange,
    DEFAULT_TOP_K,
};
use crate::record::{LogRecord, LogTable};
use crate::store::{LoadReport, SourceKind};
use crate::ui::truncate;

const LOADER_DELAY: Duration = Duration::from_millis(250);
const SERIES_COLORS: [Color; 6] = [
    Color::Cyan,
    Color::Yellow,
    Color::Magenta,
    Color::Green,
    Color::LightBlue,
    Color::LightRed,
];
const BUCKET_SECS: f64 = 600.0;

#[derive(Debug, Clone, Args)]
pub struct DashboardArgs {
    #[command(flatten)]
    window: WindowArgs,

    /// Endpoint polled when periodic fetching is switched on with `f`
    #[arg(long, env = "SQLTUNE_FETCH_URL")]
    fetch_url: Option<String>,
}

/// Work the event loop must start on behalf of a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Quit,
    Reload,
    Tune,
    ToggleFetch,
}

struct DashboardApp {
    source: SourceKind,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    range: TimeRange,
    table: LogTable,
    cfg_options: Vec<String>,
    cfg_selection: Vec<String>,
    cfg_cursor: Option<usize>,
    averages: Vec<BucketAverage>,
    top: Vec<LogRecord>,
    visible_rows: usize,
    selected: usize,
    selected_sql: Option<String>,
    tuning_sql: Option<String>,
    tune_result: Option<String>,
    tune_rx: Option<Receiver<String>>,
    load_rx: Option<Receiver<LoadReport>>,
    load_started_at: Option<Instant>,
    last_load: Option<Instant>,
    reload_pending: bool,
    refresh_interval: Duration,
    fetch_url: Option<String>,
    fetch: Option<PeriodicFetch>,
    fetch_rx: Option<Receiver<Result<String>>>,
    status: String,
    status_is_error: bool,
    spinner_tick: usize,
    advisor_ready: bool,
}

impl DashboardApp {
    fn new(
        window: WindowArgs,
        today: NaiveDate,
        fetch_url: Option<String>,
        refresh_interval: Duration,
    ) -> Result<Self> {
        let range = window.range(today)?;
        Ok(Self {
            source: window.source,
            from: window.from,
            to: window.to,
            range,
            table: LogTable::empty(),
            cfg_options: Vec::new(),
            cfg_selection: window.cfg_paths,
            cfg_cursor: None,
            averages: Vec::new(),
            top: Vec::new(),
            visible_rows: 0,
            selected: 0,
            selected_sql: None,
            tuning_sql: None,
            tune_result: None,
            tune_rx: None,
            load_rx: None,
            load_started_at: None,
            last_load: None,
            reload_pending: false,
            refresh_interval,
            fetch_url,
            fetch: None,
            fetch_rx: None,
            status: "Loading...".to_string(),
            status_is_error: false,
            spinner_tick: 0,
            advisor_ready: false,
        })
    }

    /// Open-ended windows follow the calendar, so a long-running dashboard
    /// picks up each new day.
    fn refresh_range(&mut self, today: NaiveDate) {
        if self.from.is_some() && self.to.is_some() {
            return;
        }
        let window = WindowArgs {
            source: self.source,
            from: self.from,
            to: self.to,
            cfg_paths: Vec::new(),
        };
        match window.range(today) {
            Ok(range) => self.range = range,
            Err(err) => tracing::debug!(error = %err, "keeping previous window"),
        }
    }

    fn set_status<S: Into<String>>(&mut self, status: S) {
        self.status = status.into();
        self.status_is_error = false;
    }

    fn set_error<S: Into<String>>(&mut self, status: S) {
        self.status = status.into();
        self.status_is_error = true;
    }

    fn apply_report(&mut self, report: LoadReport) {
        match &report.unavailable {
            Some(reason) => self.set_error(format!("{} unavailable: {reason}", self.source.label())),
            None => self.set_status(format!("Loaded {}", report.summary())),
        }
        self.cfg_options = cfg_path_options(&report.table);
        if self.cfg_cursor.is_some_and(|idx| idx >= self.cfg_options.len()) {
            self.cfg_cursor = None;
        }
        self.table = report.table;
        self.recompute();
    }

    fn recompute(&mut self) {
        let filtered = filter_cfg_paths(&self.table, &self.cfg_selection);
        self.visible_rows = filtered.len();
        self.averages = windowed_average(&filtered);
        self.top = top_k(&filtered, DEFAULT_TOP_K);
        if self.selected >= self.top.len() {
            self.selected = self.top.len().saturating_sub(1);
        }
        self.sync_selected_sql();
    }

    fn sync_selected_sql(&mut self) {
        self.selected_sql = self.top.get(self.selected).map(|row| row.sql.clone());
    }

    fn select_next(&mut self) {
        if self.selected + 1 < self.top.len() {
            self.selected += 1;
            self.sync_selected_sql();
        }
    }

    fn select_prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.sync_selected_sql();
        }
    }

    fn cursor_path(&self) -> Option<&str> {
        self.cfg_cursor
            .and_then(|idx| self.cfg_options.get(idx))
            .map(String::as_str)
    }

    fn move_cfg_cursor(&mut self) {
        if self.cfg_options.is_empty() {
            self.set_error("No cfg_path values loaded");
            return;
        }
        self.cfg_cursor = Some(match self.cfg_cursor {
            Some(idx) => (idx + 1) % self.cfg_options.len(),
            None => 0,
        });
        self.report_cfg_cursor();
    }

    /// Add or remove the path under the cursor; an empty selection means all.
    fn toggle_cfg_path(&mut self) {
        if self.cfg_cursor.is_none() {
            self.move_cfg_cursor();
        }
        let Some(path) = self.cursor_path().map(str::to_string) else {
            return;
        };
        match self.cfg_selection.iter().position(|p| *p == path) {
            Some(idx) => {
                self.cfg_selection.remove(idx);
            }
            None => self.cfg_selection.push(path),
        }
        self.apply_cfg_selection();
    }

    fn clear_cfg_selection(&mut self) {
        self.cfg_selection.clear();
        self.apply_cfg_selection();
    }

    fn apply_cfg_selection(&mut self) {
        self.selected = 0;
        self.recompute();
        self.set_status(format!("cfg_path filter: {}", self.cfg_label()));
    }

    fn report_cfg_cursor(&mut self) {
        let Some(path) = self.cursor_path().map(str::to_string) else {
            return;
        };
        let mark = if self.cfg_selection.contains(&path) {
            "selected"
        } else {
            "not selected"
        };
        self.set_status(format!(
            "cfg_path {path} ({mark}); space toggles, x shows all"
        ));
    }

    fn cfg_label(&self) -> String {
        if self.cfg_selection.is_empty() {
            "all".to_string()
        } else {
            self.cfg_selection.join(", ")
        }
    }

    fn is_loading(&self) -> bool {
        self.load_rx.is_some()
    }

    fn is_tuning(&self) -> bool {
        self.tune_rx.is_some()
    }

    fn fetch_running(&self) -> bool {
        self.fetch.as_ref().is_some_and(PeriodicFetch::is_running)
    }

    fn reload_due(&self) -> bool {
        !self.is_loading()
            && (self.reload_pending
                || self
                    .last_load
                    .is_some_and(|at| at.elapsed() >= self.refresh_interval))
    }

    fn handle_key(&mut self, key: KeyEvent) -> Option<Action> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Some(Action::Quit);
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
            KeyCode::Down | KeyCode::Char('j') => {
                self.select_next();
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.select_prev();
                None
            }
            KeyCode::Enter | KeyCode::Char('t') => Some(Action::Tune),
            KeyCode::Char('s') => {
                self.source = self.source.toggled();
                self.cfg_selection.clear();
                self.cfg_cursor = None;
                self.selected = 0;
                Some(Action::Reload)
            }
            KeyCode::Char('c') => {
                self.move_cfg_cursor();
                None
            }
            KeyCode::Char(' ') => {
                self.toggle_cfg_path();
                None
            }
            KeyCode::Char('x') => {
                self.clear_cfg_selection();
                None
            }
            KeyCode::Char('r') => Some(Action::Reload),
            KeyCode::Char('f') => Some(Action::ToggleFetch),
            _ => None,
        }
    }
}

pub async fn run(base: BaseArgs, args: DashboardArgs) -> Result<()> {
    if !io::stdout().is_terminal() {
        bail!("the dashboard needs an interactive terminal; try `sqltune top` instead");
    }

    let ctx = AppContext::from_base(&base)?;
    let mut app = DashboardApp::new(
        args.window,
        Utc::now().date_naive(),
        args.fetch_url,
        ctx.settings.refresh_interval,
    )?;
    app.advisor_ready = ctx.advisor.is_configured();
    if let Some(notice) = ctx.notices.first() {
        app.set_error(notice.clone());
    }

    let handle = tokio::runtime::Handle::current();
    tokio::task::block_in_place(|| run_interactive_blocking(app, ctx, handle))
}

fn run_interactive_blocking(
    mut app: DashboardApp,
    ctx: AppContext,
    handle: tokio::runtime::Handle,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    start_load(&mut app, &ctx, &handle);
    let result = run_app(&mut terminal, &mut app, &ctx, &handle);

    if let Some(mut fetch) = app.fetch.take() {
        fetch.stop();
        if let Err(err) = handle.block_on(fetch.wait()) {
            tracing::debug!(error = %format!("{err:#}"), "periodic fetch did not shut down cleanly");
        }
    }
    disable_raw_mode().ok();
    terminal.backend_mut().execute(LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    result
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut DashboardApp,
    ctx: &AppContext,
    handle: &tokio::runtime::Handle,
) -> Result<()> {
    loop {
        poll_pending_load(app);
        poll_pending_tune(app);
        poll_fetch_outcomes(app, ctx, handle);
        if app.reload_due() {
            start_load(app, ctx, handle);
        }
        terminal.draw(|frame| draw_ui(frame, app))?;

        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                match app.handle_key(key) {
                    Some(Action::Quit) => break,
                    Some(Action::Reload) => start_load(app, ctx, handle),
                    Some(Action::Tune) => start_tune(app, ctx, handle),
                    Some(Action::ToggleFetch) => toggle_fetch(app, ctx, handle),
                    None => {}
                }
            }
        }
    }
    Ok(())
}

fn start_load(app: &mut DashboardApp, ctx: &AppContext, handle: &tokio::runtime::Handle) {
    if app.is_loading() {
        app.reload_pending = true;
        return;
    }
    app.reload_pending = false;
    app.refresh_range(Utc::now().date_naive());
    let (tx, rx) = mpsc::channel();
    let sources = ctx.sources.clone();
    let source = app.source;
    let range = app.range;
    handle.spawn(async move {
        let report = sources.load(source, &range).await;
        let _ = tx.send(report);
    });
    app.load_rx = Some(rx);
    app.load_started_at = Some(Instant::now());
    app.last_load = Some(Instant::now());
    app.set_status(format!("Loading records from {}...", source.label()));
}

fn poll_pending_load(app: &mut DashboardApp) {
    let Some(rx) = app.load_rx.as_ref() else {
        return;
    };
    app.spinner_tick = app.spinner_tick.wrapping_add(1);
    match rx.try_recv() {
        Ok(report) => {
            app.load_rx = None;
            app.load_started_at = None;
            app.last_load = Some(Instant::now());
            app.apply_report(report);
        }
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            app.load_rx = None;
            app.load_started_at = None;
            app.set_error("Record load stopped unexpectedly");
        }
    }
}

fn start_tune(app: &mut DashboardApp, ctx: &AppContext, handle: &tokio::runtime::Handle) {
    if app.is_tuning() {
        app.set_status("A tuning request is already in progress");
        return;
    }
    let Some(sql) = app.selected_sql.clone() else {
        app.set_error("Select a query first");
        return;
    };

    let (tx, rx) = mpsc::channel();
    let advisor = ctx.advisor.clone();
    let sql_for_task = sql.clone();
    handle.spawn(async move {
        let suggestion = advisor.tune(&sql_for_task).await;
        let _ = tx.send(suggestion);
    });
    app.tuning_sql = Some(sql);
    app.tune_result = None;
    app.tune_rx = Some(rx);
    app.set_status("Requesting tuning suggestion...");
}

fn poll_pending_tune(app: &mut DashboardApp) {
    let Some(rx) = app.tune_rx.as_ref() else {
        return;
    };
    app.spinner_tick = app.spinner_tick.wrapping_add(1);
    match rx.try_recv() {
        Ok(suggestion) => {
            app.tune_rx = None;
            app.tune_result = Some(suggestion);
            app.set_status("Tuning suggestion ready");
        }
        Err(TryRecvError::Empty) => {}
        Err(TryRecvError::Disconnected) => {
            app.tune_rx = None;
            app.set_error("Tuning request stopped unexpectedly");
        }
    }
}

fn toggle_fetch(app: &mut DashboardApp, ctx: &AppContext, handle: &tokio::runtime::Handle) {
    if let Some(fetch) = app.fetch.take() {
        fetch.stop();
        app.fetch_rx = None;
        app.set_status(format!("Stopped periodic fetch from {}", fetch.url()));
        return;
    }

    let Some(url) = app.fetch_url.clone() else {
        app.set_error("No fetch URL; pass --fetch-url or set SQLTUNE_FETCH_URL");
        return;
    };
    let fetcher = match ctx.require_container().and_then(LogFetcher::new) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(err) => {
            app.set_error(format!("{err:#}"));
            return;
        }
    };

    let (tx, rx) = mpsc::channel();
    let interval = ctx.settings.fetch_interval;
    app.fetch = Some(spawn_periodic_fetch(
        handle,
        fetcher,
        url.clone(),
        interval,
        move |outcome| {
            let _ = tx.send(outcome);
        },
    ));
    app.fetch_rx = Some(rx);
    app.set_status(format!(
        "Fetching {url} every {}s",
        interval.as_secs()
    ));
}

fn poll_fetch_outcomes(app: &mut DashboardApp, ctx: &AppContext, handle: &tokio::runtime::Handle) {
    let mut stored = false;
    while let Some(outcome) = app.fetch_rx.as_ref().and_then(|rx| rx.try_recv().ok()) {
        match outcome {
            Ok(key) => {
                stored = true;
                app.set_status(format!("Stored {key}"));
            }
            Err(err) => app.set_error(format!("URL fetch error: {err:#}")),
        }
    }
    if stored && app.source == SourceKind::Blob {
        start_load(app, ctx, handle);
    }
}

fn spinner_char(tick: usize) -> char {
    match tick % 4 {
        0 => '|',
        1 => '/',
        2 => '-',
        _ => '\\',
    }
}

fn loading_for(started_at: Option<Instant>) -> bool {
    started_at
        .map(|start| start.elapsed() >= LOADER_DELAY)
        .unwrap_or(false)
}

/// One line per cfg_path: (bucket epoch seconds, average), in bucket order.
fn cfg_path_series(averages: &[BucketAverage]) -> Vec<(&str, Vec<(f64, f64)>)> {
    let mut series: BTreeMap<&str, Vec<(f64, f64)>> = BTreeMap::new();
    for point in averages {
        series
            .entry(point.cfg_path.as_str())
            .or_default()
            .push((point.bucket.timestamp() as f64, point.avg_elapse_time));
    }
    series.into_iter().collect()
}

/// Axis bounds covering every point; a single bucket still spans one window.
fn chart_bounds(series: &[(&str, Vec<(f64, f64)>)]) -> ([f64; 2], [f64; 2]) {
    let points = series.iter().flat_map(|(_, points)| points.iter());
    let (mut x_min, mut x_max, mut y_max) = (f64::MAX, f64::MIN, 0.0_f64);
    for (x, y) in points {
        x_min = x_min.min(*x);
        x_max = x_max.max(*x);
        y_max = y_max.max(*y);
    }
    if x_min > x_max {
        return ([0.0, BUCKET_SECS], [0.0, 1.0]);
    }
    if x_max - x_min < BUCKET_SECS {
        x_max = x_min + BUCKET_SECS;
    }
    let y_max = if y_max > 0.0 { y_max * 1.1 } else { 1.0 };
    ([x_min, x_max], [0.0, y_max])
}

fn bucket_label(secs: f64) -> String {
    DateTime::<Utc>::from_timestamp(secs as i64, 0)
        .map(|at| at.format("%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

fn draw_ui(frame: &mut Frame<'_>, app: &DashboardApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(9),
            Constraint::Length(3),
        ])
        .split(frame.area());

    draw_header(frame, chunks[0], app);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[1]);
    draw_averages(frame, body[0], app);
    draw_top_table(frame, body[1], app);

    let detail = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[2]);
    draw_selected_sql(frame, detail[0], app);
    draw_tune_result(frame, detail[1], app);

    let status_style = if app.status_is_error {
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };
    let status = Paragraph::new(Line::from(Span::styled(app.status.as_str(), status_style)))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title_bottom(
                    "↑↓ select  Enter tune  s source  c/space/x cfg_path  r reload  f fetch  q quit",
                ),
        );
    frame.render_widget(status, chunks[3]);
}

fn draw_header(frame: &mut Frame<'_>, area: Rect, app: &DashboardApp) {
    let mut spans = vec![
        Span::styled(
            "Elapse Time Monitor",
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::styled("    ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format!("{} records", app.visible_rows),
            Style::default().fg(Color::Cyan),
        ),
        Span::styled(
            format!(
                "  source: {}  window: {} .. {}  cfg_path: {}",
                app.source.label(),
                app.range.start.format("%Y-%m-%d"),
                app.range.end.format("%Y-%m-%d"),
                app.cfg_label()
            ),
            Style::default().fg(Color::Gray),
        ),
    ];
    if app.fetch_running() {
        spans.push(Span::styled(
            "  [fetching]",
            Style::default().fg(Color::Green),
        ));
    }
    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .title("sqltune dashboard"),
    );
    frame.render_widget(header, area);
}

fn draw_averages(frame: &mut Frame<'_>, area: Rect, app: &DashboardApp) {
    let title = if loading_for(app.load_started_at) {
        format!("10-min avg elapse [loading {}]", spinner_char(app.spinner_tick))
    } else {
        "10-min avg elapse".to_string()
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded);

    let series = cfg_path_series(&app.averages);
    if series.is_empty() {
        let empty = Paragraph::new(Span::styled("No data", Style::default().fg(Color::DarkGray)))
            .block(block);
        frame.render_widget(empty, area);
        return;
    }

    let (x_bounds, y_bounds) = chart_bounds(&series);
    let datasets: Vec<Dataset> = series
        .iter()
        .enumerate()
        .map(|(idx, (cfg_path, points))| {
            Dataset::default()
                .name(*cfg_path)
                .marker(Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(SERIES_COLORS[idx % SERIES_COLORS.len()]))
                .data(points)
        })
        .collect();

    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds(x_bounds)
                .labels([bucket_label(x_bounds[0]), bucket_label(x_bounds[1])]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds(y_bounds)
                .labels(["0".to_string(), format!("{:.1}", y_bounds[1])]),
        )
        .hidden_legend_constraints((Constraint::Ratio(1, 2), Constraint::Ratio(1, 1)));
    frame.render_widget(chart, area);
}

fn draw_top_table(frame: &mut Frame<'_>, area: Rect, app: &DashboardApp) {
    let header = Row::new(vec!["#", "Elapse", "Time", "cfg_path", "SQL"]).style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );
    let sql_width = area.width.saturating_sub(48).max(10) as usize;
    let rows: Vec<Row> = app
        .top
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            Row::new(vec![
                Cell::from(format!("{}", idx + 1)),
                Cell::from(format!("{:.3}", record.elapse_time)),
                Cell::from(record.timestamp.format("%m-%d %H:%M").to_string()),
                Cell::from(truncate(&record.cfg_path, 16)),
                if record.has_sql() {
                    Cell::from(truncate(&record.sql, sql_width))
                } else {
                    Cell::from(record.sql.as_str()).style(Style::default().fg(Color::DarkGray))
                },
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Length(10),
            Constraint::Length(11),
            Constraint::Length(16),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .title(format!("Top {DEFAULT_TOP_K} slowest"))
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded),
    )
    .row_highlight_style(
        Style::default()
            .bg(Color::Rgb(42, 47, 56))
            .add_modifier(Modifier::BOLD),
    );

    let mut state = TableState::default();
    if !app.top.is_empty() {
        state.select(Some(app.selected));
    }
    frame.render_stateful_widget(table, area, &mut state);
}

fn draw_selected_sql(frame: &mut Frame<'_>, area: Rect, app: &DashboardApp) {
    let text = app
        .selected_sql
        .as_deref()
        .unwrap_or("No query selected");
    let panel = Paragraph::new(text).wrap(Wrap { trim: false }).block(
        Block::default()
            .title("Selected SQL")
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded),
    );
    frame.render_widget(panel, area);
}

fn draw_tune_result(frame: &mut Frame<'_>, area: Rect, app: &DashboardApp) {
    let (title, body) = if app.is_tuning() {
        (
            format!("Tuning suggestion [running {}]", spinner_char(app.spinner_tick)),
            format!(
                "Waiting for the completion service...\n\n{}",
                truncate(app.tuning_sql.as_deref().unwrap_or_default(), 200)
            ),
        )
    } else {
        (
            "Tuning suggestion".to_string(),
            match (&app.tune_result, app.advisor_ready) {
                (Some(result), _) => result.clone(),
                (None, true) => "Press Enter to tune the selected query".to_string(),
                (None, false) => {
                    "Set OPENAI_API_KEY and AZURE_ENDPOINT to enable tuning".to_string()
                }
            },
        )
    };
    let panel = Paragraph::new(body).wrap(Wrap { trim: false }).block(
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded),
    );
    frame.render_widget(panel, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use ratatui::backend::TestBackend;

    use crate::context::Settings;
    use crate::config::Config;
    use crate::tune::NOT_CONFIGURED;

    fn row(min: u32, cfg_path: &str, elapse_time: f64, sql: &str) -> LogRecord {
        LogRecord {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 10, min, 0).unwrap(),
            app_name: "app".into(),
            elapse_time,
            user_ip: "10.0.0.1".into(),
            cfg_path: cfg_path.into(),
            sql: sql.into(),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn window(from: Option<NaiveDate>, to: Option<NaiveDate>, cfg_paths: &[&str]) -> WindowArgs {
        WindowArgs {
            source: SourceKind::Local,
            from,
            to,
            cfg_paths: cfg_paths.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn app_with(window: WindowArgs, rows: Vec<LogRecord>) -> DashboardApp {
        let mut app =
            DashboardApp::new(window, day(1), None, Duration::from_secs(600)).expect("window");
        app.apply_report(LoadReport {
            table: LogTable::new(rows),
            sources_read: 1,
            ..LoadReport::default()
        });
        app
    }

    fn sample_rows() -> Vec<LogRecord> {
        vec![
            row(1, "/a", 5.0, "select a"),
            row(2, "/b", 50.0, "select b"),
            row(3, "/a", 20.0, "select c"),
        ]
    }

    fn loaded_app() -> DashboardApp {
        app_with(window(Some(day(1)), Some(day(1)), &[]), sample_rows())
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn render(app: &DashboardApp) -> String {
        let mut terminal = Terminal::new(TestBackend::new(140, 30)).expect("create terminal");
        terminal.draw(|frame| draw_ui(frame, app)).expect("draw");
        let buffer = terminal.backend().buffer();
        let width = buffer.area.width as usize;
        buffer
            .content()
            .chunks(width)
            .map(|line| line.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn selection_drives_selected_sql() {
        let mut app = loaded_app();
        assert_eq!(app.selected_sql.as_deref(), Some("select b"));

        assert_eq!(app.handle_key(key(KeyCode::Down)), None);
        assert_eq!(app.selected_sql.as_deref(), Some("select c"));
        app.handle_key(key(KeyCode::Down));
        app.handle_key(key(KeyCode::Down));
        assert_eq!(app.selected, 2);
        assert_eq!(app.selected_sql.as_deref(), Some("select a"));

        app.handle_key(key(KeyCode::Up));
        assert_eq!(app.selected_sql.as_deref(), Some("select c"));
    }

    #[test]
    fn keys_map_to_actions() {
        let mut app = loaded_app();
        assert_eq!(app.handle_key(key(KeyCode::Enter)), Some(Action::Tune));
        assert_eq!(app.handle_key(key(KeyCode::Char('t'))), Some(Action::Tune));
        assert_eq!(app.handle_key(key(KeyCode::Char('r'))), Some(Action::Reload));
        assert_eq!(app.handle_key(key(KeyCode::Char('f'))), Some(Action::ToggleFetch));
        assert_eq!(app.handle_key(key(KeyCode::Esc)), Some(Action::Quit));
        assert_eq!(
            app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Action::Quit)
        );

        assert_eq!(app.handle_key(key(KeyCode::Char('s'))), Some(Action::Reload));
        assert_eq!(app.source, SourceKind::Blob);
    }

    #[test]
    fn cfg_paths_toggle_individually() {
        let mut app = loaded_app();
        assert_eq!(app.cfg_options, vec!["/a", "/b"]);

        app.handle_key(key(KeyCode::Char('c')));
        assert_eq!(app.cursor_path(), Some("/a"));
        assert!(app.cfg_selection.is_empty());
        assert_eq!(app.visible_rows, 3);

        app.handle_key(key(KeyCode::Char(' ')));
        assert_eq!(app.cfg_selection, vec!["/a"]);
        assert_eq!(app.visible_rows, 2);
        assert_eq!(app.selected_sql.as_deref(), Some("select c"));

        app.handle_key(key(KeyCode::Char('c')));
        app.handle_key(key(KeyCode::Char(' ')));
        assert_eq!(app.cfg_selection, vec!["/a", "/b"]);
        assert_eq!(app.visible_rows, 3);

        app.handle_key(key(KeyCode::Char('c')));
        assert_eq!(app.cursor_path(), Some("/a"));
        app.handle_key(key(KeyCode::Char(' ')));
        assert_eq!(app.cfg_selection, vec!["/b"]);
        assert_eq!(app.top.len(), 1);

        app.handle_key(key(KeyCode::Char('x')));
        assert!(app.cfg_selection.is_empty());
        assert_eq!(app.visible_rows, 3);
    }

    #[test]
    fn multi_path_selection_survives_cursor_moves() {
        let rows = vec![
            row(1, "/a", 5.0, "select a"),
            row(2, "/b", 50.0, "select b"),
            row(3, "/c", 20.0, "select c"),
        ];
        let mut app = app_with(window(Some(day(1)), Some(day(1)), &["/a", "/c"]), rows);
        assert_eq!(app.visible_rows, 2);

        app.handle_key(key(KeyCode::Char('c')));
        app.handle_key(key(KeyCode::Char('c')));
        assert_eq!(app.cursor_path(), Some("/b"));
        assert_eq!(app.cfg_selection, vec!["/a", "/c"]);
        assert!(app.status.contains("not selected"));

        app.handle_key(key(KeyCode::Char(' ')));
        assert_eq!(app.cfg_selection, vec!["/a", "/c", "/b"]);
        assert_eq!(app.visible_rows, 3);
    }

    #[test]
    fn cursor_needs_loaded_paths() {
        let mut app = app_with(window(Some(day(1)), Some(day(1)), &[]), Vec::new());
        app.handle_key(key(KeyCode::Char('c')));
        assert!(app.status_is_error);
        assert_eq!(app.cursor_path(), None);
        app.handle_key(key(KeyCode::Char(' ')));
        assert!(app.cfg_selection.is_empty());
    }

    #[test]
    fn open_window_follows_the_calendar() {
        let mut app = app_with(window(None, None, &[]), Vec::new());
        assert_eq!(app.range, TimeRange::days(day(1) - chrono::Days::new(1), day(1)));

        app.refresh_range(day(2));
        assert_eq!(app.range, TimeRange::days(day(1), day(2)));

        let mut from_only = app_with(window(Some(day(1)), None, &[]), Vec::new());
        from_only.refresh_range(day(5));
        assert_eq!(from_only.range, TimeRange::days(day(1), day(5)));

        let mut fixed = loaded_app();
        fixed.refresh_range(day(9));
        assert_eq!(fixed.range, TimeRange::days(day(1), day(1)));
    }

    #[test]
    fn unavailable_source_shows_error_and_empty_table() {
        let mut app = loaded_app();
        app.apply_report(LoadReport::unavailable("connection refused"));
        assert!(app.status_is_error);
        assert!(app.status.contains("connection refused"));
        assert!(app.top.is_empty());
        assert_eq!(app.selected_sql, None);

        let screen = render(&app);
        assert!(screen.contains("0 records"));
        assert!(screen.contains("No query selected"));
    }

    #[test]
    fn renders_top_rows_and_tune_result() {
        let mut app = loaded_app();
        app.tune_result = Some("add an index on b".into());
        let screen = render(&app);
        assert!(screen.contains("3 records"));
        assert!(screen.contains("Top 10 slowest"));
        assert!(screen.contains("50.000"));
        assert!(screen.contains("select b"));
        assert!(screen.contains("add an index on b"));
    }

    #[test]
    fn reload_waits_for_in_flight_load() {
        let mut app = loaded_app();
        assert!(!app.reload_due());

        let (_tx, rx) = mpsc::channel();
        app.load_rx = Some(rx);
        app.reload_pending = true;
        assert!(!app.reload_due());

        app.load_rx = None;
        assert!(app.reload_due());

        app.reload_pending = false;
        app.refresh_interval = Duration::ZERO;
        app.last_load = Some(Instant::now());
        assert!(app.reload_due());
    }

    #[test]
    fn placeholder_explains_missing_completion_client() {
        let mut app = loaded_app();
        assert!(render(&app).contains("Set OPENAI_API_KEY"));
        app.advisor_ready = true;
        assert!(render(&app).contains("Press Enter to tune"));
    }

    #[test]
    fn series_split_by_cfg_path() {
        let at = |min| Utc.with_ymd_and_hms(2025, 3, 1, 10, min, 0).unwrap();
        let point = |min, cfg_path: &str, avg| BucketAverage {
            bucket: at(min),
            cfg_path: cfg_path.into(),
            avg_elapse_time: avg,
            count: 1,
        };
        let averages = vec![point(0, "/a", 10.0), point(0, "/b", 2.0), point(10, "/a", 4.0)];
        let series = cfg_path_series(&averages);

        let t0 = at(0).timestamp() as f64;
        assert_eq!(
            series,
            vec![
                ("/a", vec![(t0, 10.0), (t0 + 600.0, 4.0)]),
                ("/b", vec![(t0, 2.0)]),
            ]
        );
        let (x, y) = chart_bounds(&series);
        assert_eq!(x, [t0, t0 + 600.0]);
        assert!((y[1] - 11.0).abs() < 1e-9);
        assert_eq!(bucket_label(t0), "03-01 10:00");
    }

    #[test]
    fn single_bucket_still_spans_a_window() {
        let series = vec![("/a", vec![(1200.0, 0.0)])];
        assert_eq!(chart_bounds(&series), ([1200.0, 1800.0], [0.0, 1.0]));
        assert_eq!(chart_bounds(&[]), ([0.0, 600.0], [0.0, 1.0]));
    }

    #[test]
    fn chart_legend_names_each_cfg_path() {
        let app = app_with(
            window(Some(day(1)), Some(day(1)), &[]),
            vec![
                row(1, "/svc/billing/primary", 5.0, "select a"),
                row(12, "/svc/billing/primary", 9.0, "select b"),
                row(3, "/svc/orders/replica", 20.0, "select c"),
            ],
        );
        let screen = render(&app);
        assert!(screen.contains("10-min avg elapse"));
        assert!(screen.contains("/svc/billing/primary"));
        assert!(screen.contains("/svc/orders/replica"));
        assert!(!screen.contains("No data"));

        let empty = app_with(window(Some(day(1)), Some(day(1)), &[]), Vec::new());
        assert!(render(&empty).contains("No data"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tune_runs_in_background_with_selected_sql() {
        let ctx = AppContext::build(Settings::resolve(&BaseArgs::default(), &Config::default()));
        let handle = tokio::runtime::Handle::current();
        let mut app = loaded_app();

        start_tune(&mut app, &ctx, &handle);
        assert!(app.is_tuning());
        assert_eq!(app.tuning_sql.as_deref(), Some("select b"));

        for _ in 0..200 {
            poll_pending_tune(&mut app);
            if !app.is_tuning() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(app.tune_result.as_deref(), Some(NOT_CONFIGURED));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fetch_toggle_requires_url_and_store() {
        let ctx = AppContext::build(Settings::resolve(&BaseArgs::default(), &Config::default()));
        let handle = tokio::runtime::Handle::current();
        let mut app = loaded_app();

        toggle_fetch(&mut app, &ctx, &handle);
        assert!(app.status_is_error);
        assert!(app.status.contains("--fetch-url"));

        app.fetch_url = Some("http://127.0.0.1:9/logs".into());
        toggle_fetch(&mut app, &ctx, &handle);
        assert!(app.status.starts_with("blob storage required"));
        assert!(app.fetch.is_none());
    }
}
