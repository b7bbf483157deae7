use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use framecache::{
    open, AppConfig, Args, AsyncRow, ConfigManager, Deferred, Frame, OpenOptions, RowsQuery,
    Value, APP_NAME,
};
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn init_logging(debug: bool) {
    let default = if debug {
        "framecache=debug,warn"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn handle_early_exit_flags(args: &Args) -> Result<Option<()>> {
    if args.init_config {
        let manager = ConfigManager::new(APP_NAME)?;
        let path = manager.write_default_config(args.force)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(Some(()));
    }
    Ok(None)
}

fn info_lines(frame: &dyn Frame) -> Vec<String> {
    let mut lines = vec![
        format!(
            "columns: {}",
            frame.header().iter().collect::<Vec<_>>().join(", ")
        ),
        format!("rows: {}", frame.num_rows()),
    ];
    let groups = frame.row_groups();
    if groups.is_empty() {
        lines.push("groups: none (held in memory)".to_string());
    }
    for group in groups {
        lines.push(format!(
            "group {}: rows {}..{}",
            group.index, group.row_start, group.row_end
        ));
    }
    lines
}

fn print_info(frame: &dyn Frame) {
    for line in info_lines(frame) {
        println!("{}", line);
    }
    println!();
}

/// Pump `frame` until every row settles or `timeout` passes. Returns whether
/// everything settled.
fn wait_for(frame: &dyn Frame, rows: &[AsyncRow], poll: Duration, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if rows.iter().all(AsyncRow::is_settled) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        frame.pump(Some(poll.min(deadline - now)));
    }
}

fn render_cell(cell: &Deferred<Value>) -> String {
    if let Some(value) = cell.get() {
        return value.to_string();
    }
    match cell.rejected() {
        Some(err) => format!("<error: {}>", err),
        None => "<pending>".to_string(),
    }
}

fn render_index(row: &AsyncRow) -> String {
    match row.index().resolved() {
        Some(index) => index.to_string(),
        None => "?".to_string(),
    }
}

fn print_table(frame: &dyn Frame, rows: &[AsyncRow]) {
    let mut header = vec!["#".to_string()];
    header.extend(frame.header().iter().map(str::to_string));
    println!("{}", header.join("\t"));
    for row in rows {
        let mut line = vec![render_index(row)];
        line.extend(row.cells().iter().map(render_cell));
        println!("{}", line.join("\t"));
    }
}

fn json_cell(cell: &Deferred<Value>) -> Result<serde_json::Value> {
    if let Some(value) = cell.get() {
        return Ok(serde_json::to_value(value.as_ref())?);
    }
    Ok(match cell.rejected() {
        Some(err) => serde_json::json!({ "error": err.to_string() }),
        None => serde_json::Value::Null,
    })
}

fn print_json(rows: &[AsyncRow]) -> Result<()> {
    for row in rows {
        if let Some(materialized) = row.values() {
            println!("{}", serde_json::to_string(&materialized)?);
            continue;
        }
        let mut object = serde_json::Map::new();
        for (column, cell) in row.header().iter().zip(row.cells()) {
            object.insert(column.to_string(), json_cell(cell)?);
        }
        println!("{}", serde_json::Value::Object(object));
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let config = AppConfig::load(APP_NAME)?;
    let path = args
        .path
        .as_deref()
        .ok_or_else(|| eyre!("A file path is required"))?;
    let opts = OpenOptions::from_args(args, &config);
    let frame = open(path, &opts)?;

    if args.info {
        print_info(frame.as_ref());
    }

    let end = match args.end {
        Some(end) => end,
        None => (args.start + config.display.window).min(frame.num_rows()),
    };
    let mut query = RowsQuery::range(args.start, end);
    if let Some(column) = args.order_by.as_deref() {
        query = query.order_by(column);
    }
    let rows = frame.rows(query)?;

    if !wait_for(frame.as_ref(), &rows, config.poll_interval(), config.timeout()) {
        warn!(
            "gave up waiting after {} ms; unfinished cells are shown as pending",
            config.display.timeout_ms
        );
    }

    if args.json {
        print_json(&rows)?;
    } else {
        print_table(frame.as_ref(), &rows);
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    color_eyre::install()?;
    init_logging(args.debug);

    if let Some(()) = handle_early_exit_flags(&args)? {
        return Ok(());
    }

    run(&args)
}
