use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reel_api::{MemoryBackend, ResourceKind};
use reel_core::{compute_window, FilterValue, PageWindow, QueryState, SortOrder};
use reel_engine::{EngineConfig, ListController, ListView};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "reelctl", version, about = "Reel CLI: paginated list screens over fixture data")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the page buttons a pager would show
    Window {
        /// Current page (1-based)
        page: u32,
        /// Number of pages
        total_pages: u32,
        /// Maximum buttons to show (default: REEL_PAGE_BUTTONS or 5)
        #[arg(long = "buttons")]
        buttons: Option<u32>,
    },
    /// Render one page of a resource list from a JSON fixture file
    List {
        /// Resource, e.g. "showtimes" or "movies"
        resource: String,
        /// Fixture file: {"movies": [...], "halls": [...], ...}
        #[arg(long = "fixtures", env = "REEL_FIXTURES")]
        fixtures: std::path::PathBuf,
        #[arg(long = "page", default_value_t = 1)]
        page: u32,
        /// Rows per page (default: REEL_PER_PAGE or 20)
        #[arg(long = "per-page")]
        per_page: Option<u32>,
        /// Sort column; repeat to toggle direction
        #[arg(long = "sort")]
        sort: Vec<String>,
        /// Filter as key=value; "all" clears the key
        #[arg(long = "filter")]
        filter: Vec<String>,
        /// Free-text search
        #[arg(long = "search")]
        search: Option<String>,
        /// Maximum page buttons
        #[arg(long = "buttons")]
        buttons: Option<u32>,
    },
}

fn init_tracing() {
    let env = std::env::var("REEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("REEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid REEL_METRICS_ADDR; expected host:port");
        }
    }
}

fn parse_filter(raw: &str) -> Result<(String, FilterValue)> {
    let (k, v) = raw.split_once('=').ok_or_else(|| anyhow!("filter {:?}: expected key=value", raw))?;
    let k = k.trim();
    if k.is_empty() {
        bail!("filter {:?}: empty key", raw);
    }
    Ok((k.to_string(), FilterValue::parse(v.trim())))
}

/// Query the list starts from. The first `--sort` selects its column
/// ascending; naming a column again flips its direction.
fn initial_query(kind: ResourceKind, per_page: u32, sort: &[String]) -> QueryState {
    let base = QueryState::new(per_page);
    match sort.split_first() {
        None => match kind.default_sort() {
            Some(field) => base.sorted_by(field, SortOrder::Asc),
            None => base,
        },
        Some((first, rest)) => rest.iter().fold(base.sorted_by(first, SortOrder::Asc), |q, field| q.with_sort(field)),
    }
}

fn render_window(w: &PageWindow, current: u32, total_pages: u32) -> String {
    if w.is_hidden() {
        return String::new();
    }
    let mut parts = Vec::with_capacity(w.pages.len() + 2);
    parts.push(if current > 1 { "«".to_string() } else { " ".to_string() });
    for p in &w.pages {
        parts.push(if *p == current { format!("[{}]", p) } else { p.to_string() });
    }
    parts.push(if current < total_pages { "»".to_string() } else { " ".to_string() });
    parts.join(" ")
}

fn print_human(kind: ResourceKind, view: &ListView) {
    let label = kind.label_field();
    let ref_cols: Vec<&str> = view.references.first().map(|r| r.iter().map(|(c, _)| c.as_str()).collect()).unwrap_or_default();
    let mut header = format!("{:<6} {:<28}", "ID", label.to_uppercase());
    for c in &ref_cols {
        header.push_str(&format!(" {:<20}", c.to_uppercase()));
    }
    println!("{}", header.trim_end());
    for (i, row) in view.rows.iter().enumerate() {
        let name = row.display_field(label).unwrap_or_else(|| "-".to_string());
        let mut line = format!("{:<6} {:<28}", row.id, name);
        if let Some(refs) = view.references.get(i) {
            for (_, l) in refs {
                line.push_str(&format!(" {:<20}", l));
            }
        }
        println!("{}", line.trim_end());
    }
    let total = view.total.unwrap_or(0);
    let pages = view.query.total_pages(total);
    println!("-- page {}/{} • {} rows total", view.query.page(), pages.max(1), total);
    let pager = render_window(&view.page_window, view.query.page(), pages);
    if !pager.is_empty() {
        println!("{}", pager.trim_end());
    }
    if let Some(e) = &view.error {
        println!("error: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let base = EngineConfig::from_env();

    match cli.command {
        Commands::Window { page, total_pages, buttons } => {
            let buttons = buttons.unwrap_or(base.max_buttons);
            if page == 0 || buttons == 0 {
                bail!("page and --buttons must be at least 1");
            }
            let pages = compute_window(page, total_pages, buttons);
            match cli.output {
                Output::Human => {
                    let w = PageWindow::compute(page, total_pages, buttons);
                    if w.is_hidden() {
                        println!("(single page; pager hidden)");
                    } else {
                        println!("{}", render_window(&w, page.min(total_pages), total_pages).trim_end());
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&pages)?),
            }
        }
        Commands::List { resource, fixtures, page, per_page, sort, filter, search, buttons } => {
            let kind = ResourceKind::parse(&resource).ok_or_else(|| {
                let known: Vec<&str> = ResourceKind::ALL.iter().map(|k| k.path()).collect();
                anyhow!("unknown resource {:?}; expected one of: {}", resource, known.join(", "))
            })?;
            if page == 0 {
                bail!("--page must be at least 1");
            }
            let filters = filter.iter().map(|f| parse_filter(f)).collect::<Result<Vec<_>>>()?;

            let t0 = Instant::now();
            let text = std::fs::read_to_string(&fixtures).with_context(|| format!("reading fixtures {}", fixtures.display()))?;
            let doc: serde_json::Value = serde_json::from_str(&text).with_context(|| format!("parsing fixtures {}", fixtures.display()))?;
            let backend = Arc::new(MemoryBackend::from_json(&doc).context("loading fixtures")?);
            info!(path = %fixtures.display(), took_ms = %t0.elapsed().as_millis(), "fixtures loaded");

            let mut config = base;
            if let Some(n) = per_page {
                config = config.with_per_page(n);
            }
            if let Some(n) = buttons {
                config = config.with_max_buttons(n);
            }
            let initial = initial_query(kind, config.per_page, &sort);
            let mut list = ListController::with_state(kind, config, backend.pages(kind), initial).with_references(backend.clone());
            list.mount().await;
            list.settle().await;

            for (k, v) in filters {
                list.on_filter_change(&k, v);
            }
            if let Some(term) = search.as_deref() {
                list.on_search_submit(term);
            }
            list.settle().await;
            if page > 1 {
                list.on_page_change(page);
                list.settle().await;
                if list.query().page() != page {
                    warn!(requested = page, shown = list.query().page(), "page out of range; showing last page");
                }
            }

            let view = list.view();
            list.unmount();
            match cli.output {
                Output::Human => print_human(kind, &view),
                Output::Json => println!("{}", serde_json::to_string_pretty(&view)?),
            }
            if let Some(e) = view.error {
                bail!("{}: {}", kind, e);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_args_parse() {
        let (k, v) = parse_filter("format=3D").unwrap();
        assert_eq!(k, "format");
        assert_eq!(v, FilterValue::Text("3D".into()));
        assert_eq!(parse_filter(" status = all ").unwrap().1, FilterValue::All);
        assert!(parse_filter("nokey").is_err());
        assert!(parse_filter("=x").is_err());
    }

    #[test]
    fn first_sort_flag_is_ascending() {
        let q = initial_query(ResourceKind::Movies, 10, &["title".to_string()]);
        assert_eq!((q.sort_field(), q.sort_order()), (Some("title"), SortOrder::Asc));
        let q = initial_query(ResourceKind::Movies, 10, &["title".to_string(), "title".to_string()]);
        assert_eq!(q.sort_order(), SortOrder::Desc);
        let q = initial_query(ResourceKind::Movies, 10, &["release_date".to_string(), "title".to_string()]);
        assert_eq!((q.sort_field(), q.sort_order()), (Some("title"), SortOrder::Asc));
    }

    #[test]
    fn no_sort_flag_uses_screen_default() {
        let q = initial_query(ResourceKind::Showtimes, 20, &[]);
        assert_eq!((q.sort_field(), q.sort_order()), (Some("start_time"), SortOrder::Asc));
        assert_eq!(q.per_page(), 20);
    }

    #[test]
    fn pager_marks_current_page() {
        let w = PageWindow::compute(4, 7, 5);
        assert_eq!(render_window(&w, 4, 7), "« 2 3 [4] 5 6 »");
        assert_eq!(render_window(&PageWindow::compute(7, 7, 5), 7, 7), "« 3 4 5 6 [7]");
        assert_eq!(render_window(&PageWindow::compute(1, 1, 5), 1, 1), "");
    }
}
