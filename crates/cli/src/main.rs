//! RFM segmentation CLI over Olist-style order exports.
//!
//! Usage:
//!     rfm segment --data-dir data
//!     rfm summary --from 2018-01-01 --to 2018-06-30
//!     rfm summary --window 2017-01-01..2017-12-31 --window 2018-01-01..
//!     rfm insights --interval weekly --top 5 --format json
//!     rfm classify 4 2 4

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rfmkit_explain::{describe_category, render_text, summarize, CategoryProfile};
use rfmkit_filter::{apply_filter, AllOrders, DateRange, OrderFilter};
use rfmkit_insights::{
    customer_states, delivery_timeliness, key_metrics, negative_reviews, orders_by_weekday,
    payment_mix, revenue_trend, review_distribution, top_categories, top_products, TrendInterval,
};
use rfmkit_model::{Order, Segment};
use rfmkit_segment::{classify, segment, MonetaryScope, QuantileEdges, RfmConfig, Segmentation};
use rfmkit_source::{CsvSource, CsvSourceConfig, DataSource, Dataset, DatasetCache};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rfm")]
#[command(about = "RFM customer segmentation over order history")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    data: DataArgs,
}

#[derive(Args)]
struct DataArgs {
    /// Directory holding the Olist CSV exports; missing side tables are skipped
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// Orders CSV export [default: <data-dir>/orders_dataset.csv]
    #[arg(long, global = true)]
    orders: Option<PathBuf>,

    /// Order items CSV export [default: <data-dir>/order_items_dataset.csv]
    #[arg(long, global = true)]
    items: Option<PathBuf>,

    /// First purchase date to include (YYYY-MM-DD)
    #[arg(long, global = true)]
    from: Option<NaiveDate>,

    /// Last purchase date to include (YYYY-MM-DD)
    #[arg(long, global = true)]
    to: Option<NaiveDate>,

    /// Purchase window FROM..TO, either side optional; repeat to compare windows
    #[arg(long = "window", global = true, conflicts_with_all = ["from", "to"])]
    windows: Vec<Window>,

    /// TOML file with segmentation settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Date Recency is measured against (YYYY-MM-DD)
    #[arg(long, global = true)]
    reference_date: Option<NaiveDate>,

    /// Which line items count toward Monetary
    #[arg(long, global = true, value_enum)]
    monetary_scope: Option<ScopeArg>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: Format,
}

impl DataArgs {
    fn source_config(&self) -> CsvSourceConfig {
        let mut config = CsvSourceConfig::olist(&self.data_dir).without_missing_tables();
        if let Some(orders) = &self.orders {
            config.orders_path = orders.clone();
        }
        if let Some(items) = &self.items {
            config.items_path = items.clone();
        }
        config
    }

    /// The `--window` list, or the single `--from`/`--to` window.
    fn windows(&self) -> Vec<Window> {
        if self.windows.is_empty() {
            vec![Window {
                from: self.from,
                to: self.to,
            }]
        } else {
            self.windows.clone()
        }
    }
}

/// Purchase date bounds of one run; both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

impl FromStr for Window {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, to) = s
            .split_once("..")
            .ok_or_else(|| format!("expected FROM..TO, got '{}'", s))?;
        let date = |part: &str| -> Result<Option<NaiveDate>, String> {
            let part = part.trim();
            if part.is_empty() {
                return Ok(None);
            }
            part.parse::<NaiveDate>()
                .map(Some)
                .map_err(|e| format!("invalid date '{}': {}", part, e))
        };

        Ok(Self {
            from: date(from)?,
            to: date(to)?,
        })
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from.is_none() && self.to.is_none() {
            return f.write_str("all orders");
        }
        let side = |date: Option<NaiveDate>| date.map(|d| d.to_string()).unwrap_or_default();
        write!(f, "{}..{}", side(self.from), side(self.to))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Segment every customer
    Segment {
        /// Print at most this many customers
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Category distribution and level mix
    Summary,

    /// Descriptive analytics over the selected orders
    Insights {
        /// Revenue trend bucket (daily, weekly, monthly)
        #[arg(short, long, default_value = "monthly")]
        interval: TrendInterval,

        /// Number of top products, categories and negative reviews
        #[arg(short, long, default_value_t = 10)]
        top: usize,
    },

    /// Category of a single R/F/M ordinal triple
    Classify {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=4))]
        r: u8,
        #[arg(value_parser = clap::value_parser!(u8).range(1..=4))]
        f: u8,
        #[arg(value_parser = clap::value_parser!(u8).range(1..=4))]
        m: u8,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    AllItems,
    FirstItemPerOrder,
}

impl From<ScopeArg> for MonetaryScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::AllItems => MonetaryScope::AllItems,
            ScopeArg::FirstItemPerOrder => MonetaryScope::FirstItemPerOrder,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rfm=info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Classify { r, f, m } => run_classify(*r, *f, *m, cli.data.format),
        command => run_windows(command, &cli.data).await,
    }
}

/// Run a data command once per window against a single cached dataset.
async fn run_windows(command: &Commands, args: &DataArgs) -> Result<()> {
    let format = args.format;
    let config = build_config(args)?;
    let source = CsvSource::new(args.source_config());
    let cache = DatasetCache::default();
    let windows = args.windows();

    let mut reports = Vec::new();
    for window in &windows {
        let (orders, dataset) = load_window(&cache, &source, window).await?;
        if format == Format::Text && windows.len() > 1 {
            println!("== {} ==", window);
        }

        let report = match command {
            Commands::Segment { limit } => run_segment(&orders, &dataset, &config, *limit, format)?,
            Commands::Summary => run_summary(&orders, &dataset, &config, format)?,
            Commands::Insights { interval, top } => {
                run_insights(&orders, &dataset, *interval, *top, format)?
            }
            Commands::Classify { .. } => bail!("classify does not read order data"),
        };
        if let Some(report) = report {
            reports.push((window, report));
        }
    }

    if format == Format::Json {
        let output = if reports.len() == 1 {
            reports.remove(0).1
        } else {
            reports
                .into_iter()
                .map(|(window, report)| {
                    serde_json::json!({ "window": window.to_string(), "report": report })
                })
                .collect()
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    Ok(())
}

/// Defaults, then the TOML file, then flags.
fn build_config(args: &DataArgs) -> Result<RfmConfig> {
    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => RfmConfig::default(),
    };

    if let Some(date) = args.reference_date {
        config = config.with_reference_date(date.and_time(NaiveTime::MIN));
    }
    if let Some(scope) = args.monetary_scope {
        config = config.with_monetary_scope(scope.into());
    }

    config.validate()?;
    tracing::debug!(?config, "Segmentation settings");
    Ok(config)
}

fn read_config(path: &Path) -> Result<RfmConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn parse_config(text: &str) -> Result<RfmConfig> {
    Ok(toml::from_str(text)?)
}

/// Fetch the dataset through the cache and keep the orders inside `window`.
async fn load_window<S: DataSource + Sync>(
    cache: &DatasetCache,
    source: &S,
    window: &Window,
) -> Result<(Vec<Order>, Arc<Dataset>)> {
    let dataset = cache.get_or_load(source).await?;

    let range = match (window.from, window.to) {
        (None, None) => None,
        (from, to) => DateRange::from_bounds(&dataset.orders, from, to)?,
    };
    let filter: Box<dyn OrderFilter> = match range {
        Some(range) => Box::new(range),
        None => Box::new(AllOrders),
    };

    let orders = apply_filter(&dataset.orders, filter.as_ref())?;
    tracing::info!(
        %window,
        selected = orders.len(),
        total = dataset.orders.len(),
        filter = %filter.describe(),
        "Selected orders"
    );

    Ok((orders, dataset))
}

fn run_segmentation(orders: &[Order], dataset: &Dataset, config: &RfmConfig) -> Result<Segmentation> {
    let segmentation = segment(orders, &dataset.items, config)
        .with_context(|| format!("segmenting {} orders", orders.len()))?;
    tracing::info!(customers = segmentation.customers.len(), "Segmented customers");
    Ok(segmentation)
}

/// Print the text report, or return the JSON one.
fn run_segment(
    orders: &[Order],
    dataset: &Dataset,
    config: &RfmConfig,
    limit: Option<usize>,
    format: Format,
) -> Result<Option<Value>> {
    let mut segmentation = run_segmentation(orders, dataset, config)?;
    if let Some(limit) = limit {
        segmentation.customers.truncate(limit);
    }

    if format == Format::Json {
        return Ok(Some(serde_json::to_value(&segmentation)?));
    }

    println!("Recency edges:  {}", format_edges(&segmentation.recency_edges));
    println!("Monetary edges: {}", format_edges(&segmentation.monetary_edges));
    println!("---");
    println!(
        "{:<34} {:>7} {:>5} {:>10}  R F M  Score  Category",
        "Customer", "Recency", "Freq", "Monetary"
    );
    for c in &segmentation.customers {
        println!(
            "{:<34} {:>7} {:>5} {:>10.2}  {} {} {}  {:>5}  {}",
            c.customer_id,
            c.recency,
            c.frequency,
            c.monetary,
            c.r_segment,
            c.f_segment,
            c.m_segment,
            c.rfm_score,
            c.customer_category.label()
        );
    }

    Ok(None)
}

fn run_summary(
    orders: &[Order],
    dataset: &Dataset,
    config: &RfmConfig,
    format: Format,
) -> Result<Option<Value>> {
    let segmentation = run_segmentation(orders, dataset, config)?;
    let summary = summarize(&segmentation.customers);
    let profiles: Vec<CategoryProfile> = summary
        .categories
        .iter()
        .map(|entry| describe_category(entry.category))
        .collect();

    if format == Format::Json {
        return Ok(Some(serde_json::json!({
            "summary": summary,
            "categories": profiles,
        })));
    }

    print!("{}", render_text(&summary));
    println!("\nWhat to do:");
    for profile in &profiles {
        println!("  {}: {}", profile.category.label(), profile.action);
    }

    Ok(None)
}

fn run_insights(
    orders: &[Order],
    dataset: &Dataset,
    interval: TrendInterval,
    top: usize,
    format: Format,
) -> Result<Option<Value>> {
    let items = &dataset.items;
    let metrics = key_metrics(orders, items);
    let trend = revenue_trend(orders, items, interval);
    let weekdays = orders_by_weekday(orders);
    let delivery = delivery_timeliness(orders);
    let products = top_products(orders, items, top);
    let categories = top_categories(orders, items, &dataset.products, &dataset.categories, top);
    let states = customer_states(orders, &dataset.customers);
    let payments = payment_mix(orders, &dataset.payments);
    let scores = review_distribution(orders, &dataset.reviews);
    let negative = negative_reviews(orders, &dataset.reviews);

    if format == Format::Json {
        return Ok(Some(serde_json::json!({
            "metrics": metrics,
            "interval": interval,
            "revenue_trend": trend,
            "orders_by_weekday": weekdays,
            "delivery": delivery,
            "late_rate": delivery.late_rate(),
            "top_products": products,
            "top_categories": categories,
            "customer_states": states,
            "payment_mix": payments,
            "review_scores": scores,
            "negative_review_count": negative.len(),
            "negative_reviews": &negative[..negative.len().min(top)],
        })));
    }

    println!("Customers: {}", metrics.customers);
    println!("Orders: {}", metrics.orders);
    println!("Revenue: {:.2}", metrics.revenue);
    println!("Average order value: {:.2}", metrics.average_order_value);
    println!(
        "Repeat customers: {} ({:.1}%)",
        metrics.repeat_customers,
        metrics.repeat_rate * 100.0
    );

    println!("\n{} revenue:", interval);
    for point in &trend {
        println!("  {:<23} {:>12.2}", point.period, point.revenue);
    }

    println!("\nOrders by weekday:");
    for day in &weekdays {
        println!("  {} {:>8}", day.day, day.orders);
    }

    println!(
        "\nDeliveries: {} on time, {} late ({:.1}%), {} undelivered",
        delivery.on_time,
        delivery.late,
        delivery.late_rate() * 100.0,
        delivery.undelivered
    );

    println!("\nTop {} products:", products.len());
    for (i, product) in products.iter().enumerate() {
        println!(
            "  {:>2}. {} {:>12.2} ({} sold)",
            i + 1,
            product.product_id,
            product.revenue,
            product.items_sold
        );
    }

    // Side tables are optional; skip sections whose table was not loaded.
    if !dataset.products.is_empty() {
        println!("\nTop {} categories:", categories.len());
        for (i, category) in categories.iter().enumerate() {
            println!(
                "  {:>2}. {:<32} {:>12.2} ({} sold)",
                i + 1,
                category.category,
                category.revenue,
                category.items_sold
            );
        }
    }

    if !dataset.customers.is_empty() {
        println!("\nCustomers by state:");
        for state in &states {
            println!("  {} {:>8}", state.state, state.customers);
        }
    }

    if !dataset.payments.is_empty() {
        println!("\nPayment mix:");
        for share in &payments {
            println!(
                "  {:<12} {:>12.2} ({:.1}%, {} payments)",
                share.payment_type,
                share.value,
                share.share * 100.0,
                share.payments
            );
        }
    }

    if !dataset.reviews.is_empty() {
        println!("\nReview scores:");
        for count in &scores {
            println!("  {} {:>8}", count.score, count.reviews);
        }

        println!("\nNegative reviews: {}", negative.len());
        for review in negative.iter().take(top) {
            let text = [review.comment_title.as_deref(), review.comment_message.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(": ")
                .replace(['\r', '\n'], " ");
            println!("  [{}] {} {}", review.score, review.order_id, text);
        }
    }

    Ok(None)
}

fn run_classify(r: u8, f: u8, m: u8, format: Format) -> Result<()> {
    let segment_of = |value: u8| {
        Segment::new(value).with_context(|| format!("segment {} out of range 1-4", value))
    };
    let category = classify(segment_of(r)?, segment_of(f)?, segment_of(m)?);
    let profile = describe_category(category);

    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
        return Ok(());
    }

    println!("R{} F{} M{} -> {}", r, f, m, category.label());
    println!("  {}", profile.summary);
    println!("  {}", profile.detail);
    println!("  Action: {}", profile.action);

    Ok(())
}

fn format_edges(edges: &QuantileEdges) -> String {
    let values: Vec<String> = edges.edges.iter().map(|e| format!("{:.2}", e)).collect();
    format!("[{}] ({:?})", values.join(", "), edges.basis)
}
