use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use std::{collections::BTreeSet, io, path::PathBuf};

use gymstats::{
    inventory::load_stock, Branch, Dashboard, DashboardStats, Filter, FilterController,
    FilterMode, ProductStock, Refresh, SqliteStore, YearMonth,
};

#[derive(Parser)]
#[command(name = "gymstats")]
#[command(author, version, about = "Dashboard statistics for the gym manager database")]
struct Cli {
    /// Path to the gym manager database
    #[arg(long, env = "GYMSTATS_DB")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show revenue, profit, subscriber and stock figures for a gym
    Stats {
        /// Gym to report on
        #[arg(long)]
        gym: i64,

        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long, value_enum, default_value_t)]
        format: Format,
    },
    /// List product stock as seen from one branch
    Stock {
        /// Branch whose stock counts as available (`male` or `female`)
        #[arg(long, default_value = "male")]
        branch: Branch,

        /// Only list products in this category (repeatable)
        #[arg(long = "category")]
        categories: Vec<i64>,

        /// Only list products that are low on stock
        #[arg(long)]
        low_only: bool,

        #[arg(long, value_enum, default_value_t)]
        format: Format,
    },
}

#[derive(Args)]
struct FilterArgs {
    /// Only count records created on this day (YYYY-MM-DD)
    #[arg(long, conflicts_with_all = ["month", "from", "to"])]
    day: Option<NaiveDate>,

    /// Only count records created in this month (YYYY-MM)
    #[arg(long, conflicts_with_all = ["from", "to"])]
    month: Option<YearMonth>,

    /// Start of the date range, inclusive (needs --to)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// End of the date range, inclusive (needs --from)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Only count sales of products in this category (repeatable)
    #[arg(long = "category")]
    categories: Vec<i64>,
}

impl FilterArgs {
    fn resolve(&self) -> Filter {
        let mut controller = FilterController::new();
        if self.day.is_some() {
            controller.set_mode(FilterMode::Day);
            controller.set_day(self.day);
        } else if self.month.is_some() {
            controller.set_mode(FilterMode::Month);
            controller.set_month(self.month);
        } else {
            controller.set_start(self.from);
            controller.set_end(self.to);
        }
        controller.set_categories(self.categories.iter().copied());
        controller.filter()
    }
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum Format {
    #[default]
    Table,
    Csv,
    Json,
}

#[derive(Serialize)]
struct StockRow<'a> {
    id: i64,
    name: &'a str,
    category: Option<&'a str>,
    total: i64,
    available: i64,
    is_low_stock: bool,
    status: &'static str,
}

impl<'a> StockRow<'a> {
    fn new(product: &'a ProductStock, branch: Branch) -> Self {
        let status = product.stock.quantity_status(branch);
        Self {
            id: product.id,
            name: &product.name,
            category: product.category.as_deref(),
            total: status.total,
            available: status.available,
            is_low_stock: status.is_low_stock,
            status: status.label,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let store = SqliteStore::open(&cli.db)?;
    match cli.command {
        Command::Stats {
            gym,
            filter,
            format,
        } => {
            let dashboard = Dashboard::new(store);
            if let Refresh::Failed(err) = dashboard.refresh(gym, &filter.resolve()).await {
                bail!("loading stats for gym {gym}: {err}");
            }
            write_stats(&dashboard.stats(), format)
        }
        Command::Stock {
            branch,
            categories,
            low_only,
            format,
        } => {
            let categories: BTreeSet<i64> = categories.into_iter().collect();
            let products = load_stock(&store, &categories).await?;
            let rows: Vec<StockRow> = products
                .iter()
                .map(|product| StockRow::new(product, branch))
                .filter(|row| !low_only || row.is_low_stock)
                .collect();
            write_stock(&rows, branch, format)
        }
    }
}

fn write_stats(stats: &DashboardStats, format: Format) -> Result<()> {
    match format {
        Format::Table => print!("{stats}"),
        Format::Csv => {
            let mut wtr = csv::Writer::from_writer(io::stdout());
            wtr.serialize(stats)?;
            wtr.flush()?;
        }
        Format::Json => {
            serde_json::to_writer_pretty(io::stdout(), stats)?;
            println!();
        }
    }
    Ok(())
}

fn write_stock(rows: &[StockRow], branch: Branch, format: Format) -> Result<()> {
    match format {
        Format::Table => {
            let width = rows
                .iter()
                .map(|row| row.name.len())
                .chain(["Product".len()])
                .max()
                .unwrap_or_default();
            println!(
                "{:width$} {:>6} {:>9} {}",
                "Product", "Total", "Available", "Status"
            );
            let length = width + 28;
            println!("{:-<length$}", "");
            for row in rows {
                println!(
                    "{:width$} {:>6} {:>9} {}",
                    row.name, row.total, row.available, row.status
                );
            }
            println!("{:-<length$}", "");
            println!("Available quantities are for the {branch} branch");
        }
        Format::Csv => {
            let mut wtr = csv::Writer::from_writer(io::stdout());
            for row in rows {
                wtr.serialize(row)?;
            }
            wtr.flush()?;
        }
        Format::Json => {
            serde_json::to_writer_pretty(io::stdout(), rows)?;
            println!();
        }
    }
    Ok(())
}
