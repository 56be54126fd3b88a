//! RevPulse CLI
//!
//! Command-line interface for the RevPulse revenue refresh pipeline.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use revpulse::cache::SnapshotCache;
use revpulse::dashboard::DashboardState;
use revpulse::models::{Record, Report, TableView};
use revpulse::pipeline::{count, money, ReportBuilder};
use revpulse::scheduler::{RefreshEvent, RefreshScheduler, SchedulerSettings};
use revpulse::sink::{BatchPersister, HttpPersistenceSink, SaveOutcome};
use revpulse::source::{FetchQuery, HttpRecordSource, RecordSource, ReportKind};
use revpulse::Config;

/// RevPulse - Hourly ad revenue refresh and reporting
#[derive(Parser)]
#[command(name = "revpulse")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "REVPULSE_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
    Table,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum RowSource {
    /// Rows already persisted in the backend store
    #[default]
    Store,
    /// A fresh pull from the partner API
    Partner,
    /// The last-known-good snapshot
    Cache,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh on the hour, persist every batch, and report as data arrives
    Watch {
        /// Pull the geo report instead of the channel report
        #[arg(long)]
        geo: bool,

        /// Wait for the first scheduled cycle instead of refreshing at startup
        #[arg(long)]
        no_initial: bool,
    },

    /// Fetch one batch from the partner API
    Fetch {
        /// Pull the geo report instead of the channel report
        #[arg(long)]
        geo: bool,

        /// Also persist the batch to the backend store
        #[arg(long)]
        save: bool,
    },

    /// Build an aggregated report
    Report {
        /// Where rows come from
        #[arg(long, value_enum, default_value = "store")]
        source: RowSource,

        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Agency name or id ("all" for every agency)
        #[arg(long)]
        agency: Option<String>,

        /// Only keys containing this text
        #[arg(long)]
        search: Option<String>,

        /// Leaderboard size
        #[arg(long)]
        top: Option<usize>,
    },

    /// Inspect or clear the snapshot cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show the cached snapshot
    Show,

    /// Delete the cached snapshot
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // .env is optional
    let _ = dotenvy::dotenv();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config, cli.verbose);

    let result = match cli.command {
        Commands::Watch { geo, no_initial } => run_watch(config, geo, no_initial, cli.format).await,
        Commands::Fetch { geo, save } => run_fetch(config, geo, save, cli.format).await,
        Commands::Report {
            source,
            from,
            to,
            agency,
            search,
            top,
        } => {
            let selection = ReportSelection {
                from,
                to,
                agency,
                search,
                top,
            };
            run_report(config, source, selection, cli.format).await
        }
        Commands::Cache { command } => run_cache(&config, command, cli.format),
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // logs go to stderr so report output on stdout stays clean
    if config.logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn report_kind(geo: bool) -> ReportKind {
    if geo {
        ReportKind::Geo
    } else {
        ReportKind::Channel
    }
}

fn persister(config: &Config) -> anyhow::Result<BatchPersister> {
    let sink = HttpPersistenceSink::from_config(&config.sink)?;
    Ok(BatchPersister::new(Arc::new(sink), config.sink.chunk_size))
}

fn report_builder(config: &Config) -> anyhow::Result<ReportBuilder> {
    Ok(ReportBuilder::from_config(&config.report, config.source.tz()?))
}

async fn run_watch(
    config: Config,
    geo: bool,
    no_initial: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if config.source.access_token.is_empty() {
        warn!("source.access_token is empty; the partner API will reject requests");
    }

    let source = HttpRecordSource::from_source_config(&config.source, report_kind(geo))?;
    let cache = SnapshotCache::from_config(&config.cache)?;
    let builder = report_builder(&config)?;
    let criteria = builder.criteria(None, None, None, None);

    let scheduler = RefreshScheduler::new(
        SchedulerSettings::from_config(&config)?,
        Arc::new(source),
        persister(&config)?,
    )
    .with_cache(cache.clone());

    let mut state = DashboardState::with_cache(cache);
    if state.restore_from_cache() {
        info!(count = state.rows.len(), "Showing cached snapshot until the first refresh");
    }
    if let Some(report) = state.stale_report(&builder, &criteria) {
        print_report(&builder, &report, format)?;
    }

    let (handle, mut events) = scheduler.start();
    if !no_initial {
        handle.trigger_now();
    }

    println!("Watching for revenue updates. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                state.apply(&event);
                match &event {
                    RefreshEvent::IntervalTriggered { next_run } => {
                        let wait = (*next_run - Utc::now()).to_std().unwrap_or_default();
                        let wait = std::time::Duration::from_secs(wait.as_secs());
                        info!(
                            next_run = %next_run,
                            next_in = %humantime::format_duration(wait),
                            "Refresh started"
                        );
                    }
                    RefreshEvent::FetchCompleted { .. } => {
                        let report = state.report(&builder, &criteria);
                        print_report(&builder, &report, format)?;
                    }
                    RefreshEvent::SaveProgress(progress) => println!("{}", progress.message),
                    RefreshEvent::SaveCompleted { message, .. } => println!("{message}"),
                    RefreshEvent::Error { origin, message } => {
                        eprintln!("{origin} failed: {message}");
                        if let (Some(saved_at), Some(report)) =
                            (state.stale_since, state.stale_report(&builder, &criteria))
                        {
                            eprintln!("Showing cached data from {saved_at}");
                            print_report(&builder, &report, format)?;
                        }
                    }
                    RefreshEvent::FetchStarted => {}
                }
            }
        }
    }

    handle.stop().await;
    Ok(())
}

async fn run_fetch(
    config: Config,
    geo: bool,
    save: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let source = HttpRecordSource::from_source_config(&config.source, report_kind(geo))?;
    let tz = config.source.tz()?;
    let query = FetchQuery::for_instant(config.source.access_token.clone(), Utc::now(), tz);

    let records = source.fetch(&query).await.context("fetching partner report")?;
    info!(count = records.len(), date = %query.date, "Fetched batch");

    let cache = SnapshotCache::from_config(&config.cache)?;
    if let Err(e) = cache.save(&records) {
        warn!(error = %e, "Failed to cache snapshot");
    }

    let builder = report_builder(&config)?;
    let report = builder.build(&records, &builder.criteria(None, None, None, None));
    print_report(&builder, &report, format)?;

    if save {
        let outcome = persister(&config)?
            .save(&records, |progress| println!("{}", progress.message))
            .await;
        match outcome {
            SaveOutcome::Completed { message, .. } => println!("{message}"),
            SaveOutcome::Failed { message, .. } => anyhow::bail!(message),
        }
    }

    Ok(())
}

struct ReportSelection {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    agency: Option<String>,
    search: Option<String>,
    top: Option<usize>,
}

async fn run_report(
    config: Config,
    source: RowSource,
    selection: ReportSelection,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let records = load_rows(&config, source).await?;

    let mut builder = report_builder(&config)?;
    if let Some(top) = selection.top {
        builder = builder.with_top_n(top);
    }
    let criteria = builder.criteria(
        selection.from,
        selection.to,
        selection.agency.as_deref(),
        selection.search.as_deref(),
    );

    let report = builder.build(&records, &criteria);
    print_report(&builder, &report, format)
}

async fn load_rows(config: &Config, source: RowSource) -> anyhow::Result<Vec<Record>> {
    match source {
        RowSource::Store => {
            let store = HttpRecordSource::from_store_config(&config.store)?;
            let query = FetchQuery::for_instant("", Utc::now(), config.source.tz()?);
            Ok(store.fetch(&query).await.context("reading backend store")?)
        }
        RowSource::Partner => {
            let partner =
                HttpRecordSource::from_source_config(&config.source, ReportKind::Channel)?;
            let tz = config.source.tz()?;
            let query = FetchQuery::for_instant(config.source.access_token.clone(), Utc::now(), tz);
            Ok(partner.fetch(&query).await.context("fetching partner report")?)
        }
        RowSource::Cache => {
            let snapshot = SnapshotCache::from_config(&config.cache)?
                .load()?
                .context("no cached snapshot")?;
            Ok(snapshot.records)
        }
    }
}

fn run_cache(config: &Config, command: CacheCommands, format: OutputFormat) -> anyhow::Result<()> {
    let cache = SnapshotCache::from_config(&config.cache)?;
    match command {
        CacheCommands::Show => match cache.load()? {
            Some(snapshot) if format == OutputFormat::Json => {
                let body = serde_json::json!({
                    "key": cache.key(),
                    "saved_at": snapshot.saved_at,
                    "records": snapshot.records,
                });
                println!("{}", serde_json::to_string_pretty(&body)?);
            }
            Some(snapshot) => {
                println!("Key:      {}", cache.key());
                println!("Saved at: {}", snapshot.saved_at);
                println!("Records:  {}", snapshot.records.len());
            }
            None => println!("No cached snapshot under {}", cache.key()),
        },
        CacheCommands::Clear => {
            cache.clear()?;
            println!("Cleared cached snapshot {}", cache.key());
        }
    }
    Ok(())
}

fn print_report(
    builder: &ReportBuilder,
    report: &Report,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Table => print_table(&builder.table(report)),
        OutputFormat::Text => {
            println!(
                "{} of {} rows, {} sites",
                report.filtered_rows,
                report.total_rows,
                report.rows.len()
            );
            println!(
                "Earnings {}  Clicks {}  Est. clicks {}",
                money(report.totals.earnings),
                count(report.totals.clicks),
                count(report.totals.estimated_clicks)
            );
            for agency in &report.by_agency {
                println!(
                    "  {:<12} {:>12}  {:>8} clicks  {} sites",
                    agency.agency,
                    money(agency.earnings),
                    count(agency.clicks),
                    agency.sites
                );
            }
            if !report.chart.is_empty() {
                println!();
                println!("{}", report.chart.title);
                for (label, value) in report.chart.labels.iter().zip(&report.chart.values) {
                    println!("  {label:<32} {:>12}", money(*value));
                }
            }
        }
    }
    Ok(())
}

fn print_table(table: &TableView) {
    if table.rows.is_empty() {
        println!("No data");
        return;
    }

    let mut widths: Vec<usize> = table.headers.iter().map(|h| h.chars().count()).collect();
    for row in &table.rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
    };

    println!("{}", line(table.headers.as_slice()));
    println!(
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  ")
    );
    for row in &table.rows {
        println!("{}", line(row.as_slice()));
    }
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "revpulse", &mut io::stdout());
}
