mod graph;
mod records;
mod summary;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use log::{error, info};

use graph::GraphLoader;
use summary::{RunSummary, StageReport};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// OpenFlights Neo4j Loader
///
/// Parses airports.dat, airlines.dat and routes.dat and loads them into
/// Neo4j as Airport/Airline nodes and FLIGHT relationships, in batches.
#[derive(Parser)]
#[command(name = "openflights-loader")]
#[command(about = "Load OpenFlights data into Neo4j")]
struct Args {
    /// Bolt URI of the Neo4j server
    #[arg(long, env = "NEO4J_URI", default_value = "bolt://127.0.0.1:7687")]
    uri: String,

    /// Neo4j username
    #[arg(long, env = "NEO4J_USER", default_value = "neo4j")]
    user: String,

    /// Neo4j password
    #[arg(long, env = "NEO4J_PASSWORD", default_value = "password")]
    password: String,

    /// Path to airports.dat
    #[arg(long, default_value = "airports.dat")]
    airports: PathBuf,

    /// Path to airlines.dat
    #[arg(long, default_value = "airlines.dat")]
    airlines: PathBuf,

    /// Path to routes.dat
    #[arg(long, default_value = "routes.dat")]
    routes: PathBuf,

    /// Number of rows per write batch
    #[arg(long, default_value_t = 1000)]
    batch_size: usize,

    /// Report progress every N records (0 disables progress reporting)
    #[arg(long, default_value_t = 1000)]
    progress_interval: usize,

    /// Merge FLIGHT relationships on (source, destination, airline, equipment)
    /// instead of appending a new relationship per row
    #[arg(long)]
    merge_routes: bool,

    /// Show graph statistics after loading
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match run(&args).await {
        Ok(summary) => {
            if summary.has_fatal() {
                error!("❌ Load finished with failed stages");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Loading failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Sequence the whole run: connect, create constraints, then the three load
/// stages in file order. A connection or constraint failure aborts before any
/// data is written; a stage-fatal error (unreadable file) is recorded on that
/// stage's report and the remaining stages still run.
async fn run(args: &Args) -> Result<RunSummary> {
    let loader = GraphLoader::connect(
        &args.uri,
        &args.user,
        &args.password,
        args.batch_size,
        args.progress_interval,
        args.merge_routes,
    )
    .await?;

    loader.create_constraints().await?;

    let mut summary = RunSummary::default();
    summary.push(load_airports_stage(&loader, &args.airports).await);
    summary.push(load_airlines_stage(&loader, &args.airlines).await);
    summary.push(load_routes_stage(&loader, &args.routes).await);

    summary.log_table();

    if args.stats {
        loader.log_stats().await?;
    }

    Ok(summary)
}

async fn load_airports_stage(loader: &GraphLoader, path: &Path) -> StageReport {
    let started = Instant::now();
    let mut report = StageReport::new("airports");
    info!(
        "[{}] 📥 Loading airports from {:?}...",
        Utc::now().format(TIMESTAMP_FORMAT),
        path
    );
    match records::parse_airports_file(path, &mut report) {
        Ok(airports) => loader.load_airports(&airports, &mut report).await,
        Err(e) => {
            error!("❌ {:#}", e);
            report.set_fatal(&e);
        }
    }
    info!(
        "[{}] ✅ Airports stage complete: {} written, {} failed (Duration: {:?})",
        Utc::now().format(TIMESTAMP_FORMAT),
        report.rows_written(),
        report.rows_failed,
        started.elapsed()
    );
    report
}

async fn load_airlines_stage(loader: &GraphLoader, path: &Path) -> StageReport {
    let started = Instant::now();
    let mut report = StageReport::new("airlines");
    info!(
        "[{}] 📥 Loading airlines from {:?}...",
        Utc::now().format(TIMESTAMP_FORMAT),
        path
    );
    match records::parse_airlines_file(path, &mut report) {
        Ok(airlines) => loader.load_airlines(&airlines, &mut report).await,
        Err(e) => {
            error!("❌ {:#}", e);
            report.set_fatal(&e);
        }
    }
    info!(
        "[{}] ✅ Airlines stage complete: {} written, {} failed (Duration: {:?})",
        Utc::now().format(TIMESTAMP_FORMAT),
        report.rows_written(),
        report.rows_failed,
        started.elapsed()
    );
    report
}

async fn load_routes_stage(loader: &GraphLoader, path: &Path) -> StageReport {
    let started = Instant::now();
    let mut report = StageReport::new("routes");
    info!(
        "[{}] 🔗 Loading routes from {:?}...",
        Utc::now().format(TIMESTAMP_FORMAT),
        path
    );
    match records::parse_routes_file(path, &mut report) {
        Ok(routes) => loader.load_routes(&routes, &mut report).await,
        Err(e) => {
            error!("❌ {:#}", e);
            report.set_fatal(&e);
        }
    }
    info!(
        "[{}] ✅ Routes stage complete: {} written, {} failed (Duration: {:?})",
        Utc::now().format(TIMESTAMP_FORMAT),
        report.rows_written(),
        report.rows_failed,
        started.elapsed()
    );
    report
}
