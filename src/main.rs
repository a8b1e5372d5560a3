//! MedRelay - dual-source medical query aggregator
//!
//! A CLI tool that sends symptom descriptions to an event-stream provider
//! and a socket provider concurrently and merges their answers.
//!
//! Exit codes:
//!   0 - Success (no answer above threshold, or no --fail-on set)
//!   1 - Runtime error (config, client setup, output, etc.)
//!   2 - An answer reached the --fail-on severity

mod aggregation;
mod cli;
mod config;
mod error;
mod models;
mod nearby;
mod payload;
mod providers;
mod report;

use aggregation::{Aggregator, QueryResult};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use nearby::{plan_searches, LocationFix, SearchRequest};
use providers::{ConnectionStatus, Provider, SocketSession, StreamProvider};
use report::{QuerySummary, SessionMetadata, SessionReport};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(args.log_level(config.general.verbose));

    info!("MedRelay v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    debug!("Configuration: {:?}", config);

    match run_session(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Session failed: {}", e);
            eprintln!("\n❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .medrelay.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set provider URLs, the merge deadline and nearby search options.");
    Ok(())
}

fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run every query through the aggregator. Returns exit code (0 or 2).
async fn run_session(args: Args, config: Config) -> Result<i32> {
    let started_at = Utc::now();
    let start_time = Instant::now();

    let queries = if args.queries.is_empty() {
        read_queries(BufReader::new(tokio::io::stdin())).await?
    } else {
        args.queries.clone()
    };
    if queries.is_empty() {
        bail!("No queries given. Use --query or pipe one query per line on stdin.");
    }

    let stream = StreamProvider::new(
        &config.stream.url,
        config.stream.connect_timeout_seconds,
        config.stream.request_timeout_seconds,
    )?;
    let mut socket = SocketSession::connect(config.socket_settings());
    let notices = socket.take_notices();
    let status = socket.status();
    tokio::spawn(log_socket_status(status.clone()));

    let connect_timeout = Duration::from_secs(config.stream.connect_timeout_seconds);
    if !wait_for_socket(status, connect_timeout).await {
        warn!(
            "Socket provider at {} is not reachable yet; answers may come from the stream provider only",
            config.socket.url
        );
    }

    let stream: Arc<dyn Provider> = Arc::new(stream);
    let socket: Arc<dyn Provider> = Arc::new(socket);

    let fix = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => Some(LocationFix::new(lat, lon, args.accuracy)),
        _ => None,
    };
    let nearby_settings = config.nearby_settings();
    let searches: Arc<Mutex<Vec<SearchRequest>>> = Arc::new(Mutex::new(Vec::new()));

    let spinner = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb
    };

    let observer_spinner = spinner.clone();
    let planned = Arc::clone(&searches);
    let mut aggregator = Aggregator::new(stream, socket, config.merge_settings())
        .with_progress_observer(Box::new(move |update| {
            observer_spinner.set_message(update.message.clone());
        }))
        .with_medicine_callback(Box::new(move |query_id, medicines| {
            let requests = plan_searches(medicines, fix.as_ref(), &nearby_settings, Utc::now());
            if requests.is_empty() {
                return;
            }
            info!("Planned {} nearby searches for query {}", requests.len(), query_id);
            if let Ok(mut planned) = planned.lock() {
                planned.extend(requests);
            }
        }));
    if let Some(notices) = notices {
        aggregator = aggregator.with_notices(notices);
    }

    let mut results = Vec::with_capacity(queries.len());
    for query in &queries {
        spinner.set_message("Analyzing symptoms...");
        spinner.enable_steady_tick(Duration::from_millis(120));

        let result = aggregator.submit(query).await;

        spinner.disable_steady_tick();
        if !args.quiet {
            spinner.suspend(|| print_result(&result));
        }
        results.push(result);
    }
    spinner.finish_and_clear();

    let nearby_searches = searches.lock().map(|s| s.clone()).unwrap_or_default();
    let report = SessionReport {
        metadata: SessionMetadata {
            started_at,
            stream_url: config.stream.url.clone(),
            socket_url: config.socket.url.clone(),
            duration_seconds: start_time.elapsed().as_secs_f64(),
        },
        queries: results.iter().map(QuerySummary::from_result).collect(),
        transcript: aggregator.transcript().clone(),
        nearby_searches,
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };

    let destination = config.general.output.as_deref();
    deliver_report(&output, destination, &mut std::io::stdout().lock())?;
    if let Some(path) = destination {
        if !args.quiet {
            println!("\n✅ Session report saved to: {}", path);
        }
    }

    if report.failed_count() > 0 {
        warn!("{} of {} queries got no answer", report.failed_count(), report.queries.len());
    }

    if let Some(fail_level) = args.fail_on {
        let threshold = fail_level.severity();
        if report.highest_severity().map_or(false, |s| s >= threshold) {
            eprintln!(
                "\n⛔ An answer reached {:?} severity. Failing (exit code 2).",
                fail_level
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Print one answer for the terminal.
fn print_result(result: &QueryResult) {
    println!("\n🧑 {}", result.query.text);

    let Some(answer) = result.answer() else {
        println!("❌ {}", result.user_message());
        return;
    };

    let sources: Vec<_> = answer.sources.iter().map(|s| s.to_string()).collect();
    println!(
        "🩺 {} {} [{}] ({:.1}s)",
        answer.severity.emoji(),
        answer.severity,
        sources.join(" + "),
        result.elapsed.as_secs_f64()
    );
    println!("{}", answer.text);

    for medicine in &answer.medicines {
        match medicine.dosage.as_deref() {
            Some(dosage) if !dosage.is_empty() => {
                println!("   💊 {} ({}) [{}]", medicine.name, dosage, medicine.source)
            }
            _ => println!("   💊 {} [{}]", medicine.name, medicine.source),
        }
    }

    if answer.seek_emergency_care {
        println!("⚠️  Seek medical care promptly.");
    }
}

/// Write the report to `path`, or to `out` when no path is configured.
fn deliver_report<W: Write>(report: &str, path: Option<&str>, out: &mut W) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, report)
            .with_context(|| format!("Failed to write report to {}", path))?,
        None => writeln!(out, "{}", report).context("Failed to print report")?,
    }
    Ok(())
}

/// Read one query per non-empty line.
async fn read_queries<R: AsyncBufRead + Unpin>(reader: R) -> Result<Vec<String>> {
    let mut lines = reader.lines();
    let mut queries = Vec::new();

    while let Some(line) = lines.next_line().await.context("Failed to read queries")? {
        let line = line.trim();
        if !line.is_empty() {
            queries.push(line.to_string());
        }
    }

    Ok(queries)
}

/// Wait until the socket session is open, or give up after `limit`.
async fn wait_for_socket(mut status: watch::Receiver<ConnectionStatus>, limit: Duration) -> bool {
    let opened = matches!(
        tokio::time::timeout(limit, status.wait_for(|s| s.is_open())).await,
        Ok(Ok(_))
    );
    opened
}

async fn log_socket_status(mut status: watch::Receiver<ConnectionStatus>) {
    while status.changed().await.is_ok() {
        let current = *status.borrow_and_update();
        match current {
            ConnectionStatus::Disconnected => warn!("Socket provider: {}", current.label()),
            _ => info!("Socket provider: {}", current.label()),
        }
    }
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is set up, so problems go straight to stderr.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("⚠️  Ignoring {}: {:#}", CONFIG_FILE, e);
            Ok(Config::default())
        }
    }
}
