//! # Paper Digest Main Driver
//!
//! ## Purpose
//! Command-line entry point. `run` executes one pipeline run (fetch →
//! dedup → filter → analyze → summarize → report); `serve` starts the API
//! server over the persisted reports.
//!
//! ## Architecture Flow
//! 1. Parse command line arguments and load configuration
//! 2. Initialize logging and tracing
//! 3. Open the store and wire components
//! 4. Execute the requested subcommand

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use paper_digest::{
    api::ApiServer,
    backends::ChatBackend,
    config::Config,
    content::{ContentAccess, HttpContentFetcher},
    errors::{DigestError, Result},
    history::HistoryStore,
    pipeline::{BackendSet, GateSet, Orchestrator, OrchestratorSettings},
    report::{markdown, ReportStore},
    sources::{self, FeedSource, RssFeedSource},
    AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("paper-digest")
        .version("0.1.0")
        .about("Keyword-driven research paper digest pipeline")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Execute one pipeline run and persist the report")
                .arg(config_arg())
                .arg(
                    Arg::new("date")
                        .long("date")
                        .value_name("YYYY-MM-DD")
                        .help("Run date (defaults to today)"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .help("Print the rendered report instead of persisting it")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_name("N")
                        .help("Cap the number of fetched records")
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Serve persisted reports over HTTP")
                .arg(config_arg())
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("Server port")
                        .value_parser(clap::value_parser!(u16)),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => run_pipeline(sub).await,
        Some(("serve", sub)) => serve(sub).await,
        _ => unreachable!("subcommand required"),
    }
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Configuration file path")
        .default_value("config.toml")
}

/// Initialize logging and tracing
fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_database(config: &Config) -> Result<sled::Db> {
    if let Some(parent) = config.store.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    sled::open(&config.store.db_path).map_err(|e| DigestError::StoreUnavailable {
        db_path: config.store.db_path.to_string_lossy().to_string(),
        reason: e.to_string(),
    })
}

/// Execute one pipeline run.
async fn run_pipeline(matches: &ArgMatches) -> Result<()> {
    let config_path = matches.get_one::<String>("config").expect("has default");
    let config = Arc::new(Config::from_file(config_path)?);
    init_logging(&config);

    let run_date = match matches.get_one::<String>("date") {
        Some(raw) => chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
            DigestError::Config {
                message: format!("Invalid --date value '{}': {}", raw, e),
            }
        })?,
        None => chrono::Utc::now().date_naive(),
    };
    let dry_run = matches.get_flag("dry-run");

    info!(date = %run_date, config = %config_path, "Starting paper digest run");

    // Stores
    let db = open_database(&config)?;
    let history = Arc::new(HistoryStore::new(&db)?);
    let reports = Arc::new(ReportStore::new(&db, config.store.enable_compression)?);
    info!(tracked = history.len(), "History store opened");

    // Fetch candidate records, isolating per-source failures
    let feed_sources: Vec<Arc<dyn FeedSource>> = config
        .feeds
        .sources
        .iter()
        .filter(|f| f.enabled)
        .map(|f| RssFeedSource::new(f.clone()).map(|s| Arc::new(s) as Arc<dyn FeedSource>))
        .collect::<Result<_>>()?;
    let fetch_cutoff = run_date - chrono::Duration::days(i64::from(config.feeds.fetch_window_days));
    let (mut records, feed_failures) = sources::fetch_all(&feed_sources, fetch_cutoff).await;
    if !feed_failures.is_empty() {
        warn!(failed_sources = feed_failures.len(), "Some feeds failed; continuing with the rest");
    }
    if let Some(limit) = matches.get_one::<usize>("limit") {
        records.truncate(*limit);
    }
    info!(records = records.len(), "Fetched candidate records");

    // Backends behind their gates
    let content: Arc<dyn ContentAccess> = Arc::new(HttpContentFetcher::new(
        Duration::from_secs(config.backends.analysis.timeout_seconds),
        Some(PathBuf::from("./cache/content")),
        8 * 1024 * 1024,
    )?);
    let backends = BackendSet {
        filter: Arc::new(ChatBackend::new(
            "filter",
            &config.backends.filter,
            Some(content.clone()),
            config.pipeline.max_content_chars,
        )?),
        analysis: Arc::new(ChatBackend::new(
            "analysis",
            &config.backends.analysis,
            Some(content.clone()),
            config.pipeline.max_content_chars,
        )?),
        narrative: Arc::new(ChatBackend::new(
            "narrative",
            &config.backends.narrative,
            Some(content),
            config.pipeline.max_content_chars,
        )?),
    };
    let gates = GateSet::from_config(&config.backends);
    let settings = OrchestratorSettings::from_config(&config);

    let orchestrator = Orchestrator::new(settings, history.clone(), backends, gates);
    let outcome = orchestrator.run(records, run_date).await?;

    for failure in &outcome.failures {
        warn!(
            key = %failure.identity,
            stage = failure.stage.as_str(),
            error = %failure.error,
            "Unit failure"
        );
    }

    // Bound history growth
    let prune_cutoff = run_date - chrono::Duration::days(i64::from(config.store.retention_days));
    if let Err(e) = history.prune(prune_cutoff) {
        warn!(error = %e, "History prune failed");
    }
    history.flush().await?;

    if dry_run {
        info!("Dry run: report not persisted");
        println!("{}", markdown::render(&outcome.report));
    } else {
        reports.save(&outcome.report)?;
        reports.flush().await?;

        if let Some(dir) = &config.report.markdown_dir {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(format!("paper-digest-{}.md", outcome.report.date));
            std::fs::write(&path, markdown::render(&outcome.report))?;
            info!(path = %path.display(), "Markdown report saved");
        }
    }

    info!(
        total = outcome.stats.total_papers,
        matched = outcome.stats.matched_papers,
        analyzed = outcome.stats.analyzed_papers,
        failed = outcome.stats.failed_papers,
        "Done"
    );
    Ok(())
}

/// Start the report API server.
async fn serve(matches: &ArgMatches) -> Result<()> {
    let config_path = matches.get_one::<String>("config").expect("has default");
    let mut config = Config::from_file(config_path)?;
    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }
    init_logging(&config);

    let db = open_database(&config)?;
    let history = Arc::new(HistoryStore::new(&db)?);
    let reports = Arc::new(ReportStore::new(&db, config.store.enable_compression)?);
    info!(reports = reports.len(), "Report store opened");

    let app_state = AppState {
        config: Arc::new(config),
        history,
        reports,
    };

    ApiServer::new(app_state).run().await
}
