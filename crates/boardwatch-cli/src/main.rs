use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use boardwatch_client::{FetcherConfig, MessengerConfig, MessengerNotifier, ReqwestFetcher};
use boardwatch_core::error::AppError;
use boardwatch_core::traits::{Notifier, NullNotifier};
use boardwatch_core::walk::DEFAULT_MAX_PAGES;
use boardwatch_core::{
    CrawlFailurePolicy, Listing, ListingExtractor, ListingLayout, RunConfig, RunReport, RunService,
};
use boardwatch_db::{Database, DatabaseConfig, ListingRepository};

const DEFAULT_START_URL: &str = "https://www.slosurf.com/ad-category/surf/deske-2/";
const DEFAULT_ALLOWED_HOST: &str = "www.slosurf.com";

#[derive(Parser)]
#[command(name = "boardwatch", version, about = "Classifieds listing monitor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the listing index once and reconcile the catalog
    Run {
        #[command(flatten)]
        crawl: CrawlArgs,
    },

    /// Run repeatedly until interrupted
    Watch {
        #[command(flatten)]
        crawl: CrawlArgs,

        /// Minutes between the start of one run and the next
        #[arg(long, env = "BOARDWATCH_INTERVAL_MINS", default_value_t = 30)]
        interval_mins: u64,
    },

    /// List catalogued listings, newest first
    List {
        /// Include listings no longer on the site
        #[arg(long, default_value_t = false)]
        all: bool,

        /// Number of results to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Print JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show one listing by the site's id
    Show {
        external_id: i64,
    },
}

#[derive(Args, Clone)]
struct CrawlArgs {
    /// First page of the listing index
    #[arg(long, env = "BOARDWATCH_START_URL", default_value = DEFAULT_START_URL)]
    start_url: String,

    /// Hosts the crawler may fetch from (comma-separated)
    #[arg(
        long,
        env = "BOARDWATCH_ALLOWED_HOST",
        default_value = DEFAULT_ALLOWED_HOST,
        value_delimiter = ','
    )]
    allowed_host: Vec<String>,

    /// Stop with an error after this many pages
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_PAGES as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    max_pages: u64,

    /// Per-request timeout
    #[arg(long, default_value_t = 30)]
    fetch_timeout_secs: u64,

    /// Deadline for a whole run; an expired run counts as a failed crawl
    #[arg(long)]
    run_timeout_secs: Option<u64>,

    /// Skip TLS certificate verification
    #[arg(long, env = "BOARDWATCH_ACCEPT_INVALID_CERTS", default_value_t = false)]
    accept_invalid_certs: bool,

    /// What to do with the catalog when the crawl fails part-way
    #[arg(long, value_enum, default_value_t = PolicyArg::Rollback)]
    on_crawl_failure: PolicyArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Rollback,
    CommitPartial,
}

impl From<PolicyArg> for CrawlFailurePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Rollback => CrawlFailurePolicy::Rollback,
            PolicyArg::CommitPartial => CrawlFailurePolicy::CommitPartial,
        }
    }
}

/// The configured notification sink.
#[derive(Clone)]
enum Sink {
    Messenger(MessengerNotifier),
    Disabled(NullNotifier),
}

impl Notifier for Sink {
    async fn notify(&self, message: &str) -> Result<(), AppError> {
        match self {
            Sink::Messenger(n) => n.notify(message).await,
            Sink::Disabled(n) => n.notify(message).await,
        }
    }
}

type Service = RunService<ReqwestFetcher, ListingRepository, Sink>;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("boardwatch=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, stopping");
                shutdown.cancel();
            }
        });
    }

    let db = connect_db().await?;

    let result = match cli.command {
        Commands::Run { crawl } => {
            let svc = build_service(&crawl, &db)?;
            cmd_run(&svc, crawl.run_timeout_secs, &shutdown).await
        }
        Commands::Watch {
            crawl,
            interval_mins,
        } => {
            let svc = build_service(&crawl, &db)?;
            cmd_watch(&svc, crawl.run_timeout_secs, interval_mins, &shutdown).await
        }
        Commands::List { all, limit, json } => cmd_list(&db.listing_repo(), all, limit, json).await,
        Commands::Show { external_id } => cmd_show(&db.listing_repo(), external_id).await,
    };

    db.close().await;
    result
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

fn build_service(crawl: &CrawlArgs, db: &Database) -> Result<Service> {
    let fetcher_config = FetcherConfig {
        allowed_hosts: crawl.allowed_host.clone(),
        timeout: Duration::from_secs(crawl.fetch_timeout_secs),
        accept_invalid_certs: crawl.accept_invalid_certs,
    };
    let fetcher = ReqwestFetcher::new(&fetcher_config).context("Failed to create HTTP client")?;

    let sink = match MessengerConfig::from_env() {
        Some(config) => Sink::Messenger(
            MessengerNotifier::new(&config).context("Failed to create messenger client")?,
        ),
        None => Sink::Disabled(NullNotifier),
    };

    let extractor = ListingExtractor::new(&ListingLayout::default())?;
    let config = RunConfig::new(crawl.start_url.clone())
        .with_max_pages(usize::try_from(crawl.max_pages).unwrap_or(usize::MAX))
        .with_policy(crawl.on_crawl_failure.into());

    Ok(RunService::new(
        fetcher,
        db.listing_repo(),
        sink,
        extractor,
        config,
    ))
}

/// One run bounded by the optional deadline and the shutdown signal.
async fn run_once(
    svc: &Service,
    run_timeout_secs: Option<u64>,
    shutdown: &CancellationToken,
) -> Result<RunReport, AppError> {
    let token = shutdown.child_token();
    let deadline = run_timeout_secs.map(|secs| {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            tracing::warn!(%secs, "Run deadline reached");
            token.cancel();
        })
    });

    let result = svc.run(&token).await;
    if let Some(handle) = deadline {
        handle.abort();
    }
    result
}

async fn cmd_run(
    svc: &Service,
    run_timeout_secs: Option<u64>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let report = run_once(svc, run_timeout_secs, shutdown)
        .await
        .with_context(|| format!("Run from {} failed", svc.config().start_url))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_watch(
    svc: &Service,
    run_timeout_secs: Option<u64>,
    interval_mins: u64,
    shutdown: &CancellationToken,
) -> Result<()> {
    let interval = Duration::from_secs(interval_mins.max(1) * 60);
    tracing::info!(interval_mins, "Watching {}", svc.config().start_url);

    loop {
        match run_once(svc, run_timeout_secs, shutdown).await {
            Ok(report) => {
                tracing::info!(
                    run_id = %report.run_id,
                    inserted = report.stats.inserted,
                    changed = report.stats.changed,
                    removed = ?report.removed,
                    "Run complete"
                );
            }
            Err(AppError::Cancelled) if shutdown.is_cancelled() => break,
            Err(e) => {
                tracing::error!(error = %e, retryable = e.is_retryable(), "Run failed");
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!("Watch stopped");
    Ok(())
}

async fn cmd_list(repo: &ListingRepository, all: bool, limit: usize, json: bool) -> Result<()> {
    let listings = repo.list(all, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    if listings.is_empty() {
        println!("No listings found");
        return Ok(());
    }

    for listing in &listings {
        println!("{}", format_row(listing));
    }

    let active = repo.count(false).await?;
    let removed = repo.count(true).await?;
    println!("\nShown: {} (active: {active}, removed: {removed})", listings.len());

    Ok(())
}

async fn cmd_show(repo: &ListingRepository, external_id: i64) -> Result<()> {
    match repo.get(external_id).await? {
        Some(listing) => println!("{}", serde_json::to_string_pretty(&listing)?),
        None => println!("No listing with id {external_id}"),
    }
    Ok(())
}

fn format_row(listing: &Listing) -> String {
    let status = if listing.removed { "removed" } else { "active" };
    let price = listing
        .price
        .map(|p| format!("{p:.2} €"))
        .unwrap_or_else(|| "-".to_string());

    format!(
        "  [{status:>7}] {:>8}  {}  {} ({price})\n             {}",
        listing.external_id,
        listing.first_seen_at.format("%Y-%m-%d"),
        listing.title,
        listing.link,
    )
}
