use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::Path;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use twingest::checkpoint::{self, CheckpointManager};
use twingest::client::{Geocoder, NominatimGeocoder, PostLookup, SearchQuery, TwitterClient};
use twingest::config;
use twingest::download::{discover_shards, DownloadConfig, Downloader};
use twingest::gazetteer::Gazetteer;
use twingest::geolocate::{geolocate_authors, geolocate_places, locate_posts};
use twingest::location::{LocationResolver, ResolverConfig};
use twingest::stats::BatchStats;
use twingest::{backfill, merge, store};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "twingest")]
#[command(about = "Download, merge and geolocate social-media posts")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Page through the search endpoint, one shard file per page
    Download(DownloadArgs),
    /// Merge shards into normalized posts, authors and places
    Merge(MergeArgs),
    /// Resolve author locations and place regions against a gazetteer
    Geolocate(GeolocateArgs),
}

#[derive(Args)]
struct DownloadArgs {
    /// Directory for shard files
    #[arg(short, long)]
    output: String,

    /// Shard file name prefix
    #[arg(short, long, default_value = "batch")]
    prefix: String,

    /// Search keyword (repeatable; combined with OR)
    #[arg(short, long = "keyword", required = true)]
    keywords: Vec<String>,

    /// First day of the range (YYYY-MM-DD)
    #[arg(long)]
    from: NaiveDate,

    /// Last day of the range, inclusive (YYYY-MM-DD)
    #[arg(long)]
    to: NaiveDate,

    /// Language filter
    #[arg(long, default_value = config::DEFAULT_LANGUAGE)]
    language: String,

    /// Posts per page
    #[arg(long, default_value_t = config::DEFAULT_PAGE_SIZE)]
    page_size: u32,

    /// Pause between requests in milliseconds
    #[arg(long, default_value_t = config::DEFAULT_REQUEST_DELAY_MS)]
    sleep_ms: u64,

    /// Stop after this many pages (more data may remain)
    #[arg(long)]
    max_requests: Option<u32>,

    /// Start from this cursor instead of the beginning of the stream
    #[arg(long)]
    cursor: Option<String>,

    /// Resume from the saved checkpoint if it matches this query
    #[arg(long)]
    resume: bool,

    /// Bearer credential for the search endpoint
    #[arg(long, env = "TWINGEST_BEARER_TOKEN", hide_env_values = true)]
    token: String,
}

#[derive(Args)]
struct MergeArgs {
    /// Directory containing shard files
    #[arg(short, long)]
    input: String,

    /// Shard file name prefix
    #[arg(short, long, default_value = "batch")]
    prefix: String,

    /// Directory for posts.json, authors.json and places.json
    #[arg(short, long)]
    output: String,

    /// Restore truncated retweet text
    #[arg(long)]
    backfill: bool,

    /// Pause between backfill lookups in milliseconds
    #[arg(long, default_value_t = config::DEFAULT_REQUEST_DELAY_MS)]
    sleep_ms: u64,

    /// Bearer credential for backfill lookups (without it only the batch is used)
    #[arg(long, env = "TWINGEST_BEARER_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Args)]
struct GeolocateArgs {
    /// Directory holding the merged collections
    #[arg(short, long)]
    output: String,

    /// Gazetteer CSV (municipality, province, province_code, region, lat, lon)
    #[arg(short, long)]
    gazetteer: String,

    /// Never call the geocoder; gazetteer matches only
    #[arg(long)]
    no_geocode: bool,

    /// Pause between geocoder requests in milliseconds
    #[arg(long, default_value_t = config::DEFAULT_GEOCODE_DELAY_MS)]
    geocode_delay_ms: u64,

    /// Minimum fuzzy score (0-100) for a municipality match
    #[arg(long, default_value_t = config::FUZZY_THRESHOLD)]
    threshold: f64,
}

fn run_download(args: DownloadArgs) -> Result<()> {
    let query = SearchQuery::new(args.keywords, &args.language, args.from, args.to)
        .context("Invalid search query")?;
    let fingerprint = query.fingerprint();

    let (start_cursor, stats) = if args.resume {
        match checkpoint::load_if_valid(&fingerprint, &args.prefix, &args.output)? {
            Some(cp) => {
                info!(
                    cursor = cp.next_cursor,
                    pages = cp.stats.pages_fetched,
                    "Resuming from checkpoint"
                );
                let stats = BatchStats::from_checkpoint(&cp.stats);
                (Some(cp.next_cursor), stats)
            }
            None => {
                info!("No valid checkpoint found, starting fresh");
                (args.cursor, BatchStats::new())
            }
        }
    } else {
        (args.cursor, BatchStats::new())
    };

    let client = TwitterClient::new(args.token).context("Failed to build HTTP client")?;
    let download_config = DownloadConfig {
        page_size: args.page_size,
        request_delay: Duration::from_millis(args.sleep_ms),
        ..DownloadConfig::new(&args.output)
    };
    let downloader = Downloader::new(&client, download_config).with_checkpoint(
        CheckpointManager::new(&fingerprint, &args.prefix, &args.output),
    );

    let started = Instant::now();
    let outcome = downloader.download(
        &query,
        &args.prefix,
        start_cursor,
        args.max_requests,
        &stats,
    )?;

    print_header(started);
    println!("Shards written:     {}", outcome.shards.len());
    println!("Pages fetched:      {}", stats.pages());
    println!("Posts fetched:      {}", stats.posts_fetched());
    match outcome.next_cursor {
        Some(cursor) if !outcome.exhausted => {
            println!("Stream exhausted:   no");
            println!("Resume cursor:      {}", cursor);
        }
        _ => println!("Stream exhausted:   yes"),
    }

    Ok(())
}

fn run_merge(args: MergeArgs) -> Result<()> {
    let shards = discover_shards(Path::new(&args.input), &args.prefix)?;
    if shards.is_empty() {
        bail!(
            "No shards found in {} (expected {}.*.json)",
            args.input,
            args.prefix
        );
    }

    let started = Instant::now();
    let stats = BatchStats::new();
    let mut batch = merge::merge(&shards, &stats)?;

    if args.backfill {
        let client = match args.token {
            Some(token) => Some(TwitterClient::new(token).context("Failed to build HTTP client")?),
            None => {
                warn!("No bearer token, backfilling from the batch only");
                None
            }
        };
        backfill::backfill(
            &mut batch.posts,
            client.as_ref().map(|c| c as &dyn PostLookup),
            Duration::from_millis(args.sleep_ms),
            &stats,
        );
    }

    let dir = Path::new(&args.output);
    store::save_posts(dir, &batch.posts)?;
    store::save_authors(dir, &batch.authors)?;
    store::save_places(dir, &batch.places)?;

    print_header(started);
    println!("Shards merged:      {}", shards.len());
    println!("Posts merged:       {}", stats.posts());
    println!("Authors merged:     {}", stats.authors());
    println!("Places merged:      {}", stats.places());
    println!("Places discarded:   {}", stats.places_discarded());
    if args.backfill {
        println!(
            "Retweets backfilled: {} ({} local, {} fetched)",
            stats.retweets_backfilled(),
            stats.retweets_local(),
            stats.retweets_remote()
        );
        println!("Retweets truncated: {}", stats.retweets_truncated());
    }

    Ok(())
}

fn run_geolocate(args: GeolocateArgs) -> Result<()> {
    let gazetteer = Gazetteer::load(Path::new(&args.gazetteer))
        .with_context(|| format!("Failed to load gazetteer {}", args.gazetteer))?;

    let dir = Path::new(&args.output);
    let posts = store::load_posts(dir)?;
    let mut authors = store::load_authors(dir)?;
    let mut places = store::load_places(dir)?;

    let geocoder = if args.no_geocode {
        None
    } else {
        Some(NominatimGeocoder::new().context("Failed to build geocoder client")?)
    };
    let resolver_config = ResolverConfig {
        fuzzy_threshold: args.threshold,
        geocode_delay: Duration::from_millis(args.geocode_delay_ms),
        ..ResolverConfig::default()
    };

    let started = Instant::now();
    let stats = BatchStats::new();
    let mut resolver = LocationResolver::new(
        &gazetteer,
        geocoder.as_ref().map(|g| g as &dyn Geocoder),
        resolver_config,
    );
    geolocate_authors(&mut authors, &mut resolver, &stats);
    drop(resolver);

    geolocate_places(&mut places, &gazetteer);
    let located = locate_posts(&posts, &authors, &places);

    store::save_authors(dir, &authors)?;
    store::save_places(dir, &places)?;
    store::save_located_posts(dir, &located)?;

    print_header(started);
    println!("Locations resolved: {}", stats.resolved());
    println!("Unresolved:         {}", stats.unresolved());
    println!("Geocode requests:   {}", stats.geocode_requests());
    println!("Cache hits:         {}", stats.cache_hits());
    println!("Places:             {}", places.len());
    println!("Located posts:      {} of {}", located.len(), posts.len());

    Ok(())
}

fn print_header(started: Instant) {
    println!();
    println!("=== Summary ===");
    println!(
        "Elapsed:            {:.2}s",
        started.elapsed().as_secs_f64()
    );
    println!();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Download(args) => run_download(args),
        Commands::Merge(args) => run_merge(args),
        Commands::Geolocate(args) => run_geolocate(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
