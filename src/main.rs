use anyhow::Context;
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use waybacksync::types::{DEFAULT_CDX_ENDPOINT, DEFAULT_WEB_ENDPOINT};
use waybacksync::{mirror_domain, MirrorConfig, PathStyle};

/// Name of the per-run log file inside the destination directory.
const LOG_FILE: &str = "waybacksync.log";

#[derive(Parser, Debug)]
#[command(name = "waybacksync")]
#[command(about = "Download a website from the Internet Archive's Wayback Machine", long_about = None)]
#[command(version)]
struct Args {
    /// Domain to download
    #[arg(short, long)]
    domain: String,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// From date, up to 14 digits: yyyyMMddhhmmss
    #[arg(long, value_parser = parse_timestamp_bound)]
    from: Option<String>,

    /// To date, up to 14 digits: yyyyMMddhhmmss
    #[arg(long, value_parser = parse_timestamp_bound)]
    to: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Dry run: list what would be downloaded
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Base delay in seconds; retry N waits delay * 2 * N
    #[arg(long, default_value_t = 1)]
    delay: u64,

    /// Max number of retries
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// If retries are exceeded and the file still couldn't be downloaded,
    /// proceed to the next file instead of aborting the run
    #[arg(long)]
    no_fail: bool,

    /// Skip snapshots with these timestamps (sometimes the archive fails to serve a specific snapshot)
    #[arg(long, num_args = 1.., value_parser = parse_timestamp_bound)]
    skip_timestamps: Vec<String>,

    /// Download only the latest version of each URL
    #[arg(long)]
    latest_only: bool,

    /// Snapshot index endpoint
    #[arg(long, default_value = DEFAULT_CDX_ENDPOINT, hide = true)]
    cdx_url: String,

    /// Archived content endpoint
    #[arg(long, default_value = DEFAULT_WEB_ENDPOINT, hide = true)]
    web_url: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Accepts 1 to 14 ASCII digits.
fn parse_timestamp_bound(value: &str) -> Result<String, String> {
    if value.is_empty() || value.len() > 14 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!(
            "'{}' is not a timestamp of up to 14 digits (yyyyMMddhhmmss)",
            value
        ));
    }
    Ok(value.to_string())
}

/// Console output plus a fresh plain-text log file in the destination.
fn init_tracing(destination: &std::path::Path, verbose: bool) -> anyhow::Result<()> {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("waybacksync={}", log_level)));

    let log_path = destination.join(LOG_FILE);
    let log_file = std::fs::File::create(&log_path)
        .with_context(|| format!("cannot create log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_ansi(atty::is(atty::Stream::Stdout)),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .try_init()
        .context("cannot install log subscriber")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("cannot create output directory {}", args.output.display()))?;
    init_tracing(&args.output, args.verbose)?;

    info!("🚀 WaybackSync - Wayback Machine Downloader");
    info!("Domain: {}", args.domain);
    info!("Output directory: {:?}", args.output);

    let config = MirrorConfig {
        domain: args.domain,
        destination: args.output,
        from: args.from,
        to: args.to,
        timeout: Duration::from_secs(args.timeout),
        dry_run: args.dry_run,
        delay: Duration::from_secs(args.delay),
        max_retries: args.retries,
        no_fail: args.no_fail,
        skip_timestamps: args.skip_timestamps.into_iter().collect::<HashSet<_>>(),
        latest_only: args.latest_only,
        cdx_endpoint: args.cdx_url,
        web_endpoint: args.web_url,
        path_style: PathStyle::native(),
    };

    match mirror_domain(&config).await {
        Ok(_) => {
            info!("✅ Mirror completed");
            Ok(())
        }
        Err(e) => {
            error!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}
