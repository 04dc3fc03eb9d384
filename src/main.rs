use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cam_scan_rs::controller::{ScanConfig, ScanController};
use cam_scan_rs::probe::HttpProber;
use cam_scan_rs::sink::ResultSink;
use cam_scan_rs::types::ScanSummary;
use cam_scan_rs::{ranges, registry, signals};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

/// cam-scan-rs — find HTTP camera front-ends across a country's registry-delegated IPv4 ranges.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cam-scan-rs",
    version,
    about = "Find HTTP camera front-ends across a country's registry-delegated IPv4 ranges.",
    long_about = None
)]
struct Cli {
    /// What to do. Without a subcommand an interactive menu is shown.
    #[command(subcommand)]
    command: Option<Command>,

    /// Range file, one `start/count` descriptor per line.
    #[arg(long, global = true, default_value = "ranges.txt")]
    ranges: PathBuf,

    /// Result log that camera records are appended to.
    #[arg(long, global = true, default_value = "cameras_found.txt")]
    output: PathBuf,

    /// Two-letter country code to keep from the delegation report.
    #[arg(long, global = true, default_value = "BD")]
    country: String,

    /// Delegation report URL.
    #[arg(long = "registry-url", global = true, default_value = registry::APNIC_DELEGATED_URL)]
    registry_url: String,

    /// Number of concurrent probe workers.
    #[arg(long, global = true, default_value_t = 100)]
    concurrency: usize,

    /// Per-probe timeout (connect + request + response) in milliseconds.
    #[arg(long = "timeout-ms", global = true, default_value_t = 250)]
    timeout_ms: u64,

    /// How long an idle worker waits on the queue before rechecking stop, in milliseconds.
    #[arg(long = "poll-ms", global = true, default_value_t = 500)]
    poll_ms: u64,

    /// Sleep between pause checks while paused, in milliseconds.
    #[arg(long = "pause-poll-ms", global = true, default_value_t = 100)]
    pause_poll_ms: u64,

    /// Time in-flight requests get to finish after a stop, in milliseconds.
    #[arg(long = "grace-ms", global = true, default_value_t = 1_000)]
    grace_ms: u64,

    /// Capacity of the bounded work queue.
    #[arg(long = "queue-capacity", global = true, default_value_t = 10_000)]
    queue_capacity: usize,

    /// Also write the run summary as pretty JSON to this path.
    #[arg(long = "summary-json", global = true)]
    summary_json: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Refresh the range file from the registry feed.
    Update,
    /// Scan the ranges in the existing range file.
    Scan,
    /// Refresh the range file, then scan it.
    All,
}

impl Cli {
    fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            workers: self.concurrency.clamp(1, 5_000),
            probe_timeout: Duration::from_millis(self.timeout_ms),
            poll_interval: Duration::from_millis(self.poll_ms.max(1)),
            pause_poll: Duration::from_millis(self.pause_poll_ms.max(1)),
            stop_grace: Duration::from_millis(self.grace_ms),
            queue_capacity: self.queue_capacity.max(1),
            ..ScanConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Update) => update(&cli).await.map(|_| ()),
        Some(Command::Scan) => scan(&cli).await.map(|_| ()),
        Some(Command::All) => {
            update(&cli).await?;
            scan(&cli).await.map(|_| ())
        }
        None => menu(&cli).await,
    }
}

async fn update(cli: &Cli) -> Result<usize> {
    println!("Fetching {} IPv4 ranges from {}", cli.country.to_uppercase(), cli.registry_url);
    let list = registry::fetch_ranges(&cli.registry_url, &cli.country).await?;
    if list.is_empty() {
        bail!("no {} IPv4 ranges found in the delegation report", cli.country.to_uppercase());
    }
    ranges::save_ranges(&cli.ranges, &list)?;
    println!("Saved {} ranges to {}", list.len(), cli.ranges.display());
    Ok(list.len())
}

async fn scan(cli: &Cli) -> Result<ScanSummary> {
    let list = ranges::load_ranges(&cli.ranges)?;
    if list.is_empty() {
        bail!("no IP ranges to scan in {}", cli.ranges.display());
    }
    let config = cli.scan_config();

    println!("cam-scan-rs configuration:");
    println!("  ranges       : {} ({} ranges)", cli.ranges.display(), list.len());
    println!("  output       : {} (live save)", cli.output.display());
    println!("  ports        : {:?}", config.ports);
    println!("  concurrency  : {}", config.workers);
    println!("  timeout_ms   : {}", config.probe_timeout.as_millis());
    println!("Controls:");
    println!("  Ctrl+C - stop scan immediately");
    if cfg!(unix) {
        println!("  Ctrl+Z - pause/resume scan");
    }

    let sink = Arc::new(ResultSink::open(&cli.output).await?);
    let prober = Arc::new(HttpProber::new(config.probe_timeout));
    let mut controller = ScanController::new(prober, sink.clone(), config.clone());
    let bridge = signals::spawn_signal_bridge(controller.handle())
        .context("failed to install signal handlers")?;

    let total = list.len();
    let hosts = list.into_iter().enumerate().flat_map(move |(idx, range)| {
        print!("\rProcessing range {}/{}: {}   ", idx + 1, total, range);
        let _ = std::io::stdout().flush();
        ranges::expand_all(std::iter::once(range))
    });
    let items = futures::stream::iter(ranges::work_items(hosts, config.ports.clone()));

    controller.start(items, config.workers)?;
    let summary = controller.join().await;
    bridge.abort();

    print_summary(&summary, sink.path());
    if let Some(path) = cli.summary_json.as_deref() {
        if let Err(e) = write_summary_json(path, &summary) {
            eprintln!("Failed to write JSON to {}: {}", path.display(), e);
        } else {
            println!("Wrote JSON summary to {}", path.display());
        }
    }
    Ok(summary)
}

async fn menu(cli: &Cli) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_menu();
        let line = match signals::race_interrupt(lines.next_line(), tokio::signal::ctrl_c()).await {
            Some(line) => line?,
            None => interrupted(),
        };
        let Some(choice) = line else {
            break;
        };

        let outcome = match choice.trim() {
            "1" => update_or_exit(cli).await.map(|_| None),
            "2" => scan(cli).await.map(Some),
            "3" => match update_or_exit(cli).await {
                Ok(_) => scan(cli).await.map(Some),
                Err(e) => Err(e),
            },
            "4" => {
                println!("Goodbye!");
                break;
            }
            other => {
                eprintln!("Invalid choice {other:?}. Please select 1-4.");
                continue;
            }
        };
        match outcome {
            // An interrupted scan ends the session.
            Ok(Some(summary)) if summary.stopped_early => break,
            Ok(_) => {}
            Err(e) => eprintln!("Error: {e:#}"),
        }
    }
    Ok(())
}

/// Registry fetches can take up to a minute; keep Ctrl+C working meanwhile.
async fn update_or_exit(cli: &Cli) -> Result<usize> {
    match signals::race_interrupt(update(cli), tokio::signal::ctrl_c()).await {
        Some(res) => res,
        None => interrupted(),
    }
}

fn interrupted() -> ! {
    println!("\nInterrupted by user");
    // A pending stdin read would otherwise hold runtime shutdown.
    std::process::exit(0);
}

fn print_menu() {
    println!("\n{}", "=".repeat(50));
    println!("Main Menu:");
    println!("{}", "=".repeat(50));
    println!("1. Update IP ranges from the registry");
    println!("2. Scan IP ranges for cameras");
    println!("3. Update & scan");
    println!("4. Exit");
    println!("{}", "=".repeat(50));
    print!("Enter your choice (1-4): ");
    let _ = std::io::stdout().flush();
}

fn print_summary(summary: &ScanSummary, output: &Path) {
    println!("\n{}", "=".repeat(50));
    if summary.stopped_early {
        println!("Scan stopped");
    } else {
        println!("Scan complete");
    }
    println!("  time taken    : {:.2} s", summary.elapsed_ms as f64 / 1000.0);
    println!("  probes        : {} / {} queued", summary.scanned, summary.queued);
    println!("  unreachable   : {}", summary.probe_errors);
    println!("  cameras found : {}", summary.cameras_found);
    println!("  results       : {}", output.display());
    println!("{}", "=".repeat(50));
}

fn write_summary_json(path: &Path, summary: &ScanSummary) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}
