mod bandwidth;
mod benchmark;
mod config;
mod discovery;
mod error;
mod executor;
mod latency;
mod logging;
mod lookup;
mod report;
mod selection;
mod traits;
mod types;
mod utils;

use anyhow::{bail, Context, Result};
use benchmark::NetworkBenchmark;
use clap::{Parser, Subcommand};
use config::Settings;
use executor::ShellExecutor;
use indicatif::ProgressBar;
use std::path::PathBuf;
use types::{NetworkResult, ProbeEvent, SelectedServer, SpeedTestResult};

#[derive(Parser)]
#[command(name = "netprobe")]
#[command(about = "Global speed-test server discovery and bandwidth benchmark", long_about = None)]
struct Cli {
    /// Settings file (default: <config dir>/netprobe/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full network benchmark (e.g., netprobe run --max-servers 10)
    Run {
        /// Number of servers to test (defaults to the config value, 20)
        #[arg(long, short)]
        max_servers: Option<usize>,

        /// Print the result as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Send the result to the configured collection service
        #[arg(long)]
        report: bool,
    },
    /// Discover, probe and select servers without running bandwidth tests
    Servers {
        #[arg(long, short)]
        max_servers: Option<usize>,
    },
    /// Show the public IP, provider and location of this host
    Ip,
    /// List the regions queried, grouped by geographic group
    Regions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level, cli.log_json)?;

    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;

    match cli.command {
        Commands::Run {
            max_servers,
            json,
            report,
        } => handle_run(&settings, max_servers, json, report).await?,
        Commands::Servers { max_servers } => handle_servers(&settings, max_servers).await?,
        Commands::Ip => handle_ip(&settings).await?,
        Commands::Regions => handle_regions(&settings),
    }

    Ok(())
}

fn resolve_max(settings: &Settings, max_servers: Option<usize>) -> Result<usize> {
    let max = max_servers.unwrap_or(settings.max_servers);
    if max == 0 {
        bail!("--max-servers must be at least 1");
    }
    Ok(max)
}

// --- Handlers ---

/// Drives the progress bars from benchmark events
struct Progress {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl Progress {
    fn new(quiet: bool) -> Self {
        Self { bar: None, quiet }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    fn handle(&mut self, event: ProbeEvent) {
        match event {
            ProbeEvent::DiscoveryFinished { servers } => {
                if !self.quiet {
                    eprintln!("Discovered {} servers.", servers);
                }
            }
            ProbeEvent::NoServersFound => {
                eprintln!("Warning: no speed-test servers could be discovered. Check your network connection.");
            }
            ProbeEvent::ProbingStarted { total } => {
                if !self.quiet {
                    self.bar = Some(utils::progress_bar(total as u64, "Measuring latency..."));
                }
            }
            ProbeEvent::LatencyProbed { server, latency_ms } => {
                if let Some(bar) = &self.bar {
                    let shown = latency_ms.map_or_else(|| "timeout".to_string(), |ms| format!("{:.1} ms", ms));
                    bar.set_message(format!("{} ({})", server.location_label(), shown));
                    bar.inc(1);
                }
            }
            ProbeEvent::SelectionFinished { selected } => {
                self.finish();
                if !self.quiet && !selected.is_empty() {
                    self.bar = Some(utils::progress_bar(selected.len() as u64, "Testing..."));
                }
            }
            ProbeEvent::TestStarted { server } => {
                if let Some(bar) = &self.bar {
                    bar.set_message(format!("Testing {}", server.server.sponsor));
                }
            }
            ProbeEvent::TestSkipped { server } => {
                if let Some(bar) = &self.bar {
                    bar.println(format!("Skipped {} (download failed)", server.server.sponsor));
                    bar.inc(1);
                }
            }
            ProbeEvent::TestFinished { result } => {
                if let Some(bar) = &self.bar {
                    bar.println(format_result_row(&result));
                    bar.inc(1);
                }
            }
            ProbeEvent::DeadlineReached { remaining } => {
                self.finish();
                eprintln!("Run deadline reached, {} servers not tested.", remaining);
            }
        }
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let cut: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}

fn format_result_row(r: &SpeedTestResult) -> String {
    format!(
        "{:<24} {:<28} {:>14} {:>14} {:>10}",
        truncate(&r.server, 24),
        truncate(&r.location, 28),
        r.download_display(),
        r.upload_display(),
        r.latency_display()
    )
}

fn print_result(result: &NetworkResult) {
    println!("{}", "-".repeat(94));
    println!("Public IP: {}", result.public_ip);
    println!("Provider:  {}", result.provider);
    println!("Location:  {}", result.location);
    println!("{}", "-".repeat(94));
    println!(
        "{:<24} {:<28} {:>14} {:>14} {:>10}",
        "Server", "Location", "Download", "Upload", "Latency"
    );
    println!("{}", "-".repeat(94));
    for r in &result.tests {
        println!("{}", format_result_row(r));
    }
    if result.tests.is_empty() {
        println!("No speed tests completed.");
    }
    println!("{}", "-".repeat(94));
}

async fn handle_run(settings: &Settings, max_servers: Option<usize>, json: bool, report: bool) -> Result<()> {
    let max = resolve_max(settings, max_servers)?;
    if report && settings.report_url.is_none() {
        bail!("--report needs report_url in the settings file");
    }

    let executor = ShellExecutor::new();
    let table = config::region_table();
    let mut progress = Progress::new(json);

    let result = NetworkBenchmark::new(&executor, table, settings)
        .run(max, |e| progress.handle(e))
        .await;
    progress.finish();

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!();
        print_result(&result);
    }

    if let Some(url) = settings.report_url.as_deref().filter(|_| report) {
        // Results are already on screen; a failed upload only gets reported
        match report::submit(url, &result).await {
            Ok(()) => eprintln!("Results reported to {}", url),
            Err(e) => eprintln!("Failed to report results: {}", e),
        }
    }

    Ok(())
}

fn print_selection(selected: &[SelectedServer]) {
    println!(
        "{:<4} {:<16} {:<24} {:<28} {:>10}",
        "#", "GROUP", "SERVER", "LOCATION", "LATENCY"
    );
    println!("{}", "-".repeat(86));
    for (i, s) in selected.iter().enumerate() {
        let latency = if s.measured {
            format!("{:.1} ms", s.latency_ms)
        } else {
            "Timeout".to_string()
        };
        println!(
            "{:<4} {:<16} {:<24} {:<28} {:>10}",
            i + 1,
            truncate(&s.server.group, 16),
            truncate(&s.server.sponsor, 24),
            truncate(&s.server.location_label(), 28),
            latency
        );
    }
}

async fn handle_servers(settings: &Settings, max_servers: Option<usize>) -> Result<()> {
    let max = resolve_max(settings, max_servers)?;
    let executor = ShellExecutor::new();
    let mut progress = Progress::new(false);
    let mut on_event = |e: ProbeEvent| progress.handle(e);

    let selected = NetworkBenchmark::new(&executor, config::region_table(), settings)
        .plan(max, &mut on_event)
        .await;
    progress.finish();

    println!();
    if selected.is_empty() {
        println!("No servers selected.");
    } else {
        print_selection(&selected);
    }
    Ok(())
}

async fn handle_ip(settings: &Settings) -> Result<()> {
    let info = lookup::lookup_host(&ShellExecutor::new(), settings).await;
    println!("Public IP: {}", info.public_ip);
    println!("Provider:  {}", info.provider);
    println!("Location:  {}", info.location);
    Ok(())
}

fn handle_regions(settings: &Settings) {
    let table = config::region_table();
    for group in table.priority(settings.home_group.as_deref()) {
        let searches: Vec<&str> = table
            .regions
            .iter()
            .filter(|r| r.group == group)
            .map(|r| r.search.as_str())
            .collect();
        if searches.is_empty() {
            continue;
        }
        println!("{:<16} {}", group, searches.join(", "));
    }
}
