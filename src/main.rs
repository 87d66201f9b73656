mod capture;
mod device;
mod docker;
mod error;
mod harvest;
mod report;
mod select;
mod sniffer;
mod stats;

use anyhow::{Context, Result};
use capture::{CaptureConfig, CaptureSession, DEFAULT_SNAPLEN};
use clap::Parser;
use docker::{DockerHost, DEFAULT_DOCKER_HOST};
use log::{error, info, warn};
use report::Reporter;
use sniffer::{Interrupts, SessionState};
use std::io;

/// コンテナを選び、そのゲートウェイが載っているインターフェースをキャプチャする
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Docker Engine API endpoint (unix:///path or tcp://host:port)
    #[arg(short = 'H', long, env = "DOCKER_HOST", default_value = DEFAULT_DOCKER_HOST)]
    docker_host: String,

    /// Suffix appended to the gateway before matching interface addresses
    #[arg(short, long, default_value = "/16")]
    mask: String,

    /// pcap filter expression (prompted for when omitted)
    #[arg(short, long)]
    filter: Option<String>,

    /// Container name to capture (prompted for when omitted)
    #[arg(short, long)]
    container: Option<String>,

    /// Snapshot length in bytes
    #[arg(short, long, default_value_t = DEFAULT_SNAPLEN)]
    snaplen: i32,

    /// Print the flow table as JSON
    #[arg(long)]
    json: bool,

    /// 詳細なログを出力
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    if let Err(e) = run(args) {
        error!("Exiting with error: {:#}", e);
        return Err(e);
    }
    info!("Exiting gracefully");
    Ok(())
}

fn run(args: Args) -> Result<()> {
    // ルート権限の確認
    if unsafe { libc::geteuid() } != 0 {
        warn!("Not running as root; opening the capture device will probably fail");
    }

    let mut state = SessionState::Idle;

    let interfaces = device::host_interfaces()?;
    let host = DockerHost::parse(&args.docker_host)?;
    let containers = docker::fetch_containers(&host)?;
    let containers = docker::resolve_interfaces(containers, &interfaces, &args.mask);

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let index = match &args.container {
        Some(name) => select::find_by_name(&containers, name)?,
        None => select::prompt_container(&containers, &mut input, &mut io::stdout())?,
    };
    let container = &containers[index];
    let interface = select::selected_interface(container, &args.mask)?;
    info!(
        "Selected {} (gateway {}) on interface {}",
        container.display_name(),
        container.gateway,
        interface.name
    );
    state.advance();

    let filter = match args.filter {
        Some(filter) => filter,
        None => select::read_filter(&mut input, &mut io::stdout())
            .context("failed to read the capture filter")?,
    };

    let config = CaptureConfig {
        snaplen: args.snaplen,
        ..CaptureConfig::default()
    };
    let mut session = CaptureSession::open(&interface.name, &filter, &config)?;
    state.advance();

    let breaker = session.breakloop_handle();
    let interrupts = Interrupts::default();
    ctrlc::set_handler(move || {
        if interrupts.first_press() {
            info!("Received Ctrl+C, shutting down... (press again to force)");
            breaker.breakloop();
        } else {
            warn!("Second Ctrl+C, exiting without waiting for the capture");
            std::process::exit(130);
        }
    })
    .context("failed to install the Ctrl+C handler")?;

    let mut reporter = Reporter::new(io::stdout().lock(), args.json);
    reporter.listening(session.interface(), session.filter_expression())?;

    let (tally, result) = sniffer::sniff(&mut session, &mut reporter);
    session.close();
    state.advance();

    info!(
        "{} frame(s) read, {} with payload, {} skipped",
        tally.counters.frames, tally.counters.harvested, tally.counters.skipped
    );
    result?;

    if !tally.aggregator.is_empty() {
        reporter.snapshot(&tally.aggregator.snapshot())?;
    }
    reporter.summary(&tally.counters)?;
    Ok(())
}
