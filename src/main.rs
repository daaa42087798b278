mod collectors;
mod config;
mod dashboard;
mod inventory;
mod report;
mod scheduler;
mod state;

use clap::Parser;
use collectors::disks::SysinfoDisks;
use collectors::hosts::NetworkProbe;
use collectors::sensors::SysinfoSensors;
use config::Config;
use crossterm::{cursor, execute, terminal};
use dashboard::{Dashboard, Sources};
use inventory::CommandInventory;
use report::{render, RenderOptions, Report};
use state::SourceKind;
use std::io::{self, IsTerminal, Write};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const PROGRESS_WIDTH: usize = 48;

#[derive(Parser, Debug)]
#[command(name = "tailwind")]
#[command(version, about = "Terminal dashboard for sensors, hosts, disks and Hyper-V VMs")]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Keep refreshing the report instead of printing it once.
    #[arg(short, long)]
    reload: bool,
    /// Sensors only: no hosts, VMs, storage or per-core rows.
    #[arg(short, long)]
    simple: bool,
}

type LiveDashboard = Dashboard<SysinfoSensors, SysinfoDisks, NetworkProbe, CommandInventory>;

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if cli.simple {
        cfg.apply_simple_mode();
    }

    info!(
        config = %cli.config,
        tick = %humantime::format_duration(cfg.tick_period()),
        hosts = cfg.hosts.len(),
        inventory = cfg.inventory.enabled,
        reload = cli.reload,
        "starting tailwind"
    );

    let opts = RenderOptions {
        show_cores: cfg.show_cores,
        color: io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
        ..RenderOptions::default()
    };
    let mut dashboard = build_dashboard(&cfg);

    tokio::select! {
        _ = run(&mut dashboard, &cfg, &opts, cli.reload) => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                error!(error = %err, "failed to wait for Ctrl+C");
            }
            clear_progress();
            info!("received Ctrl+C, stopping");
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn build_dashboard(cfg: &Config) -> LiveDashboard {
    let sources = Sources {
        sensors: SysinfoSensors::new(),
        disks: cfg.storage.enabled.then(SysinfoDisks::new),
        probe: NetworkProbe::new(cfg.probe_timeout()),
        inventory: cfg
            .inventory
            .enabled
            .then(|| CommandInventory::new(&cfg.inventory)),
    };
    Dashboard::new(cfg, sources)
}

async fn run(dashboard: &mut LiveDashboard, cfg: &Config, opts: &RenderOptions, reload: bool) {
    let title = opts.title.clone();
    progress(&format!("Initialising {title}..."));
    dashboard
        .tick_with(|kind| progress(&format!("Initialising {title}: {}", refresh_label(kind))))
        .await;
    clear_progress();

    if !reload {
        print_report(dashboard, opts, false);
        return;
    }

    loop {
        print_report(dashboard, opts, true);
        tokio::time::sleep(cfg.tick_period()).await;
        let refreshed = dashboard.tick().await;
        debug!(tick = dashboard.ticks(), ?refreshed, "tick complete");
    }
}

fn print_report(dashboard: &LiveDashboard, opts: &RenderOptions, clear: bool) {
    let text = render(&Report::from_store(dashboard.store()), opts);
    let mut stdout = io::stdout().lock();
    if clear {
        if let Err(err) = execute!(
            stdout,
            terminal::Clear(terminal::ClearType::All),
            cursor::MoveTo(0, 0)
        ) {
            debug!(error = %err, "failed to clear screen");
        }
    }
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.flush())
    {
        debug!(error = %err, "failed to write report");
    }
}

fn refresh_label(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Sensors => "reading sensors",
        SourceKind::Hosts => "probing hosts",
        SourceKind::Disks => "scanning storage",
        SourceKind::Vms => "querying Hyper-V",
    }
}

/// Rewrites a single status line on stderr, padded to hide the previous one.
fn progress(text: &str) {
    let mut stderr = io::stderr().lock();
    let _ = write!(stderr, "\r{text:<PROGRESS_WIDTH$}");
    let _ = stderr.flush();
}

fn clear_progress() {
    progress("");
    let _ = write!(io::stderr().lock(), "\r");
}
