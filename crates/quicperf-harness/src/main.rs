//! quicperf-gate
//!
//! CI gate for QUIC performance regressions:
//!
//! - `run`: drive the protocol binary through a test matrix and exit 0/1/2
//! - `plan`: show the scenarios a matrix expands to
//! - `validate`: gate a single `metrics.json`
//! - `emulate`: apply a network condition to an interface for a while
//! - `presets`: list network presets, SLA profiles and matrix presets

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use quicperf_harness::runner::interruptible_sleep;
use quicperf_harness::{
    HarnessConfig, HarnessError, MatrixPreset, MatrixSummary, RunContext, ScenarioRunner,
    SystemLauncher,
};
use quicperf_sim::{presets, NetworkCondition, NetworkEmulator, TcShaper};
use quicperf_sla::{ScenarioMetrics, SlaOverrides, SlaProfile, SlaValidator};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "quicperf-gate",
    version,
    about = "QUIC performance regression gate"
)]
struct Cli {
    /// Debug-level logging (RUST_LOG still wins when set).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the test matrix and gate every scenario.
    Run(RunArgs),
    /// Print the scenarios a matrix expands to.
    Plan(PlanArgs),
    /// Gate one metrics.json file.
    Validate(ValidateArgs),
    /// Apply a network condition, then revert it.
    Emulate(EmulateArgs),
    /// List built-in presets.
    Presets,
}

#[derive(Args, Debug, Default)]
struct SlaArgs {
    /// SLA profile: strict, normal or lenient.
    #[arg(long)]
    profile: Option<SlaProfile>,
    /// Max p95 RTT (ms).
    #[arg(long)]
    sla_p95_rtt: Option<f64>,
    /// Hard loss limit (%).
    #[arg(long)]
    sla_loss: Option<f64>,
    /// Min goodput (Mbps).
    #[arg(long)]
    sla_goodput: Option<f64>,
    /// Max RTT (ms).
    #[arg(long)]
    sla_max_rtt: Option<f64>,
    /// Max mean RTT (ms).
    #[arg(long)]
    sla_mean_rtt: Option<f64>,
    /// Min throughput (Mbps).
    #[arg(long)]
    sla_throughput: Option<f64>,
    /// Min bandwidth (bps).
    #[arg(long)]
    sla_bandwidth: Option<f64>,
    /// Max ACK delay (ms).
    #[arg(long)]
    sla_ack_delay: Option<f64>,
}

impl SlaArgs {
    fn overrides(&self) -> SlaOverrides {
        SlaOverrides {
            p95_rtt_ms: self.sla_p95_rtt,
            loss_percent: self.sla_loss,
            goodput_mbps: self.sla_goodput,
            max_rtt_ms: self.sla_max_rtt,
            mean_rtt_ms: self.sla_mean_rtt,
            throughput_mbps: self.sla_throughput,
            bandwidth_bps: self.sla_bandwidth,
            ack_delay_ms: self.sla_ack_delay,
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Matrix preset: default, light or heavy.
    #[arg(short, long)]
    matrix: Option<MatrixPreset>,
    /// Output directory for per-scenario artifacts.
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    sla: SlaArgs,
    /// Apply each scenario's RTT/loss with tc netem.
    #[arg(long, default_value_t = false)]
    emulate: bool,
    /// Interface to shape (default: the default-route interface).
    #[arg(long)]
    interface: Option<String>,
    /// Run tc through sudo.
    #[arg(long, default_value_t = false)]
    sudo: bool,
    /// Protocol binary (also QUICPERF_BIN).
    #[arg(long)]
    binary: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PlanArgs {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    matrix: Option<MatrixPreset>,
    /// Emit JSON instead of a table.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Path to a metrics.json produced by the protocol client.
    metrics: PathBuf,
    #[command(flatten)]
    sla: SlaArgs,
    /// Emit the SLA result as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct EmulateArgs {
    /// Named network preset (see `presets`).
    #[arg(long, conflicts_with_all = ["latency_ms", "loss_percent"])]
    preset: Option<String>,
    #[arg(long)]
    latency_ms: Option<u64>,
    #[arg(long)]
    jitter_ms: Option<u64>,
    #[arg(long)]
    loss_percent: Option<f64>,
    #[arg(long)]
    bandwidth_kbps: Option<u64>,
    /// Revert after this many seconds (default: wait for Ctrl-C).
    #[arg(long)]
    duration_secs: Option<u64>,
    #[arg(long)]
    interface: Option<String>,
    #[arg(long, default_value_t = false)]
    sudo: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            2
        }
    };
    std::process::exit(code);
}

fn dispatch(command: Command) -> anyhow::Result<i32> {
    match command {
        Command::Run(args) => run(args),
        Command::Plan(args) => plan(args),
        Command::Validate(args) => validate(args),
        Command::Emulate(args) => emulate(args),
        Command::Presets => {
            list_presets();
            Ok(0)
        }
    }
}

fn install_cancel_handler() -> anyhow::Result<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived shutdown signal, finishing current teardown...");
        flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl-C handler")?;
    Ok(cancel)
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<HarnessConfig> {
    let mut cfg = match path {
        Some(p) => HarnessConfig::load(p)?,
        None => HarnessConfig::default(),
    };
    cfg.apply_env();
    Ok(cfg)
}

fn run(args: RunArgs) -> anyhow::Result<i32> {
    let mut cfg = load_config(args.config.as_ref())?;
    if let Some(preset) = args.matrix {
        cfg.use_matrix_preset(preset);
    }
    if let Some(out) = args.output {
        cfg.output_dir = out;
    }
    if let Some(profile) = args.sla.profile {
        cfg.sla_profile = profile;
    }
    cfg.sla_overrides = cfg.sla_overrides.merged(&args.sla.overrides());
    cfg.runner.emulate |= args.emulate;
    if args.interface.is_some() {
        cfg.runner.interface = args.interface;
    }
    cfg.override_binary(args.binary.map(|p| p.display().to_string()));

    cfg.matrix.validate()?;
    let scenarios = cfg.matrix.generate_scenarios();
    let gates = cfg.gates();

    tracing::info!(
        scenarios = scenarios.len(),
        estimated = ?cfg.matrix.estimated_duration(),
        gates = %gates.name,
        binary = %cfg.runner.binary.display(),
        emulate = cfg.runner.emulate,
        "quicperf-gate starting"
    );

    let cancel = install_cancel_handler()?;
    let ctx = RunContext::new(gates, cfg.output_dir.clone()).with_cancel_flag(cancel);
    let mut runner = ScenarioRunner::new(cfg.runner.clone(), ctx, Arc::new(SystemLauncher));
    if cfg.runner.emulate {
        let shaper = TcShaper::new().with_sudo(args.sudo);
        let mut emulator = NetworkEmulator::new(Arc::new(shaper));
        if let Some(iface) = &cfg.runner.interface {
            emulator = emulator.with_interface(iface);
        }
        runner = runner.with_emulator(emulator);
    }

    let cancelled = match runner.run_all(&scenarios) {
        Ok(_) => false,
        Err(HarnessError::Cancelled) => {
            tracing::warn!("run cancelled, reporting partial results");
            true
        }
        Err(e) => return Err(e.into()),
    };

    let summary = MatrixSummary::from_results(runner.results());
    match summary.write_summary(&cfg.output_dir) {
        Ok(path) => tracing::info!(path = %path.display(), "summary written"),
        Err(e) => tracing::warn!(error = %e, "failed to write summary"),
    }
    for line in summary.to_string().lines() {
        tracing::info!("{line}");
    }
    println!("{summary}");

    Ok(if cancelled { 2 } else { summary.exit_code })
}

fn plan(args: PlanArgs) -> anyhow::Result<i32> {
    let mut cfg = load_config(args.config.as_ref())?;
    if let Some(preset) = args.matrix {
        cfg.use_matrix_preset(preset);
    }
    cfg.matrix.validate()?;
    let scenarios = cfg.matrix.generate_scenarios();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&scenarios)?);
        return Ok(0);
    }

    println!(
        "{:<9} {:>6} {:>5} {:>6} {:>6} {:>10} {:>9}",
        "id", "pps", "conns", "loss%", "rtt", "goodput", "latency"
    );
    for s in &scenarios {
        println!(
            "{:<9} {:>6} {:>5} {:>6.1} {:>4}ms {:>5.2}Mbps {:>7.1}ms",
            s.id,
            s.packet_rate,
            s.connections,
            s.loss_rate_percent,
            s.rtt_ms,
            s.expected_goodput_mbps,
            s.expected_latency_ms
        );
    }
    let est = cfg.matrix.estimated_duration().as_secs();
    println!(
        "\n{} scenarios x {} iteration(s), estimated {}h{:02}m{:02}s",
        scenarios.len(),
        cfg.matrix.iterations,
        est / 3600,
        (est % 3600) / 60,
        est % 60
    );
    Ok(0)
}

fn validate(args: ValidateArgs) -> anyhow::Result<i32> {
    let raw = std::fs::read_to_string(&args.metrics)
        .with_context(|| format!("failed to read {}", args.metrics.display()))?;
    let metrics = ScenarioMetrics::from_json_str(&raw)
        .with_context(|| format!("failed to parse {}", args.metrics.display()))?;

    let profile = args.sla.profile.unwrap_or(SlaProfile::Normal);
    let gates = profile.gates().with_overrides(&args.sla.overrides());
    let result = SlaValidator::new(Arc::new(gates)).validate(&metrics.to_sla_metrics());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.detailed_report());
    }
    Ok(result.exit_code)
}

fn emulate(args: EmulateArgs) -> anyhow::Result<i32> {
    let mut condition = match &args.preset {
        Some(name) => {
            presets::lookup(name)
                .with_context(|| format!("unknown network preset: {name}"))?
                .condition
        }
        None => NetworkCondition {
            latency: Duration::from_millis(args.latency_ms.unwrap_or(0)),
            jitter: Duration::from_millis(args.jitter_ms.unwrap_or(0)),
            loss_rate: args.loss_percent.unwrap_or(0.0) / 100.0,
            bandwidth_cap_bps: args.bandwidth_kbps.map(|k| k * 1000),
            ..NetworkCondition::CLEAR
        },
    };
    condition.duration = args.duration_secs.map(Duration::from_secs);

    let mut emulator = NetworkEmulator::new(Arc::new(TcShaper::new().with_sudo(args.sudo)));
    if let Some(iface) = &args.interface {
        emulator = emulator.with_interface(iface);
    }
    emulator.update_config(condition)?;

    let cancel = install_cancel_handler()?;
    emulator.start()?;
    tracing::info!(condition = %condition, "emulation active, Ctrl-C to revert");

    // With a duration the emulator reverts itself; otherwise wait for Ctrl-C.
    while emulator.is_active() {
        if !interruptible_sleep(Duration::from_millis(500), &cancel, Duration::from_millis(100)) {
            break;
        }
    }
    emulator.ensure_stopped()?;
    Ok(0)
}

fn list_presets() {
    println!("Network presets:");
    for p in presets::PRESETS {
        println!("  {:<14} {}", p.name, p.description);
        println!("  {:<14} {}", "", p.condition);
    }

    println!("\nSLA profiles:");
    for profile in SlaProfile::ALL {
        let g = profile.gates();
        println!(
            "  {:<8} p95<={}ms max<={}ms loss<={}%/{}% goodput>={}Mbps",
            profile.as_str(),
            g.max_rtt_p95_ms.unwrap_or_default(),
            g.max_rtt_ms.unwrap_or_default(),
            g.max_loss_percent.unwrap_or_default(),
            g.max_loss_hard_percent.unwrap_or_default(),
            g.min_goodput_mbps.unwrap_or_default()
        );
    }

    println!("\nMatrix presets:");
    for preset in MatrixPreset::ALL {
        let m = preset.matrix();
        println!(
            "  {:<8} {} scenarios, ~{}s",
            preset.as_str(),
            m.total_scenarios(),
            m.estimated_duration().as_secs()
        );
    }
}
