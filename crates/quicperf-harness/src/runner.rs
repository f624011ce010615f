//! Sequential scenario execution.
//!
//! For every scenario the runner optionally applies the scenario's network
//! condition, starts the protocol server, lets it settle, runs the client
//! to completion (bounded by a deadline), tears the server down, reverts
//! the network and gates the client's metrics. Failures are captured in
//! the scenario's result and the run moves on.

use crate::context::RunContext;
use crate::error::HarnessError;
use crate::matrix::TestScenario;
use crate::process::{
    wait_until, LaunchSpec, ProcessHandle, ProcessLauncher, ProcessRole, StopOutcome,
    WaitOutcome,
};
use crate::result::{measure, ScenarioResult};
use chrono::Utc;
use quicperf_sim::NetworkEmulator;
use quicperf_sla::{ScenarioMetrics, SlaGateSet, SlaMetrics, SlaValidator};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const BINARY_ENV: &str = "QUICPERF_BIN";

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub binary: PathBuf,
    pub server_addr: String,
    pub client_addr: String,
    pub congestion_control: String,
    pub ack_frequency: u32,
    pub fec: bool,
    pub fec_redundancy: f64,
    pub greasing: bool,
    pub verbose: bool,
    /// Pause between server start and client start.
    pub settle: Duration,
    /// Added to the scenario duration to form the client deadline.
    pub client_grace: Duration,
    /// SIGINT-to-SIGKILL window when stopping a process.
    pub teardown_grace: Duration,
    pub cooldown: Duration,
    pub poll_interval: Duration,
    pub emulate: bool,
    pub interface: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("./quic-test-experimental"),
            server_addr: ":9000".into(),
            client_addr: "127.0.0.1:9000".into(),
            congestion_control: "bbrv2".into(),
            ack_frequency: 2,
            fec: true,
            fec_redundancy: 0.1,
            greasing: true,
            verbose: true,
            settle: Duration::from_secs(2),
            client_grace: Duration::from_secs(5),
            teardown_grace: Duration::from_secs(5),
            cooldown: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            emulate: false,
            interface: None,
        }
    }
}

impl RunnerConfig {
    pub fn server_args(&self, dir: &Path, gates: &SlaGateSet) -> Vec<String> {
        let mut args = vec![
            "--mode".to_string(),
            "server".into(),
            "--addr".into(),
            self.server_addr.clone(),
            "--cc".into(),
            self.congestion_control.clone(),
            "--ack-freq".into(),
            self.ack_frequency.to_string(),
        ];
        if self.fec {
            args.push("--fec".into());
            args.push("--fec-redundancy".into());
            args.push(self.fec_redundancy.to_string());
        }
        if self.greasing {
            args.push("--greasing".into());
        }
        args.push("--qlog".into());
        args.push(dir.join("server-qlog").display().to_string());
        if self.verbose {
            args.push("--verbose".into());
        }
        let sla_flags = [
            ("--sla-p95-rtt", gates.max_rtt_p95_ms),
            ("--sla-loss", gates.max_loss_hard_percent),
            ("--sla-goodput", gates.min_goodput_mbps),
        ];
        for (flag, value) in sla_flags {
            if let Some(v) = value.filter(|v| *v > 0.0) {
                args.push(flag.into());
                args.push(v.to_string());
            }
        }
        args
    }

    pub fn client_args(&self, dir: &Path, scenario: &TestScenario) -> Vec<String> {
        let mut args = vec![
            "--mode".to_string(),
            "client".into(),
            "--addr".into(),
            self.client_addr.clone(),
            "--connections".into(),
            scenario.connections.to_string(),
            "--streams".into(),
            scenario.streams_per_connection.to_string(),
            "--duration".into(),
            format!("{}s", scenario.duration_secs),
            "--packet-size".into(),
            scenario.packet_size.to_string(),
            "--rate".into(),
            scenario.packet_rate.to_string(),
            "--qlog".into(),
            dir.join("client-qlog").display().to_string(),
            "--report".into(),
            dir.join("metrics.json").display().to_string(),
            "--report-format".into(),
            "json".into(),
        ];
        if self.verbose {
            args.push("--verbose".into());
        }
        args
    }
}

/// Sleeps in `poll`-sized slices; returns `false` if cancelled early.
pub fn interruptible_sleep(total: Duration, cancel: &AtomicBool, poll: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(poll.min(deadline - now));
    }
}

#[derive(Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

pub struct ScenarioRunner {
    config: RunnerConfig,
    ctx: RunContext,
    launcher: Arc<dyn ProcessLauncher>,
    emulator: Option<NetworkEmulator>,
    validator: SlaValidator,
    results: Vec<ScenarioResult>,
}

impl ScenarioRunner {
    pub fn new(config: RunnerConfig, ctx: RunContext, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let validator = ctx.validator();
        Self {
            config,
            ctx,
            launcher,
            emulator: None,
            validator,
            results: Vec::new(),
        }
    }

    /// Apply each scenario's network condition through `emulator`.
    pub fn with_emulator(mut self, emulator: NetworkEmulator) -> Self {
        self.emulator = Some(emulator);
        self
    }

    pub fn results(&self) -> &[ScenarioResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ScenarioResult> {
        self.results
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Runs `scenarios` in order. Stops early with [`HarnessError::Cancelled`]
    /// once the cancel flag is seen; results gathered so far are kept and
    /// persisted.
    pub fn run_all(&mut self, scenarios: &[TestScenario]) -> Result<&[ScenarioResult], HarnessError> {
        let out = self.ctx.output_dir.clone();
        fs::create_dir_all(&out)
            .map_err(|e| HarnessError::io("failed to create output directory", &out, e))?;

        tracing::info!(
            scenarios = scenarios.len(),
            gates = %self.ctx.gates.name,
            output = %out.display(),
            "starting test run"
        );

        for (i, scenario) in scenarios.iter().enumerate() {
            if self.ctx.is_cancelled() {
                tracing::warn!(completed = i, "run cancelled before {}", scenario.id);
                return Err(HarnessError::Cancelled);
            }

            let result = self.run_one(scenario);
            tracing::info!(
                scenario = %result.scenario_id,
                passed = result.passed,
                score = result.sla.score,
                errors = result.errors.len(),
                "{}",
                result.sla.summary
            );
            self.results.push(result);
            self.persist();

            if self.ctx.is_cancelled() {
                return Err(HarnessError::Cancelled);
            }
            if i + 1 < scenarios.len()
                && !interruptible_sleep(
                    self.config.cooldown,
                    &self.ctx.cancel,
                    self.config.poll_interval,
                )
            {
                return Err(HarnessError::Cancelled);
            }
        }
        Ok(&self.results)
    }

    /// Executes one scenario end to end. Never fails: problems are recorded
    /// in the returned result.
    pub fn run_one(&mut self, scenario: &TestScenario) -> ScenarioResult {
        let start_time = Utc::now();
        let started = Instant::now();
        let dir = self.ctx.scenario_dir(&scenario.id);
        let mut findings = Findings::default();

        tracing::info!(scenario = %scenario.id, "{}", scenario.description);

        if let Err(e) = fs::create_dir_all(&dir) {
            findings
                .errors
                .push(format!("failed to create {}: {e}", dir.display()));
        }
        clear_stale_artifacts(&dir, &mut findings);

        self.start_emulation(scenario, &mut findings);
        self.drive_processes(scenario, &dir, &mut findings);
        self.stop_emulation(&mut findings);

        let reported = read_metrics(&dir.join("metrics.json"), &mut findings);
        let (metrics, estimated_fields) = measure(scenario, reported.as_ref());
        let sla_input = reported
            .as_ref()
            .map(ScenarioMetrics::to_sla_metrics)
            .unwrap_or_else(SlaMetrics::default);
        let sla = self.validator.validate(&sla_input);

        let result = ScenarioResult {
            scenario_id: scenario.id.clone(),
            description: scenario.description.clone(),
            start_time,
            end_time: Utc::now(),
            duration_secs: started.elapsed().as_secs_f64(),
            metrics,
            estimated_fields,
            passed: sla.passed && findings.errors.is_empty(),
            errors: findings.errors,
            warnings: findings.warnings,
            sla,
        };
        write_json(&dir.join("result.json"), &result);
        result
    }

    fn start_emulation(&self, scenario: &TestScenario, findings: &mut Findings) {
        let Some(emu) = &self.emulator else { return };
        let applied = emu
            .update_config(scenario.network_condition())
            .and_then(|()| emu.start());
        if let Err(e) = applied {
            tracing::error!(scenario = %scenario.id, error = %e, "network emulation failed");
            findings.errors.push(format!("network emulation failed: {e}"));
        }
    }

    fn stop_emulation(&self, findings: &mut Findings) {
        let Some(emu) = &self.emulator else { return };
        if let Err(e) = emu.ensure_stopped() {
            tracing::warn!(error = %e, "failed to revert network emulation");
            findings
                .warnings
                .push(format!("failed to revert network emulation: {e}"));
        }
    }

    fn spec(&self, role: ProcessRole, dir: &Path, args: Vec<String>) -> LaunchSpec {
        LaunchSpec {
            role,
            program: self.config.binary.clone(),
            args,
            workdir: dir.to_path_buf(),
            log_path: dir.join(format!("{role}.log")),
        }
    }

    fn drive_processes(&self, scenario: &TestScenario, dir: &Path, findings: &mut Findings) {
        let cfg = &self.config;
        let server_spec = self.spec(
            ProcessRole::Server,
            dir,
            cfg.server_args(dir, &self.ctx.gates),
        );
        let mut server = match self.launcher.launch(&server_spec) {
            Ok(h) => h,
            Err(e) => {
                findings.errors.push(format!("failed to start server: {e}"));
                return;
            }
        };

        if interruptible_sleep(cfg.settle, &self.ctx.cancel, cfg.poll_interval) {
            match server.try_wait() {
                Ok(Some(exit)) => findings
                    .errors
                    .push(format!("server exited before client start ({exit})")),
                Ok(None) => self.drive_client(scenario, dir, findings),
                Err(e) => findings.errors.push(format!("failed to poll server: {e}")),
            }
        } else {
            findings.warnings.push("cancelled before client start".into());
        }

        stop_server(server.as_mut(), cfg.teardown_grace, findings);
    }

    fn drive_client(&self, scenario: &TestScenario, dir: &Path, findings: &mut Findings) {
        let cfg = &self.config;
        let spec = self.spec(ProcessRole::Client, dir, cfg.client_args(dir, scenario));
        let mut client = match self.launcher.launch(&spec) {
            Ok(h) => h,
            Err(e) => {
                findings.errors.push(format!("failed to start client: {e}"));
                return;
            }
        };

        let allowed = scenario.duration() + cfg.client_grace;
        let outcome = wait_until(
            client.as_mut(),
            Instant::now() + allowed,
            &self.ctx.cancel,
            cfg.poll_interval,
        );
        let must_stop = match outcome {
            Ok(WaitOutcome::Exited(exit)) => {
                if !exit.success {
                    findings.errors.push(format!("client failed: {exit}"));
                }
                false
            }
            Ok(WaitOutcome::TimedOut) => {
                tracing::warn!(scenario = %scenario.id, allowed = ?allowed, "client timed out");
                findings
                    .errors
                    .push(format!("client did not finish within {}s", allowed.as_secs()));
                true
            }
            Ok(WaitOutcome::Cancelled) => {
                findings.warnings.push("cancelled while client was running".into());
                true
            }
            Err(e) => {
                findings.errors.push(format!("failed to wait for client: {e}"));
                true
            }
        };
        if must_stop {
            if let Err(e) = client.terminate(cfg.teardown_grace) {
                findings.errors.push(format!("failed to stop client: {e}"));
            }
        }
    }

    fn persist(&self) {
        write_json(&self.ctx.results_path(), &self.results);
    }
}

fn stop_server(server: &mut dyn ProcessHandle, grace: Duration, findings: &mut Findings) {
    match server.terminate(grace) {
        Ok(StopOutcome::Graceful(_)) => {}
        Ok(StopOutcome::AlreadyExited(exit)) => {
            if !exit.success {
                findings
                    .errors
                    .push(format!("server exited during the run ({exit})"));
            }
        }
        Ok(StopOutcome::Killed) => findings
            .warnings
            .push("server ignored SIGINT and was killed".into()),
        Err(e) => findings.errors.push(format!("failed to stop server: {e}")),
    }
}

/// Cleared before every scenario so an earlier run's output is never read back.
const SCENARIO_ARTIFACTS: [&str; 2] = ["metrics.json", "result.json"];

fn clear_stale_artifacts(dir: &Path, findings: &mut Findings) {
    for name in SCENARIO_ARTIFACTS {
        let path = dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove stale artifact");
                findings
                    .errors
                    .push(format!("failed to remove stale {}: {e}", path.display()));
            }
        }
    }
}

fn read_metrics(path: &Path, findings: &mut Findings) -> Option<ScenarioMetrics> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            findings
                .warnings
                .push(format!("no metrics at {}: {e}", path.display()));
            return None;
        }
    };
    match ScenarioMetrics::from_json_str(&raw) {
        Ok(m) => Some(m),
        Err(e) => {
            findings
                .warnings
                .push(format!("unparsable metrics at {}: {e}", path.display()));
            None
        }
    }
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) {
    let written = serde_json::to_vec_pretty(value)
        .map_err(std::io::Error::other)
        .and_then(|bytes| fs::write(path, bytes));
    if let Err(e) = written {
        tracing::warn!(path = %path.display(), error = %e, "failed to persist results");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixPreset;
    use quicperf_sla::SlaProfile;

    fn scenario() -> TestScenario {
        MatrixPreset::Light.matrix().generate_scenarios().remove(0)
    }

    #[test]
    fn server_args_carry_defaults_and_gates() {
        let cfg = RunnerConfig::default();
        let args = cfg.server_args(Path::new("/out/test_001"), &SlaProfile::Normal.gates());
        let joined = args.join(" ");
        assert_eq!(
            joined,
            "--mode server --addr :9000 --cc bbrv2 --ack-freq 2 --fec --fec-redundancy 0.1 \
             --greasing --qlog /out/test_001/server-qlog --verbose \
             --sla-p95-rtt 100 --sla-loss 5 --sla-goodput 10"
        );
    }

    #[test]
    fn client_args_follow_scenario() {
        let cfg = RunnerConfig {
            verbose: false,
            ..RunnerConfig::default()
        };
        let args = cfg.client_args(Path::new("/o/t"), &scenario()).join(" ");
        assert_eq!(
            args,
            "--mode client --addr 127.0.0.1:9000 --connections 1 --streams 1 --duration 10s \
             --packet-size 1200 --rate 100 --qlog /o/t/client-qlog \
             --report /o/t/metrics.json --report-format json"
        );
    }

    #[test]
    fn disabled_gates_are_not_forwarded() {
        let cfg = RunnerConfig {
            fec: false,
            greasing: false,
            ..RunnerConfig::default()
        };
        let args = cfg.server_args(Path::new("/x"), &SlaGateSet::empty("none"));
        assert!(!args.iter().any(|a| a.starts_with("--sla") || a.starts_with("--fec")));
        assert!(!args.contains(&"--greasing".to_string()));
    }

    #[test]
    fn sleep_stops_on_cancel() {
        let cancel = AtomicBool::new(true);
        let started = Instant::now();
        assert!(!interruptible_sleep(
            Duration::from_secs(10),
            &cancel,
            Duration::from_millis(10)
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
        let go = AtomicBool::new(false);
        assert!(interruptible_sleep(
            Duration::from_millis(20),
            &go,
            Duration::from_millis(5)
        ));
    }
}
