//! Scenario runner end to end, with scripted processes instead of the
//! real protocol binary.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quicperf_harness::process::{ProcessExit, ProcessRole, StopOutcome};
use quicperf_harness::{
    HarnessError, LaunchSpec, MatrixSummary, ProcessHandle, ProcessLauncher, RunContext,
    RunnerConfig, ScenarioResult, ScenarioRunner, TestMatrix, TestScenario,
};
use quicperf_sim::test_util::RecordingShaper;
use quicperf_sim::{DirectiveKind, NetworkEmulator};
use quicperf_sla::SlaProfile;

const GOOD_METRICS: &str = r#"{
    "goodput_mbps": 20.0,
    "throughput_mbps": 22.0,
    "latency_min_ms": 6.0,
    "latency_mean_ms": 8.0,
    "latency_max_ms": 15.0,
    "latency_p95_ms": 10.0,
    "latency_p99_ms": 12.0,
    "loss_rate_percent": 0.0,
    "bandwidth_bps": 20000000.0,
    "cwnd_bytes": 50000,
    "ack_delay_ms": 5.0,
    "ack_frequency": 2,
    "fec_redundancy": 0.1,
    "fec_recovery_rate": 0.9
}"#;

#[derive(Debug, Clone, Copy)]
enum Script {
    /// Exits with `code` on the `after_polls`-th status check.
    Exit { after_polls: u32, code: i32 },
    /// Runs until asked to stop.
    Hang,
    /// Runs until asked to stop, then the stop request fails.
    Stuck,
}

struct FakeLauncher {
    server: Script,
    client: Script,
    metrics: Option<&'static str>,
    cancel_on_client: Option<Arc<AtomicBool>>,
    launches: Mutex<Vec<LaunchSpec>>,
}

impl FakeLauncher {
    fn new(server: Script, client: Script) -> Self {
        Self {
            server,
            client,
            metrics: None,
            cancel_on_client: None,
            launches: Mutex::new(Vec::new()),
        }
    }

    fn with_metrics(mut self, json: &'static str) -> Self {
        self.metrics = Some(json);
        self
    }

    fn cancelling(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_on_client = Some(flag);
        self
    }

    fn launched(&self, role: ProcessRole) -> usize {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.role == role)
            .count()
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ProcessHandle>> {
        self.launches.lock().unwrap().push(spec.clone());
        let script = match spec.role {
            ProcessRole::Server => self.server,
            ProcessRole::Client => {
                if let Some(json) = self.metrics {
                    fs::write(spec.workdir.join("metrics.json"), json)?;
                }
                if let Some(flag) = &self.cancel_on_client {
                    flag.store(true, Ordering::SeqCst);
                }
                self.client
            }
        };
        Ok(Box::new(FakeProcess {
            script,
            polls: 0,
            exited: None,
        }))
    }
}

struct FakeProcess {
    script: Script,
    polls: u32,
    exited: Option<ProcessExit>,
}

impl ProcessHandle for FakeProcess {
    fn id(&self) -> u32 {
        4242
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        if self.exited.is_some() {
            return Ok(self.exited);
        }
        if let Script::Exit { after_polls, code } = self.script {
            self.polls += 1;
            if self.polls >= after_polls {
                self.exited = Some(ProcessExit {
                    code: Some(code),
                    success: code == 0,
                });
            }
        }
        Ok(self.exited)
    }

    fn terminate(&mut self, _grace: Duration) -> io::Result<StopOutcome> {
        if let Some(exit) = self.exited {
            return Ok(StopOutcome::AlreadyExited(exit));
        }
        match self.script {
            Script::Stuck => Err(io::Error::other("process refused to stop")),
            _ => {
                let exit = ProcessExit {
                    code: Some(0),
                    success: true,
                };
                self.exited = Some(exit);
                Ok(StopOutcome::Graceful(exit))
            }
        }
    }
}

fn scenarios(count: usize) -> Vec<TestScenario> {
    let matrix = TestMatrix {
        packet_rates: vec![100],
        connection_counts: vec![1],
        loss_rates_percent: vec![0.0, 1.0, 2.0, 3.0][..count].to_vec(),
        rtts: vec![Duration::from_millis(20)],
        packet_size: 1200,
        duration: Duration::ZERO,
        streams_per_connection: 1,
        warmup: Duration::ZERO,
        cooldown: Duration::ZERO,
        iterations: 1,
    };
    matrix.generate_scenarios()
}

fn fast_config() -> RunnerConfig {
    RunnerConfig {
        settle: Duration::ZERO,
        client_grace: Duration::from_millis(50),
        teardown_grace: Duration::from_millis(10),
        cooldown: Duration::ZERO,
        poll_interval: Duration::from_millis(2),
        ..RunnerConfig::default()
    }
}

fn runner(out: &Path, launcher: Arc<FakeLauncher>) -> ScenarioRunner {
    let ctx = RunContext::new(SlaProfile::Normal.gates(), out);
    ScenarioRunner::new(fast_config(), ctx, launcher)
}

fn persisted(out: &Path) -> Vec<ScenarioResult> {
    serde_json::from_str(&fs::read_to_string(out.join("results.json")).unwrap()).unwrap()
}

#[test]
fn clean_run_passes_and_writes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        FakeLauncher::new(Script::Hang, Script::Exit { after_polls: 2, code: 0 })
            .with_metrics(GOOD_METRICS),
    );
    let mut runner = runner(dir.path(), launcher.clone());
    let list = scenarios(2);

    let results = runner.run_all(&list).unwrap().to_vec();
    assert_eq!(results.len(), 2);
    for r in &results {
        assert!(r.passed, "{}: {:?} {:?}", r.scenario_id, r.errors, r.sla.violations);
        assert!(r.errors.is_empty());
        assert!(!r.estimated_fields.contains(&"goodput_mbps".to_string()));
        assert_eq!(r.metrics.goodput_mbps, 20.0);
        assert!(dir.path().join(&r.scenario_id).join("result.json").exists());
    }
    assert_eq!(launcher.launched(ProcessRole::Server), 2);
    assert_eq!(launcher.launched(ProcessRole::Client), 2);
    let ids: Vec<_> = persisted(dir.path())
        .into_iter()
        .map(|r| r.scenario_id)
        .collect();
    assert_eq!(ids, vec!["test_001", "test_002"]);

    let summary = MatrixSummary::from_results(&results);
    assert_eq!(summary.exit_code, 0);
    assert_eq!(summary.passed, 2);
}

#[test]
fn client_timeout_fails_scenario_and_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(FakeLauncher::new(Script::Hang, Script::Hang));
    let mut runner = runner(dir.path(), launcher.clone());

    let results = runner.run_all(&scenarios(2)).unwrap().to_vec();
    assert_eq!(results.len(), 2);
    for r in &results {
        assert!(!r.passed);
        assert!(r.has_runtime_errors());
        assert!(r.errors.iter().any(|e| e.contains("did not finish")), "{:?}", r.errors);
    }
    assert_eq!(MatrixSummary::from_results(&results).exit_code, 2);
}

#[test]
fn failing_client_is_a_runtime_error() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        FakeLauncher::new(Script::Hang, Script::Exit { after_polls: 1, code: 3 })
            .with_metrics(GOOD_METRICS),
    );
    let mut runner = runner(dir.path(), launcher);
    let r = runner.run_one(&scenarios(1)[0]);
    assert!(r.sla.passed);
    assert!(!r.passed);
    assert!(r.errors.iter().any(|e| e.contains("client failed: exit code 3")));
}

#[test]
fn server_stop_failure_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        FakeLauncher::new(Script::Stuck, Script::Exit { after_polls: 1, code: 0 })
            .with_metrics(GOOD_METRICS),
    );
    let mut runner = runner(dir.path(), launcher);
    let r = runner.run_one(&scenarios(1)[0]);
    assert!(!r.passed);
    assert!(r.errors.iter().any(|e| e.contains("failed to stop server")));
}

#[test]
fn server_dying_early_skips_client() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(FakeLauncher::new(
        Script::Exit { after_polls: 1, code: 1 },
        Script::Exit { after_polls: 1, code: 0 },
    ));
    let mut runner = runner(dir.path(), launcher.clone());
    let r = runner.run_one(&scenarios(1)[0]);
    assert!(r.errors.iter().any(|e| e.contains("server exited before client start")));
    assert_eq!(launcher.launched(ProcessRole::Client), 0);
}

#[test]
fn missing_metrics_warns_and_estimates() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(FakeLauncher::new(
        Script::Hang,
        Script::Exit { after_polls: 1, code: 0 },
    ));
    let mut runner = runner(dir.path(), launcher);
    let scenario = &scenarios(1)[0];
    let r = runner.run_one(scenario);

    assert!(r.errors.is_empty());
    assert!(r.warnings.iter().any(|w| w.contains("no metrics")));
    assert!(r.estimated_fields.contains(&"goodput_mbps".to_string()));
    assert_eq!(r.metrics.latency_mean_ms, scenario.rtt_ms as f64 + 1.0);
}

#[test]
fn leftovers_from_earlier_run_are_not_reused() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = &scenarios(1)[0];
    let scenario_dir = dir.path().join(&scenario.id);
    fs::create_dir_all(&scenario_dir).unwrap();
    fs::write(scenario_dir.join("metrics.json"), GOOD_METRICS).unwrap();
    fs::write(scenario_dir.join("result.json"), "{}").unwrap();

    let launcher = Arc::new(FakeLauncher::new(
        Script::Hang,
        Script::Exit { after_polls: 1, code: 0 },
    ));
    let mut runner = runner(dir.path(), launcher);
    let r = runner.run_one(scenario);

    assert!(r.warnings.iter().any(|w| w.contains("no metrics")), "{:?}", r.warnings);
    assert!(r.estimated_fields.contains(&"goodput_mbps".to_string()));
    assert_ne!(r.metrics.goodput_mbps, 20.0);
    assert!(!scenario_dir.join("metrics.json").exists());
    let written: ScenarioResult =
        serde_json::from_str(&fs::read_to_string(scenario_dir.join("result.json")).unwrap())
            .unwrap();
    assert_eq!(written.scenario_id, scenario.id);
}

#[test]
fn cancellation_keeps_partial_results() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    let launcher = Arc::new(
        FakeLauncher::new(Script::Hang, Script::Exit { after_polls: 1, code: 0 })
            .with_metrics(GOOD_METRICS)
            .cancelling(cancel.clone()),
    );
    let ctx = RunContext::new(SlaProfile::Normal.gates(), dir.path()).with_cancel_flag(cancel);
    let mut runner = ScenarioRunner::new(fast_config(), ctx, launcher.clone());

    let err = runner.run_all(&scenarios(3)).unwrap_err();
    assert!(matches!(err, HarnessError::Cancelled));
    assert_eq!(runner.results().len(), 1);
    assert_eq!(launcher.launched(ProcessRole::Server), 1);
    assert_eq!(persisted(dir.path()).len(), 1);
}

#[test]
fn emulation_is_reverted_after_every_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let shaper = Arc::new(RecordingShaper::new("veth-qp"));
    let launcher = Arc::new(
        FakeLauncher::new(Script::Hang, Script::Exit { after_polls: 1, code: 7 })
            .with_metrics(GOOD_METRICS),
    );
    let mut runner =
        runner(dir.path(), launcher).with_emulator(NetworkEmulator::new(shaper.clone()));

    let results = runner.run_all(&scenarios(3)).unwrap().to_vec();
    assert!(results.iter().all(|r| !r.passed));
    assert_eq!(shaper.count(DirectiveKind::Teardown), 3);
    assert_eq!(shaper.count(DirectiveKind::RootQdisc), 3);
    assert_eq!(
        shaper.issued().last().map(|d| d.kind),
        Some(DirectiveKind::Teardown)
    );
}

#[test]
fn emulation_failure_is_a_scenario_error() {
    let dir = tempfile::tempdir().unwrap();
    let shaper = Arc::new(RecordingShaper::new("veth-qp").failing_interface_lookup());
    let launcher = Arc::new(
        FakeLauncher::new(Script::Hang, Script::Exit { after_polls: 1, code: 0 })
            .with_metrics(GOOD_METRICS),
    );
    let mut runner =
        runner(dir.path(), launcher).with_emulator(NetworkEmulator::new(shaper.clone()));

    let r = runner.run_one(&scenarios(1)[0]);
    assert!(!r.passed);
    assert!(r.errors.iter().any(|e| e.contains("network emulation failed")));
    assert!(r.warnings.is_empty(), "{:?}", r.warnings);
    assert_eq!(shaper.count(DirectiveKind::Teardown), 0);
}
