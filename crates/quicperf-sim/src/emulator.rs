//! Idle/Active state machine that applies a [`NetworkCondition`] to one
//! interface through a [`NetworkShaper`].

use crate::condition::NetworkCondition;
use crate::presets;
use crate::shaper::{NetworkShaper, TcDirective};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("network emulation is already active")]
    AlreadyActive,
    #[error("network emulation is not active")]
    NotActive,
    #[error("unknown network preset: {0}")]
    UnknownPreset(String),
    #[error("invalid network condition: {0}")]
    InvalidCondition(String),
    #[error("failed to resolve network interface: {0}")]
    Interface(#[source] io::Error),
    #[error("failed to remove qdisc from {interface}: {source}")]
    Teardown {
        interface: String,
        #[source]
        source: io::Error,
    },
}

enum State {
    Idle,
    Active {
        interface: String,
        // Dropping the sender wakes and cancels the deferred-stop thread.
        _timer: Option<Sender<()>>,
    },
}

struct Inner {
    condition: NetworkCondition,
    state: State,
    generation: u64,
}

struct Shared {
    shaper: Arc<dyn NetworkShaper>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_locked(&self, inner: &mut Inner) -> Result<(), EmulatorError> {
        let interface = match std::mem::replace(&mut inner.state, State::Idle) {
            State::Idle => return Err(EmulatorError::NotActive),
            State::Active { interface, .. } => interface,
        };
        inner.generation += 1;

        let teardown = TcDirective::teardown(&interface);
        match self.shaper.execute(&teardown) {
            Ok(()) => {
                tracing::info!(interface = %interface, "network emulation stopped");
                Ok(())
            }
            Err(source) => {
                tracing::warn!(interface = %interface, error = %source, "failed to remove qdisc");
                Err(EmulatorError::Teardown { interface, source })
            }
        }
    }
}

/// Applies network impairments to a single interface.
///
/// Cloning yields another handle onto the same emulator.
#[derive(Clone)]
pub struct NetworkEmulator {
    shared: Arc<Shared>,
    interface_override: Option<String>,
}

impl NetworkEmulator {
    pub fn new(shaper: Arc<dyn NetworkShaper>) -> Self {
        Self {
            shared: Arc::new(Shared {
                shaper,
                inner: Mutex::new(Inner {
                    condition: NetworkCondition::CLEAR,
                    state: State::Idle,
                    generation: 0,
                }),
            }),
            interface_override: None,
        }
    }

    /// Use `interface` instead of the default-route interface.
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface_override = Some(interface.into());
        self
    }

    pub fn is_active(&self) -> bool {
        matches!(self.shared.lock().state, State::Active { .. })
    }

    pub fn condition(&self) -> NetworkCondition {
        self.shared.lock().condition
    }

    /// Interface currently being shaped, if active.
    pub fn active_interface(&self) -> Option<String> {
        match &self.shared.lock().state {
            State::Active { interface, .. } => Some(interface.clone()),
            State::Idle => None,
        }
    }

    /// Installs the current condition.
    ///
    /// Individual directive failures are logged and skipped; only a
    /// double start or an unresolvable interface is an error.
    pub fn start(&self) -> Result<(), EmulatorError> {
        let mut inner = self.shared.lock();
        if matches!(inner.state, State::Active { .. }) {
            return Err(EmulatorError::AlreadyActive);
        }

        let interface = match &self.interface_override {
            Some(iface) => iface.clone(),
            None => self
                .shared
                .shaper
                .default_interface()
                .map_err(EmulatorError::Interface)?,
        };

        let condition = inner.condition;
        tracing::info!(interface = %interface, condition = %condition, "starting network emulation");

        let directives = condition.directives(&interface);
        let mut failed = 0usize;
        for directive in &directives {
            if let Err(e) = self.shared.shaper.execute(directive) {
                failed += 1;
                tracing::warn!(
                    step = directive.kind.as_str(),
                    directive = %directive,
                    error = %e,
                    "tc directive failed, continuing"
                );
            }
        }
        if failed > 0 {
            tracing::warn!(failed, total = directives.len(), "network emulation partially applied");
        }

        inner.generation += 1;
        let timer = condition
            .duration
            .map(|d| self.schedule_stop(d, inner.generation));
        inner.state = State::Active {
            interface,
            _timer: timer,
        };
        Ok(())
    }

    /// Removes the impairment. The emulator is Idle afterwards even when
    /// the removal itself fails; that failure is still returned.
    pub fn stop(&self) -> Result<(), EmulatorError> {
        let mut inner = self.shared.lock();
        self.shared.stop_locked(&mut inner)
    }

    /// Like [`stop`](Self::stop) but Idle is not an error, so it cannot lose
    /// a race with the automatic stop. Returns whether anything was removed.
    pub fn ensure_stopped(&self) -> Result<bool, EmulatorError> {
        let mut inner = self.shared.lock();
        match self.shared.stop_locked(&mut inner) {
            Ok(()) => Ok(true),
            Err(EmulatorError::NotActive) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Replaces the condition. An active emulation is stopped first and
    /// must be restarted explicitly.
    pub fn update_config(&self, condition: NetworkCondition) -> Result<(), EmulatorError> {
        condition.validate().map_err(EmulatorError::InvalidCondition)?;
        let mut inner = self.shared.lock();
        if matches!(inner.state, State::Active { .. }) {
            if let Err(e) = self.shared.stop_locked(&mut inner) {
                tracing::warn!(error = %e, "stop before reconfigure failed");
            }
        }
        inner.condition = condition;
        Ok(())
    }

    pub fn apply_preset(&self, name: &str) -> Result<(), EmulatorError> {
        let preset =
            presets::lookup(name).ok_or_else(|| EmulatorError::UnknownPreset(name.to_string()))?;
        tracing::info!(preset = preset.name, "applying network preset");
        self.update_config(preset.condition)
    }

    fn schedule_stop(&self, after: Duration, generation: u64) -> Sender<()> {
        let (tx, rx) = bounded::<()>(0);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("netem-autostop".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(after) {
                    let mut inner = shared.lock();
                    if inner.generation == generation {
                        tracing::info!(after = ?after, "condition duration elapsed");
                        let _ = shared.stop_locked(&mut inner);
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to schedule automatic stop");
        }
        tx
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let State::Active { interface, .. } = &inner.state {
            let _ = self.shaper.execute(&TcDirective::teardown(interface));
        }
    }
}
