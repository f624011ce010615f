//! Helpers shared by unit tests, integration tests and downstream crates.

use crate::shaper::{DirectiveKind, NetworkShaper, TcDirective};
use std::io;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Whether `ip netns` works here. Privileged tests skip when it does not.
pub fn check_privileges() -> bool {
    match Command::new("ip").arg("netns").output() {
        Ok(o) => o.status.success(),
        Err(_) => false,
    }
}

/// Unique namespace name for parallel tests, capped at 15 characters.
pub fn unique_ns_name(prefix: &str) -> String {
    let seq = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = format!("{}_{:x}_{}", prefix, std::process::id() % 0xFFFF, seq);
    name.truncate(15);
    name
}

/// In-memory [`NetworkShaper`] that records every directive it is given.
///
/// Recorded directives include the ones it was told to fail, so tests can
/// assert the full attempted sequence.
#[derive(Debug, Default)]
pub struct RecordingShaper {
    interface: String,
    fail_kinds: Vec<DirectiveKind>,
    fail_lookup: bool,
    issued: Mutex<Vec<TcDirective>>,
}

impl RecordingShaper {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            ..Self::default()
        }
    }

    /// Make every directive of `kind` fail.
    pub fn fail_on(mut self, kind: DirectiveKind) -> Self {
        self.fail_kinds.push(kind);
        self
    }

    pub fn failing_interface_lookup(mut self) -> Self {
        self.fail_lookup = true;
        self
    }

    pub fn issued(&self) -> Vec<TcDirective> {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, kind: DirectiveKind) -> usize {
        self.issued().iter().filter(|d| d.kind == kind).count()
    }
}

impl NetworkShaper for RecordingShaper {
    fn default_interface(&self) -> io::Result<String> {
        if self.fail_lookup {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no default route"));
        }
        Ok(self.interface.clone())
    }

    fn execute(&self, directive: &TcDirective) -> io::Result<()> {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(directive.clone());
        if self.fail_kinds.contains(&directive.kind) {
            return Err(io::Error::other(format!("injected failure: {directive}")));
        }
        Ok(())
    }
}
