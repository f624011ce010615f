//! OS traffic-control adapter.
//!
//! The emulator decides *which* directives to issue and in what order;
//! a [`NetworkShaper`] only knows how to run one directive and how to find
//! the default outbound interface. [`TcShaper`] shells out to `tc` / `ip`,
//! optionally through `sudo` and inside a network namespace.

use std::fmt;
use std::io;
use std::process::{Command, Output};

/// Which step of the emulation a directive belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    RootQdisc,
    DefaultClass,
    Delay,
    Loss,
    BandwidthClass,
    BandwidthFilter,
    Duplicate,
    Reorder,
    Corrupt,
    Teardown,
}

impl DirectiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectiveKind::RootQdisc => "root_qdisc",
            DirectiveKind::DefaultClass => "default_class",
            DirectiveKind::Delay => "delay",
            DirectiveKind::Loss => "loss",
            DirectiveKind::BandwidthClass => "bandwidth_class",
            DirectiveKind::BandwidthFilter => "bandwidth_filter",
            DirectiveKind::Duplicate => "duplicate",
            DirectiveKind::Reorder => "reorder",
            DirectiveKind::Corrupt => "corrupt",
            DirectiveKind::Teardown => "teardown",
        }
    }
}

/// One `tc` invocation. `args` excludes the `tc` program name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcDirective {
    pub kind: DirectiveKind,
    pub args: Vec<String>,
}

impl TcDirective {
    pub fn new<I, S>(kind: DirectiveKind, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Removes every queueing discipline installed on `interface`.
    pub fn teardown(interface: &str) -> Self {
        Self::new(
            DirectiveKind::Teardown,
            ["qdisc", "del", "dev", interface, "root"],
        )
    }
}

impl fmt::Display for TcDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tc {}", self.args.join(" "))
    }
}

/// Narrow adapter over the host's traffic-control facility.
pub trait NetworkShaper: Send + Sync {
    /// Interface carrying the default route.
    fn default_interface(&self) -> io::Result<String>;

    /// Runs a single directive. A non-zero exit is an error.
    fn execute(&self, directive: &TcDirective) -> io::Result<()>;
}

/// Runs directives with the real `tc` binary.
#[derive(Debug, Clone, Default)]
pub struct TcShaper {
    use_sudo: bool,
    namespace: Option<String>,
}

impl TcShaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    /// Run every command inside `ip netns exec <name>`.
    pub fn in_namespace(mut self, name: impl Into<String>) -> Self {
        self.namespace = Some(name.into());
        self
    }

    fn command(&self, program: &str, args: &[String]) -> Command {
        let mut prefix: Vec<String> = Vec::new();
        if self.use_sudo {
            prefix.push("sudo".into());
        }
        if let Some(ns) = &self.namespace {
            prefix.extend(["ip", "netns", "exec", ns.as_str()].map(String::from));
        }
        prefix.push(program.into());

        let mut cmd = Command::new(&prefix[0]);
        cmd.args(&prefix[1..]).args(args);
        cmd
    }

    fn run(&self, program: &str, args: &[String]) -> io::Result<Output> {
        self.command(program, args).output()
    }
}

impl NetworkShaper for TcShaper {
    fn default_interface(&self) -> io::Result<String> {
        let args: Vec<String> = ["route", "show", "default"].map(String::from).to_vec();
        let output = self.run("ip", &args)?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "ip route show default failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_default_interface(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no default route found"))
    }

    fn execute(&self, directive: &TcDirective) -> io::Result<()> {
        tracing::debug!(directive = %directive, "executing tc directive");
        let output = self.run("tc", &directive.args)?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{} failed: {}",
                directive,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Extracts the device from `ip route show default` output
/// (`default via 10.0.0.1 dev eth0 proto dhcp ...`).
pub fn parse_default_interface(output: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.trim_start().starts_with("default"))
        .find_map(|line| {
            let mut fields = line.split_whitespace();
            while let Some(field) = fields.next() {
                if field == "dev" {
                    return fields.next().map(str::to_string);
                }
            }
            None
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_route_device() {
        let out = "default via 192.168.1.1 dev wlp2s0 proto dhcp src 192.168.1.20 metric 600\n";
        assert_eq!(parse_default_interface(out).as_deref(), Some("wlp2s0"));
    }

    #[test]
    fn ignores_non_default_routes() {
        let out = "10.0.0.0/24 dev eth1 proto kernel scope link\n\
                   default dev tun0 scope link\n";
        assert_eq!(parse_default_interface(out).as_deref(), Some("tun0"));
        assert_eq!(parse_default_interface(""), None);
    }

    #[test]
    fn teardown_renders_single_delete() {
        assert_eq!(
            TcDirective::teardown("eth0").to_string(),
            "tc qdisc del dev eth0 root"
        );
    }

    #[test]
    fn command_prefixes_sudo_and_namespace() {
        let shaper = TcShaper::new().with_sudo(true).in_namespace("qp_ns");
        let cmd = shaper.command("tc", &["qdisc".to_string()]);
        assert_eq!(cmd.get_program(), "sudo");
        let args: Vec<_> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["ip", "netns", "exec", "qp_ns", "tc", "qdisc"]);
    }
}
