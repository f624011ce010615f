use crate::shaper::TcShaper;
use std::io;
use std::process::{Command, Output};

/// A throwaway Linux network namespace, removed on drop.
///
/// Used to exercise real `tc` shaping without touching the host's
/// interfaces.
pub struct Namespace {
    pub name: String,
}

fn sudo(args: &[&str]) -> io::Result<Output> {
    Command::new("sudo").args(args).output()
}

fn check(output: Output, what: &str) -> io::Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "{what}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

impl Namespace {
    pub fn new(name: &str) -> io::Result<Self> {
        let _ = sudo(&["ip", "netns", "del", name]);
        check(sudo(&["ip", "netns", "add", name])?, "failed to create netns")?;

        let ns = Self {
            name: name.to_string(),
        };
        check(ns.exec("ip", &["link", "set", "lo", "up"])?, "failed to bring up lo")?;
        Ok(ns)
    }

    pub fn exec(&self, cmd: &str, args: &[&str]) -> io::Result<Output> {
        Command::new("sudo")
            .args(["ip", "netns", "exec", &self.name, cmd])
            .args(args)
            .output()
    }

    /// A shaper whose `tc` commands run inside this namespace.
    pub fn shaper(&self) -> TcShaper {
        TcShaper::new().with_sudo(true).in_namespace(&self.name)
    }

    /// Creates a veth pair between `self` and `peer` and brings both ends up.
    pub fn add_veth_link(
        &self,
        peer: &Namespace,
        local: (&str, &str),
        remote: (&str, &str),
    ) -> io::Result<()> {
        let (local_if, local_ip) = local;
        let (peer_if, peer_ip) = remote;
        let _ = sudo(&["ip", "link", "del", local_if]);

        check(
            sudo(&["ip", "link", "add", local_if, "type", "veth", "peer", "name", peer_if])?,
            "failed to create veth pair",
        )?;
        check(
            sudo(&["ip", "link", "set", local_if, "netns", &self.name])?,
            "failed to move local veth",
        )?;
        check(
            sudo(&["ip", "link", "set", peer_if, "netns", &peer.name])?,
            "failed to move peer veth",
        )?;

        for (ns, iface, ip) in [(self, local_if, local_ip), (peer, peer_if, peer_ip)] {
            check(
                ns.exec("ip", &["addr", "add", ip, "dev", iface])?,
                "failed to assign address",
            )?;
            check(
                ns.exec("ip", &["link", "set", iface, "up"])?,
                "failed to bring link up",
            )?;
        }
        Ok(())
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        let _ = Command::new("sudo")
            .args(["ip", "netns", "del", &self.name])
            .status();
    }
}
