use crate::shaper::{DirectiveKind, TcDirective};
use std::fmt;
use std::time::Duration;

/// Rate given to the default htb class when no bandwidth cap is requested.
pub const UNCAPPED_RATE: &str = "10gbit";

/// Gilbert-Elliott (4-state) loss model parameters for `tc netem`.
///
/// All values are probabilities in `[0, 1]`; they are rendered as
/// percentages in netem order `p r 1-h 1-k`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GilbertElliott {
    /// Probability Good -> Bad.
    pub p_good_to_bad: f64,
    /// Probability Bad -> Good.
    pub r_bad_to_good: f64,
    /// Loss probability while in the Bad state (`1-h`).
    pub loss_in_bad: f64,
    /// Loss probability while in the Good state (`1-k`).
    pub loss_in_good: f64,
}

/// Abstract network impairment applied to one interface.
///
/// Rates are fractions in `[0, 1]`. Zero / `None` / `false` means the
/// corresponding directive is not issued.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkCondition {
    pub latency: Duration,
    pub jitter: Duration,
    pub loss_rate: f64,
    pub duplication_rate: f64,
    pub corruption_rate: f64,
    pub reordering: bool,
    pub bandwidth_cap_bps: Option<u64>,
    /// Correlated loss. When set it replaces the plain `loss_rate` directive.
    pub burst_loss: Option<GilbertElliott>,
    /// Self-scheduled stop after this long.
    pub duration: Option<Duration>,
}

impl NetworkCondition {
    /// No impairment at all.
    pub const CLEAR: NetworkCondition = NetworkCondition {
        latency: Duration::ZERO,
        jitter: Duration::ZERO,
        loss_rate: 0.0,
        duplication_rate: 0.0,
        corruption_rate: 0.0,
        reordering: false,
        bandwidth_cap_bps: None,
        burst_loss: None,
        duration: None,
    };

    pub fn is_clear(&self) -> bool {
        self.latency.is_zero()
            && self.loss_rate <= 0.0
            && self.duplication_rate <= 0.0
            && self.corruption_rate <= 0.0
            && !self.reordering
            && self.bandwidth_cap_bps.is_none()
            && self.burst_loss.is_none()
    }

    /// Checks that every rate is a probability.
    pub fn validate(&self) -> Result<(), String> {
        let mut rates = vec![
            ("loss_rate", self.loss_rate),
            ("duplication_rate", self.duplication_rate),
            ("corruption_rate", self.corruption_rate),
        ];
        if let Some(ge) = &self.burst_loss {
            rates.push(("burst_loss.p_good_to_bad", ge.p_good_to_bad));
            rates.push(("burst_loss.r_bad_to_good", ge.r_bad_to_good));
            rates.push(("burst_loss.loss_in_bad", ge.loss_in_bad));
            rates.push(("burst_loss.loss_in_good", ge.loss_in_good));
        }
        for (name, value) in rates {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        if self.bandwidth_cap_bps == Some(0) {
            return Err("bandwidth_cap_bps must be positive when set".into());
        }
        Ok(())
    }

    /// Synthesizes the ordered `tc` directives that install this condition
    /// on `interface`.
    ///
    /// Order: root htb + default class, delay/jitter, loss, bandwidth
    /// class + filter, duplicate, reorder, corrupt. Netem parameters
    /// accumulate: the first netem directive is an `add`, every later one
    /// a `change` carrying all parameters issued so far, so a later step
    /// never resets an earlier one.
    ///
    /// netem only honours `reorder` when a delay is configured; without
    /// latency the kernel rejects that directive and it is skipped like
    /// any other failing step.
    pub fn directives(&self, interface: &str) -> Vec<TcDirective> {
        let mut out = vec![
            TcDirective::new(
                DirectiveKind::RootQdisc,
                [
                    "qdisc", "add", "dev", interface, "root", "handle", "1:", "htb", "default",
                    "30",
                ],
            ),
            TcDirective::new(
                DirectiveKind::DefaultClass,
                [
                    "class",
                    "add",
                    "dev",
                    interface,
                    "parent",
                    "1:",
                    "classid",
                    "1:30",
                    "htb",
                    "rate",
                    UNCAPPED_RATE,
                ],
            ),
        ];

        let mut netem = NetemParams::new(interface);

        if !self.latency.is_zero() {
            let mut params = vec!["delay".to_string(), tc_time(self.latency)];
            if !self.jitter.is_zero() {
                params.push(tc_time(self.jitter));
            }
            out.push(netem.push(DirectiveKind::Delay, params));
        }

        if let Some(ge) = &self.burst_loss {
            out.push(netem.push(
                DirectiveKind::Loss,
                vec![
                    "loss".into(),
                    "gemodel".into(),
                    tc_percent(ge.p_good_to_bad),
                    tc_percent(ge.r_bad_to_good),
                    tc_percent(ge.loss_in_bad),
                    tc_percent(ge.loss_in_good),
                ],
            ));
        } else if self.loss_rate > 0.0 {
            out.push(netem.push(
                DirectiveKind::Loss,
                vec!["loss".into(), tc_percent(self.loss_rate)],
            ));
        }

        if let Some(bps) = self.bandwidth_cap_bps {
            let rate = format!("{}kbit", (bps / 1000).max(1));
            out.push(TcDirective::new(
                DirectiveKind::BandwidthClass,
                [
                    "class", "change", "dev", interface, "parent", "1:", "classid", "1:30", "htb",
                    "rate", rate.as_str(), "ceil", rate.as_str(),
                ],
            ));
            out.push(TcDirective::new(
                DirectiveKind::BandwidthFilter,
                [
                    "filter", "add", "dev", interface, "parent", "1:", "protocol", "ip", "prio",
                    "1", "u32", "match", "ip", "dst", "0.0.0.0/0", "flowid", "1:30",
                ],
            ));
        }

        if self.duplication_rate > 0.0 {
            out.push(netem.push(
                DirectiveKind::Duplicate,
                vec!["duplicate".into(), tc_percent(self.duplication_rate)],
            ));
        }

        if self.reordering {
            out.push(netem.push(
                DirectiveKind::Reorder,
                vec!["reorder".into(), "25%".into(), "50%".into()],
            ));
        }

        if self.corruption_rate > 0.0 {
            out.push(netem.push(
                DirectiveKind::Corrupt,
                vec!["corrupt".into(), tc_percent(self.corruption_rate)],
            ));
        }

        out
    }
}

impl Default for NetworkCondition {
    fn default() -> Self {
        Self::CLEAR
    }
}

impl fmt::Display for NetworkCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "latency={:?} jitter={:?} loss={:.2}% dup={:.2}% corrupt={:.2}%",
            self.latency,
            self.jitter,
            self.loss_rate * 100.0,
            self.duplication_rate * 100.0,
            self.corruption_rate * 100.0
        )?;
        if self.reordering {
            write!(f, " reorder")?;
        }
        if self.burst_loss.is_some() {
            write!(f, " burst-loss")?;
        }
        if let Some(bps) = self.bandwidth_cap_bps {
            write!(f, " rate={}kbit", bps / 1000)?;
        }
        Ok(())
    }
}

/// Accumulated netem option list hanging off the default class.
struct NetemParams {
    interface: String,
    params: Vec<String>,
    installed: bool,
}

impl NetemParams {
    fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            params: Vec::new(),
            installed: false,
        }
    }

    fn push(&mut self, kind: DirectiveKind, params: Vec<String>) -> TcDirective {
        self.params.extend(params);
        let verb = if self.installed { "change" } else { "add" };
        self.installed = true;

        let mut args: Vec<String> = [
            "qdisc",
            verb,
            "dev",
            self.interface.as_str(),
            "parent",
            "1:30",
            "handle",
            "30:",
            "netem",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend(self.params.iter().cloned());
        TcDirective { kind, args }
    }
}

/// Renders a duration the way `tc` parses it (`ms` when whole, else `us`).
pub fn tc_time(d: Duration) -> String {
    let micros = d.as_micros();
    if micros % 1000 == 0 {
        format!("{}ms", micros / 1000)
    } else {
        format!("{}us", micros)
    }
}

/// Renders a `[0, 1]` fraction as a tc percentage.
pub fn tc_percent(fraction: f64) -> String {
    format!("{:.2}%", fraction * 100.0)
}
