//! Read-only catalog of named network conditions.

use crate::condition::{GilbertElliott, NetworkCondition};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    pub condition: NetworkCondition,
}

const fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

const fn us(v: u64) -> Duration {
    Duration::from_micros(v)
}

const fn profile(
    latency: Duration,
    jitter: Duration,
    loss_rate: f64,
    bandwidth_bps: u64,
    duplication_rate: f64,
) -> NetworkCondition {
    NetworkCondition {
        latency,
        jitter,
        loss_rate,
        duplication_rate,
        bandwidth_cap_bps: Some(bandwidth_bps),
        ..NetworkCondition::CLEAR
    }
}

pub const PRESETS: &[Preset] = &[
    Preset {
        name: "excellent",
        description: "Wired LAN quality: 5ms, near-zero loss, 1 Gbit/s",
        condition: profile(ms(5), ms(1), 0.001, 1_000_000_000, 0.0),
    },
    Preset {
        name: "good",
        description: "Healthy broadband: 20ms, 1% loss, 100 Mbit/s",
        condition: profile(ms(20), ms(5), 0.01, 100_000_000, 0.0),
    },
    Preset {
        name: "poor",
        description: "Congested link: 100ms, 5% loss, 10 Mbit/s",
        condition: profile(ms(100), ms(20), 0.05, 10_000_000, 0.0),
    },
    Preset {
        name: "mobile",
        description: "Cellular edge: 200ms, bursty loss, reordering, 5 Mbit/s",
        condition: NetworkCondition {
            reordering: true,
            burst_loss: Some(GilbertElliott {
                p_good_to_bad: 0.02,
                r_bad_to_good: 0.25,
                loss_in_bad: 0.7,
                loss_in_good: 0.001,
            }),
            ..profile(ms(200), ms(50), 0.1, 5_000_000, 0.0)
        },
    },
    Preset {
        name: "satellite",
        description: "GEO satellite: 500ms, 2% loss, duplication, 2 Mbit/s",
        condition: profile(ms(500), ms(100), 0.02, 2_000_000, 0.01),
    },
    Preset {
        name: "adversarial",
        description: "Hostile path: 1s delay, 20% bursty loss, corruption, 1 Mbit/s",
        condition: NetworkCondition {
            reordering: true,
            corruption_rate: 0.05,
            burst_loss: Some(GilbertElliott {
                p_good_to_bad: 0.05,
                r_bad_to_good: 0.2,
                loss_in_bad: 0.9,
                loss_in_good: 0.01,
            }),
            ..profile(ms(1000), ms(200), 0.2, 1_000_000, 0.0)
        },
    },
    Preset {
        name: "wifi",
        description: "802.11n home WiFi",
        condition: profile(ms(10), ms(5), 0.02, 8_000_000, 0.01),
    },
    Preset {
        name: "wifi-5g",
        description: "5 GHz WiFi",
        condition: profile(ms(5), ms(2), 0.01, 40_000_000, 0.005),
    },
    Preset {
        name: "lte",
        description: "4G LTE",
        condition: profile(ms(30), ms(15), 0.05, 16_000_000, 0.02),
    },
    Preset {
        name: "5g",
        description: "5G NR",
        condition: profile(ms(2), ms(1), 0.001, 400_000_000, 0.0005),
    },
    Preset {
        name: "satellite-leo",
        description: "Low-earth-orbit satellite",
        condition: profile(ms(25), ms(10), 0.02, 80_000_000, 0.01),
    },
    Preset {
        name: "ethernet",
        description: "Gigabit Ethernet",
        condition: profile(us(500), us(100), 0.0001, 800_000_000, 0.0001),
    },
    Preset {
        name: "dsl",
        description: "ADSL",
        condition: profile(ms(15), ms(5), 0.01, 16_000_000, 0.005),
    },
    Preset {
        name: "cable",
        description: "DOCSIS cable",
        condition: profile(ms(8), ms(3), 0.005, 80_000_000, 0.002),
    },
    Preset {
        name: "fiber",
        description: "FTTH fiber",
        condition: profile(ms(1), us(500), 0.0001, 800_000_000, 0.0001),
    },
    Preset {
        name: "mobile-3g",
        description: "3G UMTS",
        condition: profile(ms(50), ms(30), 0.1, 4_000_000, 0.05),
    },
    Preset {
        name: "edge",
        description: "2G EDGE",
        condition: profile(ms(100), ms(50), 0.15, 800_000, 0.1),
    },
    Preset {
        name: "international",
        description: "Intercontinental backbone",
        condition: profile(ms(40), ms(20), 0.03, 40_000_000, 0.01),
    },
    Preset {
        name: "datacenter",
        description: "Same-rack datacenter",
        condition: profile(us(50), us(10), 0.000001, 80_000_000_000, 0.000001),
    },
];

/// Looks up a preset by exact name.
pub fn lookup(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.name == name)
}

pub fn names() -> impl Iterator<Item = &'static str> {
    PRESETS.iter().map(|p| p.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_preset_is_valid_and_unique() {
        let mut seen = HashSet::new();
        for p in PRESETS {
            assert!(seen.insert(p.name), "duplicate preset {}", p.name);
            p.condition
                .validate()
                .unwrap_or_else(|e| panic!("{}: {e}", p.name));
            assert!(!p.description.is_empty());
        }
        assert_eq!(PRESETS.len(), 19);
    }

    #[test]
    fn lookup_is_exact() {
        assert_eq!(lookup("mobile").unwrap().condition.latency, ms(200));
        assert!(lookup("Mobile").is_none());
        assert!(lookup("moon").is_none());
    }

    #[test]
    fn harsher_presets_have_more_delay() {
        let lat = |n| lookup(n).unwrap().condition.latency;
        assert!(lat("excellent") < lat("good"));
        assert!(lat("good") < lat("poor"));
        assert!(lat("poor") < lat("mobile"));
        assert!(lat("satellite") < lat("adversarial"));
    }
}
