//! Pluggable response backends. Nanobots express intent through this
//! trait; they never perform network I/O or subprocess calls directly.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Duration;
use serde_json::Value as Json;
use tracing::info;

pub trait Effector: Send + Sync {
    fn block_ip(&self, ip: IpAddr) -> bool;
    fn unblock_ip(&self, ip: IpAddr) -> bool;
    fn deploy_honeypot(&self, honeypot_type: &str, port: u16) -> bool;
    fn apply_rate_limit(&self, source: &str, limit: u32, duration: Duration) -> bool;
    fn send_alert(&self, level: &str, message: &str, payload: Json) -> bool;
    fn enumerate(&self, target: &str, enum_type: &str) -> bool;
}

/// The mandatory in-scope effector: every call always succeeds, as a
/// test double and as the default when no production backend is wired
/// in. Logs at the point each intent would have been carried out.
#[derive(Default)]
pub struct SimulationEffector {
    calls: AtomicU64,
}

impl SimulationEffector {
    pub fn new() -> Self {
        SimulationEffector {
            calls: AtomicU64::new(0),
        }
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn tally(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Effector for SimulationEffector {
    fn block_ip(&self, ip: IpAddr) -> bool {
        self.tally();
        info!(%ip, "simulated block_ip");
        true
    }

    fn unblock_ip(&self, ip: IpAddr) -> bool {
        self.tally();
        info!(%ip, "simulated unblock_ip");
        true
    }

    fn deploy_honeypot(&self, honeypot_type: &str, port: u16) -> bool {
        self.tally();
        info!(honeypot_type, port, "simulated deploy_honeypot");
        true
    }

    fn apply_rate_limit(&self, source: &str, limit: u32, duration: Duration) -> bool {
        self.tally();
        info!(source, limit, duration_seconds = duration.num_seconds(), "simulated apply_rate_limit");
        true
    }

    fn send_alert(&self, level: &str, message: &str, payload: Json) -> bool {
        self.tally();
        info!(level, message, ?payload, "simulated send_alert");
        true
    }

    fn enumerate(&self, target: &str, enum_type: &str) -> bool {
        self.tally();
        info!(target, enum_type, "simulated enumerate");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_effector_always_succeeds_and_tallies_calls() {
        let effector = SimulationEffector::new();
        assert!(effector.block_ip("1.2.3.4".parse().unwrap()));
        assert!(effector.send_alert("critical", "test", serde_json::json!({})));
        assert_eq!(effector.call_count(), 2);
    }
}
