//! Self-test collectors — measurement only, no side effects beyond the
//! probes themselves.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use edgewatch_core::Result;

use crate::record::{HealthSnapshot, ServiceState};

/// How long a successful network probe is trusted before pinging again.
pub const NETWORK_TEST_CACHE: Duration = Duration::from_secs(30);

const DEFAULT_PING_HOST: &str = "8.8.8.8";

/// A self-test collaborator. `collect` must be idempotent and side-effect
/// free beyond its own measurement; reacting to the result is the
/// monitor's job.
#[async_trait]
pub trait HealthCollector: Send + Sync {
    async fn collect(&self) -> Result<HealthSnapshot>;
}

/// Collector reading the Linux system interfaces directly: `/sys` thermal
/// zone, `/proc` load and memory, `df` for disk usage, `systemctl` for
/// unit states, and a cached `ping` for network reachability.
///
/// Every probe degrades gracefully on its own — a missing thermal zone or
/// an unreadable `/proc` never fails the whole collection.
pub struct SystemCollector {
    monitored_services: Vec<String>,
    ping_host: String,
    /// Last successful network probe; within [`NETWORK_TEST_CACHE`] the
    /// ping is skipped.
    last_network_ok: Mutex<Option<Instant>>,
}

impl SystemCollector {
    pub fn new(monitored_services: Vec<String>) -> Self {
        Self {
            monitored_services,
            ping_host: DEFAULT_PING_HOST.to_string(),
            last_network_ok: Mutex::new(None),
        }
    }

    pub fn with_ping_host(mut self, host: &str) -> Self {
        self.ping_host = host.to_string();
        self
    }

    fn cpu_temp(&self) -> Option<f64> {
        let raw = std::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp").ok()?;
        parse_thermal_millidegrees(&raw)
    }

    fn cpu_percent(&self) -> f64 {
        let raw = std::fs::read_to_string("/proc/loadavg").unwrap_or_default();
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        parse_load_percent(&raw, cores)
    }

    fn memory_percent(&self) -> f64 {
        let raw = std::fs::read_to_string("/proc/meminfo").unwrap_or_default();
        parse_meminfo_percent(&raw)
    }

    async fn disk_percent(&self) -> f64 {
        let output = Command::new("df").args(["-P", "/"]).output().await;
        match output {
            Ok(out) if out.status.success() => {
                parse_df_percent(&String::from_utf8_lossy(&out.stdout))
            }
            _ => {
                tracing::debug!("df probe failed, reporting 0% disk usage");
                0.0
            }
        }
    }

    async fn service_states(&self) -> BTreeMap<String, ServiceState> {
        let mut states = BTreeMap::new();
        for service in &self.monitored_services {
            let state = match Command::new("systemctl")
                .args(["is-active", "--quiet", service.as_str()])
                .status()
                .await
            {
                Ok(status) => ServiceState::from_active(status.success()),
                Err(e) => {
                    tracing::debug!("systemctl probe for '{service}' failed: {e}");
                    ServiceState::Unknown
                }
            };
            states.insert(service.clone(), state);
        }
        states
    }

    async fn network_ok(&self) -> bool {
        {
            let last = self.last_network_ok.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(at) = *last {
                if at.elapsed() < NETWORK_TEST_CACHE {
                    return true;
                }
            }
        }
        let reachable = matches!(
            Command::new("ping")
                .args(["-c", "1", "-W", "2", self.ping_host.as_str()])
                .output()
                .await,
            Ok(out) if out.status.success()
        );
        if reachable {
            let mut last = self.last_network_ok.lock().unwrap_or_else(|e| e.into_inner());
            *last = Some(Instant::now());
        }
        reachable
    }
}

#[async_trait]
impl HealthCollector for SystemCollector {
    async fn collect(&self) -> Result<HealthSnapshot> {
        Ok(HealthSnapshot {
            cpu_temp: self.cpu_temp(),
            cpu_percent: self.cpu_percent(),
            memory_percent: self.memory_percent(),
            disk_percent: self.disk_percent().await,
            network_ok: self.network_ok().await,
            services: self.service_states().await,
        })
    }
}

/// "48234\n" → 48.234 °C.
fn parse_thermal_millidegrees(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().map(|milli| milli / 1000.0)
}

/// One-minute load average scaled to a percentage of available cores.
fn parse_load_percent(loadavg: &str, cores: usize) -> f64 {
    let load1 = loadavg
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    (load1 / cores.max(1) as f64 * 100.0).clamp(0.0, 100.0)
}

/// MemTotal/MemAvailable from /proc/meminfo, as percent used.
fn parse_meminfo_percent(meminfo: &str) -> f64 {
    let field = |name: &str| {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<f64>().ok())
    };
    match (field("MemTotal:"), field("MemAvailable:")) {
        (Some(total), Some(available)) if total > 0.0 => {
            ((total - available) / total * 100.0).clamp(0.0, 100.0)
        }
        _ => 0.0,
    }
}

/// Use% column of `df -P /` output.
fn parse_df_percent(output: &str) -> f64 {
    output
        .lines()
        .nth(1)
        .and_then(|l| l.split_whitespace().nth(4))
        .and_then(|v| v.trim_end_matches('%').parse::<f64>().ok())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thermal_parses_millidegrees() {
        assert_eq!(parse_thermal_millidegrees("48234\n"), Some(48.234));
        assert_eq!(parse_thermal_millidegrees("garbage"), None);
    }

    #[test]
    fn load_percent_scales_by_cores() {
        assert_eq!(parse_load_percent("2.00 1.50 1.00 2/300 1234", 4), 50.0);
        assert_eq!(parse_load_percent("8.00 0.0 0.0", 4), 100.0);
        assert_eq!(parse_load_percent("", 4), 0.0);
    }

    #[test]
    fn meminfo_percent_uses_available() {
        let meminfo = "MemTotal:       1000000 kB\nMemFree:         100000 kB\nMemAvailable:    250000 kB\n";
        assert_eq!(parse_meminfo_percent(meminfo), 75.0);
        assert_eq!(parse_meminfo_percent(""), 0.0);
    }

    #[test]
    fn df_percent_reads_use_column() {
        let out = "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
                   /dev/root    15000000 9000000 6000000    60% /\n";
        assert_eq!(parse_df_percent(out), 60.0);
        assert_eq!(parse_df_percent("no rows"), 0.0);
    }
}
