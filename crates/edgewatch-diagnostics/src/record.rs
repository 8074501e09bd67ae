//! Health record data model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of one monitored service unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Up,
    Down,
    /// The unit state could not be determined (probe failed).
    Unknown,
}

impl ServiceState {
    pub fn from_active(active: bool) -> Self {
        if active { Self::Up } else { Self::Down }
    }
}

/// Overall verdict of one self-test cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Raw measurements returned by a collector. Measurement only — building
/// the stored record (and deriving the verdict) is the monitor's job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// CPU temperature in °C, when the platform exposes one.
    pub cpu_temp: Option<f64>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network_ok: bool,
    pub services: BTreeMap<String, ServiceState>,
}

/// One stored self-test result. Never mutated after creation; pruned from
/// the store strictly by age.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    pub cpu_temp: Option<f64>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network_ok: bool,
    pub services: BTreeMap<String, ServiceState>,
    /// Collector failure text when the self-test itself could not run.
    pub note: Option<String>,
}

impl HealthRecord {
    /// Build a record from a completed measurement. The verdict is
    /// `Degraded` when any monitored service is down or the network is
    /// unreachable.
    pub fn from_snapshot(timestamp: DateTime<Utc>, snapshot: HealthSnapshot) -> Self {
        let any_down = snapshot
            .services
            .values()
            .any(|s| *s == ServiceState::Down);
        let status = if any_down || !snapshot.network_ok {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Self {
            timestamp,
            status,
            cpu_temp: snapshot.cpu_temp,
            cpu_percent: snapshot.cpu_percent,
            memory_percent: snapshot.memory_percent,
            disk_percent: snapshot.disk_percent,
            network_ok: snapshot.network_ok,
            services: snapshot.services,
            note: None,
        }
    }

    /// Build the degraded record for a cycle whose collector failed
    /// outright. Everything measurable is absent; `note` carries the
    /// failure text.
    pub fn collector_failure(timestamp: DateTime<Utc>, note: String) -> Self {
        Self {
            timestamp,
            status: HealthStatus::Degraded,
            cpu_temp: None,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            disk_percent: 0.0,
            network_ok: false,
            services: BTreeMap::new(),
            note: Some(note),
        }
    }

    /// Names of services this record reports as down.
    pub fn down_services(&self) -> Vec<&str> {
        self.services
            .iter()
            .filter(|(_, state)| **state == ServiceState::Down)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
