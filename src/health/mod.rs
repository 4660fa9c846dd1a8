//! Process-wide component health registry and runtime facts.
//!
//! Supervised components report in with [`mark_component_ok`] /
//! [`mark_component_error`]; the daemon flushes [`snapshot_json`] to
//! `daemon_state.json` and the gateway serves it on `/health`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComponentHealth {
    pub status: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ok: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub restart_count: u64,
}

/// Facts about this process that commands report and the state file keeps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeFacts {
    /// Display time (Asia/Manila) of the last restart request.
    #[serde(default)]
    pub last_restart: Option<String>,
    /// Display time of the last successful liveness probe.
    #[serde(default)]
    pub last_self_ping: Option<String>,
    #[serde(default)]
    pub last_probe_ok: Option<bool>,
    #[serde(default)]
    pub last_probe_at: Option<DateTime<Utc>>,
}

impl RuntimeFacts {
    pub fn apply_probe(&mut self, ok: bool, at: DateTime<Utc>, at_display: String) {
        self.last_probe_ok = Some(ok);
        self.last_probe_at = Some(at);
        if ok {
            self.last_self_ping = Some(at_display);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub pid: u32,
    pub updated_at: String,
    pub uptime_seconds: u64,
    pub components: BTreeMap<String, ComponentHealth>,
    pub runtime: RuntimeFacts,
}

struct Registry {
    started: Instant,
    components: BTreeMap<String, ComponentHealth>,
    runtime: RuntimeFacts,
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(|| {
    Mutex::new(Registry {
        started: Instant::now(),
        components: BTreeMap::new(),
        runtime: RuntimeFacts::default(),
    })
});

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn upsert(component: &str, update: impl FnOnce(&mut ComponentHealth)) {
    let now = now_rfc3339();
    let mut registry = REGISTRY.lock();
    let entry = registry
        .components
        .entry(component.to_string())
        .or_insert_with(|| ComponentHealth {
            status: "starting".into(),
            updated_at: now.clone(),
            last_ok: None,
            last_error: None,
            restart_count: 0,
        });
    update(entry);
    entry.updated_at = now;
}

pub fn mark_component_ok(component: &str) {
    upsert(component, |entry| {
        entry.status = "ok".into();
        entry.last_ok = Some(now_rfc3339());
    });
}

pub fn mark_component_error(component: &str, error: impl ToString) {
    let error = error.to_string();
    upsert(component, |entry| {
        entry.status = "error".into();
        entry.last_error = Some(error);
    });
}

pub fn bump_component_restart(component: &str) {
    upsert(component, |entry| {
        entry.restart_count = entry.restart_count.saturating_add(1);
    });
}

pub fn runtime_facts() -> RuntimeFacts {
    REGISTRY.lock().runtime.clone()
}

pub fn update_runtime(update: impl FnOnce(&mut RuntimeFacts)) {
    update(&mut REGISTRY.lock().runtime);
}

pub fn record_restart(at_display: String) {
    update_runtime(|facts| facts.last_restart = Some(at_display));
}

pub fn record_probe(ok: bool, at: DateTime<Utc>, at_display: String) {
    update_runtime(|facts| facts.apply_probe(ok, at, at_display));
}

pub fn snapshot() -> HealthSnapshot {
    let registry = REGISTRY.lock();
    HealthSnapshot {
        pid: std::process::id(),
        updated_at: now_rfc3339(),
        uptime_seconds: registry.started.elapsed().as_secs(),
        components: registry.components.clone(),
        runtime: registry.runtime.clone(),
    }
}

pub fn snapshot_json() -> serde_json::Value {
    serde_json::to_value(snapshot()).unwrap_or_else(|_| {
        serde_json::json!({
            "status": "error",
            "message": "failed to serialize health snapshot"
        })
    })
}

/// Pull runtime facts back out of a previously written state file.
pub fn restore_runtime_from(state: &serde_json::Value) -> Option<RuntimeFacts> {
    state
        .get("runtime")
        .cloned()
        .and_then(|raw| serde_json::from_value(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_lifecycle_is_tracked() {
        let name = "health-test-component";
        mark_component_ok(name);
        mark_component_error(name, "boom");
        bump_component_restart(name);

        let snap = snapshot();
        let entry = snap.components.get(name).unwrap();
        assert_eq!(entry.status, "error");
        assert_eq!(entry.last_error.as_deref(), Some("boom"));
        assert!(entry.last_ok.is_some());
        assert_eq!(entry.restart_count, 1);
    }

    #[test]
    fn snapshot_json_round_trips_runtime() {
        let json = serde_json::json!({
            "runtime": {"last_restart": "2024-02-01 04:15:00", "last_self_ping": null}
        });
        let facts = restore_runtime_from(&json).unwrap();
        assert_eq!(facts.last_restart.as_deref(), Some("2024-02-01 04:15:00"));
        assert!(snapshot_json().get("components").is_some());
    }

    #[test]
    fn failed_probe_keeps_last_successful_ping() {
        let now = Utc::now();
        let mut facts = RuntimeFacts::default();
        facts.apply_probe(true, now, "ok-time".into());
        facts.apply_probe(false, now, "fail-time".into());
        assert_eq!(facts.last_probe_ok, Some(false));
        assert_eq!(facts.last_self_ping.as_deref(), Some("ok-time"));
    }
}
