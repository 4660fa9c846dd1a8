use crate::config::LivenessConfig;
use crate::observability::{AuditKind, AuditLog};
use crate::util::format_ph_time;
use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{info, warn};

pub const PROBE_COMPONENT: &str = "liveness";

/// Outcome of a single probe tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub ok: bool,
    pub at: DateTime<Utc>,
    /// `at` in Asia/Manila display format.
    pub at_display: String,
    pub detail: String,
}

/// Liveness probe: one HTTP GET against the keep-alive URL per tick, for the
/// life of the process. Failures are recorded, never escalated.
pub struct LivenessProbe {
    config: LivenessConfig,
    client: reqwest::Client,
    audit: Option<AuditLog>,
}

impl LivenessProbe {
    pub fn new(config: LivenessConfig, audit: Option<AuditLog>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            config,
            client,
            audit,
        })
    }

    /// Start the probe loop (runs until cancelled)
    pub async fn run(&self) -> Result<()> {
        let every = Duration::from_secs(self.config.interval_secs.max(1));
        info!(
            "💓 Liveness probe started: {} every {}s",
            self.config.url,
            every.as_secs()
        );

        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// Probe once and record the result in the health registry. Emits one
    /// log line, through the audit log when one is configured.
    pub async fn tick(&self) -> ProbeOutcome {
        let at = Utc::now();
        let at_display = format_ph_time(at);
        let outcome = match self.check().await {
            Ok(status) => ProbeOutcome {
                ok: true,
                at,
                at_display,
                detail: status,
            },
            Err(e) => ProbeOutcome {
                ok: false,
                at,
                at_display,
                detail: e.to_string(),
            },
        };

        crate::health::record_probe(outcome.ok, outcome.at, outcome.at_display.clone());
        if outcome.ok {
            crate::health::mark_component_ok(PROBE_COMPONENT);
        } else {
            crate::health::mark_component_error(PROBE_COMPONENT, &outcome.detail);
        }

        // The audit log writes its own tracing line.
        match (&self.audit, outcome.ok) {
            (Some(audit), true) => {
                audit
                    .record(
                        AuditKind::Info,
                        format!("✅ Self-ping successful at {}", outcome.at_display),
                    )
                    .await;
            }
            (Some(audit), false) => {
                audit
                    .record(
                        AuditKind::Error,
                        format!(
                            "❌ Self-ping failed at {}: {}",
                            outcome.at_display, outcome.detail
                        ),
                    )
                    .await;
            }
            (None, true) => info!("💓 Self-ping ok ({})", outcome.detail),
            (None, false) => warn!("💓 Self-ping failed: {}", outcome.detail),
        }

        outcome
    }

    /// One GET; the body is drained so the exchange completes.
    async fn check(&self) -> Result<String> {
        let resp = self.client.get(&self.config.url).send().await?;
        let status = resp.status();
        resp.error_for_status_ref()?;
        let _ = resp.bytes().await?;
        Ok(status.to_string())
    }
}
