//! Process lifecycle: the auto-restart timer, the owner's delayed shutdown,
//! and how a restart is actually carried out.
//!
//! Timers live in one deadline table serviced by a single scheduler loop. At
//! most one deadline exists per [`TimerKind`]; arming a kind again replaces
//! the previous deadline. When a deadline passes the loop emits a
//! [`RestartRequest`] to the daemon, which owns the shutdown sequence.

pub mod restart;

pub use restart::RESTART_EXIT_CODE;

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const SCHEDULER_COMPONENT: &str = "lifecycle";

/// Cap for deadlines that would overflow `Instant` (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, saturating at [`FAR_FUTURE`] from now.
fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after.min(FAR_FUTURE))
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    AutoRestart,
    DelayedShutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The periodic auto-restart timer elapsed.
    Scheduled,
    /// `!restart` by a staff member.
    Manual,
    /// The delay requested by `!shutdown` elapsed.
    DelayedShutdown,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scheduled => "scheduled auto-restart",
            Self::Manual => "manual restart",
            Self::DelayedShutdown => "delayed shutdown elapsed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartRequest {
    pub reason: RestartReason,
    /// Generation of the timer that fired; `None` for immediate requests.
    pub generation: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    generation: u64,
}

#[derive(Debug, Default)]
struct DeadlineTable {
    entries: HashMap<TimerKind, Deadline>,
    next_generation: u64,
}

impl DeadlineTable {
    fn earliest(&self) -> Option<Instant> {
        self.entries.values().map(|d| d.at).min()
    }

    fn take_due(&mut self, now: Instant) -> Vec<(TimerKind, u64)> {
        let due: Vec<(TimerKind, u64)> = self
            .entries
            .iter()
            .filter(|(_, d)| d.at <= now)
            .map(|(kind, d)| (*kind, d.generation))
            .collect();
        for (kind, _) in &due {
            self.entries.remove(kind);
        }
        due
    }
}

/// Cheap, cloneable handle to the lifecycle scheduler.
#[derive(Clone)]
pub struct Lifecycle {
    table: Arc<Mutex<DeadlineTable>>,
    wake: Arc<Notify>,
    requests: mpsc::UnboundedSender<RestartRequest>,
}

impl Lifecycle {
    /// Create the scheduler and the receiving end for restart requests.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RestartRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (
            Self {
                table: Arc::new(Mutex::new(DeadlineTable::default())),
                wake: Arc::new(Notify::new()),
                requests,
            },
            rx,
        )
    }

    /// Arm `kind` to fire after `after`, replacing any live deadline of the
    /// same kind. Returns the new timer's generation.
    pub fn arm(&self, kind: TimerKind, after: Duration) -> u64 {
        let generation = {
            let mut table = self.table.lock();
            table.next_generation += 1;
            let generation = table.next_generation;
            let replaced = table.entries.insert(
                kind,
                Deadline {
                    at: deadline_after(Instant::now(), after),
                    generation,
                },
            );
            if let Some(old) = replaced {
                tracing::debug!(?kind, old = old.generation, new = generation, "Timer re-armed");
            }
            generation
        };
        tracing::info!(?kind, generation, "⏱️ Timer armed for {}s", after.as_secs());
        self.wake.notify_one();
        generation
    }

    /// Drop the live deadline of `kind`. Returns whether one existed.
    pub fn cancel(&self, kind: TimerKind) -> bool {
        let removed = self.table.lock().entries.remove(&kind).is_some();
        if removed {
            tracing::info!(?kind, "⏱️ Timer cancelled");
            self.wake.notify_one();
        }
        removed
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.table.lock().entries.get(&kind).map(|d| d.at)
    }

    pub fn generation(&self, kind: TimerKind) -> Option<u64> {
        self.table.lock().entries.get(&kind).map(|d| d.generation)
    }

    pub fn armed_count(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Ask the daemon to restart now, outside any timer.
    pub fn request_restart(&self, reason: RestartReason) {
        if self
            .requests
            .send(RestartRequest {
                reason,
                generation: None,
            })
            .is_err()
        {
            tracing::warn!("Restart requested ({reason}) but no daemon is listening");
        }
    }

    /// Service the deadline table until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        crate::health::mark_component_ok(SCHEDULER_COMPONENT);

        loop {
            let next = self.table.lock().earliest();
            let sleep = async {
                match next {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = self.wake.notified() => continue,
                () = sleep => {}
            }

            let due = self.table.lock().take_due(Instant::now());
            for (kind, generation) in due {
                let reason = match kind {
                    TimerKind::AutoRestart => RestartReason::Scheduled,
                    TimerKind::DelayedShutdown => RestartReason::DelayedShutdown,
                };
                tracing::info!(?kind, generation, "⏱️ Timer fired: {reason}");
                crate::health::mark_component_ok(SCHEDULER_COMPONENT);
                if self
                    .requests
                    .send(RestartRequest {
                        reason,
                        generation: Some(generation),
                    })
                    .is_err()
                {
                    tracing::warn!("Timer fired but no daemon is listening");
                }
            }
        }

        Ok(())
    }
}
