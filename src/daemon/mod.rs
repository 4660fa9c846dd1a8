use crate::bot::{handle_event, BotContext};
use crate::channels::{Channel, InboundEvent};
use crate::config::{Config, ConfigStore};
use crate::heartbeat::LivenessProbe;
use crate::lifecycle::restart::{finish_restart, force_restart};
use crate::lifecycle::{Lifecycle, RestartReason, RestartRequest, TimerKind};
use crate::observability::{AuditKind, AuditLog};
use crate::util::ph_time_now;
use anyhow::{Context, Result};
use chrono::Utc;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

const STATUS_FLUSH_SECONDS: u64 = 5;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 60;
const EVENT_QUEUE: usize = 100;

/// Why the event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Restart(RestartRequest),
    Interrupted,
}

/// Start the bot against Discord. Fails before connecting when no token is
/// configured.
pub async fn run(config: Config) -> Result<()> {
    let channel: Arc<dyn Channel> = crate::channels::build_channel(&config)?;
    run_with_channel(config, channel).await
}

pub async fn run_with_channel(config: Config, channel: Arc<dyn Channel>) -> Result<()> {
    crate::health::mark_component_ok("daemon");
    let state_path = state_file_path(&config);
    restore_runtime(&state_path).await;

    let store = Arc::new(
        ConfigStore::open(&config.data_dir())
            .with_context(|| format!("opening data dir {}", config.data_dir().display()))?,
    );
    let (lifecycle, restarts) = Lifecycle::new();
    let interval = store.operational().restart_interval;
    lifecycle.arm(TimerKind::AutoRestart, Duration::from_secs(interval));

    let ctx = Arc::new(BotContext::new(
        Arc::clone(&channel),
        Arc::clone(&store),
        config.owner_id,
        config.log_channel_id,
        lifecycle.clone(),
    ));

    let shutdown = CancellationToken::new();
    let (events_tx, events) = mpsc::channel(EVENT_QUEUE);
    let mut handles = vec![spawn_state_writer(state_path.clone(), shutdown.clone())];

    {
        let host = config.gateway.host.clone();
        let port = config.gateway.port;
        let stop = shutdown.clone();
        handles.push(spawn_component_supervisor(
            "gateway",
            shutdown.clone(),
            move || {
                let host = host.clone();
                let stop = stop.clone();
                async move { crate::gateway::run_gateway(&host, port, stop).await }
            },
        ));
    }

    {
        let scheduler = lifecycle.clone();
        let stop = shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = scheduler.run(stop).await {
                tracing::error!("Lifecycle scheduler stopped: {e:#}");
            }
        }));
    }

    {
        let probe = Arc::new(LivenessProbe::new(
            config.liveness.clone(),
            Some(AuditLog::new(Arc::clone(&channel), config.log_channel_id)),
        )?);
        handles.push(spawn_component_supervisor(
            crate::heartbeat::PROBE_COMPONENT,
            shutdown.clone(),
            move || {
                let probe = Arc::clone(&probe);
                async move { probe.run().await }
            },
        ));
    }

    {
        // Stops for good once the channel was closed on purpose.
        let listener_stop = shutdown.child_token();
        let channel = Arc::clone(&channel);
        let stop = listener_stop.clone();
        handles.push(spawn_component_supervisor(
            "channel",
            listener_stop,
            move || {
                let channel = Arc::clone(&channel);
                let tx = events_tx.clone();
                let stop = stop.clone();
                async move {
                    channel.listen(tx).await?;
                    if channel.is_closed() {
                        tracing::info!("Channel closed; listener not restarted");
                        stop.cancel();
                    }
                    Ok(())
                }
            },
        ));
    }

    tracing::info!(
        "🛡️ codewarden started (keep-alive on {}:{}, auto-restart every {}m)",
        config.gateway.host,
        config.gateway.port,
        interval / 60
    );

    let exit = run_event_loop(&ctx, events, restarts, tokio::signal::ctrl_c()).await;
    let grace = Duration::from_secs(config.lifecycle.shutdown_grace_secs.max(1));

    match exit {
        LoopExit::Interrupted => {
            tracing::info!("Ctrl+C received, shutting down");
            crate::health::mark_component_error("daemon", "shutdown requested");
            if !shutdown_components(&ctx, &shutdown, handles, &state_path, grace).await {
                tracing::warn!("Components did not stop within {}s", grace.as_secs());
            }
            Ok(())
        }
        LoopExit::Restart(request) => {
            announce_restart(&ctx, request).await;
            if shutdown_components(&ctx, &shutdown, handles, &state_path, grace).await {
                finish_restart(config.lifecycle.restart_mode)
            } else {
                force_restart()
            }
        }
    }
}

/// Feed events to the dispatcher one at a time until a restart is requested
/// or `interrupt` resolves.
pub async fn run_event_loop<I>(
    ctx: &Arc<BotContext>,
    mut events: mpsc::Receiver<InboundEvent>,
    mut restarts: mpsc::UnboundedReceiver<RestartRequest>,
    interrupt: I,
) -> LoopExit
where
    I: Future,
{
    tokio::pin!(interrupt);
    let mut events_open = true;
    loop {
        tokio::select! {
            biased;
            Some(request) = restarts.recv() => return LoopExit::Restart(request),
            _ = &mut interrupt => return LoopExit::Interrupted,
            event = events.recv(), if events_open => match event {
                Some(event) => handle_event(ctx, event).await,
                None => events_open = false,
            },
        }
    }
}

async fn announce_restart(ctx: &BotContext, request: RestartRequest) {
    tracing::info!("♻️ Restart requested: {}", request.reason);
    match request.reason {
        // `!restart` records and audits itself.
        RestartReason::Manual => {}
        RestartReason::Scheduled => {
            crate::health::record_restart(ph_time_now());
            let minutes = ctx.store.operational().restart_interval_minutes();
            ctx.audit
                .record(
                    AuditKind::Restart,
                    format!("♻️ Scheduled auto-restart after {minutes} minutes"),
                )
                .await;
        }
        RestartReason::DelayedShutdown => {
            crate::health::record_restart(ph_time_now());
            ctx.audit
                .record(AuditKind::Restart, "♻️ Delayed shutdown elapsed, restarting")
                .await;
        }
    }
}

/// Close the channel, stop every component and flush the state file. Returns
/// `false` when that took longer than `grace`.
pub async fn shutdown_components(
    ctx: &BotContext,
    shutdown: &CancellationToken,
    handles: Vec<JoinHandle<()>>,
    state_path: &Path,
    grace: Duration,
) -> bool {
    let graceful = async {
        ctx.channel.close().await;
        shutdown.cancel();
        for handle in handles {
            let _ = handle.await;
        }
        if let Err(e) = write_state(state_path).await {
            tracing::warn!("Final state flush failed: {e:#}");
        }
    };
    tokio::time::timeout(grace, graceful).await.is_ok()
}

pub fn state_file_path(config: &Config) -> PathBuf {
    config.config_dir().join("daemon_state.json")
}

/// Bring the last restart time back from the previous process's state file.
async fn restore_runtime(path: &Path) {
    let Ok(raw) = tokio::fs::read(path).await else {
        return;
    };
    let restored = serde_json::from_slice(&raw)
        .ok()
        .and_then(|state| crate::health::restore_runtime_from(&state));
    if let Some(facts) = restored {
        tracing::debug!(last_restart = ?facts.last_restart, "Restored runtime facts");
        crate::health::update_runtime(|current| {
            current.last_restart = facts.last_restart;
            current.last_self_ping = facts.last_self_ping;
        });
    }
}

async fn write_state(path: &Path) -> Result<()> {
    let mut json = crate::health::snapshot_json();
    if let Some(obj) = json.as_object_mut() {
        obj.insert(
            "written_at".into(),
            serde_json::json!(Utc::now().to_rfc3339()),
        );
    }
    let data = serde_json::to_vec_pretty(&json)?;
    tokio::fs::write(path, data).await?;
    Ok(())
}

fn spawn_state_writer(path: PathBuf, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let mut interval = tokio::time::interval(Duration::from_secs(STATUS_FLUSH_SECONDS));
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = write_state(&path).await {
                tracing::debug!("State flush failed: {e:#}");
            }
        }
    })
}

fn spawn_component_supervisor<F, Fut>(
    name: &'static str,
    shutdown: CancellationToken,
    mut run_component: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut backoff = INITIAL_BACKOFF_SECS;

        loop {
            crate::health::mark_component_ok(name);
            let result = tokio::select! {
                () = shutdown.cancelled() => break,
                result = run_component() => result,
            };
            if shutdown.is_cancelled() {
                break;
            }
            match result {
                Ok(()) => {
                    crate::health::mark_component_error(name, "component exited unexpectedly");
                    tracing::warn!("Daemon component '{name}' exited unexpectedly");
                    backoff = INITIAL_BACKOFF_SECS;
                }
                Err(e) => {
                    crate::health::mark_component_error(name, format!("{e:#}"));
                    tracing::error!("Daemon component '{name}' failed: {e:#}");
                }
            }

            crate::health::bump_component_restart(name);
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(Duration::from_secs(backoff)) => {}
            }
            backoff = backoff.saturating_mul(2).min(MAX_BACKOFF_SECS);
        }
        tracing::debug!("Daemon component '{name}' stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{Actor, GuildRef, InboundMessage, MemoryChannel};
    use crate::security::PermissionSet;
    use tempfile::TempDir;

    type Harness = (
        Arc<BotContext>,
        Arc<MemoryChannel>,
        Lifecycle,
        mpsc::UnboundedReceiver<RestartRequest>,
    );

    fn context(tmp: &TempDir) -> Harness {
        let mem = Arc::new(MemoryChannel::new());
        let store = Arc::new(ConfigStore::open(tmp.path()).unwrap());
        let (lifecycle, rx) = Lifecycle::new();
        let ctx = BotContext::new(mem.clone(), store, 1, None, lifecycle.clone());
        (Arc::new(ctx), mem, lifecycle, rx)
    }

    fn command(content: &str) -> InboundEvent {
        InboundEvent::MessageReceived(InboundMessage {
            id: 9,
            author: Actor {
                id: 1,
                name: "owner".into(),
                is_bot: false,
                role_names: vec![],
                permissions: PermissionSet::default(),
            },
            channel_id: 20,
            guild: Some(GuildRef {
                id: 30,
                name: "g".into(),
            }),
            content: content.into(),
            reply_to: None,
            role_mentions: vec![],
        })
    }

    #[test]
    fn state_file_path_uses_config_directory() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            config_path: tmp.path().join("config.toml"),
            ..Config::default()
        };
        assert_eq!(state_file_path(&config), tmp.path().join("daemon_state.json"));
    }

    #[tokio::test]
    async fn supervisor_marks_error_and_restart_on_failure() {
        let stop = CancellationToken::new();
        let handle = spawn_component_supervisor("daemon-test-fail", stop.clone(), || async {
            anyhow::bail!("boom")
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.cancel();
        handle.await.unwrap();

        let snapshot = crate::health::snapshot_json();
        let component = &snapshot["components"]["daemon-test-fail"];
        assert_eq!(component["status"], "error");
        assert!(component["restart_count"].as_u64().unwrap_or(0) >= 1);
        assert!(component["last_error"]
            .as_str()
            .unwrap_or("")
            .contains("boom"));
    }

    #[tokio::test]
    async fn supervisor_stops_when_cancelled_mid_run() {
        let stop = CancellationToken::new();
        let handle = spawn_component_supervisor("daemon-test-pending", stop.clone(), || async {
            std::future::pending::<()>().await;
            Ok(())
        });
        stop.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn event_loop_handles_events_until_restart() {
        let tmp = TempDir::new().unwrap();
        let (ctx, mem, _lifecycle, rx) = context(&tmp);
        let (tx, events) = mpsc::channel(8);

        tx.send(command("!listroles")).await.unwrap();
        tx.send(command("!restart")).await.unwrap();

        let exit = run_event_loop(&ctx, events, rx, std::future::pending::<()>()).await;
        assert_eq!(
            exit,
            LoopExit::Restart(RestartRequest {
                reason: RestartReason::Manual,
                generation: None
            })
        );
        assert!(mem
            .texts()
            .iter()
            .any(|t| t == "📋 Allowed roles: **Staff, Admin, Moderator**"));
    }

    #[tokio::test]
    async fn event_loop_stops_on_interrupt() {
        let tmp = TempDir::new().unwrap();
        let (ctx, _mem, _lifecycle, rx) = context(&tmp);
        let (_tx, events) = mpsc::channel(8);
        let exit = run_event_loop(&ctx, events, rx, async {}).await;
        assert_eq!(exit, LoopExit::Interrupted);
    }

    #[tokio::test]
    async fn shutdown_closes_channel_and_flushes_state() {
        let tmp = TempDir::new().unwrap();
        let (ctx, mem, _lifecycle, _rx) = context(&tmp);
        let shutdown = CancellationToken::new();
        let path = tmp.path().join("daemon_state.json");
        let writer = spawn_state_writer(path.clone(), shutdown.clone());

        let clean =
            shutdown_components(&ctx, &shutdown, vec![writer], &path, Duration::from_secs(5)).await;
        assert!(clean);
        assert!(mem.is_closed());
        let state: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(state.get("runtime").is_some());
    }

    #[tokio::test]
    async fn stuck_component_exceeds_grace() {
        let tmp = TempDir::new().unwrap();
        let (ctx, _mem, _lifecycle, _rx) = context(&tmp);
        let shutdown = CancellationToken::new();
        let stuck = tokio::spawn(std::future::pending::<()>());
        let clean = shutdown_components(
            &ctx,
            &shutdown,
            vec![stuck],
            &tmp.path().join("daemon_state.json"),
            Duration::from_millis(50),
        )
        .await;
        assert!(!clean);
    }
}
