//! Fleet lifecycle controller.
//!
//! Validates setup, launches one subscriber task per UE with a fixed stagger, folds task events
//! into the fleet report, and drives the bounded shutdown once interrupted.

use crate::engine::{StopSignal, SubscriberTask, Supervisor};
use crate::error::SetupError;
use crate::metrics::ConnectedGauge;
use crate::model::{
    FleetConfig, FleetEvent, FleetReport, HoldRange, SubscriberId, SubscriberOutcome,
    SubscriberReport,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Longest IMSI (MCC + MNC + MSIN).
const MAX_IMSI_DIGITS: usize = 15;

/// Reject configurations that cannot run before any subscriber is started.
pub(crate) fn check_setup(cfg: &FleetConfig) -> Result<(), SetupError> {
    let prefix = &cfg.imsi_prefix;
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
        return Err(SetupError::InvalidImsiPrefix(prefix.clone()));
    }
    if prefix.len() + 3 > MAX_IMSI_DIGITS {
        return Err(SetupError::ImsiTooLong {
            prefix: prefix.clone(),
        });
    }
    if !(1..=999).contains(&cfg.subscribers) {
        return Err(SetupError::InvalidSubscriberCount(cfg.subscribers));
    }
    check_range("connected", &cfg.lifecycle.connected_hold)?;
    check_range("disconnected", &cfg.lifecycle.disconnected_hold)?;
    if !cfg.simulator.config_dir.is_dir() {
        return Err(SetupError::ConfigDirMissing(cfg.simulator.config_dir.clone()));
    }

    for id in cfg.subscriber_ids() {
        let path = cfg.simulator.config_path(&id);
        if !path.is_file() {
            warn!(imsi = %id, config = %path.display(), "UE config file not found");
        }
    }
    Ok(())
}

fn check_range(phase: &'static str, range: &HoldRange) -> Result<(), SetupError> {
    if range.min > range.max {
        return Err(SetupError::InvalidHoldRange {
            phase,
            min: range.min,
            max: range.max,
        });
    }
    Ok(())
}

/// Lightweight handle the coordinator keeps per launched subscriber.
struct TaskSlot {
    id: SubscriberId,
    handle: JoinHandle<SubscriberOutcome>,
}

/// Run the fleet until `interrupt` resolves or every subscriber has exited on its own.
pub(crate) async fn run_fleet<S, F>(cfg: &FleetConfig, supervisor: Arc<S>, interrupt: F) -> FleetReport
where
    S: Supervisor,
    F: Future<Output = ()>,
{
    let started_utc = now_rfc3339();
    let stop = StopSignal::new();
    let gauge = ConnectedGauge::new();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<FleetEvent>();

    let ids = cfg.subscriber_ids();
    let mut reports: Vec<SubscriberReport> = ids.iter().map(SubscriberReport::new).collect();
    let mut pending = ids.into_iter();
    let mut slots: Vec<TaskSlot> = Vec::with_capacity(reports.len());
    let mut next_launch = Instant::now();
    let mut exited = 0usize;

    tokio::pin!(interrupt);

    let interrupted = loop {
        let launching = pending.len() > 0;
        tokio::select! {
            _ = &mut interrupt => break true,
            _ = sleep_until(next_launch), if launching => {
                if let Some(id) = pending.next() {
                    info!(imsi = %id, remaining = pending.len(), "launching subscriber");
                    let task = SubscriberTask::new(
                        id.clone(),
                        supervisor.clone(),
                        cfg.lifecycle.clone(),
                        stop.clone(),
                        gauge.clone(),
                        event_tx.clone(),
                    );
                    slots.push(TaskSlot {
                        id,
                        handle: tokio::spawn(task.run()),
                    });
                    next_launch += cfg.stagger;
                }
            }
            Some(ev) = event_rx.recv() => {
                if matches!(ev, FleetEvent::Exited { .. }) {
                    exited += 1;
                }
                apply_event(&mut reports, ev);
                if pending.len() == 0 && exited == slots.len() {
                    info!("all subscribers have exited");
                    break false;
                }
            }
        }
    };

    stop.set();
    if interrupted {
        info!(
            running = slots.len() - exited.min(slots.len()),
            not_launched = pending.len(),
            "interrupt received, stopping subscribers"
        );
    }

    let shutdown_timeout = cfg.shutdown_timeout;
    let joins = slots.into_iter().map(|slot| async move {
        let res = timeout(shutdown_timeout, slot.handle).await;
        (slot.id, res)
    });
    let results = futures::future::join_all(joins).await;

    while let Ok(ev) = event_rx.try_recv() {
        apply_event(&mut reports, ev);
    }

    let mut unclean = Vec::new();
    for (id, res) in results {
        let outcome = match res {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(imsi = %id, "subscriber task failed: {e}");
                SubscriberOutcome::Failed
            }
            Err(_) => {
                unclean.push(id.imsi.clone());
                SubscriberOutcome::Unclean
            }
        };
        if let Some(report) = report_for(&mut reports, &id) {
            report.outcome = Some(outcome);
        }
    }
    if !unclean.is_empty() {
        warn!(
            subscribers = ?unclean,
            timeout = %humantime::format_duration(shutdown_timeout),
            "subscribers did not shut down cleanly"
        );
    }
    info!(still_connected = gauge.current(), "fleet stopped");

    FleetReport {
        started_utc,
        finished_utc: now_rfc3339(),
        interrupted,
        config: cfg.clone(),
        subscribers: reports,
    }
}

fn report_for<'a>(
    reports: &'a mut [SubscriberReport],
    id: &SubscriberId,
) -> Option<&'a mut SubscriberReport> {
    reports.iter_mut().find(|r| r.imsi == id.imsi)
}

/// Fold one subscriber event into its report.
fn apply_event(reports: &mut [SubscriberReport], ev: FleetEvent) {
    let Some(report) = report_for(reports, ev.subscriber()) else {
        return;
    };
    match ev {
        FleetEvent::StateChanged { id, state } => {
            debug!(imsi = %id, ?state, "subscriber state");
            report.last_state = state;
        }
        FleetEvent::SessionEnded { id, connected_for } => {
            report.sessions += 1;
            report.connected_secs.push(connected_for.as_secs_f64());
            debug!(imsi = %id, sessions = report.sessions, "session ended");
        }
        FleetEvent::SpawnFailed { id, attempt, error } => {
            report.spawn_failures += 1;
            debug!(imsi = %id, attempt, %error, "start attempt failed");
        }
        FleetEvent::ControlFailed { .. } => report.control_failures += 1,
        FleetEvent::ForcedKill { .. } => report.forced_kills += 1,
        FleetEvent::Exited { outcome, .. } => report.outcome = Some(outcome),
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{CallKind, ScriptedSupervisor};
    use crate::model::{LifecyclePolicy, LifecycleState, SimulatorConfig};
    use std::time::Duration;

    fn fleet(subscribers: u32, connected: u64, disconnected: u64) -> FleetConfig {
        FleetConfig {
            imsi_prefix: "001010000000".into(),
            subscribers,
            stagger: Duration::from_secs(8),
            shutdown_timeout: Duration::from_secs(15),
            simulator: SimulatorConfig {
                simulator: "build/nr-ue".into(),
                control_cli: "build/nr-cli".into(),
                config_dir: std::env::temp_dir(),
                config_template: "free5gc-ue{index}.yaml".into(),
                use_sudo: false,
                deregister_instruction: "deregister switch-off".into(),
                control_timeout: Duration::from_secs(10),
                grace_period: Duration::from_secs(2),
            },
            lifecycle: LifecyclePolicy {
                connected_hold: HoldRange::new(
                    Duration::from_secs(connected),
                    Duration::from_secs(connected),
                ),
                disconnected_hold: HoldRange::new(
                    Duration::from_secs(disconnected),
                    Duration::from_secs(disconnected),
                ),
                retry_backoff: Duration::from_secs(10),
                max_consecutive_failures: 5,
                max_cycles: None,
            },
        }
    }

    fn imsi(i: u32) -> String {
        format!("001010000000{i:03}")
    }

    #[tokio::test(start_paused = true)]
    async fn staggered_launch_and_fixed_hold_timing() {
        let cfg = fleet(3, 100, 1000);
        let sup = Arc::new(ScriptedSupervisor::new());
        let t0 = Instant::now();
        let report = run_fleet(
            &cfg,
            sup.clone(),
            tokio::time::sleep(Duration::from_secs(130)),
        )
        .await;

        for i in 1..=3u32 {
            let starts = sup.calls_for(&imsi(i), CallKind::Start);
            let stops = sup.calls_for(&imsi(i), CallKind::Stop);
            assert_eq!(starts, vec![t0 + Duration::from_secs(8 * (i as u64 - 1))]);
            assert_eq!(stops[0], starts[0] + Duration::from_secs(100));
            assert_eq!(stops.len(), 1);
        }

        assert!(report.interrupted);
        assert!(report
            .subscribers
            .iter()
            .all(|s| s.outcome == Some(SubscriberOutcome::Stopped)
                && s.sessions == 1
                && s.last_state == LifecycleState::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_subscriber_does_not_affect_others() {
        let mut cfg = fleet(3, 20, 20);
        cfg.lifecycle.max_cycles = Some(2);
        let sup = Arc::new(ScriptedSupervisor::new().fail_starts(&imsi(2), u32::MAX));
        let report = run_fleet(&cfg, sup.clone(), futures::future::pending()).await;

        assert!(!report.interrupted);
        let by_imsi = |i: u32| {
            report
                .subscribers
                .iter()
                .find(|s| s.imsi == imsi(i))
                .unwrap()
        };
        assert_eq!(by_imsi(2).outcome, Some(SubscriberOutcome::Failed));
        assert_eq!(by_imsi(2).spawn_failures, 6);
        assert_eq!(by_imsi(2).sessions, 0);
        for i in [1, 3] {
            assert_eq!(by_imsi(i).outcome, Some(SubscriberOutcome::Completed));
            assert_eq!(by_imsi(i).sessions, 2);
            assert_eq!(by_imsi(i).connected_secs, vec![20.0, 20.0]);
            assert_eq!(sup.max_live(&imsi(i)), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_subscriber_is_reported_unclean() {
        let mut cfg = fleet(2, 1000, 1000);
        cfg.shutdown_timeout = Duration::from_secs(5);
        let sup = Arc::new(ScriptedSupervisor::new().hang_on_stop(&imsi(1)));
        let report = run_fleet(
            &cfg,
            sup.clone(),
            tokio::time::sleep(Duration::from_secs(60)),
        )
        .await;

        let unclean: Vec<&str> = report.unclean().map(|s| s.imsi.as_str()).collect();
        assert_eq!(unclean, vec![imsi(1).as_str()]);
        assert_eq!(
            report.subscribers[1].outcome,
            Some(SubscriberOutcome::Stopped)
        );
        assert_eq!(sup.live(&imsi(2)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_during_stagger_cancels_pending_launches() {
        let cfg = fleet(3, 100, 100);
        let sup = Arc::new(ScriptedSupervisor::new());
        let report = run_fleet(&cfg, sup.clone(), tokio::time::sleep(Duration::from_secs(4))).await;

        assert_eq!(sup.calls_for(&imsi(1), CallKind::Start).len(), 1);
        assert_eq!(sup.calls_for(&imsi(1), CallKind::Stop).len(), 1);
        assert!(sup.calls_for(&imsi(2), CallKind::Start).is_empty());
        assert!(sup.calls_for(&imsi(3), CallKind::Start).is_empty());
        assert_eq!(report.subscribers[0].outcome, Some(SubscriberOutcome::Stopped));
        assert_eq!(report.subscribers[1].outcome, None);
        assert_eq!(report.subscribers[2].outcome, None);
    }

    #[test]
    fn setup_rejects_bad_configuration() {
        let mut cfg = fleet(3, 10, 10);
        cfg.simulator.config_dir = "/definitely/not/here".into();
        assert!(matches!(
            check_setup(&cfg),
            Err(SetupError::ConfigDirMissing(_))
        ));

        let mut cfg = fleet(3, 10, 10);
        cfg.imsi_prefix = "20893abc".into();
        assert!(matches!(
            check_setup(&cfg),
            Err(SetupError::InvalidImsiPrefix(_))
        ));

        let mut cfg = fleet(3, 10, 10);
        cfg.imsi_prefix = "2089300000000".into();
        assert!(matches!(check_setup(&cfg), Err(SetupError::ImsiTooLong { .. })));

        let cfg = fleet(0, 10, 10);
        assert!(matches!(
            check_setup(&cfg),
            Err(SetupError::InvalidSubscriberCount(0))
        ));

        let mut cfg = fleet(3, 10, 10);
        cfg.lifecycle.disconnected_hold = HoldRange::new(
            Duration::from_secs(30),
            Duration::from_secs(20),
        );
        assert!(matches!(
            check_setup(&cfg),
            Err(SetupError::InvalidHoldRange {
                phase: "disconnected",
                ..
            })
        ));

        assert!(check_setup(&fleet(3, 10, 10)).is_ok());
    }
}
