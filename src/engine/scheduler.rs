//! Per-subscriber lifecycle loop.
//!
//! Idle → Connecting → Connected → Deregistering → Disconnected → Idle, with randomized holds in
//! the connected and disconnected phases. Each task owns its state and its process handle, and
//! reports to the coordinator only through `FleetEvent`s.

use super::supervisor::{stop_tracked, Supervisor, Termination};
use super::StopSignal;
use crate::metrics::ConnectedGauge;
use crate::model::{FleetEvent, LifecyclePolicy, LifecycleState, SubscriberId, SubscriberOutcome};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub struct SubscriberTask<S: Supervisor> {
    id: SubscriberId,
    supervisor: Arc<S>,
    policy: LifecyclePolicy,
    stop: StopSignal,
    gauge: ConnectedGauge,
    events: mpsc::UnboundedSender<FleetEvent>,
    state: LifecycleState,
    connected_since: Option<Instant>,
}

impl<S: Supervisor> SubscriberTask<S> {
    pub fn new(
        id: SubscriberId,
        supervisor: Arc<S>,
        policy: LifecyclePolicy,
        stop: StopSignal,
        gauge: ConnectedGauge,
        events: mpsc::UnboundedSender<FleetEvent>,
    ) -> Self {
        Self {
            id,
            supervisor,
            policy,
            stop,
            gauge,
            events,
            state: LifecycleState::Idle,
            connected_since: None,
        }
    }

    /// Run until stopped, completed or failed. Any live process is torn down before returning.
    pub async fn run(mut self) -> SubscriberOutcome {
        let mut handle: Option<S::Handle> = None;
        let outcome = self.drive(&mut handle).await;
        if handle.is_some() {
            self.teardown(&mut handle).await;
        }
        info!(imsi = %self.id, ?outcome, "subscriber finished");
        self.emit(FleetEvent::Exited {
            id: self.id.clone(),
            outcome,
        });
        outcome
    }

    async fn drive(&mut self, handle: &mut Option<S::Handle>) -> SubscriberOutcome {
        let mut failures = 0u32;
        let mut cycles = 0u32;

        loop {
            if self.stop.is_set() {
                return SubscriberOutcome::Stopped;
            }

            self.transition(LifecycleState::Connecting);
            match self.supervisor.start(&self.id).await {
                Ok(h) => {
                    failures = 0;
                    *handle = Some(h);
                }
                Err(e) => {
                    failures += 1;
                    warn!(imsi = %self.id, attempt = failures, "{e}");
                    self.emit(FleetEvent::SpawnFailed {
                        id: self.id.clone(),
                        attempt: failures,
                        error: e.to_string(),
                    });
                    self.transition(LifecycleState::Idle);
                    if failures > self.policy.max_consecutive_failures {
                        error!(
                            imsi = %self.id,
                            failures,
                            "too many consecutive start failures, giving up"
                        );
                        return SubscriberOutcome::Failed;
                    }
                    let backoff = self.policy.backoff_for(failures);
                    debug!(imsi = %self.id, backoff = %humantime::format_duration(backoff), "retrying start");
                    if !self.stop.sleep(backoff).await {
                        return SubscriberOutcome::Stopped;
                    }
                    continue;
                }
            }

            let active = self.gauge.increment();
            self.connected_since = Some(Instant::now());
            self.transition(LifecycleState::Connected);
            let hold = self.policy.connected_hold.sample(&mut rand::thread_rng());
            info!(
                imsi = %self.id,
                active,
                deregister_in = %humantime::format_duration(hold),
                "UE connected"
            );
            let held = self.stop.sleep(hold).await;

            self.teardown(handle).await;
            cycles += 1;
            if !held {
                return SubscriberOutcome::Stopped;
            }
            if self.policy.max_cycles.is_some_and(|max| cycles >= max) {
                return SubscriberOutcome::Completed;
            }

            let hold = self.policy.disconnected_hold.sample(&mut rand::thread_rng());
            info!(
                imsi = %self.id,
                register_in = %humantime::format_duration(hold),
                "UE disconnected"
            );
            if !self.stop.sleep(hold).await {
                return SubscriberOutcome::Stopped;
            }
            self.transition(LifecycleState::Idle);
        }
    }

    /// Deregistering → Disconnected. Clears `handle` once the supervisor has stopped it.
    async fn teardown(&mut self, handle: &mut Option<S::Handle>) {
        self.transition(LifecycleState::Deregistering);
        let result = stop_tracked(self.supervisor.as_ref(), &self.id, handle.as_mut()).await;
        let had_process = handle.take().is_some();

        if !result.deregistered && had_process {
            self.emit(FleetEvent::ControlFailed {
                id: self.id.clone(),
            });
        }
        if result.termination == Termination::Killed {
            self.emit(FleetEvent::ForcedKill {
                id: self.id.clone(),
            });
        }
        if had_process {
            let active = self.gauge.decrement();
            debug!(imsi = %self.id, active, "UE torn down");
        }
        if let Some(since) = self.connected_since.take() {
            self.emit(FleetEvent::SessionEnded {
                id: self.id.clone(),
                connected_for: since.elapsed(),
            });
        }
        self.transition(LifecycleState::Disconnected);
    }

    fn transition(&mut self, to: LifecycleState) {
        if self.state == to {
            return;
        }
        debug!(imsi = %self.id, from = ?self.state, ?to, "state change");
        self.state = to;
        self.emit(FleetEvent::StateChanged {
            id: self.id.clone(),
            state: to,
        });
    }

    fn emit(&self, event: FleetEvent) {
        // The coordinator may already be gone during shutdown.
        let _ = self.events.send(event);
    }
}
