use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Inclusive range a hold duration is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRange {
    #[serde(with = "humantime_serde")]
    pub min: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

impl HoldRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Draw a duration uniformly from `[min, max]`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }
}

/// How the external UE simulator and its control CLI are invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub simulator: PathBuf,
    pub control_cli: PathBuf,
    pub config_dir: PathBuf,
    /// File name template; `{index}` and `{imsi}` are substituted per subscriber.
    pub config_template: String,
    pub use_sudo: bool,
    pub deregister_instruction: String,
    #[serde(with = "humantime_serde")]
    pub control_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
}

impl SimulatorConfig {
    pub fn config_path(&self, id: &SubscriberId) -> PathBuf {
        let name = self
            .config_template
            .replace("{index}", &id.index.to_string())
            .replace("{imsi}", &id.imsi);
        self.config_dir.join(name)
    }
}

/// Per-subscriber lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    pub connected_hold: HoldRange,
    pub disconnected_hold: HoldRange,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    pub max_consecutive_failures: u32,
    #[serde(default)]
    pub max_cycles: Option<u32>,
}

impl LifecyclePolicy {
    /// Backoff before the next start attempt after `failures` consecutive spawn failures.
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(3);
        self.retry_backoff.saturating_mul(1u32 << exp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub imsi_prefix: String,
    pub subscribers: u32,
    #[serde(with = "humantime_serde")]
    pub stagger: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    pub simulator: SimulatorConfig,
    pub lifecycle: LifecyclePolicy,
}

impl FleetConfig {
    /// Subscriber identities in launch order.
    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        (1..=self.subscribers)
            .map(|i| SubscriberId::new(&self.imsi_prefix, i))
            .collect()
    }
}

/// Identity of one synthetic subscriber: a base prefix plus a 3-digit ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId {
    pub imsi: String,
    pub index: u32,
}

impl SubscriberId {
    pub fn new(prefix: &str, index: u32) -> Self {
        Self {
            imsi: format!("{prefix}{index:03}"),
            index,
        }
    }

    /// Address used by the control CLI.
    pub fn control_target(&self) -> String {
        format!("imsi-{}", self.imsi)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.imsi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Connecting,
    Connected,
    Deregistering,
    Disconnected,
}

/// Why a subscriber task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberOutcome {
    /// Observed the stop signal.
    Stopped,
    /// Ran its configured number of cycles.
    Completed,
    /// Gave up after too many consecutive spawn failures.
    Failed,
    /// Did not exit within the shutdown timeout.
    Unclean,
}

/// Messages from subscriber tasks to the coordinator.
#[derive(Debug, Clone)]
pub enum FleetEvent {
    StateChanged {
        id: SubscriberId,
        state: LifecycleState,
    },
    SessionEnded {
        id: SubscriberId,
        connected_for: Duration,
    },
    SpawnFailed {
        id: SubscriberId,
        attempt: u32,
        error: String,
    },
    ControlFailed {
        id: SubscriberId,
    },
    ForcedKill {
        id: SubscriberId,
    },
    Exited {
        id: SubscriberId,
        outcome: SubscriberOutcome,
    },
}

impl FleetEvent {
    pub fn subscriber(&self) -> &SubscriberId {
        match self {
            FleetEvent::StateChanged { id, .. }
            | FleetEvent::SessionEnded { id, .. }
            | FleetEvent::SpawnFailed { id, .. }
            | FleetEvent::ControlFailed { id }
            | FleetEvent::ForcedKill { id }
            | FleetEvent::Exited { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberReport {
    pub imsi: String,
    pub index: u32,
    pub last_state: LifecycleState,
    pub outcome: Option<SubscriberOutcome>,
    pub sessions: u32,
    pub spawn_failures: u32,
    pub control_failures: u32,
    pub forced_kills: u32,
    /// Seconds spent connected, one entry per completed session.
    pub connected_secs: Vec<f64>,
}

impl SubscriberReport {
    pub fn new(id: &SubscriberId) -> Self {
        Self {
            imsi: id.imsi.clone(),
            index: id.index,
            last_state: LifecycleState::Idle,
            outcome: None,
            sessions: 0,
            spawn_failures: 0,
            control_failures: 0,
            forced_kills: 0,
            connected_secs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetReport {
    #[serde(default)]
    pub started_utc: String,
    #[serde(default)]
    pub finished_utc: String,
    pub interrupted: bool,
    pub config: FleetConfig,
    pub subscribers: Vec<SubscriberReport>,
}

impl FleetReport {
    pub fn unclean(&self) -> impl Iterator<Item = &SubscriberReport> {
        self.subscribers
            .iter()
            .filter(|s| s.outcome == Some(SubscriberOutcome::Unclean))
    }
}
