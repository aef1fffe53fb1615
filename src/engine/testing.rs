//! Scripted supervisor used by scheduler and coordinator tests.

use super::supervisor::{Supervisor, Teardown, Termination};
use crate::error::LifecycleError;
use crate::model::SubscriberId;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Start,
    StartFailed,
    Stop,
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub imsi: String,
    pub kind: CallKind,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct ScriptState {
    calls: Vec<Call>,
    attempts: HashMap<String, u32>,
    live: HashMap<String, usize>,
    max_live: HashMap<String, usize>,
}

#[derive(Debug)]
pub(crate) struct FakeProcess {
    imsi: String,
    stopped: bool,
}

/// Records every call; start failures and hanging stops are scripted per IMSI.
#[derive(Debug, Default)]
pub(crate) struct ScriptedSupervisor {
    start_failures: HashMap<String, u32>,
    hang_on_stop: HashSet<String>,
    state: Mutex<ScriptState>,
}

impl ScriptedSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `n` start attempts for `imsi` fail. `u32::MAX` means always.
    pub fn fail_starts(mut self, imsi: &str, n: u32) -> Self {
        self.start_failures.insert(imsi.to_string(), n);
        self
    }

    pub fn hang_on_stop(mut self, imsi: &str) -> Self {
        self.hang_on_stop.insert(imsi.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, imsi: &str, kind: CallKind) -> Vec<Instant> {
        self.calls()
            .into_iter()
            .filter(|c| c.imsi == imsi && c.kind == kind)
            .map(|c| c.at)
            .collect()
    }

    pub fn live(&self, imsi: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .live
            .get(imsi)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_live(&self, imsi: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .max_live
            .get(imsi)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Supervisor for ScriptedSupervisor {
    type Handle = FakeProcess;

    async fn start(&self, id: &SubscriberId) -> Result<FakeProcess, LifecycleError> {
        let mut st = self.state.lock().unwrap();
        let attempt = {
            let a = st.attempts.entry(id.imsi.clone()).or_insert(0);
            *a += 1;
            *a
        };
        let fails = self.start_failures.get(&id.imsi).copied().unwrap_or(0);
        let at = Instant::now();
        if attempt <= fails {
            st.calls.push(Call {
                imsi: id.imsi.clone(),
                kind: CallKind::StartFailed,
                at,
            });
            return Err(LifecycleError::Spawn {
                imsi: id.imsi.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted failure"),
            });
        }

        let live = {
            let l = st.live.entry(id.imsi.clone()).or_insert(0);
            *l += 1;
            *l
        };
        let max = st.max_live.entry(id.imsi.clone()).or_insert(0);
        *max = (*max).max(live);
        st.calls.push(Call {
            imsi: id.imsi.clone(),
            kind: CallKind::Start,
            at,
        });
        Ok(FakeProcess {
            imsi: id.imsi.clone(),
            stopped: false,
        })
    }

    async fn stop(&self, handle: &mut FakeProcess) -> Teardown {
        if handle.stopped {
            return Teardown::already_stopped();
        }
        if self.hang_on_stop.contains(&handle.imsi) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        handle.stopped = true;
        {
            let mut st = self.state.lock().unwrap();
            if let Some(l) = st.live.get_mut(&handle.imsi) {
                *l = l.saturating_sub(1);
            }
            st.calls.push(Call {
                imsi: handle.imsi.clone(),
                kind: CallKind::Stop,
                at: Instant::now(),
            });
        }
        Teardown {
            termination: Termination::Exited,
            deregistered: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_stop_is_idempotent() {
        let sup = ScriptedSupervisor::new();
        let id = SubscriberId::new("00101000000", 1);
        let mut handle = sup.start(&id).await.unwrap();
        assert_eq!(sup.live(&id.imsi), 1);
        assert_eq!(sup.stop(&mut handle).await.termination, Termination::Exited);
        assert_eq!(sup.stop(&mut handle).await, Teardown::already_stopped());
        assert_eq!(sup.live(&id.imsi), 0);
        assert_eq!(sup.calls_for(&id.imsi, CallKind::Stop).len(), 1);
    }
}
