mod relay;
pub mod scheduler;
pub mod supervisor;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::time::Instant;

pub use scheduler::SubscriberTask;
pub use supervisor::{Supervisor, UeSupervisor};

/// Upper bound on how long a sleeping subscriber takes to notice the stop signal.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Fleet-wide stop flag. Set once by the coordinator, never reset.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices, returning early once the signal is set.
    ///
    /// Returns `true` if the full duration elapsed, `false` if interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_set() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(STOP_POLL_INTERVAL)).await;
        }
    }
}
