//! Process supervision for a single UE.
//!
//! Starts the external simulator with a per-subscriber config, relays its output, and tears it
//! down again: deregister through the control CLI, SIGTERM, then SIGKILL after the grace period.

use super::relay::spawn_line_relay;
use crate::cli::OutputLine;
use crate::error::LifecycleError;
use crate::model::{SimulatorConfig, SubscriberId};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How the managed process ended during a `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Nothing to do: the handle was already stopped.
    AlreadyStopped,
    /// Exited on its own or within the grace period after SIGTERM.
    Exited,
    /// Had to be force-killed.
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
    pub termination: Termination,
    pub deregistered: bool,
}

impl Teardown {
    pub fn already_stopped() -> Self {
        Self {
            termination: Termination::AlreadyStopped,
            deregistered: false,
        }
    }
}

/// Starts and stops UE processes. `stop` must be idempotent per handle.
#[async_trait]
pub trait Supervisor: Send + Sync + 'static {
    type Handle: Send + 'static;

    async fn start(&self, id: &SubscriberId) -> Result<Self::Handle, LifecycleError>;

    async fn stop(&self, handle: &mut Self::Handle) -> Teardown;
}

/// Stop whatever is tracked for `id`. With nothing tracked this only logs a warning.
pub async fn stop_tracked<S: Supervisor>(
    supervisor: &S,
    id: &SubscriberId,
    handle: Option<&mut S::Handle>,
) -> Teardown {
    match handle {
        Some(h) => supervisor.stop(h).await,
        None => {
            warn!(imsi = %id, "stop requested but no UE process is tracked");
            Teardown::already_stopped()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Terminating,
    Terminated,
}

/// A running UE simulator owned by one subscriber task.
pub struct ManagedProcess {
    id: SubscriberId,
    pid: Option<u32>,
    child: Child,
    state: ProcessState,
    relays: Vec<JoinHandle<()>>,
}

impl ManagedProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }
}

/// Supervisor for the real simulator binaries.
pub struct UeSupervisor {
    cfg: SimulatorConfig,
    out_tx: mpsc::UnboundedSender<OutputLine>,
}

impl UeSupervisor {
    pub fn new(cfg: SimulatorConfig, out_tx: mpsc::UnboundedSender<OutputLine>) -> Self {
        Self { cfg, out_tx }
    }

    fn simulator_command(&self, id: &SubscriberId) -> Command {
        let mut cmd = if self.cfg.use_sudo {
            let mut c = Command::new("sudo");
            c.arg(&self.cfg.simulator);
            c
        } else {
            Command::new(&self.cfg.simulator)
        };
        cmd.arg("-c")
            .arg(self.cfg.config_path(id))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so signals also reach whatever a sudo or shell wrapper started.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    async fn deregister(&self, id: &SubscriberId) -> Result<(), LifecycleError> {
        let mut cmd = Command::new(&self.cfg.control_cli);
        cmd.arg(id.control_target())
            .arg("--exec")
            .arg(&self.cfg.deregister_instruction)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        info!(imsi = %id, "executing deregistration");
        let output = match timeout(self.cfg.control_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(LifecycleError::ControlCommand {
                    imsi: id.imsi.clone(),
                    reason: format!("could not run {}: {e}", self.cfg.control_cli.display()),
                })
            }
            Err(_) => {
                return Err(LifecycleError::ControlCommand {
                    imsi: id.imsi.clone(),
                    reason: format!(
                        "timed out after {}",
                        humantime::format_duration(self.cfg.control_timeout)
                    ),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            info!(imsi = %id, output = %stdout.trim(), "deregistration output");
        }
        if !stderr.trim().is_empty() {
            warn!(imsi = %id, output = %stderr.trim(), "deregistration error output");
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(LifecycleError::ControlCommand {
                imsi: id.imsi.clone(),
                reason: format!("control command exited with {}", output.status),
            })
        }
    }

    async fn terminate(&self, handle: &mut ManagedProcess) -> Termination {
        match handle.child.try_wait() {
            Ok(Some(status)) => {
                debug!(imsi = %handle.id, %status, "UE process had already exited");
                return Termination::Exited;
            }
            Ok(None) => {}
            Err(e) => warn!(imsi = %handle.id, "could not poll UE process: {e}"),
        }

        if let Err(e) = request_termination(&mut handle.child) {
            warn!(imsi = %handle.id, "failed to send SIGTERM: {e}");
        }

        match timeout(self.cfg.grace_period, handle.child.wait()).await {
            Ok(Ok(status)) => {
                info!(imsi = %handle.id, pid = ?handle.pid(), %status, "UE process exited");
                Termination::Exited
            }
            Ok(Err(e)) => {
                warn!(imsi = %handle.id, "waiting on UE process failed: {e}");
                force_kill(handle).await
            }
            Err(_) => {
                let err = LifecycleError::TeardownTimeout {
                    imsi: handle.id.imsi.clone(),
                    grace: self.cfg.grace_period,
                };
                warn!("{err}, escalating to SIGKILL");
                force_kill(handle).await
            }
        }
    }
}

#[async_trait]
impl Supervisor for UeSupervisor {
    type Handle = ManagedProcess;

    async fn start(&self, id: &SubscriberId) -> Result<ManagedProcess, LifecycleError> {
        let config = self.cfg.config_path(id);
        info!(imsi = %id, config = %config.display(), "starting UE");

        let mut child =
            self.simulator_command(id)
                .spawn()
                .map_err(|source| LifecycleError::Spawn {
                    imsi: id.imsi.clone(),
                    source,
                })?;
        let pid = child.id();

        let mut relays = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            relays.push(spawn_line_relay(
                stdout,
                format!("UE {id} STDOUT"),
                self.out_tx.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            relays.push(spawn_line_relay(
                stderr,
                format!("UE {id} STDERR"),
                self.out_tx.clone(),
            ));
        }

        info!(imsi = %id, pid = ?pid, "UE running");
        Ok(ManagedProcess {
            id: id.clone(),
            pid,
            child,
            state: ProcessState::Running,
            relays,
        })
    }

    async fn stop(&self, handle: &mut ManagedProcess) -> Teardown {
        if handle.state() == ProcessState::Terminated {
            warn!(imsi = %handle.id, "UE process already stopped, ignoring stop");
            return Teardown::already_stopped();
        }
        handle.state = ProcessState::Terminating;

        // A failed deregistration must not keep the process alive.
        let deregistered = match self.deregister(&handle.id).await {
            Ok(()) => true,
            Err(e) => {
                warn!("{e}");
                false
            }
        };

        let termination = self.terminate(handle).await;
        handle.state = ProcessState::Terminated;
        // Relays finish on their own at EOF; drop the handles so they detach.
        handle.relays.clear();

        Teardown {
            termination,
            deregistered,
        }
    }
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) -> std::io::Result<()> {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    #[allow(clippy::cast_possible_wrap)]
    let pgid = Pid::from_raw(pid as i32);
    killpg(pgid, signal).map_err(std::io::Error::from)
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    signal_group(child, nix::sys::signal::Signal::SIGTERM)
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(unix)]
async fn force_kill(handle: &mut ManagedProcess) -> Termination {
    if let Err(e) = signal_group(&handle.child, nix::sys::signal::Signal::SIGKILL) {
        warn!(imsi = %handle.id, "failed to kill UE process group: {e}");
        if let Err(e) = handle.child.start_kill() {
            warn!(imsi = %handle.id, "failed to kill UE process: {e}");
        }
    }
    if let Err(e) = handle.child.wait().await {
        warn!(imsi = %handle.id, "waiting on killed UE process failed: {e}");
    }
    Termination::Killed
}

#[cfg(not(unix))]
async fn force_kill(handle: &mut ManagedProcess) -> Termination {
    if let Err(e) = handle.child.kill().await {
        warn!(imsi = %handle.id, "failed to kill UE process: {e}");
    }
    Termination::Killed
}
