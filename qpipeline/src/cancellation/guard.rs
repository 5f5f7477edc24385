//! Process-group ownership and interrupt handling for one run.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::{getpgrp, setpgid, Pid};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::errors::Result;

/// The OS-level process group this run and all of its children belong to.
pub trait ProcessGroup: Send + Sync + fmt::Debug {
    /// Makes the current process the leader of its own group.
    fn become_leader(&self) -> Result<()>;

    /// Sends a termination signal to every process in the group.
    fn terminate(&self) -> Result<()>;
}

/// The real process group, driven through `setpgid(2)` and `killpg(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessGroup;

impl ProcessGroup for OsProcessGroup {
    fn become_leader(&self) -> Result<()> {
        setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(std::io::Error::from)?;
        Ok(())
    }

    fn terminate(&self) -> Result<()> {
        killpg(getpgrp(), Signal::SIGTERM).map_err(std::io::Error::from)?;
        Ok(())
    }
}

/// Why the process group is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The operator pressed Ctrl+C or the process received SIGTERM.
    Interrupt,
    /// A stage failed and the run is about to exit.
    Fatal,
}

/// Owns the process group for the lifetime of a run.
///
/// Acquiring the guard makes the process a group leader and installs the
/// interrupt listener. Components that need to abort the run hold an
/// `Arc<RunGuard>` and call [`RunGuard::terminate_group`], which signals the
/// group at most once no matter how many paths reach it.
pub struct RunGuard {
    group: Arc<dyn ProcessGroup>,
    terminated: AtomicBool,
    interrupt_tx: Arc<watch::Sender<bool>>,
    quiet: bool,
    listener: Option<JoinHandle<()>>,
}

impl RunGuard {
    /// Acquires the guard: becomes group leader and listens for SIGINT/SIGTERM.
    ///
    /// Must be called from within a Tokio runtime. SIGTERM is handled too so
    /// the orchestrator survives its own group teardown long enough to report.
    pub fn acquire(group: Arc<dyn ProcessGroup>) -> Result<Self> {
        if let Err(e) = group.become_leader() {
            warn!(error = %e, "Unable to become process group leader");
        }

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let interrupt_tx = Arc::new(watch::channel(false).0);
        let listener_tx = Arc::clone(&interrupt_tx);
        let listener = tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    r = sigint.recv() => r,
                    r = sigterm.recv() => r,
                };
                if received.is_none() {
                    break;
                }
                debug!("Interrupt signal received");
                listener_tx.send_replace(true);
            }
        });

        Ok(Self {
            group,
            terminated: AtomicBool::new(false),
            interrupt_tx,
            quiet: false,
            listener: Some(listener),
        })
    }

    /// Creates a guard without signal handlers or leadership changes.
    ///
    /// Interrupts can still be raised with [`RunGuard::interrupt`].
    #[must_use]
    pub fn detached(group: Arc<dyn ProcessGroup>) -> Self {
        Self {
            group,
            terminated: AtomicBool::new(false),
            interrupt_tx: Arc::new(watch::channel(false).0),
            quiet: false,
            listener: None,
        }
    }

    /// Suppresses the operator notice printed on interrupt.
    #[must_use]
    pub const fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Raises the interrupt flag as if a signal had arrived.
    pub fn interrupt(&self) {
        self.interrupt_tx.send_replace(true);
    }

    /// Returns true once an interrupt has been received.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        *self.interrupt_tx.borrow()
    }

    /// Resolves once an interrupt has been received.
    pub async fn interrupted(&self) {
        let mut rx = self.interrupt_tx.subscribe();
        if rx.wait_for(|interrupted| *interrupted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Returns true if the group has already been torn down.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Terminates the process group. Only the first call signals the group;
    /// later calls return `false` and do nothing.
    pub fn terminate_group(&self, reason: TeardownReason) -> bool {
        if self
            .terminated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        if reason == TeardownReason::Interrupt && !self.quiet {
            println!("\nReceived kill signal (Ctrl+C)");
        }
        debug!(?reason, "Terminating process group");
        if let Err(e) = self.group.terminate() {
            error!(error = %e, "Error while killing process group");
        }
        true
    }
}

impl fmt::Debug for RunGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunGuard")
            .field("group", &self.group)
            .field("interrupted", &self.is_interrupted())
            .field("terminated", &self.is_terminated())
            .field("quiet", &self.quiet)
            .finish_non_exhaustive()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
