//! Registry of live child processes with graceful-then-forceful shutdown.
//!
//! Every process started through [`crate::ProcessRunner`] is registered here
//! for its whole life. [`ProcessSupervisor::request_shutdown`] sets the
//! shared [`ShutdownSignal`], asks every live child to terminate, waits out a
//! bounded grace window and then force-kills whatever is left. All of it is
//! best-effort: signalling failures are swallowed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::shutdown::ShutdownSignal;

/// Total grace window shared by all children during shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Interval used while polling for children to exit.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Opaque handle to a registered child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle(u64);

#[derive(Debug)]
struct TrackedProcess {
    pid: Option<u32>,
    label: String,
}

/// Central registry of running child processes.
#[derive(Debug)]
pub struct ProcessSupervisor {
    shutdown: ShutdownSignal,
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, TrackedProcess>>,
    grace: Duration,
    poll_interval: Duration,
}

impl ProcessSupervisor {
    /// Create a supervisor that owns the writer side of `shutdown`.
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            shutdown,
            next_id: AtomicU64::new(1),
            live: Mutex::new(HashMap::new()),
            grace: DEFAULT_SHUTDOWN_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the grace window before children are force-killed.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Set the exit polling interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_signaled()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    // A poisoned registry is still a valid set of pids.
    fn registry(&self) -> MutexGuard<'_, HashMap<u64, TrackedProcess>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a freshly spawned child.
    ///
    /// Fails with [`MediaError::Interrupted`] once shutdown has been
    /// requested; the caller must then stop the child itself.
    pub fn register(&self, pid: Option<u32>, label: impl Into<String>) -> MediaResult<ProcessHandle> {
        let mut live = self.registry();
        // Checked under the lock so a concurrent shutdown either sees this
        // entry in its snapshot or makes us refuse it.
        if self.shutdown.is_signaled() {
            return Err(MediaError::Interrupted);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let label = label.into();
        debug!(pid = ?pid, label = %label, "Registered child process");
        live.insert(id, TrackedProcess { pid, label });
        Ok(ProcessHandle(id))
    }

    /// Forget a child that has exited. Unknown handles are ignored.
    pub fn unregister(&self, handle: ProcessHandle) {
        self.registry().remove(&handle.0);
    }

    pub fn is_registered(&self, handle: ProcessHandle) -> bool {
        self.registry().contains_key(&handle.0)
    }

    /// Number of live registered children.
    pub fn live_count(&self) -> usize {
        self.registry().len()
    }

    /// Set the shutdown signal and stop every registered child.
    ///
    /// Sends a terminate request to each child, waits up to the grace window
    /// for them to exit (runners unregister their child once reaped), then
    /// force-kills the rest. Safe to call repeatedly or concurrently.
    pub async fn request_shutdown(&self) {
        self.shutdown.signal();

        let targets: Vec<(u64, Option<u32>, String)> = self
            .registry()
            .iter()
            .map(|(id, p)| (*id, p.pid, p.label.clone()))
            .collect();

        if targets.is_empty() {
            return;
        }

        info!(count = targets.len(), "Terminating child processes");
        for (_, pid, _) in &targets {
            if let Some(pid) = pid {
                send_terminate(*pid);
            }
        }

        let deadline = Instant::now() + self.grace;
        loop {
            let remaining = {
                let live = self.registry();
                targets.iter().filter(|(id, _, _)| live.contains_key(id)).count()
            };
            if remaining == 0 || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        let stragglers: Vec<(u64, Option<u32>, String)> = {
            let live = self.registry();
            targets
                .into_iter()
                .filter(|(id, _, _)| live.contains_key(id))
                .collect()
        };
        for (id, pid, label) in stragglers {
            warn!(pid = ?pid, label = %label, "Child did not exit in time, killing");
            if let Some(pid) = pid {
                send_kill(pid);
            }
            self.registry().remove(&id);
        }
    }
}

/// Ask a process to terminate (SIGTERM). Best-effort.
#[cfg(unix)]
pub(crate) fn send_terminate(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM failed");
    }
}

/// Runners stop their own children on platforms without SIGTERM.
#[cfg(not(unix))]
pub(crate) fn send_terminate(_pid: u32) {}

/// Force-kill a process (SIGKILL). Best-effort.
#[cfg(unix)]
fn send_kill(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!(pid, error = %e, "SIGKILL failed");
    }
}

#[cfg(not(unix))]
fn send_kill(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let sup = ProcessSupervisor::new(ShutdownSignal::new());
        let a = sup.register(None, "a").unwrap();
        let b = sup.register(None, "b").unwrap();
        assert_ne!(a, b);
        assert_eq!(sup.live_count(), 2);

        sup.unregister(a);
        sup.unregister(a);
        assert!(!sup.is_registered(a));
        assert!(sup.is_registered(b));
        assert_eq!(sup.live_count(), 1);
    }

    #[tokio::test]
    async fn test_register_refused_after_shutdown() {
        let sup = ProcessSupervisor::new(ShutdownSignal::new());
        sup.request_shutdown().await;
        assert!(sup.is_shutting_down());
        assert!(matches!(sup.register(None, "late"), Err(MediaError::Interrupted)));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_clears_stragglers() {
        let sup = ProcessSupervisor::new(ShutdownSignal::new())
            .with_grace(Duration::from_millis(100))
            .with_poll_interval(Duration::from_millis(10));
        // No pid: nothing to signal, the entry is dropped after the grace window.
        sup.register(None, "ghost").unwrap();

        let started = Instant::now();
        sup.request_shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(sup.live_count(), 0);

        sup.request_shutdown().await;
        assert_eq!(sup.live_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_terminates_real_child() {
        let sup = ProcessSupervisor::new(ShutdownSignal::new())
            .with_grace(Duration::from_millis(500))
            .with_poll_interval(Duration::from_millis(10));

        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let handle = sup.register(child.id(), "sleep").unwrap();

        let started = Instant::now();
        sup.request_shutdown().await;
        let status = tokio::time::timeout(Duration::from_secs(2), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!sup.is_registered(handle));
    }
}
