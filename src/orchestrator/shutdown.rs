use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};

pub const SIGINT: i32 = 2;
pub const SIGTERM: i32 = 15;

/// Operator cancellation, shared between the signal listener and the
/// execution supervisor.
///
/// The first SIGINT/SIGTERM is recorded and delivered to whoever waits on
/// it. A second signal while shutdown is already in progress SIGKILLs the
/// tracked child process group and exits immediately with `128 + signal`.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<Option<i32>>>,
    rx: watch::Receiver<Option<i32>>,
    /// Process group of the running child, 0 when none
    group: Arc<AtomicI32>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// A signal source that only fires through [`ShutdownSignal::trigger`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
            group: Arc::new(AtomicI32::new(0)),
        }
    }

    /// Listen for SIGINT and SIGTERM. Must be called inside a tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        let shutdown = Self::new();
        shutdown.spawn_listener()?;
        Ok(shutdown)
    }

    #[cfg(unix)]
    fn spawn_listener(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let sig = tokio::select! {
                    _ = sigint.recv() => SIGINT,
                    _ = sigterm.recv() => SIGTERM,
                };
                this.deliver(sig);
            }
        });
        Ok(())
    }

    #[cfg(not(unix))]
    fn spawn_listener(&self) -> std::io::Result<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                this.deliver(SIGINT);
            }
        });
        Ok(())
    }

    fn deliver(&self, sig: i32) {
        let current = *self.tx.borrow();
        if let Some(first) = current {
            warn!(signal = sig, first, "second signal received, exiting immediately");
            kill_group(self.tracked_group());
            std::process::exit(128 + sig);
        }
        info!(signal = sig, "shutdown requested");
        self.tx.send_replace(Some(sig));
    }

    /// Remember the process group of the child being supervised.
    pub fn track_group(&self, pgid: i32) {
        self.group.store(pgid, Ordering::SeqCst);
    }

    pub fn clear_group(&self) {
        self.group.store(0, Ordering::SeqCst);
    }

    pub fn tracked_group(&self) -> Option<i32> {
        match self.group.load(Ordering::SeqCst) {
            0 => None,
            pgid => Some(pgid),
        }
    }

    /// Record `sig` as if it had been delivered by the operating system.
    /// Only the first signal is kept.
    pub fn trigger(&self, sig: i32) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(sig);
                true
            } else {
                false
            }
        });
    }

    /// The first signal received, if any.
    pub fn received(&self) -> Option<i32> {
        *self.rx.borrow()
    }

    /// Resolve once a signal has been received. Cancel-safe.
    pub async fn wait(&self) -> i32 {
        let mut rx = self.rx.clone();
        loop {
            if let Some(sig) = *rx.borrow_and_update() {
                return sig;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as any clone of self.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: Option<i32>) {
    let Some(pgid) = pgid else {
        return;
    };
    // SAFETY: killpg only sends a signal.
    if unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) } != 0 {
        warn!(pgid, error = %std::io::Error::last_os_error(), "failed to kill command group");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: Option<i32>) {}
