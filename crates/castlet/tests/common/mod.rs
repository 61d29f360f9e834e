#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use castlet::{CastDaemon, DaemonConfig, ExecSpawner, WorkerSpawner, WorkerState};
use tokio::process::Child;

/// Path to the simulated worker binary built alongside the crate.
pub const SIM: &str = env!("CARGO_BIN_EXE_speaker_sim");

/// Spawner wrapper that counts how many processes were actually spawned.
pub struct CountingSpawner {
    inner: ExecSpawner,
    spawns: AtomicUsize,
}

impl CountingSpawner {
    pub fn new(inner: ExecSpawner) -> Arc<Self> {
        Arc::new(Self {
            inner,
            spawns: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }
}

impl WorkerSpawner for CountingSpawner {
    fn spawn(&self) -> io::Result<Child> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.inner.spawn()
    }
}

pub fn sim_spawner(args: &[&str]) -> ExecSpawner {
    ExecSpawner::new(SIM, args.iter().copied())
}

pub fn sh_spawner(script: &str) -> ExecSpawner {
    ExecSpawner::new("/bin/sh", ["-c", script])
}

/// Config with short grace periods so supervision paths finish inside a
/// test budget.
pub fn fast_config(spawner: Arc<dyn WorkerSpawner>) -> DaemonConfig {
    DaemonConfig::new(spawner)
        .with_ready_grace(Duration::from_millis(100))
        .with_stop_grace(Duration::from_millis(500))
        .with_quit_timeout(Duration::from_millis(500))
        .with_restart_backoff_unit(Duration::from_millis(50))
}

/// Poll until the daemon reaches `state` or the deadline passes.
pub async fn wait_for_state(daemon: &CastDaemon, state: WorkerState, deadline: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if daemon.state() == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    daemon.state() == state
}
