//! Repeated-scan scheduling.
//!
//! A [`RepeatedScan`] runs as Begin → Update* → End. The scheduler drives
//! strictly sequential ticks (at most one tick active at a time), keeps a
//! scan queued until its declared capability is satisfied, and distinguishes
//! a normal stop (End runs exactly once) from cancellation (the scan is
//! simply never ticked again and End is skipped).

use crate::task::{TaskContext, TaskOutcome, TaskProgress, TrackableTask};
use anyhow::Result;
use dashmap::DashSet;
use log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Ambient capabilities a scan may require before it is allowed to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// The background snapshot prefilter has produced usable region data.
    SnapshotPrefilter,
}

/// A cancellable scan with a Begin/Update/End lifecycle.
pub trait RepeatedScan: Send + 'static {
    fn name(&self) -> &str;

    /// Capability that must be satisfied before `begin` runs. The scan stays
    /// queued until then.
    fn required_capability(&self) -> Option<Capability> {
        None
    }

    /// An error here is an initialization failure: the scan transitions
    /// straight to Cancelled and no state is persisted.
    fn begin(&mut self) -> Result<()>;

    fn update(&mut self, progress: &TaskProgress) -> Result<()>;

    /// Runs exactly once on normal stop, never on cancellation.
    fn end(&mut self) -> Result<()>;
}

/// Handle to a scheduled repeated scan.
pub struct ScanHandle {
    task: TrackableTask<()>,
    stop: Arc<AtomicBool>,
}

impl ScanHandle {
    /// Request a normal stop: the current tick finishes, then End runs.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Request cancellation: the scan is not ticked again and End is
    /// skipped.
    pub fn cancel(&self) {
        self.task.cancel();
    }

    pub fn progress(&self) -> (u64, u64) {
        self.task.progress()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn outcome(self) -> TaskOutcome<()> {
        self.task.outcome().await
    }
}

/// Drives repeated scans on a tick interval.
pub struct ScanScheduler {
    runtime: tokio::runtime::Handle,
    capabilities: Arc<DashSet<Capability>>,
    tick_interval: Duration,
}

impl ScanScheduler {
    pub fn new(runtime: tokio::runtime::Handle, tick_interval: Duration) -> Self {
        Self {
            runtime,
            capabilities: Arc::new(DashSet::new()),
            tick_interval,
        }
    }

    /// Mark an ambient capability as satisfied, releasing queued scans that
    /// require it.
    pub fn mark_ready(&self, capability: Capability) {
        self.capabilities.insert(capability);
    }

    pub fn is_ready(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Queue a repeated scan. It starts once its required capability is
    /// satisfied and runs until stopped or cancelled.
    pub fn run(&self, scan: impl RepeatedScan) -> ScanHandle {
        let name = scan.name().to_owned();
        let capabilities = Arc::clone(&self.capabilities);
        let interval = self.tick_interval;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let task = TrackableTask::spawn(name.clone(), &self.runtime, move |ctx| async move {
            let result = tokio::task::spawn_blocking(move || {
                drive(scan, &name, &capabilities, interval, &stop_flag, &ctx)
            })
            .await;

            match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("repeated scan panicked: {}", e);
                    TaskOutcome::Failed
                }
            }
        });

        ScanHandle { task, stop }
    }
}

fn drive(
    mut scan: impl RepeatedScan,
    name: &str,
    capabilities: &DashSet<Capability>,
    interval: Duration,
    stop: &AtomicBool,
    ctx: &TaskContext,
) -> TaskOutcome<()> {
    // Stay queued until the declared capability is satisfied.
    if let Some(capability) = scan.required_capability() {
        while !capabilities.contains(&capability) {
            if ctx.is_cancelled() {
                warn!("scan '{}' cancelled while queued on {:?}", name, capability);
                return TaskOutcome::Cancelled;
            }
            std::thread::sleep(interval);
        }
    }

    if ctx.is_cancelled() {
        warn!("scan '{}' cancelled before begin", name);
        return TaskOutcome::Cancelled;
    }

    if let Err(e) = scan.begin() {
        warn!("scan '{}' failed to begin: {:#}", name, e);
        return TaskOutcome::Cancelled;
    }

    info!("scan '{}' started", name);

    loop {
        if ctx.is_cancelled() {
            warn!("scan '{}' cancelled", name);
            return TaskOutcome::Cancelled;
        }
        if stop.load(Ordering::Relaxed) {
            break;
        }
        if let Err(e) = scan.update(ctx.progress()) {
            error!("scan '{}' tick failed: {:#}", name, e);
            return TaskOutcome::Failed;
        }
        std::thread::sleep(interval);
    }

    match scan.end() {
        Ok(()) => {
            info!("scan '{}' finished", name);
            TaskOutcome::Completed(())
        }
        Err(e) => {
            error!("scan '{}' failed to finish: {:#}", name, e);
            TaskOutcome::Failed
        }
    }
}
