//! Audio device hot-plug monitoring
//!
//! Polls the capture backend on a fixed interval, diffs each snapshot
//! against the previous one and reports changes as `RecorderEvent`s. The
//! monitor never touches recording state itself; the controller decides
//! what a disconnect means.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::AudioDevice;
use crate::capture::{CaptureBackend, DeviceSelection};
use crate::error::CaptureError;
use crate::recorder::RecorderEvent;

/// Bounded wait for the polling task on shutdown
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of comparing two device snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDiff {
    /// Devices present before and missing now
    pub disconnected: Vec<AudioDevice>,
    /// Whether the set of device ids changed at all
    pub changed: bool,
}

/// Compare snapshots by device id
pub fn diff_devices(previous: &[AudioDevice], current: &[AudioDevice]) -> DeviceDiff {
    let disconnected: Vec<AudioDevice> = previous
        .iter()
        .filter(|p| !current.iter().any(|c| c.id == p.id))
        .cloned()
        .collect();
    let added = current
        .iter()
        .any(|c| !previous.iter().any(|p| p.id == c.id));

    DeviceDiff {
        changed: added || !disconnected.is_empty(),
        disconnected,
    }
}

/// Background poller for audio device changes
pub struct DeviceMonitor {
    backend: Arc<dyn CaptureBackend>,
    poll_interval: Duration,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl DeviceMonitor {
    pub fn new(backend: Arc<dyn CaptureBackend>, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Take an initial snapshot and start polling
    pub async fn start(&mut self, events: mpsc::UnboundedSender<RecorderEvent>) {
        if self.is_running() {
            debug!("Device monitor already running");
            return;
        }

        let initial = self.snapshot().await;
        info!(
            "Device monitor started with {} device(s), polling every {:?}",
            initial.len(),
            self.poll_interval
        );

        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();
        let backend = self.backend.clone();
        let period = self.poll_interval;

        self.handle = Some(tokio::spawn(async move {
            let mut previous = initial;
            // interval() ticks immediately; the initial snapshot covers that
            let mut ticker = interval_at(Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let backend = backend.clone();
                let current = match tokio::task::spawn_blocking(move || backend.try_list_devices()).await {
                    Ok(Ok(devices)) => devices,
                    Ok(Err(e)) => {
                        // Skip this round rather than report every device as gone
                        warn!("Skipping device check: {}", e);
                        continue;
                    }
                    Err(e) => {
                        error!("Device enumeration task failed: {}", e);
                        continue;
                    }
                };

                if cancel.is_cancelled() {
                    break;
                }

                let diff = diff_devices(&previous, &current);
                if !diff.changed {
                    continue;
                }

                for device in diff.disconnected {
                    warn!("Audio device disconnected: {}", device.display_name);
                    if events.send(RecorderEvent::DeviceDisconnected(device)).is_err() {
                        return;
                    }
                }
                info!("Audio devices changed ({} available)", current.len());
                if events.send(RecorderEvent::DevicesChanged(current.clone())).is_err() {
                    return;
                }
                previous = current;
            }

            debug!("Device monitor loop exited");
        }));
    }

    /// Cancel polling and wait briefly for the task
    ///
    /// An enumeration call stuck in the backend is left to finish on its own.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return;
        };

        match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
            Ok(Ok(())) => debug!("Device monitor stopped"),
            Ok(Err(e)) => error!("Device monitor task failed: {}", e),
            Err(_) => warn!(
                "Device monitor did not stop within {:?}; detaching",
                JOIN_TIMEOUT
            ),
        }
    }

    /// Current device list, empty on enumeration failure
    pub async fn snapshot(&self) -> Vec<AudioDevice> {
        let backend = self.backend.clone();
        match tokio::task::spawn_blocking(move || backend.list_devices()).await {
            Ok(devices) => devices,
            Err(e) => {
                error!("Device enumeration task failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Match a selection against the current device list
    ///
    /// Fails naming every selected id that is not enumerable. On success the
    /// selection comes back with each device's loopback flag taken from
    /// enumeration.
    pub async fn resolve_selection(
        &self,
        selected: &[DeviceSelection],
    ) -> Result<Vec<DeviceSelection>, CaptureError> {
        let available = self.snapshot().await;
        let mut resolved = Vec::with_capacity(selected.len());
        let mut missing = Vec::new();

        for selection in selected {
            match available.iter().find(|d| d.id == selection.id) {
                Some(device) => resolved.push(selection.clone().with_loopback(device.is_loopback)),
                None => missing.push(selection.id.clone()),
            }
        }

        if missing.is_empty() {
            Ok(resolved)
        } else {
            Err(CaptureError::DeviceUnavailable { devices: missing })
        }
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
