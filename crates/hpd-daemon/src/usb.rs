//! USB attach monitor
//!
//! Subscribes to kernel hotplug notifications through `nusb` and reports the
//! sysfs path of every connected device. Each physical attach produces one
//! event, including a re-plug into the same port.

use std::path::PathBuf;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::{mpsc, watch};

use hpd_core::prelude::*;

/// Configuration for the attach monitor
#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    /// Report devices already present at start-up
    pub scan_existing: bool,
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scan_existing(mut self, enabled: bool) -> Self {
        self.scan_existing = enabled;
        self
    }
}

/// Events produced by the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// A device was connected; the path is its sysfs device directory
    Attached(PathBuf),
    /// The hotplug source failed or ended
    Error(String),
}

/// Attach paths from the system hotplug source.
///
/// The watch is registered before the initial listing so a device plugged in
/// meanwhile is not missed. It may then be reported twice.
#[cfg(target_os = "linux")]
fn attach_stream(scan_existing: bool) -> Result<BoxStream<'static, PathBuf>> {
    use nusb::hotplug::HotplugEvent;

    let watch = nusb::watch_devices()
        .map_err(|e| Error::monitor(format!("cannot watch USB hotplug: {}", e)))?;

    let existing: Vec<PathBuf> = if scan_existing {
        nusb::list_devices()
            .map_err(|e| Error::monitor(format!("cannot list USB devices: {}", e)))?
            .map(|info| info.sysfs_path().to_path_buf())
            .collect()
    } else {
        Vec::new()
    };

    let connected = watch.filter_map(|event| async move {
        match event {
            HotplugEvent::Connected(info) => Some(info.sysfs_path().to_path_buf()),
            HotplugEvent::Disconnected(_) => None,
        }
    });

    Ok(stream::iter(existing).chain(connected).boxed())
}

#[cfg(not(target_os = "linux"))]
fn attach_stream(_scan_existing: bool) -> Result<BoxStream<'static, PathBuf>> {
    Err(Error::monitor("USB attach monitoring needs Linux sysfs"))
}

/// Spawn the monitor task.
///
/// Runs until `shutdown_rx` flips to `true`, the hotplug source ends or the
/// receiver side of `tx` is dropped.
pub fn spawn_usb_monitor(
    config: MonitorConfig,
    tx: mpsc::Sender<MonitorEvent>,
    shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let attached = match attach_stream(config.scan_existing) {
            Ok(attached) => attached,
            Err(e) => {
                warn!("USB monitor unavailable: {}", e);
                let _ = tx.send(MonitorEvent::Error(e.to_string())).await;
                return;
            }
        };

        info!(
            "Watching USB hotplug events (scan existing: {})",
            config.scan_existing
        );
        forward_attach_events(attached, tx, shutdown_rx).await;
    })
}

/// Forward attach paths as [`MonitorEvent::Attached`] until shutdown.
///
/// Every item is forwarded; repeated paths are separate attaches.
pub async fn forward_attach_events<S>(
    attached: S,
    tx: mpsc::Sender<MonitorEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    S: Stream<Item = PathBuf> + Send,
{
    let mut attached = std::pin::pin!(attached);

    loop {
        tokio::select! {
            next = attached.next() => match next {
                Some(path) => {
                    debug!("USB device connected: {}", path.display());
                    if tx.send(MonitorEvent::Attached(path)).await.is_err() {
                        debug!("Monitor channel closed");
                        return;
                    }
                }
                None => {
                    warn!("USB hotplug stream ended");
                    let _ = tx
                        .send(MonitorEvent::Error("USB hotplug stream ended".to_string()))
                        .await;
                    break;
                }
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!("USB monitor stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn recv(rx: &mut mpsc::Receiver<MonitorEvent>) -> MonitorEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("monitor event")
            .expect("channel open")
    }

    #[test]
    fn test_monitor_config_builder() {
        assert!(!MonitorConfig::default().scan_existing);
        assert!(MonitorConfig::new().with_scan_existing(true).scan_existing);
    }

    #[tokio::test]
    async fn test_replug_on_same_port_is_reported_twice() {
        let port = PathBuf::from("/sys/devices/pci0000:00/usb1/1-2");
        let (tx, mut rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let attached = stream::iter(vec![port.clone(), port.clone()]).chain(stream::pending());
        let handle = tokio::spawn(forward_attach_events(attached, tx, shutdown_rx));

        assert_eq!(recv(&mut rx).await, MonitorEvent::Attached(port.clone()));
        assert_eq!(recv(&mut rx).await, MonitorEvent::Attached(port));
        handle.abort();
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let (tx, _rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(forward_attach_events(
            stream::pending::<PathBuf>(),
            tx,
            shutdown_rx,
        ));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor stops")
            .unwrap();
    }

    #[tokio::test]
    async fn test_ended_source_is_reported() {
        let (tx, mut rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        forward_attach_events(stream::empty::<PathBuf>(), tx, shutdown_rx).await;

        assert!(matches!(recv(&mut rx).await, MonitorEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(rx);

        let attached =
            stream::iter(vec![PathBuf::from("/sys/devices/x/1-1")]).chain(stream::pending());
        tokio::time::timeout(
            Duration::from_secs(2),
            forward_attach_events(attached, tx, shutdown_rx),
        )
        .await
        .expect("monitor returns once nobody listens");
    }
}
