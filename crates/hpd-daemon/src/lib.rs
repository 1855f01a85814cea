//! # hpd-daemon - Process and Device Plumbing
//!
//! Spawns image commands and streams their raw output, and watches the USB
//! bus for newly attached devices.
//!
//! Depends on [`hpd_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Process Management
//! - [`ImageProcess`] - Spawn `sh -c <command>`, stream stdout/stderr chunks, report exit
//!
//! ### Attach Monitoring
//! - [`spawn_usb_monitor()`] - Report every connected USB device from kernel hotplug events
//! - [`forward_attach_events()`] - The forwarding loop behind the monitor
//! - [`MonitorConfig`], [`MonitorEvent`]

pub mod process;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod usb;

// Public API re-exports
pub use process::{ImageProcess, DEFAULT_SHELL};
pub use usb::{forward_attach_events, spawn_usb_monitor, MonitorConfig, MonitorEvent};
