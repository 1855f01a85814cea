//! Test utilities for device-attach scenarios
//!
//! Builds fake sysfs trees so attach handling can be exercised without
//! real hardware.

use std::fs;
use std::path::{Path, PathBuf};

use hpd_core::device_id::{PRODUCT_ATTR, VENDOR_ATTR};

/// Creates a fake USB device node with `idVendor`/`idProduct` attributes.
///
/// # Arguments
/// * `root` - Directory standing in for `/sys/devices/...`
/// * `name` - Node name, e.g. `"1-2"`
/// * `vendor` - Contents of `idVendor` (a trailing newline is added)
/// * `product` - Contents of `idProduct` (a trailing newline is added)
///
/// # Returns
/// The node path.
pub fn fake_usb_device(root: &Path, name: &str, vendor: &str, product: &str) -> PathBuf {
    let node = root.join(name);
    fs::create_dir_all(&node).expect("create fake device node");
    fs::write(node.join(VENDOR_ATTR), format!("{}\n", vendor)).expect("write idVendor");
    fs::write(node.join(PRODUCT_ATTR), format!("{}\n", product)).expect("write idProduct");
    node
}

/// Creates an interface node below a device, as the kernel does for `1-2:1.0`.
///
/// Interface nodes carry no `idVendor`/`idProduct`, so resolving one walks up
/// to its parent device.
pub fn fake_usb_interface(device: &Path, name: &str) -> PathBuf {
    let node = device.join(name);
    fs::create_dir_all(&node).expect("create fake interface node");
    node
}
