//! Stable vendor:product identifiers resolved from device paths
//!
//! A device-attach event carries a subsystem path such as
//! `/sys/devices/pci0000:00/0000:00:14.0/usb1/1-2`. The identifying
//! `idVendor`/`idProduct` attributes live on the USB device node, which may be
//! the attached path itself or one of its ancestors (interfaces and block
//! devices hang below it). [`resolve`] walks upward until it finds both.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Attribute file holding the USB vendor id
pub const VENDOR_ATTR: &str = "idVendor";

/// Attribute file holding the USB product id
pub const PRODUCT_ATTR: &str = "idProduct";

/// Number of bytes read from each attribute file
const ATTR_LEN: u64 = 4;

/// A `VVVV:PPPP` device identifier.
///
/// Matching against configuration is by exact string equality; the contents
/// are whatever the attribute files held and are not validated as hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id has the canonical 4-hex `:` 4-hex shape
    pub fn is_well_formed(&self) -> bool {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        PATTERN
            .get_or_init(|| Regex::new(r"^[0-9a-fA-F]{4}:[0-9a-fA-F]{4}$").expect("valid regex"))
            .is_match(&self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<str> for DeviceId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for DeviceId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Resolve a device path to its vendor:product identifier.
///
/// Checks `<path>/idVendor` and `<path>/idProduct`; when either is missing,
/// unreadable or empty, the path is truncated at its last `/` and the check
/// repeats. Returns `None` once the path is exhausted. Never fails hard.
pub fn resolve(device_path: impl AsRef<Path>) -> Option<DeviceId> {
    let full = device_path.as_ref().to_string_lossy().into_owned();
    let mut current: &str = &full;

    while !current.is_empty() {
        let dir = Path::new(current);
        if let (Some(vendor), Some(product)) = (
            read_attr(&dir.join(VENDOR_ATTR)),
            read_attr(&dir.join(PRODUCT_ATTR)),
        ) {
            return Some(DeviceId(format!("{}:{}", vendor, product)));
        }

        match current.rfind('/') {
            Some(idx) => current = &current[..idx],
            // Relative path with nothing left to strip
            None => break,
        }
    }

    None
}

/// Read at most [`ATTR_LEN`] bytes from an attribute file.
///
/// A trailing newline beyond the fourth byte is naturally excluded; no other
/// trimming happens. Empty files count as absent.
fn read_attr(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut bytes = Vec::with_capacity(ATTR_LEN as usize);
    file.take(ATTR_LEN).read_to_end(&mut bytes).ok()?;
    if bytes.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
