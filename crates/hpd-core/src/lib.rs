//! # hpd-core - Core Domain Types
//!
//! Foundation crate for hotplug-dispatch. Provides the configuration model,
//! device identifier resolution, output aggregation, process events, error
//! handling and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, regex, tracing).
//!
//! ## Public API
//!
//! ### Configuration Model (`types`)
//! - [`Config`] - Ordered list of managed devices
//! - [`Device`] - A device class with its images and optional default image
//! - [`Image`] - A named shell command
//! - [`ImageKey`] - Session identity of an image: (device id, image name)
//!
//! ### Device Identification (`device_id`)
//! - [`DeviceId`] - `VVVV:PPPP` identifier
//! - [`resolve_device_id()`] - Upward sysfs walk for `idVendor`/`idProduct`
//!
//! ### Output (`output`)
//! - [`OutputAggregator`] - Carriage-return collapsing output buffer
//!
//! ### Events (`events`)
//! - [`ProcessEvent`] - Output chunk or exit of a spawned process
//! - [`StreamKind`] - stdout vs stderr
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use hpd_core::prelude::*;
//! ```

pub mod device_id;
pub mod error;
pub mod events;
pub mod logging;
pub mod output;
pub mod types;

/// Prelude for common imports used throughout all hotplug-dispatch crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use device_id::{resolve as resolve_device_id, DeviceId};
pub use error::{Error, Result, ResultExt};
pub use events::{ProcessEvent, StreamKind};
pub use output::OutputAggregator;
pub use types::{Config, Device, Image, ImageKey};
