//! Persisted configuration model: devices, their images, and image identity

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device_id::DeviceId;

/// Top-level persisted aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<Device>,
}

/// One managed physical device class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Human-readable label
    #[serde(default)]
    pub name: String,

    /// `VVVV:PPPP`, unique within the config
    pub id: DeviceId,

    /// Image auto-launched on attach; `None` disables auto-launch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_image: Option<String>,

    /// Ordered, name-unique within the device
    #[serde(default)]
    pub images: Vec<Image>,
}

/// A named, runnable command belonging to a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub name: String,
    /// Shell command executed verbatim
    pub command: String,
}

/// Session identity of an image: the (device, name) pair, never the command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub device_id: DeviceId,
    pub image_name: String,
}

impl ImageKey {
    pub fn new(device_id: DeviceId, image_name: impl Into<String>) -> Self {
        Self {
            device_id,
            image_name: image_name.into(),
        }
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.image_name)
    }
}

impl Config {
    /// Configuration written on first run
    pub fn bootstrap() -> Self {
        Self {
            devices: vec![Device {
                name: "Example".to_string(),
                id: DeviceId::new("1234:5678"),
                default_image: Some("target".to_string()),
                images: vec![
                    Image::new("target", "echo \"Target launched\""),
                    Image::new("target2", "echo \"Target2 launched\""),
                ],
            }],
        }
    }

    /// Find a device by exact id match
    pub fn find_device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| &d.id == id)
    }

    pub fn find_device_mut(&mut self, id: &DeviceId) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| &d.id == id)
    }

    /// Resolve an image by its session identity
    pub fn find_image(&self, key: &ImageKey) -> Option<(&Device, &Image)> {
        let device = self.find_device(&key.device_id)?;
        let image = device.find_image(&key.image_name)?;
        Some((device, image))
    }
}

impl Device {
    pub fn find_image(&self, name: &str) -> Option<&Image> {
        self.images.iter().find(|i| i.name == name)
    }

    /// The configured default image, if set and still present.
    pub fn default_image(&self) -> Option<&Image> {
        self.default_image
            .as_deref()
            .and_then(|name| self.find_image(name))
    }

    /// Display label, falling back to the id for unnamed devices
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            self.id.as_str()
        } else {
            &self.name
        }
    }

    pub fn image_key(&self, image: &Image) -> ImageKey {
        ImageKey::new(self.id.clone(), image.name.clone())
    }
}

impl Image {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_shape() {
        let config = Config::bootstrap();
        assert_eq!(config.devices.len(), 1);

        let device = &config.devices[0];
        assert_eq!(device.name, "Example");
        assert_eq!(device.id, "1234:5678");
        assert_eq!(device.default_image.as_deref(), Some("target"));
        assert_eq!(device.images.len(), 2);
        assert_eq!(device.images[0].command, "echo \"Target launched\"");
    }

    #[test]
    fn test_find_device_exact_match() {
        let config = Config::bootstrap();
        assert!(config.find_device(&DeviceId::new("1234:5678")).is_some());
        assert!(config.find_device(&DeviceId::new("1234:567")).is_none());
        assert!(config.find_device(&DeviceId::new("1234:5679")).is_none());
    }

    #[test]
    fn test_default_image_stale_name() {
        let mut device = Config::bootstrap().devices.remove(0);
        device.default_image = Some("gone".to_string());
        assert!(device.default_image().is_none());

        device.default_image = None;
        assert!(device.default_image().is_none());

        device.default_image = Some("target2".to_string());
        assert_eq!(device.default_image().map(|i| i.name.as_str()), Some("target2"));
    }

    #[test]
    fn test_image_key_ignores_command() {
        let device = Config::bootstrap().devices.remove(0);
        let mut edited = device.images[0].clone();
        edited.command = "something else".to_string();

        assert_eq!(device.image_key(&device.images[0]), device.image_key(&edited));
    }

    #[test]
    fn test_find_image_by_key() {
        let config = Config::bootstrap();
        let key = ImageKey::new(DeviceId::new("1234:5678"), "target2");
        let (device, image) = config.find_image(&key).unwrap();
        assert_eq!(device.name, "Example");
        assert_eq!(image.name, "target2");

        let missing = ImageKey::new(DeviceId::new("1234:5678"), "nope");
        assert!(config.find_image(&missing).is_none());
    }

    #[test]
    fn test_label_falls_back_to_id() {
        let mut device = Config::bootstrap().devices.remove(0);
        device.name.clear();
        assert_eq!(device.label(), "1234:5678");
    }

    #[test]
    fn test_image_key_display() {
        let key = ImageKey::new(DeviceId::new("0483:df11"), "flash");
        assert_eq!(key.to_string(), "0483:df11/flash");
    }
}
