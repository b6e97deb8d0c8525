use crate::{
    DeviceError,
    DeviceInfo,
    PixelFormat,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    path::{
        Path,
        PathBuf,
    },
};

/// Looks up a device by an id given on the command line.
///
/// The id is matched against the serial number first, then the unique name, then
/// the model name. If nothing matches and the id is a number, it is used as a
/// zero-based index into `devices`.
pub fn find_device<'a>(devices: &'a [DeviceInfo], id: &str) -> Option<&'a DeviceInfo> {
    devices
        .iter()
        .find(|dev| dev.serial == id)
        .or_else(|| devices.iter().find(|dev| dev.unique_name == id))
        .or_else(|| devices.iter().find(|dev| dev.model_name == id))
        .or_else(|| id.parse::<usize>().ok().and_then(|index| devices.get(index)))
}

/// Where a session gets its device from.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceSource {
    /// A device from the discovery list.
    Discovered(DeviceInfo),
    /// A persisted [`DeviceState`] file naming the device and the settings to restore.
    StateFile(PathBuf),
}

impl fmt::Display for DeviceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSource::Discovered(info) => f.write_str(&info.unique_name),
            DeviceSource::StateFile(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Device settings persisted to disk.
///
/// Properties the device cannot apply are skipped when the state is restored, the
/// same way an incomplete state is accepted by the device layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Serial, unique name, model name or index; see [`find_device`].
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_format: Option<PixelFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
}

impl DeviceState {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| DeviceError::StateFileRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yml::from_str(&content).map_err(|source| DeviceError::StateFileFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = serde_yml::to_string(self).map_err(std::io::Error::other)?;
        std::fs::write(path, content)
    }
}
