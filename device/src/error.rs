use crate::PixelFormat;
use std::path::PathBuf;

pub type Result<T, E = DeviceError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum DeviceError {
    #[error("no device matches '{0}'")]
    NotFound(String),
    #[error("device '{0}' is already opened by another session")]
    Busy(String),
    #[error("access to device '{0}' was denied")]
    AccessDenied(String),
    #[error("device '{0}' has been lost")]
    Lost(String),
    #[error("pixel format {format} is not supported by '{device}'")]
    UnsupportedPixelFormat { device: String, format: PixelFormat },
    #[error("stream setup was rejected by '{device}': {reason}")]
    StreamSetupRejected { device: String, reason: String },
    #[error("cannot {operation} on '{device}' while {state}")]
    InvalidState {
        device: String,
        operation: &'static str,
        state: &'static str,
    },
    #[error("acquisition could not be started on '{0}'")]
    AcquisitionFailed(String),
    #[error("this device layer cannot open devices from a state file")]
    StateFileUnsupported,
    #[error("failed to read device state {path:?}: {source}")]
    StateFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid device state {path:?}: {source}")]
    StateFileFormat {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },
}
