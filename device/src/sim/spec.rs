use crate::{
    DeviceInfo,
    PixelFormat,
    TransportType,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Description of one simulated camera.
///
/// Everything except the identity and geometry has a default, so a config entry
/// can be as small as model, serial, width and height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedDeviceSpec {
    pub model_name: String,
    pub serial: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub transport: TransportType,

    /// Offered pixel formats. The first one is active after open.
    #[serde(default = "default_pixel_formats")]
    pub pixel_formats: Vec<PixelFormat>,
    /// Offered formats that fail when selected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locked_pixel_formats: Vec<PixelFormat>,
    pub width: u32,
    pub height: u32,
    /// Frames per second produced by the delivery thread. 0 produces frames only
    /// through [`super::SimulatedDeviceHandle::deliver_frames`].
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    /// Whether the device has a frame-rate-enable control.
    #[serde(default)]
    pub frame_rate_enable: bool,
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,

    /// Every n-th frame is lost in transmission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmission_error_every: Option<u64>,
    /// Resend requests counted per transmission error on packet based transports.
    #[serde(default = "default_resends_per_error")]
    pub resends_per_error: u64,
    /// The device disconnects after delivering this many frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lose_after_frames: Option<u64>,

    #[serde(default)]
    pub fail_open: bool,
    #[serde(default)]
    pub fail_stream_setup: bool,
    #[serde(default)]
    pub fail_start: bool,
}

fn default_pixel_formats() -> Vec<PixelFormat> {
    vec![PixelFormat::Mono8]
}

fn default_frame_rate() -> f64 {
    30.0
}

fn default_buffer_count() -> usize {
    4
}

fn default_resends_per_error() -> u64 {
    3
}

impl SimulatedDeviceSpec {
    /// A minimal device that only produces frames when asked to.
    pub fn new(model_name: impl Into<String>, serial: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            model_name: model_name.into(),
            serial: serial.into(),
            user_id: None,
            transport: TransportType::default(),
            pixel_formats: default_pixel_formats(),
            locked_pixel_formats: Vec::new(),
            width,
            height,
            frame_rate: 0.0,
            frame_rate_enable: false,
            buffer_count: default_buffer_count(),
            transmission_error_every: None,
            resends_per_error: default_resends_per_error(),
            lose_after_frames: None,
            fail_open: false,
            fail_stream_setup: false,
            fail_start: false,
        }
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            model_name: self.model_name.clone(),
            serial: self.serial.clone(),
            unique_name: format!("{}_{}", self.model_name, self.serial),
            user_id: self.user_id.clone(),
            transport: self.transport,
        }
    }

    pub fn initial_pixel_format(&self) -> PixelFormat {
        self.pixel_formats.first().copied().unwrap_or(PixelFormat::Mono8)
    }
}
