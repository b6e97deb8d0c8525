//! # Device layer
//!
//! The contract the stream tester consumes from a video-capture device layer, and
//! a simulated implementation of it ([`sim`]).
//!
//! The device layer owns its threads. Frames arrive on a delivery thread through
//! [`FrameSink::on_frame`] and loss notifications through the listeners registered
//! with [`Device::on_device_lost`]. Callers do not control when either runs.

#[macro_use]
extern crate tracing;

mod buffer;
mod discovery;
mod error;
mod format;
mod info;
pub mod sim;
mod stats;

pub use buffer::{
    BufferPool,
    FrameBuffer,
};
pub use discovery::{
    find_device,
    DeviceSource,
    DeviceState,
};
pub use error::{
    DeviceError,
    Result,
};
pub use format::{
    PixelFormat,
    VideoFormat,
};
pub use info::{
    DeviceInfo,
    TransportType,
};
pub use stats::{
    StreamCounters,
    StreamStatistics,
};
use std::{
    path::Path,
    sync::Arc,
};

/// Called once, from a device-layer thread, when the device disappears.
pub type DeviceLostListener = Box<dyn Fn() + Send + Sync + 'static>;

/// Receives delivered frames on the device's delivery thread.
///
/// Dropping the buffer hands it back to the device for requeueing.
pub trait FrameSink: Send + Sync + 'static {
    fn on_frame(&self, buffer: FrameBuffer);
}

/// Discovers and opens devices.
pub trait DeviceBackend: Send + Sync {
    /// All devices currently visible, in a stable order.
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Claims exclusive access to a device.
    fn open(&self, info: &DeviceInfo) -> Result<Box<dyn Device>>;

    /// Opens the device a [`DeviceState`] file refers to and restores its settings.
    fn open_from_state(&self, _path: &Path) -> Result<Box<dyn Device>> {
        Err(DeviceError::StateFileUnsupported)
    }

    fn open_source(&self, source: &DeviceSource) -> Result<Box<dyn Device>> {
        match source {
            DeviceSource::Discovered(info) => self.open(info),
            DeviceSource::StateFile(path) => self.open_from_state(path),
        }
    }
}

/// An opened device. Dropping it releases the claim.
pub trait Device: Send {
    fn info(&self) -> &DeviceInfo;

    /// Pixel formats the device offers, in the device's own order.
    fn pixel_formats(&self) -> Vec<PixelFormat>;

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<()>;

    /// Turns on the frame-rate-enable control. `Ok(false)` if the device has none.
    fn enable_frame_rate_control(&mut self) -> Result<bool>;

    fn video_format(&self) -> Result<VideoFormat>;

    /// Bytes per delivered frame with the current configuration.
    fn payload_size(&self) -> Result<u64>;

    fn on_device_lost(&mut self, listener: DeviceLostListener);

    /// Negotiates buffers and attaches the sink without starting acquisition.
    fn stream_setup(&mut self, sink: Arc<dyn FrameSink>) -> Result<()>;

    /// Detaches the sink. Stops acquisition first if needed.
    fn stream_stop(&mut self) -> Result<()>;

    fn acquisition_start(&mut self) -> Result<()>;

    fn acquisition_stop(&mut self) -> Result<()>;

    fn stream_statistics(&self) -> StreamStatistics;

    /// Packet resend requests, on transports that count them.
    fn resend_requested_packets(&self) -> Option<u64>;
}
