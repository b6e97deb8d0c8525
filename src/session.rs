use crate::fps_counter::FrameRateCounter;
use std::{
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    time::Instant,
};
use stream_tester_device::{
    Device,
    DeviceBackend,
    DeviceError,
    DeviceSource,
    FrameBuffer,
    FrameSink,
    PixelFormat,
    StreamStatistics,
    VideoFormat,
};

/// Pixel formats tried, in order, when the largest stream settings are requested.
pub const PREFERRED_PIXEL_FORMATS: [PixelFormat; 5] = [
    PixelFormat::BayerBG8,
    PixelFormat::BayerGB8,
    PixelFormat::BayerGR8,
    PixelFormat::BayerRG8,
    PixelFormat::Mono8,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SessionState {
    #[display("idle")]
    Idle,
    #[display("configured")]
    Configured,
    #[display("streaming")]
    Streaming,
    #[display("stopped")]
    Stopped,
}

#[derive(thiserror::Error, Debug)]
pub enum OpenError {
    #[error("device {device} is unavailable: {source}")]
    DeviceUnavailable {
        device: String,
        #[source]
        source: DeviceError,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum StreamSetupError {
    #[error("stream setup for {device} was rejected: {source}")]
    Rejected {
        device: String,
        #[source]
        source: DeviceError,
    },
    #[error("cannot set up the stream of {device} while {state}")]
    InvalidState { device: String, state: SessionState },
}

#[derive(thiserror::Error, Debug)]
pub enum AcquisitionError {
    #[error("failed to start {device}: {source}")]
    Start {
        device: String,
        #[source]
        source: DeviceError,
    },
    #[error("failed to stop {device}: {source}")]
    Stop {
        device: String,
        #[source]
        source: DeviceError,
    },
    #[error("cannot start {device} while {state}")]
    NotConfigured { device: String, state: SessionState },
}

/// Statistics of one session at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatisticsSnapshot {
    pub stream: StreamStatistics,
    /// Frame rate since the previous snapshot.
    pub fps: f32,
    /// Frames received since the previous snapshot.
    pub frames: u64,
    pub mbps: u64,
    /// `None` on transports without packet resends.
    pub resend_requested: Option<u64>,
    pub device_lost: bool,
}

/// Megabits per second for frames of `payload_size` bytes arriving at `fps`.
pub fn calc_mbps(fps: f32, payload_size: u64) -> u64 {
    let mbps = f64::from(fps) * payload_size as f64 * 8.0 / 1_000_000.0;
    if mbps.is_finite() && mbps > 0.0 {
        mbps.floor() as u64
    } else {
        0
    }
}

/// Counts frames and immediately returns their buffers.
#[derive(Debug, Default)]
struct CountingSink {
    fps: FrameRateCounter,
}

impl FrameSink for CountingSink {
    fn on_frame(&self, buffer: FrameBuffer) {
        self.fps.record_frame();
        drop(buffer);
    }
}

/// One device's streaming lifecycle and statistics.
pub struct StreamSession {
    name: String,
    device: Box<dyn Device>,
    state: SessionState,
    video_format: Option<VideoFormat>,
    payload_size: u64,
    has_resend_counter: bool,
    sink: Arc<CountingSink>,
    device_lost: Arc<AtomicBool>,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("video_format", &self.video_format)
            .field("payload_size", &self.payload_size)
            .field("device_lost", &self.is_device_lost())
            .finish()
    }
}

impl StreamSession {
    /// Opens the device and starts watching for its loss.
    pub fn open(backend: &dyn DeviceBackend, source: &DeviceSource) -> Result<Self, OpenError> {
        let mut device = backend
            .open_source(source)
            .map_err(|source_err| {
                warn!(device = %source, "Failed to open device: {source_err}");
                OpenError::DeviceUnavailable {
                    device: source.to_string(),
                    source: source_err,
                }
            })?;

        let name = device.info().display_name();
        let device_lost = Arc::new(AtomicBool::new(false));
        device.on_device_lost(Box::new({
            let device_lost = Arc::clone(&device_lost);
            let name = name.clone();
            move || {
                device_lost.store(true, Ordering::Release);
                warn!(device = %name, "Device lost");
            }
        }));

        debug!(device = %name, "Opened device");
        Ok(Self {
            name,
            device,
            state: SessionState::Idle,
            video_format: None,
            payload_size: 0,
            has_resend_counter: false,
            sink: Arc::new(CountingSink::default()),
            device_lost,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::Acquire)
    }

    pub fn video_format(&self) -> Option<&VideoFormat> {
        self.video_format.as_ref()
    }

    /// The video format as `"{pixel format} {width}x{height}@{frame rate}"`, once set up.
    pub fn video_format_description(&self) -> String {
        self.video_format
            .map(|format| format.to_string())
            .unwrap_or_else(|| "<not set up>".to_string())
    }

    pub fn payload_size(&self) -> u64 {
        self.payload_size
    }

    /// Switches to a higher-bandwidth pixel format when `prefer_largest` is set.
    ///
    /// Candidates from [`PREFERRED_PIXEL_FORMATS`] that the device does not offer or
    /// refuses are skipped; if none applies the current format stays. Afterwards the
    /// frame rate control is enabled if the device has one. Returns the selected
    /// format.
    pub fn negotiate_format(&mut self, prefer_largest: bool) -> Option<PixelFormat> {
        if !prefer_largest {
            return None;
        }

        let offered = self.device.pixel_formats();
        let selected = PREFERRED_PIXEL_FORMATS
            .into_iter()
            .filter(|candidate| offered.contains(candidate))
            .find(|candidate| match self.device.set_pixel_format(*candidate) {
                Ok(()) => true,
                Err(err) => {
                    debug!(device = %self.name, format = %candidate, "Skipping pixel format: {err}");
                    false
                }
            });

        match self.device.enable_frame_rate_control() {
            Ok(true) => debug!(device = %self.name, "Enabled frame rate control"),
            Ok(false) => {}
            Err(err) => debug!(device = %self.name, "Could not enable frame rate control: {err}"),
        }

        if let Some(format) = selected {
            info!(device = %self.name, %format, "Selected pixel format");
        }
        selected
    }

    /// Attaches the counting sink and captures the video format and payload size.
    pub fn setup_stream(&mut self) -> Result<(), StreamSetupError> {
        if self.state != SessionState::Idle {
            return Err(StreamSetupError::InvalidState {
                device: self.name.clone(),
                state: self.state,
            });
        }
        let rejected = |source| StreamSetupError::Rejected {
            device: self.name.clone(),
            source,
        };

        self.has_resend_counter = self.device.resend_requested_packets().is_some();
        let video_format = self.device.video_format().map_err(rejected)?;
        let sink: Arc<dyn FrameSink> = self.sink.clone();
        self.device.stream_setup(sink).map_err(rejected)?;
        let payload_size = self.device.payload_size().map_err(rejected)?;

        self.video_format = Some(video_format);
        self.payload_size = payload_size;
        self.state = SessionState::Configured;
        info!(device = %self.name, stream = %video_format, payload_size, "Stream set up");
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), AcquisitionError> {
        match self.state {
            SessionState::Streaming => return Ok(()),
            SessionState::Configured | SessionState::Stopped => {}
            state => {
                return Err(AcquisitionError::NotConfigured {
                    device: self.name.clone(),
                    state,
                })
            }
        }
        self.device
            .acquisition_start()
            .map_err(|source| AcquisitionError::Start {
                device: self.name.clone(),
                source,
            })?;
        self.state = SessionState::Streaming;
        debug!(device = %self.name, "Started acquisition");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), AcquisitionError> {
        if self.state != SessionState::Streaming {
            return Ok(());
        }
        self.device
            .acquisition_stop()
            .map_err(|source| AcquisitionError::Stop {
                device: self.name.clone(),
                source,
            })?;
        self.state = SessionState::Stopped;
        debug!(device = %self.name, "Stopped acquisition");
        Ok(())
    }

    pub fn snapshot_statistics(&self) -> StatisticsSnapshot {
        self.snapshot_statistics_at(Instant::now())
    }

    /// Reads the device counters and closes the current frame rate section.
    ///
    /// Not idempotent: the frame rate covers the frames since the previous call.
    pub fn snapshot_statistics_at(&self, now: Instant) -> StatisticsSnapshot {
        let stream = self.device.stream_statistics();
        let section = self.sink.fps.close_section_at(now);
        let resend_requested = if self.has_resend_counter {
            self.device.resend_requested_packets()
        } else {
            None
        };
        StatisticsSnapshot {
            stream,
            fps: section.fps,
            frames: section.count,
            mbps: calc_mbps(section.fps, self.payload_size),
            resend_requested,
            device_lost: self.is_device_lost(),
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(device = %self.name, "{err}");
        }
        if self.state != SessionState::Idle {
            if let Err(err) = self.device.stream_stop() {
                warn!(device = %self.name, "Failed to detach stream: {err}");
            }
        }
    }
}
