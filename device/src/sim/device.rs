use super::SimulatedDeviceSpec;
use crate::{
    BufferPool,
    Device,
    DeviceError,
    DeviceInfo,
    DeviceLostListener,
    FrameSink,
    PixelFormat,
    Result,
    StreamCounters,
    StreamStatistics,
    VideoFormat,
};
use std::{
    sync::{
        atomic::{
            AtomicBool,
            AtomicU64,
            Ordering,
        },
        Arc,
        Mutex,
    },
    thread::{
        self,
        JoinHandle,
    },
    time::{
        Duration,
        Instant,
    },
};

#[derive(Clone)]
struct AttachedStream {
    sink: Arc<dyn FrameSink>,
    pool: Arc<BufferPool>,
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    pixel_format: PixelFormat,
    frame_rate: f64,
    frame_rate_enabled: bool,
}

/// State of one simulated camera, shared by the backend, the opened device, its
/// delivery thread and any test handles.
pub(crate) struct SimShared {
    pub(crate) spec: SimulatedDeviceSpec,
    pub(crate) info: DeviceInfo,
    claimed: AtomicBool,
    lost: AtomicBool,
    acquiring: AtomicBool,
    lost_listeners: Mutex<Vec<DeviceLostListener>>,
    stream: Mutex<Option<AttachedStream>>,
    settings: Mutex<Settings>,
    counters: StreamCounters,
    resend_requested: AtomicU64,
    frame_index: AtomicU64,
}

impl SimShared {
    pub(crate) fn new(spec: SimulatedDeviceSpec) -> Arc<Self> {
        let settings = Settings {
            pixel_format: spec.initial_pixel_format(),
            frame_rate: spec.frame_rate,
            frame_rate_enabled: false,
        };
        Arc::new(Self {
            info: spec.device_info(),
            spec,
            claimed: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            acquiring: AtomicBool::new(false),
            lost_listeners: Mutex::new(Vec::new()),
            stream: Mutex::new(None),
            settings: Mutex::new(settings),
            counters: StreamCounters::default(),
            resend_requested: AtomicU64::new(0),
            frame_index: AtomicU64::new(0),
        })
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    pub(crate) fn is_acquiring(&self) -> bool {
        self.acquiring.load(Ordering::Acquire)
    }

    /// Claims the device for one opener. Fails if someone else holds it.
    pub(crate) fn claim(&self) -> Result<()> {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DeviceError::Busy(self.info.unique_name.clone()));
        }
        Ok(())
    }

    fn settings(&self) -> Settings {
        self.settings.lock().map(|settings| *settings).unwrap_or(Settings {
            pixel_format: self.spec.initial_pixel_format(),
            frame_rate: self.spec.frame_rate,
            frame_rate_enabled: false,
        })
    }

    fn update_settings(&self, f: impl FnOnce(&mut Settings)) {
        if let Ok(mut settings) = self.settings.lock() {
            f(&mut settings);
        }
    }

    pub(crate) fn set_frame_rate(&self, frame_rate: f64) {
        self.update_settings(|settings| settings.frame_rate = frame_rate);
    }

    pub(crate) fn statistics(&self) -> StreamStatistics {
        self.counters.snapshot()
    }

    /// Marks the device as gone and notifies every listener once.
    pub(crate) fn disconnect(&self) {
        if self.lost.swap(true, Ordering::AcqRel) {
            return;
        }
        self.acquiring.store(false, Ordering::Release);
        info!(device = %self.info.unique_name, "simulated device disconnected");
        if let Ok(listeners) = self.lost_listeners.lock() {
            for listener in listeners.iter() {
                listener();
            }
        }
    }

    /// Produces one frame. Returns `false` once the device stopped producing.
    pub(crate) fn deliver_frame(&self) -> bool {
        if self.is_lost() || !self.is_acquiring() {
            return false;
        }

        let index = self.frame_index.fetch_add(1, Ordering::Relaxed) + 1;

        let transmission_error = self
            .spec
            .transmission_error_every
            .is_some_and(|every| every > 0 && index % every == 0);

        if transmission_error {
            StreamCounters::bump(&self.counters.device_transmission_error);
            if self.info.transport.is_packet_based() {
                self.resend_requested
                    .fetch_add(self.spec.resends_per_error, Ordering::Relaxed);
            }
        } else {
            StreamCounters::bump(&self.counters.device_delivered);
            let attached = self.stream.lock().ok().and_then(|stream| stream.clone());
            match attached {
                Some(AttachedStream { sink, pool }) => match pool.acquire() {
                    Some(buffer) => {
                        StreamCounters::bump(&self.counters.sink_delivered);
                        sink.on_frame(buffer);
                    }
                    None => StreamCounters::bump(&self.counters.sink_underrun),
                },
                None => StreamCounters::bump(&self.counters.sink_ignored),
            }
        }

        if self.spec.lose_after_frames.is_some_and(|limit| index >= limit) {
            self.disconnect();
            return false;
        }
        true
    }
}

/// Time between two frames, if `frame_rate` gives a usable non-zero period.
pub(crate) fn frame_period(frame_rate: f64) -> Option<Duration> {
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(frame_rate.recip())
        .ok()
        .filter(|period| !period.is_zero())
}

/// An opened simulated camera.
pub struct SimulatedDevice {
    shared: Arc<SimShared>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedDevice {
    pub(crate) fn new(shared: Arc<SimShared>) -> Self {
        Self { shared, worker: None }
    }

    fn ensure_present(&self) -> Result<()> {
        if self.shared.is_lost() {
            return Err(DeviceError::Lost(self.shared.info.unique_name.clone()));
        }
        Ok(())
    }

    fn invalid_state(&self, operation: &'static str, state: &'static str) -> DeviceError {
        DeviceError::InvalidState {
            device: self.shared.info.unique_name.clone(),
            operation,
            state,
        }
    }

    fn spawn_worker(&mut self) {
        let frame_rate = self.shared.settings().frame_rate;
        if frame_rate == 0.0 {
            return;
        }
        let Some(period) = frame_period(frame_rate) else {
            warn!(device = %self.shared.info.unique_name, frame_rate, "unusable frame rate, not starting delivery thread");
            return;
        };
        let shared = Arc::clone(&self.shared);
        let name = format!("sim-{}", shared.info.serial);

        let worker = thread::Builder::new().name(name).spawn(move || {
            let mut next = Instant::now() + period;
            while shared.is_acquiring() {
                let now = Instant::now();
                if next > now {
                    thread::park_timeout(next - now);
                    continue;
                }
                if !shared.deliver_frame() {
                    break;
                }
                next += period;
            }
            trace!(device = %shared.info.unique_name, "delivery thread finished");
        });

        match worker {
            Ok(worker) => self.worker = Some(worker),
            Err(err) => error!(device = %self.shared.info.unique_name, "failed to spawn delivery thread: {err}"),
        }
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            if worker.join().is_err() {
                warn!(device = %self.shared.info.unique_name, "delivery thread panicked");
            }
        }
    }
}

impl Device for SimulatedDevice {
    fn info(&self) -> &DeviceInfo {
        &self.shared.info
    }

    fn pixel_formats(&self) -> Vec<PixelFormat> {
        self.shared.spec.pixel_formats.clone()
    }

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        self.ensure_present()?;
        if self.shared.is_acquiring() {
            return Err(self.invalid_state("change the pixel format", "acquiring"));
        }
        let spec = &self.shared.spec;
        if !spec.pixel_formats.contains(&format) || spec.locked_pixel_formats.contains(&format) {
            return Err(DeviceError::UnsupportedPixelFormat {
                device: self.shared.info.unique_name.clone(),
                format,
            });
        }
        self.shared.update_settings(|settings| settings.pixel_format = format);
        Ok(())
    }

    fn enable_frame_rate_control(&mut self) -> Result<bool> {
        self.ensure_present()?;
        if !self.shared.spec.frame_rate_enable {
            return Ok(false);
        }
        self.shared
            .update_settings(|settings| settings.frame_rate_enabled = true);
        Ok(true)
    }

    fn video_format(&self) -> Result<VideoFormat> {
        self.ensure_present()?;
        let settings = self.shared.settings();
        Ok(VideoFormat {
            pixel_format: settings.pixel_format,
            width: self.shared.spec.width,
            height: self.shared.spec.height,
            frame_rate: settings.frame_rate,
        })
    }

    fn payload_size(&self) -> Result<u64> {
        let format = self.video_format()?;
        Ok(format.pixel_format.frame_size(format.width, format.height))
    }

    fn on_device_lost(&mut self, listener: DeviceLostListener) {
        if let Ok(mut listeners) = self.shared.lost_listeners.lock() {
            listeners.push(listener);
        }
    }

    fn stream_setup(&mut self, sink: Arc<dyn FrameSink>) -> Result<()> {
        self.ensure_present()?;
        if self.shared.spec.fail_stream_setup {
            return Err(DeviceError::StreamSetupRejected {
                device: self.shared.info.unique_name.clone(),
                reason: "buffer negotiation failed".to_string(),
            });
        }
        let payload_size = usize::try_from(self.payload_size()?).map_err(|_| DeviceError::StreamSetupRejected {
            device: self.shared.info.unique_name.clone(),
            reason: "payload does not fit into memory".to_string(),
        })?;

        let mut stream = self
            .shared
            .stream
            .lock()
            .map_err(|_| self.invalid_state("set up a stream", "poisoned"))?;
        if stream.is_some() {
            return Err(self.invalid_state("set up a stream", "a stream is already set up"));
        }
        *stream = Some(AttachedStream {
            sink,
            pool: BufferPool::new(self.shared.spec.buffer_count, payload_size),
        });
        Ok(())
    }

    fn stream_stop(&mut self) -> Result<()> {
        self.acquisition_stop()?;
        if let Ok(mut stream) = self.shared.stream.lock() {
            stream.take();
        }
        Ok(())
    }

    fn acquisition_start(&mut self) -> Result<()> {
        self.ensure_present()?;
        let has_stream = self.shared.stream.lock().map(|s| s.is_some()).unwrap_or(false);
        if !has_stream {
            return Err(self.invalid_state("start acquisition", "no stream is set up"));
        }
        if self.shared.spec.fail_start {
            return Err(DeviceError::AcquisitionFailed(self.shared.info.unique_name.clone()));
        }
        if self.shared.acquiring.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.spawn_worker();
        Ok(())
    }

    fn acquisition_stop(&mut self) -> Result<()> {
        self.shared.acquiring.store(false, Ordering::Release);
        self.join_worker();
        Ok(())
    }

    fn stream_statistics(&self) -> StreamStatistics {
        self.shared.statistics()
    }

    fn resend_requested_packets(&self) -> Option<u64> {
        self.shared
            .info
            .transport
            .is_packet_based()
            .then(|| self.shared.resend_requested.load(Ordering::Relaxed))
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        if let Err(err) = self.stream_stop() {
            warn!(device = %self.shared.info.unique_name, "failed to stop stream on close: {err}");
        }
        if let Ok(mut listeners) = self.shared.lost_listeners.lock() {
            listeners.clear();
        }
        self.shared.claimed.store(false, Ordering::Release);
    }
}
