//! A device layer made of simulated cameras.
//!
//! Each streaming device runs its own delivery thread producing frames at the
//! configured rate. Devices with a frame rate of 0 only produce frames through a
//! [`SimulatedDeviceHandle`], which makes them deterministic in tests.

mod device;
mod spec;

use crate::{
    find_device,
    Device,
    DeviceBackend,
    DeviceError,
    DeviceInfo,
    DeviceState,
    Result,
    StreamStatistics,
};
use device::{
    frame_period,
    SimShared,
};
pub use device::SimulatedDevice;
pub use spec::SimulatedDeviceSpec;
use std::{
    path::Path,
    sync::Arc,
};

#[derive(Clone, Default)]
pub struct SimulatedBackend {
    devices: Vec<Arc<SimShared>>,
}

impl SimulatedBackend {
    pub fn new(specs: impl IntoIterator<Item = SimulatedDeviceSpec>) -> Self {
        Self {
            devices: specs.into_iter().map(SimShared::new).collect(),
        }
    }

    fn infos(&self) -> Vec<DeviceInfo> {
        self.devices
            .iter()
            .filter(|dev| !dev.is_lost())
            .map(|dev| dev.info.clone())
            .collect()
    }

    fn shared_for(&self, unique_name: &str) -> Option<&Arc<SimShared>> {
        self.devices.iter().find(|dev| dev.info.unique_name == unique_name)
    }

    /// Test and scripting access to a device, looked up like [`find_device`].
    pub fn handle(&self, id: &str) -> Option<SimulatedDeviceHandle> {
        let infos = self.devices.iter().map(|dev| dev.info.clone()).collect::<Vec<_>>();
        let info = find_device(&infos, id)?;
        self.shared_for(&info.unique_name).map(|shared| SimulatedDeviceHandle {
            shared: Arc::clone(shared),
        })
    }
}

impl DeviceBackend for SimulatedBackend {
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.infos())
    }

    fn open(&self, info: &DeviceInfo) -> Result<Box<dyn Device>> {
        let shared = self
            .shared_for(&info.unique_name)
            .filter(|shared| !shared.is_lost())
            .ok_or_else(|| DeviceError::NotFound(info.unique_name.clone()))?;
        if shared.spec.fail_open {
            return Err(DeviceError::AccessDenied(info.unique_name.clone()));
        }
        shared.claim()?;
        debug!(device = %info.unique_name, "opened simulated device");
        Ok(Box::new(SimulatedDevice::new(Arc::clone(shared))))
    }

    fn open_from_state(&self, path: &Path) -> Result<Box<dyn Device>> {
        let state = DeviceState::load(path)?;
        let infos = self.infos();
        let info = find_device(&infos, &state.device).ok_or_else(|| DeviceError::NotFound(state.device.clone()))?;
        let mut device = self.open(info)?;

        if let Some(pixel_format) = state.pixel_format {
            if let Err(err) = device.set_pixel_format(pixel_format) {
                debug!(?path, "device state incomplete, keeping current pixel format: {err}");
            }
        }
        if let Some(frame_rate) = state.frame_rate {
            if frame_period(frame_rate).is_none() {
                debug!(?path, frame_rate, "unusable frame rate in device state, keeping current rate");
            } else if let Some(shared) = self.shared_for(&info.unique_name) {
                shared.set_frame_rate(frame_rate);
            }
        }
        Ok(device)
    }
}

/// Drives a simulated device from outside the device layer.
#[derive(Clone)]
pub struct SimulatedDeviceHandle {
    shared: Arc<SimShared>,
}

impl SimulatedDeviceHandle {
    pub fn info(&self) -> &DeviceInfo {
        &self.shared.info
    }

    /// Delivers up to `count` frames on the calling thread. Returns how many were
    /// produced; fewer when the device is not acquiring or gets lost.
    pub fn deliver_frames(&self, count: u64) -> u64 {
        let mut produced = 0;
        while produced < count && self.shared.deliver_frame() {
            produced += 1;
        }
        produced
    }

    /// Simulates unplugging the device.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    pub fn is_claimed(&self) -> bool {
        self.shared.is_claimed()
    }

    pub fn is_acquiring(&self) -> bool {
        self.shared.is_acquiring()
    }

    pub fn statistics(&self) -> StreamStatistics {
        self.shared.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        FrameBuffer,
        FrameSink,
        PixelFormat,
        TransportType,
    };
    use pretty_assertions::assert_eq;
    use std::sync::{
        atomic::{
            AtomicBool,
            AtomicU64,
            Ordering,
        },
        Mutex,
    };

    #[derive(Default)]
    struct CountingSink {
        frames: AtomicU64,
    }

    impl FrameSink for CountingSink {
        fn on_frame(&self, _buffer: FrameBuffer) {
            self.frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Keeps every buffer, so the pool runs dry.
    #[derive(Default)]
    struct HoardingSink {
        held: Mutex<Vec<FrameBuffer>>,
    }

    impl FrameSink for HoardingSink {
        fn on_frame(&self, buffer: FrameBuffer) {
            self.held.lock().unwrap().push(buffer);
        }
    }

    fn backend() -> SimulatedBackend {
        let mut gige = SimulatedDeviceSpec::new("DFK 33GX264", "41910001", 64, 48);
        gige.transport = TransportType::GigEVision;
        gige.pixel_formats = vec![PixelFormat::BGRa8, PixelFormat::BayerRG8, PixelFormat::Mono8];
        gige.transmission_error_every = Some(4);
        let usb = SimulatedDeviceSpec::new("DMK 38UX267", "50710002", 32, 32);
        SimulatedBackend::new([gige, usb])
    }

    fn open_streaming(backend: &SimulatedBackend, id: &str, sink: Arc<dyn FrameSink>) -> Box<dyn Device> {
        let infos = backend.enumerate_devices().unwrap();
        let info = find_device(&infos, id).unwrap();
        let mut device = backend.open(info).unwrap();
        device.stream_setup(sink).unwrap();
        device.acquisition_start().unwrap();
        device
    }

    #[test]
    fn devices_are_claimed_exclusively() {
        let backend = backend();
        let infos = backend.enumerate_devices().unwrap();
        let device = backend.open(&infos[0]).unwrap();
        assert!(matches!(backend.open(&infos[0]), Err(DeviceError::Busy(_))));
        assert!(backend.handle("41910001").unwrap().is_claimed());

        drop(device);
        assert!(!backend.handle("41910001").unwrap().is_claimed());
        assert!(backend.open(&infos[0]).is_ok());
    }

    #[test]
    fn dropping_a_streaming_device_stops_and_releases_it() {
        let backend = backend();
        let device = open_streaming(&backend, "50710002", Arc::new(CountingSink::default()));
        let handle = backend.handle("50710002").unwrap();
        assert!(handle.is_acquiring());

        drop(device);
        assert!(!handle.is_acquiring());
        assert!(!handle.is_claimed());
    }

    #[test]
    fn transmission_errors_count_resends_on_gige() {
        let backend = backend();
        let sink = Arc::new(CountingSink::default());
        let device = open_streaming(&backend, "41910001", sink.clone());

        assert_eq!(backend.handle("41910001").unwrap().deliver_frames(8), 8);
        assert_eq!(
            device.stream_statistics(),
            StreamStatistics {
                device_delivered: 6,
                device_transmission_error: 2,
                sink_delivered: 6,
                ..Default::default()
            }
        );
        assert_eq!(sink.frames.load(Ordering::Relaxed), 6);
        assert_eq!(device.resend_requested_packets(), Some(6));
    }

    #[test]
    fn usb_devices_have_no_resend_counter() {
        let backend = backend();
        let device = open_streaming(&backend, "50710002", Arc::new(CountingSink::default()));
        assert_eq!(device.resend_requested_packets(), None);
    }

    #[test]
    fn held_buffers_cause_sink_underruns() {
        let backend = backend();
        let device = open_streaming(&backend, "50710002", Arc::new(HoardingSink::default()));
        backend.handle("50710002").unwrap().deliver_frames(6);

        let stats = device.stream_statistics();
        assert_eq!(stats.sink_delivered, 4);
        assert_eq!(stats.sink_underrun, 2);
    }

    #[test]
    fn frames_are_only_produced_while_acquiring() {
        let backend = backend();
        let handle = backend.handle("50710002").unwrap();
        let mut device = open_streaming(&backend, "50710002", Arc::new(CountingSink::default()));
        device.acquisition_stop().unwrap();
        assert_eq!(handle.deliver_frames(3), 0);
        device.acquisition_start().unwrap();
        assert_eq!(handle.deliver_frames(3), 3);
    }

    #[test]
    fn disconnect_notifies_listeners_once() {
        let backend = backend();
        let infos = backend.enumerate_devices().unwrap();
        let mut device = backend.open(&infos[1]).unwrap();
        let notified = Arc::new(AtomicU64::new(0));
        device.on_device_lost(Box::new({
            let notified = notified.clone();
            move || {
                notified.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let handle = backend.handle("50710002").unwrap();
        handle.disconnect();
        handle.disconnect();

        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert!(matches!(device.acquisition_start(), Err(DeviceError::Lost(_))));
        assert_eq!(backend.enumerate_devices().unwrap().len(), 1);
    }

    #[test]
    fn lose_after_frames_disconnects() {
        let mut spec = SimulatedDeviceSpec::new("DMK 37BUX287", "1", 8, 8);
        spec.lose_after_frames = Some(3);
        let backend = SimulatedBackend::new([spec]);
        let lost = Arc::new(AtomicBool::new(false));
        let mut device = open_streaming(&backend, "1", Arc::new(CountingSink::default()));
        device.on_device_lost(Box::new({
            let lost = lost.clone();
            move || lost.store(true, Ordering::SeqCst)
        }));

        assert_eq!(backend.handle("1").unwrap().deliver_frames(10), 2);
        assert!(lost.load(Ordering::SeqCst));
        assert_eq!(device.stream_statistics().device_delivered, 3);
    }

    #[test]
    fn delivery_thread_streams_at_frame_rate() {
        let mut spec = SimulatedDeviceSpec::new("DMK 37BUX287", "1", 8, 8);
        spec.frame_rate = 200.0;
        let backend = SimulatedBackend::new([spec]);
        let sink = Arc::new(CountingSink::default());
        let mut device = open_streaming(&backend, "1", sink.clone());

        std::thread::sleep(std::time::Duration::from_millis(200));
        device.acquisition_stop().unwrap();
        let frames = sink.frames.load(Ordering::Relaxed);
        assert!(frames > 0, "no frames delivered");

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(sink.frames.load(Ordering::Relaxed), frames);
    }

    #[test]
    fn open_from_state_restores_pixel_format() {
        let backend = backend();
        let dir = temp_dir::TempDir::new().unwrap();
        let path = dir.child("state.yaml");
        std::fs::write(&path, "device: '41910001'\npixel_format: BayerRG8\n").unwrap();

        let device = backend.open_from_state(&path).unwrap();
        assert_eq!(device.video_format().unwrap().pixel_format, PixelFormat::BayerRG8);
    }

    #[test]
    fn open_from_state_ignores_unusable_frame_rates() {
        let backend = backend();
        let dir = temp_dir::TempDir::new().unwrap();
        let path = dir.child("state.yaml");
        std::fs::write(&path, "device: DMK 38UX267\nframe_rate: .inf\n").unwrap();

        let device = backend.open_from_state(&path).unwrap();
        assert_eq!(device.video_format().unwrap().frame_rate, 0.0);
    }

    #[test]
    fn open_from_state_tolerates_unsupported_properties() {
        let backend = backend();
        let dir = temp_dir::TempDir::new().unwrap();
        let path = dir.child("state.yaml");
        std::fs::write(&path, "device: DMK 38UX267\npixel_format: BGR8\n").unwrap();

        let device = backend.open_from_state(&path).unwrap();
        assert_eq!(device.video_format().unwrap().pixel_format, PixelFormat::Mono8);
    }
}
