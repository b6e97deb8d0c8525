use serde::{
    Deserialize,
    Serialize,
};
use std::sync::atomic::{
    AtomicU64,
    Ordering,
};

/// Cumulative delivery counters of one stream, as reported by the device layer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatistics {
    pub device_delivered: u64,
    pub device_transmission_error: u64,
    pub device_transform_underrun: u64,
    pub device_underrun: u64,
    pub sink_delivered: u64,
    pub sink_underrun: u64,
    pub sink_ignored: u64,
}

/// Atomically updated counterpart of [`StreamStatistics`] for device layers that
/// count on their delivery thread and are read from elsewhere.
#[derive(Debug, Default)]
pub struct StreamCounters {
    pub device_delivered: AtomicU64,
    pub device_transmission_error: AtomicU64,
    pub device_transform_underrun: AtomicU64,
    pub device_underrun: AtomicU64,
    pub sink_delivered: AtomicU64,
    pub sink_underrun: AtomicU64,
    pub sink_ignored: AtomicU64,
}

impl StreamCounters {
    pub fn snapshot(&self) -> StreamStatistics {
        StreamStatistics {
            device_delivered: self.device_delivered.load(Ordering::Relaxed),
            device_transmission_error: self.device_transmission_error.load(Ordering::Relaxed),
            device_transform_underrun: self.device_transform_underrun.load(Ordering::Relaxed),
            device_underrun: self.device_underrun.load(Ordering::Relaxed),
            sink_delivered: self.sink_delivered.load(Ordering::Relaxed),
            sink_underrun: self.sink_underrun.load(Ordering::Relaxed),
            sink_ignored: self.sink_ignored.load(Ordering::Relaxed),
        }
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
