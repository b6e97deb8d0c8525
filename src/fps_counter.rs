use std::{
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
    time::Instant,
};

/// Frame rate of one measurement section.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SectionResult {
    pub fps: f32,
    pub count: u64,
}

/// Counts frames per section and derives the section's frame rate.
///
/// Frames are recorded from the device's delivery thread while sections are
/// closed from the polling thread, so both sides only touch atomics. A section
/// starts with its first frame and ends when [`FrameRateCounter::close_section`]
/// is called, which also starts the next one.
#[derive(Debug)]
pub struct FrameRateCounter {
    origin: Instant,
    /// Microseconds since `origin` at the first frame of the section. Only
    /// meaningful while `frame_count` is not 0.
    section_start_us: AtomicU64,
    /// Microseconds since `origin` at the last `close_section`. A section never
    /// starts before it.
    last_close_us: AtomicU64,
    frame_count: AtomicU64,
}

impl Default for FrameRateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRateCounter {
    pub fn new() -> Self {
        Self::with_origin(Instant::now())
    }

    /// A counter measuring time relative to `origin`. Instants before `origin`
    /// count as `origin`.
    pub fn with_origin(origin: Instant) -> Self {
        Self {
            origin,
            section_start_us: AtomicU64::new(0),
            last_close_us: AtomicU64::new(0),
            frame_count: AtomicU64::new(0),
        }
    }

    fn micros_since_origin(&self, now: Instant) -> u64 {
        u64::try_from(now.saturating_duration_since(self.origin).as_micros()).unwrap_or(u64::MAX)
    }

    pub fn record_frame(&self) {
        self.record_frame_at(Instant::now());
    }

    pub fn record_frame_at(&self, now: Instant) {
        // The frame that raises the count from 0 opens the section. A close racing
        // with the store below is covered by clamping to `last_close_us`.
        if self.frame_count.fetch_add(1, Ordering::AcqRel) == 0 {
            self.section_start_us
                .store(self.micros_since_origin(now), Ordering::Release);
        }
    }

    /// Frames recorded in the current section so far.
    pub fn count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    pub fn close_section(&self) -> SectionResult {
        self.close_section_at(Instant::now())
    }

    /// Ends the current section and returns its frame rate.
    ///
    /// This resets the counter: closing twice without frames in between yields
    /// `{ fps: 0, count: 0 }` the second time.
    pub fn close_section_at(&self, now: Instant) -> SectionResult {
        let now_us = self.micros_since_origin(now);
        let count = self.frame_count.swap(0, Ordering::AcqRel);
        let last_close_us = self.last_close_us.swap(now_us, Ordering::AcqRel);
        if count == 0 {
            return SectionResult::default();
        }
        let start_us = self
            .section_start_us
            .load(Ordering::Acquire)
            .max(last_close_us);
        let elapsed_us = now_us.saturating_sub(start_us);
        let fps = if elapsed_us > 0 {
            (count as f32 * 1_000_000.0) / elapsed_us as f32
        } else {
            0.0
        };
        SectionResult { fps, count }
    }
}
