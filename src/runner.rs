use crate::{
    registry::SessionRegistry,
    report::Report,
};
use color_eyre::Result;
use eyre::{
    bail,
    WrapErr,
};
use std::{
    io::Write,
    time::Duration,
};
use stream_tester_config::RunMode;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum LoopState {
    #[display("not started")]
    NotStarted,
    #[display("running")]
    Running(RunMode),
    #[display("finished")]
    Finished,
}

/// Periodically snapshots every session and prints a report.
#[derive(Debug)]
pub struct ReportingLoop {
    mode: RunMode,
    tick: Duration,
    progress: bool,
    state: LoopState,
    started_at: Option<Instant>,
}

impl ReportingLoop {
    pub fn new(mode: RunMode, tick: Duration) -> Self {
        Self {
            mode,
            tick,
            progress: true,
            state: LoopState::NotStarted,
            started_at: None,
        }
    }

    /// Whether to print a dot per tick while waiting.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Captures the start time all offsets are relative to. Call right before
    /// starting the sessions.
    pub fn begin(&mut self) {
        self.started_at = Some(Instant::now());
        self.state = LoopState::Running(self.mode);
        debug!(mode = ?self.mode, "Reporting loop started");
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map(|started_at| started_at.elapsed())
            .unwrap_or_default()
    }

    /// Takes one snapshot round.
    pub fn report(&self, registry: &SessionRegistry) -> Report {
        Report::new(chrono::Local::now(), self.elapsed(), registry.snapshot_all())
    }

    /// Continuous mode reports every interval and never returns on its own.
    /// Bounded mode sleeps for the duration and returns; the caller then stops the
    /// sessions and calls [`ReportingLoop::finish`].
    pub async fn run<W: Write>(&mut self, registry: &SessionRegistry, out: &mut W) -> Result<()> {
        let LoopState::Running(mode) = self.state else {
            bail!("the reporting loop is {}, not running", self.state);
        };

        match mode {
            RunMode::Continuous { interval } => loop {
                self.sleep_interval(interval, out).await?;
                let report = self.report(registry);
                writeln!(out, "{report}").wrap_err("Failed to write report")?;
                out.flush().wrap_err("Failed to flush report")?;
            },
            RunMode::Bounded { duration } => self.sleep_interval(duration, out).await,
        }
    }

    /// Prints the last report and ends the loop.
    pub fn finish<W: Write>(&mut self, registry: &SessionRegistry, out: &mut W) -> Result<Report> {
        if self.state == LoopState::Finished {
            bail!("the reporting loop already finished");
        }
        let report = self.report(registry);
        writeln!(out, "{report}").wrap_err("Failed to write final report")?;
        out.flush().wrap_err("Failed to flush final report")?;
        self.state = LoopState::Finished;
        debug!(elapsed = %humantime::format_duration(self.elapsed()), "Reporting loop finished");
        Ok(report)
    }

    /// Sleeps for `total` in ticks, printing one dot per tick. Durations shorter
    /// than a tick are slept in one go.
    async fn sleep_interval<W: Write>(&self, total: Duration, out: &mut W) -> Result<()> {
        if total < self.tick {
            if self.progress {
                writeln!(out, "Waiting {}ms", total.as_millis())?;
            }
            tokio::time::sleep(total).await;
            return Ok(());
        }

        if self.progress {
            writeln!(
                out,
                "Waiting {}ms (ticks are {})",
                total.as_millis(),
                humantime::format_duration(self.tick)
            )?;
            out.flush()?;
        }
        let mut remaining = total;
        while !remaining.is_zero() {
            let step = remaining.min(self.tick);
            tokio::time::sleep(step).await;
            remaining -= step;
            if self.progress {
                write!(out, ".")?;
                out.flush()?;
            }
        }
        if self.progress {
            writeln!(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BuildOptions;
    use pretty_assertions::assert_eq;
    use stream_tester_device::{
        sim::{
            SimulatedBackend,
            SimulatedDeviceSpec,
        },
        DeviceBackend,
        DeviceSource,
    };

    fn registry() -> (SimulatedBackend, SessionRegistry) {
        let backend = SimulatedBackend::new([
            SimulatedDeviceSpec::new("CamA", "1", 1000, 2000),
            SimulatedDeviceSpec::new("CamB", "2", 64, 64),
        ]);
        let sources = backend
            .enumerate_devices()
            .unwrap()
            .into_iter()
            .map(DeviceSource::Discovered)
            .collect::<Vec<_>>();
        let outcome = SessionRegistry::build(&backend, &sources, &BuildOptions::default());
        (backend, outcome.registry)
    }

    fn bounded(secs: u64) -> RunMode {
        RunMode::Bounded {
            duration: Duration::from_secs(secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_requires_begin() {
        let (_backend, registry) = registry();
        let mut reporting = ReportingLoop::new(bounded(1), Duration::from_secs(1));
        assert!(reporting.run(&registry, &mut Vec::new()).await.is_err());
        assert_eq!(reporting.state(), LoopState::NotStarted);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_run_sleeps_in_ticks_then_finishes_once() {
        let (backend, mut registry) = registry();
        registry.start_all().unwrap();
        let mut reporting = ReportingLoop::new(bounded(3), Duration::from_secs(1));
        reporting.begin();
        assert_eq!(reporting.state(), LoopState::Running(bounded(3)));

        let mut out = Vec::new();
        let before = tokio::time::Instant::now();
        reporting.run(&registry, &mut out).await.unwrap();
        assert_eq!(before.elapsed(), Duration::from_secs(3));
        assert_eq!(String::from_utf8(out).unwrap(), "Waiting 3000ms (ticks are 1s)\n...\n");

        backend.handle("1").unwrap().deliver_frames(4);
        registry.stop_all().unwrap();
        let mut out = Vec::new();
        let report = reporting.finish(&registry, &mut out).unwrap();
        assert_eq!(reporting.state(), LoopState::Finished);
        assert_eq!(report.rows().len(), 2);
        assert_eq!(report.rows()[0].snapshot.frames, 4);
        let rendered = String::from_utf8(out).unwrap();
        assert_eq!(rendered.matches("Offset:").count(), 1);
        assert!(rendered.contains("Sum of Gbit per second"));

        assert!(reporting.finish(&registry, &mut Vec::new()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_run_reports_every_interval() {
        let (_backend, mut registry) = registry();
        registry.start_all().unwrap();
        let interval = Duration::from_secs(5);
        let mut reporting =
            ReportingLoop::new(RunMode::Continuous { interval }, Duration::from_secs(1)).with_progress(false);
        reporting.begin();

        let mut out = Vec::new();
        let run = reporting.run(&registry, &mut out);
        let timed_out = tokio::time::timeout(Duration::from_millis(16_500), run).await;
        assert!(timed_out.is_err());

        let rendered = String::from_utf8(out).unwrap();
        assert_eq!(rendered.matches("Offset:").count(), 3);
        assert!(!rendered.contains("Waiting"));
    }

    #[tokio::test(start_paused = true)]
    async fn short_intervals_are_slept_in_one_go() {
        let (_backend, registry) = registry();
        let mut reporting = ReportingLoop::new(
            RunMode::Bounded {
                duration: Duration::from_millis(500),
            },
            Duration::from_secs(1),
        );
        reporting.begin();

        let mut out = Vec::new();
        reporting.run(&registry, &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Waiting 500ms\n");
    }
}
