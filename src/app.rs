use crate::{
    registry::{
        BuildOptions,
        BuildOutcome,
        SessionRegistry,
    },
    report::{
        device_list,
        started_streams,
        starting_streams,
        Report,
        LEGEND,
        STOPPED_STREAMS,
    },
    runner::ReportingLoop,
};
use color_eyre::Result;
use eyre::WrapErr;
use std::{
    collections::HashSet,
    io::Write,
    sync::Arc,
};
use stream_tester_config::{
    Args,
    Config,
    RunMode,
};
use stream_tester_device::{
    find_device,
    sim::SimulatedBackend,
    DeviceBackend,
    DeviceSource,
};

pub struct App {
    config: Config,
    backend: Arc<dyn DeviceBackend>,
}

impl App {
    pub fn new(args: Args) -> Result<Self> {
        let config = Config::new(args).wrap_err("Failed to load configuration")?;
        config.validate()?;
        debug!(config_dir = ?config.config_dir(), devices = config.simulated_devices.len(), "Loaded configuration");
        let backend = SimulatedBackend::new(config.simulated_devices.clone());
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: Config, backend: impl DeviceBackend + 'static) -> Self {
        Self {
            config,
            backend: Arc::new(backend),
        }
    }

    /// Devices selected by id, all discovered devices when no id or state file
    /// is given, followed by the device state files.
    pub fn resolve_sources(&self) -> Result<Vec<DeviceSource>> {
        let discovered = self
            .backend
            .enumerate_devices()
            .wrap_err("Failed to enumerate devices")?;
        debug!(count = discovered.len(), "Discovered devices");

        let mut sources = if self.config.devices.is_empty() && self.config.device_states.is_empty() {
            discovered.into_iter().map(DeviceSource::Discovered).collect::<Vec<_>>()
        } else {
            self.config
                .devices
                .iter()
                .filter_map(|id| match find_device(&discovered, id) {
                    Some(info) => Some(DeviceSource::Discovered(info.clone())),
                    None => {
                        warn!(id, "No device matches, skipping");
                        None
                    }
                })
                .collect()
        };
        let mut seen = HashSet::new();
        sources.retain(|source| match source {
            DeviceSource::Discovered(info) => {
                let first = seen.insert(info.unique_name.clone());
                if !first {
                    debug!(device = %info.unique_name, "Device selected more than once");
                }
                first
            }
            DeviceSource::StateFile(_) => true,
        });
        sources.extend(self.config.device_states.iter().cloned().map(DeviceSource::StateFile));
        Ok(sources)
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut stdout = std::io::stdout();
        self.run_with_output(&mut stdout).await.map(|_| ())
    }

    /// Runs the whole stream test and returns the final report.
    pub async fn run_with_output<W: Write>(&mut self, out: &mut W) -> Result<Report> {
        let sources = self.resolve_sources()?;
        let options = BuildOptions {
            prefer_largest: self.config.prefer_largest,
        };
        let BuildOutcome {
            mut registry,
            failures,
        } = SessionRegistry::build(self.backend.as_ref(), &sources, &options);
        if !failures.is_empty() {
            info!(failed = failures.len(), "Some devices were left out");
        }
        if registry.is_empty() {
            warn!("No device could be set up for streaming");
        }

        writeln!(out, "{LEGEND}\n")?;
        writeln!(out, "{}", starting_streams(registry.len()))?;

        let mut reporting = ReportingLoop::new(self.config.run_mode(), self.config.tick()).with_progress(self.config.progress);
        reporting.begin();
        if let Err(err) = registry.start_all() {
            error!("{err}");
        }
        writeln!(out, "{}", started_streams(reporting.mode()))?;

        let interrupted = match reporting.mode() {
            RunMode::Continuous { .. } => {
                tokio::select! {
                    result = reporting.run(&registry, out) => {
                        result?;
                        false
                    }
                    result = tokio::signal::ctrl_c() => {
                        result.wrap_err("Failed to listen for Ctrl-C")?;
                        true
                    }
                }
            }
            RunMode::Bounded { .. } => {
                reporting.run(&registry, out).await?;
                false
            }
        };
        if interrupted {
            writeln!(out)?;
            info!("Interrupted, stopping streams");
        }

        if let Err(err) = registry.stop_all() {
            error!("{err}");
        }
        writeln!(out, "{STOPPED_STREAMS}")?;
        writeln!(out, "{}", device_list(&registry))?;
        reporting.finish(&registry, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stream_tester_device::sim::SimulatedDeviceSpec;

    fn config(devices: &[&str]) -> Config {
        let mut config = Config::default();
        config.devices = devices.iter().map(|id| id.to_string()).collect();
        config.once = true;
        config.report_interval_secs = Some(2);
        config.progress = false;
        config
    }

    fn backend() -> SimulatedBackend {
        let mut broken = SimulatedDeviceSpec::new("DMK 33UX250", "2", 64, 64);
        broken.fail_open = true;
        SimulatedBackend::new([
            SimulatedDeviceSpec::new("DFK 33GX264", "1", 64, 64),
            broken,
            SimulatedDeviceSpec::new("DMK 37BUX287", "3", 32, 32),
        ])
    }

    fn unique_names(sources: &[DeviceSource]) -> Vec<String> {
        sources.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn no_ids_selects_every_device() {
        let app = App::with_backend(config(&[]), backend());
        assert_eq!(
            unique_names(&app.resolve_sources().unwrap()),
            vec!["DFK 33GX264_1", "DMK 33UX250_2", "DMK 37BUX287_3"]
        );
    }

    #[test]
    fn ids_select_in_given_order_and_unknown_ids_are_skipped() {
        let mut config = config(&["3", "nope", "DFK 33GX264", "1"]);
        config.device_states = vec!["bench.yaml".into()];
        let app = App::with_backend(config, backend());
        assert_eq!(
            unique_names(&app.resolve_sources().unwrap()),
            vec!["DMK 37BUX287_3", "DFK 33GX264_1", "bench.yaml"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_run_prints_legend_devices_and_one_report() {
        let mut app = App::with_backend(config(&[]), backend());
        let mut out = Vec::new();
        let report = app.run_with_output(&mut out).await.unwrap();

        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.starts_with(LEGEND));
        assert!(rendered.contains("Starting streams for 2 cameras.\nStarted all camera streams. Streaming for 2 seconds.\n"));
        assert!(rendered.contains("Stopped all camera streams.\nDevices:\n  DFK 33GX264 (1): Mono8 64x64@0.00\n  DMK 37BUX287 (3): Mono8 32x32@0.00"));
        assert_eq!(rendered.matches("Offset:").count(), 1);
        assert_eq!(report.offset().as_secs(), 2);
        let devices = report.rows().iter().map(|row| row.device.as_str()).collect::<Vec<_>>();
        assert_eq!(devices, vec!["DFK 33GX264 (1)", "DMK 37BUX287 (3)"]);
    }
}
