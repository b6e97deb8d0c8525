#[macro_use]
extern crate tracing;

mod app_config;
mod args;

use app_config::AppConfig;
pub use app_config::get_config_dir;
pub use args::Args;
use color_eyre::Result;
use eyre::bail;
use serde::Deserialize;
use std::{
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use stream_tester_device::sim::SimulatedDeviceSpec;

const DEFAULT_CONFIG: &str = include_str!("default-config.yaml");

const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_ONCE_DURATION: Duration = Duration::from_secs(20);
/// Frames per second a simulated device may be configured with; 0 means manual delivery.
const MAX_FRAME_RATE: f64 = 100_000.0;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    app_config: AppConfig,
    /// Seconds between reports, or the streaming time when `once` is set.
    #[serde(default)]
    pub report_interval_secs: Option<u64>,
    #[serde(default)]
    pub once: bool,
    #[serde(default)]
    pub prefer_largest: bool,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    #[serde(default = "default_progress")]
    pub progress: bool,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub device_states: Vec<PathBuf>,
    #[serde(default)]
    pub simulated_devices: Vec<SimulatedDeviceSpec>,
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_progress() -> bool {
    true
}

/// How long the stream test runs and how often it reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Report every `interval` until interrupted.
    Continuous { interval: Duration },
    /// Stream for `duration`, then stop and report once.
    Bounded { duration: Duration },
}

impl Default for Config {
    fn default() -> Self {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Yaml))
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .expect("Failed to parse default config")
    }
}

impl Config {
    pub fn new(args: Args) -> Result<Self, config::ConfigError> {
        let config_dir = get_config_dir();
        let mut builder = config::Config::builder()
            .set_default("config_dir", config_dir.to_string_lossy().to_string())?
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Yaml));

        let config_files = [("config.yaml", config::FileFormat::Yaml)];

        for (file, format) in &config_files {
            let source = config::File::from(config_dir.join(file))
                .format(*format)
                .required(false);
            builder = builder.add_source(source);
        }

        if let Some(path) = &args.config {
            debug!(?path, "Adding configuration file from args");
            builder = builder.add_source(config::File::from(path.as_path()).format(config::FileFormat::Yaml));
        }

        builder = builder.add_source(args);

        let cfg: Self = builder.build()?.try_deserialize()?;

        Ok(cfg)
    }

    pub fn config_dir(&self) -> &Path {
        &self.app_config.config_dir
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn run_mode(&self) -> RunMode {
        let configured = self.report_interval_secs.map(Duration::from_secs);
        if self.once {
            RunMode::Bounded {
                duration: configured.unwrap_or(DEFAULT_ONCE_DURATION),
            }
        } else {
            RunMode::Continuous {
                interval: configured.unwrap_or(DEFAULT_REPORT_INTERVAL),
            }
        }
    }

    /// Rejects settings the stream test cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.report_interval_secs == Some(0) {
            bail!("the report interval must be at least one second");
        }
        if self.tick_millis == 0 {
            bail!("tick_millis must be greater than zero");
        }
        for spec in &self.simulated_devices {
            if spec.width == 0 || spec.height == 0 {
                bail!("simulated device {} ({}) has an empty frame size", spec.model_name, spec.serial);
            }
            if !spec.frame_rate.is_finite() || !(0.0..=MAX_FRAME_RATE).contains(&spec.frame_rate) {
                bail!(
                    "simulated device {} ({}) has frame rate {}, expected 0 to {MAX_FRAME_RATE}",
                    spec.model_name,
                    spec.serial,
                    spec.frame_rate
                );
            }
            if spec.buffer_count == 0 {
                bail!("simulated device {} ({}) needs at least one buffer", spec.model_name, spec.serial);
            }
        }
        match self.run_mode() {
            RunMode::Continuous { interval } => {
                debug!(interval = %humantime::format_duration(interval), "Reporting continuously")
            }
            RunMode::Bounded { duration } => {
                debug!(duration = %humantime::format_duration(duration), "Streaming once")
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stream_tester_device::TransportType;

    #[test]
    fn default_config_parses() {
        let cfg = Config::default();
        assert!(!cfg.once);
        assert!(cfg.progress);
        assert_eq!(cfg.tick(), Duration::from_secs(1));
        assert!(cfg.devices.is_empty());
        assert!(cfg.simulated_devices.len() >= 2);
        assert!(cfg
            .simulated_devices
            .iter()
            .any(|spec| spec.transport == TransportType::GigEVision));
        cfg.validate().unwrap();
    }

    #[test]
    fn run_mode_defaults() {
        let mut cfg = Config::default();
        assert_eq!(
            cfg.run_mode(),
            RunMode::Continuous {
                interval: Duration::from_secs(5)
            }
        );
        cfg.once = true;
        assert_eq!(
            cfg.run_mode(),
            RunMode::Bounded {
                duration: Duration::from_secs(20)
            }
        );
        cfg.report_interval_secs = Some(3);
        assert_eq!(
            cfg.run_mode(),
            RunMode::Bounded {
                duration: Duration::from_secs(3)
            }
        );
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut cfg = Config::default();
        cfg.report_interval_secs = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unusable_simulated_frame_rates_are_rejected() {
        for frame_rate in [f64::NAN, f64::INFINITY, -1.0, 1e9] {
            let mut cfg = Config::default();
            cfg.simulated_devices[0].frame_rate = frame_rate;
            assert!(cfg.validate().is_err(), "frame rate {frame_rate} was accepted");
        }
        let mut cfg = Config::default();
        cfg.simulated_devices[0].frame_rate = 0.0;
        cfg.validate().unwrap();
    }

    #[test]
    fn args_override_config_file() {
        let dir = temp_dir::TempDir::new().unwrap();
        let path = dir.child("bench.yaml");
        std::fs::write(
            &path,
            "\
report_interval_secs: 10
prefer_largest: true
simulated_devices:
  - model_name: DMK 37BUX287
    serial: '7'
    width: 720
    height: 540
",
        )
        .unwrap();

        let args = Args {
            devices: vec!["7".to_string()],
            interval: Some(2),
            once: true,
            config: Some(path),
            no_progress: true,
            ..Default::default()
        };
        let cfg = Config::new(args).unwrap();

        assert_eq!(cfg.devices, vec!["7".to_string()]);
        assert_eq!(cfg.report_interval_secs, Some(2));
        assert!(cfg.once);
        assert!(cfg.prefer_largest);
        assert!(!cfg.progress);
        assert!(cfg
            .simulated_devices
            .iter()
            .any(|spec| spec.serial == "7" && spec.width == 720));
    }
}
