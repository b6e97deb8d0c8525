use clap::Parser;
use std::path::PathBuf;

/// Streams every selected camera at once and periodically reports delivery statistics.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version = version(), about, long_about = None)]
pub struct Args {
    /// Devices to stream: serial, unique name, model name or index in the device list.
    /// Streams every discovered device when none is given.
    #[clap(value_name = "DEVICE_ID")]
    pub devices: Vec<String>,

    /// Seconds between reports, or the total streaming time with `--once`.
    /// Defaults to 5 seconds, or 20 seconds with `--once`.
    #[clap(long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Stream for a single interval, stop all devices and print one final report.
    #[clap(long, action)]
    pub once: bool,

    /// Switch each device to a higher-bandwidth pixel format (Bayer8, else Mono8)
    /// and enable its frame rate control before streaming.
    #[clap(long, action)]
    pub largest: bool,

    /// Open a device from a saved device state file. May be given multiple times.
    #[clap(long = "device-state", value_name = "FILE")]
    pub device_states: Vec<PathBuf>,

    /// Additional configuration file (yaml) layered over the user configuration.
    #[clap(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Do not print a progress dot for every tick while waiting.
    #[clap(long = "no-progress", action)]
    pub no_progress: bool,

    /// Enables debug logging.
    #[clap(short, long, action)]
    pub verbose: bool,
}

mod config_ext {
    use super::*;
    use config::{
        Map,
        Source,
        Value,
    };
    use std::collections::HashMap;

    impl Source for Args {
        fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
            Box::new((*self).clone())
        }

        fn collect(&self) -> Result<Map<String, Value>, config::ConfigError> {
            let mut cache = HashMap::<String, Value>::new();
            if !self.devices.is_empty() {
                cache.insert("devices".to_string(), self.devices.clone().into());
            }
            if let Some(interval) = self.interval {
                cache.insert("report_interval_secs".to_string(), interval.into());
            }
            if self.once {
                cache.insert("once".to_string(), true.into());
            }
            if self.largest {
                cache.insert("prefer_largest".to_string(), true.into());
            }
            if !self.device_states.is_empty() {
                let paths = self
                    .device_states
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>();
                cache.insert("device_states".to_string(), paths.into());
            }
            if self.no_progress {
                cache.insert("progress".to_string(), false.into());
            }
            Ok(cache)
        }
    }
}

pub fn version() -> String {
    let author = clap::crate_authors!();
    let config_dir_path = crate::get_config_dir().display().to_string();

    format!(
        "{}

Authors: {author}

Config directory: {config_dir_path}",
        clap::crate_version!()
    )
}
