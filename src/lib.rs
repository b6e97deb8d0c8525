//! # Camera stream tester
//!
//! Opens many video-capture devices at once, streams all of them and prints
//! per-device delivery statistics at a fixed interval:
//!
//! 1. Select devices by id (or take every discovered one) and open them
//! 2. Optionally switch each to a higher-bandwidth pixel format
//! 3. Set up the streams and start acquisition on all of them
//! 4. Report counters, frame rate and bandwidth per device until interrupted,
//!    or once after a fixed duration

#[macro_use]
extern crate tracing;

mod app;
mod errors;
pub mod fps_counter;
mod logging;
pub mod registry;
pub mod report;
pub mod runner;
pub mod session;

pub use app::App;
pub use errors::init_errors;
pub use logging::init_logging;
pub use stream_tester_config::Args;
