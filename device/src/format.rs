use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;
use strum::{
    Display,
    EnumIter,
    EnumString,
};

#[derive(Debug, Clone, Copy, Display, EnumIter, EnumString, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Mono8,
    Mono10p,
    Mono12p,
    Mono16,
    BayerBG8,
    BayerGB8,
    BayerGR8,
    BayerRG8,
    BayerRG16,
    BGR8,
    BGRa8,
    YUV422_8,
}

impl PixelFormat {
    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Mono8
            | PixelFormat::BayerBG8
            | PixelFormat::BayerGB8
            | PixelFormat::BayerGR8
            | PixelFormat::BayerRG8 => 8,
            PixelFormat::Mono10p => 10,
            PixelFormat::Mono12p => 12,
            PixelFormat::Mono16 | PixelFormat::BayerRG16 | PixelFormat::YUV422_8 => 16,
            PixelFormat::BGR8 => 24,
            PixelFormat::BGRa8 => 32,
        }
    }

    /// Bytes needed to hold one frame of `width` x `height` pixels.
    pub fn frame_size(&self, width: u32, height: u32) -> u64 {
        (u64::from(width) * u64::from(height) * u64::from(self.bits_per_pixel())).div_ceil(8)
    }
}

/// The video format a device streams with, read back after configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{}@{:.2}",
            self.pixel_format, self.width, self.height, self.frame_rate
        )
    }
}
