use serde::{
    Deserialize,
    Serialize,
};
use strum::{
    Display,
    EnumIter,
    EnumString,
};

/// The transport layer a device is attached through.
#[derive(
    Debug, Default, Clone, Copy, Display, EnumIter, EnumString, Serialize, Deserialize, PartialEq, Eq, Hash,
)]
pub enum TransportType {
    #[default]
    #[strum(to_string = "usb3-vision")]
    #[serde(rename = "usb3-vision")]
    Usb3Vision,
    #[strum(to_string = "gige-vision")]
    #[serde(rename = "gige-vision")]
    GigEVision,
    #[strum(to_string = "usb2")]
    #[serde(rename = "usb2")]
    Usb2,
    #[strum(to_string = "virtual")]
    #[serde(rename = "virtual")]
    Virtual,
}

impl TransportType {
    /// Packet based transports expose a resend-request counter.
    pub fn is_packet_based(&self) -> bool {
        matches!(self, TransportType::GigEVision)
    }
}

/// Identity of a discovered device, as returned by [`crate::DeviceBackend::enumerate_devices`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model_name: String,
    pub serial: String,
    pub unique_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub transport: TransportType,
}

impl DeviceInfo {
    /// `"{model} ({serial})"`, with `"[{user_id}]"` appended when a user label is set.
    pub fn display_name(&self) -> String {
        let mut name = format!("{} ({})", self.model_name, self.serial);
        if let Some(user_id) = self.user_id.as_deref().filter(|uid| !uid.is_empty()) {
            name.push_str(&format!("[{user_id}]"));
        }
        name
    }
}
