pub mod calibration;
pub mod settings;
pub mod stamping;

/// Substring that identifies the hub in a port scan.
pub const HUB_DEVICE_NAME: &str = "Carpus";
