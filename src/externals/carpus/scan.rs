use std::fmt::Display;

use serialport::{SerialPortInfo, SerialPortType};
use thiserror::Error;
use tracing::{debug, instrument, trace};

/// A discovered serial endpoint, identified by its USB product name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub device_name: String,
    pub port_name: String,
}

impl Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.device_name, self.port_name)
    }
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Unable to find {0}.")]
    DeviceNotFound(String),

    #[error("Unable to list serial ports. {0}")]
    Port(#[from] serialport::Error),
}

/// Lists every USB serial endpoint that advertises a product name.
#[instrument(skip_all)]
pub fn scan() -> Result<Vec<DeviceDescriptor>, ScanError> {
    let ports = serialport::available_ports()?;
    trace!("Found {} ports to check.", ports.len());
    Ok(ports.into_iter().filter_map(descriptor_for_port).collect())
}

fn descriptor_for_port(port: SerialPortInfo) -> Option<DeviceDescriptor> {
    match port.port_type {
        SerialPortType::UsbPort(usb_info) => match usb_info.product {
            Some(product) => Some(DeviceDescriptor {
                device_name: product,
                port_name: port.port_name,
            }),
            None => {
                debug!("Port {} has no product name.", port.port_name);
                None
            }
        },
        _ => {
            trace!("Port {} is not a USB port.", port.port_name);
            None
        }
    }
}

/// Finds the first device whose name contains `name_fragment`.
#[instrument(skip_all)]
pub fn find_device(name_fragment: &str) -> Result<DeviceDescriptor, ScanError> {
    scan()?
        .into_iter()
        .find(|descriptor| descriptor.device_name.contains(name_fragment))
        .ok_or_else(|| ScanError::DeviceNotFound(name_fragment.to_string()))
}
