use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::externals::carpus::{CommandError, HubConnection};
use crate::models::command::Command;

pub const HARDWARE_VERSION: &str = "v1.0.1";

/// Serial number reported by a device that has never been provisioned.
pub const UNPROVISIONED_SERIAL_NUMBER: &str = "Unknown";

#[derive(Error, Debug)]
pub enum StampingError {
    #[error("Serial number already set to \"{0}\". Refusing to re-provision.")]
    AlreadyProvisioned(String),

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Stamps a timestamp-derived serial number and the hardware version onto a
/// factory-fresh device. Refuses to touch a device that already has a serial
/// number.
#[instrument(skip_all)]
pub async fn stamp_serial_number_and_hardware_version(
    hub: &HubConnection,
) -> Result<(), StampingError> {
    let response = hub.send_command(&Command::read("serial_number")).await?;
    require_unprovisioned(response.value_as_str().unwrap_or_default())?;

    let serial_number = derive_serial_number(Utc::now().timestamp());
    info!("Stamping serial number {}.", serial_number);

    let commands = [
        Command::factory(),
        Command::serial_number(&serial_number),
        Command::hardware_version(HARDWARE_VERSION),
        Command::save(),
    ];

    for command in &commands {
        match hub.send_command(command).await {
            Ok(response) => info!("{} : {}", response.key(), response.value()),
            // device errors are reported but do not stop the sequence
            Err(CommandError::Device { error, .. }) => error!("{}", error),
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

fn require_unprovisioned(serial_number: &str) -> Result<(), StampingError> {
    if serial_number != UNPROVISIONED_SERIAL_NUMBER {
        return Err(StampingError::AlreadyProvisioned(serial_number.to_string()));
    }
    Ok(())
}

fn derive_serial_number(unix_time: i64) -> String {
    format!("{:08X}", unix_time)
}
