use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument};

use crate::externals::carpus::{CommandError, ImuConnection, MuxChannel, SamplingError};
use crate::models::command::Command;

/// Length of the window during which gyroscope samples are accumulated.
pub const SAMPLING_WINDOW: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Sampling failed for channel {channel}. {source}")]
    Sampling {
        channel: MuxChannel,
        source: SamplingError,
    },
}

/// Zeroes each device's stored gyroscope offset, measures the mean gyroscope
/// output over the sampling window while the devices are held still, writes
/// the measured offset back, and saves it.
#[instrument(skip_all)]
pub async fn calibrate_gyroscope_offsets(
    connections: &mut [ImuConnection],
) -> Result<(), CalibrationError> {
    for connection in connections.iter_mut() {
        connection.send_command(&Command::factory()).await?;
        connection
            .send_command(&Command::gyroscope_offset([0.0; 3]))
            .await?;
        connection
            .send_command(&Command::gyroscope_offset_correction_enabled(false))
            .await?;
        connection.send_command(&Command::apply()).await?;

        connection.start_sampling();
    }

    info!("Sampling for {} seconds.", SAMPLING_WINDOW.as_secs());
    tokio::time::sleep(SAMPLING_WINDOW).await;

    for connection in connections.iter_mut() {
        let offset = connection
            .stop_sampling()
            .await
            .map_err(|source| CalibrationError::Sampling {
                channel: connection.channel(),
                source,
            })?;
        info!(
            "Channel {} gyroscope offset: [{:.4}, {:.4}, {:.4}] deg/s.",
            connection.channel(),
            offset[0],
            offset[1],
            offset[2]
        );

        connection
            .send_command(&Command::gyroscope_offset(offset))
            .await?;
        connection.send_command(&Command::save()).await?;
    }

    Ok(())
}
