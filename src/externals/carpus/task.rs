use std::time::Duration;

use anyhow::Result;
use serialport::SerialPort;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::models::{command::Response, inertial::InertialMessage};

use super::framing::{Frame, FrameDecoder, MuxChannel};

const READ_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A command response attributed to the connection it arrived on.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub channel: Option<MuxChannel>,
    pub response: Response,
}

/// An inertial data message attributed to the connection it arrived on.
#[derive(Debug, Clone)]
pub struct InboundInertial {
    pub channel: Option<MuxChannel>,
    pub message: InertialMessage,
}

/// Task: owns the serial port for the lifetime of the connection. Reads
/// inbound bytes, splits them into frames, and routes command responses and
/// inertial data messages onto the broadcast queues. Writes queued outbound
/// frames. Can be cancelled.
#[instrument(skip_all)]
pub(super) async fn task_hub_io(
    token: CancellationToken,
    mut port: Box<dyn SerialPort>,
    tx_responses: broadcast::Sender<InboundResponse>,
    tx_inertial: broadcast::Sender<InboundInertial>,
    mut rx_outbound: mpsc::Receiver<Vec<u8>>,
) {
    info!("Started.");

    let mut decoder = FrameDecoder::default();

    loop {
        match read_frames(&mut port, &mut decoder) {
            Ok(frames) => {
                for frame in frames {
                    route_frame(frame, &tx_responses, &tx_inertial);
                }
            }
            Err(e) => {
                error!("Failed to read from port. Error: {}", e);
                break;
            }
        }

        tokio::select! {
            _ = token.cancelled() => {
                warn!("Cancelled.");
                break;
            },
            frame = rx_outbound.recv() => {
                match frame {
                    Some(bytes) => {
                        if let Err(e) = port.write_all(&bytes) {
                            error!("Failed to write to port. Error: {}", e);
                            break;
                        }
                        trace!("Wrote {} bytes to port.", bytes.len());
                    }
                    None => {
                        warn!("Outbound queue closed.");
                        break;
                    }
                }
            },
            _ = tokio::time::sleep(READ_POLL_INTERVAL) => {}
        };
    }
    // dropping the port here releases it to the OS
}

fn read_frames(port: &mut Box<dyn SerialPort>, decoder: &mut FrameDecoder) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();

    loop {
        let available = port.bytes_to_read()?;
        if available == 0 {
            break;
        }

        let mut read_buffer: [u8; 1024] = [0; 1024];
        let bytes_read = port.read(&mut read_buffer)?;
        trace!("Received {} bytes.", bytes_read);

        frames.extend(decoder.push(&read_buffer[0..bytes_read]));
    }

    Ok(frames)
}

fn route_frame(
    frame: Frame,
    tx_responses: &broadcast::Sender<InboundResponse>,
    tx_inertial: &broadcast::Sender<InboundInertial>,
) {
    if frame.payload.starts_with('{') {
        match Response::parse(&frame.payload) {
            Ok(response) => {
                debug!("Received response: {}", frame.payload);
                // nobody waiting is normal; the response is dropped
                let _ = tx_responses.send(InboundResponse {
                    channel: frame.channel,
                    response,
                });
            }
            Err(e) => warn!("Failed to parse response \"{}\". Error: {}", frame.payload, e),
        }
        return;
    }

    if frame.payload.starts_with("I,") {
        match InertialMessage::parse(&frame.payload) {
            Ok(message) => {
                let _ = tx_inertial.send(InboundInertial {
                    channel: frame.channel,
                    message,
                });
            }
            Err(e) => warn!("Failed to parse inertial message \"{}\". Error: {}", frame.payload, e),
        }
        return;
    }

    trace!("Ignoring data message: {}", frame.payload);
}
