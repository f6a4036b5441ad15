use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::models::command::{Command, Response};

use super::framing::MuxChannel;
use super::scan::DeviceDescriptor;
use super::session::{CommandError, CommandPort};
use super::task::{task_hub_io, InboundInertial, InboundResponse};

const BAUD_RATE: u32 = 115_200;
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Window allowed for the OS to release the port after a scan.
const OPEN_DEADLINE: Duration = Duration::from_secs(2);
const OPEN_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

const OUTBOUND_QUEUE_SIZE: usize = 32;
const RESPONSE_QUEUE_SIZE: usize = 32;
const INERTIAL_QUEUE_SIZE: usize = 1024;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Unable to open {descriptor}. {source}")]
    Open {
        descriptor: String,
        source: serialport::Error,
    },
}

/// The single physical connection to the multiplexing device. All child
/// device traffic is routed through this port by the hub I/O task. Must be
/// closed to release the port; dropping without closing cancels the task as
/// a fallback.
pub struct HubConnection {
    descriptor: DeviceDescriptor,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
    port: CommandPort,
    tx_outbound: mpsc::Sender<Vec<u8>>,
    tx_responses: broadcast::Sender<InboundResponse>,
    tx_inertial: broadcast::Sender<InboundInertial>,
}

impl HubConnection {
    /// Opens the port and spawns the hub I/O task. Retries with a doubling
    /// backoff while the OS releases the port after a scan.
    #[instrument(skip_all)]
    pub async fn open(descriptor: &DeviceDescriptor) -> Result<Self, ConnectionError> {
        let deadline = Instant::now() + OPEN_DEADLINE;
        let mut backoff = OPEN_INITIAL_BACKOFF;

        let port = loop {
            match serialport::new(&descriptor.port_name, BAUD_RATE)
                .timeout(PORT_READ_TIMEOUT)
                .open()
            {
                Ok(port) => break port,
                Err(e) if Instant::now() + backoff < deadline => {
                    debug!("Unable to open {} yet. Retrying. Error: {}", descriptor, e);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    return Err(ConnectionError::Open {
                        descriptor: descriptor.to_string(),
                        source: e,
                    })
                }
            }
        };
        info!("Opened {}.", descriptor);

        let token = CancellationToken::new();
        let (tx_outbound, rx_outbound) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let (tx_responses, _) = broadcast::channel(RESPONSE_QUEUE_SIZE);
        let (tx_inertial, _) = broadcast::channel(INERTIAL_QUEUE_SIZE);

        let task = tokio::spawn(task_hub_io(
            token.clone(),
            port,
            tx_responses.clone(),
            tx_inertial.clone(),
            rx_outbound,
        ));

        let port = CommandPort::new(
            None,
            descriptor.to_string(),
            tx_outbound.clone(),
            tx_responses.clone(),
        );

        Ok(Self {
            descriptor: descriptor.clone(),
            token,
            task: Some(task),
            port,
            tx_outbound,
            tx_responses,
            tx_inertial,
        })
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Sends a command to the hub device itself.
    pub async fn send_command(&self, command: &Command) -> Result<Response, CommandError> {
        self.port.send_command(command).await
    }

    pub(super) fn command_port(&self, channel: MuxChannel) -> CommandPort {
        CommandPort::new(
            Some(channel),
            format!("{} channel {}", self.descriptor, channel),
            self.tx_outbound.clone(),
            self.tx_responses.clone(),
        )
    }

    pub(super) fn inertial_sender(&self) -> broadcast::Sender<InboundInertial> {
        self.tx_inertial.clone()
    }

    /// Closes the connection, stopping the hub I/O task and releasing the
    /// port.
    pub async fn close(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Hub I/O task failed. Error: {}", e);
            }
        }
        info!("Closed {}.", self.descriptor);
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
