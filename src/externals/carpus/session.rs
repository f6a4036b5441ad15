use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::models::command::{Command, PingResponse, Response};
use crate::models::inertial::GyroscopeAccumulator;

use super::framing::{self, MuxChannel};
use super::hub::HubConnection;
use super::task::{InboundInertial, InboundResponse};

const COMMAND_RETRIES: usize = 2;
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("No response. {command} sent to {destination}")]
    NoResponse {
        command: String,
        destination: String,
    },

    #[error("{error}. {command} sent to {destination}")]
    Device {
        error: String,
        command: String,
        destination: String,
    },

    #[error("Unexpected response value. {command} sent to {destination}")]
    UnexpectedResponse {
        command: String,
        destination: String,
    },

    #[error("Connection closed. {command} sent to {destination}")]
    ConnectionClosed {
        command: String,
        destination: String,
    },
}

#[derive(Error, Debug)]
pub enum SamplingError {
    #[error("No samples received.")]
    NoSamples,

    #[error("Sampling was not started.")]
    NotSampling,

    #[error("Sampling task failed. {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Write half plus response subscription for one logical connection, either
/// the hub itself or one mux channel.
#[derive(Clone)]
pub(super) struct CommandPort {
    channel: Option<MuxChannel>,
    destination: String,
    tx_outbound: mpsc::Sender<Vec<u8>>,
    tx_responses: broadcast::Sender<InboundResponse>,
}

impl CommandPort {
    pub(super) fn new(
        channel: Option<MuxChannel>,
        destination: String,
        tx_outbound: mpsc::Sender<Vec<u8>>,
        tx_responses: broadcast::Sender<InboundResponse>,
    ) -> Self {
        Self {
            channel,
            destination,
            tx_outbound,
            tx_responses,
        }
    }

    /// Sends a command and waits for the echoed response. A missing response
    /// is retried within the per-attempt timeout; a response carrying an
    /// error field fails immediately.
    pub(super) async fn send_command(&self, command: &Command) -> Result<Response, CommandError> {
        let frame = framing::encode(self.channel, &command.to_string());

        for attempt in 0..=COMMAND_RETRIES {
            if attempt > 0 {
                debug!(
                    "No response to {} from {}. Attempt {}.",
                    command,
                    self.destination,
                    attempt + 1
                );
            }

            // subscribe before writing so the response cannot be missed
            let mut rx_responses = self.tx_responses.subscribe();

            if self.tx_outbound.send(frame.clone()).await.is_err() {
                return Err(self.closed(command));
            }

            match timeout(
                RESPONSE_TIMEOUT,
                self.wait_for_response(&mut rx_responses, command.key()),
            )
            .await
            {
                Ok(Some(response)) => {
                    if let Some(error) = response.error() {
                        return Err(CommandError::Device {
                            error: error.to_string(),
                            command: command.to_string(),
                            destination: self.destination.clone(),
                        });
                    }
                    trace!("{} acknowledged by {}.", command, self.destination);
                    return Ok(response);
                }
                Ok(None) => return Err(self.closed(command)),
                Err(_elapsed) => continue,
            }
        }

        Err(CommandError::NoResponse {
            command: command.to_string(),
            destination: self.destination.clone(),
        })
    }

    async fn wait_for_response(
        &self,
        rx_responses: &mut broadcast::Receiver<InboundResponse>,
        key: &str,
    ) -> Option<Response> {
        loop {
            match rx_responses.recv().await {
                Ok(inbound) if inbound.channel == self.channel && inbound.response.key() == key => {
                    return Some(inbound.response);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} responses for {}.", skipped, self.destination);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn closed(&self, command: &Command) -> CommandError {
        CommandError::ConnectionClosed {
            command: command.to_string(),
            destination: self.destination.clone(),
        }
    }

    pub(super) fn destination(&self) -> &str {
        &self.destination
    }
}

struct SamplingTask {
    token: CancellationToken,
    task: JoinHandle<GyroscopeAccumulator>,
}

/// One multiplexed child device, addressed by its mux channel and tunneled
/// through the hub connection.
pub struct ImuConnection {
    channel: MuxChannel,
    name: String,
    port: CommandPort,
    tx_inertial: broadcast::Sender<InboundInertial>,
    sampling: Option<SamplingTask>,
}

impl ImuConnection {
    /// Attaches to a channel without checking that a device is present.
    /// Commands to an absent device fail with `CommandError::NoResponse`.
    pub fn attach(hub: &HubConnection, channel: MuxChannel) -> Self {
        Self {
            channel,
            name: String::new(),
            port: hub.command_port(channel),
            tx_inertial: hub.inertial_sender(),
            sampling: None,
        }
    }

    /// Attaches to a channel and pings the device, recording the name it
    /// reports for later pattern matching.
    pub async fn open(hub: &HubConnection, channel: MuxChannel) -> Result<Self, CommandError> {
        let mut connection = Self::attach(hub, channel);

        let response = connection.send_command(&Command::ping()).await?;
        let ping = PingResponse::try_from(&response).map_err(|_| {
            CommandError::UnexpectedResponse {
                command: Command::ping().to_string(),
                destination: connection.port.destination().to_string(),
            }
        })?;

        info!("Connected to {} on channel {}.", ping.name, channel);
        connection.name = ping.name;
        Ok(connection)
    }

    /// The device name reported by ping, empty when attached without one.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> MuxChannel {
        self.channel
    }

    pub async fn send_command(&self, command: &Command) -> Result<Response, CommandError> {
        self.port.send_command(command).await
    }

    /// Begins accumulating this channel's inbound gyroscope samples in a
    /// fresh accumulator.
    pub fn start_sampling(&mut self) {
        if let Some(stale) = self.sampling.take() {
            warn!("Sampling already active for channel {}. Restarting.", self.channel);
            stale.token.cancel();
        }

        let token = CancellationToken::new();
        let rx_inertial = self.tx_inertial.subscribe();
        let task = tokio::spawn(task_accumulate_gyroscope(
            token.clone(),
            self.channel,
            rx_inertial,
        ));
        self.sampling = Some(SamplingTask { token, task });
    }

    /// Stops accumulating and returns the elementwise mean of the samples.
    /// The accumulation task is joined before its result is read, so no
    /// sample can arrive mid-read.
    pub async fn stop_sampling(&mut self) -> Result<[f64; 3], SamplingError> {
        let SamplingTask { token, task } = self.sampling.take().ok_or(SamplingError::NotSampling)?;

        token.cancel();
        let accumulator = task.await?;

        debug!(
            "Channel {} accumulated {} samples.",
            self.channel,
            accumulator.count()
        );
        accumulator.mean().ok_or(SamplingError::NoSamples)
    }

    /// Releases the logical connection. The port itself is owned by the hub.
    pub async fn close(mut self) {
        if self.sampling.is_some() {
            if let Err(e) = self.stop_sampling().await {
                debug!("Discarding sampling state for channel {}. {}", self.channel, e);
            }
        }
        debug!("Closed channel {}.", self.channel);
    }
}

impl Drop for ImuConnection {
    fn drop(&mut self) {
        if let Some(sampling) = &self.sampling {
            sampling.token.cancel();
        }
    }
}

#[cfg(test)]
impl ImuConnection {
    /// Builds a connection backed by raw queues instead of a hub, so tests
    /// can stand in for the hub I/O task.
    pub(crate) fn for_tests(
        channel: MuxChannel,
        name: &str,
        tx_outbound: mpsc::Sender<Vec<u8>>,
        tx_responses: broadcast::Sender<InboundResponse>,
        tx_inertial: broadcast::Sender<InboundInertial>,
    ) -> Self {
        Self {
            channel,
            name: name.to_string(),
            port: CommandPort::new(
                Some(channel),
                format!("test device channel {}", channel),
                tx_outbound,
                tx_responses,
            ),
            tx_inertial,
            sampling: None,
        }
    }
}

/// Task: adds every inertial message for one channel to the accumulator
/// until cancelled.
#[instrument(skip_all, fields(channel = %channel))]
async fn task_accumulate_gyroscope(
    token: CancellationToken,
    channel: MuxChannel,
    mut rx_inertial: broadcast::Receiver<InboundInertial>,
) -> GyroscopeAccumulator {
    trace!("Started.");

    let mut accumulator = GyroscopeAccumulator::default();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            received = rx_inertial.recv() => match received {
                Ok(inbound) if inbound.channel == Some(channel) => {
                    accumulator.add(inbound.message.gyroscope);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} inertial messages.", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("Inertial queue closed.");
                    break;
                }
            }
        };
    }

    accumulator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::inertial::InertialMessage;

    fn channel(address: u8) -> MuxChannel {
        MuxChannel::new(address).unwrap()
    }

    struct TestPort {
        port: CommandPort,
        rx_outbound: mpsc::Receiver<Vec<u8>>,
        tx_responses: broadcast::Sender<InboundResponse>,
    }

    fn test_port(mux_channel: Option<MuxChannel>) -> TestPort {
        let (tx_outbound, rx_outbound) = mpsc::channel(8);
        let (tx_responses, _) = broadcast::channel(8);
        TestPort {
            port: CommandPort::new(
                mux_channel,
                "test device".to_string(),
                tx_outbound,
                tx_responses.clone(),
            ),
            rx_outbound,
            tx_responses,
        }
    }

    fn test_connection(mux_channel: MuxChannel) -> (ImuConnection, broadcast::Sender<InboundInertial>, TestPort) {
        let (tx_inertial, _) = broadcast::channel(64);
        let test_port = test_port(Some(mux_channel));
        let connection = ImuConnection {
            channel: mux_channel,
            name: "IMU1".to_string(),
            port: test_port.port.clone(),
            tx_inertial: tx_inertial.clone(),
            sampling: None,
        };
        (connection, tx_inertial, test_port)
    }

    fn inertial(mux_channel: Option<MuxChannel>, gyroscope: [f32; 3]) -> InboundInertial {
        InboundInertial {
            channel: mux_channel,
            message: InertialMessage {
                timestamp: 0,
                gyroscope,
                accelerometer: [0.0; 3],
            },
        }
    }

    #[tokio::test]
    async fn test_send_command_returns_echoed_response() {
        let mux_channel = channel(0x41);
        let mut test = test_port(Some(mux_channel));
        let port = test.port.clone();

        let responder = tokio::spawn(async move {
            let frame = test.rx_outbound.recv().await.unwrap();
            assert_eq!(frame, b"^A{\"ping\":null}\n");
            test.tx_responses
                .send(InboundResponse {
                    channel: Some(mux_channel),
                    response: Response::parse(
                        "{\"ping\":{\"interface\":\"USB\",\"name\":\"IMU1\",\"sn\":\"0123ABCD\"}}",
                    )
                    .unwrap(),
                })
                .unwrap();
        });

        let response = port.send_command(&Command::ping()).await.unwrap();
        assert_eq!(response.key(), "ping");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_command_fails_on_device_error() {
        let mut test = test_port(None);
        let port = test.port.clone();

        let responder = tokio::spawn(async move {
            test.rx_outbound.recv().await.unwrap();
            test.tx_responses
                .send(InboundResponse {
                    channel: None,
                    response: Response::parse("{\"factory\":{\"error\":\"Invalid state\"}}").unwrap(),
                })
                .unwrap();
        });

        let result = port.send_command(&Command::factory()).await;
        assert!(matches!(result, Err(CommandError::Device { error, .. }) if error == "Invalid state"));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_command_ignores_other_channels() {
        let mux_channel = channel(0x41);
        let mut test = test_port(Some(mux_channel));
        let port = test.port.clone();

        let responder = tokio::spawn(async move {
            test.rx_outbound.recv().await.unwrap();
            // response for a different channel, then the right one
            test.tx_responses
                .send(InboundResponse {
                    channel: Some(channel(0x42)),
                    response: Response::parse("{\"save\":{\"error\":\"wrong device\"}}").unwrap(),
                })
                .unwrap();
            test.tx_responses
                .send(InboundResponse {
                    channel: Some(mux_channel),
                    response: Response::parse("{\"save\":null}").unwrap(),
                })
                .unwrap();
        });

        let result = port.send_command(&Command::save()).await;
        let response = result.unwrap();
        assert_eq!(response.error(), None);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_command_times_out_without_response() {
        let test = test_port(None);

        let result = test.port.send_command(&Command::save()).await;
        assert!(matches!(result, Err(CommandError::NoResponse { .. })));
    }

    #[tokio::test]
    async fn test_sampling_returns_componentwise_mean() {
        let mux_channel = channel(0x41);
        let (mut connection, tx_inertial, _test) = test_connection(mux_channel);

        connection.start_sampling();

        tx_inertial.send(inertial(Some(mux_channel), [1.0, 2.0, 3.0])).unwrap();
        tx_inertial.send(inertial(Some(mux_channel), [3.0, 4.0, 5.0])).unwrap();
        // other channels and hub traffic are not this connection's samples
        tx_inertial.send(inertial(Some(channel(0x42)), [100.0, 100.0, 100.0])).unwrap();
        tx_inertial.send(inertial(None, [100.0, 100.0, 100.0])).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mean = connection.stop_sampling().await.unwrap();
        assert_eq!(mean, [2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_sampling_without_samples_is_an_error() {
        let (mut connection, _tx_inertial, _test) = test_connection(channel(0x41));

        connection.start_sampling();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = connection.stop_sampling().await;
        assert!(matches!(result, Err(SamplingError::NoSamples)));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_an_error() {
        let (mut connection, _tx_inertial, _test) = test_connection(channel(0x41));

        let result = connection.stop_sampling().await;
        assert!(matches!(result, Err(SamplingError::NotSampling)));
    }
}
