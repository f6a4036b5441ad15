use thiserror::Error;
use tracing::{debug, instrument};

use crate::externals::carpus::{CommandError, ImuConnection};
use crate::models::command::{Command, ParseError};
use crate::models::settings_script::{ScriptEntry, ScriptError};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("Invalid command \"{command}\". {source}")]
    Command { command: String, source: ParseError },

    #[error(transparent)]
    Send(#[from] CommandError),
}

/// Applies each script entry, in order, to every connection whose reported
/// name matches the entry's pattern. Commands run strictly in list order per
/// matched connection.
#[instrument(skip_all)]
pub async fn apply_settings_scripts(
    connections: &[ImuConnection],
    scripts: &[ScriptEntry],
) -> Result<(), SettingsError> {
    for script in scripts {
        for connection in connections {
            if !script.matches(connection.name())? {
                continue;
            }
            debug!(
                "Applying \"{}\" commands to {} on channel {}.",
                script.name,
                connection.name(),
                connection.channel()
            );

            for command in &script.commands {
                let command = Command::parse(command).map_err(|source| SettingsError::Command {
                    command: command.clone(),
                    source,
                })?;
                connection.send_command(&command).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::sync::{broadcast, mpsc};

    use crate::externals::carpus::task::InboundResponse;
    use crate::externals::carpus::MuxChannel;
    use crate::models::command::Response;

    use super::*;

    type CommandLog = Arc<Mutex<Vec<(char, String)>>>;

    /// Stands in for the hub I/O task: acknowledges every command and
    /// records which channel it was addressed to.
    fn spawn_echo_responder(
        mut rx_outbound: mpsc::Receiver<Vec<u8>>,
        tx_responses: broadcast::Sender<InboundResponse>,
    ) -> CommandLog {
        let log: CommandLog = Arc::new(Mutex::new(Vec::new()));
        let recorded = log.clone();

        tokio::spawn(async move {
            while let Some(frame) = rx_outbound.recv().await {
                let (channel, payload) = if frame.first() == Some(&b'^') {
                    (MuxChannel::new(frame[1]), &frame[2..])
                } else {
                    (None, &frame[..])
                };
                let line = String::from_utf8(payload.to_vec()).unwrap();
                let command = Command::parse(line.trim_end()).unwrap();

                recorded.lock().unwrap().push((
                    channel.map(|channel| channel.letter()).unwrap_or('-'),
                    command.key().to_string(),
                ));

                let response =
                    Response::parse(&format!("{{\"{}\":null}}", command.key())).unwrap();
                tx_responses
                    .send(InboundResponse { channel, response })
                    .unwrap();
            }
        });

        log
    }

    fn entry(name: &str, commands: &[&str]) -> ScriptEntry {
        ScriptEntry {
            name: name.to_string(),
            commands: commands.iter().map(|command| command.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_commands_route_to_matching_names_in_order() {
        let (tx_outbound, rx_outbound) = mpsc::channel(32);
        let (tx_responses, _) = broadcast::channel(32);
        let (tx_inertial, _) = broadcast::channel(32);
        let log = spawn_echo_responder(rx_outbound, tx_responses.clone());

        let connections = vec![
            ImuConnection::for_tests(
                MuxChannel::new(0x41).unwrap(),
                "IMU1",
                tx_outbound.clone(),
                tx_responses.clone(),
                tx_inertial.clone(),
            ),
            ImuConnection::for_tests(
                MuxChannel::new(0x42).unwrap(),
                "Spare",
                tx_outbound.clone(),
                tx_responses.clone(),
                tx_inertial.clone(),
            ),
        ];

        let scripts = vec![
            entry("IMU*", &["{\"message_rate_divisor\":8}", "{\"apply\":null}"]),
            entry("*", &["{\"save\":null}"]),
        ];

        apply_settings_scripts(&connections, &scripts).await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                ('A', "message_rate_divisor".to_string()),
                ('A', "apply".to_string()),
                ('A', "save".to_string()),
                ('B', "save".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_command_is_an_error() {
        let (tx_outbound, rx_outbound) = mpsc::channel(32);
        let (tx_responses, _) = broadcast::channel(32);
        let (tx_inertial, _) = broadcast::channel(32);
        let _log = spawn_echo_responder(rx_outbound, tx_responses.clone());

        let connections = vec![ImuConnection::for_tests(
            MuxChannel::new(0x41).unwrap(),
            "IMU1",
            tx_outbound,
            tx_responses,
            tx_inertial,
        )];

        let scripts = vec![entry("IMU*", &["not json"])];

        let result = apply_settings_scripts(&connections, &scripts).await;
        assert!(matches!(result, Err(SettingsError::Command { .. })));
    }
}
