use std::path::Path;

use anyhow::Result;
use carpus_provisioning::externals::carpus::{scan, HubConnection, ImuConnection, MuxChannel};
use carpus_provisioning::models::settings_script::{self, ScriptEntry};
use carpus_provisioning::provisioning::settings::apply_settings_scripts;
use carpus_provisioning::provisioning::HUB_DEVICE_NAME;
use tracing::info;
use tracing::level_filters::LevelFilter;

const SETTINGS_SCRIPT_FILE: &str = "imu_settings.json";

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_max_level(LevelFilter::INFO)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let scripts = settings_script::load(Path::new(SETTINGS_SCRIPT_FILE))?;

    let descriptor = scan::find_device(HUB_DEVICE_NAME)?;
    info!("Found {}.", descriptor);

    let hub = HubConnection::open(&descriptor).await?;
    let outcome = open_and_apply(&hub, &scripts).await;
    hub.close().await;

    outcome?;
    info!("Complete.");
    Ok(())
}

async fn open_and_apply(hub: &HubConnection, scripts: &[ScriptEntry]) -> Result<()> {
    let mut connections = Vec::new();
    for channel in MuxChannel::all() {
        connections.push(ImuConnection::open(hub, channel).await?);
    }

    apply_settings_scripts(&connections, scripts).await?;

    futures::future::join_all(connections.into_iter().map(ImuConnection::close)).await;
    Ok(())
}
