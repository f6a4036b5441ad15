use anyhow::Result;
use carpus_provisioning::externals::carpus::{scan, HubConnection};
use carpus_provisioning::provisioning::stamping::stamp_serial_number_and_hardware_version;
use carpus_provisioning::provisioning::HUB_DEVICE_NAME;
use tracing::info;
use tracing::level_filters::LevelFilter;

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

    let descriptor = scan::find_device(HUB_DEVICE_NAME)?;
    info!("Found {}.", descriptor);

    let hub = HubConnection::open(&descriptor).await?;
    let outcome = stamp_serial_number_and_hardware_version(&hub).await;
    hub.close().await;

    outcome?;
    info!("Complete.");
    Ok(())
}
