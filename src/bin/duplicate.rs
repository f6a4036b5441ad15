use anyhow::Result;
use carpus_provisioning::codegen::duplicate;
use tracing::level_filters::LevelFilter;

fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_max_level(LevelFilter::DEBUG)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let destination_ids: Vec<u32> = (2..=20).collect();

    duplicate(
        &["Icm?.c", "Icm?.h"],
        &["ICM?", "Icm?", "icm?"],
        1,
        &destination_ids,
    )?;

    Ok(())
}
