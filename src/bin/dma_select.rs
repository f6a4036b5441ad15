use anyhow::Result;
use carpus_provisioning::codegen::replace;
use tracing::level_filters::LevelFilter;

const KEYWORDS: [&str; 3] = ["DCH?", "Dma?", "DMA?"];

fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_max_level(LevelFilter::DEBUG)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    replace("Spi/Spi1DmaTX.c", &KEYWORDS, &[0], &[0])?;
    replace("Spi/Spi3Dma.c", &KEYWORDS, &[0, 1], &[2, 3])?;
    replace("Spi/Spi4Dma.c", &KEYWORDS, &[0, 1], &[4, 5])?;
    replace("Spi/Spi6Dma.c", &KEYWORDS, &[0, 1], &[6, 7])?;

    Ok(())
}
