//! Command-line entry point for `cellcloud`.

use std::path::PathBuf;
use std::time::Duration;

use cellcloud::encoding::EncodingMode;
use cellcloud::{CloudError, Options, PointCloud};
use clap::Parser;
use web_time::Instant;

/// Load a dataset, encode it once, reload once, and log a summary.
#[derive(Parser)]
#[command(name = "cellcloud", version)]
struct Cli {
    /// AnnData `.zarr` directory or `.cellc` container.
    #[arg(required_unless_present = "schema")]
    dataset: Option<PathBuf>,
    /// TOML options preset.
    #[arg(long)]
    options: Option<PathBuf>,
    /// Genes to reload after the initial encode (empty = random sample).
    #[arg(long, value_delimiter = ',')]
    reload: Vec<usize>,
    /// Seconds to wait for the reload to settle.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
    /// Print the options JSON schema and exit.
    #[arg(long)]
    schema: bool,
}

fn run(cli: Cli) -> Result<(), CloudError> {
    let options = match &cli.options {
        Some(path) => Options::load(path)?,
        None => Options::default(),
    };

    let Some(dataset) = &cli.dataset else {
        return Err(CloudError::InvalidOption("no dataset given".into()));
    };
    let start = Instant::now();
    let mut cloud = PointCloud::open(dataset, options)?;
    log::info!(
        "loaded {} cells x {} genes in {:.1}ms",
        cloud.index().num_cells(),
        cloud.index().num_genes(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    log::info!(
        "{} of {} genes are informative",
        cloud.informative_genes().len(),
        cloud.index().num_genes()
    );

    for entry in cloud.legend() {
        log::info!(
            "legend {:.3}: {}",
            entry.value,
            entry.label.unwrap_or_else(|| entry.code.to_string())
        );
    }
    if let Some(active) = cloud.pipeline().active_annotation() {
        let active = active.name().to_owned();
        let labels = cloud.category_labels(cloud.pipeline().state().annotation)?;
        log::info!("{active}: {} category labels", labels.len());
    }

    cloud.trigger_reload(cli.reload)?;
    log::info!("{}", cloud.gene_label());
    if !cloud.refresh().wait_idle(Duration::from_secs(cli.timeout)) {
        log::warn!("reload still running after {}s", cli.timeout);
    }
    let _ = cloud.update();
    if let Some(message) = cloud.acknowledge_failure() {
        log::error!("reload failed: {message}");
    }
    if cloud.set_mode(EncodingMode::GeneExpression).is_ok() {
        log::info!("{}", cloud.gene_label());
    }

    let radius = cloud.point_radius();
    let bytes: usize = cloud
        .batches()
        .iter()
        .map(|b| b.instance_bytes(radius).len())
        .sum();
    log::info!(
        "{} batches, {} instance bytes",
        cloud.batches().len(),
        bytes
    );
    Ok(())
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if cli.schema {
        match serde_json::to_string_pretty(&Options::json_schema()) {
            Ok(schema) => println!("{schema}"),
            Err(e) => {
                log::error!("{e}");
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = run(cli) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
