use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use cellcloud::dataset::{CELL_IDS_PATH, EMBEDDING_PATH, GENE_NAMES_PATH};
use cellcloud::matrix::{DATA_PATH, INDICES_PATH, INDPTR_PATH};
use cellcloud::store::{ArrayData, ContainerWriter, MemoryStore, ZarrWriter};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Parser)]
#[command(name = "xtask")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a synthetic clustered dataset
    Synth {
        /// Output path: a `.zarr` directory or a `.cellc` file
        #[arg(long, default_value = "demo.cellc")]
        out: PathBuf,
        /// Number of cells
        #[arg(long, default_value_t = 25_000)]
        cells: usize,
        /// Number of genes
        #[arg(long, default_value_t = 500)]
        genes: usize,
        /// Number of clusters
        #[arg(long, default_value_t = 8)]
        clusters: usize,
        /// RNG seed
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Synth {
            out,
            cells,
            genes,
            clusters,
            seed,
        } => synth(&out, cells, genes, clusters, seed),
    }
}

fn synth(
    out: &Path,
    cells: usize,
    genes: usize,
    clusters: usize,
    seed: u64,
) -> Result<()> {
    ensure!(clusters > 0 && clusters <= 127, "clusters must be in 1..=127");
    let mut rng = StdRng::seed_from_u64(seed);

    let centers: Vec<[f32; 3]> = (0..clusters)
        .map(|_| {
            [
                rng.random_range(-10.0..10.0),
                rng.random_range(-10.0..10.0),
                rng.random_range(-10.0..10.0),
            ]
        })
        .collect();
    let cluster_of: Vec<usize> =
        (0..cells).map(|_| rng.random_range(0..clusters)).collect();

    let mut embedding = Vec::with_capacity(cells * 3);
    for &k in &cluster_of {
        for axis in 0..3 {
            // Sum of uniforms: cheap bell-shaped spread around the center.
            let spread: f32 = (0..4).map(|_| rng.random_range(-0.5f32..0.5)).sum();
            embedding.push(centers[k][axis] + spread * 1.5);
        }
    }

    // Each gene is a marker for one cluster: denser and higher there.
    let mut data = Vec::new();
    let mut indices = Vec::new();
    let mut indptr = Vec::with_capacity(genes + 1);
    indptr.push(0i64);
    for gene in 0..genes {
        let marker = gene % clusters;
        let background: f32 = rng.random_range(0.01..0.3);
        for (cell, &k) in cluster_of.iter().enumerate() {
            let p = if k == marker { 0.8 } else { background };
            if rng.random::<f32>() < p {
                let top = if k == marker { 40 } else { 6 };
                data.push(rng.random_range(1..=top) as f32);
                indices.push(i32::try_from(cell)?);
            }
        }
        indptr.push(i64::try_from(data.len())?);
    }

    let codes: Vec<i8> = cluster_of
        .iter()
        .map(|&k| i8::try_from(k))
        .collect::<Result<_, _>>()?;
    let sex: Vec<i8> = (0..cells).map(|_| rng.random_range(0..2)).collect();
    let tissue: Vec<i8> = cluster_of.iter().map(|&k| (k % 3) as i8).collect();

    let store = MemoryStore::new()
        .with(GENE_NAMES_PATH, strings("Gene", genes))
        .with(CELL_IDS_PATH, strings("cell", cells))
        .with(EMBEDDING_PATH, ArrayData::F32(embedding))
        .with(DATA_PATH, ArrayData::F32(data))
        .with(INDICES_PATH, ArrayData::I32(indices))
        .with(INDPTR_PATH, ArrayData::I64(indptr))
        .with("/obs/louvain", ArrayData::I8(codes))
        .with("/uns/louvain_categorical", strings("cluster_", clusters))
        .with("/obs/sex", ArrayData::I8(sex))
        .with(
            "/uns/sex_categorical",
            ArrayData::Str(vec!["female".into(), "male".into()]),
        )
        .with("/obs/tissue", ArrayData::I8(tissue))
        .with(
            "/uns/tissue_categorical",
            ArrayData::Str(vec!["Lung".into(), "Liver".into(), "Marrow".into()]),
        );

    let written = if out.extension().is_some_and(|ext| ext == "zarr") {
        ZarrWriter::write(out, &store)
    } else {
        ContainerWriter::write(out, &store)
    };
    written.with_context(|| format!("writing {}", out.display()))?;
    println!(
        "wrote {} ({cells} cells, {genes} genes, {clusters} clusters)",
        out.display()
    );
    Ok(())
}

fn strings(prefix: &str, n: usize) -> ArrayData {
    ArrayData::Str((0..n).map(|i| format!("{prefix}{i}")).collect())
}
