use std::path::PathBuf;
use std::str::FromStr;

use burn::backend::Autodiff;
use burn::config::Config;
use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use tracing_subscriber::EnvFilter;

use vqgan::config::Preset;
use vqgan::data::load_rows;
use vqgan::model::QuantizerKind;
use vqgan::train::{train, TrainConfig};

#[cfg(feature = "wgpu")]
type B = burn::backend::Wgpu;
#[cfg(all(feature = "tch", not(feature = "wgpu")))]
type B = burn::backend::LibTorch;
#[cfg(not(any(feature = "wgpu", feature = "tch")))]
type B = burn::backend::NdArray;

/// Train a VQGAN autoencoder and its discriminator on JSON image rows.
#[derive(Parser, Debug)]
struct Args {
    /// Built-in hyper-parameters: mnist, cifar10 or celeba.
    #[arg(long, value_parser = Preset::from_str, conflicts_with = "config")]
    preset: Option<Preset>,
    /// A saved `TrainConfig` JSON file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// One `ImageItem` JSON object per line.
    #[arg(long)]
    data: PathBuf,
    #[arg(long, default_value = "out")]
    out: PathBuf,
    /// nearest or gumbel.
    #[arg(long, value_parser = QuantizerKind::from_str)]
    quantizer: Option<QuantizerKind>,
    #[arg(long)]
    steps: Option<u64>,
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match (args.preset, &args.config) {
        (Some(preset), _) => preset.config(),
        (None, Some(path)) => TrainConfig::load(path)
            .map_err(vqgan::Error::from)
            .wrap_err_with(|| format!("reading {}", path.display()))?,
        (None, None) => return Err(eyre!("either --preset or --config is required")),
    };

    if let Some(kind) = args.quantizer {
        config.model.autoencoder.quantizer.kind = kind;
    }
    if let Some(steps) = args.steps {
        config.steps = steps;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let dataset = load_rows(&args.data, config.image_shape())
        .wrap_err_with(|| format!("loading {}", args.data.display()))?;

    train::<Autodiff<B>>(&config, dataset, &args.out, Default::default())?;

    Ok(())
}
