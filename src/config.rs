use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::model::autoencoder::AutoencoderConfig;
use crate::model::discriminator::DiscriminatorConfig;
use crate::model::encoder::EncoderConfig;
use crate::model::generator::GeneratorConfig;
use crate::model::perceptual::FeatureDistanceConfig;
use crate::model::quantizer::QuantizerConfig;
use crate::task::VqGanConfig;
use crate::train::TrainConfig;

pub mod celeba;
pub mod cifar10;
pub mod mnist;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Mnist,
    Cifar10,
    Celeba,
}

impl Preset {
    pub fn config(&self) -> TrainConfig {
        match self {
            Self::Mnist => mnist::mnist_config(),
            Self::Cifar10 => cifar10::cifar10_config(),
            Self::Celeba => celeba::celeba_config(),
        }
    }
}

impl FromStr for Preset {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "mnist" => Ok(Self::Mnist),
            "cifar10" => Ok(Self::Cifar10),
            "celeba" => Ok(Self::Celeba),
            other => Err(Error::config(format!("unknown preset `{other}`"))),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mnist => write!(f, "mnist"),
            Self::Cifar10 => write!(f, "cifar10"),
            Self::Celeba => write!(f, "celeba"),
        }
    }
}

/// Shape of one dataset's model, shared by the encoder and the mirrored generator.
pub(crate) struct Architecture {
    pub channels: usize,
    pub resolution: usize,
    pub nf: usize,
    pub ch_mult: Vec<usize>,
    pub attn_resolutions: Vec<usize>,
    pub res_blocks: usize,
    pub disc_layers: usize,
    pub codebook_size: usize,
    pub embedding_dim: usize,
    pub disc_start_step: u64,
}

impl Architecture {
    pub(crate) fn into_train_config(self, batch_size: usize) -> TrainConfig {
        let encoder = EncoderConfig::new(
            self.channels,
            self.nf,
            self.embedding_dim,
            self.ch_mult.clone(),
            self.res_blocks,
            self.resolution,
            self.attn_resolutions.clone(),
        );
        let generator = GeneratorConfig::new(
            self.embedding_dim,
            self.nf,
            self.channels,
            self.ch_mult,
            self.res_blocks,
            self.resolution,
            self.attn_resolutions,
        );
        let quantizer = QuantizerConfig::new()
            .with_codebook_size(self.codebook_size)
            .with_embedding_dim(self.embedding_dim);

        let model = VqGanConfig::new(
            AutoencoderConfig::new(encoder, quantizer, generator),
            DiscriminatorConfig::new(self.channels).with_layers(self.disc_layers),
            FeatureDistanceConfig::new(self.channels),
        )
        .with_disc_start_step(self.disc_start_step);

        TrainConfig::new(model).with_batch_size(batch_size)
    }
}
