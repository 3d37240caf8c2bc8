use std::fmt;
use std::str::FromStr;

use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, ElementConversion, Int, Tensor};
use burn::tensor::IndexingUpdateOp;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::ops::count_non_finite;

pub mod gumbel;
pub mod nearest;

pub use gumbel::{GumbelQuantizer, GumbelQuantizerConfig};
pub use nearest::{NearestQuantizer, NearestQuantizerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizerKind {
    Nearest,
    Gumbel,
}

impl FromStr for QuantizerKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "nearest" => Ok(Self::Nearest),
            "gumbel" => Ok(Self::Gumbel),
            other => Err(Error::config(format!("unknown quantizer `{other}`"))),
        }
    }
}

impl fmt::Display for QuantizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => write!(f, "nearest"),
            Self::Gumbel => write!(f, "gumbel"),
        }
    }
}

/// What to do once non-finite values show up at an inspection point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonFinitePolicy {
    /// Log and keep going.
    Warn,
    /// Log and fail the step.
    Abort,
}

/// Counts non-finite entries of `tensor` and reports them under `name`.
pub fn inspect<B: Backend, const D: usize>(
    tensor: &Tensor<B, D>,
    name: &'static str,
    step: u64,
    policy: NonFinitePolicy,
) -> Result<()> {
    let count = count_non_finite(tensor);

    if count == 0 {
        return Ok(());
    }

    warn!(step, tensor = name, count, "non-finite values");

    match policy {
        NonFinitePolicy::Warn => Ok(()),
        NonFinitePolicy::Abort => Err(Error::NonFinite { step, tensor: name }),
    }
}

/// `exp(-sum p log p)` of the empirical code usage.
pub fn perplexity<B: Backend>(indices: Tensor<B, 1, Int>, codebook_size: usize) -> f32 {
    let [count] = indices.dims();
    let device = indices.device();

    let usage = Tensor::<B, 1>::zeros([codebook_size], &device).scatter(
        0,
        indices,
        Tensor::ones([count], &device),
        IndexingUpdateOp::Add,
    );
    let probs = usage / count.max(1) as f32;

    let entropy = (probs.clone() * (probs + 1e-10).log()).sum().neg();

    entropy.exp().into_scalar().elem::<f32>()
}

/// Rebuilds a `B x D x H x W` map from flat code indices.
pub fn lookup<B: Backend>(
    codebook: Tensor<B, 2>,
    indices: Tensor<B, 2, Int>,
    [height, width]: [usize; 2],
) -> Result<Tensor<B, 4>> {
    let [batch, positions] = indices.dims();
    let [_, embedding_dim] = codebook.dims();

    if positions != height * width {
        return Err(Error::shape_mismatch([batch, height * width], [batch, positions]));
    }

    let rows = codebook.select(0, indices.reshape([batch * positions]));

    // rows : (B·H·W) x D
    let quantized = rows
        .reshape([batch, height, width, embedding_dim])
        .permute([0, 3, 1, 2]);

    Ok(quantized)
}

pub(crate) fn check_channels(
    [batch, channels, height, width]: [usize; 4],
    embedding_dim: usize,
) -> Result<()> {
    if channels != embedding_dim {
        return Err(Error::shape_mismatch(
            [batch, embedding_dim, height, width],
            [batch, channels, height, width],
        ));
    }

    Ok(())
}

/// Flattens `B x D x H x W` to one `D`-vector per position.
pub(crate) fn flatten_positions<B: Backend>(
    latents: Tensor<B, 4>,
    embedding_dim: usize,
) -> Result<Tensor<B, 2>> {
    let [batch, channels, height, width] = latents.dims();
    check_channels(latents.dims(), embedding_dim)?;

    Ok(latents
        .permute([0, 2, 3, 1])
        .reshape([batch * height * width, channels]))
}

#[derive(Debug, Clone, Copy)]
pub struct QuantizeContext {
    pub step: u64,
    pub temperature: f32,
    pub training: bool,
}

impl QuantizeContext {
    pub fn training(step: u64, temperature: f32) -> Self {
        Self {
            step,
            temperature,
            training: true,
        }
    }

    pub fn inference(step: u64) -> Self {
        Self {
            step,
            temperature: 1.0,
            training: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuantizerStats<B: Backend> {
    pub perplexity: f32,
    pub mean_distance: Option<f32>,
    pub temperature: Option<f32>,
    /// B x (H·W)
    pub indices: Tensor<B, 2, Int>,
}

#[derive(Debug, Clone)]
pub struct QuantizerOutput<B: Backend> {
    pub quantized: Tensor<B, 4>,
    pub loss: Tensor<B, 1>,
    pub stats: QuantizerStats<B>,
}

pub trait Quantizer<B: Backend>: Module<B> {
    fn quantize(&self, latents: Tensor<B, 4>, context: QuantizeContext) -> Result<QuantizerOutput<B>>;

    fn codebook_entry(&self, indices: Tensor<B, 2, Int>, shape: [usize; 2]) -> Result<Tensor<B, 4>>;

    fn codebook_size(&self) -> usize;

    fn embedding_dim(&self) -> usize;
}

#[derive(Config, Debug)]
pub struct QuantizerConfig {
    #[config(default = "QuantizerKind::Nearest")]
    pub kind: QuantizerKind,
    #[config(default = 1024)]
    pub codebook_size: usize,
    #[config(default = 256)]
    pub embedding_dim: usize,
    /// Commitment cost of the nearest-neighbour variant.
    #[config(default = 0.25)]
    pub beta: f32,
    #[config(default = 5e-4)]
    pub kl_weight: f32,
    /// Hard one-hot samples with soft gradients while training the Gumbel variant.
    #[config(default = false)]
    pub straight_through: bool,
    #[config(default = "NonFinitePolicy::Abort")]
    pub non_finite: NonFinitePolicy,
}

impl QuantizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.codebook_size == 0 {
            return Err(Error::config("codebook size must be positive"));
        }
        if self.embedding_dim == 0 {
            return Err(Error::config("embedding dim must be positive"));
        }

        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> VectorQuantizer<B> {
        match self.kind {
            QuantizerKind::Nearest => VectorQuantizer::Nearest(
                NearestQuantizerConfig::new(self.codebook_size, self.embedding_dim)
                    .with_beta(self.beta)
                    .init(device),
            ),
            QuantizerKind::Gumbel => VectorQuantizer::Gumbel(
                GumbelQuantizerConfig::new(self.codebook_size, self.embedding_dim)
                    .with_kl_weight(self.kl_weight)
                    .with_straight_through(self.straight_through)
                    .with_non_finite(self.non_finite)
                    .init(device),
            ),
        }
    }
}

#[derive(Module, Debug)]
pub enum VectorQuantizer<B: Backend> {
    Nearest(NearestQuantizer<B>),
    Gumbel(GumbelQuantizer<B>),
}

impl<B: Backend> VectorQuantizer<B> {
    pub fn kind(&self) -> QuantizerKind {
        match self {
            Self::Nearest(_) => QuantizerKind::Nearest,
            Self::Gumbel(_) => QuantizerKind::Gumbel,
        }
    }

    pub fn codebook(&self) -> Tensor<B, 2> {
        match self {
            Self::Nearest(quantizer) => quantizer.embedding.weight.val(),
            Self::Gumbel(quantizer) => quantizer.embedding.weight.val(),
        }
    }
}

impl<B: Backend> Quantizer<B> for VectorQuantizer<B> {
    fn quantize(&self, latents: Tensor<B, 4>, context: QuantizeContext) -> Result<QuantizerOutput<B>> {
        match self {
            Self::Nearest(quantizer) => quantizer.quantize(latents, context),
            Self::Gumbel(quantizer) => quantizer.quantize(latents, context),
        }
    }

    fn codebook_entry(&self, indices: Tensor<B, 2, Int>, shape: [usize; 2]) -> Result<Tensor<B, 4>> {
        match self {
            Self::Nearest(quantizer) => quantizer.codebook_entry(indices, shape),
            Self::Gumbel(quantizer) => quantizer.codebook_entry(indices, shape),
        }
    }

    fn codebook_size(&self) -> usize {
        match self {
            Self::Nearest(quantizer) => quantizer.codebook_size(),
            Self::Gumbel(quantizer) => quantizer.codebook_size(),
        }
    }

    fn embedding_dim(&self) -> usize {
        match self {
            Self::Nearest(quantizer) => quantizer.embedding_dim(),
            Self::Gumbel(quantizer) => quantizer.embedding_dim(),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;
    use burn::tensor::{Tensor, TensorData, Tolerance};

    use super::*;

    #[test]
    fn parses_quantizer_names() {
        assert_eq!("nearest".parse::<QuantizerKind>().unwrap(), QuantizerKind::Nearest);
        assert_eq!("gumbel".parse::<QuantizerKind>().unwrap(), QuantizerKind::Gumbel);
        assert!(matches!(
            "kmeans".parse::<QuantizerKind>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn perplexity_of_uniform_usage_is_codebook_size() {
        let device = NdArrayDevice::Cpu;
        let indices = Tensor::<NdArray, 1, Int>::from_ints([0, 1, 2, 3, 4, 5, 6, 7], &device);

        let value = perplexity(indices, 8);

        TensorData::from([value]).assert_approx_eq::<f32>(
            &TensorData::from([8.0f32]),
            Tolerance::absolute(1e-4),
        );
    }

    #[test]
    fn perplexity_of_collapse_is_one() {
        let device = NdArrayDevice::Cpu;
        let indices = Tensor::<NdArray, 1, Int>::from_ints([3, 3, 3, 3, 3, 3], &device);

        let value = perplexity(indices, 16);

        TensorData::from([value]).assert_approx_eq::<f32>(
            &TensorData::from([1.0f32]),
            Tolerance::absolute(1e-5),
        );
    }

    #[test]
    fn single_entry_codebook_has_perplexity_one() {
        let device = NdArrayDevice::Cpu;
        let indices = Tensor::<NdArray, 1, Int>::zeros([5], &device);

        let value = perplexity(indices, 1);

        TensorData::from([value]).assert_approx_eq::<f32>(
            &TensorData::from([1.0f32]),
            Tolerance::absolute(1e-5),
        );
    }

    #[test]
    fn perplexity_stays_within_bounds() {
        let device = NdArrayDevice::Cpu;
        let indices = Tensor::<NdArray, 1, Int>::from_ints([0, 0, 0, 1, 2, 2, 9, 9], &device);

        let value = perplexity(indices, 10);

        assert!((1.0..=10.0).contains(&value));
    }

    #[test]
    fn lookup_rejects_wrong_position_count() {
        let device = NdArrayDevice::Cpu;
        let codebook = Tensor::<NdArray, 2>::zeros([4, 3], &device);
        let indices = Tensor::<NdArray, 2, Int>::zeros([2, 5], &device);

        let result = lookup(codebook, indices, [2, 2]);

        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn inspect_follows_policy() {
        let device = NdArrayDevice::Cpu;
        let tensor = Tensor::<NdArray, 1>::from_floats([1.0, f32::NAN], &device);

        assert!(inspect(&tensor, "logits", 3, NonFinitePolicy::Warn).is_ok());
        assert!(matches!(
            inspect(&tensor, "logits", 3, NonFinitePolicy::Abort),
            Err(Error::NonFinite { step: 3, tensor: "logits" })
        ));
    }

    #[test]
    fn config_selects_strategy() {
        let device = NdArrayDevice::Cpu;
        let config = QuantizerConfig::new()
            .with_kind(QuantizerKind::Gumbel)
            .with_codebook_size(8)
            .with_embedding_dim(4);

        let quantizer = config.init::<NdArray>(&device);

        assert_eq!(quantizer.kind(), QuantizerKind::Gumbel);
        assert_eq!(quantizer.codebook_size(), 8);
        assert_eq!(quantizer.embedding_dim(), 4);
    }

    #[test]
    fn zero_codebook_is_rejected() {
        let config = QuantizerConfig::new().with_codebook_size(0);

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
