use burn::config::Config;
use burn::module::Module;
use burn::nn::{Embedding, EmbeddingConfig, Initializer};
use burn::prelude::{Backend, ElementConversion, Int, Tensor};

use crate::error::Result;
use crate::model::quantizer::{
    flatten_positions, lookup, perplexity, QuantizeContext, Quantizer, QuantizerOutput,
    QuantizerStats,
};
use crate::ops::straight_through;

/// Pairwise `|q|² + |e|² - 2 q·e` between `N x D` queries and a `K x D` codebook.
pub fn squared_distances<B: Backend>(queries: Tensor<B, 2>, codebook: Tensor<B, 2>) -> Tensor<B, 2> {
    let [codebook_size, _] = codebook.dims();

    let query_norms = queries.clone().powi_scalar(2).sum_dim(1);
    let code_norms = codebook
        .clone()
        .powi_scalar(2)
        .sum_dim(1)
        .reshape([1, codebook_size]);
    let cross = queries.matmul(codebook.transpose());

    query_norms + code_norms - cross * 2.0
}

#[derive(Config, Debug)]
pub struct NearestQuantizerConfig {
    pub codebook_size: usize,
    pub embedding_dim: usize,
    #[config(default = 0.25)]
    pub beta: f32,
}

impl NearestQuantizerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> NearestQuantizer<B> {
        let bound = 1.0 / self.codebook_size as f64;

        NearestQuantizer {
            embedding: EmbeddingConfig::new(self.codebook_size, self.embedding_dim)
                .with_initializer(Initializer::Uniform {
                    min: -bound,
                    max: bound,
                })
                .init(device),
            beta: self.beta,
        }
    }
}

#[derive(Module, Debug)]
pub struct NearestQuantizer<B: Backend> {
    pub embedding: Embedding<B>,
    beta: f32,
}

impl<B: Backend> Quantizer<B> for NearestQuantizer<B> {
    fn quantize(&self, latents: Tensor<B, 4>, _context: QuantizeContext) -> Result<QuantizerOutput<B>> {
        let [batch, _, height, width] = latents.dims();
        let codebook_size = self.codebook_size();

        let queries = flatten_positions(latents.clone(), self.embedding_dim())?;
        let codebook = self.embedding.weight.val();

        let distances = squared_distances(queries.detach(), codebook.clone().detach());
        let indices = distances.clone().argmin(1).reshape([batch * height * width]);
        let mean_distance = distances.min_dim(1).mean().into_scalar().elem::<f32>();

        let quantized = lookup(
            codebook,
            indices.clone().reshape([batch, height * width]),
            [height, width],
        )?;

        let commitment = (quantized.clone().detach() - latents.clone())
            .powi_scalar(2)
            .mean();
        let codebook_loss = (quantized.clone() - latents.clone().detach())
            .powi_scalar(2)
            .mean();
        let loss = commitment + codebook_loss * self.beta;

        let stats = QuantizerStats {
            perplexity: perplexity(indices.clone(), codebook_size),
            mean_distance: Some(mean_distance),
            temperature: None,
            indices: indices.reshape([batch, height * width]),
        };

        Ok(QuantizerOutput {
            quantized: straight_through(latents, quantized),
            loss,
            stats,
        })
    }

    fn codebook_entry(&self, indices: Tensor<B, 2, Int>, shape: [usize; 2]) -> Result<Tensor<B, 4>> {
        lookup(self.embedding.weight.val(), indices, shape)
    }

    fn codebook_size(&self) -> usize {
        self.embedding.weight.dims()[0]
    }

    fn embedding_dim(&self) -> usize {
        self.embedding.weight.dims()[1]
    }
}
