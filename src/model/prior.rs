use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::attention::generate_autoregressive_mask;
use burn::nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig};
use burn::nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Gelu, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::activation::softmax;
use itertools::Itertools;

use crate::error::{Error, Result};

/// Autoregressive model over the code indices of a trained autoencoder.
#[derive(Config, Debug)]
pub struct LatentPriorConfig {
    pub codebook_size: usize,
    /// Number of latent positions, `H' * W'`.
    pub block_size: usize,
    #[config(default = 256)]
    pub embed_dim: usize,
    #[config(default = 8)]
    pub num_heads: usize,
    #[config(default = 8)]
    pub num_layers: usize,
    #[config(default = 0.0)]
    pub embed_dropout: f64,
    #[config(default = 0.0)]
    pub attention_dropout: f64,
    #[config(default = 0.0)]
    pub residual_dropout: f64,
}

impl LatentPriorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_heads == 0 || self.embed_dim % self.num_heads != 0 {
            return Err(Error::config(format!(
                "embedding width {} is not divisible by {} heads",
                self.embed_dim, self.num_heads
            )));
        }
        if self.codebook_size == 0 || self.block_size == 0 {
            return Err(Error::config("prior needs a non-empty codebook and block"));
        }

        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> LatentPrior<B> {
        let embed_dim = self.embed_dim;

        LatentPrior {
            token_embedding: EmbeddingConfig::new(self.codebook_size, embed_dim).init(device),
            position_embedding: Param::from_tensor(Tensor::zeros([1, self.block_size, embed_dim], device)),
            start_token: Param::from_tensor(Tensor::zeros([1, 1, embed_dim], device)),
            dropout: DropoutConfig::new(self.embed_dropout).init(),
            blocks: (0..self.num_layers).map(|_| self.block(device)).collect_vec(),
            layer_norm: LayerNormConfig::new(embed_dim).init(device),
            head: LinearConfig::new(embed_dim, self.codebook_size).with_bias(false).init(device),
            block_size: self.block_size,
        }
    }

    fn block<B: Backend>(&self, device: &B::Device) -> PriorBlock<B> {
        let embed_dim = self.embed_dim;
        let head_dim = embed_dim / self.num_heads;
        let linear = |d_input, d_output| LinearConfig::new(d_input, d_output).init(device);

        PriorBlock {
            attention_norm: LayerNormConfig::new(embed_dim).init(device),
            attention: CausalSelfAttention {
                num_heads: self.num_heads,
                head_dim,
                scaling: f32::powf(head_dim as f32, -0.5),
                q_proj: linear(embed_dim, embed_dim),
                k_proj: linear(embed_dim, embed_dim),
                v_proj: linear(embed_dim, embed_dim),
                out_proj: linear(embed_dim, embed_dim),
                attention_dropout: DropoutConfig::new(self.attention_dropout).init(),
                output_dropout: DropoutConfig::new(self.residual_dropout).init(),
            },
            feed_forward_norm: LayerNormConfig::new(embed_dim).init(device),
            feed_forward: FeedForward {
                dense: linear(embed_dim, 4 * embed_dim),
                activation: Gelu::new(),
                output_dense: linear(4 * embed_dim, embed_dim),
                dropout: DropoutConfig::new(self.residual_dropout).init(),
            },
        }
    }
}

#[derive(Module, Debug)]
pub struct CausalSelfAttention<B: Backend> {
    num_heads: usize,
    head_dim: usize,
    scaling: f32,
    q_proj: Linear<B>,
    k_proj: Linear<B>,
    v_proj: Linear<B>,
    out_proj: Linear<B>,
    attention_dropout: Dropout,
    output_dropout: Dropout,
}

impl<B: Backend> CausalSelfAttention<B> {
    fn split_heads(&self, tensor: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, time, _] = tensor.dims();
        tensor
            .reshape([batch, time, self.num_heads, self.head_dim])
            .swap_dims(1, 2)
    }

    pub fn forward(&self, hidden: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, time, embed_dim] = hidden.dims();

        let query_states = self.split_heads(self.q_proj.forward(hidden.clone()) * self.scaling);
        let key_states = self.split_heads(self.k_proj.forward(hidden.clone()));
        let value_states = self.split_heads(self.v_proj.forward(hidden));

        // future positions are true
        let mask = generate_autoregressive_mask::<B>(batch, time, &query_states.device())
            .unsqueeze_dim::<4>(1)
            .expand([batch, self.num_heads, time, time]);

        let attention_weights = query_states.matmul(key_states.swap_dims(2, 3));
        let attention_weights = attention_weights.mask_fill(mask, f32::NEG_INFINITY);
        let attention_probs = self.attention_dropout.forward(softmax(attention_weights, 3));

        let attention_output = attention_probs
            .matmul(value_states)
            .swap_dims(1, 2)
            .reshape([batch, time, embed_dim]);

        self.output_dropout.forward(self.out_proj.forward(attention_output))
    }
}

#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    dense: Linear<B>,
    activation: Gelu,
    output_dense: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> FeedForward<B> {
    pub fn forward(&self, hidden: Tensor<B, 3>) -> Tensor<B, 3> {
        let hidden = self.dense.forward(hidden);
        let hidden = self.activation.forward(hidden);
        let hidden = self.output_dense.forward(hidden);
        self.dropout.forward(hidden)
    }
}

#[derive(Module, Debug)]
pub struct PriorBlock<B: Backend> {
    attention_norm: LayerNorm<B>,
    attention: CausalSelfAttention<B>,
    feed_forward_norm: LayerNorm<B>,
    feed_forward: FeedForward<B>,
}

impl<B: Backend> PriorBlock<B> {
    pub fn forward(&self, hidden: Tensor<B, 3>) -> Tensor<B, 3> {
        let hidden = hidden.clone() + self.attention.forward(self.attention_norm.forward(hidden));
        let hidden = hidden.clone() + self.feed_forward.forward(self.feed_forward_norm.forward(hidden));

        hidden
    }
}

#[derive(Module, Debug)]
pub struct LatentPrior<B: Backend> {
    token_embedding: Embedding<B>,
    position_embedding: Param<Tensor<B, 3>>,
    start_token: Param<Tensor<B, 3>>,
    dropout: Dropout,
    blocks: Vec<PriorBlock<B>>,
    layer_norm: LayerNorm<B>,
    head: Linear<B>,
    block_size: usize,
}

impl<B: Backend> LatentPrior<B> {
    /// Next-token logits `B x T x K`; position `t` only sees `ids[..t]`.
    pub fn forward(&self, ids: Tensor<B, 2, Int>) -> Result<Tensor<B, 3>> {
        let [batch, time] = ids.dims();
        if time == 0 || time > self.block_size {
            return Err(Error::shape_mismatch(
                format!("1..={} positions", self.block_size),
                time,
            ));
        }

        let [_, _, embed_dim] = self.start_token.dims();
        let start = self.start_token.val().expand([batch, 1, embed_dim]);

        let hidden = if time > 1 {
            let tokens = self.token_embedding.forward(ids.narrow(1, 0, time - 1));
            Tensor::cat(vec![start, tokens], 1)
        } else {
            start
        };
        let hidden = hidden + self.position_embedding.val().narrow(1, 0, time);
        let hidden = self.dropout.forward(hidden);

        let hidden = self.blocks.iter().fold(hidden, |hidden, block| block.forward(hidden));
        let hidden = self.layer_norm.forward(hidden);

        Ok(self.head.forward(hidden))
    }

    /// Mean next-token cross entropy over every latent position.
    pub fn loss(&self, ids: Tensor<B, 2, Int>) -> Result<Tensor<B, 1>> {
        let logits = self.forward(ids.clone())?;
        let [batch, time, codebook_size] = logits.dims();
        let loss: CrossEntropyLoss<B> = CrossEntropyLossConfig::new().init(&logits.device());

        Ok(loss.forward(
            logits.reshape([batch * time, codebook_size]),
            ids.reshape([batch * time]),
        ))
    }
}
