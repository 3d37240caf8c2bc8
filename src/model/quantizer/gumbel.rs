use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Embedding, EmbeddingConfig, Initializer};
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::activation::softmax;
use burn::tensor::{Distribution, IndexingUpdateOp};

use crate::error::Result;
use crate::model::quantizer::{
    check_channels, inspect, lookup, perplexity, NonFinitePolicy, QuantizeContext, Quantizer,
    QuantizerOutput, QuantizerStats,
};
use crate::ops::straight_through;

fn sample_gumbel<B: Backend>(shape: [usize; 2], device: &B::Device) -> Tensor<B, 2> {
    let eps = 1e-20;
    let tensor = Tensor::random(shape, Distribution::Default, device);

    -Tensor::log(-Tensor::log(tensor + eps) + eps)
}

fn gumbel_softmax_sample<B: Backend>(logits: Tensor<B, 2>, temperature: f32) -> Tensor<B, 2> {
    let noise = sample_gumbel(logits.dims(), &logits.device());

    let y = logits + noise;
    softmax(y / temperature, 1)
}

fn hard_one_hot<B: Backend>(probs: Tensor<B, 2>) -> Tensor<B, 2> {
    let [positions, classes] = probs.dims();
    let device = probs.device();

    Tensor::zeros([positions, classes], &device).scatter(
        1,
        probs.argmax(1),
        Tensor::ones([positions, 1], &device),
        IndexingUpdateOp::Add,
    )
}

/// Samples `N x K` relaxed one-hot vectors along dim 1.
///
/// With `hard`, the forward value is exactly one-hot and gradients follow the soft sample.
pub fn gumbel_softmax<B: Backend>(logits: Tensor<B, 2>, temperature: f32, hard: bool) -> Tensor<B, 2> {
    let y = gumbel_softmax_sample(logits, temperature);

    if !hard {
        return y;
    }

    let y_hard = hard_one_hot(y.clone());

    straight_through(y, y_hard)
}

#[derive(Config, Debug)]
pub struct GumbelQuantizerConfig {
    pub codebook_size: usize,
    pub embedding_dim: usize,
    #[config(default = 5e-4)]
    pub kl_weight: f32,
    #[config(default = false)]
    pub straight_through: bool,
    #[config(default = "NonFinitePolicy::Abort")]
    pub non_finite: NonFinitePolicy,
}

impl GumbelQuantizerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> GumbelQuantizer<B> {
        let bound = 1.0 / self.codebook_size as f64;

        GumbelQuantizer {
            projection: Conv2dConfig::new([self.embedding_dim, self.codebook_size], [1, 1])
                .init(device),
            embedding: EmbeddingConfig::new(self.codebook_size, self.embedding_dim)
                .with_initializer(Initializer::Uniform {
                    min: -bound,
                    max: bound,
                })
                .init(device),
            kl_weight: self.kl_weight,
            straight_through: self.straight_through,
            non_finite: Ignored(self.non_finite),
        }
    }
}

#[derive(Module, Debug)]
pub struct GumbelQuantizer<B: Backend> {
    pub projection: Conv2d<B>,
    pub embedding: Embedding<B>,
    kl_weight: f32,
    straight_through: bool,
    non_finite: Ignored<NonFinitePolicy>,
}

impl<B: Backend> GumbelQuantizer<B> {
    fn kl_to_uniform(&self, logits: Tensor<B, 2>) -> Tensor<B, 1> {
        let codebook_size = self.codebook_size() as f32;

        let qy = softmax(logits, 1);
        let kl = (qy.clone() * (qy * codebook_size + 1e-10).log()).sum_dim(1);

        kl.mean() * self.kl_weight
    }
}

impl<B: Backend> Quantizer<B> for GumbelQuantizer<B> {
    fn quantize(&self, latents: Tensor<B, 4>, context: QuantizeContext) -> Result<QuantizerOutput<B>> {
        let [batch, _, height, width] = latents.dims();
        let policy = *self.non_finite;
        let step = context.step;

        check_channels(latents.dims(), self.embedding_dim())?;

        let logits = self.projection.forward(latents);
        inspect(&logits, "logits", step, policy)?;

        // logits : (B·H·W) x K
        let logits = logits
            .permute([0, 2, 3, 1])
            .reshape([batch * height * width, self.codebook_size()]);
        let codebook = self.embedding.weight.val();

        let (sample, quantized) = if context.training {
            let sample = gumbel_softmax(logits.clone(), context.temperature, self.straight_through);
            inspect(&sample, "relaxed_sample", step, policy)?;

            let quantized = sample
                .clone()
                .matmul(codebook)
                .reshape([batch, height, width, self.embedding_dim()])
                .permute([0, 3, 1, 2]);

            (sample, quantized)
        } else {
            let sample = hard_one_hot(logits.clone());
            inspect(&sample, "relaxed_sample", step, policy)?;

            let indices = sample.clone().argmax(1).reshape([batch, height * width]);
            let quantized = lookup(codebook, indices, [height, width])?;

            (sample, quantized)
        };
        inspect(&quantized, "quantized", step, policy)?;

        let loss = self.kl_to_uniform(logits);
        inspect(&loss, "kl", step, policy)?;

        let indices = sample.argmax(1).reshape([batch * height * width]);

        let stats = QuantizerStats {
            perplexity: perplexity(indices.clone(), self.codebook_size()),
            mean_distance: None,
            temperature: context.training.then_some(context.temperature),
            indices: indices.reshape([batch, height * width]),
        };

        Ok(QuantizerOutput {
            quantized,
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

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};
    use burn::module::Param;
    use burn::prelude::ElementConversion;
    use burn::tensor::{TensorData, Tolerance};

    use super::*;
    use crate::error::Error;

    type TestAutodiff = Autodiff<NdArray>;

    #[test]
    fn hard_sample_is_one_hot_with_soft_gradient() {
        let device = NdArrayDevice::Cpu;
        <TestAutodiff as Backend>::seed(&device, 5);
        let logits = Tensor::<TestAutodiff, 2>::random([6, 5], Distribution::Normal(0.0, 1.0), &device)
            .require_grad();

        let sample = gumbel_softmax(logits.clone(), 0.5, true);

        let rows = sample.clone().sum_dim(1);
        rows.to_data()
            .assert_eq(&TensorData::from([[1.0f32]; 6]), false);
        let ones = sample.clone().equal_elem(1.0).int().sum().into_scalar().elem::<i64>();
        assert_eq!(ones, 6);

        let weights = Tensor::<TestAutodiff, 2>::random([6, 5], Distribution::Default, &device);
        let grads = (sample * weights).sum().backward();
        let grad = logits.grad(&grads).unwrap();

        assert!(grad.abs().sum().into_scalar().elem::<f32>() > 0.0);
    }

    #[test]
    fn soft_sample_is_a_distribution() {
        let device = NdArrayDevice::Cpu;
        <NdArray as Backend>::seed(&device, 9);
        let logits = Tensor::<NdArray, 2>::random([4, 7], Distribution::Normal(0.0, 1.0), &device);

        let sample = gumbel_softmax(logits, 1.0, false);

        sample
            .sum_dim(1)
            .to_data()
            .assert_approx_eq::<f32>(&TensorData::from([[1.0f32]; 4]), Tolerance::absolute(1e-5));
    }

    #[test]
    fn inference_picks_single_codebook_rows() {
        let device = NdArrayDevice::Cpu;
        <NdArray as Backend>::seed(&device, 13);
        let quantizer = GumbelQuantizerConfig::new(12, 6).init::<NdArray>(&device);
        let latents = Tensor::<NdArray, 4>::random([2, 6, 3, 3], Distribution::Normal(0.0, 1.0), &device);

        let output = quantizer
            .quantize(latents, QuantizeContext::inference(0))
            .unwrap();
        let rebuilt = quantizer
            .codebook_entry(output.stats.indices.clone(), [3, 3])
            .unwrap();

        rebuilt
            .to_data()
            .assert_eq(&output.quantized.to_data(), true);
        assert_eq!(output.stats.temperature, None);
    }

    #[test]
    fn training_reports_temperature_and_indices() {
        let device = NdArrayDevice::Cpu;
        <NdArray as Backend>::seed(&device, 17);
        let quantizer = GumbelQuantizerConfig::new(128, 64)
            .with_straight_through(true)
            .init::<NdArray>(&device);
        let latents = Tensor::<NdArray, 4>::random([2, 64, 8, 8], Distribution::Normal(0.0, 1.0), &device);

        let output = quantizer
            .quantize(latents, QuantizeContext::training(40_000, 0.75))
            .unwrap();

        assert_eq!(output.quantized.dims(), [2, 64, 8, 8]);
        assert_eq!(output.stats.indices.dims(), [2, 64]);
        assert_eq!(output.stats.temperature, Some(0.75));
        assert!((1.0..=128.0).contains(&output.stats.perplexity));

        let indices = output.stats.indices.to_data();
        assert!(indices.iter::<i64>().all(|index| (0..128).contains(&index)));
    }

    #[test]
    fn single_entry_codebook_quantizes_to_that_entry() {
        let device = NdArrayDevice::Cpu;
        let quantizer = GumbelQuantizerConfig::new(1, 3).init::<NdArray>(&device);
        let latents = Tensor::<NdArray, 4>::random([2, 3, 2, 2], Distribution::Normal(0.0, 1.0), &device);

        let output = quantizer
            .quantize(latents, QuantizeContext::inference(0))
            .unwrap();

        assert!(output.stats.indices.to_data().iter::<i64>().all(|index| index == 0));
        assert!((output.stats.perplexity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn kl_vanishes_for_uniform_logits() {
        let device = NdArrayDevice::Cpu;
        let mut quantizer = GumbelQuantizerConfig::new(4, 2).init::<NdArray>(&device);
        quantizer.projection.weight = Param::from_tensor(Tensor::zeros([4, 2, 1, 1], &device));
        quantizer.projection.bias = Some(Param::from_tensor(Tensor::zeros([4], &device)));
        let latents = Tensor::<NdArray, 4>::ones([1, 2, 2, 2], &device);

        let output = quantizer
            .quantize(latents, QuantizeContext::inference(0))
            .unwrap();

        output
            .loss
            .to_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.0f32]), Tolerance::absolute(1e-7));
    }

    #[test]
    fn zero_temperature_is_reported_as_relaxed_sample() {
        let device = NdArrayDevice::Cpu;
        let quantizer = GumbelQuantizerConfig::new(8, 4).init::<NdArray>(&device);
        let latents = Tensor::<NdArray, 4>::ones([1, 4, 2, 2], &device);

        let result = quantizer.quantize(latents, QuantizeContext::training(77, 0.0));

        assert!(matches!(
            result,
            Err(Error::NonFinite { step: 77, tensor: "relaxed_sample" })
        ));
    }

    #[test]
    fn nan_input_is_reported_as_logits() {
        let device = NdArrayDevice::Cpu;
        let quantizer = GumbelQuantizerConfig::new(8, 2).init::<NdArray>(&device);
        let latents = Tensor::<NdArray, 4>::from_floats([[[[f32::NAN]], [[0.0]]]], &device);

        let result = quantizer.quantize(latents, QuantizeContext::training(3, 1.0));

        assert!(matches!(
            result,
            Err(Error::NonFinite { step: 3, tensor: "logits" })
        ));
    }

    #[test]
    fn warn_policy_continues_past_non_finite_values() {
        let device = NdArrayDevice::Cpu;
        let quantizer = GumbelQuantizerConfig::new(8, 2)
            .with_non_finite(NonFinitePolicy::Warn)
            .init::<NdArray>(&device);
        let latents = Tensor::<NdArray, 4>::from_floats([[[[f32::NAN]], [[0.0]]]], &device);

        assert!(quantizer
            .quantize(latents, QuantizeContext::training(3, 1.0))
            .is_ok());
    }

    #[test]
    fn rejects_channel_mismatch() {
        let device = NdArrayDevice::Cpu;
        let quantizer = GumbelQuantizerConfig::new(8, 4).init::<NdArray>(&device);
        let latents = Tensor::<NdArray, 4>::zeros([1, 5, 2, 2], &device);

        let result = quantizer.quantize(latents, QuantizeContext::inference(0));

        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }
}
