use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Int, Tensor};

use crate::error::{Error, Result};
use crate::model::encoder::{Encoder, EncoderConfig};
use crate::model::generator::{Generator, GeneratorConfig};
use crate::model::quantizer::{
    QuantizeContext, Quantizer, QuantizerConfig, QuantizerOutput, VectorQuantizer,
};

#[derive(Config, Debug)]
pub struct AutoencoderConfig {
    pub encoder: EncoderConfig,
    pub quantizer: QuantizerConfig,
    pub generator: GeneratorConfig,
}

impl AutoencoderConfig {
    pub fn validate(&self) -> Result<()> {
        self.encoder.validate()?;
        self.quantizer.validate()?;
        self.generator.validate()?;

        let embedding_dim = self.quantizer.embedding_dim;
        if self.encoder.out_channels != embedding_dim || self.generator.in_channels != embedding_dim {
            return Err(Error::config(format!(
                "encoder output {} and generator input {} must match embedding dim {embedding_dim}",
                self.encoder.out_channels, self.generator.in_channels,
            )));
        }

        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> VqAutoEncoder<B> {
        VqAutoEncoder {
            encoder: self.encoder.init(device),
            quantizer: self.quantizer.init(device),
            generator: self.generator.init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct VqAutoEncoder<B: Backend> {
    pub encoder: Encoder<B>,
    pub quantizer: VectorQuantizer<B>,
    pub generator: Generator<B>,
}

pub struct AutoencoderOutput<B: Backend> {
    /// Generator activations right before its final convolution.
    pub hidden: Tensor<B, 4>,
    pub reconstruction: Tensor<B, 4>,
    pub quantizer: QuantizerOutput<B>,
}

impl<B: Backend> VqAutoEncoder<B> {
    pub fn forward(&self, images: Tensor<B, 4>, context: QuantizeContext) -> Result<AutoencoderOutput<B>> {
        let latents = self.encoder.forward(images);
        let quantizer = self.quantizer.quantize(latents, context)?;

        let hidden = self.generator.forward_trunk(quantizer.quantized.clone());
        let reconstruction = self.generator.forward_head(hidden.clone());

        Ok(AutoencoderOutput {
            hidden,
            reconstruction,
            quantizer,
        })
    }

    /// Code indices `B x (H·W)` of a batch, without sampling noise.
    pub fn encode_indices(&self, images: Tensor<B, 4>, step: u64) -> Result<Tensor<B, 2, Int>> {
        let latents = self.encoder.forward(images);
        let output = self.quantizer.quantize(latents, QuantizeContext::inference(step))?;

        Ok(output.stats.indices)
    }

    pub fn decode_indices(&self, indices: Tensor<B, 2, Int>, shape: [usize; 2]) -> Result<Tensor<B, 4>> {
        let quantized = self.quantizer.codebook_entry(indices, shape)?;

        Ok(self.generator.forward(quantized))
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tolerance};

    use super::*;
    use crate::model::quantizer::QuantizerKind;

    fn tiny(kind: QuantizerKind) -> AutoencoderConfig {
        AutoencoderConfig::new(
            EncoderConfig::new(1, 4, 8, vec![1, 2], 1, 8, vec![4]).with_norm_groups(2),
            QuantizerConfig::new()
                .with_kind(kind)
                .with_codebook_size(16)
                .with_embedding_dim(8),
            GeneratorConfig::new(8, 4, 1, vec![1, 2], 1, 8, vec![4]).with_norm_groups(2),
        )
    }

    #[test]
    fn mismatched_embedding_dim_is_a_config_error() {
        let mut config = tiny(QuantizerKind::Nearest);
        config.quantizer.embedding_dim = 6;

        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn reconstructs_input_shape() {
        let device = NdArrayDevice::Cpu;
        let config = tiny(QuantizerKind::Gumbel);
        config.validate().unwrap();
        let model = config.init::<NdArray>(&device);
        let images = Tensor::<NdArray, 4>::random([2, 1, 8, 8], Distribution::Default, &device);

        let output = model
            .forward(images, QuantizeContext::training(0, 1.0))
            .unwrap();

        assert_eq!(output.reconstruction.dims(), [2, 1, 8, 8]);
        assert_eq!(output.quantizer.stats.indices.dims(), [2, 16]);
    }

    #[test]
    fn decoding_indices_matches_inference_forward() {
        let device = NdArrayDevice::Cpu;
        let model = tiny(QuantizerKind::Nearest).init::<NdArray>(&device);
        let images = Tensor::<NdArray, 4>::random([1, 1, 8, 8], Distribution::Default, &device);

        let indices = model.encode_indices(images.clone(), 0).unwrap();
        let decoded = model.decode_indices(indices, [4, 4]).unwrap();
        let output = model.forward(images, QuantizeContext::inference(0)).unwrap();

        decoded
            .to_data()
            .assert_approx_eq::<f32>(&output.reconstruction.to_data(), Tolerance::default());
    }
}
