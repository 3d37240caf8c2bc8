use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::conv::Conv2d;
use burn::prelude::{Backend, Tensor};

use crate::error::Result;
use crate::model::blocks::{conv3x3, normalize, validate_stack, AttnBlock, Block, ResBlock, Upsample};

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    /// Width of the quantized map.
    pub in_channels: usize,
    pub nf: usize,
    pub out_channels: usize,
    pub ch_mult: Vec<usize>,
    pub res_blocks: usize,
    pub resolution: usize,
    pub attn_resolutions: Vec<usize>,
    #[config(default = 32)]
    pub norm_groups: usize,
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        validate_stack(self.nf, &self.ch_mult, self.norm_groups)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let groups = self.norm_groups;
        let levels = self.ch_mult.len();

        let mut channels = self.nf * self.ch_mult.last().copied().unwrap_or(1);
        let mut resolution = self.resolution >> levels.saturating_sub(1);

        let mut trunk = vec![
            Block::Conv(conv3x3(self.in_channels, channels, device)),
            Block::Res(ResBlock::new(groups, channels, channels, device)),
            Block::Attn(AttnBlock::new(groups, channels, device)),
            Block::Res(ResBlock::new(groups, channels, channels, device)),
        ];

        for level in (0..levels).rev() {
            let channels_out = self.nf * self.ch_mult[level];

            for _ in 0..self.res_blocks {
                trunk.push(Block::Res(ResBlock::new(groups, channels, channels_out, device)));
                channels = channels_out;

                if self.attn_resolutions.contains(&resolution) {
                    trunk.push(Block::Attn(AttnBlock::new(groups, channels, device)));
                }
            }

            if level != 0 {
                trunk.push(Block::Up(Upsample::new(channels, device)));
                resolution *= 2;
            }
        }

        trunk.push(Block::Norm(normalize(groups, channels, device)));

        Generator {
            trunk,
            head: conv3x3(channels, self.out_channels, device),
        }
    }
}

/// Decoder split before its final convolution.
///
/// The head is the layer at which reconstruction and adversarial gradients are balanced,
/// so callers can replay it on a detached trunk output.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    trunk: Vec<Block<B>>,
    head: Conv2d<B>,
}

impl<B: Backend> Generator<B> {
    pub fn forward(&self, quantized: Tensor<B, 4>) -> Tensor<B, 4> {
        let hidden = self.forward_trunk(quantized);
        self.forward_head(hidden)
    }

    pub fn forward_trunk(&self, quantized: Tensor<B, 4>) -> Tensor<B, 4> {
        self.trunk
            .iter()
            .fold(quantized, |x, block| block.forward(x))
    }

    pub fn forward_head(&self, hidden: Tensor<B, 4>) -> Tensor<B, 4> {
        self.head.forward(hidden)
    }

    pub fn last_layer_weight(&self) -> &Param<Tensor<B, 4>> {
        &self.head.weight
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tolerance};

    use super::*;

    #[test]
    fn decodes_to_image_resolution() {
        let device = NdArrayDevice::Cpu;
        let config = GeneratorConfig::new(16, 8, 3, vec![1, 2], 1, 16, vec![8]).with_norm_groups(4);
        let generator = config.init::<NdArray>(&device);
        let latents = Tensor::<NdArray, 4>::random([2, 16, 8, 8], Distribution::Default, &device);

        let images = generator.forward(latents);

        assert_eq!(images.dims(), [2, 3, 16, 16]);
        assert_eq!(generator.last_layer_weight().dims(), [3, 8, 3, 3]);
    }

    #[test]
    fn trunk_then_head_is_forward() {
        let device = NdArrayDevice::Cpu;
        let config = GeneratorConfig::new(4, 4, 1, vec![1], 1, 4, vec![]).with_norm_groups(2);
        let generator = config.init::<NdArray>(&device);
        let latents = Tensor::<NdArray, 4>::random([1, 4, 4, 4], Distribution::Default, &device);

        let split = generator.forward_head(generator.forward_trunk(latents.clone()));

        split
            .to_data()
            .assert_approx_eq::<f32>(&generator.forward(latents).to_data(), Tolerance::default());
    }
}
