use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};

use crate::error::Result;
use crate::model::blocks::{conv3x3, normalize, validate_stack, AttnBlock, Block, Downsample, ResBlock};

#[derive(Config, Debug)]
pub struct EncoderConfig {
    pub in_channels: usize,
    pub nf: usize,
    /// Width of the latent map, the codebook embedding dim.
    pub out_channels: usize,
    pub ch_mult: Vec<usize>,
    pub res_blocks: usize,
    pub resolution: usize,
    pub attn_resolutions: Vec<usize>,
    #[config(default = 32)]
    pub norm_groups: usize,
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        validate_stack(self.nf, &self.ch_mult, self.norm_groups)
    }

    /// Side of the latent map.
    pub fn latent_resolution(&self) -> usize {
        self.resolution >> self.ch_mult.len().saturating_sub(1)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        let groups = self.norm_groups;
        let levels = self.ch_mult.len();

        let mut blocks = vec![Block::Conv(conv3x3(self.in_channels, self.nf, device))];
        let mut channels = self.nf;
        let mut resolution = self.resolution;

        for (level, mult) in self.ch_mult.iter().enumerate() {
            let channels_out = self.nf * mult;

            for _ in 0..self.res_blocks {
                blocks.push(Block::Res(ResBlock::new(groups, channels, channels_out, device)));
                channels = channels_out;

                if self.attn_resolutions.contains(&resolution) {
                    blocks.push(Block::Attn(AttnBlock::new(groups, channels, device)));
                }
            }

            if level + 1 != levels {
                blocks.push(Block::Down(Downsample::new(channels, device)));
                resolution /= 2;
            }
        }

        // non-local block
        blocks.push(Block::Res(ResBlock::new(groups, channels, channels, device)));
        blocks.push(Block::Attn(AttnBlock::new(groups, channels, device)));
        blocks.push(Block::Res(ResBlock::new(groups, channels, channels, device)));

        blocks.push(Block::Norm(normalize(groups, channels, device)));
        blocks.push(Block::Conv(conv3x3(channels, self.out_channels, device)));

        Encoder { blocks }
    }
}

#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    blocks: Vec<Block<B>>,
}

impl<B: Backend> Encoder<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(images, |x, block| block.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    use super::*;

    #[test]
    fn encodes_to_latent_resolution() {
        let device = NdArrayDevice::Cpu;
        let config = EncoderConfig::new(3, 8, 16, vec![1, 2], 1, 16, vec![8]).with_norm_groups(4);
        let encoder = config.init::<NdArray>(&device);
        let images = Tensor::<NdArray, 4>::random([2, 3, 16, 16], Distribution::Default, &device);

        let latents = encoder.forward(images);

        assert_eq!(config.latent_resolution(), 8);
        assert_eq!(latents.dims(), [2, 16, 8, 8]);
    }
}
