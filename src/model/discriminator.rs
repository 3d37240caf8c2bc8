use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, LeakyRelu, LeakyReluConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::relu;
use burn::tensor::Distribution;

use crate::error::{Error, Result};

/// `0.5 * (mean(relu(1 - real)) + mean(relu(1 + fake)))`
pub fn hinge_d_loss<B: Backend>(logits_real: Tensor<B, 4>, logits_fake: Tensor<B, 4>) -> Tensor<B, 1> {
    let loss_real = relu(logits_real.neg() + 1.0).mean();
    let loss_fake = relu(logits_fake + 1.0).mean();

    (loss_real + loss_fake) * 0.5
}

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    pub channels: usize,
    #[config(default = 64)]
    pub ndf: usize,
    #[config(default = 3)]
    pub layers: usize,
}

fn conv4x4<B: Backend>(
    channels: [usize; 2],
    stride: usize,
    bias: bool,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, [4, 4])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(bias)
        .with_initializer(Initializer::Normal {
            mean: 0.0,
            std: 0.02,
        })
        .init(device)
}

fn batch_norm<B: Backend>(features: usize, device: &B::Device) -> BatchNorm<B> {
    let mut norm = BatchNormConfig::new(features).init(device);
    norm.gamma = Param::from_tensor(Tensor::random(
        [features],
        Distribution::Normal(1.0, 0.02),
        device,
    ));
    norm
}

impl DiscriminatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.layers == 0 || self.ndf == 0 {
            return Err(Error::config("discriminator needs at least one layer and filter"));
        }

        Ok(())
    }

    /// Side of the logit map for a square input of side `resolution`.
    pub fn output_resolution(&self, resolution: usize) -> usize {
        let strided = (0..self.layers).fold(resolution, |side, _| side / 2);

        // two stride-1 4x4 convolutions with padding 1
        strided.saturating_sub(2)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let ndf = self.ndf;
        let mut mult = 1;
        let mut layers = Vec::with_capacity(self.layers);

        for n in 1..self.layers {
            let mult_prev = mult;
            mult = usize::min(1 << n, 8);

            layers.push(DiscriminatorLayer {
                conv: conv4x4([ndf * mult_prev, ndf * mult], 2, false, device),
                norm: batch_norm(ndf * mult, device),
            });
        }

        let mult_prev = mult;
        mult = usize::min(1 << self.layers, 8);

        layers.push(DiscriminatorLayer {
            conv: conv4x4([ndf * mult_prev, ndf * mult], 1, false, device),
            norm: batch_norm(ndf * mult, device),
        });

        Discriminator {
            input: conv4x4([self.channels, ndf], 2, true, device),
            layers,
            output: conv4x4([ndf * mult, 1], 1, true, device),
            activation: LeakyReluConfig::new().with_negative_slope(0.2).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct DiscriminatorLayer<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B>,
}

/// PatchGAN discriminator producing one logit per receptive field.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    input: Conv2d<B>,
    layers: Vec<DiscriminatorLayer<B>>,
    output: Conv2d<B>,
    activation: LeakyRelu,
}

impl<B: Backend> Discriminator<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.input.forward(images);
        let x = self.activation.forward(x);

        let x = self.layers.iter().fold(x, |x, layer| {
            let x = layer.conv.forward(x);
            let x = layer.norm.forward(x);
            self.activation.forward(x)
        });

        self.output.forward(x)
    }
}
