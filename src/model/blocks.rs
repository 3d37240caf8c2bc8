use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::interpolate::{Interpolate2d, Interpolate2dConfig, InterpolateMode};
use burn::nn::{GroupNorm, GroupNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::{sigmoid, softmax};
use burn::tensor::ops::PadMode;

use crate::error::{Error, Result};

/// Checks that every stage width `nf * mult` splits into `groups` norm groups.
pub fn validate_stack(nf: usize, ch_mult: &[usize], groups: usize) -> Result<()> {
    if ch_mult.is_empty() {
        return Err(Error::config("channel multipliers must not be empty"));
    }
    if groups == 0 {
        return Err(Error::config("norm groups must be positive"));
    }

    for channels in ch_mult.iter().map(|mult| nf * mult) {
        if channels == 0 || channels % groups != 0 {
            return Err(Error::config(format!(
                "{channels} channels are not divisible into {groups} norm groups"
            )));
        }
    }

    Ok(())
}

pub fn normalize<B: Backend>(groups: usize, channels: usize, device: &B::Device) -> GroupNorm<B> {
    GroupNormConfig::new(groups, channels)
        .with_epsilon(1e-6)
        .init(device)
}

pub fn swish<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone() * sigmoid(x)
}

pub fn conv3x3<B: Backend>(channels_in: usize, channels_out: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([channels_in, channels_out], [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

fn conv1x1<B: Backend>(channels_in: usize, channels_out: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([channels_in, channels_out], [1, 1]).init(device)
}

#[derive(Module, Debug)]
pub struct ResBlock<B: Backend> {
    norm1: GroupNorm<B>,
    conv1: Conv2d<B>,
    norm2: GroupNorm<B>,
    conv2: Conv2d<B>,
    shortcut: Option<Conv2d<B>>,
}

impl<B: Backend> ResBlock<B> {
    pub fn new(groups: usize, channels_in: usize, channels_out: usize, device: &B::Device) -> Self {
        Self {
            norm1: normalize(groups, channels_in, device),
            conv1: conv3x3(channels_in, channels_out, device),
            norm2: normalize(groups, channels_out, device),
            conv2: conv3x3(channels_out, channels_out, device),
            shortcut: (channels_in != channels_out).then(|| conv1x1(channels_in, channels_out, device)),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.norm1.forward(input.clone());
        let x = swish(x);
        let x = self.conv1.forward(x);
        let x = self.norm2.forward(x);
        let x = swish(x);
        let x = self.conv2.forward(x);

        let residual = match &self.shortcut {
            Some(conv) => conv.forward(input),
            None => input,
        };

        x + residual
    }
}

/// Single-head self-attention over all spatial positions.
#[derive(Module, Debug)]
pub struct AttnBlock<B: Backend> {
    norm: GroupNorm<B>,
    q: Conv2d<B>,
    k: Conv2d<B>,
    v: Conv2d<B>,
    proj_out: Conv2d<B>,
}

impl<B: Backend> AttnBlock<B> {
    pub fn new(groups: usize, channels: usize, device: &B::Device) -> Self {
        Self {
            norm: normalize(groups, channels, device),
            q: conv1x1(channels, channels, device),
            k: conv1x1(channels, channels, device),
            v: conv1x1(channels, channels, device),
            proj_out: conv1x1(channels, channels, device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, channels, height, width] = input.dims();
        let positions = height * width;

        let h = self.norm.forward(input.clone());

        // q : B x HW x C, k, v : B x C x HW
        let q = self.q.forward(h.clone()).reshape([batch, channels, positions]).swap_dims(1, 2);
        let k = self.k.forward(h.clone()).reshape([batch, channels, positions]);
        let v = self.v.forward(h).reshape([batch, channels, positions]);

        let weights = q.matmul(k) * (channels as f32).powf(-0.5);
        let weights = softmax(weights, 2);

        // out[b, c, i] = sum_j v[b, c, j] w[b, i, j]
        let h = v.matmul(weights.swap_dims(1, 2));
        let h = h.reshape([batch, channels, height, width]);

        input + self.proj_out.forward(h)
    }
}

#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
}

impl<B: Backend> Downsample<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([channels, channels], [3, 3])
                .with_stride([2, 2])
                .init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        // pad right and bottom only
        let x = x.pad((0, 1, 0, 1), PadMode::Constant(0.0));
        self.conv.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Upsample<B: Backend> {
    interpolate: Interpolate2d,
    conv: Conv2d<B>,
}

impl<B: Backend> Upsample<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            interpolate: Interpolate2dConfig::new()
                .with_scale_factor(Some([2.0, 2.0]))
                .with_mode(InterpolateMode::Nearest)
                .init(),
            conv: conv3x3(channels, channels, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.interpolate.forward(x);
        self.conv.forward(x)
    }
}

/// One stage of an encoder or generator stack.
#[derive(Module, Debug)]
pub enum Block<B: Backend> {
    Conv(Conv2d<B>),
    Res(ResBlock<B>),
    Attn(AttnBlock<B>),
    Down(Downsample<B>),
    Up(Upsample<B>),
    Norm(GroupNorm<B>),
}

impl<B: Backend> Block<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Conv(conv) => conv.forward(x),
            Self::Res(block) => block.forward(x),
            Self::Attn(block) => block.forward(x),
            Self::Down(block) => block.forward(x),
            Self::Up(block) => block.forward(x),
            Self::Norm(norm) => norm.forward(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    use super::*;

    #[test]
    fn stack_validation() {
        assert!(validate_stack(64, &[1, 2, 4], 32).is_ok());
        assert!(matches!(validate_stack(64, &[], 32), Err(Error::Config(_))));
        assert!(matches!(validate_stack(48, &[1, 2], 32), Err(Error::Config(_))));
    }

    #[test]
    fn res_block_changes_channels() {
        let device = NdArrayDevice::Cpu;
        let block = ResBlock::<NdArray>::new(4, 8, 16, &device);
        let x = Tensor::<NdArray, 4>::random([2, 8, 5, 5], Distribution::Default, &device);

        assert_eq!(block.forward(x).dims(), [2, 16, 5, 5]);
    }

    #[test]
    fn attention_keeps_shape() {
        let device = NdArrayDevice::Cpu;
        let block = AttnBlock::<NdArray>::new(4, 8, &device);
        let x = Tensor::<NdArray, 4>::random([1, 8, 3, 4], Distribution::Default, &device);

        assert_eq!(block.forward(x).dims(), [1, 8, 3, 4]);
    }

    #[test]
    fn down_and_up_sampling_halve_and_double() {
        let device = NdArrayDevice::Cpu;
        let down = Downsample::<NdArray>::new(4, &device);
        let up = Upsample::<NdArray>::new(4, &device);
        let x = Tensor::<NdArray, 4>::random([1, 4, 16, 16], Distribution::Default, &device);

        let x = down.forward(x);
        assert_eq!(x.dims(), [1, 4, 8, 8]);

        let x = up.forward(x);
        assert_eq!(x.dims(), [1, 4, 16, 16]);
    }
}
