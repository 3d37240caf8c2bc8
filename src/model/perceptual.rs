use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{LeakyRelu, LeakyReluConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};

use crate::error::{Error, Result};

/// Frozen multi-scale feature distance used as the perceptual loss.
#[derive(Config, Debug)]
pub struct FeatureDistanceConfig {
    pub channels: usize,
    #[config(default = "vec![32, 64, 128]")]
    pub widths: Vec<usize>,
}

impl FeatureDistanceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.widths.is_empty() || self.widths.contains(&0) {
            return Err(Error::config("feature widths must be non-empty and positive"));
        }

        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> FeatureDistance<B> {
        let mut channels = self.channels;
        let mut stages = Vec::with_capacity(self.widths.len());

        for (index, width) in self.widths.iter().enumerate() {
            let stride = if index == 0 { 1 } else { 2 };

            stages.push(
                Conv2dConfig::new([channels, *width], [3, 3])
                    .with_stride([stride, stride])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device),
            );
            channels = *width;
        }

        let distance = FeatureDistance {
            stages,
            activation: LeakyReluConfig::new().with_negative_slope(0.2).init(),
        };

        distance.no_grad()
    }
}

/// Distance between multi-scale features of a frozen conv stack.
///
/// The weights are random at init and never trained, so this is not an LPIPS equivalent.
#[derive(Module, Debug)]
pub struct FeatureDistance<B: Backend> {
    stages: Vec<Conv2d<B>>,
    activation: LeakyRelu,
}

fn unit_normalize<B: Backend>(features: Tensor<B, 4>) -> Tensor<B, 4> {
    let norm = features.clone().powi_scalar(2).sum_dim(1).sqrt();
    features / (norm + 1e-10)
}

impl<B: Backend> FeatureDistance<B> {
    /// Per-sample distance between two image batches, shape `B`.
    pub fn forward(&self, images: Tensor<B, 4>, reconstructions: Tensor<B, 4>) -> Tensor<B, 1> {
        let [batch, ..] = images.dims();
        let device = images.device();

        let mut x = images;
        let mut y = reconstructions;
        let mut distance = Tensor::zeros([batch], &device);

        for stage in self.stages.iter() {
            x = self.activation.forward(stage.forward(x));
            y = self.activation.forward(stage.forward(y));

            let [_, _, height, width] = x.dims();
            let diff = (unit_normalize(x.clone()) - unit_normalize(y.clone())).powi_scalar(2);

            // diff : B x 1 x H x W after the channel sum
            let per_sample = diff
                .sum_dim(1)
                .reshape([batch, height * width])
                .mean_dim(1)
                .reshape([batch]);

            distance = distance + per_sample;
        }

        distance
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};
    use burn::module::{ModuleVisitor, Param};
    use burn::tensor::{Distribution, TensorData};

    use super::*;

    type TestAutodiff = Autodiff<NdArray>;

    struct RequiresGrad {
        count: usize,
    }

    impl<B: Backend> ModuleVisitor<B> for RequiresGrad {
        fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
            if param.is_require_grad() {
                self.count += 1;
            }
        }
    }

    #[test]
    fn identical_images_have_zero_distance() {
        let device = NdArrayDevice::Cpu;
        let distance = FeatureDistanceConfig::new(3).with_widths(vec![4, 8]).init::<NdArray>(&device);
        let images = Tensor::<NdArray, 4>::random([2, 3, 8, 8], Distribution::Default, &device);

        distance
            .forward(images.clone(), images)
            .to_data()
            .assert_eq(&TensorData::from([0.0f32, 0.0]), false);
    }

    #[test]
    fn distance_is_per_sample_and_non_negative() {
        let device = NdArrayDevice::Cpu;
        let distance = FeatureDistanceConfig::new(1).with_widths(vec![4, 4]).init::<NdArray>(&device);
        let images = Tensor::<NdArray, 4>::random([3, 1, 8, 8], Distribution::Default, &device);
        let other = Tensor::<NdArray, 4>::random([3, 1, 8, 8], Distribution::Default, &device);

        let values = distance.forward(images, other);

        assert_eq!(values.dims(), [3]);
        assert!(values.to_data().iter::<f32>().all(|value| value >= 0.0));
    }

    #[test]
    fn weights_are_frozen_but_inputs_get_gradients() {
        let device = NdArrayDevice::Cpu;
        let distance = FeatureDistanceConfig::new(1).with_widths(vec![4]).init::<TestAutodiff>(&device);

        let mut visitor = RequiresGrad { count: 0 };
        distance.visit(&mut visitor);
        assert_eq!(visitor.count, 0);

        let images = Tensor::<TestAutodiff, 4>::random([1, 1, 4, 4], Distribution::Default, &device);
        let other = Tensor::<TestAutodiff, 4>::random([1, 1, 4, 4], Distribution::Default, &device)
            .require_grad();

        let grads = distance.forward(images, other.clone()).sum().backward();

        assert!(other.grad(&grads).is_some());
    }
}
