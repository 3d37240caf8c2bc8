use burn::config::Config;
use burn::prelude::{Backend, Tensor};
use burn::tensor::ops::PadMode;
use rand::Rng;

use crate::error::{Error, Result};

/// Differentiable "color,translation" augmentation shared by real and fake discriminator inputs.
#[derive(Config, Debug)]
pub struct DiffAugmentConfig {
    #[config(default = true)]
    pub color: bool,
    #[config(default = true)]
    pub translation: bool,
    /// Largest shift as a fraction of the image side.
    #[config(default = 0.125)]
    pub translation_ratio: f32,
}

/// Random factors for one batch, reusable across several passes over the same images.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentDraw {
    pub brightness: Vec<f32>,
    pub saturation: Vec<f32>,
    pub contrast: Vec<f32>,
    /// (rows, cols) shift per sample.
    pub shifts: Vec<(i64, i64)>,
    pub max_shift: usize,
}

impl DiffAugmentConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=0.5).contains(&self.translation_ratio) {
            return Err(Error::config(format!(
                "translation ratio {} is outside [0, 0.5]",
                self.translation_ratio
            )));
        }

        Ok(())
    }

    pub fn draw<R: Rng>(&self, [batch, _, height, width]: [usize; 4], rng: &mut R) -> AugmentDraw {
        let side = height.min(width);
        let max_shift = if self.translation {
            (side as f32 * self.translation_ratio + 0.5) as usize
        } else {
            0
        };
        let bound = max_shift as i64;

        let mut uniform = |offset: f32| -> Vec<f32> {
            (0..batch).map(|_| rng.gen::<f32>() + offset).collect()
        };

        let (brightness, saturation, contrast) = if self.color {
            let brightness = uniform(-0.5);
            let saturation = uniform(0.0).into_iter().map(|value| value * 2.0).collect();
            let contrast = uniform(0.5);
            (brightness, saturation, contrast)
        } else {
            (vec![0.0; batch], vec![1.0; batch], vec![1.0; batch])
        };

        let shifts = (0..batch)
            .map(|_| (rng.gen_range(-bound..=bound), rng.gen_range(-bound..=bound)))
            .collect();

        AugmentDraw {
            brightness,
            saturation,
            contrast,
            shifts,
            max_shift,
        }
    }
}

fn per_sample<B: Backend>(values: &[f32], device: &B::Device) -> Tensor<B, 4> {
    Tensor::<B, 1>::from_floats(values, device).reshape([values.len(), 1, 1, 1])
}

impl AugmentDraw {
    pub fn apply<B: Backend>(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let device = images.device();

        let x = images + per_sample(&self.brightness, &device);

        let mean = x.clone().mean_dim(1);
        let x = (x - mean.clone()) * per_sample(&self.saturation, &device) + mean;

        let mean = x.clone().mean_dim(1).mean_dim(2).mean_dim(3);
        let x = (x - mean.clone()) * per_sample(&self.contrast, &device) + mean;

        self.translate(x)
    }

    /// Shifts each sample by its draw, filling vacated pixels with zeros.
    fn translate<B: Backend>(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        if self.max_shift == 0 {
            return images;
        }

        let [batch, _, height, width] = images.dims();
        let pad = self.max_shift;
        let padded = images.pad((pad, pad, pad, pad), PadMode::Constant(0.0));

        let samples = (0..batch)
            .map(|index| {
                let (rows, cols) = self.shifts[index];
                let top = (pad as i64 - rows) as usize;
                let left = (pad as i64 - cols) as usize;

                padded
                    .clone()
                    .narrow(0, index, 1)
                    .narrow(2, top, height)
                    .narrow(3, left, width)
            })
            .collect();

        Tensor::cat(samples, 0)
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::{Distribution, TensorData, Tolerance};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    type TestAutodiff = Autodiff<NdArray>;

    fn translation_only(shifts: Vec<(i64, i64)>, max_shift: usize) -> AugmentDraw {
        let batch = shifts.len();
        AugmentDraw {
            brightness: vec![0.0; batch],
            saturation: vec![1.0; batch],
            contrast: vec![1.0; batch],
            shifts,
            max_shift,
        }
    }

    #[test]
    fn draws_are_bounded() {
        let config = DiffAugmentConfig::new();
        let mut rng = StdRng::seed_from_u64(0);

        let draw = config.draw([16, 3, 32, 32], &mut rng);

        assert_eq!(draw.max_shift, 4);
        assert!(draw.shifts.iter().all(|(r, c)| r.abs() <= 4 && c.abs() <= 4));
        assert!(draw.brightness.iter().all(|b| (-0.5..0.5).contains(b)));
        assert!(draw.saturation.iter().all(|s| (0.0..2.0).contains(s)));
        assert!(draw.contrast.iter().all(|c| (0.5..1.5).contains(c)));
    }

    #[test]
    fn same_seed_same_draw() {
        let config = DiffAugmentConfig::new();

        let a = config.draw([4, 3, 16, 16], &mut StdRng::seed_from_u64(9));
        let b = config.draw([4, 3, 16, 16], &mut StdRng::seed_from_u64(9));

        assert_eq!(a, b);
    }

    #[test]
    fn translation_shifts_with_zero_fill() {
        let device = NdArrayDevice::Cpu;
        let images = Tensor::<NdArray, 4>::from_floats(
            [[[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]]],
            &device,
        );

        let shifted = translation_only(vec![(1, -1)], 1).apply(images);

        shifted.to_data().assert_approx_eq::<f32>(
            &TensorData::from([[[[0.0f32, 0.0, 0.0], [2.0, 3.0, 0.0], [5.0, 6.0, 0.0]]]]),
            Tolerance::default(),
        );
    }

    #[test]
    fn identity_draw_keeps_images() {
        let device = NdArrayDevice::Cpu;
        let images = Tensor::<NdArray, 4>::random([2, 3, 4, 4], Distribution::Default, &device);

        let output = translation_only(vec![(0, 0), (0, 0)], 1).apply(images.clone());

        output
            .to_data()
            .assert_approx_eq::<f32>(&images.to_data(), Tolerance::default());
    }

    #[test]
    fn augmentation_is_differentiable() {
        let device = NdArrayDevice::Cpu;
        let config = DiffAugmentConfig::new();
        let draw = config.draw([2, 3, 8, 8], &mut StdRng::seed_from_u64(1));
        let images = Tensor::<TestAutodiff, 4>::random([2, 3, 8, 8], Distribution::Default, &device)
            .require_grad();

        let grads = draw.apply(images.clone()).sum().backward();

        assert_eq!(images.grad(&grads).unwrap().dims(), [2, 3, 8, 8]);
    }
}
