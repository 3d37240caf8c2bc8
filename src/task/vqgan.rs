use burn::config::Config;
use burn::optim::GradientsParams;
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::{Adaptor, LossInput};
use rand::Rng;
use tracing::debug;

use crate::augment::{AugmentDraw, DiffAugmentConfig};
use crate::balance::{reference_grad, AdaptiveWeightConfig};
use crate::error::{Error, Result};
use crate::metric::{
    AdaptiveWeightInput, CodeDistanceInput, DiscriminatorLossInput, GradientNorm, GradientNormInput,
    PerplexityInput, TemperatureInput,
};
use crate::model::autoencoder::{AutoencoderConfig, AutoencoderOutput, VqAutoEncoder};
use crate::model::discriminator::{hinge_d_loss, Discriminator, DiscriminatorConfig};
use crate::model::perceptual::{FeatureDistance, FeatureDistanceConfig};
use crate::model::quantizer::{inspect, QuantizeContext};
use crate::ops::ScalarExt;
use crate::schedule::{adopt_weight, GumbelTemperature};

#[derive(Config, Debug)]
pub struct VqGanConfig {
    pub autoencoder: AutoencoderConfig,
    pub discriminator: DiscriminatorConfig,
    pub perceptual: FeatureDistanceConfig,
    #[config(default = "AdaptiveWeightConfig::new()")]
    pub adaptive_weight: AdaptiveWeightConfig,
    #[config(default = "GumbelTemperature::new()")]
    pub temperature: GumbelTemperature,
    #[config(default = "DiffAugmentConfig::new()")]
    pub augment: DiffAugmentConfig,
    #[config(default = 1.0)]
    pub perceptual_weight: f32,
    /// First step at which the adversarial term is weighted in.
    #[config(default = 30001)]
    pub disc_start_step: u64,
    /// Augment both discriminator inputs, or neither.
    #[config(default = true)]
    pub diff_aug: bool,
}

impl VqGanConfig {
    pub fn validate(&self) -> Result<()> {
        self.autoencoder.validate()?;
        self.discriminator.validate()?;
        self.perceptual.validate()?;
        self.augment.validate()?;

        let channels = self.autoencoder.encoder.in_channels;
        let consumers = [
            self.autoencoder.generator.out_channels,
            self.discriminator.channels,
            self.perceptual.channels,
        ];
        if consumers.iter().any(|c| *c != channels) {
            return Err(Error::config(format!(
                "image channels disagree: encoder {channels}, generator/discriminator/perceptual {consumers:?}"
            )));
        }

        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<VqGan<B>> {
        self.validate()?;

        Ok(VqGan {
            autoencoder: self.autoencoder.init(device),
            discriminator: self.discriminator.init(device),
            perceptual: self.perceptual.init(device),
            config: self.clone(),
        })
    }
}

/// Autoencoder, discriminator and the frozen perceptual network trained together.
///
/// The autoencoder and discriminator are separate modules so that each can be stepped by its
/// own optimizer.
#[derive(Debug)]
pub struct VqGan<B: Backend> {
    pub autoencoder: VqAutoEncoder<B>,
    pub discriminator: Discriminator<B>,
    pub perceptual: FeatureDistance<B>,
    pub config: VqGanConfig,
}

#[derive(Debug, Clone)]
pub struct StepStats<B: Backend> {
    pub loss: f32,
    pub l1: f32,
    pub perceptual: f32,
    pub nll: f32,
    pub g_loss: f32,
    pub d_weight: f32,
    pub codebook_loss: f32,
    pub perplexity: f32,
    pub mean_distance: Option<f32>,
    pub temperature: Option<f32>,
    pub gradient_norm: f32,
    /// B x (H'·W')
    pub latent_ids: Tensor<B, 2, Int>,
    pub d_loss: Option<f32>,
    pub batch_size: usize,
}

pub struct TrainStepOutput<B: AutodiffBackend> {
    pub autoencoder_grads: GradientsParams,
    /// Present once the discriminator is past its warm-up.
    pub discriminator_grads: Option<GradientsParams>,
    pub stats: StepStats<B::InnerBackend>,
}

fn augment_with<B: Backend>(draw: Option<&AugmentDraw>, images: Tensor<B, 4>) -> Tensor<B, 4> {
    match draw {
        Some(draw) => draw.apply(images),
        None => images,
    }
}

impl<B: Backend> VqGan<B> {
    /// `mean(|x - x̂| + w · perceptual(x, x̂))`, the perceptual term broadcast per sample.
    fn nll(&self, images: Tensor<B, 4>, reconstruction: Tensor<B, 4>) -> (Tensor<B, 1>, Tensor<B, 4>, Tensor<B, 1>) {
        let [batch, ..] = images.dims();

        let l1 = (images.clone() - reconstruction.clone()).abs();
        let perceptual = self.perceptual.forward(images, reconstruction);

        let nll = (l1.clone() + perceptual.clone().reshape([batch, 1, 1, 1]) * self.config.perceptual_weight).mean();

        (nll, l1, perceptual)
    }

    fn draw<R: Rng>(&self, dims: [usize; 4], rng: &mut R) -> Option<AugmentDraw> {
        self.config.diff_aug.then(|| self.config.augment.draw(dims, rng))
    }
}

impl<B: AutodiffBackend> VqGan<B> {
    /// Reconstruction and adversarial gradients at the generator's last layer, balanced.
    ///
    /// The last layer is replayed on a detached copy of its input so that each loss can be
    /// backpropagated on its own without touching the main graph.
    fn adaptive_weight(
        &self,
        images: Tensor<B, 4>,
        hidden: Tensor<B, 4>,
        fake_draw: Option<&AugmentDraw>,
    ) -> f32 {
        let generator = &self.autoencoder.generator;
        let last_layer = generator.last_layer_weight();
        let hidden = hidden.detach();

        let reconstruction = generator.forward_head(hidden.clone());
        let (nll, ..) = self.nll(images, reconstruction);
        let recon_grad = reference_grad(nll, last_layer);

        let reconstruction = augment_with(fake_draw, generator.forward_head(hidden));
        let g_loss = self.discriminator.forward(reconstruction).mean().neg();
        let adv_grad = reference_grad(g_loss, last_layer);

        self.config.adaptive_weight.weight(recon_grad, adv_grad)
    }

    /// One generator and discriminator loss evaluation, returning gradients for both.
    ///
    /// Nothing is updated here; the caller applies the gradients once the step succeeded.
    pub fn train_step<R: Rng>(
        &self,
        images: Tensor<B, 4>,
        step: u64,
        rng: &mut R,
    ) -> Result<TrainStepOutput<B>> {
        let config = &self.config;
        let [batch_size, ..] = images.dims();
        let temperature = config.temperature.at(step);

        let AutoencoderOutput {
            hidden,
            reconstruction,
            quantizer,
        } = self
            .autoencoder
            .forward(images.clone(), QuantizeContext::training(step, temperature))?;

        let (nll, l1, perceptual) = self.nll(images.clone(), reconstruction.clone());

        let fake_draw = self.draw(images.dims(), rng);
        let fake = augment_with(fake_draw.as_ref(), reconstruction);
        let g_loss = self.discriminator.forward(fake.clone()).mean().neg();

        let gate = adopt_weight(1.0, step, config.disc_start_step, 0.0);
        let d_weight = if gate > 0.0 {
            gate * self.adaptive_weight(images.clone(), hidden, fake_draw.as_ref())
        } else {
            0.0
        };

        let loss = nll.clone() + g_loss.clone() * d_weight + quantizer.loss.clone();
        inspect(&loss, "loss", step, config.autoencoder.quantizer.non_finite)?;

        let mut grads = loss.backward();
        let gradient_norm = GradientNorm::of(&self.autoencoder, &grads);
        let autoencoder_grads = GradientsParams::from_module(&mut grads, &self.autoencoder);

        let (d_loss, discriminator_grads) = if step > config.disc_start_step {
            let real_draw = self.draw(images.dims(), rng);
            let logits_real = self.discriminator.forward(augment_with(real_draw.as_ref(), images.detach()));
            let logits_fake = self.discriminator.forward(fake.detach());

            let d_loss = hinge_d_loss(logits_real, logits_fake);
            let value = d_loss.scalar::<f32>();
            let grads = GradientsParams::from_grads(d_loss.backward(), &self.discriminator);

            (Some(value), Some(grads))
        } else {
            (None, None)
        };

        let stats = StepStats {
            loss: loss.scalar(),
            l1: l1.mean().scalar(),
            perceptual: perceptual.mean().scalar(),
            nll: nll.scalar(),
            g_loss: g_loss.scalar(),
            d_weight,
            codebook_loss: quantizer.loss.scalar(),
            perplexity: quantizer.stats.perplexity,
            mean_distance: quantizer.stats.mean_distance,
            temperature: quantizer.stats.temperature,
            gradient_norm,
            latent_ids: quantizer.stats.indices.inner(),
            d_loss,
            batch_size,
        };

        debug!(step, loss = stats.loss, d_weight, d_loss = ?stats.d_loss, "train step");

        Ok(TrainStepOutput {
            autoencoder_grads,
            discriminator_grads,
            stats,
        })
    }
}

impl<B: Backend> Adaptor<LossInput<B>> for StepStats<B> {
    fn adapt(&self) -> LossInput<B> {
        let device = self.latent_ids.device();
        LossInput::new(Tensor::from_floats([self.loss], &device))
    }
}

impl<B: Backend> Adaptor<PerplexityInput> for StepStats<B> {
    fn adapt(&self) -> PerplexityInput {
        PerplexityInput {
            value: self.perplexity,
        }
    }
}

impl<B: Backend> Adaptor<AdaptiveWeightInput> for StepStats<B> {
    fn adapt(&self) -> AdaptiveWeightInput {
        AdaptiveWeightInput {
            value: self.d_weight,
        }
    }
}

impl<B: Backend> Adaptor<GradientNormInput> for StepStats<B> {
    fn adapt(&self) -> GradientNormInput {
        GradientNormInput {
            value: self.gradient_norm,
        }
    }
}

impl<B: Backend> Adaptor<Option<TemperatureInput>> for StepStats<B> {
    fn adapt(&self) -> Option<TemperatureInput> {
        self.temperature.map(|value| TemperatureInput { value })
    }
}

impl<B: Backend> Adaptor<Option<CodeDistanceInput>> for StepStats<B> {
    fn adapt(&self) -> Option<CodeDistanceInput> {
        self.mean_distance.map(|value| CodeDistanceInput {
            value,
            batch_size: self.batch_size,
        })
    }
}

impl<B: Backend> Adaptor<Option<DiscriminatorLossInput>> for StepStats<B> {
    fn adapt(&self) -> Option<DiscriminatorLossInput> {
        self.d_loss.map(|value| DiscriminatorLossInput {
            value,
            batch_size: self.batch_size,
        })
    }
}
