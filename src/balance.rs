use burn::config::Config;
use burn::module::Param;
use burn::prelude::{Backend, Tensor};
use burn::tensor::backend::AutodiffBackend;
use tracing::warn;

use crate::ops::{l2, ScalarExt};

/// Balances the adversarial term against the reconstruction term at a shared layer.
#[derive(Config, Debug)]
pub struct AdaptiveWeightConfig {
    #[config(default = 1e4)]
    pub max_weight: f32,
    #[config(default = 1e-4)]
    pub epsilon: f32,
}

impl AdaptiveWeightConfig {
    /// `|grad recon| / (|grad adv| + eps)`, clamped to `[0, max_weight]`.
    pub fn weight<B: Backend, const D: usize>(
        &self,
        recon_grad: Tensor<B, D>,
        adv_grad: Tensor<B, D>,
    ) -> f32 {
        let recon_norm = l2(recon_grad).scalar::<f32>();
        let adv_norm = l2(adv_grad).scalar::<f32>();

        let weight = recon_norm / (adv_norm + self.epsilon);

        if !weight.is_finite() {
            warn!(recon_norm, adv_norm, "non-finite adaptive weight, using 0");
            return 0.0;
        }

        weight.clamp(0.0, self.max_weight)
    }
}

/// Backpropagates `loss` alone and returns the gradient of `weight`, zeros if it is unreachable.
pub fn reference_grad<B: AutodiffBackend, const D: usize>(
    loss: Tensor<B, 1>,
    weight: &Param<Tensor<B, D>>,
) -> Tensor<B::InnerBackend, D> {
    let grads = loss.backward();
    let weight = weight.val();

    weight
        .grad(&grads)
        .unwrap_or_else(|| weight.inner().zeros_like())
}
