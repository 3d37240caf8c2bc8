use burn::config::Config;

/// Holds the adversarial weight at `value` until `step` reaches `threshold`.
pub fn adopt_weight(weight: f32, step: u64, threshold: u64, value: f32) -> f32 {
    if step < threshold {
        value
    } else {
        weight
    }
}

/// Linear temperature annealing for the Gumbel-softmax relaxation.
#[derive(Config, Debug, Copy)]
pub struct GumbelTemperature {
    #[config(default = 1.0)]
    pub start: f32,
    #[config(default = 0.0625)]
    pub floor: f32,
    #[config(default = 160000)]
    pub anneal_steps: u64,
}

impl GumbelTemperature {
    pub fn at(&self, step: u64) -> f32 {
        let progress = step as f64 / self.anneal_steps.max(1) as f64;
        let temperature = self.start as f64 * (1.0 - progress);

        f32::max(temperature as f32, self.floor)
    }
}

impl Default for GumbelTemperature {
    fn default() -> Self {
        Self::new()
    }
}
