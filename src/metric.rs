pub mod adaptive_weight;
pub mod code_distance;
pub mod discriminator_loss;
pub mod gradnorm;
pub mod perplexity;
pub mod temperature;

pub use adaptive_weight::{AdaptiveWeightInput, AdaptiveWeightMetric};
pub use code_distance::{CodeDistanceInput, CodeDistanceMetric};
pub use discriminator_loss::{DiscriminatorLossInput, DiscriminatorLossMetric};
pub use gradnorm::{GradientNorm, GradientNormInput, GradientNormMetric};
pub use perplexity::{PerplexityInput, PerplexityMetric};
pub use temperature::{TemperatureInput, TemperatureMetric};
