pub mod autoencoder;
pub mod blocks;
pub mod discriminator;
pub mod encoder;
pub mod generator;
pub mod perceptual;
pub mod prior;
pub mod quantizer;

pub use autoencoder::{AutoencoderConfig, AutoencoderOutput, VqAutoEncoder};
pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use encoder::{Encoder, EncoderConfig};
pub use generator::{Generator, GeneratorConfig};
pub use perceptual::{FeatureDistance, FeatureDistanceConfig};
pub use prior::{LatentPrior, LatentPriorConfig};
pub use quantizer::{QuantizerConfig, QuantizerKind, VectorQuantizer};
