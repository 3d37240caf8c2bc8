use crate::config::Architecture;
use crate::train::TrainConfig;

/// 32x32 greyscale digits with a ten-entry codebook.
pub fn mnist_config() -> TrainConfig {
    Architecture {
        channels: 1,
        resolution: 32,
        nf: 64,
        ch_mult: vec![1, 2],
        attn_resolutions: vec![8],
        res_blocks: 1,
        disc_layers: 1,
        codebook_size: 10,
        embedding_dim: 64,
        disc_start_step: 2000,
    }
    .into_train_config(128)
}
