use crate::config::Architecture;
use crate::train::TrainConfig;

/// 256x256 faces; the large model only fits a batch of three.
pub fn celeba_config() -> TrainConfig {
    Architecture {
        channels: 3,
        resolution: 256,
        nf: 128,
        ch_mult: vec![1, 1, 2, 2, 4],
        attn_resolutions: vec![16],
        res_blocks: 2,
        disc_layers: 3,
        codebook_size: 256,
        embedding_dim: 1024,
        disc_start_step: 30001,
    }
    .into_train_config(3)
}
