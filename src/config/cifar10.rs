use crate::config::Architecture;
use crate::train::TrainConfig;

pub fn cifar10_config() -> TrainConfig {
    Architecture {
        channels: 3,
        resolution: 32,
        nf: 64,
        ch_mult: vec![1, 2],
        attn_resolutions: vec![8],
        res_blocks: 1,
        disc_layers: 1,
        codebook_size: 128,
        embedding_dim: 256,
        disc_start_step: 10000,
    }
    .into_train_config(128)
}
